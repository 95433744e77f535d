use std::sync::Arc;

use crate::buffer::BufferPoolManager;
use crate::common::{KeelError, PageId, RecordId, Result, INVALID_PAGE_ID};

use super::btree_page::{BTreeNodeRef, IndexKey};

/// Forward cursor over the leaf chain of a B+ tree.
///
/// The cursor is a (leaf page id, offset) pair; the end iterator is
/// (INVALID_PAGE_ID, 0). Each step pins and read-latches exactly one leaf
/// for the duration of the access, so iteration never deadlocks against
/// structural changes - but it is not stable under concurrent writes: a
/// concurrent split or merge may cause entries to be skipped or observed
/// twice.
pub struct BTreeIterator {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    offset: usize,
}

impl BTreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, offset: usize) -> Self {
        Self {
            bpm,
            page_id,
            offset,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            page_id: INVALID_PAGE_ID,
            offset: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.page_id == INVALID_PAGE_ID && self.offset == 0
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn step(&mut self) -> Result<Option<(IndexKey, RecordId)>> {
        while self.page_id != INVALID_PAGE_ID {
            let guard = self
                .bpm
                .fetch_page_read(self.page_id)?
                .ok_or(KeelError::BufferPoolFull)?;
            let node = BTreeNodeRef::new(guard.data());

            if self.offset < node.size() {
                let entry = (node.key_at(self.offset), node.rid_at(self.offset));
                // Advance in place: next slot, or the head of the next leaf.
                if self.offset + 1 < node.size() {
                    self.offset += 1;
                } else {
                    self.page_id = node.next_page_id();
                    self.offset = 0;
                }
                return Ok(Some(entry));
            }

            // Ran off the leaf (possible after a concurrent shrink); follow
            // the chain.
            self.page_id = node.next_page_id();
            self.offset = 0;
        }

        Ok(None)
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
