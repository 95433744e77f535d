use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;

use crate::buffer::{BufferPoolManager, ReadPageGuard, WritePageGuard};
use crate::common::{
    KeelError, PageId, RecordId, Result, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::concurrency::Transaction;

use super::btree_iterator::BTreeIterator;
use super::btree_page::{BTreeNode, BTreeNodeRef, IndexKey};
use super::header_page::HeaderPage;

/// Latch policy for a root-to-leaf descent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LatchIntent {
    Insert,
    Delete,
}

/// A concurrent B+ tree index over the buffer pool.
///
/// Nodes are pages; the tree holds only page identifiers, never references.
/// Concurrency uses latch crabbing: a read descent holds at most a parent
/// and child read latch at once, while insert/delete descents keep
/// write-latched ancestors (the `Vec<WritePageGuard>` built by
/// [`Self::find_leaf_write`]) until a structurally safe child is reached.
/// Root identity changes serialize on the `root_page_id` mutex; a descent
/// that latches a page whose parent id is not INVALID knows the root moved
/// underneath it and restarts.
///
/// Keys are unique. Pages emptied by splits and merges are recorded on the
/// transaction's deleted-page set and only returned to the buffer pool once
/// every latch of the operation has been released.
pub struct BPlusTree {
    index_name: String,
    /// Root page id, and the latch serializing root changes
    root_page_id: Mutex<PageId>,
    bpm: Arc<BufferPoolManager>,
    leaf_max_size: usize,
    internal_max_size: usize,
}

impl BPlusTree {
    /// Opens the index named `index_name`, creating its header-page record
    /// if this is the first time the name is seen.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self> {
        let index_name = index_name.into();
        assert!(leaf_max_size >= 2 && internal_max_size >= 2);

        let root = {
            let mut guard = bpm
                .fetch_page_write(HEADER_PAGE_ID)?
                .ok_or(KeelError::BufferPoolFull)?;
            let mut header = HeaderPage::new(guard.data_mut());
            match header.get_root_id(&index_name) {
                Some(root) => root,
                None => {
                    if !header.set_root_id(&index_name, INVALID_PAGE_ID) {
                        return Err(KeelError::HeaderPageFull);
                    }
                    INVALID_PAGE_ID
                }
            }
        };

        Ok(Self {
            index_name,
            root_page_id: Mutex::new(root),
            bpm,
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn get_root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup. Appends the value for `key` (if any) to `result` and
    /// returns whether the key was found.
    pub fn get_value(
        &self,
        key: IndexKey,
        result: &mut Vec<RecordId>,
        _txn: &Transaction,
    ) -> Result<bool> {
        let guard = match self.find_leaf_read(Some(key))? {
            Some(guard) => guard,
            None => return Ok(false),
        };
        let node = BTreeNodeRef::new(guard.data());
        let pos = node.leaf_lower_bound(key);
        if pos < node.size() && node.key_at(pos) == key {
            result.push(node.rid_at(pos));
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Inserts a key/value pair. Returns false (without mutating the tree)
    /// if the key already exists.
    pub fn insert(&self, key: IndexKey, rid: RecordId, txn: &Transaction) -> Result<bool> {
        loop {
            if let Some(inserted) = self.try_start_new_tree(key, rid)? {
                return Ok(inserted);
            }

            if let Some(mut guards) = self.find_leaf_write(key, LatchIntent::Insert)? {
                let inserted = self.insert_into_leaf(&mut guards, key, rid, txn)?;
                drop(guards);
                self.drain_deleted_pages(txn)?;
                return Ok(inserted);
            }
            // The tree was drained between the empty check and the descent;
            // go around again.
        }
    }

    /// Removes `key` if present. Absent keys are a no-op.
    pub fn remove(&self, key: IndexKey, txn: &Transaction) -> Result<()> {
        let mut guards = match self.find_leaf_write(key, LatchIntent::Delete)? {
            Some(guards) => guards,
            None => return Ok(()),
        };
        self.remove_from_leaf(&mut guards, key, txn)?;
        drop(guards);
        self.drain_deleted_pages(txn)?;
        Ok(())
    }

    /// Iterator positioned at the smallest key.
    pub fn begin(&self) -> Result<BTreeIterator> {
        match self.find_leaf_read(None)? {
            None => Ok(BTreeIterator::end(Arc::clone(&self.bpm))),
            Some(guard) => Ok(BTreeIterator::new(
                Arc::clone(&self.bpm),
                guard.page_id(),
                0,
            )),
        }
    }

    /// Iterator positioned at the first entry whose key is >= `key`.
    pub fn begin_at(&self, key: IndexKey) -> Result<BTreeIterator> {
        match self.find_leaf_read(Some(key))? {
            None => Ok(BTreeIterator::end(Arc::clone(&self.bpm))),
            Some(guard) => {
                let node = BTreeNodeRef::new(guard.data());
                let pos = node.leaf_lower_bound(key);
                if pos < node.size() {
                    Ok(BTreeIterator::new(
                        Arc::clone(&self.bpm),
                        guard.page_id(),
                        pos,
                    ))
                } else {
                    // Past the last entry of this leaf; start at the next one.
                    let next = node.next_page_id();
                    if next == INVALID_PAGE_ID {
                        Ok(BTreeIterator::end(Arc::clone(&self.bpm)))
                    } else {
                        Ok(BTreeIterator::new(Arc::clone(&self.bpm), next, 0))
                    }
                }
            }
        }
    }

    /// The end iterator, (INVALID_PAGE_ID, 0).
    pub fn end(&self) -> BTreeIterator {
        BTreeIterator::end(Arc::clone(&self.bpm))
    }

    // ------------------------------------------------------------------
    // Descent
    // ------------------------------------------------------------------

    /// Read-crabbed descent to the leaf for `key` (leftmost leaf when
    /// `key` is None). At most two read latches are held at a time; the
    /// child is latched before the parent is released. Returns None on an
    /// empty tree.
    fn find_leaf_read(&self, key: Option<IndexKey>) -> Result<Option<ReadPageGuard>> {
        'retry: loop {
            let root_id = *self.root_page_id.lock();
            if root_id == INVALID_PAGE_ID {
                return Ok(None);
            }

            let mut guard = self.fetch_read(root_id)?;
            if BTreeNodeRef::new(guard.data()).parent_page_id() != INVALID_PAGE_ID {
                // Root changed between reading the id and latching the page
                continue 'retry;
            }

            loop {
                let child_id = {
                    let node = BTreeNodeRef::new(guard.data());
                    if node.is_leaf() {
                        return Ok(Some(guard));
                    }
                    match key {
                        Some(key) => node.child_at(node.child_index_for(key)),
                        None => node.child_at(0),
                    }
                };
                // Latch the child, then drop the parent.
                let child = self.fetch_read(child_id)?;
                guard = child;
            }
        }
    }

    /// Write-crabbed descent to the leaf for `key`.
    ///
    /// Returns the write-latched path, root-most first, trimmed to the
    /// deepest unsafe ancestor: whenever a newly latched node is safe for
    /// `intent`, every latch above it is released. Returns None on an empty
    /// tree.
    fn find_leaf_write(
        &self,
        key: IndexKey,
        intent: LatchIntent,
    ) -> Result<Option<Vec<WritePageGuard>>> {
        'retry: loop {
            let root_id = *self.root_page_id.lock();
            if root_id == INVALID_PAGE_ID {
                return Ok(None);
            }

            let mut guard = self.fetch_write(root_id)?;
            if BTreeNodeRef::new(guard.data()).parent_page_id() != INVALID_PAGE_ID {
                continue 'retry;
            }

            let mut guards: Vec<WritePageGuard> = Vec::new();
            loop {
                let (is_leaf, child_id, safe) = {
                    let node = BTreeNodeRef::new(guard.data());
                    let safe = match intent {
                        LatchIntent::Insert => {
                            if node.is_leaf() {
                                node.size() < node.max_size() - 1
                            } else {
                                node.size() < node.max_size()
                            }
                        }
                        LatchIntent::Delete => node.size() > node.min_size(),
                    };
                    if node.is_leaf() {
                        (true, INVALID_PAGE_ID, safe)
                    } else {
                        (false, node.child_at(node.child_index_for(key)), safe)
                    }
                };

                if safe {
                    // Ancestors can no longer be affected; release them.
                    guards.clear();
                }
                guards.push(guard);
                if is_leaf {
                    return Ok(Some(guards));
                }
                guard = self.fetch_write(child_id)?;
            }
        }
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Creates the root leaf holding (key, rid) if the tree is empty.
    /// Returns None when the tree already has a root.
    fn try_start_new_tree(&self, key: IndexKey, rid: RecordId) -> Result<Option<bool>> {
        let mut root_latch = self.root_page_id.lock();
        if *root_latch != INVALID_PAGE_ID {
            return Ok(None);
        }

        let mut guard = self.alloc_page()?;
        let page_id = guard.page_id();
        {
            let mut node = BTreeNode::new(guard.data_mut());
            node.init_leaf(page_id, self.leaf_max_size);
            node.set_is_root(true);
            node.leaf_insert_at(0, key, rid);
        }
        drop(guard);

        *root_latch = page_id;
        self.update_header_root(page_id)?;
        debug!("{}: new tree rooted at {}", self.index_name, page_id);
        Ok(Some(true))
    }

    fn insert_into_leaf(
        &self,
        guards: &mut Vec<WritePageGuard>,
        key: IndexKey,
        rid: RecordId,
        txn: &Transaction,
    ) -> Result<bool> {
        let leaf_level = guards.len() - 1;

        let needs_split = {
            let guard = &mut guards[leaf_level];
            let pos = {
                let node = BTreeNodeRef::new(guard.data());
                let pos = node.leaf_lower_bound(key);
                if pos < node.size() && node.key_at(pos) == key {
                    return Ok(false);
                }
                pos
            };
            let mut node = BTreeNode::new(guard.data_mut());
            node.leaf_insert_at(pos, key, rid);
            node.size() == node.max_size()
        };

        if needs_split {
            self.split_leaf(guards, txn)?;
        }
        Ok(true)
    }

    /// Splits the full leaf at the bottom of the latched path. The left
    /// node keeps floor(max/2) entries; the smallest key of the new right
    /// sibling becomes the separator pushed into the parent.
    fn split_leaf(&self, guards: &mut Vec<WritePageGuard>, txn: &Transaction) -> Result<()> {
        let leaf_level = guards.len() - 1;

        let mut right_guard = self.alloc_page()?;
        let right_id = right_guard.page_id();

        let (leaf_id, leaf_is_root, sep) = {
            let leaf_guard = &mut guards[leaf_level];
            let leaf_id = leaf_guard.page_id();
            let mut leaf = BTreeNode::new(leaf_guard.data_mut());
            let size = leaf.size();
            let left_size = leaf.max_size() / 2;

            let mut right = BTreeNode::new(right_guard.data_mut());
            right.init_leaf(right_id, self.leaf_max_size);
            right.set_size(size - left_size);
            for i in 0..size - left_size {
                right.set_key_at(i, leaf.key_at(left_size + i));
                right.set_rid_at(i, leaf.rid_at(left_size + i));
            }
            right.set_next_page_id(leaf.next_page_id());
            right.set_parent_page_id(leaf.parent_page_id());

            leaf.set_next_page_id(right_id);
            leaf.set_size(left_size);

            (leaf_id, leaf.is_root(), right.key_at(0))
        };
        trace!(
            "{}: leaf {} split, right sibling {}",
            self.index_name,
            leaf_id,
            right_id
        );

        if leaf_is_root {
            let mut root_latch = self.root_page_id.lock();

            let mut root_guard = self.alloc_page()?;
            let new_root_id = root_guard.page_id();
            {
                let mut root = BTreeNode::new(root_guard.data_mut());
                root.init_internal(new_root_id, self.internal_max_size);
                root.set_is_root(true);
                root.set_size(2);
                root.set_key_at(0, sep);
                root.set_child_at(0, leaf_id);
                root.set_key_at(1, sep);
                root.set_child_at(1, right_id);
            }
            {
                let leaf_guard = &mut guards[leaf_level];
                let mut leaf = BTreeNode::new(leaf_guard.data_mut());
                leaf.set_is_root(false);
                leaf.set_parent_page_id(new_root_id);
            }
            {
                let mut right = BTreeNode::new(right_guard.data_mut());
                right.set_parent_page_id(new_root_id);
            }
            drop(root_guard);
            drop(right_guard);

            *root_latch = new_root_id;
            self.update_header_root(new_root_id)?;
            debug!("{}: new root {} after leaf split", self.index_name, new_root_id);
            return Ok(());
        }

        drop(right_guard);
        self.insert_into_parent(guards, leaf_level - 1, sep, leaf_id, right_id, txn)
    }

    /// Inserts (sep, left) into the internal node at `level`, with `right`
    /// taking over the child slot after it. Splits the node when full.
    fn insert_into_parent(
        &self,
        guards: &mut Vec<WritePageGuard>,
        level: usize,
        sep: IndexKey,
        left_id: PageId,
        right_id: PageId,
        txn: &Transaction,
    ) -> Result<()> {
        let is_full = {
            let node = BTreeNodeRef::new(guards[level].data());
            node.size() == node.max_size()
        };

        if !is_full {
            let guard = &mut guards[level];
            let mut node = BTreeNode::new(guard.data_mut());
            let pos = node.child_index_for(sep);
            node.internal_insert_at(pos, sep, left_id);
            node.set_child_at(pos + 1, right_id);
            return Ok(());
        }

        self.split_internal(guards, level, sep, left_id, right_id, txn)
    }

    /// Splits the full internal node at `level` around the inserted
    /// (sep, left/right) pair.
    ///
    /// The max+1 entries are distributed across two freshly allocated
    /// nodes; the last separator of the left node is promoted. A root is
    /// rewritten in place as the two-child parent of the new pair (so the
    /// root page id is stable); any other node is retired onto the
    /// transaction's deleted-page set and the promotion recurses.
    fn split_internal(
        &self,
        guards: &mut Vec<WritePageGuard>,
        level: usize,
        sep: IndexKey,
        left_id: PageId,
        right_id: PageId,
        txn: &Transaction,
    ) -> Result<()> {
        let (mut entries, node_id, node_parent, node_is_root) = {
            let node = BTreeNodeRef::new(guards[level].data());
            let entries: Vec<(IndexKey, PageId)> = (0..node.size())
                .map(|i| (node.key_at(i), node.child_at(i)))
                .collect();
            (
                entries,
                node.page_id(),
                node.parent_page_id(),
                node.is_root(),
            )
        };

        // Splice the new separator in, exactly as a non-full insert would.
        let pos = {
            let node = BTreeNodeRef::new(guards[level].data());
            node.child_index_for(sep)
        };
        entries.insert(pos, (sep, left_id));
        entries[pos + 1].1 = right_id;

        let total = entries.len();
        let left_size = (self.internal_max_size + 1) / 2;

        let mut left_guard = self.alloc_page()?;
        let new_left_id = left_guard.page_id();
        let mut right_guard = self.alloc_page()?;
        let new_right_id = right_guard.page_id();

        let new_parent = if node_is_root { node_id } else { node_parent };
        {
            let mut left = BTreeNode::new(left_guard.data_mut());
            left.init_internal(new_left_id, self.internal_max_size);
            left.set_size(left_size);
            for (i, &(key, child)) in entries[..left_size].iter().enumerate() {
                left.set_key_at(i, key);
                left.set_child_at(i, child);
            }
            left.set_parent_page_id(new_parent);
        }
        {
            let mut right = BTreeNode::new(right_guard.data_mut());
            right.init_internal(new_right_id, self.internal_max_size);
            right.set_size(total - left_size);
            for (i, &(key, child)) in entries[left_size..].iter().enumerate() {
                right.set_key_at(i, key);
                right.set_child_at(i, child);
            }
            right.set_parent_page_id(new_parent);
        }
        let promoted = entries[left_size - 1].0;
        trace!(
            "{}: internal {} split into {} and {}",
            self.index_name,
            node_id,
            new_left_id,
            new_right_id
        );

        // Re-home the children. The direct child from this operation's path
        // is still write-latched in `guards`; everyone else gets a brief
        // latch (safe: their parent is latched by us, so no descent can be
        // holding them for long).
        for (i, &(_, child)) in entries.iter().enumerate() {
            let target = if i < left_size {
                new_left_id
            } else {
                new_right_id
            };
            self.set_parent(guards, child, target)?;
        }

        if node_is_root {
            // Reuse the root page in place so root_page_id is unchanged.
            let guard = &mut guards[level];
            let mut node = BTreeNode::new(guard.data_mut());
            node.set_size(2);
            node.set_key_at(0, promoted);
            node.set_child_at(0, new_left_id);
            node.set_key_at(1, promoted);
            node.set_child_at(1, new_right_id);
            return Ok(());
        }

        drop(left_guard);
        drop(right_guard);

        // The old page is unreachable once the parent is rewired; free it
        // after every latch is released.
        txn.add_deleted_page(node_id);
        self.insert_into_parent(guards, level - 1, promoted, new_left_id, new_right_id, txn)
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    fn remove_from_leaf(
        &self,
        guards: &mut Vec<WritePageGuard>,
        key: IndexKey,
        txn: &Transaction,
    ) -> Result<()> {
        let leaf_level = guards.len() - 1;

        let (is_root, underflow, new_size) = {
            let guard = &mut guards[leaf_level];
            let pos = {
                let node = BTreeNodeRef::new(guard.data());
                let pos = node.leaf_lower_bound(key);
                if pos >= node.size() || node.key_at(pos) != key {
                    return Ok(());
                }
                pos
            };
            let mut node = BTreeNode::new(guard.data_mut());
            node.leaf_remove_at(pos);
            (
                node.is_root(),
                node.size() < node.min_size(),
                node.size(),
            )
        };

        if is_root {
            if new_size == 0 {
                // Tree fully drained: retire the root. The page is left
                // allocated; its self-referencing parent pointer makes any
                // racing descent restart and observe the empty tree.
                let mut root_latch = self.root_page_id.lock();
                {
                    let guard = &mut guards[leaf_level];
                    let mut node = BTreeNode::new(guard.data_mut());
                    let self_id = node.page_id();
                    node.set_parent_page_id(self_id);
                    node.set_is_root(false);
                }
                *root_latch = INVALID_PAGE_ID;
                self.update_header_root(INVALID_PAGE_ID)?;
                debug!("{}: tree drained", self.index_name);
            }
            return Ok(());
        }

        if underflow {
            self.fix_underflow(guards, leaf_level, txn)?;
        }
        Ok(())
    }

    /// Repairs the underflowed non-root node at `level`: borrow from the
    /// left sibling, borrow from the right, merge into the left, merge the
    /// right into it - first that applies.
    fn fix_underflow(
        &self,
        guards: &mut Vec<WritePageGuard>,
        level: usize,
        txn: &Transaction,
    ) -> Result<()> {
        if self.borrow_from_left(guards, level)? {
            return Ok(());
        }
        if self.borrow_from_right(guards, level)? {
            return Ok(());
        }
        if self.merge_to_left(guards, level, txn)? {
            return Ok(());
        }
        let merged = self.merge_to_right(guards, level, txn)?;
        assert!(merged, "underflowed node has no sibling to merge with");
        Ok(())
    }

    /// Position of the node at `level` among its parent's children.
    fn position_in_parent(&self, guards: &[WritePageGuard], level: usize) -> usize {
        let node_id = guards[level].page_id();
        let parent = BTreeNodeRef::new(guards[level - 1].data());
        parent
            .position_of_child(node_id)
            .expect("node missing from its parent")
    }

    fn borrow_from_left(&self, guards: &mut Vec<WritePageGuard>, level: usize) -> Result<bool> {
        let pos = self.position_in_parent(guards, level);
        if pos == 0 {
            return Ok(false);
        }
        let left_id = {
            let parent = BTreeNodeRef::new(guards[level - 1].data());
            parent.child_at(pos - 1)
        };

        let mut left_guard = self.fetch_write(left_id)?;
        {
            let left = BTreeNodeRef::new(left_guard.data());
            if left.size() <= left.min_size() {
                return Ok(false);
            }
        }

        let node_id = guards[level].page_id();
        let mut reparented_child = None;
        {
            let (front, back) = guards.split_at_mut(level);
            let mut parent = BTreeNode::new(front[level - 1].data_mut());
            let mut node = BTreeNode::new(back[0].data_mut());
            let mut left = BTreeNode::new(left_guard.data_mut());
            let left_size = left.size();

            if node.is_leaf() {
                let key = left.key_at(left_size - 1);
                let rid = left.rid_at(left_size - 1);
                left.set_size(left_size - 1);
                node.leaf_insert_at(0, key, rid);
                parent.set_key_at(pos - 1, key);
            } else {
                // The moved child keeps the old parent separator as its
                // upper bound; the left node's second-to-last separator
                // takes over in the parent.
                let moved_child = left.child_at(left_size - 1);
                let sep = parent.key_at(pos - 1);
                node.internal_insert_at(0, sep, moved_child);
                parent.set_key_at(pos - 1, left.key_at(left_size - 2));
                left.set_size(left_size - 1);
                reparented_child = Some(moved_child);
            }
        }
        drop(left_guard);

        if let Some(child) = reparented_child {
            self.set_parent(guards, child, node_id)?;
        }
        trace!("{}: node {} borrowed from left", self.index_name, node_id);
        Ok(true)
    }

    fn borrow_from_right(&self, guards: &mut Vec<WritePageGuard>, level: usize) -> Result<bool> {
        let pos = self.position_in_parent(guards, level);
        let right_id = {
            let parent = BTreeNodeRef::new(guards[level - 1].data());
            if pos >= parent.size() - 1 {
                return Ok(false);
            }
            parent.child_at(pos + 1)
        };

        let mut right_guard = self.fetch_write(right_id)?;
        {
            let right = BTreeNodeRef::new(right_guard.data());
            if right.size() <= right.min_size() {
                return Ok(false);
            }
        }

        let node_id = guards[level].page_id();
        let mut reparented_child = None;
        {
            let (front, back) = guards.split_at_mut(level);
            let mut parent = BTreeNode::new(front[level - 1].data_mut());
            let mut node = BTreeNode::new(back[0].data_mut());
            let mut right = BTreeNode::new(right_guard.data_mut());
            let right_size = right.size();

            if node.is_leaf() {
                let key = right.key_at(0);
                let rid = right.rid_at(0);
                node.leaf_insert_at(node.size(), key, rid);
                right.leaf_remove_at(0);
                parent.set_key_at(pos, right.key_at(0));
            } else {
                // The borrowed child slides in under the old parent
                // separator; the right node's first separator moves up.
                let moved_child = right.child_at(0);
                let node_size = node.size();
                node.set_key_at(node_size - 1, parent.key_at(pos));
                node.set_size(node_size + 1);
                node.set_child_at(node_size, moved_child);
                parent.set_key_at(pos, right.key_at(0));
                for i in 0..right_size - 1 {
                    let key = right.key_at(i + 1);
                    let child = right.child_at(i + 1);
                    right.set_key_at(i, key);
                    right.set_child_at(i, child);
                }
                right.set_size(right_size - 1);
                reparented_child = Some(moved_child);
            }
        }
        drop(right_guard);

        if let Some(child) = reparented_child {
            self.set_parent(guards, child, node_id)?;
        }
        trace!("{}: node {} borrowed from right", self.index_name, node_id);
        Ok(true)
    }

    fn merge_to_left(
        &self,
        guards: &mut Vec<WritePageGuard>,
        level: usize,
        txn: &Transaction,
    ) -> Result<bool> {
        let pos = self.position_in_parent(guards, level);
        if pos == 0 {
            return Ok(false);
        }
        let (left_id, sep) = {
            let parent = BTreeNodeRef::new(guards[level - 1].data());
            (parent.child_at(pos - 1), parent.key_at(pos - 1))
        };
        let node_id = guards[level].page_id();

        let mut left_guard = self.fetch_write(left_id)?;
        let mut moved_children = Vec::new();
        {
            let node = BTreeNodeRef::new(guards[level].data());
            let mut left = BTreeNode::new(left_guard.data_mut());
            let left_size = left.size();
            debug_assert!(left_size <= left.min_size());

            if node.is_leaf() {
                left.set_size(left_size + node.size());
                for i in 0..node.size() {
                    left.set_key_at(left_size + i, node.key_at(i));
                    left.set_rid_at(left_size + i, node.rid_at(i));
                }
                left.set_next_page_id(node.next_page_id());
            } else {
                // The old separator becomes the left node's live bound for
                // its (previously padding) last child slot.
                left.set_key_at(left_size - 1, sep);
                left.set_size(left_size + node.size());
                for i in 0..node.size() {
                    left.set_key_at(left_size + i, node.key_at(i));
                    left.set_child_at(left_size + i, node.child_at(i));
                    moved_children.push(node.child_at(i));
                }
            }
        }

        for child in moved_children {
            self.set_parent(guards, child, left_id)?;
        }
        drop(left_guard);

        debug!("{}: node {} merged into {}", self.index_name, node_id, left_id);
        txn.add_deleted_page(node_id);
        self.remove_separator(guards, level - 1, pos - 1, txn)
            .map(|_| true)
    }

    fn merge_to_right(
        &self,
        guards: &mut Vec<WritePageGuard>,
        level: usize,
        txn: &Transaction,
    ) -> Result<bool> {
        let pos = self.position_in_parent(guards, level);
        let (right_id, sep) = {
            let parent = BTreeNodeRef::new(guards[level - 1].data());
            if pos >= parent.size() - 1 {
                return Ok(false);
            }
            (parent.child_at(pos + 1), parent.key_at(pos))
        };
        let node_id = guards[level].page_id();

        let mut right_guard = self.fetch_write(right_id)?;
        let mut moved_children = Vec::new();
        {
            let right = BTreeNodeRef::new(right_guard.data());
            let node_guard = &mut guards[level];
            let mut node = BTreeNode::new(node_guard.data_mut());
            let node_size = node.size();
            debug_assert!(right.size() <= right.min_size());

            if node.is_leaf() {
                node.set_size(node_size + right.size());
                for i in 0..right.size() {
                    node.set_key_at(node_size + i, right.key_at(i));
                    node.set_rid_at(node_size + i, right.rid_at(i));
                }
                node.set_next_page_id(right.next_page_id());
            } else {
                node.set_key_at(node_size - 1, sep);
                node.set_size(node_size + right.size());
                for i in 0..right.size() {
                    node.set_key_at(node_size + i, right.key_at(i));
                    node.set_child_at(node_size + i, right.child_at(i));
                    moved_children.push(right.child_at(i));
                }
            }
        }
        drop(right_guard);

        // The absorbed sibling's children are outside this operation's
        // latched path, so brief latches suffice.
        for child in moved_children {
            self.set_parent(guards, child, node_id)?;
        }

        debug!(
            "{}: node {} absorbed right sibling {}",
            self.index_name, node_id, right_id
        );
        txn.add_deleted_page(right_id);
        self.remove_separator(guards, level - 1, pos, txn).map(|_| true)
    }

    /// Removes separator `pos` (and the child after it) from the internal
    /// node at `level`, then repairs it: a size-1 root collapses into its
    /// lone child, any other underflow recurses into [`Self::fix_underflow`].
    fn remove_separator(
        &self,
        guards: &mut Vec<WritePageGuard>,
        level: usize,
        pos: usize,
        txn: &Transaction,
    ) -> Result<()> {
        let (is_root, new_size, min_size) = {
            let guard = &mut guards[level];
            let mut node = BTreeNode::new(guard.data_mut());
            node.internal_remove_separator(pos);
            (node.is_root(), node.size(), node.min_size())
        };

        if is_root {
            if new_size == 1 {
                // Collapse the root into its lone child. The old root page
                // stays allocated with a self-referencing parent pointer so
                // racing descents restart.
                let mut root_latch = self.root_page_id.lock();
                let lone_child = {
                    let guard = &mut guards[level];
                    let mut node = BTreeNode::new(guard.data_mut());
                    let self_id = node.page_id();
                    let child = node.child_at(0);
                    node.set_parent_page_id(self_id);
                    node.set_is_root(false);
                    child
                };
                self.promote_to_root(guards, lone_child)?;
                *root_latch = lone_child;
                self.update_header_root(lone_child)?;
                debug!("{}: root collapsed into {}", self.index_name, lone_child);
            }
            return Ok(());
        }

        if new_size < min_size {
            self.fix_underflow(guards, level, txn)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Sets `child`'s parent pointer, going through the already-held latch
    /// when the child is on this operation's path and a brief write latch
    /// otherwise.
    fn set_parent(
        &self,
        guards: &mut [WritePageGuard],
        child: PageId,
        parent: PageId,
    ) -> Result<()> {
        if let Some(guard) = guards.iter_mut().find(|g| g.page_id() == child) {
            BTreeNode::new(guard.data_mut()).set_parent_page_id(parent);
            return Ok(());
        }
        let mut guard = self.fetch_write(child)?;
        BTreeNode::new(guard.data_mut()).set_parent_page_id(parent);
        Ok(())
    }

    /// Makes `child` the new root: parent pointer INVALID, root flag set.
    fn promote_to_root(&self, guards: &mut [WritePageGuard], child: PageId) -> Result<()> {
        if let Some(guard) = guards.iter_mut().find(|g| g.page_id() == child) {
            let mut node = BTreeNode::new(guard.data_mut());
            node.set_parent_page_id(INVALID_PAGE_ID);
            node.set_is_root(true);
            return Ok(());
        }
        let mut guard = self.fetch_write(child)?;
        let mut node = BTreeNode::new(guard.data_mut());
        node.set_parent_page_id(INVALID_PAGE_ID);
        node.set_is_root(true);
        Ok(())
    }

    /// Hands the transaction's deferred page deletions to the buffer pool.
    /// Must be called only after every latch of the operation is released.
    fn drain_deleted_pages(&self, txn: &Transaction) -> Result<()> {
        for page_id in txn.take_deleted_pages() {
            if !self.bpm.delete_page(page_id)? {
                // Still transiently pinned by a racing descent; the id
                // stays allocated.
                trace!("{}: deferred delete of {} skipped", self.index_name, page_id);
            }
        }
        Ok(())
    }

    fn update_header_root(&self, root: PageId) -> Result<()> {
        let mut guard = self.fetch_write(HEADER_PAGE_ID)?;
        let mut header = HeaderPage::new(guard.data_mut());
        if !header.set_root_id(&self.index_name, root) {
            return Err(KeelError::HeaderPageFull);
        }
        Ok(())
    }

    fn alloc_page(&self) -> Result<WritePageGuard> {
        self.bpm.new_page()?.ok_or(KeelError::BufferPoolFull)
    }

    fn fetch_read(&self, page_id: PageId) -> Result<ReadPageGuard> {
        self.bpm
            .fetch_page_read(page_id)?
            .ok_or(KeelError::BufferPoolFull)
    }

    fn fetch_write(&self, page_id: PageId) -> Result<WritePageGuard> {
        self.bpm
            .fetch_page_write(page_id)?
            .ok_or(KeelError::BufferPoolFull)
    }
}
