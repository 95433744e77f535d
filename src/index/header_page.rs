use crate::common::{PageId, PAGE_SIZE};

/// The header page (page 0) maps index names to root page ids so that B+
/// trees can be located again after a restart.
///
/// Layout: record count (u32), then fixed-width records of a zero-padded
/// 32-byte name followed by the root page id (i32).
const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

/// Largest number of index records the header page can hold
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn name_matches(data: &[u8], index: usize, name: &str) -> bool {
    let offset = record_offset(index);
    let stored = &data[offset..offset + NAME_SIZE];
    let name = name.as_bytes();
    name.len() <= NAME_SIZE
        && &stored[..name.len()] == name
        && stored[name.len()..].iter().all(|&b| b == 0)
}

fn read_count(data: &[u8]) -> usize {
    u32::from_le_bytes(
        data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .try_into()
            .unwrap(),
    ) as usize
}

fn read_root(data: &[u8], index: usize) -> PageId {
    let offset = record_offset(index) + NAME_SIZE;
    PageId::new(i32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()))
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_count(self.data)
    }

    /// Looks up the root page id recorded for `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        (0..self.record_count())
            .find(|&i| name_matches(self.data, i, name))
            .map(|i| read_root(self.data, i))
    }
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        read_count(self.data)
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        (0..self.record_count())
            .find(|&i| name_matches(self.data, i, name))
            .map(|i| read_root(self.data, i))
    }

    /// Updates the record for `name`, creating it if absent. Returns false
    /// when the page is full or the name does not fit.
    pub fn set_root_id(&mut self, name: &str, root: PageId) -> bool {
        if name.as_bytes().len() > NAME_SIZE {
            return false;
        }

        let count = self.record_count();
        let slot = (0..count).find(|&i| name_matches(self.data, i, name));

        let index = match slot {
            Some(i) => i,
            None => {
                if count >= MAX_HEADER_RECORDS {
                    return false;
                }
                let offset = record_offset(count);
                self.data[offset..offset + NAME_SIZE].fill(0);
                self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
                self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                    .copy_from_slice(&((count + 1) as u32).to_le_bytes());
                count
            }
        };

        let offset = record_offset(index) + NAME_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&root.as_i32().to_le_bytes());
        true
    }
}
