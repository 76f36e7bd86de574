use crate::common::{OxbowError, PageId, Result, PAGE_SIZE};

use super::btree_page::{get_u32, put_u32};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

/// Bytes reserved for an index name, zero-padded.
pub const INDEX_NAME_SIZE: usize = 32;

const RECORD_SIZE: usize = INDEX_NAME_SIZE + 4;

/// Maximum number of index records the header page can hold.
pub const HEADER_PAGE_CAPACITY: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

/// The header page lives at a well-known page id and maps index names to
/// root page ids. It is rewritten whenever an index is created or re-rooted
/// so that a tree can be reopened by name.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        get_u32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    /// Adds a `(name, root_page_id)` record. Returns false if a record with
    /// this name already exists; fails if the page is out of space.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> Result<bool> {
        assert!(name.len() <= INDEX_NAME_SIZE, "index name too long");
        if self.find_record(name).is_some() {
            return Ok(false);
        }

        let count = self.record_count();
        if count >= HEADER_PAGE_CAPACITY {
            return Err(OxbowError::HeaderFull);
        }

        let offset = record_offset(count);
        self.data[offset..offset + INDEX_NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        put_u32(self.data, offset + INDEX_NAME_SIZE, root_page_id.as_u32());
        put_u32(self.data, RECORD_COUNT_OFFSET, (count + 1) as u32);
        Ok(true)
    }

    /// Updates the root page id of an existing record. Returns false if no
    /// record with this name exists.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find_record(name) {
            Some(index) => {
                put_u32(
                    self.data,
                    record_offset(index) + INDEX_NAME_SIZE,
                    root_page_id.as_u32(),
                );
                true
            }
            None => false,
        }
    }

    /// Returns the recorded root page id for `name`.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        self.find_record(name)
            .map(|index| PageId::new(get_u32(self.data, record_offset(index) + INDEX_NAME_SIZE)))
    }

    fn find_record(&self, name: &str) -> Option<usize> {
        find_record(self.data, name)
    }
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        get_u32(self.data, RECORD_COUNT_OFFSET) as usize
    }

    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        find_record(self.data, name)
            .map(|index| PageId::new(get_u32(self.data, record_offset(index) + INDEX_NAME_SIZE)))
    }
}

fn find_record(data: &[u8], name: &str) -> Option<usize> {
    let count = get_u32(data, RECORD_COUNT_OFFSET) as usize;
    let mut padded = [0u8; INDEX_NAME_SIZE];
    padded[..name.len()].copy_from_slice(name.as_bytes());

    (0..count).find(|&i| {
        let offset = record_offset(i);
        data[offset..offset + INDEX_NAME_SIZE] == padded
    })
}
