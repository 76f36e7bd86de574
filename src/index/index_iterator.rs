use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result, INVALID_PAGE_ID};
use crate::storage::page::LeafPageRef;

/// Forward iterator over the leaf chain, yielding key-value pairs in
/// ascending key order.
///
/// The iterator keeps a pin and a read latch on the current leaf. When it
/// advances off a page it releases the current guard before fetching the
/// successor, so it never holds two leaf latches at once.
pub struct IndexIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    index: usize,
}

impl IndexIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: ReadPageGuard, index: usize) -> Self {
        Self {
            bpm,
            leaf: Some(leaf),
            index,
        }
    }

    /// An exhausted iterator; the position one past the last key.
    pub(crate) fn empty(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            index: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// Advances and returns the next entry, or None at the end of the
    /// rightmost leaf.
    pub fn next_entry(&mut self) -> Result<Option<(u64, RecordId)>> {
        loop {
            let Some(guard) = self.leaf.as_ref() else {
                return Ok(None);
            };

            let node = LeafPageRef::new(guard.data());
            if self.index < node.size() {
                let entry = (node.key_at(self.index), node.value_at(self.index));
                self.index += 1;
                return Ok(Some(entry));
            }

            let next = node.next_page_id();
            // Release the current leaf before latching its successor.
            self.leaf = None;
            self.index = 0;
            if next == INVALID_PAGE_ID {
                return Ok(None);
            }
            self.leaf = Some(self.bpm.fetch_page_read(next)?);
        }
    }
}

impl Iterator for IndexIterator {
    type Item = Result<(u64, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
