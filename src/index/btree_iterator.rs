use std::sync::Arc;

use crate::buffer::{BufferPoolManager, ReadPageGuard};
use crate::common::{RecordId, Result};

use super::btree_page::IndexKey;
use super::leaf_page::LeafNodeRef;

/// Forward iterator over the leaf chain. Holds the current leaf pinned and
/// read-latched; stepping past the last entry releases it before fetching
/// the next leaf, so a structural writer waiting on this leaf can always
/// make progress. Exhaustion is represented by holding no leaf at all.
pub struct BTreeIterator {
    bpm: Arc<BufferPoolManager>,
    leaf: Option<ReadPageGuard>,
    index: usize,
}

impl BTreeIterator {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, leaf: ReadPageGuard, index: usize) -> Self {
        Self {
            bpm,
            leaf: Some(leaf),
            index,
        }
    }

    pub(crate) fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            leaf: None,
            index: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.leaf.is_none()
    }

    /// Yields the next `(key, rid)` pair, following `next_page_id` across
    /// leaf boundaries.
    pub fn next_entry(&mut self) -> Result<Option<(IndexKey, RecordId)>> {
        loop {
            let Some(guard) = self.leaf.as_ref() else {
                return Ok(None);
            };

            let next_page = {
                let leaf = LeafNodeRef::new(guard.data());
                if self.index < leaf.size() as usize {
                    let entry = (leaf.key_at(self.index), leaf.value_at(self.index));
                    self.index += 1;
                    return Ok(Some(entry));
                }
                leaf.next_page_id()
            };

            // Unlatch and unpin the exhausted leaf before touching its
            // successor.
            self.leaf = None;
            self.index = 0;
            match next_page {
                None => return Ok(None),
                Some(page_id) => {
                    self.leaf = Some(self.bpm.read_page(page_id)?);
                }
            }
        }
    }
}

impl Iterator for BTreeIterator {
    type Item = Result<(IndexKey, RecordId)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}
