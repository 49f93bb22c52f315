use colsieve_common::{BlockIterator, IteratorDesc, RowId, RowIdRange};
use tracing::debug;

use crate::{matching::LeafCursor, SharedBlocks};

/// Emits every row of the leaves that survived minmax pruning, with no
/// value tests. It stands in for analyzers when pruning alone narrows
/// the rows enough to be worth a separate pass.
pub struct Prefilter {
    leaves: LeafCursor,
    pending: Option<(u64, u64)>,
    processed: i64,
    batch: usize,
    exhausted: bool,
}

impl Prefilter {
    /// Pruning that keeps at least this share of the leaves is not worth it.
    pub const MAX_MATCHING_RATIO: f64 = 0.99;

    /// Returns None when `matching` covers too many of `num_leaves` leaves.
    pub fn try_new(
        matching: SharedBlocks,
        num_leaves: usize,
        leaf_size: u32,
        total_docs: u32,
        bounds: RowIdRange,
    ) -> Option<Self> {
        if matching.len() as f64 >= num_leaves as f64 * Self::MAX_MATCHING_RATIO {
            debug!(
                target: "colsieve",
                matching = matching.len(),
                num_leaves,
                "pruning too weak for a prefilter"
            );
            return None;
        }
        Some(Self::new(matching, leaf_size, total_docs, bounds))
    }

    /// A prefilter however many leaves matched. Used when the rows must be
    /// clipped to `bounds` and nothing else would do it.
    pub fn new(matching: SharedBlocks, leaf_size: u32, total_docs: u32, bounds: RowIdRange) -> Self {
        Prefilter {
            leaves: LeafCursor::new(Some(matching), leaf_size, total_docs, bounds),
            pending: None,
            processed: 0,
            batch: leaf_size.max(1) as usize,
            exhausted: false,
        }
    }
}

impl BlockIterator for Prefilter {
    fn hint_row_id(&mut self, row_id: RowId) -> bool {
        if self.exhausted {
            return false;
        }
        if let Some((lo, hi)) = self.pending {
            if (row_id as u64) > hi {
                self.pending = None;
            } else if (row_id as u64) > lo {
                self.pending = Some((row_id as u64, hi));
            }
        }
        self.leaves.hint(row_id) || self.pending.is_some()
    }

    fn get_next_row_id_block(&mut self, block: &mut Vec<RowId>) -> bool {
        block.clear();
        while !self.exhausted && block.len() < self.batch {
            let (lo, hi) = match self.pending.take().or_else(|| self.leaves.next_span()) {
                Some(span) => span,
                None => {
                    self.exhausted = true;
                    break;
                }
            };
            let room = (self.batch - block.len()) as u64;
            let end = hi.min(lo + room - 1);
            block.extend(lo as RowId..=end as RowId);
            self.processed += (end + 1 - lo) as i64;
            if end < hi {
                self.pending = Some((end + 1, hi));
            }
        }
        !block.is_empty()
    }

    fn num_processed(&self) -> i64 {
        self.processed
    }

    fn add_desc(&self, desc: &mut Vec<IteratorDesc>) {
        desc.push(IteratorDesc {
            attr: String::new(),
            kind: "prefilter",
        });
    }
}
