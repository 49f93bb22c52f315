use std::sync::Arc;

use colsieve_common::{RowId, RowIdRange};

/// Leaf indices that survived minmax pruning, strictly increasing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchingBlocks {
    blocks: Vec<u32>,
}

pub type SharedBlocks = Arc<MatchingBlocks>;

impl MatchingBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, block: u32) {
        debug_assert!(self.blocks.last().map_or(true, |last| *last < block));
        self.blocks.push(block);
    }

    pub fn get(&self, i: usize) -> u32 {
        self.blocks[i]
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.blocks
    }

    /// Index of the first block at or after `start` whose id is `>= value`,
    /// or `len()` if there is none.
    pub fn find(&self, start: usize, value: u32) -> usize {
        if start >= self.blocks.len() {
            return self.blocks.len();
        }
        start + self.blocks[start..].partition_point(|b| *b < value)
    }
}

/// Walks candidate leaves in row order and hands out their row spans,
/// clipped to the row bounds and to rows already handed out. Without a
/// matching set every leaf is a candidate.
#[derive(Debug, Clone)]
pub(crate) struct LeafCursor {
    matching: Option<SharedBlocks>,
    leaf_size: u64,
    total_docs: u64,
    bounds: RowIdRange,
    cursor: usize,
    next_row: u64,
}

impl LeafCursor {
    pub(crate) fn new(
        matching: Option<SharedBlocks>,
        leaf_size: u32,
        total_docs: u32,
        bounds: RowIdRange,
    ) -> Self {
        LeafCursor {
            matching,
            leaf_size: leaf_size.max(1) as u64,
            total_docs: total_docs as u64,
            bounds,
            cursor: 0,
            next_row: bounds.min as u64,
        }
    }

    fn last_row(&self) -> Option<u64> {
        let last = (self.bounds.max as u64).min(self.total_docs.checked_sub(1)?);
        Some(last)
    }

    fn num_candidates(&self) -> usize {
        match &self.matching {
            Some(m) => m.len(),
            None => self.total_docs.div_ceil(self.leaf_size) as usize,
        }
    }

    fn leaf_at(&self, i: usize) -> u64 {
        match &self.matching {
            Some(m) => m.get(i) as u64,
            None => i as u64,
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        match self.last_row() {
            Some(last) => self.next_row > last || self.cursor >= self.num_candidates(),
            None => true,
        }
    }

    /// The next inclusive span of candidate rows, or None when exhausted.
    pub(crate) fn next_span(&mut self) -> Option<(u64, u64)> {
        let last_row = self.last_row()?;
        while self.cursor < self.num_candidates() {
            let leaf = self.leaf_at(self.cursor);
            let first = leaf * self.leaf_size;
            if first > last_row {
                self.cursor = self.num_candidates();
                return None;
            }
            self.cursor += 1;
            let lo = first.max(self.next_row);
            let hi = (first + self.leaf_size - 1).min(last_row);
            if lo > hi {
                continue;
            }
            self.next_row = hi + 1;
            return Some((lo, hi));
        }
        None
    }

    /// Moves forward so nothing before `row` is handed out again.
    pub(crate) fn hint(&mut self, row: RowId) -> bool {
        let row = row as u64;
        if row > self.next_row {
            self.next_row = row;
            let leaf = row / self.leaf_size;
            self.cursor = match &self.matching {
                Some(m) => m.find(self.cursor, u32::try_from(leaf).unwrap_or(u32::MAX)),
                None => self.cursor.max(leaf as usize),
            };
        }
        !self.is_done()
    }
}
