use colsieve_base::Error;

use crate::Filter;

pub type RowId = u32;
pub const INVALID_ROW_ID: RowId = u32::MAX;

/// Name of the pseudo-attribute that restricts evaluation to a slice of rows.
pub const ROWID_FILTER_NAME: &str = "@rowid";

/// Inclusive row-id bounds. The default covers every row; `min > max`
/// covers none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowIdRange {
    pub min: RowId,
    pub max: RowId,
}

impl Default for RowIdRange {
    fn default() -> Self {
        RowIdRange {
            min: RowId::MIN,
            max: RowId::MAX,
        }
    }
}

impl RowIdRange {
    pub fn new(min: RowId, max: RowId) -> Self {
        RowIdRange { min, max }
    }

    pub fn empty() -> Self {
        RowIdRange { min: 1, max: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn is_full(&self) -> bool {
        self.min == RowId::MIN && self.max == RowId::MAX
    }

    pub fn contains(&self, row: RowId) -> bool {
        self.min <= row && row <= self.max
    }

    pub fn overlaps(&self, lo: RowId, hi: RowId) -> bool {
        !self.is_empty() && lo <= self.max && self.min <= hi
    }
}

/// Splits `num_docs` into `filter.max_value` equal chunks and returns the
/// bounds of chunk number `filter.min_value`. The last chunk runs to the end.
/// With fewer rows than chunks, a chunk that owns no row gets an empty range.
pub fn fetch_row_id_limits(filter: &Filter, num_docs: u32) -> RowIdRange {
    let chunk = filter.min_value.max(0) as u64;
    let chunks = filter.max_value.max(0) as u64;
    if chunks == 0 || chunk >= chunks {
        return RowIdRange::default();
    }
    let delta = num_docs as f64 / chunks as f64;
    let min = (delta * chunk as f64) as u32;
    if chunk == chunks - 1 {
        return RowIdRange { min, max: num_docs };
    }
    let next = (delta * (chunk + 1) as f64) as u32;
    if next == min {
        return RowIdRange::empty();
    }
    RowIdRange { min, max: next - 1 }
}

/// What an iterator reports about itself for query profiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IteratorDesc {
    pub attr: String,
    pub kind: &'static str,
}

/// A lazy producer of matching row ids, one batch at a time.
///
/// Batches are strictly increasing within and across calls. Once an
/// iterator is exhausted every later call yields an empty batch.
pub trait BlockIterator: Send {
    /// Advisory forward seek: rows before `row_id` may be skipped. Returns
    /// false once the iterator can produce nothing at or after the hint.
    fn hint_row_id(&mut self, row_id: RowId) -> bool;

    /// Clears `block` and fills it with the next batch. Returns false, with
    /// `block` left empty, when exhausted.
    fn get_next_row_id_block(&mut self, block: &mut Vec<RowId>) -> bool;

    /// Rows (or postings) examined so far. Never decreases.
    fn num_processed(&self) -> i64;

    fn add_desc(&self, desc: &mut Vec<IteratorDesc>);

    /// The error that ended iteration early, if any. A failed read looks
    /// like exhaustion to `get_next_row_id_block`; this tells the two
    /// apart. Taking the error clears it.
    fn take_error(&mut self) -> Option<Error> {
        None
    }
}

pub type BoxedBlockIterator = Box<dyn BlockIterator>;

/// Whether anything was written into `block` past `start`.
pub fn check_empty_span(block: &[RowId], start: usize) -> bool {
    block.len() > start
}

/// Runs an iterator to exhaustion and concatenates its batches.
pub fn collect_row_ids(it: &mut dyn BlockIterator) -> Vec<RowId> {
    let mut all = Vec::new();
    let mut block = Vec::new();
    while it.get_next_row_id_block(&mut block) {
        all.extend_from_slice(&block);
    }
    all
}
