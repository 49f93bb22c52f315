// Secondary index: for each indexed attribute, its distinct values in
// sorted order, each with the postings run of rows holding it.
//
// Values are grouped into value blocks of `values_per_block` entries. A
// value block stores the values themselves, then per value its postings
// packing, its row bounds and where its postings start, then the
// postings payloads. A small first-key index per attribute narrows a
// value lookup to one value block, or a range lookup to a run of them.
//
// Postings come in four packings, picked per value at build time:
//
//   Row:           a single row, stored in place of the postings offset.
//   RowBlock:      one codec-packed block of delta-coded rows.
//   RowBlocksList: a count, then that many row blocks, each led by its
//                  row bounds so blocks outside the query bounds are
//                  skipped undecoded.
//   RowFullscan:   no payload; the run is served as every row of the
//                  index and callers re-check the values.

mod approx;
mod blockreader;
mod builder;
mod collation;
mod common;
mod index;
mod merge;
mod postings;


pub use approx::{ApproxIndex, ApproxPos};
pub use blockreader::{BlockIter, BlockReader, RangeReader};
pub use builder::SecondaryIndexBuilder;
pub use collation::{Collation, CollationRegistry};
pub use common::{ColumnInfo, IndexSettings, KeyKind, Packing};
pub use index::SecondaryIndex;
pub use merge::UnionIterator;
pub use postings::PostingsIterator;

pub const LIB_VERSION: u32 = 1;
pub const STORAGE_VERSION: u32 = 1;
