// Columnar attribute storage, read side first.
//
// A storage file holds a fixed number of rows and, per attribute, a
// sequence of 64k-row blocks followed at the end of the file by the
// attribute headers. Each header carries the offsets of its blocks and a
// minmax tree summarizing the attribute's values per leaf of
// `minmax_leaf_size` rows.
//
// Filtering happens in two passes. Minmax pruning walks the trees of all
// filtered attributes at once and collects the leaves that may hold
// matching rows into `MatchingBlocks`. Analyzers then decode only those
// leaves' subblocks and test the values one by one, emitting row ids in
// batches through the `BlockIterator` interface. When no analyzer is
// needed but pruning was selective, a `Prefilter` emits the surviving
// leaves' rows unchecked.
//
// String attributes store nothing themselves; their values are hashed
// into a companion `Uint64` attribute and string filters are rewritten
// into hash filters against it.

mod analyzer;
mod block;
mod builder;
mod check;
mod columnar;
mod header;
mod layer;
mod matching;
mod minmax;
mod prefilter;
mod settings;


pub use analyzer::{Analyzer, ColumnAnalyzer};
pub use builder::ColumnarBuilder;
pub use check::check_storage;
pub use columnar::Columnar;
pub use header::AttributeHeader;
pub use matching::{MatchingBlocks, SharedBlocks};
pub use minmax::{
    node_may_match, populate_matching_blocks, BlockTester, FilterBlockTester, MinMaxEstimate,
    MinMaxEval, MinMaxTree, MINMAX_FANOUT,
};
pub use prefilter::Prefilter;
pub use settings::Settings;

pub const LIB_VERSION: u32 = 1;
pub const STORAGE_VERSION: u32 = 1;

pub const BLOCK_ID_BITS: u32 = 16;
pub const DOCS_PER_BLOCK: u32 = 1 << BLOCK_ID_BITS;
