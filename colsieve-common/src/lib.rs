mod blockiter;
mod filter;
mod interval;
mod schema;


pub use blockiter::{
    check_empty_span, collect_row_ids, fetch_row_id_limits, BlockIterator, BoxedBlockIterator,
    IteratorDesc, RowId, RowIdRange, INVALID_ROW_ID, ROWID_FILTER_NAME,
};
pub use filter::{
    default_str_hash, fixup_filter_settings, generate_hash_attr_name, is_filter_degenerate,
    string_filter_to_hash_filter, string_filter_to_hash_filter_with, Filter, FilterKind, MvaAggr,
    StrCmpFn, StrHashFn, STR_HASH_SEED,
};
pub use interval::{cmp_range, range_may_match, value_in_interval, FilterValue, Interval};
pub use schema::AttrType;
