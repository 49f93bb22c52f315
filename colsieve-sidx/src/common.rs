use std::cmp::Ordering;

use colsieve_base::{err, err_kind, ErrorKind, Result, CODEC_BITPACK};
use colsieve_common::{cmp_range, value_in_interval, AttrType, Filter, FilterKind};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::{ApproxIndex, Collation};

/// How the postings of one value are stored. The numeric codes are part
/// of the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Packing {
    Row = 0,
    RowBlock = 1,
    RowBlocksList = 2,
    RowFullscan = 3,
}

impl Packing {
    pub fn from_u32(v: u32) -> Result<Self> {
        Ok(match v {
            0 => Packing::Row,
            1 => Packing::RowBlock,
            2 => Packing::RowBlocksList,
            3 => Packing::RowFullscan,
            _ => {
                return Err(err_kind(
                    ErrorKind::Corrupt,
                    format!("unknown postings packing {}", v),
                ))
            }
        })
    }
}

/// Index-wide settings, persisted in the index metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSettings {
    pub compression_u32: String,
    pub compression_u64: String,
    pub values_per_block: u32,
    pub rows_per_block: u32,
    /// Values with at least this many rows are stored as `RowFullscan`.
    #[serde(default)]
    pub fullscan_threshold: Option<u64>,
    pub collation: Collation,
}

impl Default for IndexSettings {
    fn default() -> Self {
        IndexSettings {
            compression_u32: CODEC_BITPACK.to_string(),
            compression_u64: CODEC_BITPACK.to_string(),
            values_per_block: 128,
            rows_per_block: 1024,
            fullscan_threshold: None,
            collation: Collation::LibcCi,
        }
    }
}

impl IndexSettings {
    pub fn check(&self) -> Result<()> {
        if self.values_per_block == 0 {
            return Err(err("values per block must be positive"));
        }
        if self.rows_per_block == 0 {
            return Err(err("rows per block must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub attr_type: AttrType,
    pub enabled: bool,
}

/// The ordering family of an indexed attribute's keys. Keys are stored
/// as u64; 32-bit and float keys occupy the low word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    U32,
    I64,
    F32,
}

fn as_f32(key: u64) -> f32 {
    f32::from_bits(key as u32)
}

impl KeyKind {
    pub fn of(attr_type: AttrType) -> Result<Self> {
        Ok(match attr_type {
            AttrType::Uint32 | AttrType::Timestamp | AttrType::Boolean | AttrType::Uint32Set => {
                KeyKind::U32
            }
            AttrType::Int64 | AttrType::Int64Set | AttrType::Uint64 | AttrType::String => {
                KeyKind::I64
            }
            AttrType::Float => KeyKind::F32,
            AttrType::None => {
                return Err(err_kind(
                    ErrorKind::Unsupported,
                    "attributes without a type cannot be indexed",
                ))
            }
        })
    }

    pub fn is_wide(self) -> bool {
        self == KeyKind::I64
    }

    pub fn cmp(self, a: u64, b: u64) -> Ordering {
        match self {
            KeyKind::U32 => (a as u32).cmp(&(b as u32)),
            KeyKind::I64 => (a as i64).cmp(&(b as i64)),
            KeyKind::F32 => OrderedFloat(as_f32(a)).cmp(&OrderedFloat(as_f32(b))),
        }
    }

    pub fn eq(self, a: u64, b: u64) -> bool {
        match self {
            KeyKind::F32 => (as_f32(a) - as_f32(b)).abs() <= f32::EPSILON,
            _ => self.cmp(a, b).is_eq(),
        }
    }

    /// The key a filter value names, if the attribute can hold it.
    pub fn key_of_value(self, v: i64) -> Option<u64> {
        match self {
            KeyKind::U32 => u32::try_from(v).ok().map(|v| v as u64),
            KeyKind::I64 => Some(v as u64),
            KeyKind::F32 => Some((v as f32).to_bits() as u64),
        }
    }

    pub fn in_range(self, key: u64, filter: &Filter) -> bool {
        match (self, filter.kind) {
            (KeyKind::F32, _) => value_in_interval(as_f32(key), filter),
            (KeyKind::U32, FilterKind::FloatRange) => value_in_interval(key as u32 as f32, filter),
            (KeyKind::I64, FilterKind::FloatRange) => value_in_interval(key as i64 as f32, filter),
            (KeyKind::U32, _) => value_in_interval(key as u32 as i64, filter),
            (KeyKind::I64, _) => value_in_interval(key as i64, filter),
        }
    }

    /// Where the keys `[first, last]` of a value block lie relative to a
    /// range filter.
    pub fn cmp_block(self, first: u64, last: u64, filter: &Filter) -> Ordering {
        match (self, filter.kind) {
            (KeyKind::F32, _) => cmp_range(as_f32(first), as_f32(last), filter),
            (KeyKind::U32, FilterKind::FloatRange) => {
                cmp_range(first as u32 as f32, last as u32 as f32, filter)
            }
            (KeyKind::I64, FilterKind::FloatRange) => {
                cmp_range(first as i64 as f32, last as i64 as f32, filter)
            }
            (KeyKind::U32, _) => cmp_range(first as u32 as i64, last as u32 as i64, filter),
            (KeyKind::I64, _) => cmp_range(first as i64, last as i64, filter),
        }
    }

    /// The keys bounding a range filter, where they can be expressed in
    /// this key space. None on a side means the scan starts (or ends) at
    /// the edge of the index.
    pub fn range_keys(self, filter: &Filter) -> (Option<u64>, Option<u64>) {
        let same_domain = (self == KeyKind::F32) == (filter.kind == FilterKind::FloatRange);
        if !same_domain {
            return (None, None);
        }
        let key = |i: i64, f: f32| match self {
            KeyKind::U32 => i.clamp(0, u32::MAX as i64) as u64,
            KeyKind::I64 => i as u64,
            KeyKind::F32 => f.to_bits() as u64,
        };
        let lo = (!filter.left_unbounded).then(|| key(filter.min_value, filter.fmin_value));
        let hi = (!filter.right_unbounded).then(|| key(filter.max_value, filter.fmax_value));
        (lo, hi)
    }
}

/// Everything the index keeps in memory about one attribute.
#[derive(Debug, Clone)]
pub(crate) struct AttrIndex {
    pub(crate) name: String,
    pub(crate) attr_type: AttrType,
    pub(crate) kind: KeyKind,
    pub(crate) num_values: u64,
    pub(crate) approx: ApproxIndex,
    pub(crate) block_offsets: Vec<u64>,
}
