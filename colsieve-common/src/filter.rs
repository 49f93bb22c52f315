use std::cmp::Ordering;

use colsieve_base::{err_kind, ErrorKind, Result};

use crate::AttrType;

pub type StrHashFn = fn(&[u8], u64) -> u64;
pub type StrCmpFn = fn(&[u8], &[u8]) -> Ordering;

pub const STR_HASH_SEED: u64 = 0xCBF29CE484222325;

pub fn default_str_hash(s: &[u8], seed: u64) -> u64 {
    rapidhash::rapidhash_seeded(s, seed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterKind {
    #[default]
    None,
    Values,
    Range,
    FloatRange,
    Strings,
}

/// How a predicate over a multi-valued attribute reduces over the row's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MvaAggr {
    #[default]
    None,
    All,
    Any,
}

/// A predicate on one named attribute. Which of the value list and the
/// bound pair is meaningful depends on `kind`.
#[derive(Debug, Clone)]
pub struct Filter {
    pub name: String,
    pub exclude: bool,
    pub kind: FilterKind,
    pub mva_aggr: MvaAggr,

    pub min_value: i64,
    pub max_value: i64,
    pub fmin_value: f32,
    pub fmax_value: f32,

    pub left_unbounded: bool,
    pub right_unbounded: bool,
    pub left_closed: bool,
    pub right_closed: bool,

    pub values: Vec<i64>,
    pub string_values: Vec<Vec<u8>>,

    pub str_hash: Option<StrHashFn>,
    pub str_cmp: Option<StrCmpFn>,
}

impl Default for Filter {
    fn default() -> Self {
        Filter {
            name: String::new(),
            exclude: false,
            kind: FilterKind::None,
            mva_aggr: MvaAggr::None,
            min_value: i64::MIN,
            max_value: i64::MAX,
            fmin_value: f32::MIN,
            fmax_value: f32::MAX,
            left_unbounded: false,
            right_unbounded: false,
            left_closed: true,
            right_closed: true,
            values: Vec::new(),
            string_values: Vec::new(),
            str_hash: None,
            str_cmp: None,
        }
    }
}

impl Filter {
    pub fn values(name: &str, values: &[i64]) -> Self {
        Filter {
            name: name.to_string(),
            kind: FilterKind::Values,
            values: values.to_vec(),
            ..Default::default()
        }
    }

    pub fn range(name: &str, min: i64, max: i64) -> Self {
        Filter {
            name: name.to_string(),
            kind: FilterKind::Range,
            min_value: min,
            max_value: max,
            ..Default::default()
        }
    }

    pub fn float_range(name: &str, min: f32, max: f32) -> Self {
        Filter {
            name: name.to_string(),
            kind: FilterKind::FloatRange,
            fmin_value: min,
            fmax_value: max,
            ..Default::default()
        }
    }

    pub fn strings<S: AsRef<[u8]>>(name: &str, values: &[S]) -> Self {
        Filter {
            name: name.to_string(),
            kind: FilterKind::Strings,
            string_values: values.iter().map(|s| s.as_ref().to_vec()).collect(),
            str_hash: Some(default_str_hash),
            ..Default::default()
        }
    }

    pub fn excluded(mut self) -> Self {
        self.exclude = true;
        self
    }

    pub fn aggr(mut self, aggr: MvaAggr) -> Self {
        self.mva_aggr = aggr;
        self
    }

    pub fn open_left(mut self) -> Self {
        self.left_closed = false;
        self
    }

    pub fn open_right(mut self) -> Self {
        self.right_closed = false;
        self
    }

    pub fn unbounded_left(mut self) -> Self {
        self.left_unbounded = true;
        self
    }

    pub fn unbounded_right(mut self) -> Self {
        self.right_unbounded = true;
        self
    }
}

/// Clamps a filter to what the attribute type can hold. Returns the fixed copy.
pub fn fixup_filter_settings(filter: &Filter, attr_type: AttrType) -> Filter {
    let mut fixed = filter.clone();
    match attr_type {
        AttrType::Uint32 | AttrType::Uint32Set | AttrType::Timestamp => {
            if !fixed.left_unbounded && fixed.min_value < 0 {
                fixed.min_value = 0;
                fixed.left_closed = true;
            }
            if !fixed.right_unbounded && fixed.max_value > u32::MAX as i64 {
                fixed.max_value = u32::MAX as i64;
                fixed.right_closed = true;
            }
        }
        AttrType::Float => match fixed.kind {
            FilterKind::Values if fixed.values.len() == 1 => {
                let v = fixed.values[0] as f32;
                fixed.kind = FilterKind::FloatRange;
                fixed.fmin_value = v;
                fixed.fmax_value = v;
                fixed.left_closed = true;
                fixed.right_closed = true;
            }
            FilterKind::Range => {
                fixed.kind = FilterKind::FloatRange;
                fixed.fmin_value = fixed.min_value as f32;
                fixed.fmax_value = fixed.max_value as f32;
            }
            _ => {}
        },
        _ => {}
    }
    fixed
}

pub fn generate_hash_attr_name(name: &str) -> String {
    format!("${}_HASH", name)
}

/// Rewrites a string-set filter into a value filter over string hashes,
/// using the hash function the filter carries.
pub fn string_filter_to_hash_filter(filter: &Filter, generate_name: bool) -> Result<Filter> {
    let hash = match filter.str_hash {
        Some(hash) => hash,
        None => {
            return Err(err_kind(
                ErrorKind::Unsupported,
                format!("string filter on '{}' has no hash function", filter.name),
            ))
        }
    };
    Ok(string_filter_to_hash_filter_with(filter, generate_name, |s| {
        hash(s, STR_HASH_SEED)
    }))
}

pub fn string_filter_to_hash_filter_with(
    filter: &Filter,
    generate_name: bool,
    hash: impl Fn(&[u8]) -> u64,
) -> Filter {
    let values = filter
        .string_values
        .iter()
        .map(|s| if s.is_empty() { 0 } else { hash(s) as i64 })
        .collect();
    Filter {
        name: if generate_name {
            generate_hash_attr_name(&filter.name)
        } else {
            filter.name.clone()
        },
        exclude: filter.exclude,
        kind: FilterKind::Values,
        mva_aggr: filter.mva_aggr,
        values,
        ..Default::default()
    }
}

/// True when the filter is guaranteed to pass every row of an
/// attribute of the given type.
pub fn is_filter_degenerate(filter: &Filter, attr_type: AttrType) -> bool {
    // Rows with an empty value set fail every non-exclude filter.
    if attr_type.is_set() && !filter.exclude {
        return false;
    }
    match filter.kind {
        FilterKind::Range | FilterKind::FloatRange => {
            if filter.exclude {
                return false;
            }
            if filter.left_unbounded && filter.right_unbounded {
                return true;
            }
            if filter.kind == FilterKind::Range && attr_type.is_u32_domain() {
                let left_ok = filter.left_unbounded || (filter.min_value <= 0 && filter.left_closed)
                    || filter.min_value < 0;
                let right_ok = filter.right_unbounded
                    || (filter.max_value >= u32::MAX as i64 && filter.right_closed)
                    || filter.max_value > u32::MAX as i64;
                return left_ok && right_ok;
            }
            false
        }
        FilterKind::Values => {
            if filter.exclude {
                return filter.values.is_empty();
            }
            attr_type == AttrType::Boolean
                && filter.values.contains(&0)
                && filter.values.contains(&1)
        }
        FilterKind::Strings => filter.exclude && filter.string_values.is_empty(),
        FilterKind::None => false,
    }
}
