use std::cmp::Ordering;

use crate::{Filter, FilterKind};

/// A value type filters can be evaluated against. Integer types read the
/// integer bounds of a filter, `f32` reads the float bounds.
pub trait FilterValue: Copy + PartialOrd + std::fmt::Debug {
    const MIN: Self;
    const MAX: Self;

    fn filter_min(filter: &Filter) -> Self;
    fn filter_max(filter: &Filter) -> Self;
    fn from_filter_value(v: i64) -> Self;

    fn bound_eq(a: Self, b: Self) -> bool {
        a == b
    }
}

macro_rules! int_filter_value {
    ($t:ty) => {
        impl FilterValue for $t {
            const MIN: Self = <$t>::MIN;
            const MAX: Self = <$t>::MAX;
            fn filter_min(filter: &Filter) -> Self {
                filter.min_value as $t
            }
            fn filter_max(filter: &Filter) -> Self {
                filter.max_value as $t
            }
            fn from_filter_value(v: i64) -> Self {
                v as $t
            }
        }
    };
}

int_filter_value!(u32);
int_filter_value!(i64);
int_filter_value!(u64);

impl FilterValue for f32 {
    const MIN: Self = f32::MIN;
    const MAX: Self = f32::MAX;
    fn filter_min(filter: &Filter) -> Self {
        filter.fmin_value
    }
    fn filter_max(filter: &Filter) -> Self {
        filter.fmax_value
    }
    fn from_filter_value(v: i64) -> Self {
        v as f32
    }
    fn bound_eq(a: Self, b: Self) -> bool {
        (a - b).abs() <= f32::EPSILON
    }
}

fn above_min<T: FilterValue>(value: T, min: T, closed: bool) -> bool {
    if closed {
        value >= min
    } else {
        value > min
    }
}

fn below_max<T: FilterValue>(value: T, max: T, closed: bool) -> bool {
    if closed {
        value <= max
    } else {
        value < max
    }
}

/// Tests a value against the bound pair of a range filter. An unbounded
/// side is not tested at all.
pub fn value_in_interval<T: FilterValue>(value: T, filter: &Filter) -> bool {
    let left = filter.left_unbounded
        || above_min(value, T::filter_min(filter), filter.left_closed);
    let right = filter.right_unbounded
        || below_max(value, T::filter_max(filter), filter.right_closed);
    left && right
}

/// Closed interval. Ordered by start, then end; float starts that differ
/// by no more than an epsilon compare as equal.
#[derive(Debug, Clone, Copy)]
pub struct Interval<T> {
    pub start: T,
    pub end: T,
}

impl<T: FilterValue> Interval<T> {
    pub fn new(start: T, end: T) -> Self {
        Interval { start, end }
    }

    /// The filter's bounds, with unbounded sides widened to the type's limits.
    pub fn from_filter(filter: &Filter) -> Self {
        let start = if filter.left_unbounded {
            T::MIN
        } else {
            T::filter_min(filter)
        };
        let end = if filter.right_unbounded {
            T::MAX
        } else {
            T::filter_max(filter)
        };
        Interval { start, end }
    }

    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, value: T) -> bool {
        self.start <= value && value <= self.end
    }
}

impl<T: FilterValue> PartialEq for Interval<T> {
    fn eq(&self, other: &Self) -> bool {
        T::bound_eq(self.start, other.start) && self.end == other.end
    }
}

impl<T: FilterValue> PartialOrd for Interval<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if T::bound_eq(self.start, other.start) {
            self.end.partial_cmp(&other.end)
        } else {
            self.start.partial_cmp(&other.start)
        }
    }
}

/// Compares a block's value range to a range filter: `Equal` when they
/// overlap, `Less` when the whole block sorts before the filter.
pub fn cmp_range<T: FilterValue>(block_min: T, block_max: T, filter: &Filter) -> Ordering {
    let block = Interval::new(block_min, block_max);
    let wanted = Interval::<T>::from_filter(filter);
    if block.overlaps(&wanted) {
        Ordering::Equal
    } else if block < wanted {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

/// Whether any value in `[min, max]` could pass the filter. Used for
/// pruning, so it may say yes when the answer is no but never the reverse.
pub fn range_may_match<T: FilterValue>(min: T, max: T, filter: &Filter) -> bool {
    match filter.kind {
        FilterKind::Range | FilterKind::FloatRange => {
            let inside = range_overlaps_filter(min, max, filter);
            if !filter.exclude {
                return inside;
            }
            // Exclusion prunes only blocks lying entirely inside the range.
            !(value_in_interval(min, filter) && value_in_interval(max, filter))
        }
        FilterKind::Values => {
            if filter.exclude {
                let all_same = T::bound_eq(min, max);
                return !(all_same
                    && filter
                        .values
                        .iter()
                        .any(|v| T::bound_eq(T::from_filter_value(*v), min)));
            }
            filter.values.iter().any(|v| {
                let v = T::from_filter_value(*v);
                min <= v && v <= max
            })
        }
        FilterKind::Strings | FilterKind::None => true,
    }
}

fn range_overlaps_filter<T: FilterValue>(min: T, max: T, filter: &Filter) -> bool {
    if !filter.left_unbounded && !below_max(T::filter_min(filter), max, filter.left_closed) {
        return false;
    }
    if !filter.right_unbounded && !above_min(T::filter_max(filter), min, filter.right_closed) {
        return false;
    }
    true
}
