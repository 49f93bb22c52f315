use crate::{
    default_str_hash, fixup_filter_settings, generate_hash_attr_name, is_filter_degenerate,
    string_filter_to_hash_filter, AttrType, Filter, FilterKind, MvaAggr, STR_HASH_SEED,
};
use colsieve_base::ErrorKind;
use test_log::test;

#[test]
fn test_fixup_u32_clamps_both_sides() {
    let f = Filter::range("price", -5, 10_000_000_000).open_left().open_right();
    let fixed = fixup_filter_settings(&f, AttrType::Uint32);
    assert_eq!(fixed.min_value, 0);
    assert_eq!(fixed.max_value, u32::MAX as i64);
    assert!(fixed.left_closed);
    assert!(fixed.right_closed);

    // In-range bounds are left alone, openness included.
    let f = Filter::range("price", 3, 9).open_left();
    let fixed = fixup_filter_settings(&f, AttrType::Timestamp);
    assert_eq!((fixed.min_value, fixed.max_value), (3, 9));
    assert!(!fixed.left_closed);

    // Other integer types are not clamped.
    let f = Filter::range("delta", -5, 10_000_000_000);
    let fixed = fixup_filter_settings(&f, AttrType::Int64);
    assert_eq!((fixed.min_value, fixed.max_value), (-5, 10_000_000_000));
}

#[test]
fn test_fixup_float() {
    let fixed = fixup_filter_settings(&Filter::values("w", &[7]), AttrType::Float);
    assert_eq!(fixed.kind, FilterKind::FloatRange);
    assert_eq!((fixed.fmin_value, fixed.fmax_value), (7.0, 7.0));

    let fixed = fixup_filter_settings(&Filter::range("w", -2, 40), AttrType::Float);
    assert_eq!(fixed.kind, FilterKind::FloatRange);
    assert_eq!((fixed.fmin_value, fixed.fmax_value), (-2.0, 40.0));

    // Multi-value lists stay as they are.
    let fixed = fixup_filter_settings(&Filter::values("w", &[1, 2]), AttrType::Float);
    assert_eq!(fixed.kind, FilterKind::Values);
}

#[test]
fn test_string_hash_filter() {
    let f = Filter::strings("title", &["", "abc", "abc"]).excluded();
    let hf = string_filter_to_hash_filter(&f, true).unwrap();
    assert_eq!(hf.name, "$title_HASH");
    assert_eq!(hf.name, generate_hash_attr_name("title"));
    assert_eq!(hf.kind, FilterKind::Values);
    assert!(hf.exclude);
    assert_eq!(hf.values[0], 0);
    assert_eq!(hf.values[1], hf.values[2]);
    assert_eq!(hf.values[1], default_str_hash(b"abc", STR_HASH_SEED) as i64);

    let hf = string_filter_to_hash_filter(&f, false).unwrap();
    assert_eq!(hf.name, "title");

    let mut nohash = f.clone();
    nohash.str_hash = None;
    let e = string_filter_to_hash_filter(&nohash, true).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Unsupported);
}

#[test]
fn test_degenerate_filters() {
    assert!(is_filter_degenerate(&Filter::values("b", &[0, 1]), AttrType::Boolean));
    assert!(!is_filter_degenerate(&Filter::values("b", &[1]), AttrType::Boolean));
    assert!(!is_filter_degenerate(&Filter::values("n", &[0, 1]), AttrType::Uint32));

    let open = Filter::range("n", 0, 0).unbounded_left().unbounded_right();
    assert!(is_filter_degenerate(&open, AttrType::Int64));
    assert!(!is_filter_degenerate(&open.clone().excluded(), AttrType::Int64));

    assert!(is_filter_degenerate(&Filter::values("n", &[]).excluded(), AttrType::Int64));
    assert!(is_filter_degenerate(&Filter::range("n", -1, 1 << 40), AttrType::Uint32));
    assert!(!is_filter_degenerate(&Filter::range("n", 1, 1 << 40), AttrType::Uint32));
    assert!(!is_filter_degenerate(&Filter::range("n", -1, 1 << 40), AttrType::Int64));

    // Empty value sets never pass, so nothing is degenerate on sets.
    let any = open.clone().aggr(MvaAggr::Any);
    assert!(!is_filter_degenerate(&any, AttrType::Uint32Set));
}
