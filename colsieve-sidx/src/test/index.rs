use colsieve_base::{CodecRegistry, ErrorKind, MemSource, Result};
use colsieve_common::{collect_row_ids, AttrType, Filter, MvaAggr, RowIdRange};
use std::sync::Arc;
use test_log::test;

use super::{
    build_bytes, expect_rows, lcg_rand_step, open_bytes, open_mem, rows_of, sample_index,
    sample_values, score_of, small_settings, tags_of, wide_of, ROWS,
};
use crate::{
    Collation, CollationRegistry, ColumnInfo, IndexSettings, SecondaryIndex,
    SecondaryIndexBuilder, STORAGE_VERSION,
};

#[test]
fn test_value_filters() -> Result<()> {
    let idx = sample_index()?;
    assert_eq!(idx.num_docs(), ROWS);
    assert_eq!(idx.num_attrs(), 8);
    let all = RowIdRange::default();
    assert_eq!(
        rows_of(&idx, &Filter::values("mod", &[1, 3]), all)?,
        expect_rows(|i| i % 7 == 1 || i % 7 == 3)
    );
    assert_eq!(rows_of(&idx, &Filter::values("single", &[42, -1, 7]), all)?, vec![7, 42]);
    assert_eq!(rows_of(&idx, &Filter::values("flag", &[1]), all)?, expect_rows(|i| i % 3 == 0));
    assert_eq!(
        rows_of(&idx, &Filter::values("wide", &[wide_of(0), wide_of(299)]), all)?,
        vec![0, 299]
    );
    Ok(())
}

#[test]
fn test_set_aggregation() -> Result<()> {
    let idx = sample_index()?;
    let all = RowIdRange::default();
    let any = Filter::values("tags", &[1, 2]).aggr(MvaAggr::Any);
    assert_eq!(
        rows_of(&idx, &any, all)?,
        expect_rows(|i| tags_of(i).iter().any(|t| *t == 1 || *t == 2))
    );

    // `All` leaves one iterator per value for the caller to intersect.
    let every = Filter::values("tags", &[1, 2]).aggr(MvaAggr::All);
    let its = idx.create_iterators(&every, all)?;
    assert_eq!(its.len(), 2);
    for (mut it, v) in its.into_iter().zip([1, 2]) {
        assert_eq!(collect_row_ids(it.as_mut()), expect_rows(|i| tags_of(i).contains(&v)));
    }
    Ok(())
}

#[test]
fn test_range_filters() -> Result<()> {
    let idx = sample_index()?;
    let all = RowIdRange::default();
    assert_eq!(rows_of(&idx, &Filter::range("single", 10, 20), all)?, (10..=20).collect::<Vec<_>>());
    assert_eq!(
        rows_of(&idx, &Filter::range("single", 10, 20).open_left().open_right(), all)?,
        (11..20).collect::<Vec<_>>()
    );
    assert_eq!(
        rows_of(&idx, &Filter::range("single", 0, 290).unbounded_left(), all)?,
        (0..=290).collect::<Vec<_>>()
    );
    assert_eq!(
        rows_of(&idx, &Filter::range("mod", 5, 0).unbounded_right(), all)?,
        expect_rows(|i| i % 7 >= 5)
    );
    let lo = -10_000_000_070;
    assert_eq!(
        rows_of(&idx, &Filter::range("wide", lo, 0), all)?,
        expect_rows(|i| (lo..=0).contains(&wide_of(i)))
    );
    assert_eq!(
        rows_of(&idx, &Filter::float_range("score", -1.0, 1.0), all)?,
        expect_rows(|i| (-1.0..=1.0).contains(&score_of(i)))
    );
    assert_eq!(
        rows_of(&idx, &Filter::range("score", -1, 1), all)?,
        expect_rows(|i| (-1.0..=1.0).contains(&score_of(i)))
    );
    assert_eq!(
        rows_of(&idx, &Filter::float_range("single", 2.5, 5.0), all)?,
        vec![3, 4, 5]
    );
    assert!(idx.create_iterators(&Filter::range("single", 400, 500), all)?.is_empty());
    Ok(())
}

#[test]
fn test_single_float_value() -> Result<()> {
    let idx = sample_index()?;
    let rows = rows_of(&idx, &Filter::values("score", &[-2]), RowIdRange::default())?;
    assert_eq!(rows, expect_rows(|i| score_of(i) == -2.0));
    Ok(())
}

#[test]
fn test_strings_use_collation() -> Result<()> {
    let idx = sample_index()?;
    let all = RowIdRange::default();
    assert_eq!(idx.settings().collation, Collation::LibcCi);
    let f = Filter::strings("name", &["name1", "NAME3"]);
    assert_eq!(rows_of(&idx, &f, all)?, expect_rows(|i| i % 5 == 1 || i % 5 == 3));
    let f = Filter::strings("name", &["name9"]);
    assert!(idx.create_iterators(&f, all)?.is_empty());
    Ok(())
}

#[test]
fn test_bounds_clip() -> Result<()> {
    let idx = sample_index()?;
    let bounds = RowIdRange::new(50, 80);
    assert_eq!(
        rows_of(&idx, &Filter::values("mod", &[2]), bounds)?,
        expect_rows(|i| i % 7 == 2 && bounds.contains(i))
    );
    assert_eq!(
        rows_of(&idx, &Filter::range("single", 0, 1000), bounds)?,
        (50..=80).collect::<Vec<_>>()
    );
    // Values whose rows all lie outside the bounds yield no iterator.
    assert!(idx
        .create_iterators(&Filter::values("pair", &[3]), bounds)?
        .is_empty());
    Ok(())
}

#[test]
fn test_value_count_never_undercounts() -> Result<()> {
    let idx = sample_index()?;
    let mut state = 3;
    for _ in 0..60 {
        lcg_rand_step(&mut state);
        let a = (state % 320) as i64;
        lcg_rand_step(&mut state);
        let b = (state % 320) as i64;
        lcg_rand_step(&mut state);
        let lo = state % ROWS;
        let bounds = RowIdRange::new(lo, lo + state % 100);
        for f in [
            Filter::values("single", &[a, b]),
            Filter::values("mod", &[a % 9]),
            Filter::values("tags", &[a % 7, b % 7]),
            Filter::range("pair", a.min(b), a.max(b)),
        ] {
            let actual = rows_of(&idx, &f, bounds)?.len() as u64;
            let estimate = idx.calc_value_count(&f, bounds)?;
            assert!(estimate >= actual, "{:?}: {} < {}", f, estimate, actual);
        }
    }
    assert_eq!(idx.calc_value_count(&Filter::values("single", &[5, 6]), RowIdRange::default())?, 2);
    assert_eq!(idx.calc_value_count(&Filter::values("single", &[5]), RowIdRange::new(6, 9))?, 0);
    Ok(())
}

#[test]
fn test_random_values_match_scan() -> Result<()> {
    let mut state = 11;
    let vals: Vec<u32> = (0..ROWS)
        .map(|_| {
            lcg_rand_step(&mut state);
            state % 40
        })
        .collect();
    let idx = open_mem(small_settings(), |b| b.add_u32("r", &vals))?;
    for _ in 0..50 {
        let picks: Vec<i64> = (0..3)
            .map(|_| {
                lcg_rand_step(&mut state);
                (state % 45) as i64
            })
            .collect();
        let rows = rows_of(&idx, &Filter::values("r", &picks), RowIdRange::default())?;
        assert_eq!(rows, expect_rows(|i| picks.contains(&(vals[i as usize] as i64))));
    }
    Ok(())
}

#[test]
fn test_rejected_filters() -> Result<()> {
    let idx = sample_index()?;
    let all = RowIdRange::default();
    let e = idx.create_iterators(&Filter::values("missing", &[1]), all).err().unwrap();
    assert_eq!(e.kind(), ErrorKind::UnknownName);
    let e = idx
        .create_iterators(&Filter::values("mod", &[1]).excluded(), all)
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::Unsupported);
    let e = idx.create_iterators(&Filter::default(), all).err().unwrap();
    assert_eq!(e.kind(), ErrorKind::UnknownName);
    let e = idx
        .create_iterators(
            &Filter {
                name: "mod".to_string(),
                ..Filter::default()
            },
            all,
        )
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::Unsupported);
    Ok(())
}

#[test]
fn test_columns_and_hashes() -> Result<()> {
    let idx = sample_index()?;
    assert_eq!(
        idx.get_column("tags"),
        Some(ColumnInfo {
            name: "tags".to_string(),
            attr_type: AttrType::Uint32Set,
            enabled: true,
        })
    );
    assert_eq!(idx.get_column("missing"), None);
    assert!(idx.is_enabled("name"));
    assert!(!idx.is_enabled("missing"));
    assert_eq!(idx.hash_string(b""), 0);
    assert_eq!(idx.hash_string(b"Abc"), idx.hash_string(b"abc"));
    assert_ne!(idx.hash_string(b"abc"), idx.hash_string(b"abd"));
    Ok(())
}

#[test]
fn test_collation_hashes() -> Result<()> {
    let reg = CollationRegistry::default();
    let cs = reg.get(Collation::LibcCs)?;
    let ci = reg.get(Collation::LibcCi)?;
    let utf8 = reg.get(Collation::Utf8GeneralCi)?;
    assert_ne!(cs("Abc".as_bytes(), 1), cs("abc".as_bytes(), 1));
    assert_eq!(ci("Abc".as_bytes(), 1), ci("abc".as_bytes(), 1));
    assert_eq!(utf8("ÄBC".as_bytes(), 1), utf8("äbc".as_bytes(), 1));
    assert_eq!(cs("abc".as_bytes(), 1), cs("abc".as_bytes(), 1));
    Ok(())
}

#[test]
fn test_unknown_collation() -> Result<()> {
    let bytes = build_bytes(small_settings(), sample_values)?;
    let mut reg = CollationRegistry::empty();
    let e = SecondaryIndex::open_with(
        Arc::new(MemSource::from(bytes.clone())),
        &CodecRegistry::default(),
        &reg,
    )
    .err()
    .unwrap();
    assert_eq!(e.kind(), ErrorKind::UnknownName);
    let e = SecondaryIndexBuilder::new(small_settings(), &CodecRegistry::default(), &reg)
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::UnknownName);

    reg.register(Collation::LibcCi, colsieve_common::default_str_hash);
    let idx = SecondaryIndex::open_with(Arc::new(MemSource::from(bytes)), &CodecRegistry::default(), &reg)?;
    assert_eq!(idx.num_attrs(), 8);
    Ok(())
}

#[test]
fn test_unknown_codec() -> Result<()> {
    let settings = IndexSettings {
        compression_u64: "simdfastpfor128".to_string(),
        ..small_settings()
    };
    let e = SecondaryIndexBuilder::new(settings, &CodecRegistry::default(), &CollationRegistry::default())
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::UnknownName);
    Ok(())
}

#[test]
fn test_newer_version_refused() -> Result<()> {
    let mut bytes = build_bytes(small_settings(), sample_values)?;
    bytes[..4].copy_from_slice(&(STORAGE_VERSION + 1).to_le_bytes());
    let e = open_bytes(bytes).err().unwrap();
    assert_eq!(e.kind(), ErrorKind::VersionMismatch);
    assert!(e
        .message()
        .starts_with("Unable to load secondary index: "));
    Ok(())
}

#[test]
fn test_truncated_file() -> Result<()> {
    let bytes = build_bytes(small_settings(), sample_values)?;
    assert!(open_bytes(bytes[..bytes.len() / 2].to_vec()).is_err());
    assert!(open_bytes(bytes[..3].to_vec()).is_err());
    Ok(())
}

#[test]
fn test_builder_rejects_ragged_columns() -> Result<()> {
    let mut b = SecondaryIndexBuilder::new(
        small_settings(),
        &CodecRegistry::default(),
        &CollationRegistry::default(),
    )?;
    b.add_u32("a", &[1, 2, 3])?;
    assert!(b.add_u32("b", &[1, 2]).is_err());
    assert!(b.add_u32("a", &[1, 2, 3]).is_err());
    Ok(())
}

#[test]
fn test_enable_flags_persist() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("idx.spidx");
    let mut b = SecondaryIndexBuilder::new(
        small_settings(),
        &CodecRegistry::default(),
        &CollationRegistry::default(),
    )?;
    sample_values(&mut b)?;
    b.write_file(&path)?;

    let reg = CollationRegistry::default();
    let mut idx = SecondaryIndex::open(&path, &reg)?;
    assert!(idx.is_enabled("mod"));
    idx.column_updated("mod");
    idx.column_updated("missing");
    assert!(!idx.is_enabled("mod"));
    let e = idx
        .create_iterators(&Filter::values("mod", &[1]), RowIdRange::default())
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::Unsupported);
    idx.save_meta()?;
    drop(idx);

    let idx = SecondaryIndex::open(&path, &reg)?;
    assert!(!idx.is_enabled("mod"));
    assert!(idx.is_enabled("single"));
    assert_eq!(idx.get_column("mod").map(|c| c.enabled), Some(false));
    assert_eq!(
        rows_of(&idx, &Filter::values("single", &[9]), RowIdRange::default())?,
        vec![9]
    );
    Ok(())
}

#[test]
fn test_save_meta_needs_a_file() -> Result<()> {
    let mut idx = sample_index()?;
    // Nothing changed: nothing to write.
    idx.save_meta()?;
    idx.column_updated("mod");
    let e = idx.save_meta().err().unwrap();
    assert_eq!(e.kind(), ErrorKind::Unsupported);
    Ok(())
}

#[test]
fn test_missing_file() {
    let e = SecondaryIndex::open("/nonexistent/colsieve.spidx", &CollationRegistry::default())
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::Io);
    assert!(e.message().contains("/nonexistent/colsieve.spidx"));
}
