use std::{
    io::{Seek, Write},
    sync::Arc,
};

use colsieve_base::{CodecRegistry, ErrorKind, MemSource, MemWriter, Result, WriteExt};
use colsieve_common::{
    collect_row_ids, default_str_hash, AttrType, Filter, IteratorDesc, RowId, RowIdRange,
    ROWID_FILTER_NAME,
};
use test_log::test;

use super::{eval, expect_rows, open_mem, sample_columnar, small_settings, ROWS};
use crate::{
    check_storage, layer::StorageMeta, AttributeHeader, Columnar, ColumnarBuilder, MinMaxTree,
    Settings,
};

#[test]
fn test_lookups() -> Result<()> {
    let col = sample_columnar()?;
    assert_eq!(col.num_docs(), ROWS);
    assert_eq!(col.get_type("name"), AttrType::String);
    assert_eq!(col.get_type("$name_HASH"), AttrType::Uint64);
    assert_eq!(col.get_type("tags"), AttrType::Uint32Set);
    assert_eq!(col.get_type("missing"), AttrType::None);
    assert_eq!(col.get_attribute_id("price"), Some(0));
    assert_eq!(col.get_attribute_id("missing"), None);
    assert_eq!(col.settings(), &small_settings());
    assert!(col.rejected_attrs().is_empty());
    let price = col.get_header("price").unwrap();
    assert_eq!(price.num_min_max_blocks(0), 7);
    assert_eq!(price.num_min_max_levels(), 4);
    Ok(())
}

#[test]
fn test_rowid_filter_bounds_analyzers() -> Result<()> {
    let col = sample_columnar()?;
    let filters = [
        Filter::range(ROWID_FILTER_NAME, 1, 4),
        Filter::range("price", 0, 100),
    ];
    let tester = col.create_block_tester(&filters)?;
    let mut deleted = Vec::new();
    let iters = col.create_analyzer_or_prefilter(&filters, &mut deleted, &tester)?;
    assert_eq!(deleted, vec![0, 1]);
    assert_eq!(iters.len(), 1);
    assert_eq!(eval(&col, &filters)?, expect_rows(|i| (50..=99).contains(&i)));
    Ok(())
}

#[test]
fn test_prefilter_over_row_chunk() -> Result<()> {
    let col = sample_columnar()?;
    let filters = [Filter::range(ROWID_FILTER_NAME, 0, 4)];
    let tester = col.create_block_tester(&filters)?;
    let mut deleted = Vec::new();
    let mut iters = col.create_analyzer_or_prefilter(&filters, &mut deleted, &tester)?;
    assert_eq!(deleted, vec![0]);
    assert_eq!(iters.len(), 1);
    let mut desc = Vec::new();
    iters[0].add_desc(&mut desc);
    assert_eq!(desc[0].kind, "prefilter");
    let rows = collect_row_ids(iters[0].as_mut());
    assert_eq!(rows, expect_rows(|i| i < 50));
    assert_eq!(iters[0].num_processed(), 50);
    Ok(())
}

#[test]
fn test_rowid_chunks_within_one_leaf() -> Result<()> {
    // Fewer rows than one minmax leaf: pruning keeps every leaf, so only
    // the row chunk narrows anything.
    let col = open_mem(|b| b.add_u32("a", &(0..20).collect::<Vec<_>>()))?;
    let mut seen = Vec::new();
    for chunk in 0..2 {
        let filters = [Filter::range(ROWID_FILTER_NAME, chunk, 2)];
        let tester = col.create_block_tester(&filters)?;
        let mut deleted = Vec::new();
        let mut iters = col.create_analyzer_or_prefilter(&filters, &mut deleted, &tester)?;
        assert_eq!(deleted, vec![0]);
        assert_eq!(iters.len(), 1);
        let rows = collect_row_ids(iters[0].as_mut());
        assert_eq!(rows.len(), 10);
        seen.extend(rows);
    }
    assert_eq!(seen, (0..20).collect::<Vec<RowId>>());

    // A chunk that owns no row yields nothing rather than every row.
    let filters = [Filter::range(ROWID_FILTER_NAME, 0, 40)];
    let tester = col.create_block_tester(&filters)?;
    let mut deleted = Vec::new();
    let mut iters = col.create_analyzer_or_prefilter(&filters, &mut deleted, &tester)?;
    assert_eq!(iters.len(), 1);
    assert!(collect_row_ids(iters[0].as_mut()).is_empty());
    Ok(())
}

#[test]
fn test_no_iterators_when_nothing_narrows() -> Result<()> {
    let col = sample_columnar()?;
    let tester = col.create_block_tester(&[])?;
    let mut deleted = Vec::new();
    assert!(col
        .create_analyzer_or_prefilter(&[], &mut deleted, &tester)?
        .is_empty());

    // Both boolean values: every row passes, nothing left to evaluate.
    let filters = [Filter::values("flag", &[0, 1])];
    assert!(col.is_filter_degenerate(&filters[0])?);
    let tester = col.create_block_tester(&filters)?;
    let iters = col.create_analyzer_or_prefilter(&filters, &mut deleted, &tester)?;
    assert!(iters.is_empty());
    assert_eq!(deleted, vec![0]);

    // Filters on attributes the storage lacks are left to the caller.
    let mut deleted = Vec::new();
    let filters = [Filter::range("elsewhere", 0, 1)];
    let tester = col.create_block_tester(&filters)?;
    assert!(col
        .create_analyzer_or_prefilter(&filters, &mut deleted, &tester)?
        .is_empty());
    assert!(deleted.is_empty());
    Ok(())
}

#[test]
fn test_early_reject_and_estimate() -> Result<()> {
    let col = sample_columnar()?;
    let miss = [Filter::range("price", 1000, 2000)];
    assert!(col.early_reject(&miss, &col.create_block_tester(&miss)?)?);
    let hit = [Filter::range("big", 0, 0)];
    let tester = col.create_block_tester(&hit)?;
    assert!(!col.early_reject(&hit, &tester)?);
    let est = col.estimate_min_max(&hit, &tester)?;
    assert_eq!(est.candidate_leaves, 1);
    assert_eq!(est.candidate_rows, 32);
    assert_eq!(est.candidate_rows + est.pruned_rows, ROWS as u64);
    Ok(())
}

#[test]
fn test_version_mismatch() -> Result<()> {
    let mut b = ColumnarBuilder::new(Settings::default(), &CodecRegistry::default())?;
    b.add_u32("a", &[1, 2, 3])?;
    let mut bytes = b.finish(MemWriter::new())?.into_inner();
    bytes[8..12].copy_from_slice(&2u32.to_le_bytes());
    let e = Columnar::open_with(Arc::new(MemSource::from(bytes)), &CodecRegistry::default())
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::VersionMismatch);
    assert!(e.message().contains("is v.2, binary is v.1"));
    Ok(())
}

#[test]
fn test_bad_magic_and_truncation() -> Result<()> {
    let bytes = b"notcolsieve-at-all".to_vec();
    let e = Columnar::open_with(Arc::new(MemSource::from(bytes)), &CodecRegistry::default())
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::Corrupt);

    let mut b = ColumnarBuilder::new(Settings::default(), &CodecRegistry::default())?;
    b.add_u32("a", &[1, 2, 3])?;
    let mut bytes = b.finish(MemWriter::new())?.into_inner();
    bytes.truncate(bytes.len() - 3);
    assert!(
        Columnar::open_with(Arc::new(MemSource::from(bytes)), &CodecRegistry::default()).is_err()
    );
    Ok(())
}

#[test]
fn test_unknown_codec_fails() {
    let settings = Settings {
        compression_u32: "zstd".into(),
        ..Settings::default()
    };
    let e = ColumnarBuilder::new(settings, &CodecRegistry::default())
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::UnknownName);
}

#[test]
fn test_inconsistent_header_is_dropped() -> Result<()> {
    let settings = small_settings();
    let shared = Arc::new(settings.clone());
    let mut w = MemWriter::new();
    StorageMeta::new(settings, 10, 2).write(&mut w)?;
    w.write_all(&[0; 16])?;
    let headers_offset = w.stream_position()?;
    AttributeHeader::new("good", AttrType::String, shared.clone(), 10, Vec::new(), MinMaxTree::default())
        .save(&mut w)?;
    AttributeHeader::new("bad", AttrType::Uint32, shared, 10, vec![999_999], MinMaxTree::default())
        .save(&mut w)?;
    StorageMeta::patch_headers_offset(&mut w, headers_offset)?;
    w.write_le_u32(0)?;

    let col = Columnar::open_with(Arc::new(MemSource::from(w.into_inner())), &CodecRegistry::default())?;
    assert_eq!(col.num_attrs(), 1);
    assert_eq!(col.rejected_attrs(), &["bad".to_string()]);
    assert_eq!(col.get_type("good"), AttrType::String);
    assert_eq!(col.get_type("bad"), AttrType::None);
    Ok(())
}

#[test]
fn test_file_round_trip_and_check() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("attrs.col");
    let mut b = ColumnarBuilder::new(small_settings(), &CodecRegistry::default())?;
    let rows: Vec<u32> = (0..500).collect();
    b.add_u32("id", &rows)?;
    b.add_i64_set("pairs", &rows.iter().map(|i| vec![-(*i as i64), *i as i64]).collect::<Vec<_>>())?;
    b.add_strings("label", &rows.iter().map(|i| format!("l{}", i % 3)).collect::<Vec<_>>(), default_str_hash)?;
    b.write_file(&path)?;

    let col = Columnar::open(&path)?;
    assert_eq!(col.num_docs(), 500);
    let mut a = col.create_analyzer(&Filter::range("id", 490, 1000), RowIdRange::default())?;
    crate::Analyzer::setup(&mut a, None, 500);
    assert_eq!(collect_row_ids(&mut a), (490..500).collect::<Vec<_>>());
    let mut desc: Vec<IteratorDesc> = Vec::new();
    colsieve_common::BlockIterator::add_desc(&a, &mut desc);
    assert_eq!(desc[0].attr, "id");

    let mut errors = Vec::new();
    let mut progress = 0.0;
    assert!(check_storage(&path, 500, &mut |e| errors.push(e.to_string()), &mut |p| progress = p));
    assert!(errors.is_empty(), "{:?}", errors);
    assert_eq!(progress, 1.0);

    let mut errors = Vec::new();
    assert!(!check_storage(&path, 501, &mut |e| errors.push(e.to_string()), &mut |_| {}));
    assert_eq!(errors.len(), 1);
    Ok(())
}

#[test]
fn test_check_reports_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut errors = Vec::new();
    assert!(!check_storage(dir.path().join("none"), 0, &mut |e| errors.push(e.to_string()), &mut |_| {}));
    assert_eq!(errors.len(), 1);
}
