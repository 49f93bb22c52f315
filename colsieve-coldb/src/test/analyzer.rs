use colsieve_base::{CodecRegistry, ErrorKind, Result, SharedReader, CODEC_BITPACK};
use colsieve_common::{
    collect_row_ids, BlockIterator, Filter, FilterKind, IteratorDesc, MvaAggr, RowIdRange,
};
use test_log::test;

use super::{eval, expect_rows, open_mem, sample_columnar, small_settings, tags_of, ROWS};
use crate::{Analyzer, ColumnAnalyzer, ColumnarBuilder};

#[test]
fn test_scalar_range() -> Result<()> {
    let col = sample_columnar()?;
    let rows = eval(&col, &[Filter::range("price", 10, 20)])?;
    assert_eq!(rows, expect_rows(|i| (10..=20).contains(&(i * 7 % 100))));
    Ok(())
}

#[test]
fn test_scalar_excluded_values() -> Result<()> {
    let col = sample_columnar()?;
    let rows = eval(&col, &[Filter::values("price", &[0, 7]).excluded()])?;
    assert_eq!(rows, expect_rows(|i| ![0, 7].contains(&(i * 7 % 100))));
    Ok(())
}

#[test]
fn test_table_and_const_blocks() -> Result<()> {
    let col = sample_columnar()?;
    assert_eq!(
        eval(&col, &[Filter::values("flag", &[1])])?,
        expect_rows(|i| i % 3 == 0)
    );
    assert_eq!(
        eval(&col, &[Filter::values("const", &[5])])?,
        expect_rows(|_| true)
    );
    assert!(eval(&col, &[Filter::values("const", &[6])])?.is_empty());
    assert!(eval(&col, &[Filter::values("const", &[-1])])?.is_empty());
    Ok(())
}

#[test]
fn test_float_ranges() -> Result<()> {
    let col = sample_columnar()?;
    assert_eq!(
        eval(&col, &[Filter::float_range("score", 10.0, 20.0)])?,
        expect_rows(|i| (20..=40).contains(&i))
    );
    assert_eq!(
        eval(&col, &[Filter::float_range("score", 10.0, 20.0).open_left()])?,
        expect_rows(|i| (21..=40).contains(&i))
    );
    // An integer range over a float attribute compares as floats.
    assert_eq!(
        eval(&col, &[Filter::range("score", 99, 200)])?,
        expect_rows(|i| i >= 198)
    );
    Ok(())
}

#[test]
fn test_wide_signed_range() -> Result<()> {
    let col = sample_columnar()?;
    let rows = eval(
        &col,
        &[Filter::range("big", -5_000_000_000, 5_000_000_000)],
    )?;
    assert_eq!(rows, expect_rows(|i| (95..=105).contains(&i)));
    let below = eval(&col, &[Filter::range("big", 0, 0).unbounded_left()])?;
    assert_eq!(below, expect_rows(|i| i <= 100));
    Ok(())
}

#[test]
fn test_set_aggregation() -> Result<()> {
    let col = sample_columnar()?;
    let any = eval(&col, &[Filter::values("tags", &[3]).aggr(MvaAggr::Any)])?;
    assert_eq!(any, expect_rows(|i| tags_of(i).contains(&3)));

    let all = eval(&col, &[Filter::range("tags", 0, 3).aggr(MvaAggr::All)])?;
    assert_eq!(
        all,
        expect_rows(|i| {
            let t = tags_of(i);
            !t.is_empty() && t.iter().all(|v| *v <= 3)
        })
    );

    // Exclusion applies after aggregation, so empty rows pass.
    let excluded = eval(
        &col,
        &[Filter::values("tags", &[3]).aggr(MvaAggr::Any).excluded()],
    )?;
    assert_eq!(excluded, expect_rows(|i| !tags_of(i).contains(&3)));
    assert!(excluded.contains(&0));
    Ok(())
}

#[test]
fn test_string_filter_via_hash() -> Result<()> {
    let col = sample_columnar()?;
    let rows = eval(&col, &[Filter::strings("name", &["n1", "n3"])])?;
    assert_eq!(rows, expect_rows(|i| i % 4 == 1 || i % 4 == 3));
    assert!(eval(&col, &[Filter::strings("name", &["n9"])])?.is_empty());
    Ok(())
}

#[test]
fn test_string_filter_without_hash_is_rejected() -> Result<()> {
    let col = sample_columnar()?;
    let filter = Filter {
        name: "name".into(),
        kind: FilterKind::Strings,
        string_values: vec![b"n1".to_vec()],
        ..Default::default()
    };
    let e = col.create_block_tester(&[filter]).err().unwrap();
    assert_eq!(e.kind(), ErrorKind::Unsupported);
    Ok(())
}

#[test]
fn test_conjunction() -> Result<()> {
    let col = sample_columnar()?;
    let rows = eval(
        &col,
        &[
            Filter::range("price", 0, 49),
            Filter::values("flag", &[1]),
        ],
    )?;
    assert_eq!(rows, expect_rows(|i| i * 7 % 100 <= 49 && i % 3 == 0));
    Ok(())
}

#[test]
fn test_hint_and_exhaustion() -> Result<()> {
    let col = sample_columnar()?;
    let mut a = col.create_analyzer(&Filter::range("price", 0, 99), RowIdRange::default())?;
    a.setup(None, ROWS);
    assert!(a.hint_row_id(150));
    let rows = collect_row_ids(&mut a);
    assert_eq!(rows, (150..ROWS).collect::<Vec<_>>());
    assert_eq!(a.num_processed(), 50);

    let mut block = vec![1, 2, 3];
    assert!(!a.get_next_row_id_block(&mut block));
    assert!(block.is_empty());
    assert!(!a.get_next_row_id_block(&mut block));
    assert!(!a.hint_row_id(0));

    let mut desc = Vec::new();
    a.add_desc(&mut desc);
    assert_eq!(
        desc,
        vec![IteratorDesc {
            attr: "price".into(),
            kind: "analyzer"
        }]
    );
    Ok(())
}

#[test]
fn test_batches_increase_across_calls() -> Result<()> {
    let col = sample_columnar()?;
    let mut a = col.create_analyzer(&Filter::values("flag", &[0]), RowIdRange::new(7, 180))?;
    a.setup(None, ROWS);
    let mut block = Vec::new();
    let mut last = None;
    let mut total = 0;
    while a.get_next_row_id_block(&mut block) {
        assert!(!block.is_empty());
        for r in &block {
            assert!(last.map_or(true, |l| l < *r));
            assert!((7..=180).contains(r));
            last = Some(*r);
        }
        total += block.len();
    }
    assert_eq!(total, (7..=180).filter(|i| i % 3 != 0).count());
    Ok(())
}

#[test]
fn test_analyzer_without_setup_is_empty() -> Result<()> {
    let col = sample_columnar()?;
    let mut a = col.create_analyzer(&Filter::range("price", 0, 99), RowIdRange::default())?;
    assert!(collect_row_ids(&mut a).is_empty());
    Ok(())
}

#[test]
fn test_unknown_attribute() -> Result<()> {
    let col = sample_columnar()?;
    let e = col
        .create_analyzer(&Filter::range("nope", 0, 1), RowIdRange::default())
        .err()
        .unwrap();
    assert_eq!(e.kind(), ErrorKind::UnknownName);
    Ok(())
}

#[test]
fn test_across_storage_blocks() -> Result<()> {
    let n = 70_000u32;
    let col = open_mem(|b| {
        b.add_u32("v", &(0..n).map(|i| i % 1000).collect::<Vec<_>>())?;
        b.add_u32_set("s", &(0..n).map(|i| vec![i % 1000, 5000]).collect::<Vec<_>>())
    })?;
    assert_eq!(col.num_docs(), n);
    let expected: Vec<u32> = (0..n).filter(|i| i % 1000 == 999).collect();
    assert_eq!(eval(&col, &[Filter::values("v", &[999])])?, expected);
    assert_eq!(
        eval(&col, &[Filter::values("s", &[999]).aggr(MvaAggr::Any)])?,
        expected
    );
    Ok(())
}

#[test]
fn test_builder_rejects_ragged_columns() -> Result<()> {
    let mut b = ColumnarBuilder::new(small_settings(), &CodecRegistry::default())?;
    b.add_u32("a", &[1, 2, 3])?;
    assert!(b.add_u32("b", &[1, 2]).is_err());
    assert!(b.add_u32("a", &[1, 2, 3]).is_err());
    Ok(())
}

#[test]
fn test_read_failure_is_reported() -> Result<()> {
    let col = sample_columnar()?;
    let header = col.get_header("price").unwrap().clone();
    let codec = CodecRegistry::default().create_int_codec(CODEC_BITPACK, CODEC_BITPACK)?;
    // A reader over a truncated copy: every block offset lies past its end.
    let mut a = ColumnAnalyzer::new(
        header,
        SharedReader::from(vec![0u8; 8]),
        codec,
        &Filter::range("price", 0, 99),
        RowIdRange::default(),
    )?;
    a.setup(None, ROWS);
    assert!(collect_row_ids(&mut a).is_empty());
    assert!(a.take_error().is_some());
    assert!(a.take_error().is_none());

    // A healthy scan has nothing to report.
    let mut a = col.create_analyzer(&Filter::range("price", 0, 99), RowIdRange::default())?;
    a.setup(None, ROWS);
    assert!(!collect_row_ids(&mut a).is_empty());
    assert!(a.take_error().is_none());
    Ok(())
}
