use colsieve_base::{CodecRegistry, SharedReader, CODEC_BITPACK};
use colsieve_common::{
    collect_row_ids, BlockIterator, BoxedBlockIterator, IteratorDesc, RowId, RowIdRange,
};
use test_log::test;

use super::{lcg_rand_step, VecIterator};
use crate::{Packing, PostingsIterator, UnionIterator};

fn union_of(sets: &[Vec<RowId>], batch: usize) -> UnionIterator {
    let its: Vec<BoxedBlockIterator> = sets
        .iter()
        .map(|s| Box::new(VecIterator::new(s.clone(), batch)) as BoxedBlockIterator)
        .collect();
    UnionIterator::new("a", its)
}

#[test]
fn test_union_dedups() {
    let sets = vec![vec![1, 4, 9, 10], vec![2, 4, 10, 11, 30], vec![], vec![4]];
    let mut it = union_of(&sets, 2);
    assert_eq!(collect_row_ids(&mut it), vec![1, 2, 4, 9, 10, 11, 30]);
    let mut block = Vec::new();
    assert!(!it.get_next_row_id_block(&mut block));
    assert!(block.is_empty());
    assert_eq!(it.num_processed(), 10);
    let mut desc = Vec::new();
    it.add_desc(&mut desc);
    assert_eq!(
        desc,
        vec![IteratorDesc {
            attr: "a".to_string(),
            kind: "sidx-union"
        }]
    );
}

#[test]
fn test_union_hint() {
    let sets = vec![vec![1, 5, 8, 20], vec![3, 6, 7, 25, 26]];
    let mut it = union_of(&sets, 2);
    assert!(it.hint_row_id(6));
    assert_eq!(collect_row_ids(&mut it), vec![6, 7, 8, 20, 25, 26]);
    assert!(!it.hint_row_id(100));

    let mut it = union_of(&sets, 2);
    assert!(!it.hint_row_id(27));
    assert!(collect_row_ids(&mut it).is_empty());
}

#[test]
fn test_union_random() {
    let mut state = 7;
    for round in 0..20 {
        let mut sets = Vec::new();
        for _ in 0..(round % 5 + 1) {
            let mut set: Vec<RowId> = (0..50)
                .map(|_| {
                    lcg_rand_step(&mut state);
                    state % 500
                })
                .collect();
            set.sort_unstable();
            set.dedup();
            sets.push(set);
        }
        let mut expected: Vec<RowId> = sets.iter().flatten().copied().collect();
        expected.sort_unstable();
        expected.dedup();
        let mut it = union_of(&sets, 1 + round % 7);
        assert_eq!(collect_row_ids(&mut it), expected);
    }
}

#[test]
fn test_union_reports_child_failure() {
    let codec = CodecRegistry::default()
        .create_int_codec(CODEC_BITPACK, CODEC_BITPACK)
        .unwrap();
    let broken = PostingsIterator::new(
        "a",
        Packing::RowBlock,
        100,
        SharedReader::from(vec![0u8; 4]),
        codec,
        RowIdRange::default(),
        10,
    );
    let its: Vec<BoxedBlockIterator> = vec![
        Box::new(VecIterator::new(vec![1, 5, 9], 2)),
        Box::new(broken),
    ];
    let mut u = UnionIterator::new("a", its);
    assert_eq!(collect_row_ids(&mut u), vec![1, 5, 9]);
    assert!(u.take_error().is_some());
    assert!(u.take_error().is_none());

    let mut u = union_of(&[vec![1, 2], vec![2, 3]], 1);
    collect_row_ids(&mut u);
    assert!(u.take_error().is_none());
}
