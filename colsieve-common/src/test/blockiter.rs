use crate::{
    check_empty_span, collect_row_ids, fetch_row_id_limits, BlockIterator, Filter, IteratorDesc,
    RowId, RowIdRange, ROWID_FILTER_NAME,
};
use test_log::test;

struct Counting {
    next: RowId,
    end: RowId,
    processed: i64,
}

impl BlockIterator for Counting {
    fn hint_row_id(&mut self, row_id: RowId) -> bool {
        self.next = self.next.max(row_id);
        self.next < self.end
    }
    fn get_next_row_id_block(&mut self, block: &mut Vec<RowId>) -> bool {
        block.clear();
        let start = block.len();
        while self.next < self.end && block.len() < 4 {
            block.push(self.next);
            self.next += 1;
            self.processed += 1;
        }
        check_empty_span(block, start)
    }
    fn num_processed(&self) -> i64 {
        self.processed
    }
    fn add_desc(&self, desc: &mut Vec<IteratorDesc>) {
        desc.push(IteratorDesc {
            attr: "n".into(),
            kind: "counting",
        });
    }
}

#[test]
fn test_exhaustion_is_idempotent() {
    let mut it = Counting {
        next: 0,
        end: 10,
        processed: 0,
    };
    assert!(it.hint_row_id(3));
    assert_eq!(collect_row_ids(&mut it), (3..10).collect::<Vec<_>>());
    let mut block = vec![99];
    assert!(!it.get_next_row_id_block(&mut block));
    assert!(block.is_empty());
    assert!(!it.get_next_row_id_block(&mut block));
    assert_eq!(it.num_processed(), 7);
    assert!(!it.hint_row_id(0));
}

#[test]
fn test_row_id_range() {
    let r = RowIdRange::default();
    assert!(r.is_full());
    let r = RowIdRange::new(10, 20);
    assert!(r.contains(10) && r.contains(20) && !r.contains(21));
    assert!(r.overlaps(0, 10));
    assert!(!r.overlaps(21, 30));
    let r = RowIdRange::empty();
    assert!(r.is_empty() && !r.is_full());
    assert!(!r.contains(0) && !r.contains(1));
    assert!(!r.overlaps(0, 100));
}

#[test]
fn test_fetch_row_id_limits() {
    let mut f = Filter::range(ROWID_FILTER_NAME, 0, 4);
    assert_eq!(fetch_row_id_limits(&f, 1000), RowIdRange::new(0, 249));
    f.min_value = 1;
    assert_eq!(fetch_row_id_limits(&f, 1000), RowIdRange::new(250, 499));
    f.min_value = 3;
    assert_eq!(fetch_row_id_limits(&f, 1000), RowIdRange::new(750, 1000));
    f.max_value = 0;
    assert!(fetch_row_id_limits(&f, 1000).is_full());
}

#[test]
fn test_fetch_row_id_limits_more_chunks_than_rows() {
    // Every row belongs to exactly one chunk; the rest come back empty.
    let mut owners = vec![Vec::new(); 3];
    for chunk in 0..10 {
        let r = fetch_row_id_limits(&Filter::range(ROWID_FILTER_NAME, chunk, 10), 3);
        for row in 0..3u32 {
            if r.contains(row) {
                owners[row as usize].push(chunk);
            }
        }
        if chunk < 3 {
            assert!(r.is_empty(), "chunk {} got {:?}", chunk, r);
        }
    }
    assert_eq!(owners, vec![vec![3], vec![6], vec![9]]);
}
