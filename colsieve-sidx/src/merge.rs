use std::{cmp::Reverse, collections::BinaryHeap};

use colsieve_base::Error;
use colsieve_common::{BlockIterator, BoxedBlockIterator, IteratorDesc, RowId};

const UNION_BATCH: usize = 1024;

struct Source {
    it: BoxedBlockIterator,
    buf: Vec<RowId>,
    pos: usize,
    done: bool,
}

impl Source {
    fn head(&self) -> Option<RowId> {
        self.buf.get(self.pos).copied()
    }

    // Refills the buffer once it is used up. Leaves `head` None only when
    // the child is exhausted.
    fn refill(&mut self, floor: RowId) {
        while !self.done && self.head().is_none() {
            if self.it.get_next_row_id_block(&mut self.buf) {
                self.pos = self.buf.partition_point(|r| *r < floor);
            } else {
                self.buf.clear();
                self.pos = 0;
                self.done = true;
            }
        }
    }
}

/// Merges the row ids of several iterators into one increasing stream
/// without duplicates.
pub struct UnionIterator {
    attr: String,
    sources: Vec<Source>,
    heap: BinaryHeap<Reverse<(RowId, usize)>>,
    primed: bool,
    floor: RowId,
    last: Option<RowId>,
}

impl UnionIterator {
    pub fn new(attr: &str, its: Vec<BoxedBlockIterator>) -> Self {
        UnionIterator {
            attr: attr.to_string(),
            sources: its
                .into_iter()
                .map(|it| Source {
                    it,
                    buf: Vec::new(),
                    pos: 0,
                    done: false,
                })
                .collect(),
            heap: BinaryHeap::new(),
            primed: false,
            floor: 0,
            last: None,
        }
    }

    fn rebuild_heap(&mut self) {
        self.heap.clear();
        for (i, src) in self.sources.iter_mut().enumerate() {
            src.refill(self.floor);
            if let Some(row) = src.head() {
                self.heap.push(Reverse((row, i)));
            }
        }
        self.primed = true;
    }
}

impl BlockIterator for UnionIterator {
    fn hint_row_id(&mut self, row_id: RowId) -> bool {
        if row_id > self.floor {
            self.floor = row_id;
            for src in &mut self.sources {
                if src.done {
                    continue;
                }
                src.pos = src.pos.max(src.buf.partition_point(|r| *r < row_id));
                if src.head().is_none() && !src.it.hint_row_id(row_id) {
                    src.done = true;
                }
            }
            self.rebuild_heap();
        }
        if !self.primed {
            self.rebuild_heap();
        }
        !self.heap.is_empty()
    }

    fn get_next_row_id_block(&mut self, block: &mut Vec<RowId>) -> bool {
        block.clear();
        if !self.primed {
            self.rebuild_heap();
        }
        while block.len() < UNION_BATCH {
            let Some(Reverse((row, i))) = self.heap.pop() else {
                break;
            };
            if self.last != Some(row) {
                block.push(row);
                self.last = Some(row);
            }
            let src = &mut self.sources[i];
            src.pos += 1;
            src.refill(self.floor);
            if let Some(next) = src.head() {
                self.heap.push(Reverse((next, i)));
            }
        }
        !block.is_empty()
    }

    fn num_processed(&self) -> i64 {
        self.sources.iter().map(|s| s.it.num_processed()).sum()
    }

    fn add_desc(&self, desc: &mut Vec<IteratorDesc>) {
        desc.push(IteratorDesc {
            attr: self.attr.clone(),
            kind: "sidx-union",
        });
    }

    fn take_error(&mut self) -> Option<Error> {
        self.sources.iter_mut().find_map(|s| s.it.take_error())
    }
}
