// Value blocks are read through one of two readers. `BlockReader`
// finds discrete values, checking the value block the approximate index
// points at first and the neighboring blocks only if needed. `RangeReader`
// scans value blocks in order and takes every value inside a range.
//
// A value block holds five codec word blocks and then the postings
// payloads:
//
//   keys        delta coded, 64-bit words for wide keys
//   packings    one `Packing` code per value
//   row_min     first row of each value
//   row_max     last row of each value
//   row_start   the row itself for `Row`, else the payload offset
//               relative to the end of the word blocks

use std::{cmp::Ordering, sync::Arc};

use colsieve_base::{
    compute_inverse_deltas, err_kind, ErrorKind, IntCodec, ReadExt, Result, SharedReader, Source,
};
use colsieve_common::{BoxedBlockIterator, Filter, MvaAggr, RowIdRange};
use tracing::trace;

use crate::{common::AttrIndex, ApproxPos, Packing, PostingsIterator, UnionIterator};

/// The value blocks one lookup must search: `pos` is the best guess,
/// relative to `start`; `last` is inclusive. Empty when `start > last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockIter {
    pub val: u64,
    pub pos: usize,
    pub start: usize,
    pub last: usize,
}

impl BlockIter {
    pub fn new(from: ApproxPos, val: u64, blocks_count: usize, values_per_block: u32) -> Self {
        if blocks_count == 0 {
            return BlockIter {
                val,
                pos: 0,
                start: 1,
                last: 0,
            };
        }
        let vpb = values_per_block.max(1) as u64;
        let block_of = |v: u64| (v / vpb).min(blocks_count as u64 - 1) as usize;
        let last = block_of(from.hi);
        let start = block_of(from.lo).min(last);
        let pos = block_of(from.pos).clamp(start, last) - start;
        BlockIter {
            val,
            pos,
            start,
            last,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.last
    }
}

#[derive(Default)]
struct ValueBlock {
    loaded: Option<usize>,
    keys: Vec<u64>,
    packings: Vec<u32>,
    row_min: Vec<u32>,
    row_max: Vec<u32>,
    row_start: Vec<u64>,
    payload_base: u64,
    scratch: Vec<u32>,
}

impl ValueBlock {
    fn len(&self) -> usize {
        self.keys.len()
    }

    fn read_u32s(rd: &mut SharedReader, codec: &dyn IntCodec, out: &mut Vec<u32>) -> Result<()> {
        let words = rd.read_words()?;
        out.clear();
        codec.decode_u32(&words, out)
    }

    fn load(&mut self, rd: &mut SharedReader, codec: &dyn IntCodec, attr: &AttrIndex, block: usize) -> Result<()> {
        let off = *attr.block_offsets.get(block).ok_or_else(|| {
            err_kind(
                ErrorKind::Corrupt,
                format!("'{}': value block {} out of range", attr.name, block),
            )
        })?;
        rd.seek_to(off)?;
        let words = rd.read_words()?;
        self.keys.clear();
        if attr.kind.is_wide() {
            codec.decode_u64(&words, &mut self.keys)?;
            compute_inverse_deltas(&mut self.keys);
        } else {
            Self::read_narrow_keys(codec, &words, &mut self.scratch, &mut self.keys)?;
        }
        Self::read_u32s(rd, codec, &mut self.packings)?;
        Self::read_u32s(rd, codec, &mut self.row_min)?;
        Self::read_u32s(rd, codec, &mut self.row_max)?;
        let words = rd.read_words()?;
        self.row_start.clear();
        codec.decode_u64(&words, &mut self.row_start)?;
        self.payload_base = rd.pos()?;
        let n = self.keys.len();
        if n == 0
            || [self.packings.len(), self.row_min.len(), self.row_max.len(), self.row_start.len()]
                .iter()
                .any(|len| *len != n)
        {
            self.loaded = None;
            return Err(err_kind(
                ErrorKind::Corrupt,
                format!("'{}': value block {} is malformed", attr.name, block),
            ));
        }
        self.loaded = Some(block);
        Ok(())
    }

    fn read_narrow_keys(codec: &dyn IntCodec, words: &[u32], scratch: &mut Vec<u32>, keys: &mut Vec<u64>) -> Result<()> {
        scratch.clear();
        codec.decode_u32(words, scratch)?;
        compute_inverse_deltas(scratch);
        keys.extend(scratch.iter().map(|k| *k as u64));
        Ok(())
    }

    // Where `val` sits in this block: its index if present, and where the
    // block lies relative to it. `Equal` means the value falls within the
    // block's key span, so no other block can hold it.
    fn find(&self, attr: &AttrIndex, val: u64) -> (Option<usize>, Ordering) {
        let kind = attr.kind;
        let idx = self.keys.partition_point(|k| kind.cmp(*k, val).is_lt());
        for i in [idx.wrapping_sub(1), idx] {
            if self.keys.get(i).is_some_and(|k| kind.eq(*k, val)) {
                return (Some(i), Ordering::Equal);
            }
        }
        match (self.keys.first(), self.keys.last()) {
            (Some(first), Some(last)) => {
                if kind.cmp(*last, val).is_lt() {
                    (None, Ordering::Less)
                } else if kind.cmp(*first, val).is_gt() {
                    (None, Ordering::Greater)
                } else {
                    (None, Ordering::Equal)
                }
            }
            _ => (None, Ordering::Equal),
        }
    }
}

// State shared by both readers: the attribute, a cursor of its own over
// the index file, and the currently loaded value block.
struct ReaderBase {
    attr: Arc<AttrIndex>,
    src: Arc<dyn Source>,
    rd: SharedReader,
    codec: Arc<dyn IntCodec>,
    bounds: RowIdRange,
    num_docs: u32,
    block: ValueBlock,
}

impl ReaderBase {
    fn new(attr: Arc<AttrIndex>, src: Arc<dyn Source>, codec: Arc<dyn IntCodec>, bounds: RowIdRange, num_docs: u32) -> Self {
        ReaderBase {
            attr,
            rd: SharedReader::new(src.clone()),
            src,
            codec,
            bounds,
            num_docs,
            block: ValueBlock::default(),
        }
    }

    fn load(&mut self, block: usize) -> Result<()> {
        if self.block.loaded == Some(block) {
            return Ok(());
        }
        self.block.load(&mut self.rd, self.codec.as_ref(), &self.attr, block)
    }

    // Rows of value `i` within the bounds, by its row span. An upper bound.
    fn value_count(&self, i: usize) -> u64 {
        let lo = self.block.row_min[i].max(self.bounds.min);
        let hi = self.block.row_max[i].min(self.bounds.max);
        if lo > hi {
            0
        } else {
            (hi - lo) as u64 + 1
        }
    }

    fn create_iterator(&self, i: usize) -> Result<Option<PostingsIterator>> {
        let packing = Packing::from_u32(self.block.packings[i])?;
        if !self.bounds.overlaps(self.block.row_min[i], self.block.row_max[i]) {
            return Ok(None);
        }
        let start = match packing {
            Packing::Row => self.block.row_start[i],
            Packing::RowFullscan => 0,
            Packing::RowBlock | Packing::RowBlocksList => {
                self.block.payload_base + self.block.row_start[i]
            }
        };
        Ok(Some(PostingsIterator::new(
            &self.attr.name,
            packing,
            start,
            SharedReader::new(self.src.clone()),
            self.codec.clone(),
            self.bounds,
            self.num_docs,
        )))
    }

    fn merge(&self, its: Vec<PostingsIterator>, aggr: MvaAggr) -> Vec<BoxedBlockIterator> {
        let boxed: Vec<BoxedBlockIterator> = its
            .into_iter()
            .map(|it| Box::new(it) as BoxedBlockIterator)
            .collect();
        if aggr == MvaAggr::All || boxed.len() < 2 {
            return boxed;
        }
        vec![Box::new(UnionIterator::new(&self.attr.name, boxed))]
    }
}

/// Looks up discrete values.
pub struct BlockReader {
    base: ReaderBase,
}

impl BlockReader {
    pub(crate) fn new(attr: Arc<AttrIndex>, src: Arc<dyn Source>, codec: Arc<dyn IntCodec>, bounds: RowIdRange, num_docs: u32) -> Self {
        BlockReader {
            base: ReaderBase::new(attr, src, codec, bounds, num_docs),
        }
    }

    fn check_block(&mut self, block: usize, val: u64) -> Result<(Option<usize>, Ordering)> {
        self.base.load(block)?;
        Ok(self.base.block.find(&self.base.attr, val))
    }

    // Leaves the block holding `it.val` loaded and returns the value's
    // index in it. Tries the loaded block, then the best guess, then the
    // rest of the window in order.
    fn locate(&mut self, it: &BlockIter) -> Result<Option<usize>> {
        if it.is_empty() {
            return Ok(None);
        }
        let best = it.start + it.pos;
        let mut checked = None;
        if let Some(loaded) = self.base.block.loaded {
            if loaded != best && (it.start..=it.last).contains(&loaded) {
                let (found, cmp) = self.check_block(loaded, it.val)?;
                if cmp.is_eq() {
                    return Ok(found);
                }
                checked = Some(loaded);
            }
        }
        let (found, cmp) = self.check_block(best, it.val)?;
        if cmp.is_eq() {
            return Ok(found);
        }
        for block in it.start..=it.last {
            if block == best || checked == Some(block) {
                continue;
            }
            let (found, cmp) = self.check_block(block, it.val)?;
            if cmp.is_lt() {
                continue;
            }
            return Ok(found);
        }
        Ok(None)
    }

    /// Appends the postings iterator for `it.val`, if the value exists
    /// and has rows within the bounds.
    pub fn create_blocks_iterator(&mut self, it: &BlockIter, out: &mut Vec<PostingsIterator>) -> Result<()> {
        if let Some(i) = self.locate(it)? {
            if let Some(postings) = self.base.create_iterator(i)? {
                out.push(postings);
            }
        }
        Ok(())
    }

    /// One iterator per value for `MvaAggr::All`, otherwise a single
    /// union of them all.
    pub fn create_blocks_iterators(&mut self, its: &[BlockIter], aggr: MvaAggr) -> Result<Vec<BoxedBlockIterator>> {
        let mut postings = Vec::with_capacity(its.len());
        for it in its {
            self.create_blocks_iterator(it, &mut postings)?;
        }
        trace!(
            target: "colsieve",
            attr = %self.base.attr.name,
            values = its.len(),
            found = postings.len(),
            "created value iterators"
        );
        Ok(self.base.merge(postings, aggr))
    }

    /// An upper bound on the rows the values of `its` hold within the
    /// bounds. Reads only value block headers.
    pub fn calc_value_count(&mut self, its: &[BlockIter]) -> Result<u64> {
        let mut count = 0;
        for it in its {
            if let Some(i) = self.locate(it)? {
                count += self.base.value_count(i);
            }
        }
        Ok(count)
    }
}

/// Takes every value inside a range filter.
pub struct RangeReader {
    base: ReaderBase,
}

impl RangeReader {
    pub(crate) fn new(attr: Arc<AttrIndex>, src: Arc<dyn Source>, codec: Arc<dyn IntCodec>, bounds: RowIdRange, num_docs: u32) -> Self {
        RangeReader {
            base: ReaderBase::new(attr, src, codec, bounds, num_docs),
        }
    }

    // Calls `on_value` for every value of the window inside `filter`,
    // stopping at the first block wholly past it.
    fn scan(&mut self, it: &BlockIter, filter: &Filter, mut on_value: impl FnMut(&ReaderBase, usize) -> Result<()>) -> Result<()> {
        if it.is_empty() {
            return Ok(());
        }
        let kind = self.base.attr.kind;
        for block in it.start..=it.last {
            self.base.load(block)?;
            let keys = &self.base.block.keys;
            let (first, last) = (keys[0], keys[keys.len() - 1]);
            match kind.cmp_block(first, last, filter) {
                Ordering::Less => continue,
                Ordering::Greater => break,
                Ordering::Equal => {}
            }
            for i in 0..self.base.block.len() {
                if kind.in_range(self.base.block.keys[i], filter) {
                    on_value(&self.base, i)?;
                }
            }
        }
        Ok(())
    }

    pub fn create_blocks_iterators(&mut self, it: &BlockIter, filter: &Filter) -> Result<Vec<BoxedBlockIterator>> {
        let mut postings = Vec::new();
        self.scan(it, filter, |base, i| {
            if let Some(p) = base.create_iterator(i)? {
                postings.push(p);
            }
            Ok(())
        })?;
        trace!(
            target: "colsieve",
            attr = %self.base.attr.name,
            found = postings.len(),
            "created range iterators"
        );
        Ok(self.base.merge(postings, filter.mva_aggr))
    }

    pub fn calc_value_count(&mut self, it: &BlockIter, filter: &Filter) -> Result<u64> {
        let mut count = 0;
        self.scan(it, filter, |base, i| {
            count += base.value_count(i);
            Ok(())
        })?;
        Ok(count)
    }
}
