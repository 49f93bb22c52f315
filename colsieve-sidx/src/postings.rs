use std::sync::Arc;

use colsieve_base::{
    compute_inverse_deltas, err_kind, Error, ErrorKind, IntCodec, ReadExt, Result, SharedReader,
};
use colsieve_common::{BlockIterator, IteratorDesc, RowId, RowIdRange};
use tracing::{trace, warn};

use crate::Packing;

// Rows emitted per call for `RowFullscan` postings.
const FULLSCAN_BATCH: u64 = 1024;

/// Row ids of one indexed value. The packing is fixed at construction;
/// every call dispatches on it.
///
/// For `Row` postings `start` is the row id itself. For `RowBlock` and
/// `RowBlocksList` it is the file offset of the payload. `RowFullscan`
/// has no payload and emits every row of the index.
pub struct PostingsIterator {
    attr: String,
    packing: Packing,
    start: u64,
    rd: SharedReader,
    codec: Arc<dyn IntCodec>,
    bounds: RowIdRange,
    num_docs: u32,

    started: bool,
    stopped: bool,
    hint: RowId,
    blocks_left: u32,
    next_off: u64,
    next_row: u64,
    processed: i64,
    error: Option<Error>,
    words: Vec<u32>,
    decoded: Vec<u32>,
}

impl PostingsIterator {
    pub fn new(
        attr: &str,
        packing: Packing,
        start: u64,
        rd: SharedReader,
        codec: Arc<dyn IntCodec>,
        bounds: RowIdRange,
        num_docs: u32,
    ) -> Self {
        trace!(target: "colsieve", attr, ?packing, start, "creating postings iterator");
        PostingsIterator {
            attr: attr.to_string(),
            packing,
            start,
            rd,
            codec,
            bounds,
            num_docs,
            started: false,
            stopped: false,
            hint: 0,
            blocks_left: 0,
            next_off: start,
            next_row: 0,
            processed: 0,
            error: None,
            words: Vec::new(),
            decoded: Vec::new(),
        }
    }

    pub fn packing(&self) -> Packing {
        self.packing
    }

    fn wanted(&self, row: RowId) -> bool {
        row >= self.hint && self.bounds.contains(row)
    }

    // Reads one row block at `off`: its row bounds, then its codec words.
    // Blocks that miss the bounds or lie wholly before the hint are
    // skipped without decoding. Returns the offset past the block.
    fn read_row_block(&mut self, off: u64, block: &mut Vec<RowId>) -> Result<u64> {
        self.rd.seek_to(off)?;
        let min = self.rd.read_varint_u32()?;
        let span = self.rd.read_varint_u32()?;
        let max = min.checked_add(span).ok_or_else(|| {
            err_kind(ErrorKind::Corrupt, format!("row block at {} overflows row ids", off))
        })?;
        if !self.bounds.overlaps(min, max) || max < self.hint {
            self.rd.skip_words()?;
            return self.rd.pos();
        }
        self.words = self.rd.read_words()?;
        self.decoded.clear();
        self.codec.decode_u32(&self.words, &mut self.decoded)?;
        compute_inverse_deltas(&mut self.decoded);
        self.processed += self.decoded.len() as i64;
        for row in &self.decoded {
            if self.wanted(*row) {
                block.push(*row);
            }
        }
        self.rd.pos()
    }

    fn next_fullscan(&mut self, block: &mut Vec<RowId>) {
        let lo = self
            .next_row
            .max(self.bounds.min as u64)
            .max(self.hint as u64);
        let hi = (self.num_docs as u64)
            .saturating_sub(1)
            .min(self.bounds.max as u64);
        if self.num_docs == 0 || lo > hi {
            self.stopped = true;
            return;
        }
        let end = hi.min(lo + FULLSCAN_BATCH - 1);
        block.extend(lo as RowId..=end as RowId);
        self.processed += (end + 1 - lo) as i64;
        self.next_row = end + 1;
        if end == hi {
            self.stopped = true;
        }
    }

    fn fill(&mut self, block: &mut Vec<RowId>) -> Result<()> {
        match self.packing {
            Packing::Row => {
                self.stopped = true;
                self.processed += 1;
                let row = self.start as RowId;
                if self.wanted(row) {
                    block.push(row);
                }
            }
            Packing::RowBlock => {
                self.stopped = true;
                self.read_row_block(self.start, block)?;
            }
            Packing::RowBlocksList => {
                if !self.started {
                    self.rd.seek_to(self.start)?;
                    self.blocks_left = self.rd.read_varint_u32()?;
                    self.next_off = self.rd.pos()?;
                }
                // A block may come back empty when it misses the bounds.
                while block.is_empty() && self.blocks_left > 0 {
                    self.blocks_left -= 1;
                    self.next_off = self.read_row_block(self.next_off, block)?;
                }
                if self.blocks_left == 0 {
                    self.stopped = true;
                }
            }
            Packing::RowFullscan => self.next_fullscan(block),
        }
        self.started = true;
        Ok(())
    }
}

impl BlockIterator for PostingsIterator {
    fn hint_row_id(&mut self, row_id: RowId) -> bool {
        if self.stopped {
            return false;
        }
        self.hint = self.hint.max(row_id);
        if self.packing == Packing::Row && (self.start as RowId) < self.hint {
            self.stopped = true;
        }
        !self.stopped
    }

    fn get_next_row_id_block(&mut self, block: &mut Vec<RowId>) -> bool {
        block.clear();
        if self.stopped {
            return false;
        }
        if let Err(e) = self.fill(block) {
            warn!(target: "colsieve", attr = %self.attr, "postings read failed: {}", e.message());
            self.stopped = true;
            self.error = Some(e);
            block.clear();
        }
        !block.is_empty()
    }

    fn num_processed(&self) -> i64 {
        self.processed
    }

    fn add_desc(&self, desc: &mut Vec<IteratorDesc>) {
        desc.push(IteratorDesc {
            attr: self.attr.clone(),
            kind: "sidx",
        });
    }

    fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}
