use std::sync::Arc;

use colsieve_base::{err, err_kind, Error, ErrorKind, IntCodec, Result, SharedReader};
use colsieve_common::{
    value_in_interval, AttrType, BlockIterator, Filter, FilterKind, FilterValue, IteratorDesc,
    MvaAggr, RowId, RowIdRange,
};
use tracing::{debug, warn};

use crate::{
    block::{BlockPacking, DecodedSubblock, StoredBlock},
    header::AttributeHeader,
    matching::LeafCursor,
    SharedBlocks, BLOCK_ID_BITS,
};

/// A block iterator that decodes an attribute's values and tests them
/// against a filter. `setup` must be called before the first batch.
pub trait Analyzer: BlockIterator {
    /// Restricts the scan to the given minmax leaves (all leaves when
    /// None) of a storage holding `total_docs` rows.
    fn setup(&mut self, matching: Option<SharedBlocks>, total_docs: u32);
}

// The per-value predicate, compiled against the raw stored bit pattern.
#[derive(Debug, Clone)]
enum ValueTest {
    Signed(Filter),
    Unsigned(Filter),
    Float(Filter),
    Raw(Vec<u64>),
    FloatValues(Vec<f32>),
}

impl ValueTest {
    fn compile(filter: &Filter, attr_type: AttrType) -> Result<Self> {
        let float = attr_type == AttrType::Float;
        let unsigned = matches!(attr_type, AttrType::Uint64 | AttrType::String);
        Ok(match filter.kind {
            FilterKind::Values if float => {
                ValueTest::FloatValues(filter.values.iter().map(|v| *v as f32).collect())
            }
            FilterKind::Values => {
                let mut raw: Vec<u64> = filter
                    .values
                    .iter()
                    .filter(|v| {
                        !attr_type.is_u32_domain() || (0..=u32::MAX as i64).contains(*v)
                    })
                    .map(|v| *v as u64)
                    .collect();
                raw.sort_unstable();
                raw.dedup();
                ValueTest::Raw(raw)
            }
            FilterKind::FloatRange if float => ValueTest::Float(filter.clone()),
            FilterKind::FloatRange => {
                // Integer column with float bounds: compare on the integer line.
                let mut f = filter.clone();
                f.kind = FilterKind::Range;
                f.min_value = filter.fmin_value.ceil() as i64;
                f.max_value = filter.fmax_value.floor() as i64;
                f.left_closed = filter.left_closed || filter.fmin_value.fract() != 0.0;
                f.right_closed = filter.right_closed || filter.fmax_value.fract() != 0.0;
                if unsigned {
                    ValueTest::Unsigned(f)
                } else {
                    ValueTest::Signed(f)
                }
            }
            FilterKind::Range if unsigned => ValueTest::Unsigned(filter.clone()),
            FilterKind::Range => ValueTest::Signed(filter.clone()),
            FilterKind::Strings | FilterKind::None => {
                return Err(err_kind(
                    ErrorKind::Unsupported,
                    format!(
                        "filter on '{}' cannot be evaluated over stored values",
                        filter.name
                    ),
                ))
            }
        })
    }

    fn matches(&self, raw: u64) -> bool {
        match self {
            ValueTest::Signed(f) => value_in_interval(raw as i64, f),
            ValueTest::Unsigned(f) => value_in_interval(raw, f),
            ValueTest::Float(f) => value_in_interval(f32::from_bits(raw as u32), f),
            ValueTest::Raw(vals) => vals.binary_search(&raw).is_ok(),
            ValueTest::FloatValues(vals) => {
                let v = f32::from_bits(raw as u32);
                vals.iter().any(|f| f32::bound_eq(*f, v))
            }
        }
    }
}

// The subblock currently decoded, with its first row.
struct LoadedSubblock {
    block: usize,
    subblock: usize,
    first_row: u64,
    num_rows: u64,
}

/// Scans one attribute's storage blocks over the candidate leaves.
pub struct ColumnAnalyzer {
    header: Arc<AttributeHeader>,
    rd: SharedReader,
    codec: Arc<dyn IntCodec>,
    test: ValueTest,
    exclude: bool,
    aggr: MvaAggr,
    bounds: RowIdRange,
    leaves: Option<LeafCursor>,
    pending: Option<(u64, u64)>,
    block: Option<(usize, StoredBlock)>,
    subblock: Option<LoadedSubblock>,
    decoded: DecodedSubblock,
    row_starts: Vec<usize>,
    exhausted: bool,
    error: Option<Error>,
    processed: i64,
    batch: usize,
}

impl ColumnAnalyzer {
    /// `filter` must already be in stored-value form: type fixups applied
    /// and string filters rewritten to hashes.
    pub fn new(
        header: Arc<AttributeHeader>,
        rd: SharedReader,
        codec: Arc<dyn IntCodec>,
        filter: &Filter,
        bounds: RowIdRange,
    ) -> Result<Self> {
        let test = ValueTest::compile(filter, header.attr_type())?;
        let batch = header.settings().subblock_size.max(1) as usize;
        debug!(target: "colsieve", attr = header.name(), ?test, "new analyzer");
        Ok(ColumnAnalyzer {
            header,
            rd,
            codec,
            test,
            exclude: filter.exclude,
            aggr: filter.mva_aggr,
            bounds,
            leaves: None,
            pending: None,
            block: None,
            subblock: None,
            decoded: DecodedSubblock::default(),
            row_starts: Vec::new(),
            exhausted: false,
            error: None,
            processed: 0,
            batch,
        })
    }

    fn load_block(&mut self, block_id: usize) -> Result<()> {
        if self.block.as_ref().is_some_and(|(id, _)| *id == block_id) {
            return Ok(());
        }
        let offset = self.header.block_offset(block_id).ok_or_else(|| {
            err(format!(
                "attribute '{}' has no block {}",
                self.header.name(),
                block_id
            ))
        })?;
        let block = StoredBlock::load(&mut self.rd, offset)?;
        self.block = Some((block_id, block));
        self.subblock = None;
        Ok(())
    }

    fn load_subblock(&mut self, block_id: usize, sub: usize, first_row: u64, num_rows: u64) -> Result<()> {
        if self
            .subblock
            .as_ref()
            .is_some_and(|s| s.block == block_id && s.subblock == sub)
        {
            return Ok(());
        }
        let Some((_, block)) = &self.block else {
            return Err(err("subblock requested before its block"));
        };
        let is_set = self.header.attr_type().is_set();
        block.decode_subblock(
            &mut self.rd,
            &self.codec,
            sub,
            self.header.attr_type().is_wide(),
            &mut self.decoded,
        )?;
        let decoded_rows = if is_set {
            self.decoded.lengths.len()
        } else {
            self.decoded.values.len()
        };
        if decoded_rows as u64 != num_rows {
            return Err(err(format!(
                "attribute '{}' block {} subblock {} holds {} rows, expected {}",
                self.header.name(),
                block_id,
                sub,
                decoded_rows,
                num_rows
            )));
        }
        if is_set {
            self.row_starts.clear();
            let mut start = 0;
            for len in &self.decoded.lengths {
                self.row_starts.push(start);
                start += *len as usize;
            }
            self.row_starts.push(start);
        }
        self.subblock = Some(LoadedSubblock {
            block: block_id,
            subblock: sub,
            first_row,
            num_rows,
        });
        Ok(())
    }

    fn row_passes(&self, idx: usize) -> bool {
        let hit = if self.header.attr_type().is_set() {
            let vals = &self.decoded.values[self.row_starts[idx]..self.row_starts[idx + 1]];
            match self.aggr {
                MvaAggr::All => !vals.is_empty() && vals.iter().all(|v| self.test.matches(*v)),
                MvaAggr::Any | MvaAggr::None => vals.iter().any(|v| self.test.matches(*v)),
            }
        } else {
            self.test.matches(self.decoded.values[idx])
        };
        hit != self.exclude
    }

    // Tests rows [lo, hi] and appends the passing ones. Stops early when
    // the batch fills up and returns the first row left untested.
    fn scan_span(&mut self, lo: u64, hi: u64, out: &mut Vec<RowId>) -> Result<Option<u64>> {
        let mut row = lo;
        while row <= hi {
            if out.len() >= self.batch {
                return Ok(Some(row));
            }
            let block_id = (row >> BLOCK_ID_BITS) as usize;
            let block_first = (block_id as u64) << BLOCK_ID_BITS;
            let block_rows = self.header.num_docs_in_block(block_id) as u64;
            if block_rows == 0 {
                return Err(err(format!(
                    "row {} is past the end of attribute '{}'",
                    row,
                    self.header.name()
                )));
            }
            let block_last = block_first + block_rows - 1;
            self.load_block(block_id)?;
            let (packing, const_value) = match &self.block {
                Some((_, b)) => (b.packing, b.const_value),
                None => return Err(err("block vanished")),
            };
            if packing == BlockPacking::Const {
                let end = hi.min(block_last);
                if self.test.matches(const_value) != self.exclude {
                    out.extend(row as RowId..=end as RowId);
                }
                self.processed += (end + 1 - row) as i64;
                row = end + 1;
                continue;
            }
            let sub_rows = if self.header.attr_type().is_set() {
                self.header.settings().subblock_size_mva
            } else {
                self.header.settings().subblock_size
            } as u64;
            let sub = ((row - block_first) / sub_rows) as usize;
            let sub_first = block_first + sub as u64 * sub_rows;
            let sub_len = sub_rows.min(block_last + 1 - sub_first);
            self.load_subblock(block_id, sub, sub_first, sub_len)?;
            let end = hi.min(sub_first + sub_len - 1);
            for r in row..=end {
                if self.row_passes((r - sub_first) as usize) {
                    out.push(r as RowId);
                }
            }
            self.processed += (end + 1 - row) as i64;
            row = end + 1;
        }
        Ok(None)
    }

    fn fill(&mut self, out: &mut Vec<RowId>) -> Result<()> {
        while out.len() < self.batch {
            let span = match self.pending.take() {
                Some(span) => span,
                None => match self.leaves.as_mut().and_then(|l| l.next_span()) {
                    Some(span) => span,
                    None => {
                        self.exhausted = true;
                        return Ok(());
                    }
                },
            };
            if let Some(rest) = self.scan_span(span.0, span.1, out)? {
                self.pending = Some((rest, span.1));
            }
        }
        Ok(())
    }
}

impl BlockIterator for ColumnAnalyzer {
    fn hint_row_id(&mut self, row_id: RowId) -> bool {
        if self.exhausted {
            return false;
        }
        if let Some((lo, hi)) = self.pending {
            if (row_id as u64) > hi {
                self.pending = None;
            } else if (row_id as u64) > lo {
                self.pending = Some((row_id as u64, hi));
            }
        }
        match self.leaves.as_mut() {
            Some(leaves) => leaves.hint(row_id) || self.pending.is_some(),
            None => false,
        }
    }

    fn get_next_row_id_block(&mut self, block: &mut Vec<RowId>) -> bool {
        block.clear();
        if self.exhausted {
            return false;
        }
        if let Err(e) = self.fill(block) {
            warn!(target: "colsieve", attr = self.header.name(), "analyzer stopped: {}", e);
            self.exhausted = true;
            self.error = Some(e);
        }
        !block.is_empty()
    }

    fn num_processed(&self) -> i64 {
        self.processed
    }

    fn add_desc(&self, desc: &mut Vec<IteratorDesc>) {
        desc.push(IteratorDesc {
            attr: self.header.name().to_string(),
            kind: "analyzer",
        });
    }

    fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }
}

impl Analyzer for ColumnAnalyzer {
    fn setup(&mut self, matching: Option<SharedBlocks>, total_docs: u32) {
        let total = total_docs.min(self.header.num_docs());
        self.leaves = Some(LeafCursor::new(
            matching,
            self.header.settings().minmax_leaf_size,
            total,
            self.bounds,
        ));
        self.pending = None;
        self.exhausted = false;
    }
}
