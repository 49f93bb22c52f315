// The minmax tree summarizes an attribute's values at several
// granularities. Level 0 has one (min, max) node per leaf of
// `minmax_leaf_size` rows; every level above pairs up the nodes below it
// until a single root remains. Summaries are i64 bit patterns: floats
// store their f32 bits, u64 attributes store their bits unchanged.

use std::{
    io::{Read, Seek, Write},
    sync::Arc,
};

use colsieve_base::{err, ReadExt, Result, WriteExt};
use colsieve_common::{
    fixup_filter_settings, range_may_match, AttrType, Filter, FilterKind, RowId, RowIdRange,
};
use tracing::trace;

use crate::{header::AttributeHeader, MatchingBlocks};

pub const MINMAX_FANOUT: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MinMaxTree {
    levels: Vec<Vec<(i64, i64)>>,
}

impl MinMaxTree {
    /// Builds the upper levels from the leaves, merging with `merge`.
    pub fn from_leaves(
        leaves: Vec<(i64, i64)>,
        merge: impl Fn((i64, i64), (i64, i64)) -> (i64, i64),
    ) -> Self {
        if leaves.is_empty() {
            return MinMaxTree::default();
        }
        let mut levels = vec![leaves];
        while let Some(last) = levels.last().filter(|l| l.len() > 1) {
            let up = last
                .chunks(MINMAX_FANOUT)
                .map(|pair| pair.iter().copied().reduce(&merge).unwrap_or(pair[0]))
                .collect();
            levels.push(up);
        }
        MinMaxTree { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn num_blocks(&self, level: usize) -> usize {
        self.levels.get(level).map_or(0, |l| l.len())
    }

    pub fn num_leaves(&self) -> usize {
        self.num_blocks(0)
    }

    pub fn get(&self, level: usize, block: usize) -> Option<(i64, i64)> {
        self.levels.get(level)?.get(block).copied()
    }

    pub fn save(&self, wr: &mut impl Write) -> Result<()> {
        wr.write_varint_u32(self.levels.len() as u32)?;
        for level in &self.levels {
            wr.write_varint_u32(level.len() as u32)?;
            for (min, max) in level {
                wr.write_varint_u64(*min as u64)?;
                wr.write_varint_u64((*max as u64).wrapping_sub(*min as u64))?;
            }
        }
        Ok(())
    }

    pub fn load(rd: &mut (impl Read + Seek)) -> Result<Self> {
        let num_levels = rd.read_varint_u32()? as usize;
        if num_levels > 32 {
            return Err(err(format!("minmax tree has {} levels", num_levels)));
        }
        let mut levels = Vec::with_capacity(num_levels);
        for _ in 0..num_levels {
            let count = rd.read_varint_u32()? as usize;
            let mut level = Vec::with_capacity(count.min(1 << 20));
            for _ in 0..count {
                let min = rd.read_varint_u64()?;
                let max = min.wrapping_add(rd.read_varint_u64()?);
                level.push((min as i64, max as i64));
            }
            levels.push(level);
        }
        Ok(MinMaxTree { levels })
    }

    /// Checks the shape: level 0 has one node per leaf, each level above
    /// has ceil(n / fan-out) nodes, and the top level is the single root.
    pub fn check(&self, num_leaves: usize) -> Result<()> {
        if num_leaves == 0 {
            if self.levels.iter().any(|l| !l.is_empty()) {
                return Err(err("minmax tree has nodes but attribute has no rows"));
            }
            return Ok(());
        }
        if self.num_leaves() != num_leaves {
            return Err(err(format!(
                "minmax tree has {} leaves, expected {}",
                self.num_leaves(),
                num_leaves
            )));
        }
        for (i, pair) in self.levels.windows(2).enumerate() {
            let (below, above) = (pair[0].len(), pair[1].len());
            if above >= below || above != below.div_ceil(MINMAX_FANOUT) {
                return Err(err(format!(
                    "minmax level {} has {} nodes over {} nodes",
                    i + 1,
                    above,
                    below
                )));
            }
        }
        if self.levels.last().map_or(0, |l| l.len()) != 1 {
            return Err(err("minmax tree has no single root"));
        }
        Ok(())
    }
}

/// Decides whether a tree node can hold matching rows, given the node
/// summaries of every attribute indexed by locator.
pub trait BlockTester {
    fn test(&self, min_max: &[(i64, i64)]) -> bool;
}

#[derive(Debug)]
struct LocatedFilter {
    locator: usize,
    attr_type: AttrType,
    filter: Filter,
}

/// The standard tester: every filter must be able to match the node.
#[derive(Debug, Default)]
pub struct FilterBlockTester {
    filters: Vec<LocatedFilter>,
}

impl FilterBlockTester {
    pub fn push(&mut self, locator: usize, attr_type: AttrType, filter: &Filter) {
        self.filters.push(LocatedFilter {
            locator,
            attr_type,
            filter: fixup_filter_settings(filter, attr_type),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

pub fn node_may_match(attr_type: AttrType, min: i64, max: i64, filter: &Filter) -> bool {
    // An empty value set passes any exclusion but contributes nothing to the summary.
    if attr_type.is_set() && filter.exclude {
        return true;
    }
    match (attr_type, filter.kind) {
        (_, FilterKind::Strings | FilterKind::None) => true,
        (AttrType::Float, _) => {
            range_may_match(f32::from_bits(min as u32), f32::from_bits(max as u32), filter)
        }
        (AttrType::Uint64 | AttrType::String, _) => range_may_match(min as u64, max as u64, filter),
        _ => range_may_match(min, max, filter),
    }
}

impl BlockTester for FilterBlockTester {
    fn test(&self, min_max: &[(i64, i64)]) -> bool {
        self.filters.iter().all(|f| match min_max.get(f.locator) {
            Some((min, max)) => node_may_match(f.attr_type, *min, *max, &f.filter),
            None => true,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MinMaxEstimate {
    pub candidate_leaves: u64,
    pub candidate_rows: u64,
    pub pruned_rows: u64,
}

/// Top-down walk over the trees of several attributes at once. All of
/// them share one shape because they share the storage's row count and
/// leaf size.
pub struct MinMaxEval<'a> {
    headers: &'a [(Arc<AttributeHeader>, usize)],
    tester: &'a dyn BlockTester,
    bounds: Option<RowIdRange>,
    min_max: Vec<(i64, i64)>,
    num_levels: usize,
    leaf_size: u64,
    num_docs: u64,
}

impl<'a> MinMaxEval<'a> {
    pub fn new(
        headers: &'a [(Arc<AttributeHeader>, usize)],
        tester: &'a dyn BlockTester,
        bounds: Option<RowIdRange>,
    ) -> Self {
        let slots = headers.iter().map(|(_, loc)| *loc + 1).max().unwrap_or(0);
        let (num_levels, leaf_size, num_docs) = match headers.first() {
            Some((h, _)) => (
                h.num_min_max_levels(),
                h.settings().minmax_leaf_size as u64,
                h.num_docs() as u64,
            ),
            None => (0, 1, 0),
        };
        MinMaxEval {
            headers,
            tester,
            bounds,
            min_max: vec![(0, 0); slots],
            num_levels,
            leaf_size,
            num_docs,
        }
    }

    fn fill_min_max(&mut self, level: usize, block: usize) -> bool {
        for (header, locator) in self.headers {
            match header.get_min_max(level, block) {
                Some(mm) => self.min_max[*locator] = mm,
                None => return false,
            }
        }
        !self.headers.is_empty()
    }

    // Row span [first, last] covered by a node.
    fn node_rows(&self, level: usize, block: usize) -> (u64, u64) {
        let first = ((block as u64) << level) * self.leaf_size;
        let last = (((block as u64 + 1) << level) * self.leaf_size).min(self.num_docs);
        (first, last.saturating_sub(1))
    }

    fn in_bounds(&self, level: usize, block: usize) -> bool {
        match self.bounds {
            None => true,
            Some(b) => {
                let (first, last) = self.node_rows(level, block);
                !b.is_empty() && first <= b.max as u64 && last >= b.min as u64
            }
        }
    }

    fn walk(&mut self, level: usize, block: usize, visit: &mut dyn FnMut(usize, usize, bool)) {
        if !self.fill_min_max(level, block) {
            return;
        }
        if !self.in_bounds(level, block) {
            visit(level, block, false);
            return;
        }
        if !self.tester.test(&self.min_max) {
            visit(level, block, false);
            return;
        }
        if level == 0 {
            visit(level, block, true);
            return;
        }
        let first_child = block * MINMAX_FANOUT;
        for child in first_child..first_child + MINMAX_FANOUT {
            self.walk(level - 1, child, visit);
        }
    }

    fn root(&self) -> Option<usize> {
        self.num_levels.checked_sub(1)
    }

    pub fn eval(&mut self, matching: &mut MatchingBlocks) {
        if let Some(root) = self.root() {
            self.walk(root, 0, &mut |_, block, hit| {
                if hit {
                    matching.add(block as u32)
                }
            });
        }
        trace!(target: "colsieve", leaves = matching.len(), "minmax eval");
    }

    /// Tests only the root: false means no row can match.
    pub fn eval_all(&mut self) -> bool {
        match self.root() {
            Some(root) => !self.fill_min_max(root, 0) || self.tester.test(&self.min_max),
            None => true,
        }
    }

    pub fn estimate(&mut self) -> MinMaxEstimate {
        let mut est = MinMaxEstimate::default();
        if let Some(root) = self.root() {
            let mut spans = Vec::new();
            self.walk(root, 0, &mut |level, block, hit| spans.push((level, block, hit)));
            for (level, block, hit) in spans {
                let (first, last) = self.node_rows(level, block);
                let n = last + 1 - first;
                if hit {
                    est.candidate_leaves += 1;
                    est.candidate_rows += n;
                } else {
                    est.pruned_rows += n;
                }
            }
        }
        est
    }
}

/// Leaves covering a row range, for when no attribute has a tree to consult.
pub fn populate_matching_blocks(
    matching: &mut MatchingBlocks,
    leaf_size: u32,
    num_docs: u32,
    bounds: RowIdRange,
) {
    if num_docs == 0 {
        return;
    }
    let last_row: RowId = bounds.max.min(num_docs - 1);
    if bounds.min > last_row {
        return;
    }
    for leaf in bounds.min / leaf_size..=last_row / leaf_size {
        matching.add(leaf);
    }
}
