use std::{
    io::{Read, Seek, Write},
    sync::Arc,
};

use colsieve_base::{err, ReadExt, Result, WriteExt};
use colsieve_common::AttrType;
use ordered_float::OrderedFloat;

use crate::{MinMaxTree, Settings, DOCS_PER_BLOCK};

/// Per-attribute metadata: where each storage block starts and the
/// attribute's minmax tree. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeHeader {
    name: String,
    attr_type: AttrType,
    settings: Arc<Settings>,
    num_docs: u32,
    block_offsets: Vec<u64>,
    minmax: MinMaxTree,
}

impl AttributeHeader {
    pub fn new(
        name: &str,
        attr_type: AttrType,
        settings: Arc<Settings>,
        num_docs: u32,
        block_offsets: Vec<u64>,
        minmax: MinMaxTree,
    ) -> Self {
        AttributeHeader {
            name: name.to_string(),
            attr_type,
            settings,
            num_docs,
            block_offsets,
            minmax,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attr_type(&self) -> AttrType {
        self.attr_type
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn num_blocks(&self) -> usize {
        self.block_offsets.len()
    }

    pub fn block_offset(&self, block: usize) -> Option<u64> {
        self.block_offsets.get(block).copied()
    }

    /// Every block is full except possibly the last.
    pub fn num_docs_in_block(&self, block: usize) -> u32 {
        let start = block as u64 * DOCS_PER_BLOCK as u64;
        (self.num_docs as u64)
            .saturating_sub(start)
            .min(DOCS_PER_BLOCK as u64) as u32
    }

    pub fn min_max_tree(&self) -> &MinMaxTree {
        &self.minmax
    }

    pub fn num_min_max_levels(&self) -> usize {
        self.minmax.num_levels()
    }

    pub fn num_min_max_blocks(&self, level: usize) -> usize {
        self.minmax.num_blocks(level)
    }

    pub fn get_min_max(&self, level: usize, block: usize) -> Option<(i64, i64)> {
        self.minmax.get(level, block)
    }

    pub fn save(&self, wr: &mut impl Write) -> Result<()> {
        wr.write_le_u32(self.attr_type as u32)?;
        wr.write_string(&self.name)?;
        wr.write_varint_u32(self.block_offsets.len() as u32)?;
        if let Some(first) = self.block_offsets.first() {
            wr.write_le_u64(*first)?;
            for pair in self.block_offsets.windows(2) {
                wr.write_varint_u64(pair[1].wrapping_sub(pair[0]))?;
            }
        }
        self.minmax.save(wr)
    }

    pub fn load(rd: &mut (impl Read + Seek), settings: Arc<Settings>, num_docs: u32) -> Result<Self> {
        let attr_type = AttrType::from_u32(rd.read_le_u32()?)?;
        let name = rd.read_string()?;
        let num_blocks = rd.read_varint_u32()? as usize;
        let mut block_offsets = Vec::with_capacity(num_blocks.min(1 << 16));
        if num_blocks > 0 {
            let mut off = rd.read_le_u64()?;
            block_offsets.push(off);
            for _ in 1..num_blocks {
                off = off.wrapping_add(rd.read_varint_u64()?);
                block_offsets.push(off);
            }
        }
        let minmax = MinMaxTree::load(rd)?;
        Ok(AttributeHeader {
            name,
            attr_type,
            settings,
            num_docs,
            block_offsets,
            minmax,
        })
    }

    /// Consistency checks that parsing alone does not catch.
    pub fn check(&self, data_start: u64, file_size: u64) -> Result<()> {
        let what = |msg: String| err(format!("attribute '{}': {}", self.name, msg));
        if self.attr_type == AttrType::String {
            // String values are reached through their hash attribute.
            if !self.block_offsets.is_empty() || self.minmax.num_levels() != 0 {
                return Err(what("string attribute carries block data".into()));
            }
            return Ok(());
        }
        let expected_blocks = (self.num_docs as usize).div_ceil(DOCS_PER_BLOCK as usize);
        if self.block_offsets.len() != expected_blocks {
            return Err(what(format!(
                "{} blocks for {} rows",
                self.block_offsets.len(),
                self.num_docs
            )));
        }
        let mut prev = None;
        for (i, off) in self.block_offsets.iter().enumerate() {
            if *off < data_start || *off >= file_size {
                return Err(what(format!(
                    "block {} offset {} outside data region [{}, {})",
                    i, off, data_start, file_size
                )));
            }
            if prev.is_some_and(|p| p >= *off) {
                return Err(what(format!("block {} offset {} is not increasing", i, off)));
            }
            prev = Some(*off);
        }
        let leaves = (self.num_docs as usize).div_ceil(self.settings.minmax_leaf_size as usize);
        self.minmax.check(leaves).map_err(|e| what(e.message().to_string()))?;
        for level in 0..self.minmax.num_levels() {
            for block in 0..self.minmax.num_blocks(level) {
                if let Some((min, max)) = self.minmax.get(level, block) {
                    if !ordered(self.attr_type, min, max) {
                        return Err(what(format!(
                            "minmax node {}/{} has min above max",
                            level, block
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Summary order for the i64 bit patterns an attribute type stores.
pub(crate) fn ordered(attr_type: AttrType, min: i64, max: i64) -> bool {
    match attr_type {
        AttrType::Float => {
            OrderedFloat(f32::from_bits(min as u32)) <= OrderedFloat(f32::from_bits(max as u32))
        }
        AttrType::Uint64 => (min as u64) <= (max as u64),
        _ => min <= max,
    }
}
