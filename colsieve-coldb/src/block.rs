// A storage block holds up to DOCS_PER_BLOCK rows of one attribute and
// starts with a packing byte:
//
//   Const: one varint value shared by every row.
//   Table: a small table of distinct values, then subblocks of
//          codec-packed table indices.
//   Pfor:  subblocks of codec-packed (value - subblock min), the min
//          stored as a varint ahead of each subblock.
//   Mva:   subblocks of codec-packed per-row lengths followed by a
//          Pfor-style run of all the subblock's values.
//
// Subblock byte lengths sit right after the block prelude so any
// subblock can be reached without touching the ones before it.

use std::{
    io::{Read, Seek, Write},
    sync::Arc,
};

use colsieve_base::{err, IntCodec, MemWriter, ReadExt, Result, WriteExt};

use crate::settings::Settings;

pub(crate) const MAX_TABLE_VALUES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum BlockPacking {
    Const = 0,
    Table = 1,
    Pfor = 2,
    Mva = 3,
}

impl BlockPacking {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => BlockPacking::Const,
            1 => BlockPacking::Table,
            2 => BlockPacking::Pfor,
            3 => BlockPacking::Mva,
            _ => return Err(err(format!("unknown block packing {}", v))),
        })
    }
}

/// A block's prelude, loaded once per block visit.
#[derive(Debug, Clone)]
pub(crate) struct StoredBlock {
    pub(crate) packing: BlockPacking,
    pub(crate) const_value: u64,
    pub(crate) table: Vec<u64>,
    subblock_offsets: Vec<u64>,
}

/// Decoded contents of one subblock. For set attributes `lengths[i]` is
/// the number of values of row i, and the rows' values are concatenated
/// in `values`.
#[derive(Debug, Clone, Default)]
pub(crate) struct DecodedSubblock {
    pub(crate) values: Vec<u64>,
    pub(crate) lengths: Vec<u32>,
    words: Vec<u32>,
    narrow: Vec<u32>,
}

impl StoredBlock {
    pub(crate) fn load(rd: &mut (impl Read + Seek), offset: u64) -> Result<Self> {
        rd.seek_to(offset)?;
        let packing = BlockPacking::from_u8(rd.read_u8()?)?;
        let mut block = StoredBlock {
            packing,
            const_value: 0,
            table: Vec::new(),
            subblock_offsets: Vec::new(),
        };
        match packing {
            BlockPacking::Const => {
                block.const_value = rd.read_varint_u64()?;
                return Ok(block);
            }
            BlockPacking::Table => {
                let n = rd.read_varint_u32()? as usize;
                if n == 0 || n > MAX_TABLE_VALUES {
                    return Err(err(format!("value table of {} entries", n)));
                }
                for _ in 0..n {
                    block.table.push(rd.read_varint_u64()?);
                }
            }
            BlockPacking::Pfor | BlockPacking::Mva => {}
        }
        let num_subblocks = rd.read_varint_u32()? as usize;
        let mut lens = Vec::with_capacity(num_subblocks.min(1 << 16));
        for _ in 0..num_subblocks {
            lens.push(rd.read_varint_u64()?);
        }
        let mut off = rd.pos()?;
        for len in lens {
            block.subblock_offsets.push(off);
            off += len;
        }
        Ok(block)
    }

    pub(crate) fn num_subblocks(&self) -> usize {
        self.subblock_offsets.len()
    }

    pub(crate) fn decode_subblock(
        &self,
        rd: &mut (impl Read + Seek),
        codec: &Arc<dyn IntCodec>,
        subblock: usize,
        wide: bool,
        out: &mut DecodedSubblock,
    ) -> Result<()> {
        let offset = match self.subblock_offsets.get(subblock) {
            Some(off) => *off,
            None => {
                return Err(err(format!(
                    "subblock {} of {} requested",
                    subblock,
                    self.subblock_offsets.len()
                )))
            }
        };
        rd.seek_to(offset)?;
        out.values.clear();
        out.lengths.clear();
        match self.packing {
            BlockPacking::Const => {}
            BlockPacking::Table => {
                out.words = rd.read_words()?;
                out.narrow.clear();
                codec.decode_u32(&out.words, &mut out.narrow)?;
                for idx in &out.narrow {
                    match self.table.get(*idx as usize) {
                        Some(v) => out.values.push(*v),
                        None => return Err(err(format!("table index {} out of range", idx))),
                    }
                }
            }
            BlockPacking::Pfor => {
                decode_for(rd, codec, wide, out)?;
            }
            BlockPacking::Mva => {
                out.words = rd.read_words()?;
                codec.decode_u32(&out.words, &mut out.lengths)?;
                decode_for(rd, codec, wide, out)?;
                let total: u64 = out.lengths.iter().map(|l| *l as u64).sum();
                if total != out.values.len() as u64 {
                    return Err(err("set lengths disagree with value count"));
                }
            }
        }
        Ok(())
    }
}

fn decode_for(
    rd: &mut (impl Read + Seek),
    codec: &Arc<dyn IntCodec>,
    wide: bool,
    out: &mut DecodedSubblock,
) -> Result<()> {
    let min = rd.read_varint_u64()?;
    out.words = rd.read_words()?;
    if wide {
        codec.decode_u64(&out.words, &mut out.values)?;
    } else {
        out.narrow.clear();
        codec.decode_u32(&out.words, &mut out.narrow)?;
        out.values.extend(out.narrow.iter().map(|v| *v as u64));
    }
    for v in out.values.iter_mut() {
        *v = v.wrapping_add(min);
    }
    Ok(())
}

fn encode_for(
    wr: &mut impl Write,
    codec: &Arc<dyn IntCodec>,
    wide: bool,
    values: &[u64],
) -> Result<()> {
    // Deltas wrap, so the unsigned minimum serves signed values as well.
    let min = values.iter().copied().min().unwrap_or(0);
    let deltas: Vec<u64> = values.iter().map(|v| v.wrapping_sub(min)).collect();
    let mut words = Vec::new();
    if wide {
        codec.encode_u64(&deltas, &mut words);
    } else {
        let narrow: Vec<u32> = deltas.iter().map(|d| *d as u32).collect();
        codec.encode_u32(&narrow, &mut words);
    }
    wr.write_varint_u64(min)?;
    wr.write_words(&words)
}

/// Values of one block, as the raw bit patterns the analyzers compare.
pub(crate) enum BlockValues<'a> {
    Scalar(&'a [u64]),
    Set(&'a [Vec<u64>]),
}

pub(crate) fn write_block(
    wr: &mut impl Write,
    codec: &Arc<dyn IntCodec>,
    settings: &Settings,
    wide: bool,
    values: BlockValues,
) -> Result<()> {
    let mut subblocks: Vec<Vec<u8>> = Vec::new();
    match values {
        BlockValues::Scalar(vals) => {
            let mut distinct = vals.to_vec();
            distinct.sort_unstable();
            distinct.dedup();
            if distinct.len() == 1 {
                wr.write_u8(BlockPacking::Const as u8)?;
                return wr.write_varint_u64(distinct[0]);
            }
            if distinct.len() <= MAX_TABLE_VALUES {
                wr.write_u8(BlockPacking::Table as u8)?;
                wr.write_varint_u32(distinct.len() as u32)?;
                for v in &distinct {
                    wr.write_varint_u64(*v)?;
                }
                for chunk in vals.chunks(settings.subblock_size as usize) {
                    let idx: Vec<u32> = chunk
                        .iter()
                        .map(|v| distinct.partition_point(|d| d < v) as u32)
                        .collect();
                    let mut words = Vec::new();
                    codec.encode_u32(&idx, &mut words);
                    let mut sub = MemWriter::new();
                    sub.write_words(&words)?;
                    subblocks.push(sub.into_inner());
                }
            } else {
                wr.write_u8(BlockPacking::Pfor as u8)?;
                for chunk in vals.chunks(settings.subblock_size as usize) {
                    let mut sub = MemWriter::new();
                    encode_for(&mut sub, codec, wide, chunk)?;
                    subblocks.push(sub.into_inner());
                }
            }
        }
        BlockValues::Set(rows) => {
            wr.write_u8(BlockPacking::Mva as u8)?;
            for chunk in rows.chunks(settings.subblock_size_mva as usize) {
                let lengths: Vec<u32> = chunk.iter().map(|r| r.len() as u32).collect();
                let flat: Vec<u64> = chunk.iter().flatten().copied().collect();
                let mut words = Vec::new();
                codec.encode_u32(&lengths, &mut words);
                let mut sub = MemWriter::new();
                sub.write_words(&words)?;
                encode_for(&mut sub, codec, wide, &flat)?;
                subblocks.push(sub.into_inner());
            }
        }
    }
    wr.write_varint_u32(subblocks.len() as u32)?;
    for sub in &subblocks {
        wr.write_varint_u64(sub.len() as u64)?;
    }
    for sub in &subblocks {
        wr.write_all(sub)?;
    }
    Ok(())
}
