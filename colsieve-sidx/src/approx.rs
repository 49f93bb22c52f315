use std::io::{Read, Seek, Write};

use colsieve_base::{err_kind, ErrorKind, ReadExt, Result, WriteExt};

use crate::KeyKind;

/// A position estimate in value units: the value is at `pos` if present,
/// and certainly within `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApproxPos {
    pub pos: u64,
    pub lo: u64,
    pub hi: u64,
}

/// The first key of every value block of one attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproxIndex {
    kind: KeyKind,
    values_per_block: u64,
    num_values: u64,
    first_keys: Vec<u64>,
}

impl ApproxIndex {
    pub fn new(kind: KeyKind, values_per_block: u32, num_values: u64, first_keys: Vec<u64>) -> Self {
        ApproxIndex {
            kind,
            values_per_block: values_per_block.max(1) as u64,
            num_values,
            first_keys,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.first_keys.len()
    }

    pub fn num_values(&self) -> u64 {
        self.num_values
    }

    // Widened by one block on each side, so float keys equal within
    // tolerance to a neighbor block's edge are still inside the window.
    pub fn search(&self, key: u64) -> ApproxPos {
        if self.num_values == 0 {
            return ApproxPos::default();
        }
        let after = self
            .first_keys
            .partition_point(|k| self.kind.cmp(*k, key).is_le());
        let block = after.saturating_sub(1) as u64;
        let vpb = self.values_per_block;
        let last = self.num_values - 1;
        ApproxPos {
            pos: (block * vpb).min(last),
            lo: (block.saturating_sub(1) * vpb).min(last),
            hi: ((block + 2) * vpb - 1).min(last),
        }
    }

    pub fn save(&self, wr: &mut impl Write) -> Result<()> {
        wr.write_varint_u64(self.num_values)?;
        wr.write_varint_u32(self.first_keys.len() as u32)?;
        for k in &self.first_keys {
            wr.write_le_u64(*k)?;
        }
        Ok(())
    }

    pub fn load(rd: &mut (impl Read + Seek), kind: KeyKind, values_per_block: u32) -> Result<Self> {
        let num_values = rd.read_varint_u64()?;
        let n = rd.read_varint_u32()? as usize;
        let expected = num_values.div_ceil(values_per_block.max(1) as u64) as usize;
        if n != expected {
            return Err(err_kind(
                ErrorKind::Corrupt,
                format!("{} value blocks for {} values, expected {}", n, num_values, expected),
            ));
        }
        let mut first_keys = Vec::with_capacity(n);
        for _ in 0..n {
            first_keys.push(rd.read_le_u64()?);
        }
        Ok(ApproxIndex::new(kind, values_per_block, num_values, first_keys))
    }
}
