use std::{
    cmp::Ordering,
    io::{Seek, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use colsieve_base::{err, CodecRegistry, FileWriter, IntCodec, Result};
use colsieve_common::{generate_hash_attr_name, AttrType, StrHashFn, STR_HASH_SEED};
use ordered_float::OrderedFloat;
use tracing::debug;

use crate::{
    block::{write_block, BlockValues},
    layer::StorageMeta,
    AttributeHeader, MinMaxTree, Settings, DOCS_PER_BLOCK,
};

enum ColumnData {
    // String attributes keep no values of their own.
    Nothing,
    Scalar(Vec<u64>),
    Set(Vec<Vec<u64>>),
}

struct PendingColumn {
    name: String,
    attr_type: AttrType,
    data: ColumnData,
}

/// Collects whole columns in memory and writes them out as one storage
/// file. Every column must have the same number of rows.
pub struct ColumnarBuilder {
    settings: Settings,
    codec: Arc<dyn IntCodec>,
    num_docs: Option<u32>,
    columns: Vec<PendingColumn>,
}

// Order of stored bit patterns, per attribute type.
fn cmp_raw(attr_type: AttrType, a: u64, b: u64) -> Ordering {
    match attr_type {
        AttrType::Float => {
            OrderedFloat(f32::from_bits(a as u32)).cmp(&OrderedFloat(f32::from_bits(b as u32)))
        }
        AttrType::Uint64 | AttrType::String => a.cmp(&b),
        _ => (a as i64).cmp(&(b as i64)),
    }
}

fn min_max_of(attr_type: AttrType, vals: impl Iterator<Item = u64>) -> Option<(i64, i64)> {
    vals.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((
            if cmp_raw(attr_type, v, lo).is_lt() { v } else { lo },
            if cmp_raw(attr_type, v, hi).is_gt() { v } else { hi },
        )),
    })
    .map(|(lo, hi)| (lo as i64, hi as i64))
}

impl ColumnarBuilder {
    pub fn new(settings: Settings, codecs: &CodecRegistry) -> Result<Self> {
        settings.check()?;
        let codec = settings.create_codec(codecs)?;
        Ok(ColumnarBuilder {
            settings,
            codec,
            num_docs: None,
            columns: Vec::new(),
        })
    }

    fn push(&mut self, name: &str, attr_type: AttrType, rows: usize, data: ColumnData) -> Result<()> {
        let rows = u32::try_from(rows).map_err(|_| err(format!("column '{}' is too long", name)))?;
        if let Some(n) = self.num_docs.filter(|n| *n != rows) {
            return Err(err(format!(
                "column '{}' has {} rows, storage has {}",
                name, rows, n
            )));
        }
        if self.columns.iter().any(|c| c.name == name) {
            return Err(err(format!("column '{}' added twice", name)));
        }
        self.num_docs = Some(rows);
        self.columns.push(PendingColumn {
            name: name.to_string(),
            attr_type,
            data,
        });
        Ok(())
    }

    fn push_scalar(&mut self, name: &str, attr_type: AttrType, vals: Vec<u64>) -> Result<()> {
        self.push(name, attr_type, vals.len(), ColumnData::Scalar(vals))
    }

    pub fn add_u32(&mut self, name: &str, vals: &[u32]) -> Result<()> {
        self.push_scalar(name, AttrType::Uint32, vals.iter().map(|v| *v as u64).collect())
    }

    pub fn add_timestamp(&mut self, name: &str, vals: &[u32]) -> Result<()> {
        self.push_scalar(name, AttrType::Timestamp, vals.iter().map(|v| *v as u64).collect())
    }

    pub fn add_bool(&mut self, name: &str, vals: &[bool]) -> Result<()> {
        self.push_scalar(name, AttrType::Boolean, vals.iter().map(|v| *v as u64).collect())
    }

    pub fn add_i64(&mut self, name: &str, vals: &[i64]) -> Result<()> {
        self.push_scalar(name, AttrType::Int64, vals.iter().map(|v| *v as u64).collect())
    }

    pub fn add_u64(&mut self, name: &str, vals: &[u64]) -> Result<()> {
        self.push_scalar(name, AttrType::Uint64, vals.to_vec())
    }

    pub fn add_f32(&mut self, name: &str, vals: &[f32]) -> Result<()> {
        self.push_scalar(name, AttrType::Float, vals.iter().map(|v| v.to_bits() as u64).collect())
    }

    pub fn add_u32_set(&mut self, name: &str, rows: &[Vec<u32>]) -> Result<()> {
        let data = rows
            .iter()
            .map(|r| r.iter().map(|v| *v as u64).collect())
            .collect();
        self.push(name, AttrType::Uint32Set, rows.len(), ColumnData::Set(data))
    }

    pub fn add_i64_set(&mut self, name: &str, rows: &[Vec<i64>]) -> Result<()> {
        let data = rows
            .iter()
            .map(|r| r.iter().map(|v| *v as u64).collect())
            .collect();
        self.push(name, AttrType::Int64Set, rows.len(), ColumnData::Set(data))
    }

    /// Adds a string attribute. Its values are stored only as hashes, in
    /// a companion `Uint64` column named by `generate_hash_attr_name`.
    pub fn add_strings<S: AsRef<[u8]>>(&mut self, name: &str, vals: &[S], hash: StrHashFn) -> Result<()> {
        self.push(name, AttrType::String, vals.len(), ColumnData::Nothing)?;
        let hashes = vals
            .iter()
            .map(|s| {
                let s = s.as_ref();
                if s.is_empty() {
                    0
                } else {
                    hash(s, STR_HASH_SEED)
                }
            })
            .collect();
        self.push_scalar(&generate_hash_attr_name(name), AttrType::Uint64, hashes)
    }

    fn leaf_summaries(&self, col: &PendingColumn) -> Vec<(i64, i64)> {
        let leaf = self.settings.minmax_leaf_size as usize;
        match &col.data {
            ColumnData::Nothing => Vec::new(),
            ColumnData::Scalar(vals) => vals
                .chunks(leaf)
                .map(|c| min_max_of(col.attr_type, c.iter().copied()).unwrap_or((0, 0)))
                .collect(),
            ColumnData::Set(rows) => rows
                .chunks(leaf)
                .map(|c| {
                    min_max_of(col.attr_type, c.iter().flatten().copied()).unwrap_or((0, 0))
                })
                .collect(),
        }
    }

    fn write_column(&self, wr: &mut (impl Write + Seek), col: &PendingColumn) -> Result<Vec<u64>> {
        let wide = col.attr_type.is_wide();
        let mut offsets = Vec::new();
        match &col.data {
            ColumnData::Nothing => {}
            ColumnData::Scalar(vals) => {
                for chunk in vals.chunks(DOCS_PER_BLOCK as usize) {
                    offsets.push(wr.stream_position()?);
                    write_block(wr, &self.codec, &self.settings, wide, BlockValues::Scalar(chunk))?;
                }
            }
            ColumnData::Set(rows) => {
                for chunk in rows.chunks(DOCS_PER_BLOCK as usize) {
                    offsets.push(wr.stream_position()?);
                    write_block(wr, &self.codec, &self.settings, wide, BlockValues::Set(chunk))?;
                }
            }
        }
        Ok(offsets)
    }

    /// Writes the storage to `wr`, which must be positioned at its start.
    pub fn finish<W: Write + Seek>(self, mut wr: W) -> Result<W> {
        let num_docs = self.num_docs.unwrap_or(0);
        let meta = StorageMeta::new(self.settings.clone(), num_docs, self.columns.len() as u32);
        meta.write(&mut wr)?;
        let settings = Arc::new(self.settings.clone());
        let mut headers = Vec::with_capacity(self.columns.len());
        for col in &self.columns {
            let offsets = self.write_column(&mut wr, col)?;
            let attr_type = col.attr_type;
            let minmax = MinMaxTree::from_leaves(self.leaf_summaries(col), |a, b| {
                let lo = if cmp_raw(attr_type, a.0 as u64, b.0 as u64).is_le() { a.0 } else { b.0 };
                let hi = if cmp_raw(attr_type, a.1 as u64, b.1 as u64).is_ge() { a.1 } else { b.1 };
                (lo, hi)
            });
            headers.push(AttributeHeader::new(
                &col.name,
                attr_type,
                settings.clone(),
                num_docs,
                offsets,
                minmax,
            ));
        }
        let headers_offset = wr.stream_position()?;
        for header in &headers {
            header.save(&mut wr)?;
        }
        StorageMeta::patch_headers_offset(&mut wr, headers_offset)?;
        wr.flush()?;
        debug!(
            target: "colsieve",
            num_docs,
            attrs = headers.len(),
            headers_offset,
            "wrote columnar storage"
        );
        Ok(wr)
    }

    pub fn write_file(self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let wr = FileWriter::try_create(path)?;
        self.finish(wr)?.finish()
    }
}
