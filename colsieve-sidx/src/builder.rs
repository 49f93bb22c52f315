use std::{
    io::{Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use colsieve_base::{
    compute_deltas, err, BitVec, CodecRegistry, FileWriter, IntCodec, Result, WriteExt,
};
use colsieve_common::{AttrType, RowId, StrHashFn, STR_HASH_SEED};
use tracing::debug;

use crate::{
    common::AttrIndex,
    index::{save_attr, save_settings, META_OFFSET_POS},
    ApproxIndex, CollationRegistry, IndexSettings, KeyKind, Packing, STORAGE_VERSION,
};

struct PendingColumn {
    name: String,
    attr_type: AttrType,
    kind: KeyKind,
    // (key, row) for every value of every row.
    entries: Vec<(u64, RowId)>,
}

/// Collects whole columns in memory and writes them out as one index
/// file. Every column must have the same number of rows.
pub struct SecondaryIndexBuilder {
    settings: IndexSettings,
    codec: Arc<dyn IntCodec>,
    hash: StrHashFn,
    num_docs: Option<u32>,
    columns: Vec<PendingColumn>,
}

impl SecondaryIndexBuilder {
    pub fn new(settings: IndexSettings, codecs: &CodecRegistry, collations: &CollationRegistry) -> Result<Self> {
        settings.check()?;
        let codec = codecs.create_int_codec(&settings.compression_u32, &settings.compression_u64)?;
        let hash = collations.get(settings.collation)?;
        Ok(SecondaryIndexBuilder {
            settings,
            codec,
            hash,
            num_docs: None,
            columns: Vec::new(),
        })
    }

    fn push(&mut self, name: &str, attr_type: AttrType, rows: usize, entries: Vec<(u64, RowId)>) -> Result<()> {
        let rows = u32::try_from(rows).map_err(|_| err(format!("column '{}' is too long", name)))?;
        if let Some(n) = self.num_docs.filter(|n| *n != rows) {
            return Err(err(format!("column '{}' has {} rows, index has {}", name, rows, n)));
        }
        if self.columns.iter().any(|c| c.name == name) {
            return Err(err(format!("column '{}' added twice", name)));
        }
        self.num_docs = Some(rows);
        self.columns.push(PendingColumn {
            name: name.to_string(),
            attr_type,
            kind: KeyKind::of(attr_type)?,
            entries,
        });
        Ok(())
    }

    fn push_scalar(&mut self, name: &str, attr_type: AttrType, keys: impl ExactSizeIterator<Item = u64>) -> Result<()> {
        let rows = keys.len();
        let entries = keys.enumerate().map(|(row, k)| (k, row as RowId)).collect();
        self.push(name, attr_type, rows, entries)
    }

    fn push_set(&mut self, name: &str, attr_type: AttrType, rows: &[Vec<u64>]) -> Result<()> {
        let entries = rows
            .iter()
            .enumerate()
            .flat_map(|(row, vals)| vals.iter().map(move |k| (*k, row as RowId)))
            .collect();
        self.push(name, attr_type, rows.len(), entries)
    }

    pub fn add_u32(&mut self, name: &str, vals: &[u32]) -> Result<()> {
        self.push_scalar(name, AttrType::Uint32, vals.iter().map(|v| *v as u64))
    }

    pub fn add_timestamp(&mut self, name: &str, vals: &[u32]) -> Result<()> {
        self.push_scalar(name, AttrType::Timestamp, vals.iter().map(|v| *v as u64))
    }

    pub fn add_bool(&mut self, name: &str, vals: &[bool]) -> Result<()> {
        self.push_scalar(name, AttrType::Boolean, vals.iter().map(|v| *v as u64))
    }

    pub fn add_i64(&mut self, name: &str, vals: &[i64]) -> Result<()> {
        self.push_scalar(name, AttrType::Int64, vals.iter().map(|v| *v as u64))
    }

    pub fn add_u64(&mut self, name: &str, vals: &[u64]) -> Result<()> {
        self.push_scalar(name, AttrType::Uint64, vals.iter().copied())
    }

    pub fn add_f32(&mut self, name: &str, vals: &[f32]) -> Result<()> {
        self.push_scalar(name, AttrType::Float, vals.iter().map(|v| v.to_bits() as u64))
    }

    pub fn add_u32_set(&mut self, name: &str, rows: &[Vec<u32>]) -> Result<()> {
        let rows: Vec<Vec<u64>> = rows
            .iter()
            .map(|r| r.iter().map(|v| *v as u64).collect())
            .collect();
        self.push_set(name, AttrType::Uint32Set, &rows)
    }

    pub fn add_i64_set(&mut self, name: &str, rows: &[Vec<i64>]) -> Result<()> {
        let rows: Vec<Vec<u64>> = rows
            .iter()
            .map(|r| r.iter().map(|v| *v as u64).collect())
            .collect();
        self.push_set(name, AttrType::Int64Set, &rows)
    }

    /// Adds a string attribute, indexed by the hashes of its values under
    /// the index collation.
    pub fn add_strings<S: AsRef<[u8]>>(&mut self, name: &str, vals: &[S]) -> Result<()> {
        let hash = self.hash;
        let keys = vals.iter().map(|s| {
            let s = s.as_ref();
            if s.is_empty() {
                0
            } else {
                hash(s, STR_HASH_SEED)
            }
        });
        self.push_scalar(name, AttrType::String, keys)
    }

    fn packing_for(&self, rows: usize) -> Packing {
        if self
            .settings
            .fullscan_threshold
            .is_some_and(|t| rows as u64 >= t)
        {
            Packing::RowFullscan
        } else if rows == 1 {
            Packing::Row
        } else if rows <= self.settings.rows_per_block as usize {
            Packing::RowBlock
        } else {
            Packing::RowBlocksList
        }
    }

    fn write_row_block(&self, buf: &mut Vec<u8>, rows: &[RowId]) -> Result<()> {
        let (min, max) = (rows[0], rows[rows.len() - 1]);
        buf.write_varint_u32(min)?;
        buf.write_varint_u32(max - min)?;
        let mut deltas = rows.to_vec();
        compute_deltas(&mut deltas);
        let mut words = Vec::new();
        self.codec.encode_u32(&deltas, &mut words);
        buf.write_words(&words)
    }

    fn write_u32s(&self, wr: &mut impl Write, vals: &[u32]) -> Result<()> {
        let mut words = Vec::new();
        self.codec.encode_u32(vals, &mut words);
        wr.write_words(&words)
    }

    // One value block: the five word blocks, then the postings payloads.
    fn write_value_block(&self, wr: &mut impl Write, kind: KeyKind, num_docs: u32, values: &[(u64, Vec<RowId>)]) -> Result<()> {
        let mut packings = Vec::with_capacity(values.len());
        let mut row_min = Vec::with_capacity(values.len());
        let mut row_max = Vec::with_capacity(values.len());
        let mut row_start = Vec::with_capacity(values.len());
        let mut payload = Vec::new();
        for (_, rows) in values {
            let packing = self.packing_for(rows.len());
            packings.push(packing as u32);
            match packing {
                Packing::RowFullscan => {
                    row_min.push(0);
                    row_max.push(num_docs.saturating_sub(1));
                    row_start.push(0);
                }
                Packing::Row => {
                    row_min.push(rows[0]);
                    row_max.push(rows[0]);
                    row_start.push(rows[0] as u64);
                }
                Packing::RowBlock => {
                    row_min.push(rows[0]);
                    row_max.push(rows[rows.len() - 1]);
                    row_start.push(payload.len() as u64);
                    self.write_row_block(&mut payload, rows)?;
                }
                Packing::RowBlocksList => {
                    row_min.push(rows[0]);
                    row_max.push(rows[rows.len() - 1]);
                    row_start.push(payload.len() as u64);
                    let chunks = rows.chunks(self.settings.rows_per_block as usize);
                    payload.write_varint_u32(chunks.len() as u32)?;
                    for chunk in chunks {
                        self.write_row_block(&mut payload, chunk)?;
                    }
                }
            }
        }

        let mut words = Vec::new();
        if kind.is_wide() {
            let mut keys: Vec<u64> = values.iter().map(|(k, _)| *k).collect();
            compute_deltas(&mut keys);
            self.codec.encode_u64(&keys, &mut words);
        } else {
            let mut keys: Vec<u32> = values.iter().map(|(k, _)| *k as u32).collect();
            compute_deltas(&mut keys);
            self.codec.encode_u32(&keys, &mut words);
        }
        wr.write_words(&words)?;
        self.write_u32s(wr, &packings)?;
        self.write_u32s(wr, &row_min)?;
        self.write_u32s(wr, &row_max)?;
        words.clear();
        self.codec.encode_u64(&row_start, &mut words);
        wr.write_words(&words)?;
        wr.write_all(&payload)?;
        Ok(())
    }

    fn write_column(&self, wr: &mut (impl Write + Seek), col: &mut PendingColumn, num_docs: u32) -> Result<AttrIndex> {
        let kind = col.kind;
        col.entries
            .sort_by(|a, b| kind.cmp(a.0, b.0).then(a.1.cmp(&b.1)));
        let mut values: Vec<(u64, Vec<RowId>)> = Vec::new();
        for (key, row) in col.entries.drain(..) {
            match values.last_mut() {
                Some((k, rows)) if kind.cmp(*k, key).is_eq() => {
                    // Set attributes may repeat a value within one row.
                    if rows.last() != Some(&row) {
                        rows.push(row);
                    }
                }
                _ => values.push((key, vec![row])),
            }
        }
        let vpb = self.settings.values_per_block as usize;
        let mut block_offsets = Vec::new();
        let mut first_keys = Vec::new();
        for chunk in values.chunks(vpb) {
            block_offsets.push(wr.stream_position()?);
            first_keys.push(chunk[0].0);
            self.write_value_block(wr, kind, num_docs, chunk)?;
        }
        debug!(
            target: "colsieve",
            attr = %col.name,
            values = values.len(),
            blocks = block_offsets.len(),
            "wrote indexed attribute"
        );
        Ok(AttrIndex {
            name: col.name.clone(),
            attr_type: col.attr_type,
            kind,
            num_values: values.len() as u64,
            approx: ApproxIndex::new(
                kind,
                self.settings.values_per_block,
                values.len() as u64,
                first_keys,
            ),
            block_offsets,
        })
    }

    /// Writes the index to `wr`, which must be positioned at its start.
    pub fn finish<W: Write + Seek>(mut self, mut wr: W) -> Result<W> {
        let num_docs = self.num_docs.unwrap_or(0);
        wr.rewind()?;
        wr.write_le_u32(STORAGE_VERSION)?;
        wr.write_le_u64(0)?;
        let mut columns = std::mem::take(&mut self.columns);
        let mut attrs = Vec::with_capacity(columns.len());
        for col in &mut columns {
            attrs.push(self.write_column(&mut wr, col, num_docs)?);
        }

        let meta_offset = wr.stream_position()?;
        wr.write_le_u32(attrs.len() as u32)?;
        let mut enabled = BitVec::new(attrs.len());
        enabled.set_all();
        for w in enabled.words() {
            wr.write_le_u64(*w)?;
        }
        wr.write_varint_u32(num_docs)?;
        save_settings(&self.settings, &mut wr)?;
        for attr in &attrs {
            save_attr(attr, &mut wr)?;
        }
        let end = wr.stream_position()?;
        wr.seek(SeekFrom::Start(META_OFFSET_POS))?;
        wr.write_le_u64(meta_offset)?;
        wr.seek(SeekFrom::Start(end))?;
        wr.flush()?;
        debug!(
            target: "colsieve",
            num_docs,
            attrs = attrs.len(),
            meta_offset,
            "wrote secondary index"
        );
        Ok(wr)
    }

    pub fn write_file(self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let wr = FileWriter::try_create(path)?;
        self.finish(wr)?.finish()
    }
}
