// Index file layout:
//
//   le u32    storage version
//   le u64    offset of the metadata, written last
//   ...       value blocks of every attribute
//   metadata:
//     le u32        attribute count
//     le u64 * n    attribute enable bits, rewritten in place by `save_meta`
//     varint        row count
//     blob          settings, MessagePack
//     per attribute: name, type code, approximate index, value block offsets

use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use colsieve_base::{
    err, err_kind, io_err, BitVec, CodecRegistry, ErrorKind, FileSource, IntCodec, ReadExt,
    Result, SharedReader, Source, WriteExt,
};
use colsieve_common::{
    fixup_filter_settings, string_filter_to_hash_filter_with, AttrType, BoxedBlockIterator,
    Filter, FilterKind, RowIdRange, StrHashFn, STR_HASH_SEED,
};
use tracing::{debug, trace, warn};

use crate::{
    common::AttrIndex, ApproxIndex, ApproxPos, BlockIter, BlockReader, CollationRegistry,
    ColumnInfo, IndexSettings, KeyKind, RangeReader, STORAGE_VERSION,
};

pub(crate) const META_OFFSET_POS: u64 = 4;
pub(crate) const DATA_START: u64 = 12;

pub(crate) fn save_settings(settings: &IndexSettings, wr: &mut impl Write) -> Result<()> {
    let blob = rmp_serde::to_vec_named(settings)?;
    wr.write_varint_u32(blob.len() as u32)?;
    wr.write_all(&blob)?;
    Ok(())
}

fn load_settings(rd: &mut (impl Read + Seek)) -> Result<IndexSettings> {
    let len = rd.read_varint_u32()? as usize;
    let blob = rd.read_bytes(len)?;
    let settings: IndexSettings = rmp_serde::from_slice(&blob)
        .map_err(|e| err(format!("unreadable index settings: {}", e)))?;
    settings.check()?;
    Ok(settings)
}

pub(crate) fn save_attr(attr: &AttrIndex, wr: &mut impl Write) -> Result<()> {
    wr.write_string(&attr.name)?;
    wr.write_varint_u32(attr.attr_type as u32)?;
    attr.approx.save(wr)?;
    wr.write_varint_u32(attr.block_offsets.len() as u32)?;
    for off in &attr.block_offsets {
        wr.write_le_u64(*off)?;
    }
    Ok(())
}

fn load_attr(rd: &mut (impl Read + Seek), values_per_block: u32) -> Result<AttrIndex> {
    let name = rd.read_string()?;
    let attr_type = AttrType::from_u32(rd.read_varint_u32()?)?;
    let kind = KeyKind::of(attr_type)?;
    let approx = ApproxIndex::load(rd, kind, values_per_block)?;
    let n = rd.read_varint_u32()? as usize;
    let mut block_offsets = Vec::with_capacity(n);
    for _ in 0..n {
        block_offsets.push(rd.read_le_u64()?);
    }
    Ok(AttrIndex {
        name,
        attr_type,
        kind,
        num_values: approx.num_values(),
        approx,
        block_offsets,
    })
}

// Block offsets must rise strictly and stay between the prelude and the
// metadata, one per approximate index entry.
fn check_attr(attr: &AttrIndex, meta_offset: u64) -> Result<()> {
    if attr.block_offsets.len() != attr.approx.num_blocks() {
        return Err(err_kind(
            ErrorKind::Corrupt,
            format!(
                "'{}': {} block offsets for {} value blocks",
                attr.name,
                attr.block_offsets.len(),
                attr.approx.num_blocks()
            ),
        ));
    }
    let mut prev = None;
    for off in &attr.block_offsets {
        if *off < DATA_START || *off >= meta_offset || prev.is_some_and(|p| p >= *off) {
            return Err(err_kind(
                ErrorKind::Corrupt,
                format!("'{}': bad value block offset {}", attr.name, off),
            ));
        }
        prev = Some(*off);
    }
    Ok(())
}

/// A read-only secondary index file. Only the per-attribute enable flags
/// can change, through `column_updated` and `save_meta`.
pub struct SecondaryIndex {
    src: Arc<dyn Source>,
    path: Option<PathBuf>,
    codec: Arc<dyn IntCodec>,
    settings: IndexSettings,
    hash: StrHashFn,
    num_docs: u32,
    meta_offset: u64,
    attrs: Vec<Arc<AttrIndex>>,
    by_name: HashMap<String, usize>,
    // Position of each loaded attribute in the file, whose flag bitmap
    // also covers attributes dropped at load.
    slots: Vec<usize>,
    enabled: BitVec,
    stored_enabled: BitVec,
    updated: bool,
}

impl std::fmt::Debug for SecondaryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryIndex")
            .field("src", &self.src.name())
            .field("num_docs", &self.num_docs)
            .field("attrs", &self.attrs.len())
            .finish()
    }
}

impl SecondaryIndex {
    pub fn open(path: impl AsRef<Path>, collations: &CollationRegistry) -> Result<Self> {
        let path = path.as_ref();
        let mut idx = Self::open_with(
            Arc::new(FileSource::open(path)?),
            &CodecRegistry::default(),
            collations,
        )?;
        idx.path = Some(path.to_path_buf());
        Ok(idx)
    }

    pub fn open_with(
        src: Arc<dyn Source>,
        codecs: &CodecRegistry,
        collations: &CollationRegistry,
    ) -> Result<Self> {
        let mut rd = SharedReader::new(src.clone());
        let version = rd.read_le_u32()?;
        if version > STORAGE_VERSION {
            return Err(err_kind(
                ErrorKind::VersionMismatch,
                format!(
                    "Unable to load secondary index: {} is v.{}, binary is v.{}",
                    src.name(),
                    version,
                    STORAGE_VERSION
                ),
            ));
        }
        let meta_offset = rd.read_le_u64()?;
        if meta_offset < DATA_START || meta_offset >= src.len() {
            return Err(err_kind(
                ErrorKind::Corrupt,
                format!("{}: index metadata at {} outside the file", src.name(), meta_offset),
            ));
        }
        rd.seek_to(meta_offset)?;
        let num_attrs = rd.read_le_u32()? as usize;
        let mut words = Vec::with_capacity(num_attrs.div_ceil(64));
        for _ in 0..num_attrs.div_ceil(64) {
            words.push(rd.read_le_u64()?);
        }
        let stored_enabled = BitVec::from_words(words, num_attrs);
        let num_docs = rd.read_varint_u32()?;
        let settings = load_settings(&mut rd)?;
        let codec = codecs.create_int_codec(&settings.compression_u32, &settings.compression_u64)?;
        let hash = collations.get(settings.collation)?;

        let mut attrs = Vec::with_capacity(num_attrs);
        let mut slots = Vec::with_capacity(num_attrs);
        let mut by_name = HashMap::new();
        for slot in 0..num_attrs {
            let attr = load_attr(&mut rd, settings.values_per_block)?;
            if let Err(e) = check_attr(&attr, meta_offset) {
                warn!(target: "colsieve", "{}: dropping indexed attribute: {}", src.name(), e.message());
                continue;
            }
            if by_name.contains_key(&attr.name) {
                return Err(err(format!("{}: duplicate attribute '{}'", src.name(), attr.name)));
            }
            by_name.insert(attr.name.clone(), attrs.len());
            attrs.push(Arc::new(attr));
            slots.push(slot);
        }
        let mut enabled = BitVec::new(attrs.len());
        for (id, slot) in slots.iter().enumerate() {
            enabled.set(id, stored_enabled.get(*slot));
        }
        debug!(
            target: "colsieve",
            src = src.name(),
            version,
            num_docs,
            attrs = attrs.len(),
            "opened secondary index"
        );
        Ok(SecondaryIndex {
            src,
            path: None,
            codec,
            settings,
            hash,
            num_docs,
            meta_offset,
            attrs,
            by_name,
            slots,
            enabled,
            stored_enabled,
            updated: false,
        })
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    pub fn num_attrs(&self) -> usize {
        self.attrs.len()
    }

    pub fn get_column(&self, name: &str) -> Option<ColumnInfo> {
        let id = *self.by_name.get(name)?;
        let attr = &self.attrs[id];
        Some(ColumnInfo {
            name: attr.name.clone(),
            attr_type: attr.attr_type,
            enabled: self.enabled.get(id),
        })
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.by_name
            .get(name)
            .is_some_and(|id| self.attrs[*id].attr_type != AttrType::None && self.enabled.get(*id))
    }

    /// Disables the index of an attribute whose source column changed.
    pub fn column_updated(&mut self, name: &str) {
        if let Some(id) = self.by_name.get(name).copied() {
            self.updated |= self.enabled.get(id);
            self.enabled.set(id, false);
        }
    }

    /// Writes the enable flags back into the index file, if any changed.
    pub fn save_meta(&mut self) -> Result<()> {
        if !self.updated || self.attrs.is_empty() {
            return Ok(());
        }
        let Some(path) = self.path.as_deref() else {
            return Err(err_kind(
                ErrorKind::Unsupported,
                format!("{} was not opened from a file", self.src.name()),
            ));
        };
        let mut flags = self.stored_enabled.clone();
        for (id, slot) in self.slots.iter().enumerate() {
            flags.set(*slot, self.enabled.get(id));
        }
        let mut file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| io_err(path, e))?;
        file.seek(SeekFrom::Start(self.meta_offset + 4))
            .map_err(|e| io_err(path, e))?;
        for w in flags.words() {
            file.write_le_u64(*w)?;
        }
        file.sync_data().map_err(|e| io_err(path, e))?;
        self.stored_enabled = flags;
        self.updated = false;
        debug!(target: "colsieve", path = %path.display(), "saved index metadata");
        Ok(())
    }

    /// Hashes a string value under the index collation. The empty string
    /// hashes to 0.
    pub fn hash_string(&self, s: &[u8]) -> u64 {
        if s.is_empty() {
            0
        } else {
            (self.hash)(s, STR_HASH_SEED)
        }
    }

    fn attr(&self, name: &str) -> Result<&Arc<AttrIndex>> {
        let id = *self.by_name.get(name).ok_or_else(|| {
            err_kind(
                ErrorKind::UnknownName,
                format!("secondary index not found for attribute '{}'", name),
            )
        })?;
        if !self.enabled.get(id) {
            return Err(err_kind(
                ErrorKind::Unsupported,
                format!("secondary index for attribute '{}' is disabled", name),
            ));
        }
        Ok(&self.attrs[id])
    }

    // The filter normalized for the attribute: clamped to its type and,
    // for string values, turned into hashes under the index collation.
    fn prepare(&self, attr: &AttrIndex, filter: &Filter) -> Result<Filter> {
        if filter.exclude {
            return Err(err_kind(
                ErrorKind::Unsupported,
                format!("exclude filters on '{}' are not served by the index", filter.name),
            ));
        }
        let fixed = fixup_filter_settings(filter, attr.attr_type);
        Ok(if fixed.kind == FilterKind::Strings {
            string_filter_to_hash_filter_with(&fixed, false, |s| self.hash_string(s))
        } else {
            fixed
        })
    }

    fn value_iters(&self, attr: &AttrIndex, filter: &Filter) -> Vec<BlockIter> {
        let mut keys: Vec<u64> = filter
            .values
            .iter()
            .filter_map(|v| attr.kind.key_of_value(*v))
            .collect();
        keys.sort_by(|a, b| attr.kind.cmp(*a, *b));
        keys.dedup_by(|a, b| attr.kind.eq(*a, *b));
        keys.into_iter()
            .map(|key| {
                BlockIter::new(
                    attr.approx.search(key),
                    key,
                    attr.block_offsets.len(),
                    self.settings.values_per_block,
                )
            })
            .collect()
    }

    fn range_iter(&self, attr: &AttrIndex, filter: &Filter) -> BlockIter {
        let last = attr.num_values.saturating_sub(1);
        let (lo_key, hi_key) = attr.kind.range_keys(filter);
        let lo = lo_key.map_or(0, |k| attr.approx.search(k).lo);
        let hi = hi_key.map_or(last, |k| attr.approx.search(k).hi);
        BlockIter::new(
            ApproxPos { pos: lo, lo, hi },
            0,
            attr.block_offsets.len(),
            self.settings.values_per_block,
        )
    }

    /// Iterators over the rows passing `filter`, clipped to `bounds`.
    /// Several values of a non-`All` filter come back merged into one.
    pub fn create_iterators(&self, filter: &Filter, bounds: RowIdRange) -> Result<Vec<BoxedBlockIterator>> {
        let attr = self.attr(&filter.name)?;
        let fixed = self.prepare(attr, filter)?;
        trace!(target: "colsieve", attr = %attr.name, kind = ?fixed.kind, "creating index iterators");
        match fixed.kind {
            FilterKind::Values => {
                let its = self.value_iters(attr, &fixed);
                BlockReader::new(attr.clone(), self.src.clone(), self.codec.clone(), bounds, self.num_docs)
                    .create_blocks_iterators(&its, fixed.mva_aggr)
            }
            FilterKind::Range | FilterKind::FloatRange => {
                let it = self.range_iter(attr, &fixed);
                RangeReader::new(attr.clone(), self.src.clone(), self.codec.clone(), bounds, self.num_docs)
                    .create_blocks_iterators(&it, &fixed)
            }
            FilterKind::Strings | FilterKind::None => Err(err_kind(
                ErrorKind::Unsupported,
                format!("unhandled filter type {:?} on '{}'", fixed.kind, attr.name),
            )),
        }
    }

    /// An upper bound on the rows `filter` selects within `bounds`.
    pub fn calc_value_count(&self, filter: &Filter, bounds: RowIdRange) -> Result<u64> {
        let attr = self.attr(&filter.name)?;
        let fixed = self.prepare(attr, filter)?;
        match fixed.kind {
            FilterKind::Values => {
                let its = self.value_iters(attr, &fixed);
                BlockReader::new(attr.clone(), self.src.clone(), self.codec.clone(), bounds, self.num_docs)
                    .calc_value_count(&its)
            }
            FilterKind::Range | FilterKind::FloatRange => {
                let it = self.range_iter(attr, &fixed);
                RangeReader::new(attr.clone(), self.src.clone(), self.codec.clone(), bounds, self.num_docs)
                    .calc_value_count(&it, &fixed)
            }
            FilterKind::Strings | FilterKind::None => Err(err_kind(
                ErrorKind::Unsupported,
                format!("unhandled filter type {:?} on '{}'", fixed.kind, attr.name),
            )),
        }
    }
}
