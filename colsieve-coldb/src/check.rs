use std::{path::Path, sync::Arc};

use colsieve_base::{err, CodecRegistry, FileSource, IntCodec, ReadExt, Result, SharedReader, Source};
use tracing::{debug, info};

use crate::{
    block::{BlockPacking, DecodedSubblock, StoredBlock},
    header::{ordered, AttributeHeader},
    layer::StorageMeta,
    DOCS_PER_BLOCK,
};

/// Validates a storage file end to end: the prelude, every attribute
/// header and minmax tree, and every stored block, whose decoded values
/// must fall inside their leaf summaries. Problems go to `on_error` and
/// the check keeps going where it can. `on_progress` receives the done
/// fraction after each attribute. Returns true when nothing was wrong.
pub fn check_storage(
    path: impl AsRef<Path>,
    num_rows: u32,
    on_error: &mut dyn FnMut(&str),
    on_progress: &mut dyn FnMut(f32),
) -> bool {
    let path = path.as_ref();
    let src: Arc<dyn Source> = match FileSource::open(path) {
        Ok(src) => Arc::new(src),
        Err(e) => {
            on_error(e.message());
            return false;
        }
    };
    let mut checker = Checker {
        src,
        codec: None,
        on_error,
        failed: false,
    };
    checker.run(num_rows, on_progress);
    info!(target: "colsieve", path = %path.display(), ok = !checker.failed, "storage check done");
    !checker.failed
}

struct Checker<'a> {
    src: Arc<dyn Source>,
    codec: Option<Arc<dyn IntCodec>>,
    on_error: &'a mut dyn FnMut(&str),
    failed: bool,
}

impl Checker<'_> {
    fn fail(&mut self, msg: &str) {
        self.failed = true;
        (self.on_error)(msg);
    }

    fn run(&mut self, num_rows: u32, on_progress: &mut dyn FnMut(f32)) {
        let mut rd = SharedReader::new(self.src.clone());
        let meta = match StorageMeta::read(&mut rd, self.src.name()) {
            Ok(meta) => meta,
            Err(e) => return self.fail(e.message()),
        };
        if meta.num_docs != num_rows {
            self.fail(&format!(
                "storage holds {} rows, expected {}",
                meta.num_docs, num_rows
            ));
        }
        match meta.settings.create_codec(&CodecRegistry::default()) {
            Ok(codec) => self.codec = Some(codec),
            Err(e) => self.fail(e.message()),
        }
        let data_start = match rd.pos() {
            Ok(pos) => pos,
            Err(e) => return self.fail(e.message()),
        };
        if meta.headers_offset < data_start || meta.headers_offset > self.src.len() {
            return self.fail(&format!(
                "attribute headers at {} outside [{}, {}]",
                meta.headers_offset,
                data_start,
                self.src.len()
            ));
        }
        if let Err(e) = rd.seek_to(meta.headers_offset) {
            return self.fail(e.message());
        }
        let settings = Arc::new(meta.settings);
        let mut names = std::collections::HashSet::new();
        for i in 0..meta.num_attrs {
            // A header that fails to parse leaves the cursor nowhere useful.
            let header = match AttributeHeader::load(&mut rd, settings.clone(), meta.num_docs) {
                Ok(h) => h,
                Err(e) => return self.fail(&format!("attribute {}: {}", i, e.message())),
            };
            if !names.insert(header.name().to_string()) {
                self.fail(&format!("duplicate attribute '{}'", header.name()));
            }
            match header.check(data_start, meta.headers_offset) {
                Ok(()) => {
                    let pos = rd.pos();
                    self.check_blocks(&header);
                    if let Ok(pos) = pos {
                        if let Err(e) = rd.seek_to(pos) {
                            return self.fail(e.message());
                        }
                    }
                }
                Err(e) => self.fail(e.message()),
            }
            on_progress((i + 1) as f32 / meta.num_attrs as f32);
        }
    }

    fn check_blocks(&mut self, header: &AttributeHeader) {
        let Some(codec) = self.codec.clone() else {
            return;
        };
        let mut rd = SharedReader::new(self.src.clone());
        let mut decoded = DecodedSubblock::default();
        for block_id in 0..header.num_blocks() {
            if let Err(e) = self.check_block(header, &codec, &mut rd, block_id, &mut decoded) {
                self.fail(&format!(
                    "attribute '{}' block {}: {}",
                    header.name(),
                    block_id,
                    e.message()
                ));
            }
        }
        debug!(target: "colsieve", attr = header.name(), blocks = header.num_blocks(), "checked");
    }

    fn check_block(
        &self,
        header: &AttributeHeader,
        codec: &Arc<dyn IntCodec>,
        rd: &mut SharedReader,
        block_id: usize,
        decoded: &mut DecodedSubblock,
    ) -> Result<()> {
        let offset = header.block_offset(block_id).unwrap_or_default();
        let block = StoredBlock::load(rd, offset)?;
        let block_first = block_id as u64 * DOCS_PER_BLOCK as u64;
        let block_rows = header.num_docs_in_block(block_id) as u64;
        let attr_type = header.attr_type();
        let leaf_size = header.settings().minmax_leaf_size as u64;
        let mut bad_rows = 0u64;
        let mut check_value = |row: u64, v: u64| {
            let leaf = (row / leaf_size) as usize;
            if let Some((min, max)) = header.get_min_max(0, leaf) {
                let v = v as i64;
                if !(ordered(attr_type, min, v) && ordered(attr_type, v, max)) {
                    bad_rows += 1;
                }
            }
        };
        if block.packing == BlockPacking::Const {
            if attr_type.is_set() {
                return Err(err("constant block in a set attribute"));
            }
            for row in (block_first..block_first + block_rows).step_by(leaf_size as usize) {
                check_value(row, block.const_value);
            }
        } else {
            let sub_rows = if attr_type.is_set() {
                header.settings().subblock_size_mva
            } else {
                header.settings().subblock_size
            } as u64;
            let expected = block_rows.div_ceil(sub_rows) as usize;
            if block.num_subblocks() != expected {
                return Err(err(format!(
                    "{} subblocks, expected {}",
                    block.num_subblocks(),
                    expected
                )));
            }
            for sub in 0..expected {
                block.decode_subblock(rd, codec, sub, attr_type.is_wide(), decoded)?;
                let first = block_first + sub as u64 * sub_rows;
                let rows = sub_rows.min(block_first + block_rows - first);
                if attr_type.is_set() {
                    if decoded.lengths.len() as u64 != rows {
                        return Err(err(format!("subblock {} row count", sub)));
                    }
                    let mut at = 0;
                    for (i, len) in decoded.lengths.iter().enumerate() {
                        for v in &decoded.values[at..at + *len as usize] {
                            check_value(first + i as u64, *v);
                        }
                        at += *len as usize;
                    }
                } else {
                    if decoded.values.len() as u64 != rows {
                        return Err(err(format!("subblock {} row count", sub)));
                    }
                    for (i, v) in decoded.values.iter().enumerate() {
                        check_value(first + i as u64, *v);
                    }
                }
            }
        }
        if bad_rows > 0 {
            return Err(err(format!(
                "{} values outside their minmax leaf",
                bad_rows
            )));
        }
        Ok(())
    }
}
