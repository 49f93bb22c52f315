use std::{collections::HashMap, path::Path, sync::Arc};

use colsieve_base::{
    err, err_kind, CodecRegistry, ErrorKind, FileSource, IntCodec, ReadExt, Result, SharedReader,
    Source,
};
use colsieve_common::{
    fetch_row_id_limits, fixup_filter_settings, string_filter_to_hash_filter, AttrType,
    BoxedBlockIterator, Filter, FilterKind, RowIdRange, ROWID_FILTER_NAME,
};
use tracing::{debug, trace, warn};

use crate::{
    layer::StorageMeta, populate_matching_blocks, Analyzer, AttributeHeader, BlockTester,
    ColumnAnalyzer, FilterBlockTester, MatchingBlocks, MinMaxEstimate, MinMaxEval, Prefilter,
    Settings,
};

/// A read-only columnar storage file: the storage prelude plus every
/// attribute header that passed its consistency check. Block data stays
/// on disk and is read by the iterators.
pub struct Columnar {
    src: Arc<dyn Source>,
    settings: Arc<Settings>,
    codec: Arc<dyn IntCodec>,
    num_docs: u32,
    headers: Vec<Arc<AttributeHeader>>,
    by_name: HashMap<String, usize>,
    rejected: Vec<String>,
}

impl std::fmt::Debug for Columnar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Columnar")
            .field("src", &self.src.name())
            .field("num_docs", &self.num_docs)
            .field("attrs", &self.headers.len())
            .finish()
    }
}

impl Columnar {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(
            Arc::new(FileSource::open(path)?),
            &CodecRegistry::default(),
        )
    }

    pub fn open_with(src: Arc<dyn Source>, codecs: &CodecRegistry) -> Result<Self> {
        let mut rd = SharedReader::new(src.clone());
        let meta = StorageMeta::read(&mut rd, src.name())?;
        let codec = meta.settings.create_codec(codecs)?;
        let data_start = rd.pos()?;
        if meta.headers_offset < data_start || meta.headers_offset > src.len() {
            return Err(err(format!(
                "{}: attribute headers at {} outside the file",
                src.name(),
                meta.headers_offset
            )));
        }
        rd.seek_to(meta.headers_offset)?;
        let settings = Arc::new(meta.settings);
        let mut headers = Vec::with_capacity(meta.num_attrs as usize);
        let mut by_name = HashMap::new();
        let mut rejected = Vec::new();
        for _ in 0..meta.num_attrs {
            let header = AttributeHeader::load(&mut rd, settings.clone(), meta.num_docs)?;
            if let Err(e) = header.check(data_start, meta.headers_offset) {
                warn!(target: "colsieve", "{}: dropping attribute: {}", src.name(), e.message());
                rejected.push(header.name().to_string());
                continue;
            }
            if by_name.contains_key(header.name()) {
                return Err(err(format!(
                    "{}: duplicate attribute '{}'",
                    src.name(),
                    header.name()
                )));
            }
            by_name.insert(header.name().to_string(), headers.len());
            headers.push(Arc::new(header));
        }
        debug!(
            target: "colsieve",
            src = src.name(),
            num_docs = meta.num_docs,
            attrs = headers.len(),
            rejected = rejected.len(),
            "opened columnar storage"
        );
        Ok(Columnar {
            src,
            settings,
            codec,
            num_docs: meta.num_docs,
            headers,
            by_name,
            rejected,
        })
    }

    pub fn num_docs(&self) -> u32 {
        self.num_docs
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn num_attrs(&self) -> usize {
        self.headers.len()
    }

    /// Attributes dropped at load because their header was inconsistent.
    pub fn rejected_attrs(&self) -> &[String] {
        &self.rejected
    }

    pub fn get_attribute_id(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    pub fn get_header(&self, name: &str) -> Option<&Arc<AttributeHeader>> {
        self.get_attribute_id(name).map(|id| &self.headers[id])
    }

    pub fn get_type(&self, name: &str) -> AttrType {
        self.get_header(name).map_or(AttrType::None, |h| h.attr_type())
    }

    // The header that actually holds a filter's values, and the filter
    // rewritten for it. String attributes answer through their hash column.
    fn resolve(&self, filter: &Filter) -> Result<Option<(Arc<AttributeHeader>, Filter)>> {
        let Some(header) = self.get_header(&filter.name) else {
            return Ok(None);
        };
        if header.attr_type() == AttrType::String || filter.kind == FilterKind::Strings {
            let hashed = string_filter_to_hash_filter(filter, true)?;
            return Ok(self.get_header(&hashed.name).map(|h| {
                let fixed = fixup_filter_settings(&hashed, h.attr_type());
                (h.clone(), fixed)
            }));
        }
        Ok(Some((
            header.clone(),
            fixup_filter_settings(filter, header.attr_type()),
        )))
    }

    fn minmax_headers(&self, filters: &[Filter]) -> Result<Vec<(Arc<AttributeHeader>, usize)>> {
        let mut out = Vec::new();
        for (locator, filter) in filters.iter().enumerate() {
            if let Some((header, _)) = self.resolve(filter)? {
                if header.num_min_max_levels() > 0 {
                    out.push((header, locator));
                }
            }
        }
        Ok(out)
    }

    /// A tester for `filters`, each bound to its index in the slice.
    pub fn create_block_tester(&self, filters: &[Filter]) -> Result<FilterBlockTester> {
        let mut tester = FilterBlockTester::default();
        for (locator, filter) in filters.iter().enumerate() {
            if let Some((header, fixed)) = self.resolve(filter)? {
                tester.push(locator, header.attr_type(), &fixed);
            }
        }
        Ok(tester)
    }

    /// An analyzer for one filter, not yet set up.
    pub fn create_analyzer(&self, filter: &Filter, bounds: RowIdRange) -> Result<ColumnAnalyzer> {
        let (header, fixed) = self.resolve(filter)?.ok_or_else(|| {
            err_kind(
                ErrorKind::UnknownName,
                format!("no columnar attribute '{}'", filter.name),
            )
        })?;
        trace!(target: "colsieve", attr = header.name(), "creating analyzer");
        ColumnAnalyzer::new(
            header,
            SharedReader::new(self.src.clone()),
            self.codec.clone(),
            &fixed,
            bounds,
        )
    }

    /// Builds analyzers for every filter this storage can evaluate and
    /// appends the indices of the filters it consumed to `deleted`. With
    /// no analyzer to build, falls back to a prefilter over the leaves
    /// minmax pruning left, if pruning removed enough of them or a
    /// `@rowid` filter was consumed.
    pub fn create_analyzer_or_prefilter(
        &self,
        filters: &[Filter],
        deleted: &mut Vec<usize>,
        tester: &dyn BlockTester,
    ) -> Result<Vec<BoxedBlockIterator>> {
        let mut bounds = RowIdRange::default();
        let mut analyzers = Vec::new();
        for (i, filter) in filters.iter().enumerate() {
            if filter.name == ROWID_FILTER_NAME {
                bounds = fetch_row_id_limits(filter, self.num_docs);
                deleted.push(i);
                continue;
            }
            let Some((header, fixed)) = self.resolve(filter)? else {
                continue;
            };
            if colsieve_common::is_filter_degenerate(&fixed, header.attr_type()) {
                deleted.push(i);
                continue;
            }
            if matches!(fixed.kind, FilterKind::None) {
                continue;
            }
            analyzers.push(i);
            deleted.push(i);
        }

        let mm_headers = self.minmax_headers(filters)?;
        let mut matching = MatchingBlocks::new();
        if mm_headers.is_empty() {
            populate_matching_blocks(
                &mut matching,
                self.settings.minmax_leaf_size,
                self.num_docs,
                bounds,
            );
        } else {
            MinMaxEval::new(&mm_headers, tester, Some(bounds)).eval(&mut matching);
        }
        let matching = Arc::new(matching);

        let mut out: Vec<BoxedBlockIterator> = Vec::with_capacity(analyzers.len());
        for i in analyzers {
            let mut analyzer = self.create_analyzer(&filters[i], bounds)?;
            analyzer.setup(Some(matching.clone()), self.num_docs);
            out.push(Box::new(analyzer));
        }
        if out.is_empty() {
            let num_leaves = (self.num_docs as usize)
                .div_ceil(self.settings.minmax_leaf_size as usize);
            let leaf_size = self.settings.minmax_leaf_size;
            if let Some(prefilter) = Prefilter::try_new(
                matching.clone(),
                num_leaves,
                leaf_size,
                self.num_docs,
                bounds,
            ) {
                out.push(Box::new(prefilter));
            } else if !bounds.is_full() {
                // A consumed @rowid filter must still clip the rows.
                out.push(Box::new(Prefilter::new(matching, leaf_size, self.num_docs, bounds)));
            }
        }
        Ok(out)
    }

    /// True when the root summaries prove no row can pass `filters`.
    pub fn early_reject(&self, filters: &[Filter], tester: &dyn BlockTester) -> Result<bool> {
        let headers = self.minmax_headers(filters)?;
        Ok(!MinMaxEval::new(&headers, tester, None).eval_all())
    }

    pub fn estimate_min_max(
        &self,
        filters: &[Filter],
        tester: &dyn BlockTester,
    ) -> Result<MinMaxEstimate> {
        let headers = self.minmax_headers(filters)?;
        Ok(MinMaxEval::new(&headers, tester, None).estimate())
    }

    /// True when `filter` passes every row of its attribute here.
    pub fn is_filter_degenerate(&self, filter: &Filter) -> Result<bool> {
        Ok(match self.resolve(filter)? {
            Some((header, fixed)) => {
                colsieve_common::is_filter_degenerate(&fixed, header.attr_type())
            }
            None => false,
        })
    }
}
