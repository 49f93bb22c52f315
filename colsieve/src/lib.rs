// The boundary the rest of a search engine links against: open and build
// both file kinds by path, and report the format versions this build
// reads and writes. Everything else lives in the member crates, which are
// re-exported here under short names.

use std::path::Path;

use colsieve_base::{err_kind, ErrorKind, Result};
use tracing::info;

pub use colsieve_base as base;
pub use colsieve_coldb as columnar;
pub use colsieve_common as common;
pub use colsieve_sidx as sidx;

use colsieve_base::CodecRegistry;
use colsieve_coldb::{Columnar, ColumnarBuilder, Settings};
use colsieve_sidx::{CollationRegistry, IndexSettings, SecondaryIndex, SecondaryIndexBuilder};


pub fn create_columnar_storage_reader(path: impl AsRef<Path>) -> Result<Columnar> {
    let path = path.as_ref();
    let col = Columnar::open(path)?;
    info!(
        target: "colsieve",
        path = %path.display(),
        num_docs = col.num_docs(),
        attrs = col.num_attrs(),
        "opened columnar storage"
    );
    Ok(col)
}

/// Runs the full storage check. `on_progress` receives the done fraction;
/// every problem found is logged and the first one is returned.
pub fn check_columnar_storage(path: impl AsRef<Path>, num_rows: u32, on_progress: &mut dyn FnMut(f32)) -> Result<()> {
    let mut problems: Vec<String> = Vec::new();
    let ok = colsieve_coldb::check_storage(path, num_rows, &mut |e| problems.push(e.to_string()), on_progress);
    if ok {
        return Ok(());
    }
    Err(err_kind(
        ErrorKind::Corrupt,
        match problems.len() {
            0 => "columnar storage check failed".to_string(),
            1 => problems.remove(0),
            n => format!("{} (and {} more problems)", problems[0], n - 1),
        },
    ))
}

pub fn create_columnar_builder(settings: Settings) -> Result<ColumnarBuilder> {
    ColumnarBuilder::new(settings, &CodecRegistry::default())
}

pub fn create_secondary_index(path: impl AsRef<Path>, collations: &CollationRegistry) -> Result<SecondaryIndex> {
    let path = path.as_ref();
    let idx = SecondaryIndex::open(path, collations)?;
    info!(
        target: "colsieve",
        path = %path.display(),
        num_docs = idx.num_docs(),
        attrs = idx.num_attrs(),
        "opened secondary index"
    );
    Ok(idx)
}

pub fn create_secondary_index_builder(
    settings: IndexSettings,
    collations: &CollationRegistry,
) -> Result<SecondaryIndexBuilder> {
    SecondaryIndexBuilder::new(settings, &CodecRegistry::default(), collations)
}

pub fn columnar_lib_version() -> u32 {
    colsieve_coldb::LIB_VERSION
}

pub fn columnar_storage_version() -> u32 {
    colsieve_coldb::STORAGE_VERSION
}

pub fn secondary_lib_version() -> u32 {
    colsieve_sidx::LIB_VERSION
}

pub fn secondary_storage_version() -> u32 {
    colsieve_sidx::STORAGE_VERSION
}
