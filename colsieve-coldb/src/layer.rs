// A storage file starts with a fixed prelude: magic, storage version,
// the offset of the attribute headers (which are written last), row and
// attribute counts, then the settings blob. Block data follows.

use std::io::{Read, Seek, SeekFrom, Write};

use colsieve_base::{err, err_kind, ErrorKind, ReadExt, Result, WriteExt};

use crate::{Settings, STORAGE_VERSION};

#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub(crate) struct StorageMeta {
    pub(crate) version: u32,
    pub(crate) headers_offset: u64,
    pub(crate) num_docs: u32,
    pub(crate) num_attrs: u32,
    pub(crate) settings: Settings,
}

impl StorageMeta {
    pub const MAGIC: &[u8; 8] = b"colsieve";
    const HEADERS_OFFSET_POS: u64 = 12;

    pub(crate) fn new(settings: Settings, num_docs: u32, num_attrs: u32) -> Self {
        StorageMeta {
            version: STORAGE_VERSION,
            headers_offset: 0,
            num_docs,
            num_attrs,
            settings,
        }
    }

    pub(crate) fn write(&self, wr: &mut (impl Write + Seek)) -> Result<()> {
        wr.rewind()?;
        wr.write_all(Self::MAGIC)?;
        wr.write_le_u32(self.version)?;
        wr.write_le_u64(self.headers_offset)?;
        wr.write_le_u32(self.num_docs)?;
        wr.write_le_u32(self.num_attrs)?;
        self.settings.save(wr)
    }

    pub(crate) fn patch_headers_offset(wr: &mut (impl Write + Seek), offset: u64) -> Result<()> {
        let end = wr.stream_position()?;
        wr.seek(SeekFrom::Start(Self::HEADERS_OFFSET_POS))?;
        wr.write_le_u64(offset)?;
        wr.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    pub(crate) fn read(rd: &mut (impl Read + Seek), name: &str) -> Result<Self> {
        rd.rewind()?;
        let mut magic = [0u8; 8];
        rd.read_exact(&mut magic)?;
        if magic != *Self::MAGIC {
            return Err(err(format!("{} is not a columnar storage file", name)));
        }
        let version = rd.read_le_u32()?;
        if version != STORAGE_VERSION {
            return Err(err_kind(
                ErrorKind::VersionMismatch,
                format!(
                    "Unable to load columnar storage: {} is v.{}, binary is v.{}",
                    name, version, STORAGE_VERSION
                ),
            ));
        }
        let headers_offset = rd.read_le_u64()?;
        let num_docs = rd.read_le_u32()?;
        let num_attrs = rd.read_le_u32()?;
        let settings = Settings::load(rd)?;
        Ok(StorageMeta {
            version,
            headers_offset,
            num_docs,
            num_attrs,
            settings,
        })
    }
}
