use serde::{Deserialize, Serialize};

use colsieve_base::{err, CodecRegistry, IntCodec, ReadExt, Result, WriteExt, CODEC_BITPACK};
use std::{
    io::{Read, Seek, Write},
    sync::Arc,
};

use crate::DOCS_PER_BLOCK;

/// Storage-wide settings, persisted once per file as a MessagePack blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub subblock_size: u32,
    pub subblock_size_mva: u32,
    pub minmax_leaf_size: u32,
    pub compression_u32: String,
    pub compression_u64: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            subblock_size: 1024,
            subblock_size_mva: 128,
            minmax_leaf_size: 1024,
            compression_u32: CODEC_BITPACK.to_string(),
            compression_u64: CODEC_BITPACK.to_string(),
        }
    }
}

impl Settings {
    pub fn check(&self) -> Result<()> {
        for (what, size) in [
            ("subblock size", self.subblock_size),
            ("mva subblock size", self.subblock_size_mva),
            ("minmax leaf size", self.minmax_leaf_size),
        ] {
            if size == 0 || !size.is_power_of_two() || size > DOCS_PER_BLOCK {
                return Err(err(format!("bad {}: {}", what, size)));
            }
        }
        Ok(())
    }

    pub fn create_codec(&self, registry: &CodecRegistry) -> Result<Arc<dyn IntCodec>> {
        registry.create_int_codec(&self.compression_u32, &self.compression_u64)
    }

    pub fn save(&self, wr: &mut impl Write) -> Result<()> {
        let blob = rmp_serde::to_vec_named(self)?;
        wr.write_varint_u32(blob.len() as u32)?;
        wr.write_all(&blob)?;
        Ok(())
    }

    pub fn load(rd: &mut (impl Read + Seek)) -> Result<Self> {
        let len = rd.read_varint_u32()? as usize;
        let blob = rd.read_bytes(len)?;
        let settings: Settings = rmp_serde::from_slice(&blob)
            .map_err(|e| err(format!("unreadable storage settings: {}", e)))?;
        settings.check()?;
        Ok(settings)
    }
}
