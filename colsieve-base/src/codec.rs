// Integer codecs are looked up by the names persisted in storage
// settings. Only two simple codecs are built in; SIMD codecs can be
// registered under their own names.

use std::{collections::BTreeMap, sync::Arc};

use funty::Unsigned;
use tracing::trace;

use crate::{err, err_kind, ErrorKind, Result};

pub const CODEC_PLAIN: &str = "plain";
pub const CODEC_BITPACK: &str = "bitpack";

/// Encodes and decodes runs of unsigned integers to and from 32-bit words.
/// Decoders append to `out`.
pub trait IntCodec: Send + Sync {
    fn encode_u32(&self, src: &[u32], out: &mut Vec<u32>);
    fn decode_u32(&self, src: &[u32], out: &mut Vec<u32>) -> Result<()>;
    fn encode_u64(&self, src: &[u64], out: &mut Vec<u32>);
    fn decode_u64(&self, src: &[u32], out: &mut Vec<u64>) -> Result<()>;
}

pub struct PlainCodec;

impl IntCodec for PlainCodec {
    fn encode_u32(&self, src: &[u32], out: &mut Vec<u32>) {
        out.extend_from_slice(src);
    }

    fn decode_u32(&self, src: &[u32], out: &mut Vec<u32>) -> Result<()> {
        out.extend_from_slice(src);
        Ok(())
    }

    fn encode_u64(&self, src: &[u64], out: &mut Vec<u32>) {
        for v in src {
            out.push(*v as u32);
            out.push((*v >> 32) as u32);
        }
    }

    fn decode_u64(&self, src: &[u32], out: &mut Vec<u64>) -> Result<()> {
        if src.len() % 2 != 0 {
            return Err(err("plain u64 block has odd word count"));
        }
        out.extend(
            src.chunks_exact(2)
                .map(|c| c[0] as u64 | ((c[1] as u64) << 32)),
        );
        Ok(())
    }
}

/// Fixed-width bit packing: a count word, a width word, then every
/// value in `width` bits, least significant bits first.
pub struct BitpackCodec;

fn bit_width<T: Unsigned>(src: &[T]) -> u32 {
    let acc = src.iter().fold(0u64, |acc, v| acc | (*v).as_u64());
    64 - acc.leading_zeros()
}

fn pack_bits<T: Unsigned>(src: &[T], out: &mut Vec<u32>) {
    let width = bit_width(src);
    out.push(src.len() as u32);
    out.push(width);
    if width == 0 {
        return;
    }
    let mut acc: u128 = 0;
    let mut nbits = 0u32;
    for v in src {
        acc |= ((*v).as_u64() as u128) << nbits;
        nbits += width;
        while nbits >= 32 {
            out.push(acc as u32);
            acc >>= 32;
            nbits -= 32;
        }
    }
    if nbits > 0 {
        out.push(acc as u32);
    }
}

fn unpack_bits(src: &[u32], max_width: u32, mut push: impl FnMut(u64)) -> Result<()> {
    let (count, width) = match src {
        [count, width, ..] => (*count as usize, *width),
        _ => return Err(err("bitpacked block is missing its header")),
    };
    if width > max_width {
        return Err(err(format!("bitpacked width {} exceeds {}", width, max_width)));
    }
    let body = &src[2..];
    let need = (count as u64 * width as u64).div_ceil(32);
    if (body.len() as u64) < need {
        return Err(err("bitpacked block is truncated"));
    }
    if width == 0 {
        (0..count).for_each(|_| push(0));
        return Ok(());
    }
    let mask: u128 = (1u128 << width) - 1;
    let mut acc: u128 = 0;
    let mut nbits = 0u32;
    let mut words = body.iter();
    for _ in 0..count {
        while nbits < width {
            let w = words.next().copied().unwrap_or(0);
            acc |= (w as u128) << nbits;
            nbits += 32;
        }
        push((acc & mask) as u64);
        acc >>= width;
        nbits -= width;
    }
    Ok(())
}

impl IntCodec for BitpackCodec {
    fn encode_u32(&self, src: &[u32], out: &mut Vec<u32>) {
        pack_bits(src, out)
    }

    fn decode_u32(&self, src: &[u32], out: &mut Vec<u32>) -> Result<()> {
        unpack_bits(src, 32, |v| out.push(v as u32))
    }

    fn encode_u64(&self, src: &[u64], out: &mut Vec<u32>) {
        pack_bits(src, out)
    }

    fn decode_u64(&self, src: &[u32], out: &mut Vec<u64>) -> Result<()> {
        unpack_bits(src, 64, |v| out.push(v))
    }
}

// Storage names a codec for 32-bit and for 64-bit values separately.
struct PairedCodec {
    c32: Arc<dyn IntCodec>,
    c64: Arc<dyn IntCodec>,
}

impl IntCodec for PairedCodec {
    fn encode_u32(&self, src: &[u32], out: &mut Vec<u32>) {
        self.c32.encode_u32(src, out)
    }
    fn decode_u32(&self, src: &[u32], out: &mut Vec<u32>) -> Result<()> {
        self.c32.decode_u32(src, out)
    }
    fn encode_u64(&self, src: &[u64], out: &mut Vec<u32>) {
        self.c64.encode_u64(src, out)
    }
    fn decode_u64(&self, src: &[u32], out: &mut Vec<u64>) -> Result<()> {
        self.c64.decode_u64(src, out)
    }
}

pub type CodecFactory = fn() -> Arc<dyn IntCodec>;

fn plain_codec() -> Arc<dyn IntCodec> {
    Arc::new(PlainCodec)
}

fn bitpack_codec() -> Arc<dyn IntCodec> {
    Arc::new(BitpackCodec)
}

#[derive(Clone)]
pub struct CodecRegistry {
    codecs: BTreeMap<String, CodecFactory>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut reg = CodecRegistry {
            codecs: BTreeMap::new(),
        };
        reg.register(CODEC_PLAIN, plain_codec);
        reg.register(CODEC_BITPACK, bitpack_codec);
        reg
    }
}

impl CodecRegistry {
    pub fn register(&mut self, name: &str, factory: CodecFactory) {
        self.codecs.insert(name.to_string(), factory);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn IntCodec>> {
        match self.codecs.get(name) {
            Some(factory) => Ok(factory()),
            None => Err(err_kind(
                ErrorKind::UnknownName,
                format!("unknown integer codec '{}'", name),
            )),
        }
    }

    pub fn create_int_codec(&self, name32: &str, name64: &str) -> Result<Arc<dyn IntCodec>> {
        trace!(target: "colsieve", name32, name64, "creating int codec");
        let c32 = self.get(name32)?;
        let c64 = self.get(name64)?;
        Ok(Arc::new(PairedCodec { c32, c64 }))
    }
}
