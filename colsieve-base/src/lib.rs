mod bitvec;
mod codec;
mod delta;
mod error;
mod ioutil;

#[cfg(test)]
mod test;

pub use bitvec::BitVec;
pub use codec::{
    BitpackCodec, CodecFactory, CodecRegistry, IntCodec, PlainCodec, CODEC_BITPACK, CODEC_PLAIN,
};
pub use delta::{compute_deltas, compute_inverse_deltas};
pub use error::{err, err_kind, io_err, Error, ErrorKind, Result};
pub use ioutil::{
    FileSource, FileWriter, MemSource, MemWriter, ReadExt, SharedReader, Source, WriteExt,
};
