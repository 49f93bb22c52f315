use std::{
    fs::File,
    io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{err, io_err, Result};

// A Source is an immutable, positionally-read byte store. One open file
// (or one buffer) is shared through an Arc by every reader that needs
// it; readers keep their own positions, so there is no shared cursor.
pub trait Source: Send + Sync {
    fn len(&self) -> u64;
    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()>;
    fn name(&self) -> &str;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemSource {
    mem: Arc<[u8]>,
}

impl MemSource {
    pub fn new(mem: Arc<[u8]>) -> Self {
        Self { mem }
    }
}

impl From<Vec<u8>> for MemSource {
    fn from(vec: Vec<u8>) -> Self {
        Self::new(Arc::from(vec))
    }
}

impl Source for MemSource {
    fn len(&self) -> u64 {
        self.mem.len() as u64
    }
    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(pos).map_err(|_| io::ErrorKind::UnexpectedEof)?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.mem.len())
            .ok_or(io::ErrorKind::UnexpectedEof)?;
        buf.copy_from_slice(&self.mem[start..end]);
        Ok(())
    }
    fn name(&self) -> &str {
        "<memory>"
    }
}

pub struct FileSource {
    file: File,
    path: PathBuf,
    name: String,
    len: u64,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| io_err(&path, e))?;
        let len = file.metadata().map_err(|e| io_err(&path, e))?.len();
        let name = path.display().to_string();
        Ok(Self { file, path, name, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    #[cfg(unix)]
    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        std::os::unix::fs::FileExt::read_exact_at(&self.file, buf, pos)
    }

    #[cfg(windows)]
    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = std::os::windows::fs::FileExt::seek_read(
                &self.file,
                &mut buf[done..],
                pos + done as u64,
            )?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            done += n;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// SharedReader

const READ_BUF_SIZE: usize = 4096;

/// A buffered cursor over a shared [`Source`]. Each iterator makes its own
/// from the same `Arc`, so cursors never disturb one another.
pub struct SharedReader {
    src: Arc<dyn Source>,
    pos: u64,
    buf: Box<[u8]>,
    buf_start: u64,
    buf_len: usize,
}

impl SharedReader {
    pub fn new(src: Arc<dyn Source>) -> Self {
        Self {
            src,
            pos: 0,
            buf: vec![0; READ_BUF_SIZE].into_boxed_slice(),
            buf_start: 0,
            buf_len: 0,
        }
    }

    pub fn source(&self) -> &Arc<dyn Source> {
        &self.src
    }

    pub fn len(&self) -> u64 {
        self.src.len()
    }

    pub fn is_empty(&self) -> bool {
        self.src.is_empty()
    }

    fn fill_at(&mut self, pos: u64) -> io::Result<()> {
        let avail = self.src.len().saturating_sub(pos);
        let n = (READ_BUF_SIZE as u64).min(avail) as usize;
        self.src.read_exact_at(pos, &mut self.buf[..n])?;
        self.buf_start = pos;
        self.buf_len = n;
        Ok(())
    }
}

impl From<Vec<u8>> for SharedReader {
    fn from(vec: Vec<u8>) -> Self {
        Self::new(Arc::new(MemSource::from(vec)))
    }
}

impl Read for SharedReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let avail = self.src.len().saturating_sub(self.pos);
        if avail == 0 || out.is_empty() {
            return Ok(0);
        }
        if out.len() >= READ_BUF_SIZE {
            let n = (out.len() as u64).min(avail) as usize;
            self.src.read_exact_at(self.pos, &mut out[..n])?;
            self.pos += n as u64;
            return Ok(n);
        }
        let buf_end = self.buf_start + self.buf_len as u64;
        if self.pos < self.buf_start || self.pos >= buf_end {
            self.fill_at(self.pos)?;
        }
        let off = (self.pos - self.buf_start) as usize;
        let n = out.len().min(self.buf_len - off);
        out[..n].copy_from_slice(&self.buf[off..off + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for SharedReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(d) => self.src.len().checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match new_pos {
            Some(p) => {
                self.pos = p;
                Ok(p)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of source",
            )),
        }
    }
}

// MemWriter

#[derive(Default)]
pub struct MemWriter {
    mem: Cursor<Vec<u8>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.mem.into_inner()
    }
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.mem.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.mem.flush()
    }
}

impl Seek for MemWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.mem.seek(pos)
    }
}

// FileWriter

pub struct FileWriter {
    file: BufWriter<File>,
    path: PathBuf,
}

impl FileWriter {
    pub fn try_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        let file = BufWriter::new(file);
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(self) -> Result<PathBuf> {
        let Self { file, path } = self;
        let file = file.into_inner().map_err(|e| io_err(&path, e.into_error()))?;
        file.sync_all().map_err(|e| io_err(&path, e))?;
        Ok(path)
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

// Little-endian fixed-width numbers and LEB128 varints, the two
// encodings every on-disk structure in the workspace is built from.

pub trait ReadExt: Read + Seek {
    fn pos(&mut self) -> Result<u64> {
        Ok(self.stream_position()?)
    }

    fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn read_le_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn read_le_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }

    fn read_varint_u64(&mut self) -> Result<u64> {
        let mut val = 0u64;
        let mut shift = 0u32;
        loop {
            let b = self.read_u8()?;
            if shift == 63 && b > 1 {
                return Err(err("varint overflows 64 bits"));
            }
            val |= ((b & 0x7f) as u64) << shift;
            if b & 0x80 == 0 {
                return Ok(val);
            }
            shift += 7;
            if shift > 63 {
                return Err(err("varint overflows 64 bits"));
            }
        }
    }

    fn read_varint_u32(&mut self) -> Result<u32> {
        let v = self.read_varint_u64()?;
        u32::try_from(v).map_err(|_| err("varint overflows 32 bits"))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut v = vec![0u8; len];
        self.read_exact(&mut v)?;
        Ok(v)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_varint_u32()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| err("string is not utf-8"))
    }

    fn read_words(&mut self) -> Result<Vec<u32>> {
        let n = self.read_varint_u32()? as usize;
        let bytes = self.read_bytes(n * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    // Skips a length-prefixed word block without decoding it.
    fn skip_words(&mut self) -> Result<()> {
        let n = self.read_varint_u32()? as i64;
        self.seek(SeekFrom::Current(n * 4))?;
        Ok(())
    }
}

impl<R: Read + Seek + ?Sized> ReadExt for R {}

pub trait WriteExt: Write {
    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])?;
        Ok(())
    }

    fn write_le_u32(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_le_u64(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }

    fn write_varint_u64(&mut self, mut v: u64) -> Result<()> {
        let mut buf = [0u8; 10];
        let mut n = 0;
        loop {
            let b = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                buf[n] = b;
                n += 1;
                break;
            }
            buf[n] = b | 0x80;
            n += 1;
        }
        self.write_all(&buf[..n])?;
        Ok(())
    }

    fn write_varint_u32(&mut self, v: u32) -> Result<()> {
        self.write_varint_u64(v as u64)
    }

    fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_varint_u32(s.len() as u32)?;
        self.write_all(s.as_bytes())?;
        Ok(())
    }

    fn write_words(&mut self, words: &[u32]) -> Result<()> {
        self.write_varint_u32(words.len() as u32)?;
        for w in words {
            self.write_all(&w.to_le_bytes())?;
        }
        Ok(())
    }
}

impl<W: Write + ?Sized> WriteExt for W {}
