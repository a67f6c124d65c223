//! Byte sources and bounds-checked little-endian field decoding.

use crate::{Error, Result};
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;
use widestring::U16Str;

/// Trait for reading bytes from a source at absolute file offsets.
///
/// The decoder never keeps a cursor into the source; every read names its
/// offset, so a single source can back many concurrent views.
pub trait Reader {
    /// Read bytes at the given offset into the buffer.
    /// Returns the number of bytes actually read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the source, if known.
    fn size(&self) -> Option<u64>;

    /// Read exact number of bytes at offset, returning error if not enough data.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let n = self.read_at(offset, buf)?;
        if n < buf.len() {
            return Err(Error::truncated(buf.len(), n));
        }
        Ok(())
    }

    /// Read a u16 at the given offset (little-endian).
    fn read_u16_at(&self, offset: u64) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a u32 at the given offset (little-endian).
    fn read_u32_at(&self, offset: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact_at(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Read a block of bytes at offset, returning owned Vec.
    fn read_bytes_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

fn copy_from(data: &[u8], offset: u64, buf: &mut [u8]) -> usize {
    let Ok(offset) = usize::try_from(offset) else {
        return 0;
    };
    if offset >= data.len() {
        return 0;
    }
    let to_read = buf.len().min(data.len() - offset);
    buf[..to_read].copy_from_slice(&data[offset..offset + to_read]);
    to_read
}

/// Reader implementation for byte slices (in-memory data).
#[derive(Debug, Clone)]
pub struct SliceReader<'a> {
    data: &'a [u8],
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        self.data
    }
}

impl Reader for SliceReader<'_> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(copy_from(self.data, offset, buf))
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// Reader implementation for owned byte vectors.
#[derive(Debug, Clone)]
pub struct VecReader {
    data: Vec<u8>,
}

impl VecReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Reader for VecReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        Ok(copy_from(&self.data, offset, buf))
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// Reader over a caller-supplied seekable stream (an opened file, a cursor).
///
/// The stream's own position is shared mutable state, so each seek+read
/// pair runs under a lock.
#[derive(Debug)]
pub struct StreamReader<S> {
    stream: Mutex<S>,
    size: u64,
}

impl<S: Read + Seek> StreamReader<S> {
    pub fn new(mut stream: S) -> Result<Self> {
        let size = stream.seek(SeekFrom::End(0))?;
        Ok(Self {
            stream: Mutex::new(stream),
            size,
        })
    }

    pub fn into_inner(self) -> S {
        self.stream
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<S: Read + Seek> Reader for StreamReader<S> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        let mut stream = self
            .stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        stream.seek(SeekFrom::Start(offset))?;

        // A single read may return short even before EOF.
        let mut total = 0;
        while total < buf.len() {
            let n = stream.read(&mut buf[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }
}

/// Bounds-checked little-endian field access on a byte window.
pub trait ByteView {
    fn u8_at(&self, offset: usize) -> Result<u8>;
    fn u16_at(&self, offset: usize) -> Result<u16>;
    fn u32_at(&self, offset: usize) -> Result<u32>;
    fn u64_at(&self, offset: usize) -> Result<u64>;
    fn bytes_at(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Zero-terminated ASCII string starting at `offset`, scanning at most
    /// `max_len` bytes. A string that runs to the scan limit is returned as is.
    fn cstr_at(&self, offset: usize, max_len: usize) -> Result<String>;

    /// UTF-16LE string of `units` code units starting at `offset`. Unpaired
    /// surrogates become U+FFFD.
    fn utf16_at(&self, offset: usize, units: usize) -> Result<String>;
}

impl ByteView for [u8] {
    fn u8_at(&self, offset: usize) -> Result<u8> {
        self.get(offset)
            .copied()
            .ok_or_else(|| Error::truncated(offset.saturating_add(1), self.len()))
    }

    fn u16_at(&self, offset: usize) -> Result<u16> {
        let b = self.bytes_at(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_at(&self, offset: usize) -> Result<u32> {
        let b = self.bytes_at(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_at(&self, offset: usize) -> Result<u64> {
        let b = self.bytes_at(offset, 8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn bytes_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset
            .checked_add(len)
            .ok_or_else(|| Error::truncated(usize::MAX, self.len()))?;
        self.get(offset..end)
            .ok_or_else(|| Error::truncated(end, self.len()))
    }

    fn cstr_at(&self, offset: usize, max_len: usize) -> Result<String> {
        if offset >= self.len() {
            return Err(Error::truncated(offset.saturating_add(1), self.len()));
        }
        let end = offset.saturating_add(max_len).min(self.len());
        let slice = &self[offset..end];
        let len = slice.iter().position(|&b| b == 0).unwrap_or(slice.len());
        Ok(String::from_utf8_lossy(&slice[..len]).into_owned())
    }

    fn utf16_at(&self, offset: usize, units: usize) -> Result<String> {
        let raw = self.bytes_at(offset, units.saturating_mul(2))?;
        let words: Vec<u16> = raw
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(U16Str::from_slice(&words).to_string_lossy())
    }
}
