//! Virtual image: the mapped address space of all sections as one stream.
//!
//! Gaps between sections, the tail of a section whose virtual size exceeds its
//! raw size, and sections with no raw data all read as zeros. The cursor is
//! the only mutable state; [`VirtualImage::read_at`] is a pure positional read.

use crate::address::AddressResolver;
use crate::reader::Reader;
use crate::section::SectionHeader;
use crate::{Error, Result};
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Read-only view of a byte source laid out at virtual addresses.
pub struct VirtualImage<'a, R: Reader + ?Sized> {
    reader: &'a R,
    sections: &'a [SectionHeader],
    len: u64,
    position: u64,
}

impl<'a, R: Reader + ?Sized> VirtualImage<'a, R> {
    pub fn new(reader: &'a R, sections: &'a [SectionHeader]) -> Self {
        Self {
            reader,
            sections,
            len: AddressResolver::new(sections).image_len(),
            position: 0,
        }
    }

    /// Length of the mapped image: `max(virtual_address + virtual_size)`.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Current cursor, as an RVA.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn resolver(&self) -> AddressResolver<'a> {
        AddressResolver::new(self.sections)
    }

    /// File offset backing the cursor, or `None` when the cursor sits in a
    /// gap, in padding or in an unbacked section.
    pub fn file_position(&self) -> Option<u64> {
        let rva = u32::try_from(self.position).ok()?;
        self.resolver().backed_offset(rva)
    }

    /// Read up to `buf.len()` bytes at virtual `position` without moving the
    /// cursor. Returns the number of bytes produced, which is short only when
    /// the read runs past the end of the image.
    pub fn read_at(&self, position: u64, buf: &mut [u8]) -> Result<usize> {
        if position >= self.len {
            return Ok(0);
        }
        let count = buf.len().min(usize::try_from(self.len - position).unwrap_or(usize::MAX));
        let out = &mut buf[..count];
        out.fill(0);
        let end = position + count as u64;

        // Later sections first, so earlier ones overwrite them where they overlap.
        for section in self.sections.iter().rev() {
            let start_va = u64::from(section.virtual_address);
            let lo = position.max(start_va);
            let hi = end.min(section.virtual_end());
            if lo >= hi {
                continue;
            }
            let window = &mut out[(lo - position) as usize..(hi - position) as usize];
            window.fill(0);

            let backed_hi = hi.min(start_va + u64::from(section.backed_size()));
            if lo < backed_hi {
                let file_offset = u64::from(section.pointer_to_raw_data) + (lo - start_va);
                let len = (backed_hi - lo) as usize;
                // A raw range cut short by end-of-file leaves zeros behind.
                self.reader.read_at(file_offset, &mut window[..len])?;
            }
        }
        Ok(count)
    }

    /// Read exactly `len` bytes at `position`.
    pub fn read_bytes_at(&self, position: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let n = self.read_at(position, &mut buf)?;
        if n < len {
            return Err(Error::truncated(len, n));
        }
        Ok(buf)
    }

    /// Resizing a mapped image is not possible.
    pub fn set_len(&mut self, _len: u64) -> Result<()> {
        Err(Error::NotSupported("set_len on a virtual image"))
    }
}

fn into_io(err: Error) -> io::Error {
    match err {
        Error::Io(inner) => inner,
        other => io::Error::other(other),
    }
}

impl<R: Reader + ?Sized> Read for VirtualImage<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.read_at(self.position, buf).map_err(into_io)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl<R: Reader + ?Sized> Seek for VirtualImage<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        self.position = target;
        Ok(target)
    }
}

impl<R: Reader + ?Sized> Write for VirtualImage<'_, R> {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            Error::NotSupported("write to a virtual image"),
        ))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R: Reader + ?Sized> std::fmt::Debug for VirtualImage<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualImage")
            .field("sections", &self.sections.len())
            .field("len", &self.len)
            .field("position", &self.position)
            .finish()
    }
}
