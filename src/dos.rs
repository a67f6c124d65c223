//! Legacy executable stub ("MZ" header).
//!
//! Only the fields needed to locate the PE header are decoded. Images that do
//! not start with a stub are legal input: [`DosHeader::parse`] reports
//! [`Error::NotAStub`] and the caller reads the PE header at offset 0.

use crate::reader::{ByteView, Reader};
use crate::{Error, Result};

/// DOS "MZ" signature.
pub const DOS_SIGNATURE: u16 = 0x5A4D; // "MZ"

/// Byte-swapped "ZM" signature emitted by some very early linkers.
pub const DOS_SIGNATURE_ALT: u16 = 0x4D5A; // "ZM"

/// Legacy stub header (IMAGE_DOS_HEADER), reduced to what locates the PE header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    /// Magic number ("MZ" or "ZM").
    pub e_magic: u16,
    /// File offset of the PE signature.
    pub e_lfanew: u32,
}

impl DosHeader {
    /// Size of the DOS header in bytes.
    pub const SIZE: usize = 64;

    /// Offset of `e_lfanew` inside the stub.
    pub const LFANEW_OFFSET: usize = 0x3C;

    /// Parse a DOS header from a byte slice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let e_magic = match data.u16_at(0) {
            Ok(magic) => magic,
            Err(_) => return Err(Error::NotAStub),
        };
        if e_magic != DOS_SIGNATURE && e_magic != DOS_SIGNATURE_ALT {
            return Err(Error::NotAStub);
        }

        Ok(Self {
            e_magic,
            e_lfanew: data.u32_at(Self::LFANEW_OFFSET)?,
        })
    }

    /// Parse a DOS header from a Reader at the given offset.
    pub fn read_from<R: Reader + ?Sized>(reader: &R, offset: u64) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        let n = reader.read_at(offset, &mut buf)?;
        Self::parse(&buf[..n])
    }

    /// Offset of the PE signature relative to the start of the stub.
    pub fn pe_offset(&self) -> u64 {
        u64::from(self.e_lfanew)
    }
}
