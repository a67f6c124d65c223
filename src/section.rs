//! Section Header structures and parsing.

use crate::reader::{ByteView, Reader};
use crate::Result;
use bitflags::bitflags;
use std::borrow::Cow;

bitflags! {
    /// Section characteristics flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SectionFlags: u32 {
        /// Section contains executable code.
        const CODE = 0x0000_0020;
        /// Section contains initialized data.
        const INITIALIZED_DATA = 0x0000_0040;
        /// Section contains uninitialized data.
        const UNINITIALIZED_DATA = 0x0000_0080;
        /// Section contains extended relocations.
        const LNK_NRELOC_OVFL = 0x0100_0000;
        /// Section can be discarded.
        const DISCARDABLE = 0x0200_0000;
        /// Section cannot be cached.
        const NO_CACHE = 0x0400_0000;
        /// Section is not pageable.
        const NO_PAGE = 0x0800_0000;
        /// Section is shared.
        const SHARED = 0x1000_0000;
        /// Section is executable.
        const EXECUTE = 0x2000_0000;
        /// Section is readable.
        const READ = 0x4000_0000;
        /// Section is writable.
        const WRITE = 0x8000_0000;
    }
}

/// Section Header (IMAGE_SECTION_HEADER).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section name (8-byte null-padded, not necessarily UTF-8).
    pub name: [u8; 8],
    /// Virtual size of the section.
    pub virtual_size: u32,
    /// RVA of the section.
    pub virtual_address: u32,
    /// Size of raw data on disk.
    pub size_of_raw_data: u32,
    /// File offset to raw data; zero when the section has no on-disk backing.
    pub pointer_to_raw_data: u32,
    /// File offset to relocations.
    pub pointer_to_relocations: u32,
    /// File offset to line numbers.
    pub pointer_to_linenumbers: u32,
    /// Number of relocations.
    pub number_of_relocations: u16,
    /// Number of line numbers.
    pub number_of_linenumbers: u16,
    /// Section characteristics.
    pub characteristics: SectionFlags,
}

impl SectionHeader {
    /// Size of a section header in bytes.
    pub const SIZE: usize = 40;

    /// Parse a section header from a byte slice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut name = [0u8; 8];
        name.copy_from_slice(data.bytes_at(0, 8)?);

        Ok(Self {
            name,
            virtual_size: data.u32_at(8)?,
            virtual_address: data.u32_at(12)?,
            size_of_raw_data: data.u32_at(16)?,
            pointer_to_raw_data: data.u32_at(20)?,
            pointer_to_relocations: data.u32_at(24)?,
            pointer_to_linenumbers: data.u32_at(28)?,
            number_of_relocations: data.u16_at(32)?,
            number_of_linenumbers: data.u16_at(34)?,
            characteristics: SectionFlags::from_bits_retain(data.u32_at(36)?),
        })
    }

    /// Section name up to the first NUL, with invalid UTF-8 replaced.
    pub fn name(&self) -> Cow<'_, str> {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end])
    }

    /// End of the virtual range, exclusive.
    pub fn virtual_end(&self) -> u64 {
        u64::from(self.virtual_address) + u64::from(self.virtual_size)
    }

    /// Whether `rva` falls in `[virtual_address, virtual_address + virtual_size)`.
    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address && u64::from(rva) < self.virtual_end()
    }

    /// Bytes of the virtual range that come from the file. The remainder of
    /// the virtual range reads as zeros.
    pub fn backed_size(&self) -> u32 {
        if self.pointer_to_raw_data == 0 {
            0
        } else {
            self.virtual_size.min(self.size_of_raw_data)
        }
    }

    /// Check if the section is executable.
    pub fn is_executable(&self) -> bool {
        self.characteristics.contains(SectionFlags::EXECUTE)
    }

    /// Check if the section is readable.
    pub fn is_readable(&self) -> bool {
        self.characteristics.contains(SectionFlags::READ)
    }

    /// Check if the section is writable.
    pub fn is_writable(&self) -> bool {
        self.characteristics.contains(SectionFlags::WRITE)
    }

    /// Read `count` consecutive section headers from a Reader.
    pub fn read_sections<R: Reader + ?Sized>(
        reader: &R,
        offset: u64,
        count: usize,
    ) -> Result<Vec<Self>> {
        let table = reader.read_bytes_at(offset, count * Self::SIZE)?;
        table.chunks_exact(Self::SIZE).map(Self::parse).collect()
    }
}
