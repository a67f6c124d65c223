//! Optional header (PE32 / PE32+) and its Data Directory table.

use crate::data_dir::{DataDirectory, DataDirectoryType, NUMBER_OF_DIRECTORY_ENTRIES};
use crate::reader::{ByteView, Reader};
use crate::{Error, Result};
use tracing::warn;

/// PE32 magic number.
pub const PE32_MAGIC: u16 = 0x10B;
/// PE32+ (64-bit) magic number.
pub const PE32PLUS_MAGIC: u16 = 0x20B;

/// Fields shared by both optional header layouts, widened to 64 bits where
/// PE32+ widens them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeaderFields {
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    /// PE32 only.
    pub base_of_data: Option<u32>,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    /// Declared directory count; may exceed what was actually decoded.
    pub number_of_rva_and_sizes: u32,
}

/// Image kind discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Pe32,
    Pe32Plus,
}

impl ImageKind {
    /// Bytes before the Data Directory table.
    pub const fn base_size(self) -> usize {
        match self {
            Self::Pe32 => 96,
            Self::Pe32Plus => 112,
        }
    }

    /// Size of an import lookup table entry.
    pub const fn thunk_size(self) -> usize {
        match self {
            Self::Pe32 => 4,
            Self::Pe32Plus => 8,
        }
    }
}

/// Decoded optional header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader {
    pub magic: u16,
    pub kind: ImageKind,
    pub fields: OptionalHeaderFields,
    /// Decoded directory entries, in table order.
    pub data_directories: Vec<DataDirectory>,
}

impl OptionalHeader {
    /// Parse the optional header from its full declared byte window.
    ///
    /// The directory count is clamped to what fits in the window and to the
    /// sixteen well-known kinds.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let magic = data.u16_at(0)?;
        let kind = match magic {
            PE32_MAGIC => ImageKind::Pe32,
            PE32PLUS_MAGIC => ImageKind::Pe32Plus,
            _ => return Err(Error::InvalidOptionalHeaderMagic(magic)),
        };

        let base = kind.base_size();
        if data.len() < base {
            return Err(Error::truncated(base, data.len()));
        }

        let fields = match kind {
            ImageKind::Pe32 => OptionalHeaderFields {
                base_of_data: Some(data.u32_at(24)?),
                image_base: u64::from(data.u32_at(28)?),
                size_of_stack_reserve: u64::from(data.u32_at(72)?),
                size_of_stack_commit: u64::from(data.u32_at(76)?),
                size_of_heap_reserve: u64::from(data.u32_at(80)?),
                size_of_heap_commit: u64::from(data.u32_at(84)?),
                loader_flags: data.u32_at(88)?,
                number_of_rva_and_sizes: data.u32_at(92)?,
                ..Self::common_fields(data)?
            },
            ImageKind::Pe32Plus => OptionalHeaderFields {
                base_of_data: None,
                image_base: data.u64_at(24)?,
                size_of_stack_reserve: data.u64_at(72)?,
                size_of_stack_commit: data.u64_at(80)?,
                size_of_heap_reserve: data.u64_at(88)?,
                size_of_heap_commit: data.u64_at(96)?,
                loader_flags: data.u32_at(104)?,
                number_of_rva_and_sizes: data.u32_at(108)?,
                ..Self::common_fields(data)?
            },
        };

        let declared = fields.number_of_rva_and_sizes as usize;
        let available = (data.len() - base) / DataDirectory::SIZE;
        let count = declared.min(available).min(NUMBER_OF_DIRECTORY_ENTRIES);
        if count < declared {
            warn!(
                declared,
                decoded = count,
                "data directory count clamped to optional header size"
            );
        }

        let data_directories = (0..count)
            .map(|i| DataDirectory::parse(&data[base + i * DataDirectory::SIZE..]))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            magic,
            kind,
            fields,
            data_directories,
        })
    }

    /// Fields at identical offsets in both layouts. Width-dependent fields
    /// are zeroed for the caller to overwrite.
    fn common_fields(data: &[u8]) -> Result<OptionalHeaderFields> {
        Ok(OptionalHeaderFields {
            major_linker_version: data.u8_at(2)?,
            minor_linker_version: data.u8_at(3)?,
            size_of_code: data.u32_at(4)?,
            size_of_initialized_data: data.u32_at(8)?,
            size_of_uninitialized_data: data.u32_at(12)?,
            address_of_entry_point: data.u32_at(16)?,
            base_of_code: data.u32_at(20)?,
            base_of_data: None,
            image_base: 0,
            section_alignment: data.u32_at(32)?,
            file_alignment: data.u32_at(36)?,
            major_operating_system_version: data.u16_at(40)?,
            minor_operating_system_version: data.u16_at(42)?,
            major_image_version: data.u16_at(44)?,
            minor_image_version: data.u16_at(46)?,
            major_subsystem_version: data.u16_at(48)?,
            minor_subsystem_version: data.u16_at(50)?,
            win32_version_value: data.u32_at(52)?,
            size_of_image: data.u32_at(56)?,
            size_of_headers: data.u32_at(60)?,
            check_sum: data.u32_at(64)?,
            subsystem: data.u16_at(68)?,
            dll_characteristics: data.u16_at(70)?,
            size_of_stack_reserve: 0,
            size_of_stack_commit: 0,
            size_of_heap_reserve: 0,
            size_of_heap_commit: 0,
            loader_flags: 0,
            number_of_rva_and_sizes: 0,
        })
    }

    /// Parse an optional header of `size` bytes from a Reader at the given offset.
    pub fn read_from<R: Reader + ?Sized>(reader: &R, offset: u64, size: usize) -> Result<Self> {
        let data = reader.read_bytes_at(offset, size)?;
        Self::parse(&data)
    }

    pub fn is_pe32plus(&self) -> bool {
        self.kind == ImageKind::Pe32Plus
    }

    /// Look up a directory entry. Returns `None` when the table has no slot
    /// for `kind` or the slot's address is zero.
    pub fn data_directory(&self, kind: DataDirectoryType) -> Option<DataDirectory> {
        self.data_directories
            .get(kind.as_index())
            .copied()
            .filter(DataDirectory::is_present)
    }

    /// Get the entry point RVA.
    pub fn address_of_entry_point(&self) -> u32 {
        self.fields.address_of_entry_point
    }

    /// Get the image base address.
    pub fn image_base(&self) -> u64 {
        self.fields.image_base
    }

    /// Get size of image.
    pub fn size_of_image(&self) -> u32 {
        self.fields.size_of_image
    }
}
