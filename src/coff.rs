//! PE signature and COFF file header.

use crate::reader::{ByteView, Reader};
use crate::{Error, Result};
use bitflags::bitflags;
use chrono::{DateTime, Utc};

/// PE signature "PE\0\0".
pub const PE_SIGNATURE: u32 = 0x00004550;

/// Target architecture codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
#[non_exhaustive]
pub enum MachineType {
    Unknown = 0x0000,
    /// Hyper-V target host.
    TargetHost = 0x0001,
    /// Intel 386 or later.
    I386 = 0x014C,
    /// MIPS R3000, big-endian.
    R3000BigEndian = 0x0160,
    R3000 = 0x0162,
    R4000 = 0x0166,
    R10000 = 0x0168,
    /// MIPS little-endian WCE v2.
    WceMipsV2 = 0x0169,
    Alpha = 0x0184,
    Sh3 = 0x01A2,
    Sh3Dsp = 0x01A3,
    Sh3E = 0x01A4,
    Sh4 = 0x01A6,
    Sh5 = 0x01A8,
    /// ARM little endian.
    Arm = 0x01C0,
    Thumb = 0x01C2,
    /// ARM Thumb-2 little endian.
    ArmNt = 0x01C4,
    Am33 = 0x01D3,
    PowerPc = 0x01F0,
    PowerPcFp = 0x01F1,
    /// Intel Itanium.
    Ia64 = 0x0200,
    Mips16 = 0x0266,
    /// Alpha AXP 64-bit (also spelled AXP64).
    Alpha64 = 0x0284,
    MipsFpu = 0x0366,
    MipsFpu16 = 0x0466,
    Tricore = 0x0520,
    Cef = 0x0CEF,
    /// EFI byte code.
    Ebc = 0x0EBC,
    /// x64 (AMD64).
    Amd64 = 0x8664,
    M32R = 0x9041,
    /// ARM64 little endian.
    Arm64 = 0xAA64,
    Cee = 0xC0EE,
}

impl MachineType {
    /// Convert from raw u16 value.
    pub fn from_u16(value: u16) -> Option<Self> {
        let machine = match value {
            0x0000 => Self::Unknown,
            0x0001 => Self::TargetHost,
            0x014C => Self::I386,
            0x0160 => Self::R3000BigEndian,
            0x0162 => Self::R3000,
            0x0166 => Self::R4000,
            0x0168 => Self::R10000,
            0x0169 => Self::WceMipsV2,
            0x0184 => Self::Alpha,
            0x01A2 => Self::Sh3,
            0x01A3 => Self::Sh3Dsp,
            0x01A4 => Self::Sh3E,
            0x01A6 => Self::Sh4,
            0x01A8 => Self::Sh5,
            0x01C0 => Self::Arm,
            0x01C2 => Self::Thumb,
            0x01C4 => Self::ArmNt,
            0x01D3 => Self::Am33,
            0x01F0 => Self::PowerPc,
            0x01F1 => Self::PowerPcFp,
            0x0200 => Self::Ia64,
            0x0266 => Self::Mips16,
            0x0284 => Self::Alpha64,
            0x0366 => Self::MipsFpu,
            0x0466 => Self::MipsFpu16,
            0x0520 => Self::Tricore,
            0x0CEF => Self::Cef,
            0x0EBC => Self::Ebc,
            0x8664 => Self::Amd64,
            0x9041 => Self::M32R,
            0xAA64 => Self::Arm64,
            0xC0EE => Self::Cee,
            _ => return None,
        };
        Some(machine)
    }
}

bitflags! {
    /// COFF file header characteristics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FileCharacteristics: u16 {
        /// Relocation info stripped from file.
        const RELOCS_STRIPPED = 0x0001;
        /// File is executable.
        const EXECUTABLE_IMAGE = 0x0002;
        /// Line numbers stripped from file.
        const LINE_NUMS_STRIPPED = 0x0004;
        /// Local symbols stripped from file.
        const LOCAL_SYMS_STRIPPED = 0x0008;
        /// Aggressively trim working set.
        const AGGRESSIVE_WS_TRIM = 0x0010;
        /// App can handle >2GB addresses.
        const LARGE_ADDRESS_AWARE = 0x0020;
        /// Bytes of machine word are reversed (low).
        const BYTES_REVERSED_LO = 0x0080;
        /// 32-bit word machine.
        const MACHINE_32BIT = 0x0100;
        /// Debugging info stripped from file.
        const DEBUG_STRIPPED = 0x0200;
        /// Copy to swap file if on removable media.
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        /// Copy to swap file if on network media.
        const NET_RUN_FROM_SWAP = 0x0800;
        /// File is a system file.
        const SYSTEM = 0x1000;
        /// File is a DLL.
        const DLL = 0x2000;
        /// File should only be run on a uniprocessor machine.
        const UP_SYSTEM_ONLY = 0x4000;
        /// Bytes of machine word are reversed (high).
        const BYTES_REVERSED_HI = 0x8000;
    }
}

impl FileCharacteristics {
    /// Either of the reversed-byte-order flags.
    pub const BIG_ENDIAN: Self = Self::BYTES_REVERSED_LO.union(Self::BYTES_REVERSED_HI);
}

/// COFF File Header (IMAGE_FILE_HEADER).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffHeader {
    /// Target machine type.
    pub machine: u16,
    /// Number of sections.
    pub number_of_sections: u16,
    /// Timestamp (seconds since the Unix epoch).
    pub time_date_stamp: u32,
    /// File offset of COFF symbol table.
    pub pointer_to_symbol_table: u32,
    /// Number of entries in symbol table.
    pub number_of_symbols: u32,
    /// Size of optional header.
    pub size_of_optional_header: u16,
    /// Characteristics flags.
    pub characteristics: FileCharacteristics,
}

impl CoffHeader {
    /// Size of the COFF header in bytes.
    pub const SIZE: usize = 20;

    /// Parse a COFF header from a byte slice.
    ///
    /// Images flagged as big-endian are rejected rather than misread.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(Error::truncated(Self::SIZE, data.len()));
        }

        let raw_characteristics = data.u16_at(18)?;
        let characteristics = FileCharacteristics::from_bits_retain(raw_characteristics);
        if characteristics.intersects(FileCharacteristics::BIG_ENDIAN) {
            return Err(Error::UnsupportedEndianness {
                characteristics: raw_characteristics,
            });
        }

        Ok(Self {
            machine: data.u16_at(0)?,
            number_of_sections: data.u16_at(2)?,
            time_date_stamp: data.u32_at(4)?,
            pointer_to_symbol_table: data.u32_at(8)?,
            number_of_symbols: data.u32_at(12)?,
            size_of_optional_header: data.u16_at(16)?,
            characteristics,
        })
    }

    /// Get the machine type as an enum.
    pub fn machine_type(&self) -> Option<MachineType> {
        MachineType::from_u16(self.machine)
    }

    /// Link timestamp as a UTC date.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.time_date_stamp), 0)
    }

    /// Check if the file is a DLL.
    pub fn is_dll(&self) -> bool {
        self.characteristics.contains(FileCharacteristics::DLL)
    }

    /// Check if the file is executable.
    pub fn is_executable(&self) -> bool {
        self.characteristics
            .contains(FileCharacteristics::EXECUTABLE_IMAGE)
    }

    /// Parse a COFF header from a Reader at the given offset.
    pub fn read_from<R: Reader + ?Sized>(reader: &R, offset: u64) -> Result<Self> {
        let mut buf = [0u8; Self::SIZE];
        reader.read_exact_at(offset, &mut buf)?;
        Self::parse(&buf)
    }
}

/// Check for the PE signature at the given offset.
pub fn has_pe_signature<R: Reader + ?Sized>(reader: &R, offset: u64) -> Result<bool> {
    Ok(reader.read_u32_at(offset)? == PE_SIGNATURE)
}

/// Verify PE signature at the given offset.
pub fn verify_pe_signature<R: Reader + ?Sized>(reader: &R, offset: u64) -> Result<()> {
    if !has_pe_signature(reader, offset)? {
        return Err(Error::MalformedSignature);
    }
    Ok(())
}
