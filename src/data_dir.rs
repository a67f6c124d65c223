//! Data Directory table entries.

use crate::reader::ByteView;
use crate::Result;
use strum::{EnumCount, EnumIter, IntoStaticStr};

/// Data directory kind, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumCount, IntoStaticStr)]
#[repr(usize)]
pub enum DataDirectoryType {
    /// Export table (.edata)
    Export = 0,
    /// Import table (.idata)
    Import = 1,
    /// Resource table (.rsrc)
    Resource = 2,
    /// Exception table (.pdata)
    Exception = 3,
    /// Certificate/Security table
    Security = 4,
    /// Base relocation table (.reloc)
    BaseReloc = 5,
    /// Debug directory
    Debug = 6,
    /// Architecture-specific data
    Architecture = 7,
    /// Global pointer register value
    GlobalPtr = 8,
    /// Thread local storage (.tls)
    #[strum(serialize = "TLS")]
    Tls = 9,
    /// Load configuration
    LoadConfig = 10,
    /// Bound import table
    BoundImport = 11,
    /// Import address table
    #[strum(serialize = "IAT")]
    Iat = 12,
    /// Delay import descriptor
    DelayImport = 13,
    /// CLR runtime header
    #[strum(serialize = "CLR")]
    ClrRuntime = 14,
    /// Reserved
    Reserved = 15,
}

impl DataDirectoryType {
    /// Get the index value.
    pub const fn as_index(self) -> usize {
        self as usize
    }

    /// Get the name of this directory type.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Number of well-known data directories.
pub const NUMBER_OF_DIRECTORY_ENTRIES: usize = DataDirectoryType::COUNT;

/// Data Directory entry (IMAGE_DATA_DIRECTORY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    /// RVA (Relative Virtual Address) of the table.
    pub virtual_address: u32,
    /// Size of the table in bytes.
    pub size: u32,
}

impl DataDirectory {
    /// Size of a data directory entry in bytes.
    pub const SIZE: usize = 8;

    /// Parse a data directory from a byte slice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            virtual_address: data.u32_at(0)?,
            size: data.u32_at(4)?,
        })
    }

    /// A zero address means the directory is absent, whatever its size says.
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0
    }

    /// Whether `rva` falls in `[virtual_address, virtual_address + size)`.
    pub fn contains(&self, rva: u32) -> bool {
        rva >= self.virtual_address
            && u64::from(rva) < u64::from(self.virtual_address) + u64::from(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_data_directory_parse() {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&0x1000u32.to_le_bytes());
        buf[4..8].copy_from_slice(&0x200u32.to_le_bytes());

        let parsed = DataDirectory::parse(&buf).unwrap();
        assert_eq!(parsed.virtual_address, 0x1000);
        assert_eq!(parsed.size, 0x200);
        assert!(parsed.is_present());
        assert!(parsed.contains(0x11FF));
        assert!(!parsed.contains(0x1200));
    }

    #[test]
    fn test_zero_address_not_present() {
        let dir = DataDirectory {
            virtual_address: 0,
            size: 0x40,
        };
        assert!(!dir.is_present());
        assert!(!DataDirectory::default().is_present());
    }

    #[test]
    fn test_contains_near_u32_max() {
        let dir = DataDirectory {
            virtual_address: 0xFFFF_FF00,
            size: 0x200,
        };
        assert!(dir.contains(0xFFFF_FFFF));
    }

    #[test]
    fn test_data_directory_type_order() {
        for (index, dir_type) in DataDirectoryType::iter().enumerate() {
            assert_eq!(dir_type.as_index(), index);
            assert!(!dir_type.name().is_empty());
        }
        assert_eq!(NUMBER_OF_DIRECTORY_ENTRIES, 16);
        assert_eq!(DataDirectoryType::Tls.name(), "TLS");
        assert_eq!(DataDirectoryType::Export.name(), "Export");
    }
}
