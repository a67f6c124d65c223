//! Import table parsing.
//!
//! Descriptors are read until the all-zero terminator. Each descriptor's
//! lookup table is walked with the thunk width of the image kind.

use crate::directory::{DecodedDirectory, DirectoryContext};
use crate::optional::ImageKind;
use crate::reader::ByteView;
use crate::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

/// IMAGE_IMPORT_DESCRIPTOR - 20 bytes
/// Describes one imported DLL.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImportDescriptor {
    /// RVA to the Import Lookup Table (or INT - Import Name Table).
    pub original_first_thunk: u32,
    /// Timestamp (0 if not bound, 0xFFFFFFFF if bound with new-style binding).
    pub time_date_stamp: u32,
    /// Forwarder chain index (-1 if no forwarders).
    pub forwarder_chain: u32,
    /// RVA to the DLL name (null-terminated string).
    pub name_rva: u32,
    /// RVA to the Import Address Table (IAT).
    pub first_thunk: u32,
}

impl ImportDescriptor {
    pub const SIZE: usize = 20;

    /// Timestamp sentinel marking a bound import.
    pub const BOUND: u32 = 0xFFFF_FFFF;

    /// Check if this is a null terminator descriptor.
    pub fn is_null(&self) -> bool {
        self.original_first_thunk == 0
            && self.time_date_stamp == 0
            && self.forwarder_chain == 0
            && self.name_rva == 0
            && self.first_thunk == 0
    }

    /// Parse from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            original_first_thunk: data.u32_at(0)?,
            time_date_stamp: data.u32_at(4)?,
            forwarder_chain: data.u32_at(8)?,
            name_rva: data.u32_at(12)?,
            first_thunk: data.u32_at(16)?,
        })
    }

    pub fn bind_state(&self) -> BindState {
        match self.time_date_stamp {
            0 => BindState::Unbound,
            Self::BOUND => BindState::Bound,
            stamp => BindState::BoundAt(stamp),
        }
    }

    /// Lookup table to walk: the original thunks when present, otherwise the IAT.
    pub fn lookup_table_rva(&self) -> u32 {
        if self.original_first_thunk != 0 {
            self.original_first_thunk
        } else {
            self.first_thunk
        }
    }
}

/// Binding state encoded in a descriptor's timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindState {
    Unbound,
    /// Bound; the real timestamps live in the bound import directory.
    Bound,
    /// Old-style binding with the bound DLL's timestamp.
    BoundAt(u32),
}

impl BindState {
    pub fn is_bound(self) -> bool {
        self != BindState::Unbound
    }

    pub fn timestamp(self) -> Option<DateTime<Utc>> {
        match self {
            BindState::BoundAt(stamp) => DateTime::from_timestamp(i64::from(stamp), 0),
            _ => None,
        }
    }
}

/// Import thunk entry - can be either ordinal or name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportThunk {
    /// Import by ordinal number.
    Ordinal(u16),
    /// Import by name (hint, name).
    Name { hint: u16, name: String },
}

/// A decoded lookup table slot before its name is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThunkValue {
    Ordinal(u16),
    HintName(u32),
}

impl ThunkValue {
    const ORDINAL_FLAG_32: u32 = 0x8000_0000;
    const ORDINAL_FLAG_64: u64 = 0x8000_0000_0000_0000;

    /// `None` for the zero terminator.
    fn from_raw(raw: u64, kind: ImageKind) -> Option<Self> {
        if raw == 0 {
            return None;
        }
        let is_ordinal = match kind {
            ImageKind::Pe32 => raw as u32 & Self::ORDINAL_FLAG_32 != 0,
            ImageKind::Pe32Plus => raw & Self::ORDINAL_FLAG_64 != 0,
        };
        Some(if is_ordinal {
            ThunkValue::Ordinal((raw & 0xFFFF) as u16)
        } else {
            ThunkValue::HintName((raw & 0x7FFF_FFFF) as u32)
        })
    }
}

/// A single imported DLL with its imports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedDll {
    /// The DLL name.
    pub name: String,
    /// Import descriptor.
    pub descriptor: ImportDescriptor,
    /// List of imported functions.
    pub imports: Vec<ImportThunk>,
}

impl ImportedDll {
    pub fn bind_state(&self) -> BindState {
        self.descriptor.bind_state()
    }
}

/// The complete import table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTable {
    /// List of imported DLLs.
    pub dlls: Vec<ImportedDll>,
}

pub(crate) fn decode(ctx: &DirectoryContext<'_>, window: &[u8]) -> Result<DecodedDirectory> {
    ImportTable::decode(ctx, window).map(DecodedDirectory::Import)
}

impl ImportTable {
    /// Decode the descriptor array starting at the directory RVA.
    pub fn decode(ctx: &DirectoryContext<'_>, window: &[u8]) -> Result<Self> {
        let kind = ctx.optional_header.kind;
        let mut dlls = Vec::new();
        let mut rva = ctx.rva;

        loop {
            if dlls.len() >= ctx.options.max_table_entries {
                warn!(limit = dlls.len(), "import descriptor limit reached");
                break;
            }

            let descriptor =
                ImportDescriptor::parse(&ctx.bytes_at(window, rva, ImportDescriptor::SIZE)?)?;
            if descriptor.is_null() {
                break;
            }

            let name = ctx.cstr_at(window, descriptor.name_rva)?;
            let imports = Self::read_thunks(ctx, window, descriptor.lookup_table_rva(), kind)?;

            dlls.push(ImportedDll {
                name,
                descriptor,
                imports,
            });
            rva = rva.wrapping_add(ImportDescriptor::SIZE as u32);
        }

        Ok(Self { dlls })
    }

    fn read_thunks(
        ctx: &DirectoryContext<'_>,
        window: &[u8],
        table_rva: u32,
        kind: ImageKind,
    ) -> Result<Vec<ImportThunk>> {
        let mut imports = Vec::new();
        if table_rva == 0 {
            return Ok(imports);
        }

        let thunk_size = kind.thunk_size() as u32;
        let mut rva = table_rva;
        while imports.len() < ctx.options.max_table_entries {
            let raw = match kind {
                ImageKind::Pe32 => u64::from(ctx.u32_at(window, rva)?),
                ImageKind::Pe32Plus => ctx.u64_at(window, rva)?,
            };
            let Some(value) = ThunkValue::from_raw(raw, kind) else {
                break;
            };

            imports.push(match value {
                ThunkValue::Ordinal(ordinal) => ImportThunk::Ordinal(ordinal),
                ThunkValue::HintName(hint_rva) => ImportThunk::Name {
                    hint: ctx.u16_at(window, hint_rva)?,
                    name: ctx.cstr_at(window, hint_rva.wrapping_add(2))?,
                },
            });
            rva = rva.wrapping_add(thunk_size);
        }
        Ok(imports)
    }

    /// Check if the import table is empty.
    pub fn is_empty(&self) -> bool {
        self.dlls.is_empty()
    }

    /// Find a DLL by name (case-insensitive).
    pub fn find_module(&self, name: &str) -> Option<&ImportedDll> {
        self.dlls.iter().find(|dll| dll.name.eq_ignore_ascii_case(name))
    }

    /// Get total count of imported functions.
    pub fn import_count(&self) -> usize {
        self.dlls.iter().map(|dll| dll.imports.len()).sum()
    }
}
