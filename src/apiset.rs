//! API set schema (`.apiset` section), version 6 layout.
//!
//! The schema maps virtual module names such as `api-ms-win-core-file-l1-1-0`
//! to the host modules that implement them. All offsets are relative to the
//! start of the schema and all strings are UTF-16LE with byte lengths.

use crate::directory::{DecodedDirectory, DirectoryContext};
use crate::reader::ByteView;
use crate::Result;
use bitflags::bitflags;

bitflags! {
    /// Flags on the schema, its namespace entries and their values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ApiSetFlags: u32 {
        const SEALED = 0x1;
        const EXTENSION = 0x2;
    }
}

/// Fixed 28-byte schema header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApiSetHeader {
    pub version: u32,
    pub size: u32,
    pub flags: ApiSetFlags,
    pub count: u32,
    pub entry_offset: u32,
    pub hash_offset: u32,
    pub hash_factor: u32,
}

impl ApiSetHeader {
    pub const SIZE: usize = 28;

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            version: data.u32_at(0)?,
            size: data.u32_at(4)?,
            flags: ApiSetFlags::from_bits_retain(data.u32_at(8)?),
            count: data.u32_at(12)?,
            entry_offset: data.u32_at(16)?,
            hash_offset: data.u32_at(20)?,
            hash_factor: data.u32_at(24)?,
        })
    }
}

/// Hash table slot: name hash and the namespace entry it selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiSetHashEntry {
    pub hash: u32,
    pub index: u32,
}

impl ApiSetHashEntry {
    pub const SIZE: usize = 8;
}

/// One redirection target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSetValue {
    pub flags: ApiSetFlags,
    /// Importing module this target applies to; empty for the default.
    pub name: String,
    /// Host module, e.g. `kernelbase.dll`.
    pub value: String,
}

impl ApiSetValue {
    pub const SIZE: usize = 20;
}

/// A virtual module and its targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSetNamespace {
    pub flags: ApiSetFlags,
    pub name: String,
    /// Byte length of the name prefix that takes part in hashing.
    pub hashed_length: u32,
    pub values: Vec<ApiSetValue>,
}

impl ApiSetNamespace {
    pub const SIZE: usize = 24;

    /// Host module names, in table order.
    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|v| v.value.as_str())
    }
}

/// Decoded API set schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiSetSchema {
    pub header: ApiSetHeader,
    pub namespaces: Vec<ApiSetNamespace>,
    pub hashes: Vec<ApiSetHashEntry>,
}

pub(crate) fn decode(_ctx: &DirectoryContext<'_>, window: &[u8]) -> Result<DecodedDirectory> {
    ApiSetSchema::parse(window).map(DecodedDirectory::ApiSet)
}

/// `utf16` string of `len` bytes at `offset`.
fn wide(data: &[u8], offset: u32, len: u32) -> Result<String> {
    data.utf16_at(offset as usize, len as usize / 2)
}

impl ApiSetSchema {
    /// Parse a schema from the bytes of its section.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = ApiSetHeader::parse(data)?;

        let mut hashes = Vec::new();
        let mut namespaces = Vec::new();
        for i in 0..header.count as usize {
            let at = header.hash_offset as usize + i * ApiSetHashEntry::SIZE;
            hashes.push(ApiSetHashEntry {
                hash: data.u32_at(at)?,
                index: data.u32_at(at + 4)?,
            });
        }

        for i in 0..header.count as usize {
            let at = header.entry_offset as usize + i * ApiSetNamespace::SIZE;
            let entry = data.bytes_at(at, ApiSetNamespace::SIZE)?;
            let value_offset = entry.u32_at(16)? as usize;
            let value_count = entry.u32_at(20)? as usize;

            let mut values = Vec::new();
            for j in 0..value_count {
                let raw = data.bytes_at(value_offset + j * ApiSetValue::SIZE, ApiSetValue::SIZE)?;
                values.push(ApiSetValue {
                    flags: ApiSetFlags::from_bits_retain(raw.u32_at(0)?),
                    name: wide(data, raw.u32_at(4)?, raw.u32_at(8)?)?,
                    value: wide(data, raw.u32_at(12)?, raw.u32_at(16)?)?,
                });
            }

            namespaces.push(ApiSetNamespace {
                flags: ApiSetFlags::from_bits_retain(entry.u32_at(0)?),
                name: wide(data, entry.u32_at(4)?, entry.u32_at(8)?)?,
                hashed_length: entry.u32_at(12)?,
                values,
            });
        }

        Ok(Self {
            header,
            namespaces,
            hashes,
        })
    }

    pub fn hash_name(&self, name: &str) -> u32 {
        hash_name(name, self.header.hash_factor)
    }

    /// Namespace entry with exactly this name.
    pub fn get(&self, name: &str) -> Option<&ApiSetNamespace> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    /// Resolve a module name the way the loader does: drop a `.dll` suffix,
    /// hash, then confirm the hashed prefix matches.
    pub fn lookup(&self, module: &str) -> Option<&ApiSetNamespace> {
        let module = strip_dll(module);
        let hash = self.hash_name(module);
        let entry = self.hashes.iter().find(|e| e.hash == hash)?;
        let namespace = self.namespaces.get(entry.index as usize)?;
        (hashed_part(&namespace.name).to_lowercase() == hashed_part(module).to_lowercase())
            .then_some(namespace)
    }

    /// Host modules for `module`, empty when the name is unknown.
    pub fn targets(&self, module: &str) -> Vec<&str> {
        self.lookup(module)
            .map(|ns| ns.targets().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }
}

fn strip_dll(module: &str) -> &str {
    match module.len().checked_sub(4) {
        Some(at) if module.is_char_boundary(at) && module[at..].eq_ignore_ascii_case(".dll") => &module[..at],
        _ => module,
    }
}

/// Everything before the last hyphen; the whole name when there is none.
fn hashed_part(name: &str) -> &str {
    name.rfind('-').map_or(name, |at| &name[..at])
}

/// Hash a namespace name: strip from the last `-` onward, lower-case, then
/// fold the UTF-16 code units as `hash * factor + unit`.
pub fn hash_name(name: &str, factor: u32) -> u32 {
    hashed_part(name)
        .to_lowercase()
        .encode_utf16()
        .fold(0u32, |hash, unit| hash.wrapping_mul(factor).wrapping_add(u32::from(unit)))
}
