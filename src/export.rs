//! Export table parsing.
//!
//! The function, name and ordinal tables are each addressed by RVA and may
//! live outside the export directory's own window. Function addresses that
//! point back inside the directory are forwarders.

use crate::directory::{DecodedDirectory, DirectoryContext};
use crate::reader::ByteView;
use crate::Result;
use chrono::{DateTime, Utc};
use tracing::warn;

/// IMAGE_EXPORT_DIRECTORY - 40 bytes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExportDirectory {
    /// Export flags (reserved, must be 0).
    pub characteristics: u32,
    /// Time/date stamp.
    pub time_date_stamp: u32,
    /// Major version.
    pub major_version: u16,
    /// Minor version.
    pub minor_version: u16,
    /// RVA to the DLL name.
    pub name_rva: u32,
    /// Starting ordinal number.
    pub base: u32,
    /// Number of entries in the Export Address Table.
    pub number_of_functions: u32,
    /// Number of entries in the Name Pointer Table.
    pub number_of_names: u32,
    /// RVA to the Export Address Table (EAT).
    pub address_of_functions: u32,
    /// RVA to the Export Name Pointer Table.
    pub address_of_names: u32,
    /// RVA to the Export Ordinal Table.
    pub address_of_name_ordinals: u32,
}

impl ExportDirectory {
    pub const SIZE: usize = 40;

    /// Parse from bytes.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            characteristics: data.u32_at(0)?,
            time_date_stamp: data.u32_at(4)?,
            major_version: data.u16_at(8)?,
            minor_version: data.u16_at(10)?,
            name_rva: data.u32_at(12)?,
            base: data.u32_at(16)?,
            number_of_functions: data.u32_at(20)?,
            number_of_names: data.u32_at(24)?,
            address_of_functions: data.u32_at(28)?,
            address_of_names: data.u32_at(32)?,
            address_of_name_ordinals: data.u32_at(36)?,
        })
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.time_date_stamp), 0)
    }
}

/// A single exported function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFunction {
    /// Ordinal number (`base + index`).
    pub ordinal: u32,
    /// Function name (if exported by name).
    pub name: Option<String>,
    /// RVA of the function, or forwarded name.
    pub address: ExportAddress,
}

impl ExportedFunction {
    pub fn rva(&self) -> Option<u32> {
        match self.address {
            ExportAddress::Rva(rva) => Some(rva),
            ExportAddress::Forwarder(_) => None,
        }
    }

    pub fn forwarder(&self) -> Option<&str> {
        match &self.address {
            ExportAddress::Rva(_) => None,
            ExportAddress::Forwarder(target) => Some(target),
        }
    }

    pub fn is_forwarder(&self) -> bool {
        matches!(self.address, ExportAddress::Forwarder(_))
    }

    /// Address slot holds zero: the ordinal is reserved but exports nothing.
    pub fn is_empty_slot(&self) -> bool {
        self.address == ExportAddress::Rva(0)
    }
}

/// The address of an exported function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportAddress {
    /// RVA to the function.
    Rva(u32),
    /// Forwarded to another DLL (e.g., "NTDLL.RtlAllocateHeap").
    Forwarder(String),
}

impl ExportAddress {
    /// Split a forwarder into its module and entry parts. The entry may be a
    /// name or `#ordinal`.
    pub fn forwarder_parts(&self) -> Option<(&str, &str)> {
        match self {
            ExportAddress::Forwarder(target) => target.rsplit_once('.'),
            ExportAddress::Rva(_) => None,
        }
    }
}

/// The complete export table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportTable {
    /// Export directory header.
    pub directory: ExportDirectory,
    /// DLL name.
    pub dll_name: String,
    /// One entry per address slot, in ordinal order.
    pub exports: Vec<ExportedFunction>,
}

pub(crate) fn decode(ctx: &DirectoryContext<'_>, window: &[u8]) -> Result<DecodedDirectory> {
    ExportTable::decode(ctx, window).map(DecodedDirectory::Export)
}

impl ExportTable {
    /// Decode an export table from its directory window.
    pub fn decode(ctx: &DirectoryContext<'_>, window: &[u8]) -> Result<Self> {
        let directory = ExportDirectory::parse(&ctx.bytes_at(window, ctx.rva, ExportDirectory::SIZE)?)?;

        let dll_name = if directory.name_rva != 0 {
            ctx.cstr_at(window, directory.name_rva)?
        } else {
            String::new()
        };

        let limit = ctx.options.max_table_entries;
        let function_count = clamp_count(directory.number_of_functions, limit, "functions");
        let name_count = clamp_count(directory.number_of_names, limit, "names");

        let names = Self::read_names(ctx, window, &directory, name_count, function_count)?;
        let exports = Self::read_functions(ctx, window, &directory, function_count, names)?;

        Ok(Self {
            directory,
            dll_name,
            exports,
        })
    }

    /// Map each function index to the name that refers to it.
    fn read_names(
        ctx: &DirectoryContext<'_>,
        window: &[u8],
        dir: &ExportDirectory,
        name_count: usize,
        function_count: usize,
    ) -> Result<Vec<Option<String>>> {
        let mut names = vec![None; function_count];
        if name_count == 0 {
            return Ok(names);
        }

        let pointers = ctx.bytes_at(window, dir.address_of_names, name_count * 4)?;
        let ordinals = ctx.bytes_at(window, dir.address_of_name_ordinals, name_count * 2)?;
        for i in 0..name_count {
            let index = usize::from(ordinals.u16_at(i * 2)?);
            let name = ctx.cstr_at(window, pointers.u32_at(i * 4)?)?;
            match names.get_mut(index) {
                Some(slot) => *slot = Some(name),
                None => warn!(name = %name, index, "export name refers past the address table"),
            }
        }
        Ok(names)
    }

    fn read_functions(
        ctx: &DirectoryContext<'_>,
        window: &[u8],
        dir: &ExportDirectory,
        function_count: usize,
        mut names: Vec<Option<String>>,
    ) -> Result<Vec<ExportedFunction>> {
        if function_count == 0 {
            return Ok(Vec::new());
        }

        let addresses = ctx.bytes_at(window, dir.address_of_functions, function_count * 4)?;
        let mut exports = Vec::with_capacity(function_count);
        for (i, name) in names.iter_mut().enumerate() {
            let func_rva = addresses.u32_at(i * 4)?;
            let address = if func_rva != 0 && ctx.contains(func_rva) {
                ExportAddress::Forwarder(ctx.cstr_at(window, func_rva)?)
            } else {
                ExportAddress::Rva(func_rva)
            };

            exports.push(ExportedFunction {
                ordinal: dir.base.wrapping_add(i as u32),
                name: name.take(),
                address,
            });
        }
        Ok(exports)
    }

    /// Check if the export table is empty.
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Find an export by name.
    pub fn find_by_name(&self, name: &str) -> Option<&ExportedFunction> {
        self.exports.iter().find(|e| e.name.as_deref() == Some(name))
    }

    /// Find an export by ordinal.
    pub fn find_by_ordinal(&self, ordinal: u32) -> Option<&ExportedFunction> {
        self.exports.iter().find(|e| e.ordinal == ordinal)
    }

    pub fn forwarders(&self) -> impl Iterator<Item = &ExportedFunction> {
        self.exports.iter().filter(|e| e.is_forwarder())
    }
}

fn clamp_count(declared: u32, limit: usize, table: &'static str) -> usize {
    let declared = declared as usize;
    if declared > limit {
        warn!(table, declared, limit, "export table count clamped");
    }
    declared.min(limit)
}
