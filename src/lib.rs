//! # diffx-pe
//!
//! A read-only structural decoder for PE (Portable Executable) images,
//! built for binary analysis and diffing tools.
//!
//! The decoder resolves RVAs through the section table, presents the mapped
//! image as a single zero-filled stream, and decodes the export, import,
//! resource and API-set directories. A directory that fails to decode is
//! reported absent without affecting the others.
//!
//! ## Features
//!
//! - **Any byte source**: decode from slices, owned buffers, caller-opened
//!   streams, or implement the `Reader` trait yourself.
//! - **Headers only**: `PEHeaders` stops after the section table.
//! - **Virtual image**: `VirtualImage` implements `Read` and `Seek` over the
//!   mapped address space.
//!
//! ## Example
//!
//! ```no_run
//! use diffx_pe::{PE, ResourceType};
//!
//! let data = std::fs::read("example.dll")?;
//! let pe = PE::parse(&data)?;
//! println!("64-bit: {}", pe.is_64bit());
//!
//! if let Some(exports) = pe.exports() {
//!     for export in &exports.exports {
//!         println!("{:>5} {:?}", export.ordinal, export.name);
//!     }
//! }
//! if let Some(resources) = pe.resources() {
//!     println!("{} string tables", resources.find_by_type(ResourceType::String).len());
//! }
//! for skipped in pe.diagnostics() {
//!     eprintln!("{skipped}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod address;
pub mod apiset;
pub mod coff;
pub mod data_dir;
pub mod directory;
pub mod dos;
pub mod error;
pub mod export;
pub mod image;
pub mod import;
pub mod optional;
pub mod options;
pub mod pe;
pub mod reader;
pub mod resource;
pub mod section;

pub use address::{AddressResolver, ResolvedAddress};
pub use apiset::{hash_name, ApiSetFlags, ApiSetNamespace, ApiSetSchema, ApiSetValue};
pub use coff::{CoffHeader, FileCharacteristics, MachineType};
pub use data_dir::{DataDirectory, DataDirectoryType};
pub use directory::{
    DecodedDirectory, Directories, DirectoryContext, DirectoryDiagnostic, DirectoryKind,
    DirectoryLoader,
};
pub use dos::DosHeader;
pub use error::{Error, Result};
pub use export::{ExportAddress, ExportDirectory, ExportTable, ExportedFunction};
pub use image::VirtualImage;
pub use import::{BindState, ImportDescriptor, ImportTable, ImportThunk, ImportedDll};
pub use optional::{ImageKind, OptionalHeader};
pub use options::ParseOptions;
pub use pe::{PEHeaders, PE};
pub use reader::{ByteView, Reader, SliceReader, StreamReader, VecReader};
pub use resource::{
    ResourceDataEntry, ResourceDirectory, ResourceEntry, ResourceId, ResourceLeaf, ResourceNode,
    ResourceType,
};
pub use section::{SectionFlags, SectionHeader};
