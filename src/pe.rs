//! Main PE file structure and parsing.
//!
//! Headers are decoded in a fixed order: stub, signature, file header,
//! optional header, section table. Any failure there aborts. Directories are
//! decoded afterwards and fail independently of each other.

use crate::address::AddressResolver;
use crate::apiset::ApiSetSchema;
use crate::coff::{has_pe_signature, verify_pe_signature, CoffHeader};
use crate::directory::{DirectoryDiagnostic, Directories, DirectoryLoader};
use crate::dos::DosHeader;
use crate::export::ExportTable;
use crate::image::VirtualImage;
use crate::import::ImportTable;
use crate::optional::OptionalHeader;
use crate::options::ParseOptions;
use crate::reader::{Reader, SliceReader, StreamReader};
use crate::resource::{ResourceDataEntry, ResourceDirectory};
use crate::section::SectionHeader;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::io::{Read, Seek};
use tracing::{debug, trace};

/// Image headers and section table, without any directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PEHeaders {
    /// Legacy stub, when the image has one.
    pub dos_header: Option<DosHeader>,
    /// COFF file header.
    pub coff_header: CoffHeader,
    /// Optional header (PE32 or PE32+).
    pub optional_header: OptionalHeader,
    /// Section headers, in table order.
    pub sections: Vec<SectionHeader>,
    /// Offset where the COFF file header was found.
    pub coff_offset: u64,
}

impl PEHeaders {
    /// Read PE headers from any Reader implementation.
    pub fn read_from<R: Reader + ?Sized>(reader: &R) -> Result<Self> {
        let (dos_header, coff_offset) = match DosHeader::read_from(reader, 0) {
            Ok(dos_header) => {
                let pe_offset = dos_header.pe_offset();
                trace!(pe_offset, "stub found");
                verify_pe_signature(reader, pe_offset)?;
                (Some(dos_header), pe_offset + 4)
            }
            Err(Error::NotAStub) => {
                // No stub: the image starts with the signature or the file header.
                let signed = has_pe_signature(reader, 0).unwrap_or(false);
                trace!(signed, "no stub");
                (None, if signed { 4 } else { 0 })
            }
            Err(err) => return Err(err),
        };

        let coff_header = CoffHeader::read_from(reader, coff_offset)?;
        trace!(
            machine = coff_header.machine,
            sections = coff_header.number_of_sections,
            "file header"
        );

        let optional_offset = coff_offset + CoffHeader::SIZE as u64;
        let optional_header = OptionalHeader::read_from(
            reader,
            optional_offset,
            coff_header.size_of_optional_header as usize,
        )?;
        trace!(
            magic = optional_header.magic,
            directories = optional_header.data_directories.len(),
            "optional header"
        );

        let sections_offset = optional_offset + u64::from(coff_header.size_of_optional_header);
        let sections = SectionHeader::read_sections(
            reader,
            sections_offset,
            coff_header.number_of_sections as usize,
        )?;
        trace!(count = sections.len(), "section table");

        Ok(Self {
            dos_header,
            coff_header,
            optional_header,
            sections,
            coff_offset,
        })
    }

    /// Read headers from a byte slice.
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        Self::read_from(&SliceReader::new(data))
    }

    /// Check if this is a 64-bit PE.
    pub fn is_64bit(&self) -> bool {
        self.optional_header.is_pe32plus()
    }

    /// Check if this is a DLL.
    pub fn is_dll(&self) -> bool {
        self.coff_header.is_dll()
    }

    pub fn resolver(&self) -> AddressResolver<'_> {
        AddressResolver::new(&self.sections)
    }

    /// Get a section by name.
    pub fn section_by_name(&self, name: &str) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.name() == name)
    }

    /// Convert an RVA to a file offset.
    pub fn rva_to_offset(&self, rva: u32) -> Result<u64> {
        Ok(self.resolver().resolve(rva)?.file_offset)
    }

    /// Convert a file offset to an RVA.
    pub fn offset_to_rva(&self, offset: u64) -> Option<u32> {
        self.resolver().file_offset_to_rva(offset)
    }

    /// Get the entry point RVA.
    pub fn entry_point(&self) -> u32 {
        self.optional_header.address_of_entry_point()
    }

    /// Get the image base.
    pub fn image_base(&self) -> u64 {
        self.optional_header.image_base()
    }

    /// Link time from the file header.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.coff_header.timestamp()
    }
}

/// A decoded PE image: headers plus every directory that decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PE {
    headers: PEHeaders,
    directories: Directories,
}

impl PE {
    /// Parse a PE image from a byte slice.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_with_options(data, &ParseOptions::default())
    }

    pub fn parse_with_options(data: &[u8], options: &ParseOptions) -> Result<Self> {
        Self::read_from_with_options(&SliceReader::new(data), options)
    }

    /// Decode from a caller-opened seekable stream.
    pub fn from_stream<S: Read + Seek>(stream: S) -> Result<Self> {
        Self::read_from(&StreamReader::new(stream)?)
    }

    /// Decode from any Reader implementation.
    pub fn read_from<R: Reader>(reader: &R) -> Result<Self> {
        Self::read_from_with_options(reader, &ParseOptions::default())
    }

    pub fn read_from_with_options<R: Reader>(reader: &R, options: &ParseOptions) -> Result<Self> {
        let headers = PEHeaders::read_from(reader)?;
        let directories = DirectoryLoader::new(
            reader,
            &headers.optional_header,
            &headers.sections,
            options,
        )
        .load_all();
        debug!(
            present = directories.present_count(),
            skipped = directories.diagnostics.len(),
            "image decoded"
        );

        Ok(Self {
            headers,
            directories,
        })
    }

    pub fn headers(&self) -> &PEHeaders {
        &self.headers
    }

    pub fn dos_header(&self) -> Option<&DosHeader> {
        self.headers.dos_header.as_ref()
    }

    pub fn coff_header(&self) -> &CoffHeader {
        &self.headers.coff_header
    }

    pub fn optional_header(&self) -> &OptionalHeader {
        &self.headers.optional_header
    }

    pub fn sections(&self) -> &[SectionHeader] {
        &self.headers.sections
    }

    pub fn directories(&self) -> &Directories {
        &self.directories
    }

    pub fn exports(&self) -> Option<&ExportTable> {
        self.directories.exports.as_ref()
    }

    pub fn imports(&self) -> Option<&ImportTable> {
        self.directories.imports.as_ref()
    }

    pub fn resources(&self) -> Option<&ResourceDirectory> {
        self.directories.resources.as_ref()
    }

    pub fn api_set(&self) -> Option<&ApiSetSchema> {
        self.directories.api_set.as_ref()
    }

    /// Declared directories that were reported absent, with the reason.
    pub fn diagnostics(&self) -> &[DirectoryDiagnostic] {
        &self.directories.diagnostics
    }

    /// Check if this is a 64-bit PE file.
    pub fn is_64bit(&self) -> bool {
        self.headers.is_64bit()
    }

    /// Check if this is a DLL.
    pub fn is_dll(&self) -> bool {
        self.headers.is_dll()
    }

    /// Get a section by name.
    pub fn section_by_name(&self, name: &str) -> Option<&SectionHeader> {
        self.headers.section_by_name(name)
    }

    pub fn resolver(&self) -> AddressResolver<'_> {
        self.headers.resolver()
    }

    /// Convert an RVA to a file offset.
    pub fn rva_to_offset(&self, rva: u32) -> Result<u64> {
        self.headers.rva_to_offset(rva)
    }

    /// The mapped image over `reader`, which must be the source this image
    /// was decoded from.
    pub fn virtual_image<'a, R: Reader + ?Sized>(&'a self, reader: &'a R) -> VirtualImage<'a, R> {
        VirtualImage::new(reader, &self.headers.sections)
    }

    /// Payload of a resource leaf.
    pub fn resource_data<R: Reader + ?Sized>(
        &self,
        reader: &R,
        leaf: &ResourceDataEntry,
    ) -> Result<Vec<u8>> {
        leaf.read(&self.virtual_image(reader))
    }
}
