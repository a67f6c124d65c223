//! Directory location and dispatch.
//!
//! Each [`DirectoryKind`] maps to one decoding function. The loader finds the
//! section that owns the directory, reads the section's bytes from its raw
//! data, slices out the directory's own window and hands it to the
//! decoder together with a [`DirectoryContext`] for reaching anything the
//! window does not cover.

use crate::address::AddressResolver;
use crate::apiset::ApiSetSchema;
use crate::data_dir::{DataDirectory, DataDirectoryType};
use crate::export::ExportTable;
use crate::image::VirtualImage;
use crate::import::ImportTable;
use crate::optional::OptionalHeader;
use crate::options::ParseOptions;
use crate::reader::{ByteView, Reader};
use crate::resource::ResourceDirectory;
use crate::section::SectionHeader;
use crate::Result;
use std::borrow::Cow;
use std::fmt;
use strum::{Display, IntoStaticStr};
use tracing::{debug, trace, warn};

/// Name of the section holding the API-set schema.
pub const API_SET_SECTION: &str = ".apiset";

/// Directory kinds this crate decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum DirectoryKind {
    Export,
    Import,
    Resource,
    #[strum(serialize = "API set")]
    ApiSet,
}

impl DirectoryKind {
    /// Every kind, in the default decode order.
    pub const ALL: [DirectoryKind; 4] = [
        DirectoryKind::Export,
        DirectoryKind::Import,
        DirectoryKind::Resource,
        DirectoryKind::ApiSet,
    ];

    /// Data directory slot for this kind. The API-set schema has none; it is
    /// found by section name instead.
    pub fn data_directory(self) -> Option<DataDirectoryType> {
        match self {
            Self::Export => Some(DataDirectoryType::Export),
            Self::Import => Some(DataDirectoryType::Import),
            Self::Resource => Some(DataDirectoryType::Resource),
            Self::ApiSet => None,
        }
    }

    pub fn name(self) -> &'static str {
        self.into()
    }

    fn decoder(self) -> DecodeFn {
        match self {
            Self::Export => crate::export::decode,
            Self::Import => crate::import::decode,
            Self::Resource => crate::resource::decode,
            Self::ApiSet => crate::apiset::decode,
        }
    }
}

/// Output of a directory decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedDirectory {
    Export(ExportTable),
    Import(ImportTable),
    Resource(ResourceDirectory),
    ApiSet(ApiSetSchema),
}

impl DecodedDirectory {
    pub fn kind(&self) -> DirectoryKind {
        match self {
            Self::Export(_) => DirectoryKind::Export,
            Self::Import(_) => DirectoryKind::Import,
            Self::Resource(_) => DirectoryKind::Resource,
            Self::ApiSet(_) => DirectoryKind::ApiSet,
        }
    }
}

/// Decoder signature shared by every directory kind.
pub type DecodeFn = fn(&DirectoryContext<'_>, &[u8]) -> Result<DecodedDirectory>;

/// Addressing context passed to a decoder alongside its byte window.
pub struct DirectoryContext<'a> {
    image: VirtualImage<'a, dyn Reader + 'a>,
    pub optional_header: &'a OptionalHeader,
    pub options: &'a ParseOptions,
    /// RVA of the first byte of the window.
    pub rva: u32,
    /// Declared size of the directory.
    pub size: u32,
}

impl<'a> DirectoryContext<'a> {
    pub fn new(
        reader: &'a (dyn Reader + 'a),
        sections: &'a [SectionHeader],
        optional_header: &'a OptionalHeader,
        options: &'a ParseOptions,
        directory: DataDirectory,
    ) -> Self {
        Self {
            image: VirtualImage::new(reader, sections),
            optional_header,
            options,
            rva: directory.virtual_address,
            size: directory.size,
        }
    }

    pub fn image(&self) -> &VirtualImage<'a, dyn Reader + 'a> {
        &self.image
    }

    pub fn resolver(&self) -> AddressResolver<'a> {
        self.image.resolver()
    }

    /// Whether `rva` falls inside the directory's declared range.
    pub fn contains(&self, rva: u32) -> bool {
        DataDirectory {
            virtual_address: self.rva,
            size: self.size,
        }
        .contains(rva)
    }

    /// Offset of `rva` inside the window, when `len` bytes from it fit.
    fn window_offset(&self, window: &[u8], rva: u32, len: usize) -> Option<usize> {
        let offset = rva.checked_sub(self.rva)? as usize;
        (offset.checked_add(len)? <= window.len()).then_some(offset)
    }

    /// `len` bytes at `rva`, borrowed from the window when they lie inside it
    /// and read through the virtual image otherwise.
    pub fn bytes_at<'w>(&self, window: &'w [u8], rva: u32, len: usize) -> Result<Cow<'w, [u8]>> {
        if let Some(offset) = self.window_offset(window, rva, len) {
            return Ok(Cow::Borrowed(&window[offset..offset + len]));
        }
        self.resolver().resolve(rva)?;
        Ok(Cow::Owned(self.image.read_bytes_at(u64::from(rva), len)?))
    }

    pub fn u16_at(&self, window: &[u8], rva: u32) -> Result<u16> {
        self.bytes_at(window, rva, 2)?.u16_at(0)
    }

    pub fn u32_at(&self, window: &[u8], rva: u32) -> Result<u32> {
        self.bytes_at(window, rva, 4)?.u32_at(0)
    }

    pub fn u64_at(&self, window: &[u8], rva: u32) -> Result<u64> {
        self.bytes_at(window, rva, 8)?.u64_at(0)
    }

    /// Zero-terminated ASCII string at `rva`, capped at the configured
    /// maximum string length.
    pub fn cstr_at(&self, window: &[u8], rva: u32) -> Result<String> {
        let max_len = self.options.max_string_length;
        if let Some(offset) = self.window_offset(window, rva, 1) {
            return window.cstr_at(offset, max_len);
        }
        self.resolver().resolve(rva)?;
        let mut buf = vec![0u8; max_len];
        let n = self.image.read_at(u64::from(rva), &mut buf)?;
        buf.cstr_at(0, n)
    }
}

/// Why a directory was reported absent despite being declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryDiagnostic {
    pub kind: DirectoryKind,
    pub message: String,
}

impl fmt::Display for DirectoryDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} directory skipped: {}", self.kind, self.message)
    }
}

/// Decoded directories of one image. Each slot is `None` when the directory
/// was not declared, not requested, or failed to decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Directories {
    pub exports: Option<ExportTable>,
    pub imports: Option<ImportTable>,
    pub resources: Option<ResourceDirectory>,
    pub api_set: Option<ApiSetSchema>,
    pub diagnostics: Vec<DirectoryDiagnostic>,
}

impl Directories {
    fn insert(&mut self, decoded: DecodedDirectory) {
        match decoded {
            DecodedDirectory::Export(table) => self.exports = Some(table),
            DecodedDirectory::Import(table) => self.imports = Some(table),
            DecodedDirectory::Resource(tree) => self.resources = Some(tree),
            DecodedDirectory::ApiSet(schema) => self.api_set = Some(schema),
        }
    }

    /// Number of directories that decoded successfully.
    pub fn present_count(&self) -> usize {
        usize::from(self.exports.is_some())
            + usize::from(self.imports.is_some())
            + usize::from(self.resources.is_some())
            + usize::from(self.api_set.is_some())
    }
}

/// Locates directories in an image and runs their decoders.
pub struct DirectoryLoader<'a> {
    reader: &'a (dyn Reader + 'a),
    optional_header: &'a OptionalHeader,
    sections: &'a [SectionHeader],
    options: &'a ParseOptions,
}

impl<'a> DirectoryLoader<'a> {
    pub fn new(
        reader: &'a (dyn Reader + 'a),
        optional_header: &'a OptionalHeader,
        sections: &'a [SectionHeader],
        options: &'a ParseOptions,
    ) -> Self {
        Self {
            reader,
            optional_header,
            sections,
            options,
        }
    }

    /// Address and size of `kind`, if the image declares it.
    pub fn locate(&self, kind: DirectoryKind) -> Option<DataDirectory> {
        match kind.data_directory() {
            Some(slot) => self.optional_header.data_directory(slot),
            None => self
                .sections
                .iter()
                .find(|s| s.name() == API_SET_SECTION)
                .map(|s| DataDirectory {
                    virtual_address: s.virtual_address,
                    size: s.virtual_size,
                })
                .filter(DataDirectory::is_present),
        }
    }

    /// Decode one directory. `Ok(None)` means the image does not declare it.
    pub fn load(&self, kind: DirectoryKind) -> Result<Option<DecodedDirectory>> {
        let Some(directory) = self.locate(kind) else {
            trace!(directory = kind.name(), "directory not present");
            return Ok(None);
        };

        let resolved = AddressResolver::new(self.sections).resolve(directory.virtual_address)?;
        let section = &self.sections[resolved.section_index];
        let context = DirectoryContext::new(
            self.reader,
            self.sections,
            self.optional_header,
            self.options,
            directory,
        );

        // The declared size sometimes exceeds the section's own extent, so
        // the span may run past the section's raw data.
        let start = resolved.offset_in_section as usize;
        let span = start
            .saturating_add(directory.size as usize)
            .max(section.backed_size() as usize);
        let buffer = self.read_section_span(&context, section, span)?;

        let start = start.min(buffer.len());
        let end = start.saturating_add(directory.size as usize).min(buffer.len());
        if end - start < directory.size as usize {
            debug!(
                directory = kind.name(),
                declared = directory.size,
                available = end - start,
                "directory window shorter than declared size"
            );
        }

        debug!(
            directory = kind.name(),
            rva = directory.virtual_address,
            size = directory.size,
            section = %section.name(),
            "decoding directory"
        );
        (kind.decoder())(&context, &buffer[start..end]).map(Some)
    }

    /// Up to `span` bytes from the start of `section`. Backed sections are read
    /// straight from the source at their raw data pointer; unbacked ones come
    /// through the virtual image as zeros.
    fn read_section_span(
        &self,
        context: &DirectoryContext<'_>,
        section: &SectionHeader,
        span: usize,
    ) -> Result<Vec<u8>> {
        let (start, available) = if section.pointer_to_raw_data == 0 {
            let start = u64::from(section.virtual_address);
            (start, Some(context.image().len().saturating_sub(start)))
        } else {
            let start = u64::from(section.pointer_to_raw_data);
            (start, self.reader.size().map(|len| len.saturating_sub(start)))
        };
        let span = match available {
            Some(available) => span.min(usize::try_from(available).unwrap_or(usize::MAX)),
            None => span,
        };

        let mut buffer = vec![0u8; span];
        let read = if section.pointer_to_raw_data == 0 {
            context.image().read_at(start, &mut buffer)?
        } else {
            self.reader.read_at(start, &mut buffer)?
        };
        buffer.truncate(read);
        Ok(buffer)
    }

    /// Decode every directory selected in the options. A directory that fails
    /// is logged, recorded as a diagnostic and left absent.
    pub fn load_all(&self) -> Directories {
        let mut directories = Directories::default();
        for &kind in &self.options.directories {
            match self.load(kind) {
                Ok(Some(decoded)) => directories.insert(decoded),
                Ok(None) => {}
                Err(err) => {
                    warn!(directory = kind.name(), error = %err, "directory skipped");
                    directories.diagnostics.push(DirectoryDiagnostic {
                        kind,
                        message: err.to_string(),
                    });
                }
            }
        }
        directories
    }
}
