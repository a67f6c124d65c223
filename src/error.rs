//! Error types for PE decoding.

use std::io;
use thiserror::Error;

/// Result type alias for diffx-pe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while decoding a PE image.
///
/// Header-region errors (stub, signature, file header, optional header,
/// section table) abort image construction. Errors raised while decoding a
/// directory are isolated to that directory and recorded as a
/// [`DirectoryDiagnostic`](crate::DirectoryDiagnostic).
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error reported by the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The input does not begin with a legacy stub ("MZ").
    ///
    /// Recoverable: the assembler falls back to reading the PE header at
    /// offset 0.
    #[error("No legacy executable stub present")]
    NotAStub,

    /// A stub is present but the bytes at its header offset are not "PE\0\0".
    #[error("Malformed PE signature (expected 'PE\\0\\0')")]
    MalformedSignature,

    /// The file header declares reversed (big-endian) byte order.
    #[error("Big-endian images are not supported (characteristics {characteristics:#06x})")]
    UnsupportedEndianness {
        /// Raw characteristics word that carried the flag.
        characteristics: u16,
    },

    /// Optional header magic is neither PE32 nor PE32+.
    #[error("Invalid optional header magic: {0:#06x}")]
    InvalidOptionalHeaderMagic(u16),

    /// No section maps the given RVA.
    #[error("RVA {0:#x} is not mapped by any section")]
    AddressNotMapped(u32),

    /// A fixed-size read ran past the end of the available bytes.
    #[error("Truncated buffer: expected {expected} bytes, got {actual}")]
    TruncatedBuffer { expected: usize, actual: usize },

    /// The resource tree is too deep or refers back to one of its ancestors.
    #[error("Malformed resource tree at offset {offset:#x} (depth {depth})")]
    MalformedResourceTree { offset: u32, depth: usize },

    /// The operation is not supported by a read-only view.
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),
}

impl Error {
    pub(crate) fn truncated(expected: usize, actual: usize) -> Self {
        Error::TruncatedBuffer { expected, actual }
    }
}
