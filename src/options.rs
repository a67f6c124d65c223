//! Decoder limits and directory selection.

use crate::directory::DirectoryKind;

/// Options controlling how much of an image is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Deepest resource directory level that will be entered.
    pub max_resource_depth: usize,
    /// Longest zero-terminated ASCII string that will be scanned.
    pub max_string_length: usize,
    /// Cap on export functions/names, import descriptors and thunks per table.
    pub max_table_entries: usize,
    /// Directories to decode, in decode order.
    pub directories: Vec<DirectoryKind>,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            max_resource_depth: 32,
            max_string_length: 256,
            max_table_entries: 65_536,
            directories: DirectoryKind::ALL.to_vec(),
        }
    }
}

impl ParseOptions {
    /// Decode headers and the section table only.
    pub fn headers_only() -> Self {
        Self {
            directories: Vec::new(),
            ..Self::default()
        }
    }

    pub fn with_max_resource_depth(mut self, depth: usize) -> Self {
        self.max_resource_depth = depth;
        self
    }

    pub fn with_max_string_length(mut self, len: usize) -> Self {
        self.max_string_length = len;
        self
    }

    pub fn with_max_table_entries(mut self, count: usize) -> Self {
        self.max_table_entries = count;
        self
    }

    pub fn with_directories(mut self, directories: impl IntoIterator<Item = DirectoryKind>) -> Self {
        self.directories = directories.into_iter().collect();
        self
    }

    pub fn decodes(&self, kind: DirectoryKind) -> bool {
        self.directories.contains(&kind)
    }
}
