//! Resource directory parsing.
//!
//! The resource section is a tree: directories hold named entries followed by
//! ID entries, and each entry leads either to a subdirectory or to a data
//! leaf. All offsets inside the tree are relative to the start of the resource
//! directory. The tree is decoded eagerly with an explicit depth ceiling, and
//! a directory reached twice is rejected so that cycles cannot loop.

use crate::directory::{DecodedDirectory, DirectoryContext};
use crate::image::VirtualImage;
use crate::reader::{ByteView, Reader};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use strum::{FromRepr, IntoStaticStr};
use tracing::trace;

/// Standard resource types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, IntoStaticStr)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u16)]
pub enum ResourceType {
    Cursor = 1,
    Bitmap = 2,
    Icon = 3,
    Menu = 4,
    Dialog = 5,
    String = 6,
    FontDir = 7,
    Font = 8,
    Accelerator = 9,
    RcData = 10,
    MessageTable = 11,
    #[strum(serialize = "GROUP_CURSOR")]
    GroupCursor = 12,
    #[strum(serialize = "GROUP_ICON")]
    GroupIcon = 14,
    Version = 16,
    DlgInclude = 17,
    PlugPlay = 19,
    Vxd = 20,
    AniCursor = 21,
    AniIcon = 22,
    Html = 23,
    Manifest = 24,
}

impl ResourceType {
    pub fn from_u16(value: u16) -> Option<Self> {
        Self::from_repr(value)
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

/// Resource name/ID - can be numeric or string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// Numeric ID.
    Id(u16),
    /// String name.
    Name(String),
}

impl ResourceId {
    /// Check if this is a standard resource type ID.
    pub fn as_resource_type(&self) -> Option<ResourceType> {
        match self {
            Self::Id(id) => ResourceType::from_u16(*id),
            Self::Name(_) => None,
        }
    }
}

/// IMAGE_RESOURCE_DIRECTORY - 16 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceDirectoryHeader {
    /// Resource flags (reserved, usually 0).
    pub characteristics: u32,
    /// Time/date stamp.
    pub time_date_stamp: u32,
    /// Major version.
    pub major_version: u16,
    /// Minor version.
    pub minor_version: u16,
    /// Number of named entries.
    pub number_of_named_entries: u16,
    /// Number of ID entries.
    pub number_of_id_entries: u16,
}

impl ResourceDirectoryHeader {
    pub const SIZE: usize = 16;

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            characteristics: data.u32_at(0)?,
            time_date_stamp: data.u32_at(4)?,
            major_version: data.u16_at(8)?,
            minor_version: data.u16_at(10)?,
            number_of_named_entries: data.u16_at(12)?,
            number_of_id_entries: data.u16_at(14)?,
        })
    }

    pub fn total_entries(&self) -> usize {
        self.number_of_named_entries as usize + self.number_of_id_entries as usize
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::from(self.time_date_stamp), 0)
    }
}

/// IMAGE_RESOURCE_DIRECTORY_ENTRY - 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceDirectoryEntry {
    /// Name offset (high bit set) or ID.
    pub name_or_id: u32,
    /// Offset to data or subdirectory (high bit set = subdirectory).
    pub offset_to_data: u32,
}

impl ResourceDirectoryEntry {
    pub const SIZE: usize = 8;

    const HIGH_BIT: u32 = 0x8000_0000;

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            name_or_id: data.u32_at(0)?,
            offset_to_data: data.u32_at(4)?,
        })
    }

    /// Check if this entry has a string name (vs numeric ID).
    pub fn is_named(&self) -> bool {
        self.name_or_id & Self::HIGH_BIT != 0
    }

    /// Get the name offset (only valid if is_named() is true).
    pub fn name_offset(&self) -> u32 {
        self.name_or_id & !Self::HIGH_BIT
    }

    /// Get the ID (only valid if is_named() is false).
    pub fn id(&self) -> u16 {
        self.name_or_id as u16
    }

    /// Check if this points to a subdirectory (vs data entry).
    pub fn is_directory(&self) -> bool {
        self.offset_to_data & Self::HIGH_BIT != 0
    }

    /// Get the offset to subdirectory or data entry.
    pub fn data_offset(&self) -> u32 {
        self.offset_to_data & !Self::HIGH_BIT
    }
}

/// IMAGE_RESOURCE_DATA_ENTRY - 16 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceDataEntry {
    /// RVA of the resource data.
    pub offset_to_data: u32,
    /// Size of the resource data.
    pub size: u32,
    /// Code page.
    pub code_page: u32,
    /// Reserved.
    pub reserved: u32,
}

impl ResourceDataEntry {
    pub const SIZE: usize = 16;

    pub fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self {
            offset_to_data: data.u32_at(0)?,
            size: data.u32_at(4)?,
            code_page: data.u32_at(8)?,
            reserved: data.u32_at(12)?,
        })
    }

    /// Read the payload this leaf describes.
    pub fn read<R: Reader + ?Sized>(&self, image: &VirtualImage<'_, R>) -> Result<Vec<u8>> {
        if self.size == 0 {
            return Ok(Vec::new());
        }
        image.resolver().resolve(self.offset_to_data)?;
        image.read_bytes_at(u64::from(self.offset_to_data), self.size as usize)
    }
}

/// Child of a resource directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceNode {
    Directory(Box<ResourceDirectory>),
    Data(ResourceDataEntry),
}

/// A keyed entry of a resource directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub key: ResourceId,
    pub node: ResourceNode,
}

impl ResourceEntry {
    pub fn is_directory(&self) -> bool {
        matches!(self.node, ResourceNode::Directory(_))
    }

    pub fn directory(&self) -> Option<&ResourceDirectory> {
        match &self.node {
            ResourceNode::Directory(dir) => Some(dir),
            ResourceNode::Data(_) => None,
        }
    }

    pub fn data(&self) -> Option<&ResourceDataEntry> {
        match &self.node {
            ResourceNode::Data(leaf) => Some(leaf),
            ResourceNode::Directory(_) => None,
        }
    }
}

/// A data leaf together with the keys leading to it from the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLeaf<'a> {
    pub path: Vec<&'a ResourceId>,
    pub data: &'a ResourceDataEntry,
}

impl ResourceLeaf<'_> {
    /// Type of the resource, from the first key when it is a standard ID.
    pub fn resource_type(&self) -> Option<ResourceType> {
        self.path.first().and_then(|key| key.as_resource_type())
    }
}

/// One level of the resource tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDirectory {
    pub header: ResourceDirectoryHeader,
    /// Entries keyed by UTF-16 name, in table order.
    pub named_entries: Vec<ResourceEntry>,
    /// Entries keyed by 16-bit ID, in table order.
    pub id_entries: Vec<ResourceEntry>,
}

pub(crate) fn decode(ctx: &DirectoryContext<'_>, window: &[u8]) -> Result<DecodedDirectory> {
    ResourceDirectory::decode(ctx, window).map(DecodedDirectory::Resource)
}

impl ResourceDirectory {
    /// Decode the whole tree rooted at the directory RVA.
    pub fn decode(ctx: &DirectoryContext<'_>, window: &[u8]) -> Result<Self> {
        TreeDecoder {
            ctx,
            window,
            max_depth: ctx.options.max_resource_depth,
            visited: HashSet::new(),
        }
        .directory(0, 0)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.named_entries.iter().chain(&self.id_entries)
    }

    pub fn id_entry(&self, id: u16) -> Option<&ResourceEntry> {
        self.id_entries.iter().find(|e| e.key == ResourceId::Id(id))
    }

    pub fn named_entry(&self, name: &str) -> Option<&ResourceEntry> {
        self.named_entries
            .iter()
            .find(|e| matches!(&e.key, ResourceId::Name(n) if n == name))
    }

    /// Every data leaf in the tree, depth first, named entries before IDs.
    pub fn leaves(&self) -> Vec<ResourceLeaf<'_>> {
        let mut out = Vec::new();
        let mut path = Vec::new();
        self.collect_leaves(&mut path, &mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, path: &mut Vec<&'a ResourceId>, out: &mut Vec<ResourceLeaf<'a>>) {
        for entry in self.entries() {
            path.push(&entry.key);
            match &entry.node {
                ResourceNode::Directory(dir) => dir.collect_leaves(path, out),
                ResourceNode::Data(data) => out.push(ResourceLeaf {
                    path: path.clone(),
                    data,
                }),
            }
            path.pop();
        }
    }

    /// Leaves under a standard type.
    pub fn find_by_type(&self, rt: ResourceType) -> Vec<ResourceLeaf<'_>> {
        self.leaves()
            .into_iter()
            .filter(|leaf| leaf.resource_type() == Some(rt))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.named_entries.is_empty() && self.id_entries.is_empty()
    }
}

struct TreeDecoder<'c, 'w> {
    ctx: &'c DirectoryContext<'c>,
    window: &'w [u8],
    max_depth: usize,
    visited: HashSet<u32>,
}

impl TreeDecoder<'_, '_> {
    fn rva(&self, offset: u32) -> u32 {
        self.ctx.rva.wrapping_add(offset)
    }

    fn directory(&mut self, offset: u32, depth: usize) -> Result<ResourceDirectory> {
        if depth >= self.max_depth || !self.visited.insert(offset) {
            return Err(Error::MalformedResourceTree { offset, depth });
        }
        trace!(offset, depth, "resource directory");

        let header = ResourceDirectoryHeader::parse(&self.ctx.bytes_at(
            self.window,
            self.rva(offset),
            ResourceDirectoryHeader::SIZE,
        )?)?;

        let table_offset = offset.wrapping_add(ResourceDirectoryHeader::SIZE as u32);
        let table = self.ctx.bytes_at(
            self.window,
            self.rva(table_offset),
            header.total_entries() * ResourceDirectoryEntry::SIZE,
        )?;

        let mut named_entries = Vec::with_capacity(header.number_of_named_entries as usize);
        let mut id_entries = Vec::with_capacity(header.number_of_id_entries as usize);
        for (i, raw) in table.chunks_exact(ResourceDirectoryEntry::SIZE).enumerate() {
            let raw = ResourceDirectoryEntry::parse(raw)?;
            let entry = self.entry(&raw, depth)?;
            if i < header.number_of_named_entries as usize {
                named_entries.push(entry);
            } else {
                id_entries.push(entry);
            }
        }

        Ok(ResourceDirectory {
            header,
            named_entries,
            id_entries,
        })
    }

    fn entry(&mut self, raw: &ResourceDirectoryEntry, depth: usize) -> Result<ResourceEntry> {
        let key = if raw.is_named() {
            ResourceId::Name(self.name(raw.name_offset())?)
        } else {
            ResourceId::Id(raw.id())
        };

        let node = if raw.is_directory() {
            ResourceNode::Directory(Box::new(self.directory(raw.data_offset(), depth + 1)?))
        } else {
            let bytes = self
                .ctx
                .bytes_at(self.window, self.rva(raw.data_offset()), ResourceDataEntry::SIZE)?;
            ResourceNode::Data(ResourceDataEntry::parse(&bytes)?)
        };

        Ok(ResourceEntry { key, node })
    }

    /// Length-prefixed UTF-16 string.
    fn name(&self, offset: u32) -> Result<String> {
        let rva = self.rva(offset);
        let units = usize::from(self.ctx.u16_at(self.window, rva)?);
        let bytes = self.ctx.bytes_at(self.window, rva.wrapping_add(2), units * 2)?;
        bytes.utf16_at(0, units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_dir::DataDirectory;
    use crate::optional::{OptionalHeader, PE32_MAGIC};
    use crate::options::ParseOptions;
    use crate::reader::SliceReader;
    use crate::section::{SectionFlags, SectionHeader};

    const RSRC_RVA: u32 = 0x4000;
    const RAW: usize = 0x600;

    /// Little builder for resource trees laid out at fixed offsets.
    struct Tree(Vec<u8>);

    impl Tree {
        fn new() -> Self {
            Tree(vec![0u8; 0x200])
        }

        fn dir(&mut self, at: usize, named: u16, ids: u16, entries: &[(u32, u32)]) {
            self.0[at + 12..at + 14].copy_from_slice(&named.to_le_bytes());
            self.0[at + 14..at + 16].copy_from_slice(&ids.to_le_bytes());
            for (i, (name, target)) in entries.iter().enumerate() {
                let e = at + 16 + i * 8;
                self.0[e..e + 4].copy_from_slice(&name.to_le_bytes());
                self.0[e + 4..e + 8].copy_from_slice(&target.to_le_bytes());
            }
        }

        fn leaf(&mut self, at: usize, rva: u32, size: u32, code_page: u32) {
            for (i, value) in [rva, size, code_page, 0].iter().enumerate() {
                self.0[at + i * 4..at + i * 4 + 4].copy_from_slice(&value.to_le_bytes());
            }
        }

        fn name(&mut self, at: usize, text: &str) {
            let units: Vec<u16> = text.encode_utf16().collect();
            self.0[at..at + 2].copy_from_slice(&(units.len() as u16).to_le_bytes());
            for (i, unit) in units.iter().enumerate() {
                self.0[at + 2 + i * 2..at + 4 + i * 2].copy_from_slice(&unit.to_le_bytes());
            }
        }
    }

    fn decode_with(tree: &Tree, options: &ParseOptions) -> Result<ResourceDirectory> {
        let mut data = vec![0u8; RAW];
        data.extend_from_slice(&tree.0);
        let sections = [SectionHeader {
            name: *b".rsrc\0\0\0",
            virtual_size: 0x200,
            virtual_address: RSRC_RVA,
            size_of_raw_data: 0x200,
            pointer_to_raw_data: RAW as u32,
            pointer_to_relocations: 0,
            pointer_to_linenumbers: 0,
            number_of_relocations: 0,
            number_of_linenumbers: 0,
            characteristics: SectionFlags::READ,
        }];
        let mut header = vec![0u8; 96];
        header[0..2].copy_from_slice(&PE32_MAGIC.to_le_bytes());
        let header = OptionalHeader::parse(&header).unwrap();
        let reader = SliceReader::new(&data);
        let directory = DataDirectory { virtual_address: RSRC_RVA, size: 0x200 };
        let ctx = DirectoryContext::new(&reader, &sections, &header, options, directory);
        ResourceDirectory::decode(&ctx, &data[RAW..])
    }

    /// RT_STRING -> id 1 -> language 0x409 -> leaf, plus a named "PNG"
    /// type -> id 7 -> language 0 -> leaf.
    fn sample() -> Tree {
        let mut tree = Tree::new();
        tree.dir(0x00, 1, 1, &[(0x8000_0180, 0x8000_0020), (6, 0x8000_0040)]);
        tree.dir(0x20, 0, 1, &[(7, 0x8000_0060)]);
        tree.dir(0x40, 0, 1, &[(1, 0x8000_0080)]);
        tree.dir(0x60, 0, 1, &[(0, 0xC0)]);
        tree.dir(0x80, 0, 1, &[(0x409, 0xD0)]);
        tree.leaf(0xC0, 0x4100, 0x10, 0);
        tree.leaf(0xD0, 0x4110, 0x24, 1252);
        tree.name(0x180, "PNG");
        tree
    }

    #[test]
    fn test_decode_tree() {
        let root = decode_with(&sample(), &ParseOptions::default()).unwrap();
        assert_eq!(root.named_entries.len(), 1);
        assert_eq!(root.id_entries.len(), 1);

        let strings = root.id_entry(6).unwrap();
        assert!(strings.is_directory());
        let language = strings.directory().unwrap().id_entry(1).unwrap().directory().unwrap();
        let leaf_entry = language.id_entry(0x409).unwrap();
        assert!(!leaf_entry.is_directory());
        let leaf = leaf_entry.data().unwrap();
        assert_eq!(leaf.offset_to_data, 0x4110);
        assert_eq!(leaf.size, 0x24);
        assert_eq!(leaf.code_page, 1252);

        let png = root.named_entry("PNG").unwrap();
        assert_eq!(png.key, ResourceId::Name("PNG".into()));
        assert!(root.named_entry("png").is_none());
    }

    #[test]
    fn test_leaves_and_types() {
        let root = decode_with(&sample(), &ParseOptions::default()).unwrap();
        let leaves = root.leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(
            leaves[0].path,
            vec![&ResourceId::Name("PNG".into()), &ResourceId::Id(7), &ResourceId::Id(0)]
        );
        assert_eq!(leaves[0].resource_type(), None);

        let strings = root.find_by_type(ResourceType::String);
        assert_eq!(strings.len(), 1);
        assert_eq!(strings[0].data.size, 0x24);
        assert_eq!(ResourceType::String.name(), "STRING");
        assert_eq!(ResourceType::GroupIcon.name(), "GROUP_ICON");
        assert_eq!(ResourceType::RcData.name(), "RCDATA");
        assert_eq!(ResourceType::from_u16(24), Some(ResourceType::Manifest));
        assert_eq!(ResourceType::from_u16(13), None);
    }

    #[test]
    fn test_unpaired_surrogate_name_keeps_tree() {
        let mut tree = Tree::new();
        tree.dir(0x00, 1, 1, &[(0x8000_0180, 0xC0), (6, 0xD0)]);
        tree.leaf(0xC0, 0x4100, 0x10, 0);
        tree.leaf(0xD0, 0x4110, 0x24, 1252);
        tree.0[0x180..0x182].copy_from_slice(&1u16.to_le_bytes());
        tree.0[0x182..0x184].copy_from_slice(&0xD800u16.to_le_bytes());

        let root = decode_with(&tree, &ParseOptions::default()).unwrap();
        assert_eq!(root.named_entries[0].key, ResourceId::Name("\u{FFFD}".into()));
        let strings = root.find_by_type(ResourceType::String);
        assert_eq!(strings.len(), 1);
        assert_eq!(strings[0].data.size, 0x24);
    }

    #[test]
    fn test_cycle_rejected() {
        let mut tree = Tree::new();
        tree.dir(0x00, 0, 1, &[(3, 0x8000_0020)]);
        tree.dir(0x20, 0, 1, &[(1, 0x8000_0000)]);
        assert!(matches!(
            decode_with(&tree, &ParseOptions::default()),
            Err(Error::MalformedResourceTree { offset: 0, depth: 2 })
        ));
    }

    #[test]
    fn test_self_reference_rejected() {
        let mut tree = Tree::new();
        tree.dir(0x00, 0, 1, &[(3, 0x8000_0000)]);
        assert!(matches!(
            decode_with(&tree, &ParseOptions::default()),
            Err(Error::MalformedResourceTree { offset: 0, depth: 1 })
        ));
    }

    #[test]
    fn test_depth_ceiling() {
        let tree = sample();
        let shallow = ParseOptions::default().with_max_resource_depth(2);
        assert!(matches!(
            decode_with(&tree, &shallow),
            Err(Error::MalformedResourceTree { depth: 2, .. })
        ));
        let exact = ParseOptions::default().with_max_resource_depth(3);
        assert!(decode_with(&tree, &exact).is_ok());
    }

    #[test]
    fn test_truncated_entry_table() {
        let mut tree = Tree::new();
        // Claims more entries than the section holds.
        tree.dir(0x00, 0, 0x100, &[]);
        assert!(matches!(
            decode_with(&tree, &ParseOptions::default()),
            Err(Error::TruncatedBuffer { .. })
        ));
    }
}
