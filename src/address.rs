//! RVA ↔ file offset translation over a section table.
//!
//! The table may contain gaps, overlapping ranges and sections whose virtual
//! size differs from their raw size. When ranges overlap, the first section in
//! table order owns the address.

use crate::section::SectionHeader;
use crate::{Error, Result};

/// Result of resolving an RVA against the section table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAddress {
    /// Index of the owning section in table order.
    pub section_index: usize,
    /// Distance of the RVA from the section's virtual address.
    pub offset_in_section: u32,
    /// `rva - virtual_address + pointer_to_raw_data`. Pure address math:
    /// it may point past the section's raw data or into an unbacked section.
    pub file_offset: u64,
}

/// Section-table address resolver.
#[derive(Debug, Clone, Copy)]
pub struct AddressResolver<'a> {
    sections: &'a [SectionHeader],
}

impl<'a> AddressResolver<'a> {
    pub fn new(sections: &'a [SectionHeader]) -> Self {
        Self { sections }
    }

    pub fn sections(&self) -> &'a [SectionHeader] {
        self.sections
    }

    /// Find the section owning `rva` and compute its file offset.
    pub fn resolve(&self, rva: u32) -> Result<ResolvedAddress> {
        let (section_index, section) = self
            .sections
            .iter()
            .enumerate()
            .find(|(_, s)| s.contains_rva(rva))
            .ok_or(Error::AddressNotMapped(rva))?;

        let offset_in_section = rva - section.virtual_address;
        Ok(ResolvedAddress {
            section_index,
            offset_in_section,
            file_offset: u64::from(section.pointer_to_raw_data) + u64::from(offset_in_section),
        })
    }

    /// The section owning `rva`, if any.
    pub fn section_for(&self, rva: u32) -> Option<&'a SectionHeader> {
        self.sections.iter().find(|s| s.contains_rva(rva))
    }

    /// File offset of `rva`, only when the byte actually comes from the file.
    pub fn backed_offset(&self, rva: u32) -> Option<u64> {
        let resolved = self.resolve(rva).ok()?;
        let section = &self.sections[resolved.section_index];
        (resolved.offset_in_section < section.backed_size()).then_some(resolved.file_offset)
    }

    /// File offset of `rva`, clamped to the last byte of the owning section's
    /// raw window when the virtual size exceeds the raw size.
    pub fn clamped_offset(&self, rva: u32) -> Result<u64> {
        let resolved = self.resolve(rva)?;
        let section = &self.sections[resolved.section_index];
        let last = section.size_of_raw_data.saturating_sub(1);
        Ok(u64::from(section.pointer_to_raw_data) + u64::from(resolved.offset_in_section.min(last)))
    }

    /// Reverse mapping: the RVA whose bytes live at file `offset`.
    pub fn file_offset_to_rva(&self, offset: u64) -> Option<u32> {
        self.sections.iter().find_map(|section| {
            let start = u64::from(section.pointer_to_raw_data);
            let backed = u64::from(section.backed_size());
            if section.pointer_to_raw_data != 0 && offset >= start && offset < start + backed {
                u32::try_from(offset - start)
                    .ok()
                    .and_then(|delta| section.virtual_address.checked_add(delta))
            } else {
                None
            }
        })
    }

    /// Length of the mapped image: the highest section end.
    pub fn image_len(&self) -> u64 {
        self.sections
            .iter()
            .map(SectionHeader::virtual_end)
            .max()
            .unwrap_or(0)
    }
}
