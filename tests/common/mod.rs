//! Synthetic image construction shared by the integration tests.

#![allow(dead_code)]

use diffx_pe::DataDirectoryType;
use tracing_subscriber::EnvFilter;

/// Route decoder logs to the test harness. Set `RUST_LOG=diffx_pe=trace` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Growable little-endian byte buffer.
#[derive(Debug, Clone, Default)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, at: usize, bytes: &[u8]) -> &mut Self {
        if self.0.len() < at + bytes.len() {
            self.0.resize(at + bytes.len(), 0);
        }
        self.0[at..at + bytes.len()].copy_from_slice(bytes);
        self
    }

    pub fn u16(&mut self, at: usize, value: u16) -> &mut Self {
        self.put(at, &value.to_le_bytes())
    }

    pub fn u32(&mut self, at: usize, value: u32) -> &mut Self {
        self.put(at, &value.to_le_bytes())
    }

    pub fn u64(&mut self, at: usize, value: u64) -> &mut Self {
        self.put(at, &value.to_le_bytes())
    }

    /// Zero-terminated ASCII.
    pub fn cstr(&mut self, at: usize, text: &str) -> &mut Self {
        self.put(at, text.as_bytes()).put(at + text.len(), &[0])
    }

    /// UTF-16LE without terminator; returns the byte length written.
    pub fn wide(&mut self, at: usize, text: &str) -> u32 {
        let mut len = 0;
        for unit in text.encode_utf16() {
            self.u16(at + len, unit);
            len += 2;
        }
        len as u32
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }
}

struct Section {
    name: &'static str,
    rva: u32,
    virtual_size: u32,
    data: Vec<u8>,
}

const FILE_ALIGNMENT: usize = 0x200;

fn align(value: usize) -> usize {
    value.div_ceil(FILE_ALIGNMENT) * FILE_ALIGNMENT
}

/// Lays out headers, section table and raw section data at file alignment.
pub struct ImageBuilder {
    stub: bool,
    signature: [u8; 4],
    pe32_plus: bool,
    characteristics: u16,
    sections: Vec<Section>,
    directories: [(u32, u32); 16],
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    /// PE32 executable with a stub.
    pub fn new() -> Self {
        Self {
            stub: true,
            signature: *b"PE\0\0",
            pe32_plus: false,
            characteristics: 0x0102,
            sections: Vec::new(),
            directories: [(0, 0); 16],
        }
    }

    pub fn without_stub(mut self) -> Self {
        self.stub = false;
        self
    }

    pub fn signature(mut self, signature: &[u8; 4]) -> Self {
        self.signature = *signature;
        self
    }

    pub fn pe32_plus(mut self) -> Self {
        self.pe32_plus = true;
        self
    }

    pub fn characteristics(mut self, characteristics: u16) -> Self {
        self.characteristics = characteristics;
        self
    }

    /// Add a section whose virtual size equals its data length.
    pub fn section(self, name: &'static str, rva: u32, data: Vec<u8>) -> Self {
        let size = data.len() as u32;
        self.section_sized(name, rva, size, data)
    }

    pub fn section_sized(mut self, name: &'static str, rva: u32, virtual_size: u32, data: Vec<u8>) -> Self {
        self.sections.push(Section {
            name,
            rva,
            virtual_size,
            data,
        });
        self
    }

    pub fn directory(mut self, kind: DataDirectoryType, rva: u32, size: u32) -> Self {
        self.directories[kind.as_index()] = (rva, size);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut image = Blob::new();
        let coff = if self.stub {
            image.put(0, b"MZ").u32(0x3C, 0x80).put(0x80, &self.signature);
            0x84
        } else {
            0
        };

        let base = if self.pe32_plus { 112 } else { 96 };
        let optional_size = base + self.directories.len() * 8;
        let table = coff + 20 + optional_size;
        let headers_end = align(table + self.sections.len() * 40);

        let machine = if self.pe32_plus { 0x8664 } else { 0x014C };
        image
            .u16(coff, machine)
            .u16(coff + 2, self.sections.len() as u16)
            .u32(coff + 4, 0x5F5E_1000)
            .u16(coff + 16, optional_size as u16)
            .u16(coff + 18, self.characteristics);

        let opt = coff + 20;
        let image_size = self
            .sections
            .iter()
            .map(|s| s.rva + s.virtual_size)
            .max()
            .unwrap_or(0x1000);
        image
            .u16(opt, if self.pe32_plus { 0x20B } else { 0x10B })
            .u32(opt + 16, 0x1000)
            .u32(opt + 32, 0x1000)
            .u32(opt + 36, FILE_ALIGNMENT as u32)
            .u32(opt + 56, image_size)
            .u32(opt + 60, headers_end as u32)
            .u16(opt + 68, 3);
        if self.pe32_plus {
            image.u64(opt + 24, 0x1_4000_0000).u32(opt + 108, 16);
        } else {
            image.u32(opt + 28, 0x40_0000).u32(opt + 92, 16);
        }
        for (i, (rva, size)) in self.directories.iter().enumerate() {
            image.u32(opt + base + i * 8, *rva).u32(opt + base + i * 8 + 4, *size);
        }

        let mut raw = headers_end;
        for (i, section) in self.sections.iter().enumerate() {
            let at = table + i * 40;
            let raw_size = align(section.data.len());
            image
                .put(at, section.name.as_bytes())
                .u32(at + 8, section.virtual_size)
                .u32(at + 12, section.rva)
                .u32(at + 16, raw_size as u32)
                .u32(at + 20, if raw_size == 0 { 0 } else { raw as u32 })
                .u32(at + 36, 0x4000_0040);
            if raw_size != 0 {
                image.put(raw + raw_size - 1, &[0]).put(raw, &section.data);
                raw += raw_size;
            }
        }
        if image.0.len() < headers_end {
            image.0.resize(headers_end, 0);
        }
        image.into_vec()
    }
}

/// `.rdata` contents at `rva`: export directory for `test.dll` with base 1,
/// `Foo` at `0x1010` and `Fwd` forwarded to `NTDLL.RtlAllocateHeap`.
/// Returns the data and the directory size.
pub fn export_section(rva: u32) -> (Vec<u8>, u32) {
    let mut data = Blob::new();
    data.u32(12, rva + 0x70) // name
        .u32(16, 1) // base
        .u32(20, 2)
        .u32(24, 2)
        .u32(28, rva + 0x40)
        .u32(32, rva + 0x50)
        .u32(36, rva + 0x60);
    data.u32(0x40, 0x1010).u32(0x44, rva + 0xA0);
    data.u32(0x50, rva + 0x80).u32(0x54, rva + 0x90);
    data.u16(0x60, 0).u16(0x62, 1);
    data.cstr(0x70, "test.dll")
        .cstr(0x80, "Foo")
        .cstr(0x90, "Fwd")
        .cstr(0xA0, "NTDLL.RtlAllocateHeap");
    data.put(0xFF, &[0]);
    (data.into_vec(), 0xC0)
}

/// Offset of the payload inside `resource_section`.
pub const RESOURCE_PAYLOAD: u32 = 0x60;

/// `.rsrc` contents at `rva`: type 6, name 1, language 0x409, with an
/// eight-byte payload. Returns the data and the directory size.
pub fn resource_section(rva: u32, payload: &[u8; 8]) -> (Vec<u8>, u32) {
    let mut data = Blob::new();
    // Three single-entry directory levels, then the data entry.
    for (level, id) in [6u32, 1, 0x409].iter().enumerate() {
        let at = level * 0x18;
        data.u16(at + 14, 1).u32(at + 16, *id);
        if level < 2 {
            data.u32(at + 20, 0x8000_0000 | (at as u32 + 0x18));
        } else {
            data.u32(at + 20, 0x48);
        }
    }
    data.u32(0x48, rva + RESOURCE_PAYLOAD).u32(0x4C, 8).u32(0x50, 1252);
    data.put(RESOURCE_PAYLOAD as usize, payload);
    (data.into_vec(), 0x68)
}

/// `.idata` contents at `rva` for a PE32+ image: `KERNEL32.dll` imported by
/// name (`ExitProcess`, hint 0x100) and by ordinal 16. The directory covers
/// only the descriptor array.
pub fn import_section(rva: u32) -> (Vec<u8>, u32) {
    let mut data = Blob::new();
    data.u32(0, rva + 0x40).u32(12, rva + 0x80).u32(16, rva + 0x40);
    data.u64(0x40, u64::from(rva + 0x90))
        .u64(0x48, 0x8000_0000_0000_0010)
        .u64(0x50, 0);
    data.cstr(0x80, "KERNEL32.dll");
    data.u16(0x90, 0x100).cstr(0x92, "ExitProcess");
    data.put(0xBF, &[0]);
    (data.into_vec(), 40)
}

/// API set schema with one namespace per `(name, targets)` pair.
pub fn api_set_schema(entries: &[(&str, &[&str])], factor: u32) -> Vec<u8> {
    let mut data = Blob::new();
    let count = entries.len() as u32;
    let entry_offset = 0x20usize;
    let hash_offset = entry_offset + entries.len() * 24;
    let mut values = hash_offset + entries.len() * 8;
    let mut strings = values + entries.iter().map(|(_, t)| t.len()).sum::<usize>() * 20;

    data.u32(0, 6).u32(8, 0).u32(12, count);
    data.u32(16, entry_offset as u32)
        .u32(20, hash_offset as u32)
        .u32(24, factor);

    let mut hashes = Vec::new();
    for (i, (name, targets)) in entries.iter().enumerate() {
        let name_len = data.wide(strings, name);
        let at = entry_offset + i * 24;
        data.u32(at, 1)
            .u32(at + 4, strings as u32)
            .u32(at + 8, name_len)
            .u32(at + 16, values as u32)
            .u32(at + 20, targets.len() as u32);
        strings += name_len as usize;

        for target in *targets {
            let len = data.wide(strings, target);
            data.u32(values + 12, strings as u32).u32(values + 16, len);
            strings += len as usize;
            values += 20;
        }
        hashes.push((diffx_pe::hash_name(name, factor), i as u32));
    }
    hashes.sort();
    for (i, (hash, index)) in hashes.iter().enumerate() {
        data.u32(hash_offset + i * 8, *hash)
            .u32(hash_offset + i * 8 + 4, *index);
    }
    let size = data.0.len() as u32;
    data.u32(4, size);
    data.into_vec()
}
