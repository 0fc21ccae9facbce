//! Shared helpers for building synthetic PE images in integration tests.

#![allow(dead_code)]

use pescope::pe::types::{SCN_CNT_CODE, SCN_MEM_EXECUTE, SCN_MEM_READ};

pub const HEADERS_SIZE: usize = 0x400;
pub const FILE_ALIGNMENT: usize = 0x200;
pub const SECTION_ALIGNMENT: u32 = 0x1000;

const E_LFANEW: usize = 0x80;
const OPT_OFFSET: usize = E_LFANEW + 24;
const OPT_SIZE: u16 = 0xE0;
const SECTION_HEADERS_OFFSET: usize = OPT_OFFSET + OPT_SIZE as usize;

pub fn put_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

pub fn put_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

struct SectionSpec {
    name: String,
    data: Vec<u8>,
    characteristics: u32,
}

/// Builds a minimal but well-formed PE32 image: DOS header, PE headers at
/// 0x80, a 0xE0-byte optional header, and caller-defined sections laid out
/// at ascending virtual addresses.
pub struct PeBuilder {
    sections: Vec<SectionSpec>,
    resource_section: Option<usize>,
    directories: Vec<(usize, u32, u32)>,
}

impl PeBuilder {
    pub fn new() -> Self {
        Self {
            sections: Vec::new(),
            resource_section: None,
            directories: Vec::new(),
        }
    }

    /// Points the data directory at `index` to `(rva, size)`.
    pub fn directory(mut self, index: usize, rva: u32, size: u32) -> Self {
        self.directories.push((index, rva, size));
        self
    }

    pub fn section(mut self, name: &str, data: Vec<u8>, characteristics: u32) -> Self {
        self.sections.push(SectionSpec {
            name: name.to_string(),
            data,
            characteristics,
        });
        self
    }

    pub fn text_section(self, data: Vec<u8>) -> Self {
        self.section(".text", data, SCN_MEM_READ | SCN_MEM_EXECUTE | SCN_CNT_CODE)
    }

    /// Adds `.rsrc` holding `blob` and points the resource data directory
    /// at it.
    pub fn resource_section(mut self, blob: Vec<u8>) -> Self {
        self.resource_section = Some(self.sections.len());
        self.sections.push(SectionSpec {
            name: ".rsrc".to_string(),
            data: blob,
            characteristics: SCN_MEM_READ,
        });
        self
    }

    /// Virtual address the section at `index` will be laid out at.
    pub fn section_va(&self, index: usize) -> u32 {
        let mut va = SECTION_ALIGNMENT;
        for section in self.sections.iter().take(index) {
            va += align_up(section.data.len().max(1), SECTION_ALIGNMENT as usize) as u32;
        }
        va
    }

    pub fn build(self) -> Vec<u8> {
        assert!(self.sections.len() <= 16, "section headers overflow the header area");

        // Layout pass.
        let mut raw_offset = HEADERS_SIZE;
        let mut layouts = Vec::new();
        for (i, section) in self.sections.iter().enumerate() {
            let raw_size = align_up(section.data.len().max(1), FILE_ALIGNMENT);
            layouts.push((self.section_va(i), raw_offset, raw_size));
            raw_offset += raw_size;
        }
        let total = raw_offset;
        let size_of_image = layouts
            .last()
            .map(|&(va, _, _)| va)
            .unwrap_or(SECTION_ALIGNMENT)
            + SECTION_ALIGNMENT;

        let mut data = vec![0u8; total];
        data[0] = 0x4D;
        data[1] = 0x5A;
        put_u32(&mut data, 60, E_LFANEW as u32);

        data[E_LFANEW..E_LFANEW + 4].copy_from_slice(b"PE\0\0");
        put_u16(&mut data, E_LFANEW + 4, 0x014C); // x86
        put_u16(&mut data, E_LFANEW + 6, self.sections.len() as u16);
        put_u16(&mut data, E_LFANEW + 20, OPT_SIZE);

        put_u16(&mut data, OPT_OFFSET, 0x010B); // PE32
        put_u32(&mut data, OPT_OFFSET + 16, SECTION_ALIGNMENT); // entry point
        put_u32(&mut data, OPT_OFFSET + 28, 0x0040_0000); // image base
        put_u32(&mut data, OPT_OFFSET + 32, SECTION_ALIGNMENT);
        put_u32(&mut data, OPT_OFFSET + 36, FILE_ALIGNMENT as u32);
        put_u32(&mut data, OPT_OFFSET + 56, size_of_image);
        put_u32(&mut data, OPT_OFFSET + 60, HEADERS_SIZE as u32);
        put_u16(&mut data, OPT_OFFSET + 68, 2); // Windows GUI
        put_u32(&mut data, OPT_OFFSET + 92, 16); // directory count

        // Data directories at the end of the optional header.
        let dir_offset = OPT_OFFSET + 96;
        if let Some(index) = self.resource_section {
            put_u32(&mut data, dir_offset + 2 * 8, self.section_va(index));
            put_u32(
                &mut data,
                dir_offset + 2 * 8 + 4,
                self.sections[index].data.len() as u32,
            );
        }
        for &(index, rva, size) in &self.directories {
            put_u32(&mut data, dir_offset + index * 8, rva);
            put_u32(&mut data, dir_offset + index * 8 + 4, size);
        }

        for (i, (section, &(va, raw, raw_size))) in
            self.sections.iter().zip(layouts.iter()).enumerate()
        {
            let at = SECTION_HEADERS_OFFSET + i * 40;
            let name_len = section.name.len().min(8);
            data[at..at + name_len].copy_from_slice(&section.name.as_bytes()[..name_len]);
            put_u32(&mut data, at + 8, section.data.len().max(1) as u32); // virtual size
            put_u32(&mut data, at + 12, va);
            put_u32(&mut data, at + 16, raw_size as u32);
            put_u32(&mut data, at + 20, raw as u32);
            put_u32(&mut data, at + 36, section.characteristics);

            data[raw..raw + section.data.len()].copy_from_slice(&section.data);
        }

        data
    }
}

impl Default for PeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One resource leaf for [`resources_blob`].
pub struct ResourceSpec {
    pub type_id: u32,
    pub name_id: u32,
    pub language: u32,
    pub data: Vec<u8>,
}

/// Builds a three-level resource directory blob: one Type entry per spec,
/// each with a single Name and Language child. `section_va` is the virtual
/// address the blob's section will be mapped at, used for the leaf data
/// RVAs.
pub fn resources_blob(specs: &[ResourceSpec], section_va: u32) -> Vec<u8> {
    let n = specs.len();
    let root_size = 16 + 8 * n;
    let per_spec = 24 + 24 + 16; // name dir, language dir, data entry
    let data_start = root_size + per_spec * n;

    let mut data_offsets = Vec::new();
    let mut total = data_start;
    for spec in specs {
        total = align_up(total, 4);
        data_offsets.push(total);
        total += spec.data.len();
    }

    let mut blob = vec![0u8; total];
    put_u16(&mut blob, 14, n as u16); // root: n id entries

    for (i, spec) in specs.iter().enumerate() {
        let name_dir = root_size + i * per_spec;
        let lang_dir = name_dir + 24;
        let data_entry = lang_dir + 24;

        // Root entry -> name directory.
        put_u32(&mut blob, 16 + i * 8, spec.type_id);
        put_u32(&mut blob, 16 + i * 8 + 4, name_dir as u32 | 0x8000_0000);

        // Name directory -> language directory.
        put_u16(&mut blob, name_dir + 14, 1);
        put_u32(&mut blob, name_dir + 16, spec.name_id);
        put_u32(&mut blob, name_dir + 20, lang_dir as u32 | 0x8000_0000);

        // Language directory -> data entry.
        put_u16(&mut blob, lang_dir + 14, 1);
        put_u32(&mut blob, lang_dir + 16, spec.language);
        put_u32(&mut blob, lang_dir + 20, data_entry as u32);

        put_u32(&mut blob, data_entry, section_va + data_offsets[i] as u32);
        put_u32(&mut blob, data_entry + 4, spec.data.len() as u32);

        blob[data_offsets[i]..data_offsets[i] + spec.data.len()].copy_from_slice(&spec.data);
    }

    blob
}

/// One import thunk for [`imports_blob`].
pub enum ThunkSpec {
    Name(u16, String),
    Ordinal(u16),
}

/// One imported library for [`imports_blob`].
pub struct ImportSpec {
    pub dll: String,
    pub thunks: Vec<ThunkSpec>,
}

/// Builds an import directory blob (PE32 layout): a null-terminated
/// 20-byte descriptor array followed by thunk tables, hint/name entries,
/// and library name strings. `section_va` is the virtual address the
/// blob's section will be mapped at.
pub fn imports_blob(specs: &[ImportSpec], section_va: u32) -> Vec<u8> {
    import_blob(specs, section_va, false)
}

/// Same as [`imports_blob`] but emits 32-byte delay-load descriptors.
pub fn delay_imports_blob(specs: &[ImportSpec], section_va: u32) -> Vec<u8> {
    import_blob(specs, section_va, true)
}

fn import_blob(specs: &[ImportSpec], section_va: u32, delay: bool) -> Vec<u8> {
    let desc_size = if delay { 32 } else { 20 };
    let mut blob = vec![0u8; (specs.len() + 1) * desc_size];

    for (i, spec) in specs.iter().enumerate() {
        while blob.len() % 4 != 0 {
            blob.push(0);
        }
        let thunk_at = blob.len();
        for thunk in &spec.thunks {
            let value = match thunk {
                ThunkSpec::Ordinal(ordinal) => 0x8000_0000 | u32::from(*ordinal),
                ThunkSpec::Name(..) => 0, // patched below
            };
            blob.extend_from_slice(&value.to_le_bytes());
        }
        blob.extend_from_slice(&0u32.to_le_bytes());

        for (j, thunk) in spec.thunks.iter().enumerate() {
            let ThunkSpec::Name(hint, name) = thunk else {
                continue;
            };
            let entry_at = blob.len();
            blob.extend_from_slice(&hint.to_le_bytes());
            blob.extend_from_slice(name.as_bytes());
            blob.push(0);
            put_u32(&mut blob, thunk_at + j * 4, section_va + entry_at as u32);
        }

        let name_at = blob.len();
        blob.extend_from_slice(spec.dll.as_bytes());
        blob.push(0);

        let at = i * desc_size;
        if delay {
            put_u32(&mut blob, at + 4, section_va + name_at as u32);
            put_u32(&mut blob, at + 16, section_va + thunk_at as u32);
        } else {
            put_u32(&mut blob, at, section_va + thunk_at as u32);
            put_u32(&mut blob, at + 12, section_va + name_at as u32);
            put_u32(&mut blob, at + 16, section_va + thunk_at as u32);
        }
    }

    blob
}

/// Where an exported slot points for [`exports_blob`].
pub enum ExportTarget {
    Code(u32),
    Forwarder(String),
}

/// One export for [`exports_blob`].
pub struct ExportSpec {
    pub name: Option<String>,
    pub target: ExportTarget,
}

/// Builds an export directory blob: the 40-byte directory, the address,
/// name-pointer, and name-ordinal tables, then the strings. Forwarder
/// strings land inside the blob so their address RVAs fall within the
/// directory range when the data directory size covers the whole blob.
pub fn exports_blob(
    module: &str,
    ordinal_base: u32,
    specs: &[ExportSpec],
    section_va: u32,
) -> Vec<u8> {
    let named: Vec<(usize, &str)> = specs
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.name.as_deref().map(|n| (i, n)))
        .collect();

    let func_table = 40;
    let name_table = func_table + 4 * specs.len();
    let ord_table = name_table + 4 * named.len();
    let strings_at = ord_table + 2 * named.len();
    let mut blob = vec![0u8; strings_at];

    let module_at = blob.len();
    blob.extend_from_slice(module.as_bytes());
    blob.push(0);

    put_u32(&mut blob, 12, section_va + module_at as u32);
    put_u32(&mut blob, 16, ordinal_base);
    put_u32(&mut blob, 20, specs.len() as u32);
    put_u32(&mut blob, 24, named.len() as u32);
    put_u32(&mut blob, 28, section_va + func_table as u32);
    put_u32(&mut blob, 32, section_va + name_table as u32);
    put_u32(&mut blob, 36, section_va + ord_table as u32);

    for (slot, &(index, name)) in named.iter().enumerate() {
        let at = blob.len();
        blob.extend_from_slice(name.as_bytes());
        blob.push(0);
        put_u32(&mut blob, name_table + slot * 4, section_va + at as u32);
        put_u16(&mut blob, ord_table + slot * 2, index as u16);
    }

    for (i, spec) in specs.iter().enumerate() {
        let rva = match &spec.target {
            ExportTarget::Code(rva) => *rva,
            ExportTarget::Forwarder(target) => {
                let at = blob.len();
                blob.extend_from_slice(target.as_bytes());
                blob.push(0);
                section_va + at as u32
            }
        };
        put_u32(&mut blob, func_table + i * 4, rva);
    }

    blob
}

/// Builds a PE32 TLS directory blob with a null-terminated callback table
/// appended right after the 24-byte structure. Callback entries are VAs.
pub fn tls_blob(callbacks: &[u32], image_base: u32, section_va: u32) -> Vec<u8> {
    let mut blob = vec![0u8; 24];
    let base = image_base + section_va;
    put_u32(&mut blob, 0, base + 0x100); // raw data start
    put_u32(&mut blob, 4, base + 0x120); // raw data end
    put_u32(&mut blob, 8, base + 0x80); // index slot
    put_u32(&mut blob, 12, base + 24); // callback table
    for &callback in callbacks {
        blob.extend_from_slice(&callback.to_le_bytes());
    }
    blob.extend_from_slice(&0u32.to_le_bytes());
    blob
}
