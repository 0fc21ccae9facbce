//! Core PE data types and structures.

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::ops::Range;
use std::sync::OnceLock;
use thiserror::Error;

use crate::bytes::BoundsError;
use crate::entropy;

// PE constants
pub const DOS_SIGNATURE: u16 = 0x5A4D; // MZ
pub const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";
pub const PE32_MAGIC: u16 = 0x10B;
pub const PE32PLUS_MAGIC: u16 = 0x20B;

// Data directory indices
pub const DIRECTORY_EXPORT: usize = 0;
pub const DIRECTORY_IMPORT: usize = 1;
pub const DIRECTORY_RESOURCE: usize = 2;
pub const DIRECTORY_SECURITY: usize = 4;
pub const DIRECTORY_BASERELOC: usize = 5;
pub const DIRECTORY_TLS: usize = 9;
pub const DIRECTORY_DELAY_IMPORT: usize = 13;

// DLL characteristics
pub const DLLCHARACTERISTICS_HIGH_ENTROPY_VA: u16 = 0x0020;
pub const DLLCHARACTERISTICS_DYNAMIC_BASE: u16 = 0x0040;
pub const DLLCHARACTERISTICS_FORCE_INTEGRITY: u16 = 0x0080;
pub const DLLCHARACTERISTICS_NX_COMPAT: u16 = 0x0100;
pub const DLLCHARACTERISTICS_NO_SEH: u16 = 0x0400;
pub const DLLCHARACTERISTICS_APPCONTAINER: u16 = 0x1000;
pub const DLLCHARACTERISTICS_GUARD_CF: u16 = 0x4000;

// Section characteristics
pub const SCN_CNT_CODE: u32 = 0x0000_0020;
pub const SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
pub const SCN_MEM_EXECUTE: u32 = 0x2000_0000;
pub const SCN_MEM_READ: u32 = 0x4000_0000;
pub const SCN_MEM_WRITE: u32 = 0x8000_0000;

// Resource types (the numeric Type level of the resource directory)
pub const RT_ICON: u32 = 3;
pub const RT_VERSION: u32 = 16;
pub const RT_MANIFEST: u32 = 24;

/// PE structural parse errors.
///
/// None of these are fatal to the process. `BadDosMagic`/`BadPeMagic` mark
/// the whole image invalid; the remaining variants convert the enclosing
/// structure to absent and leave the rest of the image usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeError {
    #[error("read out of bounds: {0}")]
    Bounds(#[from] BoundsError),

    #[error("invalid DOS signature")]
    BadDosMagic,

    #[error("invalid PE signature")]
    BadPeMagic,

    #[error("invalid optional header magic: {0:#06x}")]
    BadOptionalMagic(u16),

    #[error("truncated header: need {expected} bytes, have {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("optional header size {declared} inconsistent with layout")]
    BadOptionalHeaderSize { declared: usize },

    #[error("RVA {rva:#010x} does not map into the image")]
    UnresolvableRva { rva: u32 },

    #[error("malformed directory at offset {offset:#x}: {reason}")]
    MalformedDirectory { offset: usize, reason: &'static str },
}

pub type Result<T> = std::result::Result<T, PeError>;

/// Machine types from the COFF header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Machine {
    Unknown,
    I386,   // 0x014c
    X86_64, // 0x8664
    Arm,    // 0x01c0
    ArmNT,  // 0x01c4
    Arm64,  // 0xaa64
    IA64,   // 0x0200
    Other(u16),
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unknown,
            0x014c => Self::I386,
            0x8664 => Self::X86_64,
            0x01c0 => Self::Arm,
            0x01c4 => Self::ArmNT,
            0xaa64 => Self::Arm64,
            0x0200 => Self::IA64,
            other => Self::Other(other),
        }
    }
}

/// Subsystem from the optional header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Unknown,
    Native,       // 1
    WindowsGui,   // 2
    WindowsCui,   // 3
    PosixCui,     // 7
    EfiApplication, // 10
    Other(u16),
}

impl From<u16> for Subsystem {
    fn from(value: u16) -> Self {
        match value {
            0 => Self::Unknown,
            1 => Self::Native,
            2 => Self::WindowsGui,
            3 => Self::WindowsCui,
            7 => Self::PosixCui,
            10 => Self::EfiApplication,
            other => Self::Other(other),
        }
    }
}

/// DOS header (64 bytes). Only the fields the analyzer consumes are kept.
#[derive(Debug, Clone, Copy)]
pub struct DosHeader {
    pub e_magic: u16,
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_lfanew: u32,
}

/// COFF header (20 bytes).
#[derive(Debug, Clone, Copy)]
pub struct CoffHeader {
    pub machine: Machine,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

impl CoffHeader {
    /// Link timestamp as UTC, when representable.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.time_date_stamp as i64, 0).single()
    }
}

/// Data directory entry (RVA + size). An RVA of zero means absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl DataDirectory {
    pub fn is_present(&self) -> bool {
        self.virtual_address != 0 && self.size > 0
    }
}

/// Optional header fields shared between PE32 and PE32+.
#[derive(Debug, Clone)]
pub struct OptionalHeaderCommon {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
}

/// 32-bit optional header.
#[derive(Debug, Clone)]
pub struct OptionalHeader32 {
    pub common: OptionalHeaderCommon,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: u16,
    pub number_of_rva_and_sizes: u32,
}

/// 64-bit optional header.
#[derive(Debug, Clone)]
pub struct OptionalHeader64 {
    pub common: OptionalHeaderCommon,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub checksum: u32,
    pub subsystem: Subsystem,
    pub dll_characteristics: u16,
    pub number_of_rva_and_sizes: u32,
}

/// Combined optional header.
#[derive(Debug, Clone)]
pub enum OptionalHeader {
    Pe32(OptionalHeader32),
    Pe32Plus(OptionalHeader64),
}

impl OptionalHeader {
    pub fn magic(&self) -> u16 {
        match self {
            Self::Pe32(h) => h.common.magic,
            Self::Pe32Plus(h) => h.common.magic,
        }
    }

    pub fn entry_point(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.common.address_of_entry_point,
            Self::Pe32Plus(h) => h.common.address_of_entry_point,
        }
    }

    pub fn image_base(&self) -> u64 {
        match self {
            Self::Pe32(h) => h.image_base as u64,
            Self::Pe32Plus(h) => h.image_base,
        }
    }

    pub fn subsystem(&self) -> Subsystem {
        match self {
            Self::Pe32(h) => h.subsystem,
            Self::Pe32Plus(h) => h.subsystem,
        }
    }

    pub fn dll_characteristics(&self) -> u16 {
        match self {
            Self::Pe32(h) => h.dll_characteristics,
            Self::Pe32Plus(h) => h.dll_characteristics,
        }
    }

    pub fn size_of_headers(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.size_of_headers,
            Self::Pe32Plus(h) => h.size_of_headers,
        }
    }

    pub fn number_of_rva_and_sizes(&self) -> u32 {
        match self {
            Self::Pe32(h) => h.number_of_rva_and_sizes,
            Self::Pe32Plus(h) => h.number_of_rva_and_sizes,
        }
    }

    pub fn is_64bit(&self) -> bool {
        matches!(self, Self::Pe32Plus(_))
    }
}

/// PE header block: signature, COFF header, optional header.
#[derive(Debug, Clone)]
pub struct PeHeaders {
    pub file_header: CoffHeader,
    pub optional_header: OptionalHeader,
}

/// Section header (40 bytes on disk).
#[derive(Debug, Clone)]
pub struct SectionHeader {
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub characteristics: u32,
}

impl SectionHeader {
    pub fn name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        String::from_utf8_lossy(&self.name[..end]).to_string()
    }

    pub fn contains_rva(&self, rva: u32) -> bool {
        let size = self.virtual_size.max(self.size_of_raw_data);
        rva >= self.virtual_address && (rva - self.virtual_address) < size
    }

    pub fn is_executable(&self) -> bool {
        (self.characteristics & SCN_MEM_EXECUTE) != 0
    }

    pub fn is_readable(&self) -> bool {
        (self.characteristics & SCN_MEM_READ) != 0
    }

    pub fn is_writable(&self) -> bool {
        (self.characteristics & SCN_MEM_WRITE) != 0
    }

    pub fn contains_code(&self) -> bool {
        (self.characteristics & SCN_CNT_CODE) != 0
    }
}

/// Section with its raw byte range in the file.
#[derive(Debug, Clone)]
pub struct Section {
    pub header: SectionHeader,
    pub data: Range<usize>,
}

impl Section {
    /// Raw section bytes, when the declared range lies within the file.
    pub fn data<'a>(&self, file_data: &'a [u8]) -> Option<&'a [u8]> {
        file_data.get(self.data.clone())
    }

    /// Shannon entropy of the raw section bytes.
    pub fn entropy(&self, file_data: &[u8]) -> Option<f64> {
        self.data(file_data).map(entropy::shannon_entropy)
    }
}

/// A symbol imported from a library, by name or by ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportedSymbol {
    Name { hint: u16, name: String },
    Ordinal(u16),
}

impl fmt::Display for ImportedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name { name, .. } => write!(f, "{}", name),
            Self::Ordinal(ord) => write!(f, "#{}", ord),
        }
    }
}

/// An imported library and its ordered symbol list.
#[derive(Debug, Clone)]
pub struct ImportedLibrary {
    pub name: String,
    pub symbols: Vec<ImportedSymbol>,
    pub delay_loaded: bool,
}

/// An exported symbol.
#[derive(Debug, Clone)]
pub struct ExportedSymbol {
    pub name: Option<String>,
    pub ordinal: u32,
    pub rva: u32,
    pub forwarder: Option<String>,
}

/// TLS directory plus enumerated callback addresses.
#[derive(Debug, Clone)]
pub struct TlsDirectory {
    pub start_address_of_raw_data: u64,
    pub end_address_of_raw_data: u64,
    pub address_of_index: u64,
    pub address_of_callbacks: u64,
    pub size_of_zero_fill: u32,
    pub characteristics: u32,
    pub callbacks: Vec<u64>,
}

/// Authenticode certificate table entry: declared type plus the raw signed blob.
#[derive(Debug, Clone)]
pub struct Certificate {
    pub revision: u16,
    pub certificate_type: u16,
    pub data: Vec<u8>,
}

/// One base-relocation block: a page RVA and its (type, offset) entries.
#[derive(Debug, Clone)]
pub struct RelocationBlock {
    pub page_rva: u32,
    pub entries: Vec<RelocationEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    pub reloc_type: u8,
    pub offset: u16,
}

/// Key/value string pairs from the version resource.
#[derive(Debug, Clone, Default)]
pub struct VersionInfo {
    pub strings: Vec<(String, String)>,
}

impl VersionInfo {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.strings
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Identifier of a resource directory level: numeric ID or UTF-16 name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceId {
    Id(u32),
    Name(String),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{}", id),
            Self::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A leaf of the resource tree, flattened: Type/Name/Language identifiers
/// plus the resolved raw data range in the file.
#[derive(Debug)]
pub struct ResourceEntry {
    pub resource_type: ResourceId,
    pub name: ResourceId,
    pub language: u32,
    pub data: Range<usize>,
    pub declared_size: u32,
    entropy: OnceLock<f64>,
}

impl ResourceEntry {
    pub fn new(
        resource_type: ResourceId,
        name: ResourceId,
        language: u32,
        data: Range<usize>,
        declared_size: u32,
    ) -> Self {
        Self {
            resource_type,
            name,
            language,
            data,
            declared_size,
            entropy: OnceLock::new(),
        }
    }

    /// Raw resource bytes.
    pub fn data<'a>(&self, file_data: &'a [u8]) -> &'a [u8] {
        file_data.get(self.data.clone()).unwrap_or(&[])
    }

    /// Shannon entropy of the raw bytes, computed once on first request.
    pub fn entropy(&self, file_data: &[u8]) -> f64 {
        *self
            .entropy
            .get_or_init(|| entropy::entropy_range(file_data, self.data.clone()))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

impl Clone for ResourceEntry {
    fn clone(&self) -> Self {
        Self {
            resource_type: self.resource_type.clone(),
            name: self.name.clone(),
            language: self.language,
            data: self.data.clone(),
            declared_size: self.declared_size,
            entropy: OnceLock::new(),
        }
    }
}

/// Hardening flags decoded from DLL characteristics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SecurityFeatures {
    pub aslr_enabled: bool,
    pub nx_compatible: bool,
    pub cfg_enabled: bool,
    pub high_entropy_va: bool,
    pub force_integrity: bool,
    pub seh_enabled: bool,
    pub appcontainer: bool,
}

/// Decode DLL characteristics into [`SecurityFeatures`].
pub fn security_features(dll_characteristics: u16) -> SecurityFeatures {
    SecurityFeatures {
        aslr_enabled: (dll_characteristics & DLLCHARACTERISTICS_DYNAMIC_BASE) != 0,
        nx_compatible: (dll_characteristics & DLLCHARACTERISTICS_NX_COMPAT) != 0,
        cfg_enabled: (dll_characteristics & DLLCHARACTERISTICS_GUARD_CF) != 0,
        high_entropy_va: (dll_characteristics & DLLCHARACTERISTICS_HIGH_ENTROPY_VA) != 0,
        force_integrity: (dll_characteristics & DLLCHARACTERISTICS_FORCE_INTEGRITY) != 0,
        seh_enabled: (dll_characteristics & DLLCHARACTERISTICS_NO_SEH) == 0,
        appcontainer: (dll_characteristics & DLLCHARACTERISTICS_APPCONTAINER) != 0,
    }
}
