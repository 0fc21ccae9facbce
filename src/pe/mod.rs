//! PE image parsing.
//!
//! `PeImage::parse` never fails: malformed input yields an image that is
//! invalid but still inspectable, carrying the structural error that stopped
//! parsing. Headers and the section table are parsed eagerly; every data
//! directory is resolved lazily on first access and cached, so an image that
//! is only asked for its headers never touches the directories.

pub mod directories;
pub mod exports;
pub mod headers;
pub mod imports;
pub mod resources;
pub mod sections;
pub mod types;

use std::io;
use std::path::Path;
use std::sync::OnceLock;

use tracing::debug;

use crate::bytes::ByteSource;
use crate::entropy;
use crate::hashing::{digest, HashAlgorithm};
use self::exports::ExportTable;
use self::imports::ImportTable;
use self::sections::SectionTable;
use self::types::*;

pub use self::types::{PeError, Result};

/// A parsed PE image over an owned byte buffer.
pub struct PeImage {
    source: ByteSource,
    dos_header: Option<DosHeader>,
    headers: Option<PeHeaders>,
    data_directories: Vec<DataDirectory>,
    section_table: SectionTable,
    parse_error: Option<PeError>,
    file_entropy: OnceLock<f64>,
    imports: OnceLock<ImportTable>,
    exports: OnceLock<ExportTable>,
    resources: OnceLock<Vec<ResourceEntry>>,
    tls: OnceLock<Option<TlsDirectory>>,
    certificates: OnceLock<Vec<Certificate>>,
    relocations: OnceLock<Vec<RelocationBlock>>,
    version_info: OnceLock<Option<VersionInfo>>,
}

impl PeImage {
    /// Parse an image from its raw bytes. Never fails; check [`valid`].
    ///
    /// [`valid`]: PeImage::valid
    pub fn parse(data: Vec<u8>) -> Self {
        let source = ByteSource::new(data);
        let file_len = source.len();

        let mut image = Self {
            source,
            dos_header: None,
            headers: None,
            data_directories: Vec::new(),
            section_table: SectionTable::new(Vec::new(), 0, file_len),
            parse_error: None,
            file_entropy: OnceLock::new(),
            imports: OnceLock::new(),
            exports: OnceLock::new(),
            resources: OnceLock::new(),
            tls: OnceLock::new(),
            certificates: OnceLock::new(),
            relocations: OnceLock::new(),
            version_info: OnceLock::new(),
        };

        if let Err(err) = image.parse_structure() {
            debug!(error = %err, "PE structure parse failed");
            image.parse_error = Some(err);
        }
        image
    }

    /// Read a file and parse it.
    pub fn from_path<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::parse(data))
    }

    fn parse_structure(&mut self) -> Result<()> {
        let dos_header = headers::parse_dos_header(&self.source)?;
        let e_lfanew = dos_header.e_lfanew as usize;
        self.dos_header = Some(dos_header);

        let (pe_headers, data_directories) = headers::parse_pe_headers(&self.source, e_lfanew)?;

        let section_offset =
            e_lfanew + 24 + pe_headers.file_header.size_of_optional_header as usize;
        let section_headers = headers::parse_section_headers(
            &self.source,
            section_offset,
            pe_headers.file_header.number_of_sections,
        )?;

        self.section_table = SectionTable::new(
            section_headers,
            pe_headers.optional_header.size_of_headers(),
            self.source.len(),
        );
        self.headers = Some(pe_headers);
        self.data_directories = data_directories;
        Ok(())
    }

    /// Whether the image parsed as a structurally valid PE.
    pub fn valid(&self) -> bool {
        self.parse_error.is_none()
    }

    /// The structural error that invalidated the image, if any.
    pub fn parse_error(&self) -> Option<&PeError> {
        self.parse_error.as_ref()
    }

    pub fn data(&self) -> &[u8] {
        self.source.as_slice()
    }

    pub fn file_size(&self) -> usize {
        self.source.len()
    }

    /// Shannon entropy of the whole file, computed once.
    pub fn entropy(&self) -> f64 {
        *self
            .file_entropy
            .get_or_init(|| entropy::shannon_entropy(self.source.as_slice()))
    }

    /// Hex digest of the whole file with the given algorithm.
    pub fn digest(&self, algorithm: HashAlgorithm) -> String {
        digest(self.source.as_slice(), algorithm)
    }

    pub fn dos_header(&self) -> Option<&DosHeader> {
        self.dos_header.as_ref()
    }

    pub fn headers(&self) -> Option<&PeHeaders> {
        self.headers.as_ref()
    }

    pub fn is_64bit(&self) -> bool {
        self.headers
            .as_ref()
            .map(|h| h.optional_header.is_64bit())
            .unwrap_or(false)
    }

    pub fn machine(&self) -> Option<Machine> {
        self.headers.as_ref().map(|h| h.file_header.machine)
    }

    /// Link timestamp from the COFF header, when representable.
    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        self.headers.as_ref().and_then(|h| h.file_header.timestamp())
    }

    /// Hardening flags decoded from the optional header.
    pub fn security_features(&self) -> SecurityFeatures {
        self.headers
            .as_ref()
            .map(|h| security_features(h.optional_header.dll_characteristics()))
            .unwrap_or_default()
    }

    /// Data directory by index; absent entries read as default.
    pub fn data_directory(&self, index: usize) -> DataDirectory {
        self.data_directories.get(index).copied().unwrap_or_default()
    }

    pub fn sections(&self) -> &[Section] {
        self.section_table.sections()
    }

    pub fn section_table(&self) -> &SectionTable {
        &self.section_table
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.section_table.section_by_name(name)
    }

    /// Translate an RVA into a file offset through the section table.
    pub fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        self.section_table.resolve_rva(rva)
    }

    /// Section containing the entry point.
    pub fn entry_section(&self) -> Option<&Section> {
        let entry = self.headers.as_ref()?.optional_header.entry_point();
        self.section_table.entry_section(entry)
    }

    /// Import table (normal and delay-load), parsed on first access.
    pub fn imports(&self) -> &ImportTable {
        self.imports.get_or_init(|| {
            let Some(h) = &self.headers else {
                return ImportTable::default();
            };
            let import_dir = self.data_directory(DIRECTORY_IMPORT);
            let delay_dir = self.data_directory(DIRECTORY_DELAY_IMPORT);
            imports::parse_import_table(
                &self.source,
                &self.section_table,
                &import_dir,
                &delay_dir,
                h.optional_header.is_64bit(),
            )
            .unwrap_or_else(|err| {
                debug!(error = %err, "import table malformed, treating as absent");
                ImportTable::default()
            })
        })
    }

    /// MD5 over the sorted lowercase imported `dll.symbol` list.
    pub fn import_hash(&self) -> String {
        self.imports().import_hash()
    }

    /// Export table, parsed on first access.
    pub fn exports(&self) -> &ExportTable {
        self.exports.get_or_init(|| {
            if self.headers.is_none() {
                return ExportTable::default();
            }
            let export_dir = self.data_directory(DIRECTORY_EXPORT);
            exports::parse_export_table(&self.source, &self.section_table, &export_dir)
                .unwrap_or_else(|err| {
                    debug!(error = %err, "export table malformed, treating as absent");
                    ExportTable::default()
                })
        })
    }

    /// Flattened resource entries in on-disk walk order, parsed on first
    /// access.
    pub fn resources(&self) -> &[ResourceEntry] {
        self.resources.get_or_init(|| {
            if self.headers.is_none() {
                return Vec::new();
            }
            let resource_dir = self.data_directory(DIRECTORY_RESOURCE);
            resources::parse_resources(&self.source, &self.section_table, &resource_dir)
                .unwrap_or_else(|err| {
                    debug!(error = %err, "resource directory malformed, treating as absent");
                    Vec::new()
                })
        })
    }

    /// TLS directory with enumerated callbacks.
    pub fn tls(&self) -> Option<&TlsDirectory> {
        self.tls
            .get_or_init(|| {
                let h = self.headers.as_ref()?;
                let tls_dir = self.data_directory(DIRECTORY_TLS);
                directories::parse_tls_directory(
                    &self.source,
                    &self.section_table,
                    &tls_dir,
                    h.optional_header.image_base(),
                    h.optional_header.is_64bit(),
                )
                .unwrap_or_else(|err| {
                    debug!(error = %err, "TLS directory malformed, treating as absent");
                    None
                })
            })
            .as_ref()
    }

    /// Authenticode certificate table.
    pub fn certificates(&self) -> &[Certificate] {
        self.certificates.get_or_init(|| {
            if self.headers.is_none() {
                return Vec::new();
            }
            let security_dir = self.data_directory(DIRECTORY_SECURITY);
            directories::parse_certificates(&self.source, &security_dir).unwrap_or_else(|err| {
                debug!(error = %err, "certificate table malformed, treating as absent");
                Vec::new()
            })
        })
    }

    /// Base relocation blocks.
    pub fn relocations(&self) -> &[RelocationBlock] {
        self.relocations.get_or_init(|| {
            if self.headers.is_none() {
                return Vec::new();
            }
            let reloc_dir = self.data_directory(DIRECTORY_BASERELOC);
            directories::parse_relocations(&self.source, &self.section_table, &reloc_dir)
                .unwrap_or_else(|err| {
                    debug!(error = %err, "relocation table malformed, treating as absent");
                    Vec::new()
                })
        })
    }

    /// Version strings from the first RT_VERSION resource, if present.
    pub fn version_info(&self) -> Option<&VersionInfo> {
        self.version_info
            .get_or_init(|| {
                let entry = self
                    .resources()
                    .iter()
                    .find(|r| r.resource_type == ResourceId::Id(RT_VERSION))?;
                Some(directories::parse_version_info(entry.data(self.data())))
            })
            .as_ref()
    }
}

impl std::fmt::Debug for PeImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeImage")
            .field("file_size", &self.file_size())
            .field("valid", &self.valid())
            .field("sections", &self.sections().len())
            .finish()
    }
}
