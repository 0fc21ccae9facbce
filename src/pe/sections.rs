//! Section table and RVA translation.

use crate::pe::types::*;

/// Section table with RVA → file-offset resolution.
///
/// Overlapping and zero-sized sections are legal; resolution walks sections
/// in file order and takes the first whose virtual range contains the RVA.
/// RVAs below the first section fall in the header region and resolve
/// identity-mapped when within the declared header size.
#[derive(Debug, Clone)]
pub struct SectionTable {
    sections: Vec<Section>,
    headers_size: u32,
    file_len: usize,
}

impl SectionTable {
    pub fn new(headers: Vec<SectionHeader>, headers_size: u32, file_len: usize) -> Self {
        let sections = headers
            .into_iter()
            .map(|header| {
                let start = header.pointer_to_raw_data as usize;
                let end = start.saturating_add(header.size_of_raw_data as usize);
                Section {
                    header,
                    data: start..end.min(file_len),
                }
            })
            .collect();
        Self {
            sections,
            headers_size,
            file_len,
        }
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_by_name(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.header.name() == name)
    }

    pub fn section_containing_rva(&self, rva: u32) -> Option<&Section> {
        self.sections.iter().find(|s| s.header.contains_rva(rva))
    }

    /// Translate an RVA into a file offset.
    ///
    /// Total over a fixed table: the same RVA always yields the same offset,
    /// and an RVA outside every section (and the header region) always yields
    /// `UnresolvableRva`.
    pub fn resolve_rva(&self, rva: u32) -> Result<usize> {
        if let Some(section) = self.section_containing_rva(rva) {
            let delta = (rva - section.header.virtual_address) as usize;
            let offset = section.header.pointer_to_raw_data as usize + delta;
            if offset < self.file_len {
                return Ok(offset);
            }
            return Err(PeError::UnresolvableRva { rva });
        }

        // Header region: identity-mapped before the first section.
        let first_va = self
            .sections
            .iter()
            .map(|s| s.header.virtual_address)
            .filter(|&va| va != 0)
            .min()
            .unwrap_or(self.headers_size);
        if rva < first_va && rva < self.headers_size && (rva as usize) < self.file_len {
            return Ok(rva as usize);
        }

        Err(PeError::UnresolvableRva { rva })
    }

    /// Section containing the entry point, by name.
    pub fn entry_section(&self, entry_rva: u32) -> Option<&Section> {
        self.section_containing_rva(entry_rva)
    }

    /// Names and entropy of executable sections whose raw bytes exceed
    /// `threshold`.
    pub fn high_entropy_sections(&self, data: &[u8], threshold: f64) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        for section in self.executable_sections() {
            if section.header.size_of_raw_data == 0 {
                continue;
            }
            if let Some(entropy) = section.entropy(data) {
                if entropy > threshold {
                    out.push((section.header.name(), entropy));
                }
            }
        }
        out
    }

    pub fn executable_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| s.header.is_executable())
    }
}
