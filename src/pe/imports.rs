//! Import table parsing (normal and delay-load descriptors).

use tracing::debug;

use crate::bytes::ByteSource;
use crate::pe::sections::SectionTable;
use crate::pe::types::*;

const DESCRIPTOR_SIZE: usize = 20;
const MAX_LIBRARIES: usize = 4096;
const MAX_SYMBOLS_PER_LIBRARY: usize = 65536;

/// Parsed import table: libraries in descriptor order.
#[derive(Debug, Clone, Default)]
pub struct ImportTable {
    pub libraries: Vec<ImportedLibrary>,
}

impl ImportTable {
    /// Total imported symbol count across all libraries.
    pub fn count(&self) -> usize {
        self.libraries.iter().map(|l| l.symbols.len()).sum()
    }

    pub fn library(&self, name: &str) -> Option<&ImportedLibrary> {
        self.libraries
            .iter()
            .find(|l| l.name.eq_ignore_ascii_case(name))
    }

    /// Whether any library imports the named symbol.
    pub fn has_symbol(&self, name: &str) -> bool {
        self.libraries.iter().any(|l| {
            l.symbols
                .iter()
                .any(|s| matches!(s, ImportedSymbol::Name { name: n, .. } if n == name))
        })
    }

    /// MD5 over the sorted lowercase `dll.symbol` list. Ordinal-only imports
    /// do not contribute.
    pub fn import_hash(&self) -> String {
        let mut entries = Vec::new();
        for lib in &self.libraries {
            let dll = lib.name.to_ascii_lowercase();
            for symbol in &lib.symbols {
                if let ImportedSymbol::Name { name, .. } = symbol {
                    entries.push(format!("{}.{}", dll, name.to_ascii_lowercase()));
                }
            }
        }
        entries.sort();
        format!("{:032x}", md5::compute(entries.join(",").as_bytes()))
    }
}

/// Parse the import and delay-import directories into one table.
pub fn parse_import_table(
    src: &ByteSource,
    sections: &SectionTable,
    import_dir: &DataDirectory,
    delay_dir: &DataDirectory,
    is_64bit: bool,
) -> Result<ImportTable> {
    let mut table = ImportTable::default();

    if import_dir.is_present() {
        parse_descriptors(src, sections, import_dir.virtual_address, is_64bit, false, &mut table)?;
    }
    if delay_dir.is_present() {
        // Delay-load descriptors are 32 bytes, but the name and thunk RVAs
        // sit at the same small offsets we need; a dedicated walk keeps the
        // layouts separate.
        parse_delay_descriptors(src, sections, delay_dir.virtual_address, is_64bit, &mut table)?;
    }

    Ok(table)
}

fn parse_descriptors(
    src: &ByteSource,
    sections: &SectionTable,
    dir_rva: u32,
    is_64bit: bool,
    delay_loaded: bool,
    table: &mut ImportTable,
) -> Result<()> {
    let mut offset = sections.resolve_rva(dir_rva)?;

    while table.libraries.len() < MAX_LIBRARIES {
        let Ok(desc) = src.read(offset, DESCRIPTOR_SIZE) else {
            break;
        };
        if desc.iter().all(|&b| b == 0) {
            break;
        }

        let original_first_thunk = src.read_u32_le(offset)?;
        let name_rva = src.read_u32_le(offset + 12)?;
        let first_thunk = src.read_u32_le(offset + 16)?;
        offset += DESCRIPTOR_SIZE;

        if name_rva == 0 {
            continue;
        }
        let Ok(name_offset) = sections.resolve_rva(name_rva) else {
            debug!(rva = name_rva, "import descriptor name RVA unresolvable, skipping");
            continue;
        };
        let name = src.read_cstring(name_offset, 256)?;

        let thunk_rva = if original_first_thunk != 0 {
            original_first_thunk
        } else {
            first_thunk
        };
        let symbols = parse_thunks(src, sections, thunk_rva, is_64bit)?;

        table.libraries.push(ImportedLibrary {
            name,
            symbols,
            delay_loaded,
        });
    }

    Ok(())
}

fn parse_delay_descriptors(
    src: &ByteSource,
    sections: &SectionTable,
    dir_rva: u32,
    is_64bit: bool,
    table: &mut ImportTable,
) -> Result<()> {
    const DELAY_DESCRIPTOR_SIZE: usize = 32;
    let mut offset = sections.resolve_rva(dir_rva)?;

    while table.libraries.len() < MAX_LIBRARIES {
        let Ok(desc) = src.read(offset, DELAY_DESCRIPTOR_SIZE) else {
            break;
        };
        if desc.iter().all(|&b| b == 0) {
            break;
        }

        let name_rva = src.read_u32_le(offset + 4)?;
        let name_table_rva = src.read_u32_le(offset + 16)?;
        offset += DELAY_DESCRIPTOR_SIZE;

        if name_rva == 0 {
            continue;
        }
        let Ok(name_offset) = sections.resolve_rva(name_rva) else {
            debug!(rva = name_rva, "delay descriptor name RVA unresolvable, skipping");
            continue;
        };
        let name = src.read_cstring(name_offset, 256)?;
        let symbols = parse_thunks(src, sections, name_table_rva, is_64bit)?;

        table.libraries.push(ImportedLibrary {
            name,
            symbols,
            delay_loaded: true,
        });
    }

    Ok(())
}

fn parse_thunks(
    src: &ByteSource,
    sections: &SectionTable,
    thunk_rva: u32,
    is_64bit: bool,
) -> Result<Vec<ImportedSymbol>> {
    let mut symbols = Vec::new();
    if thunk_rva == 0 {
        return Ok(symbols);
    }
    let Ok(mut offset) = sections.resolve_rva(thunk_rva) else {
        return Ok(symbols);
    };
    let entry_size = if is_64bit { 8 } else { 4 };

    while symbols.len() < MAX_SYMBOLS_PER_LIBRARY {
        let value = if is_64bit {
            match src.read_u64_le(offset) {
                Ok(v) => v,
                Err(_) => break,
            }
        } else {
            match src.read_u32_le(offset) {
                Ok(v) => v as u64,
                Err(_) => break,
            }
        };
        if value == 0 {
            break;
        }
        offset += entry_size;

        let is_ordinal = if is_64bit {
            value & (1u64 << 63) != 0
        } else {
            value & (1u64 << 31) != 0
        };

        if is_ordinal {
            symbols.push(ImportedSymbol::Ordinal((value & 0xFFFF) as u16));
            continue;
        }

        let hint_name_rva = (value & 0x7FFF_FFFF) as u32;
        let Ok(hint_offset) = sections.resolve_rva(hint_name_rva) else {
            debug!(rva = hint_name_rva, "hint/name RVA unresolvable, skipping thunk");
            continue;
        };
        let Ok(hint) = src.read_u16_le(hint_offset) else {
            continue;
        };
        let Ok(name) = src.read_cstring(hint_offset + 2, 512) else {
            continue;
        };
        symbols.push(ImportedSymbol::Name { hint, name });
    }

    Ok(symbols)
}
