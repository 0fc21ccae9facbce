//! Export directory parsing, including forwarder detection.

use tracing::debug;

use crate::bytes::ByteSource;
use crate::pe::sections::SectionTable;
use crate::pe::types::*;

const EXPORT_DIRECTORY_SIZE: usize = 40;
const MAX_EXPORTS: usize = 65536;

/// Parsed export directory: module name plus symbols in address-table order.
#[derive(Debug, Clone, Default)]
pub struct ExportTable {
    pub module_name: Option<String>,
    pub ordinal_base: u32,
    pub symbols: Vec<ExportedSymbol>,
}

impl ExportTable {
    pub fn count(&self) -> usize {
        self.symbols.len()
    }

    pub fn symbol_by_name(&self, name: &str) -> Option<&ExportedSymbol> {
        self.symbols
            .iter()
            .find(|s| s.name.as_deref() == Some(name))
    }

    pub fn forwarders(&self) -> impl Iterator<Item = &ExportedSymbol> {
        self.symbols.iter().filter(|s| s.forwarder.is_some())
    }
}

/// Parse the export directory.
///
/// An address whose RVA falls inside the export directory's own range is a
/// forwarder; the address table then points at a `DLL.Symbol` string instead
/// of code.
pub fn parse_export_table(
    src: &ByteSource,
    sections: &SectionTable,
    export_dir: &DataDirectory,
) -> Result<ExportTable> {
    let mut table = ExportTable::default();
    if !export_dir.is_present() {
        return Ok(table);
    }

    let dir_offset = sections.resolve_rva(export_dir.virtual_address)?;
    src.read(dir_offset, EXPORT_DIRECTORY_SIZE)?;

    let name_rva = src.read_u32_le(dir_offset + 12)?;
    let ordinal_base = src.read_u32_le(dir_offset + 16)?;
    let number_of_functions = src.read_u32_le(dir_offset + 20)?;
    let number_of_names = src.read_u32_le(dir_offset + 24)?;
    let address_of_functions = src.read_u32_le(dir_offset + 28)?;
    let address_of_names = src.read_u32_le(dir_offset + 32)?;
    let address_of_name_ordinals = src.read_u32_le(dir_offset + 36)?;

    table.ordinal_base = ordinal_base;
    if name_rva != 0 {
        if let Ok(offset) = sections.resolve_rva(name_rva) {
            table.module_name = src.read_cstring(offset, 256).ok();
        }
    }

    let function_count = (number_of_functions as usize).min(MAX_EXPORTS);
    let name_count = (number_of_names as usize).min(MAX_EXPORTS);

    // Name table: ordinal index -> exported name.
    let mut names: Vec<Option<String>> = vec![None; function_count];
    if number_of_names != 0 {
        match (
            sections.resolve_rva(address_of_names),
            sections.resolve_rva(address_of_name_ordinals),
        ) {
            (Ok(names_offset), Ok(ordinals_offset)) => {
                for i in 0..name_count {
                    let Ok(name_ptr) = src.read_u32_le(names_offset + i * 4) else {
                        break;
                    };
                    let Ok(index) = src.read_u16_le(ordinals_offset + i * 2) else {
                        break;
                    };
                    let Ok(string_offset) = sections.resolve_rva(name_ptr) else {
                        continue;
                    };
                    if let Ok(name) = src.read_cstring(string_offset, 512) {
                        if let Some(slot) = names.get_mut(index as usize) {
                            *slot = Some(name);
                        }
                    }
                }
            }
            _ => {
                debug!("export name tables unresolvable, exporting by ordinal only");
            }
        }
    }

    let functions_offset = sections.resolve_rva(address_of_functions)?;
    let dir_start = export_dir.virtual_address;
    let dir_end = dir_start.saturating_add(export_dir.size);

    for i in 0..function_count {
        let Ok(rva) = src.read_u32_le(functions_offset + i * 4) else {
            break;
        };
        if rva == 0 {
            continue;
        }

        let forwarder = if rva >= dir_start && rva < dir_end {
            sections
                .resolve_rva(rva)
                .ok()
                .and_then(|offset| src.read_cstring(offset, 512).ok())
        } else {
            None
        };

        table.symbols.push(ExportedSymbol {
            name: names[i].take(),
            ordinal: ordinal_base.wrapping_add(i as u32),
            rva,
            forwarder,
        });
    }

    Ok(table)
}
