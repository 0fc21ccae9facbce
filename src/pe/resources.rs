//! Resource directory walking.
//!
//! The resource directory is a three-level tree (Type / Name / Language).
//! The walk flattens it depth-first into an ordered `Vec<ResourceEntry>`:
//! named children in declared order, then numbered children in on-disk
//! order. Depth is hard-capped at the three architectural levels and a
//! visited-offset set rejects self-referential layouts, so the walk
//! terminates on any input.

use std::collections::HashSet;

use tracing::debug;

use crate::bytes::ByteSource;
use crate::pe::sections::SectionTable;
use crate::pe::types::*;

const DIRECTORY_HEADER_SIZE: usize = 16;
const ENTRY_SIZE: usize = 8;
const DATA_ENTRY_SIZE: usize = 16;
const MAX_ENTRIES_PER_DIRECTORY: usize = 4096;
const MAX_DEPTH: u8 = 3;

/// Walk the resource directory into a flat ordered entry list.
///
/// Fails only when the root directory itself is unreadable; a malformed
/// subdirectory or leaf is skipped and its siblings still contribute.
pub fn parse_resources(
    src: &ByteSource,
    sections: &SectionTable,
    resource_dir: &DataDirectory,
) -> Result<Vec<ResourceEntry>> {
    let mut entries = Vec::new();
    if !resource_dir.is_present() {
        return Ok(entries);
    }

    let resource_start = sections.resolve_rva(resource_dir.virtual_address)?;
    let mut walker = Walker {
        src,
        sections,
        resource_start,
        visited: HashSet::new(),
        entries: &mut entries,
    };
    walker.walk_directory(0, 0, None, None)?;
    Ok(entries)
}

struct Walker<'a> {
    src: &'a ByteSource,
    sections: &'a SectionTable,
    resource_start: usize,
    visited: HashSet<u32>,
    entries: &'a mut Vec<ResourceEntry>,
}

impl Walker<'_> {
    fn walk_directory(
        &mut self,
        rel_offset: u32,
        depth: u8,
        resource_type: Option<ResourceId>,
        name: Option<ResourceId>,
    ) -> Result<()> {
        if !self.visited.insert(rel_offset) {
            return Err(PeError::MalformedDirectory {
                offset: self.resource_start + rel_offset as usize,
                reason: "resource directory cycle",
            });
        }

        let dir_offset = self.resource_start + rel_offset as usize;
        self.src.read(dir_offset, DIRECTORY_HEADER_SIZE)?;
        let named_count = self.src.read_u16_le(dir_offset + 12)? as usize;
        let id_count = self.src.read_u16_le(dir_offset + 14)? as usize;
        let total = (named_count + id_count).min(MAX_ENTRIES_PER_DIRECTORY);

        for i in 0..total {
            let entry_offset = dir_offset + DIRECTORY_HEADER_SIZE + i * ENTRY_SIZE;
            let (id_field, offset_field) =
                match (self.src.read_u32_le(entry_offset), self.src.read_u32_le(entry_offset + 4)) {
                    (Ok(id), Ok(off)) => (id, off),
                    _ => {
                        debug!(offset = entry_offset, "resource entry out of bounds, stopping level");
                        break;
                    }
                };

            let identifier = if id_field & 0x8000_0000 != 0 {
                let name_offset = self.resource_start + (id_field & 0x7FFF_FFFF) as usize;
                match self.src.read_utf16le_prefixed(name_offset) {
                    Ok(text) => ResourceId::Name(text),
                    Err(_) => {
                        debug!(offset = name_offset, "resource name out of bounds, skipping entry");
                        continue;
                    }
                }
            } else {
                ResourceId::Id(id_field)
            };

            if offset_field & 0x8000_0000 != 0 {
                if depth + 1 >= MAX_DEPTH {
                    debug!(depth, "resource subdirectory below the language level, skipping");
                    continue;
                }
                let child = offset_field & 0x7FFF_FFFF;
                let (child_type, child_name) = match depth {
                    0 => (Some(identifier), None),
                    _ => (resource_type.clone(), Some(identifier)),
                };
                if let Err(err) = self.walk_directory(child, depth + 1, child_type, child_name) {
                    debug!(error = %err, "resource subdirectory malformed, skipping subtree");
                }
            } else if let Err(err) = self.visit_leaf(
                offset_field,
                resource_type.clone(),
                name.clone(),
                identifier,
            ) {
                debug!(error = %err, "resource data entry malformed, skipping");
            }
        }

        Ok(())
    }

    fn visit_leaf(
        &mut self,
        rel_offset: u32,
        resource_type: Option<ResourceId>,
        name: Option<ResourceId>,
        identifier: ResourceId,
    ) -> Result<()> {
        let entry_offset = self.resource_start + rel_offset as usize;
        self.src.read(entry_offset, DATA_ENTRY_SIZE)?;
        let data_rva = self.src.read_u32_le(entry_offset)?;
        let declared_size = self.src.read_u32_le(entry_offset + 4)?;

        let data_offset = self.sections.resolve_rva(data_rva)?;
        // Entry size never exceeds the bytes actually present in the file.
        let end = data_offset
            .saturating_add(declared_size as usize)
            .min(self.src.len());

        let language = match &identifier {
            ResourceId::Id(id) => *id,
            ResourceId::Name(_) => 0,
        };

        self.entries.push(ResourceEntry::new(
            resource_type.unwrap_or(ResourceId::Id(0)),
            name.unwrap_or(identifier),
            language,
            data_offset..end,
            declared_size,
        ));
        Ok(())
    }
}
