//! TLS, certificate, relocation, and version-info directory parsing.

use tracing::debug;

use crate::bytes::ByteSource;
use crate::pe::sections::SectionTable;
use crate::pe::types::*;

const MAX_TLS_CALLBACKS: usize = 256;
const MAX_CERTIFICATES: usize = 16;
const MAX_RELOCATION_BLOCKS: usize = 65536;

/// Parse the TLS directory and enumerate its callback addresses.
pub fn parse_tls_directory(
    src: &ByteSource,
    sections: &SectionTable,
    tls_dir: &DataDirectory,
    image_base: u64,
    is_64bit: bool,
) -> Result<Option<TlsDirectory>> {
    if !tls_dir.is_present() {
        return Ok(None);
    }
    let offset = sections.resolve_rva(tls_dir.virtual_address)?;

    let mut tls = if is_64bit {
        src.read(offset, 40)?;
        TlsDirectory {
            start_address_of_raw_data: src.read_u64_le(offset)?,
            end_address_of_raw_data: src.read_u64_le(offset + 8)?,
            address_of_index: src.read_u64_le(offset + 16)?,
            address_of_callbacks: src.read_u64_le(offset + 24)?,
            size_of_zero_fill: src.read_u32_le(offset + 32)?,
            characteristics: src.read_u32_le(offset + 36)?,
            callbacks: Vec::new(),
        }
    } else {
        src.read(offset, 24)?;
        TlsDirectory {
            start_address_of_raw_data: src.read_u32_le(offset)? as u64,
            end_address_of_raw_data: src.read_u32_le(offset + 4)? as u64,
            address_of_index: src.read_u32_le(offset + 8)? as u64,
            address_of_callbacks: src.read_u32_le(offset + 12)? as u64,
            size_of_zero_fill: src.read_u32_le(offset + 16)?,
            characteristics: src.read_u32_le(offset + 20)?,
            callbacks: Vec::new(),
        }
    };

    // The callback table address is a VA; rebase it to an RVA before
    // resolution.
    if tls.address_of_callbacks > image_base {
        let callbacks_rva = (tls.address_of_callbacks - image_base) as u32;
        if let Ok(mut cb_offset) = sections.resolve_rva(callbacks_rva) {
            let entry_size = if is_64bit { 8 } else { 4 };
            while tls.callbacks.len() < MAX_TLS_CALLBACKS {
                let value = if is_64bit {
                    match src.read_u64_le(cb_offset) {
                        Ok(v) => v,
                        Err(_) => break,
                    }
                } else {
                    match src.read_u32_le(cb_offset) {
                        Ok(v) => v as u64,
                        Err(_) => break,
                    }
                };
                if value == 0 {
                    break;
                }
                tls.callbacks.push(value);
                cb_offset += entry_size;
            }
        } else {
            debug!(rva = callbacks_rva, "TLS callback table RVA unresolvable");
        }
    }

    Ok(Some(tls))
}

/// Parse the certificate table.
///
/// Unlike every other data directory, the security directory's address is a
/// file offset, not an RVA. Entries are 8-byte aligned.
pub fn parse_certificates(src: &ByteSource, security_dir: &DataDirectory) -> Result<Vec<Certificate>> {
    let mut certificates = Vec::new();
    if !security_dir.is_present() {
        return Ok(certificates);
    }

    let table_start = security_dir.virtual_address as usize;
    let table_end = table_start.saturating_add(security_dir.size as usize);
    let mut offset = table_start;

    while offset + 8 <= table_end && certificates.len() < MAX_CERTIFICATES {
        let length = src.read_u32_le(offset)? as usize;
        if length < 8 {
            return Err(PeError::MalformedDirectory {
                offset,
                reason: "certificate entry shorter than its own header",
            });
        }
        let revision = src.read_u16_le(offset + 4)?;
        let certificate_type = src.read_u16_le(offset + 6)?;
        let data = src.read(offset + 8, length - 8)?.to_vec();

        certificates.push(Certificate {
            revision,
            certificate_type,
            data,
        });

        // Next entry starts at the next 8-byte boundary.
        offset += (length + 7) & !7;
    }

    Ok(certificates)
}

/// Parse the base relocation table into per-page blocks.
pub fn parse_relocations(
    src: &ByteSource,
    sections: &SectionTable,
    reloc_dir: &DataDirectory,
) -> Result<Vec<RelocationBlock>> {
    let mut blocks = Vec::new();
    if !reloc_dir.is_present() {
        return Ok(blocks);
    }

    let start = sections.resolve_rva(reloc_dir.virtual_address)?;
    let end = start.saturating_add(reloc_dir.size as usize);
    let mut offset = start;

    while offset + 8 <= end && blocks.len() < MAX_RELOCATION_BLOCKS {
        let page_rva = src.read_u32_le(offset)?;
        let block_size = src.read_u32_le(offset + 4)? as usize;
        if block_size < 8 || offset + block_size > end {
            return Err(PeError::MalformedDirectory {
                offset,
                reason: "relocation block size inconsistent with directory extent",
            });
        }

        let entry_count = (block_size - 8) / 2;
        let mut entries = Vec::with_capacity(entry_count);
        for i in 0..entry_count {
            let raw = src.read_u16_le(offset + 8 + i * 2)?;
            entries.push(RelocationEntry {
                reloc_type: (raw >> 12) as u8,
                offset: raw & 0x0FFF,
            });
        }

        blocks.push(RelocationBlock { page_rva, entries });
        offset += block_size;
    }

    Ok(blocks)
}

// VS_VERSIONINFO block header: length, value length, type, UTF-16 key,
// padding to a 4-byte boundary, then value and children.
struct VsBlock {
    value_length: usize,
    is_text: bool,
    key: String,
    value_offset: usize,
    end: usize,
}

fn align4(offset: usize) -> usize {
    (offset + 3) & !3
}

fn read_vs_block(data: &[u8], offset: usize) -> Option<VsBlock> {
    let word = |at: usize| -> Option<u16> {
        data.get(at..at + 2)
            .map(|b| u16::from_le_bytes([b[0], b[1]]))
    };
    let length = word(offset)? as usize;
    let value_length = word(offset + 2)? as usize;
    let block_type = word(offset + 4)?;
    if length < 6 || offset + length > data.len() {
        return None;
    }

    let mut key = String::new();
    let mut at = offset + 6;
    loop {
        let unit = word(at)?;
        at += 2;
        if unit == 0 {
            break;
        }
        key.push(char::from_u32(unit as u32).unwrap_or('\u{FFFD}'));
        if key.len() > 128 {
            return None;
        }
    }

    Some(VsBlock {
        value_length,
        is_text: block_type == 1,
        key,
        value_offset: align4(at),
        end: offset + length,
    })
}

fn read_vs_string(data: &[u8], offset: usize, end: usize) -> String {
    let mut out = String::new();
    let mut at = offset;
    while at + 2 <= end && at + 2 <= data.len() {
        let unit = u16::from_le_bytes([data[at], data[at + 1]]);
        at += 2;
        if unit == 0 {
            break;
        }
        out.push(char::from_u32(unit as u32).unwrap_or('\u{FFFD}'));
    }
    out
}

/// Decode a VS_VERSIONINFO blob (the raw bytes of an RT_VERSION resource)
/// into its StringTable key/value pairs. Tolerant: anything unrecognized is
/// skipped, and a blob with no string tables yields an empty set.
pub fn parse_version_info(data: &[u8]) -> VersionInfo {
    let mut info = VersionInfo::default();

    let Some(root) = read_vs_block(data, 0) else {
        return info;
    };
    if root.key != "VS_VERSION_INFO" {
        return info;
    }

    // Children follow the fixed file info value.
    let mut child_offset = align4(root.value_offset + root.value_length);
    while child_offset + 6 <= root.end {
        let Some(child) = read_vs_block(data, child_offset) else {
            break;
        };
        if child.key == "StringFileInfo" {
            let mut table_offset = child.value_offset;
            while table_offset + 6 <= child.end {
                let Some(table) = read_vs_block(data, table_offset) else {
                    break;
                };
                let mut string_offset = table.value_offset;
                while string_offset + 6 <= table.end {
                    let Some(entry) = read_vs_block(data, string_offset) else {
                        break;
                    };
                    if entry.is_text && entry.value_length > 0 {
                        let value = read_vs_string(data, entry.value_offset, entry.end);
                        info.strings.push((entry.key, value));
                    }
                    string_offset = align4(entry.end);
                }
                table_offset = align4(table.end);
            }
        }
        child_offset = align4(child.end);
    }

    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u16(buf: &mut Vec<u8>, value: u16) {
        buf.extend_from_slice(&value.to_le_bytes());
    }

    fn push_utf16(buf: &mut Vec<u8>, text: &str) {
        for unit in text.encode_utf16() {
            push_u16(buf, unit);
        }
        push_u16(buf, 0);
    }

    fn pad4(buf: &mut Vec<u8>) {
        while buf.len() % 4 != 0 {
            buf.push(0);
        }
    }

    // Builds a VS_VERSIONINFO blob with one StringTable entry.
    fn version_blob(key: &str, value: &str) -> Vec<u8> {
        let mut entry = Vec::new();
        push_u16(&mut entry, 0); // length, patched below
        push_u16(&mut entry, value.encode_utf16().count() as u16 + 1);
        push_u16(&mut entry, 1); // text
        push_utf16(&mut entry, key);
        pad4(&mut entry);
        push_utf16(&mut entry, value);
        let len = entry.len() as u16;
        entry[0..2].copy_from_slice(&len.to_le_bytes());

        let mut table = Vec::new();
        push_u16(&mut table, 0);
        push_u16(&mut table, 0);
        push_u16(&mut table, 1);
        push_utf16(&mut table, "040904b0");
        pad4(&mut table);
        table.extend_from_slice(&entry);
        let len = table.len() as u16;
        table[0..2].copy_from_slice(&len.to_le_bytes());

        let mut sfi = Vec::new();
        push_u16(&mut sfi, 0);
        push_u16(&mut sfi, 0);
        push_u16(&mut sfi, 1);
        push_utf16(&mut sfi, "StringFileInfo");
        pad4(&mut sfi);
        sfi.extend_from_slice(&table);
        let len = sfi.len() as u16;
        sfi[0..2].copy_from_slice(&len.to_le_bytes());

        let mut root = Vec::new();
        push_u16(&mut root, 0);
        push_u16(&mut root, 0); // no fixed file info
        push_u16(&mut root, 0);
        push_utf16(&mut root, "VS_VERSION_INFO");
        pad4(&mut root);
        root.extend_from_slice(&sfi);
        let len = root.len() as u16;
        root[0..2].copy_from_slice(&len.to_le_bytes());
        root
    }

    #[test]
    fn test_version_info_string_table() {
        let blob = version_blob("CompanyName", "Example Corp");
        let info = parse_version_info(&blob);
        assert_eq!(info.get("CompanyName"), Some("Example Corp"));
    }

    #[test]
    fn test_version_info_rejects_garbage() {
        assert!(parse_version_info(&[]).strings.is_empty());
        assert!(parse_version_info(&[0xFF; 32]).strings.is_empty());
        // Valid shape but wrong root key.
        let mut blob = version_blob("Key", "Value");
        blob[6] = b'X';
        assert!(parse_version_info(&blob).strings.is_empty());
    }

    #[test]
    fn test_certificates_parsed_from_file_offset() {
        let mut data = vec![0u8; 0x100];
        // One 24-byte entry at offset 0x40: length, revision 0x0200, type 2.
        data[0x40..0x44].copy_from_slice(&24u32.to_le_bytes());
        data[0x44..0x46].copy_from_slice(&0x0200u16.to_le_bytes());
        data[0x46..0x48].copy_from_slice(&2u16.to_le_bytes());
        data[0x48..0x58].copy_from_slice(&[0xAB; 16]);

        let src = ByteSource::new(data);
        let dir = DataDirectory {
            virtual_address: 0x40,
            size: 24,
        };
        let certs = parse_certificates(&src, &dir).unwrap();
        assert_eq!(certs.len(), 1);
        assert_eq!(certs[0].revision, 0x0200);
        assert_eq!(certs[0].certificate_type, 2);
        assert_eq!(certs[0].data, vec![0xAB; 16]);
    }

    #[test]
    fn test_certificate_bad_length_is_malformed() {
        // Declared entry length 4 is shorter than the 8-byte entry header.
        let mut data = vec![0u8; 0x40];
        data[0x10..0x14].copy_from_slice(&4u32.to_le_bytes());
        let src = ByteSource::new(data);
        let dir = DataDirectory {
            virtual_address: 0x10,
            size: 0x20,
        };
        let err = parse_certificates(&src, &dir).unwrap_err();
        assert!(matches!(err, PeError::MalformedDirectory { .. }));
    }

    #[test]
    fn test_relocation_blocks() {
        // One block: page 0x1000, size 12, two entries.
        let mut data = vec![0u8; 0x40];
        data[0x10..0x14].copy_from_slice(&0x1000u32.to_le_bytes());
        data[0x14..0x18].copy_from_slice(&12u32.to_le_bytes());
        data[0x18..0x1A].copy_from_slice(&0x3004u16.to_le_bytes()); // HIGHLOW at 4
        data[0x1A..0x1C].copy_from_slice(&0x0000u16.to_le_bytes()); // padding entry

        let src = ByteSource::new(data);
        let sections = SectionTable::new(Vec::new(), 0x40, 0x40);
        let dir = DataDirectory {
            virtual_address: 0x10,
            size: 12,
        };
        let blocks = parse_relocations(&src, &sections, &dir).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].page_rva, 0x1000);
        assert_eq!(blocks[0].entries.len(), 2);
        assert_eq!(blocks[0].entries[0].reloc_type, 3);
        assert_eq!(blocks[0].entries[0].offset, 4);
    }
}
