//! DOS, COFF and optional header parsing.

use crate::bytes::ByteSource;
use crate::pe::types::*;

/// Parse the DOS header and verify the MZ magic.
pub fn parse_dos_header(src: &ByteSource) -> Result<DosHeader> {
    if src.len() < 64 {
        return Err(PeError::Truncated {
            expected: 64,
            actual: src.len(),
        });
    }

    let e_magic = src.read_u16_le(0)?;
    if e_magic != DOS_SIGNATURE {
        return Err(PeError::BadDosMagic);
    }

    Ok(DosHeader {
        e_magic,
        e_cblp: src.read_u16_le(2)?,
        e_cp: src.read_u16_le(4)?,
        e_cparhdr: src.read_u16_le(8)?,
        e_minalloc: src.read_u16_le(10)?,
        e_maxalloc: src.read_u16_le(12)?,
        e_sp: src.read_u16_le(16)?,
        e_csum: src.read_u16_le(18)?,
        e_ip: src.read_u16_le(20)?,
        e_lfanew: src.read_u32_le(60)?,
    })
}

/// Parse the COFF header at `offset`.
pub fn parse_coff_header(src: &ByteSource, offset: usize) -> Result<CoffHeader> {
    if !src.contains(offset, 20) {
        return Err(PeError::Truncated {
            expected: offset + 20,
            actual: src.len(),
        });
    }

    Ok(CoffHeader {
        machine: Machine::from(src.read_u16_le(offset)?),
        number_of_sections: src.read_u16_le(offset + 2)?,
        time_date_stamp: src.read_u32_le(offset + 4)?,
        pointer_to_symbol_table: src.read_u32_le(offset + 8)?,
        number_of_symbols: src.read_u32_le(offset + 12)?,
        size_of_optional_header: src.read_u16_le(offset + 16)?,
        characteristics: src.read_u16_le(offset + 18)?,
    })
}

/// Parse the optional header at `offset`. `size` is the COFF-declared length;
/// sizes inconsistent with the magic's fixed layout are rejected.
pub fn parse_optional_header(
    src: &ByteSource,
    offset: usize,
    size: u16,
) -> Result<OptionalHeader> {
    if size < 2 || !src.contains(offset, size as usize) {
        return Err(PeError::Truncated {
            expected: offset + size.max(2) as usize,
            actual: src.len(),
        });
    }

    let magic = src.read_u16_le(offset)?;
    match magic {
        PE32_MAGIC => parse_optional_header32(src, offset, size),
        PE32PLUS_MAGIC => parse_optional_header64(src, offset, size),
        _ => Err(PeError::BadOptionalMagic(magic)),
    }
}

fn parse_common(src: &ByteSource, offset: usize) -> Result<OptionalHeaderCommon> {
    Ok(OptionalHeaderCommon {
        magic: src.read_u16_le(offset)?,
        major_linker_version: src.read_u8(offset + 2)?,
        minor_linker_version: src.read_u8(offset + 3)?,
        size_of_code: src.read_u32_le(offset + 4)?,
        size_of_initialized_data: src.read_u32_le(offset + 8)?,
        size_of_uninitialized_data: src.read_u32_le(offset + 12)?,
        address_of_entry_point: src.read_u32_le(offset + 16)?,
        base_of_code: src.read_u32_le(offset + 20)?,
    })
}

fn parse_optional_header32(src: &ByteSource, offset: usize, size: u16) -> Result<OptionalHeader> {
    // PE32 fixed part is 96 bytes.
    if size < 96 {
        return Err(PeError::BadOptionalHeaderSize {
            declared: size as usize,
        });
    }

    Ok(OptionalHeader::Pe32(OptionalHeader32 {
        common: parse_common(src, offset)?,
        base_of_data: src.read_u32_le(offset + 24)?,
        image_base: src.read_u32_le(offset + 28)?,
        section_alignment: src.read_u32_le(offset + 32)?,
        file_alignment: src.read_u32_le(offset + 36)?,
        major_subsystem_version: src.read_u16_le(offset + 48)?,
        minor_subsystem_version: src.read_u16_le(offset + 50)?,
        size_of_image: src.read_u32_le(offset + 56)?,
        size_of_headers: src.read_u32_le(offset + 60)?,
        checksum: src.read_u32_le(offset + 64)?,
        subsystem: Subsystem::from(src.read_u16_le(offset + 68)?),
        dll_characteristics: src.read_u16_le(offset + 70)?,
        number_of_rva_and_sizes: src.read_u32_le(offset + 92)?,
    }))
}

fn parse_optional_header64(src: &ByteSource, offset: usize, size: u16) -> Result<OptionalHeader> {
    // PE32+ fixed part is 112 bytes.
    if size < 112 {
        return Err(PeError::BadOptionalHeaderSize {
            declared: size as usize,
        });
    }

    Ok(OptionalHeader::Pe32Plus(OptionalHeader64 {
        common: parse_common(src, offset)?,
        image_base: src.read_u64_le(offset + 24)?,
        section_alignment: src.read_u32_le(offset + 32)?,
        file_alignment: src.read_u32_le(offset + 36)?,
        major_subsystem_version: src.read_u16_le(offset + 48)?,
        minor_subsystem_version: src.read_u16_le(offset + 50)?,
        size_of_image: src.read_u32_le(offset + 56)?,
        size_of_headers: src.read_u32_le(offset + 60)?,
        checksum: src.read_u32_le(offset + 64)?,
        subsystem: Subsystem::from(src.read_u16_le(offset + 68)?),
        dll_characteristics: src.read_u16_le(offset + 70)?,
        number_of_rva_and_sizes: src.read_u32_le(offset + 108)?,
    }))
}

/// Parse up to 16 data-directory entries at `offset`. Missing tail entries
/// (truncated file or a small declared count) are padded as absent.
pub fn parse_data_directories(
    src: &ByteSource,
    offset: usize,
    count: u32,
) -> Vec<DataDirectory> {
    let mut directories = Vec::with_capacity(16);
    let count = count.min(16);

    for i in 0..count as usize {
        let dir_offset = offset + i * 8;
        match (src.read_u32_le(dir_offset), src.read_u32_le(dir_offset + 4)) {
            (Ok(virtual_address), Ok(size)) => directories.push(DataDirectory {
                virtual_address,
                size,
            }),
            _ => break,
        }
    }

    while directories.len() < 16 {
        directories.push(DataDirectory::default());
    }
    directories
}

/// Parse the PE signature, COFF header, optional header and data directories
/// at the DOS-declared `e_lfanew` offset.
pub fn parse_pe_headers(
    src: &ByteSource,
    offset: usize,
) -> Result<(PeHeaders, Vec<DataDirectory>)> {
    let signature = src.read(offset, 4).map_err(|_| PeError::Truncated {
        expected: offset + 4,
        actual: src.len(),
    })?;
    if signature != PE_SIGNATURE {
        return Err(PeError::BadPeMagic);
    }

    let file_header = parse_coff_header(src, offset + 4)?;

    let opt_offset = offset + 24; // 4 (signature) + 20 (COFF)
    let optional_header =
        parse_optional_header(src, opt_offset, file_header.size_of_optional_header)?;

    // Directories sit at the end of the declared optional header length.
    let declared = file_header.size_of_optional_header as usize;
    let dir_bytes = (optional_header.number_of_rva_and_sizes().min(16) * 8) as usize;
    let fixed = if optional_header.is_64bit() { 112 } else { 96 };
    if fixed + dir_bytes > declared {
        return Err(PeError::BadOptionalHeaderSize { declared });
    }
    let dir_offset = opt_offset + declared - dir_bytes;
    let directories =
        parse_data_directories(src, dir_offset, optional_header.number_of_rva_and_sizes());

    Ok((
        PeHeaders {
            file_header,
            optional_header,
        },
        directories,
    ))
}

/// Parse exactly `count` section headers at `offset`.
pub fn parse_section_headers(
    src: &ByteSource,
    offset: usize,
    count: u16,
) -> Result<Vec<SectionHeader>> {
    let mut sections = Vec::with_capacity(count as usize);

    for i in 0..count as usize {
        let section_offset = offset + i * 40;
        if !src.contains(section_offset, 40) {
            return Err(PeError::Truncated {
                expected: section_offset + 40,
                actual: src.len(),
            });
        }

        let mut name = [0u8; 8];
        name.copy_from_slice(src.read(section_offset, 8)?);

        sections.push(SectionHeader {
            name,
            virtual_size: src.read_u32_le(section_offset + 8)?,
            virtual_address: src.read_u32_le(section_offset + 12)?,
            size_of_raw_data: src.read_u32_le(section_offset + 16)?,
            pointer_to_raw_data: src.read_u32_le(section_offset + 20)?,
            characteristics: src.read_u32_le(section_offset + 36)?,
        });
    }

    Ok(sections)
}
