//! Synthetic RPL image generation
//!
//! Every HLE library is published to the loader as a real RPL image:
//! a .text full of `kc; blr` thunks, export sections with matching
//! ADDR32 relocations so the loader assigns runtime addresses, import
//! sections naming library dependencies, and the symtab/strtab/CRC/
//! file info plumbing a real RPL carries.

use crate::library::{Library, LibrarySymbol, BASE_SYMBOL_INDEX, FUNCTION_STUB_SIZE};
use crate::typeinfo;
use ocf_core::error::{EmulatorError, Result};
use ocf_cpu::espresso;
use ocf_loader::rpl::{
    self, r_ppc, shf, sht, FileInfo, Header, Rela, SectionHeader, Symbol, FILE_INFO_VERSION,
    RELA_SIZE, SECTION_HEADER_SIZE, STB_GLOBAL, STB_LOCAL, STT_FUNC, STT_OBJECT, STT_SECTION,
    SYMBOL_SIZE,
};
use tracing::debug;

/// Declared base of the generated .text
pub const CODE_BASE: u32 = 0x0200_0000;

/// Declared base of the generated .data
pub const DATA_BASE: u32 = 0x1000_0000;

/// Declared base of the export/import/symtab chain
pub const LOAD_BASE: u32 = 0xC000_0000;

const EXPORT_SIZE: u32 = 8;

#[derive(Default)]
struct GenSection {
    header: SectionHeader,
    data: Vec<u8>,
}

fn align_up(value: u32, align: u32) -> u32 {
    let align = align.max(1);
    (value + align - 1) & !(align - 1)
}

fn add_string(data: &mut Vec<u8>, s: &str) -> u32 {
    let pos = data.len() as u32;
    data.extend_from_slice(s.as_bytes());
    data.push(0);
    pos
}

fn write_u32_at(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

/// Build the RPL image bytes for a library
///
/// System call ids must already be assigned; the thunks embed them.
/// Assigns each symbol's section offset as a side effect.
pub fn generate(library: &mut Library) -> Result<Vec<u8>> {
    let mut num_code_exports = 0u32;
    let mut num_data_exports = 0u32;
    let mut text_size = 0u32;
    let mut data_size = 0u32;
    let mut num_functions = 0u32;
    let mut num_data = 0u32;

    for symbol in library.symbols() {
        match symbol {
            LibrarySymbol::Function(func) => {
                num_functions += 1;
                text_size += FUNCTION_STUB_SIZE;
                if func.exported {
                    num_code_exports += 1;
                }
            }
            LibrarySymbol::Data(data) => {
                num_data += 1;
                data_size = align_up(data_size, data.align) + data.size;
                if data.exported {
                    num_data_exports += 1;
                }
            }
        }
    }

    let has_type_info = !library.type_info().is_empty();

    // Assign section indices; index 0 stays the NULL section and
    // doubles as "absent"
    fn take(present: bool, next: &mut usize) -> usize {
        if present {
            let idx = *next;
            *next += 1;
            idx
        } else {
            0
        }
    }

    let mut next = 1usize;
    let text_idx = take(text_size > 0, &mut next);
    let fexport_idx = take(num_code_exports > 0, &mut next);
    let fexport_rela_idx = take(num_code_exports > 0, &mut next);
    let data_idx = take(data_size > 0 || has_type_info, &mut next);
    let data_rela_idx = take(has_type_info, &mut next);
    let dexport_idx = take(num_data_exports > 0, &mut next);
    let dexport_rela_idx = take(num_data_exports > 0, &mut next);
    let first_import_idx = take(!library.dependencies().is_empty(), &mut next);
    if first_import_idx != 0 {
        next += library.dependencies().len() - 1;
    }
    let symtab_idx = take(true, &mut next);
    let strtab_idx = take(true, &mut next);
    let shstrtab_idx = take(true, &mut next);
    let crc_idx = take(true, &mut next);
    let fileinfo_idx = take(true, &mut next);
    let num_sections = next;

    let mut sections: Vec<GenSection> = Vec::new();
    sections.resize_with(num_sections, GenSection::default);

    sections[shstrtab_idx].data.push(0);
    sections[strtab_idx].data.push(0);

    let mut load_addr = LOAD_BASE;

    if text_idx != 0 {
        let name = add_string(&mut sections[shstrtab_idx].data, ".text");
        sections[text_idx].header = SectionHeader {
            name,
            sh_type: sht::PROGBITS,
            flags: shf::EXECINSTR | shf::ALLOC,
            addr: CODE_BASE,
            addralign: 32,
            ..Default::default()
        };
    }

    if fexport_idx != 0 {
        let name = add_string(&mut sections[shstrtab_idx].data, ".fexports");
        let addr = align_up(load_addr, 4);
        let size = EXPORT_SIZE + EXPORT_SIZE * num_code_exports;
        sections[fexport_idx].header = SectionHeader {
            name,
            sh_type: sht::RPL_EXPORTS,
            flags: shf::EXECINSTR | shf::ALLOC,
            addr,
            size,
            addralign: 4,
            ..Default::default()
        };
        sections[fexport_idx].data.resize(size as usize, 0);
        write_u32_at(&mut sections[fexport_idx].data, 0, num_code_exports);

        let name = add_string(&mut sections[shstrtab_idx].data, ".rela.fexports");
        sections[fexport_rela_idx].header = SectionHeader {
            name,
            sh_type: sht::RELA,
            size: RELA_SIZE * num_code_exports,
            link: symtab_idx as u32,
            info: fexport_idx as u32,
            addralign: 4,
            entsize: RELA_SIZE,
            ..Default::default()
        };
        sections[fexport_rela_idx]
            .data
            .resize((RELA_SIZE * num_code_exports) as usize, 0);
    }

    // Write function thunks and code exports
    if text_size > 0 {
        let mut export_idx = 0u32;
        let mut text_offset = 0u32;
        let mut text_data = vec![0u8; text_size as usize];
        let fexport_addr = sections[fexport_idx].header.addr;

        for symbol in library.symbols_mut() {
            let LibrarySymbol::Function(func) = symbol else {
                continue;
            };

            let syscall_id = func.syscall_id.ok_or_else(|| {
                EmulatorError::Unsupported(format!(
                    "{} generated before system call registration",
                    func.name
                ))
            })?;

            let at = text_offset as usize;
            text_data[at..at + 4].copy_from_slice(&espresso::encode_kc(syscall_id).to_be_bytes());
            text_data[at + 4..at + 8].copy_from_slice(&espresso::BLR.to_be_bytes());

            if func.exported {
                let entry = (EXPORT_SIZE + EXPORT_SIZE * export_idx) as usize;
                let name = add_string(&mut sections[fexport_idx].data, &func.name);
                write_u32_at(&mut sections[fexport_idx].data, entry, CODE_BASE + text_offset);
                write_u32_at(&mut sections[fexport_idx].data, entry + 4, name);

                let mut rela_bytes = Vec::new();
                Rela {
                    offset: fexport_addr + entry as u32,
                    info: r_ppc::ADDR32 | (func.index << 8),
                    addend: 0,
                }
                .write(&mut rela_bytes);
                let rela_at = (RELA_SIZE * export_idx) as usize;
                sections[fexport_rela_idx].data[rela_at..rela_at + RELA_SIZE as usize]
                    .copy_from_slice(&rela_bytes);
                export_idx += 1;
            }

            func.offset = text_offset;
            text_offset += FUNCTION_STUB_SIZE;
        }

        sections[text_idx].data = text_data;

        if fexport_idx != 0 {
            load_addr = sections[fexport_idx].header.addr
                + sections[fexport_idx].data.len() as u32;
        }
    }

    if data_idx != 0 {
        let name = add_string(&mut sections[shstrtab_idx].data, ".data");
        sections[data_idx].header = SectionHeader {
            name,
            sh_type: sht::PROGBITS,
            flags: shf::WRITE | shf::ALLOC,
            addr: DATA_BASE,
            addralign: 32,
            ..Default::default()
        };
    }

    if data_rela_idx != 0 {
        let name = add_string(&mut sections[shstrtab_idx].data, ".rela.data");
        sections[data_rela_idx].header = SectionHeader {
            name,
            sh_type: sht::RELA,
            link: symtab_idx as u32,
            info: data_idx as u32,
            addralign: 4,
            entsize: RELA_SIZE,
            ..Default::default()
        };
    }

    if dexport_idx != 0 {
        let name = add_string(&mut sections[shstrtab_idx].data, ".dexports");
        let addr = align_up(load_addr, 4);
        let size = EXPORT_SIZE + EXPORT_SIZE * num_data_exports;
        sections[dexport_idx].header = SectionHeader {
            name,
            sh_type: sht::RPL_EXPORTS,
            flags: shf::ALLOC,
            addr,
            size,
            addralign: 4,
            ..Default::default()
        };
        sections[dexport_idx].data.resize(size as usize, 0);
        write_u32_at(&mut sections[dexport_idx].data, 0, num_data_exports);

        let name = add_string(&mut sections[shstrtab_idx].data, ".rela.dexports");
        sections[dexport_rela_idx].header = SectionHeader {
            name,
            sh_type: sht::RELA,
            size: RELA_SIZE * num_data_exports,
            link: symtab_idx as u32,
            info: dexport_idx as u32,
            addralign: 4,
            entsize: RELA_SIZE,
            ..Default::default()
        };
        sections[dexport_rela_idx]
            .data
            .resize((RELA_SIZE * num_data_exports) as usize, 0);
    }

    // Lay out data symbols and data exports
    if data_size > 0 {
        let mut export_idx = 0u32;
        let mut data_offset = 0u32;
        sections[data_idx].data.resize(data_size as usize, 0);
        let dexport_addr = sections[dexport_idx].header.addr;

        for symbol in library.symbols_mut() {
            let LibrarySymbol::Data(data_symbol) = symbol else {
                continue;
            };

            data_offset = align_up(data_offset, data_symbol.align);

            if data_symbol.exported {
                let entry = (EXPORT_SIZE + EXPORT_SIZE * export_idx) as usize;
                let name = add_string(&mut sections[dexport_idx].data, &data_symbol.name);
                write_u32_at(&mut sections[dexport_idx].data, entry, DATA_BASE + data_offset);
                write_u32_at(&mut sections[dexport_idx].data, entry + 4, name);

                let mut rela_bytes = Vec::new();
                Rela {
                    offset: dexport_addr + entry as u32,
                    info: r_ppc::ADDR32 | (data_symbol.index << 8),
                    addend: 0,
                }
                .write(&mut rela_bytes);
                let rela_at = (RELA_SIZE * export_idx) as usize;
                sections[dexport_rela_idx].data[rela_at..rela_at + RELA_SIZE as usize]
                    .copy_from_slice(&rela_bytes);
                export_idx += 1;
            }

            data_symbol.offset = data_offset;
            data_offset += data_symbol.size;
        }

        if dexport_idx != 0 {
            load_addr = sections[dexport_idx].header.addr
                + sections[dexport_idx].data.len() as u32;
        }
    }

    // Import sections carry the dependency name after an empty
    // count/signature header, where the loader expects to find it
    if first_import_idx != 0 {
        for (i, dep) in library.dependencies().iter().enumerate() {
            let idx = first_import_idx + i;
            let name = add_string(
                &mut sections[shstrtab_idx].data,
                &format!(".fimport_{}", dep),
            );
            let mut data = vec![0u8; 8];
            data.extend_from_slice(dep.as_bytes());
            data.push(0);

            let addr = align_up(load_addr, 4);
            sections[idx].header = SectionHeader {
                name,
                sh_type: sht::RPL_IMPORTS,
                flags: shf::ALLOC | shf::EXECINSTR,
                addr,
                size: data.len() as u32,
                addralign: 4,
                ..Default::default()
            };
            load_addr = addr + data.len() as u32;
            sections[idx].data = data;
        }
    }

    if has_type_info {
        let mut data = std::mem::take(&mut sections[data_idx].data);
        let mut relocations = std::mem::take(&mut sections[data_rela_idx].data);
        typeinfo::generate_type_descriptors(library, DATA_BASE, &mut data, &mut relocations)?;
        sections[data_idx].data = data;
        sections[data_rela_idx].data = relocations;
    }

    // Symbol table: NULL, $TEXT, $DATA, then every library symbol at
    // its assigned index
    let symbol_count = BASE_SYMBOL_INDEX + num_functions + num_data;
    let mut symtab = vec![0u8; (symbol_count * SYMBOL_SIZE) as usize];

    let put_symbol = |symtab: &mut Vec<u8>, index: u32, sym: Symbol| {
        let mut bytes = Vec::new();
        sym.write(&mut bytes);
        let at = (index * SYMBOL_SIZE) as usize;
        symtab[at..at + SYMBOL_SIZE as usize].copy_from_slice(&bytes);
    };

    put_symbol(
        &mut symtab,
        1,
        Symbol {
            name: add_string(&mut sections[strtab_idx].data, "$TEXT"),
            value: CODE_BASE,
            info: (STB_LOCAL << 4) | STT_SECTION,
            shndx: text_idx as u16,
            ..Default::default()
        },
    );
    put_symbol(
        &mut symtab,
        2,
        Symbol {
            name: add_string(&mut sections[strtab_idx].data, "$DATA"),
            value: DATA_BASE,
            info: (STB_LOCAL << 4) | STT_SECTION,
            shndx: data_idx as u16,
            ..Default::default()
        },
    );

    for symbol in library.symbols() {
        let (index, sym) = match symbol {
            LibrarySymbol::Function(func) => {
                let binding = if func.exported { STB_GLOBAL } else { STB_LOCAL };
                (
                    func.index,
                    Symbol {
                        name: add_string(&mut sections[strtab_idx].data, &func.name),
                        value: CODE_BASE + func.offset,
                        size: FUNCTION_STUB_SIZE,
                        info: (binding << 4) | STT_FUNC,
                        shndx: text_idx as u16,
                        ..Default::default()
                    },
                )
            }
            LibrarySymbol::Data(data) => {
                let binding = if data.exported { STB_GLOBAL } else { STB_LOCAL };
                (
                    data.index,
                    Symbol {
                        name: add_string(&mut sections[strtab_idx].data, &data.name),
                        value: DATA_BASE + data.offset,
                        size: data.size,
                        info: (binding << 4) | STT_OBJECT,
                        shndx: data_idx as u16,
                        ..Default::default()
                    },
                )
            }
        };
        put_symbol(&mut symtab, index, sym);
    }

    let name = add_string(&mut sections[shstrtab_idx].data, ".symtab");
    let symtab_addr = align_up(load_addr, 4);
    sections[symtab_idx].header = SectionHeader {
        name,
        sh_type: sht::SYMTAB,
        flags: shf::ALLOC,
        addr: symtab_addr,
        size: symtab.len() as u32,
        link: strtab_idx as u32,
        info: 1,
        addralign: 4,
        entsize: SYMBOL_SIZE,
        ..Default::default()
    };
    sections[symtab_idx].data = symtab;
    load_addr = symtab_addr + sections[symtab_idx].data.len() as u32;

    let name = add_string(&mut sections[shstrtab_idx].data, ".strtab");
    let strtab_addr = align_up(load_addr, 4);
    sections[strtab_idx].header = SectionHeader {
        name,
        sh_type: sht::STRTAB,
        flags: shf::ALLOC,
        addr: strtab_addr,
        size: sections[strtab_idx].data.len() as u32,
        addralign: 4,
        ..Default::default()
    };
    load_addr = strtab_addr + sections[strtab_idx].data.len() as u32;

    let name = add_string(&mut sections[shstrtab_idx].data, ".shstrtab");
    let shstrtab_addr = align_up(load_addr, 4);
    sections[shstrtab_idx].header = SectionHeader {
        name,
        sh_type: sht::STRTAB,
        flags: shf::ALLOC,
        addr: shstrtab_addr,
        size: sections[shstrtab_idx].data.len() as u32,
        addralign: 4,
        ..Default::default()
    };

    // File info
    sections[fileinfo_idx].header = SectionHeader {
        sh_type: sht::RPL_FILEINFO,
        size: rpl::FILE_INFO_SIZE,
        addralign: 4,
        ..Default::default()
    };

    let mut info = FileInfo {
        version: FILE_INFO_VERSION,
        text_align: 32,
        data_align: 4096,
        load_align: 4,
        stack_size: 0x10000,
        filename: rpl::FILE_INFO_SIZE,
        heap_size: 0x8000,
        min_version: 0x5078,
        compression_level: -1,
        cafe_sdk_version: 0x5335,
        cafe_sdk_revision: 0x10D4B,
        ..Default::default()
    };

    // Account every section against its region to size the file info
    for section in &mut sections {
        if !section.data.is_empty() {
            section.header.size = section.data.len() as u32;
        }

        let header = &section.header;
        if header.addr >= CODE_BASE && header.addr < DATA_BASE {
            info.text_size = info.text_size.max(header.addr + header.size - CODE_BASE);
        } else if header.addr >= DATA_BASE && header.addr < LOAD_BASE {
            info.data_size = info.data_size.max(header.addr + header.size - DATA_BASE);
        } else if header.addr >= LOAD_BASE {
            info.load_size = info.load_size.max(header.addr + header.size - LOAD_BASE);
        } else if header.addr == 0
            && header.sh_type != sht::RPL_CRCS
            && header.sh_type != sht::RPL_FILEINFO
        {
            info.temp_size += header.size + 128;
        }
    }

    info.text_size = align_up(info.text_size, info.text_align);
    info.data_size = align_up(info.data_size, info.data_align);
    info.load_size = align_up(info.load_size, info.load_align);

    let mut fileinfo_data = Vec::with_capacity(rpl::FILE_INFO_SIZE as usize + 32);
    info.write(&mut fileinfo_data);
    add_string(&mut fileinfo_data, library.name());
    sections[fileinfo_idx].header.size = fileinfo_data.len() as u32;
    sections[fileinfo_idx].data = fileinfo_data;

    // Per-section CRCs; the CRC section's own slot stays zero
    sections[crc_idx].header = SectionHeader {
        sh_type: sht::RPL_CRCS,
        size: 4 * num_sections as u32,
        addralign: 4,
        entsize: 4,
        ..Default::default()
    };
    let mut crc_data = vec![0u8; 4 * num_sections];
    for i in 0..num_sections {
        if i == crc_idx || sections[i].data.is_empty() {
            continue;
        }
        let mut crc = flate2::Crc::new();
        crc.update(&sections[i].data);
        write_u32_at(&mut crc_data, i * 4, crc.sum());
    }
    sections[crc_idx].data = crc_data;

    // Entry point if the library declares one
    let entry = match library.find_symbol("rpl_entry") {
        Some(LibrarySymbol::Function(func)) => CODE_BASE + func.offset,
        _ => 0,
    };

    // Assign file offsets: crc, file info, data, exports, imports,
    // symbol and string tables, code, relocations
    let mut offset = 0x40 + align_up(SECTION_HEADER_SIZE as u32 * num_sections as u32, 64);

    sections[crc_idx].header.offset = offset;
    offset += sections[crc_idx].header.size;
    sections[fileinfo_idx].header.offset = offset;
    offset += sections[fileinfo_idx].header.size;

    fn placement_rank(header: &SectionHeader) -> Option<u32> {
        match header.sh_type {
            sht::PROGBITS if header.flags & shf::EXECINSTR == 0 => Some(0),
            sht::RPL_EXPORTS => Some(1),
            sht::RPL_IMPORTS => Some(2),
            sht::SYMTAB | sht::STRTAB => Some(3),
            sht::PROGBITS => Some(4),
            sht::RELA => Some(5),
            _ => None,
        }
    }
    for rank in 0..=5 {
        for section in &mut sections {
            if placement_rank(&section.header) == Some(rank) {
                section.header.offset = offset;
                offset += section.header.size;
            }
        }
    }

    // Serialize
    let mut image = vec![0u8; offset as usize];
    let mut header_bytes = Vec::new();
    Header {
        entry,
        shoff: 0x40,
        shentsize: SECTION_HEADER_SIZE,
        shnum: num_sections as u16,
        shstrndx: shstrtab_idx as u16,
    }
    .write(&mut header_bytes);
    image[..header_bytes.len()].copy_from_slice(&header_bytes);

    let mut sh_offset = 0x40usize;
    for section in &sections {
        let mut bytes = Vec::new();
        section.header.write(&mut bytes);
        image[sh_offset..sh_offset + bytes.len()].copy_from_slice(&bytes);
        sh_offset += SECTION_HEADER_SIZE as usize;
    }

    for section in &sections {
        if section.header.offset != 0 && !section.data.is_empty() {
            let at = section.header.offset as usize;
            image[at..at + section.data.len()].copy_from_slice(&section.data);
        }
    }

    debug!(
        library = library.name(),
        size = image.len(),
        sections = num_sections,
        "generated rpl image"
    );

    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::{ParamKind, Signature};
    use crate::library::HostFn;
    use ocf_cpu::syscalls::SyscallTable;
    use ocf_loader::rpl::RplImage;
    use ocf_memory::AddressSpace;
    use std::sync::Arc;

    fn nop_host() -> HostFn {
        Arc::new(|_, _| Ok(None))
    }

    fn coreinit_like() -> Library {
        let mut lib = Library::new("coreinit.rpl");
        lib.add_function("OSReport", Signature::new(&[ParamKind::U32], None), nop_host())
            .unwrap();
        lib.add_function(
            "OSGetTime",
            Signature::new(&[], Some(ParamKind::U64)),
            nop_host(),
        )
        .unwrap();
        lib.add_data("OSDefaultThread", 0x40, 8, None);
        lib
    }

    fn generate_ready(lib: &mut Library) -> Vec<u8> {
        let table = SyscallTable::new();
        let memory = AddressSpace::new().unwrap();
        lib.register_system_calls(&table, &memory);
        generate(lib).unwrap()
    }

    #[test]
    fn test_generated_image_parses_back() {
        let mut lib = coreinit_like();
        let image = generate_ready(&mut lib);

        let parsed = RplImage::parse(&image).unwrap();
        assert!(parsed.file_info().is_ok());

        // Section names resolve through the shstrtab
        let names: Vec<String> = (0..parsed.sections.len())
            .map(|i| parsed.section_name(i).to_string())
            .collect();
        assert!(names.iter().any(|n| n == ".text"));
        assert!(names.iter().any(|n| n == ".fexports"));
        assert!(names.iter().any(|n| n == ".dexports"));
        assert!(names.iter().any(|n| n == ".symtab"));
    }

    #[test]
    fn test_generation_requires_syscall_ids() {
        let mut lib = coreinit_like();
        assert!(generate(&mut lib).is_err());
    }

    #[test]
    fn test_export_counts_and_names() {
        let mut lib = coreinit_like();
        let image = generate_ready(&mut lib);
        let parsed = RplImage::parse(&image).unwrap();

        let fexports = parsed
            .sections
            .iter()
            .find(|s| {
                s.header.sh_type == sht::RPL_EXPORTS && s.header.flags & shf::EXECINSTR != 0
            })
            .unwrap();
        let count = u32::from_be_bytes(fexports.data[0..4].try_into().unwrap());
        assert_eq!(count, 2);

        // First export value points into the declared text region
        let value = u32::from_be_bytes(fexports.data[8..12].try_into().unwrap());
        assert!((CODE_BASE..DATA_BASE).contains(&value));
        let name_off = u32::from_be_bytes(fexports.data[12..16].try_into().unwrap());
        assert_eq!(rpl::string_at(&fexports.data, name_off), "OSReport");
    }

    #[test]
    fn test_import_section_names_dependency() {
        let mut lib = Library::new("sysapp.rpl");
        lib.add_dependency("coreinit");
        lib.add_function("SYSLaunchTitle", Signature::new(&[ParamKind::U64], None), nop_host())
            .unwrap();

        let image = generate_ready(&mut lib);
        let parsed = RplImage::parse(&image).unwrap();

        let import = parsed
            .sections
            .iter()
            .find(|s| s.header.sh_type == sht::RPL_IMPORTS)
            .unwrap();
        assert_eq!(rpl::string_at(&import.data, 8), "coreinit");
    }

    #[test]
    fn test_crcs_match_section_data() {
        let mut lib = coreinit_like();
        let image = generate_ready(&mut lib);
        let parsed = RplImage::parse(&image).unwrap();

        let crc_section_idx = parsed
            .sections
            .iter()
            .position(|s| s.header.sh_type == sht::RPL_CRCS)
            .unwrap();
        let crc_data = parsed.sections[crc_section_idx].data.clone();

        for (i, section) in parsed.sections.iter().enumerate() {
            let stored = u32::from_be_bytes(crc_data[i * 4..i * 4 + 4].try_into().unwrap());
            if i == crc_section_idx || section.data.is_empty() {
                assert_eq!(stored, 0);
            } else {
                let mut crc = flate2::Crc::new();
                crc.update(&section.data);
                assert_eq!(stored, crc.sum(), "crc mismatch for section {}", i);
            }
        }
    }

    #[test]
    fn test_function_offsets_are_assigned() {
        let mut lib = coreinit_like();
        let _ = generate_ready(&mut lib);

        let offsets: Vec<u32> = lib
            .symbols()
            .iter()
            .filter_map(|s| match s {
                LibrarySymbol::Function(f) => Some(f.offset),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![0, FUNCTION_STUB_SIZE]);
    }
}
