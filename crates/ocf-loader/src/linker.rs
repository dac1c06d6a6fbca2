//! Module linking
//!
//! Turns a parsed RPL image into a resident module: sections are
//! placed into the code/data regions (link-time sections go to the
//! transient loader region), exports are collected, imports trigger
//! recursive loads and get their thunk slots filled, and relocations
//! are applied against the placed addresses.

use crate::module::{LoadedModule, LoadedSection, ModuleSymbol, SectionKind, SymbolKind};
use crate::registry::{LoaderState, ModuleRegistry};
use crate::rpl::{
    self, r_ppc, shf, shn, sht, Rela, RplImage, SectionHeader, Symbol, RELA_SIZE, STB_GLOBAL,
    STT_FUNC, STT_OBJECT, STT_TLS, SYMBOL_SIZE,
};
use ocf_core::error::{LoaderError, Result};
use ocf_cpu::espresso;
use ocf_memory::constants::{CODE_BASE, DATA_BASE};
use ocf_memory::SequentialExtent;
use std::collections::HashMap;
use tracing::{debug, error, warn};

/// Everything link() hands back for one module
pub(crate) struct LinkedArtifacts {
    pub(crate) module: LoadedModule,
    /// Runtime address the declared text base mapped to
    pub(crate) text_base: u32,
    /// Runtime address the declared data base mapped to
    pub(crate) data_base: u32,
}

/// Per-section placement record, index-aligned with the image sections
struct PlacedSection {
    header: SectionHeader,
    name: String,
    virt_addr: u32,
    virt_size: u32,
    /// Dependency name for SHT_RPL_IMPORTS, filled by import processing
    import_library: Option<String>,
}

fn section_align(header: &SectionHeader) -> u32 {
    if header.addralign.is_power_of_two() {
        header.addralign
    } else {
        4
    }
}

/// Map a declared address to its placed runtime address
fn calculate_relocated_address(address: u32, placed: &[PlacedSection]) -> Result<u32> {
    for section in placed {
        if section.virt_size > 0
            && address >= section.header.addr
            && address < section.header.addr + section.virt_size
        {
            return Ok(address - section.header.addr + section.virt_addr);
        }
    }
    Err(LoaderError::Relocation(format!("address 0x{:08x} is in no section", address)).into())
}

fn symbol_at(symtab: &[u8], index: u32) -> Result<Symbol> {
    Symbol::parse(symtab, (index * SYMBOL_SIZE) as usize).map_err(Into::into)
}

fn strtab_for(image: &RplImage, link: u32) -> Result<&[u8]> {
    image
        .sections
        .get(link as usize)
        .map(|s| s.data.as_slice())
        .ok_or_else(|| LoaderError::Format(format!("bad string table link {}", link)).into())
}

impl ModuleRegistry {
    pub(crate) fn link(
        &self,
        state: &mut LoaderState,
        module_name: &str,
        file_name: &str,
        image: &RplImage,
    ) -> Result<LinkedArtifacts> {
        let info = image.file_info()?;
        debug!(module = %module_name, text = info.text_size, data = info.data_size, load = info.load_size, "linking");

        // Carve this module's share out of each region
        let code_chunk = if info.text_size > 0 {
            state.code.alloc(info.text_size, info.text_align.max(1))?
        } else {
            0
        };
        let data_chunk = if info.data_size > 0 {
            state.data.alloc(info.data_size, info.data_align.max(1))?
        } else {
            0
        };
        let load_chunk = state.loader.alloc(info.load_size, info.load_align.max(1))?;
        self.commit_loader_pages(load_chunk, info.load_size)?;

        let mut code_seg = SequentialExtent::new("module code", code_chunk, info.text_size);
        let mut data_seg = SequentialExtent::new("module data", data_chunk, info.data_size);
        let mut load_seg = SequentialExtent::new("module load", load_chunk, info.load_size);

        // Place sections
        let mut placed = Vec::with_capacity(image.sections.len());
        for (index, section) in image.sections.iter().enumerate() {
            let header = section.header.clone();
            let mut virt_addr = 0;
            let mut virt_size = 0;

            if header.flags & shf::ALLOC != 0 && header.sh_type != sht::NULL {
                let size = if header.sh_type == sht::NOBITS {
                    header.size
                } else {
                    section.data.len() as u32
                };

                let seg = match header.sh_type {
                    sht::PROGBITS | sht::NOBITS => {
                        if header.flags & shf::EXECINSTR != 0 {
                            &mut code_seg
                        } else {
                            &mut data_seg
                        }
                    }
                    _ => &mut load_seg,
                };

                let addr = seg.alloc(size, section_align(&header))?;
                if header.sh_type == sht::NOBITS {
                    self.memory.fill_zero(addr, size)?;
                } else {
                    self.memory.write_bytes(addr, &section.data)?;
                }
                virt_addr = addr;
                virt_size = size;
            }

            placed.push(PlacedSection {
                name: image.section_name(index).to_string(),
                header,
                virt_addr,
                virt_size,
                import_library: None,
            });
        }

        let mut module = LoadedModule {
            name: file_name.to_string(),
            default_stack_size: info.stack_size,
            tls_align_shift: info.tls_align_shift,
            ..Default::default()
        };

        // Small-data bases for SDA21 relocations
        if let Some(sdata) = placed.iter().find(|s| s.name == ".sdata") {
            module.sda_base = sdata.virt_addr + 0x8000;
        }
        if let Some(sdata2) = placed.iter().find(|s| s.name == ".sdata2") {
            module.sda2_base = sdata2.virt_addr + 0x8000;
        }

        // TLS image bounds
        if let Some(thrdata) = placed.iter().find(|s| s.name == ".thrdata") {
            let start = thrdata.virt_addr;
            let mut end = thrdata.virt_addr + thrdata.virt_size;
            for section in &placed {
                if section.header.is_tls() && section.virt_size > 0 {
                    end = end.max(section.virt_addr + section.virt_size);
                }
            }
            module.tls_base = Some(start);
            module.tls_size = end - start;
        }
        module.tls_module_index = state.next_tls_module_index;
        state.next_tls_module_index += 1;

        self.process_exports(&mut module, image, &placed)?;
        self.process_imports(state, &mut module, image, &mut placed)?;
        self.process_symbols(&mut module, image, &placed)?;
        let tramp_range =
            self.process_relocations(state, &mut module, image, &placed, &mut code_seg)?;

        // A .syscall section gets an absolute branch to the kernel's
        // system call entry
        for section in &placed {
            if section.name == ".syscall" && section.virt_size >= 4 {
                match self.syscall_address() {
                    Some(addr) if addr < 0x03FF_FFFC => {
                        self.memory.write_be32(section.virt_addr, espresso::encode_b_abs(addr))?;
                    }
                    Some(addr) => {
                        warn!(addr = format_args!("0x{:08x}", addr), "syscall entry unreachable by ba");
                    }
                    None => warn!("module has .syscall but no syscall address is set"),
                }
            }
        }

        if image.header.entry != 0 {
            module.entry_point = calculate_relocated_address(image.header.entry, &placed)?;
        }

        for section in &placed {
            let progbits =
                section.header.sh_type == sht::PROGBITS || section.header.sh_type == sht::NOBITS;
            if progbits && section.virt_size > 0 {
                let kind = if section.header.flags & shf::EXECINSTR != 0 {
                    SectionKind::Code
                } else {
                    SectionKind::Data
                };
                module.sections.push(LoadedSection {
                    name: section.name.clone(),
                    kind,
                    start: section.virt_addr,
                    end: section.virt_addr + section.virt_size,
                });
            }
        }

        if let Some((start, end)) = tramp_range {
            module.sections.push(LoadedSection {
                name: "loader_thunks".to_string(),
                kind: SectionKind::Code,
                start,
                end,
            });
        }

        module.symbols.insert(
            "__start".to_string(),
            ModuleSymbol {
                address: module.entry_point,
                kind: SymbolKind::Function,
            },
        );

        let text_base = placed
            .iter()
            .find(|s| s.virt_size > 0 && s.header.addr == CODE_BASE)
            .map(|s| s.virt_addr)
            .unwrap_or(code_chunk);
        let data_base = placed
            .iter()
            .find(|s| s.virt_size > 0 && s.header.addr == DATA_BASE)
            .map(|s| s.virt_addr)
            .unwrap_or(data_chunk);

        Ok(LinkedArtifacts {
            module,
            text_base,
            data_base,
        })
    }

    fn process_exports(
        &self,
        module: &mut LoadedModule,
        image: &RplImage,
        placed: &[PlacedSection],
    ) -> Result<()> {
        for (index, section) in placed.iter().enumerate() {
            if section.header.sh_type != sht::RPL_EXPORTS || section.virt_size < 8 {
                continue;
            }

            let data = &image.sections[index].data;
            let count = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;

            for i in 0..count {
                let at = 8 + i * 8;
                let Some(entry) = data.get(at..at + 8) else {
                    return Err(LoaderError::Format(format!(
                        "export {} out of bounds in {}",
                        i, section.name
                    ))
                    .into());
                };
                let mut addr = u32::from_be_bytes([entry[0], entry[1], entry[2], entry[3]]);
                let mut name_offset = u32::from_be_bytes([entry[4], entry[5], entry[6], entry[7]]);

                if name_offset & 0x8000_0000 != 0 {
                    // TLS exports keep their offset into the TLS image
                    name_offset &= !0x8000_0000;
                } else {
                    addr = calculate_relocated_address(addr, placed)?;
                }

                let name = rpl::string_at(data, name_offset);
                module.exports.insert(name.to_string(), addr);
            }
        }
        Ok(())
    }

    fn process_imports(
        &self,
        state: &mut LoaderState,
        module: &mut LoadedModule,
        image: &RplImage,
        placed: &mut [PlacedSection],
    ) -> Result<()> {
        let mut import_symbols: HashMap<String, u32> = HashMap::new();

        // Load every dependency, merging its exports
        for section in placed.iter_mut() {
            if section.header.sh_type != sht::RPL_IMPORTS || section.virt_size < 9 {
                continue;
            }

            let library = self
                .memory
                .read_cstring(section.virt_addr + 8, section.virt_size - 8)?;
            section.import_library = Some(library.clone());

            match self.load_no_lock(state, &library) {
                Ok(dependency) => {
                    for (name, addr) in &dependency.exports {
                        import_symbols.entry(name.clone()).or_insert(*addr);
                    }
                }
                Err(err) => {
                    debug!(module = %module.name, library = %library, %err, "missing library");
                }
            }

            // The name served its purpose; the section now only holds
            // import thunk slots
            self.memory
                .fill_zero(section.virt_addr + 8, section.virt_size - 8)?;
        }

        // Fill import slots referenced by global symbols
        for (index, section) in placed.iter().enumerate() {
            if section.header.sh_type != sht::SYMTAB {
                continue;
            }

            let symtab = &image.sections[index].data;
            let strtab = strtab_for(image, section.header.link)?;

            for at in (0..symtab.len()).step_by(SYMBOL_SIZE as usize) {
                let sym = Symbol::parse(symtab, at)?;
                if sym.binding() != STB_GLOBAL {
                    continue;
                }

                let name = rpl::string_at(strtab, sym.name);
                if sym.shndx >= shn::LORESERVE {
                    warn!(symbol = name, shndx = sym.shndx, "symbol in reserved section");
                    continue;
                }

                let Some(target) = placed.get(sym.shndx as usize) else {
                    continue;
                };
                if target.header.sh_type != sht::RPL_IMPORTS {
                    continue;
                }

                let library = target.import_library.as_deref().unwrap_or(&target.name);
                let address = match import_symbols.get(name) {
                    Some(&addr) => addr,
                    None => match sym.sym_type() {
                        STT_FUNC => self.stubs.function_thunk(library, name)?,
                        STT_OBJECT => self.stubs.data_address(library, name)?,
                        STT_TLS => {
                            warn!(symbol = name, "unresolved TLS import");
                            0
                        }
                        other => {
                            warn!(symbol = name, sym_type = other, "unexpected import symbol type");
                            continue;
                        }
                    },
                };

                let slot = sym
                    .value
                    .wrapping_sub(target.header.addr)
                    .wrapping_add(target.virt_addr);
                self.memory.write_be32(slot, address)?;
            }
        }

        Ok(())
    }

    fn process_symbols(
        &self,
        module: &mut LoadedModule,
        image: &RplImage,
        placed: &[PlacedSection],
    ) -> Result<()> {
        for (index, section) in placed.iter().enumerate() {
            if section.header.sh_type != sht::SYMTAB {
                continue;
            }

            let symtab = &image.sections[index].data;
            let strtab = strtab_for(image, section.header.link)?;

            for at in (0..symtab.len()).step_by(SYMBOL_SIZE as usize) {
                let sym = Symbol::parse(symtab, at)?;
                let name = rpl::string_at(strtab, sym.name);

                if sym.shndx >= shn::LORESERVE {
                    if sym.value != 0 {
                        warn!(
                            symbol = name,
                            shndx = sym.shndx,
                            value = format_args!("0x{:08x}", sym.value),
                            "skipping reserved-section symbol"
                        );
                    }
                    continue;
                }

                let Some(symsec) = placed.get(sym.shndx as usize) else {
                    continue;
                };
                if symsec.virt_size == 0 || name.is_empty() {
                    continue;
                }

                let relocated = sym
                    .value
                    .wrapping_sub(symsec.header.addr)
                    .wrapping_add(symsec.virt_addr);
                let (kind, address) = match sym.sym_type() {
                    STT_FUNC => (SymbolKind::Function, relocated),
                    STT_OBJECT => (SymbolKind::Data, relocated),
                    // TLS symbols keep their unrelocated offset
                    STT_TLS => (SymbolKind::Tls, sym.value),
                    _ => (SymbolKind::Unknown, relocated),
                };

                module.symbols.insert(name.to_string(), ModuleSymbol { address, kind });
            }
        }
        Ok(())
    }

    fn process_relocations(
        &self,
        state: &mut LoaderState,
        module: &mut LoadedModule,
        image: &RplImage,
        placed: &[PlacedSection],
        code_seg: &mut SequentialExtent,
    ) -> Result<Option<(u32, u32)>> {
        let mut trampolines: HashMap<u32, u32> = HashMap::new();
        let tramp_start = code_seg.current_addr();

        for (index, section) in placed.iter().enumerate() {
            if section.header.sh_type != sht::RELA {
                continue;
            }

            let rela_data = &image.sections[index].data;
            let symtab_index = section.header.link as usize;
            let target = placed.get(section.header.info as usize).ok_or_else(|| {
                LoaderError::Relocation(format!("bad target section in {}", section.name))
            })?;
            let symtab = &image
                .sections
                .get(symtab_index)
                .ok_or_else(|| {
                    LoaderError::Relocation(format!("bad symtab link in {}", section.name))
                })?
                .data;
            let strtab = strtab_for(image, placed[symtab_index].header.link)?;

            for at in (0..rela_data.len()).step_by(RELA_SIZE as usize) {
                let rela = Rela::parse(rela_data, at)?;
                let relo_addr = rela
                    .offset
                    .wrapping_sub(target.header.addr)
                    .wrapping_add(target.virt_addr);
                let sym = symbol_at(symtab, rela.r_sym())?;
                let name = rpl::string_at(strtab, sym.name);

                if sym.shndx == shn::UNDEF {
                    continue;
                }

                let symbol_section = if sym.shndx < shn::LORESERVE {
                    placed.get(sym.shndx as usize)
                } else if sym.shndx == shn::ABS {
                    None
                } else {
                    return Err(LoaderError::Relocation(format!(
                        "symbol {} in unsupported section 0x{:04x}",
                        name, sym.shndx
                    ))
                    .into());
                };

                let r_type = rela.r_type();
                let tls_reloc = r_type == r_ppc::DTPREL32 || r_type == r_ppc::DTPMOD32;
                let mut sym_addr = sym.value.wrapping_add(rela.addend as u32);

                if let Some(symsec) = symbol_section {
                    let import = symsec.header.sh_type == sht::RPL_IMPORTS;
                    if import || !tls_reloc {
                        let mut addr = calculate_relocated_address(sym.value, placed)?;
                        if import {
                            // Import slots hold the resolved address
                            addr = self.memory.read_be32(addr)?;
                        }
                        sym_addr = addr.wrapping_add(rela.addend as u32);
                    }
                }

                match r_type {
                    r_ppc::ADDR32 => self.memory.write_be32(relo_addr, sym_addr)?,
                    r_ppc::ADDR16_LO => {
                        self.memory.write_be16(relo_addr, (sym_addr & 0xFFFF) as u16)?
                    }
                    r_ppc::ADDR16_HI => {
                        self.memory.write_be16(relo_addr, (sym_addr >> 16) as u16)?
                    }
                    r_ppc::ADDR16_HA => self
                        .memory
                        .write_be16(relo_addr, (sym_addr.wrapping_add(0x8000) >> 16) as u16)?,
                    r_ppc::REL24 => {
                        let ins = self.memory.read_be32(relo_addr)?;
                        if ins >> 26 != 18 {
                            return Err(LoaderError::Relocation(format!(
                                "REL24 against non-branch at 0x{:08x}",
                                relo_addr
                            ))
                            .into());
                        }

                        let mut branch_target = sym_addr;
                        if !espresso::branch_in_range(relo_addr, sym_addr) {
                            branch_target = self.trampoline_for(
                                module,
                                code_seg,
                                &mut trampolines,
                                sym_addr,
                                name,
                            )?;
                            if !espresso::branch_in_range(relo_addr, branch_target) {
                                return Err(LoaderError::Relocation(format!(
                                    "trampoline for {} still out of range",
                                    name
                                ))
                                .into());
                            }
                        }

                        self.memory.write_be32(
                            relo_addr,
                            espresso::patch_branch_target(ins, relo_addr, branch_target),
                        )?;
                    }
                    r_ppc::EMB_SDA21 => {
                        let ins = self.memory.read_be32(relo_addr)?;
                        let offset = match espresso::d_form_ra(ins) {
                            0 => 0i64,
                            2 => i64::from(sym_addr) - i64::from(module.sda2_base),
                            13 => i64::from(sym_addr) - i64::from(module.sda_base),
                            ra => {
                                return Err(LoaderError::Relocation(format!(
                                    "SDA21 against r{}",
                                    ra
                                ))
                                .into())
                            }
                        };

                        if offset < i64::from(i16::MIN) || offset > i64::from(i16::MAX) {
                            error!(
                                symbol = name,
                                offset, "SDA relocation out of signed 16-bit range"
                            );
                            continue;
                        }

                        self.memory
                            .write_be32(relo_addr, (ins & 0xFFFF_0000) | (offset as u16 as u32))?;
                    }
                    r_ppc::DTPREL32 => self.memory.write_be32(relo_addr, sym_addr)?,
                    r_ppc::DTPMOD32 => {
                        let mut module_index = module.tls_module_index;
                        if let Some(symsec) = symbol_section {
                            if symsec.header.sh_type == sht::RPL_IMPORTS {
                                let library =
                                    symsec.import_library.as_deref().unwrap_or(&symsec.name);
                                let dependency = self.load_no_lock(state, library)?;
                                module_index = dependency.tls_module_index;
                            }
                        }
                        self.memory.write_be32(relo_addr, module_index)?;
                    }
                    other => {
                        error!(r_type = other, offset = format_args!("0x{:08x}", rela.offset), "unknown relocation type");
                    }
                }
            }
        }

        let tramp_end = code_seg.current_addr();
        Ok((tramp_end > tramp_start).then_some((tramp_start, tramp_end)))
    }

    /// Branch island for a REL24 target out of direct reach
    fn trampoline_for(
        &self,
        module: &mut LoadedModule,
        code_seg: &mut SequentialExtent,
        trampolines: &mut HashMap<u32, u32>,
        target: u32,
        symbol_name: &str,
    ) -> Result<u32> {
        if let Some(&addr) = trampolines.get(&target) {
            return Ok(addr);
        }

        let tramp_addr = code_seg.alloc(4, 4)?;
        let ins = if espresso::branch_in_range(tramp_addr, target) {
            espresso::encode_b_rel(tramp_addr, target)
        } else if target < 0x03FF_FFFC {
            espresso::encode_b_abs(target)
        } else {
            return Err(LoaderError::Relocation(format!(
                "no trampoline encoding reaches 0x{:08x} for {}",
                target, symbol_name
            ))
            .into());
        };
        self.memory.write_be32(tramp_addr, ins)?;

        module.symbols.insert(
            format!("{}#thunk", symbol_name),
            ModuleSymbol {
                address: tramp_addr,
                kind: SymbolKind::Function,
            },
        );
        trampolines.insert(target, tramp_addr);
        Ok(tramp_addr)
    }
}
