//! C++ runtime type descriptors for HLE libraries
//!
//! Guest code compiled by the GHS toolchain does dynamic casts through
//! type descriptors and vtables exported by system libraries. Each
//! descriptor is emitted into the generated .data section with every
//! address filled in via relocations, so the loader places them like
//! any other data.

use crate::library::{Library, LibrarySymbol};
use ocf_core::error::{EmulatorError, Result};
use ocf_loader::rpl::{r_ppc, Rela};

/// Flags word terminating a base descriptor chain
const LAST_BASE_TYPE_FLAGS: u32 = 0x1600;

/// Size of one type descriptor: std::type_info ptr, name ptr, type id
/// ptr, base types ptr
const TYPE_DESCRIPTOR_SIZE: usize = 16;

/// Size of one base type descriptor: descriptor ptr, flags
const BASE_TYPE_DESCRIPTOR_SIZE: usize = 8;

/// Size of one virtual table entry: flags, function ptr
const VIRTUAL_TABLE_ENTRY_SIZE: usize = 8;

/// Symbol index of $TEXT in the generated symbol table
const TEXT_SYMBOL: u32 = 1;

/// Symbol index of $DATA in the generated symbol table
const DATA_SYMBOL: u32 = 2;

/// A class exposed to guest RTTI
#[derive(Debug, Clone, Default)]
pub struct TypeInfo {
    pub name: String,
    pub base_types: Vec<String>,
    /// Names of member functions filling vtable slots, in order
    pub virtual_table: Vec<String>,
}

impl TypeInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_base(mut self, base: impl Into<String>) -> Self {
        self.base_types.push(base.into());
        self
    }

    pub fn with_virtual(mut self, func: impl Into<String>) -> Self {
        self.virtual_table.push(func.into());
        self
    }
}

struct GeneratedType {
    name: String,
    base_types: Vec<String>,
    type_descriptor_offset: u32,
    base_type_offset: u32,
}

fn add_string(data: &mut Vec<u8>, s: &str) -> u32 {
    let pos = data.len() as u32;
    data.extend_from_slice(s.as_bytes());
    data.push(0);
    pos
}

fn push_rela(relocations: &mut Vec<u8>, symbol: u32, offset: u32, addend: u32) {
    Rela {
        offset,
        info: r_ppc::ADDR32 | (symbol << 8),
        addend: addend as i32,
    }
    .write(relocations);
}

/// Emit type descriptors and vtables for every registered type
///
/// Appends to the library's .data contents and its data relocation
/// section. Function offsets must already be assigned.
pub fn generate_type_descriptors(
    library: &Library,
    data_base: u32,
    data: &mut Vec<u8>,
    relocations: &mut Vec<u8>,
) -> Result<()> {
    let mut generated: Vec<GeneratedType> = Vec::new();

    let mut add_descriptor = |info: &TypeInfo,
                              data: &mut Vec<u8>,
                              relocations: &mut Vec<u8>,
                              std_type_info_offset: u32|
     -> Result<u32> {
        let name_offset = add_string(data, &info.name);

        // A word of unique storage acts as the type id
        let type_id_offset = data.len() as u32;
        data.extend_from_slice(&[0u8; 4]);

        let mut base_type_offset = 0;
        if !info.base_types.is_empty() {
            base_type_offset = data.len() as u32;
            data.resize(
                data.len() + BASE_TYPE_DESCRIPTOR_SIZE * info.base_types.len(),
                0,
            );
            let flags_at = data.len() - 4;
            data[flags_at..].copy_from_slice(&LAST_BASE_TYPE_FLAGS.to_be_bytes());
        }

        let descriptor_offset = data.len() as u32;
        data.resize(data.len() + TYPE_DESCRIPTOR_SIZE, 0);
        push_rela(relocations, DATA_SYMBOL, descriptor_offset + data_base, std_type_info_offset);
        push_rela(relocations, DATA_SYMBOL, descriptor_offset + 0x04 + data_base, name_offset);
        push_rela(relocations, DATA_SYMBOL, descriptor_offset + 0x08 + data_base, type_id_offset);
        if !info.base_types.is_empty() {
            push_rela(
                relocations,
                DATA_SYMBOL,
                descriptor_offset + 0x0C + data_base,
                base_type_offset,
            );
        }

        // Virtual table; slot 0 points back at the descriptor
        let entry_offset = data.len() as u32;
        data.resize(data.len() + VIRTUAL_TABLE_ENTRY_SIZE, 0);
        push_rela(relocations, DATA_SYMBOL, entry_offset + 4 + data_base, descriptor_offset);

        for func_name in &info.virtual_table {
            let symbol = library.find_symbol(func_name).ok_or_else(|| {
                EmulatorError::Unsupported(format!("missing vtable function {}", func_name))
            })?;
            let LibrarySymbol::Function(func) = symbol else {
                return Err(EmulatorError::Unsupported(format!(
                    "vtable entry {} is not a function",
                    func_name
                )));
            };

            let entry_offset = data.len() as u32;
            data.resize(data.len() + VIRTUAL_TABLE_ENTRY_SIZE, 0);
            push_rela(relocations, TEXT_SYMBOL, entry_offset + 4 + data_base, func.offset);
        }

        generated.push(GeneratedType {
            name: info.name.clone(),
            base_types: info.base_types.clone(),
            type_descriptor_offset: descriptor_offset,
            base_type_offset,
        });
        Ok(descriptor_offset)
    };

    let std_type_info = TypeInfo::new("std::type_info");
    let std_offset = add_descriptor(&std_type_info, data, relocations, 0)?;

    for info in library.type_info() {
        add_descriptor(info, data, relocations, std_offset)?;
    }

    // Base type references are linked afterwards so declaration order
    // between types does not matter
    for ty in &generated {
        let mut base_offset = ty.base_type_offset;
        for base_name in &ty.base_types {
            let base = generated
                .iter()
                .find(|g| g.name == *base_name)
                .ok_or_else(|| {
                    EmulatorError::Unsupported(format!(
                        "missing base type {} of {}",
                        base_name, ty.name
                    ))
                })?;
            push_rela(
                relocations,
                DATA_SYMBOL,
                base_offset + data_base,
                base.type_descriptor_offset,
            );
            base_offset += BASE_TYPE_DESCRIPTOR_SIZE as u32;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::Signature;
    use crate::library::HostFn;
    use ocf_loader::rpl::RELA_SIZE;
    use std::sync::Arc;

    fn nop_host() -> HostFn {
        Arc::new(|_, _| Ok(None))
    }

    #[test]
    fn test_descriptor_layout() {
        let mut lib = Library::new("gx2.rpl");
        lib.add_function("GX2Shutdown", Signature::new(&[], None), nop_host())
            .unwrap();
        lib.add_type_info(
            TypeInfo::new("GX2::Surface").with_virtual("GX2Shutdown"),
        );
        lib.add_type_info(
            TypeInfo::new("GX2::ColorBuffer").with_base("GX2::Surface"),
        );

        let mut data = Vec::new();
        let mut relocations = Vec::new();
        generate_type_descriptors(&lib, 0x1000_0000, &mut data, &mut relocations).unwrap();

        assert!(!data.is_empty());
        assert_eq!(relocations.len() % RELA_SIZE as usize, 0);

        // Every relocation lands inside the data we emitted
        let count = relocations.len() / RELA_SIZE as usize;
        for i in 0..count {
            let rela = Rela::parse(&relocations, i * RELA_SIZE as usize).unwrap();
            assert_eq!(rela.r_type(), r_ppc::ADDR32);
            assert!(rela.offset >= 0x1000_0000);
            assert!((rela.offset - 0x1000_0000) < data.len() as u32);
        }
    }

    #[test]
    fn test_missing_vtable_function_fails() {
        let mut lib = Library::new("gx2.rpl");
        lib.add_type_info(TypeInfo::new("GX2::Surface").with_virtual("GX2NotThere"));

        let mut data = Vec::new();
        let mut relocations = Vec::new();
        assert!(
            generate_type_descriptors(&lib, 0x1000_0000, &mut data, &mut relocations).is_err()
        );
    }
}
