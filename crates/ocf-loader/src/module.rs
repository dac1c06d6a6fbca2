//! Loaded module bookkeeping

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Code,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Data,
    Tls,
    Unknown,
}

/// A section placed into guest memory
#[derive(Debug, Clone)]
pub struct LoadedSection {
    pub name: String,
    pub kind: SectionKind,
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ModuleSymbol {
    pub address: u32,
    pub kind: SymbolKind,
}

/// A module resident in guest memory
///
/// `exports` hold runtime addresses except for TLS exports, which keep
/// their offset into the TLS image. `symbols` cover everything the
/// symbol tables named, including linker-generated trampolines.
#[derive(Debug, Default)]
pub struct LoadedModule {
    /// File name, e.g. `coreinit.rpl`
    pub name: String,
    pub entry_point: u32,
    pub default_stack_size: u32,
    pub sda_base: u32,
    pub sda2_base: u32,
    pub tls_base: Option<u32>,
    pub tls_size: u32,
    pub tls_module_index: u32,
    pub tls_align_shift: u16,
    pub sections: Vec<LoadedSection>,
    pub exports: HashMap<String, u32>,
    pub symbols: HashMap<String, ModuleSymbol>,
}

impl LoadedModule {
    pub fn find_export(&self, name: &str) -> Option<u32> {
        self.exports.get(name).copied()
    }

    pub fn find_symbol(&self, name: &str) -> Option<ModuleSymbol> {
        self.symbols.get(name).copied()
    }

    /// The section containing `address`, if any
    pub fn section_for_address(&self, address: u32) -> Option<&LoadedSection> {
        self.sections
            .iter()
            .find(|s| address >= s.start && address < s.end)
    }
}
