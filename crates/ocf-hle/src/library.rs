//! HLE library model

use crate::invoke::{self, CallLayout, Signature, Value};
use ocf_core::error::Result;
use ocf_cpu::syscalls::SyscallTable;
use ocf_cpu::CoreScheduler;
use ocf_memory::AddressSpace;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::debug;

/// Symbol indices 0..3 are reserved for NULL, $TEXT and $DATA
pub const BASE_SYMBOL_INDEX: u32 = 3;

/// Size of one generated function thunk (`kc; blr`)
pub const FUNCTION_STUB_SIZE: u32 = 8;

/// Context handed to host function bodies
pub struct HleContext<'a> {
    pub memory: &'a AddressSpace,
    pub scheduler: &'a CoreScheduler,
}

/// Host implementation of an HLE function
pub type HostFn =
    Arc<dyn for<'a> Fn(&mut HleContext<'a>, &[Value]) -> Result<Option<Value>> + Send + Sync>;

/// Constructor run over a data export once it has a runtime address
pub type DataConstructor = Arc<dyn Fn(&AddressSpace, u32) -> Result<()> + Send + Sync>;

/// An exported (or internal) HLE function
pub struct LibraryFunction {
    pub name: String,
    pub index: u32,
    pub exported: bool,
    pub layout: CallLayout,
    pub host: HostFn,
    pub trace_enabled: Arc<AtomicBool>,
    /// Assigned by [`Library::register_system_calls`]
    pub syscall_id: Option<u32>,
    /// Offset inside the generated .text, assigned at generation
    pub offset: u32,
    /// Runtime address, assigned by [`Library::relocate`]
    pub address: u32,
}

/// An HLE data export
pub struct LibraryData {
    pub name: String,
    pub index: u32,
    pub exported: bool,
    pub size: u32,
    pub align: u32,
    pub constructor: Option<DataConstructor>,
    /// Offset inside the generated .data, assigned at generation
    pub offset: u32,
    /// Runtime address, assigned by [`Library::relocate`]
    pub address: u32,
}

pub enum LibrarySymbol {
    Function(LibraryFunction),
    Data(LibraryData),
}

impl LibrarySymbol {
    pub fn name(&self) -> &str {
        match self {
            LibrarySymbol::Function(f) => &f.name,
            LibrarySymbol::Data(d) => &d.name,
        }
    }

    pub fn index(&self) -> u32 {
        match self {
            LibrarySymbol::Function(f) => f.index,
            LibrarySymbol::Data(d) => d.index,
        }
    }

    pub fn exported(&self) -> bool {
        match self {
            LibrarySymbol::Function(f) => f.exported,
            LibrarySymbol::Data(d) => d.exported,
        }
    }
}

/// One high-level emulated system library
///
/// Symbols keep their registration order; indices are assigned from
/// [`BASE_SYMBOL_INDEX`] so generation is deterministic.
pub struct Library {
    name: String,
    dependencies: Vec<String>,
    symbols: Vec<LibrarySymbol>,
    type_info: Vec<crate::typeinfo::TypeInfo>,
    generated: Option<Vec<u8>>,
}

impl Library {
    /// `name` includes the extension, e.g. `coreinit.rpl`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            symbols: Vec::new(),
            type_info: Vec::new(),
            generated: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Module name without the `.rpl` extension
    pub fn module_name(&self) -> &str {
        self.name.strip_suffix(".rpl").unwrap_or(&self.name)
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn add_dependency(&mut self, name: impl Into<String>) {
        self.dependencies.push(name.into());
    }

    pub fn symbols(&self) -> &[LibrarySymbol] {
        &self.symbols
    }

    pub fn type_info(&self) -> &[crate::typeinfo::TypeInfo] {
        &self.type_info
    }

    pub fn add_type_info(&mut self, info: crate::typeinfo::TypeInfo) {
        self.type_info.push(info);
    }

    fn next_index(&self) -> u32 {
        BASE_SYMBOL_INDEX + self.symbols.len() as u32
    }

    /// Register an exported function
    pub fn add_function(&mut self, name: impl Into<String>, sig: Signature, host: HostFn) -> Result<()> {
        self.add_function_inner(name, sig, host, true)
    }

    /// Register a function that is callable but not exported
    pub fn add_internal_function(
        &mut self,
        name: impl Into<String>,
        sig: Signature,
        host: HostFn,
    ) -> Result<()> {
        self.add_function_inner(name, sig, host, false)
    }

    fn add_function_inner(
        &mut self,
        name: impl Into<String>,
        sig: Signature,
        host: HostFn,
        exported: bool,
    ) -> Result<()> {
        let layout = invoke::classify(&sig)?;
        self.symbols.push(LibrarySymbol::Function(LibraryFunction {
            name: name.into(),
            index: self.next_index(),
            exported,
            layout,
            host,
            trace_enabled: Arc::new(AtomicBool::new(false)),
            syscall_id: None,
            offset: 0,
            address: 0,
        }));
        Ok(())
    }

    /// Register an exported data object
    pub fn add_data(
        &mut self,
        name: impl Into<String>,
        size: u32,
        align: u32,
        constructor: Option<DataConstructor>,
    ) {
        self.symbols.push(LibrarySymbol::Data(LibraryData {
            name: name.into(),
            index: self.next_index(),
            exported: true,
            size,
            align: align.max(1),
            constructor,
            offset: 0,
            address: 0,
        }));
    }

    pub fn find_symbol(&self, name: &str) -> Option<&LibrarySymbol> {
        self.symbols.iter().find(|s| s.name() == name)
    }

    pub(crate) fn symbols_mut(&mut self) -> &mut [LibrarySymbol] {
        &mut self.symbols
    }

    /// Bind every function to a fresh system call id
    ///
    /// Must run before [`Library::generate`] since the generated
    /// thunks embed the ids.
    pub fn register_system_calls(&mut self, table: &SyscallTable, memory: &Arc<AddressSpace>) {
        let module = self.module_name().to_string();

        for symbol in &mut self.symbols {
            let LibrarySymbol::Function(func) = symbol else {
                continue;
            };

            let qualified = format!("{}::{}", module, func.name);
            let layout = func.layout.clone();
            let host = Arc::clone(&func.host);
            let trace = Arc::clone(&func.trace_enabled);
            let memory = Arc::clone(memory);
            let name = qualified.clone();

            let id = table.register_handler(
                qualified,
                Box::new(move |scheduler| {
                    invoke::dispatch_call(&layout, &host, &name, &trace, &memory, scheduler)
                }),
            );
            func.syscall_id = Some(id);
        }
    }

    /// Generate the synthetic RPL image for this library
    pub fn generate(&mut self) -> Result<()> {
        let image = crate::rpl_gen::generate(self)?;
        self.generated = Some(image);
        Ok(())
    }

    pub fn image(&self) -> Option<&[u8]> {
        self.generated.as_deref()
    }

    /// Assign runtime addresses once the loader has placed the image
    ///
    /// `text_base`/`data_base` are the runtime addresses of the
    /// generated .text and .data sections. Data constructors run here.
    pub fn relocate(&mut self, text_base: u32, data_base: u32, memory: &AddressSpace) -> Result<()> {
        debug!(
            library = %self.name,
            text_base = format_args!("0x{:08x}", text_base),
            data_base = format_args!("0x{:08x}", data_base),
            "relocating hle library"
        );

        for symbol in &mut self.symbols {
            match symbol {
                LibrarySymbol::Function(func) => {
                    func.address = text_base + func.offset;
                }
                LibrarySymbol::Data(data) => {
                    data.address = data_base + data.offset;
                    if let Some(constructor) = &data.constructor {
                        constructor(memory, data.address)?;
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::ParamKind;

    fn nop_host() -> HostFn {
        Arc::new(|_, _| Ok(None))
    }

    #[test]
    fn test_symbol_indices_are_insertion_ordered() {
        let mut lib = Library::new("coreinit.rpl");
        lib.add_function("OSReport", Signature::new(&[ParamKind::U32], None), nop_host())
            .unwrap();
        lib.add_data("OSDefaultThread", 0x40, 8, None);
        lib.add_function(
            "OSGetCoreId",
            Signature::new(&[], Some(ParamKind::U32)),
            nop_host(),
        )
        .unwrap();

        let indices: Vec<u32> = lib.symbols().iter().map(|s| s.index()).collect();
        assert_eq!(indices, vec![3, 4, 5]);
        assert_eq!(lib.module_name(), "coreinit");
    }

    #[test]
    fn test_register_system_calls_assigns_ids() {
        let mut lib = Library::new("coreinit.rpl");
        lib.add_function("OSReport", Signature::new(&[ParamKind::U32], None), nop_host())
            .unwrap();
        lib.add_function(
            "OSGetTime",
            Signature::new(&[], Some(ParamKind::U64)),
            nop_host(),
        )
        .unwrap();

        let table = SyscallTable::new();
        let memory = AddressSpace::new().unwrap();
        lib.register_system_calls(&table, &memory);

        let ids: Vec<u32> = lib
            .symbols()
            .iter()
            .filter_map(|s| match s {
                LibrarySymbol::Function(f) => f.syscall_id,
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
        assert_eq!(table.name_of(ids[0]).unwrap(), "coreinit::OSReport");
    }

    #[test]
    fn test_relocate_runs_constructors() {
        use std::sync::atomic::{AtomicU32, Ordering};

        let mut lib = Library::new("coreinit.rpl");
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = Arc::clone(&seen);
        lib.add_data(
            "OSDefaultThread",
            0x40,
            8,
            Some(Arc::new(move |_memory, addr| {
                seen2.store(addr, Ordering::SeqCst);
                Ok(())
            })),
        );

        let memory = AddressSpace::new().unwrap();
        lib.relocate(0x0200_0000, 0x1000_0000, &memory).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0x1000_0000);
    }
}
