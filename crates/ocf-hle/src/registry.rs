//! Registry of HLE libraries
//!
//! The registry owns every emulated system library and is the loader's
//! source of RPL images for module names it recognizes. Registration
//! order is lookup order.

use crate::library::Library;
use crate::trace;
use ocf_core::error::Result;
use ocf_cpu::syscalls::SyscallTable;
use ocf_cpu::CoreScheduler;
use ocf_loader::registry::HleProvider;
use ocf_memory::AddressSpace;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct HleRegistry {
    memory: Arc<AddressSpace>,
    libraries: Mutex<Vec<Library>>,
}

impl HleRegistry {
    pub fn new(memory: Arc<AddressSpace>) -> Arc<Self> {
        Arc::new(Self {
            memory,
            libraries: Mutex::new(Vec::new()),
        })
    }

    pub fn register(&self, library: Library) {
        info!(library = library.name(), "registered hle library");
        self.libraries.lock().push(library);
    }

    pub fn library_names(&self) -> Vec<String> {
        self.libraries
            .lock()
            .iter()
            .map(|l| l.name().to_string())
            .collect()
    }

    /// Bind every function of every library to a system call id
    pub fn register_system_calls(&self, table: &SyscallTable) {
        for library in self.libraries.lock().iter_mut() {
            library.register_system_calls(table, &self.memory);
        }
    }

    /// Generate the RPL image of every library
    ///
    /// With `dump_to` set, each image is also written out as
    /// `<dir>/<name>` for offline inspection.
    pub fn generate_all(&self, dump_to: Option<&Path>) -> Result<()> {
        let mut libraries = self.libraries.lock();
        for library in libraries.iter_mut() {
            library.generate()?;

            if let Some(dir) = dump_to {
                let image = library.image().unwrap_or_default();
                std::fs::create_dir_all(dir)?;
                let path = dir.join(library.name());
                std::fs::write(&path, image)?;
                info!(path = %path.display(), "dumped hle rpl");
            }
        }
        Ok(())
    }

    /// Parse and apply kernel trace filters to every library
    pub fn apply_trace_filters(&self, filters: &[String]) -> Result<()> {
        let parsed = trace::parse_filters(filters)?;
        for library in self.libraries.lock().iter_mut() {
            trace::apply_filters(library, &parsed);
        }
        Ok(())
    }

    /// Runtime address of an exported symbol, for tests and debuggers
    pub fn symbol_address(&self, module: &str, symbol: &str) -> Option<u32> {
        let libraries = self.libraries.lock();
        let library = libraries.iter().find(|l| l.module_name() == module)?;
        match library.find_symbol(symbol)? {
            crate::library::LibrarySymbol::Function(f) => Some(f.address),
            crate::library::LibrarySymbol::Data(d) => Some(d.address),
        }
    }
}

impl HleProvider for HleRegistry {
    fn image_for(&self, name: &str) -> Option<Vec<u8>> {
        let libraries = self.libraries.lock();
        let library = libraries.iter().find(|l| l.name() == name)?;
        library.image().map(|image| image.to_vec())
    }

    fn module_loaded(&self, name: &str, text_base: u32, data_base: u32) -> Result<()> {
        let mut libraries = self.libraries.lock();
        let Some(library) = libraries.iter_mut().find(|l| l.name() == name) else {
            return Ok(());
        };
        library.relocate(text_base, data_base, &self.memory)
    }
}

/// Route unregistered system calls to a warning instead of a crash
///
/// Guest code calling an unimplemented import lands in a stub whose id
/// is registered but has no handler. The hook logs it and fakes a zero
/// success result, poisoned so it stands out in register dumps.
pub fn install_unknown_call_handler(table: &SyscallTable) {
    table.set_unknown_handler(Box::new(
        |id: u32, name: &str, scheduler: &CoreScheduler| {
            warn!(id, func = name, "unimplemented system call");
            let core = scheduler.current();
            core.lock().gpr[3] = 0xC5C5_C5C5;
        },
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoke::{ParamKind, Signature};
    use crate::library::HostFn;

    fn nop_host() -> HostFn {
        Arc::new(|_, _| Ok(None))
    }

    fn registry_with_coreinit() -> Arc<HleRegistry> {
        let memory = AddressSpace::new().unwrap();
        let registry = HleRegistry::new(memory);

        let mut lib = Library::new("coreinit.rpl");
        lib.add_function("OSReport", Signature::new(&[ParamKind::U32], None), nop_host())
            .unwrap();
        registry.register(lib);
        registry
    }

    #[test]
    fn test_image_for_known_library() {
        let registry = registry_with_coreinit();
        let table = SyscallTable::new();
        registry.register_system_calls(&table);
        registry.generate_all(None).unwrap();

        assert!(registry.image_for("coreinit.rpl").is_some());
        assert!(registry.image_for("nn_act.rpl").is_none());
    }

    #[test]
    fn test_module_loaded_assigns_addresses() {
        let registry = registry_with_coreinit();
        let table = SyscallTable::new();
        registry.register_system_calls(&table);
        registry.generate_all(None).unwrap();

        registry
            .module_loaded("coreinit.rpl", 0x0210_0000, 0x1040_0000)
            .unwrap();
        assert_eq!(
            registry.symbol_address("coreinit", "OSReport"),
            Some(0x0210_0000)
        );

        // Unknown modules are not an error
        registry
            .module_loaded("nn_act.rpl", 0x0220_0000, 0x1080_0000)
            .unwrap();
    }

    #[test]
    fn test_unknown_call_handler_poisons_r3() {
        let table = SyscallTable::new();
        let scheduler = CoreScheduler::new();
        install_unknown_call_handler(&table);

        let id = table.register_illegal("coreinit::OSNotImplemented");
        table.dispatch(id, &scheduler).unwrap();
        assert_eq!(scheduler.current().lock().gpr[3], 0xC5C5_C5C5);
    }
}
