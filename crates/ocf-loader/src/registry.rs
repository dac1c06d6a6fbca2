//! Module registry
//!
//! Owns the set of loaded modules and the guest regions they are
//! placed into. Loads resolve HLE libraries first, then fall back to
//! `/vol/code/` on the mounted filesystem. A single lock covers all
//! loader state; import processing recurses under it.

use crate::module::{LoadedModule, ModuleSymbol, SymbolKind};
use crate::rpl::RplImage;
use crate::stubs::UnimplementedRegistry;
use ocf_core::error::{LoaderError, Result};
use ocf_cpu::syscalls::SyscallTable;
use ocf_memory::constants::{
    CODE_BASE, CODE_SIZE, DATA_BASE, DATA_SIZE, LOADER_BASE, LOADER_SIZE, PAGE_SIZE,
};
use ocf_memory::{AddressSpace, PageFlags, SequentialExtent};
use ocf_vfs::VirtualFileSystem;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Source of generated RPL images for emulated system libraries
pub trait HleProvider: Send + Sync {
    /// Image bytes for `name` (with extension), if it is emulated
    fn image_for(&self, name: &str) -> Option<Vec<u8>>;

    /// Called once the image is linked, with the runtime addresses its
    /// declared text and data bases mapped to
    fn module_loaded(&self, name: &str, text_base: u32, data_base: u32) -> Result<()>;
}

pub(crate) struct LoaderState {
    pub(crate) modules: HashMap<String, Arc<LoadedModule>>,
    /// Modules currently mid-link, to cut import cycles
    loading: HashSet<String>,
    pub(crate) code: SequentialExtent,
    pub(crate) data: SequentialExtent,
    pub(crate) loader: SequentialExtent,
    /// Nested loads in flight; the loader region is recycled when it
    /// drops back to zero
    pub(crate) active_loads: usize,
    pub(crate) next_tls_module_index: u32,
    /// Function address to `module:symbol`, for crash reporting
    pub(crate) symbol_lookup: BTreeMap<u32, String>,
}

pub struct ModuleRegistry {
    pub(crate) memory: Arc<AddressSpace>,
    vfs: Arc<VirtualFileSystem>,
    pub(crate) stubs: UnimplementedRegistry,
    hle: RwLock<Option<Arc<dyn HleProvider>>>,
    /// Branch target written into `.syscall` sections
    syscall_address: RwLock<Option<u32>>,
    state: Mutex<LoaderState>,
}

impl ModuleRegistry {
    pub fn new(
        memory: Arc<AddressSpace>,
        vfs: Arc<VirtualFileSystem>,
        table: Arc<SyscallTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            stubs: UnimplementedRegistry::new(Arc::clone(&memory), table),
            memory,
            vfs,
            hle: RwLock::new(None),
            syscall_address: RwLock::new(None),
            state: Mutex::new(LoaderState {
                modules: HashMap::new(),
                loading: HashSet::new(),
                code: SequentialExtent::new("code", CODE_BASE, CODE_SIZE),
                data: SequentialExtent::new("data", DATA_BASE, DATA_SIZE),
                loader: SequentialExtent::new("loader", LOADER_BASE, LOADER_SIZE),
                active_loads: 0,
                next_tls_module_index: 1,
                symbol_lookup: BTreeMap::new(),
            }),
        })
    }

    pub fn set_hle_provider(&self, provider: Arc<dyn HleProvider>) {
        *self.hle.write() = Some(provider);
    }

    /// Target for the absolute branch written into `.syscall` sections
    pub fn set_syscall_address(&self, address: u32) {
        *self.syscall_address.write() = Some(address);
    }

    pub(crate) fn syscall_address(&self) -> Option<u32> {
        *self.syscall_address.read()
    }

    /// Load a module and everything it imports
    pub fn load(&self, name: &str) -> Result<Arc<LoadedModule>> {
        let mut state = self.state.lock();
        self.load_no_lock(&mut state, name)
    }

    pub fn find_module(&self, name: &str) -> Option<Arc<LoadedModule>> {
        let (module_name, _) = normalize_module_name(name);
        self.state.lock().modules.get(&module_name).cloned()
    }

    pub(crate) fn load_no_lock(
        &self,
        state: &mut LoaderState,
        name: &str,
    ) -> Result<Arc<LoadedModule>> {
        let (module_name, file_name) = normalize_module_name(name);

        if let Some(module) = state.modules.get(&module_name) {
            return Ok(Arc::clone(module));
        }

        if !state.loading.insert(module_name.clone()) {
            return Err(LoaderError::ModuleLoad(format!("import cycle via {}", file_name)).into());
        }

        let (bytes, from_hle) = match self.find_image(&file_name) {
            Ok(found) => found,
            Err(err) => {
                state.loading.remove(&module_name);
                return Err(err);
            }
        };
        let image = match RplImage::parse(&bytes) {
            Ok(image) => image,
            Err(err) => {
                state.loading.remove(&module_name);
                return Err(err.into());
            }
        };

        state.active_loads += 1;
        let result = self.link(state, &module_name, &file_name, &image);
        state.active_loads -= 1;
        state.loading.remove(&module_name);

        if state.active_loads == 0 {
            self.recycle_loader_region(state);
        }

        let artifacts = match result {
            Ok(artifacts) => artifacts,
            Err(err) => {
                error!(module = %file_name, %err, "failed to link module");
                return Err(err);
            }
        };

        let module = Arc::new(artifacts.module);
        state.modules.insert(module_name, Arc::clone(&module));

        for (name, symbol) in &module.symbols {
            if symbol.kind == SymbolKind::Function {
                state
                    .symbol_lookup
                    .insert(symbol.address, format!("{}:{}", module.name, name));
            }
        }

        if from_hle {
            if let Some(provider) = self.hle.read().as_ref() {
                provider.module_loaded(&file_name, artifacts.text_base, artifacts.data_base)?;
            }
        }

        info!(module = %file_name, entry = format_args!("0x{:08x}", module.entry_point), "loaded module");
        Ok(module)
    }

    fn find_image(&self, file_name: &str) -> Result<(Vec<u8>, bool)> {
        if let Some(provider) = self.hle.read().as_ref() {
            if let Some(image) = provider.image_for(file_name) {
                return Ok((image, true));
            }
        }

        let path = format!("/vol/code/{}", file_name);
        match self.vfs.read_file(&path) {
            Ok(bytes) => Ok((bytes, false)),
            Err(err) => {
                debug!(path = %path, %err, "module not on filesystem");
                Err(LoaderError::ModuleLoad(file_name.to_string()).into())
            }
        }
    }

    /// Commit pages backing a loader-region allocation
    pub(crate) fn commit_loader_pages(&self, addr: u32, size: u32) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        let start = addr & !(PAGE_SIZE - 1);
        let end = (addr + size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        self.memory.commit(start, end - start, PageFlags::RW)?;
        Ok(())
    }

    fn recycle_loader_region(&self, state: &mut LoaderState) {
        let used = state.loader.used();
        if used == 0 {
            return;
        }
        let end = (state.loader.current_addr() + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        if let Err(err) = self.memory.uncommit(LOADER_BASE, end - LOADER_BASE) {
            error!(%err, "failed to release loader region");
        }
        state.loader.reset();
    }

    /// Exact symbol name for a function address
    pub fn find_symbol_name_for_address(&self, address: u32) -> Option<String> {
        self.state.lock().symbol_lookup.get(&address).cloned()
    }

    /// Nearest preceding function symbol, as `name + 0x<offset>`
    pub fn find_nearest_symbol_name_for_address(&self, address: u32) -> String {
        let state = self.state.lock();
        match state.symbol_lookup.range(..=address).next_back() {
            None => "?".to_string(),
            Some((&addr, name)) if addr == address => name.clone(),
            Some((&addr, name)) => format!("{} + 0x{:x}", name, address - addr),
        }
    }

    /// Runtime address of `module!symbol` across loaded modules
    pub fn find_export(&self, module: &str, symbol: &str) -> Option<u32> {
        let (module_name, _) = normalize_module_name(module);
        self.state
            .lock()
            .modules
            .get(&module_name)
            .and_then(|m| m.find_export(symbol))
    }

    pub fn find_symbol(&self, module: &str, symbol: &str) -> Option<ModuleSymbol> {
        let (module_name, _) = normalize_module_name(module);
        self.state
            .lock()
            .modules
            .get(&module_name)
            .and_then(|m| m.find_symbol(symbol))
    }

    pub fn loaded_modules(&self) -> Vec<Arc<LoadedModule>> {
        self.state.lock().modules.values().cloned().collect()
    }
}

/// Split `name` into a module name and a file name with extension
///
/// `coreinit` and `coreinit.rpl` both name the same module; `.rpx`
/// keeps its extension.
pub fn normalize_module_name(name: &str) -> (String, String) {
    if name.ends_with(".rpl") || name.ends_with(".rpx") {
        (name[..name.len() - 4].to_string(), name.to_string())
    } else {
        (name.to_string(), format!("{}.rpl", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_module_name() {
        assert_eq!(
            normalize_module_name("coreinit"),
            ("coreinit".to_string(), "coreinit.rpl".to_string())
        );
        assert_eq!(
            normalize_module_name("coreinit.rpl"),
            ("coreinit".to_string(), "coreinit.rpl".to_string())
        );
        assert_eq!(
            normalize_module_name("game.rpx"),
            ("game".to_string(), "game.rpx".to_string())
        );
    }

    #[test]
    fn test_load_missing_module_fails() {
        let memory = AddressSpace::new().unwrap();
        let vfs = Arc::new(VirtualFileSystem::new());
        let table = Arc::new(SyscallTable::new());
        let registry = ModuleRegistry::new(memory, vfs, table);

        assert!(registry.load("nothere").is_err());
        assert!(registry.find_module("nothere").is_none());
    }

    #[test]
    fn test_nearest_symbol_lookup() {
        let memory = AddressSpace::new().unwrap();
        let vfs = Arc::new(VirtualFileSystem::new());
        let table = Arc::new(SyscallTable::new());
        let registry = ModuleRegistry::new(memory, vfs, table);

        {
            let mut state = registry.state.lock();
            state
                .symbol_lookup
                .insert(0x0200_0100, "coreinit.rpl:OSReport".to_string());
        }

        assert_eq!(
            registry.find_symbol_name_for_address(0x0200_0100).as_deref(),
            Some("coreinit.rpl:OSReport")
        );
        assert_eq!(
            registry.find_nearest_symbol_name_for_address(0x0200_0108),
            "coreinit.rpl:OSReport + 0x8"
        );
        assert_eq!(registry.find_nearest_symbol_name_for_address(0x0200_0000), "?");
    }
}
