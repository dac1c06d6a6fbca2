//! Full-stack boot tests
//!
//! These exercise the whole pipeline the binary wires together: HLE
//! libraries are generated as RPL images, the loader links them like
//! any other module, and guest calls land back in the host through the
//! generated thunks.

use ocf_cpu::{espresso, CoreScheduler, SyscallTable};
use ocf_hle::registry::install_unknown_call_handler;
use ocf_hle::{HleRegistry, Library};
use ocf_loader::ModuleRegistry;
use ocf_memory::constants::{DATA_BASE, DATA_SIZE, LOADER_BASE};
use ocf_memory::AddressSpace;
use ocf_vfs::{MountSource, VirtualFileSystem};
use std::collections::HashMap;
use std::sync::Arc;

struct Harness {
    memory: Arc<AddressSpace>,
    scheduler: Arc<CoreScheduler>,
    syscalls: Arc<SyscallTable>,
    hle: Arc<HleRegistry>,
    modules: Arc<ModuleRegistry>,
}

fn boot(extra: Vec<Library>) -> Harness {
    let memory = AddressSpace::new().unwrap();
    let scheduler = CoreScheduler::new();
    let syscalls = Arc::new(SyscallTable::new());

    let hle = HleRegistry::new(Arc::clone(&memory));
    ocf_hle::libraries::register_all(&hle);
    for library in extra {
        hle.register(library);
    }
    hle.register_system_calls(&syscalls);
    hle.generate_all(None).unwrap();
    install_unknown_call_handler(&syscalls);

    let vfs = Arc::new(VirtualFileSystem::new());
    vfs.mount("/vol/code", MountSource::Memory(HashMap::new()));

    let modules = ModuleRegistry::new(Arc::clone(&memory), vfs, Arc::clone(&syscalls));
    modules.set_hle_provider(hle.clone());

    Harness {
        memory,
        scheduler,
        syscalls,
        hle,
        modules,
    }
}

#[test]
fn test_hle_library_loads_and_exports_resolve() {
    let h = boot(Vec::new());

    let module = h.modules.load("coreinit").unwrap();
    assert_eq!(module.name, "coreinit.rpl");

    // Every exported function resolved to an address inside the image
    for name in ["OSReport", "OSGetTime", "OSGetCoreId"] {
        let addr = module.find_export(name).unwrap_or_else(|| panic!("{} missing", name));
        assert_eq!(h.hle.symbol_address("coreinit", name), Some(addr));
    }

    // The data constructor ran at the relocated address
    let thread = module.find_export("OSDefaultThread").unwrap();
    assert_eq!(h.memory.read_be32(thread).unwrap(), 0x7448_7244);

    // Loading again returns the cached module
    let again = h.modules.load("coreinit.rpl").unwrap();
    assert!(Arc::ptr_eq(&module, &again));
}

#[test]
fn test_dependencies_load_transitively() {
    let h = boot(Vec::new());

    h.modules.load("sysapp").unwrap();
    assert!(h.modules.find_module("coreinit").is_some());

    // Link-time sections are released once the outermost load finishes
    assert!(!h.memory.is_mapped(LOADER_BASE));
}

#[test]
fn test_generated_thunk_dispatches_to_host() {
    let h = boot(Vec::new());
    let module = h.modules.load("coreinit").unwrap();

    let addr = module.find_export("OSGetCoreId").unwrap();
    let kc = h.memory.read_be32(addr).unwrap();
    let id = espresso::decode_kc(kc).expect("thunk starts with kc");
    assert_eq!(h.memory.read_be32(addr + 4).unwrap(), espresso::BLR);
    assert_eq!(h.syscalls.name_of(id).unwrap(), "coreinit::OSGetCoreId");

    h.syscalls.dispatch(id, &h.scheduler).unwrap();
    assert_eq!(h.scheduler.current().lock().gpr[3], 1);
}

#[test]
fn test_guest_arguments_are_marshaled() {
    let h = boot(Vec::new());
    let module = h.modules.load("coreinit").unwrap();

    // Identity function: r3 in, r3 out
    let addr = module.find_export("OSEffectiveToPhysical").unwrap();
    let id = espresso::decode_kc(h.memory.read_be32(addr).unwrap()).unwrap();

    {
        let core = h.scheduler.current();
        core.lock().gpr[3] = 0x10F0_1234;
    }
    h.syscalls.dispatch(id, &h.scheduler).unwrap();
    assert_eq!(h.scheduler.current().lock().gpr[3], 0x10F0_1234);

    // OSReport reads its format string out of guest memory
    let text_addr = DATA_BASE + DATA_SIZE - 0x1000;
    h.memory.write_bytes(text_addr, b"hello from the guest\0").unwrap();
    let report = module.find_export("OSReport").unwrap();
    let id = espresso::decode_kc(h.memory.read_be32(report).unwrap()).unwrap();
    {
        let core = h.scheduler.current();
        core.lock().gpr[3] = text_addr;
    }
    h.syscalls.dispatch(id, &h.scheduler).unwrap();
}

#[test]
fn test_missing_dependency_is_tolerated() {
    let mut lib = Library::new("testapp.rpl");
    lib.add_dependency("nn_act");
    let h = boot(vec![lib]);

    // nn_act is nowhere to be found; the module still links
    let module = h.modules.load("testapp").unwrap();
    assert_eq!(module.name, "testapp.rpl");
    assert!(h.modules.find_module("nn_act").is_none());
}

#[test]
fn test_function_addresses_feed_symbol_lookup() {
    let h = boot(Vec::new());
    let module = h.modules.load("coreinit").unwrap();
    let addr = module.find_export("OSGetTime").unwrap();

    assert_eq!(
        h.modules.find_symbol_name_for_address(addr).as_deref(),
        Some("coreinit.rpl:OSGetTime")
    );
    assert_eq!(
        h.modules.find_nearest_symbol_name_for_address(addr + 4),
        "coreinit.rpl:OSGetTime + 0x4"
    );
}
