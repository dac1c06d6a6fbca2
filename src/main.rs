//! Oxidized-Cafe - Wii U RPL loader and HLE runtime
//!
//! Main entry point. Boots the guest address space, registers the HLE
//! system libraries and loads the requested module with everything it
//! imports.

use anyhow::{bail, Context};
use ocf_core::Config;
use ocf_cpu::{CoreScheduler, SyscallTable};
use ocf_hle::registry::install_unknown_call_handler;
use ocf_hle::HleRegistry;
use ocf_loader::ModuleRegistry;
use ocf_memory::AddressSpace;
use ocf_vfs::{MountSource, VirtualFileSystem};
use std::sync::Arc;
use tracing::info;

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Oxidized-Cafe Wii U emulator");

    let mut args = std::env::args().skip(1);
    let Some(module_name) = args.next() else {
        bail!("usage: oxidized-cafe <module.rpx> [config.toml]");
    };
    let config_path = args
        .next()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path).context("loading configuration")?;

    let memory = AddressSpace::new().context("mapping guest address space")?;
    let scheduler = CoreScheduler::new();
    let syscalls = Arc::new(SyscallTable::new());

    let vfs = Arc::new(VirtualFileSystem::new());
    vfs.mount("/vol", MountSource::HostDir(config.paths.content_path.clone()));

    // Build the HLE libraries and publish their images to the loader
    let hle = HleRegistry::new(Arc::clone(&memory));
    ocf_hle::libraries::register_all(&hle);
    hle.register_system_calls(&syscalls);
    hle.apply_trace_filters(&config.log.kernel_trace_filters)
        .context("parsing kernel trace filters")?;
    let dump_to = config.debug.dump_hle_rpl.then(|| config.debug.dump_path.clone());
    hle.generate_all(dump_to.as_deref())
        .context("generating HLE library images")?;
    install_unknown_call_handler(&syscalls);

    let modules = ModuleRegistry::new(Arc::clone(&memory), vfs, Arc::clone(&syscalls));
    modules.set_hle_provider(hle);

    let module = modules
        .load(&module_name)
        .with_context(|| format!("loading {}", module_name))?;

    info!(
        module = %module.name,
        entry = format_args!("0x{:08x}", module.entry_point),
        stack = format_args!("0x{:x}", module.default_stack_size),
        "module ready"
    );

    // Point the entry core at the module so an attached interpreter
    // can take over from here
    let core = scheduler.current();
    let mut core = core.lock();
    core.cia = module.entry_point;
    core.nia = module.entry_point.wrapping_add(4);

    Ok(())
}
