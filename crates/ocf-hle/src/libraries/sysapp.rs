//! sysapp.rpl
//!
//! System application launch shims. Links against coreinit, which makes
//! it the library that exercises cross-module HLE imports.

use crate::invoke::{ParamKind, Signature, Value};
use crate::library::Library;
use tracing::{info, warn};

/// Title id base for system applications
const SYSTEM_APP_TITLE_BASE: u64 = 0x0005_0010_1004_0000;

const NUM_SYSTEM_APPS: u32 = 10;

pub fn create() -> Library {
    let mut lib = Library::new("sysapp.rpl");
    lib.add_dependency("coreinit");

    lib.add_function(
        "SYSLaunchTitle",
        Signature::new(&[ParamKind::U64], None),
        std::sync::Arc::new(|_, args| {
            info!(title_id = format_args!("0x{:016x}", args[0].as_u64()), "SYSLaunchTitle");
            Ok(None)
        }),
    )
    .expect("SYSLaunchTitle signature");

    lib.add_function(
        "SYSLaunchMenu",
        Signature::new(&[], None),
        std::sync::Arc::new(|_, _| {
            info!("SYSLaunchMenu");
            Ok(None)
        }),
    )
    .expect("SYSLaunchMenu signature");

    lib.add_function(
        "SYSGetSystemApplicationTitleId",
        Signature::new(&[ParamKind::U32], Some(ParamKind::U64)),
        std::sync::Arc::new(|_, args| {
            let id = args[0].as_u32();
            if id >= NUM_SYSTEM_APPS {
                warn!(id, "unknown system application id");
                return Ok(Some(Value::U64(0)));
            }
            Ok(Some(Value::U64(SYSTEM_APP_TITLE_BASE | u64::from(id) << 8)))
        }),
    )
    .expect("SYSGetSystemApplicationTitleId signature");

    lib
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{HleContext, LibrarySymbol};
    use ocf_cpu::CoreScheduler;
    use ocf_memory::AddressSpace;

    #[test]
    fn test_depends_on_coreinit() {
        let lib = create();
        assert_eq!(lib.dependencies(), ["coreinit"]);
    }

    #[test]
    fn test_system_application_title_ids() {
        let lib = create();
        let memory = AddressSpace::new().unwrap();
        let scheduler = CoreScheduler::new();
        let mut ctx = HleContext {
            memory: &memory,
            scheduler: &scheduler,
        };

        let Some(LibrarySymbol::Function(func)) =
            lib.find_symbol("SYSGetSystemApplicationTitleId")
        else {
            panic!("missing function");
        };

        let id = (func.host)(&mut ctx, &[Value::U32(2)]).unwrap().unwrap();
        assert_eq!(id.as_u64(), SYSTEM_APP_TITLE_BASE | 0x200);

        let id = (func.host)(&mut ctx, &[Value::U32(99)]).unwrap().unwrap();
        assert_eq!(id.as_u64(), 0);
    }
}
