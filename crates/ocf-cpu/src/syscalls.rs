//! System call table
//!
//! Guest code reaches the host through `kc` instructions. Each
//! registered handler gets a 24-bit id baked into the instruction;
//! dispatch looks the id back up and invokes the host closure. Ids for
//! known-unimplemented functions are registered as illegal entries so
//! that calling one routes to the unknown-call hook instead of
//! aborting the process.

use crate::scheduler::CoreScheduler;
use ocf_core::error::{KernelError, Result};
use parking_lot::RwLock;
use tracing::error;

pub type SyscallHandler = Box<dyn Fn(&CoreScheduler) -> Result<()> + Send + Sync>;

/// Hook invoked when an illegal (unimplemented) system call is hit
pub type UnknownCallHandler = Box<dyn Fn(u32, &str, &CoreScheduler) + Send + Sync>;

enum Entry {
    Handler { name: String, handler: SyscallHandler },
    Illegal { name: String },
}

#[derive(Default)]
pub struct SyscallTable {
    entries: RwLock<Vec<Entry>>,
    unknown_hook: RwLock<Option<UnknownCallHandler>>,
}

impl SyscallTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a host handler, returning its system call id
    pub fn register_handler(&self, name: impl Into<String>, handler: SyscallHandler) -> u32 {
        let mut entries = self.entries.write();
        let id = entries.len() as u32;
        entries.push(Entry::Handler {
            name: name.into(),
            handler,
        });
        id
    }

    /// Register a named entry with no handler
    ///
    /// Dispatching one of these routes to the unknown-call hook.
    pub fn register_illegal(&self, name: impl Into<String>) -> u32 {
        let mut entries = self.entries.write();
        let id = entries.len() as u32;
        entries.push(Entry::Illegal { name: name.into() });
        id
    }

    /// Install the hook for illegal system calls
    pub fn set_unknown_handler(&self, hook: UnknownCallHandler) {
        *self.unknown_hook.write() = Some(hook);
    }

    /// Name of a registered system call
    pub fn name_of(&self, id: u32) -> Option<String> {
        self.entries.read().get(id as usize).map(|e| match e {
            Entry::Handler { name, .. } | Entry::Illegal { name } => name.clone(),
        })
    }

    /// Dispatch a system call id on behalf of the current guest thread
    ///
    /// Registration happens at boot, before any dispatch; handlers must
    /// not register further entries.
    pub fn dispatch(&self, id: u32, scheduler: &CoreScheduler) -> Result<()> {
        let entries = self.entries.read();

        match entries.get(id as usize) {
            Some(Entry::Handler { handler, .. }) => handler(scheduler),
            Some(Entry::Illegal { name }) => {
                let hook = self.unknown_hook.read();
                if let Some(hook) = hook.as_ref() {
                    hook(id, name, scheduler);
                    Ok(())
                } else {
                    error!(id, name, "illegal system call with no handler installed");
                    Err(KernelError::UnknownSyscall(id).into())
                }
            }
            None => {
                error!(id, "system call id was never registered");
                Err(KernelError::UnknownSyscall(id).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_register_and_dispatch() {
        let table = SyscallTable::new();
        let sched = CoreScheduler::new();
        let hits = Arc::new(AtomicU32::new(0));

        let hits2 = Arc::clone(&hits);
        let id = table.register_handler(
            "coreinit!OSGetCoreId",
            Box::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        table.dispatch(id, &sched).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(table.name_of(id).unwrap(), "coreinit!OSGetCoreId");
    }

    #[test]
    fn test_illegal_routes_to_hook() {
        let table = SyscallTable::new();
        let sched = CoreScheduler::new();

        let id = table.register_illegal("coreinit!OSFancyMissingThing");
        assert!(table.dispatch(id, &sched).is_err());

        table.set_unknown_handler(Box::new(|_, _, sched| {
            sched.current().lock().gpr[3] = 0xC5C5C5C5;
        }));
        table.dispatch(id, &sched).unwrap();
        assert_eq!(sched.current().lock().gpr[3], 0xC5C5C5C5);
    }

    #[test]
    fn test_unregistered_id_fails() {
        let table = SyscallTable::new();
        let sched = CoreScheduler::new();
        assert!(table.dispatch(99, &sched).is_err());
    }
}
