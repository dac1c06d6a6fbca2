//! Stubs for unimplemented imports
//!
//! Imports that resolve against no loaded module still get an address
//! so linking can finish. Function imports point at a two-instruction
//! thunk whose system call id is registered without a handler; calling
//! one routes to the unknown-call hook. Data imports get an address in
//! a reserved range that is never mapped, so a dereference faults
//! recognizably.

use ocf_core::error::{LoaderError, Result};
use ocf_cpu::espresso;
use ocf_cpu::syscalls::SyscallTable;
use ocf_memory::constants::{FAKE_DATA_BASE, STUB_BASE, STUB_SIZE};
use ocf_memory::{AddressSpace, SequentialExtent};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

pub struct UnimplementedRegistry {
    memory: Arc<AddressSpace>,
    table: Arc<SyscallTable>,
    thunks: Mutex<SequentialExtent>,
    functions: Mutex<HashMap<String, u32>>,
    data: Mutex<HashMap<String, u32>>,
}

impl UnimplementedRegistry {
    pub fn new(memory: Arc<AddressSpace>, table: Arc<SyscallTable>) -> Self {
        Self {
            memory,
            table,
            thunks: Mutex::new(SequentialExtent::new("stubs", STUB_BASE, STUB_SIZE)),
            functions: Mutex::new(HashMap::new()),
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Address of the call thunk for an unimplemented function import
    ///
    /// One thunk per symbol name, shared across importing modules.
    pub fn function_thunk(&self, module: &str, name: &str) -> Result<u32> {
        let mut functions = self.functions.lock();
        if let Some(&addr) = functions.get(name) {
            return Ok(addr);
        }

        let id = self.table.register_illegal(format!("{}::{}", module, name));
        let addr = self.thunks.lock().alloc(8, 4)?;
        self.memory.write_be32(addr, espresso::encode_kc(id))?;
        self.memory.write_be32(addr + 4, espresso::BLR)?;

        info!(
            symbol = format_args!("{}::{}", module, name),
            addr = format_args!("0x{:08x}", addr),
            "unimplemented function import"
        );
        functions.insert(name.to_string(), addr);
        Ok(addr)
    }

    /// Fake address for an unimplemented data import
    ///
    /// The returned address lies in never-mapped memory, offset by
    /// 0x800 so negative field offsets stay inside the fake page.
    pub fn data_address(&self, module: &str, name: &str) -> Result<u32> {
        let mut data = self.data.lock();
        if let Some(&addr) = data.get(name) {
            return Ok(addr | 0x800);
        }

        let id = data.len() as u32;
        if id > 0xFF {
            return Err(LoaderError::ModuleLoad(format!(
                "out of fake data addresses for {}::{}",
                module, name
            ))
            .into());
        }

        let addr = FAKE_DATA_BASE | (id << 12);
        info!(
            symbol = format_args!("{}::{}", module, name),
            addr = format_args!("0x{:08x}", addr | 0x800),
            "unimplemented data import"
        );
        data.insert(name.to_string(), addr);
        Ok(addr | 0x800)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> UnimplementedRegistry {
        let memory = AddressSpace::new().unwrap();
        let table = Arc::new(SyscallTable::new());
        UnimplementedRegistry::new(memory, table)
    }

    #[test]
    fn test_function_thunks_are_cached_per_name() {
        let stubs = registry();
        let a = stubs.function_thunk("coreinit", "OSMissing").unwrap();
        let b = stubs.function_thunk("sysapp", "OSMissing").unwrap();
        let c = stubs.function_thunk("coreinit", "OSOtherMissing").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a >= STUB_BASE && a < STUB_BASE + STUB_SIZE);

        // The thunk is a kc followed by blr
        let kc = stubs.memory.read_be32(a).unwrap();
        assert_eq!(kc >> 26, 17);
        assert_eq!(stubs.memory.read_be32(a + 4).unwrap(), espresso::BLR);
    }

    #[test]
    fn test_data_addresses_are_never_mapped() {
        let stubs = registry();
        let a = stubs.data_address("coreinit", "OSSomeData").unwrap();
        let b = stubs.data_address("coreinit", "OSSomeData").unwrap();
        let c = stubs.data_address("coreinit", "OSOtherData").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a & 0xFFF, 0x800);
        assert!(a >= FAKE_DATA_BASE);
        assert!(!stubs.memory.is_mapped(a));
    }
}
