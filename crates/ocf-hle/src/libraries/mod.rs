//! Concrete HLE system libraries

pub mod coreinit;
pub mod sysapp;

use crate::registry::HleRegistry;

/// Register every built-in system library
pub fn register_all(registry: &HleRegistry) {
    registry.register(coreinit::create());
    registry.register(sysapp::create());
}
