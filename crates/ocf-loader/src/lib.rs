//! RPL loading and dynamic linking
//!
//! Modules come from two places: generated images published by the HLE
//! registry, and real RPL/RPX files under `/vol/code/` on the mounted
//! filesystem. Both go through the same parse, place, link pipeline.

pub mod linker;
pub mod module;
pub mod registry;
pub mod rpl;
pub mod stubs;

pub use module::{LoadedModule, LoadedSection, ModuleSymbol, SectionKind, SymbolKind};
pub use registry::{normalize_module_name, HleProvider, ModuleRegistry};
pub use rpl::RplImage;
