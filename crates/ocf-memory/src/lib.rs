//! Guest virtual address space for the oxidized-cafe Wii U emulator
//!
//! The Espresso sees a 32-bit big-endian address space. Modules are
//! placed into fixed regions: a code region, a data region, a transient
//! loader region used only while linking, and a small region reserved
//! for unimplemented-import stubs.

pub mod address_space;
pub mod constants;
pub mod extent;
pub mod pages;

pub use address_space::AddressSpace;
pub use extent::SequentialExtent;
pub use pages::PageFlags;
