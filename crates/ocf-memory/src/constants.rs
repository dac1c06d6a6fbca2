//! Guest memory map constants

/// Page size in bytes
pub const PAGE_SIZE: u32 = 0x1000;

/// Total 32-bit address space size
pub const ADDRESS_SPACE_SIZE: usize = 0x1_0000_0000;

/// Number of pages in the address space
pub const NUM_PAGES: usize = ADDRESS_SPACE_SIZE / PAGE_SIZE as usize;

/// Base address of the code region (module .text and trampolines)
pub const CODE_BASE: u32 = 0x0200_0000;
/// Size of the code region
pub const CODE_SIZE: u32 = 0x0E00_0000;

/// Base address of the data region (module .data/.bss)
pub const DATA_BASE: u32 = 0x1000_0000;
/// Size of the data region
pub const DATA_SIZE: u32 = 0x4000_0000;

/// Base address of the stub region for unimplemented function imports
pub const STUB_BASE: u32 = 0xA000_0000;
/// Size of the stub region
pub const STUB_SIZE: u32 = 0x0010_0000;

/// Base address of the transient loader region, committed only while a
/// module is being linked
pub const LOADER_BASE: u32 = 0xE000_0000;
/// Size of the transient loader region
pub const LOADER_SIZE: u32 = 0x0180_0000;

/// Base of the reserved, never-backed range handed out for unresolved
/// data imports. Any real dereference of these addresses faults.
pub const FAKE_DATA_BASE: u32 = 0xFFF0_0000;
