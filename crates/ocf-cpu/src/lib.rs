//! Espresso CPU state and system call plumbing for oxidized-cafe
//!
//! The Espresso is a 32-bit big-endian PowerPC with three cores. This
//! crate holds the per-core register file, the scheduler that tracks
//! which core a guest thread currently occupies, the instruction
//! encodings the loader and stub generators need, and the system call
//! table that bridges guest `kc` instructions to host handlers.

pub mod core;
pub mod espresso;
pub mod scheduler;
pub mod syscalls;

pub use crate::core::Core;
pub use scheduler::CoreScheduler;
pub use syscalls::SyscallTable;
