//! High-level emulation of Cafe OS system libraries
//!
//! Each HLE library models an RPL module entirely on the host: its
//! exported functions are syscall thunks that marshal guest registers
//! into host closures, and a synthetic RPL image is generated so the
//! loader can link guest modules against it exactly as it would
//! against a real library.

pub mod invoke;
pub mod library;
pub mod libraries;
pub mod registry;
pub mod rpl_gen;
pub mod trace;
pub mod typeinfo;

pub use invoke::{CallLayout, ParamKind, Signature, Slot, Value};
pub use library::{HleContext, HostFn, Library, LibrarySymbol};
pub use registry::HleRegistry;
