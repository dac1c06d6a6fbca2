//! Virtual file system for oxidized-cafe
//!
//! Guest code sees title content under `/vol/content` and executables
//! under `/vol/code`. Mounts map those prefixes either onto host
//! directories or onto in-memory file tables, which is how generated
//! HLE images are published to the loader.

pub mod mount;

pub use mount::{MountSource, VirtualFileSystem};
