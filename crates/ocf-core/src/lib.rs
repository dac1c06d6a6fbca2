//! Core types for the oxidized-cafe Wii U emulator
//!
//! This crate provides the error taxonomy and configuration shared by
//! the loader, HLE and CPU crates.

pub mod config;
pub mod error;

pub use config::Config;
pub use error::{EmulatorError, Result};
