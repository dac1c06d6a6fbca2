//! Error types for the oxidized-cafe emulator

use thiserror::Error;

/// Main error type for the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] KernelError),

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unsupported feature: {0}")]
    Unsupported(String),
}

/// Memory-related errors
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Out of memory")]
    OutOfMemory,

    #[error("Invalid address: 0x{0:08x}")]
    InvalidAddress(u32),

    #[error("Access violation at 0x{addr:08x}: {kind}")]
    AccessViolation { addr: u32, kind: AccessKind },

    #[error("Region exhausted: {region} needs 0x{size:x} more bytes")]
    RegionExhausted { region: &'static str, size: u32 },

    #[error("Alignment error: address 0x{addr:08x} not aligned to {align}")]
    AlignmentError { addr: u32, align: u32 },
}

/// Loader errors
///
/// `Format` and `Relocation` are fatal to the load that raised them.
/// `ModuleLoad` means neither an HLE library nor an on-disk image could
/// satisfy the request; the caller decides whether that matters.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Invalid RPL: {0}")]
    Format(String),

    #[error("Relocation failed: {0}")]
    Relocation(String),

    #[error("Failed to load module {0}")]
    ModuleLoad(String),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),
}

/// Kernel / syscall errors
#[derive(Error, Debug)]
pub enum KernelError {
    #[error("Unknown syscall: {0}")]
    UnknownSyscall(u32),

    #[error("Invalid core: {0}")]
    InvalidCore(u32),

    #[error("Unmarshalable signature: {0}")]
    BadSignature(String),
}

/// Guest filesystem errors
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Invalid handle: {0}")]
    InvalidHandle(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Kind of memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Execute,
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "read"),
            Self::Write => write!(f, "write"),
            Self::Execute => write!(f, "execute"),
        }
    }
}

/// Result type alias for emulator operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::InvalidAddress(0x12345678);
        assert_eq!(format!("{}", err), "Invalid address: 0x12345678");

        let err = LoaderError::Format("bad magic".to_string());
        assert_eq!(format!("{}", err), "Invalid RPL: bad magic");
    }

    #[test]
    fn test_error_conversion() {
        let mem_err = MemoryError::OutOfMemory;
        let emu_err: EmulatorError = mem_err.into();
        assert!(matches!(emu_err, EmulatorError::Memory(_)));

        let load_err = LoaderError::ModuleLoad("missing.rpl".to_string());
        let emu_err: EmulatorError = load_err.into();
        assert!(matches!(emu_err, EmulatorError::Loader(_)));
    }
}
