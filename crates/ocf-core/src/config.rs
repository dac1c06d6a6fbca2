//! Configuration system for the oxidized-cafe emulator

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathConfig,
    pub log: LogConfig,
    pub debug: DebugConfig,
}

/// Filesystem paths
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Host directory mounted as the title content path
    pub content_path: PathBuf,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Per-function HLE trace filters.
    ///
    /// Each entry is `+` (enable) or `-` (disable) followed by
    /// `module::function`, where either part may end in `*` to match a
    /// prefix, e.g. `+coreinit::OS*` or `-gx2*`.
    pub kernel_trace_filters: Vec<String>,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Write each generated HLE library image to disk for inspection
    pub dump_hle_rpl: bool,
    /// Directory the dumped images are written into
    pub dump_path: PathBuf,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            content_path: PathBuf::from("content"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            kernel_trace_filters: Vec::new(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            dump_hle_rpl: false,
            dump_path: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text)
            .map_err(|e| crate::EmulatorError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-cafe")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(!config.debug.dump_hle_rpl);
        assert!(config.log.kernel_trace_filters.is_empty());
    }

    #[test]
    fn test_parse_config() {
        let text = r#"
            [log]
            kernel_trace_filters = ["+coreinit::OS*", "-sysapp*"]

            [debug]
            dump_hle_rpl = true
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert!(config.debug.dump_hle_rpl);
        assert_eq!(config.log.kernel_trace_filters.len(), 2);
    }
}
