//! Configuration management for sampling runs
//!
//! Handles:
//! - Sampling settings (pool width, per-call deadline, host-level retries)
//! - ipmitool invocation (program, interface, -N / -R)
//! - Extra scanner patterns
//! - Inventory / report locations
//!
//! Layering: defaults → TOML file → command-line overrides (applied by main).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "RACKWATT_CONFIG";
/// Longest accepted per-call timeout (one day)
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;
/// Widest accepted worker pool
pub const MAX_WORKERS: usize = 65_536;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("invalid scanner pattern: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sampling: SamplingConfig,
    pub ipmitool: ToolConfig,
    pub scanner: ScannerConfig,
    pub io: IoConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Worker pool width
    pub workers: usize,
    /// Total wall-clock budget of one ipmitool call
    pub timeout_secs: f64,
    /// Host-level retries after the first attempt
    pub retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub program: String,
    /// Placed before the standard arguments (wrapper scripts, `sudo` style launchers)
    pub program_args: Vec<String>,
    pub interface: Interface,
    /// ipmitool -N
    pub net_timeout_secs: u32,
    /// ipmitool -R
    pub retries: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    pub extra_aggregate_patterns: Vec<String>,
    pub extra_exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub inventory: PathBuf,
    /// Table (sheet) selected inside the inventory document
    pub table: String,
    pub report: PathBuf,
}

/// IPMI transport selected with `-I`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interface {
    #[default]
    Lanplus,
    Lan,
}

impl Interface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::Lanplus => "lanplus",
            Interface::Lan => "lan",
        }
    }
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            workers: 16,
            timeout_secs: 12.0,
            retries: 1,
        }
    }
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: "ipmitool".to_string(),
            program_args: Vec::new(),
            interface: Interface::Lanplus,
            net_timeout_secs: 2,
            retries: 1,
        }
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            inventory: PathBuf::from("power.yaml"),
            table: "hosts".to_string(),
            report: PathBuf::from("power_report.json"),
        }
    }
}

impl SamplingConfig {
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

impl EngineConfig {
    /// Load config: explicit path, then `$RACKWATT_CONFIG`, then the
    /// OS config dir, falling back to defaults when no file exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.trim().is_empty() {
                return Self::from_file(Path::new(&path));
            }
        }

        match Self::config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// OS-specific default location (`<config dir>/rackwatt/config.toml`)
    pub fn config_file_path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("rackwatt");
        path.push("config.toml");
        Some(path)
    }

    /// Reject settings that would make a run meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let workers = self.sampling.workers;
        if workers == 0 || workers > MAX_WORKERS {
            return Err(ConfigError::Invalid {
                field: "sampling.workers",
                reason: format!("must be between 1 and {}, got {}", MAX_WORKERS, workers),
            });
        }
        let timeout = self.sampling.timeout_secs;
        if !timeout.is_finite() || timeout <= 0.0 || timeout > MAX_TIMEOUT_SECS {
            return Err(ConfigError::Invalid {
                field: "sampling.timeout_secs",
                reason: format!(
                    "must be a positive number of seconds up to {}, got {}",
                    MAX_TIMEOUT_SECS, timeout
                ),
            });
        }
        if self.ipmitool.program.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "ipmitool.program",
                reason: "must not be empty".into(),
            });
        }
        if self.io.table.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "io.table",
                reason: "must not be empty".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.sampling.workers, 16);
        assert_eq!(config.sampling.timeout_secs, 12.0);
        assert_eq!(config.sampling.max_attempts(), 2);
        assert_eq!(config.ipmitool.program, "ipmitool");
        assert_eq!(config.ipmitool.interface, Interface::Lanplus);
        assert_eq!(config.ipmitool.net_timeout_secs, 2);
        assert_eq!(config.ipmitool.retries, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_file_path() {
        if let Some(path) = EngineConfig::config_file_path() {
            assert!(path.to_string_lossy().contains("rackwatt"));
            assert!(path.to_string_lossy().ends_with("config.toml"));
        }
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[sampling]
workers = 64
timeout_secs = 5.5

[ipmitool]
interface = "lan"
program_args = ["--wrapped"]

[scanner]
extra_aggregate_patterns = ["^sys power$"]
"#
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.sampling.workers, 64);
        assert_eq!(config.sampling.timeout_secs, 5.5);
        assert_eq!(config.sampling.retries, 1);
        assert_eq!(config.ipmitool.interface, Interface::Lan);
        assert_eq!(config.ipmitool.program, "ipmitool");
        assert_eq!(config.ipmitool.program_args, vec!["--wrapped"]);
        assert_eq!(config.scanner.extra_aggregate_patterns, vec!["^sys power$"]);
        assert_eq!(config.io.table, "hosts");
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = EngineConfig::load(Some(Path::new("/nonexistent/rackwatt.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[sampling]\nworkers = \"many\"").unwrap();

        let err = EngineConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.sampling.workers = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sampling.timeout_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.sampling.timeout_secs = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.ipmitool.program = "  ".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_bounds_timeout_and_workers() {
        let mut config = EngineConfig::default();
        config.sampling.timeout_secs = 1e30;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "sampling.timeout_secs", .. })
        ));

        let mut config = EngineConfig::default();
        config.sampling.timeout_secs = MAX_TIMEOUT_SECS;
        assert!(config.validate().is_ok());

        let mut config = EngineConfig::default();
        config.sampling.workers = usize::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "sampling.workers", .. })
        ));

        let mut config = EngineConfig::default();
        config.sampling.workers = MAX_WORKERS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interface_names() {
        assert_eq!(Interface::Lanplus.as_str(), "lanplus");
        assert_eq!(Interface::Lan.as_str(), "lan");
    }
}
