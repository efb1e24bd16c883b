//! Bootstrap configuration loading
//!
//! The TOML file only carries bootstrap concerns: log level/file and the
//! input buffer sizing overrides. Everything has a built-in default, so a
//! missing file is not an error.
//!
//! # Config File Resolution
//!
//! 1. Explicit path (command-line `--config`)
//! 2. `WKMP_IS_CONFIG` environment variable
//! 3. `<config_dir>/wkmp/wkmp-is.toml` (platform config directory)

use crate::params::GlobalParams;
use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "WKMP_IS_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Input buffer overrides (optional)
    #[serde(default)]
    pub input: InputConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Input stream sizing overrides
///
/// Unset fields keep the values already held by `PARAMS`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputConfig {
    pub buffer_size: Option<usize>,
    pub resume_at: Option<usize>,
    pub chunk_size: Option<usize>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a specific file
    ///
    /// # Errors
    /// - `Error::Io` if the file cannot be read
    /// - `Error::Toml` if the file is not valid TOML for this schema
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load configuration, falling back to defaults when no file exists
    ///
    /// A missing file logs a warning and yields defaults. A file that exists
    /// but fails to parse is an error.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        match resolve_config_path(explicit) {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config directory available, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Push `[input]` overrides into the parameter singleton
    ///
    /// Values pass through the same validators as `GlobalParams::set`.
    /// When both sizes are given they are applied in the order that keeps
    /// `resume_at < buffer_size` true at every step.
    pub fn apply_to_params(&self, params: &GlobalParams) -> Result<()> {
        match (self.input.buffer_size, self.input.resume_at) {
            (Some(size), Some(resume_at)) => {
                if resume_at >= size {
                    return Err(Error::Config(format!(
                        "input.resume_at ({}) must be below input.buffer_size ({})",
                        resume_at, size
                    )));
                }
                if size > params.input_resume_at() {
                    params.set("input_buffer_size", &size.to_string())?;
                    params.set("input_resume_at", &resume_at.to_string())?;
                } else {
                    params.set("input_resume_at", &resume_at.to_string())?;
                    params.set("input_buffer_size", &size.to_string())?;
                }
            }
            (Some(size), None) => params.set("input_buffer_size", &size.to_string())?,
            (None, Some(resume_at)) => params.set("input_resume_at", &resume_at.to_string())?,
            (None, None) => {}
        }

        if let Some(chunk) = self.input.chunk_size {
            params.set("input_chunk_size", &chunk.to_string())?;
        }
        Ok(())
    }
}

/// Determine which config file to read
///
/// Returns `None` only when no explicit path, no environment override and no
/// platform config directory exist.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: explicit path
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    // Priority 2: environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: platform config directory
    dirs::config_dir().map(|d| d.join("wkmp").join("wkmp-is.toml"))
}
