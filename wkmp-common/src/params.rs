//! Global parameter management
//!
//! Centralized singleton for the input-stream sizing parameters.
//! Read-frequently, write-rarely access pattern using RwLock.
//!
//! # Architecture
//!
//! All global parameters are stored in a single `GlobalParams` struct, accessible
//! via the `PARAMS` static singleton. This provides:
//! - Single source of truth for buffer sizing defaults
//! - Thread-safe access from producer and consumer threads
//! - Low-contention read access (readers don't block each other)
//!
//! # Usage
//!
//! ```rust
//! use wkmp_common::params::PARAMS;
//!
//! // Read (fast, uncontended)
//! let buffer_size = PARAMS.input_buffer_size();
//!
//! // Write (rare, validated)
//! PARAMS.set("input_chunk_size", "8192").unwrap();
//! ```

use crate::{Error, Result};
use once_cell::sync::Lazy;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

/// Default ring buffer capacity for asynchronous input streams (512 KiB)
pub const DEFAULT_INPUT_BUFFER_SIZE: usize = 512 * 1024;

/// Default resume threshold (384 KiB)
pub const DEFAULT_INPUT_RESUME_AT: usize = 384 * 1024;

/// Default producer read granularity (16 KiB)
pub const DEFAULT_INPUT_CHUNK_SIZE: usize = 16 * 1024;

/// Global parameters singleton
///
/// Initialized with built-in defaults, optionally overridden from the TOML
/// bootstrap file (see [`crate::config::TomlConfig::apply_to_params`]).
pub static PARAMS: Lazy<GlobalParams> = Lazy::new(GlobalParams::default);

/// Global parameter storage
pub struct GlobalParams {
    /// Input ring buffer capacity in bytes
    ///
    /// Valid range: [4096, 67108864] bytes
    /// Default: 524288 (512 KiB)
    /// Producer is paused once the buffer holds this many bytes
    pub input_buffer_size: RwLock<usize>,

    /// Input resume threshold in bytes
    ///
    /// Valid range: [0, input_buffer_size)
    /// Default: 393216 (384 KiB)
    /// A paused producer is resumed once occupancy drains to this level
    pub input_resume_at: RwLock<usize>,

    /// Producer chunk size in bytes
    ///
    /// Valid range: [512, 1048576] bytes
    /// Default: 16384 (16 KiB)
    /// Amount a file-backed producer reads per event-loop iteration
    pub input_chunk_size: RwLock<usize>,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            input_buffer_size: RwLock::new(DEFAULT_INPUT_BUFFER_SIZE),
            input_resume_at: RwLock::new(DEFAULT_INPUT_RESUME_AT),
            input_chunk_size: RwLock::new(DEFAULT_INPUT_CHUNK_SIZE),
        }
    }
}

/// Metadata for a single GlobalParam parameter
///
/// Encapsulates the key, default and validation logic so config loading and
/// setters share one definition.
///
/// # Validator Closure Signature
///
/// All validators must have signature: `fn(&str) -> Result<(), String>`
///
/// Error format: `"{param_name}: {specific_reason}"`
pub struct ParamMetadata {
    pub key: &'static str,
    pub data_type: &'static str,
    pub default_value: &'static str,
    pub description: &'static str,
    pub validation_range: &'static str,
    pub validator: fn(&str) -> std::result::Result<(), String>,
}

fn parse_usize(key: &str, s: &str) -> std::result::Result<usize, String> {
    s.trim()
        .parse()
        .map_err(|_| format!("{}: invalid number format", key))
}

impl GlobalParams {
    /// Metadata for all parameters
    ///
    /// Range checks only; the cross-field rule `input_resume_at < input_buffer_size`
    /// is enforced by [`GlobalParams::set`].
    pub fn metadata() -> &'static [ParamMetadata] {
        &[
            ParamMetadata {
                key: "input_buffer_size",
                data_type: "usize",
                default_value: "524288",
                description: "Input ring buffer capacity (bytes)",
                validation_range: "4096-67108864",
                validator: |s| {
                    let v = parse_usize("input_buffer_size", s)?;
                    if !(4096..=67_108_864).contains(&v) {
                        return Err(format!(
                            "input_buffer_size: value {} out of range [4096, 67108864]",
                            v
                        ));
                    }
                    Ok(())
                },
            },
            ParamMetadata {
                key: "input_resume_at",
                data_type: "usize",
                default_value: "393216",
                description: "Occupancy at which a paused producer is resumed (bytes)",
                validation_range: "0-67108863",
                validator: |s| {
                    let v = parse_usize("input_resume_at", s)?;
                    if v >= 67_108_864 {
                        return Err(format!(
                            "input_resume_at: value {} out of range [0, 67108863]",
                            v
                        ));
                    }
                    Ok(())
                },
            },
            ParamMetadata {
                key: "input_chunk_size",
                data_type: "usize",
                default_value: "16384",
                description: "Producer read granularity (bytes)",
                validation_range: "512-1048576",
                validator: |s| {
                    let v = parse_usize("input_chunk_size", s)?;
                    if !(512..=1_048_576).contains(&v) {
                        return Err(format!(
                            "input_chunk_size: value {} out of range [512, 1048576]",
                            v
                        ));
                    }
                    Ok(())
                },
            },
        ]
    }

    /// Current input buffer capacity
    pub fn input_buffer_size(&self) -> usize {
        *self
            .input_buffer_size
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current resume threshold
    pub fn input_resume_at(&self) -> usize {
        *self
            .input_resume_at
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Current producer chunk size
    pub fn input_chunk_size(&self) -> usize {
        *self
            .input_chunk_size
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and store a parameter by key
    ///
    /// # Errors
    /// - `Error::InvalidInput` for unknown keys, malformed values, out-of-range
    ///   values, or a resume threshold that is not below the buffer size
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let meta = Self::metadata()
            .iter()
            .find(|m| m.key == key)
            .ok_or_else(|| Error::InvalidInput(format!("{}: unknown parameter", key)))?;
        (meta.validator)(value).map_err(Error::InvalidInput)?;
        let v = parse_usize(key, value).map_err(Error::InvalidInput)?;

        match key {
            "input_buffer_size" => {
                let resume_at = self.input_resume_at();
                if resume_at >= v {
                    return Err(Error::InvalidInput(format!(
                        "input_buffer_size: value {} must exceed input_resume_at ({})",
                        v, resume_at
                    )));
                }
                *self
                    .input_buffer_size
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = v;
            }
            "input_resume_at" => {
                let buffer_size = self.input_buffer_size();
                if v >= buffer_size {
                    return Err(Error::InvalidInput(format!(
                        "input_resume_at: value {} must be below input_buffer_size ({})",
                        v, buffer_size
                    )));
                }
                *self
                    .input_resume_at
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = v;
            }
            _ => {
                *self
                    .input_chunk_size
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = v;
            }
        }

        debug!("Parameter updated: {}={}", key, v);
        Ok(())
    }

    /// Restore built-in defaults
    pub fn reset(&self) {
        *self
            .input_buffer_size
            .write()
            .unwrap_or_else(PoisonError::into_inner) = DEFAULT_INPUT_BUFFER_SIZE;
        *self
            .input_resume_at
            .write()
            .unwrap_or_else(PoisonError::into_inner) = DEFAULT_INPUT_RESUME_AT;
        *self
            .input_chunk_size
            .write()
            .unwrap_or_else(PoisonError::into_inner) = DEFAULT_INPUT_CHUNK_SIZE;
    }
}
