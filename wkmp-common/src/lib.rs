//! # WKMP Common Library
//!
//! Shared code for the WKMP input-stream components:
//! - Error type shared by configuration loading
//! - TOML bootstrap configuration
//! - Global parameter singleton (buffer sizing)
//! - Logging bootstrap

pub mod config;
pub mod error;
pub mod logging;
pub mod params;

pub use error::{Error, Result};
