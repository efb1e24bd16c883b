//! Integration tests for bootstrap configuration loading
//!
//! Uses serial_test for tests that touch WKMP_IS_CONFIG or the global PARAMS
//! singleton so they don't race with each other.

use serial_test::serial;
use std::env;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};
use wkmp_common::config::{resolve_config_path, TomlConfig, CONFIG_ENV_VAR};
use wkmp_common::params::{PARAMS, DEFAULT_INPUT_BUFFER_SIZE, DEFAULT_INPUT_RESUME_AT};
use wkmp_common::Error;

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "[logging]\nlevel = \"trace\"\nfile = \"/tmp/wkmp-is.log\"\n\n[input]\nchunk_size = 4096"
    )
    .unwrap();

    let config = TomlConfig::load(file.path()).unwrap();
    assert_eq!(config.logging.level, "trace");
    assert_eq!(
        config.logging.file.as_deref(),
        Some(std::path::Path::new("/tmp/wkmp-is.log"))
    );
    assert_eq!(config.input.chunk_size, Some(4096));
}

#[test]
fn test_missing_explicit_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let config = TomlConfig::load_or_default(Some(&missing)).unwrap();
    assert_eq!(config.logging.level, "info");
    assert!(config.input.buffer_size.is_none());
}

#[test]
fn test_malformed_file_is_reported() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[input\nbuffer_size = 1").unwrap();

    let result = TomlConfig::load_or_default(Some(file.path()));
    assert!(matches!(result, Err(Error::Toml(_))));
}

#[test]
#[serial]
fn test_env_var_overrides_platform_default() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");
    let resolved = resolve_config_path(None);
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(resolved, Some(std::path::PathBuf::from("/tmp/from-env.toml")));
}

#[test]
#[serial]
fn test_empty_env_var_is_ignored() {
    env::set_var(CONFIG_ENV_VAR, "");
    let resolved = resolve_config_path(None);
    env::remove_var(CONFIG_ENV_VAR);

    if let Some(path) = resolved {
        assert!(path.ends_with("wkmp/wkmp-is.toml"));
    }
}

#[test]
#[serial]
fn test_apply_to_global_params() {
    PARAMS.reset();

    let config =
        TomlConfig::from_toml_str("[input]\nbuffer_size = 1048576\nresume_at = 786432").unwrap();
    config.apply_to_params(&PARAMS).unwrap();
    assert_eq!(PARAMS.input_buffer_size(), 1_048_576);
    assert_eq!(PARAMS.input_resume_at(), 786_432);

    PARAMS.reset();
    assert_eq!(PARAMS.input_buffer_size(), DEFAULT_INPUT_BUFFER_SIZE);
    assert_eq!(PARAMS.input_resume_at(), DEFAULT_INPUT_RESUME_AT);
}

#[test]
#[serial]
fn test_invalid_override_leaves_params_untouched() {
    PARAMS.reset();

    let config = TomlConfig::from_toml_str("[input]\nchunk_size = 1").unwrap();
    assert!(matches!(
        config.apply_to_params(&PARAMS),
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(PARAMS.input_chunk_size(), 16 * 1024);
}
