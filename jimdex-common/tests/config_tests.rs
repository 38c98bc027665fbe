//! Unit tests for bootstrap configuration and graceful degradation
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate JIMDEX_CONFIG are marked with #[serial].

use jimdex_common::config::{
    load_or_default, load_toml_config, resolve_config_path, write_toml_config, TomlConfig,
    CONFIG_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_defaults_are_complete() {
    let config = TomlConfig::default();
    assert_eq!(config.port, 5780);
    assert_eq!(config.fetcher.info_path, "info");
    assert_eq!(config.fetcher.reserves_path, "reserves");
    assert_eq!(config.records.recommendation_kind, 38000);
    assert!(config.profiles.endpoint.is_none());
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_partial_file_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("jimdex-engine.toml");
    std::fs::write(
        &path,
        r#"
port = 6000

[fetcher]
timeout_secs = 3

[profiles]
endpoint = "https://profiles.example"
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.port, 6000);
    assert_eq!(config.fetcher.timeout_secs, 3);
    assert_eq!(config.fetcher.info_path, "info", "Unset keys use defaults");
    assert_eq!(
        config.profiles.endpoint.as_deref(),
        Some("https://profiles.example")
    );
    assert_eq!(config.bind_address, "127.0.0.1");
}

#[test]
fn test_missing_file_yields_defaults() {
    let config = load_or_default(Some(Path::new("/nonexistent/jimdex.toml"))).unwrap();
    assert_eq!(config, TomlConfig::default());

    let config = load_or_default(None).unwrap();
    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_malformed_file_is_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    let result = load_or_default(Some(&path));
    assert!(result.is_err(), "Malformed TOML must not silently fall back");
}

#[test]
fn test_write_then_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("jimdex-engine.toml");

    let mut config = TomlConfig::default();
    config.port = 7001;
    config.records.announcement_kind = 30000;
    write_toml_config(&config, &path).unwrap();

    assert_eq!(load_toml_config(&path).unwrap(), config);
}

#[test]
#[serial]
fn test_cli_argument_wins_over_env() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(
        Some(Path::new("/from/cli.toml")),
        CONFIG_ENV_VAR,
        "jimdex-engine",
    );
    assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_env_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/from/env.toml");

    let resolved = resolve_config_path(None, CONFIG_ENV_VAR, "jimdex-engine");
    assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_blank_env_is_ignored() {
    env::set_var(CONFIG_ENV_VAR, "   ");

    let resolved = resolve_config_path(None, CONFIG_ENV_VAR, "jimdex-test-module-without-file");
    assert_eq!(resolved, None);

    env::remove_var(CONFIG_ENV_VAR);
}
