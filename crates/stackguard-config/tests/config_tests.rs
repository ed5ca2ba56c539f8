//! Configuration loading and precedence tests

use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use stackguard_config::{ConfigError, ConfigLoader, GuardConfig};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ENV_VARS: [&str; 5] = [
    "STACKGUARD_DISABLE_STACK",
    "STACKGUARD_FORCE_STACK",
    "STACKGUARD_FORCE_POOL_STACK",
    "STACKGUARD_EXTRA_SPACE",
    "STACKGUARD_MARGIN_PAGES",
];

fn clear_env() {
    for var in ENV_VARS {
        env::remove_var(var);
    }
}

fn write(path: &Path, content: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    path.to_path_buf()
}

/// Loader with a global config under `temp_dir/home`
fn loader(temp_dir: &TempDir) -> ConfigLoader {
    ConfigLoader::new().with_global_config_path(temp_dir.path().join("home").join("config.toml"))
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_defaults_without_any_file() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();

    let loaded = loader(&temp_dir)
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert_eq!(loaded.config, GuardConfig::default());
    assert_eq!(loaded.config.margin_pages(), 96);
    assert!(loaded.sources.is_empty());
}

#[test]
#[serial]
fn test_project_found_from_nested_directory() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let project = write(
        &temp_dir.path().join("stackguard.toml"),
        "[thresholds]\nevaluation = 42\n",
    );
    let nested = temp_dir.path().join("src").join("deep");
    fs::create_dir_all(&nested).unwrap();

    let loaded = loader(&temp_dir).load_from_directory(&nested).unwrap();

    assert_eq!(loaded.config.evaluation_threshold(), 42);
    assert_eq!(loaded.sources, vec![project]);
}

#[test]
#[serial]
fn test_load_from_specific_file() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = write(
        &temp_dir.path().join("custom.toml"),
        "[budget]\nextra_space = 100\n",
    );

    let loaded = loader(&temp_dir).load_from_file(&path).unwrap();

    assert_eq!(loaded.config.extra_space(), 100);
    assert_eq!(loaded.project_root.as_deref(), Some(temp_dir.path()));
}

#[test]
#[serial]
fn test_missing_specific_file() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let result = loader(&temp_dir).load_from_file(&temp_dir.path().join("missing.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
#[serial]
fn test_invalid_toml_reports_file() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = write(&temp_dir.path().join("stackguard.toml"), "[budget\n");

    match loader(&temp_dir).load_from_directory(temp_dir.path()) {
        Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
        other => panic!("Expected TomlParseError, got {:?}", other),
    }
}

// ============================================================================
// Precedence Tests
// ============================================================================

#[test]
#[serial]
fn test_project_overrides_global_per_field() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let global = write(
        &temp_dir.path().join("home").join("config.toml"),
        "[budget]\nmargin_pages = 10\nextra_space = 7\n",
    );
    let project = write(
        &temp_dir.path().join("project").join("stackguard.toml"),
        "[budget]\nmargin_pages = 20\n",
    );

    let loaded = loader(&temp_dir)
        .load_from_directory(&temp_dir.path().join("project"))
        .unwrap();

    assert_eq!(loaded.config.margin_pages(), 20);
    assert_eq!(loaded.config.extra_space(), 7);
    assert_eq!(loaded.sources, vec![global, project]);
}

#[test]
#[serial]
fn test_env_overrides_project() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    write(
        &temp_dir.path().join("stackguard.toml"),
        "[flags]\nforce_stack = false\n\n[budget]\nmargin_pages = 20\n",
    );

    env::set_var("STACKGUARD_FORCE_STACK", "true");
    env::set_var("STACKGUARD_MARGIN_PAGES", "4");
    env::set_var("STACKGUARD_EXTRA_SPACE", "8192");

    let loaded = loader(&temp_dir).load_from_directory(temp_dir.path());
    clear_env();
    let loaded = loaded.unwrap();

    assert!(loaded.config.force_stack());
    assert_eq!(loaded.config.margin_pages(), 4);
    assert_eq!(loaded.config.extra_space(), 8192);
}

#[rstest]
#[case("STACKGUARD_DISABLE_STACK", "1")]
#[case("STACKGUARD_FORCE_POOL_STACK", "yes")]
#[serial]
fn test_env_flags(#[case] var: &str, #[case] value: &str) {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var(var, value);

    let loaded = loader(&temp_dir).load_from_directory(temp_dir.path());
    clear_env();
    let config = loaded.unwrap().config;

    assert!(config.disable_stack() || config.force_pool_stack());
}

#[rstest]
#[case("STACKGUARD_MARGIN_PAGES", "many")]
#[case("STACKGUARD_FORCE_STACK", "sometimes")]
#[serial]
fn test_invalid_env_value(#[case] var: &str, #[case] value: &str) {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var(var, value);

    let result = loader(&temp_dir).load_from_directory(temp_dir.path());
    clear_env();

    assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
}

#[test]
#[serial]
fn test_env_values_are_validated() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    env::set_var("STACKGUARD_MARGIN_PAGES", "0");

    let result = loader(&temp_dir).load_from_directory(temp_dir.path());
    clear_env();

    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}
