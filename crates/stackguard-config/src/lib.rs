//! Stackguard Configuration System
//!
//! Provides configuration for the stack guard:
//! - Project configuration (stackguard.toml)
//! - Global user configuration (~/.stackguard/config.toml)
//! - Environment overrides (STACKGUARD_*)
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Global config (~/.stackguard/config.toml)
//! 2. Project config (./stackguard.toml, searched upwards)
//! 3. Environment variables (STACKGUARD_*)
//! 4. CLI flags
//!
//! # Example
//!
//! ```no_run
//! use stackguard_config::ConfigLoader;
//! use std::path::Path;
//!
//! let mut loader = ConfigLoader::new();
//! let loaded = loader.load_from_directory(Path::new(".")).unwrap();
//! println!("margin pages: {}", loaded.config.margin_pages());
//! ```

pub mod guard;
pub mod loader;

use std::path::PathBuf;
use thiserror::Error;

/// Recursion levels below which no stack check is made
pub const DEFAULT_NO_CHECK_LEVELS: usize = 100;

/// Pages of stack kept in reserve by the safety margin
pub const DEFAULT_MARGIN_PAGES: usize = 96;

/// Minimum stack size of script threads (16 MiB)
pub const DEFAULT_THREAD_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Smallest accepted thread stack size
pub const MIN_THREAD_STACK_SIZE: usize = 64 * 1024;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid value '{value}' for environment variable {var}")]
    InvalidEnv { var: String, value: String },

    #[error("Home directory not found")]
    HomeNotFound,
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

pub use guard::{BudgetConfig, FlagsConfig, GuardConfig, ThresholdsConfig};
pub use loader::{ConfigLoader, LoadedConfig};
