//! Configuration Loader
//!
//! Loads and merges guard configuration from multiple sources with proper precedence.

use crate::guard::GuardConfig;
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "stackguard.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.stackguard/config.toml) - lowest priority
/// 2. Project config (./stackguard.toml) - overrides global
/// 3. Environment variables (STACKGUARD_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedConfig {
    /// Effective configuration
    pub config: GuardConfig,

    /// Directory where stackguard.toml was found
    pub project_root: Option<PathBuf>,

    /// Files that contributed, lowest priority first
    pub sources: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use `path` instead of ~/.stackguard/config.toml
    pub fn with_global_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.global_config_path = Some(path.into());
        self
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find stackguard.toml, merges it over the
    /// global config and applies environment overrides.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<LoadedConfig> {
        let project = find_project_config(start_dir);
        let project_root = project
            .as_ref()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        self.load(project.as_deref(), project_root)
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<LoadedConfig> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let project_root = config_path.parent().map(Path::to_path_buf);
        self.load(Some(config_path), project_root)
    }

    fn load(
        &mut self,
        project: Option<&Path>,
        project_root: Option<PathBuf>,
    ) -> ConfigResult<LoadedConfig> {
        let mut loaded = LoadedConfig {
            project_root,
            ..LoadedConfig::default()
        };

        if let Some(path) = self.global_config_file() {
            loaded.config = GuardConfig::load_from_file(&path)?;
            loaded.sources.push(path);
        }

        if let Some(path) = project {
            loaded.config.merge(&GuardConfig::load_from_file(path)?);
            loaded.sources.push(path.to_path_buf());
        }

        apply_env_overrides(&mut loaded.config)?;
        loaded.config.validate()?;
        Ok(loaded)
    }

    /// Existing global config file, if any
    fn global_config_file(&mut self) -> Option<PathBuf> {
        if self.global_config_path.is_none() {
            self.global_config_path = GuardConfig::global_config_path().ok();
        }

        self.global_config_path
            .as_ref()
            .filter(|path| path.exists())
            .cloned()
    }

    /// Get the global configuration directory (~/.stackguard)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".stackguard"))
    }
}

/// Find stackguard.toml by walking up the directory tree
fn find_project_config(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .map(|dir| dir.join(PROJECT_CONFIG_FILE))
        .find(|path| path.is_file())
}

/// Apply environment variable overrides
///
/// Recognized: STACKGUARD_DISABLE_STACK, STACKGUARD_FORCE_STACK,
/// STACKGUARD_FORCE_POOL_STACK, STACKGUARD_EXTRA_SPACE and
/// STACKGUARD_MARGIN_PAGES.
fn apply_env_overrides(config: &mut GuardConfig) -> ConfigResult<()> {
    if let Some(value) = env_bool("STACKGUARD_DISABLE_STACK")? {
        config.flags_mut().disable_stack = Some(value);
    }

    if let Some(value) = env_bool("STACKGUARD_FORCE_STACK")? {
        config.flags_mut().force_stack = Some(value);
    }

    if let Some(value) = env_bool("STACKGUARD_FORCE_POOL_STACK")? {
        config.flags_mut().force_pool_stack = Some(value);
    }

    if let Some(value) = env_usize("STACKGUARD_EXTRA_SPACE")? {
        config.budget_mut().extra_space = Some(value);
    }

    if let Some(value) = env_usize("STACKGUARD_MARGIN_PAGES")? {
        config.budget_mut().margin_pages = Some(value);
    }

    Ok(())
}

fn env_bool(var: &str) -> ConfigResult<Option<bool>> {
    let Ok(value) = env::var(var) else {
        return Ok(None);
    };
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(Some(true)),
        "false" | "0" | "no" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        }),
    }
}

fn env_usize(var: &str) -> ConfigResult<Option<usize>> {
    let Ok(value) = env::var(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnv {
            var: var.to_string(),
            value,
        })
}
