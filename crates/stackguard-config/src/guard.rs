//! Guard Configuration (stackguard.toml)
//!
//! The same schema is used for the project file and for the global
//! `~/.stackguard/config.toml`. Every field is optional; accessors on
//! [`GuardConfig`] resolve missing values to their defaults.

use crate::{
    ConfigError, ConfigResult, DEFAULT_MARGIN_PAGES, DEFAULT_NO_CHECK_LEVELS,
    DEFAULT_THREAD_STACK_SIZE, MIN_THREAD_STACK_SIZE,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stack guard configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Check switches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flags: Option<FlagsConfig>,

    /// No-check recursion thresholds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thresholds: Option<ThresholdsConfig>,

    /// Stack budget settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<BudgetConfig>,
}

/// `[flags]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct FlagsConfig {
    /// Request stack checks at all (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_stack: Option<bool>,

    /// Disable stack checks entirely
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_stack: Option<bool>,

    /// Never check on thread-pool threads
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_pool_stack: Option<bool>,

    /// Check on thread-pool threads too
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_pool_stack: Option<bool>,

    /// Check regardless of recursion levels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_stack: Option<bool>,

    /// Check a counter only once it also reached its configured maximum
    #[serde(skip_serializing_if = "Option::is_none")]
    pub respect_configured_maximum: Option<bool>,
}

/// `[thresholds]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ThresholdsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parser: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<usize>,
}

/// `[budget]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Bytes added to every check by the embedding interpreter
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra_space: Option<usize>,

    /// Safety margin in pages (default: 96)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub margin_pages: Option<usize>,

    /// Minimum stack size of script threads (default: 16 MiB)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_stack_size: Option<usize>,

    /// Allow native stack introspection (default: true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub native_access: Option<bool>,
}

impl GuardConfig {
    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(budget) = &self.budget {
            if budget.margin_pages == Some(0) {
                return Err(ConfigError::InvalidValue {
                    field: "budget.margin_pages".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }

            if let Some(size) = budget.thread_stack_size {
                if size < MIN_THREAD_STACK_SIZE {
                    return Err(ConfigError::InvalidValue {
                        field: "budget.thread_stack_size".to_string(),
                        reason: format!(
                            "must be at least {} bytes, got {}",
                            MIN_THREAD_STACK_SIZE, size
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get the global config file path (~/.stackguard/config.toml)
    pub fn global_config_path() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".stackguard").join("config.toml"))
    }

    /// Merge another config into this one
    ///
    /// Values set in `other` take precedence, field by field.
    pub fn merge(&mut self, other: &GuardConfig) {
        if let Some(flags) = &other.flags {
            let dst = self.flags.get_or_insert_with(Default::default);
            merge_field(&mut dst.check_stack, flags.check_stack);
            merge_field(&mut dst.disable_stack, flags.disable_stack);
            merge_field(&mut dst.no_pool_stack, flags.no_pool_stack);
            merge_field(&mut dst.force_pool_stack, flags.force_pool_stack);
            merge_field(&mut dst.force_stack, flags.force_stack);
            merge_field(
                &mut dst.respect_configured_maximum,
                flags.respect_configured_maximum,
            );
        }

        if let Some(thresholds) = &other.thresholds {
            let dst = self.thresholds.get_or_insert_with(Default::default);
            merge_field(&mut dst.evaluation, thresholds.evaluation);
            merge_field(&mut dst.parser, thresholds.parser);
            merge_field(&mut dst.expression, thresholds.expression);
        }

        if let Some(budget) = &other.budget {
            let dst = self.budget.get_or_insert_with(Default::default);
            merge_field(&mut dst.extra_space, budget.extra_space);
            merge_field(&mut dst.margin_pages, budget.margin_pages);
            merge_field(&mut dst.thread_stack_size, budget.thread_stack_size);
            merge_field(&mut dst.native_access, budget.native_access);
        }
    }

    pub fn flags_mut(&mut self) -> &mut FlagsConfig {
        self.flags.get_or_insert_with(Default::default)
    }

    pub fn budget_mut(&mut self) -> &mut BudgetConfig {
        self.budget.get_or_insert_with(Default::default)
    }

    pub fn check_stack(&self) -> bool {
        self.flag(|f| f.check_stack).unwrap_or(true)
    }

    pub fn disable_stack(&self) -> bool {
        self.flag(|f| f.disable_stack).unwrap_or(false)
    }

    pub fn no_pool_stack(&self) -> bool {
        self.flag(|f| f.no_pool_stack).unwrap_or(false)
    }

    pub fn force_pool_stack(&self) -> bool {
        self.flag(|f| f.force_pool_stack).unwrap_or(false)
    }

    pub fn force_stack(&self) -> bool {
        self.flag(|f| f.force_stack).unwrap_or(false)
    }

    pub fn respect_configured_maximum(&self) -> bool {
        self.flag(|f| f.respect_configured_maximum).unwrap_or(false)
    }

    pub fn evaluation_threshold(&self) -> usize {
        self.threshold(|t| t.evaluation)
    }

    pub fn parser_threshold(&self) -> usize {
        self.threshold(|t| t.parser)
    }

    pub fn expression_threshold(&self) -> usize {
        self.threshold(|t| t.expression)
    }

    pub fn extra_space(&self) -> usize {
        self.budget_value(|b| b.extra_space).unwrap_or(0)
    }

    pub fn margin_pages(&self) -> usize {
        self.budget_value(|b| b.margin_pages)
            .unwrap_or(DEFAULT_MARGIN_PAGES)
    }

    pub fn thread_stack_size(&self) -> usize {
        self.budget_value(|b| b.thread_stack_size)
            .unwrap_or(DEFAULT_THREAD_STACK_SIZE)
    }

    pub fn native_access(&self) -> bool {
        self.budget_value(|b| b.native_access).unwrap_or(true)
    }

    fn flag(&self, f: impl FnOnce(&FlagsConfig) -> Option<bool>) -> Option<bool> {
        self.flags.as_ref().and_then(f)
    }

    fn threshold(&self, f: impl FnOnce(&ThresholdsConfig) -> Option<usize>) -> usize {
        self.thresholds
            .as_ref()
            .and_then(f)
            .unwrap_or(DEFAULT_NO_CHECK_LEVELS)
    }

    fn budget_value<T>(&self, f: impl FnOnce(&BudgetConfig) -> Option<T>) -> Option<T> {
        self.budget.as_ref().and_then(f)
    }
}

fn merge_field<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}
