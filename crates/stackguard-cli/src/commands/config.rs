//! Config command - show the effective configuration

use anyhow::Result;
use serde::Serialize;
use stackguard_config::LoadedConfig;
use std::path::PathBuf;

/// Every setting with defaults filled in
#[derive(Debug, Serialize)]
struct EffectiveConfig {
    sources: Vec<PathBuf>,
    flags: Flags,
    thresholds: Thresholds,
    budget: Budget,
}

#[derive(Debug, Serialize)]
struct Flags {
    check_stack: bool,
    disable_stack: bool,
    no_pool_stack: bool,
    force_pool_stack: bool,
    force_stack: bool,
    respect_configured_maximum: bool,
}

#[derive(Debug, Serialize)]
struct Thresholds {
    evaluation: usize,
    parser: usize,
    expression: usize,
}

#[derive(Debug, Serialize)]
struct Budget {
    extra_space: usize,
    margin_pages: usize,
    thread_stack_size: usize,
    native_access: bool,
}

impl From<&LoadedConfig> for EffectiveConfig {
    fn from(loaded: &LoadedConfig) -> Self {
        let config = &loaded.config;
        Self {
            sources: loaded.sources.clone(),
            flags: Flags {
                check_stack: config.check_stack(),
                disable_stack: config.disable_stack(),
                no_pool_stack: config.no_pool_stack(),
                force_pool_stack: config.force_pool_stack(),
                force_stack: config.force_stack(),
                respect_configured_maximum: config.respect_configured_maximum(),
            },
            thresholds: Thresholds {
                evaluation: config.evaluation_threshold(),
                parser: config.parser_threshold(),
                expression: config.expression_threshold(),
            },
            budget: Budget {
                extra_space: config.extra_space(),
                margin_pages: config.margin_pages(),
                thread_stack_size: config.thread_stack_size(),
                native_access: config.native_access(),
            },
        }
    }
}

pub fn run(loaded: &LoadedConfig, json: bool) -> Result<()> {
    let effective = EffectiveConfig::from(loaded);
    if json {
        println!("{}", serde_json::to_string_pretty(&effective)?);
    } else {
        print!("{}", toml::to_string_pretty(&effective)?);
    }
    Ok(())
}
