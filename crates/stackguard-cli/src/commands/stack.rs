//! Stack command - print the current thread's stack budget

use anyhow::{bail, Context, Result};
use serde::Serialize;
use stackguard_config::GuardConfig;
use stackguard_runtime::{StackGuard, StackSnapshot};
use tracing::warn;

#[derive(Debug, Serialize)]
struct StackReport {
    #[serde(flatten)]
    snapshot: StackSnapshot,
    overflow: bool,
}

/// Check for `extra` bytes of stack, then report the budget
///
/// With `force`, a failed check is an error instead of a flag in the report.
pub fn run(config: &GuardConfig, force: bool, extra: usize, json: bool) -> Result<()> {
    let guard = StackGuard::from_config(config);
    guard.registry().initialize();

    let checked = guard.check_for_stack_space(extra);
    if let Err(e) = &checked {
        if force {
            bail!("stack check failed: {}", e);
        }
        warn!(error = %e, "stack check failed");
    }

    let snapshot = guard
        .snapshot()
        .context("Failed to read stack budget")?;
    guard.registry().finalize_current_thread();

    let report = StackReport {
        snapshot,
        overflow: checked.is_err(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.snapshot);
        if report.overflow {
            println!("stack overflow predicted");
        }
    }

    Ok(())
}
