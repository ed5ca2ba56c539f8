//! Error types for stack checking

use crate::budget::StackSnapshot;
use thiserror::Error;

/// Failures raised by a platform primitive while a check is running
///
/// Anything else a primitive cannot answer is reported as "unavailable"
/// (`None`) rather than as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    /// A hard stack overflow was raised while querying the platform
    #[error("stack overflow raised by platform primitive")]
    StackOverflow,

    /// The host does not allow native stack introspection
    #[error("access denied to native primitive {primitive}")]
    AccessDenied { primitive: &'static str },
}

/// A predicted (soft) or observed (hard) stack overflow
///
/// This is the only failure `StackGuard` ever hands back to its caller; the
/// interpreter turns it into a script-level error and unwinds.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StackOverflow {
    #[error(
        "stack overflow, needed space {needed} is greater than maximum space {maximum}: {snapshot}"
    )]
    BudgetExceeded {
        needed: usize,
        maximum: usize,
        snapshot: StackSnapshot,
    },

    #[error("stack overflow raised while checking for stack space")]
    FaultDuringCheck,
}

/// Reasons a diagnostic snapshot cannot be produced
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("thread stack size slot is invalid")]
    SlotsUnavailable,

    #[error("thread stack size is invalid")]
    BudgetUnavailable,
}
