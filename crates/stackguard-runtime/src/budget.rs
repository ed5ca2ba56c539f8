//! Stack budget calculation
//!
//! Measures how much stack the calling thread has used since its baseline,
//! adds the requested extra space and a safety margin, and compares the
//! result with the maximum stack size. Values that are expensive to obtain
//! (margin, maximum, executable reserve) are fetched at most once per thread
//! and cached in the thread's [`StackBudget`].

use crate::error::PlatformError;
use crate::platform::{ExecutableStack, StackPlatform};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// A value fetched lazily from the platform at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cached<T> {
    /// Not asked for yet
    #[default]
    Unset,
    Known(T),
    /// Asked for, but the platform had no answer
    Unavailable,
}

impl<T: Copy> Cached<T> {
    pub fn known(&self) -> Option<T> {
        match self {
            Cached::Known(value) => Some(*value),
            Cached::Unset | Cached::Unavailable => None,
        }
    }
}

/// Per-thread stack accounting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackBudget {
    /// Distance between the baseline and the latest stack pointer
    pub used: usize,
    /// Stack currently backed by memory; informational only
    pub allocated: usize,
    /// Extra space requested by the latest check
    pub extra: usize,
    /// Safety margin, fetched once
    pub margin: Option<usize>,
    /// OS-reported maximum, fetched once
    pub maximum: Cached<usize>,
    /// Executable header values, read once and only if `maximum` is unavailable
    pub executable: Cached<ExecutableStack>,
}

impl StackBudget {
    /// Record the latest measurement and fill in cached platform values
    pub fn update(
        &mut self,
        platform: &dyn StackPlatform,
        extra: usize,
        used: usize,
    ) -> Result<(), PlatformError> {
        self.extra = extra;
        self.used = used;
        self.allocated = platform.allocated_stack_size()?;

        if self.margin.is_none() {
            self.margin = Some(platform.stack_safety_margin()?);
        }

        if self.maximum == Cached::Unset {
            self.maximum = match platform.maximum_stack_size()? {
                Some(maximum) if maximum > 0 => Cached::Known(maximum),
                _ => Cached::Unavailable,
            };
        }

        Ok(())
    }

    /// Maximum stack space, falling back to the executable's stack reserve
    ///
    /// `None` means the maximum is unknown.
    pub fn maximum_space(
        &mut self,
        platform: &dyn StackPlatform,
    ) -> Result<Option<usize>, PlatformError> {
        if let Cached::Known(maximum) = self.maximum {
            return Ok(Some(maximum));
        }

        if self.executable == Cached::Unset {
            let stack = match platform.executable_path() {
                Some(path) => platform.executable_stack_reserve_and_commit(&path)?,
                None => None,
            };
            debug!(?stack, "executable stack reserve and commit");

            self.executable = match stack {
                Some(stack) if stack.reserve > 0 => Cached::Known(stack),
                _ => Cached::Unavailable,
            };
        }

        Ok(self.executable.known().map(|stack| stack.reserve))
    }

    pub fn margin(&self) -> usize {
        self.margin.unwrap_or(0)
    }

    pub fn snapshot(&self) -> StackSnapshot {
        let executable = self.executable.known();
        StackSnapshot {
            used: self.used,
            allocated: self.allocated,
            extra: self.extra,
            margin: self.margin(),
            maximum: self.maximum.known().unwrap_or(0),
            reserve: executable.map_or(0, |stack| stack.reserve),
            commit: executable.map_or(0, |stack| stack.commit),
        }
    }
}

/// Stack used between the baseline (outer) and current (inner) pointer
///
/// The growth direction of the stack is not assumed, so this is the absolute
/// distance between the two.
pub fn used_space(outer: usize, inner: usize) -> usize {
    outer.abs_diff(inner)
}

/// Space needed to continue, saturating at `usize::MAX`
pub fn needed_space(used: usize, extra: usize, context_extra: usize, margin: usize) -> usize {
    used
        .saturating_add(extra)
        .saturating_add(context_extra)
        .saturating_add(margin)
}

/// Whether `needed` bytes fit in `maximum` (inclusive)
pub fn fits(needed: usize, maximum: usize) -> bool {
    needed <= maximum
}

/// Copy of a thread's budget for diagnostics
///
/// Fields that are not known yet are reported as 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StackSnapshot {
    pub used: usize,
    pub allocated: usize,
    pub extra: usize,
    pub margin: usize,
    pub maximum: usize,
    pub reserve: usize,
    pub commit: usize,
}

impl fmt::Display for StackSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "used {} allocated {} extra {} margin {} maximum {} reserve {} commit {}",
            self.used,
            self.allocated,
            self.extra,
            self.margin,
            self.maximum,
            self.reserve,
            self.commit
        )
    }
}
