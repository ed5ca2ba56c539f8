//! Recursion depth tracking
//!
//! Interpreters that do not keep their own nesting counters can use a
//! [`RecursionTracker`] to feed the check policy. Each entered level is an RAII
//! [`LevelGuard`], so early returns and `?` unwind the counters correctly.

use crate::error::StackOverflow;
use crate::guard::StackGuard;
use crate::policy::{Level, RecursionLevels};
use std::cell::Cell;

/// Default configured maximum nesting depth per recursion kind
pub const DEFAULT_MAXIMUM_LEVELS: usize = 1000;

/// Kinds of recursion the policy distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecursionKind {
    Evaluation,
    Parser,
    Expression,
}

impl RecursionKind {
    pub fn name(&self) -> &'static str {
        match self {
            RecursionKind::Evaluation => "evaluation",
            RecursionKind::Parser => "parser",
            RecursionKind::Expression => "expression",
        }
    }
}

/// Nesting counters of one interpreter on one thread
#[derive(Debug)]
pub struct RecursionTracker {
    levels: Cell<RecursionLevels>,
}

impl Default for RecursionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RecursionTracker {
    pub fn new() -> Self {
        let level = Level::new(0, DEFAULT_MAXIMUM_LEVELS);
        Self {
            levels: Cell::new(RecursionLevels {
                evaluation: level,
                parser: level,
                expression: level,
            }),
        }
    }

    /// Set the configured maximum for one kind
    pub fn with_maximum(self, kind: RecursionKind, maximum: usize) -> Self {
        self.update(kind, |level| level.maximum = maximum);
        self
    }

    pub fn levels(&self) -> RecursionLevels {
        self.levels.get()
    }

    pub fn current(&self, kind: RecursionKind) -> usize {
        select(&self.levels.get(), kind).current
    }

    /// Enter one level of `kind`; leaving happens when the guard drops
    pub fn enter(&self, kind: RecursionKind) -> LevelGuard<'_> {
        self.update(kind, |level| level.current = level.current.saturating_add(1));
        LevelGuard {
            tracker: self,
            kind,
        }
    }

    /// Enter one level of `kind` and run the stack check for the new depth
    ///
    /// On overflow the level is left again before the error is returned.
    pub fn enter_checked(
        &self,
        guard: &StackGuard,
        kind: RecursionKind,
        extra_space: usize,
    ) -> Result<LevelGuard<'_>, StackOverflow> {
        let level = self.enter(kind);
        guard.check_levels(&self.levels(), extra_space)?;
        Ok(level)
    }

    fn update(&self, kind: RecursionKind, f: impl FnOnce(&mut Level)) {
        let mut levels = self.levels.get();
        f(match kind {
            RecursionKind::Evaluation => &mut levels.evaluation,
            RecursionKind::Parser => &mut levels.parser,
            RecursionKind::Expression => &mut levels.expression,
        });
        self.levels.set(levels);
    }
}

fn select(levels: &RecursionLevels, kind: RecursionKind) -> Level {
    match kind {
        RecursionKind::Evaluation => levels.evaluation,
        RecursionKind::Parser => levels.parser,
        RecursionKind::Expression => levels.expression,
    }
}

/// One entered recursion level
#[must_use = "the level is left as soon as the guard is dropped"]
pub struct LevelGuard<'a> {
    tracker: &'a RecursionTracker,
    kind: RecursionKind,
}

impl LevelGuard<'_> {
    pub fn kind(&self) -> RecursionKind {
        self.kind
    }
}

impl Drop for LevelGuard<'_> {
    fn drop(&mut self) {
        self.tracker
            .update(self.kind, |level| level.current = level.current.saturating_sub(1));
    }
}
