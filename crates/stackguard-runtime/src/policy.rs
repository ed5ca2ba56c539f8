//! Check policy
//!
//! Decides, without touching the platform, whether a stack check is worth
//! running at all. Shallow recursion never pays for the lock and the budget
//! calculation.

use serde::Serialize;

/// Nesting levels below which no stack check is made
pub const DEFAULT_NO_CHECK_LEVELS: usize = stackguard_config::DEFAULT_NO_CHECK_LEVELS;

/// Caller-supplied switches for stack checking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckFlags {
    /// Stack checking was requested at all
    pub check_stack: bool,
    /// Stack checking is explicitly disabled
    pub disable_stack: bool,
    /// Never check on thread-pool threads
    pub no_pool_stack: bool,
    /// Check on thread-pool threads too
    pub force_pool_stack: bool,
    /// Check regardless of recursion levels
    pub force_stack: bool,
    /// Only check a counter once it also reached its configured maximum
    pub respect_configured_maximum: bool,
}

impl Default for CheckFlags {
    fn default() -> Self {
        Self {
            check_stack: true,
            disable_stack: false,
            no_pool_stack: false,
            force_pool_stack: false,
            force_stack: false,
            respect_configured_maximum: false,
        }
    }
}

impl CheckFlags {
    /// Default flags with `force_stack` set
    pub fn forced() -> Self {
        Self {
            force_stack: true,
            ..Self::default()
        }
    }
}

/// Current and configured maximum nesting depth of one kind of recursion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Level {
    pub current: usize,
    pub maximum: usize,
}

impl Level {
    pub fn new(current: usize, maximum: usize) -> Self {
        Self { current, maximum }
    }
}

/// Recursion counters owned by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecursionLevels {
    pub evaluation: Level,
    pub parser: Level,
    pub expression: Level,
}

/// Per-kind levels that never trigger a stack check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NoCheckThresholds {
    pub evaluation: usize,
    pub parser: usize,
    pub expression: usize,
}

impl Default for NoCheckThresholds {
    fn default() -> Self {
        Self {
            evaluation: DEFAULT_NO_CHECK_LEVELS,
            parser: DEFAULT_NO_CHECK_LEVELS,
            expression: DEFAULT_NO_CHECK_LEVELS,
        }
    }
}

/// Cheap predicate run before the budget calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckPolicy {
    thresholds: NoCheckThresholds,
}

impl CheckPolicy {
    pub fn new(thresholds: NoCheckThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> NoCheckThresholds {
        self.thresholds
    }

    /// Whether the expensive stack check should run
    pub fn should_check(
        &self,
        flags: CheckFlags,
        pool_thread: bool,
        levels: &RecursionLevels,
    ) -> bool {
        if flags.disable_stack || !flags.check_stack {
            return false;
        }

        // Pool threads can have very small stacks; deep recursion on them is
        // not supported unless explicitly asked for.
        if pool_thread && (flags.no_pool_stack || !flags.force_pool_stack) {
            return false;
        }

        if flags.force_stack {
            return true;
        }

        let respect = flags.respect_configured_maximum;
        exceeds(levels.evaluation, self.thresholds.evaluation, respect)
            || exceeds(levels.parser, self.thresholds.parser, respect)
            || exceeds(levels.expression, self.thresholds.expression, respect)
    }
}

fn exceeds(level: Level, threshold: usize, respect_maximum: bool) -> bool {
    level.current > threshold && (!respect_maximum || level.current >= level.maximum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn levels(
        evaluation: usize,
        parser: usize,
        expression: usize,
        maximum: usize,
    ) -> RecursionLevels {
        RecursionLevels {
            evaluation: Level::new(evaluation, maximum),
            parser: Level::new(parser, maximum),
            expression: Level::new(expression, maximum),
        }
    }

    #[rstest]
    #[case(levels(0, 0, 0, 1000), false)]
    #[case(levels(100, 100, 100, 1000), false)]
    #[case(levels(101, 0, 0, 1000), true)]
    #[case(levels(0, 101, 0, 1000), true)]
    #[case(levels(0, 0, 101, 1000), true)]
    fn test_fixed_thresholds(#[case] levels: RecursionLevels, #[case] expected: bool) {
        let policy = CheckPolicy::default();
        assert_eq!(policy.should_check(CheckFlags::default(), false, &levels), expected);
    }

    #[rstest]
    #[case(levels(500, 0, 0, 1000), false)]
    #[case(levels(999, 0, 0, 1000), false)]
    #[case(levels(1000, 0, 0, 1000), true)]
    #[case(levels(0, 0, 1500, 1000), true)]
    #[case(levels(50, 0, 0, 10), false)]
    fn test_respect_configured_maximum(#[case] levels: RecursionLevels, #[case] expected: bool) {
        let flags = CheckFlags {
            respect_configured_maximum: true,
            ..CheckFlags::default()
        };
        assert_eq!(CheckPolicy::default().should_check(flags, false, &levels), expected);
    }

    #[test]
    fn test_force_ignores_levels() {
        let policy = CheckPolicy::default();
        assert!(policy.should_check(CheckFlags::forced(), false, &RecursionLevels::default()));
    }

    #[test]
    fn test_disabled_wins_over_force() {
        let flags = CheckFlags {
            disable_stack: true,
            ..CheckFlags::forced()
        };
        let policy = CheckPolicy::default();
        assert!(!policy.should_check(flags, false, &levels(5000, 5000, 5000, 0)));

        let flags = CheckFlags {
            check_stack: false,
            ..CheckFlags::forced()
        };
        assert!(!policy.should_check(flags, false, &levels(5000, 5000, 5000, 0)));
    }

    #[rstest]
    #[case(false, false, false)]
    #[case(true, false, true)]
    #[case(true, true, false)]
    fn test_pool_threads(
        #[case] force_pool_stack: bool,
        #[case] no_pool_stack: bool,
        #[case] expected: bool,
    ) {
        let flags = CheckFlags {
            force_pool_stack,
            no_pool_stack,
            ..CheckFlags::forced()
        };
        assert_eq!(
            CheckPolicy::default().should_check(flags, true, &levels(5000, 5000, 5000, 0)),
            expected
        );
    }

    #[test]
    fn test_custom_thresholds() {
        let policy = CheckPolicy::new(NoCheckThresholds {
            evaluation: 10,
            parser: 1000,
            expression: 1000,
        });
        assert!(policy.should_check(CheckFlags::default(), false, &levels(11, 0, 0, 0)));
        assert!(!policy.should_check(CheckFlags::default(), false, &levels(10, 999, 999, 0)));
    }
}
