//! Shared helpers for stack guard integration tests

#![allow(dead_code)]

use stackguard_runtime::platform::MockPlatform;
use stackguard_runtime::{GlobalSlotRegistry, StackGuard};
use std::sync::Arc;

pub use pretty_assertions::assert_eq;

/// Baseline stack pointer used by [`Harness`]
pub const BASELINE: usize = 0x4000_0000;

/// A guard over a scripted platform and its own registry
pub struct Harness {
    pub platform: Arc<MockPlatform>,
    pub guard: StackGuard,
}

impl Harness {
    /// Initialized registry, no safety margin, baseline not yet captured
    pub fn new() -> Self {
        let platform = Arc::new(MockPlatform::new());
        platform.set_margin(0);
        platform.set_stack_pointer(Some(BASELINE));

        let registry = Arc::new(GlobalSlotRegistry::new());
        registry.initialize();

        let guard = StackGuard::new(platform.clone(), registry);
        Self { platform, guard }
    }

    /// Harness whose registry was never initialized
    pub fn uninitialized() -> Self {
        let platform = Arc::new(MockPlatform::new());
        let guard = StackGuard::new(platform.clone(), Arc::new(GlobalSlotRegistry::new()));
        Self { platform, guard }
    }

    /// Capture the baseline with a first check
    pub fn with_baseline(self) -> Self {
        self.platform.set_stack_pointer(Some(BASELINE));
        assert!(self.guard.check_for_stack_space(0).is_ok());
        self
    }

    /// Move the current stack pointer `used` bytes below the baseline
    pub fn use_stack(&self, used: usize) {
        self.platform.set_stack_pointer(Some(BASELINE - used));
    }
}
