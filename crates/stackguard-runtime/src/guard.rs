//! Stack guard facade
//!
//! [`StackGuard`] is the single entry point used by the interpreter. It wires
//! the policy, baseline capture and budget calculation together and reduces
//! every failure mode to `Ok(())` or [`StackOverflow`].
//!
//! # Failure policy
//!
//! The guard fails open unless the evidence is conclusive:
//!
//! | Condition | Outcome |
//! |---|---|
//! | no stack introspection on this host | `Ok` |
//! | registry slots not initialized | `Ok` |
//! | stack pointer unobtainable | `Ok` |
//! | maximum stack size unknown | `Ok` |
//! | needed space exceeds maximum | `Err(BudgetExceeded)` |
//! | overflow fault (or panic) during the check | `Err(FaultDuringCheck)` |
//! | native primitives not permitted | `Ok` |
//!
//! # Example
//!
//! ```
//! use stackguard_runtime::platform::MockPlatform;
//! use stackguard_runtime::{GlobalSlotRegistry, StackGuard};
//! use std::sync::Arc;
//!
//! let platform = Arc::new(MockPlatform::new());
//! let registry = Arc::new(GlobalSlotRegistry::new());
//! registry.initialize();
//!
//! let guard = StackGuard::new(platform, registry);
//! assert!(guard.check_for_stack_space(0).is_ok());
//! ```

use crate::baseline::{self, StackPointers};
use crate::budget::{fits, needed_space, used_space, StackBudget, StackSnapshot};
use crate::error::{PlatformError, SnapshotError, StackOverflow};
use crate::platform::{NativePlatform, StackPlatform};
use crate::policy::{CheckFlags, CheckPolicy, NoCheckThresholds, RecursionLevels};
use crate::registry::GlobalSlotRegistry;
use crate::thread::DEFAULT_THREAD_STACK_SIZE;
use stackguard_config::GuardConfig;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, trace};

/// Outcome of the check body before fault isolation
type CheckResult = Result<Result<(), StackOverflow>, PlatformError>;

/// Predicts stack exhaustion for recursive evaluation
pub struct StackGuard {
    pub(crate) platform: Arc<dyn StackPlatform>,
    pub(crate) registry: Arc<GlobalSlotRegistry>,
    policy: CheckPolicy,
    flags: CheckFlags,
    /// Extra space the owning interpreter adds to every check
    extra_space: usize,
    pub(crate) thread_stack_size: usize,
    pub(crate) new_thread_stack_size: OnceLock<usize>,
}

impl StackGuard {
    pub fn new(platform: Arc<dyn StackPlatform>, registry: Arc<GlobalSlotRegistry>) -> Self {
        Self {
            platform,
            registry,
            policy: CheckPolicy::default(),
            flags: CheckFlags::default(),
            extra_space: 0,
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
            new_thread_stack_size: OnceLock::new(),
        }
    }

    /// Guard over the native platform and the process-wide registry
    pub fn native() -> Self {
        Self::new(Arc::new(NativePlatform::new()), GlobalSlotRegistry::global())
    }

    /// Native guard configured from a loaded configuration
    pub fn from_config(config: &GuardConfig) -> Self {
        let platform = NativePlatform::new()
            .with_margin_pages(config.margin_pages())
            .with_native_access(config.native_access());

        let flags = CheckFlags {
            check_stack: config.check_stack(),
            disable_stack: config.disable_stack(),
            no_pool_stack: config.no_pool_stack(),
            force_pool_stack: config.force_pool_stack(),
            force_stack: config.force_stack(),
            respect_configured_maximum: config.respect_configured_maximum(),
        };

        let thresholds = NoCheckThresholds {
            evaluation: config.evaluation_threshold(),
            parser: config.parser_threshold(),
            expression: config.expression_threshold(),
        };

        Self::new(Arc::new(platform), GlobalSlotRegistry::global())
            .with_flags(flags)
            .with_policy(CheckPolicy::new(thresholds))
            .with_extra_space(config.extra_space())
            .with_thread_stack_size(config.thread_stack_size())
    }

    pub fn with_policy(mut self, policy: CheckPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Flags used by [`StackGuard::check_levels`]
    pub fn with_flags(mut self, flags: CheckFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Extra space added to every check on top of the requested amount
    pub fn with_extra_space(mut self, extra_space: usize) -> Self {
        self.extra_space = extra_space;
        self
    }

    /// Minimum stack size for threads spawned by the guard
    pub fn with_thread_stack_size(mut self, size: usize) -> Self {
        self.thread_stack_size = size;
        self
    }

    pub fn registry(&self) -> &Arc<GlobalSlotRegistry> {
        &self.registry
    }

    pub fn platform(&self) -> &Arc<dyn StackPlatform> {
        &self.platform
    }

    pub fn policy(&self) -> CheckPolicy {
        self.policy
    }

    pub fn flags(&self) -> CheckFlags {
        self.flags
    }

    /// Check recursion levels with the guard's own flags
    pub fn check_levels(
        &self,
        levels: &RecursionLevels,
        extra_space: usize,
    ) -> Result<(), StackOverflow> {
        self.check_recursion(self.flags, levels, extra_space)
    }

    /// Run the policy and, if it asks for it, the stack check
    pub fn check_recursion(
        &self,
        flags: CheckFlags,
        levels: &RecursionLevels,
        extra_space: usize,
    ) -> Result<(), StackOverflow> {
        let pool_thread = self.platform.is_pool_thread();
        if !self.policy.should_check(flags, pool_thread, levels) {
            return Ok(());
        }
        self.check_for_stack_space(extra_space)
    }

    /// Check whether `extra_space` more bytes of stack are available
    ///
    /// Never panics; every failure inside the check is resolved to one of the
    /// two outcomes.
    pub fn check_for_stack_space(&self, extra_space: usize) -> Result<(), StackOverflow> {
        isolate(|| self.check_body(extra_space))
    }

    fn check_body(&self, extra_space: usize) -> CheckResult {
        if !self.platform.is_supported() {
            debug!("stack introspection is not supported on this platform");
            return Ok(Ok(()));
        }

        let Some(slots) = self.registry.acquire() else {
            debug!("thread storage slots not available");
            return Ok(Ok(()));
        };

        let Some(pointers) = baseline::capture(&*self.platform, &slots)? else {
            debug!("stack pointer not available");
            return Ok(Ok(()));
        };

        let used = used_space(pointers.outer, pointers.inner);

        match slots.with_budget(|budget| self.evaluate(budget, extra_space, used, pointers)) {
            Some(result) => result,
            None => {
                debug!("thread stack budget not available");
                Ok(Ok(()))
            }
        }
    }

    fn evaluate(
        &self,
        budget: &mut StackBudget,
        extra_space: usize,
        used: usize,
        pointers: StackPointers,
    ) -> CheckResult {
        budget.update(&*self.platform, extra_space, used)?;

        let Some(maximum) = budget.maximum_space(&*self.platform)? else {
            debug!("maximum stack space not available");
            return Ok(Ok(()));
        };

        let needed = needed_space(used, extra_space, self.extra_space, budget.margin());
        if fits(needed, maximum) {
            return Ok(Ok(()));
        }

        let snapshot = budget.snapshot();
        error!(
            needed,
            maximum,
            %snapshot,
            "stack overflow, needed space is greater than maximum space"
        );
        trace!(
            inner = pointers.inner,
            outer = pointers.outer,
            "stack pointers at overflow"
        );

        Ok(Err(StackOverflow::BudgetExceeded {
            needed,
            maximum,
            snapshot,
        }))
    }

    /// Capture the stack pointers, establishing the baseline if needed
    pub fn refresh_stack_pointers(&self) -> Option<StackPointers> {
        let slots = self.registry.acquire()?;
        let pointers = match baseline::capture(&*self.platform, &slots) {
            Ok(pointers) => pointers,
            Err(e) => {
                debug!(error = %e, "cannot refresh stack pointers");
                None
            }
        };
        trace!(?pointers, "refreshed stack pointers");
        pointers
    }

    /// Budget recorded by the latest check on the calling thread
    pub fn snapshot(&self) -> Result<StackSnapshot, SnapshotError> {
        let slots = self
            .registry
            .acquire()
            .ok_or(SnapshotError::SlotsUnavailable)?;
        slots
            .budget()
            .map(|budget| budget.snapshot())
            .ok_or(SnapshotError::BudgetUnavailable)
    }
}

impl std::fmt::Debug for StackGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StackGuard")
            .field("registry", &self.registry)
            .field("policy", &self.policy)
            .field("flags", &self.flags)
            .field("extra_space", &self.extra_space)
            .field("thread_stack_size", &self.thread_stack_size)
            .finish_non_exhaustive()
    }
}

/// Resolve faults raised inside the check body
fn isolate(body: impl FnOnce() -> CheckResult) -> Result<(), StackOverflow> {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(PlatformError::StackOverflow)) | Err(_) => {
            report_hard_overflow();
            Err(StackOverflow::FaultDuringCheck)
        }
        Ok(Err(e @ PlatformError::AccessDenied { .. })) => {
            debug!(error = %e, "native stack checking not permitted");
            Ok(())
        }
    }
}

fn report_hard_overflow() {
    // Logging this close to the limit can fault again.
    let _ = panic::catch_unwind(|| {
        error!("stack overflow raised while checking for stack space");
    });
}
