//! Stackguard Runtime - Recursion stack guard for tree-walking interpreters
//!
//! This library lets an interpreter ask, before recursing deeper, whether the
//! calling thread still has enough native stack:
//! - Per-thread baseline and budget storage
//! - Cheap level-based check policy
//! - Budget calculation against the OS-reported or executable stack size
//! - Script threads sized for deep recursion

/// Stackguard runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod baseline;
pub mod budget;
pub mod depth;
pub mod error;
pub mod guard;
pub mod platform;
pub mod policy;
pub mod registry;
pub mod thread;

pub use baseline::StackPointers;
pub use budget::{StackBudget, StackSnapshot};
pub use depth::{LevelGuard, RecursionKind, RecursionTracker};
pub use error::{PlatformError, SnapshotError, StackOverflow};
pub use guard::StackGuard;
pub use platform::{ExecutableStack, MockPlatform, NativePlatform, StackPlatform};
pub use policy::{CheckFlags, CheckPolicy, Level, NoCheckThresholds, RecursionLevels};
pub use registry::{GlobalSlotRegistry, SlotPair};
pub use thread::DEFAULT_THREAD_STACK_SIZE;
