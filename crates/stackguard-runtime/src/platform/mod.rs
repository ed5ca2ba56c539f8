//! Platform capability layer
//!
//! Everything that touches raw stack addresses or asks the operating system
//! about thread stacks lives behind [`StackPlatform`]. The rest of the crate
//! (baseline capture, budget calculation, policy, facade) only sees plain
//! numbers, which keeps it testable against [`mock::MockPlatform`].
//!
//! # Implementations
//!
//! - [`native::NativePlatform`]: the real thing (`psm`, `libc`, `rayon`)
//! - [`mock::MockPlatform`]: scripted values and call counters for tests

pub mod executable;
pub mod mock;
pub mod native;

pub use executable::ExecutableStack;
pub use mock::MockPlatform;
pub use native::NativePlatform;

use crate::error::PlatformError;
use std::path::{Path, PathBuf};

/// Stack introspection primitives consumed by the guard
///
/// Methods return `Ok(None)` when a value simply cannot be obtained and
/// `Err` only for the two conditions the guard must tell apart: a hard
/// overflow during the query and a lack of permission.
pub trait StackPlatform: Send + Sync {
    /// Whether this host supports stack introspection at all
    fn is_supported(&self) -> bool;

    /// Whether the calling thread belongs to a thread pool
    fn is_pool_thread(&self) -> bool;

    /// Current stack pointer of the calling thread
    fn stack_pointer(&self) -> Result<Option<usize>, PlatformError>;

    /// Stack space currently backed by memory (informational only)
    fn allocated_stack_size(&self) -> Result<usize, PlatformError>;

    /// Estimated runtime and OS overhead to keep in reserve
    fn stack_safety_margin(&self) -> Result<usize, PlatformError>;

    /// OS-reported maximum stack size of the calling thread
    fn maximum_stack_size(&self) -> Result<Option<usize>, PlatformError>;

    /// Path of the executable hosting this process
    fn executable_path(&self) -> Option<PathBuf> {
        std::env::current_exe().ok()
    }

    /// Stack reserve and commit configured in an executable's header
    fn executable_stack_reserve_and_commit(
        &self,
        path: &Path,
    ) -> Result<Option<ExecutableStack>, PlatformError> {
        Ok(executable::read_file_stack_reserve_and_commit(path))
    }
}
