//! Script threads
//!
//! Threads that evaluate scripts get a stack at least as large as the one the
//! host executable asks for, and have their per-thread guard data set up and
//! torn down around the work.

use crate::guard::StackGuard;
use crate::registry::GlobalSlotRegistry;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Minimum stack size of threads created for script evaluation (16 MiB)
pub const DEFAULT_THREAD_STACK_SIZE: usize = stackguard_config::DEFAULT_THREAD_STACK_SIZE;

impl StackGuard {
    /// Stack size for new script threads
    ///
    /// The larger of the executable's configured stack reserve and the
    /// guard's thread stack size. Computed once per guard.
    pub fn new_thread_stack_size(&self) -> usize {
        *self.new_thread_stack_size.get_or_init(|| {
            let reserve = self
                .platform
                .executable_path()
                .and_then(|path| {
                    self.platform
                        .executable_stack_reserve_and_commit(&path)
                        .ok()
                        .flatten()
                })
                .map_or(0, |stack| stack.reserve);
            let size = reserve.max(self.thread_stack_size);
            debug!(reserve, size, "new thread stack size");
            size
        })
    }

    /// Spawn a named thread sized for script evaluation
    ///
    /// The registry is initialized before `f` runs, and the thread's guard
    /// data is cleared when `f` returns or unwinds.
    pub fn spawn_script_thread<F, T>(
        self: &Arc<Self>,
        name: impl Into<String>,
        f: F,
    ) -> io::Result<JoinHandle<T>>
    where
        F: FnOnce(&StackGuard) -> T + Send + 'static,
        T: Send + 'static,
    {
        let guard = Arc::clone(self);
        thread::Builder::new()
            .name(name.into())
            .stack_size(self.new_thread_stack_size())
            .spawn(move || {
                guard.registry.initialize();
                let _finalize = FinalizeOnExit(&guard.registry);
                f(&guard)
            })
    }
}

/// Clears the calling thread's guard data on drop
struct FinalizeOnExit<'a>(&'a GlobalSlotRegistry);

impl Drop for FinalizeOnExit<'_> {
    fn drop(&mut self) {
        self.0.finalize_current_thread();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockPlatform, Primitive};
    use crate::platform::ExecutableStack;

    fn guard(platform: &Arc<MockPlatform>) -> StackGuard {
        StackGuard::new(platform.clone(), Arc::new(GlobalSlotRegistry::new()))
    }

    #[test]
    fn test_default_when_executable_reserve_is_small() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_executable_stack(Some(ExecutableStack {
            reserve: 1024 * 1024,
            commit: 4096,
        }));
        assert_eq!(guard(&platform).new_thread_stack_size(), DEFAULT_THREAD_STACK_SIZE);
    }

    #[test]
    fn test_executable_reserve_wins_when_larger() {
        let platform = Arc::new(MockPlatform::new());
        platform.set_executable_stack(Some(ExecutableStack {
            reserve: 64 * 1024 * 1024,
            commit: 4096,
        }));
        let guard = guard(&platform);

        assert_eq!(guard.new_thread_stack_size(), 64 * 1024 * 1024);
        assert_eq!(guard.new_thread_stack_size(), 64 * 1024 * 1024);
        assert_eq!(platform.calls(Primitive::ExecutableStack), 1);
    }

    #[test]
    fn test_configured_thread_stack_size() {
        let platform = Arc::new(MockPlatform::new());
        let guard = guard(&platform).with_thread_stack_size(32 * 1024 * 1024);
        assert_eq!(guard.new_thread_stack_size(), 32 * 1024 * 1024);
    }
}
