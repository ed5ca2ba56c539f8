//! Baseline capture
//!
//! The first check on a thread records the stack pointer as that thread's
//! baseline ("outer" pointer). Later checks compare their current ("inner")
//! pointer against it. The baseline is never recomputed, even when usage later
//! appears to go past it.

use crate::error::PlatformError;
use crate::platform::StackPlatform;
use crate::registry::ThreadSlots;

/// Current and baseline stack pointers of the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackPointers {
    pub inner: usize,
    pub outer: usize,
}

/// Read the current stack pointer and the thread's baseline
///
/// Stores the current pointer as the baseline if none was stored yet.
/// Returns `None` when the platform cannot produce a stack pointer.
pub(crate) fn capture(
    platform: &dyn StackPlatform,
    slots: &ThreadSlots<'_>,
) -> Result<Option<StackPointers>, PlatformError> {
    let inner = match platform.stack_pointer()? {
        Some(sp) if sp != 0 => sp,
        _ => return Ok(None),
    };

    let outer = match slots.baseline() {
        Some(outer) if outer != 0 => outer,
        _ => {
            slots.set_baseline(inner);
            inner
        }
    };

    Ok(Some(StackPointers { inner, outer }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MockPlatform;
    use crate::registry::GlobalSlotRegistry;

    #[test]
    fn test_first_capture_sets_baseline() {
        let registry = GlobalSlotRegistry::new();
        registry.initialize();
        let platform = MockPlatform::new();
        platform.set_stack_pointer(Some(0x9000));

        let slots = registry.acquire().unwrap();
        let pointers = capture(&platform, &slots).unwrap().unwrap();

        assert_eq!(pointers, StackPointers { inner: 0x9000, outer: 0x9000 });
        assert_eq!(slots.baseline(), Some(0x9000));
    }

    #[test]
    fn test_baseline_never_moves() {
        let registry = GlobalSlotRegistry::new();
        registry.initialize();
        let platform = MockPlatform::new();
        let slots = registry.acquire().unwrap();

        platform.set_stack_pointer(Some(0x9000));
        capture(&platform, &slots).unwrap();

        for sp in [0x8000, 0xA000, 0x1000] {
            platform.set_stack_pointer(Some(sp));
            let pointers = capture(&platform, &slots).unwrap().unwrap();
            assert_eq!(pointers, StackPointers { inner: sp, outer: 0x9000 });
        }
    }

    #[test]
    fn test_missing_stack_pointer() {
        let registry = GlobalSlotRegistry::new();
        registry.initialize();
        let platform = MockPlatform::new();
        let slots = registry.acquire().unwrap();

        for sp in [None, Some(0)] {
            platform.set_stack_pointer(sp);
            assert_eq!(capture(&platform, &slots).unwrap(), None);
        }
        assert_eq!(slots.baseline(), None);
    }
}
