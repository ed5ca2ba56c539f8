//! Native stack introspection for the current host

use crate::error::PlatformError;
use crate::platform::StackPlatform;
use std::cell::Cell;

/// Pages kept in reserve on top of measured usage (384K with 4K pages)
pub const DEFAULT_MARGIN_PAGES: usize = stackguard_config::DEFAULT_MARGIN_PAGES;

const FALLBACK_PAGE_SIZE: usize = 4096;

thread_local! {
    /// Bounds of this thread's stack, filled by the first successful query
    static THREAD_BOUNDS: Cell<Option<Option<StackBounds>>> = const { Cell::new(None) };

    /// Number of times this thread asked the OS for its stack bounds
    static BOUNDS_QUERIES: Cell<usize> = const { Cell::new(0) };
}

/// Stack introspection backed by the operating system
///
/// Linux and Android read thread stack bounds with `pthread_getattr_np`,
/// macOS and iOS with `pthread_get_stack{addr,size}_np`. Windows has no
/// maximum from here and relies on the executable header fallback.
#[derive(Debug, Clone)]
pub struct NativePlatform {
    margin_pages: usize,
    native_access: bool,
}

impl NativePlatform {
    pub fn new() -> Self {
        Self {
            margin_pages: DEFAULT_MARGIN_PAGES,
            native_access: true,
        }
    }

    /// Number of pages used for the safety margin
    pub fn with_margin_pages(mut self, pages: usize) -> Self {
        self.margin_pages = pages;
        self
    }

    /// Allow or deny calls into native code
    ///
    /// A denied platform answers every primitive with
    /// [`PlatformError::AccessDenied`], which the guard treats as "enough
    /// stack space".
    pub fn with_native_access(mut self, allowed: bool) -> Self {
        self.native_access = allowed;
        self
    }

    fn ensure_access(&self, primitive: &'static str) -> Result<(), PlatformError> {
        if self.native_access {
            Ok(())
        } else {
            Err(PlatformError::AccessDenied { primitive })
        }
    }
}

impl Default for NativePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl StackPlatform for NativePlatform {
    fn is_supported(&self) -> bool {
        cfg!(any(
            target_os = "linux",
            target_os = "android",
            target_os = "macos",
            target_os = "ios",
            windows
        ))
    }

    fn is_pool_thread(&self) -> bool {
        rayon::current_thread_index().is_some()
    }

    fn stack_pointer(&self) -> Result<Option<usize>, PlatformError> {
        self.ensure_access("stack_pointer")?;
        let sp = psm::stack_pointer() as usize;
        Ok((sp != 0).then_some(sp))
    }

    fn allocated_stack_size(&self) -> Result<usize, PlatformError> {
        self.ensure_access("allocated_stack_size")?;
        let Some(bounds) = cached_stack_bounds()? else {
            return Ok(0);
        };
        let sp = psm::stack_pointer() as usize;
        let page = page_size();
        Ok(bounds.high.saturating_sub(sp).div_ceil(page) * page)
    }

    fn stack_safety_margin(&self) -> Result<usize, PlatformError> {
        self.ensure_access("stack_safety_margin")?;
        Ok(page_size().saturating_mul(self.margin_pages))
    }

    fn maximum_stack_size(&self) -> Result<Option<usize>, PlatformError> {
        self.ensure_access("maximum_stack_size")?;
        Ok(cached_stack_bounds()?.map(|bounds| bounds.high - bounds.low))
    }
}

/// Host page size in bytes
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no preconditions.
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size)
            .ok()
            .filter(|&size| size > 0)
            .unwrap_or(FALLBACK_PAGE_SIZE)
    }

    #[cfg(not(unix))]
    {
        FALLBACK_PAGE_SIZE
    }
}

/// Address range of the calling thread's stack
#[derive(Debug, Clone, Copy)]
struct StackBounds {
    low: usize,
    high: usize,
}

/// Stack bounds of the calling thread, asking the OS at most once per thread
///
/// A thread's stack never moves, so the first answer (including "unknown") is
/// kept for the thread's lifetime. On the main thread `pthread_getattr_np`
/// parses `/proc/self/maps`, so it must stay out of the per-check path.
/// Errors are not cached.
fn cached_stack_bounds() -> Result<Option<StackBounds>, PlatformError> {
    if let Ok(Some(bounds)) = THREAD_BOUNDS.try_with(Cell::get) {
        return Ok(bounds);
    }

    let _ = BOUNDS_QUERIES.try_with(|queries| queries.set(queries.get() + 1));
    let bounds = stack_bounds()?;
    let _ = THREAD_BOUNDS.try_with(|cached| cached.set(Some(bounds)));
    Ok(bounds)
}

/// Number of OS stack-bounds queries made on the calling thread
pub fn bounds_queries() -> usize {
    BOUNDS_QUERIES.try_with(Cell::get).unwrap_or(0)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn stack_bounds() -> Result<Option<StackBounds>, PlatformError> {
    // SAFETY: attr is initialized by pthread_getattr_np before it is read and
    // destroyed exactly once after a successful init.
    unsafe {
        let mut attr: libc::pthread_attr_t = std::mem::zeroed();
        let rc = libc::pthread_getattr_np(libc::pthread_self(), &mut attr);
        if rc == libc::EPERM {
            return Err(PlatformError::AccessDenied {
                primitive: "pthread_getattr_np",
            });
        }
        if rc != 0 {
            return Ok(None);
        }

        let mut base: *mut libc::c_void = std::ptr::null_mut();
        let mut size: libc::size_t = 0;
        let rc = libc::pthread_attr_getstack(&attr, &mut base, &mut size);
        libc::pthread_attr_destroy(&mut attr);

        if rc != 0 || base.is_null() || size == 0 {
            return Ok(None);
        }

        let low = base as usize;
        Ok(Some(StackBounds {
            low,
            high: low.saturating_add(size),
        }))
    }
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn stack_bounds() -> Result<Option<StackBounds>, PlatformError> {
    // SAFETY: both calls only read attributes of the calling thread.
    let (high, size) = unsafe {
        let thread = libc::pthread_self();
        (
            libc::pthread_get_stackaddr_np(thread) as usize,
            libc::pthread_get_stacksize_np(thread),
        )
    };

    if high == 0 || size == 0 {
        return Ok(None);
    }
    Ok(Some(StackBounds {
        low: high.saturating_sub(size),
        high,
    }))
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
fn stack_bounds() -> Result<Option<StackBounds>, PlatformError> {
    Ok(None)
}
