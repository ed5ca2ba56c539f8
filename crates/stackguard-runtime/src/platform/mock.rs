//! Scripted platform for tests and embedders without native introspection
//!
//! Every primitive returns a value set by the caller and counts its calls, so
//! tests can assert how often the guard goes to the platform.

use crate::error::PlatformError;
use crate::platform::{ExecutableStack, StackPlatform};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Platform primitives that can be counted or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    StackPointer,
    AllocatedStackSize,
    SafetyMargin,
    MaximumStackSize,
    ExecutableStack,
}

const PRIMITIVES: usize = 5;

impl Primitive {
    fn index(self) -> usize {
        match self {
            Primitive::StackPointer => 0,
            Primitive::AllocatedStackSize => 1,
            Primitive::SafetyMargin => 2,
            Primitive::MaximumStackSize => 3,
            Primitive::ExecutableStack => 4,
        }
    }
}

/// Platform whose answers are set by the test
#[derive(Debug)]
pub struct MockPlatform {
    supported: AtomicBool,
    pool_thread: AtomicBool,
    stack_pointer: Mutex<Option<usize>>,
    allocated: AtomicUsize,
    margin: AtomicUsize,
    maximum: Mutex<Option<usize>>,
    executable: Mutex<Option<ExecutableStack>>,
    faults: Mutex<HashMap<Primitive, PlatformError>>,
    calls: [AtomicUsize; PRIMITIVES],
}

impl MockPlatform {
    pub const DEFAULT_STACK_POINTER: usize = 0x7FFF_0000;
    pub const DEFAULT_MARGIN: usize = 64 * 1024;
    pub const DEFAULT_MAXIMUM: usize = 1024 * 1024;

    /// A supported, non-pool platform with a 1 MiB stack
    pub fn new() -> Self {
        Self {
            supported: AtomicBool::new(true),
            pool_thread: AtomicBool::new(false),
            stack_pointer: Mutex::new(Some(Self::DEFAULT_STACK_POINTER)),
            allocated: AtomicUsize::new(0),
            margin: AtomicUsize::new(Self::DEFAULT_MARGIN),
            maximum: Mutex::new(Some(Self::DEFAULT_MAXIMUM)),
            executable: Mutex::new(None),
            faults: Mutex::new(HashMap::new()),
            calls: Default::default(),
        }
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub fn set_pool_thread(&self, pool_thread: bool) {
        self.pool_thread.store(pool_thread, Ordering::SeqCst);
    }

    pub fn set_stack_pointer(&self, sp: Option<usize>) {
        *self.stack_pointer.lock() = sp;
    }

    pub fn set_allocated(&self, allocated: usize) {
        self.allocated.store(allocated, Ordering::SeqCst);
    }

    pub fn set_margin(&self, margin: usize) {
        self.margin.store(margin, Ordering::SeqCst);
    }

    pub fn set_maximum(&self, maximum: Option<usize>) {
        *self.maximum.lock() = maximum;
    }

    pub fn set_executable_stack(&self, stack: Option<ExecutableStack>) {
        *self.executable.lock() = stack;
    }

    /// Make `primitive` fail with `error` until [`MockPlatform::clear_fault`]
    pub fn fail(&self, primitive: Primitive, error: PlatformError) {
        self.faults.lock().insert(primitive, error);
    }

    pub fn clear_fault(&self, primitive: Primitive) {
        self.faults.lock().remove(&primitive);
    }

    /// Number of times `primitive` has been called
    pub fn calls(&self, primitive: Primitive) -> usize {
        self.calls[primitive.index()].load(Ordering::SeqCst)
    }

    fn enter(&self, primitive: Primitive) -> Result<(), PlatformError> {
        self.calls[primitive.index()].fetch_add(1, Ordering::SeqCst);
        match self.faults.lock().get(&primitive) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

impl Default for MockPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl StackPlatform for MockPlatform {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    fn is_pool_thread(&self) -> bool {
        self.pool_thread.load(Ordering::SeqCst)
    }

    fn stack_pointer(&self) -> Result<Option<usize>, PlatformError> {
        self.enter(Primitive::StackPointer)?;
        Ok(*self.stack_pointer.lock())
    }

    fn allocated_stack_size(&self) -> Result<usize, PlatformError> {
        self.enter(Primitive::AllocatedStackSize)?;
        Ok(self.allocated.load(Ordering::SeqCst))
    }

    fn stack_safety_margin(&self) -> Result<usize, PlatformError> {
        self.enter(Primitive::SafetyMargin)?;
        Ok(self.margin.load(Ordering::SeqCst))
    }

    fn maximum_stack_size(&self) -> Result<Option<usize>, PlatformError> {
        self.enter(Primitive::MaximumStackSize)?;
        Ok(*self.maximum.lock())
    }

    fn executable_path(&self) -> Option<PathBuf> {
        Some(PathBuf::from("mock-host"))
    }

    fn executable_stack_reserve_and_commit(
        &self,
        _path: &Path,
    ) -> Result<Option<ExecutableStack>, PlatformError> {
        self.enter(Primitive::ExecutableStack)?;
        Ok(*self.executable.lock())
    }
}
