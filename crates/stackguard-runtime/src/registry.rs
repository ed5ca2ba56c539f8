//! Slot registry and per-thread stack data
//!
//! A [`GlobalSlotRegistry`] owns two process-unique slot identifiers, one for
//! the stack baseline and one for the stack budget. Every thread stores its
//! own values under those identifiers in native thread-local storage, so the
//! same registry addresses independent data on each thread.
//!
//! The registry mutex is also the lock the whole stack check runs under:
//! per-thread data is only touched through a `ThreadSlots` handle, which
//! holds it. The handle stays inside the crate, since any registry call made
//! while one is alive on the same thread would deadlock on that lock.

use crate::budget::StackBudget;
use parking_lot::{Mutex, MutexGuard};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

static NEXT_SLOT: AtomicU64 = AtomicU64::new(1);
static GLOBAL_REGISTRY: OnceLock<Arc<GlobalSlotRegistry>> = OnceLock::new();

thread_local! {
    static BASELINES: RefCell<HashMap<SlotId, usize>> = RefCell::new(HashMap::new());
    static BUDGETS: RefCell<HashMap<SlotId, StackBudget>> = RefCell::new(HashMap::new());
}

/// Process-unique identifier of a per-thread data slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

impl SlotId {
    fn allocate() -> Self {
        Self(NEXT_SLOT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The two slots used by the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotPair {
    pub baseline: SlotId,
    pub budget: SlotId,
}

/// Owner of the slot identifiers used for per-thread stack data
#[derive(Debug, Default)]
pub struct GlobalSlotRegistry {
    slots: Mutex<Option<SlotPair>>,
}

impl GlobalSlotRegistry {
    /// Create an uninitialized registry
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(None),
        }
    }

    /// Process-wide default registry
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(Self::new()))
            .clone()
    }

    /// Allocate the slot identifiers unless already allocated
    ///
    /// Must happen before scripts are evaluated; until then every stack check
    /// assumes enough space is available.
    pub fn initialize(&self) {
        let mut slots = self.slots.lock();
        if slots.is_none() {
            let pair = SlotPair {
                baseline: SlotId::allocate(),
                budget: SlotId::allocate(),
            };
            debug!(?pair, "allocated stack slots");
            *slots = Some(pair);
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.slots.lock().is_some()
    }

    /// Currently allocated slot identifiers
    pub fn slot_ids(&self) -> Option<SlotPair> {
        *self.slots.lock()
    }

    /// Clear the calling thread's baseline and budget
    ///
    /// Only the calling thread is affected; data other threads stored under
    /// the same slots stays in place. A thread that checks again afterwards
    /// simply starts over with a fresh baseline.
    pub fn finalize_current_thread(&self) {
        let slots = self.slots.lock();
        if let Some(pair) = *slots {
            clear_thread_data(pair);
        }
    }

    /// Release the slot identifiers
    ///
    /// Checks made through this registry afterwards assume enough space until
    /// [`GlobalSlotRegistry::initialize`] is called again.
    ///
    /// Only the calling thread's baseline and budget are cleared. Entries other
    /// live threads stored under the released slots stay in their thread-local
    /// maps until those threads exit. Slot identifiers are never reused, so a
    /// later [`GlobalSlotRegistry::initialize`] cannot observe them.
    pub fn release(&self) {
        let mut slots = self.slots.lock();
        if let Some(pair) = slots.take() {
            clear_thread_data(pair);
            debug!(?pair, "released stack slots");
        }
    }

    /// Take the registry lock and address the calling thread's data
    ///
    /// Returns `None` when the slots were never allocated.
    ///
    /// # Deadlocks
    ///
    /// The lock is not reentrant. Calling any registry method, or running a
    /// stack check, on the same thread while the returned handle is alive
    /// blocks forever.
    pub(crate) fn acquire(&self) -> Option<ThreadSlots<'_>> {
        let lock = self.slots.lock();
        let pair = (*lock)?;
        Some(ThreadSlots { _lock: lock, pair })
    }
}

fn clear_thread_data(pair: SlotPair) {
    let baseline = BASELINES.try_with(|baselines| match baselines.try_borrow_mut() {
        Ok(mut baselines) => {
            baselines.remove(&pair.baseline);
        }
        Err(e) => debug!(error = %e, "thread baseline storage busy"),
    });
    if let Err(e) = baseline {
        debug!(error = %e, "thread baseline storage unavailable");
    }

    let budget = BUDGETS.try_with(|budgets| match budgets.try_borrow_mut() {
        Ok(mut budgets) => {
            budgets.remove(&pair.budget);
        }
        Err(e) => debug!(error = %e, "thread budget storage busy"),
    });
    if let Err(e) = budget {
        debug!(error = %e, "thread budget storage unavailable");
    }
}

/// The calling thread's slots, reachable only while the registry is locked
pub(crate) struct ThreadSlots<'a> {
    _lock: MutexGuard<'a, Option<SlotPair>>,
    pair: SlotPair,
}

impl ThreadSlots<'_> {
    /// Stored outer stack pointer, if any
    pub fn baseline(&self) -> Option<usize> {
        BASELINES
            .try_with(|baselines| baselines.borrow().get(&self.pair.baseline).copied())
            .ok()
            .flatten()
    }

    pub fn set_baseline(&self, outer: usize) {
        let stored = BASELINES.try_with(|baselines| {
            baselines.borrow_mut().insert(self.pair.baseline, outer);
        });
        if let Err(e) = stored {
            debug!(error = %e, "cannot store stack baseline");
        }
    }

    /// Run `f` on the thread's budget, creating it on first use
    ///
    /// Returns `None` when thread-local storage is already gone (thread
    /// teardown).
    pub fn with_budget<R>(&self, f: impl FnOnce(&mut StackBudget) -> R) -> Option<R> {
        BUDGETS
            .try_with(|budgets| {
                let mut budgets = budgets.borrow_mut();
                f(budgets.entry(self.pair.budget).or_default())
            })
            .ok()
    }

    /// Copy of the thread's budget without creating one
    pub fn budget(&self) -> Option<StackBudget> {
        BUDGETS
            .try_with(|budgets| budgets.borrow().get(&self.pair.budget).cloned())
            .ok()
            .flatten()
    }
}
