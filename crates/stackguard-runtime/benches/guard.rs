//! Stack guard benchmarks
//!
//! Measures what a recursion step pays for stack checking:
//! - Policy fast path below the no-check thresholds
//! - Full check against the native platform
//! - Full check against the scripted platform

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use stackguard_runtime::platform::MockPlatform;
use stackguard_runtime::{
    CheckFlags, CheckPolicy, GlobalSlotRegistry, Level, NativePlatform, RecursionLevels,
    StackGuard,
};
use std::sync::Arc;

fn levels(current: usize) -> RecursionLevels {
    let level = Level::new(current, 1000);
    RecursionLevels {
        evaluation: level,
        parser: level,
        expression: level,
    }
}

fn initialized() -> Arc<GlobalSlotRegistry> {
    let registry = Arc::new(GlobalSlotRegistry::new());
    registry.initialize();
    registry
}

// ============================================================================
// Policy
// ============================================================================

fn bench_policy_fast_path(c: &mut Criterion) {
    let policy = CheckPolicy::default();
    let shallow = levels(10);
    c.bench_function("policy_shallow_levels", |b| {
        b.iter(|| policy.should_check(black_box(CheckFlags::default()), false, black_box(&shallow)))
    });
}

fn bench_check_recursion_shallow(c: &mut Criterion) {
    let guard = StackGuard::new(Arc::new(NativePlatform::new()), initialized());
    let shallow = levels(10);
    c.bench_function("check_recursion_shallow", |b| {
        b.iter(|| guard.check_levels(black_box(&shallow), 0))
    });
}

// ============================================================================
// Full check
// ============================================================================

fn bench_check_native(c: &mut Criterion) {
    let guard = StackGuard::new(Arc::new(NativePlatform::new()), initialized());
    c.bench_function("check_for_stack_space_native", |b| {
        b.iter(|| guard.check_for_stack_space(black_box(1024)))
    });
}

fn bench_check_mock(c: &mut Criterion) {
    let guard = StackGuard::new(Arc::new(MockPlatform::new()), initialized());
    c.bench_function("check_for_stack_space_mock", |b| {
        b.iter(|| guard.check_for_stack_space(black_box(1024)))
    });
}

criterion_group!(
    benches,
    bench_policy_fast_path,
    bench_check_recursion_shallow,
    bench_check_native,
    bench_check_mock
);
criterion_main!(benches);
