//! Probe command - measure how deep a script thread can recurse

use anyhow::{anyhow, bail, Result};
use serde::Serialize;
use stackguard_config::GuardConfig;
use stackguard_runtime::{
    CheckFlags, RecursionKind, RecursionTracker, StackGuard, StackOverflow, StackSnapshot,
};
use std::hint::black_box;
use std::sync::Arc;
use tracing::info;

/// Frame sizes the probe can recurse with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameSize {
    K1,
    K4,
    K16,
    K64,
}

impl FrameSize {
    /// Smallest supported frame holding `requested` bytes
    fn for_request(requested: usize) -> Self {
        match requested {
            0..=1024 => FrameSize::K1,
            1025..=4096 => FrameSize::K4,
            4097..=16384 => FrameSize::K16,
            _ => FrameSize::K64,
        }
    }

    fn bytes(self) -> usize {
        match self {
            FrameSize::K1 => 1024,
            FrameSize::K4 => 4096,
            FrameSize::K16 => 16384,
            FrameSize::K64 => 65536,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProbeReport {
    frame_size: usize,
    thread_stack_size: usize,
    limit: Option<usize>,
    depth: usize,
    stopped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<StackSnapshot>,
}

struct Descent {
    depth: usize,
    error: Option<StackOverflow>,
}

/// Recurse on a fresh script thread, checking the stack at every level
pub fn run(
    config: &GuardConfig,
    frame_size: usize,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    if config.disable_stack() || !config.check_stack() {
        bail!("stack checking is disabled, probing would overflow the stack");
    }

    let guard = StackGuard::from_config(config);
    if !guard.platform().is_supported() {
        bail!("stack introspection is not supported on this platform");
    }

    let flags = CheckFlags {
        force_stack: true,
        ..guard.flags()
    };
    let guard = Arc::new(guard.with_flags(flags));

    let frame = FrameSize::for_request(frame_size);
    let thread_stack_size = guard.new_thread_stack_size();
    info!(
        frame_size = frame.bytes(),
        thread_stack_size, "probing recursion depth"
    );

    let report = guard
        .spawn_script_thread("stackguard-probe", move |guard| {
            let tracker = RecursionTracker::new();
            let bound = limit.unwrap_or(usize::MAX);
            let descent = match frame {
                FrameSize::K1 => descend::<1024>(guard, &tracker, bound),
                FrameSize::K4 => descend::<4096>(guard, &tracker, bound),
                FrameSize::K16 => descend::<16384>(guard, &tracker, bound),
                FrameSize::K64 => descend::<65536>(guard, &tracker, bound),
            };

            ProbeReport {
                frame_size: frame.bytes(),
                thread_stack_size,
                limit,
                depth: descent.depth,
                stopped: descent.error.is_some(),
                error: descent.error.map(|e| e.to_string()),
                snapshot: guard.snapshot().ok(),
            }
        })?
        .join()
        .map_err(|_| anyhow!("probe thread panicked"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(error) = &report.error {
        println!("depth {} stopped by stack guard: {}", report.depth, error);
    } else {
        println!("depth {} reached limit", report.depth);
    }

    Ok(())
}

fn descend<const N: usize>(
    guard: &StackGuard,
    tracker: &RecursionTracker,
    limit: usize,
) -> Descent {
    let _level = match tracker.enter_checked(guard, RecursionKind::Evaluation, N) {
        Ok(level) => level,
        Err(error) => {
            return Descent {
                depth: tracker.current(RecursionKind::Evaluation),
                error: Some(error),
            }
        }
    };

    let depth = tracker.current(RecursionKind::Evaluation);
    if depth >= limit {
        return Descent { depth, error: None };
    }

    let frame = black_box([depth as u8; N]);
    let descent = descend::<N>(guard, tracker, limit);
    black_box(&frame);
    descent
}
