//! Periodic scheduler (C3): drift-free, fixed-epoch pacing.
//!
//! Grounded on the existing `component_a/sensor.rs::Sensor::run`, which
//! paces against `next_deadline += period` (never `last_invocation + dt`)
//! and uses `spin_sleep::SpinSleeper` to avoid OS-timer coarseness; here
//! generalized into a standalone driver, matching
//! `examples/original_source/cleave/client/plant.py::utils.execute_periodically`.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use log::{error, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};

/// A step body panicked; the scheduler caught it so a single bad step
/// cannot silently take down the whole periodic loop's caller.
#[derive(Debug)]
pub struct SchedulerError {
    pub step_index: u64,
}

impl std::fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {} panicked", self.step_index)
    }
}
impl std::error::Error for SchedulerError {}

/// Runs `step` on a monotonic cadence of `period` until `shutdown_flag` is
/// set, invoking `on_panic` (if the step panics) instead of propagating.
///
/// Deadlines are computed from a fixed epoch: the k-th invocation targets
/// `epoch + k * period`. An invocation that finishes early sleeps until its
/// deadline; one that overruns is followed immediately by the next
/// invocation — no invocation is skipped to "catch up" beyond that.
/// `shutdown_flag` is polled only between invocations; an in-progress step
/// always completes.
pub fn execute_periodically<F>(
    mut step: F,
    period: Duration,
    shutdown_flag: &AtomicBool,
    mut on_panic: impl FnMut(SchedulerError),
) where
    F: FnMut(),
{
    let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
    let epoch = Instant::now();
    let mut k: u64 = 0;

    while !shutdown_flag.load(Ordering::Acquire) {
        let deadline = epoch + period * k as u32;
        let now = Instant::now();
        if now < deadline {
            sleeper.sleep(deadline - now);
        } else {
            warn!("scheduler: step {k} overran its slot, catching up immediately");
        }

        let result = panic::catch_unwind(AssertUnwindSafe(&mut step));
        if result.is_err() {
            error!("scheduler: step {k} panicked");
            on_panic(SchedulerError { step_index: k });
        }

        k += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fixed_epoch_deadlines_do_not_drift() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let period = Duration::from_millis(10);
        let mut observed = Vec::new();
        let start = Instant::now();

        let mut count = 0u32;
        execute_periodically(
            || {
                observed.push(start.elapsed());
                count += 1;
                if count >= 20 {
                    shutdown_clone.store(true, Ordering::Release);
                }
                // Simulate a body that sometimes takes a couple ms.
                thread::sleep(Duration::from_millis(2));
            },
            period,
            &shutdown,
            |_| {},
        );

        // Compare the k-th observed time against the fixed-epoch deadline;
        // drift should stay within a couple of scheduling-jitter millis.
        for (k, t) in observed.iter().enumerate() {
            let expected = period * k as u32;
            let diff = if *t > expected { *t - expected } else { expected - *t };
            assert!(diff < Duration::from_millis(5), "step {k} drifted by {diff:?}");
        }
    }

    #[test]
    fn a_panicking_step_does_not_abort_the_loop() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut step_count = 0u32;
        let mut panics = 0u32;

        execute_periodically(
            || {
                step_count += 1;
                if step_count == 2 {
                    panic!("boom");
                }
                if step_count >= 5 {
                    shutdown.store(true, Ordering::Release);
                }
            },
            Duration::from_millis(1),
            &shutdown,
            |_| panics += 1,
        );

        assert_eq!(step_count, 5);
        assert_eq!(panics, 1);
    }
}
