/*
 * Shared test fixtures: a deterministic virtual clock and helpers for
 * driving a scheduler instance until a condition holds.
 *
 * The clock advances a fixed number of microseconds on every read, so
 * polling loops make progress without wall-clock time and every run is
 * reproducible regardless of host load.
 */
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use taskmux::{Platform, TaskManager};

/// Microseconds of virtual time consumed by each clock read.
pub const CLOCK_STEP_MICROS: u64 = 5;

#[derive(Clone)]
pub struct MockPlatform {
    inner: Arc<ClockInner>,
}

struct ClockInner {
    micros: AtomicU64,
    step: u64,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::with_step(CLOCK_STEP_MICROS)
    }

    pub fn with_step(step: u64) -> Self {
        Self {
            inner: Arc::new(ClockInner {
                micros: AtomicU64::new(0),
                step,
            }),
        }
    }
}

impl Platform for MockPlatform {
    fn now_micros(&self) -> u64 {
        self.inner.micros.fetch_add(self.inner.step, Ordering::SeqCst)
    }
}

/// A scheduler with program lifetime, so non-capturing callbacks and
/// ISR registration can refer to it.
pub fn new_manager() -> &'static TaskManager<MockPlatform> {
    Box::leak(Box::new(TaskManager::new(MockPlatform::new())))
}

/// Pumps the scheduler until `predicate` holds, giving up after
/// `deadline_micros` of virtual time. Returns whether it held.
pub fn run_until(
    tasks: &TaskManager<MockPlatform>,
    deadline_micros: u64,
    predicate: impl Fn() -> bool,
) -> bool {
    let started = tasks.platform().now_micros();
    while !predicate() {
        if tasks.platform().now_micros() - started > deadline_micros {
            return false;
        }
        tasks.yield_for_micros(10_000);
    }
    true
}

/// Number of slots currently taken, read through the slot report the
/// way a diagnostic caller would.
pub fn tasks_taken(tasks: &TaskManager<MockPlatform>) -> usize {
    let mut buffer = [0u8; 300];
    tasks
        .check_available_slots(&mut buffer)
        .chars()
        .filter(|state| state.to_ascii_uppercase() != 'F')
        .count()
}
