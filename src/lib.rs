/*
 * taskmux - cooperative task scheduler for small targets
 *
 * Multiplexes one-shot timers, fixed-rate timers, polled events and
 * interrupt-marshalled callbacks onto a single execution context, with
 * no preemption and no blocking primitive beyond the host's clock. The
 * host constructs a TaskManager over its Platform implementation and
 * drives it from its main loop:
 *
 *     let tasks = TaskManager::new(platform);
 *     tasks.schedule_fixed_rate(500, TimeUnit::Millis, heartbeat);
 *     loop {
 *         tasks.run_loop();
 *     }
 *
 * Callbacks run to completion unless they voluntarily call
 * yield_for_micros, which keeps the scheduler pumping while they wait.
 * ISRs interact with the scheduler only through mark_interrupted and
 * mark_triggered_and_notify, both of which reduce to two atomic stores.
 */

#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[cfg(all(not(test), feature = "std"))]
extern crate std;

pub mod lock;
pub mod notify;
pub mod platform;
pub mod scheduler;

pub use lock::{ReentrantYieldingLock, SPIN_YIELD_MICROS, TaskLockGuard};
pub use notify::{NotificationFn, SchedulerNotice, clear_notification_hook, set_notification_hook};
pub use platform::{Platform, millis_to_micros, seconds_to_millis};
#[cfg(feature = "std")]
pub use platform::StdPlatform;
pub use scheduler::{
    Event, EventState, ExecHandle, Executable, InterruptFn, InterruptMode, InterruptSource,
    LongSchedule, MAX_TASK_BLOCKS, PinId, RawInterruptHandler, Schedule, TASK_BLOCK_SIZE, TaskId,
    TaskKind, TaskManager, TimeUnit, TimerFn, TimerTask, UNKNOWN_INTERRUPT_PIN,
    make_day_schedule, make_hour_schedule,
};
