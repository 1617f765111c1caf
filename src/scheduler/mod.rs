/*
 * Scheduler Core
 *
 * TaskManager multiplexes one-shot timers, fixed-rate timers, polled
 * events and interrupt-marshalled callbacks onto a single execution
 * context. The host constructs one instance over its Platform and
 * drives it by calling run_loop repeatedly (or by letting tasks pump it
 * through yield_for_micros).
 *
 * Concurrency model: exactly one foreground context plus interrupts.
 * Structural mutations of the pool and queue happen under a single
 * critical-section guard; callbacks always execute outside it so they
 * are free to schedule, cancel and yield. ISRs touch nothing but the
 * two atomic words in InterruptState.
 */

pub(crate) mod events;
pub(crate) mod interrupts;
pub(crate) mod long_schedule;
pub(crate) mod pool;
pub(crate) mod queue;
pub(crate) mod task;

use core::sync::atomic::{AtomicU16, Ordering};

use alloc::sync::Arc;
use spin::Mutex;

use crate::notify::{SchedulerNotice, notify};
use crate::platform::Platform;

pub use events::{Event, EventState};
pub use interrupts::{
    InterruptFn, InterruptMode, InterruptSource, PinId, RawInterruptHandler, UNKNOWN_INTERRUPT_PIN,
};
pub use long_schedule::{LongSchedule, make_day_schedule, make_hour_schedule};
pub use pool::{MAX_TASK_BLOCKS, TASK_BLOCK_SIZE};
pub use task::{ExecHandle, Executable, Schedule, TaskId, TaskKind, TimeUnit, TimerFn, TimerTask};

use interrupts::InterruptState;
use pool::SlotPool;
use queue::ReadyQueue;
use task::{NO_TASK, RawId, RunningGuard, TaskCallee};

/// Outcome of the guarded per-slot test during the queue walk.
enum WalkStep {
    /// Slot is due: run it, then continue at the saved link.
    Run(RawId),
    /// Slot is disabled: step over it without running.
    Skip(RawId),
    /// First not-ready (or no longer in-use) slot: the walk is done.
    Stop,
}

/// The cooperative task scheduler. See the module header for the
/// execution model; the public surface is the schedule/cancel/query
/// API, the run_loop/yield pump, and the interrupt-marshalling hooks.
pub struct TaskManager<P: Platform> {
    platform: P,
    pool: SlotPool,
    ready: ReadyQueue,
    guard: Mutex<()>,
    interrupt_state: InterruptState,
    interrupt_callback: Mutex<Option<InterruptFn>>,
    current_task: AtomicU16,
}

impl<P: Platform> TaskManager<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            pool: SlotPool::new(),
            ready: ReadyQueue::new(),
            guard: Mutex::new(()),
            interrupt_state: InterruptState::new(),
            interrupt_callback: Mutex::new(None),
            current_task: AtomicU16::new(NO_TASK),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    // ---- scheduling ------------------------------------------------

    /// Runs `callback` once after `when` units have elapsed.
    pub fn schedule_once(&self, when: Schedule, unit: TimeUnit, callback: TimerFn) -> Option<TaskId> {
        self.schedule_task(when, unit, false, TaskCallee::Function(callback))
    }

    /// Runs `callback` every `when` units until cancelled.
    pub fn schedule_fixed_rate(
        &self,
        when: Schedule,
        unit: TimeUnit,
        callback: TimerFn,
    ) -> Option<TaskId> {
        self.schedule_task(when, unit, true, TaskCallee::Function(callback))
    }

    /// As [`schedule_once`](Self::schedule_once) for an executable
    /// handle; an owned handle is dropped when the task completes.
    pub fn schedule_once_exec(
        &self,
        when: Schedule,
        unit: TimeUnit,
        exec: impl Into<ExecHandle>,
    ) -> Option<TaskId> {
        self.schedule_task(when, unit, false, TaskCallee::Exec(exec.into()))
    }

    /// As [`schedule_fixed_rate`](Self::schedule_fixed_rate) for an
    /// executable handle.
    pub fn schedule_fixed_rate_exec(
        &self,
        when: Schedule,
        unit: TimeUnit,
        exec: impl Into<ExecHandle>,
    ) -> Option<TaskId> {
        self.schedule_task(when, unit, true, TaskCallee::Exec(exec.into()))
    }

    /// Registers an event task. The slot is armed at the current time
    /// with delay zero, so the event is polled on the very next
    /// run_loop iteration.
    pub fn register_event(&self, event: Arc<dyn Event>) -> Option<TaskId> {
        self.schedule_task(0, TimeUnit::Micros, true, TaskCallee::Event(event))
    }

    /// Schedules `callback` to run on the next run_loop iteration.
    pub fn execute(&self, callback: TimerFn) -> Option<TaskId> {
        self.schedule_once(0, TimeUnit::Micros, callback)
    }

    fn schedule_task(
        &self,
        when: Schedule,
        unit: TimeUnit,
        repeating: bool,
        callee: TaskCallee,
    ) -> Option<TaskId> {
        let _guard = self.guard.lock();
        let id = self.pool.find_free()?;
        let task = self.pool.at(id)?;
        task.initialise(when, unit, repeating, callee, &self.platform);
        self.ready.insert(&self.pool, &self.platform, id);
        notify(SchedulerNotice::TaskAllocated(TaskId(id)));
        Some(TaskId(id))
    }

    // ---- task control ----------------------------------------------

    /// Removes a task from the queue and frees its slot. Cancelling the
    /// task whose callback is currently running defers the clear until
    /// that callback returns; its pending repeat is skipped. No-op for
    /// ids that are not in use.
    pub fn cancel_task(&self, id: TaskId) {
        let _guard = self.guard.lock();
        let Some(task) = self.pool.at(id.0) else { return };
        if !task.is_in_use() {
            return;
        }
        self.ready.remove(&self.pool, id.0);
        if task.is_running() {
            task.mark_cancel_pending();
        } else {
            task.clear();
            notify(SchedulerNotice::TaskFreed(id));
        }
    }

    /// Toggles a task's eligibility for the queue walk without freeing
    /// its slot. Enabling re-arms the task so a full period runs before
    /// the next fire.
    pub fn set_task_enabled(&self, id: TaskId, enabled: bool) {
        let _guard = self.guard.lock();
        let Some(task) = self.pool.at(id.0) else { return };
        if !task.is_in_use() {
            return;
        }
        if enabled && !task.is_enabled() {
            task.rearm(&self.platform);
        }
        task.set_enabled(enabled);
    }

    /// Cancels every task, drops any pending interrupt, and forgets the
    /// running-task token. The interrupt callback survives a reset.
    pub fn reset(&self) {
        let _guard = self.guard.lock();
        for task in self.pool.iter() {
            if task.is_in_use() {
                task.clear();
            }
        }
        self.ready.clear();
        self.interrupt_state.take();
        self.current_task.store(NO_TASK, Ordering::SeqCst);
    }

    // ---- queries ---------------------------------------------------

    /// The slot behind a task id. Present for any id the pool has
    /// backed, whether or not it is currently in use.
    pub fn get_task(&self, id: TaskId) -> Option<&TimerTask> {
        self.pool.at(id.0)
    }

    /// Head of the ready queue: the task that will fire soonest.
    pub fn get_first_task(&self) -> Option<&TimerTask> {
        self.pool.at(self.ready.first_raw())
    }

    /// The task whose callback is executing in the calling context, if
    /// any. Survives nested yields; used by the reentrant lock to
    /// establish ownership.
    pub fn get_running_task(&self) -> Option<&TimerTask> {
        self.pool.at(self.current_task.load(Ordering::SeqCst))
    }

    pub(crate) fn running_task_raw(&self) -> RawId {
        self.current_task.load(Ordering::SeqCst)
    }

    /// Writes one status byte per slot into `buffer`: `R` for an
    /// in-use repeating task, `U` for an in-use one-shot, `F` for a
    /// free slot, lowercased while the slot's callback is running. The
    /// report covers the first `buffer.len() - 1` slots and is
    /// NUL-terminated; the returned str excludes the terminator.
    pub fn check_available_slots<'a>(&self, buffer: &'a mut [u8]) -> &'a str {
        if buffer.is_empty() {
            return "";
        }
        let limit = core::cmp::min(buffer.len() - 1, self.pool.len());
        for (index, task) in self.pool.iter().take(limit).enumerate() {
            let mut state = if task.is_repeating() {
                b'R'
            } else if task.is_in_use() {
                b'U'
            } else {
                b'F'
            };
            if task.is_running() {
                state = state.to_ascii_lowercase();
            }
            buffer[index] = state;
        }
        buffer[limit] = 0;
        core::str::from_utf8(&buffer[..limit]).unwrap_or("")
    }

    /// Allocation-free slot report for logs and panic screens.
    pub fn slot_summary<const N: usize>(&self) -> heapless::String<N> {
        let mut buffer = [0u8; 64];
        let mut summary = heapless::String::new();
        for byte in self.check_available_slots(&mut buffer).bytes() {
            if summary.push(byte as char).is_err() {
                break;
            }
        }
        summary
    }

    // ---- the pump --------------------------------------------------

    /// One scheduler iteration: drain a pending interrupt into the
    /// user callback and the event slots, then walk the ready queue
    /// front to back executing every due task. The walk tests each
    /// slot under the guard, but execution happens outside it, so
    /// callbacks may schedule, cancel and yield freely.
    pub fn run_loop(&self) {
        if let Some(pin) = self.interrupt_state.take() {
            self.deal_with_interrupt(pin);
        }

        let mut current = self.ready.first_raw();
        while let Some(task) = self.pool.at(current) {
            let step = {
                let _guard = self.guard.lock();
                if !task.is_in_use() {
                    WalkStep::Stop
                } else if !task.is_enabled() {
                    WalkStep::Skip(task.next_raw())
                } else if task.is_ready(&self.platform) {
                    WalkStep::Run(task.next_raw())
                } else {
                    WalkStep::Stop
                }
            };
            match step {
                WalkStep::Run(next) => {
                    self.execute_task(current, task);
                    current = next;
                }
                WalkStep::Skip(next) => current = next,
                WalkStep::Stop => break,
            }
        }
    }

    /// Pumps run_loop until at least `micros_to_wait` have elapsed on
    /// the wrapping microsecond clock. The running-task token is saved
    /// on entry and restored on exit so nested yields keep
    /// [`get_running_task`](Self::get_running_task) truthful.
    pub fn yield_for_micros(&self, micros_to_wait: u32) {
        let saved = self.current_task.load(Ordering::SeqCst);
        let started = self.platform.now_micros() as u32;
        loop {
            self.platform.yield_now();
            self.run_loop();
            if (self.platform.now_micros() as u32).wrapping_sub(started) >= micros_to_wait {
                break;
            }
        }
        self.current_task.store(saved, Ordering::SeqCst);
    }

    fn execute_task(&self, id: RawId, task: &TimerTask) {
        let Some(callee) = task.callee() else { return };
        let _running = RunningGuard::new(task);
        let previous = self.current_task.swap(id, Ordering::SeqCst);

        match callee {
            TaskCallee::Function(callback) => callback(),
            TaskCallee::Exec(handle) => handle.exec(),
            TaskCallee::Event(event) => {
                self.process_event(id, task, event.as_ref());
                self.current_task.store(previous, Ordering::SeqCst);
                self.clear_if_cancel_pending(id, task);
                return;
            }
        }

        self.current_task.store(previous, Ordering::SeqCst);

        if task.is_cancel_pending() {
            self.clear_if_cancel_pending(id, task);
        } else if task.is_repeating_flag() {
            // re-armed in place: the walker has already advanced past
            // this slot and the next fire cannot be earlier than now,
            // so the queue is not re-sorted
            task.rearm(&self.platform);
        } else if task.is_in_use() {
            let _guard = self.guard.lock();
            self.ready.remove(&self.pool, id);
            task.clear();
            notify(SchedulerNotice::TaskFreed(TaskId(id)));
        }
    }

    fn clear_if_cancel_pending(&self, id: RawId, task: &TimerTask) {
        if task.is_cancel_pending() && task.is_in_use() {
            let _guard = self.guard.lock();
            task.clear();
            notify(SchedulerNotice::TaskFreed(TaskId(id)));
        }
    }

    // ---- events ----------------------------------------------------

    /// One poll of an event slot: ask the event for its next check
    /// interval (which may trigger it), run it if triggered, clear the
    /// slot once complete, otherwise re-arm for the returned interval.
    fn process_event(&self, id: RawId, task: &TimerTask, event: &dyn Event) {
        let interval = event.time_of_next_check();
        task.set_schedule(task::clamp_schedule(interval));

        if event.is_triggered() {
            event.set_triggered(false);
            event.exec();
        }

        if event.is_complete() {
            let _guard = self.guard.lock();
            self.ready.remove(&self.pool, id);
            task.clear();
            notify(SchedulerNotice::TaskFreed(TaskId(id)));
        } else {
            task.rearm(&self.platform);
        }
    }

    fn deal_with_interrupt(&self, pin: PinId) {
        let callback = *self.interrupt_callback.lock();
        if let Some(callback) = callback {
            callback(pin);
        }

        // deliver any triggers raised from interrupt context: walk the
        // whole queue and poll every event slot found on the way
        let mut current = self.ready.first_raw();
        while let Some(task) = self.pool.at(current) {
            let (in_use, next) = {
                let _guard = self.guard.lock();
                (task.is_in_use(), task.next_raw())
            };
            if !in_use {
                break;
            }
            if let Some(TaskCallee::Event(event)) = task.callee() {
                self.process_event(current, task, event.as_ref());
            }
            current = next;
        }
    }

    // ---- interrupt marshalling -------------------------------------

    /// Installs the callback invoked when a marshalled interrupt is
    /// drained. Must be set before [`add_interrupt`](Self::add_interrupt).
    pub fn set_interrupt_callback(&self, callback: InterruptFn) {
        *self.interrupt_callback.lock() = Some(callback);
    }

    /// Records the pin and raises the interrupt flag. ISR-safe: two
    /// atomic stores, no scheduling work.
    pub fn mark_interrupted(&self, pin: PinId) {
        self.interrupt_state.mark(pin);
    }

    /// Requests an event-evaluation pass on the next run_loop
    /// iteration, riding the same path as a marshalled interrupt.
    /// ISR-safe.
    pub fn trigger_events(&self) {
        self.mark_interrupted(UNKNOWN_INTERRUPT_PIN);
    }

    /// Sets an event triggered and notifies the scheduler so it is
    /// executed on the next run_loop iteration. ISR-safe.
    pub fn mark_triggered_and_notify(&self, event: &dyn Event) {
        event.set_triggered(true);
        self.trigger_events();
    }

    /// Attaches a marshalling thunk for `pin` through the IO device.
    /// Does nothing until an interrupt callback is installed. The
    /// `'static` receiver keeps the thunk's registry pointer valid for
    /// the life of the program.
    pub fn add_interrupt(&'static self, io: &dyn InterruptSource, pin: PinId, mode: InterruptMode) {
        if self.interrupt_callback.lock().is_none() {
            return;
        }
        interrupts::register_isr_target(&self.interrupt_state);
        io.attach_interrupt(pin, interrupts::raw_handler_for(pin), mode);
        log::debug!("interrupt marshalling attached on pin {}", pin);
    }
}
