/*
 * Task Slot Definitions
 *
 * A TimerTask is one reusable slot in the pool: the timing fields, the
 * callable reference and the ready-queue link for a single scheduled
 * task. Slots are only ever handed out as shared references, so every
 * field that changes over a slot's life is interior-mutable:
 *
 * - `in_use` is the ownership flag, claimed by compare-and-swap.
 * - `flags` carries the execution state bits (running, repeating,
 *   enabled, base unit, pending cancellation).
 * - `schedule`/`scheduled_at` hold the interval and the last arming
 *   time in the slot's base unit, truncated to 32 bits so wrapping
 *   clocks subtract correctly.
 * - `next` links the slot into the ready queue by slot index; the
 *   index form keeps the queue walkable without raw pointers.
 * - `callee` is the tagged callable, behind its own short-lived lock
 *   so the walker can take a cheap clone before running it unlocked.
 *
 * The executing context has exclusive use of its own slot while the
 * RUNNING bit is set; everyone else mutates slots only under the
 * scheduler's critical-section guard.
 */

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};

use alloc::sync::Arc;
use bitflags::bitflags;
use spin::Mutex;

use super::events::Event;
use crate::platform::Platform;

/// Dense index of a slot in the pool; `NO_TASK` is the reserved invalid
/// sentinel used to terminate queue links.
pub(crate) type RawId = u16;
pub(crate) const NO_TASK: RawId = u16::MAX;

/// Handle to a scheduled task, used to query, alter and cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub(crate) RawId);

/// Width of schedule values. The default 32-bit form allows intervals
/// up to ~49.7 days of milliseconds; the `compact-schedule` feature
/// halves the storage and clamps SECONDS scaling accordingly.
#[cfg(not(feature = "compact-schedule"))]
pub type Schedule = u32;
#[cfg(not(feature = "compact-schedule"))]
pub(crate) type AtomicSchedule = core::sync::atomic::AtomicU32;

#[cfg(feature = "compact-schedule")]
pub type Schedule = u16;
#[cfg(feature = "compact-schedule")]
pub(crate) type AtomicSchedule = core::sync::atomic::AtomicU16;

/// Clamps a microsecond interval into the configured schedule width.
pub(crate) fn clamp_schedule(interval: u32) -> Schedule {
    Schedule::try_from(interval).unwrap_or(Schedule::MAX)
}

/// The time units accepted by the schedule calls. SECONDS is normalised
/// to MILLIS at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Micros,
    Millis,
    Seconds,
}

/// Plain function callback, callable without any captured state.
pub type TimerFn = fn();

/// Anything that can be scheduled by reference. Implementations must be
/// shareable with the scheduler, so mutable state lives behind interior
/// mutability (the schedulable surface is `&self`).
pub trait Executable: Send + Sync {
    /// Called when the schedule is reached.
    fn exec(&self);
}

/// Closures with no arguments are schedulable directly; captured
/// parameters replace the parameter-carrying wrapper types a
/// function-pointer API would need.
impl<F> Executable for F
where
    F: Fn() + Send + Sync,
{
    fn exec(&self) {
        self()
    }
}

/// Reference to an [`Executable`], owning or borrowing. Ownership is
/// part of the variant: an `Owned` handle is dropped when the slot is
/// cleared, a `Shared` handle must outlive the scheduler.
#[derive(Clone)]
pub enum ExecHandle {
    Owned(Arc<dyn Executable>),
    Shared(&'static dyn Executable),
}

impl ExecHandle {
    pub fn exec(&self) {
        match self {
            ExecHandle::Owned(exec) => exec.exec(),
            ExecHandle::Shared(exec) => exec.exec(),
        }
    }
}

impl<E: Executable + 'static> From<Arc<E>> for ExecHandle {
    fn from(exec: Arc<E>) -> Self {
        ExecHandle::Owned(exec)
    }
}

impl From<Arc<dyn Executable>> for ExecHandle {
    fn from(exec: Arc<dyn Executable>) -> Self {
        ExecHandle::Owned(exec)
    }
}

impl<E: Executable> From<&'static E> for ExecHandle {
    fn from(exec: &'static E) -> Self {
        ExecHandle::Shared(exec)
    }
}

impl From<&'static dyn Executable> for ExecHandle {
    fn from(exec: &'static dyn Executable) -> Self {
        ExecHandle::Shared(exec)
    }
}

/// What a slot calls when it fires.
#[derive(Clone)]
pub(crate) enum TaskCallee {
    Function(TimerFn),
    Exec(ExecHandle),
    Event(Arc<dyn Event>),
}

impl TaskCallee {
    fn kind(&self) -> TaskKind {
        match self {
            TaskCallee::Function(_) => TaskKind::Function,
            TaskCallee::Exec(_) => TaskKind::Executable,
            TaskCallee::Event(_) => TaskKind::Event,
        }
    }
}

/// Discriminant of the callable held by a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Function,
    Executable,
    Event,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct TaskFlags: u8 {
        /// The slot's callback is executing right now.
        const RUNNING = 0b0000_0001;
        /// Fixed-rate task; re-armed after every execution.
        const REPEATING = 0b0000_0010;
        /// Eligible for the ready-queue walk. Cleared slots are skipped
        /// but stay allocated.
        const ENABLED = 0b0000_0100;
        /// Base unit is milliseconds; clear means microseconds.
        const MILLIS = 0b0000_1000;
        /// Cancelled while RUNNING; cleared when the callback returns.
        const CANCEL_PENDING = 0b0001_0000;
    }
}

/// One task slot. See the module header for the field protocol.
pub struct TimerTask {
    in_use: AtomicBool,
    flags: AtomicU8,
    schedule: AtomicSchedule,
    scheduled_at: core::sync::atomic::AtomicU32,
    next: AtomicU16,
    callee: Mutex<Option<TaskCallee>>,
}

impl TimerTask {
    pub(crate) fn new() -> Self {
        Self {
            in_use: AtomicBool::new(false),
            flags: AtomicU8::new(0),
            schedule: AtomicSchedule::new(0),
            scheduled_at: core::sync::atomic::AtomicU32::new(0),
            next: AtomicU16::new(NO_TASK),
            callee: Mutex::new(None),
        }
    }

    // ---- ownership -------------------------------------------------

    /// Claims a free slot. The winning CAS transfers ownership to the
    /// caller, which must initialise the slot before linking it.
    pub(crate) fn try_claim(&self) -> bool {
        self.in_use
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Returns the slot to the pool. The callee is dropped first (which
    /// destroys owned callables), the queue link is severed, and only
    /// then is the ownership flag released.
    pub(crate) fn clear(&self) {
        *self.callee.lock() = None;
        self.schedule.store(0, Ordering::SeqCst);
        self.scheduled_at.store(0, Ordering::SeqCst);
        self.flags.store(TaskFlags::empty().bits(), Ordering::SeqCst);
        self.next.store(NO_TASK, Ordering::SeqCst);
        self.in_use.store(false, Ordering::SeqCst);
    }

    // ---- flags -----------------------------------------------------

    fn flags(&self) -> TaskFlags {
        TaskFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    fn set_flag(&self, flag: TaskFlags, on: bool) {
        if on {
            self.flags.fetch_or(flag.bits(), Ordering::SeqCst);
        } else {
            self.flags.fetch_and(!flag.bits(), Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.flags().contains(TaskFlags::RUNNING)
    }

    pub fn is_enabled(&self) -> bool {
        self.flags().contains(TaskFlags::ENABLED)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.set_flag(TaskFlags::ENABLED, enabled);
    }

    pub(crate) fn mark_cancel_pending(&self) {
        self.set_flag(TaskFlags::CANCEL_PENDING, true);
    }

    pub(crate) fn is_cancel_pending(&self) -> bool {
        self.flags().contains(TaskFlags::CANCEL_PENDING)
    }

    /// Whether the task will fire again after its next execution. Event
    /// slots repeat until their event reports complete; everything else
    /// follows the REPEATING flag.
    pub fn is_repeating(&self) -> bool {
        if let Some(TaskCallee::Event(event)) = &*self.callee.lock() {
            return !event.is_complete();
        }
        self.flags().contains(TaskFlags::REPEATING)
    }

    pub(crate) fn is_repeating_flag(&self) -> bool {
        self.flags().contains(TaskFlags::REPEATING)
    }

    pub fn is_millis_schedule(&self) -> bool {
        self.flags().contains(TaskFlags::MILLIS)
    }

    pub fn is_micros_schedule(&self) -> bool {
        !self.is_millis_schedule()
    }

    /// Discriminant of the held callable, `None` for a free slot.
    pub fn kind(&self) -> Option<TaskKind> {
        self.callee.lock().as_ref().map(TaskCallee::kind)
    }

    // ---- scheduling ------------------------------------------------

    /// Sets up timing and the callable on a freshly claimed slot.
    pub(crate) fn initialise(
        &self,
        when: Schedule,
        unit: TimeUnit,
        repeating: bool,
        callee: TaskCallee,
        platform: &impl Platform,
    ) {
        self.handle_scheduling(when, unit, repeating, platform);
        *self.callee.lock() = Some(callee);
    }

    pub(crate) fn handle_scheduling(
        &self,
        when: Schedule,
        unit: TimeUnit,
        repeating: bool,
        platform: &impl Platform,
    ) {
        self.next.store(NO_TASK, Ordering::SeqCst);

        let (when, unit) = match unit {
            TimeUnit::Seconds => (when.saturating_mul(1_000), TimeUnit::Millis),
            other => (when, other),
        };
        self.schedule.store(when, Ordering::SeqCst);

        let mut flags = TaskFlags::ENABLED;
        if repeating {
            flags |= TaskFlags::REPEATING;
        }
        if unit == TimeUnit::Millis {
            flags |= TaskFlags::MILLIS;
        }
        self.flags.store(flags.bits(), Ordering::SeqCst);

        self.rearm(platform);
    }

    /// Refreshes `scheduled_at` to the current clock so the full period
    /// runs before the next fire.
    pub(crate) fn rearm(&self, platform: &impl Platform) {
        self.scheduled_at.store(self.base_now(platform), Ordering::SeqCst);
    }

    pub(crate) fn set_schedule(&self, value: Schedule) {
        self.schedule.store(value, Ordering::SeqCst);
    }

    fn base_now(&self, platform: &impl Platform) -> u32 {
        if self.is_millis_schedule() {
            platform.now_millis() as u32
        } else {
            platform.now_micros() as u32
        }
    }

    fn elapsed(&self, platform: &impl Platform) -> u32 {
        self.base_now(platform)
            .wrapping_sub(self.scheduled_at.load(Ordering::SeqCst))
    }

    /// Whether the slot is due: in use, not already executing, and its
    /// interval has elapsed on the base-unit clock.
    pub fn is_ready(&self, platform: &impl Platform) -> bool {
        if !self.is_in_use() || self.is_running() {
            return false;
        }
        self.elapsed(platform) >= self.schedule.load(Ordering::SeqCst) as u32
    }

    /// Microseconds until the slot is due, zero if overdue. The queue
    /// uses this as its ordering key.
    pub fn micros_from_now(&self, platform: &impl Platform) -> u64 {
        let delay = self.schedule.load(Ordering::SeqCst) as u32;
        let taken = self.elapsed(platform);
        if delay <= taken {
            return 0;
        }
        let remaining = u64::from(delay - taken);
        if self.is_millis_schedule() {
            remaining * 1_000
        } else {
            remaining
        }
    }

    // ---- queue linkage ---------------------------------------------

    pub(crate) fn next_raw(&self) -> RawId {
        self.next.load(Ordering::SeqCst)
    }

    pub(crate) fn set_next_raw(&self, next: RawId) {
        self.next.store(next, Ordering::SeqCst);
    }

    /// The slot scheduled after this one, if any.
    pub fn next_in_queue(&self) -> Option<TaskId> {
        match self.next_raw() {
            NO_TASK => None,
            id => Some(TaskId(id)),
        }
    }

    // ---- callee ----------------------------------------------------

    pub(crate) fn callee(&self) -> Option<TaskCallee> {
        self.callee.lock().clone()
    }
}

/// Scoped RUNNING marker: constructed before a slot's callback is
/// invoked, released when it returns, whatever path the callback takes.
pub(crate) struct RunningGuard<'a> {
    task: &'a TimerTask,
}

impl<'a> RunningGuard<'a> {
    pub(crate) fn new(task: &'a TimerTask) -> Self {
        task.set_flag(TaskFlags::RUNNING, true);
        Self { task }
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.task.set_flag(TaskFlags::RUNNING, false);
    }
}
