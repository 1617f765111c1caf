/*
 * Scheduler Notifications
 *
 * Diagnostic side-channel for hosts that want to observe the scheduler:
 * pool growth and exhaustion, slot lifecycle, and lock anomalies. The
 * hook is process-wide, mirroring how small targets wire a single
 * logging delegate at boot.
 *
 * The hook may be invoked while the scheduler's critical-section guard
 * is held; it must not call back into the scheduler.
 */

use spin::RwLock;

use crate::scheduler::TaskId;

/// Conditions reported through the notification hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerNotice {
    /// A new block of task slots was appended; `slots` is the new total.
    PoolGrown { slots: usize },
    /// Every slot is taken and the pool is at its block cap.
    PoolFull,
    /// A slot was claimed and linked into the ready queue.
    TaskAllocated(TaskId),
    /// A slot was cleared and returned to the pool.
    TaskFreed(TaskId),
    /// `unlock` was called on a lock that was not held.
    LockFailure,
    /// A spin-lock waiter has crossed the high spin-count threshold.
    HighSpinCount,
}

/// Receiver for [`SchedulerNotice`] values.
pub type NotificationFn = fn(SchedulerNotice);

static HOOK: RwLock<Option<NotificationFn>> = RwLock::new(None);

/// Installs the process-wide notification hook, replacing any previous one.
pub fn set_notification_hook(hook: NotificationFn) {
    *HOOK.write() = Some(hook);
}

/// Removes the notification hook.
pub fn clear_notification_hook() {
    *HOOK.write() = None;
}

pub(crate) fn notify(notice: SchedulerNotice) {
    if let Some(hook) = *HOOK.read() {
        hook(notice);
    }
}
