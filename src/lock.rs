/*
 * Reentrant Yielding Lock
 *
 * Mutual exclusion between tasks that keeps the scheduler alive while
 * waiting: a contended acquire does not busy-spin the core, it pumps
 * yield_for_micros so the lock holder keeps making progress. Ownership
 * is the identity of the running task at acquire time, which makes the
 * lock reentrant from within the same task (including across nested
 * yields). A lock taken outside any task is not reentrant.
 *
 * unlock does not verify the releaser is the holder.
 */

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};

use crate::notify::{SchedulerNotice, notify};
use crate::platform::Platform;
use crate::scheduler::TaskManager;
use crate::scheduler::task::NO_TASK;

/// How long each failed acquire attempt yields to the scheduler.
pub const SPIN_YIELD_MICROS: u32 = 50;

/// Spin counts past this are reported as a HighSpinCount diagnostic.
const HIGH_SPIN_THRESHOLD: u32 = 1_000;

/// Task-owned reentrant lock that spins cooperatively. See the module
/// header for the ownership rules.
pub struct ReentrantYieldingLock {
    initiating_task: AtomicU16,
    locked: AtomicBool,
    count: AtomicU8,
}

impl ReentrantYieldingLock {
    pub const fn new() -> Self {
        Self {
            initiating_task: AtomicU16::new(NO_TASK),
            locked: AtomicBool::new(false),
            count: AtomicU8::new(0),
        }
    }

    /// Takes the lock if it is free, or bumps the hold count if the
    /// calling task already owns it. Never waits.
    pub fn try_lock<P: Platform>(&self, tasks: &TaskManager<P>) -> bool {
        let current = tasks.running_task_raw();
        if self.locked.load(Ordering::SeqCst) {
            let owner = self.initiating_task.load(Ordering::SeqCst);
            if owner != NO_TASK && owner == current {
                self.count.fetch_add(1, Ordering::SeqCst);
                return true;
            }
            return false;
        }
        self.acquire(current)
    }

    /// Cooperative acquisition: attempts the lock, yielding
    /// [`SPIN_YIELD_MICROS`] to the scheduler after each failure, until
    /// the budget is spent. Returns true once the lock is held.
    pub fn spin_lock<P: Platform>(&self, tasks: &TaskManager<P>, mut micros: u32) -> bool {
        if self.try_lock(tasks) {
            return true;
        }

        let mut spins: u32 = 0;
        while micros > SPIN_YIELD_MICROS {
            if self.acquire(tasks.running_task_raw()) {
                return true;
            }
            tasks.yield_for_micros(SPIN_YIELD_MICROS);
            micros -= SPIN_YIELD_MICROS;
            spins += 1;
            if spins == HIGH_SPIN_THRESHOLD {
                notify(SchedulerNotice::HighSpinCount);
                log::warn!("lock waiter exceeded {} spins", HIGH_SPIN_THRESHOLD);
            }
        }
        false
    }

    /// Takes the lock, waiting the longest possible time for it.
    pub fn lock<P: Platform>(&self, tasks: &TaskManager<P>) {
        let _ = self.spin_lock(tasks, u32::MAX);
    }

    /// Scoped acquisition: the returned guard releases on drop.
    pub fn lock_guard<'a, P: Platform>(&'a self, tasks: &TaskManager<P>) -> TaskLockGuard<'a> {
        self.lock(tasks);
        TaskLockGuard { lock: self }
    }

    /// Releases one hold. When the count reaches zero the owner is
    /// forgotten and the lock becomes free. Releasing a lock that is
    /// not held is reported as a LockFailure and is otherwise a no-op.
    pub fn unlock(&self) {
        if self.count.load(Ordering::SeqCst) == 0 {
            if !self.locked.load(Ordering::SeqCst) {
                notify(SchedulerNotice::LockFailure);
                log::warn!("unlock of a lock that is not held");
            }
            return;
        }
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.initiating_task.store(NO_TASK, Ordering::SeqCst);
            self.locked.store(false, Ordering::SeqCst);
        }
    }

    pub fn lock_count(&self) -> u8 {
        self.count.load(Ordering::SeqCst)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn acquire(&self, owner: u16) -> bool {
        if self
            .locked
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.initiating_task.store(owner, Ordering::SeqCst);
            self.count.store(1, Ordering::SeqCst);
            return true;
        }
        false
    }
}

impl Default for ReentrantYieldingLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII wrapper releasing a [`ReentrantYieldingLock`] at end of scope.
pub struct TaskLockGuard<'a> {
    lock: &'a ReentrantYieldingLock,
}

impl Drop for TaskLockGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
