/*
 * Ready Queue
 *
 * Singly linked list of in-use slots ordered by time until due. The
 * links live in the slots themselves as raw indexes; this module only
 * owns the head. Ordering is evaluated against a moving clock, so it is
 * approximate by construction - the walker stops at the first slot
 * that is not ready, which is all the consumer needs.
 *
 * Every call that follows or rewrites links must run under the
 * scheduler's critical-section guard. Lists stay short on realistic
 * deployments, so the O(N) walks are acceptable.
 */

use core::sync::atomic::{AtomicU16, Ordering};

use super::pool::SlotPool;
use super::task::{NO_TASK, RawId};
use crate::platform::Platform;

pub(crate) struct ReadyQueue {
    first: AtomicU16,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self {
            first: AtomicU16::new(NO_TASK),
        }
    }

    pub fn first_raw(&self) -> RawId {
        self.first.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.first.store(NO_TASK, Ordering::SeqCst);
    }

    /// Links a slot before the first entry that is due later, appending
    /// at the tail otherwise.
    pub fn insert(&self, pool: &SlotPool, platform: &impl Platform, id: RawId) {
        let Some(task) = pool.at(id) else { return };
        let due = task.micros_from_now(platform);

        let head = self.first_raw();
        let Some(head_task) = pool.at(head) else {
            // empty queue, the new slot becomes the head
            task.set_next_raw(NO_TASK);
            self.first.store(id, Ordering::SeqCst);
            return;
        };

        if head_task.micros_from_now(platform) > due {
            task.set_next_raw(head);
            self.first.store(id, Ordering::SeqCst);
            return;
        }

        let mut previous = head_task;
        loop {
            let current = previous.next_raw();
            let Some(current_task) = pool.at(current) else {
                // end of the queue
                previous.set_next_raw(id);
                task.set_next_raw(NO_TASK);
                return;
            };
            if current_task.micros_from_now(platform) > due {
                previous.set_next_raw(id);
                task.set_next_raw(current);
                return;
            }
            previous = current_task;
        }
    }

    /// Unlinks a slot, leaving its `next` cleared. No-op when the slot
    /// is not queued.
    pub fn remove(&self, pool: &SlotPool, id: RawId) {
        let Some(task) = pool.at(id) else { return };

        if self.first_raw() == id {
            self.first.store(task.next_raw(), Ordering::SeqCst);
            task.set_next_raw(NO_TASK);
            return;
        }

        let Some(mut previous) = pool.at(self.first_raw()) else {
            return;
        };
        loop {
            let current = previous.next_raw();
            if current == id {
                previous.set_next_raw(task.next_raw());
                task.set_next_raw(NO_TASK);
                return;
            }
            match pool.at(current) {
                Some(current_task) => previous = current_task,
                None => return,
            }
        }
    }
}
