/*
 * Event Protocol
 *
 * Events are polled tasks whose firing policy lives in the event object
 * itself. The scheduler asks the event when it should next be checked,
 * and executes it whenever the triggered flag is set; once the event
 * reports complete its slot is cleared.
 *
 * An event can be triggered from three places:
 * - inside `time_of_next_check`, for purely polled conditions;
 * - from foreground code via `set_triggered`;
 * - from an ISR via `TaskManager::mark_triggered_and_notify`, which
 *   rides the interrupt-marshalling path so the event is evaluated on
 *   the very next run_loop iteration.
 */

use core::sync::atomic::{AtomicBool, Ordering};

/// A task whose schedule and firing are driven by the object itself.
///
/// Implementations are shared with the scheduler (and possibly with
/// interrupt context), so all methods take `&self` and state must be
/// interior-mutable; [`EventState`] covers the flag pair.
pub trait Event: Send + Sync {
    /// How long, in microseconds, the scheduler should wait before
    /// polling this event again. Called once at registration and then
    /// after every poll. May call `set_triggered(true)` to request
    /// immediate execution.
    fn time_of_next_check(&self) -> u32;

    /// Invoked when the event has triggered.
    fn exec(&self);

    /// True when the event requires execution now.
    fn is_triggered(&self) -> bool;

    /// Sets or clears the triggered flag. The scheduler clears it
    /// before invoking `exec`.
    fn set_triggered(&self, triggered: bool);

    /// True once the event will never fire again; the scheduler then
    /// clears the slot.
    fn is_complete(&self) -> bool;

    /// Marks the event as complete (or revives it). Safe to call from
    /// interrupt context.
    fn set_completed(&self, complete: bool);
}

/// The triggered/complete flag pair shared by most [`Event`]
/// implementations. Embed one and delegate the four flag methods.
#[derive(Debug, Default)]
pub struct EventState {
    triggered: AtomicBool,
    completed: AtomicBool,
}

impl EventState {
    pub const fn new() -> Self {
        Self {
            triggered: AtomicBool::new(false),
            completed: AtomicBool::new(false),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn set_triggered(&self, triggered: bool) {
        self.triggered.store(triggered, Ordering::SeqCst);
    }

    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn set_completed(&self, complete: bool) {
        self.completed.store(complete, Ordering::SeqCst);
    }
}
