/*
 * Long Schedules
 *
 * Schedule values are 32-bit (or 16-bit) counts of the base unit, which
 * caps a plain fixed-rate task at roughly 49.7 days of milliseconds.
 * LongSchedule lifts that limit by implementing the event protocol: it
 * keeps its own millisecond arming time, polls at most every six
 * minutes, and triggers itself when the period has elapsed. Wrapping
 * subtraction keeps the arithmetic correct across clock roll.
 */

use core::sync::atomic::{AtomicU32, Ordering};

use super::events::{Event, EventState};
use super::task::ExecHandle;
use crate::platform::{Platform, millis_to_micros};

const HOURS_TO_MILLIS: u32 = 3_600_000;
const MINUTES_TO_MILLIS: u32 = 60_000;

/// Longest interval between polls of a long schedule.
const MAX_POLL_MILLIS: u32 = 6 * MINUTES_TO_MILLIS;

/// Builds a millisecond period from hours, minutes, seconds and millis.
pub fn make_hour_schedule(hours: u32, minutes: u32, seconds: u32, millis: u32) -> u32 {
    (hours * HOURS_TO_MILLIS) + (minutes * MINUTES_TO_MILLIS) + (seconds * 1_000) + millis
}

/// Builds a millisecond period from days and hours.
pub fn make_day_schedule(days: u32, hours: u32) -> u32 {
    (days * 24 * HOURS_TO_MILLIS) + (hours * HOURS_TO_MILLIS)
}

/// An [`Event`] that runs an action every `period_millis`, for periods
/// beyond the reach of plain schedule values. The first period starts
/// at construction time. Register it with
/// [`TaskManager::register_event`](super::TaskManager::register_event);
/// it repeats until `set_completed(true)`.
pub struct LongSchedule<P: Platform> {
    platform: P,
    period_millis: u32,
    last_fired_at: AtomicU32,
    state: EventState,
    action: ExecHandle,
}

impl<P: Platform + Send + Sync> LongSchedule<P> {
    pub fn new(platform: P, period_millis: u32, action: impl Into<ExecHandle>) -> Self {
        let armed_at = platform.now_millis() as u32;
        Self {
            platform,
            period_millis,
            last_fired_at: AtomicU32::new(armed_at),
            state: EventState::new(),
            action: action.into(),
        }
    }
}

impl<P: Platform + Send + Sync> Event for LongSchedule<P> {
    fn time_of_next_check(&self) -> u32 {
        let taken = (self.platform.now_millis() as u32)
            .wrapping_sub(self.last_fired_at.load(Ordering::SeqCst));
        let mut millis_from_now = self.period_millis.saturating_sub(taken);
        if millis_from_now == 0 {
            // period elapsed: fire on this poll and wait out a full cycle
            self.state.set_triggered(true);
            millis_from_now = self.period_millis;
        }
        millis_to_micros(millis_from_now.min(MAX_POLL_MILLIS))
    }

    fn exec(&self) {
        self.last_fired_at
            .store(self.platform.now_millis() as u32, Ordering::SeqCst);
        self.action.exec();
    }

    fn is_triggered(&self) -> bool {
        self.state.is_triggered()
    }

    fn set_triggered(&self, triggered: bool) {
        self.state.set_triggered(triggered);
    }

    fn is_complete(&self) -> bool {
        self.state.is_complete()
    }

    fn set_completed(&self, complete: bool) {
        self.state.set_completed(complete);
    }
}
