/*
 * Interrupt Marshalling
 *
 * ISRs do almost nothing here: a raised interrupt records its pin
 * number and sets a flag, both plain atomic stores, and returns. The
 * next run_loop iteration drains the flag into the user's interrupt
 * callback and walks the event slots, so all real work happens in the
 * foreground context.
 *
 * Raw ISR handlers take no arguments, so the pin number is baked into a
 * const-generic thunk and the scheduler is reached through a
 * process-wide registry pointer. Registration requires a `&'static`
 * scheduler, which is what keeps the registry pointer valid from
 * interrupt context.
 */

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, Ordering};

/// Opaque pin identifier as delivered by the IO layer.
pub type PinId = u8;

/// Pin value reported when the real source pin is not known, used by
/// the catch-all thunk and by event notification.
pub const UNKNOWN_INTERRUPT_PIN: PinId = 0xff;

/// Argument-free handler installable as a raw ISR.
pub type RawInterruptHandler = fn();

/// User callback receiving the marshalled interrupt, with the pin that
/// caused it on a best-efforts basis.
pub type InterruptFn = fn(PinId);

/// Edge or level condition to attach an interrupt for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptMode {
    Low,
    High,
    Change,
    Rising,
    Falling,
}

/// Any device that can deliver interrupts: on-chip GPIO, an IO
/// expander, or a test double.
pub trait InterruptSource {
    fn attach_interrupt(&self, pin: PinId, handler: RawInterruptHandler, mode: InterruptMode);
}

/// The two words an ISR is allowed to touch.
pub(crate) struct InterruptState {
    interrupted: AtomicBool,
    last_trigger: AtomicU8,
}

impl InterruptState {
    pub const fn new() -> Self {
        Self {
            interrupted: AtomicBool::new(false),
            last_trigger: AtomicU8::new(0),
        }
    }

    /// ISR side: record the pin, raise the flag. Nothing else.
    pub fn mark(&self, pin: PinId) {
        self.last_trigger.store(pin, Ordering::SeqCst);
        self.interrupted.store(true, Ordering::SeqCst);
    }

    /// Foreground side: consume the flag, returning the last pin if an
    /// interrupt was pending.
    pub fn take(&self) -> Option<PinId> {
        if self.interrupted.swap(false, Ordering::SeqCst) {
            Some(self.last_trigger.load(Ordering::SeqCst))
        } else {
            None
        }
    }
}

/// Where the pin thunks deliver. Set by `TaskManager::add_interrupt`;
/// the `'static` bound there is what makes the pointer sound.
static ISR_TARGET: AtomicPtr<InterruptState> = AtomicPtr::new(ptr::null_mut());

pub(crate) fn register_isr_target(state: &'static InterruptState) {
    ISR_TARGET.store(state as *const InterruptState as *mut InterruptState, Ordering::SeqCst);
}

fn dispatch(pin: PinId) {
    let target = ISR_TARGET.load(Ordering::SeqCst);
    // SAFETY: the registry only ever holds null or a pointer derived
    // from a &'static InterruptState in register_isr_target.
    if let Some(state) = unsafe { target.as_ref() } {
        state.mark(pin);
    }
}

fn pin_isr<const PIN: PinId>() {
    dispatch(PIN);
}

/// Selects the raw thunk for a pin. Common pins get a thunk that
/// reports their exact number; anything else reports
/// [`UNKNOWN_INTERRUPT_PIN`].
pub(crate) fn raw_handler_for(pin: PinId) -> RawInterruptHandler {
    match pin {
        1 => pin_isr::<1>,
        2 => pin_isr::<2>,
        3 => pin_isr::<3>,
        4 => pin_isr::<4>,
        5 => pin_isr::<5>,
        6 => pin_isr::<6>,
        7 => pin_isr::<7>,
        8 => pin_isr::<8>,
        9 => pin_isr::<9>,
        10 => pin_isr::<10>,
        11 => pin_isr::<11>,
        12 => pin_isr::<12>,
        13 => pin_isr::<13>,
        14 => pin_isr::<14>,
        15 => pin_isr::<15>,
        18 => pin_isr::<18>,
        _ => pin_isr::<UNKNOWN_INTERRUPT_PIN>,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_take_hand_off_the_pin() {
        let state = InterruptState::new();
        assert_eq!(state.take(), None);

        state.mark(7);
        assert_eq!(state.take(), Some(7));
        // the flag is consumed, the pin is only best-efforts history
        assert_eq!(state.take(), None);
    }

    #[test]
    fn later_interrupts_overwrite_the_recorded_pin() {
        let state = InterruptState::new();
        state.mark(3);
        state.mark(9);
        assert_eq!(state.take(), Some(9));
    }

    #[test]
    fn uncommon_pins_share_the_catch_all_thunk() {
        assert_eq!(
            raw_handler_for(200) as usize,
            raw_handler_for(0) as usize
        );
        assert_ne!(raw_handler_for(2) as usize, raw_handler_for(3) as usize);
    }
}
