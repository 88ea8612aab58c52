//! Software model of the processor interrupt-enable state.

use core::cell::Cell;

use crate::InterruptControl;

/// Emulated interrupt controller.
///
/// Tracks whether interrupts are enabled and how many times they have been raised, so
/// tests can check that every critical section was entered and left.
pub struct SoftInterrupts {
    enabled: Cell<bool>,
    raises: Cell<usize>,
}

impl SoftInterrupts {
    /// Creates a controller with interrupts enabled.
    pub fn new() -> Self {
        Self {
            enabled: Cell::new(true),
            raises: Cell::new(0),
        }
    }

    pub fn are_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Returns how many times interrupts have been raised.
    pub fn raises(&self) -> usize {
        self.raises.get()
    }
}

impl Default for SoftInterrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptControl for SoftInterrupts {
    type Level = bool;

    fn raise(&self) -> bool {
        self.raises.set(self.raises.get() + 1);
        self.enabled.replace(false)
    }

    fn restore(&self, previous: bool) {
        self.enabled.set(previous);
    }
}
