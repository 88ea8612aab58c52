//! x86_64 hardware primitives.

use ::x86_64::instructions::interrupts;

use crate::InterruptControl;

/// The interrupt-priority primitive on x86_64, driving the interrupt flag directly.
///
/// Must only be used in ring 0.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuInterrupts;

impl InterruptControl for CpuInterrupts {
    /// Whether interrupts were enabled before the raise.
    type Level = bool;

    fn raise(&self) -> bool {
        let enabled = interrupts::are_enabled();
        if enabled {
            interrupts::disable();
        }
        enabled
    }

    fn restore(&self, previous: bool) {
        if previous {
            interrupts::enable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saves_enable_flag<I: InterruptControl<Level = bool>>(_: &I) {}

    // Host tests run in ring 3, where touching the interrupt flag faults, so only the
    // saved level's type is checked.
    #[test]
    fn level_is_interrupt_flag() {
        saves_enable_flag(&CpuInterrupts);
    }
}
