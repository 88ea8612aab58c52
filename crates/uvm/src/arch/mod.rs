//! Implementations of the hardware seams.
//!
//! `x86_64` drives the real interrupt flag. `software` models the whole machine on the
//! host and is what the tests run against.

// Compiled for host tests too, though never invoked there: its instructions are
// privileged.
#[cfg(target_arch = "x86_64")]
pub mod x86_64;

#[cfg(any(test, feature = "software-emulation"))]
pub mod software;
