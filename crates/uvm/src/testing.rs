//! Per-thread emulated machine for unit tests.

use std::cell::Cell;

use crate::{AddressTranslator, arch::software::EmulatedFrames, layout::PAGE_SIZE};

/// Frames handed out by each test thread's allocator.
const TEST_FRAMES: usize = 1024;

std::thread_local! {
    static FRAMES: Cell<Option<&'static EmulatedFrames>> = const { Cell::new(None) };
}

/// Boots the virtual-memory system on the current thread, once, over emulated memory.
///
/// Returns the frame allocator so tests can watch allocations. Tests on the same thread
/// share it, so assertions should compare against counts taken at the start of the test.
pub(crate) fn setup() -> &'static EmulatedFrames {
    if let Some(frames) = FRAMES.with(Cell::get) {
        return frames;
    }

    let translator = AddressTranslator::emulated((TEST_FRAMES + 2) * PAGE_SIZE);
    let frames: &'static EmulatedFrames =
        Box::leak(Box::new(EmulatedFrames::new(&translator, TEST_FRAMES)));
    crate::bootstrap(translator, frames);
    FRAMES.with(|cell| cell.set(Some(frames)));
    frames
}
