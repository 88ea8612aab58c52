//! Software emulation of the machine for testing and development.
//!
//! This module provides a software model that can run on any host:
//! - Physical memory is a host buffer addressed by offset.
//! - [`EmulatedFrames`] hands out frames of that buffer and counts every allocation.
//! - [`SoftTlb`] models a 64-slot software-managed translation cache.
//! - [`SoftInterrupts`] models the processor interrupt-enable state.

mod frames;
mod interrupts;
mod tlb;

pub use frames::EmulatedFrames;
pub use interrupts::SoftInterrupts;
pub use tlb::SoftTlb;

use core::sync::atomic::{AtomicUsize, Ordering};

/// Emulated physical memory: a host buffer whose byte offsets serve as physical addresses.
///
/// Space is handed out by bumping a cursor and is never returned; callers that need to
/// recycle memory (such as [`EmulatedFrames`]) manage their own share of it.
pub struct EmulatedMemory {
    // Owns the allocation `base` points into.
    _buffer: Box<[u8]>,
    base: *mut u8,
    size: usize,
    cursor: AtomicUsize,
}

impl EmulatedMemory {
    /// Allocates `size` zeroed bytes of emulated memory.
    pub fn new(size: usize) -> Self {
        let mut buffer = alloc::vec![0u8; size].into_boxed_slice();
        let base = buffer.as_mut_ptr();
        Self {
            _buffer: buffer,
            base,
            size,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Reserves `size` bytes aligned to `align`, returning their physical offset.
    pub fn allocate(&self, size: usize, align: usize) -> Option<usize> {
        let mut start = 0;
        self.cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |cursor| {
                start = cursor.checked_next_multiple_of(align)?;
                start.checked_add(size).filter(|&end| end <= self.size)
            })
            .ok()?;
        Some(start)
    }

    /// Returns a pointer to the byte at physical offset `phys`.
    ///
    /// # Panics
    ///
    /// Panics if `phys` lies outside the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(
            phys < self.size,
            "physical address {:#x} out of bounds",
            phys
        );
        // SAFETY: `phys` is within the buffer, which lives as long as `self`.
        unsafe { self.base.add(phys) }
    }

    /// Inverse of [`EmulatedMemory::translate`].
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let offset = (ptr as usize).wrapping_sub(self.base as usize);
        assert!(
            offset < self.size,
            "pointer {:p} outside emulated memory",
            ptr
        );
        offset
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let memory = EmulatedMemory::new(64 * 1024);
        let first = memory.allocate(100, 4096).unwrap();
        let second = memory.allocate(100, 4096).unwrap();

        assert_eq!(first % 4096, 0);
        assert_eq!(second % 4096, 0);
        assert!(second >= first + 100);
    }

    #[test]
    fn exhausted_memory_returns_none() {
        let memory = EmulatedMemory::new(8192);
        assert!(memory.allocate(memory.size(), 4096).is_some());
        assert!(memory.allocate(1, 1).is_none());
    }

    #[test]
    fn translate_round_trips() {
        let memory = EmulatedMemory::new(8192);
        let ptr = memory.translate(4100);
        assert_eq!(memory.ptr_to_phys(ptr), 4100);
    }
}
