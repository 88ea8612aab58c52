//! Instrumented frame allocator over emulated physical memory.

use alloc::vec::Vec;

use crate::{AddressTranslator, FrameAllocator, PhysicalAddress, layout::PAGE_SIZE};

/// A frame allocator that carves frames out of emulated physical memory.
///
/// Single frames are recycled through a free list; multi-frame blocks are only ever
/// satisfied from memory that has never been handed out. Every allocation is counted so
/// tests can assert that nothing leaks, and freeing a frame that is not allocated panics.
///
/// Frame zero is never handed out, so the zero sentinel of page allocators stays
/// unambiguous.
pub struct EmulatedFrames {
    inner: spin::Mutex<FramePool>,
}

struct FramePool {
    /// Physical address of frame index 0.
    base: PhysicalAddress,
    /// Number of frames managed.
    capacity: usize,
    /// Index of the first frame that has never been handed out.
    next: usize,
    /// Frames that were handed out and returned.
    free: Vec<usize>,
    /// Length of the block starting at each frame index, or zero if not allocated.
    block_len: Vec<usize>,
    /// Frames currently allocated.
    outstanding: usize,
    /// Total successful allocation calls.
    allocations: usize,
    /// Number of allocations allowed before failures are injected.
    remaining: Option<usize>,
}

impl EmulatedFrames {
    /// Creates an allocator managing `capacity` frames of the translator's emulated memory.
    ///
    /// # Panics
    ///
    /// Panics if the translator is not emulated or does not have enough memory left.
    pub fn new(translator: &AddressTranslator, capacity: usize) -> Self {
        let raw = translator
            .allocate((capacity + 1) * PAGE_SIZE, PAGE_SIZE)
            .expect("out of emulated memory");
        let base = if raw.as_usize() == 0 {
            PhysicalAddress::new(PAGE_SIZE)
        } else {
            raw
        };

        Self {
            inner: spin::Mutex::new(FramePool {
                base,
                capacity,
                next: 0,
                free: Vec::new(),
                block_len: alloc::vec![0; capacity],
                outstanding: 0,
                allocations: 0,
                remaining: None,
            }),
        }
    }

    /// Returns the number of frames currently allocated.
    pub fn outstanding(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// Returns the number of successful allocation calls made so far.
    pub fn allocations(&self) -> usize {
        self.inner.lock().allocations
    }

    /// Returns the number of frames this allocator manages.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Lets `count` more allocations succeed and fails every one after that.
    ///
    /// Passing None removes the limit.
    pub fn fail_after(&self, count: Option<usize>) {
        self.inner.lock().remaining = count;
    }
}

impl FramePool {
    fn address_of(&self, index: usize) -> PhysicalAddress {
        self.base + index * PAGE_SIZE
    }

    fn index_of(&self, addr: PhysicalAddress) -> usize {
        assert!(
            addr >= self.base && addr.is_aligned(PAGE_SIZE),
            "freed address {} was not handed out by this allocator",
            addr
        );
        let index = (addr - self.base) / PAGE_SIZE;
        assert!(index < self.capacity, "freed address {} out of range", addr);
        index
    }

    fn take(&mut self, pages: usize) -> Option<usize> {
        if pages == 1 {
            if let Some(index) = self.free.pop() {
                return Some(index);
            }
        }
        if self.next + pages > self.capacity {
            return None;
        }
        let index = self.next;
        self.next += pages;
        Some(index)
    }
}

impl FrameAllocator for EmulatedFrames {
    fn allocate(&self, pages: usize) -> Option<PhysicalAddress> {
        let mut pool = self.inner.lock();
        if pages == 0 {
            return None;
        }
        if let Some(remaining) = pool.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }

        let index = pool.take(pages)?;
        pool.block_len[index] = pages;
        pool.outstanding += pages;
        pool.allocations += 1;
        Some(pool.address_of(index))
    }

    fn free(&self, base: PhysicalAddress) {
        let mut pool = self.inner.lock();
        let index = pool.index_of(base);
        let pages = core::mem::replace(&mut pool.block_len[index], 0);
        assert!(pages != 0, "double free of frame {}", base);

        pool.outstanding -= pages;
        pool.free.extend(index..index + pages);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(capacity: usize) -> EmulatedFrames {
        let translator = AddressTranslator::emulated((capacity + 1) * PAGE_SIZE);
        // The pool only records physical offsets, so the translator may go out of scope.
        EmulatedFrames::new(&translator, capacity)
    }

    #[test]
    fn never_hands_out_frame_zero() {
        let frames = frames(4);
        for _ in 0..4 {
            let addr = frames.allocate(1).unwrap();
            assert_ne!(addr.as_usize(), 0);
        }
    }

    #[test]
    fn counts_outstanding_frames() {
        let frames = frames(8);

        let a = frames.allocate(1).unwrap();
        let b = frames.allocate(2).unwrap();
        assert_eq!(frames.outstanding(), 3);
        assert_eq!(frames.allocations(), 2);

        frames.free(b);
        frames.free(a);
        assert_eq!(frames.outstanding(), 0);
    }

    #[test]
    fn recycles_freed_frames() {
        let frames = frames(1);

        let a = frames.allocate(1).unwrap();
        assert!(frames.allocate(1).is_none());
        frames.free(a);
        assert_eq!(frames.allocate(1), Some(a));
    }

    #[test]
    fn injects_failures() {
        let frames = frames(8);
        frames.fail_after(Some(1));

        assert!(frames.allocate(1).is_some());
        assert!(frames.allocate(1).is_none());

        frames.fail_after(None);
        assert!(frames.allocate(1).is_some());
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_panics() {
        let frames = frames(2);
        let a = frames.allocate(1).unwrap();
        frames.free(a);
        frames.free(a);
    }
}
