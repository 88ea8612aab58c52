//! Physical frames and the allocator they come from.
//!
//! The frame allocator belongs to the embedding kernel. It is registered once through
//! [`crate::bootstrap`] and every page table draws its frames from it. A
//! [`PhysicalFrame`] owns exactly one frame and hands it back when dropped, so a page
//! table that is dropped (or a copy that is abandoned half-way) can never leak a frame or
//! free one twice.

use core::slice;

use crate::{AddressTranslator, FrameNumber, PhysicalAddress, VmError, layout::PAGE_SIZE};

/// A source of physical frames.
///
/// Implementations must be usable from fault context and therefore must not block.
pub trait FrameAllocator: Sync {
    /// Allocates `pages` physically contiguous frames, returning the address of the first.
    ///
    /// Returns None when memory is exhausted.
    fn allocate(&self, pages: usize) -> Option<PhysicalAddress>;

    /// Returns a block previously handed out by [`FrameAllocator::allocate`].
    fn free(&self, base: PhysicalAddress);
}

#[cfg(not(any(test, feature = "software-emulation")))]
static FRAME_ALLOCATOR: spin::Once<&'static dyn FrameAllocator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static FRAME_ALLOCATOR: spin::Once<&'static dyn FrameAllocator> = const { spin::Once::new() };
}

/// Registers the frame allocator.
///
/// # Panics
///
/// Panics if an allocator has already been registered.
pub(crate) fn set_allocator(allocator: &'static dyn FrameAllocator) {
    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        if FRAME_ALLOCATOR.get().is_some() {
            panic!("frame allocator already set");
        }
        FRAME_ALLOCATOR.call_once(|| allocator);
    }

    #[cfg(any(test, feature = "software-emulation"))]
    {
        FRAME_ALLOCATOR.with(|a| {
            if a.get().is_some() {
                panic!("frame allocator already set");
            }
            a.call_once(|| allocator);
        });
    }
}

/// Returns the registered frame allocator, if any.
pub(crate) fn try_allocator() -> Option<&'static dyn FrameAllocator> {
    #[cfg(not(any(test, feature = "software-emulation")))]
    {
        FRAME_ALLOCATOR.get().copied()
    }

    #[cfg(any(test, feature = "software-emulation"))]
    {
        FRAME_ALLOCATOR.with(|a| a.get().copied())
    }
}

/// A single physical frame owned by a page table entry.
///
/// The frame is returned to the registered allocator when this value is dropped.
#[derive(Debug)]
pub struct PhysicalFrame {
    base: PhysicalAddress,
}

impl PhysicalFrame {
    /// Allocates one frame and fills it with zeroes.
    pub fn allocate_zeroed() -> Result<Self, VmError> {
        let mut frame = Self::allocate()?;
        frame.as_mut_slice().fill(0);
        Ok(frame)
    }

    /// Allocates one frame and copies the contents of `source` into it.
    pub fn allocate_copy(source: &PhysicalFrame) -> Result<Self, VmError> {
        let mut frame = Self::allocate()?;
        frame.as_mut_slice().copy_from_slice(source.as_slice());
        Ok(frame)
    }

    fn allocate() -> Result<Self, VmError> {
        let allocator = try_allocator().ok_or(VmError::OutOfMemory)?;
        let base = allocator.allocate(1).ok_or(VmError::OutOfMemory)?;
        debug_assert!(
            base.is_aligned(PAGE_SIZE),
            "frame allocator returned unaligned frame"
        );
        Ok(Self { base })
    }

    /// Returns the physical address of the start of this frame.
    pub fn address(&self) -> PhysicalAddress {
        self.base
    }

    /// Returns the frame number of this frame.
    pub fn number(&self) -> FrameNumber {
        self.base.frame_number()
    }

    /// Returns the contents of this frame.
    pub fn as_slice(&self) -> &[u8] {
        let ptr = AddressTranslator::current().phys_to_ptr::<u8>(self.base);
        // SAFETY: The frame was handed to us by the allocator and is owned exclusively by
        // this value, so the PAGE_SIZE bytes behind it are valid and not aliased mutably.
        unsafe { slice::from_raw_parts(ptr, PAGE_SIZE) }
    }

    /// Returns the contents of this frame for writing.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        let ptr = AddressTranslator::current().phys_to_ptr::<u8>(self.base);
        // SAFETY: As in `as_slice`; the mutable borrow of self guarantees exclusivity.
        unsafe { slice::from_raw_parts_mut(ptr, PAGE_SIZE) }
    }
}

impl Drop for PhysicalFrame {
    fn drop(&mut self) {
        if let Some(allocator) = try_allocator() {
            allocator.free(self.base);
        }
    }
}

/// Adapts a kernel page allocator that deals in direct-mapped kernel addresses.
///
/// `alloc_kpages(n)` returns the kernel address of `n` contiguous pages, or zero on
/// failure; `free_kpages(addr)` takes such an address back. Addresses are converted to
/// and from physical addresses with the current [`AddressTranslator`].
pub struct KpagesAllocator {
    alloc_kpages: fn(usize) -> usize,
    free_kpages: fn(usize),
}

impl KpagesAllocator {
    /// Creates an adapter over the given page allocation functions.
    pub const fn new(alloc_kpages: fn(usize) -> usize, free_kpages: fn(usize)) -> Self {
        Self {
            alloc_kpages,
            free_kpages,
        }
    }
}

impl FrameAllocator for KpagesAllocator {
    fn allocate(&self, pages: usize) -> Option<PhysicalAddress> {
        match (self.alloc_kpages)(pages) {
            0 => None,
            kernel_addr => Some(AddressTranslator::current().virt_to_phys(kernel_addr)),
        }
    }

    fn free(&self, base: PhysicalAddress) {
        (self.free_kpages)(AddressTranslator::current().phys_to_virt(base));
    }
}
