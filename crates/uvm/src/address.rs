//! Physical and user virtual addresses.
//!
//! Both address kinds are 32 bits wide. Physical memory is only reachable through the
//! kernel's view of it, which [`AddressTranslator`] describes: a fixed direct map on real
//! hardware, or a host buffer when the machine is emulated.

use core::fmt;
use core::ops::{Add, Sub};

use crate::layout::{MAX_PHYSICAL_ADDRESS, MAX_VIRTUAL_ADDRESS, PAGE_SIZE};
use crate::{FrameNumber, PageNumber};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::software::EmulatedMemory;

/// How the kernel reaches the contents of physical memory.
pub enum AddressTranslator {
    /// Physical memory appears at `direct_map_offset` in the kernel's address space.
    Hardware { direct_map_offset: usize },
    /// Physical addresses are offsets into a host buffer.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

#[cfg(not(any(test, feature = "software-emulation")))]
static TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

// Under emulation every thread gets its own machine.
#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static TRANSLATOR: spin::Once<AddressTranslator> = const { spin::Once::new() };
}

impl AddressTranslator {
    /// Creates a translator for physical memory mapped at `direct_map_offset`.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// Creates a translator over `size` bytes of freshly allocated host memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Registers the translator used by every frame access.
    ///
    /// # Panics
    ///
    /// Panics if a translator is already registered (on this thread, under emulation).
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        Self::install(&TRANSLATOR, translator);

        #[cfg(any(test, feature = "software-emulation"))]
        TRANSLATOR.with(|once| Self::install(once, translator));
    }

    fn install(once: &spin::Once<AddressTranslator>, translator: AddressTranslator) {
        let mut fresh = false;
        once.call_once(|| {
            fresh = true;
            translator
        });
        assert!(fresh, "address translator already set");
    }

    /// Returns the registered translator.
    ///
    /// # Panics
    ///
    /// Panics if [`crate::bootstrap`] has not run.
    pub fn current() -> &'static AddressTranslator {
        Self::try_current().expect("address translator not set; call uvm::bootstrap first")
    }

    /// Returns the registered translator, if there is one.
    pub fn try_current() -> Option<&'static AddressTranslator> {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            TRANSLATOR.get()
        }

        #[cfg(any(test, feature = "software-emulation"))]
        {
            TRANSLATOR.with(|once| {
                // SAFETY: The cell belongs to this thread, is never reset once filled, and
                // the thread outlives every borrow handed out on it.
                once.get()
                    .map(|translator| unsafe { &*(translator as *const AddressTranslator) })
            })
        }
    }

    /// Returns the kernel address at which `phys` can be accessed.
    pub fn phys_to_virt(&self, phys: PhysicalAddress) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => {
                phys.as_usize().wrapping_add(*direct_map_offset)
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(memory) => memory.translate(phys.as_usize()) as usize,
        }
    }

    /// Inverse of [`AddressTranslator::phys_to_virt`].
    pub fn virt_to_phys(&self, virt: usize) -> PhysicalAddress {
        match self {
            Self::Hardware { direct_map_offset } => {
                PhysicalAddress::new(virt.wrapping_sub(*direct_map_offset))
            }
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(memory) => {
                PhysicalAddress::new(memory.ptr_to_phys(virt as *const u8))
            }
        }
    }

    /// Returns a typed pointer to `phys` in the kernel's view of memory.
    pub fn phys_to_ptr<T>(&self, phys: PhysicalAddress) -> *mut T {
        self.phys_to_virt(phys) as *mut T
    }

    /// Carves `size` bytes out of emulated memory.
    ///
    /// # Panics
    ///
    /// Panics on a hardware translator, which has no memory of its own to hand out.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn allocate(&self, size: usize, align: usize) -> Option<PhysicalAddress> {
        match self {
            Self::Hardware { .. } => panic!("cannot allocate from a hardware translator"),
            Self::Emulated(memory) => memory.allocate(size, align).map(PhysicalAddress::new),
        }
    }
}

macro_rules! address {
    ($(#[$meta:meta])* $name:ident, limit = $limit:expr, $number:ident via $number_of:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// # Panics
            ///
            /// Panics if `addr` does not fit in 32 bits.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                assert!(addr <= $limit, concat!(stringify!($name), " out of range"));
                Self(addr)
            }

            /// Returns None if `addr` does not fit in 32 bits.
            #[inline]
            pub const fn try_new(addr: usize) -> Option<Self> {
                if addr <= $limit { Some(Self(addr)) } else { None }
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// `align` must be a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                debug_assert!(align.is_power_of_two());
                self.0 & (align - 1) == 0
            }

            /// Rounds down to a multiple of `align`, which must be a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                debug_assert!(align.is_power_of_two());
                Self(self.0 & !(align - 1))
            }

            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 % PAGE_SIZE
            }

            #[inline]
            pub const fn $number_of(self) -> $number {
                $number::new(self.0 / PAGE_SIZE)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&format_args!("{:#x}", self.0))
                    .finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#010x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, offset: usize) -> Self {
                Self::new(self.0 + offset)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, offset: usize) -> Self {
                Self::new(self.0 - offset)
            }
        }

        /// Distance in bytes.
        impl Sub for $name {
            type Output = usize;

            #[inline]
            fn sub(self, base: Self) -> usize {
                self.0 - base.0
            }
        }
    };
}

address!(
    /// A physical address, as handed out by the frame allocator.
    PhysicalAddress, limit = MAX_PHYSICAL_ADDRESS, FrameNumber via frame_number
);

address!(
    /// A user virtual address.
    VirtualAddress, limit = MAX_VIRTUAL_ADDRESS, PageNumber via page_number
);

impl VirtualAddress {
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_down_clears_page_offset() {
        let addr = VirtualAddress::new(0x1234);
        assert_eq!(addr.align_down(PAGE_SIZE), VirtualAddress::new(0x1000));
        assert_eq!(addr.page_offset(), 0x234);
    }

    #[test]
    fn page_number_of_address() {
        let addr = VirtualAddress::new(3 * PAGE_SIZE + 10);
        assert_eq!(addr.page_number(), PageNumber::new(3));
    }

    #[test]
    fn try_new_rejects_wide_addresses() {
        assert!(VirtualAddress::try_new(MAX_VIRTUAL_ADDRESS).is_some());
        assert!(VirtualAddress::try_new(MAX_VIRTUAL_ADDRESS + 1).is_none());
    }

    #[test]
    fn frame_number_of_physical_address() {
        let addr = PhysicalAddress::new(5 * PAGE_SIZE + 7);
        assert_eq!(addr.frame_number(), FrameNumber::new(5));
    }

    #[test]
    fn hardware_translator_applies_offset() {
        let translator = AddressTranslator::hardware(0x8000_0000);
        let phys = PhysicalAddress::new(0x0004_2000);
        assert_eq!(translator.phys_to_virt(phys), 0x8004_2000);
        assert_eq!(translator.virt_to_phys(0x8004_2000), phys);
    }

    #[test]
    fn emulated_translator_round_trips() {
        let translator = AddressTranslator::emulated(4 * PAGE_SIZE);
        let phys = translator.allocate(PAGE_SIZE, PAGE_SIZE).unwrap();
        let ptr = translator.phys_to_ptr::<u8>(phys);
        assert_eq!(translator.virt_to_phys(ptr as usize), phys);
    }
}
