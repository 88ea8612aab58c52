//! Page and frame numbers.
//!
//! A frame number indexes physical memory and a page number indexes a user address space.
//! These are what page table entries and translation cache words actually carry.

use core::{fmt, ops::Add};

use crate::{PhysicalAddress, VirtualAddress, layout::PAGE_SIZE};

macro_rules! page_granular {
    ($(#[$meta:meta])* $name:ident => $address:ident, $number_of:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns the address of the first byte covered by this number.
            #[inline]
            pub const fn start(self) -> $address {
                $address::new(self.0 * PAGE_SIZE)
            }
        }

        impl From<$address> for $name {
            #[inline]
            fn from(addr: $address) -> Self {
                addr.$number_of()
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, count: usize) -> Self {
                Self(self.0 + count)
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
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

page_granular!(
    /// A physical frame number.
    FrameNumber => PhysicalAddress, frame_number
);

page_granular!(
    /// A user virtual page number.
    PageNumber => VirtualAddress, page_number
);
