//! Machine geometry.
//!
//! User address spaces are 32 bits wide and split into 4 KiB pages. A virtual address
//! decomposes into a level-1 index (bits 31-21), a level-2 index (bits 20-12) and a page
//! offset (bits 11-0).

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Number of bits in a page offset.
pub const PAGE_SHIFT: usize = 12;

/// Number of entries in the top-level page directory.
pub const L1_ENTRIES: usize = 2048;

/// Number of entries in a second-level leaf table.
pub const L2_ENTRIES: usize = 512;

/// Shift of the level-1 index within a virtual address.
pub const L1_SHIFT: usize = 21;

/// Highest valid user virtual address plus one; the user stack grows down from here.
pub const USER_STACK_TOP: usize = 0x8000_0000;

/// Number of pages in the fixed user stack region.
pub const STACK_PAGES: usize = 16;

/// Lowest address of the fixed user stack region.
pub const STACK_BASE: usize = USER_STACK_TOP - STACK_PAGES * PAGE_SIZE;

/// Offset at which the kernel sees all of physical memory.
pub const KERNEL_DIRECT_MAP: usize = 0x8000_0000;

/// Largest representable virtual address.
pub const MAX_VIRTUAL_ADDRESS: usize = 0xFFFF_FFFF;

/// Largest representable physical address.
pub const MAX_PHYSICAL_ADDRESS: usize = 0xFFFF_FFFF;

const _: () = assert!(
    (L1_ENTRIES as u64) * (L2_ENTRIES as u64) * (PAGE_SIZE as u64)
        == MAX_VIRTUAL_ADDRESS as u64 + 1
);
const _: () = assert!(L2_ENTRIES << PAGE_SHIFT == 1 << L1_SHIFT);
