#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # User Virtual Memory (UVM)
//!
//! UVM is the virtual-memory core of a process execution environment. It provides:
//!
//! - Per-process address spaces made of page-aligned regions with access permissions.
//! - Sparse two-level page tables populated lazily, one physical frame per faulted page.
//! - Synchronous page-fault resolution that installs entries into a software-managed
//!   translation cache with interrupts briefly disabled.
//! - Software emulation of physical memory, the translation cache and the interrupt
//!   controller for testing in non-kernel environments.
//!
//! The physical frame allocator, the translation cache driver and the interrupt-priority
//! primitive are supplied by the embedding kernel through the [`FrameAllocator`],
//! [`TranslationCache`] and [`InterruptControl`] traits.

extern crate alloc;

mod address;
mod address_space;
pub mod arch;
mod error;
mod fault;
mod frame;
mod layout;
mod numbers;
mod page_table;
mod region;
mod tlb;

#[cfg(test)]
mod testing;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use error::VmError;
pub use fault::FaultKind;
pub use frame::{FrameAllocator, KpagesAllocator, PhysicalFrame};
pub use layout::{
    KERNEL_DIRECT_MAP, L1_ENTRIES, L2_ENTRIES, PAGE_SIZE, STACK_BASE, STACK_PAGES, USER_STACK_TOP,
};
pub use numbers::{FrameNumber, PageNumber};
pub use page_table::{PageEntry, PageFlags, PageIndex, PageTable};
pub use region::{Permissions, Region, RegionList};
pub use tlb::{
    InterruptControl, InterruptGuard, Mmu, Shootdown, TlbEntry, TlbFlags, TranslationCache,
    tlb_shootdown,
};

/// Initializes the virtual-memory subsystem.
///
/// Registers the translator used to reach physical frames from the kernel and the frame
/// allocator every page table draws from. Must be called once, before the first address
/// space is created.
///
/// # Panics
///
/// Panics if either binding has already been registered in a kernel build.
pub fn bootstrap(translator: AddressTranslator, frames: &'static dyn FrameAllocator) {
    AddressTranslator::set_current(translator);
    frame::set_allocator(frames);

    log::info!(
        "vm: {} byte pages, {}x{} page table, user stack {:#x}..{:#x}",
        PAGE_SIZE,
        L1_ENTRIES,
        L2_ENTRIES,
        STACK_BASE,
        USER_STACK_TOP
    );
}
