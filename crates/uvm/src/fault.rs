//! Page-fault resolution.
//!
//! A translation miss is resolved synchronously: find the region containing the address,
//! make sure a leaf table and a frame back the page, and install the translation. Frames
//! are allocated on first touch only; re-faulting a mapped page reuses its frame.

use crate::{
    AddressSpace, InterruptControl, Mmu, TlbEntry, TranslationCache, VirtualAddress, VmError,
    layout::PAGE_SIZE, page_table::PageIndex,
};

/// What the faulting access tried to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum FaultKind {
    /// A read missed the translation cache.
    Read = 0,
    /// A write missed the translation cache.
    Write = 1,
    /// A write hit a translation that is not writable.
    ReadOnly = 2,
}

impl TryFrom<u32> for FaultKind {
    type Error = VmError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FaultKind::Read),
            1 => Ok(FaultKind::Write),
            2 => Ok(FaultKind::ReadOnly),
            _ => Err(VmError::InvalidArgument),
        }
    }
}

impl<C: TranslationCache, I: InterruptControl> Mmu<C, I> {
    /// Resolves a page fault at `address` in `space`.
    ///
    /// `space` is the faulting thread's address space, or None for a kernel thread. On
    /// success a translation for the page has been installed and the faulting instruction
    /// can be retried. Writes to read-only pages are never resolved.
    pub fn handle_fault(
        &mut self,
        space: Option<&mut AddressSpace>,
        kind: FaultKind,
        address: VirtualAddress,
    ) -> Result<(), VmError> {
        let Some(space) = space else {
            return Err(VmError::BadAddress);
        };
        if address.is_null() {
            return Err(VmError::BadAddress);
        }
        if kind == FaultKind::ReadOnly {
            log::trace!("fault: write to read-only page at {}", address);
            return Err(VmError::ProtectionViolation);
        }

        let page_addr = address.align_down(PAGE_SIZE);
        let writable = match space.find_region(page_addr) {
            Some(region) => region.is_writable(),
            None => {
                log::trace!("fault: {:?} at {} outside every region", kind, address);
                return Err(VmError::BadAddress);
            }
        };

        let index = PageIndex::from(page_addr);
        let page = index.page();
        let page_table = space.page_table_mut();
        let new_leaf = !page_table.has_leaf(index.l1);
        page_table
            .ensure_leaf(index.l1)
            .map_err(out_of_memory(address))?;

        let entry = match page_table.lookup(index) {
            Some(entry) => TlbEntry::new(page, entry.frame_number(), entry.is_dirty()),
            None => match page_table.insert(index, writable) {
                Ok(entry) => TlbEntry::new(page, entry.frame_number(), entry.is_dirty()),
                Err(err) => {
                    // A leaf exists only once a page in it has been faulted in.
                    if new_leaf {
                        page_table.remove_leaf(index.l1);
                    }
                    return Err(out_of_memory(address)(err));
                }
            },
        };

        self.install(entry);
        log::trace!("fault: {:?} at {} resolved", kind, address);
        Ok(())
    }

    /// Resolves a fault reported by the trap dispatcher in raw form.
    ///
    /// Validates the fault code and the address before handing off to
    /// [`Mmu::handle_fault`].
    pub fn handle_trap(
        &mut self,
        space: Option<&mut AddressSpace>,
        raw_kind: u32,
        raw_address: usize,
    ) -> Result<(), VmError> {
        if raw_address == 0 || space.is_none() {
            return Err(VmError::BadAddress);
        }
        let kind = FaultKind::try_from(raw_kind)?;
        let address = VirtualAddress::try_new(raw_address).ok_or(VmError::BadAddress)?;
        self.handle_fault(space, kind, address)
    }
}

fn out_of_memory(address: VirtualAddress) -> impl Fn(VmError) -> VmError {
    move |err| {
        log::warn!("fault: {} resolving {}", err, address);
        err
    }
}
