//! Address space management.
//!
//! An address space is everything the virtual-memory system knows about one process: the
//! regions the loader defined and the page table backing whichever of their pages have
//! been touched. Each process owns exactly one; `fork` gets an independent deep copy.

use crate::{
    InterruptControl, Mmu, PhysicalAddress, TranslationCache, VirtualAddress, VmError,
    page_table::PageTable,
    region::{Permissions, Region, RegionList},
};

/// A user process address space.
#[derive(Debug)]
pub struct AddressSpace {
    page_table: PageTable,
    regions: RegionList,
}

impl AddressSpace {
    /// Creates an address space with no regions and an empty page table.
    pub fn new() -> Result<Self, VmError> {
        let space = Self {
            page_table: PageTable::new()?,
            regions: RegionList::new(),
        };
        log::debug!("vm: created address space");
        Ok(space)
    }

    /// Returns an independent copy of this address space.
    ///
    /// Every mapped page is copied into a fresh frame; the two spaces never share a frame.
    /// On failure everything allocated for the copy is released and `self` is untouched.
    /// Fails with `NotLoaded` if no region was ever defined.
    pub fn try_clone(&self) -> Result<Self, VmError> {
        if self.regions.is_empty() {
            return Err(VmError::NotLoaded);
        }

        let page_table = self.page_table.try_clone()?;
        let regions = self.regions.try_clone()?;
        log::debug!(
            "vm: copied address space ({} regions, {} pages)",
            regions.len(),
            page_table.mapped_pages()
        );
        Ok(Self {
            page_table,
            regions,
        })
    }

    /// Tears down this address space, returning every frame it owns.
    pub fn destroy(self) {
        log::debug!(
            "vm: destroying address space ({} regions, {} pages)",
            self.regions.len(),
            self.page_table.mapped_pages()
        );
    }

    /// Defines a region of `length` bytes at `base`. See [`RegionList::define`].
    pub fn define_region(
        &mut self,
        base: VirtualAddress,
        length: usize,
        readable: bool,
        writable: bool,
        executable: bool,
    ) -> Result<(), VmError> {
        let permissions = Permissions::from_flags(readable, writable, executable);
        self.regions.define(base, length, permissions)?;
        Ok(())
    }

    /// Defines the user stack and returns the initial stack pointer.
    pub fn define_stack(&mut self) -> Result<VirtualAddress, VmError> {
        let sp = self.regions.define_stack()?;
        log::debug!("vm: defined user stack, sp = {}", sp);
        Ok(sp)
    }

    /// Opens the loader's write window: every region becomes writable.
    pub fn prepare_load(&mut self) {
        self.regions.prepare_load();
        log::debug!("vm: prepared {} regions for loading", self.regions.len());
    }

    /// Closes the loader's write window.
    ///
    /// Restores the permissions each region was defined with, revokes write access from
    /// pages that were faulted in during the window but now belong to a read-only region,
    /// and flushes the translation cache so no stale writable entry survives.
    pub fn complete_load<C, I>(&mut self, mmu: &mut Mmu<C, I>)
    where
        C: TranslationCache,
        I: InterruptControl,
    {
        let restored = self.regions.complete_load();

        let regions = &self.regions;
        let mut revoked = 0;
        for (page, entry) in self.page_table.entries_mut() {
            let writable = regions.find(page.start()).is_some_and(Region::is_writable);
            if entry.is_dirty() && !writable {
                entry.set_dirty(false);
                revoked += 1;
            }
        }

        mmu.invalidate_all();
        log::debug!(
            "vm: load complete, {} regions restored, {} pages made read-only",
            restored,
            revoked
        );
    }

    /// Returns the region containing `addr`.
    pub fn find_region(&self, addr: VirtualAddress) -> Option<&Region> {
        self.regions.find(addr)
    }

    /// Returns the physical address `addr` is backed by, if its page is mapped.
    pub fn translate(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        self.page_table.translate(addr)
    }

    pub fn regions(&self) -> &RegionList {
        &self.regions
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }
}
