//! Regions of a user address space.
//!
//! A region is a page-aligned span of virtual addresses with uniform access permissions:
//! a program segment, the heap, or the stack. Regions are defined by the program loader
//! before anything is faulted in.
//!
//! Overlapping definitions are accepted. When several regions contain an address, the
//! one defined most recently decides how the address is treated.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::{
    VirtualAddress, VmError,
    layout::{PAGE_SIZE, STACK_BASE, STACK_PAGES, USER_STACK_TOP},
};

bitflags! {
    /// Access permissions of a region.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Permissions: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
    }
}

impl Permissions {
    /// Builds a permission set from individual flags.
    pub fn from_flags(readable: bool, writable: bool, executable: bool) -> Self {
        let mut permissions = Self::empty();
        permissions.set(Self::READ, readable);
        permissions.set(Self::WRITE, writable);
        permissions.set(Self::EXECUTE, executable);
        permissions
    }
}

/// A contiguous, page-aligned span of a user address space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    base: VirtualAddress,
    size: usize,
    page_count: usize,
    /// Permissions currently in force.
    permissions: Permissions,
    /// Permissions the region was defined with.
    requested: Permissions,
}

impl Region {
    fn new(base: VirtualAddress, size: usize, permissions: Permissions) -> Self {
        debug_assert!(base.is_aligned(PAGE_SIZE) && size % PAGE_SIZE == 0);
        Self {
            base,
            size,
            page_count: size / PAGE_SIZE,
            permissions,
            requested: permissions,
        }
    }

    /// Returns the first address of this region.
    pub fn base(&self) -> VirtualAddress {
        self.base
    }

    /// Returns the size of this region in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the first address past the end of this region.
    pub fn end(&self) -> VirtualAddress {
        self.base + self.size
    }

    /// Returns the number of pages this region spans.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Returns the permissions currently in force.
    pub fn permissions(&self) -> Permissions {
        self.permissions
    }

    /// Returns the permissions the region was defined with.
    pub fn requested(&self) -> Permissions {
        self.requested
    }

    /// Returns true if the permissions in force allow writes.
    pub fn is_writable(&self) -> bool {
        self.permissions.contains(Permissions::WRITE)
    }

    /// Returns true if `addr` lies inside this region.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// Returns true if this region shares any address with `other`.
    pub fn overlaps(&self, other: &Region) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// The regions of one address space, in definition order.
#[derive(Debug, Default)]
pub struct RegionList {
    regions: Vec<Region>,
}

impl RegionList {
    /// Creates an empty region list.
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Defines a region covering `[base, base + length)`.
    ///
    /// The base is rounded down and the end rounded up to page boundaries. Fails with
    /// `InvalidArgument` if the region is empty, wraps past the top of the address space,
    /// or reaches the user stack.
    pub fn define(
        &mut self,
        base: VirtualAddress,
        length: usize,
        permissions: Permissions,
    ) -> Result<&Region, VmError> {
        if length == 0 {
            return Err(VmError::InvalidArgument);
        }
        let end = base
            .as_usize()
            .checked_add(length)
            .and_then(|end| end.checked_next_multiple_of(PAGE_SIZE))
            .ok_or(VmError::InvalidArgument)?;
        if end >= STACK_BASE {
            log::debug!(
                "vm: region {}+{:#x} collides with the stack at {:#x}",
                base,
                length,
                STACK_BASE
            );
            return Err(VmError::InvalidArgument);
        }

        let base = base.align_down(PAGE_SIZE);
        let region = Region::new(base, end - base.as_usize(), permissions);
        self.push(region)
    }

    /// Defines the fixed user stack and returns the initial stack pointer.
    ///
    /// The stack is [`STACK_PAGES`] pages of read/write memory ending at
    /// [`USER_STACK_TOP`].
    pub fn define_stack(&mut self) -> Result<VirtualAddress, VmError> {
        let region = Region::new(
            VirtualAddress::new(STACK_BASE),
            STACK_PAGES * PAGE_SIZE,
            Permissions::READ | Permissions::WRITE,
        );
        self.push(region)?;
        Ok(VirtualAddress::new(USER_STACK_TOP))
    }

    fn push(&mut self, region: Region) -> Result<&Region, VmError> {
        if let Some(existing) = self.regions.iter().find(|r| r.overlaps(&region)) {
            log::warn!(
                "vm: region {}..{} overlaps {}..{}; the newer one takes precedence",
                region.base,
                region.end(),
                existing.base,
                existing.end()
            );
        }
        log::debug!(
            "vm: defined region {}..{} ({} pages, {:?})",
            region.base,
            region.end(),
            region.page_count,
            region.permissions
        );

        self.regions.try_reserve(1)?;
        self.regions.push(region);
        Ok(&self.regions[self.regions.len() - 1])
    }

    /// Returns the region containing `addr`, preferring the most recently defined one.
    pub fn find(&self, addr: VirtualAddress) -> Option<&Region> {
        self.regions
            .iter()
            .rev()
            .find(|region| region.contains(addr))
    }

    /// Makes every region writable so the loader can fill it in.
    pub fn prepare_load(&mut self) {
        for region in self.regions.iter_mut() {
            region.permissions |= Permissions::WRITE;
        }
    }

    /// Puts back the permissions every region was defined with.
    ///
    /// Returns the number of regions whose permissions changed.
    pub fn complete_load(&mut self) -> usize {
        let mut restored = 0;
        for region in self.regions.iter_mut() {
            if region.permissions != region.requested {
                region.permissions = region.requested;
                restored += 1;
            }
        }
        restored
    }

    /// Returns an independent copy of every region.
    pub fn try_clone(&self) -> Result<RegionList, VmError> {
        let mut regions = Vec::new();
        regions.try_reserve_exact(self.regions.len())?;
        regions.extend(self.regions.iter().cloned());
        Ok(RegionList { regions })
    }

    /// Iterates over the regions, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Region> + '_ {
        self.regions.iter()
    }

    /// Returns the number of regions defined.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns true if no region has been defined.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rw() -> Permissions {
        Permissions::READ | Permissions::WRITE
    }

    #[test]
    fn define_rounds_to_pages() {
        let mut regions = RegionList::new();
        let region = regions
            .define(VirtualAddress::new(0x1010), 0x1000, rw())
            .unwrap();

        assert_eq!(region.base(), VirtualAddress::new(0x1000));
        assert_eq!(region.end(), VirtualAddress::new(0x3000));
        assert_eq!(region.page_count(), 2);
    }

    #[test]
    fn define_rejects_empty_region() {
        let mut regions = RegionList::new();
        assert_eq!(
            regions.define(VirtualAddress::new(0x1000), 0, rw()),
            Err(VmError::InvalidArgument)
        );
    }

    #[test]
    fn define_rejects_stack_collision() {
        let mut regions = RegionList::new();
        let base = VirtualAddress::new(STACK_BASE - PAGE_SIZE);

        assert_eq!(
            regions.define(base, 2 * PAGE_SIZE, rw()),
            Err(VmError::InvalidArgument)
        );
        assert_eq!(
            regions.define(base, PAGE_SIZE, rw()),
            Err(VmError::InvalidArgument)
        );
        assert!(regions.define(base, PAGE_SIZE - 1, rw()).is_err());
        assert!(regions.define(base - PAGE_SIZE, PAGE_SIZE, rw()).is_ok());
    }

    #[test]
    fn define_rejects_wrapping_region() {
        let mut regions = RegionList::new();
        assert_eq!(
            regions.define(VirtualAddress::new(0xFFFF_F000), 0x2000, rw()),
            Err(VmError::InvalidArgument)
        );
    }

    #[test]
    fn stack_pointer_is_fixed() {
        let mut regions = RegionList::new();
        regions
            .define(VirtualAddress::new(0x40_0000), 0x1000, rw())
            .unwrap();

        for _ in 0..3 {
            let sp = regions.define_stack().unwrap();
            assert_eq!(sp, VirtualAddress::new(USER_STACK_TOP));
        }

        let top = VirtualAddress::new(USER_STACK_TOP);
        let stack = regions.find(top - 1).unwrap();
        assert_eq!(stack.base(), VirtualAddress::new(STACK_BASE));
        assert_eq!(stack.end(), top);
        assert_eq!(stack.page_count(), STACK_PAGES);
        assert_eq!(stack.permissions(), rw());
    }

    #[test]
    fn find_prefers_latest_definition() {
        let mut regions = RegionList::new();
        regions
            .define(VirtualAddress::new(0x1000), 0x4000, Permissions::READ)
            .unwrap();
        regions
            .define(VirtualAddress::new(0x2000), 0x1000, rw())
            .unwrap();

        let inner = regions.find(VirtualAddress::new(0x2800)).unwrap();
        assert_eq!(inner.permissions(), rw());
        let outer = regions.find(VirtualAddress::new(0x3800)).unwrap();
        assert_eq!(outer.permissions(), Permissions::READ);
        assert!(regions.find(VirtualAddress::new(0x5000)).is_none());
    }

    #[test]
    fn load_window_restores_requested_permissions() {
        let mut regions = RegionList::new();
        let code = Permissions::READ | Permissions::EXECUTE;
        regions
            .define(VirtualAddress::new(0x40_0000), 0x3000, code)
            .unwrap();
        regions
            .define(VirtualAddress::new(0x50_0000), 0x1000, rw())
            .unwrap();

        regions.prepare_load();
        assert!(regions.iter().all(Region::is_writable));

        assert_eq!(regions.complete_load(), 1);
        let text = regions.find(VirtualAddress::new(0x40_0000)).unwrap();
        assert_eq!(text.permissions(), code);
        assert!(!text.is_writable());
    }

    #[test]
    fn clone_is_independent() {
        let mut regions = RegionList::new();
        regions
            .define(VirtualAddress::new(0x1000), 0x1000, Permissions::READ)
            .unwrap();

        let copy = regions.try_clone().unwrap();
        regions.prepare_load();

        assert_eq!(copy.len(), 1);
        assert!(!copy.iter().next().unwrap().is_writable());
    }

    proptest! {
        #[test]
        fn define_aligns_base_down_and_end_up(
            base in 0usize..0x7000_0000,
            length in 1usize..0x10_0000,
        ) {
            let mut regions = RegionList::new();
            let region = regions
                .define(VirtualAddress::new(base), length, rw())
                .unwrap()
                .clone();

            let aligned_base = base / PAGE_SIZE * PAGE_SIZE;
            let aligned_end = (base + length).div_ceil(PAGE_SIZE) * PAGE_SIZE;
            prop_assert_eq!(region.base().as_usize(), aligned_base);
            prop_assert_eq!(region.end().as_usize(), aligned_end);
            prop_assert_eq!(region.page_count(), region.size() / PAGE_SIZE);
            prop_assert!(region.contains(VirtualAddress::new(base)));
            prop_assert!(region.contains(VirtualAddress::new(base + length - 1)));
        }
    }
}
