//! Two-level page tables.
//!
//! A [`PageTable`] is a fixed-size directory of [`L1_ENTRIES`] slots, each of which may
//! hold a leaf table of [`L2_ENTRIES`] entries. Leaf tables are allocated the first time a
//! page in their range is faulted in, so the memory spent on a sparse address space is
//! proportional to the ranges actually touched.
//!
//! A leaf slot is either empty or holds a [`PageEntry`] that owns its physical frame.
//! Dropping the table (or a leaf, or an entry) returns every frame it owns.

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use crate::{
    FrameNumber, PageNumber, PhysicalAddress, PhysicalFrame, VirtualAddress, VmError,
    layout::{L1_ENTRIES, L1_SHIFT, L2_ENTRIES, PAGE_SHIFT},
};

/// Allocates a boxed slice of `len` empty slots without aborting on exhaustion.
fn try_empty_slots<T>(len: usize) -> Result<Box<[Option<T>]>, VmError> {
    let mut slots = Vec::new();
    slots.try_reserve_exact(len)?;
    slots.resize_with(len, || None);
    Ok(slots.into_boxed_slice())
}

/// The pair of table indices a virtual page resolves through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageIndex {
    /// Index into the top-level directory.
    pub l1: usize,
    /// Index into the leaf table.
    pub l2: usize,
}

impl PageIndex {
    /// Creates an index pair.
    ///
    /// # Panics
    ///
    /// Panics if either index is out of range.
    pub fn new(l1: usize, l2: usize) -> Self {
        assert!(l1 < L1_ENTRIES, "level-1 index out of range");
        assert!(l2 < L2_ENTRIES, "level-2 index out of range");
        Self { l1, l2 }
    }

    /// Returns the page this index pair names.
    pub fn page(self) -> PageNumber {
        PageNumber::new(self.l1 * L2_ENTRIES + self.l2)
    }
}

impl From<VirtualAddress> for PageIndex {
    fn from(addr: VirtualAddress) -> Self {
        let addr = addr.as_usize();
        Self {
            l1: addr >> L1_SHIFT,
            l2: (addr >> PAGE_SHIFT) & (L2_ENTRIES - 1),
        }
    }
}

impl From<PageNumber> for PageIndex {
    fn from(page: PageNumber) -> Self {
        Self::from(page.start())
    }
}

/// Status flags of a page table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageFlags(u8);

impl PageFlags {
    /// The mapping may be used.
    const VALID: u8 = 1 << 0;

    /// The mapping may be written.
    const DIRTY: u8 = 1 << 1;

    /// Creates empty page flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Returns whether the valid bit is set.
    pub fn is_valid(self) -> bool {
        (self.0 & Self::VALID) != 0
    }

    /// Sets or clears the valid bit.
    pub fn set_valid(&mut self, valid: bool) {
        if valid {
            self.0 |= Self::VALID;
        } else {
            self.0 &= !Self::VALID;
        }
    }

    /// Returns whether the dirty (writable) bit is set.
    pub fn is_dirty(self) -> bool {
        (self.0 & Self::DIRTY) != 0
    }

    /// Sets or clears the dirty (writable) bit.
    pub fn set_dirty(&mut self, dirty: bool) {
        if dirty {
            self.0 |= Self::DIRTY;
        } else {
            self.0 &= !Self::DIRTY;
        }
    }
}

/// A populated leaf entry: one physical frame plus its flags.
#[derive(Debug)]
pub struct PageEntry {
    frame: PhysicalFrame,
    flags: PageFlags,
}

impl PageEntry {
    fn new(frame: PhysicalFrame, dirty: bool) -> Self {
        let mut flags = PageFlags::empty();
        flags.set_valid(true);
        flags.set_dirty(dirty);
        Self { frame, flags }
    }

    /// Returns the frame backing this page.
    pub fn frame(&self) -> &PhysicalFrame {
        &self.frame
    }

    /// Returns the frame backing this page for writing.
    pub fn frame_mut(&mut self) -> &mut PhysicalFrame {
        &mut self.frame
    }

    /// Returns the number of the frame backing this page.
    pub fn frame_number(&self) -> FrameNumber {
        self.frame.number()
    }

    /// Returns the entry's flags.
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Returns whether this page may be written.
    pub fn is_dirty(&self) -> bool {
        self.flags.is_dirty()
    }

    /// Grants or revokes write access to this page.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.flags.set_dirty(dirty);
    }
}

struct LeafTable {
    entries: Box<[Option<PageEntry>]>,
}

impl LeafTable {
    fn new() -> Result<Self, VmError> {
        Ok(Self {
            entries: try_empty_slots(L2_ENTRIES)?,
        })
    }
}

/// A sparse two-level page table.
pub struct PageTable {
    directory: Box<[Option<LeafTable>]>,
}

impl PageTable {
    /// Creates a page table with an empty directory and no leaf tables.
    pub fn new() -> Result<Self, VmError> {
        Ok(Self {
            directory: try_empty_slots(L1_ENTRIES)?,
        })
    }

    /// Returns whether a leaf table exists for directory slot `l1`.
    pub fn has_leaf(&self, l1: usize) -> bool {
        self.directory[l1].is_some()
    }

    /// Allocates an empty leaf table for directory slot `l1`.
    ///
    /// An existing leaf in that slot is replaced, releasing every frame it owns; callers
    /// that mean "make sure a leaf exists" want [`PageTable::ensure_leaf`].
    pub fn create_leaf(&mut self, l1: usize) -> Result<(), VmError> {
        debug_assert!(!self.has_leaf(l1), "leaf table {} already exists", l1);
        self.directory[l1] = Some(LeafTable::new()?);
        Ok(())
    }

    /// Allocates a leaf table for directory slot `l1` unless one already exists.
    pub fn ensure_leaf(&mut self, l1: usize) -> Result<(), VmError> {
        if !self.has_leaf(l1) {
            self.create_leaf(l1)?;
        }
        Ok(())
    }

    /// Removes the leaf table for directory slot `l1`, releasing every frame it owns.
    pub fn remove_leaf(&mut self, l1: usize) {
        self.directory[l1] = None;
    }

    /// Backs the page at `index` with a freshly zeroed frame.
    ///
    /// The leaf table must already exist. Whatever the entry held before is released.
    ///
    /// # Panics
    ///
    /// Panics if no leaf table exists for `index.l1`.
    pub fn insert(&mut self, index: PageIndex, dirty: bool) -> Result<&mut PageEntry, VmError> {
        let leaf = self.directory[index.l1]
            .as_mut()
            .expect("insert into missing leaf table");
        let frame = PhysicalFrame::allocate_zeroed()?;
        Ok(leaf.entries[index.l2].insert(PageEntry::new(frame, dirty)))
    }

    /// Returns the entry at `index`, if the page is mapped.
    pub fn lookup(&self, index: PageIndex) -> Option<&PageEntry> {
        self.directory[index.l1].as_ref()?.entries[index.l2].as_ref()
    }

    /// Returns the entry at `index` for modification, if the page is mapped.
    pub fn lookup_mut(&mut self, index: PageIndex) -> Option<&mut PageEntry> {
        self.directory[index.l1].as_mut()?.entries[index.l2].as_mut()
    }

    /// Returns the physical address `addr` currently translates to.
    pub fn translate(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        let entry = self.lookup(PageIndex::from(addr))?;
        Some(entry.frame().address() + addr.page_offset())
    }

    /// Deep-copies every mapping of this table into `dest`.
    ///
    /// Each populated page gets a new frame holding a copy of the source page and the
    /// source entry's dirty bit; no frame is ever shared. If any allocation fails, `dest`
    /// is emptied before the error is returned.
    pub fn copy_into(&self, dest: &mut PageTable) -> Result<(), VmError> {
        let result = self.copy_entries(dest);
        if result.is_err() {
            dest.clear();
        }
        result
    }

    fn copy_entries(&self, dest: &mut PageTable) -> Result<(), VmError> {
        for (l1, slot) in self.directory.iter().enumerate() {
            let Some(source_leaf) = slot else {
                continue;
            };
            dest.ensure_leaf(l1)?;
            let Some(dest_leaf) = dest.directory[l1].as_mut() else {
                continue;
            };

            for (l2, entry) in source_leaf.entries.iter().enumerate() {
                let Some(entry) = entry else {
                    continue;
                };
                let frame = PhysicalFrame::allocate_copy(entry.frame())?;
                dest_leaf.entries[l2] = Some(PageEntry::new(frame, entry.is_dirty()));
            }
        }
        Ok(())
    }

    /// Returns an independent deep copy of this table.
    pub fn try_clone(&self) -> Result<PageTable, VmError> {
        let mut copy = PageTable::new()?;
        self.copy_into(&mut copy)?;
        Ok(copy)
    }

    /// Releases every frame and every leaf table, leaving an empty directory.
    pub fn clear(&mut self) {
        for slot in self.directory.iter_mut() {
            slot.take();
        }
    }

    /// Iterates over every mapped page.
    pub fn entries(&self) -> impl Iterator<Item = (PageNumber, &PageEntry)> + '_ {
        self.directory
            .iter()
            .enumerate()
            .filter_map(|(l1, slot)| slot.as_ref().map(|leaf| (l1, leaf)))
            .flat_map(|(l1, leaf)| {
                leaf.entries
                    .iter()
                    .enumerate()
                    .filter_map(move |(l2, entry)| {
                        entry
                            .as_ref()
                            .map(|entry| (PageIndex { l1, l2 }.page(), entry))
                    })
            })
    }

    /// Iterates over every mapped page for modification.
    pub fn entries_mut(&mut self) -> impl Iterator<Item = (PageNumber, &mut PageEntry)> + '_ {
        self.directory
            .iter_mut()
            .enumerate()
            .filter_map(|(l1, slot)| slot.as_mut().map(|leaf| (l1, leaf)))
            .flat_map(|(l1, leaf)| {
                leaf.entries
                    .iter_mut()
                    .enumerate()
                    .filter_map(move |(l2, entry)| {
                        entry
                            .as_mut()
                            .map(|entry| (PageIndex { l1, l2 }.page(), entry))
                    })
            })
    }

    /// Returns the number of mapped pages.
    pub fn mapped_pages(&self) -> usize {
        self.entries().count()
    }

    /// Returns the number of leaf tables allocated.
    pub fn leaf_count(&self) -> usize {
        self.directory.iter().filter(|slot| slot.is_some()).count()
    }
}

impl fmt::Debug for PageTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageTable")
            .field("leaf_tables", &self.leaf_count())
            .field("mapped_pages", &self.mapped_pages())
            .finish()
    }
}
