//! Translation cache and interrupt-priority seams.
//!
//! The translation cache (TLB) is a small, processor-local, software-managed array of
//! virtual-to-physical translations. Its contents are derived entirely from page tables
//! and can be thrown away at any time. Every edit to it happens with interrupts disabled
//! so that an interrupt can never observe a half-written slot.

use bitflags::bitflags;

use crate::{AddressSpace, FrameNumber, PageNumber, layout::PAGE_SHIFT};

bitflags! {
    /// Flag bits in the low word of a translation cache entry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TlbFlags: u32 {
        /// The translation may be used for writes.
        const DIRTY = 0x400;
        /// The translation may be used at all.
        const VALID = 0x200;
    }
}

/// A single translation cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TlbEntry {
    page: PageNumber,
    frame: FrameNumber,
    flags: TlbFlags,
}

impl TlbEntry {
    /// Mask of the page/frame number bits in either word.
    const NUMBER_MASK: u32 = 0xFFFF_F000;

    /// Page number used to build invalid entries; lies in the kernel segment, where user
    /// lookups never land.
    const INVALID_PAGE_BASE: u32 = 0x80000;

    /// Creates a valid entry mapping `page` to `frame`, writable if `dirty` is set.
    pub fn new(page: PageNumber, frame: FrameNumber, dirty: bool) -> Self {
        let mut flags = TlbFlags::VALID;
        flags.set(TlbFlags::DIRTY, dirty);
        Self { page, frame, flags }
    }

    /// Decodes an entry from its hardware words, returning None if the entry is invalid.
    pub fn from_words(entry_hi: u32, entry_lo: u32) -> Option<Self> {
        let flags = TlbFlags::from_bits_truncate(entry_lo);
        if !flags.contains(TlbFlags::VALID) {
            return None;
        }
        Some(Self {
            page: PageNumber::new((entry_hi >> PAGE_SHIFT) as usize),
            frame: FrameNumber::new(((entry_lo & Self::NUMBER_MASK) >> PAGE_SHIFT) as usize),
            flags,
        })
    }

    /// Returns the high word naming an invalidated `slot`.
    ///
    /// Each slot gets a distinct address so no two slots ever match the same lookup.
    pub const fn invalid_hi(slot: usize) -> u32 {
        (Self::INVALID_PAGE_BASE + slot as u32) << PAGE_SHIFT
    }

    /// Returns the high (virtual page) word of this entry.
    pub fn entry_hi(&self) -> u32 {
        (self.page.as_usize() as u32) << PAGE_SHIFT
    }

    /// Returns the low (physical frame and flags) word of this entry.
    pub fn entry_lo(&self) -> u32 {
        ((self.frame.as_usize() as u32) << PAGE_SHIFT) | self.flags.bits()
    }

    /// Returns the virtual page this entry translates.
    pub fn page(&self) -> PageNumber {
        self.page
    }

    /// Returns the frame the page translates to.
    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Returns the low-word flag bits.
    pub fn flags(&self) -> TlbFlags {
        self.flags
    }

    /// Returns whether the translation permits writes.
    pub fn is_dirty(&self) -> bool {
        self.flags.contains(TlbFlags::DIRTY)
    }
}

/// Driver for the processor's translation cache.
pub trait TranslationCache {
    /// Number of slots in the cache.
    const SLOTS: usize;

    /// Writes `entry` into `slot`.
    fn write(&mut self, slot: usize, entry: TlbEntry);

    /// Invalidates `slot`.
    fn invalidate(&mut self, slot: usize);

    /// Writes `entry` into a slot of the hardware's choosing.
    fn random_replace(&mut self, entry: TlbEntry);
}

/// The interrupt-priority primitive.
///
/// `raise` disables interrupts and returns the previous level; `restore` puts that level
/// back. Calls must pair on every exit path, which [`InterruptGuard`] takes care of.
pub trait InterruptControl {
    /// Saved interrupt level.
    type Level: Copy;

    /// Disables interrupts, returning the previous level.
    fn raise(&self) -> Self::Level;

    /// Restores a level previously returned by [`InterruptControl::raise`].
    fn restore(&self, previous: Self::Level);
}

/// Keeps interrupts disabled until dropped.
pub struct InterruptGuard<'a, I: InterruptControl> {
    control: &'a I,
    previous: I::Level,
}

impl<'a, I: InterruptControl> InterruptGuard<'a, I> {
    /// Disables interrupts for the lifetime of the returned guard.
    pub fn raise(control: &'a I) -> Self {
        let previous = control.raise();
        Self { control, previous }
    }
}

impl<I: InterruptControl> Drop for InterruptGuard<'_, I> {
    fn drop(&mut self) {
        self.control.restore(self.previous);
    }
}

/// The processor-local half of the virtual-memory system.
///
/// Owns the translation cache driver and the interrupt primitive guarding it. Fault
/// resolution, activation and the end of program loading all go through here.
pub struct Mmu<C: TranslationCache, I: InterruptControl> {
    cache: C,
    interrupts: I,
}

impl<C: TranslationCache, I: InterruptControl> Mmu<C, I> {
    /// Wraps a cache driver and the interrupt primitive that guards it.
    pub fn new(cache: C, interrupts: I) -> Self {
        Self { cache, interrupts }
    }

    /// Returns the translation cache driver.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Returns the interrupt primitive.
    pub fn interrupts(&self) -> &I {
        &self.interrupts
    }

    /// Installs one translation into a slot chosen by the hardware.
    pub fn install(&mut self, entry: TlbEntry) {
        let _guard = InterruptGuard::raise(&self.interrupts);
        self.cache.random_replace(entry);
        log::trace!(
            "tlb: installed {} -> {}{}",
            entry.page(),
            entry.frame(),
            if entry.is_dirty() { " (rw)" } else { " (ro)" }
        );
    }

    /// Invalidates every slot of the translation cache.
    pub fn invalidate_all(&mut self) {
        let _guard = InterruptGuard::raise(&self.interrupts);
        for slot in 0..C::SLOTS {
            self.cache.invalidate(slot);
        }
        log::trace!("tlb: flushed {} slots", C::SLOTS);
    }

    /// Makes `space` the address space translated by this processor.
    ///
    /// Whatever ran here before may have left translations behind, so the whole cache is
    /// flushed. Kernel threads run without an address space; for them the cache is left
    /// alone.
    pub fn activate(&mut self, space: Option<&AddressSpace>) {
        if space.is_none() {
            return;
        }
        self.invalidate_all();
    }

    /// Called when a thread leaves its address space.
    ///
    /// Nothing to do: stale translations are flushed by the next activation.
    pub fn deactivate(&mut self) {}
}

/// A request to invalidate translations on another processor.
#[derive(Debug)]
pub struct Shootdown {
    /// The processor the request targets.
    pub target_cpu: usize,
}

/// Handles a translation cache shootdown from another processor.
///
/// # Panics
///
/// Always. The system runs on a single processor, so a shootdown means the kernel is
/// misconfigured.
pub fn tlb_shootdown(request: &Shootdown) -> ! {
    panic!(
        "vm tried to do tlb shootdown?! (target cpu {})",
        request.target_cpu
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::software::{SoftInterrupts, SoftTlb};
    use crate::testing;

    #[test]
    fn entry_words_round_trip() {
        let entry = TlbEntry::new(PageNumber::new(0x400), FrameNumber::new(0x1F), true);

        assert_eq!(entry.entry_hi(), 0x0040_0000);
        assert_eq!(entry.entry_lo(), 0x0001_F000 | 0x400 | 0x200);
        assert_eq!(
            TlbEntry::from_words(entry.entry_hi(), entry.entry_lo()),
            Some(entry)
        );
    }

    #[test]
    fn invalid_words_decode_to_none() {
        assert_eq!(TlbEntry::from_words(TlbEntry::invalid_hi(3), 0), None);
        assert_ne!(TlbEntry::invalid_hi(3), TlbEntry::invalid_hi(4));
    }

    #[test]
    fn guard_restores_previous_level() {
        let interrupts = SoftInterrupts::new();
        {
            let _outer = InterruptGuard::raise(&interrupts);
            {
                let _inner = InterruptGuard::raise(&interrupts);
                assert!(!interrupts.are_enabled());
            }
            // The inner guard restores "disabled", not "enabled".
            assert!(!interrupts.are_enabled());
        }
        assert!(interrupts.are_enabled());
        assert_eq!(interrupts.raises(), 2);
    }

    #[test]
    fn install_writes_with_interrupts_disabled() {
        let mut mmu = Mmu::new(SoftTlb::new(), SoftInterrupts::new());
        let entry = TlbEntry::new(PageNumber::new(1), FrameNumber::new(2), false);

        mmu.install(entry);

        assert_eq!(mmu.cache().lookup(PageNumber::new(1)), Some(entry));
        assert_eq!(mmu.interrupts().raises(), 1);
        assert!(mmu.interrupts().are_enabled());
    }

    #[test]
    fn invalidate_all_empties_cache() {
        let mut mmu = Mmu::new(SoftTlb::new(), SoftInterrupts::new());
        for page in 0..10 {
            mmu.install(TlbEntry::new(
                PageNumber::new(page),
                FrameNumber::new(page + 100),
                true,
            ));
        }
        assert_eq!(mmu.cache().valid_entries(), 10);

        mmu.invalidate_all();

        assert_eq!(mmu.cache().valid_entries(), 0);
        assert!(mmu.interrupts().are_enabled());
    }

    #[test]
    fn activate_flushes_only_for_user_spaces() {
        testing::setup();
        let mut mmu = Mmu::new(SoftTlb::new(), SoftInterrupts::new());
        let entry = TlbEntry::new(PageNumber::new(5), FrameNumber::new(6), true);
        mmu.install(entry);

        mmu.activate(None);
        assert_eq!(mmu.cache().lookup(PageNumber::new(5)), Some(entry));

        let space = AddressSpace::new().unwrap();
        mmu.activate(Some(&space));
        assert_eq!(mmu.cache().lookup(PageNumber::new(5)), None);

        mmu.deactivate();
        assert_eq!(mmu.cache().valid_entries(), 0);
    }

    #[test]
    #[should_panic(expected = "tlb shootdown")]
    fn shootdown_is_fatal() {
        tlb_shootdown(&Shootdown { target_cpu: 1 });
    }
}
