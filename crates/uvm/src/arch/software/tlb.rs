//! Software model of a 64-slot software-managed translation cache.

use crate::{PageNumber, TlbEntry, TranslationCache};

/// Number of slots in the emulated translation cache.
const SLOT_COUNT: usize = 64;

/// An emulated translation cache.
///
/// Slots hold raw hardware words exactly as a real driver would write them. Replacement
/// follows a free-running "random" register that counts down through the slots.
pub struct SoftTlb {
    hi: [u32; SLOT_COUNT],
    lo: [u32; SLOT_COUNT],
    random: usize,
    writes: usize,
}

impl SoftTlb {
    /// Creates a cache with every slot invalid.
    pub fn new() -> Self {
        let mut tlb = Self {
            hi: [0; SLOT_COUNT],
            lo: [0; SLOT_COUNT],
            random: SLOT_COUNT - 1,
            writes: 0,
        };
        for slot in 0..SLOT_COUNT {
            tlb.hi[slot] = TlbEntry::invalid_hi(slot);
        }
        tlb
    }

    /// Returns the valid entry translating `page`, if one is cached.
    pub fn lookup(&self, page: PageNumber) -> Option<TlbEntry> {
        (0..SLOT_COUNT)
            .filter_map(|slot| self.entry(slot))
            .find(|entry| entry.page() == page)
    }

    /// Returns the valid entry in `slot`, if any.
    pub fn entry(&self, slot: usize) -> Option<TlbEntry> {
        TlbEntry::from_words(self.hi[slot], self.lo[slot])
    }

    /// Returns the number of slots holding a valid entry.
    pub fn valid_entries(&self) -> usize {
        (0..SLOT_COUNT)
            .filter(|&slot| self.entry(slot).is_some())
            .count()
    }

    /// Returns the number of entries written (not counting invalidations).
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl Default for SoftTlb {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationCache for SoftTlb {
    const SLOTS: usize = SLOT_COUNT;

    fn write(&mut self, slot: usize, entry: TlbEntry) {
        self.hi[slot] = entry.entry_hi();
        self.lo[slot] = entry.entry_lo();
        self.writes += 1;
    }

    fn invalidate(&mut self, slot: usize) {
        self.hi[slot] = TlbEntry::invalid_hi(slot);
        self.lo[slot] = 0;
    }

    fn random_replace(&mut self, entry: TlbEntry) {
        let slot = self.random;
        self.random = slot.checked_sub(1).unwrap_or(SLOT_COUNT - 1);
        self.write(slot, entry);
    }
}
