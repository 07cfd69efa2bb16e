//! Birth region.
//!
//! New objects are bump allocated upward from the bottom of the arena. The remembered set lives
//! at the top of the same arena and grows downward: every entry is the raw address of an old or
//! fixed slot that received a reference into this region. The two meet in the middle, which is
//! when a collection is forced.
use crate::mmap::Mmap;
use crate::space::RegionBounds;
use crate::util::Word;
use crate::value::{Address, Space};
use std::io;

/// A minor collection runs once the store buffer gets this close to `cur`.
pub const STORE_BUFFER_SLACK: usize = 4;
/// Number of most recent store buffer entries checked for duplicates.
pub const DEDUP_WINDOW: usize = 3;

pub struct Nursery {
    mmap: Mmap,
    cur: usize,
    storeptr: usize,
    margin: usize,
}

impl Nursery {
    pub fn new(words: usize, margin: usize) -> io::Result<Self> {
        Ok(Self {
            mmap: Mmap::new(words)?,
            cur: 0,
            storeptr: words,
            margin,
        })
    }

    pub fn capacity(&self) -> usize {
        self.mmap.len()
    }

    pub fn cursor(&self) -> usize {
        self.cur
    }

    /// Largest single object the region can ever hold.
    pub fn max_object_words(&self) -> usize {
        self.capacity() - self.margin
    }

    /// `words` more words can be bumped without eating into the safety margin.
    #[inline(always)]
    pub fn fits(&self, words: usize) -> bool {
        self.cur + words + self.margin <= self.storeptr
    }

    /// Padding needed so that the next object starts at a multiple of `align_words`.
    pub fn padding_for(&self, align_words: usize) -> usize {
        (align_words - self.cur % align_words) % align_words
    }

    /// Caller checked [`Nursery::fits`].
    #[inline(always)]
    pub fn bump(&mut self, words: usize) -> Address {
        debug_assert!(self.cur + words <= self.storeptr);
        let old = self.cur;
        self.cur += words;
        Address::new(Space::Birth, old)
    }

    /// `addr` points at an object allocated since the last collection.
    pub fn contains(&self, addr: Address) -> bool {
        addr.space() == Space::Birth && addr.offset() < self.cur
    }

    /// Word range of the store buffer inside the arena.
    pub fn store_buffer(&self) -> std::ops::Range<usize> {
        self.storeptr..self.capacity()
    }

    pub fn remembered_len(&self) -> usize {
        self.capacity() - self.storeptr
    }

    /// `slot` is among the most recent store buffer entries.
    pub fn recently_remembered(&self, slot: Address) -> bool {
        let end = (self.storeptr + DEDUP_WINDOW).min(self.capacity());
        self.mmap.words()[self.storeptr..end].contains(&slot.raw())
    }

    /// Push `slot` on the store buffer. Returns `true` when the buffer is nearly full.
    pub fn remember(&mut self, slot: Address) -> bool {
        debug_assert!(self.storeptr > self.cur);
        self.storeptr -= 1;
        let storeptr = self.storeptr;
        self.mmap.words_mut()[storeptr] = slot.raw();
        self.storeptr - self.cur <= STORE_BUFFER_SLACK
    }

    /// Empty the region and the store buffer. Old contents, tombstones included, stay readable
    /// until overwritten by new allocations.
    pub fn reset(&mut self) {
        self.cur = 0;
        self.storeptr = self.capacity();
    }

    pub fn words(&self) -> &[Word] {
        self.mmap.words()
    }

    pub fn words_mut(&mut self) -> &mut [Word] {
        self.mmap.words_mut()
    }

    /// Words the mutator may write: everything below the store buffer.
    pub fn writable(&self) -> usize {
        self.storeptr
    }

    pub fn bounds(&self) -> RegionBounds {
        RegionBounds {
            low: Address::new(Space::Birth, 0),
            cur: Address::new(Space::Birth, self.cur),
            high: Address::new(Space::Birth, self.capacity()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_buffer_grows_down() {
        let mut nursery = Nursery::new(64, 8).unwrap();
        let a = nursery.bump(4);
        assert_eq!(a.offset(), 0);
        let slot = Address::new(Space::OldA, 3);
        assert!(!nursery.remember(slot));
        assert_eq!(nursery.store_buffer(), 63..64);
        assert_eq!(nursery.words()[63], slot.raw());
        assert!(nursery.recently_remembered(slot));
        assert!(!nursery.recently_remembered(Address::new(Space::OldA, 4)));
        nursery.reset();
        assert_eq!(nursery.remembered_len(), 0);
        assert_eq!(nursery.cursor(), 0);
    }

    #[test]
    fn reports_nearly_full_store_buffer() {
        let mut nursery = Nursery::new(32, 8).unwrap();
        nursery.bump(20);
        let mut full = false;
        let mut pushed = 0;
        while !full {
            full = nursery.remember(Address::new(Space::Fixed, pushed));
            pushed += 1;
        }
        assert_eq!(pushed, 32 - 20 - STORE_BUFFER_SLACK);
        assert!(!nursery.fits(1));
    }

    #[test]
    fn padding_aligns_cursor() {
        let mut nursery = Nursery::new(64, 8).unwrap();
        nursery.bump(3);
        assert_eq!(nursery.padding_for(4), 1);
        assert_eq!(nursery.padding_for(1), 0);
        nursery.bump(1);
        assert_eq!(nursery.padding_for(4), 0);
    }
}
