use crate::mmap::Mmap;
use crate::space::RegionBounds;
use crate::util::Word;
use crate::value::{Address, Space};
use std::io;

/// Contiguous region filled front to back. Backs both old semispaces.
pub struct BumpPointerSpace {
    space: Space,
    mmap: Mmap,
    cursor: usize,
}

impl BumpPointerSpace {
    pub fn new(space: Space, words: usize) -> io::Result<Self> {
        Ok(Self {
            space,
            mmap: Mmap::new(words)?,
            cursor: 0,
        })
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn capacity(&self) -> usize {
        self.mmap.len()
    }

    /// Words in use. Objects occupy `[0, cursor)` back to back.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn free(&self) -> usize {
        self.capacity() - self.cursor
    }

    /// `addr` points at allocated words of this region.
    pub fn contains(&self, addr: Address) -> bool {
        addr.space() == self.space && addr.offset() < self.cursor
    }

    #[inline]
    pub fn bump_alloc(&mut self, words: usize) -> Option<Address> {
        let new = self.cursor.checked_add(words)?;
        if new > self.capacity() {
            return None;
        }
        let old = self.cursor;
        self.cursor = new;
        Some(Address::new(self.space, old))
    }

    /// Free tail of the region, where the next object will be copied.
    pub fn tail_mut(&mut self) -> &mut [Word] {
        let cursor = self.cursor;
        &mut self.mmap.words_mut()[cursor..]
    }

    pub fn words(&self) -> &[Word] {
        self.mmap.words()
    }

    pub fn words_mut(&mut self) -> &mut [Word] {
        self.mmap.words_mut()
    }

    pub fn bounds(&self) -> RegionBounds {
        RegionBounds {
            low: Address::new(self.space, 0),
            cur: Address::new(self.space, self.cursor),
            high: Address::new(self.space, self.capacity()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumps_until_full() {
        let mut space = BumpPointerSpace::new(Space::OldA, 16).unwrap();
        let a = space.bump_alloc(10).unwrap();
        assert_eq!(a, Address::new(Space::OldA, 0));
        assert!(space.contains(a.add(9)));
        assert!(!space.contains(a.add(10)));
        assert_eq!(space.bump_alloc(7), None);
        assert_eq!(space.bump_alloc(6), Some(Address::new(Space::OldA, 10)));
        assert_eq!(space.free(), 0);
        assert!(!space.contains(Address::new(Space::OldB, 0)));
    }
}
