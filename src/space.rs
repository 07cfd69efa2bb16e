use crate::bump_pointer_space::BumpPointerSpace;
use crate::error::FatalMode;
use crate::fixed_space::FixedSpace;
use crate::nursery::Nursery;
use crate::util::Word;
use crate::value::{Address, Space, Value, ValueKind};

/// `[low, cur)` is allocated, `[cur, high)` is free.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RegionBounds {
    pub low: Address,
    pub cur: Address,
    pub high: Address,
}

impl RegionBounds {
    pub fn contains(&self, addr: Address) -> bool {
        addr >= self.low && addr < self.cur
    }
}

/// Every region of a heap plus the per collection state the forwarding code needs.
pub struct Regions {
    pub nursery: Nursery,
    pub old: BumpPointerSpace,
    /// Destination of a running full collection.
    pub to_space: Option<BumpPointerSpace>,
    pub fixed: FixedSpace,
    /// Fixed objects marked but not scanned yet.
    pub fixed_worklist: Vec<usize>,
    /// Words copied by the running collection.
    pub copied: usize,
    pub fatal: FatalMode,
}

impl Regions {
    pub fn is_full(&self) -> bool {
        self.to_space.is_some()
    }

    /// Old space holding `space`, the to-space included.
    fn old_space(&self, space: Space) -> Option<&BumpPointerSpace> {
        if self.old.space() == space {
            Some(&self.old)
        } else {
            self.to_space.as_ref().filter(|to| to.space() == space)
        }
    }

    fn old_space_mut(&mut self, space: Space) -> Option<&mut BumpPointerSpace> {
        if self.old.space() == space {
            Some(&mut self.old)
        } else {
            self.to_space.as_mut().filter(|to| to.space() == space)
        }
    }

    /// Word at `addr`. Birth words stay readable after the region is reset, so tombstones of
    /// promoted objects can still be followed.
    pub fn word(&self, addr: Address) -> Option<Word> {
        let offset = addr.offset();
        match addr.space() {
            Space::Birth => self.nursery.words().get(offset).copied(),
            Space::Fixed => self.fixed.words().get(offset).copied(),
            old => {
                let space = self.old_space(old)?;
                (offset < space.cursor()).then(|| space.words()[offset])
            }
        }
    }

    /// Writable word at `addr`. Birth words under the store buffer, allocated old words, and the
    /// fixed arena.
    pub fn word_mut(&mut self, addr: Address) -> Option<&mut Word> {
        let offset = addr.offset();
        match addr.space() {
            Space::Birth => {
                let limit = self.nursery.writable();
                self.nursery.words_mut()[..limit].get_mut(offset)
            }
            Space::Fixed => self.fixed.words_mut().get_mut(offset),
            old => {
                let space = self.old_space_mut(old)?;
                if offset < space.cursor() {
                    space.words_mut().get_mut(offset)
                } else {
                    None
                }
            }
        }
    }

    /// `len` words starting at `addr`.
    pub fn slice(&self, addr: Address, len: usize) -> Option<&[Word]> {
        let offset = addr.offset();
        let end = offset.checked_add(len)?;
        match addr.space() {
            Space::Birth => self.nursery.words().get(offset..end),
            Space::Fixed => self.fixed.words().get(offset..end),
            old => {
                let space = self.old_space(old)?;
                if end <= space.cursor() {
                    space.words().get(offset..end)
                } else {
                    None
                }
            }
        }
    }

    pub fn classify(&self, value: Value) -> ValueKind {
        if value.is_null() {
            return ValueKind::Null;
        }
        if let Some(n) = value.as_integer() {
            return ValueKind::Integer(n);
        }
        let Some(addr) = value.as_address() else {
            return ValueKind::Foreign(value.raw());
        };
        match addr.space() {
            Space::Birth if self.nursery.contains(addr) => ValueKind::Birth(addr),
            Space::Fixed if self.fixed.object_containing(addr.offset()).is_some() => {
                ValueKind::Fixed(addr)
            }
            space if space.is_old() && self.old.contains(addr) => ValueKind::Old(addr),
            _ => ValueKind::Foreign(value.raw()),
        }
    }

    /// Chase tombstones left in the birth region by the last minor collection.
    pub fn follow_forwards(&self, mut value: Value) -> Value {
        while let Some(addr) = value.as_address() {
            if addr.space() != Space::Birth {
                break;
            }
            match self.slice(addr, 2) {
                Some(&[0, forward]) if forward != 0 => value = Value::from_raw(forward),
                _ => break,
            }
        }
        value
    }
}
