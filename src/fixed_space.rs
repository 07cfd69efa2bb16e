//! Non-moving region.
//!
//! Payloads live in one growable word arena and never move relative to its start. Headers are
//! kept in a side table keyed by payload offset, so payload words are entirely the host's. Slots
//! are chained physically (newest to oldest) for sweeping and per size class for reuse.
//! Executable objects only differ in using their own free lists; the arena is never mapped
//! executable.
use crate::header::{Destructor, FixedHeader};
use crate::size_class::{SizeClasses, DEFAULT_PROGRESSION};
use crate::util::Word;
use crate::value::{Address, Space};
use std::collections::BTreeMap;

/// Outcome of marking a fixed reference during a full collection.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mark {
    /// First visit; the object at this payload offset needs scanning.
    New(usize),
    Already,
    /// Forgotten objects are never followed.
    Forgotten,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct SweepOutcome {
    /// Slots returned to free lists.
    pub reclaimed: usize,
    pub reclaimed_words: usize,
    /// Destructors invoked.
    pub destroyed: usize,
}

pub struct FixedSpace {
    arena: Vec<Word>,
    headers: BTreeMap<usize, FixedHeader>,
    classes: SizeClasses,
    /// Heads per size class, plain and executable.
    free: Vec<[Option<usize>; 2]>,
    last_physical: Option<usize>,
    fresh: Vec<usize>,
    live_objects: usize,
    live_words: usize,
}

impl FixedSpace {
    pub fn new() -> Self {
        let classes = SizeClasses::new(DEFAULT_PROGRESSION);
        let free = vec![[None; 2]; classes.large() + 1];
        Self {
            arena: Vec::new(),
            headers: BTreeMap::new(),
            classes,
            free,
            last_physical: None,
            fresh: Vec::new(),
            live_objects: 0,
            live_words: 0,
        }
    }

    /// Reserve a zeroed slot of at least `words` words. Returns the payload offset.
    pub fn allocate(
        &mut self,
        words: usize,
        destructor: Option<Destructor>,
        executable: bool,
    ) -> usize {
        let class = self.classes.index_for(words);
        let offset = match self.take_free(class, words, executable) {
            Some(offset) => offset,
            None => {
                let capacity = self.classes.capacity(class, words);
                let offset = self.arena.len();
                self.arena.resize(offset + capacity, 0);
                self.headers
                    .insert(offset, FixedHeader::new(class, capacity, self.last_physical));
                self.last_physical = Some(offset);
                offset
            }
        };
        if let Some(header) = self.headers.get_mut(&offset) {
            header.occupy(words, destructor, executable);
            self.live_objects += 1;
            self.live_words += header.capacity();
        }
        self.fresh.push(offset);
        offset
    }

    fn take_free(&mut self, class: usize, words: usize, executable: bool) -> Option<usize> {
        let list = executable as usize;
        let mut prev: Option<usize> = None;
        let mut cursor = self.free[class][list];
        while let Some(offset) = cursor {
            let header = self.headers.get(&offset)?;
            let next = header.next_same_size;
            let capacity = header.capacity();
            if capacity >= words {
                match prev {
                    Some(prev) => {
                        if let Some(prev) = self.headers.get_mut(&prev) {
                            prev.next_same_size = next;
                        }
                    }
                    None => self.free[class][list] = next,
                }
                self.arena[offset..offset + capacity].fill(0);
                if let Some(header) = self.headers.get_mut(&offset) {
                    header.next_same_size = None;
                }
                return Some(offset);
            }
            // Only the large class holds slots of different sizes.
            prev = Some(offset);
            cursor = next;
        }
        None
    }

    pub fn header(&self, offset: usize) -> Option<&FixedHeader> {
        self.headers.get(&offset).filter(|header| header.is_live())
    }

    /// Payload offset of the live object whose slot covers `offset`.
    pub fn object_containing(&self, offset: usize) -> Option<usize> {
        let (&start, header) = self.headers.range(..=offset).next_back()?;
        if header.is_live() && offset < start + header.capacity() {
            Some(start)
        } else {
            None
        }
    }

    /// Returns `false` unless `offset` is the payload start of a live object.
    pub fn forget(&mut self, offset: usize) -> bool {
        match self.headers.get_mut(&offset) {
            Some(header) if header.is_live() => {
                header.forget();
                true
            }
            _ => false,
        }
    }

    /// Mark the object covering `offset`. `None` if there is none.
    pub fn mark(&mut self, offset: usize) -> Option<Mark> {
        let start = self.object_containing(offset)?;
        let header = self.headers.get_mut(&start)?;
        if header.is_forgotten() {
            Some(Mark::Forgotten)
        } else if header.set_marked() {
            Some(Mark::New(start))
        } else {
            Some(Mark::Already)
        }
    }

    /// Free every live unmarked slot, running destructors first, and clear the marks of the
    /// rest. `Err` carries the offset of a corrupt header.
    pub fn sweep(&mut self) -> Result<SweepOutcome, usize> {
        let Self {
            arena,
            headers,
            classes,
            free,
            last_physical,
            live_objects,
            live_words,
            ..
        } = self;
        let mut outcome = SweepOutcome::default();
        let mut cursor = *last_physical;
        while let Some(offset) = cursor {
            let header = match headers.get_mut(&offset) {
                Some(header) if header.is_valid() => header,
                _ => return Err(offset),
            };
            cursor = header.prev_physical;
            if !header.is_live() {
                continue;
            }
            if header.is_marked() {
                header.clear_mark();
                continue;
            }
            if let Some(destructor) = header.destructor.take() {
                let words = header.words();
                destructor(
                    Address::new(Space::Fixed, offset),
                    &mut arena[offset..offset + words],
                );
                outcome.destroyed += 1;
            }
            let class = header.size_class().min(classes.large());
            let list = header.is_executable() as usize;
            outcome.reclaimed += 1;
            outcome.reclaimed_words += header.capacity();
            *live_objects -= 1;
            *live_words -= header.capacity();
            header.vacate();
            header.next_same_size = free[class][list];
            free[class][list] = Some(offset);
        }
        Ok(outcome)
    }

    /// Objects allocated since the last call.
    pub fn take_fresh(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.fresh)
    }

    pub fn clear_fresh(&mut self) {
        self.fresh.clear();
    }

    pub fn live_objects(&self) -> usize {
        self.live_objects
    }

    pub fn live_words(&self) -> usize {
        self.live_words
    }

    pub fn words(&self) -> &[Word] {
        &self.arena
    }

    pub fn words_mut(&mut self) -> &mut [Word] {
        &mut self.arena
    }
}

impl Default for FixedSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size_class::LARGE_CUTOFF;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn reuses_freed_slots_of_the_same_class() {
        let mut space = FixedSpace::new();
        let a = space.allocate(3, None, false);
        let b = space.allocate(3, None, false);
        assert_ne!(a, b);
        space.words_mut()[a] = 77;
        assert_eq!(space.mark(b), Some(Mark::New(b)));
        let outcome = space.sweep().unwrap();
        assert_eq!(outcome.reclaimed, 1);
        assert_eq!(space.live_objects(), 1);
        let c = space.allocate(4, None, false);
        assert_eq!(c, a);
        assert_eq!(space.words()[c], 0);
        // Executable slots come from their own lists.
        space.mark(b);
        space.mark(c);
        let outcome = space.sweep().unwrap();
        assert_eq!(outcome.reclaimed, 0);
        let d = space.allocate(3, None, true);
        assert!(d != a && d != b);
    }

    #[test]
    fn finds_interior_pointers() {
        let mut space = FixedSpace::new();
        let a = space.allocate(6, None, false);
        let b = space.allocate(2, None, false);
        assert_eq!(space.object_containing(a + 5), Some(a));
        assert_eq!(space.object_containing(b + 1), Some(b));
        assert_eq!(space.object_containing(b + 2), None);
        assert_eq!(space.mark(a + 3), Some(Mark::New(a)));
        assert_eq!(space.mark(a), Some(Mark::Already));
    }

    #[test]
    fn sweep_runs_destructor_once() {
        let mut space = FixedSpace::new();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let a = space.allocate(
            4,
            Some(Box::new(move |address, payload| {
                assert_eq!(address.space(), Space::Fixed);
                assert_eq!(payload.len(), 4);
                counter.set(counter.get() + 1);
            })),
            false,
        );
        assert_eq!(space.take_fresh(), vec![a]);
        assert_eq!(space.sweep().unwrap().destroyed, 1);
        assert_eq!(space.sweep().unwrap().reclaimed, 0);
        assert_eq!(runs.get(), 1);
        assert_eq!(space.header(a).map(|h| h.is_live()), None);
    }

    #[test]
    fn forgotten_objects_skip_destructor() {
        let mut space = FixedSpace::new();
        let runs = Rc::new(Cell::new(0));
        let counter = runs.clone();
        let a = space.allocate(
            2,
            Some(Box::new(move |_, _| counter.set(counter.get() + 1))),
            false,
        );
        assert!(space.forget(a));
        assert!(!space.forget(a + 1));
        assert_eq!(space.mark(a), Some(Mark::Forgotten));
        let outcome = space.sweep().unwrap();
        assert_eq!(outcome.reclaimed, 1);
        assert_eq!(outcome.destroyed, 0);
        assert_eq!(runs.get(), 0);
    }

    #[test]
    fn large_slots_are_first_fit() {
        let mut space = FixedSpace::new();
        let big = space.allocate(LARGE_CUTOFF + 100, None, false);
        let keep = space.allocate(2, None, false);
        space.mark(keep);
        space.sweep().unwrap();
        let smaller = space.allocate(LARGE_CUTOFF + 10, None, false);
        assert_eq!(smaller, big);
        let again = space.allocate(LARGE_CUTOFF + 10, None, false);
        assert!(again > keep);
    }
}
