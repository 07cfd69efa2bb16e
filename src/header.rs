use crate::util::Word;
use crate::value::Address;
use modular_bitfield::prelude::*;

/// Called with the payload address and payload words of an unreachable fixed object.
pub type Destructor = Box<dyn FnOnce(Address, &mut [Word])>;

/// Every valid header starts with this.
pub const FIXED_MAGIC: u32 = 0x5149_5348;

#[bitfield(bits = 16)]
#[derive(Clone, Copy)]
pub struct FixedBits {
    live: bool,
    marked: bool,
    forgotten: bool,
    executable: bool,
    #[skip]
    __: B12,
}

/// Side table entry describing one fixed slot.
pub struct FixedHeader {
    magic: u32,
    size_class: u16,
    bits: FixedBits,
    capacity: usize,
    words: usize,
    pub(crate) destructor: Option<Destructor>,
    pub(crate) prev_physical: Option<usize>,
    pub(crate) next_same_size: Option<usize>,
}

impl FixedHeader {
    pub fn new(size_class: usize, capacity: usize, prev_physical: Option<usize>) -> Self {
        Self {
            magic: FIXED_MAGIC,
            size_class: size_class as u16,
            bits: FixedBits::new(),
            capacity,
            words: 0,
            destructor: None,
            prev_physical,
            next_same_size: None,
        }
    }

    #[inline(always)]
    pub fn is_valid(&self) -> bool {
        self.magic == FIXED_MAGIC
    }
    #[inline(always)]
    pub fn size_class(&self) -> usize {
        self.size_class as usize
    }
    /// Words reserved for the slot.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
    /// Words requested by the current occupant.
    #[inline(always)]
    pub fn words(&self) -> usize {
        self.words
    }

    pub fn occupy(&mut self, words: usize, destructor: Option<Destructor>, executable: bool) {
        self.words = words;
        self.destructor = destructor;
        self.bits = FixedBits::new()
            .with_live(true)
            .with_executable(executable);
    }

    /// Back on a free list.
    pub fn vacate(&mut self) {
        self.words = 0;
        self.destructor = None;
        self.bits.set_live(false);
        self.bits.set_marked(false);
        self.bits.set_forgotten(false);
    }

    #[inline(always)]
    pub fn is_live(&self) -> bool {
        self.bits.live()
    }
    #[inline(always)]
    pub fn is_marked(&self) -> bool {
        self.bits.marked()
    }
    /// Returns `false` if the mark bit was already set.
    #[inline(always)]
    pub fn set_marked(&mut self) -> bool {
        if self.is_marked() {
            return false;
        }
        self.bits.set_marked(true);
        true
    }
    #[inline(always)]
    pub fn clear_mark(&mut self) {
        self.bits.set_marked(false);
    }
    #[inline(always)]
    pub fn is_forgotten(&self) -> bool {
        self.bits.forgotten()
    }
    /// Drop the destructor; the next full collection frees the slot without running it.
    pub fn forget(&mut self) {
        self.destructor = None;
        self.bits.set_forgotten(true);
    }
    #[inline(always)]
    pub fn is_executable(&self) -> bool {
        self.bits.executable()
    }
}
