//! Managed references and packed region addresses.
//!
//! A [`Value`] is one machine word. The lowest bit decides what it is: set means a tagged
//! integer, clear means either null (zero) or an [`Address`]. Addresses carry the region they
//! point into in their top four bits and a byte offset in the rest, so they are always word
//! aligned and never collide with integers or null.
use crate::util::{Word, WORD_SHIFT, WORD_SIZE};
use std::fmt;

/// Region an [`Address`] points into.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum Space {
    Birth = 1,
    /// First old semispace.
    OldA = 2,
    /// Second old semispace. Full collections alternate between the two.
    OldB = 3,
    Fixed = 4,
}

impl Space {
    const fn from_tag(tag: usize) -> Option<Self> {
        match tag {
            1 => Some(Self::Birth),
            2 => Some(Self::OldA),
            3 => Some(Self::OldB),
            4 => Some(Self::Fixed),
            _ => None,
        }
    }

    pub const fn is_old(self) -> bool {
        matches!(self, Self::OldA | Self::OldB)
    }

    /// The other old semispace.
    pub(crate) const fn flipped(self) -> Self {
        match self {
            Self::OldA => Self::OldB,
            Self::OldB => Self::OldA,
            other => other,
        }
    }
}

const SPACE_SHIFT: u32 = usize::BITS - 4;
const OFFSET_MASK: usize = (1 << SPACE_SHIFT) - 1;

/// Largest word offset an address can encode.
pub const MAX_OFFSET_WORDS: usize = OFFSET_MASK >> WORD_SHIFT;

/// `(space, word offset)` packed into one word.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Address(Word);

impl Address {
    #[inline(always)]
    pub(crate) const fn new(space: Space, offset: usize) -> Self {
        Self(((space as usize) << SPACE_SHIFT) | (offset << WORD_SHIFT))
    }

    /// Decode a raw word. Returns `None` for null, tagged integers, misaligned words and unknown
    /// space tags.
    pub const fn from_raw(raw: Word) -> Option<Self> {
        if raw & (WORD_SIZE - 1) != 0 {
            return None;
        }
        match Space::from_tag(raw >> SPACE_SHIFT) {
            Some(_) => Some(Self(raw)),
            None => None,
        }
    }

    #[inline(always)]
    pub const fn raw(self) -> Word {
        self.0
    }

    #[inline]
    pub const fn space(self) -> Space {
        match self.0 >> SPACE_SHIFT {
            1 => Space::Birth,
            2 => Space::OldA,
            3 => Space::OldB,
            _ => Space::Fixed,
        }
    }

    /// Offset in words from the start of the region.
    #[inline(always)]
    pub const fn offset(self) -> usize {
        (self.0 & OFFSET_MASK) >> WORD_SHIFT
    }

    /// Address `words` words further into the same region.
    #[inline(always)]
    pub const fn add(self, words: usize) -> Self {
        Self(self.0 + (words << WORD_SHIFT))
    }

    #[inline(always)]
    pub const fn to_value(self) -> Value {
        Value(self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}+{}", self.space(), self.offset())
    }
}

/// A managed reference: null, a tagged integer, or an [`Address`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct Value(Word);

impl Value {
    pub const NULL: Self = Self(0);
    pub const MIN_INTEGER: isize = isize::MIN >> 1;
    pub const MAX_INTEGER: isize = isize::MAX >> 1;

    #[inline(always)]
    pub const fn from_raw(raw: Word) -> Self {
        Self(raw)
    }

    #[inline(always)]
    pub const fn raw(self) -> Word {
        self.0
    }

    /// Tag `n` as an immediate integer. Bits above [`Value::MAX_INTEGER`] are lost.
    #[inline(always)]
    pub const fn tagged(n: isize) -> Self {
        Self(((n << 1) | 1) as Word)
    }

    pub const fn try_tagged(n: isize) -> Option<Self> {
        if n < Self::MIN_INTEGER || n > Self::MAX_INTEGER {
            None
        } else {
            Some(Self::tagged(n))
        }
    }

    #[inline(always)]
    pub const fn is_integer(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline(always)]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Untagged, non-null word.
    #[inline(always)]
    pub const fn is_reference(self) -> bool {
        !self.is_integer() && !self.is_null()
    }

    #[inline(always)]
    pub const fn as_integer(self) -> Option<isize> {
        if self.is_integer() {
            Some((self.0 as isize) >> 1)
        } else {
            None
        }
    }

    #[inline(always)]
    pub const fn as_address(self) -> Option<Address> {
        Address::from_raw(self.0)
    }
}

impl From<Address> for Value {
    fn from(address: Address) -> Self {
        address.to_value()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("Null")
        } else if let Some(n) = self.as_integer() {
            write!(f, "Int({})", n)
        } else if let Some(address) = self.as_address() {
            write!(f, "Ref({:?})", address)
        } else {
            write!(f, "Raw({:#x})", self.0)
        }
    }
}

/// What a [`Value`] currently refers to. See [`Heap::classify`](crate::Heap::classify).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValueKind {
    Null,
    Integer(isize),
    Birth(Address),
    Old(Address),
    /// Start of, or interior pointer into, a live fixed object.
    Fixed(Address),
    /// Anything else: stale addresses, garbage words, the inactive old semispace.
    Foreign(Word),
}
