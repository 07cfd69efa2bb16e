//! Host callbacks and the visitor handed to them.
use crate::error::{fatal, Violation};
use crate::space::Regions;
use crate::util::Word;
use crate::value::{Address, Value};

/// Object layout knowledge supplied by the host runtime.
///
/// The collector never interprets object contents. It asks the tracer to copy moving objects and
/// to enumerate the reference slots of moving and fixed objects. Every method takes `&self`; hosts
/// that need to count or record things use interior mutability.
pub trait ObjectTracer: Sized {
    /// Copy the object at the start of `src` into `dst` and return the number of words written.
    ///
    /// `src` starts at the object and runs to the end of the allocated part of its region; `dst`
    /// is all free space of the destination. The copy must be at least two words long and its
    /// first word must not be zero.
    fn copy(&self, dst: &mut [Word], src: &[Word]) -> usize;

    /// Visit every reference slot of the moving `object` during a minor collection and return the
    /// address right after the object.
    fn scan_minor(&self, object: Address, visitor: &mut Visitor<'_, Self>) -> Address;

    fn scan_full(&self, object: Address, visitor: &mut Visitor<'_, Self>) -> Address {
        self.scan_minor(object, visitor)
    }

    /// Visit every reference slot of a fixed object with `words` payload words.
    fn scan_fixed_minor(&self, payload: Address, words: usize, visitor: &mut Visitor<'_, Self>);

    fn scan_fixed_full(&self, payload: Address, words: usize, visitor: &mut Visitor<'_, Self>) {
        self.scan_fixed_minor(payload, words, visitor)
    }

    /// Roots the host keeps outside of frames, modules and constants.
    fn extra_minor_roots(&self, _visitor: &mut Visitor<'_, Self>) {}

    fn extra_full_roots(&self, _visitor: &mut Visitor<'_, Self>) {}

    /// Called before a full collection starts. Must not touch managed memory.
    fn before_full(&self) {}

    /// Called after a full collection finished. Must not touch managed memory.
    fn after_full(&self) {}
}

/// Forwarding handle given to [`ObjectTracer`] callbacks while a collection runs.
pub struct Visitor<'a, T: ObjectTracer> {
    pub(crate) regions: &'a mut Regions,
    pub(crate) tracer: &'a T,
}

impl<'a, T: ObjectTracer> Visitor<'a, T> {
    pub(crate) fn new(regions: &'a mut Regions, tracer: &'a T) -> Self {
        Self { regions, tracer }
    }

    /// A full collection is running.
    pub fn is_full(&self) -> bool {
        self.regions.is_full()
    }

    #[track_caller]
    pub fn load(&self, addr: Address) -> Word {
        match self.regions.word(addr) {
            Some(word) => word,
            None => fatal(self.regions.fatal, Violation::DanglingReference(addr.raw())),
        }
    }

    #[track_caller]
    pub fn load_value(&self, addr: Address) -> Value {
        Value::from_raw(self.load(addr))
    }

    /// `len` words starting at `addr`.
    #[track_caller]
    pub fn words(&self, addr: Address, len: usize) -> &[Word] {
        match self.regions.slice(addr, len) {
            Some(words) => words,
            None => fatal(self.regions.fatal, Violation::DanglingReference(addr.raw())),
        }
    }

    /// Forward the reference stored at `slot`, rewriting the slot if its target moved.
    #[track_caller]
    pub fn visit_slot(&mut self, slot: Address) {
        let value = self.load_value(slot);
        let forwarded = self.regions.forward(self.tracer, value);
        if forwarded != value {
            match self.regions.word_mut(slot) {
                Some(word) => *word = forwarded.raw(),
                None => fatal(self.regions.fatal, Violation::DanglingReference(slot.raw())),
            }
        }
    }

    /// Forward a reference held outside of the managed regions.
    pub fn visit_value(&mut self, value: &mut Value) {
        *value = self.regions.forward(self.tracer, *value);
    }
}
