//! Root frame stack.
//!
//! Mutator code declares one static [`FrameDescriptor`] per call site and pushes a frame on
//! entry. The collector only ever looks at the declared parameter and local slots of the frames
//! currently on the stack, and rewrites them when it moves objects.
use crate::error::Violation;
use crate::value::Value;
use std::num::NonZeroUsize;

/// Shape of the frames pushed by one call site.
#[derive(Debug)]
pub struct FrameDescriptor {
    pub name: &'static str,
    pub params: usize,
    pub locals: usize,
    /// Rank of the module the call site belongs to, 0 for none.
    pub rank: usize,
    /// Opaque per call site data for the host.
    pub static_data: usize,
}

impl FrameDescriptor {
    pub const fn new(name: &'static str, params: usize, locals: usize) -> Self {
        Self {
            name,
            params,
            locals,
            rank: 0,
            static_data: 0,
        }
    }

    pub const fn with_rank(mut self, rank: usize) -> Self {
        self.rank = rank;
        self
    }

    pub const fn with_static_data(mut self, static_data: usize) -> Self {
        self.static_data = static_data;
        self
    }

    pub const fn slots(&self) -> usize {
        self.params + self.locals
    }
}

/// Handle of a pushed frame. Stale handles never alias newer frames.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct FrameId(NonZeroUsize);

struct RawFrame {
    id: FrameId,
    descriptor: &'static FrameDescriptor,
    prev: Option<FrameId>,
    /// Index of the first parameter slot. Locals follow the parameters.
    base: usize,
}

pub struct ShadowStack {
    frames: Vec<RawFrame>,
    slots: Vec<Value>,
    next_id: usize,
}

impl ShadowStack {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            slots: Vec::new(),
            next_id: 1,
        }
    }

    pub fn current(&self) -> Option<FrameId> {
        self.frames.last().map(|frame| frame.id)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(
        &mut self,
        descriptor: &'static FrameDescriptor,
        params: &[Value],
    ) -> Result<FrameId, Violation> {
        if params.len() != descriptor.params {
            return Err(Violation::FrameArity {
                name: descriptor.name,
                declared: descriptor.params,
                given: params.len(),
            });
        }
        let id = FrameId(NonZeroUsize::new(self.next_id).unwrap_or(NonZeroUsize::MIN));
        self.next_id += 1;
        let base = self.slots.len();
        self.slots.extend_from_slice(params);
        self.slots
            .resize(base + descriptor.slots(), Value::NULL);
        self.frames.push(RawFrame {
            id,
            descriptor,
            prev: self.current(),
            base,
        });
        Ok(id)
    }

    pub fn pop(&mut self, frame: FrameId) -> Result<(), Violation> {
        match self.frames.last() {
            Some(top) if top.id == frame => {
                self.slots.truncate(top.base);
                self.frames.pop();
                Ok(())
            }
            _ => Err(Violation::FrameMismatch {
                current: self.current(),
                found: frame,
            }),
        }
    }

    /// Pop frames until `saved` is current again.
    pub fn unwind_to(&mut self, saved: Option<FrameId>) {
        while let Some(top) = self.frames.last() {
            if Some(top.id) <= saved {
                break;
            }
            self.slots.truncate(top.base);
            self.frames.pop();
        }
    }

    fn frame(&self, frame: FrameId) -> Result<&RawFrame, Violation> {
        // Ids grow monotonically from the bottom of the stack.
        self.frames
            .binary_search_by_key(&frame, |raw| raw.id)
            .map(|index| &self.frames[index])
            .map_err(|_| Violation::UnknownFrame(frame))
    }

    pub fn descriptor(&self, frame: FrameId) -> Result<&'static FrameDescriptor, Violation> {
        self.frame(frame).map(|raw| raw.descriptor)
    }

    pub fn previous(&self, frame: FrameId) -> Result<Option<FrameId>, Violation> {
        self.frame(frame).map(|raw| raw.prev)
    }

    fn slot_index(
        &self,
        frame: FrameId,
        kind: &'static str,
        index: usize,
    ) -> Result<usize, Violation> {
        let raw = self.frame(frame)?;
        let (start, count) = match kind {
            "param" => (raw.base, raw.descriptor.params),
            _ => (raw.base + raw.descriptor.params, raw.descriptor.locals),
        };
        if index >= count {
            return Err(Violation::SlotOutOfRange {
                name: raw.descriptor.name,
                kind,
                index,
                count,
            });
        }
        Ok(start + index)
    }

    pub fn param(&self, frame: FrameId, index: usize) -> Result<Value, Violation> {
        self.slot_index(frame, "param", index)
            .map(|slot| self.slots[slot])
    }

    pub fn set_param(&mut self, frame: FrameId, index: usize, value: Value) -> Result<(), Violation> {
        let slot = self.slot_index(frame, "param", index)?;
        self.slots[slot] = value;
        Ok(())
    }

    pub fn local(&self, frame: FrameId, index: usize) -> Result<Value, Violation> {
        self.slot_index(frame, "local", index)
            .map(|slot| self.slots[slot])
    }

    pub fn set_local(&mut self, frame: FrameId, index: usize, value: Value) -> Result<(), Violation> {
        let slot = self.slot_index(frame, "local", index)?;
        self.slots[slot] = value;
        Ok(())
    }

    /// Visit every declared slot of every frame, innermost frame first.
    pub fn walk(&mut self, mut visitor: impl FnMut(&mut Value)) {
        let mut end = self.slots.len();
        for frame in self.frames.iter().rev() {
            for slot in &mut self.slots[frame.base..end] {
                visitor(slot);
            }
            end = frame.base;
        }
    }
}

impl Default for ShadowStack {
    fn default() -> Self {
        Self::new()
    }
}

/// Declare a `static` [`FrameDescriptor`].
///
/// ```
/// qish::frame_descriptor!(static CONS: "cons", params = 2, locals = 1);
/// assert_eq!(CONS.slots(), 3);
/// ```
#[macro_export]
macro_rules! frame_descriptor {
    ($vis:vis static $name:ident: $label:literal, params = $params:expr, locals = $locals:expr) => {
        $vis static $name: $crate::FrameDescriptor =
            $crate::FrameDescriptor::new($label, $params, $locals);
    };
    ($vis:vis static $name:ident: $label:literal, params = $params:expr, locals = $locals:expr, rank = $rank:expr) => {
        $vis static $name: $crate::FrameDescriptor =
            $crate::FrameDescriptor::new($label, $params, $locals).with_rank($rank);
    };
}
