use crate::shadow_stack::FrameId;
use crate::value::Value;
use thiserror::Error;

/// A non-local exit in flight. Obtained from [`Heap::throw`](crate::Heap::throw) and handed back
/// by [`Heap::except_block`](crate::Heap::except_block).
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
#[error("exception {code} thrown with payload {payload:?}")]
pub struct Thrown {
    pub code: i32,
    pub payload: Value,
}

struct ExceptRecord {
    saved_frame: Option<FrameId>,
    saved_depth: usize,
    /// Set by `throw`. The payload is a root while it sits here.
    pending: Option<Thrown>,
}

#[derive(Default)]
pub struct ExceptStack {
    records: Vec<ExceptRecord>,
}

pub(crate) struct Restore {
    pub saved_frame: Option<FrameId>,
    pub saved_depth: usize,
    pub pending: Option<Thrown>,
}

impl ExceptStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn push(&mut self, saved_frame: Option<FrameId>, saved_depth: usize) {
        self.records.push(ExceptRecord {
            saved_frame,
            saved_depth,
            pending: None,
        });
    }

    /// Pop records down to `depth` and return the one that sat at `depth`.
    pub(crate) fn pop_to(&mut self, depth: usize) -> Option<Restore> {
        self.records.truncate(depth + 1);
        let record = self.records.pop()?;
        Some(Restore {
            saved_frame: record.saved_frame,
            saved_depth: record.saved_depth,
            pending: record.pending,
        })
    }

    /// Record a throw in the innermost block. `None` without one.
    pub(crate) fn raise(&mut self, code: i32, payload: Value) -> Option<Thrown> {
        let record = self.records.last_mut()?;
        let thrown = Thrown { code, payload };
        record.pending = Some(thrown);
        Some(thrown)
    }

    /// Payloads of pending throws.
    pub(crate) fn walk(&mut self, mut visitor: impl FnMut(&mut Value)) {
        for record in &mut self.records {
            if let Some(thrown) = &mut record.pending {
                visitor(&mut thrown.payload);
            }
        }
    }
}
