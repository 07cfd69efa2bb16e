//! Relocation of moving objects.
//!
//! An evacuated object leaves a tombstone behind: its first word becomes zero and its second word
//! holds the new address. Objects are always at least two words and a live object never starts
//! with a zero word, so a zero first word is unambiguous.
use crate::bump_pointer_space::BumpPointerSpace;
use crate::error::{fatal, Violation};
use crate::fixed_space::Mark;
use crate::space::Regions;
use crate::value::{Address, Space, Value};
use crate::visitor::ObjectTracer;

/// Smallest moving object, in words.
pub const MIN_OBJECT_WORDS: usize = 2;

impl Regions {
    /// Where `value` lives after this collection. Evacuates it on first visit.
    pub(crate) fn forward<T: ObjectTracer>(&mut self, tracer: &T, value: Value) -> Value {
        let Some(addr) = value.as_address() else {
            return value;
        };
        match addr.space() {
            Space::Birth => self.trace_drag_out(tracer, addr).to_value(),
            Space::Fixed if self.is_full() => self.mark_fixed(addr, value),
            space if self.is_full() && space == self.old.space() => {
                self.trace_drag_out(tracer, addr).to_value()
            }
            _ => value,
        }
    }

    #[track_caller]
    fn trace_drag_out<T: ObjectTracer>(&mut self, tracer: &T, object: Address) -> Address {
        let mode = self.fatal;
        let from_birth = object.space() == Space::Birth;
        let Regions {
            nursery,
            old,
            to_space,
            copied,
            ..
        } = self;
        let (src, limit, dst): (&mut [usize], usize, &mut BumpPointerSpace) =
            match (from_birth, to_space.as_mut()) {
                (true, None) => {
                    let limit = nursery.cursor();
                    (nursery.words_mut(), limit, old)
                }
                (true, Some(to)) => {
                    let limit = nursery.cursor();
                    (nursery.words_mut(), limit, to)
                }
                (false, Some(to)) => {
                    let limit = old.cursor();
                    (old.words_mut(), limit, to)
                }
                (false, None) => return object,
            };

        let offset = object.offset();
        if offset + 1 >= limit {
            fatal(mode, Violation::DanglingReference(object.raw()));
        }
        if src[offset] == 0 {
            return match Address::from_raw(src[offset + 1]) {
                Some(forwarded) => forwarded,
                None => fatal(mode, Violation::DanglingReference(object.raw())),
            };
        }

        let available = dst.free();
        let words = tracer.copy(dst.tail_mut(), &src[offset..limit]);
        if words < MIN_OBJECT_WORDS || words > available || dst.tail_mut()[0] == 0 {
            fatal(
                mode,
                Violation::BadCopy {
                    object,
                    copied: words,
                    available,
                },
            );
        }
        let forwarded = match dst.bump_alloc(words) {
            Some(forwarded) => forwarded,
            None => fatal(
                mode,
                Violation::BadCopy {
                    object,
                    copied: words,
                    available,
                },
            ),
        };
        src[offset] = 0;
        src[offset + 1] = forwarded.raw();
        *copied += words;
        forwarded
    }

    /// Mark a fixed object reached during a full collection. References to forgotten objects are
    /// cleared.
    #[track_caller]
    fn mark_fixed(&mut self, addr: Address, value: Value) -> Value {
        match self.fixed.mark(addr.offset()) {
            Some(Mark::New(payload)) => {
                self.fixed_worklist.push(payload);
                value
            }
            Some(Mark::Already) => value,
            Some(Mark::Forgotten) => Value::NULL,
            None => fatal(self.fatal, Violation::DanglingReference(addr.raw())),
        }
    }
}
