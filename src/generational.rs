//! Minor and full collections.
//!
//! ## Minor
//!
//! Every birth object reachable from the roots is copied into the old region, after which the
//! old region is scanned linearly from where it stood before the collection (Cheney scan) until
//! no birth reference is left. The roots are the frames, pending exception payloads, the
//! remembered set, module constants at or above the changed-rank watermark, dirty global
//! constant groups, fixed objects allocated since the last collection and the host's extra
//! roots.
//!
//! ## Full
//!
//! Birth and old objects reachable from all roots are copied into a fresh old semispace. Fixed
//! objects are marked and scanned in place; unmarked ones are destroyed. The previous old
//! semispace is released.
use crate::bump_pointer_space::BumpPointerSpace;
use crate::error::{fatal, FatalMode, Violation};
use crate::heap::Heap;
use crate::space::Regions;
use crate::util::{bytes_to_words, formatted_size, WORD_SIZE};
use crate::value::{Address, Space};
use crate::visitor::{ObjectTracer, Visitor};
use std::time::Instant;

/// Collector state. Anything but `Idle` means a collection is running.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcPhase {
    Idle,
    ScanningRoots,
    Relocating,
    Sweeping,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcReason {
    RequestedByUser,
    AllocationFailure,
    StoreBufferFull,
    OldSpaceFull,
    FixedSpaceGrowth,
}

fn enter_phase(phase: &mut GcPhase, next: GcPhase) {
    tracing::debug!(from = ?*phase, to = ?next, "gc phase");
    *phase = next;
}

/// Validate the address a scan callback returned for `object`.
#[track_caller]
fn next_object(mode: FatalMode, space: Space, limit: usize, object: Address, next: Address) -> usize {
    if next.space() != space || next.offset() <= object.offset() || next.offset() > limit {
        fatal(
            mode,
            Violation::BadScan {
                object,
                next,
                limit,
            },
        );
    }
    next.offset()
}

fn scan_fixed<T: ObjectTracer>(visitor: &mut Visitor<'_, T>, tracer: &T, payload: usize, full: bool) {
    let Some(words) = visitor.regions.fixed.header(payload).map(|header| header.words()) else {
        return;
    };
    let payload = Address::new(Space::Fixed, payload);
    if full {
        tracer.scan_fixed_full(payload, words, visitor);
    } else {
        tracer.scan_fixed_minor(payload, words, visitor);
    }
}

impl<T: ObjectTracer> Heap<T> {
    /// Make sure `size` bytes can be allocated in the birth region. Runs a full collection if
    /// `full` is set or one is pending, a minor one otherwise.
    #[track_caller]
    pub fn collect(&mut self, size: usize, full: bool) {
        self.collect_with(bytes_to_words(size), full, GcReason::RequestedByUser);
    }

    #[track_caller]
    pub fn minor_collection(&mut self) {
        self.collect_with(0, false, GcReason::RequestedByUser);
    }

    #[track_caller]
    pub fn full_collection(&mut self) {
        self.collect_with(0, true, GcReason::RequestedByUser);
    }

    #[track_caller]
    pub(crate) fn collect_with(&mut self, words: usize, full: bool, reason: GcReason) {
        if self.phase != GcPhase::Idle {
            self.fatal(Violation::NestedCollection(self.phase));
        }
        let max = self.regions.nursery.max_object_words();
        if words > max {
            self.fatal(Violation::ObjectTooLarge {
                requested: words * WORD_SIZE,
                capacity: max * WORD_SIZE,
            });
        }
        if full {
            self.full(reason);
        } else if let Some(pending) = self.full_pending {
            self.full(pending);
        } else {
            self.minor(reason);
            if self.regions.old.free() < self.regions.nursery.capacity() {
                self.full(GcReason::OldSpaceFull);
            }
        }
    }

    fn minor(&mut self, reason: GcReason) {
        let start = Instant::now();
        let id = self.total_gcs;
        self.total_gcs += 1;
        let _span = tracing::debug_span!("gc_collect", id, kind = "minor", reason = ?reason).entered();

        let mode = self.config.on_fatal;
        let Heap {
            regions,
            tracer,
            frames,
            excepts,
            modules,
            constants,
            phase,
            ..
        } = self;
        let tracer: &T = tracer;
        let scan_start = regions.old.cursor();
        regions.copied = 0;

        enter_phase(phase, GcPhase::ScanningRoots);
        let mut visitor = Visitor::new(regions, tracer);
        frames.walk(|slot| visitor.visit_value(slot));
        excepts.walk(|slot| visitor.visit_value(slot));
        for index in visitor.regions.nursery.store_buffer() {
            let raw = visitor.regions.nursery.words()[index];
            match Address::from_raw(raw) {
                Some(slot) => visitor.visit_slot(slot),
                None => fatal(mode, Violation::DanglingReference(raw)),
            }
        }
        modules.walk_changed(|slot| visitor.visit_value(slot));
        constants.walk_dirty(|slot| visitor.visit_value(slot));
        for payload in visitor.regions.fixed.take_fresh() {
            scan_fixed(&mut visitor, tracer, payload, false);
        }
        tracer.extra_minor_roots(&mut visitor);

        enter_phase(phase, GcPhase::Relocating);
        let space = visitor.regions.old.space();
        let mut scan = scan_start;
        while scan < visitor.regions.old.cursor() {
            let object = Address::new(space, scan);
            let next = tracer.scan_minor(object, &mut visitor);
            scan = next_object(mode, space, visitor.regions.old.cursor(), object, next);
        }

        enter_phase(phase, GcPhase::Sweeping);
        let copied = regions.copied;
        regions.nursery.reset();
        modules.clear_changed();
        constants.clear_dirty();
        enter_phase(phase, GcPhase::Idle);

        self.stats.minor_collections += 1;
        self.stats.total_promoted += copied * WORD_SIZE;
        self.stats.last_copied = copied * WORD_SIZE;
        let elapsed = start.elapsed();
        tracing::debug!(id, promoted = copied * WORD_SIZE, ?elapsed, "minor collection finished");
        logln_if!(
            self.config.verbose,
            "[gc] GC({}) Pause Young ({:?}) Promoted {} (old space: {}) {:.4}ms",
            id,
            reason,
            formatted_size(copied * WORD_SIZE),
            formatted_size(self.regions.old.cursor() * WORD_SIZE),
            elapsed.as_micros() as f64 / 1000.0
        );
    }

    fn full(&mut self, reason: GcReason) {
        let start = Instant::now();
        let id = self.total_gcs;
        self.total_gcs += 1;
        let _span = tracing::debug_span!("gc_collect", id, kind = "full", reason = ?reason).entered();
        self.tracer.before_full();

        let mode = self.config.on_fatal;
        let before = (self.regions.old.cursor() + self.regions.nursery.cursor()) * WORD_SIZE;
        let Heap {
            regions,
            tracer,
            frames,
            excepts,
            modules,
            constants,
            phase,
            config,
            ..
        } = self;
        let tracer: &T = tracer;

        enter_phase(phase, GcPhase::ScanningRoots);
        let needed = regions.old.cursor() + regions.nursery.cursor() + regions.nursery.capacity();
        let capacity = (config.old_size / WORD_SIZE).max(needed);
        let to_space = match BumpPointerSpace::new(regions.old.space().flipped(), capacity) {
            Ok(to_space) => to_space,
            Err(source) => fatal(
                mode,
                Violation::RegionMap {
                    size: capacity * WORD_SIZE,
                    source,
                },
            ),
        };
        let space = to_space.space();
        regions.to_space = Some(to_space);
        regions.copied = 0;

        let mut visitor = Visitor::new(regions, tracer);
        frames.walk(|slot| visitor.visit_value(slot));
        excepts.walk(|slot| visitor.visit_value(slot));
        modules.walk_all(|slot| visitor.visit_value(slot));
        constants.walk_all(|slot| visitor.visit_value(slot));
        tracer.extra_full_roots(&mut visitor);

        enter_phase(phase, GcPhase::Relocating);
        let mut scan = 0;
        loop {
            let limit = to_space_cursor(visitor.regions);
            if scan < limit {
                let object = Address::new(space, scan);
                let next = tracer.scan_full(object, &mut visitor);
                scan = next_object(mode, space, to_space_cursor(visitor.regions), object, next);
            } else if let Some(payload) = visitor.regions.fixed_worklist.pop() {
                scan_fixed(&mut visitor, tracer, payload, true);
            } else {
                break;
            }
        }

        enter_phase(phase, GcPhase::Sweeping);
        let copied = regions.copied;
        let outcome = match regions.fixed.sweep() {
            Ok(outcome) => outcome,
            Err(offset) => fatal(mode, Violation::CorruptFixedHeader(offset)),
        };
        if let Some(to_space) = regions.to_space.take() {
            regions.old = to_space;
        }
        regions.nursery.reset();
        regions.fixed.clear_fresh();
        modules.clear_changed();
        constants.clear_dirty();
        let fixed_live = regions.fixed.live_words();
        enter_phase(phase, GcPhase::Idle);

        self.full_pending = None;
        self.next_fixed_threshold = (self.config.fixed_threshold / WORD_SIZE).max(fixed_live * 2);
        self.stats.full_collections += 1;
        self.stats.last_copied = copied * WORD_SIZE;
        self.stats.fixed_reclaimed += outcome.reclaimed;
        self.stats.destructors_run += outcome.destroyed;
        self.tracer.after_full();

        let after = self.regions.old.cursor() * WORD_SIZE;
        let elapsed = start.elapsed();
        tracing::debug!(
            id,
            copied = copied * WORD_SIZE,
            fixed_reclaimed = outcome.reclaimed,
            ?elapsed,
            "full collection finished"
        );
        logln_if!(
            self.config.verbose,
            "[gc] GC({}) Pause Full ({:?}) {}->{} (fixed: {} reclaimed, {} live) {:.4}ms",
            id,
            reason,
            formatted_size(before),
            formatted_size(after),
            outcome.reclaimed,
            formatted_size(fixed_live * WORD_SIZE),
            elapsed.as_micros() as f64 / 1000.0
        );
    }
}

fn to_space_cursor(regions: &Regions) -> usize {
    regions.to_space.as_ref().map_or(0, |to| to.cursor())
}
