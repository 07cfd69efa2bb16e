use crate::bump_pointer_space::BumpPointerSpace;
use crate::constants::ConstantTable;
use crate::error::{fatal, HeapError, ModuleError, Violation};
use crate::except::{ExceptStack, Restore, Thrown};
use crate::fixed_space::FixedSpace;
use crate::forwarding::MIN_OBJECT_WORDS;
use crate::generational::{GcPhase, GcReason};
use crate::header::Destructor;
use crate::modules::{ModuleRank, ModuleRegistry};
use crate::nursery::Nursery;
use crate::shadow_stack::{FrameDescriptor, FrameId, ShadowStack};
use crate::space::{RegionBounds, Regions};
use crate::statistics::HeapStatistics;
use crate::util::{bytes_to_words, formatted_size, Word, WORD_SIZE};
use crate::value::{Address, Space, Value, ValueKind};
use crate::visitor::ObjectTracer;
use crate::Config;
use std::ffi::c_void;

/// A single-threaded generational heap.
///
/// Objects are born in the birth region, promoted into the old region by minor collections and
/// compacted by full collections. Fixed objects never move and are reclaimed by full collections
/// only. The heap finds references through its root frames, module and global constants, the
/// remembered set and the host's [`ObjectTracer`].
pub struct Heap<T: ObjectTracer> {
    pub(crate) config: Config,
    pub(crate) regions: Regions,
    pub(crate) frames: ShadowStack,
    pub(crate) excepts: ExceptStack,
    pub(crate) modules: ModuleRegistry,
    pub(crate) constants: ConstantTable,
    pub(crate) tracer: T,
    pub(crate) phase: GcPhase,
    pub(crate) full_pending: Option<GcReason>,
    /// Fixed words that schedule the next full collection.
    pub(crate) next_fixed_threshold: usize,
    pub(crate) total_gcs: usize,
    pub(crate) stats: HeapStatistics,
}

impl<T: ObjectTracer> Heap<T> {
    pub fn new(config: Config, tracer: T) -> Result<Self, HeapError> {
        config.validate()?;
        let nursery = Nursery::new(config.birth_size / WORD_SIZE, config.safety_margin)
            .map_err(|source| HeapError::Map {
                region: "birth",
                size: config.birth_size,
                source,
            })?;
        let old = BumpPointerSpace::new(Space::OldA, config.old_size / WORD_SIZE).map_err(
            |source| HeapError::Map {
                region: "old",
                size: config.old_size,
                source,
            },
        )?;
        tracing::debug!(
            birth = %formatted_size(config.birth_size),
            old = %formatted_size(config.old_size),
            "heap initialized"
        );
        Ok(Self {
            regions: Regions {
                nursery,
                old,
                to_space: None,
                fixed: FixedSpace::new(),
                fixed_worklist: Vec::new(),
                copied: 0,
                fatal: config.on_fatal,
            },
            frames: ShadowStack::new(),
            excepts: ExceptStack::new(),
            modules: ModuleRegistry::new(config.max_modules),
            constants: ConstantTable::with_capacity(config.constant_capacity),
            tracer,
            phase: GcPhase::Idle,
            full_pending: None,
            next_fixed_threshold: config.fixed_threshold / WORD_SIZE,
            total_gcs: 0,
            stats: HeapStatistics::default(),
            config,
        })
    }

    /// Same as [`Heap::new`].
    pub fn initialize(config: Config, tracer: T) -> Result<Self, HeapError> {
        Self::new(config, tracer)
    }

    #[cold]
    #[track_caller]
    pub(crate) fn fatal(&self, violation: Violation) -> ! {
        fatal(self.config.on_fatal, violation)
    }

    #[track_caller]
    fn check<R>(&self, result: Result<R, Violation>) -> R {
        match result {
            Ok(value) => value,
            Err(violation) => self.fatal(violation),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut T {
        &mut self.tracer
    }

    pub fn phase(&self) -> GcPhase {
        self.phase
    }

    #[track_caller]
    fn ensure_can_allocate(&self) {
        if self.phase != GcPhase::Idle {
            self.fatal(Violation::AllocationInGc(self.phase));
        }
    }

    #[track_caller]
    fn ensure_fits_birth_region(&self, size: usize, words: usize) {
        let max = self.regions.nursery.max_object_words();
        if words > max {
            self.fatal(Violation::ObjectTooLarge {
                requested: size,
                capacity: max * WORD_SIZE,
            });
        }
    }

    /// Allocate `size` bytes in the birth region, collecting first if needed.
    ///
    /// The object is at least two words. Its contents are unspecified; the host must write a
    /// non-zero first word before the next collection.
    #[track_caller]
    pub fn allocate(&mut self, size: usize) -> Address {
        self.ensure_can_allocate();
        let words = bytes_to_words(size).max(MIN_OBJECT_WORDS);
        self.ensure_fits_birth_region(size, words);
        if let Some(reason) = self.full_pending {
            self.collect_with(words, true, reason);
        } else if !self.regions.nursery.fits(words) {
            self.collect_with(words, false, GcReason::AllocationFailure);
        }
        self.regions.nursery.bump(words)
    }

    /// Like [`Heap::allocate`], with the returned address a multiple of `align` bytes.
    #[track_caller]
    pub fn allocate_aligned(&mut self, size: usize, align: usize) -> Address {
        self.ensure_can_allocate();
        if !align.is_power_of_two() || align < WORD_SIZE || align > 32 * WORD_SIZE {
            self.fatal(Violation::BadAlignment(align));
        }
        let words = bytes_to_words(size).max(MIN_OBJECT_WORDS);
        let headroom = align / WORD_SIZE - 1;
        self.ensure_fits_birth_region(size, words + headroom);
        if let Some(reason) = self.full_pending {
            self.collect_with(words + headroom, true, reason);
        } else if !self.regions.nursery.fits(words + headroom) {
            self.collect_with(words + headroom, false, GcReason::AllocationFailure);
        }
        let padding = self.regions.nursery.padding_for(align / WORD_SIZE);
        if padding > 0 {
            self.regions.nursery.bump(padding);
        }
        self.regions.nursery.bump(words)
    }

    /// Allocate a zeroed, non-moving object of `size` bytes. `destructor` runs when a full
    /// collection finds the object unreachable.
    #[track_caller]
    pub fn allocate_fixed(&mut self, size: usize, destructor: Option<Destructor>) -> Address {
        self.allocate_fixed_in(size, destructor, false)
    }

    /// [`Heap::allocate_fixed`] for code objects. They never share a slot with data objects.
    ///
    /// The slot is ordinary arena memory: it is not mapped executable and, like every fixed
    /// payload, is reached through its [`Address`] rather than a stable machine pointer. Hosts
    /// that run the code copy it into memory they map themselves.
    #[track_caller]
    pub fn allocate_fixed_executable(
        &mut self,
        size: usize,
        destructor: Option<Destructor>,
    ) -> Address {
        self.allocate_fixed_in(size, destructor, true)
    }

    #[track_caller]
    fn allocate_fixed_in(
        &mut self,
        size: usize,
        destructor: Option<Destructor>,
        executable: bool,
    ) -> Address {
        self.ensure_can_allocate();
        let words = bytes_to_words(size).max(1);
        let offset = self.regions.fixed.allocate(words, destructor, executable);
        self.stats.fixed_allocated += 1;
        if self.full_pending.is_none() && self.regions.fixed.live_words() > self.next_fixed_threshold
        {
            self.full_pending = Some(GcReason::FixedSpaceGrowth);
        }
        Address::new(Space::Fixed, offset)
    }

    /// Give up on a fixed object: references to it are cleared by the next full collection and
    /// its destructor never runs.
    #[track_caller]
    pub fn forget_fixed(&mut self, object: Address) {
        if object.space() != Space::Fixed || !self.regions.fixed.forget(object.offset()) {
            self.fatal(Violation::NotFixed(object));
        }
    }

    /// Payload words of the fixed object starting at `object`.
    pub fn fixed_words(&self, object: Address) -> Option<usize> {
        if object.space() != Space::Fixed {
            return None;
        }
        self.regions.fixed.header(object.offset()).map(|header| header.words())
    }

    /// Run a full collection at the next allocation.
    pub fn request_full_collection(&mut self) {
        self.full_pending.get_or_insert(GcReason::RequestedByUser);
    }

    #[track_caller]
    pub fn load(&self, addr: Address) -> Word {
        match self.regions.word(addr) {
            Some(word) => word,
            None => self.fatal(Violation::DanglingReference(addr.raw())),
        }
    }

    #[track_caller]
    pub fn read(&self, slot: Address) -> Value {
        Value::from_raw(self.load(slot))
    }

    /// Store a raw word. Use [`Heap::write`] for references.
    #[track_caller]
    pub fn store(&mut self, addr: Address, word: Word) {
        match self.regions.word_mut(addr) {
            Some(slot) => *slot = word,
            None => self.fatal(Violation::DanglingReference(addr.raw())),
        }
    }

    #[track_caller]
    pub fn enter_frame(&mut self, descriptor: &'static FrameDescriptor, params: &[Value]) -> FrameId {
        let result = self.frames.push(descriptor, params);
        self.check(result)
    }

    /// `frame` must be the current frame.
    #[track_caller]
    pub fn exit_frame(&mut self, frame: FrameId) {
        let result = self.frames.pop(frame);
        self.check(result)
    }

    /// Enter a frame, run `body`, exit the frame.
    #[track_caller]
    pub fn with_frame<R>(
        &mut self,
        descriptor: &'static FrameDescriptor,
        params: &[Value],
        body: impl FnOnce(&mut Self, FrameId) -> R,
    ) -> R {
        let frame = self.enter_frame(descriptor, params);
        let result = body(self, frame);
        self.exit_frame(frame);
        result
    }

    pub fn current_frame(&self) -> Option<FrameId> {
        self.frames.current()
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.depth()
    }

    #[track_caller]
    pub fn frame_descriptor(&self, frame: FrameId) -> &'static FrameDescriptor {
        self.check(self.frames.descriptor(frame))
    }

    #[track_caller]
    pub fn param(&self, frame: FrameId, index: usize) -> Value {
        self.check(self.frames.param(frame, index))
    }

    #[track_caller]
    pub fn set_param(&mut self, frame: FrameId, index: usize, value: Value) {
        let result = self.frames.set_param(frame, index, value);
        self.check(result)
    }

    #[track_caller]
    pub fn local(&self, frame: FrameId, index: usize) -> Value {
        self.check(self.frames.local(frame, index))
    }

    #[track_caller]
    pub fn set_local(&mut self, frame: FrameId, index: usize, value: Value) {
        let result = self.frames.set_local(frame, index, value);
        self.check(result)
    }

    /// Run `body` with an exception handler installed.
    ///
    /// If `body` fails, the frame stack is unwound to where it was on entry and the exception is
    /// returned. A payload thrown with [`Heap::throw`] is kept up to date across collections
    /// until then.
    #[track_caller]
    pub fn except_block<R>(
        &mut self,
        body: impl FnOnce(&mut Self) -> Result<R, Thrown>,
    ) -> Result<R, Thrown> {
        let depth = self.excepts.depth();
        let saved_frame = self.frames.current();
        let saved_depth = self.frames.depth();
        self.excepts.push(saved_frame, saved_depth);
        let result = body(self);
        let record = self.excepts.pop_to(depth).unwrap_or(Restore {
            saved_frame,
            saved_depth,
            pending: None,
        });
        match result {
            Ok(value) => {
                if self.frames.current() != record.saved_frame {
                    self.fatal(Violation::ExceptFrameLeak {
                        expected: record.saved_frame,
                        left: self.frames.current(),
                    });
                }
                Ok(value)
            }
            Err(thrown) => {
                self.frames.unwind_to(record.saved_frame);
                if self.frames.current() != record.saved_frame
                    || self.frames.depth() != record.saved_depth
                {
                    self.fatal(Violation::ExceptUnwind {
                        expected: record.saved_frame,
                        left: self.frames.current(),
                    });
                }
                Err(match record.pending {
                    Some(pending) if pending.code == thrown.code => pending,
                    _ => thrown,
                })
            }
        }
    }

    /// Record an exception in the innermost except block. Return the result as `Err` from the
    /// block body.
    #[track_caller]
    pub fn throw(&mut self, code: i32, payload: Value) -> Thrown {
        match self.excepts.raise(code, payload) {
            Some(thrown) => thrown,
            None => self.fatal(Violation::UncaughtThrow(code)),
        }
    }

    pub fn except_depth(&self) -> usize {
        self.excepts.depth()
    }

    pub fn load_module(
        &mut self,
        name: &str,
        search_path: &str,
        rank: Option<ModuleRank>,
    ) -> Result<ModuleRank, ModuleError> {
        self.modules.load(name, search_path, rank)
    }

    pub fn unload_module(&mut self, rank: ModuleRank) -> Result<(), ModuleError> {
        self.modules.unload(rank)
    }

    pub fn module_symbol(
        &self,
        name: &str,
        rank: Option<ModuleRank>,
    ) -> Result<*const c_void, ModuleError> {
        self.modules.symbol(name, rank)
    }

    pub fn set_module_constant(&mut self, rank: ModuleRank, value: Value) -> Result<(), ModuleError> {
        self.modules.set_constant(rank, value)
    }

    pub fn module_constant(&self, rank: ModuleRank) -> Result<Value, ModuleError> {
        self.modules.constant(rank)
    }

    pub fn set_module_extra(&mut self, rank: ModuleRank, extra: usize) -> Result<(), ModuleError> {
        self.modules.set_extra(rank, extra)
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn set_constant(&mut self, index: usize, value: Value) {
        self.constants.set(index, value);
    }

    pub fn constant(&self, index: usize) -> Value {
        self.constants.get(index)
    }

    pub fn constants(&self) -> &ConstantTable {
        &self.constants
    }

    pub fn classify(&self, value: Value) -> ValueKind {
        self.regions.classify(value)
    }

    /// `value` points at an object allocated since the last collection.
    pub fn is_young(&self, value: Value) -> bool {
        matches!(self.classify(value), ValueKind::Birth(_))
    }

    /// Where `value` lives now, if it is a stale birth reference to a promoted object.
    pub fn follow_forwards(&self, value: Value) -> Value {
        self.regions.follow_forwards(value)
    }

    pub fn birth_region(&self) -> RegionBounds {
        self.regions.nursery.bounds()
    }

    pub fn old_region(&self) -> RegionBounds {
        self.regions.old.bounds()
    }

    pub fn statistics(&self) -> HeapStatistics {
        let regions = &self.regions;
        HeapStatistics {
            fixed_live: regions.fixed.live_objects(),
            fixed_live_bytes: regions.fixed.live_words() * WORD_SIZE,
            birth_used: regions.nursery.cursor() * WORD_SIZE,
            birth_capacity: regions.nursery.capacity() * WORD_SIZE,
            remembered: regions.nursery.remembered_len(),
            old_used: regions.old.cursor() * WORD_SIZE,
            old_capacity: regions.old.capacity() * WORD_SIZE,
            ..self.stats.clone()
        }
    }
}
