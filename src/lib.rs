//! Precise generational moving garbage collector for language runtimes.
//!
//! The collector knows nothing about object layout. The host runtime describes its objects
//! through an [`ObjectTracer`], keeps its local references in explicit root frames and calls the
//! write barrier when it stores a young reference into an old or fixed object.
//!
//! ```
//! use qish::{Address, Config, Heap, ObjectTracer, Value, Visitor, Word};
//!
//! /// Objects are `[tagged field count, fields...]`.
//! struct Host;
//!
//! fn size(header: Word) -> usize {
//!     (1 + Value::from_raw(header).as_integer().unwrap() as usize).max(2)
//! }
//!
//! impl ObjectTracer for Host {
//!     fn copy(&self, dst: &mut [Word], src: &[Word]) -> usize {
//!         let words = size(src[0]);
//!         dst[..words].copy_from_slice(&src[..words]);
//!         words
//!     }
//!     fn scan_minor(&self, object: Address, visitor: &mut Visitor<'_, Self>) -> Address {
//!         let words = size(visitor.load(object));
//!         for field in 1..words {
//!             visitor.visit_slot(object.add(field));
//!         }
//!         object.add(words)
//!     }
//!     fn scan_fixed_minor(&self, payload: Address, words: usize, visitor: &mut Visitor<'_, Self>) {
//!         for field in 0..words {
//!             visitor.visit_slot(payload.add(field));
//!         }
//!     }
//! }
//!
//! qish::frame_descriptor!(static MAIN: "main", params = 0, locals = 1);
//!
//! let mut heap = Heap::new(Config::default(), Host).unwrap();
//! let frame = heap.enter_frame(&MAIN, &[]);
//! let object = heap.allocate(2 * qish::WORD_SIZE);
//! heap.store(object, Value::tagged(1).raw());
//! heap.store(object.add(1), Value::tagged(42).raw());
//! heap.set_local(frame, 0, object.into());
//!
//! heap.collect(0, false);
//! let promoted = heap.local(frame, 0).as_address().unwrap();
//! assert!(heap.old_region().contains(promoted));
//! assert_eq!(heap.read(promoted.add(1)), Value::tagged(42));
//! heap.exit_frame(frame);
//! ```

macro_rules! logln_if {
    ($cond: expr, $($t:tt)*) => {
        if $cond {
            tracing::info!($($t)*);
        }
    };
}

pub mod bump_pointer_space;
pub mod constants;
pub mod error;
pub mod except;
pub mod fixed_space;
pub mod forwarding;
pub mod generational;
pub mod header;
pub mod heap;
pub mod mmap;
pub mod modules;
pub mod nursery;
pub mod shadow_stack;
pub mod size_class;
pub mod space;
pub mod statistics;
pub mod util;
pub mod value;
pub mod visitor;
pub mod write_barrier;


pub use constants::ConstantTable;
pub use error::{FatalMode, HeapError, ModuleError, Violation};
pub use except::Thrown;
pub use generational::{GcPhase, GcReason};
pub use header::Destructor;
pub use heap::Heap;
pub use modules::{ModuleRank, ModuleRegistry};
pub use shadow_stack::{FrameDescriptor, FrameId};
pub use space::RegionBounds;
pub use statistics::HeapStatistics;
pub use util::{Word, WORD_SIZE};
pub use value::{Address, Space, Value, ValueKind};
pub use visitor::{ObjectTracer, Visitor};

use nursery::STORE_BUFFER_SLACK;
use value::MAX_OFFSET_WORDS;

/// Smallest accepted [`Config::safety_margin`].
pub const MIN_SAFETY_MARGIN: usize = 2 * STORE_BUFFER_SLACK;

/// Configure the heap.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Size of the birth region in bytes, store buffer included.
    pub birth_size: usize,
    /// Size of an old semispace in bytes. A full collection maps a larger one when the live data
    /// plus one birth region would not fit.
    pub old_size: usize,
    /// Words kept free between the allocation cursor and the store buffer.
    pub safety_margin: usize,
    /// Initial number of global constant slots. Must be a power of two.
    pub constant_capacity: usize,
    /// Number of module ranks, rank 0 included.
    pub max_modules: usize,
    /// Live fixed bytes that schedule a full collection. After every full collection the
    /// threshold becomes twice the surviving fixed data, but never less than this.
    pub fixed_threshold: usize,
    /// Skip barrier calls for slots among the last three remembered ones.
    pub store_buffer_dedup: bool,
    /// Enables verbose printing
    pub verbose: bool,
    pub on_fatal: FatalMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            birth_size: 4 * 1024 * 1024,
            old_size: 32 * 1024 * 1024,
            safety_margin: 64,
            constant_capacity: 1024,
            max_modules: 256,
            fixed_threshold: 8 * 1024 * 1024,
            store_buffer_dedup: true,
            verbose: false,
            on_fatal: FatalMode::Abort,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), HeapError> {
        let invalid = |message: String| Err(HeapError::InvalidConfig(message));
        let birth_words = self.birth_size / WORD_SIZE;
        if self.safety_margin < MIN_SAFETY_MARGIN {
            return invalid(format!(
                "safety margin of {} words is below {}",
                self.safety_margin, MIN_SAFETY_MARGIN
            ));
        }
        if birth_words < 2 * self.safety_margin {
            return invalid(format!(
                "birth region of {} words cannot hold twice the safety margin",
                birth_words
            ));
        }
        if self.old_size < self.birth_size {
            return invalid(format!(
                "old region ({} bytes) is smaller than the birth region ({} bytes)",
                self.old_size, self.birth_size
            ));
        }
        if self.old_size / WORD_SIZE > MAX_OFFSET_WORDS / 4 {
            return invalid(format!("old region of {} bytes is too large", self.old_size));
        }
        if !self.constant_capacity.is_power_of_two() {
            return invalid(format!(
                "constant capacity {} is not a power of two",
                self.constant_capacity
            ));
        }
        if self.max_modules < 2 {
            return invalid("at least one module rank is required".to_owned());
        }
        Ok(())
    }
}

pub mod c_api {
    //! `extern "C"` surface. References cross the boundary as raw [`Word`]s.

    use std::ffi::c_void;
    use std::ptr::null_mut;

    use crate::{
        error::{fatal, Violation},
        header::Destructor,
        Address, Config, Heap, ObjectTracer, Value, Visitor, Word,
    };

    pub type QishCopy = extern "C" fn(
        data: *mut c_void,
        dst: *mut Word,
        dst_words: usize,
        src: *const Word,
        src_words: usize,
    ) -> usize;
    pub type QishScan =
        extern "C" fn(data: *mut c_void, visitor: *mut QishVisitor, object: Word) -> Word;
    pub type QishScanFixed =
        extern "C" fn(data: *mut c_void, visitor: *mut QishVisitor, payload: Word, words: usize);
    pub type QishRoots = extern "C" fn(data: *mut c_void, visitor: *mut QishVisitor);
    pub type QishHook = extern "C" fn(data: *mut c_void);
    pub type QishDestructor =
        extern "C" fn(data: *mut c_void, payload: Word, words: *mut Word, len: usize);

    /// Callback table implementing [`ObjectTracer`] for C hosts. Optional entries may be null.
    #[repr(C)]
    #[derive(Clone, Copy)]
    pub struct QishCallbacks {
        pub data: *mut c_void,
        pub copy: QishCopy,
        pub scan_minor: QishScan,
        pub scan_full: Option<QishScan>,
        pub scan_fixed_minor: QishScanFixed,
        pub scan_fixed_full: Option<QishScanFixed>,
        pub extra_minor_roots: Option<QishRoots>,
        pub extra_full_roots: Option<QishRoots>,
        pub before_full: Option<QishHook>,
        pub after_full: Option<QishHook>,
    }

    /// Opaque visitor handle passed to scan callbacks.
    #[repr(C)]
    pub struct QishVisitor {
        _private: [u8; 0],
    }

    pub struct CallbackTracer {
        callbacks: QishCallbacks,
    }

    pub type QishHeap = Heap<CallbackTracer>;

    fn raw_visitor(visitor: &mut Visitor<'_, CallbackTracer>) -> *mut QishVisitor {
        visitor as *mut Visitor<'_, CallbackTracer> as *mut QishVisitor
    }

    fn next_address(visitor: &Visitor<'_, CallbackTracer>, raw: Word) -> Address {
        match Address::from_raw(raw) {
            Some(next) => next,
            None => fatal(visitor.regions.fatal, Violation::DanglingReference(raw)),
        }
    }

    impl ObjectTracer for CallbackTracer {
        fn copy(&self, dst: &mut [Word], src: &[Word]) -> usize {
            (self.callbacks.copy)(
                self.callbacks.data,
                dst.as_mut_ptr(),
                dst.len(),
                src.as_ptr(),
                src.len(),
            )
        }

        fn scan_minor(&self, object: Address, visitor: &mut Visitor<'_, Self>) -> Address {
            let next = (self.callbacks.scan_minor)(
                self.callbacks.data,
                raw_visitor(visitor),
                object.raw(),
            );
            next_address(visitor, next)
        }

        fn scan_full(&self, object: Address, visitor: &mut Visitor<'_, Self>) -> Address {
            let scan = self.callbacks.scan_full.unwrap_or(self.callbacks.scan_minor);
            let next = scan(self.callbacks.data, raw_visitor(visitor), object.raw());
            next_address(visitor, next)
        }

        fn scan_fixed_minor(&self, payload: Address, words: usize, visitor: &mut Visitor<'_, Self>) {
            (self.callbacks.scan_fixed_minor)(
                self.callbacks.data,
                raw_visitor(visitor),
                payload.raw(),
                words,
            )
        }

        fn scan_fixed_full(&self, payload: Address, words: usize, visitor: &mut Visitor<'_, Self>) {
            let scan = self
                .callbacks
                .scan_fixed_full
                .unwrap_or(self.callbacks.scan_fixed_minor);
            scan(self.callbacks.data, raw_visitor(visitor), payload.raw(), words)
        }

        fn extra_minor_roots(&self, visitor: &mut Visitor<'_, Self>) {
            if let Some(roots) = self.callbacks.extra_minor_roots {
                roots(self.callbacks.data, raw_visitor(visitor));
            }
        }

        fn extra_full_roots(&self, visitor: &mut Visitor<'_, Self>) {
            if let Some(roots) = self.callbacks.extra_full_roots {
                roots(self.callbacks.data, raw_visitor(visitor));
            }
        }

        fn before_full(&self) {
            if let Some(hook) = self.callbacks.before_full {
                hook(self.callbacks.data);
            }
        }

        fn after_full(&self) {
            if let Some(hook) = self.callbacks.after_full {
                hook(self.callbacks.data);
            }
        }
    }

    fn address(heap: &QishHeap, raw: Word) -> Address {
        match Address::from_raw(raw) {
            Some(address) => address,
            None => heap.fatal(Violation::DanglingReference(raw)),
        }
    }

    fn destructor(callback: Option<QishDestructor>, data: *mut c_void) -> Option<Destructor> {
        callback.map(|callback| {
            Box::new(move |payload: Address, words: &mut [Word]| {
                callback(data, payload.raw(), words.as_mut_ptr(), words.len())
            }) as Destructor
        })
    }

    #[no_mangle]
    pub extern "C" fn qish_default_config() -> Config {
        Config::default()
    }

    /// Create a heap. NULL is returned if the configuration is invalid or mapping fails.
    #[no_mangle]
    pub extern "C" fn qish_heap_create(config: Config, callbacks: QishCallbacks) -> *mut QishHeap {
        match Heap::new(config, CallbackTracer { callbacks }) {
            Ok(heap) => Box::into_raw(Box::new(heap)),
            Err(error) => {
                tracing::error!("heap creation failed: {}", error);
                null_mut()
            }
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_heap_free(heap: *mut QishHeap) {
        if heap.is_null() {
            return;
        }
        unsafe {
            drop(Box::from_raw(heap));
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_collect(heap: *mut QishHeap, size: usize, full: bool) {
        unsafe { (*heap).collect(size, full) }
    }

    #[no_mangle]
    pub extern "C" fn qish_allocate(heap: *mut QishHeap, size: usize) -> Word {
        unsafe { (*heap).allocate(size).raw() }
    }

    #[no_mangle]
    pub extern "C" fn qish_allocate_aligned(heap: *mut QishHeap, size: usize, align: usize) -> Word {
        unsafe { (*heap).allocate_aligned(size, align).raw() }
    }

    #[no_mangle]
    pub extern "C" fn qish_allocate_fixed(
        heap: *mut QishHeap,
        size: usize,
        callback: Option<QishDestructor>,
        data: *mut c_void,
    ) -> Word {
        unsafe { (*heap).allocate_fixed(size, destructor(callback, data)).raw() }
    }

    #[no_mangle]
    pub extern "C" fn qish_allocate_fixed_executable(
        heap: *mut QishHeap,
        size: usize,
        callback: Option<QishDestructor>,
        data: *mut c_void,
    ) -> Word {
        unsafe {
            (*heap)
                .allocate_fixed_executable(size, destructor(callback, data))
                .raw()
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_forget_fixed(heap: *mut QishHeap, object: Word) {
        unsafe {
            let heap = &mut *heap;
            let object = address(heap, object);
            heap.forget_fixed(object)
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_notify_store(heap: *mut QishHeap, slot: Word) {
        unsafe {
            let heap = &mut *heap;
            let slot = address(heap, slot);
            heap.notify_store(slot)
        }
    }

    /// Store `value` into `slot` with the write barrier.
    #[no_mangle]
    pub extern "C" fn qish_write(heap: *mut QishHeap, slot: Word, value: Word) {
        unsafe {
            let heap = &mut *heap;
            let slot = address(heap, slot);
            heap.write(slot, Value::from_raw(value))
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_load(heap: *mut QishHeap, addr: Word) -> Word {
        unsafe {
            let heap = &*heap;
            heap.load(address(heap, addr))
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_store(heap: *mut QishHeap, addr: Word, word: Word) {
        unsafe {
            let heap = &mut *heap;
            let addr = address(heap, addr);
            heap.store(addr, word)
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_set_constant(heap: *mut QishHeap, index: usize, value: Word) {
        unsafe { (*heap).set_constant(index, Value::from_raw(value)) }
    }

    #[no_mangle]
    pub extern "C" fn qish_constant(heap: *mut QishHeap, index: usize) -> Word {
        unsafe { (*heap).constant(index).raw() }
    }

    #[no_mangle]
    pub extern "C" fn qish_follow_forwards(heap: *mut QishHeap, value: Word) -> Word {
        unsafe { (*heap).follow_forwards(Value::from_raw(value)).raw() }
    }

    #[no_mangle]
    pub extern "C" fn qish_is_young(heap: *mut QishHeap, value: Word) -> bool {
        unsafe { (*heap).is_young(Value::from_raw(value)) }
    }

    /// Forward the reference stored at `slot`. Only valid inside scan and root callbacks.
    #[no_mangle]
    pub extern "C" fn qish_visit_slot(visitor: *mut QishVisitor, slot: Word) {
        unsafe {
            let visitor = &mut *(visitor as *mut Visitor<'_, CallbackTracer>);
            let slot = next_address(visitor, slot);
            visitor.visit_slot(slot)
        }
    }

    /// Forward a reference the host keeps outside of the heap.
    #[no_mangle]
    pub extern "C" fn qish_visit_value(visitor: *mut QishVisitor, value: *mut Word) {
        unsafe {
            let visitor = &mut *(visitor as *mut Visitor<'_, CallbackTracer>);
            let mut forwarded = Value::from_raw(*value);
            visitor.visit_value(&mut forwarded);
            *value = forwarded.raw();
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_visitor_load(visitor: *mut QishVisitor, addr: Word) -> Word {
        unsafe {
            let visitor = &*(visitor as *const Visitor<'_, CallbackTracer>);
            visitor.load(next_address(visitor, addr))
        }
    }

    #[no_mangle]
    pub extern "C" fn qish_visitor_is_full(visitor: *mut QishVisitor) -> bool {
        unsafe { (*(visitor as *const Visitor<'_, CallbackTracer>)).is_full() }
    }
}
