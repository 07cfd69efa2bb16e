use crate::generational::GcPhase;
use crate::shadow_stack::FrameId;
use crate::value::Address;
use std::io::{self, Write};
use std::panic::Location;
use thiserror::Error;

/// What [`fatal`] does after reporting.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
#[repr(C)]
pub enum FatalMode {
    /// Flush stdio and abort the process.
    #[default]
    Abort,
    /// Panic with the violation message. Meant for tests.
    Panic,
}

/// Errors returned while setting up a heap.
#[derive(Debug, Error)]
pub enum HeapError {
    #[error("invalid heap configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to map the {region} region ({size} bytes)")]
    Map {
        region: &'static str,
        size: usize,
        #[source]
        source: io::Error,
    },
}

/// Errors reported by the module registry.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("module `{name}` not found in search path `{search_path}`")]
    NotFound { name: String, search_path: String },
    #[error("failed to load module `{name}`")]
    Load {
        name: String,
        #[source]
        source: libloading::Error,
    },
    #[error("module rank {0} is already in use")]
    RankInUse(usize),
    #[error("module rank {rank} is out of range (1..{max})")]
    InvalidRank { rank: usize, max: usize },
    #[error("no module loaded at rank {0}")]
    NoSuchRank(usize),
    #[error("symbol `{name}` not found")]
    MissingSymbol {
        name: String,
        #[source]
        source: Option<libloading::Error>,
    },
    #[error("module table is full ({0} modules)")]
    TableFull(usize),
}

/// Unrecoverable misuse of the collector protocol or resource exhaustion.
#[derive(Debug, Error)]
pub enum Violation {
    #[error("exiting frame {found:?} while the current frame is {current:?}")]
    FrameMismatch {
        current: Option<FrameId>,
        found: FrameId,
    },
    #[error("frame `{name}` declares {declared} parameters but {given} were supplied")]
    FrameArity {
        name: &'static str,
        declared: usize,
        given: usize,
    },
    #[error("{kind} {index} out of range for frame `{name}` ({count} declared)")]
    SlotOutOfRange {
        name: &'static str,
        kind: &'static str,
        index: usize,
        count: usize,
    },
    #[error("{0:?} is not a live frame")]
    UnknownFrame(FrameId),
    #[error("allocation requested while the collector is {0:?}")]
    AllocationInGc(GcPhase),
    #[error("collection requested while the collector is {0:?}")]
    NestedCollection(GcPhase),
    #[error("exception {0} thrown outside of any except block")]
    UncaughtThrow(i32),
    #[error("except block returned normally with frame {left:?} still entered (expected {expected:?})")]
    ExceptFrameLeak {
        expected: Option<FrameId>,
        left: Option<FrameId>,
    },
    #[error("except block cannot unwind to frame {expected:?}, the current frame is {left:?}")]
    ExceptUnwind {
        expected: Option<FrameId>,
        left: Option<FrameId>,
    },
    #[error("allocation of {requested} bytes exceeds the birth region ({capacity} bytes usable)")]
    ObjectTooLarge { requested: usize, capacity: usize },
    #[error("alignment {0} is not a power of two between one and 32 words")]
    BadAlignment(usize),
    #[error("copy callback returned {copied} words for {object:?} ({available} words available)")]
    BadCopy {
        object: Address,
        copied: usize,
        available: usize,
    },
    #[error("scan callback returned {next:?} for {object:?} (scan limit {limit})")]
    BadScan {
        object: Address,
        next: Address,
        limit: usize,
    },
    #[error("dangling reference {0:#x}")]
    DanglingReference(usize),
    #[error("corrupt fixed object header at offset {0}")]
    CorruptFixedHeader(usize),
    #[error("{0:?} is not the start of a live fixed object")]
    NotFixed(Address),
    #[error("failed to map the old region ({size} bytes)")]
    RegionMap {
        size: usize,
        #[source]
        source: io::Error,
    },
}

/// Report `violation` and stop.
#[cold]
#[inline(never)]
#[track_caller]
pub fn fatal(mode: FatalMode, violation: Violation) -> ! {
    let location = Location::caller();
    tracing::error!(
        file = location.file(),
        line = location.line(),
        "fatal collector error: {}",
        violation
    );
    match mode {
        FatalMode::Panic => panic!("qish: {} ({})", violation, location),
        FatalMode::Abort => {
            eprintln!(
                "qish: fatal: {} at {}:{}",
                violation,
                location.file(),
                location.line()
            );
            eprintln!("{:?}", backtrace::Backtrace::new());
            let _ = io::stdout().flush();
            let _ = io::stderr().flush();
            unsafe {
                libc::fflush(std::ptr::null_mut());
            }
            std::process::abort()
        }
    }
}
