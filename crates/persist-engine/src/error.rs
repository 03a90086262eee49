//! Error taxonomy for the engine.
//!
//! Each fallible component defines its own `snafu`-derived error enum so that internal call
//! sites stay precise and independently testable. [`EngineError`] is the type callers going
//! through [`crate::Engine`] actually see; it folds every component error down onto seven kinds
//! (`InvalidArgument`, `NotFound`, `AlreadyExists`, `OutOfSpace`, `IO`, `Conflict`, `Corruption`).

use std::io;

use snafu::Snafu;

use crate::allocator::AllocatorError;
use crate::bptree::BPTreeError;
use crate::list::ListError;
use crate::registry::RegistryError;
use crate::spacemap::SpacemapError;

/// Top-level error returned by [`crate::Engine`] and its handles.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    /// An argument was structurally invalid (e.g. a B+-tree branching factor below 3).
    #[snafu(display("invalid argument: {}", reason))]
    InvalidArgument { reason: String },

    /// The requested key was not present.
    #[snafu(display("not found: {}", reason))]
    NotFound { reason: String },

    /// A duplicate key was inserted where uniqueness is required.
    #[snafu(display("already exists: {}", reason))]
    AlreadyExists { reason: String },

    /// No metaslab had enough contiguous free space to satisfy an allocation.
    #[snafu(display("out of space: requested {} bytes", requested))]
    OutOfSpace { requested: u64 },

    /// The backing store failed a read or write.
    #[snafu(display("I/O error: {}", source))]
    Io { source: io::Error },

    /// A mutation conflicted with an existing snapshot (pop of a pinned tail, clear with live
    /// snapshots).
    #[snafu(display("conflict: {}", reason))]
    Conflict { reason: String },

    /// The on-disk data was internally inconsistent (bad signature, bad checksum, oversize
    /// registry update).
    #[snafu(display("corruption detected: {}", reason))]
    Corruption { reason: String },
}

impl From<io::Error> for EngineError {
    fn from(source: io::Error) -> Self {
        EngineError::Io { source }
    }
}

impl From<SpacemapError> for EngineError {
    fn from(err: SpacemapError) -> Self {
        match err {
            SpacemapError::Io { source } => EngineError::Io { source },
            SpacemapError::OutOfSpace { requested } => EngineError::OutOfSpace { requested },
            SpacemapError::Corruption { reason } => EngineError::Corruption { reason },
        }
    }
}

impl From<AllocatorError> for EngineError {
    fn from(err: AllocatorError) -> Self {
        match err {
            AllocatorError::Io { source } => EngineError::Io { source },
            AllocatorError::OutOfSpace { requested } => EngineError::OutOfSpace { requested },
            AllocatorError::InvalidArgument { reason } => EngineError::InvalidArgument { reason },
            AllocatorError::Corruption { reason } => EngineError::Corruption { reason },
        }
    }
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Io { source } => EngineError::Io { source },
            RegistryError::NotFound { reason } => EngineError::NotFound { reason },
            RegistryError::Corruption { reason } => EngineError::Corruption { reason },
            RegistryError::Allocator { source } => source.into(),
        }
    }
}

impl From<ListError> for EngineError {
    fn from(err: ListError) -> Self {
        match err {
            ListError::Io { source } => EngineError::Io { source },
            ListError::Conflict { reason } => EngineError::Conflict { reason },
            ListError::Registry { source } => source.into(),
            ListError::Allocator { source } => source.into(),
        }
    }
}

impl From<BPTreeError> for EngineError {
    fn from(err: BPTreeError) -> Self {
        match err {
            BPTreeError::InvalidArgument { reason } => EngineError::InvalidArgument { reason },
            BPTreeError::NotFound { reason } => EngineError::NotFound { reason },
            BPTreeError::AlreadyExists { reason } => EngineError::AlreadyExists { reason },
        }
    }
}
