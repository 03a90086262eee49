//! A single-node persistent data-structure engine.
//!
//! The engine is built from a handful of tightly coupled subsystems:
//!
//! - [`spacemap`]: a per-metaslab first-fit allocator backed by an append-only log.
//! - [`allocator`]: partitions a backing file into metaslabs and dispatches allocate/free calls.
//! - [`registry`]: a persistent, bump-allocated index of named data-structure records, with
//!   support for logical snapshots.
//! - [`list`]: a persistent, append-only linked list bound to one registry entry.
//! - [`bptree`]: an in-memory B+-tree over fixed-width integer keys, with a doubly-linked leaf
//!   chain for range scans.
//!
//! [`Engine`] is the facade that wires these together: it owns the allocator and registry, and
//! hands out handles (such as [`list::ListHandle`]) bound to a single registry entry.
//!
//! The engine is single-threaded and synchronous: every public operation is atomic from the
//! caller's perspective, and no component performs internal locking. Callers that want to share
//! an `Engine` across threads must wrap it in their own mutual exclusion.

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

#[macro_use]
extern crate tracing;

pub mod allocator;
pub mod bptree;
pub mod codec;
mod constants;
mod engine;
pub mod error;
pub mod io;
pub mod list;
pub mod registry;
pub mod spacemap;

pub use constants::*;
pub use engine::{Engine, EngineConfigBuilder, ListHandle};
pub use error::EngineError;

/// Convenience alias for fallible engine operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
