//! Concurrency and failure-safety primitives shared by the wallet SDK.
//!
//! Chain-specific code fans batches of independent work (address derivation, balance lookups,
//! ...) out through [`concurrent`], and every function exported to a host language wraps its
//! body with one of the [`recover`] guards so a Rust panic never crosses the boundary.

pub(crate) mod error;

pub use error::Error;
pub use error::Result;

/// Bounded, order-preserving, fail-fast concurrent mapping over a batch of items.
pub mod concurrent;

/// Panic recovery and normalization of failures into [`recover::BasicError`].
pub mod recover;

/// Settings read from the process environment.
pub mod config;

/// Process-wide tokio runtime used by synchronous entry points.
pub mod runtime;

/// Logging setup for hosts embedding the SDK.
pub mod setup_tracing;

pub use concurrent::{
    map_concurrent, map_concurrent_blocking, map_concurrent_sync, map_strings_concurrent,
};
pub use recover::{BasicError, guard, guard_and_normalize, guard_async, normalize, normalize_error};
