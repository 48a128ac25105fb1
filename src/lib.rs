//! An in-process, expiry-based batch lookup cache fronting a slow external
//! key/value source.
//!
//! # Features
//! - **Batch Lookups**: One call resolves a whole batch of keys, preserving
//!   request order and answering duplicate keys consistently.
//! - **Deduplicated Fetches**: Concurrent batches missing the same keys share
//!   one source request through an in-flight registry.
//! - **Stale Reads**: Optionally serve expired values immediately and refresh
//!   them in the background instead of blocking.
//! - **Failure Absorption**: Source failures never reach callers; affected
//!   cells are quarantined under an exponential backoff freeze window.
//! - **Observability**: Exposes detailed counters for hit ratios, source
//!   traffic and dropped refreshes.

// Public modules that form the API
pub mod builder;
pub mod column;
pub mod error;
pub mod handles;
pub mod metrics;
pub mod source;
pub mod store;
pub mod typed;

// Internal, crate-only modules
mod backoff;
mod cell;
mod shared;
mod task;
mod time;
mod update;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use cell::Key;
pub use column::StringColumn;
pub use error::{BuildError, LookupError, TypeMismatchError};
pub use handles::LookupCache;
pub use metrics::MetricsSnapshot;
pub use source::{FullScanSource, Source, SourceError};
pub use store::{AttributeStore, DenseColumn};
pub use typed::{AnyLookupCache, AttributeKind};
