use crate::typed::AttributeKind;

use core::fmt;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  /// The cell table was configured with zero slots.
  ZeroSlots,
  /// No source was configured; the cache cannot resolve misses without one.
  SourceRequired,
  /// The TTL range minimum exceeds its maximum.
  InvalidTtlRange,
  /// The backoff growth factor must be at least 1.
  ZeroBackoffFactor,
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BuildError::ZeroSlots => write!(f, "cell table slot count cannot be zero"),
      BuildError::SourceRequired => write!(f, "a source must be configured before building"),
      BuildError::InvalidTtlRange => write!(f, "ttl range minimum cannot exceed its maximum"),
      BuildError::ZeroBackoffFactor => write!(f, "backoff growth factor cannot be zero"),
    }
  }
}

impl std::error::Error for BuildError {}

/// Errors surfaced by a batch lookup.
///
/// Source failures never appear here; they are absorbed into stale or
/// defaulted answers plus a backoff freeze window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
  /// The update queue is at capacity. The synchronous path propagates this
  /// as a request failure; the allow-stale path drops the refresh instead.
  QueueFull,
}

impl fmt::Display for LookupError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LookupError::QueueFull => write!(f, "update queue is at capacity"),
    }
  }
}

impl std::error::Error for LookupError {}

/// An attribute was requested through a typed accessor that does not match
/// the stored attribute type. Fatal to the single request; nothing is
/// fetched or retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMismatchError {
  pub expected: AttributeKind,
  pub found: AttributeKind,
}

impl fmt::Display for TypeMismatchError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "attribute type mismatch: requested {}, stored {}",
      self.expected, self.found
    )
  }
}

impl std::error::Error for TypeMismatchError {}
