use crate::error::TypeMismatchError;
use crate::handles::LookupCache;

use core::fmt;

/// The attribute types the type-erased facade can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
  UInt64,
  Int64,
  Float64,
  String,
}

impl fmt::Display for AttributeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AttributeKind::UInt64 => write!(f, "uint64"),
      AttributeKind::Int64 => write!(f, "int64"),
      AttributeKind::Float64 => write!(f, "float64"),
      AttributeKind::String => write!(f, "string"),
    }
  }
}

/// A type-erased handle over the supported attribute caches.
///
/// Callers that discover attribute types at runtime route through this
/// facade; a typed accessor that disagrees with the stored kind fails
/// immediately with [`TypeMismatchError`], before any fetch is attempted.
pub enum AnyLookupCache {
  UInt64(LookupCache<u64>),
  Int64(LookupCache<i64>),
  Float64(LookupCache<f64>),
  String(LookupCache<String>),
}

impl AnyLookupCache {
  pub fn kind(&self) -> AttributeKind {
    match self {
      AnyLookupCache::UInt64(_) => AttributeKind::UInt64,
      AnyLookupCache::Int64(_) => AttributeKind::Int64,
      AnyLookupCache::Float64(_) => AttributeKind::Float64,
      AnyLookupCache::String(_) => AttributeKind::String,
    }
  }

  pub fn as_uint64(&self) -> Result<&LookupCache<u64>, TypeMismatchError> {
    match self {
      AnyLookupCache::UInt64(cache) => Ok(cache),
      other => Err(TypeMismatchError {
        expected: AttributeKind::UInt64,
        found: other.kind(),
      }),
    }
  }

  pub fn as_int64(&self) -> Result<&LookupCache<i64>, TypeMismatchError> {
    match self {
      AnyLookupCache::Int64(cache) => Ok(cache),
      other => Err(TypeMismatchError {
        expected: AttributeKind::Int64,
        found: other.kind(),
      }),
    }
  }

  pub fn as_float64(&self) -> Result<&LookupCache<f64>, TypeMismatchError> {
    match self {
      AnyLookupCache::Float64(cache) => Ok(cache),
      other => Err(TypeMismatchError {
        expected: AttributeKind::Float64,
        found: other.kind(),
      }),
    }
  }

  pub fn as_string(&self) -> Result<&LookupCache<String>, TypeMismatchError> {
    match self {
      AnyLookupCache::String(cache) => Ok(cache),
      other => Err(TypeMismatchError {
        expected: AttributeKind::String,
        found: other.kind(),
      }),
    }
  }
}

impl fmt::Debug for AnyLookupCache {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("AnyLookupCache").field(&self.kind()).finish()
  }
}
