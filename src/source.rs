use crate::cell::Key;

use core::fmt;

use ahash::HashSet;

/// Error returned by a source fetch.
///
/// The update workers treat a timeout identically to a plain failure: the
/// affected cells are quarantined under the backoff freeze window and the
/// waiting callers receive stale or defaulted answers, never the error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
  /// The source could not serve the request.
  Unavailable(String),
  /// The source did not answer within its own deadline.
  Timeout,
}

impl fmt::Display for SourceError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SourceError::Unavailable(reason) => write!(f, "source unavailable: {reason}"),
      SourceError::Timeout => write!(f, "source request timed out"),
    }
  }
}

impl std::error::Error for SourceError {}

/// A batch key/value provider sitting behind the cache.
///
/// `fetch` follows the sparse contract: the returned rows cover only the keys
/// the source knows; every other requested key is treated as confirmed
/// absent. Different workers may call `fetch` concurrently for disjoint key
/// sets.
pub trait Source<V>: Send + Sync {
  fn fetch(&self, keys: &[Key]) -> Result<Vec<(Key, V)>, SourceError>;
}

impl<V, F> Source<V> for F
where
  F: Fn(&[Key]) -> Result<Vec<(Key, V)>, SourceError> + Send + Sync,
{
  fn fetch(&self, keys: &[Key]) -> Result<Vec<(Key, V)>, SourceError> {
    self(keys)
  }
}

/// Adapter for sources that can only stream their entire contents.
///
/// The scan result is filtered down to the requested keys on this side, so
/// the cache core sees the same sparse contract either way.
pub struct FullScanSource<F> {
  scan: F,
}

impl<F> FullScanSource<F> {
  pub fn new(scan: F) -> Self {
    Self { scan }
  }
}

impl<V, F> Source<V> for FullScanSource<F>
where
  F: Fn() -> Result<Vec<(Key, V)>, SourceError> + Send + Sync,
{
  fn fetch(&self, keys: &[Key]) -> Result<Vec<(Key, V)>, SourceError> {
    let requested: HashSet<Key> = keys.iter().copied().collect();
    let rows = (self.scan)()?;
    Ok(
      rows
        .into_iter()
        .filter(|(key, _)| requested.contains(key))
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn full_scan_filters_to_requested_keys() {
    let source = FullScanSource::new(|| Ok(vec![(1u64, 10u64), (2, 20), (3, 30)]));
    let rows = source.fetch(&[2, 9]).unwrap();
    assert_eq!(rows, vec![(2, 20)]);
  }

  #[test]
  fn full_scan_propagates_source_errors() {
    let source = FullScanSource::new(|| -> Result<Vec<(Key, u64)>, SourceError> {
      Err(SourceError::Timeout)
    });
    assert_eq!(source.fetch(&[1]), Err(SourceError::Timeout));
  }
}
