use std::hash::{BuildHasherDefault, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lookup_cache::{Key, Source, SourceError};

// A hasher that uses the key's own value as its hash, making slot placement
// predictable: for a table of N slots, key k lands in slot k % N, and key 0
// always occupies slot 0.
#[derive(Default)]
pub struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
  fn finish(&self) -> u64 {
    self.0
  }
  fn write(&mut self, _: &[u8]) {
    unimplemented!()
  }
  fn write_u64(&mut self, value: u64) {
    self.0 = value;
  }
}

pub type IdentityBuildHasher = BuildHasherDefault<IdentityHasher>;

/// A fixed-row source that counts how many fetches it served.
pub struct CountingSource<V> {
  rows: Vec<(Key, V)>,
  fetches: Arc<AtomicUsize>,
}

impl<V> CountingSource<V> {
  pub fn new(rows: Vec<(Key, V)>) -> Self {
    Self {
      rows,
      fetches: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn fetch_counter(&self) -> Arc<AtomicUsize> {
    Arc::clone(&self.fetches)
  }
}

impl<V: Clone + Send + Sync> Source<V> for CountingSource<V> {
  fn fetch(&self, keys: &[Key]) -> Result<Vec<(Key, V)>, SourceError> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    Ok(
      self
        .rows
        .iter()
        .filter(|(key, _)| keys.contains(key))
        .cloned()
        .collect(),
    )
  }
}
