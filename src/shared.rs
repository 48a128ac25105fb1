use crate::cell::CellTable;
use crate::metrics::Metrics;
use crate::store::AttributeStore;
use crate::task::worker::UpdateWorkerPool;
use crate::time::{self, Nanos, NEVER_EXPIRES};
use crate::update::{InFlightMap, UpdateQueue};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::Rng;

/// Uniform jitter range applied to refreshed cells. A range of (0, 0) means
/// entries never expire.
///
/// The jitter spreads the deadlines of cells refreshed together, so a batch
/// merge does not produce a synchronized mass-expiry later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TtlRange {
  pub(crate) min: Duration,
  pub(crate) max: Duration,
}

impl TtlRange {
  pub(crate) fn never_expires(&self) -> bool {
    self.min.is_zero() && self.max.is_zero()
  }

  /// Draws a fresh expiry deadline for a cell refreshed at `now`.
  pub(crate) fn fresh_deadline(&self, rng: &mut SmallRng, now: Nanos) -> Nanos {
    if self.never_expires() {
      return NEVER_EXPIRES;
    }
    let min = time::duration_nanos(self.min);
    let max = time::duration_nanos(self.max);
    now.saturating_add(rng.random_range(min..=max))
  }
}

/// The lock-protected mutable core: the cell table, its parallel payload
/// store, and the jitter rng.
///
/// The rng lives here so expiry draws happen under the write lock a merge
/// already holds, without a lock of its own.
pub(crate) struct CacheState<V, H> {
  pub(crate) cells: CellTable<H>,
  pub(crate) attrs: Box<dyn AttributeStore<V>>,
  pub(crate) rng: SmallRng,
}

/// The internal, thread-safe core of the cache.
///
/// Locking discipline: the classify pass and answer preparation take the
/// `state` read lock once per batch; merges take the write lock once per
/// unit. The in-flight registry has its own mutex. Counters are relaxed
/// atomics outside any lock.
pub(crate) struct CacheShared<V: Send + Sync, H> {
  pub(crate) state: Arc<RwLock<CacheState<V, H>>>,
  pub(crate) registry: Arc<Mutex<InFlightMap>>,
  pub(crate) queue: UpdateQueue,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) ttl: TtlRange,
  pub(crate) allow_read_expired_keys: bool,
  pub(crate) workers: UpdateWorkerPool,
}

impl<V: Send + Sync, H> fmt::Debug for CacheShared<V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("ttl", &self.ttl)
      .field("allow_read_expired_keys", &self.allow_read_expired_keys)
      .field("update_workers", &self.workers.len())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<V: Send + Sync, H> Drop for CacheShared<V, H> {
  fn drop(&mut self) {
    // Workers drain whatever is still queued, then observe the closed
    // channel and exit.
    self.queue.close();
  }
}
