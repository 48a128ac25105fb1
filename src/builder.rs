use crate::backoff::BackoffController;
use crate::cell::CellTable;
use crate::error::BuildError;
use crate::handles::LookupCache;
use crate::metrics::Metrics;
use crate::shared::{CacheShared, CacheState, TtlRange};
use crate::source::Source;
use crate::store::{AttributeStore, DenseColumn};
use crate::task::worker::{UpdateWorkerPool, WorkerContext};
use crate::update::{InFlightMap, UpdateQueue};

use std::hash::BuildHasher;
use std::sync::Arc;
use std::time::Duration;

use ahash::HashMapExt;
use parking_lot::{Mutex, RwLock};
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// A builder for configuring and creating a [`LookupCache`].
pub struct CacheBuilder<V: Send, H = ahash::RandomState> {
  slots: usize,
  ttl: TtlRange,
  allow_read_expired_keys: bool,
  update_queue_capacity: usize,
  update_workers: usize,
  backoff_initial: Duration,
  backoff_factor: u32,
  backoff_max: Duration,
  hasher: H,
  seed: Option<u64>,
  source: Option<Arc<dyn Source<V>>>,
  attribute_store: Option<Box<dyn AttributeStore<V>>>,
}

impl<V: Send> CacheBuilder<V, ahash::RandomState> {
  pub fn new() -> Self {
    Self::with_hasher(ahash::RandomState::default())
  }
}

impl<V: Send> Default for CacheBuilder<V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

impl<V: Send, H> CacheBuilder<V, H> {
  /// Creates a builder with a specific hasher for cell placement.
  pub fn with_hasher(hasher: H) -> Self {
    Self {
      slots: 1024,
      ttl: TtlRange {
        min: Duration::ZERO,
        max: Duration::ZERO,
      },
      allow_read_expired_keys: false,
      update_queue_capacity: 512,
      update_workers: num_cpus::get().clamp(1, 4),
      backoff_initial: Duration::from_secs(1),
      backoff_factor: 2,
      backoff_max: Duration::from_secs(120),
      hasher,
      seed: None,
      source: None,
      attribute_store: None,
    }
  }

  /// The number of cells, rounded up to the next power of two at build time.
  /// Must be non-zero.
  pub fn slots(mut self, slots: usize) -> Self {
    self.slots = slots;
    self
  }

  /// The uniform jitter range for cell lifetimes. A range of (0, 0) means
  /// entries never expire.
  pub fn ttl_range(mut self, min: Duration, max: Duration) -> Self {
    self.ttl = TtlRange { min, max };
    self
  }

  /// When set, batches whose only unanswerable keys are expired return the
  /// stale values immediately and refresh in the background instead of
  /// blocking.
  pub fn allow_read_expired_keys(mut self, allow: bool) -> Self {
    self.allow_read_expired_keys = allow;
    self
  }

  /// The maximum number of update units waiting for a worker. A capacity of
  /// zero makes every enqueue fail, which is mostly useful in tests.
  pub fn update_queue_capacity(mut self, capacity: usize) -> Self {
    self.update_queue_capacity = capacity;
    self
  }

  /// The number of background worker threads draining the update queue.
  /// Values below one are raised to one.
  pub fn update_workers(mut self, workers: usize) -> Self {
    self.update_workers = workers;
    self
  }

  /// The freeze window applied after source failures: `initial` for the
  /// first failure, multiplied by `factor` per consecutive failure, capped
  /// at `max`.
  pub fn backoff(mut self, initial: Duration, factor: u32, max: Duration) -> Self {
    self.backoff_initial = initial;
    self.backoff_factor = factor;
    self.backoff_max = max;
    self
  }

  /// The external provider consulted for keys the cache cannot answer.
  pub fn source(mut self, source: impl Source<V> + 'static) -> Self {
    self.source = Some(Arc::new(source));
    self
  }

  /// Replaces the default dense payload store. The store must be readable at
  /// every slot up to the configured slot count rounded to the next power of
  /// two.
  pub fn attribute_store(mut self, store: impl AttributeStore<V> + 'static) -> Self {
    self.attribute_store = Some(Box::new(store));
    self
  }

  /// Fixes the expiry jitter rng seed. Intended for deterministic tests.
  #[doc(hidden)]
  pub fn seed(mut self, seed: u64) -> Self {
    self.seed = Some(seed);
    self
  }

  fn validate(&self) -> Result<(), BuildError> {
    if self.slots == 0 {
      return Err(BuildError::ZeroSlots);
    }
    if self.source.is_none() {
      return Err(BuildError::SourceRequired);
    }
    if self.ttl.min > self.ttl.max {
      return Err(BuildError::InvalidTtlRange);
    }
    if self.backoff_factor == 0 {
      return Err(BuildError::ZeroBackoffFactor);
    }
    Ok(())
  }

  /// Validates the configuration, spawns the worker pool and returns the
  /// cache handle.
  pub fn build(self) -> Result<LookupCache<V, H>, BuildError>
  where
    V: Clone + Default + Send + Sync + 'static,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    self.validate()?;
    let source = match self.source {
      Some(source) => source,
      None => return Err(BuildError::SourceRequired),
    };

    let slots = self.slots.next_power_of_two();
    let cells = CellTable::new(slots, self.hasher.clone());
    let attrs = self
      .attribute_store
      .unwrap_or_else(|| Box::new(DenseColumn::new(slots)));
    let rng = SmallRng::seed_from_u64(self.seed.unwrap_or_else(rand::random));

    let state = Arc::new(RwLock::new(CacheState { cells, attrs, rng }));
    let registry = Arc::new(Mutex::new(InFlightMap::new()));
    let metrics = Arc::new(Metrics::new());
    let (queue, receiver, queue_len) = UpdateQueue::new(self.update_queue_capacity);

    // The source and the backoff controller are owned by the worker side
    // alone; the caller side only ever talks to them through the queue.
    let context = WorkerContext {
      state: Arc::clone(&state),
      registry: Arc::clone(&registry),
      source,
      backoff: Arc::new(BackoffController::new(
        self.backoff_initial,
        self.backoff_factor,
        self.backoff_max,
      )),
      metrics: Arc::clone(&metrics),
      ttl: self.ttl,
      queue_len,
    };
    let workers = UpdateWorkerPool::spawn(context, receiver, self.update_workers.max(1));

    Ok(LookupCache {
      shared: Arc::new(CacheShared {
        state,
        registry,
        queue,
        metrics,
        ttl: self.ttl,
        allow_read_expired_keys: self.allow_read_expired_keys,
        workers,
      }),
    })
  }
}
