use crate::backoff::BackoffController;
use crate::cell::CellTable;
use crate::metrics::Metrics;
use crate::shared::{CacheState, TtlRange};
use crate::source::Source;
use crate::time;
use crate::update::{FoundMask, InFlightMap, UpdateUnit};

use std::hash::BuildHasher;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use ahash::HashMapExt;
use fibre::mpmc;
use parking_lot::{Mutex, RwLock};

/// A context object holding the thread-safe parts of the cache that the
/// update workers need to access.
pub(crate) struct WorkerContext<V: Send + Sync, H> {
  pub(crate) state: Arc<RwLock<CacheState<V, H>>>,
  pub(crate) registry: Arc<Mutex<InFlightMap>>,
  pub(crate) source: Arc<dyn Source<V>>,
  pub(crate) backoff: Arc<BackoffController>,
  pub(crate) metrics: Arc<Metrics>,
  pub(crate) ttl: TtlRange,
  pub(crate) queue_len: Arc<AtomicUsize>,
}

impl<V: Send + Sync, H> Clone for WorkerContext<V, H> {
  fn clone(&self) -> Self {
    Self {
      state: Arc::clone(&self.state),
      registry: Arc::clone(&self.registry),
      source: Arc::clone(&self.source),
      backoff: Arc::clone(&self.backoff),
      metrics: Arc::clone(&self.metrics),
      ttl: self.ttl,
      queue_len: Arc::clone(&self.queue_len),
    }
  }
}

/// The fixed pool of background threads draining the update queue.
///
/// Each worker cycles Idle -> Fetching -> Merging -> Idle: it blocks on the
/// queue, calls the source with no lock held, then applies the results under
/// one write-lock acquisition and wakes the unit's waiters. A worker never
/// crashes on a source failure and returns to Idle unconditionally.
pub(crate) struct UpdateWorkerPool {
  handles: Vec<JoinHandle<()>>,
}

impl UpdateWorkerPool {
  pub(crate) fn spawn<V, H>(
    context: WorkerContext<V, H>,
    receiver: mpmc::Receiver<Arc<UpdateUnit>>,
    workers: usize,
  ) -> Self
  where
    V: Send + Sync + 'static,
    H: BuildHasher + Send + Sync + 'static,
  {
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
      let context = context.clone();
      let receiver = receiver.clone();
      handles.push(thread::spawn(move || {
        // Idle: a cooperative blocking wait, not a busy poll. `recv` fails
        // only once the queue is closed and drained, which is the shutdown
        // signal.
        while let Ok(unit) = receiver.recv() {
          context.queue_len.fetch_sub(1, Ordering::AcqRel);
          process_unit(&context, unit);
        }
      }));
    }
    Self { handles }
  }

  pub(crate) fn len(&self) -> usize {
    self.handles.len()
  }
}

/// Fetches one unit from the source, merges the outcome into the cell table
/// and wakes every caller waiting on the unit.
fn process_unit<V, H>(context: &WorkerContext<V, H>, unit: Arc<UpdateUnit>)
where
  V: Send + Sync,
  H: BuildHasher,
{
  context.metrics.source_requests.fetch_add(1, Ordering::Relaxed);

  let found = match context.source.fetch(&unit.requested) {
    Ok(rows) => {
      context.backoff.on_success();
      merge_fetched(context, &unit, rows)
    }
    Err(error) => {
      context.metrics.source_failures.fetch_add(1, Ordering::Relaxed);
      let frozen_until = context.backoff.on_failure(time::now_nanos());
      log::warn!(
        "source fetch for {} keys failed ({error}); freezing affected cells",
        unit.requested.len()
      );
      quarantine_failed(context, &unit, frozen_until)
    }
  };

  {
    let mut registry = context.registry.lock();
    for key in &unit.requested {
      registry.remove(key);
    }
  }

  unit.complete(found);
}

/// Merging: one write-lock pass over the whole unit. Found keys get their
/// payload and a jittered expiry; keys the source omitted are confirmed
/// absent and marked default under the same expiry rule.
fn merge_fetched<V, H>(
  context: &WorkerContext<V, H>,
  unit: &UpdateUnit,
  rows: Vec<(crate::cell::Key, V)>,
) -> FoundMask
where
  V: Send + Sync,
  H: BuildHasher,
{
  let mut found = FoundMask::with_capacity(unit.requested.len());
  let now = time::now_nanos();

  let mut guard = context.state.write();
  let CacheState { cells, attrs, rng } = &mut *guard;

  for (key, value) in rows {
    let slot = cells.slot_for(key);
    note_first_occupancy(&context.metrics, cells, slot);

    let cell = cells.cell_mut(slot);
    cell.key = key;
    cell.expires_at = context.ttl.fresh_deadline(rng, now);
    cell.is_default = false;
    attrs.write(slot, value);
    found.insert(key, true);
  }

  for &key in &unit.requested {
    if found.contains_key(&key) {
      continue;
    }
    let slot = cells.slot_for(key);
    note_first_occupancy(&context.metrics, cells, slot);

    let cell = cells.cell_mut(slot);
    cell.key = key;
    cell.expires_at = context.ttl.fresh_deadline(rng, now);
    cell.is_default = true;
    attrs.write_default(slot);
    found.insert(key, false);
  }

  found
}

/// Failure path: stale data survives under the freeze window instead of
/// being evicted, and keys the cache has never seen are defaulted under the
/// same quarantine. Waiters still get answers, never the source error.
fn quarantine_failed<V, H>(
  context: &WorkerContext<V, H>,
  unit: &UpdateUnit,
  frozen_until: crate::time::Nanos,
) -> FoundMask
where
  V: Send + Sync,
  H: BuildHasher,
{
  let mut found = FoundMask::with_capacity(unit.requested.len());
  let now = time::now_nanos();

  let mut guard = context.state.write();
  let CacheState { cells, attrs, .. } = &mut *guard;

  for &key in &unit.requested {
    let slot = cells.slot_for(key);

    if cells.cell(slot).key == key {
      // Known value, possibly stale: keep the payload and the default flag,
      // re-arming the expiry so the key is not retried until the freeze
      // lifts. A cell refreshed concurrently by another unit stays as-is.
      let cell = cells.cell_mut(slot);
      if cell.expires_at <= now {
        cell.expires_at = frozen_until;
      }
      found.insert(key, !cell.is_default);
    } else {
      note_first_occupancy(&context.metrics, cells, slot);

      let cell = cells.cell_mut(slot);
      cell.key = key;
      cell.expires_at = frozen_until;
      cell.is_default = true;
      attrs.write_default(slot);
      found.insert(key, false);
    }
  }

  found
}

/// Counts a cell the first time it becomes occupied. The zero slot is
/// excluded because `key == 0` is indistinguishable from "never occupied"
/// there.
fn note_first_occupancy<H: BuildHasher>(metrics: &Metrics, cells: &CellTable<H>, slot: usize) {
  if cells.cell(slot).key == 0 && slot != cells.zero_slot() {
    metrics.element_count.fetch_add(1, Ordering::Relaxed);
  }
}
