use crate::cell::Key;
use crate::column::StringColumn;
use crate::error::LookupError;
use crate::metrics::MetricsSnapshot;
use crate::shared::{CacheShared, CacheState};
use crate::time;
use crate::update::UpdateUnit;

use std::fmt;
use std::hash::BuildHasher;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};

/// Rows of the current batch grouped by the key they requested, so one
/// resolved key can answer every duplicate row at once.
type RowGroups = HashMap<Key, Vec<usize>>;

/// A handle to the lookup cache.
///
/// The handle is cheap to clone; all clones share the same cell table, update
/// queue and worker pool. A batch lookup never returns a source error: fetch
/// failures are absorbed into defaulted or stale answers, and the only
/// visible failure is a full update queue on the synchronous path.
pub struct LookupCache<V: Send + Sync, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<V, H>>,
}

impl<V: Send + Sync, H> Clone for LookupCache<V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<V: Send + Sync, H> fmt::Debug for LookupCache<V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LookupCache")
      .field("shared", &self.shared)
      .finish()
  }
}

impl<V, H> LookupCache<V, H>
where
  V: Clone + Default + Send + Sync + 'static,
  H: BuildHasher + Send + Sync + 'static,
{
  /// Looks up a batch of keys, returning one value per requested row in
  /// request order. Duplicate keys are answered consistently within the
  /// batch.
  ///
  /// Rows whose key the source does not know are filled from `default_for`.
  /// Expired keys block for a refresh unless the cache was built with
  /// `allow_read_expired_keys`, in which case the stale value is returned
  /// and a background refresh is scheduled.
  pub fn lookup<F>(&self, keys: &[Key], default_for: F) -> Result<Vec<V>, LookupError>
  where
    F: Fn(Key) -> V,
  {
    let mut out = vec![V::default(); keys.len()];
    let mut expired = RowGroups::new();
    let mut absent = RowGroups::new();

    {
      // One read-lock pass classifies every row; holding the lock for the
      // whole batch keeps duplicate keys in the same class.
      let state = self.shared.state.read();
      let now = time::now_nanos();

      for (row, &key) in keys.iter().enumerate() {
        let find = state.cells.find(key, now);
        if find.valid {
          out[row] = self.cell_value(&state, find.slot, key, &default_for);
        } else if find.outdated {
          expired.entry(key).or_default().push(row);
          if self.shared.allow_read_expired_keys {
            out[row] = self.cell_value(&state, find.slot, key, &default_for);
          }
        } else {
          absent.entry(key).or_default().push(row);
        }
      }
    }

    self.record_classify(keys.len(), expired.len(), absent.len());

    if absent.is_empty() {
      if expired.is_empty() {
        return Ok(out);
      }
      if self.shared.allow_read_expired_keys {
        // Stale rows were already emitted above; the refresh is fire and
        // forget.
        self.dispatch_background(expired.keys().copied());
        return Ok(out);
      }
    }

    // Synchronous path: absent keys always block, and expired keys piggyback
    // on the same trip so their rows come back fresh too.
    let required: Vec<Key> = absent.keys().chain(expired.keys()).copied().collect();
    let units = self.dispatch_sync(&required)?;
    for unit in &units {
      unit.wait();
    }

    self.prepare_answer(&units, &expired, &absent, &mut out, &default_for);
    Ok(out)
  }

  /// A point-in-time snapshot of the cache's counters.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  /// The number of slots in the cell table (the configured count rounded up
  /// to a power of two).
  pub fn slot_count(&self) -> usize {
    self.shared.state.read().cells.len()
  }

  /// Cells occupied since construction. First occupancy only; collisions and
  /// expiry never decrement it.
  pub fn element_count(&self) -> u64 {
    self.shared.metrics.element_count.load(Ordering::Relaxed)
  }

  fn cell_value<F>(&self, state: &CacheState<V, H>, slot: usize, key: Key, default_for: &F) -> V
  where
    F: Fn(Key) -> V,
  {
    if state.cells.cell(slot).is_default {
      default_for(key)
    } else {
      state.attrs.read(slot)
    }
  }

  // Hits are derived per batch as rows minus the distinct expired/absent
  // keys, so duplicate rows of one unresolved key are charged once.
  fn record_classify(&self, rows: usize, expired_keys: usize, absent_keys: usize) {
    let hit_rows = rows.saturating_sub(expired_keys + absent_keys) as u64;
    let metrics = &self.shared.metrics;
    metrics.queries.fetch_add(rows as u64, Ordering::Relaxed);
    metrics.hits.fetch_add(hit_rows, Ordering::Relaxed);
    metrics.keys_hit.fetch_add(hit_rows, Ordering::Relaxed);
    metrics
      .keys_expired
      .fetch_add(expired_keys as u64, Ordering::Relaxed);
    metrics
      .keys_not_found
      .fetch_add(absent_keys as u64, Ordering::Relaxed);
  }

  /// Schedules a background refresh for the candidate keys not already owned
  /// by an in-flight unit. A full queue drops the refresh silently; the
  /// caller already has stale answers.
  fn dispatch_background(&self, candidates: impl Iterator<Item = Key>) {
    let mut registry = self.shared.registry.lock();
    let fresh: Vec<Key> = candidates.filter(|key| !registry.contains_key(key)).collect();
    if fresh.is_empty() {
      return;
    }

    let unit = Arc::new(UpdateUnit::new(fresh));
    for &key in &unit.requested {
      registry.insert(key, Arc::clone(&unit));
    }
    if self.shared.queue.try_push(Arc::clone(&unit)).is_err() {
      for key in &unit.requested {
        registry.remove(key);
      }
      self
        .shared
        .metrics
        .refreshes_dropped
        .fetch_add(1, Ordering::Relaxed);
      log::debug!(
        "update queue full; dropped background refresh of {} keys",
        unit.requested.len()
      );
    }
  }

  /// Joins in-flight units already covering some of the required keys and
  /// enqueues one new unit for the rest. Registry entries are inserted and
  /// the unit pushed under the same registry lock, so a unit observed in the
  /// registry is always either queued or about to be.
  fn dispatch_sync(&self, required: &[Key]) -> Result<Vec<Arc<UpdateUnit>>, LookupError> {
    let mut units: Vec<Arc<UpdateUnit>> = Vec::new();
    let mut fresh: Vec<Key> = Vec::new();

    let mut registry = self.shared.registry.lock();
    for &key in required {
      match registry.get(&key) {
        Some(unit) => {
          if !units.iter().any(|joined| Arc::ptr_eq(joined, unit)) {
            units.push(Arc::clone(unit));
          }
        }
        None => fresh.push(key),
      }
    }

    if !fresh.is_empty() {
      let unit = Arc::new(UpdateUnit::new(fresh));
      for &key in &unit.requested {
        registry.insert(key, Arc::clone(&unit));
      }
      if let Err(error) = self.shared.queue.try_push(Arc::clone(&unit)) {
        for key in &unit.requested {
          registry.remove(key);
        }
        return Err(error);
      }
      units.push(unit);
    }

    Ok(units)
  }

  /// Fills the rows that waited on the completed units, re-reading the cell
  /// table so refreshed keys come back with their new payloads.
  fn prepare_answer<F>(
    &self,
    units: &[Arc<UpdateUnit>],
    expired: &RowGroups,
    absent: &RowGroups,
    out: &mut [V],
    default_for: &F,
  ) where
    F: Fn(Key) -> V,
  {
    let state = self.shared.state.read();
    for unit in units {
      for &key in &unit.requested {
        // A joined unit may carry keys some other batch requested.
        let rows = match expired.get(&key).or_else(|| absent.get(&key)) {
          Some(rows) => rows,
          None => continue,
        };

        let value = if unit.found(key) {
          state.attrs.read(state.cells.slot_for(key))
        } else {
          default_for(key)
        };
        for &row in rows {
          out[row] = value.clone();
        }
      }
    }
  }
}

impl<H> LookupCache<String, H>
where
  H: BuildHasher + Send + Sync + 'static,
{
  /// Looks up a batch of keys, appending one row per key to `out` in request
  /// order. `out` is cleared first.
  ///
  /// The column is append-only, so the fast path is optimistic: rows stream
  /// straight into `out` while every key stays valid, and the first miss
  /// discards the partial output and falls back to a grouped pass that
  /// resolves values into a map before emitting.
  pub fn lookup_strings<F>(
    &self,
    keys: &[Key],
    default_for: F,
    out: &mut StringColumn,
  ) -> Result<(), LookupError>
  where
    F: Fn(Key) -> String,
  {
    out.clear();
    out.reserve_rows(keys.len());

    {
      let state = self.shared.state.read();
      let now = time::now_nanos();

      let mut complete = true;
      for &key in keys {
        let find = state.cells.find(key, now);
        if !find.valid {
          complete = false;
          break;
        }
        if state.cells.cell(find.slot).is_default {
          out.push(&default_for(key));
        } else {
          out.push(&state.attrs.read(find.slot));
        }
      }

      if complete {
        let metrics = &self.shared.metrics;
        metrics.queries.fetch_add(keys.len() as u64, Ordering::Relaxed);
        metrics.hits.fetch_add(keys.len() as u64, Ordering::Relaxed);
        metrics.keys_hit.fetch_add(keys.len() as u64, Ordering::Relaxed);
        return Ok(());
      }
    }
    out.clear();

    // Pessimistic pass: resolve each distinct key once into a map, then emit
    // the rows in order at the end. Keys missing from the map fall back to
    // `default_for`.
    let mut resolved: HashMap<Key, String> = HashMap::new();
    let mut expired: HashSet<Key> = HashSet::new();
    let mut absent: HashSet<Key> = HashSet::new();
    let mut total_len = 0usize;

    {
      let state = self.shared.state.read();
      let now = time::now_nanos();

      for &key in keys {
        let find = state.cells.find(key, now);
        if find.valid {
          if !resolved.contains_key(&key) && !state.cells.cell(find.slot).is_default {
            let value = state.attrs.read(find.slot);
            total_len += value.len();
            resolved.insert(key, value);
          }
        } else if find.outdated {
          if expired.insert(key)
            && self.shared.allow_read_expired_keys
            && !state.cells.cell(find.slot).is_default
          {
            let value = state.attrs.read(find.slot);
            total_len += value.len();
            resolved.insert(key, value);
          }
        } else {
          absent.insert(key);
        }
      }
    }

    self.record_classify(keys.len(), expired.len(), absent.len());

    let needs_sync =
      !absent.is_empty() || (!expired.is_empty() && !self.shared.allow_read_expired_keys);
    if needs_sync {
      let required: Vec<Key> = absent.iter().chain(expired.iter()).copied().collect();
      let units = self.dispatch_sync(&required)?;
      for unit in &units {
        unit.wait();
      }

      let state = self.shared.state.read();
      for unit in &units {
        for &key in &unit.requested {
          if !expired.contains(&key) && !absent.contains(&key) {
            continue;
          }
          if unit.found(key) {
            let value = state.attrs.read(state.cells.slot_for(key));
            total_len += value.len();
            resolved.insert(key, value);
          } else {
            // A refresh that came back "absent" overrides any stale value
            // collected earlier.
            resolved.remove(&key);
          }
        }
      }
    } else if !expired.is_empty() {
      self.dispatch_background(expired.iter().copied());
    }

    out.reserve_bytes(total_len);
    for &key in keys {
      match resolved.get(&key) {
        Some(value) => out.push(value),
        None => out.push(&default_for(key)),
      }
    }
    Ok(())
  }
}
