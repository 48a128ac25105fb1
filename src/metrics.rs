use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates; none of them is ever
/// authoritative for a correctness decision.
#[derive(Debug)]
pub struct Metrics {
  // --- Lookup traffic ---
  pub(crate) queries: CachePadded<AtomicU64>,
  pub(crate) hits: CachePadded<AtomicU64>,

  // --- Per-classification counts ---
  pub(crate) keys_hit: CachePadded<AtomicU64>,
  pub(crate) keys_expired: CachePadded<AtomicU64>,
  pub(crate) keys_not_found: CachePadded<AtomicU64>,

  // --- Occupancy ---
  pub(crate) element_count: CachePadded<AtomicU64>,

  // --- Source traffic ---
  pub(crate) source_requests: CachePadded<AtomicU64>,
  pub(crate) source_failures: CachePadded<AtomicU64>,
  pub(crate) refreshes_dropped: CachePadded<AtomicU64>,

  created_at: Instant,
}

// Manual implementation of Default to handle the non-default `Instant`.
impl Default for Metrics {
  fn default() -> Self {
    Self {
      queries: CachePadded::new(AtomicU64::new(0)),
      hits: CachePadded::new(AtomicU64::new(0)),
      keys_hit: CachePadded::new(AtomicU64::new(0)),
      keys_expired: CachePadded::new(AtomicU64::new(0)),
      keys_not_found: CachePadded::new(AtomicU64::new(0)),
      element_count: CachePadded::new(AtomicU64::new(0)),
      source_requests: CachePadded::new(AtomicU64::new(0)),
      source_failures: CachePadded::new(AtomicU64::new(0)),
      refreshes_dropped: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let queries = self.queries.load(Ordering::Relaxed);
    let hits = self.hits.load(Ordering::Relaxed);

    MetricsSnapshot {
      queries,
      hits,
      hit_ratio: if queries == 0 {
        0.0
      } else {
        hits as f64 / queries as f64
      },
      keys_hit: self.keys_hit.load(Ordering::Relaxed),
      keys_expired: self.keys_expired.load(Ordering::Relaxed),
      keys_not_found: self.keys_not_found.load(Ordering::Relaxed),
      element_count: self.element_count.load(Ordering::Relaxed),
      source_requests: self.source_requests.load(Ordering::Relaxed),
      source_failures: self.source_failures.load(Ordering::Relaxed),
      refreshes_dropped: self.refreshes_dropped.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// The number of rows requested across all lookups.
  pub queries: u64,
  /// Rows answered without a blocking resolution, derived per batch as rows
  /// minus the distinct expired/absent keys.
  pub hits: u64,
  /// The hit ratio (hits / queries).
  pub hit_ratio: f64,
  /// Same derivation as `hits`, kept separate for source-traffic dashboards.
  pub keys_hit: u64,
  /// Distinct keys per batch that classified as expired.
  pub keys_expired: u64,
  /// Distinct keys per batch the cache had never seen.
  pub keys_not_found: u64,
  /// Cells occupied since construction (first-occupancy, never decremented).
  pub element_count: u64,
  /// Fetches issued against the external source.
  pub source_requests: u64,
  /// Fetches that failed or timed out.
  pub source_failures: u64,
  /// Background refresh attempts dropped because the update queue was full.
  pub refreshes_dropped: u64,
  /// The number of seconds the cache has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("queries", &self.queries)
      .field("hits", &self.hits)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("keys_hit", &self.keys_hit)
      .field("keys_expired", &self.keys_expired)
      .field("keys_not_found", &self.keys_not_found)
      .field("element_count", &self.element_count)
      .field("source_requests", &self.source_requests)
      .field("source_failures", &self.source_failures)
      .field("refreshes_dropped", &self.refreshes_dropped)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
