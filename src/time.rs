use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

/// A timestamp in nanoseconds since the cache's epoch.
pub(crate) type Nanos = u64;

/// Expiry sentinel for cells that never expire (TTL range configured as 0,0).
pub(crate) const NEVER_EXPIRES: Nanos = u64::MAX;

// The single, static reference point for all time calculations in the cache.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// The current time as nanoseconds since the epoch.
///
/// Fresh cells carry an expiry of 0, which is always in the past relative to
/// this clock, so an untouched cell can never classify as a hit.
#[inline]
pub(crate) fn now_nanos() -> Nanos {
  Instant::now().saturating_duration_since(*CACHE_EPOCH).as_nanos() as u64
}

#[inline]
pub(crate) fn duration_nanos(duration: Duration) -> Nanos {
  duration.as_nanos() as u64
}
