mod common;

use common::CountingSource;
use lookup_cache::{CacheBuilder, LookupCache, StringColumn};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

fn new_string_cache() -> (LookupCache<String>, std::sync::Arc<std::sync::atomic::AtomicUsize>) {
  let source = CountingSource::new(vec![
    (1u64, "one".to_string()),
    (2, "two".to_string()),
    (3, "three".to_string()),
  ]);
  let fetches = source.fetch_counter();
  let cache = CacheBuilder::new().slots(64).source(source).build().unwrap();
  (cache, fetches)
}

#[test]
fn test_string_lookup_resolves_and_defaults() {
  let (cache, fetches) = new_string_cache();
  let mut out = StringColumn::new();

  cache
    .lookup_strings(&[1, 2, 9], |_| "??".to_string(), &mut out)
    .unwrap();
  assert_eq!(out.len(), 3);
  assert_eq!(out.get(0), "one");
  assert_eq!(out.get(1), "two");
  assert_eq!(out.get(2), "??");
  assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[test]
fn test_string_optimistic_pass_serves_warm_batches() {
  let (cache, fetches) = new_string_cache();
  let mut out = StringColumn::new();

  cache
    .lookup_strings(&[1, 2, 9], |_| "??".to_string(), &mut out)
    .unwrap();
  let hits_before = cache.metrics().hits;

  // Every key is warm now, including the confirmed-absent one; the batch is
  // answered in the streaming pass without touching the source.
  cache
    .lookup_strings(&[2, 9, 1], |_| "??".to_string(), &mut out)
    .unwrap();
  assert_eq!(out.len(), 3);
  assert_eq!(out.get(0), "two");
  assert_eq!(out.get(1), "??");
  assert_eq!(out.get(2), "one");
  assert_eq!(fetches.load(Ordering::SeqCst), 1);
  assert_eq!(cache.metrics().hits, hits_before + 3);
}

#[test]
fn test_string_partial_output_is_discarded_on_fallback() {
  let (cache, fetches) = new_string_cache();
  let mut out = StringColumn::new();

  cache
    .lookup_strings(&[1], |_| "??".to_string(), &mut out)
    .unwrap();

  // Key 1 streams into the column before key 3 aborts the optimistic pass;
  // the fallback must not leave that partial row behind.
  cache
    .lookup_strings(&[1, 3], |_| "??".to_string(), &mut out)
    .unwrap();
  assert_eq!(out.len(), 2);
  assert_eq!(out.get(0), "one");
  assert_eq!(out.get(1), "three");
  assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[test]
fn test_string_duplicates_resolve_consistently() {
  let (cache, _fetches) = new_string_cache();
  let mut out = StringColumn::new();

  cache
    .lookup_strings(&[3, 9, 3, 9], |key| format!("missing-{key}"), &mut out)
    .unwrap();
  assert_eq!(out.len(), 4);
  assert_eq!(out.get(0), "three");
  assert_eq!(out.get(1), "missing-9");
  assert_eq!(out.get(2), "three");
  assert_eq!(out.get(3), "missing-9");
}

#[test]
fn test_string_confirmed_default_stays_default_in_fallback() {
  let (cache, fetches) = new_string_cache();
  let mut out = StringColumn::new();

  // Warm key 9 as a confirmed default.
  cache
    .lookup_strings(&[9], |_| "??".to_string(), &mut out)
    .unwrap();
  assert_eq!(fetches.load(Ordering::SeqCst), 1);

  // Key 2 is cold, forcing the grouped fallback. The warm default cell must
  // not leak a stored payload into the value map: its rows, duplicates
  // included, come from the default closure.
  cache
    .lookup_strings(&[9, 2, 9], |key| format!("d{key}"), &mut out)
    .unwrap();
  assert_eq!(out.len(), 3);
  assert_eq!(out.get(0), "d9");
  assert_eq!(out.get(1), "two");
  assert_eq!(out.get(2), "d9");
  assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[test]
fn test_string_stale_reads_serve_expired_and_default_rows() {
  let source = CountingSource::new(vec![(1u64, "one".to_string())]);
  let fetches = source.fetch_counter();
  let cache = CacheBuilder::new()
    .slots(64)
    .ttl_range(Duration::from_millis(100), Duration::from_millis(100))
    .allow_read_expired_keys(true)
    .source(source)
    .build()
    .unwrap();
  let mut out = StringColumn::new();

  // Warm one real value and one confirmed default, then let both expire.
  cache
    .lookup_strings(&[1, 9], |_| "??".to_string(), &mut out)
    .unwrap();
  thread::sleep(Duration::from_millis(200));

  // Both answer immediately: the stale payload for key 1, the default
  // closure for the expired default cell of key 9.
  cache
    .lookup_strings(&[1, 9, 9], |_| "??".to_string(), &mut out)
    .unwrap();
  assert_eq!(out.len(), 3);
  assert_eq!(out.get(0), "one");
  assert_eq!(out.get(1), "??");
  assert_eq!(out.get(2), "??");

  // The refresh was scheduled in the background.
  let deadline = Instant::now() + Duration::from_secs(2);
  while fetches.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
    thread::sleep(Duration::from_millis(10));
  }
  assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[test]
fn test_string_output_column_is_cleared_first() {
  let (cache, _fetches) = new_string_cache();
  let mut out = StringColumn::new();
  out.push("leftover");

  cache
    .lookup_strings(&[1], |_| "??".to_string(), &mut out)
    .unwrap();
  assert_eq!(out.len(), 1);
  assert_eq!(out.get(0), "one");
}
