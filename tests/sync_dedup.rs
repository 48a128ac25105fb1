use lookup_cache::{CacheBuilder, Key, SourceError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_concurrent_misses_share_one_fetch() {
  let fetches = Arc::new(AtomicUsize::new(0));
  let source = {
    let fetches = Arc::clone(&fetches);
    move |keys: &[Key]| -> Result<Vec<(Key, u64)>, SourceError> {
      fetches.fetch_add(1, Ordering::SeqCst);
      // Slow source: every caller thread arrives while the fetch is still in
      // flight.
      thread::sleep(Duration::from_millis(200));
      Ok(keys.iter().map(|&key| (key, key + 1)).collect())
    }
  };
  let cache = CacheBuilder::new().slots(64).source(source).build().unwrap();

  let threads = 8;
  let barrier = Arc::new(Barrier::new(threads));
  let mut handles = Vec::new();
  for _ in 0..threads {
    let cache = cache.clone();
    let barrier = Arc::clone(&barrier);
    handles.push(thread::spawn(move || {
      barrier.wait();
      cache.lookup(&[42], |_| 0).unwrap()
    }));
  }

  for handle in handles {
    assert_eq!(handle.join().unwrap(), vec![43]);
  }
  assert_eq!(fetches.load(Ordering::SeqCst), 1);

  let metrics = cache.metrics();
  assert_eq!(metrics.source_requests, 1);
  assert_eq!(metrics.queries, 8);
}

#[test]
fn test_joining_batch_covers_overlapping_keys() {
  let fetches = Arc::new(AtomicUsize::new(0));
  let source = {
    let fetches = Arc::clone(&fetches);
    move |keys: &[Key]| -> Result<Vec<(Key, u64)>, SourceError> {
      fetches.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(200));
      Ok(keys.iter().map(|&key| (key, key * 10)).collect())
    }
  };
  let cache = CacheBuilder::new().slots(64).source(source).build().unwrap();

  // First batch owns keys {1, 2}; the second batch overlaps on 2 and adds 3.
  // The overlap joins the in-flight unit instead of requesting 2 again.
  let first = {
    let cache = cache.clone();
    thread::spawn(move || cache.lookup(&[1, 2], |_| 0).unwrap())
  };
  thread::sleep(Duration::from_millis(50));
  let second = {
    let cache = cache.clone();
    thread::spawn(move || cache.lookup(&[2, 3], |_| 0).unwrap())
  };

  assert_eq!(first.join().unwrap(), vec![10, 20]);
  assert_eq!(second.join().unwrap(), vec![20, 30]);
  assert_eq!(fetches.load(Ordering::SeqCst), 2);
}
