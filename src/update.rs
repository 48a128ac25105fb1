use crate::cell::Key;
use crate::error::LookupError;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, Thread};

use fibre::mpmc;
use parking_lot::Mutex;

/// Per-key fetch outcome recorded by the worker that processed a unit.
/// `true` means the source returned a payload for the key (or, after a failed
/// fetch, that real stale data survives in its cell).
pub(crate) type FoundMask = ahash::HashMap<Key, bool>;

/// Keys currently owned by an in-flight unit. Guarded by its own mutex,
/// separate from the cell table lock; entries are inserted when a unit is
/// enqueued and removed by the worker once the unit's merge is done.
pub(crate) type InFlightMap = ahash::HashMap<Key, Arc<UpdateUnit>>;

enum UnitState {
  Pending,
  Done(FoundMask),
}

struct UnitInner {
  state: UnitState,
  waiters: Vec<Thread>,
}

/// One outstanding, deduplicated fetch request for a set of keys.
///
/// A unit is shared between every caller batch that created or joined it and
/// the worker that fetches it. Completion is one-shot and multi-waiter-safe:
/// every parked caller is unparked when the worker records the found mask.
pub(crate) struct UpdateUnit {
  pub(crate) requested: Vec<Key>,
  inner: Mutex<UnitInner>,
}

impl UpdateUnit {
  pub(crate) fn new(requested: Vec<Key>) -> Self {
    Self {
      requested,
      inner: Mutex::new(UnitInner {
        state: UnitState::Pending,
        waiters: Vec::new(),
      }),
    }
  }

  /// Completes the unit with the per-key outcomes, waking all waiters.
  pub(crate) fn complete(&self, found: FoundMask) {
    let mut inner = self.inner.lock();
    inner.state = UnitState::Done(found);
    for waiter in inner.waiters.drain(..) {
      waiter.unpark();
    }
  }

  /// Blocks the calling thread until the unit completes.
  pub(crate) fn wait(&self) {
    loop {
      {
        let mut inner = self.inner.lock();
        if matches!(inner.state, UnitState::Done(_)) {
          return;
        }
        inner.waiters.push(thread::current());
      }
      // The unpark token is sticky, so a complete() racing with this park
      // cannot be lost.
      thread::park();
    }
  }

  /// Whether the source reported `key` found. Meaningful once complete.
  pub(crate) fn found(&self, key: Key) -> bool {
    match &self.inner.lock().state {
      UnitState::Done(mask) => mask.get(&key).copied().unwrap_or(false),
      UnitState::Pending => false,
    }
  }
}

/// Bounded handoff between caller batches and the update workers.
///
/// Capacity is enforced by an explicit length gate in front of the channel so
/// a capacity of zero always fails fast, even while every worker sits idle in
/// `recv`. The gate is decremented by the worker that dequeues a unit.
pub(crate) struct UpdateQueue {
  tx: mpmc::Sender<Arc<UpdateUnit>>,
  len: Arc<AtomicUsize>,
  capacity: usize,
}

impl UpdateQueue {
  pub(crate) fn new(
    capacity: usize,
  ) -> (Self, mpmc::Receiver<Arc<UpdateUnit>>, Arc<AtomicUsize>) {
    let (tx, rx) = mpmc::unbounded();
    let len = Arc::new(AtomicUsize::new(0));
    (
      Self {
        tx,
        len: Arc::clone(&len),
        capacity,
      },
      rx,
      len,
    )
  }

  /// Attempts to enqueue a unit, failing fast when the queue is at capacity.
  /// This is the cache's backpressure point; it is never retried internally.
  pub(crate) fn try_push(&self, unit: Arc<UpdateUnit>) -> Result<(), LookupError> {
    let admitted = self
      .len
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
        (len < self.capacity).then(|| len + 1)
      });
    if admitted.is_err() {
      return Err(LookupError::QueueFull);
    }

    if self.tx.try_send(unit).is_err() {
      // The channel only rejects when closed during shutdown.
      self.len.fetch_sub(1, Ordering::AcqRel);
      return Err(LookupError::QueueFull);
    }
    Ok(())
  }

  /// Closes the channel so idle workers drain what is queued and exit.
  pub(crate) fn close(&self) {
    let _ = self.tx.close();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ahash::HashMapExt;
  use std::time::Duration;

  #[test]
  fn zero_capacity_queue_rejects_immediately() {
    let (queue, _rx, _len) = UpdateQueue::new(0);
    let unit = Arc::new(UpdateUnit::new(vec![1]));
    assert_eq!(queue.try_push(unit), Err(LookupError::QueueFull));
  }

  #[test]
  fn completion_wakes_multiple_waiters() {
    let unit = Arc::new(UpdateUnit::new(vec![1, 2]));
    let mut handles = Vec::new();
    for _ in 0..4 {
      let unit = Arc::clone(&unit);
      handles.push(thread::spawn(move || {
        unit.wait();
        unit.found(1)
      }));
    }

    thread::sleep(Duration::from_millis(50));
    let mut mask = FoundMask::new();
    mask.insert(1, true);
    mask.insert(2, false);
    unit.complete(mask);

    for handle in handles {
      assert!(handle.join().unwrap());
    }
    assert!(!unit.found(2));
    assert!(!unit.found(3));
  }
}
