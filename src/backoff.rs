use crate::time::{self, Nanos};

use std::time::Duration;

use parking_lot::Mutex;

/// Tracks consecutive source failures and computes the freeze window applied
/// to the cells a failed fetch touched.
///
/// The window grows exponentially with each consecutive failure, capped at a
/// configured maximum, and resets after one fully successful fetch. It only
/// sizes the quarantine expiry assigned to defaulted/stale results; it never
/// decides whether a fetch is attempted.
#[derive(Debug)]
pub(crate) struct BackoffController {
  initial: Duration,
  factor: u32,
  max: Duration,
  state: Mutex<BackoffState>,
}

#[derive(Debug, Default)]
struct BackoffState {
  consecutive_failures: u32,
  frozen_until: Nanos,
}

impl BackoffController {
  pub(crate) fn new(initial: Duration, factor: u32, max: Duration) -> Self {
    Self {
      initial,
      factor,
      max,
      state: Mutex::new(BackoffState::default()),
    }
  }

  /// Records a failed fetch and returns the end of the freeze window.
  pub(crate) fn on_failure(&self, now: Nanos) -> Nanos {
    let mut state = self.state.lock();
    state.consecutive_failures = state.consecutive_failures.saturating_add(1);

    let window = self.window_for(state.consecutive_failures);
    let frozen_until = now.saturating_add(time::duration_nanos(window));

    // An overlapping failure with a shorter window never shrinks the freeze.
    state.frozen_until = state.frozen_until.max(frozen_until);
    state.frozen_until
  }

  /// Records a fully successful fetch, resetting the failure streak.
  pub(crate) fn on_success(&self) {
    let mut state = self.state.lock();
    state.consecutive_failures = 0;
    state.frozen_until = 0;
  }

  fn window_for(&self, failures: u32) -> Duration {
    let mut window = self.initial;
    for _ in 1..failures {
      if window >= self.max {
        break;
      }
      window = (window * self.factor).min(self.max);
    }
    window.min(self.max)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn windows_grow_and_cap() {
    let backoff = BackoffController::new(
      Duration::from_millis(100),
      2,
      Duration::from_millis(350),
    );

    let first = backoff.on_failure(0);
    let second = backoff.on_failure(0);
    let third = backoff.on_failure(0);
    let fourth = backoff.on_failure(0);

    assert_eq!(first, 100_000_000);
    assert_eq!(second, 200_000_000);
    assert_eq!(third, 350_000_000);
    // Capped: no further growth.
    assert_eq!(fourth, 350_000_000);
  }

  #[test]
  fn frozen_until_is_monotonic() {
    let backoff = BackoffController::new(Duration::from_secs(1), 2, Duration::from_secs(60));

    let far = backoff.on_failure(1_000_000_000);
    // A later failure at an earlier "now" must not pull the freeze back.
    let near = backoff.on_failure(0);
    assert!(near >= far);
  }

  #[test]
  fn success_resets_to_base_window() {
    let backoff = BackoffController::new(Duration::from_millis(100), 2, Duration::from_secs(60));

    backoff.on_failure(0);
    backoff.on_failure(0);
    backoff.on_success();

    assert_eq!(backoff.on_failure(0), 100_000_000);
  }
}
