//! Bookkeeping for background revalidation.
//!
//! At most one revalidation per key is in flight. A failed revalidation puts the
//! key into a cooldown that doubles with each consecutive failure, capped at
//! [`MAX_COOLDOWN`]; a success clears it. Failure history is forgotten once a
//! key has been idle for [`MAX_COOLDOWN`] past the end of its cooldown.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

pub const BASE_COOLDOWN: Duration = Duration::from_secs(5);
pub const MAX_COOLDOWN: Duration = Duration::from_secs(300);

#[derive(Debug, Default)]
struct KeyState {
  in_flight: bool,
  failures: u32,
  retry_after: Option<Instant>,
}

#[derive(Debug)]
pub struct RevalidationTracker {
  keys: Mutex<HashMap<String, KeyState>>,
  base: Duration,
  max: Duration,
}

impl Default for RevalidationTracker {
  fn default() -> Self {
    Self::new(BASE_COOLDOWN, MAX_COOLDOWN)
  }
}

impl RevalidationTracker {
  pub fn new(base: Duration, max: Duration) -> Self {
    Self {
      keys: Mutex::new(HashMap::new()),
      base,
      max,
    }
  }

  // Bookkeeping only; a panic elsewhere must not disable revalidation.
  fn lock(&self) -> MutexGuard<'_, HashMap<String, KeyState>> {
    self
      .keys
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Claim `key` for a revalidation. False when one is running or the key is cooling down.
  pub fn try_begin(&self, key: &str) -> bool {
    self.try_begin_at(key, Instant::now())
  }

  fn try_begin_at(&self, key: &str, now: Instant) -> bool {
    let mut keys = self.lock();
    let max = self.max;
    keys.retain(|_, state| {
      state.in_flight || state.retry_after.is_some_and(|at| now < at + max)
    });
    let state = keys.entry(key.to_string()).or_default();

    if state.in_flight {
      return false;
    }
    if state.retry_after.is_some_and(|at| now < at) {
      return false;
    }

    state.in_flight = true;
    true
  }

  pub fn succeeded(&self, key: &str) {
    self.lock().remove(key);
  }

  pub fn failed(&self, key: &str) {
    self.failed_at(key, Instant::now());
  }

  fn failed_at(&self, key: &str, now: Instant) {
    let mut keys = self.lock();
    let state = keys.entry(key.to_string()).or_default();
    state.in_flight = false;
    state.failures = state.failures.saturating_add(1);
    state.retry_after = Some(now + self.cooldown(state.failures));
  }

  /// Cooldown after `failures` consecutive failures.
  pub fn cooldown(&self, failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    self.base.saturating_mul(1 << exponent).min(self.max)
  }
}
