//! Counters describing how requests were resolved.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::response::ResponseSource;

#[derive(Debug, Default)]
pub struct RouterStats {
  network: AtomicU64,
  cache_fresh: AtomicU64,
  cache_stale: AtomicU64,
  offline: AtomicU64,
  shell: AtomicU64,
  structured_errors: AtomicU64,
  store_read_failures: AtomicU64,
  store_write_failures: AtomicU64,
  revalidations_started: AtomicU64,
  revalidations_failed: AtomicU64,
  revalidations_skipped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
  counter.fetch_add(1, Ordering::Relaxed);
}

impl RouterStats {
  pub(crate) fn record(&self, source: ResponseSource) {
    bump(match source {
      ResponseSource::Network => &self.network,
      ResponseSource::CacheFresh => &self.cache_fresh,
      ResponseSource::CacheStale => &self.cache_stale,
      ResponseSource::Offline => &self.offline,
      ResponseSource::Shell => &self.shell,
      ResponseSource::StructuredError => &self.structured_errors,
    });
  }

  pub(crate) fn store_read_failed(&self) {
    bump(&self.store_read_failures);
  }

  pub(crate) fn store_write_failed(&self) {
    bump(&self.store_write_failures);
  }

  pub(crate) fn revalidation_started(&self) {
    bump(&self.revalidations_started);
  }

  pub(crate) fn revalidation_failed(&self) {
    bump(&self.revalidations_failed);
  }

  pub(crate) fn revalidation_skipped(&self) {
    bump(&self.revalidations_skipped);
  }

  pub fn snapshot(&self) -> StatsSnapshot {
    let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);

    let network = load(&self.network);
    let cache_fresh = load(&self.cache_fresh);
    let cache_stale = load(&self.cache_stale);
    let offline = load(&self.offline);
    let shell = load(&self.shell);
    let structured_errors = load(&self.structured_errors);

    let hits = cache_fresh + cache_stale + offline + shell;
    let total = hits + network + structured_errors;
    let hit_rate = if total == 0 {
      0.0
    } else {
      hits as f64 / total as f64
    };

    StatsSnapshot {
      network,
      cache_fresh,
      cache_stale,
      offline,
      shell,
      structured_errors,
      store_read_failures: load(&self.store_read_failures),
      store_write_failures: load(&self.store_write_failures),
      revalidations_started: load(&self.revalidations_started),
      revalidations_failed: load(&self.revalidations_failed),
      revalidations_skipped: load(&self.revalidations_skipped),
      hit_rate,
    }
  }
}

/// Point-in-time copy of [`RouterStats`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
  pub network: u64,
  pub cache_fresh: u64,
  pub cache_stale: u64,
  pub offline: u64,
  pub shell: u64,
  pub structured_errors: u64,
  pub store_read_failures: u64,
  pub store_write_failures: u64,
  pub revalidations_started: u64,
  pub revalidations_failed: u64,
  pub revalidations_skipped: u64,
  /// Share of responses served from a partition
  pub hit_rate: f64,
}
