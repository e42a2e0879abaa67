//! Core traits and types for the partition store.

use chrono::{DateTime, Duration, Utc};

use crate::error::{StoreError, StoreResult};
use crate::request::Headers;
use crate::response::Response;

/// Handle to a partition returned by [`CacheStore::open`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Partition {
  name: String,
}

impl Partition {
  /// Wrap an existing partition name.
  pub fn named(name: impl Into<String>) -> Self {
    Self { name: name.into() }
  }

  /// Name of partition `base` for `generation`, e.g. `pages-v3`.
  pub fn versioned(base: &str, generation: u64) -> Self {
    Self {
      name: format!("{}-v{}", base, generation),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Embedded version tag, if the name carries one.
  pub fn version(&self) -> Option<u64> {
    parse_version(&self.name)
  }
}

/// Extract the generation from a `<base>-v<generation>` partition name.
pub fn parse_version(name: &str) -> Option<u64> {
  let (base, tag) = name.rsplit_once("-v")?;
  if base.is_empty() || tag.is_empty() || !tag.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  tag.parse().ok()
}

/// Partition name without its version suffix.
pub fn base_name(name: &str) -> &str {
  match parse_version(name) {
    Some(_) => name.rsplit_once("-v").map(|(base, _)| base).unwrap_or(name),
    None => name,
  }
}

/// A response stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
  pub body: Vec<u8>,
  pub status: u16,
  pub headers: Headers,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

impl StoredEntry {
  pub fn from_response(response: &Response, cached_at: DateTime<Utc>) -> Self {
    Self {
      body: response.body.clone(),
      status: response.status,
      headers: response.headers.clone(),
      cached_at,
    }
  }

  pub fn age(&self, now: DateTime<Utc>) -> Duration {
    now - self.cached_at
  }

  /// Older than `max_age`. Entries without a max age never expire.
  pub fn is_expired(&self, max_age: Option<Duration>, now: DateTime<Utc>) -> bool {
    match max_age {
      Some(max_age) => self.age(now) > max_age,
      None => false,
    }
  }

  /// Reject entries that could not have been written by a strategy.
  pub(crate) fn check(self, url: &str) -> StoreResult<Self> {
    if !(100..=599).contains(&self.status) {
      return Err(StoreError::CorruptEntry {
        url: url.to_string(),
        reason: format!("status {} outside 100-599", self.status),
      });
    }
    Ok(self)
  }
}

/// Trait for partition storage backends.
///
/// Implementations serialise writes to the same `(partition, url)` key; the last
/// writer wins.
pub trait CacheStore: Send + Sync {
  /// Create the partition if absent. Idempotent.
  fn open(&self, name: &str) -> StoreResult<Partition>;

  /// Look up an entry. A missing key is `Ok(None)`, not an error.
  fn get(&self, partition: &Partition, url: &str) -> StoreResult<Option<StoredEntry>>;

  /// Insert or replace the entry for `url`.
  fn put(&self, partition: &Partition, url: &str, entry: &StoredEntry) -> StoreResult<()>;

  /// Remove the entry for `url`. Returns whether one existed.
  fn delete(&self, partition: &Partition, url: &str) -> StoreResult<bool>;

  /// Remove the entry for `url` only if it is still the one written at `cached_at`.
  /// Returns whether it was removed.
  fn delete_if_unchanged(
    &self,
    partition: &Partition,
    url: &str,
    cached_at: DateTime<Utc>,
  ) -> StoreResult<bool>;

  /// Remove every entry older than `max_age`. Returns how many were removed.
  fn delete_expired(&self, partition: &Partition, max_age: Duration) -> StoreResult<usize>;

  /// Names of all partitions, sorted.
  fn list_partitions(&self) -> StoreResult<Vec<String>>;

  /// Drop a partition and all of its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> StoreResult<bool>;
}
