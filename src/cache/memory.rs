//! In-memory partition store for ephemeral runs and tests.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::traits::{CacheStore, Partition, StoredEntry};
use crate::error::{StoreError, StoreResult};

type Partitions = BTreeMap<String, HashMap<String, StoredEntry>>;

/// Partition store backed by a map. Readers never block each other.
#[derive(Default)]
pub struct MemoryStore {
  partitions: RwLock<Partitions>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn read(&self) -> StoreResult<RwLockReadGuard<'_, Partitions>> {
    self.partitions.read().map_err(|_| StoreError::Poisoned)
  }

  fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Partitions>> {
    self.partitions.write().map_err(|_| StoreError::Poisoned)
  }
}

impl CacheStore for MemoryStore {
  fn open(&self, name: &str) -> StoreResult<Partition> {
    self.write()?.entry(name.to_string()).or_default();
    Ok(Partition::named(name))
  }

  fn get(&self, partition: &Partition, url: &str) -> StoreResult<Option<StoredEntry>> {
    let partitions = self.read()?;
    partitions
      .get(partition.name())
      .and_then(|entries| entries.get(url))
      .cloned()
      .map(|entry| entry.check(url))
      .transpose()
  }

  fn put(&self, partition: &Partition, url: &str, entry: &StoredEntry) -> StoreResult<()> {
    let mut partitions = self.write()?;
    let entries = partitions
      .get_mut(partition.name())
      .ok_or_else(|| StoreError::UnknownPartition(partition.name().to_string()))?;
    entries.insert(url.to_string(), entry.clone());
    Ok(())
  }

  fn delete(&self, partition: &Partition, url: &str) -> StoreResult<bool> {
    let mut partitions = self.write()?;
    Ok(
      partitions
        .get_mut(partition.name())
        .and_then(|entries| entries.remove(url))
        .is_some(),
    )
  }

  fn delete_if_unchanged(
    &self,
    partition: &Partition,
    url: &str,
    cached_at: DateTime<Utc>,
  ) -> StoreResult<bool> {
    let mut partitions = self.write()?;
    let Some(entries) = partitions.get_mut(partition.name()) else {
      return Ok(false);
    };
    if entries.get(url).map(|entry| entry.cached_at) != Some(cached_at) {
      return Ok(false);
    }
    Ok(entries.remove(url).is_some())
  }

  fn delete_expired(&self, partition: &Partition, max_age: Duration) -> StoreResult<usize> {
    let mut partitions = self.write()?;
    let Some(entries) = partitions.get_mut(partition.name()) else {
      return Ok(0);
    };

    let now = Utc::now();
    let before = entries.len();
    entries.retain(|_, entry| !entry.is_expired(Some(max_age), now));
    Ok(before - entries.len())
  }

  fn list_partitions(&self) -> StoreResult<Vec<String>> {
    Ok(self.read()?.keys().cloned().collect())
  }

  fn delete_partition(&self, name: &str) -> StoreResult<bool> {
    Ok(self.write()?.remove(name).is_some())
  }
}
