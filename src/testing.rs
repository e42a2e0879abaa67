//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{CacheStore, MemoryStore, Partition, StoredEntry};
use crate::config::Config;
use crate::error::{FetchError, StoreError, StoreResult};
use crate::lifecycle::Lifecycle;
use crate::request::RequestDescriptor;
use crate::response::Response;
use crate::router::Router;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub enum Reply {
  Respond(Response),
  Fail(FetchError),
  /// Never completes
  Hang,
}

/// Scripted transport that counts how often it is called.
pub struct MockTransport {
  reply: Mutex<Reply>,
  delay: Duration,
  calls: AtomicUsize,
}

impl MockTransport {
  pub fn new(reply: Reply) -> Self {
    Self {
      reply: Mutex::new(reply),
      delay: Duration::ZERO,
      calls: AtomicUsize::new(0),
    }
  }

  pub fn ok(status: u16, body: &str) -> Self {
    Self::new(Reply::Respond(Response::new(status, body)))
  }

  pub fn failing() -> Self {
    Self::new(Reply::Fail(FetchError::Transport(
      "connection refused".to_string(),
    )))
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Transport for MockTransport {
  async fn fetch(&self, _descriptor: &RequestDescriptor) -> Result<Response, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let reply = self.reply.lock().unwrap().clone();

    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }

    match reply {
      Reply::Respond(response) => Ok(response),
      Reply::Fail(error) => Err(error),
      Reply::Hang => std::future::pending().await,
    }
  }
}

/// Memory store whose reads, writes or deletes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
  inner: MemoryStore,
  fail_reads: bool,
  fail_writes: bool,
  fail_partition_deletes: bool,
}

impl FlakyStore {
  pub fn failing_reads() -> Self {
    Self {
      fail_reads: true,
      ..Self::default()
    }
  }

  pub fn failing_writes() -> Self {
    Self {
      fail_writes: true,
      ..Self::default()
    }
  }

  pub fn failing_partition_deletes() -> Self {
    Self {
      fail_partition_deletes: true,
      ..Self::default()
    }
  }

  fn io(what: &str) -> StoreError {
    StoreError::Io(format!("simulated {} failure", what))
  }
}

impl CacheStore for FlakyStore {
  fn open(&self, name: &str) -> StoreResult<Partition> {
    self.inner.open(name)
  }

  fn get(&self, partition: &Partition, url: &str) -> StoreResult<Option<StoredEntry>> {
    if self.fail_reads {
      return Err(Self::io("read"));
    }
    self.inner.get(partition, url)
  }

  fn put(&self, partition: &Partition, url: &str, entry: &StoredEntry) -> StoreResult<()> {
    if self.fail_writes {
      return Err(Self::io("write"));
    }
    self.inner.put(partition, url, entry)
  }

  fn delete(&self, partition: &Partition, url: &str) -> StoreResult<bool> {
    self.inner.delete(partition, url)
  }

  fn delete_if_unchanged(
    &self,
    partition: &Partition,
    url: &str,
    cached_at: DateTime<Utc>,
  ) -> StoreResult<bool> {
    self.inner.delete_if_unchanged(partition, url, cached_at)
  }

  fn delete_expired(&self, partition: &Partition, max_age: ChronoDuration) -> StoreResult<usize> {
    self.inner.delete_expired(partition, max_age)
  }

  fn list_partitions(&self) -> StoreResult<Vec<String>> {
    self.inner.list_partitions()
  }

  fn delete_partition(&self, name: &str) -> StoreResult<bool> {
    if self.fail_partition_deletes {
      return Err(Self::io("delete"));
    }
    self.inner.delete_partition(name)
  }
}

/// Install `config` into `store` and build a router over `transport`.
pub fn install<S, T>(config: &Config, store: &Arc<S>, transport: &Arc<T>) -> Router<S, T>
where
  S: CacheStore + 'static,
  T: Transport + 'static,
{
  let mut lifecycle = Lifecycle::new(Arc::new(config.clone()), Arc::clone(store));
  lifecycle.install().unwrap();
  lifecycle.router(Arc::clone(transport)).unwrap()
}
