//! The four caching strategies and the helpers they share.
//!
//! Each strategy is a free function selected by [`StrategyKind`]. They never
//! return an error: every failure path ends in a stored entry or the
//! [`FallbackChain`].

mod revalidate;

pub use revalidate::{RevalidationTracker, BASE_COOLDOWN, MAX_COOLDOWN};

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::{CacheStore, Partition, StoredEntry};
use crate::error::{FetchError, InvalidResponse};
use crate::fallback::FallbackChain;
use crate::request::{RequestDescriptor, ResourceClass};
use crate::response::{ResolvedResponse, Response};
use crate::stats::RouterStats;
use crate::transport::Transport;
use crate::validator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StrategyKind {
  NetworkFirst,
  CacheFirst,
  StaleWhileRevalidate,
  CacheOnly,
}

impl fmt::Display for StrategyKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::NetworkFirst => "networkFirst",
      Self::CacheFirst => "cacheFirst",
      Self::StaleWhileRevalidate => "staleWhileRevalidate",
      Self::CacheOnly => "cacheOnly",
    })
  }
}

/// A strategy bound to its physical partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyPlan {
  pub kind: StrategyKind,
  pub partition: Option<Partition>,
  pub max_age: Option<Duration>,
}

impl StrategyPlan {
  /// Network with fallback only; used for unmapped classes and non-GET requests.
  pub fn pass_through() -> Self {
    Self {
      kind: StrategyKind::NetworkFirst,
      partition: None,
      max_age: None,
    }
  }
}

/// State shared by every strategy invocation, including detached revalidations.
pub struct Shared<S, T> {
  pub(crate) store: Arc<S>,
  pub(crate) transport: Arc<T>,
  pub(crate) fallback: FallbackChain,
  pub(crate) timeout: std::time::Duration,
  pub(crate) stats: RouterStats,
  pub(crate) revalidation: RevalidationTracker,
}

/// Why a network attempt produced nothing usable.
#[derive(Error, Debug)]
pub(crate) enum AttemptError {
  #[error(transparent)]
  Network(#[from] FetchError),
  #[error("invalid response: {0}")]
  Invalid(#[from] InvalidResponse),
}

impl<S: CacheStore, T: Transport> Shared<S, T> {
  /// Fetch with the configured timeout and validate the result.
  pub(crate) async fn fetch_validated(
    &self,
    descriptor: &RequestDescriptor,
  ) -> Result<Response, AttemptError> {
    let response = tokio::time::timeout(self.timeout, self.transport.fetch(descriptor))
      .await
      .map_err(|_| FetchError::Timeout(self.timeout))??;
    validator::validate(Some(&response))?;
    Ok(response)
  }

  /// Best-effort write of a fresh network response. Failures are logged and skipped.
  pub(crate) fn persist(
    &self,
    partition: Option<&Partition>,
    descriptor: &RequestDescriptor,
    response: &Response,
  ) {
    let Some(partition) = partition else {
      return;
    };
    if !descriptor.is_cacheable() || !response.is_success() {
      return;
    }

    let entry = StoredEntry::from_response(response, Utc::now());
    if let Err(e) = self.store.put(partition, descriptor.url(), &entry) {
      warn!(
        partition = partition.name(),
        url = descriptor.url(),
        error = %e,
        "store write skipped"
      );
      self.stats.store_write_failed();
    }
  }

  /// Stored entry and whether it is past the plan's max age. Read failures count as a miss.
  pub(crate) fn lookup(
    &self,
    plan: &StrategyPlan,
    descriptor: &RequestDescriptor,
  ) -> Option<(StoredEntry, bool)> {
    let partition = plan.partition.as_ref()?;
    if !descriptor.is_cacheable() {
      return None;
    }

    let entry = match self.store.get(partition, descriptor.url()) {
      Ok(entry) => entry?,
      Err(e) => {
        warn!(
          partition = partition.name(),
          url = descriptor.url(),
          error = %e,
          "store read failed, treating as miss"
        );
        self.stats.store_read_failed();
        return None;
      }
    };

    if let Err(reason) = validator::validate(Some(&Response::from(entry.clone()))) {
      warn!(url = descriptor.url(), %reason, "discarding invalid stored entry");
      self.evict(partition, descriptor.url(), &entry);
      return None;
    }

    let stale = entry.is_expired(plan.max_age, Utc::now());
    Some((entry, stale))
  }

  /// Like [`Self::lookup`], but expired entries are deleted and reported as absent.
  ///
  /// Expired shell pages are kept: the fallback chain still serves them.
  pub(crate) fn lookup_fresh(
    &self,
    plan: &StrategyPlan,
    descriptor: &RequestDescriptor,
  ) -> Option<StoredEntry> {
    match self.lookup(plan, descriptor)? {
      (entry, false) => Some(entry),
      (entry, true) => {
        if let Some(partition) = &plan.partition {
          debug!(partition = partition.name(), url = descriptor.url(), "entry expired");
          if !self.fallback.is_shell(partition, descriptor.url()) {
            self.evict(partition, descriptor.url(), &entry);
          }
        }
        None
      }
    }
  }

  /// Delete `entry` unless a newer write has replaced it since it was read.
  fn evict(&self, partition: &Partition, url: &str, entry: &StoredEntry) {
    if let Err(e) = self.store.delete_if_unchanged(partition, url, entry.cached_at) {
      warn!(partition = partition.name(), url, error = %e, "failed to delete entry");
    }
  }

  pub(crate) fn fallback(
    &self,
    descriptor: &RequestDescriptor,
    class: ResourceClass,
  ) -> ResolvedResponse {
    self.fallback.resolve(self.store.as_ref(), descriptor, class)
  }
}

/// Run the strategy named by `plan`.
pub(crate) async fn execute<S, T>(
  shared: &Arc<Shared<S, T>>,
  plan: &StrategyPlan,
  descriptor: &RequestDescriptor,
  class: ResourceClass,
) -> ResolvedResponse
where
  S: CacheStore + 'static,
  T: Transport + 'static,
{
  match plan.kind {
    StrategyKind::NetworkFirst => network_first(shared, plan, descriptor, class).await,
    StrategyKind::CacheFirst => cache_first(shared, plan, descriptor, class).await,
    StrategyKind::StaleWhileRevalidate => {
      stale_while_revalidate(shared, plan, descriptor, class).await
    }
    StrategyKind::CacheOnly => cache_only(shared, plan, descriptor, class),
  }
}

/// Network, then a fresh stored entry, then the fallback chain.
pub(crate) async fn network_first<S: CacheStore, T: Transport>(
  shared: &Shared<S, T>,
  plan: &StrategyPlan,
  descriptor: &RequestDescriptor,
  class: ResourceClass,
) -> ResolvedResponse {
  match shared.fetch_validated(descriptor).await {
    Ok(response) => {
      shared.persist(plan.partition.as_ref(), descriptor, &response);
      return ResolvedResponse::from_network(response);
    }
    Err(e) => debug!(url = descriptor.url(), error = %e, "network attempt failed"),
  }

  match shared.lookup_fresh(plan, descriptor) {
    Some(entry) => ResolvedResponse::offline(entry),
    None => shared.fallback(descriptor, class),
  }
}

/// A fresh stored entry without touching the network, otherwise network then fallback.
pub(crate) async fn cache_first<S: CacheStore, T: Transport>(
  shared: &Shared<S, T>,
  plan: &StrategyPlan,
  descriptor: &RequestDescriptor,
  class: ResourceClass,
) -> ResolvedResponse {
  if let Some(entry) = shared.lookup_fresh(plan, descriptor) {
    return ResolvedResponse::from_cache(entry, false);
  }

  match shared.fetch_validated(descriptor).await {
    Ok(response) => {
      shared.persist(plan.partition.as_ref(), descriptor, &response);
      ResolvedResponse::from_network(response)
    }
    Err(e) => {
      debug!(url = descriptor.url(), error = %e, "network attempt failed");
      shared.fallback(descriptor, class)
    }
  }
}

/// Any stored entry immediately plus a detached refresh; waits on network only on a miss.
pub(crate) async fn stale_while_revalidate<S, T>(
  shared: &Arc<Shared<S, T>>,
  plan: &StrategyPlan,
  descriptor: &RequestDescriptor,
  class: ResourceClass,
) -> ResolvedResponse
where
  S: CacheStore + 'static,
  T: Transport + 'static,
{
  if let Some((entry, stale)) = shared.lookup(plan, descriptor) {
    if let Some(partition) = &plan.partition {
      spawn_revalidation(shared, partition, descriptor);
    }
    return ResolvedResponse::from_cache(entry, stale);
  }

  match shared.fetch_validated(descriptor).await {
    Ok(response) => {
      shared.persist(plan.partition.as_ref(), descriptor, &response);
      ResolvedResponse::from_network(response)
    }
    Err(e) => {
      debug!(url = descriptor.url(), error = %e, "network attempt failed");
      shared.fallback(descriptor, class)
    }
  }
}

/// Store only. The network is never contacted.
pub(crate) fn cache_only<S: CacheStore, T: Transport>(
  shared: &Shared<S, T>,
  plan: &StrategyPlan,
  descriptor: &RequestDescriptor,
  class: ResourceClass,
) -> ResolvedResponse {
  match shared.lookup_fresh(plan, descriptor) {
    Some(entry) => ResolvedResponse::from_cache(entry, false),
    None => shared.fallback(descriptor, class),
  }
}

/// Refresh `descriptor` in the background. The caller never observes the outcome.
fn spawn_revalidation<S, T>(
  shared: &Arc<Shared<S, T>>,
  partition: &Partition,
  descriptor: &RequestDescriptor,
) where
  S: CacheStore + 'static,
  T: Transport + 'static,
{
  let key = format!("{}|{}", partition.name(), descriptor.url());
  if !shared.revalidation.try_begin(&key) {
    debug!(key = %key, "revalidation skipped (in flight or cooling down)");
    shared.stats.revalidation_skipped();
    return;
  }
  shared.stats.revalidation_started();

  let shared = Arc::clone(shared);
  let partition = partition.clone();
  let descriptor = descriptor.clone();

  tokio::spawn(async move {
    match shared.fetch_validated(&descriptor).await {
      Ok(response) => {
        shared.persist(Some(&partition), &descriptor, &response);
        shared.revalidation.succeeded(&key);
        debug!(key = %key, status = response.status, "revalidated");
      }
      Err(e) => {
        shared.revalidation.failed(&key);
        shared.stats.revalidation_failed();
        warn!(key = %key, error = %e, "revalidation failed");
      }
    }
  });
}
