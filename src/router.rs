//! Entry point that classifies a request and dispatches it to a strategy.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

use crate::cache::{CacheStore, Partition};
use crate::config::Config;
use crate::fallback::FallbackChain;
use crate::request::{Classifier, RequestDescriptor, ResourceClass};
use crate::response::ResolvedResponse;
use crate::stats::{RouterStats, StatsSnapshot};
use crate::strategy::{self, RevalidationTracker, Shared, StrategyPlan};
use crate::transport::Transport;
use crate::validator;

/// Resolves request descriptors through the configured strategies.
///
/// The strategy table is built once from [`Config`] and never changes. Cloning
/// a router is cheap and clones share the store, transport and statistics.
pub struct Router<S, T> {
  shared: Arc<Shared<S, T>>,
  classifier: Arc<Classifier>,
  table: Arc<HashMap<ResourceClass, StrategyPlan>>,
}

impl<S, T> Router<S, T>
where
  S: CacheStore + 'static,
  T: Transport + 'static,
{
  pub fn new(config: &Config, store: Arc<S>, transport: Arc<T>) -> Self {
    let table: HashMap<ResourceClass, StrategyPlan> = config
      .strategies
      .iter()
      .map(|strategy| {
        (
          strategy.resource_class,
          StrategyPlan {
            kind: strategy.strategy_kind,
            partition: Some(Partition::versioned(
              &strategy.partition_name,
              config.generation,
            )),
            max_age: strategy.max_age(),
          },
        )
      })
      .collect();

    Self {
      shared: Arc::new(Shared {
        store,
        transport,
        fallback: FallbackChain::new(config),
        timeout: config.network.timeout(),
        stats: RouterStats::default(),
        revalidation: RevalidationTracker::default(),
      }),
      classifier: Arc::new(Classifier::new(&config.classification)),
      table: Arc::new(table),
    }
  }

  /// Resolve one request. Always returns a validated response; never fails.
  pub async fn route(&self, descriptor: &RequestDescriptor) -> ResolvedResponse {
    let class = self.classifier.classify(descriptor);
    let plan = self.plan_for(descriptor, class);

    let resolved = strategy::execute(&self.shared, &plan, descriptor, class).await;

    let resolved = match validator::validate(Some(&resolved.response)) {
      Ok(()) => resolved,
      Err(reason) => {
        error!(
          url = descriptor.url(),
          strategy = %plan.kind,
          %reason,
          "strategy produced an invalid response"
        );
        self.shared.fallback.structured_error(descriptor, class)
      }
    };

    if resolved.source.is_degraded() {
      debug!(url = descriptor.url(), class = %class, source = ?resolved.source, "degraded response");
    }
    self.shared.stats.record(resolved.source);
    resolved
  }

  /// The plan a descriptor of `class` would run under.
  pub fn plan_for(&self, descriptor: &RequestDescriptor, class: ResourceClass) -> StrategyPlan {
    if !descriptor.is_cacheable() {
      return StrategyPlan::pass_through();
    }
    self
      .table
      .get(&class)
      .cloned()
      .unwrap_or_else(StrategyPlan::pass_through)
  }

  pub fn stats(&self) -> StatsSnapshot {
    self.shared.stats.snapshot()
  }

  pub fn store(&self) -> &Arc<S> {
    &self.shared.store
  }
}

impl<S, T> Clone for Router<S, T> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
      classifier: Arc::clone(&self.classifier),
      table: Arc::clone(&self.table),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStore, StoredEntry};
  use crate::error::FetchError;
  use crate::request::Headers;
  use crate::response::{Response, ResponseSource};
  use crate::strategy::StrategyKind;
  use crate::testing::{install, FlakyStore, MockTransport, Reply};
  use chrono::{Duration as ChronoDuration, Utc};
  use std::time::{Duration, Instant};

  const TABLE: &str = r#"
generation: 1
network:
  timeout_ms: 100
fallback:
  shell_urls: ["/"]
strategies:
  - { resource_class: document, strategy_kind: networkFirst, partition_name: pages, max_age_seconds: 60 }
  - { resource_class: api, strategy_kind: networkFirst, partition_name: api, max_age_seconds: 60 }
  - { resource_class: staticAsset, strategy_kind: cacheFirst, partition_name: static, max_age_seconds: 60 }
  - { resource_class: other, strategy_kind: staleWhileRevalidate, partition_name: misc, max_age_seconds: 60 }
"#;

  fn config_with(kind: StrategyKind, class: ResourceClass) -> Config {
    let mut config = Config::from_yaml(TABLE).unwrap();
    for strategy in &mut config.strategies {
      if strategy.resource_class == class {
        strategy.strategy_kind = kind;
      }
    }
    config
  }

  fn entry(body: &str, age: ChronoDuration) -> StoredEntry {
    StoredEntry {
      body: body.as_bytes().to_vec(),
      status: 200,
      headers: Headers::new(),
      cached_at: Utc::now() - age,
    }
  }

  fn seed(store: &MemoryStore, partition: &str, url: &str, stored: StoredEntry) {
    store.put(&Partition::named(partition), url, &stored).unwrap();
  }

  #[tokio::test]
  async fn test_network_first_persists_success() {
    // Scenario A
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "ok"));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);

    let resolved = router.route(&RequestDescriptor::get("/api/x")).await;
    assert_eq!(resolved.status(), 200);
    assert_eq!(resolved.body(), b"ok");
    assert_eq!(resolved.source, ResponseSource::Network);

    let stored = store
      .get(&Partition::named("api-v1"), "/api/x")
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"ok");
  }

  #[tokio::test]
  async fn test_network_first_timeout_serves_store() {
    // Scenario C
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new(Reply::Hang));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    seed(&store, "api-v1", "/api/x", entry("cached", ChronoDuration::seconds(5)));

    let resolved = router.route(&RequestDescriptor::get("/api/x")).await;
    assert_eq!(resolved.status(), 200);
    assert_eq!(resolved.body(), b"cached");
    assert_eq!(resolved.source, ResponseSource::Offline);
    assert!(!resolved.is_error());
  }

  #[tokio::test]
  async fn test_network_first_ignores_and_deletes_expired_entry() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::failing());
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    seed(&store, "api-v1", "/api/x", entry("old", ChronoDuration::minutes(5)));

    let resolved = router.route(&RequestDescriptor::get("/api/x")).await;
    assert!(resolved.is_error());
    assert_eq!(resolved.status(), 503);
    assert!(store
      .get(&Partition::named("api-v1"), "/api/x")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_network_first_invalid_response_falls_back_to_store() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new(Reply::Respond(
      Response::new(200, "short").with_header("content-length", "100"),
    )));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    seed(&store, "api-v1", "/api/x", entry("cached", ChronoDuration::zero()));

    let resolved = router.route(&RequestDescriptor::get("/api/x")).await;
    assert_eq!(resolved.body(), b"cached");
    assert_eq!(resolved.source, ResponseSource::Offline);

    // The invalid candidate was not written
    let stored = store
      .get(&Partition::named("api-v1"), "/api/x")
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"cached");
  }

  #[tokio::test]
  async fn test_non_success_is_returned_but_not_stored() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(404, "missing"));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);

    let resolved = router.route(&RequestDescriptor::get("/api/x")).await;
    assert_eq!(resolved.status(), 404);
    assert_eq!(resolved.source, ResponseSource::Network);
    assert!(store
      .get(&Partition::named("api-v1"), "/api/x")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_cache_first_never_touches_network_when_fresh() {
    // P3
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "network"));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    seed(&store, "static-v1", "/app.js", entry("cached", ChronoDuration::seconds(1)));

    let first = router.route(&RequestDescriptor::get("/app.js")).await;
    let second = router.route(&RequestDescriptor::get("/app.js")).await;

    assert_eq!(first.body(), b"cached");
    assert_eq!(first.body(), second.body());
    assert_eq!(first.source, ResponseSource::CacheFresh);
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_first_refetches_expired() {
    // P5
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "network"));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    seed(&store, "static-v1", "/app.js", entry("old", ChronoDuration::minutes(2)));

    let resolved = router.route(&RequestDescriptor::get("/app.js")).await;
    assert_eq!(resolved.body(), b"network");
    assert_eq!(transport.calls(), 1);

    let stored = store
      .get(&Partition::named("static-v1"), "/app.js")
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"network");
  }

  #[tokio::test]
  async fn test_cache_first_miss_and_network_failure_falls_back() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::failing());
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);

    let resolved = router.route(&RequestDescriptor::get("/app.js")).await;
    assert!(resolved.is_error());
    assert_eq!(resolved.response.body_text(), crate::fallback::OFFLINE_MESSAGE);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_does_not_wait() {
    // P4
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "fresh").with_delay(Duration::from_millis(50)));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    let descriptor = RequestDescriptor::get("/feed").with_class(ResourceClass::Other);
    seed(&store, "misc-v1", "/feed", entry("stale", ChronoDuration::minutes(10)));

    let started = Instant::now();
    let resolved = router.route(&descriptor).await;
    assert!(started.elapsed() < Duration::from_millis(50));
    assert_eq!(resolved.body(), b"stale");
    assert_eq!(resolved.source, ResponseSource::CacheStale);

    // Let the detached refresh land
    tokio::time::sleep(Duration::from_millis(150)).await;

    let resolved = router.route(&descriptor).await;
    assert_eq!(resolved.body(), b"fresh");
    assert_eq!(resolved.source, ResponseSource::CacheFresh);
  }

  #[tokio::test]
  async fn test_stale_while_revalidate_miss_waits_for_network() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "fresh"));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    let descriptor = RequestDescriptor::get("/feed").with_class(ResourceClass::Other);

    let resolved = router.route(&descriptor).await;
    assert_eq!(resolved.body(), b"fresh");
    assert_eq!(resolved.source, ResponseSource::Network);
    assert!(store
      .get(&Partition::named("misc-v1"), "/feed")
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_revalidation_failure_keeps_entry_and_backs_off() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::failing());
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    let descriptor = RequestDescriptor::get("/feed").with_class(ResourceClass::Other);
    seed(&store, "misc-v1", "/feed", entry("stale", ChronoDuration::minutes(10)));

    let resolved = router.route(&descriptor).await;
    assert_eq!(resolved.body(), b"stale");
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Cooling down: served again, no new fetch
    let resolved = router.route(&descriptor).await;
    assert_eq!(resolved.body(), b"stale");
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(transport.calls(), 1);
    let stats = router.stats();
    assert_eq!(stats.revalidations_started, 1);
    assert_eq!(stats.revalidations_failed, 1);
    assert_eq!(stats.revalidations_skipped, 1);
  }

  #[tokio::test]
  async fn test_revalidation_outlives_cancelled_caller() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "fresh").with_delay(Duration::from_millis(30)));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    seed(&store, "misc-v1", "/feed", entry("stale", ChronoDuration::minutes(10)));

    let caller = router.clone();
    let handle = tokio::spawn(async move {
      caller
        .route(&RequestDescriptor::get("/feed").with_class(ResourceClass::Other))
        .await
    });
    tokio::time::sleep(Duration::from_millis(5)).await;
    handle.abort();
    drop(router);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(transport.calls(), 1);
    let stored = store
      .get(&Partition::named("misc-v1"), "/feed")
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"fresh");
  }

  #[tokio::test]
  async fn test_invalid_revalidation_keeps_stored_entry() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new(Reply::Respond(
      Response::new(200, "fresh").with_header("content-length", "99"),
    )));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    let descriptor = RequestDescriptor::get("/feed").with_class(ResourceClass::Other);
    seed(&store, "misc-v1", "/feed", entry("stale", ChronoDuration::minutes(10)));

    let resolved = router.route(&descriptor).await;
    assert_eq!(resolved.body(), b"stale");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let stored = store
      .get(&Partition::named("misc-v1"), "/feed")
      .unwrap()
      .unwrap();
    assert_eq!(stored.body, b"stale");
    assert_eq!(router.stats().revalidations_failed, 1);
  }

  #[tokio::test]
  async fn test_cache_only_never_uses_network() {
    // Scenario B
    let config = config_with(StrategyKind::CacheOnly, ResourceClass::Api);
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "network"));
    let router = install(&config, &store, &transport);

    let resolved = router
      .route(&RequestDescriptor::get("/x").with_class(ResourceClass::Api))
      .await;

    assert_eq!(resolved.status(), 503);
    assert!(resolved.is_error());
    let body: serde_json::Value = serde_json::from_slice(resolved.body()).unwrap();
    assert_eq!(body["error"], true);
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_cache_only_serves_fresh_entry() {
    let config = config_with(StrategyKind::CacheOnly, ResourceClass::Api);
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "network"));
    let router = install(&config, &store, &transport);
    seed(&store, "api-v1", "/api/x", entry("local", ChronoDuration::zero()));

    let resolved = router.route(&RequestDescriptor::get("/api/x")).await;
    assert_eq!(resolved.body(), b"local");
    assert_eq!(transport.calls(), 0);
  }

  #[tokio::test]
  async fn test_every_class_falls_back_when_everything_fails() {
    // P6
    for kind in [
      StrategyKind::NetworkFirst,
      StrategyKind::CacheFirst,
      StrategyKind::StaleWhileRevalidate,
      StrategyKind::CacheOnly,
    ] {
      for class in ResourceClass::ALL {
        let config = config_with(kind, class);
        let store = Arc::new(MemoryStore::new());
        let transport = Arc::new(MockTransport::failing());
        let router = install(&config, &store, &transport);

        let resolved = router
          .route(&RequestDescriptor::get("/thing").with_class(class))
          .await;
        assert!(resolved.is_error(), "{} {}", kind, class);
        assert_eq!(resolved.status(), 503);
        assert!(validator::is_valid(&resolved.response));
      }
    }
  }

  #[tokio::test]
  async fn test_document_falls_back_to_shell() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::failing());
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    seed(&store, "pages-v1", "/", entry("<shell>", ChronoDuration::days(3)));

    let resolved = router.route(&RequestDescriptor::get("/report.html")).await;
    assert_eq!(resolved.source, ResponseSource::Shell);
    assert_eq!(resolved.body(), b"<shell>");
  }

  #[tokio::test]
  async fn test_expired_shell_url_is_kept_for_fallback() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::failing());
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);
    seed(&store, "pages-v1", "/", entry("<shell>", ChronoDuration::days(3)));

    let resolved = router.route(&RequestDescriptor::get("/")).await;
    assert_eq!(resolved.source, ResponseSource::Shell);
    assert_eq!(resolved.body(), b"<shell>");

    // Still there for the next document
    let resolved = router.route(&RequestDescriptor::get("/report.html")).await;
    assert_eq!(resolved.source, ResponseSource::Shell);
    assert!(store
      .get(&Partition::named("pages-v1"), "/")
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_hanging_network_is_bounded() {
    // P1
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::new(Reply::Hang));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);

    let started = Instant::now();
    let resolved = router.route(&RequestDescriptor::get("/api/slow")).await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(resolved.is_error());
  }

  #[tokio::test]
  async fn test_unmapped_class_is_pass_through() {
    let mut config = Config::from_yaml(TABLE).unwrap();
    config
      .strategies
      .retain(|s| s.resource_class != ResourceClass::Other);
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "ok"));
    let router = install(&config, &store, &transport);
    let descriptor = RequestDescriptor::get("/feed").with_class(ResourceClass::Other);

    assert_eq!(
      router.plan_for(&descriptor, ResourceClass::Other),
      StrategyPlan::pass_through()
    );
    let resolved = router.route(&descriptor).await;
    assert_eq!(resolved.body(), b"ok");
    for name in store.list_partitions().unwrap() {
      assert!(store
        .get(&Partition::named(name), "/feed")
        .unwrap()
        .is_none());
    }
  }

  #[tokio::test]
  async fn test_post_is_never_cached() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(201, "created"));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);

    let resolved = router
      .route(&RequestDescriptor::new("/api/items", "POST"))
      .await;
    assert_eq!(resolved.status(), 201);
    assert!(store
      .get(&Partition::named("api-v1"), "/api/items")
      .unwrap()
      .is_none());
  }

  #[tokio::test]
  async fn test_store_write_failure_still_returns_response() {
    let store = Arc::new(FlakyStore::failing_writes());
    let transport = Arc::new(MockTransport::ok(200, "ok"));
    let config = Config::from_yaml(TABLE).unwrap();
    let router = install(&config, &store, &transport);

    let resolved = router.route(&RequestDescriptor::get("/api/x")).await;
    assert_eq!(resolved.body(), b"ok");
    assert_eq!(router.stats().store_write_failures, 1);
  }

  #[tokio::test]
  async fn test_store_read_failure_is_a_miss() {
    let store = Arc::new(FlakyStore::failing_reads());
    let transport = Arc::new(MockTransport::new(Reply::Fail(FetchError::Transport(
      "connection refused".to_string(),
    ))));
    let config = Config::from_yaml(TABLE).unwrap();
    let router = install(&config, &store, &transport);

    let resolved = router.route(&RequestDescriptor::get("/api/x")).await;
    assert!(resolved.is_error());
    assert!(router.stats().store_read_failures >= 1);
  }

  #[tokio::test]
  async fn test_concurrent_routes() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::ok(200, "ok").with_delay(Duration::from_millis(10)));
    let router = install(&Config::from_yaml(TABLE).unwrap(), &store, &transport);

    let handles: Vec<_> = (0..16)
      .map(|i| {
        let router = router.clone();
        tokio::spawn(async move {
          router
            .route(&RequestDescriptor::get(format!("/api/item/{}", i % 4)))
            .await
        })
      })
      .collect();

    for handle in handles {
      let resolved = handle.await.unwrap();
      assert_eq!(resolved.body(), b"ok");
    }
    assert_eq!(router.stats().network, 16);
  }
}
