//! Last-resort resolution once network and store have both failed.
//!
//! Steps, first match wins:
//! 1. `document` requests get the newest cached shell page, if any
//! 2. `api` requests get a JSON 503 `{error, message, timestamp}`
//! 3. everything else gets a plain-text 503
//!
//! Every branch yields a response the validator accepts, so resolution always
//! terminates with a usable value.

use chrono::{SecondsFormat, Utc};
use serde_json::json;
use tracing::{debug, warn};

use crate::cache::{CacheStore, Partition, StoredEntry};
use crate::config::Config;
use crate::request::{RequestDescriptor, ResourceClass};
use crate::response::{ResolvedResponse, Response};
use crate::validator;

pub const OFFLINE_STATUS: u16 = 503;
pub const OFFLINE_MESSAGE: &str = "Resource unavailable offline";

#[derive(Debug, Clone)]
pub struct FallbackChain {
  shell_partition: Option<Partition>,
  shell_urls: Vec<String>,
}

impl FallbackChain {
  pub fn new(config: &Config) -> Self {
    let shell_partition = config
      .strategy_for(ResourceClass::Document)
      .map(|strategy| Partition::versioned(&strategy.partition_name, config.generation));

    Self {
      shell_partition,
      shell_urls: config.fallback.shell_urls.clone(),
    }
  }

  /// Whether `url` in `partition` is one of the configured shell pages.
  pub fn is_shell(&self, partition: &Partition, url: &str) -> bool {
    self.shell_partition.as_ref() == Some(partition) && self.shell_urls.iter().any(|u| u == url)
  }

  /// Resolve `descriptor` without touching the network. Never fails.
  pub fn resolve<S: CacheStore + ?Sized>(
    &self,
    store: &S,
    descriptor: &RequestDescriptor,
    class: ResourceClass,
  ) -> ResolvedResponse {
    if class == ResourceClass::Document {
      if let Some(entry) = self.newest_shell(store) {
        debug!(url = descriptor.url(), "serving offline shell");
        return ResolvedResponse::shell(entry);
      }
    }

    self.structured_error(descriptor, class)
  }

  /// The 503 branch of the chain, skipping the shell lookup.
  pub fn structured_error(
    &self,
    descriptor: &RequestDescriptor,
    class: ResourceClass,
  ) -> ResolvedResponse {
    let response = match class {
      ResourceClass::Api => api_error(&format!(
        "Network unavailable and no cached response for {}",
        descriptor.url()
      )),
      _ => offline_error(),
    };
    ResolvedResponse::structured_error(response)
  }

  fn newest_shell<S: CacheStore + ?Sized>(&self, store: &S) -> Option<StoredEntry> {
    let partition = self.shell_partition.as_ref()?;

    self
      .shell_urls
      .iter()
      .filter_map(|url| match store.get(partition, url) {
        Ok(entry) => entry,
        Err(e) => {
          warn!(url = url.as_str(), error = %e, "shell lookup failed");
          None
        }
      })
      .filter(|entry| {
        let response = Response::from(entry.clone());
        response.is_success() && validator::is_valid(&response)
      })
      .max_by_key(|entry| entry.cached_at)
  }
}

/// Machine-readable 503 for API callers.
pub fn api_error(message: &str) -> Response {
  let body = json!({
    "error": true,
    "message": message,
    "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
  })
  .to_string();

  sized(Response::new(OFFLINE_STATUS, body).with_header("content-type", "application/json"))
}

/// Generic 503 for anything that is not an API call.
pub fn offline_error() -> Response {
  sized(
    Response::new(OFFLINE_STATUS, OFFLINE_MESSAGE)
      .with_header("content-type", "text/plain; charset=utf-8"),
  )
}

fn sized(response: Response) -> Response {
  let length = response.body.len().to_string();
  response.with_header("content-length", length)
}
