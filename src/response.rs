//! Response values and the source tag carried back to the caller.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;

use crate::cache::StoredEntry;
use crate::request::Headers;

/// An HTTP-shaped response, either fresh from the transport or rebuilt from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
    self
      .headers
      .insert(name.as_ref().to_ascii_lowercase(), value.into());
    self
  }

  /// 2xx responses are the only ones written to a partition.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Declared `content-length`, if the response carries one.
  pub fn declared_length(&self) -> Option<&str> {
    self.headers.get("content-length").map(String::as_str)
  }

  pub fn body_text(&self) -> Cow<'_, str> {
    String::from_utf8_lossy(&self.body)
  }
}

impl From<StoredEntry> for Response {
  fn from(entry: StoredEntry) -> Self {
    Self {
      status: entry.status,
      headers: entry.headers,
      body: entry.body,
    }
  }
}

/// Where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
  /// Fresh data from network
  Network,
  /// Data from a partition, within its max age
  CacheFresh,
  /// Data from a partition past its max age, served while revalidating
  CacheStale,
  /// Network failed, serving a stored entry instead
  Offline,
  /// Offline shell document served by the fallback chain
  Shell,
  /// Structured 503 produced by the fallback chain
  StructuredError,
}

impl ResponseSource {
  /// Served from something other than a live network answer.
  pub fn is_degraded(&self) -> bool {
    matches!(
      self,
      Self::Offline | Self::Shell | Self::StructuredError
    )
  }
}

/// Final value handed back by the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResponse {
  pub response: Response,
  pub source: ResponseSource,
  /// When the data was cached (if from a partition)
  pub cached_at: Option<DateTime<Utc>>,
}

impl ResolvedResponse {
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(entry: StoredEntry, is_stale: bool) -> Self {
    let cached_at = entry.cached_at;
    Self {
      response: entry.into(),
      source: if is_stale {
        ResponseSource::CacheStale
      } else {
        ResponseSource::CacheFresh
      },
      cached_at: Some(cached_at),
    }
  }

  pub fn offline(entry: StoredEntry) -> Self {
    let cached_at = entry.cached_at;
    Self {
      response: entry.into(),
      source: ResponseSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn shell(entry: StoredEntry) -> Self {
    let cached_at = entry.cached_at;
    Self {
      response: entry.into(),
      source: ResponseSource::Shell,
      cached_at: Some(cached_at),
    }
  }

  pub fn structured_error(response: Response) -> Self {
    Self {
      response,
      source: ResponseSource::StructuredError,
      cached_at: None,
    }
  }

  pub fn status(&self) -> u16 {
    self.response.status
  }

  pub fn body(&self) -> &[u8] {
    &self.response.body
  }

  pub fn is_error(&self) -> bool {
    self.source == ResponseSource::StructuredError
  }
}
