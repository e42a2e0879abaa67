//! Error types for the request cache layer.
//!
//! None of these ever reach the caller of [`Router::route`](crate::router::Router::route):
//! network, validation and store failures are absorbed by the strategies and the
//! fallback chain. Only [`ConfigError`] and [`LifecycleError`] surface, and only at
//! startup.

use std::time::Duration;
use thiserror::Error;

use crate::request::ResourceClass;

/// A network attempt that did not produce a response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
  #[error("network request timed out after {0:?}")]
  Timeout(Duration),

  #[error("invalid request url {url}: {reason}")]
  InvalidUrl { url: String, reason: String },

  #[error("invalid request method {0}")]
  InvalidMethod(String),

  #[error("network request failed: {0}")]
  Transport(String),
}

/// Why a candidate response was rejected by the validator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidResponse {
  #[error("no response")]
  Missing,

  #[error("status code {0} is outside 100-599")]
  StatusOutOfRange(u16),

  #[error("declared content-length {declared} does not match body size {actual}")]
  LengthMismatch { declared: u64, actual: u64 },

  #[error("declared content-length {0:?} is not a number")]
  MalformedLength(String),
}

/// Failure of the durable store.
#[derive(Error, Debug)]
pub enum StoreError {
  #[error("partition not found: {0}")]
  UnknownPartition(String),

  #[error("corrupt entry for {url}: {reason}")]
  CorruptEntry { url: String, reason: String },

  #[error("store lock poisoned")]
  Poisoned,

  #[error("storage I/O failed: {0}")]
  Io(String),

  #[error(transparent)]
  Sqlite(#[from] rusqlite::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Configuration rejected at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
  #[error("resource class {0} is configured more than once")]
  DuplicateResourceClass(ResourceClass),

  #[error("partition name for {0} is empty")]
  EmptyPartitionName(ResourceClass),

  #[error("partition name {name:?} is invalid: {reason}")]
  InvalidPartitionName { name: String, reason: String },

  #[error("network timeout must be greater than zero")]
  ZeroTimeout,

  #[error("generation must be greater than zero")]
  ZeroGeneration,

  #[error("shell urls are configured but no strategy covers the document class")]
  ShellWithoutDocumentPartition,

  #[error("max age of {seconds}s for {class} exceeds the {limit}s ceiling")]
  MaxAgeTooLarge {
    class: ResourceClass,
    seconds: u64,
    limit: u64,
  },
}

/// Lifecycle transition failure.
#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error("invalid configuration: {0}")]
  Config(#[from] ConfigError),

  #[error("failed to provision partition {name}: {source}")]
  Provision {
    name: String,
    #[source]
    source: StoreError,
  },

  #[error("cannot {action} while {state}")]
  InvalidTransition {
    action: &'static str,
    state: crate::lifecycle::LifecycleState,
  },
}
