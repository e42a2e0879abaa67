//! Cache Store Manager: named, versioned partitions of stored responses.
//!
//! This module provides the storage side of the request cache:
//! - Partitions are named `<base>-v<generation>` so superseded versions can be pruned
//! - Entries are keyed by request url and stamped with `cached_at` for age checks
//! - Expiry is lazy (checked on lookup) with an explicit sweep for bulk cleanup
//!
//! Two backends implement [`CacheStore`]: [`SqliteStore`] for durable storage and
//! [`MemoryStore`] for ephemeral runs and tests.

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStore;
pub use storage::SqliteStore;
pub use traits::{base_name, parse_version, CacheStore, Partition, StoredEntry};
