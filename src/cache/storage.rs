//! SQLite implementation of the partition store.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::traits::{CacheStore, Partition, StoredEntry};
use crate::error::{StoreError, StoreResult};
use crate::request::Headers;

/// SQLite-based partition store.
///
/// All access goes through one connection, so writes to the same key are
/// linearised and the last writer wins.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open the store at the default location.
  pub fn open_default() -> StoreResult<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open or create the store at `path`.
  pub fn open_at(path: &Path) -> StoreResult<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Io(format!(
          "failed to create store directory {}: {}",
          parent.display(),
          e
        ))
      })?;
    }

    let conn = Connection::open(path)?;
    Self::with_connection(conn)
  }

  /// Store that lives only as long as this value.
  pub fn in_memory() -> StoreResult<Self> {
    Self::with_connection(Connection::open_in_memory()?)
  }

  fn with_connection(conn: Connection) -> StoreResult<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  /// Get the default database path.
  pub fn default_path() -> StoreResult<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Io("could not determine data directory".to_string()))?;

    Ok(data_dir.join("rrcl").join("store.db"))
  }

  fn run_migrations(&self) -> StoreResult<()> {
    self.lock()?.execute_batch(STORE_SCHEMA)?;
    Ok(())
  }

  fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|_| StoreError::Poisoned)
  }
}

const STORE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- One row per (partition, url); url_hash keeps the key fixed-length
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (partition, url_hash),
    FOREIGN KEY (partition) REFERENCES partitions(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_cached_at ON entries(partition, cached_at);
"#;

impl CacheStore for SqliteStore {
  fn open(&self, name: &str) -> StoreResult<Partition> {
    let conn = self.lock()?;
    conn.execute(
      "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?, ?)",
      params![name, format_datetime(Utc::now())],
    )?;
    Ok(Partition::named(name))
  }

  fn get(&self, partition: &Partition, url: &str) -> StoreResult<Option<StoredEntry>> {
    let conn = self.lock()?;

    let row: Option<(i64, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE partition = ? AND url_hash = ?",
        params![partition.name(), url_hash(url)],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()?;

    let Some((status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let corrupt = |reason: String| StoreError::CorruptEntry {
      url: url.to_string(),
      reason,
    };

    let status = u16::try_from(status).map_err(|_| corrupt(format!("status {}", status)))?;
    let headers: Headers =
      serde_json::from_str(&headers).map_err(|e| corrupt(format!("headers: {}", e)))?;
    let cached_at = parse_datetime(&cached_at).map_err(corrupt)?;

    StoredEntry {
      body,
      status,
      headers,
      cached_at,
    }
    .check(url)
    .map(Some)
  }

  fn put(&self, partition: &Partition, url: &str, entry: &StoredEntry) -> StoreResult<()> {
    let mut conn = self.lock()?;
    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| StoreError::Io(format!("failed to serialize headers: {}", e)))?;

    let tx = conn.transaction()?;
    let exists = tx
      .query_row(
        "SELECT 1 FROM partitions WHERE name = ?",
        params![partition.name()],
        |_| Ok(()),
      )
      .optional()?
      .is_some();
    if !exists {
      return Err(StoreError::UnknownPartition(partition.name().to_string()));
    }

    tx.execute(
      "INSERT OR REPLACE INTO entries (partition, url_hash, url, status, headers, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, ?)",
      params![
        partition.name(),
        url_hash(url),
        url,
        entry.status,
        headers,
        entry.body,
        format_datetime(entry.cached_at)
      ],
    )?;
    tx.commit()?;

    Ok(())
  }

  fn delete(&self, partition: &Partition, url: &str) -> StoreResult<bool> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM entries WHERE partition = ? AND url_hash = ?",
      params![partition.name(), url_hash(url)],
    )?;
    Ok(removed > 0)
  }

  fn delete_if_unchanged(
    &self,
    partition: &Partition,
    url: &str,
    cached_at: DateTime<Utc>,
  ) -> StoreResult<bool> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM entries WHERE partition = ? AND url_hash = ? AND cached_at = ?",
      params![partition.name(), url_hash(url), format_datetime(cached_at)],
    )?;
    Ok(removed > 0)
  }

  fn delete_expired(&self, partition: &Partition, max_age: Duration) -> StoreResult<usize> {
    // A cutoff before the earliest representable time cannot match anything
    let Some(cutoff) = Utc::now().checked_sub_signed(max_age) else {
      return Ok(0);
    };
    let conn = self.lock()?;
    let cutoff = format_datetime(cutoff);
    let removed = conn.execute(
      "DELETE FROM entries WHERE partition = ? AND cached_at < ?",
      params![partition.name(), cutoff],
    )?;
    Ok(removed)
  }

  fn list_partitions(&self) -> StoreResult<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT name FROM partitions ORDER BY name")?;
    let names = stmt
      .query_map([], |row| row.get(0))?
      .collect::<Result<Vec<String>, _>>()?;
    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> StoreResult<bool> {
    let mut conn = self.lock()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM entries WHERE partition = ?", params![name])?;
    let removed = tx.execute("DELETE FROM partitions WHERE name = ?", params![name])?;
    tx.commit()?;
    Ok(removed > 0)
  }
}

/// SHA256 of the url for stable, fixed-length keys.
fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

/// Fixed-width UTC timestamps so that text comparison orders them correctly.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, String> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| format!("cached_at '{}': {}", s, e))
}
