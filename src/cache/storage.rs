//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::http::{RequestKey, Response};

/// A single cached response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// The captured response
  pub response: Response,
  /// When the response was cached
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Stores are addressed by origin and name (the cache version). An origin
/// only ever sees its own stores. Every method is an individually atomic
/// point operation; callers get no guarantee across calls.
pub trait CacheStorage: Send + Sync {
  /// Create the named store if it does not exist yet.
  fn open(&self, origin: &str, name: &str) -> Result<()>;

  /// Look up the response stored for `key` in the named store.
  fn match_request(
    &self,
    origin: &str,
    name: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedResponse>>;

  /// Store a response, overwriting any previous entry for the same key.
  fn put(&self, origin: &str, name: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Delete the named store and all its entries. Returns whether it existed.
  fn delete(&self, origin: &str, name: &str) -> Result<bool>;

  /// Names of all stores belonging to `origin`, oldest first.
  fn keys(&self, origin: &str) -> Result<Vec<String>>;

  /// Request keys held by the named store.
  fn entries(&self, origin: &str, name: &str) -> Result<Vec<RequestKey>>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open the cache database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open (or create) the cache database at `path`.
  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::from_connection(conn)
  }

  /// A private database that lives as long as this value.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("wildcache").join("cache.db"))
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
-- One row per named store (cache version) of an origin
CREATE TABLE IF NOT EXISTS cache_stores (
    origin TEXT NOT NULL,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (origin, name)
);

-- Captured responses, one per request identity per store
CREATE TABLE IF NOT EXISTS cache_entries (
    origin TEXT NOT NULL,
    store TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (origin, store, request_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_store ON cache_entries(origin, store);
"#;

impl CacheStorage for SqliteStorage {
  fn open(&self, origin: &str, name: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (origin, name) VALUES (?, ?)",
        params![origin, name],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;

    Ok(())
  }

  fn match_request(
    &self,
    origin: &str,
    name: &str,
    key: &RequestKey,
  ) -> Result<Option<CachedResponse>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM cache_entries
         WHERE origin = ? AND store = ? AND request_hash = ?",
        params![origin, name, key.cache_hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key, name, e))?;

    match row {
      Some((status, headers, body, cached_at_str)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
        let cached_at = parse_datetime(&cached_at_str)?;
        Ok(Some(CachedResponse {
          response: Response {
            status,
            headers,
            body,
          },
          cached_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn put(&self, origin: &str, name: &str, key: &RequestKey, response: &Response) -> Result<()> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    conn
      .execute(
        "INSERT OR IGNORE INTO cache_stores (origin, name) VALUES (?, ?)",
        params![origin, name],
      )
      .map_err(|e| eyre!("Failed to open cache store {}: {}", name, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (origin, store, request_hash, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          origin,
          name,
          key.cache_hash(),
          key.method,
          key.url,
          response.status,
          headers,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store {}: {}", key, e))?;

    Ok(())
  }

  fn delete(&self, origin: &str, name: &str) -> Result<bool> {
    let conn = self.lock()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute(
        "DELETE FROM cache_entries WHERE origin = ? AND store = ?",
        params![origin, name],
      )
      .and_then(|_| {
        conn.execute(
          "DELETE FROM cache_stores WHERE origin = ? AND name = ?",
          params![origin, name],
        )
      });

    match result {
      Ok(removed) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(removed > 0)
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to delete cache store {}: {}", name, e))
      }
    }
  }

  fn keys(&self, origin: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores WHERE origin = ? ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map(params![origin], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache store name: {}", e))?;

    Ok(names)
  }

  fn entries(&self, origin: &str, name: &str) -> Result<Vec<RequestKey>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT method, url FROM cache_entries WHERE origin = ? AND store = ? ORDER BY url",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![origin, name], |row| {
        Ok(RequestKey {
          method: row.get(0)?,
          url: row.get(1)?,
        })
      })
      .map_err(|e| eyre!("Failed to list entries of {}: {}", name, e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read cache entry: {}", e))?;

    Ok(keys)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use url::Url;

  const ORIGIN: &str = "http://localhost:5000";

  fn key(path: &str) -> RequestKey {
    RequestKey::get(&Url::parse(ORIGIN).unwrap().join(path).unwrap())
  }

  #[test]
  fn test_put_then_match() {
    let storage = SqliteStorage::in_memory().unwrap();
    let response = Response::new(200, "<h1>Home</h1>").with_header("Content-Type", "text/html");

    storage.put(ORIGIN, "v1", &key("/"), &response).unwrap();

    let cached = storage.match_request(ORIGIN, "v1", &key("/")).unwrap().unwrap();
    assert_eq!(cached.response, response);
    assert!(storage.match_request(ORIGIN, "v1", &key("/other")).unwrap().is_none());
    assert!(storage.match_request(ORIGIN, "v2", &key("/")).unwrap().is_none());
  }

  #[test]
  fn test_put_twice_overwrites() {
    let storage = SqliteStorage::in_memory().unwrap();

    storage.put(ORIGIN, "v1", &key("/a"), &Response::new(200, "one")).unwrap();
    storage.put(ORIGIN, "v1", &key("/a"), &Response::new(200, "two")).unwrap();

    assert_eq!(storage.entries(ORIGIN, "v1").unwrap().len(), 1);
    let cached = storage.match_request(ORIGIN, "v1", &key("/a")).unwrap().unwrap();
    assert_eq!(cached.response.text(), "two");
  }

  #[test]
  fn test_delete_removes_store_and_entries() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.open(ORIGIN, "v1").unwrap();
    storage.put(ORIGIN, "v2", &key("/"), &Response::new(200, "x")).unwrap();

    assert_eq!(storage.keys(ORIGIN).unwrap(), vec!["v1", "v2"]);

    assert!(storage.delete(ORIGIN, "v2").unwrap());
    assert!(!storage.delete(ORIGIN, "v2").unwrap());
    assert_eq!(storage.keys(ORIGIN).unwrap(), vec!["v1"]);
    assert!(storage.entries(ORIGIN, "v2").unwrap().is_empty());
  }

  #[test]
  fn test_open_is_idempotent() {
    let storage = SqliteStorage::in_memory().unwrap();
    storage.open(ORIGIN, "v1").unwrap();
    storage.open(ORIGIN, "v1").unwrap();
    assert_eq!(storage.keys(ORIGIN).unwrap(), vec!["v1"]);
  }

  #[test]
  fn test_origins_do_not_share_stores() {
    let storage = SqliteStorage::in_memory().unwrap();
    let other = "http://other.example";
    storage.put(ORIGIN, "v1", &key("/"), &Response::new(200, "mine")).unwrap();
    storage.open(other, "v1").unwrap();

    assert_eq!(storage.keys(other).unwrap(), vec!["v1"]);
    assert!(storage.match_request(other, "v1", &key("/")).unwrap().is_none());

    assert!(storage.delete(other, "v1").unwrap());
    assert!(storage.keys(other).unwrap().is_empty());
    assert_eq!(storage.keys(ORIGIN).unwrap(), vec!["v1"]);
    assert_eq!(storage.entries(ORIGIN, "v1").unwrap().len(), 1);
  }

  #[test]
  fn test_file_backed_storage_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let storage = SqliteStorage::open_at(&path).unwrap();
      storage
        .put(ORIGIN, "v1", &key("/offline"), &Response::new(200, "offline"))
        .unwrap();
    }

    let storage = SqliteStorage::open_at(&path).unwrap();
    let cached = storage.match_request(ORIGIN, "v1", &key("/offline")).unwrap().unwrap();
    assert_eq!(cached.response.text(), "offline");
  }
}
