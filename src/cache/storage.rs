//! Named cache store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use std::sync::Mutex;
use url::Url;

use super::key::RequestKey;
use crate::network::Response;

/// A response snapshot found in a named store.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// Name of the store holding the entry
  pub store: String,
  /// The stored response
  pub response: Response,
  /// When the entry was stored
  pub cached_at: DateTime<Utc>,
}

/// Trait for named cache store backends.
///
/// Every method must be safe to call from overlapping handler invocations;
/// implementations serialize mutations themselves.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the named store if it does not exist yet.
  fn open_store(&self, name: &str) -> Result<()>;

  /// Whether a store with this name exists.
  fn has_store(&self, name: &str) -> Result<bool>;

  /// All store names in creation order.
  fn store_names(&self) -> Result<Vec<String>>;

  /// Delete a store and all of its entries. Returns false if it did not exist.
  fn delete_store(&self, name: &str) -> Result<bool>;

  /// Store a single response, creating the store if needed.
  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()>;

  /// Store all responses in one transaction.
  fn put_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Replace the whole content of a store in one transaction.
  fn replace_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()>;

  /// Look up a request in one store.
  fn match_in(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Look up a request across all stores, oldest store first.
  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>>;

  /// Number of entries in a store (0 if it does not exist).
  fn entry_count(&self, store: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  fn write_entries(
    &self,
    store: &str,
    entries: &[(RequestKey, Response)],
    clear_first: bool,
  ) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    ensure_store(&tx, store)?;

    if clear_first {
      tx.execute("DELETE FROM cache_entries WHERE store = ?", params![store])
        .map_err(|e| eyre!("Failed to clear store {}: {}", store, e))?;
    }

    for (key, response) in entries {
      insert_entry(&tx, store, key, response)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named stores; rowid gives creation order
CREATE TABLE IF NOT EXISTS cache_stores (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Response snapshots keyed by request identity
CREATE TABLE IF NOT EXISTS cache_entries (
    store TEXT NOT NULL,
    request_hash TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    response_url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (store, request_hash),
    FOREIGN KEY (store) REFERENCES cache_stores(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_hash ON cache_entries(request_hash);
"#;

const ENTRY_COLUMNS: &str = "e.store, e.response_url, e.status, e.headers, e.body, e.cached_at";

fn ensure_store(conn: &Connection, store: &str) -> Result<()> {
  conn
    .execute(
      "INSERT OR IGNORE INTO cache_stores (name, created_at) VALUES (?, datetime('now'))",
      params![store],
    )
    .map_err(|e| eyre!("Failed to open store {}: {}", store, e))?;
  Ok(())
}

fn insert_entry(tx: &Transaction<'_>, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
  let headers = serde_json::to_string(&response.headers)
    .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

  tx.execute(
    "INSERT OR REPLACE INTO cache_entries
       (store, request_hash, method, url, response_url, status, headers, body, cached_at)
     VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
    params![
      store,
      key.cache_hash(),
      key.method(),
      key.url(),
      response.url.as_str(),
      response.status,
      headers,
      response.body,
    ],
  )
  .map_err(|e| eyre!("Failed to store {} in {}: {}", key.url(), store, e))?;

  Ok(())
}

/// Raw column values of an entry row.
struct EntryRow {
  store: String,
  response_url: String,
  status: u16,
  headers: String,
  body: Vec<u8>,
  cached_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<EntryRow> {
  Ok(EntryRow {
    store: row.get(0)?,
    response_url: row.get(1)?,
    status: row.get(2)?,
    headers: row.get(3)?,
    body: row.get(4)?,
    cached_at: row.get(5)?,
  })
}

impl EntryRow {
  fn into_entry(self) -> Result<CachedEntry> {
    let url = Url::parse(&self.response_url)
      .map_err(|e| eyre!("Stored URL '{}' is invalid: {}", self.response_url, e))?;
    let headers: Vec<(String, String)> = serde_json::from_str(&self.headers)
      .map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

    Ok(CachedEntry {
      store: self.store,
      response: Response {
        url,
        status: self.status,
        headers,
        body: self.body,
      },
      cached_at: parse_datetime(&self.cached_at)?,
    })
  }
}

impl CacheStorage for SqliteStorage {
  fn open_store(&self, name: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    ensure_store(&conn, name)
  }

  fn has_store(&self, name: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let found: Option<i64> = conn
      .query_row(
        "SELECT 1 FROM cache_stores WHERE name = ?",
        params![name],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up store {}: {}", name, e))?;

    Ok(found.is_some())
  }

  fn store_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT name FROM cache_stores ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list stores: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read store name: {}", e))?;

    Ok(names)
  }

  fn delete_store(&self, name: &str) -> Result<bool> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM cache_entries WHERE store = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM cache_stores WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete store {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, store: &str, key: &RequestKey, response: &Response) -> Result<()> {
    self.write_entries(store, &[(key.clone(), response.clone())], false)
  }

  fn put_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.write_entries(store, entries, false)
  }

  fn replace_all(&self, store: &str, entries: &[(RequestKey, Response)]) -> Result<()> {
    self.write_entries(store, entries, true)
  }

  fn match_in(&self, store: &str, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!(
      "SELECT {} FROM cache_entries e WHERE e.store = ? AND e.request_hash = ?",
      ENTRY_COLUMNS
    );

    let row = conn
      .query_row(&sql, params![store, key.cache_hash()], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key.url(), store, e))?;

    row.map(EntryRow::into_entry).transpose()
  }

  fn match_any(&self, key: &RequestKey) -> Result<Option<CachedEntry>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let sql = format!(
      "SELECT {} FROM cache_entries e
       INNER JOIN cache_stores s ON s.name = e.store
       WHERE e.request_hash = ?
       ORDER BY s.rowid
       LIMIT 1",
      ENTRY_COLUMNS
    );

    let row = conn
      .query_row(&sql, params![key.cache_hash()], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to look up {}: {}", key.url(), e))?;

    row.map(EntryRow::into_entry).transpose()
  }

  fn entry_count(&self, store: &str) -> Result<usize> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE store = ?",
        params![store],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count entries of {}: {}", store, e))?;

    Ok(count as usize)
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

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  fn response(u: &str, body: &str) -> Response {
    let mut response = Response::new(url(u), 200, body);
    response
      .headers
      .push(("content-type".to_string(), "text/plain".to_string()));
    response
  }

  #[test]
  fn test_put_then_match() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let key = RequestKey::get(&url("http://localhost/main.js"));

    storage
      .put("runtime", &key, &response("http://localhost/main.js", "js"))
      .unwrap();

    let entry = storage.match_in("runtime", &key).unwrap().unwrap();
    assert_eq!(entry.store, "runtime");
    assert_eq!(entry.response.body, b"js");
    assert_eq!(entry.response.header("Content-Type"), Some("text/plain"));
    assert!(storage.has_store("runtime").unwrap());
  }

  #[test]
  fn test_match_misses_other_store_and_method() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let target = url("http://localhost/api/spots");
    storage
      .put("runtime", &RequestKey::get(&target), &response(target.as_str(), "[]"))
      .unwrap();

    assert!(storage
      .match_in("precache", &RequestKey::get(&target))
      .unwrap()
      .is_none());
    assert!(storage
      .match_any(&RequestKey::new("POST", &target))
      .unwrap()
      .is_none());
  }

  #[test]
  fn test_match_any_prefers_oldest_store() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let key = RequestKey::get(&url("http://localhost/index.html"));

    storage.open_store("precache").unwrap();
    storage.open_store("runtime").unwrap();
    storage
      .put("runtime", &key, &response("http://localhost/index.html", "new"))
      .unwrap();
    storage
      .put("precache", &key, &response("http://localhost/index.html", "old"))
      .unwrap();

    let entry = storage.match_any(&key).unwrap().unwrap();
    assert_eq!(entry.store, "precache");
    assert_eq!(entry.response.body, b"old");
  }

  #[test]
  fn test_delete_store_removes_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let key = RequestKey::get(&url("http://localhost/a.png"));
    storage
      .put("old-v0", &key, &response("http://localhost/a.png", "png"))
      .unwrap();

    assert!(storage.delete_store("old-v0").unwrap());
    assert!(!storage.delete_store("old-v0").unwrap());
    assert!(storage.match_any(&key).unwrap().is_none());
    assert_eq!(storage.entry_count("old-v0").unwrap(), 0);
    assert!(storage.store_names().unwrap().is_empty());
  }

  #[test]
  fn test_replace_all_drops_previous_entries() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let a = RequestKey::get(&url("http://localhost/a"));
    let b = RequestKey::get(&url("http://localhost/b"));

    storage
      .put_all("precache", &[(a.clone(), response("http://localhost/a", "a"))])
      .unwrap();
    storage
      .replace_all("precache", &[(b.clone(), response("http://localhost/b", "b"))])
      .unwrap();

    assert!(storage.match_in("precache", &a).unwrap().is_none());
    assert!(storage.match_in("precache", &b).unwrap().is_some());
    assert_eq!(storage.entry_count("precache").unwrap(), 1);
  }

  #[test]
  fn test_store_names_in_creation_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_store("b").unwrap();
    storage.open_store("a").unwrap();
    storage.open_store("b").unwrap();

    assert_eq!(storage.store_names().unwrap(), vec!["b", "a"]);
  }

  #[test]
  fn test_entries_survive_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("nested").join("caches.db");
    let key = RequestKey::get(&url("http://localhost/"));

    {
      let storage = SqliteStorage::open(&path).unwrap();
      storage
        .put("smart-parking-v1", &key, &response("http://localhost/", "root"))
        .unwrap();
    }

    let storage = SqliteStorage::open(&path).unwrap();
    let entry = storage.match_any(&key).unwrap().unwrap();
    assert_eq!(entry.response.body, b"root");
  }

  #[test]
  fn test_parse_datetime() {
    let dt = parse_datetime("2024-05-01 12:30:00").unwrap();
    assert_eq!(dt.to_rfc3339(), "2024-05-01T12:30:00+00:00");
    assert!(parse_datetime("yesterday").is_err());
  }
}
