//! SQLite implementation of the bucket store and the sync queue.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::traits::{BucketStore, StoredEntry};
use crate::sync::{SyncItem, SyncKind, SyncStore};

/// SQLite-backed store shared by every in-flight request task.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;
    Ok(store)
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS buckets (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per stored response; replaced wholesale, never patched
CREATE TABLE IF NOT EXISTS entries (
    bucket TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (bucket, request_key)
);

CREATE TABLE IF NOT EXISTS sync_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    payload TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    dead INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_kind ON sync_queue(kind, dead);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

impl BucketStore for SqliteStore {
  fn open_bucket(&self, bucket: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
        params![bucket],
      )
      .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;
    Ok(())
  }

  fn bucket_names(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM buckets ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list buckets: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read bucket name: {}", e))?;

    Ok(names)
  }

  fn delete_bucket(&self, bucket: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE bucket = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", bucket, e))?;
    let removed = tx
      .execute("DELETE FROM buckets WHERE name = ?", params![bucket])
      .map_err(|e| eyre!("Failed to delete bucket {}: {}", bucket, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn put(&self, bucket: &str, entry: &StoredEntry) -> Result<()> {
    let headers = serde_json::to_string(&entry.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO buckets (name) VALUES (?)",
      params![bucket],
    )
    .map_err(|e| eyre!("Failed to open bucket {}: {}", bucket, e))?;

    tx.execute(
      "DELETE FROM entries WHERE bucket = ? AND request_key = ?",
      params![bucket, entry.key],
    )
    .map_err(|e| eyre!("Failed to replace entry: {}", e))?;

    tx.execute(
      "INSERT INTO entries (bucket, request_key, status, headers, body, stored_at)
       VALUES (?, ?, ?, ?, ?, ?)",
      params![
        bucket,
        entry.key,
        entry.status,
        headers,
        entry.body,
        entry.stored_at.to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store entry: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn match_entry(&self, bucket: &str, key: &str) -> Result<Option<StoredEntry>> {
    let conn = self.conn()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE bucket = ? AND request_key = ?",
        params![bucket, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to query entry: {}", e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Corrupt headers for {}: {}", key, e))?;
        let stored_at = DateTime::parse_from_rfc3339(&stored_at)
          .map_err(|e| eyre!("Corrupt timestamp for {}: {}", key, e))?
          .with_timezone(&Utc);

        Ok(Some(StoredEntry {
          key: key.to_string(),
          status,
          headers,
          body,
          stored_at,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
    let removed = self
      .conn()?
      .execute(
        "DELETE FROM entries WHERE bucket = ? AND request_key = ?",
        params![bucket, key],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;
    Ok(removed > 0)
  }

  fn keys(&self, bucket: &str) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT request_key FROM entries WHERE bucket = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let keys = stmt
      .query_map(params![bucket], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys of {}: {}", bucket, e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read key: {}", e))?;

    Ok(keys)
  }

  fn get_meta(&self, key: &str) -> Result<Option<String>> {
    self
      .conn()?
      .query_row("SELECT value FROM meta WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read meta {}: {}", key, e))
  }

  fn set_meta(&self, key: &str, value: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write meta {}: {}", key, e))?;
    Ok(())
  }
}

impl SyncStore for SqliteStore {
  fn enqueue(&self, kind: SyncKind, payload: &Value) -> Result<i64> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT INTO sync_queue (kind, payload) VALUES (?, ?)",
        params![kind.as_str(), payload.to_string()],
      )
      .map_err(|e| eyre!("Failed to enqueue sync item: {}", e))?;
    Ok(conn.last_insert_rowid())
  }

  fn pending(&self, kind: Option<SyncKind>) -> Result<Vec<SyncItem>> {
    self.select_items(false, kind)
  }

  fn complete(&self, id: i64) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM sync_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove sync item {}: {}", id, e))?;
    Ok(())
  }

  fn record_failure(&self, id: i64, error: &str, dead_letter: bool) -> Result<()> {
    self
      .conn()?
      .execute(
        "UPDATE sync_queue SET attempts = attempts + 1, last_error = ?, dead = ? WHERE id = ?",
        params![error, dead_letter, id],
      )
      .map_err(|e| eyre!("Failed to record failure for sync item {}: {}", id, e))?;
    Ok(())
  }

  fn dead_letters(&self) -> Result<Vec<SyncItem>> {
    self.select_items(true, None)
  }

  fn clear(&self, kind: Option<SyncKind>) -> Result<usize> {
    let conn = self.conn()?;
    let removed = match kind {
      Some(kind) => conn.execute("DELETE FROM sync_queue WHERE kind = ?", params![kind.as_str()]),
      None => conn.execute("DELETE FROM sync_queue", []),
    }
    .map_err(|e| eyre!("Failed to clear sync queue: {}", e))?;
    Ok(removed)
  }
}

impl SqliteStore {
  fn select_items(&self, dead: bool, kind: Option<SyncKind>) -> Result<Vec<SyncItem>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, kind, payload, attempts, last_error, created_at FROM sync_queue
         WHERE dead = ?1 AND (?2 IS NULL OR kind = ?2)
         ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![dead, kind.map(|k| k.as_str())], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, u32>(3)?,
          row.get::<_, Option<String>>(4)?,
          row.get::<_, String>(5)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query sync queue: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read sync item: {}", e))?;

    let mut items = Vec::with_capacity(rows.len());
    for (id, kind, payload, attempts, last_error, created_at) in rows {
      let kind = SyncKind::parse(&kind).ok_or_else(|| eyre!("Unknown sync kind {}", kind))?;
      let payload = serde_json::from_str(&payload)
        .map_err(|e| eyre!("Corrupt payload for sync item {}: {}", id, e))?;
      items.push(SyncItem {
        id,
        kind,
        payload,
        attempts,
        last_error,
        created_at: parse_datetime(&created_at)?,
      });
    }

    Ok(items)
  }
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
