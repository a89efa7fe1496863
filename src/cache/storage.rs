//! Snapshot storage trait and SQLite implementation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use std::sync::Arc;

use super::traits::CachedSnapshot;
use crate::db::{parse_datetime, Database};

/// Trait for snapshot storage backends.
pub trait SnapshotStorage: Send + Sync {
  /// Store `value` under `key`, replacing any previous snapshot.
  fn put(&self, key: &str, value: &Value) -> Result<()>;

  /// Get the snapshot stored under `key`.
  fn get(&self, key: &str) -> Result<Option<CachedSnapshot>>;

  /// Drop every snapshot.
  fn clear(&self) -> Result<()>;
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl SnapshotStorage for NoopStorage {
  fn put(&self, _key: &str, _value: &Value) -> Result<()> {
    Ok(()) // Discard
  }

  fn get(&self, _key: &str) -> Result<Option<CachedSnapshot>> {
    Ok(None) // Always miss
  }

  fn clear(&self) -> Result<()> {
    Ok(())
  }
}

/// SQLite-based snapshot storage.
pub struct SqliteStorage {
  db: Arc<Database>,
}

impl SqliteStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl SnapshotStorage for SqliteStorage {
  fn put(&self, key: &str, value: &Value) -> Result<()> {
    let data =
      serde_json::to_string(value).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;
    let conn = self.db.conn()?;

    conn
      .execute(
        "INSERT OR REPLACE INTO snapshots (key, value, stored_at) VALUES (?, ?, ?)",
        params![key, data, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store snapshot '{}': {}", key, e))?;

    Ok(())
  }

  fn get(&self, key: &str) -> Result<Option<CachedSnapshot>> {
    let conn = self.db.conn()?;

    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT value, stored_at FROM snapshots WHERE key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read snapshot '{}': {}", key, e))?;

    match row {
      Some((data, stored_at)) => {
        let value = serde_json::from_str(&data)
          .map_err(|e| eyre!("Failed to deserialize snapshot '{}': {}", key, e))?;
        Ok(Some(CachedSnapshot {
          key: key.to_string(),
          value,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn clear(&self) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM snapshots", [])
      .map_err(|e| eyre!("Failed to clear snapshots: {}", e))?;
    Ok(())
  }
}
