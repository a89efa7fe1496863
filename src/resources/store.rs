//! Persistent storage for captured HTTP responses.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::db::{parse_datetime, Database};

/// A byte-for-byte captured response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl CachedResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// A stored response along with when it was captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  pub response: CachedResponse,
  pub stored_at: DateTime<Utc>,
}

/// Stable, fixed-length key for a request URL.
pub fn url_hash(url: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  hex::encode(hasher.finalize())
}

/// Named cache partitions backed by the `resource_cache` table.
///
/// Entries are ordered by insertion; storing a URL again counts as a new
/// insertion.
#[derive(Clone)]
pub struct ResourceStore {
  db: Arc<Database>,
}

impl ResourceStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Store one response in `cache_name`, replacing any entry for its URL.
  pub fn put(&self, cache_name: &str, response: &CachedResponse) -> Result<()> {
    self.put_all(cache_name, std::slice::from_ref(response))
  }

  /// Store several responses in one transaction: all or nothing.
  pub fn put_all(&self, cache_name: &str, responses: &[CachedResponse]) -> Result<()> {
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    let now = Utc::now().to_rfc3339();

    for response in responses {
      let hash = url_hash(&response.url);
      tx.execute(
        "DELETE FROM resource_cache WHERE cache_name = ? AND url_hash = ?",
        params![cache_name, hash],
      )
      .map_err(|e| eyre!("Failed to replace cached {}: {}", response.url, e))?;
      tx.execute(
        "INSERT INTO resource_cache (cache_name, url_hash, url, status, content_type, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          cache_name,
          hash,
          response.url,
          response.status,
          response.content_type,
          response.body,
          now
        ],
      )
      .map_err(|e| eyre!("Failed to cache {}: {}", response.url, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit cached responses: {}", e))?;
    Ok(())
  }

  /// Look up `url` in one partition.
  pub fn get(&self, cache_name: &str, url: &str) -> Result<Option<StoredResponse>> {
    let conn = self.db.conn()?;
    let row: Option<(String, u16, Option<String>, Vec<u8>, String)> = conn
      .query_row(
        "SELECT url, status, content_type, body, stored_at FROM resource_cache
         WHERE cache_name = ? AND url_hash = ?",
        params![cache_name, url_hash(url)],
        |row| {
          Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cached {}: {}", url, e))?;

    match row {
      Some((url, status, content_type, body, stored_at)) => Ok(Some(StoredResponse {
        response: CachedResponse {
          url,
          status,
          content_type,
          body,
        },
        stored_at: parse_datetime(&stored_at)?,
      })),
      None => Ok(None),
    }
  }

  /// Look up `url` in any of `cache_names`, in order.
  pub fn get_any(&self, cache_names: &[String], url: &str) -> Result<Option<StoredResponse>> {
    for name in cache_names {
      if let Some(found) = self.get(name, url)? {
        return Ok(Some(found));
      }
    }
    Ok(None)
  }

  /// URLs in a partition, oldest insertion first.
  pub fn keys(&self, cache_name: &str) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT url FROM resource_cache WHERE cache_name = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare key query: {}", e))?;
    let keys = stmt
      .query_map(params![cache_name], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache keys: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache key: {}", e))?;
    Ok(keys)
  }

  pub fn len(&self, cache_name: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM resource_cache WHERE cache_name = ?",
        params![cache_name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }

  /// Evict the earliest-inserted entries until at most `max_entries` remain.
  /// Returns how many were evicted.
  pub fn trim(&self, cache_name: &str, max_entries: usize) -> Result<usize> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "DELETE FROM resource_cache WHERE seq IN (
           SELECT seq FROM resource_cache WHERE cache_name = ?1
           ORDER BY seq
           LIMIT MAX((SELECT COUNT(*) FROM resource_cache WHERE cache_name = ?1) - ?2, 0)
         )",
        params![cache_name, max_entries as i64],
      )
      .map_err(|e| eyre!("Failed to trim cache {}: {}", cache_name, e))
  }

  /// Names of every partition that holds at least one entry.
  pub fn cache_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT DISTINCT cache_name FROM resource_cache ORDER BY cache_name")
      .map_err(|e| eyre!("Failed to prepare cache name query: {}", e))?;
    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;
    Ok(names)
  }

  /// Delete a whole partition. Returns how many entries it held.
  pub fn delete_cache(&self, cache_name: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "DELETE FROM resource_cache WHERE cache_name = ?",
        params![cache_name],
      )
      .map_err(|e| eyre!("Failed to delete cache {}: {}", cache_name, e))
  }
}
