//! Core traits and types for the snapshot cache.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A logical query whose last good answer is worth keeping.
pub trait CacheKey {
  /// Stable storage key for this query
  fn cache_key(&self) -> String;

  /// Human-readable description, used in logs and errors
  fn description(&self) -> String;
}

/// Last known good value for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSnapshot {
  pub key: String,
  pub value: Value,
  pub stored_at: DateTime<Utc>,
}

/// A read answer together with where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The decoded answer
  pub data: T,
  pub source: CacheSource,
  /// When the snapshot was written; `None` for live answers
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// A live answer from the backend.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// A snapshot served because the backend was unreachable.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  pub fn is_offline(&self) -> bool {
    self.source == CacheSource::Offline
  }
}

/// Origin of a [`CacheResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  Network,
  /// Last snapshot, backend unreachable
  Offline,
}
