//! Cache layer that pairs network reads with their last good snapshot.

use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::storage::SnapshotStorage;
use super::traits::{CacheKey, CacheResult, CachedSnapshot};
use crate::gateway::GatewayError;

/// Cache layer that manages snapshot fallback around network fetching.
///
/// Reads always go to the network first. A successful answer overwrites the
/// snapshot for its key; a connectivity failure is answered from the
/// snapshot, unmodified. Any other failure is returned as is.
#[derive(Clone)]
pub struct CacheLayer {
  storage: Arc<dyn SnapshotStorage>,
}

impl CacheLayer {
  /// Create a new cache layer with the given storage backend.
  pub fn new(storage: impl SnapshotStorage + 'static) -> Self {
    Self {
      storage: Arc::new(storage),
    }
  }

  /// Store a value directly, outside of a fetch.
  pub fn put<T: Serialize>(&self, key: &impl CacheKey, data: &T) -> Result<(), GatewayError> {
    let value = serde_json::to_value(data).map_err(GatewayError::storage)?;
    self
      .storage
      .put(&key.cache_key(), &value)
      .map_err(GatewayError::storage)
  }

  /// Read the snapshot for `key` without touching the network.
  pub fn get(&self, key: &impl CacheKey) -> Result<Option<CachedSnapshot>, GatewayError> {
    self
      .storage
      .get(&key.cache_key())
      .map_err(GatewayError::storage)
  }

  pub fn clear(&self) -> Result<(), GatewayError> {
    self.storage.clear().map_err(GatewayError::storage)
  }

  /// Fetch with network-first strategy.
  ///
  /// 1. Fetch from network; on success store the snapshot and return it
  /// 2. On a connectivity failure, return the stored snapshot (offline mode)
  /// 3. With no snapshot, fail with `CacheMiss`
  pub async fn fetch<T, F, Fut>(
    &self,
    key: &impl CacheKey,
    fetcher: F,
  ) -> Result<CacheResult<T>, GatewayError>
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
  {
    match fetcher().await {
      Ok(data) => {
        // A failed snapshot write must not fail a successful read
        if let Err(e) = self.put(key, &data) {
          warn!(key = %key.description(), error = %e, "failed to store snapshot");
        }
        Ok(CacheResult::from_network(data))
      }
      Err(err) if err.is_connectivity() => {
        let snapshot = self.get(key)?.ok_or_else(|| GatewayError::CacheMiss {
          key: key.description(),
          cause: err.to_string(),
        })?;

        debug!(key = %key.description(), stored_at = %snapshot.stored_at, "serving snapshot");
        let data = serde_json::from_value(snapshot.value).map_err(GatewayError::storage)?;
        Ok(CacheResult::offline(data, snapshot.stored_at))
      }
      Err(err) => Err(err),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::db::Database;
  use serde_json::{json, Value};

  struct Key(&'static str);

  impl CacheKey for Key {
    fn cache_key(&self) -> String {
      self.0.to_string()
    }

    fn description(&self) -> String {
      self.0.to_string()
    }
  }

  fn layer() -> CacheLayer {
    CacheLayer::new(SqliteStorage::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )))
  }

  #[tokio::test]
  async fn test_success_overwrites_snapshot() {
    let layer = layer();
    let result = layer
      .fetch(&Key("stats"), || async { Ok(json!({"totalAssets": 5})) })
      .await
      .unwrap();

    assert_eq!(result.source, CacheSource::Network);
    assert_eq!(
      layer.get(&Key("stats")).unwrap().unwrap().value,
      json!({"totalAssets": 5})
    );
  }

  #[tokio::test]
  async fn test_connectivity_failure_serves_snapshot_unmodified() {
    let layer = layer();
    let stored = json!({"totalAssets": 7, "byUser": {"An": 2}});
    layer.put(&Key("stats"), &stored).unwrap();

    let result = layer
      .fetch(&Key("stats"), || async {
        Err::<Value, _>(GatewayError::Transport("offline".into()))
      })
      .await
      .unwrap();

    assert!(result.is_offline());
    assert!(result.cached_at.is_some());
    assert_eq!(result.data, stored);
  }

  #[tokio::test]
  async fn test_connectivity_failure_without_snapshot_is_cache_miss() {
    let layer = layer();
    let err = layer
      .fetch(&Key("stats"), || async {
        Err::<Value, _>(GatewayError::Transport("offline".into()))
      })
      .await
      .unwrap_err();

    assert!(matches!(err, GatewayError::CacheMiss { .. }));
  }

  #[tokio::test]
  async fn test_backend_error_does_not_fall_back() {
    let layer = layer();
    layer.put(&Key("stats"), &json!(1)).unwrap();

    let err = layer
      .fetch(&Key("stats"), || async {
        Err::<Value, _>(GatewayError::Backend("Sheet missing".into()))
      })
      .await
      .unwrap_err();

    assert_eq!(err, GatewayError::Backend("Sheet missing".into()));
  }
}
