//! Typed inventory client that wraps the gateway with snapshot fallback.

use serde_json::Value;
use std::collections::BTreeMap;

use crate::cache::{CacheLayer, CacheResult};

use super::cache::InventoryQueryKey;
use super::client::Gateway;
use super::error::GatewayError;
use super::request::{InventoryUpdate, Request};
use super::response::{field, Asset, AssetLookup, QrEntry, Stats};

/// Result of a write through the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
  /// The backend accepted the write; carries its response body.
  Applied(Value),
  /// The backend was unreachable; the write waits in the offline queue.
  Queued { pending_id: i64 },
}

/// Inventory client with transparent snapshot caching.
///
/// Reads go through [`CacheLayer`], so a successful answer is kept and an
/// unreachable backend is answered from the last snapshot. Writes go straight
/// to the gateway, which may defer them to the offline queue.
#[derive(Clone)]
pub struct InventoryClient {
  gateway: Gateway,
  cache: CacheLayer,
}

impl InventoryClient {
  pub fn new(gateway: Gateway, cache: CacheLayer) -> Self {
    Self { gateway, cache }
  }

  pub fn gateway(&self) -> &Gateway {
    &self.gateway
  }

  pub fn cache(&self) -> &CacheLayer {
    &self.cache
  }

  /// Aggregate statistics for the current period.
  pub async fn stats(&self) -> Result<CacheResult<Stats>, GatewayError> {
    self
      .cache
      .fetch(&InventoryQueryKey::Stats, || self.fetch_stats())
      .await
  }

  /// Look up one asset and whether it was already checked.
  pub async fn asset(&self, code: &str) -> Result<CacheResult<AssetLookup>, GatewayError> {
    let key = InventoryQueryKey::Asset {
      code: code.to_string(),
    };
    self
      .cache
      .fetch(&key, || async {
        let response = self
          .gateway
          .call(&Request::GetAsset {
            code: code.to_string(),
          })
          .await?;
        serde_json::from_value::<AssetLookup>(response.body)
          .map_err(|e| GatewayError::Protocol(format!("asset {}: {}", code, e)))
      })
      .await
  }

  /// Every asset in the sheet.
  pub async fn all_assets(&self) -> Result<CacheResult<Vec<Asset>>, GatewayError> {
    self
      .cache
      .fetch(&InventoryQueryKey::AllAssets, || self.fetch_all_assets())
      .await
  }

  /// Free-text search; an empty query lists everything.
  pub async fn search(&self, query: &str) -> Result<CacheResult<Vec<Asset>>, GatewayError> {
    let key = InventoryQueryKey::Search {
      query: query.to_string(),
    };
    self
      .cache
      .fetch(&key, || async {
        let response = self
          .gateway
          .call(&Request::SearchAssets {
            query: query.trim().to_string(),
          })
          .await?;
        field(&response.body, "results")
      })
      .await
  }

  pub async fn update_inventory(
    &self,
    update: InventoryUpdate,
  ) -> Result<MutationOutcome, GatewayError> {
    self.mutate(Request::UpdateInventory(update)).await
  }

  pub async fn update_asset_info(
    &self,
    code: &str,
    fields: BTreeMap<String, String>,
  ) -> Result<MutationOutcome, GatewayError> {
    self
      .mutate(Request::UpdateAssetInfo {
        code: code.to_string(),
        fields,
      })
      .await
  }

  /// Start a new inventory period. The backend answers with a backup name.
  pub async fn reset_inventory(&self, period: &str) -> Result<MutationOutcome, GatewayError> {
    self
      .mutate(Request::ResetInventory {
        period: period.to_string(),
      })
      .await
  }

  /// QR label data for every asset, as already stored by the backend.
  pub async fn qr_data(&self) -> Result<Vec<QrEntry>, GatewayError> {
    let response = self.gateway.call(&Request::GetQrData).await?;
    field(&response.body, "qrData")
  }

  /// Ask the backend to (re)generate QR label data for every asset.
  pub async fn generate_qr_codes(&self) -> Result<Vec<QrEntry>, GatewayError> {
    let response = self.gateway.call(&Request::GenerateQrCodes).await?;
    field(&response.body, "qrData")
  }

  /// Server-side report export; returns the raw backend answer.
  pub async fn export_report(&self) -> Result<Value, GatewayError> {
    Ok(self.gateway.call(&Request::ExportReport).await?.body)
  }

  /// Create the backend's sheets if they do not exist yet.
  pub async fn initialize_sheets(&self) -> Result<Value, GatewayError> {
    Ok(self.gateway.call(&Request::InitializeSheets).await?.body)
  }

  /// Re-read the primary snapshots from the network.
  ///
  /// Unlike the read methods this never falls back to the cache: it fails
  /// unless both snapshots were actually refreshed.
  pub async fn refresh_primary_snapshots(&self) -> Result<(), GatewayError> {
    let stats = self.fetch_stats().await?;
    self.cache.put(&InventoryQueryKey::Stats, &stats)?;

    let assets = self.fetch_all_assets().await?;
    self.cache.put(&InventoryQueryKey::AllAssets, &assets)?;
    Ok(())
  }

  async fn fetch_stats(&self) -> Result<Stats, GatewayError> {
    let response = self.gateway.call(&Request::GetStats).await?;
    field(&response.body, "stats")
  }

  async fn fetch_all_assets(&self) -> Result<Vec<Asset>, GatewayError> {
    let response = self.gateway.call(&Request::GetAllAssets).await?;
    if response.body.get("assets").is_some() {
      field(&response.body, "assets")
    } else {
      field(&response.body, "results")
    }
  }

  async fn mutate(&self, request: Request) -> Result<MutationOutcome, GatewayError> {
    let response = self.gateway.call(&request).await?;
    Ok(match response.pending_id {
      Some(pending_id) => MutationOutcome::Queued { pending_id },
      None => MutationOutcome::Applied(response.body),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheSource, SqliteStorage};
  use crate::db::Database;
  use crate::queue::OfflineQueue;
  use crate::settings::{Settings, SettingsStore};
  use httpmock::prelude::*;
  use serde_json::json;
  use std::sync::Arc;
  use std::time::Duration;

  fn client(endpoint: &str) -> (InventoryClient, SettingsStore) {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let settings = SettingsStore::new(
      db.clone(),
      Settings {
        endpoint: Some(endpoint.to_string()),
        ..Settings::default()
      },
    );
    let gateway = Gateway::new(
      settings.clone(),
      OfflineQueue::new(db.clone()),
      Duration::from_secs(5),
    )
    .unwrap();
    let cache = CacheLayer::new(SqliteStorage::new(db));
    (InventoryClient::new(gateway, cache), settings)
  }

  #[tokio::test]
  async fn test_stats_fall_back_to_last_snapshot() {
    let server = MockServer::start_async().await;
    let mut mock = server
      .mock_async(|when, then| {
        when.method(POST).path("/exec");
        then.status(200).json_body(json!({
          "success": true,
          "stats": {"period": "P1", "totalAssets": 10, "inventoried": 4, "pending": 6, "percentage": 40}
        }));
      })
      .await;

    let (client, settings) = client(&server.url("/exec"));
    let fresh = client.stats().await.unwrap();
    assert_eq!(fresh.source, CacheSource::Network);
    assert_eq!(fresh.data.inventoried, 4.0);

    mock.delete_async().await;
    settings
      .update(|s| s.endpoint = Some("http://127.0.0.1:9/exec".into()))
      .unwrap();

    let cached = client.stats().await.unwrap();
    assert_eq!(cached.source, CacheSource::Offline);
    assert_eq!(cached.data, fresh.data);
  }

  #[tokio::test]
  async fn test_asset_lookup_decodes_status() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when
          .method(POST)
          .path("/exec")
          .json_body_partial(r#"{"action":"getAsset","code":"A1"}"#);
        then.status(200).json_body(json!({
          "success": true,
          "asset": {"Mã tài sản": "A1", "Tên tài sản": "Máy in"},
          "inventoryStatus": {"checked": true, "date": "01/02/2024", "user": "An"}
        }));
      })
      .await;

    let (client, _) = client(&server.url("/exec"));
    let lookup = client.asset("A1").await.unwrap().data;

    assert_eq!(lookup.asset.code().as_deref(), Some("A1"));
    assert!(lookup.inventory_status.checked);
    assert_eq!(lookup.inventory_status.user.as_deref(), Some("An"));
  }

  #[tokio::test]
  async fn test_offline_update_is_reported_as_queued() {
    let (client, _) = client("http://127.0.0.1:9/exec");
    let outcome = client
      .update_inventory(InventoryUpdate::new("A1"))
      .await
      .unwrap();

    assert!(matches!(outcome, MutationOutcome::Queued { .. }));
    assert_eq!(client.gateway().queue().len().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_refresh_does_not_use_snapshots() {
    let (client, _) = client("http://127.0.0.1:9/exec");
    client
      .cache()
      .put(&InventoryQueryKey::Stats, &Stats::default())
      .unwrap();

    let err = client.refresh_primary_snapshots().await.unwrap_err();
    assert!(err.is_connectivity());
  }
}
