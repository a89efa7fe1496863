//! Serde-deserializable types matching backend responses.
//!
//! The backend is a spreadsheet, so asset records are free-form rows keyed
//! by column header. Only the envelope and the statistics object have a fixed
//! shape.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::error::GatewayError;

/// Column headers used by the asset sheet.
mod columns {
  pub const CODE: &[&str] = &["Mã tài sản", "Code"];
  pub const NAME: &[&str] = &["Tên tài sản Tiếng Việt", "Tên tài sản"];
  pub const LOCATION: &[&str] = &["Vị trí"];
  pub const GROUP: &[&str] = &["Nhóm"];
  pub const SERIAL: &[&str] = &["Serial"];
  pub const CONDITION: &[&str] = &["Tình trạng"];
}

#[derive(Debug, Deserialize)]
struct Envelope {
  #[serde(default)]
  success: bool,
  #[serde(default)]
  error: Option<String>,
  #[serde(default)]
  duplicate: bool,
}

/// Turn a `success: false` envelope into the matching error.
pub fn check_envelope(body: &Value) -> Result<(), GatewayError> {
  let envelope: Envelope = serde_json::from_value(body.clone())
    .map_err(|e| GatewayError::Protocol(format!("malformed envelope: {}", e)))?;

  if envelope.success {
    return Ok(());
  }

  let message = envelope
    .error
    .unwrap_or_else(|| "backend reported failure without a message".to_string());

  if envelope.duplicate {
    Err(GatewayError::Duplicate(message))
  } else {
    Err(GatewayError::Backend(message))
  }
}

/// Decode one named field of a successful response body.
pub fn field<T: DeserializeOwned>(body: &Value, name: &str) -> Result<T, GatewayError> {
  let value = body.get(name).cloned().unwrap_or(Value::Null);
  serde_json::from_value(value)
    .map_err(|e| GatewayError::Protocol(format!("field '{}': {}", name, e)))
}

/// Aggregate inventory progress for the current period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
  #[serde(default)]
  pub period: String,
  #[serde(default, deserialize_with = "number_or_string")]
  pub total_assets: f64,
  #[serde(default, deserialize_with = "number_or_string")]
  pub inventoried: f64,
  #[serde(default, deserialize_with = "number_or_string")]
  pub pending: f64,
  #[serde(default, deserialize_with = "number_or_string")]
  pub percentage: f64,
  #[serde(default)]
  pub by_user: BTreeMap<String, u64>,
  #[serde(default)]
  pub by_location: BTreeMap<String, u64>,
}

/// Spreadsheet cells arrive as numbers or as their string rendering.
fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Number(n) => n
      .as_f64()
      .ok_or_else(|| serde::de::Error::custom("number out of range")),
    Value::String(s) if s.trim().is_empty() => Ok(0.0),
    Value::String(s) => s
      .trim()
      .trim_end_matches('%')
      .parse()
      .map_err(serde::de::Error::custom),
    Value::Null => Ok(0.0),
    other => Err(serde::de::Error::custom(format!(
      "expected number, got {}",
      other
    ))),
  }
}

/// One row of the asset sheet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Asset(pub BTreeMap<String, Value>);

impl Asset {
  fn column(&self, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match self.0.get(*name) {
      Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
      Some(Value::Number(n)) => Some(n.to_string()),
      _ => None,
    })
  }

  pub fn code(&self) -> Option<String> {
    self.column(columns::CODE)
  }

  pub fn name(&self) -> Option<String> {
    self.column(columns::NAME)
  }

  pub fn location(&self) -> Option<String> {
    self.column(columns::LOCATION)
  }

  pub fn group(&self) -> Option<String> {
    self.column(columns::GROUP)
  }

  pub fn serial(&self) -> Option<String> {
    self.column(columns::SERIAL)
  }

  pub fn condition(&self) -> Option<String> {
    self.column(columns::CONDITION)
  }
}

/// Whether an asset has been checked in the current period.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryStatus {
  #[serde(default)]
  pub checked: bool,
  #[serde(default)]
  pub date: Option<String>,
  #[serde(default)]
  pub time: Option<String>,
  #[serde(default)]
  pub user: Option<String>,
}

/// Result of looking up a single asset code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetLookup {
  pub asset: Asset,
  #[serde(default)]
  pub inventory_status: InventoryStatus,
}

/// Label data for one printable QR code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QrEntry {
  #[serde(alias = "Code")]
  pub code: String,
  #[serde(default, alias = "Name")]
  pub name: String,
  #[serde(default, alias = "data", alias = "url")]
  pub content: String,
}
