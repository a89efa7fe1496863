//! Typed backend requests.
//!
//! Every action the backend understands has exactly one variant here, so
//! adding an action forces every `match` (mutation classification, payload
//! building) to be revisited.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Flat argument map sent alongside the `action` discriminator.
pub type Payload = Map<String, Value>;

/// Physical condition recorded during an inventory check.
///
/// The wire values are the labels the spreadsheet columns expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Condition {
  #[default]
  Good,
  Fair,
  Broken,
  UnderRepair,
  Disposed,
}

impl Condition {
  pub const ALL: [Condition; 5] = [
    Condition::Good,
    Condition::Fair,
    Condition::Broken,
    Condition::UnderRepair,
    Condition::Disposed,
  ];

  pub fn wire_value(self) -> &'static str {
    match self {
      Condition::Good => "Tốt",
      Condition::Fair => "Trung bình",
      Condition::Broken => "Hỏng",
      Condition::UnderRepair => "Đang sửa chữa",
      Condition::Disposed => "Thanh lý",
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Condition::Good => "good",
      Condition::Fair => "fair",
      Condition::Broken => "broken",
      Condition::UnderRepair => "under-repair",
      Condition::Disposed => "disposed",
    }
  }
}

impl fmt::Display for Condition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for Condition {
  type Err = String;

  /// Accepts either the English label or the wire value.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let needle = s.trim();
    Condition::ALL
      .into_iter()
      .find(|c| c.label().eq_ignore_ascii_case(needle) || c.wire_value() == needle)
      .ok_or_else(|| {
        let labels: Vec<_> = Condition::ALL.iter().map(|c| c.label()).collect();
        format!("unknown condition '{}', expected one of {}", s, labels.join(", "))
      })
  }
}

/// Fields submitted when an asset is confirmed or re-checked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryUpdate {
  pub code: String,
  pub location: String,
  pub condition: Condition,
  pub serial: String,
  pub notes: String,
}

impl InventoryUpdate {
  pub fn new(code: impl Into<String>) -> Self {
    Self {
      code: code.into(),
      ..Self::default()
    }
  }
}

/// One backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
  GetStats,
  GetAsset { code: String },
  GetAllAssets,
  SearchAssets { query: String },
  UpdateInventory(InventoryUpdate),
  UpdateAssetInfo {
    code: String,
    fields: BTreeMap<String, String>,
  },
  ResetInventory { period: String },
  GetQrData,
  GenerateQrCodes,
  ExportReport,
  InitializeSheets,
}

impl Request {
  /// The backend's `action` discriminator.
  pub fn action(&self) -> &'static str {
    match self {
      Request::GetStats => "getStats",
      Request::GetAsset { .. } => "getAsset",
      Request::GetAllAssets => "getAllAssets",
      Request::SearchAssets { .. } => "searchAssets",
      Request::UpdateInventory(_) => "updateInventory",
      Request::UpdateAssetInfo { .. } => "updateAssetInfo",
      Request::ResetInventory { .. } => "resetInventory",
      Request::GetQrData => "getQRData",
      Request::GenerateQrCodes => "generateQRCodes",
      Request::ExportReport => "exportReport",
      Request::InitializeSheets => "initializeSheets",
    }
  }

  /// Mutations are deferred to the offline queue when the backend is
  /// unreachable; reads are not.
  pub fn is_mutation(&self) -> bool {
    match self {
      Request::UpdateInventory(_) | Request::UpdateAssetInfo { .. } | Request::ResetInventory { .. } => {
        true
      }
      Request::GetStats
      | Request::GetAsset { .. }
      | Request::GetAllAssets
      | Request::SearchAssets { .. }
      | Request::GetQrData
      | Request::GenerateQrCodes
      | Request::ExportReport
      | Request::InitializeSheets => false,
    }
  }

  /// The asset a mutation applies to, used to coalesce queued writes.
  pub fn target(&self) -> Option<&str> {
    match self {
      Request::UpdateInventory(update) => Some(&update.code),
      Request::UpdateAssetInfo { code, .. } => Some(code),
      _ => None,
    }
  }

  /// Arguments of the call, without the `action` key or identity fields.
  pub fn payload(&self) -> Payload {
    let mut payload = Payload::new();
    match self {
      Request::GetAsset { code } => {
        payload.insert("code".into(), code.clone().into());
      }
      Request::SearchAssets { query } => {
        payload.insert("query".into(), query.clone().into());
      }
      Request::UpdateInventory(update) => {
        payload.insert("code".into(), update.code.clone().into());
        payload.insert("location".into(), update.location.clone().into());
        payload.insert("status".into(), update.condition.wire_value().into());
        payload.insert("serial".into(), update.serial.clone().into());
        payload.insert("notes".into(), update.notes.clone().into());
      }
      Request::UpdateAssetInfo { code, fields } => {
        for (key, value) in fields {
          payload.insert(key.clone(), value.clone().into());
        }
        payload.insert("code".into(), code.clone().into());
      }
      Request::ResetInventory { period } => {
        payload.insert("period".into(), period.clone().into());
      }
      Request::GetStats
      | Request::GetAllAssets
      | Request::GetQrData
      | Request::GenerateQrCodes
      | Request::ExportReport
      | Request::InitializeSheets => {}
    }
    payload
  }
}

/// Render a payload value for a query string. Nested values are sent as JSON.
pub fn query_value(value: &Value) -> String {
  match value {
    Value::Null => String::new(),
    Value::String(s) => s.clone(),
    Value::Bool(b) => b.to_string(),
    Value::Number(n) => n.to_string(),
    other => other.to_string(),
  }
}
