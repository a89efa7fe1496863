//! Persisted user profile and backend endpoint.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::Database;

const SETTINGS_KEY: &str = "settings";

/// Identity of the person doing the inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub department: String,
  /// Default location filled into inventory checks.
  #[serde(default)]
  pub location: String,
}

impl UserProfile {
  /// Name recorded against inventory checks.
  pub fn display_name(&self) -> &str {
    if self.name.trim().is_empty() {
      "Anonymous"
    } else {
      self.name.trim()
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
  #[serde(default)]
  pub endpoint: Option<String>,
  #[serde(default)]
  pub profile: UserProfile,
}

impl Settings {
  /// The configured endpoint, ignoring blank values.
  pub fn endpoint(&self) -> Option<&str> {
    self
      .endpoint
      .as_deref()
      .map(str::trim)
      .filter(|e| !e.is_empty())
  }
}

/// Reads and writes the single current [`Settings`] value.
///
/// Values saved through [`SettingsStore::save`] take precedence over the
/// defaults supplied from the configuration file.
#[derive(Clone)]
pub struct SettingsStore {
  db: Arc<Database>,
  defaults: Settings,
}

impl SettingsStore {
  pub fn new(db: Arc<Database>, defaults: Settings) -> Self {
    Self { db, defaults }
  }

  pub fn load(&self) -> Result<Settings> {
    match self.db.get_value(SETTINGS_KEY)? {
      Some(raw) => {
        let mut saved: Settings = serde_json::from_str(&raw)
          .map_err(|e| eyre!("Failed to parse saved settings: {}", e))?;
        if saved.endpoint().is_none() {
          saved.endpoint = self.defaults.endpoint.clone();
        }
        Ok(saved)
      }
      None => Ok(self.defaults.clone()),
    }
  }

  pub fn save(&self, settings: &Settings) -> Result<()> {
    if let Some(endpoint) = settings.endpoint() {
      let parsed = url::Url::parse(endpoint)
        .map_err(|e| eyre!("Invalid endpoint URL '{}': {}", endpoint, e))?;
      if !matches!(parsed.scheme(), "http" | "https") {
        return Err(eyre!("Endpoint must use http or https: {}", endpoint));
      }
    }

    let raw =
      serde_json::to_string(settings).map_err(|e| eyre!("Failed to encode settings: {}", e))?;
    self.db.set_value(SETTINGS_KEY, &raw)
  }

  /// Apply `edit` to the current settings and persist the result.
  pub fn update(&self, edit: impl FnOnce(&mut Settings)) -> Result<Settings> {
    let mut settings = self.load()?;
    edit(&mut settings);
    self.save(&settings)?;
    Ok(settings)
  }
}
