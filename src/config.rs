use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::settings::{Settings, UserProfile};

/// Environment variable overriding the configured endpoint.
pub const ENDPOINT_ENV: &str = "ASSETSCAN_ENDPOINT";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Default backend endpoint; saved settings take precedence
  #[serde(default)]
  pub endpoint: Option<String>,
  /// Default user profile; saved settings take precedence
  #[serde(default)]
  pub profile: UserProfile,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  /// How many recent scans to remember (capped at 50)
  #[serde(default = "default_recent_scan_limit")]
  pub recent_scan_limit: usize,
  /// Per-request timeout for backend and resource fetches
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Prefix of the versioned resource cache names
  #[serde(default = "default_cache_prefix")]
  pub prefix: String,
  /// Bumping this replaces every resource cache on activation
  #[serde(default = "default_cache_version")]
  pub version: u32,
  #[serde(default = "default_max_dynamic_entries")]
  pub max_dynamic_entries: usize,
  /// Origin the app shell is served from; relative manifest entries resolve against it
  #[serde(default)]
  pub app_origin: Option<String>,
  /// Resources cached at install time
  #[serde(default = "default_static_manifest")]
  pub static_manifest: Vec<String>,
  /// Keep snapshots of reads for offline use
  #[serde(default = "default_true")]
  pub snapshots: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: default_cache_prefix(),
      version: default_cache_version(),
      max_dynamic_entries: default_max_dynamic_entries(),
      app_origin: None,
      static_manifest: default_static_manifest(),
      snapshots: true,
    }
  }
}

impl CacheConfig {
  pub fn static_cache_name(&self) -> String {
    format!("{}-static-v{}", self.prefix, self.version)
  }

  pub fn dynamic_cache_name(&self) -> String {
    format!("{}-dynamic-v{}", self.prefix, self.version)
  }

  /// Absolute URLs of the install manifest.
  pub fn resolved_manifest(&self) -> Result<Vec<url::Url>> {
    let origin = self
      .app_origin
      .as_deref()
      .map(url::Url::parse)
      .transpose()
      .map_err(|e| eyre!("Invalid cache.app_origin: {}", e))?;

    self
      .static_manifest
      .iter()
      .map(|entry| match url::Url::parse(entry) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
          let origin = origin.as_ref().ok_or_else(|| {
            eyre!(
              "Manifest entry '{}' is relative but cache.app_origin is not set",
              entry
            )
          })?;
          origin
            .join(entry)
            .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))
        }
        Err(e) => Err(eyre!("Invalid manifest entry '{}': {}", entry, e)),
      })
      .collect()
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// How often endpoint reachability is checked
  #[serde(default = "default_check_interval_secs")]
  pub check_interval_secs: u64,
  /// How often a periodic sync is triggered while online
  #[serde(default = "default_periodic_sync_secs")]
  pub periodic_sync_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      check_interval_secs: default_check_interval_secs(),
      periodic_sync_secs: default_periodic_sync_secs(),
    }
  }
}

impl SyncConfig {
  pub fn check_interval(&self) -> Duration {
    Duration::from_secs(self.check_interval_secs.max(1))
  }

  pub fn periodic_sync(&self) -> Duration {
    Duration::from_secs(self.periodic_sync_secs.max(1))
  }
}

fn default_recent_scan_limit() -> usize {
  10
}

fn default_request_timeout_secs() -> u64 {
  30
}

fn default_cache_prefix() -> String {
  "asset-manager".to_string()
}

fn default_cache_version() -> u32 {
  1
}

fn default_max_dynamic_entries() -> usize {
  100
}

fn default_static_manifest() -> Vec<String> {
  [
    "/",
    "/index.html",
    "/manifest.json",
    "https://unpkg.com/html5-qrcode@2.3.8/html5-qrcode.min.js",
    "https://cdnjs.cloudflare.com/ajax/libs/qrcode/1.5.3/qrcode.min.js",
    "https://cdnjs.cloudflare.com/ajax/libs/jspdf/2.5.1/jspdf.umd.min.js",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_true() -> bool {
  true
}

fn default_check_interval_secs() -> u64 {
  15
}

fn default_periodic_sync_secs() -> u64 {
  300
}

impl Default for Config {
  fn default() -> Self {
    Self {
      endpoint: None,
      profile: UserProfile::default(),
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      recent_scan_limit: default_recent_scan_limit(),
      request_timeout_secs: default_request_timeout_secs(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./assetscan.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/assetscan/config.yaml
  ///
  /// Without any file the defaults are used; the endpoint and profile can be
  /// saved later with the `settings` command.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        info!("no configuration file found, using defaults");
        Self::default()
      }
    };

    if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
      config.endpoint = Some(endpoint);
    }
    config.recent_scan_limit = config.recent_scan_limit.clamp(1, 50);

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("assetscan.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("assetscan").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Settings used until the user saves their own.
  pub fn default_settings(&self) -> Settings {
    Settings {
      endpoint: self.endpoint.clone(),
      profile: self.profile.clone(),
    }
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs.max(1))
  }
}
