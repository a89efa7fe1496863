//! Snapshot keys for backend reads.

use sha2::{Digest, Sha256};

use crate::cache::CacheKey;

/// Reads whose last answer is kept for offline use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InventoryQueryKey {
  /// Aggregate statistics for the current period
  Stats,
  /// Every asset in the sheet
  AllAssets,
  /// A single asset with its inventory status
  Asset { code: String },
  /// Free-text asset search
  Search { query: String },
}

impl CacheKey for InventoryQueryKey {
  fn cache_key(&self) -> String {
    match self {
      Self::Stats => "stats".to_string(),
      Self::AllAssets => "assets:all".to_string(),
      Self::Asset { code } => format!("asset:{}", code.trim()),
      Self::Search { query } => {
        // SHA256 hash for stable, fixed-length keys
        let mut hasher = Sha256::new();
        hasher.update(normalize_query(query).as_bytes());
        format!("search:{}", hex::encode(hasher.finalize()))
      }
    }
  }

  fn description(&self) -> String {
    match self {
      Self::Stats => "statistics".to_string(),
      Self::AllAssets => "asset list".to_string(),
      Self::Asset { code } => format!("asset {}", code),
      Self::Search { query } => format!("search '{}'", query),
    }
  }
}

/// Trim and lowercase so equivalent searches share a snapshot.
fn normalize_query(query: &str) -> String {
  query.trim().to_lowercase()
}
