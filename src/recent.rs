//! Most recent scans, newest first, kept in the local database.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::db::Database;

const RECENT_KEY: &str = "recent_scans";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
  /// The backend recorded the check
  Checked,
  /// Waiting in the offline queue
  Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentScan {
  pub code: String,
  pub scanned_at: DateTime<Utc>,
  pub status: ScanStatus,
}

#[derive(Clone)]
pub struct RecentScans {
  db: Arc<Database>,
  limit: usize,
}

impl RecentScans {
  pub fn new(db: Arc<Database>, limit: usize) -> Self {
    Self {
      db,
      limit: limit.max(1),
    }
  }

  pub fn list(&self) -> Result<Vec<RecentScan>> {
    match self.db.get_value(RECENT_KEY)? {
      Some(raw) => {
        serde_json::from_str(&raw).map_err(|e| eyre!("Failed to decode recent scans: {}", e))
      }
      None => Ok(Vec::new()),
    }
  }

  /// Put a scan at the front, dropping the oldest past the limit.
  pub fn record(&self, code: &str, status: ScanStatus) -> Result<RecentScan> {
    let scan = RecentScan {
      code: code.to_string(),
      scanned_at: Utc::now(),
      status,
    };
    let mut scans = self.list()?;
    scans.insert(0, scan.clone());
    scans.truncate(self.limit);
    self.save(&scans)?;
    Ok(scan)
  }

  /// Mark queued scans whose code was `delivered` as checked.
  pub fn settle(&self, delivered: &[String]) -> Result<()> {
    let mut scans = self.list()?;
    let mut changed = false;
    for scan in scans.iter_mut() {
      if scan.status == ScanStatus::Queued && delivered.contains(&scan.code) {
        scan.status = ScanStatus::Checked;
        changed = true;
      }
    }
    if changed {
      self.save(&scans)?;
    }
    Ok(())
  }

  pub fn clear(&self) -> Result<()> {
    self.db.remove_value(RECENT_KEY)
  }

  fn save(&self, scans: &[RecentScan]) -> Result<()> {
    let raw =
      serde_json::to_string(scans).map_err(|e| eyre!("Failed to encode recent scans: {}", e))?;
    self.db.set_value(RECENT_KEY, &raw)
  }
}
