//! Plain-text rendering for the terminal.

use chrono::{DateTime, Local, Utc};
use std::fmt::Write;

use crate::cache::CacheResult;
use crate::gateway::{Asset, AssetLookup, QrEntry, Stats};
use crate::queue::PendingAction;
use crate::recent::{RecentScan, ScanStatus};
use crate::settings::Settings;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

fn local_time(at: DateTime<Utc>) -> String {
  at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Marker appended to anything served from a snapshot.
pub fn source_note<T>(result: &CacheResult<T>) -> String {
  match result.cached_at {
    Some(at) if result.is_offline() => format!(" (offline, saved {})", local_time(at)),
    _ => String::new(),
  }
}

pub fn stats(result: &CacheResult<Stats>) -> String {
  let s = &result.data;
  let mut out = String::new();
  let _ = writeln!(out, "Period: {}{}", s.period, source_note(result));
  let _ = writeln!(
    out,
    "Checked: {} of {} ({:.1}%), {} pending",
    s.inventoried, s.total_assets, s.percentage, s.pending
  );
  if !s.by_user.is_empty() {
    let _ = writeln!(out, "By user:");
    for (user, count) in &s.by_user {
      let _ = writeln!(out, "  {:<24} {}", truncate(user, 24), count);
    }
  }
  if !s.by_location.is_empty() {
    let _ = writeln!(out, "By location:");
    for (location, count) in &s.by_location {
      let _ = writeln!(out, "  {:<24} {}", truncate(location, 24), count);
    }
  }
  out.trim_end().to_string()
}

pub fn asset_line(asset: &Asset) -> String {
  format!(
    "{:<12} {:<40} {}",
    asset.code().unwrap_or_default(),
    truncate(&asset.name().unwrap_or_else(|| "N/A".into()), 40),
    asset.location().unwrap_or_default()
  )
}

pub fn assets(result: &CacheResult<Vec<Asset>>) -> String {
  if result.data.is_empty() {
    return format!("No assets found{}", source_note(result));
  }
  let mut out = String::new();
  for asset in &result.data {
    let _ = writeln!(out, "{}", asset_line(asset));
  }
  let _ = write!(out, "{} assets{}", result.data.len(), source_note(result));
  out
}

pub fn asset_detail(result: &CacheResult<AssetLookup>) -> String {
  let lookup = &result.data;
  let asset = &lookup.asset;
  let mut out = String::new();
  let _ = writeln!(
    out,
    "{}{}",
    asset.code().unwrap_or_default(),
    source_note(result)
  );
  let _ = writeln!(out, "  Name:      {}", asset.name().unwrap_or_else(|| "N/A".into()));
  let _ = writeln!(
    out,
    "  Location:  {}",
    asset.location().unwrap_or_else(|| "unknown".into())
  );
  let _ = writeln!(out, "  Group:     {}", asset.group().unwrap_or_else(|| "N/A".into()));
  if let Some(serial) = asset.serial() {
    let _ = writeln!(out, "  Serial:    {}", serial);
  }
  if let Some(condition) = asset.condition() {
    let _ = writeln!(out, "  Condition: {}", condition);
  }
  let status = &lookup.inventory_status;
  if status.checked {
    let _ = writeln!(
      out,
      "  Checked:   {} {} by {}",
      status.date.as_deref().unwrap_or(""),
      status.time.as_deref().unwrap_or(""),
      status.user.as_deref().unwrap_or("unknown")
    );
  } else {
    let _ = writeln!(out, "  Checked:   not yet");
  }
  out.trim_end().to_string()
}

pub fn queue(pending: &[PendingAction]) -> String {
  if pending.is_empty() {
    return "No queued updates".to_string();
  }
  let mut out = String::new();
  for action in pending {
    let code = action
      .payload
      .get("code")
      .and_then(|v| v.as_str())
      .unwrap_or("-");
    let _ = writeln!(
      out,
      "#{:<5} {:<18} {:<12} {}  attempts: {}",
      action.id,
      action.action,
      code,
      local_time(action.enqueued_at),
      action.attempts
    );
  }
  let _ = write!(out, "{} queued", pending.len());
  out
}

pub fn recent(scans: &[RecentScan]) -> String {
  if scans.is_empty() {
    return "No scans yet".to_string();
  }
  let mut out = String::new();
  for scan in scans {
    let status = match scan.status {
      ScanStatus::Checked => "checked",
      ScanStatus::Queued => "queued",
    };
    let _ = writeln!(
      out,
      "{:<12} {}  {}",
      scan.code,
      local_time(scan.scanned_at),
      status
    );
  }
  out.trim_end().to_string()
}

pub fn qr_entries(entries: &[QrEntry]) -> String {
  if entries.is_empty() {
    return "No QR data".to_string();
  }
  let mut out = String::new();
  for entry in entries {
    let _ = writeln!(
      out,
      "{:<12} {:<32} {}",
      entry.code,
      truncate(&entry.name, 32),
      entry.content
    );
  }
  out.trim_end().to_string()
}

pub fn settings(settings: &Settings) -> String {
  let profile = &settings.profile;
  let mut out = String::new();
  let _ = writeln!(out, "endpoint:   {}", settings.endpoint().unwrap_or("(not set)"));
  let _ = writeln!(out, "name:       {}", profile.display_name());
  let _ = writeln!(out, "email:      {}", profile.email);
  let _ = writeln!(out, "department: {}", profile.department);
  let _ = write!(out, "location:   {}", profile.location);
  out
}
