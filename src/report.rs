//! CSV progress report built from the inventory statistics.

use chrono::NaiveDate;
use color_eyre::{eyre::eyre, Result};
use csv::WriterBuilder;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::gateway::Stats;

/// `inventory-report-YYYY-MM-DD.csv`
pub fn default_file_name(date: NaiveDate) -> PathBuf {
  PathBuf::from(format!("inventory-report-{}.csv", date.format("%Y-%m-%d")))
}

/// Write the report as `section,item,value` rows.
pub fn write_report<W: Write>(stats: &Stats, out: W) -> Result<()> {
  let mut writer = WriterBuilder::new().from_writer(out);
  let record = |e: csv::Error| eyre!("Failed to write report row: {}", e);

  writer.write_record(["section", "item", "value"]).map_err(record)?;

  let summary = [
    ("period", stats.period.clone()),
    ("total_assets", number(stats.total_assets)),
    ("inventoried", number(stats.inventoried)),
    ("pending", number(stats.pending)),
    ("percentage", number(stats.percentage)),
  ];
  for (item, value) in &summary {
    writer
      .write_record(["summary", *item, value.as_str()])
      .map_err(record)?;
  }

  for (user, count) in &stats.by_user {
    let count = count.to_string();
    writer
      .write_record(["by_user", user.as_str(), count.as_str()])
      .map_err(record)?;
  }
  for (location, count) in &stats.by_location {
    let count = count.to_string();
    writer
      .write_record(["by_location", location.as_str(), count.as_str()])
      .map_err(record)?;
  }

  writer
    .flush()
    .map_err(|e| eyre!("Failed to flush report: {}", e))?;
  Ok(())
}

/// Write the report to `path`, creating or truncating it.
pub fn export_to(stats: &Stats, path: &Path) -> Result<()> {
  let file = std::fs::File::create(path)
    .map_err(|e| eyre!("Failed to create report {}: {}", path.display(), e))?;
  write_report(stats, file)
}

/// Whole numbers without a trailing `.0`.
fn number(value: f64) -> String {
  if value.fract() == 0.0 {
    format!("{:.0}", value)
  } else {
    format!("{:.2}", value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::BTreeMap;

  #[test]
  fn test_report_rows() {
    let stats = Stats {
      period: "2024-Q1".into(),
      total_assets: 10.0,
      inventoried: 4.0,
      pending: 6.0,
      percentage: 40.0,
      by_user: BTreeMap::from([("An".to_string(), 3), ("Bình".to_string(), 1)]),
      by_location: BTreeMap::from([("Kho A, tầng 2".to_string(), 4)]),
    };

    let mut out = Vec::new();
    write_report(&stats, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert_eq!(
      text,
      "section,item,value\n\
       summary,period,2024-Q1\n\
       summary,total_assets,10\n\
       summary,inventoried,4\n\
       summary,pending,6\n\
       summary,percentage,40\n\
       by_user,An,3\n\
       by_user,Bình,1\n\
       by_location,\"Kho A, tầng 2\",4\n"
    );
  }

  #[test]
  fn test_export_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(default_file_name(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()));

    export_to(&Stats::default(), &path).unwrap();

    assert!(path.ends_with("inventory-report-2024-03-09.csv"));
    assert!(std::fs::read_to_string(&path).unwrap().starts_with("section,item,value"));
  }

  #[test]
  fn test_number_format() {
    assert_eq!(number(40.0), "40");
    assert_eq!(number(33.333), "33.33");
  }
}
