//! Durable queue of mutations that could not reach the backend.
//!
//! Entries are replayed head to tail. A replayed entry is deleted, and the
//! deletion committed, before the next one is attempted, so a crash mid-drain
//! re-sends at most the entry that was in flight (at-least-once delivery).

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::{parse_datetime, Database};
use crate::gateway::{GatewayError, Payload};

/// A mutation waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAction {
  pub id: i64,
  pub action: String,
  pub payload: Payload,
  pub enqueued_at: DateTime<Utc>,
  /// Failed replay attempts so far.
  pub attempts: u32,
}

/// Outcome of one pass over the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Entries delivered and removed.
  pub replayed: usize,
  /// The delivered entries, in delivery order.
  pub delivered: Vec<PendingAction>,
  /// Entries the backend rejected; they stay queued.
  pub failed: usize,
  /// Entries left in the queue after the pass.
  pub remaining: usize,
  /// The pass stopped early because the backend became unreachable.
  pub halted: bool,
}

static NEXT_HOLDER: AtomicU64 = AtomicU64::new(0);

#[derive(Clone)]
pub struct OfflineQueue {
  db: Arc<Database>,
  /// Identifies this queue's replay claims across processes.
  holder: String,
}

impl OfflineQueue {
  pub fn new(db: Arc<Database>) -> Self {
    let holder = format!(
      "{}-{}",
      std::process::id(),
      NEXT_HOLDER.fetch_add(1, Ordering::Relaxed)
    );
    Self { db, holder }
  }

  /// Claim the right to replay the queue for `ttl`.
  ///
  /// The claim lives in the database, so it excludes every process sharing
  /// it. Returns `None` while another holder's claim has not expired.
  pub fn claim(&self, ttl: chrono::Duration) -> Result<Option<QueueClaim>> {
    let now = Utc::now();
    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction_with_behavior(TransactionBehavior::Immediate)
      .map_err(|e| eyre!("Failed to begin claim transaction: {}", e))?;

    let current: Option<(String, String)> = tx
      .query_row(
        "SELECT holder, expires_at FROM queue_claim WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read queue claim: {}", e))?;

    if let Some((holder, expires_at)) = current {
      if holder != self.holder && parse_datetime(&expires_at)? > now {
        debug!(holder = %holder, "queue is claimed elsewhere");
        return Ok(None);
      }
    }

    tx.execute(
      "INSERT OR REPLACE INTO queue_claim (id, holder, expires_at) VALUES (1, ?, ?)",
      params![self.holder, (now + ttl).to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to write queue claim: {}", e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit queue claim: {}", e))?;

    Ok(Some(QueueClaim {
      queue: self.clone(),
      ttl,
    }))
  }

  fn release_claim(&self) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "DELETE FROM queue_claim WHERE id = 1 AND holder = ?",
        params![self.holder],
      )
      .map_err(|e| eyre!("Failed to release queue claim: {}", e))?;
    Ok(())
  }

  /// Append an action at the tail. With a `target`, any queued action of the
  /// same kind for the same target is replaced so the newest write is the one
  /// delivered.
  pub fn enqueue(
    &self,
    action: &str,
    payload: Payload,
    target: Option<&str>,
  ) -> Result<PendingAction> {
    let encoded =
      serde_json::to_string(&payload).map_err(|e| eyre!("Failed to encode payload: {}", e))?;
    let enqueued_at = Utc::now();

    let mut conn = self.db.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    if let Some(target) = target {
      let superseded = tx
        .execute(
          "DELETE FROM pending_actions WHERE action = ? AND target = ?",
          params![action, target],
        )
        .map_err(|e| eyre!("Failed to coalesce queued actions: {}", e))?;
      if superseded > 0 {
        debug!(action, target, superseded, "replaced older queued action");
      }
    }

    tx.execute(
      "INSERT INTO pending_actions (action, payload, target, enqueued_at, attempts)
       VALUES (?, ?, ?, ?, 0)",
      params![action, encoded, target, enqueued_at.to_rfc3339()],
    )
    .map_err(|e| eyre!("Failed to enqueue action: {}", e))?;
    let id = tx.last_insert_rowid();

    tx.commit()
      .map_err(|e| eyre!("Failed to commit queued action: {}", e))?;

    info!(id, action, "queued action for later delivery");

    Ok(PendingAction {
      id,
      action: action.to_string(),
      payload,
      enqueued_at,
      attempts: 0,
    })
  }

  /// All queued actions in delivery order.
  pub fn list(&self) -> Result<Vec<PendingAction>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, action, payload, enqueued_at, attempts FROM pending_actions ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map([], read_row)
      .map_err(|e| eyre!("Failed to read queue: {}", e))?;

    let mut actions = Vec::new();
    for row in rows {
      let (id, action, payload, enqueued_at, attempts) =
        row.map_err(|e| eyre!("Failed to read queued action: {}", e))?;
      actions.push(PendingAction {
        id,
        action,
        payload: serde_json::from_str(&payload)
          .map_err(|e| eyre!("Corrupt payload for queued action {}: {}", id, e))?,
        enqueued_at: parse_datetime(&enqueued_at)?,
        attempts,
      });
    }
    Ok(actions)
  }

  pub fn len(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_actions", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count queue: {}", e))?;
    Ok(count as usize)
  }

  pub fn is_empty(&self) -> Result<bool> {
    Ok(self.len()? == 0)
  }

  /// Remove one entry. Returns false if it was not queued.
  pub fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn
      .execute("DELETE FROM pending_actions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove queued action {}: {}", id, e))?;
    Ok(removed > 0)
  }

  /// Drop every queued action. Returns how many were discarded.
  pub fn clear(&self) -> Result<usize> {
    let conn = self.db.conn()?;
    conn
      .execute("DELETE FROM pending_actions", [])
      .map_err(|e| eyre!("Failed to clear queue: {}", e))
  }

  fn record_failure(&self, id: i64) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "UPDATE pending_actions SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to record replay failure for {}: {}", id, e))?;
    Ok(())
  }

  /// Replay queued actions in order through `replay`.
  ///
  /// A rejected entry stays queued and the pass moves on. A connectivity or
  /// configuration failure ends the pass, leaving it and everything after it untouched.
  pub async fn drain<F, Fut>(&self, mut replay: F) -> Result<DrainReport>
  where
    F: FnMut(&PendingAction) -> Fut,
    Fut: Future<Output = std::result::Result<(), GatewayError>>,
  {
    let pending = self.list()?;
    let mut report = DrainReport::default();

    for action in &pending {
      match replay(action).await {
        Ok(()) => {
          self.remove(action.id)?;
          report.replayed += 1;
          report.delivered.push(action.clone());
          debug!(id = action.id, action = %action.action, "replayed queued action");
        }
        Err(err) if err.halts_replay() => {
          warn!(id = action.id, error = %err, "cannot reach backend, stopping replay");
          report.halted = true;
          break;
        }
        Err(err) => {
          warn!(id = action.id, action = %action.action, error = %err, "queued action rejected");
          self.record_failure(action.id)?;
          report.failed += 1;
        }
      }
    }

    report.remaining = self.len()?;
    info!(
      replayed = report.replayed,
      failed = report.failed,
      remaining = report.remaining,
      "offline queue drained"
    );
    Ok(report)
  }
}

/// A live replay claim. Released when dropped.
pub struct QueueClaim {
  queue: OfflineQueue,
  ttl: chrono::Duration,
}

impl QueueClaim {
  /// Push the expiry `ttl` past now. Fails if the claim was lost.
  pub fn renew(&self) -> Result<()> {
    let conn = self.queue.db.conn()?;
    let renewed = conn
      .execute(
        "UPDATE queue_claim SET expires_at = ? WHERE id = 1 AND holder = ?",
        params![(Utc::now() + self.ttl).to_rfc3339(), self.queue.holder],
      )
      .map_err(|e| eyre!("Failed to renew queue claim: {}", e))?;
    if renewed == 0 {
      return Err(eyre!("Queue claim was taken over by another process"));
    }
    Ok(())
  }
}

impl Drop for QueueClaim {
  fn drop(&mut self) {
    if let Err(e) = self.queue.release_claim() {
      warn!(error = %e, "failed to release queue claim");
    }
  }
}

type QueueRow = (i64, String, String, String, u32);

fn read_row(row: &Row<'_>) -> rusqlite::Result<QueueRow> {
  Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::cell::Cell;

  fn queue() -> OfflineQueue {
    OfflineQueue::new(Arc::new(Database::open_in_memory().unwrap()))
  }

  fn payload(code: &str) -> Payload {
    json!({ "code": code }).as_object().cloned().unwrap()
  }

  #[test]
  fn test_enqueue_assigns_increasing_ids_in_order() {
    let queue = queue();
    let a = queue.enqueue("updateInventory", payload("A1"), None).unwrap();
    let b = queue.enqueue("resetInventory", payload(""), None).unwrap();
    assert!(b.id > a.id);

    let listed = queue.list().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].action, "updateInventory");
    assert_eq!(listed[0].payload["code"], "A1");
    assert_eq!(listed[1].action, "resetInventory");
  }

  #[test]
  fn test_ids_stay_monotonic_after_tail_removed() {
    let queue = queue();
    let a = queue.enqueue("resetInventory", payload(""), None).unwrap();
    queue.remove(a.id).unwrap();
    let b = queue.enqueue("resetInventory", payload(""), None).unwrap();
    assert!(b.id > a.id);
  }

  #[test]
  fn test_claim_excludes_other_holders_until_released() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let ours = OfflineQueue::new(db.clone());
    let theirs = OfflineQueue::new(db);
    let ttl = chrono::Duration::seconds(60);

    let claim = ours.claim(ttl).unwrap().expect("unclaimed queue");
    assert!(theirs.claim(ttl).unwrap().is_none());
    claim.renew().unwrap();
    assert!(theirs.claim(ttl).unwrap().is_none());

    drop(claim);
    assert!(theirs.claim(ttl).unwrap().is_some());
  }

  #[test]
  fn test_expired_claim_can_be_taken_over() {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let ours = OfflineQueue::new(db.clone());
    let theirs = OfflineQueue::new(db);

    let stale = ours.claim(chrono::Duration::seconds(-1)).unwrap().unwrap();
    let _taken = theirs.claim(chrono::Duration::seconds(60)).unwrap().unwrap();

    assert!(stale.renew().is_err());
  }

  #[test]
  fn test_claim_is_shared_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");
    let first = OfflineQueue::new(Arc::new(Database::open(Some(&path)).unwrap()));
    let second = OfflineQueue::new(Arc::new(Database::open(Some(&path)).unwrap()));
    let ttl = chrono::Duration::seconds(60);

    let _claim = first.claim(ttl).unwrap().unwrap();
    assert!(second.claim(ttl).unwrap().is_none());
  }

  #[test]
  fn test_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");

    {
      let db = Arc::new(Database::open(Some(&path)).unwrap());
      OfflineQueue::new(db)
        .enqueue("updateInventory", payload("A1"), None)
        .unwrap();
    }

    let db = Arc::new(Database::open(Some(&path)).unwrap());
    let restored = OfflineQueue::new(db).list().unwrap();
    assert_eq!(restored.len(), 1);
    assert_eq!(restored[0].payload["code"], "A1");
  }

  #[test]
  fn test_coalesces_writes_to_same_target() {
    let queue = queue();
    queue
      .enqueue("updateInventory", payload("A1"), Some("A1"))
      .unwrap();
    queue
      .enqueue("updateInventory", payload("B2"), Some("B2"))
      .unwrap();
    let mut newer = payload("A1");
    newer.insert("notes".into(), json!("second"));
    queue
      .enqueue("updateInventory", newer, Some("A1"))
      .unwrap();

    let listed = queue.list().unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].payload["code"], "B2");
    assert_eq!(listed[1].payload["notes"], "second");
  }

  #[tokio::test]
  async fn test_drain_all_successes_empties_queue() {
    let queue = queue();
    for code in ["A1", "A2", "A3"] {
      queue.enqueue("updateInventory", payload(code), None).unwrap();
    }

    let seen = std::sync::Mutex::new(Vec::new());
    let report = queue
      .drain(|action| {
        seen
          .lock()
          .unwrap()
          .push(action.payload["code"].as_str().unwrap().to_string());
        async { Ok(()) }
      })
      .await
      .unwrap();

    assert_eq!(report.replayed, 3);
    assert_eq!(report.remaining, 0);
    assert!(queue.is_empty().unwrap());
    assert_eq!(*seen.lock().unwrap(), vec!["A1", "A2", "A3"]);
  }

  #[tokio::test]
  async fn test_drain_halts_on_connectivity_failure() {
    let queue = queue();
    for code in ["A1", "A2", "A3", "A4"] {
      queue.enqueue("updateInventory", payload(code), None).unwrap();
    }

    let calls = Cell::new(0);
    let report = queue
      .drain(|_| {
        calls.set(calls.get() + 1);
        let n = calls.get();
        async move {
          if n == 3 {
            Err(GatewayError::Transport("connection refused".into()))
          } else {
            Ok(())
          }
        }
      })
      .await
      .unwrap();

    assert_eq!(report.replayed, 2);
    assert!(report.halted);
    assert_eq!(calls.get(), 3);

    let left: Vec<_> = queue
      .list()
      .unwrap()
      .into_iter()
      .map(|a| a.payload["code"].as_str().unwrap().to_string())
      .collect();
    assert_eq!(left, vec!["A3", "A4"]);
    assert_eq!(queue.list().unwrap()[0].attempts, 0);
  }

  #[tokio::test]
  async fn test_drain_skips_rejected_entries() {
    let queue = queue();
    for code in ["A1", "A2", "A3"] {
      queue.enqueue("updateInventory", payload(code), None).unwrap();
    }

    let report = queue
      .drain(|action| {
        let rejected = action.payload["code"] == "A2";
        async move {
          if rejected {
            Err(GatewayError::Backend("Asset not found".into()))
          } else {
            Ok(())
          }
        }
      })
      .await
      .unwrap();

    assert_eq!(report.replayed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 1);
    assert!(!report.halted);
    let delivered: Vec<_> = report
      .delivered
      .iter()
      .map(|a| a.payload["code"].as_str().unwrap())
      .collect();
    assert_eq!(delivered, vec!["A1", "A3"]);

    let left = queue.list().unwrap();
    assert_eq!(left[0].payload["code"], "A2");
    assert_eq!(left[0].attempts, 1);
  }
}
