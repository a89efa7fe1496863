//! Replays the offline queue once the backend may be reachable again.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::gateway::{GatewayError, InventoryClient};
use crate::queue::{DrainReport, QueueClaim};

/// Background sync tag that replays queued inventory updates.
pub const SYNC_INVENTORY: &str = "sync-inventory";
/// Background sync tag that only refreshes the asset snapshots.
pub const SYNC_ASSETS: &str = "sync-assets";
/// Periodic sync tag that replays queued inventory updates.
pub const PERIODIC_INVENTORY: &str = "inventory-sync";

/// Lifetime of a replay claim; renewed before every delivery.
const CLAIM_TTL_SECS: i64 = 120;

/// Why a sync was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTrigger {
  ConnectivityRestored,
  BackgroundSync(String),
  PeriodicSync(String),
  Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncWork {
  Drain,
  RefreshOnly,
}

impl SyncTrigger {
  fn work(&self) -> Option<SyncWork> {
    match self {
      Self::ConnectivityRestored | Self::Manual => Some(SyncWork::Drain),
      Self::BackgroundSync(tag) if tag == SYNC_INVENTORY => Some(SyncWork::Drain),
      Self::BackgroundSync(tag) if tag == SYNC_ASSETS => Some(SyncWork::RefreshOnly),
      Self::PeriodicSync(tag) if tag == PERIODIC_INVENTORY => Some(SyncWork::Drain),
      Self::BackgroundSync(_) | Self::PeriodicSync(_) => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
  pub trigger: SyncTrigger,
  pub drain: DrainReport,
  /// Both primary snapshots were re-read from the network.
  pub refreshed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
  /// Another sync holds the gate; nothing was done.
  AlreadyRunning,
  /// The trigger carries a tag nobody handles.
  Ignored,
  Completed(SyncReport),
}

/// Runs at most one sync at a time; concurrent triggers are no-ops. The
/// replay itself is also claimed in the database, so a second process sharing
/// it backs off as well.
#[derive(Clone)]
pub struct SyncOrchestrator {
  client: InventoryClient,
  gate: Arc<Mutex<()>>,
}

impl SyncOrchestrator {
  pub fn new(client: InventoryClient) -> Self {
    Self {
      client,
      gate: Arc::new(Mutex::new(())),
    }
  }

  pub async fn trigger(&self, trigger: SyncTrigger) -> Result<SyncOutcome> {
    let Some(work) = trigger.work() else {
      debug!(?trigger, "no sync work for trigger");
      return Ok(SyncOutcome::Ignored);
    };

    let Ok(_running) = self.gate.try_lock() else {
      info!(?trigger, "sync already running");
      return Ok(SyncOutcome::AlreadyRunning);
    };

    info!(?trigger, "sync started");
    let drain = match work {
      SyncWork::Drain => {
        let queue = self.client.gateway().queue();
        let Some(claim) = queue.claim(chrono::Duration::seconds(CLAIM_TTL_SECS))? else {
          info!(?trigger, "queue is being replayed by another process");
          return Ok(SyncOutcome::AlreadyRunning);
        };
        self.drain(&claim).await?
      }
      SyncWork::RefreshOnly => DrainReport {
        remaining: self.client.gateway().queue().len()?,
        ..DrainReport::default()
      },
    };

    let refreshed = if drain.replayed > 0 || work == SyncWork::RefreshOnly {
      self.refresh().await
    } else {
      false
    };

    Ok(SyncOutcome::Completed(SyncReport {
      trigger,
      drain,
      refreshed,
    }))
  }

  async fn drain(&self, claim: &QueueClaim) -> Result<DrainReport> {
    let gateway = self.client.gateway();
    if gateway.queue().is_empty()? {
      debug!("nothing queued");
      return Ok(DrainReport::default());
    }
    gateway
      .queue()
      .drain(|pending| {
        let renewed = claim.renew().map_err(GatewayError::storage);
        let action = pending.action.clone();
        let payload = pending.payload.clone();
        let id = pending.id;
        async move {
          renewed?;
          match gateway.deliver(&action, &payload).await {
            Ok(_) => Ok(()),
            // Applied earlier; the backend refuses it a second time.
            Err(GatewayError::Duplicate(message)) => {
              info!(id, message = %message, "queued action already applied");
              Ok(())
            }
            Err(err) => Err(err),
          }
        }
      })
      .await
  }

  async fn refresh(&self) -> bool {
    match self.client.refresh_primary_snapshots().await {
      Ok(()) => {
        debug!("primary snapshots refreshed");
        true
      }
      Err(e) => {
        warn!(error = %e, "failed to refresh snapshots after sync");
        false
      }
    }
  }
}
