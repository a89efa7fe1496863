//! Application context and the interactive scan session.

use chrono::{Local, Utc};
use color_eyre::{eyre::eyre, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheLayer, NoopStorage, SqliteStorage};
use crate::commands::{self, COMMANDS};
use crate::config::Config;
use crate::db::Database;
use crate::event::{Event, EventHandler};
use crate::gateway::{
  Condition, Gateway, GatewayError, InventoryClient, InventoryUpdate, MutationOutcome,
};
use crate::queue::{OfflineQueue, PendingAction};
use crate::recent::{RecentScans, ScanStatus};
use crate::report;
use crate::resources::{
  MessageReply, ResourceError, ResourceRequest, ResourceStore, ResourceWorker, ServedFrom,
  WorkerConfig, WorkerHandle, WorkerMessage,
};
use crate::settings::SettingsStore;
use crate::sync::{SyncOrchestrator, SyncOutcome, SyncTrigger, PERIODIC_INVENTORY};
use crate::view;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Success,
  Info,
  Warning,
  Error,
}

/// A user-visible status message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
}

impl Notice {
  pub fn success(message: impl Into<String>) -> Self {
    Self::new(NoticeLevel::Success, message)
  }

  pub fn info(message: impl Into<String>) -> Self {
    Self::new(NoticeLevel::Info, message)
  }

  pub fn warning(message: impl Into<String>) -> Self {
    Self::new(NoticeLevel::Warning, message)
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self::new(NoticeLevel::Error, message)
  }

  fn new(level: NoticeLevel, message: impl Into<String>) -> Self {
    Self {
      level,
      message: message.into(),
    }
  }
}

impl fmt::Display for Notice {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let tag = match self.level {
      NoticeLevel::Success => "ok",
      NoticeLevel::Info => "info",
      NoticeLevel::Warning => "warn",
      NoticeLevel::Error => "error",
    };
    write!(f, "[{}] {}", tag, self.message)
  }
}

/// Map a gateway failure to what the user is told.
pub fn notice_for_error(err: &GatewayError) -> Notice {
  match err {
    GatewayError::Config => Notice::error(
      "No backend endpoint configured; set one with `assetscan settings set endpoint <url>`",
    ),
    GatewayError::Duplicate(message) => Notice::warning(message.clone()),
    GatewayError::CacheMiss { key, .. } => {
      Notice::warning(format!("Offline and no saved copy of {}", key))
    }
    GatewayError::Transport(reason) => Notice::error(format!("Backend unreachable: {}", reason)),
    other => Notice::error(other.to_string()),
  }
}

/// One piece of command output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
  Notice(Notice),
  Text(String),
}

impl Output {
  pub fn is_error(&self) -> bool {
    matches!(self, Output::Notice(n) if n.level == NoticeLevel::Error)
  }
}

impl From<Notice> for Output {
  fn from(notice: Notice) -> Self {
    Output::Notice(notice)
  }
}

impl fmt::Display for Output {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Output::Notice(notice) => notice.fmt(f),
      Output::Text(text) => f.write_str(text),
    }
  }
}

fn failed(err: &GatewayError) -> Vec<Output> {
  vec![notice_for_error(err).into()]
}

/// Values entered for a check-in beyond the asset code.
#[derive(Debug, Clone, Default)]
pub struct CheckInOptions {
  /// Falls back to the profile location, then the asset's recorded location
  pub location: Option<String>,
  pub condition: Condition,
  /// Falls back to the asset's recorded serial
  pub serial: Option<String>,
  pub notes: String,
  /// Submit even if the asset was already checked this period
  pub force: bool,
}

/// Resource cache operations exposed on the command line.
#[derive(Debug, Clone)]
pub enum ResourceAction {
  Install,
  Activate,
  Fetch { url: String, document: bool },
  CacheData { json: String },
  GetData { key: String },
  Clear,
}

/// Everything built once at startup and shared by every operation.
#[derive(Clone)]
pub struct AppContext {
  pub config: Config,
  pub settings: SettingsStore,
  pub queue: OfflineQueue,
  pub client: InventoryClient,
  pub sync: SyncOrchestrator,
  pub recent: RecentScans,
  pub resources: ResourceStore,
}

impl AppContext {
  pub fn new(config: Config, db_path: Option<&Path>) -> Result<Self> {
    let db = Arc::new(Database::open(db_path)?);
    Self::with_database(config, db)
  }

  pub fn with_database(config: Config, db: Arc<Database>) -> Result<Self> {
    let settings = SettingsStore::new(db.clone(), config.default_settings());
    let queue = OfflineQueue::new(db.clone());
    let gateway = Gateway::new(settings.clone(), queue.clone(), config.request_timeout())
      .map_err(|e| eyre!("Failed to create gateway: {}", e))?;
    let cache = if config.cache.snapshots {
      CacheLayer::new(SqliteStorage::new(db.clone()))
    } else {
      CacheLayer::new(NoopStorage)
    };
    let client = InventoryClient::new(gateway, cache);

    Ok(Self {
      sync: SyncOrchestrator::new(client.clone()),
      recent: RecentScans::new(db.clone(), config.recent_scan_limit),
      resources: ResourceStore::new(db),
      settings,
      queue,
      client,
      config,
    })
  }

  /// Start the resource worker; sync triggers and notifications go to `shell`.
  pub fn spawn_resource_worker(
    &self,
    shell: Option<mpsc::UnboundedSender<Event>>,
  ) -> Result<WorkerHandle> {
    let mut worker = ResourceWorker::new(
      WorkerConfig::from_cache_config(&self.config.cache),
      self.resources.clone(),
      self.settings.clone(),
      self.config.request_timeout(),
    )?;
    if let Some(shell) = shell {
      worker = worker.with_shell(shell);
    }
    let (handle, _task) = worker.spawn();
    Ok(handle)
  }

  /// Look an asset up and record its inventory check.
  ///
  /// When the lookup cannot reach the backend the check is still submitted,
  /// and is queued for later delivery.
  pub async fn check_in(&self, code: &str, options: &CheckInOptions) -> Vec<Output> {
    let code = code.trim();
    if code.is_empty() {
      return Vec::new();
    }

    let mut out = Vec::new();
    let lookup = match self.client.asset(code).await {
      Ok(result) => {
        let status = &result.data.inventory_status;
        if status.checked && !options.force {
          return vec![Notice::warning(format!(
            "{} was already checked on {} by {}",
            code,
            status.date.as_deref().unwrap_or("an earlier date"),
            status.user.as_deref().unwrap_or("someone")
          ))
          .into()];
        }
        Some(result.data)
      }
      Err(GatewayError::Backend(message)) => {
        return vec![Notice::error(format!("Asset not found: {} ({})", code, message)).into()];
      }
      Err(err @ (GatewayError::Transport(_) | GatewayError::CacheMiss { .. })) => {
        debug!(code, error = %err, "lookup unavailable, checking in blind");
        out.push(Notice::info(format!("Offline: cannot look up {}", code)).into());
        None
      }
      Err(err) => return failed(&err),
    };

    let profile = match self.settings.load() {
      Ok(settings) => settings.profile,
      Err(e) => return vec![Notice::error(e.to_string()).into()],
    };
    let asset = lookup.as_ref().map(|l| &l.asset);
    let location = options
      .location
      .clone()
      .filter(|l| !l.trim().is_empty())
      .or_else(|| Some(profile.location.clone()).filter(|l| !l.trim().is_empty()))
      .or_else(|| asset.and_then(|a| a.location()))
      .unwrap_or_default();
    let serial = options
      .serial
      .clone()
      .or_else(|| asset.and_then(|a| a.serial()))
      .unwrap_or_default();

    let update = InventoryUpdate {
      code: code.to_string(),
      location,
      condition: options.condition,
      serial,
      notes: options.notes.clone(),
    };

    match self.client.update_inventory(update).await {
      Ok(MutationOutcome::Applied(_)) => {
        self.remember_scan(code, ScanStatus::Checked);
        let name = asset.and_then(|a| a.name()).unwrap_or_default();
        out.push(Notice::success(format!("Checked {} {}", code, name).trim_end().to_string()).into());
      }
      Ok(MutationOutcome::Queued { pending_id }) => {
        self.remember_scan(code, ScanStatus::Queued);
        out.push(
          Notice::info(format!(
            "Saved offline; {} will be sent when the backend is back (#{})",
            code, pending_id
          ))
          .into(),
        );
      }
      Err(err) => out.extend(failed(&err)),
    }
    out
  }

  fn remember_scan(&self, code: &str, status: ScanStatus) {
    if let Err(e) = self.recent.record(code, status) {
      warn!(error = %e, "failed to record recent scan");
    }
  }

  pub async fn asset(&self, code: &str) -> Vec<Output> {
    match self.client.asset(code.trim()).await {
      Ok(result) => vec![Output::Text(view::asset_detail(&result))],
      Err(err) => failed(&err),
    }
  }

  pub async fn stats(&self) -> Vec<Output> {
    match self.client.stats().await {
      Ok(result) => vec![Output::Text(view::stats(&result))],
      Err(err) => failed(&err),
    }
  }

  pub async fn list(&self) -> Vec<Output> {
    match self.client.all_assets().await {
      Ok(result) => vec![Output::Text(view::assets(&result))],
      Err(err) => failed(&err),
    }
  }

  pub async fn search(&self, query: &str) -> Vec<Output> {
    match self.client.search(query).await {
      Ok(result) => vec![Output::Text(view::assets(&result))],
      Err(err) => failed(&err),
    }
  }

  pub async fn update(&self, code: &str, fields: BTreeMap<String, String>) -> Vec<Output> {
    if fields.is_empty() {
      return vec![Notice::warning("Nothing to update").into()];
    }
    match self.client.update_asset_info(code, fields).await {
      Ok(MutationOutcome::Applied(_)) => vec![Notice::success(format!("Updated {}", code)).into()],
      Ok(MutationOutcome::Queued { pending_id }) => {
        vec![Notice::info(format!("Saved offline; update of {} queued (#{})", code, pending_id)).into()]
      }
      Err(err) => failed(&err),
    }
  }

  /// Start a new inventory period. Scan history and snapshots are cleared on
  /// success.
  pub async fn reset(&self) -> Vec<Output> {
    let period = Utc::now().to_rfc3339();
    match self.client.reset_inventory(&period).await {
      Ok(MutationOutcome::Applied(body)) => {
        if let Err(e) = self.recent.clear() {
          warn!(error = %e, "failed to clear recent scans");
        }
        // Snapshots describe the previous period
        if let Err(e) = self.client.cache().clear() {
          warn!(error = %e, "failed to clear snapshots");
        }
        let backup = body.get("backup").and_then(Value::as_str).unwrap_or("none");
        vec![Notice::success(format!("Inventory reset; backup: {}", backup)).into()]
      }
      Ok(MutationOutcome::Queued { pending_id }) => vec![Notice::info(format!(
        "Saved offline; reset queued (#{})",
        pending_id
      ))
      .into()],
      Err(err) => failed(&err),
    }
  }

  pub async fn qr(&self, generate: bool) -> Vec<Output> {
    let result = if generate {
      self.client.generate_qr_codes().await
    } else {
      self.client.qr_data().await
    };
    match result {
      Ok(entries) => vec![Output::Text(view::qr_entries(&entries))],
      Err(err) => failed(&err),
    }
  }

  /// Write the CSV progress report; `None` uses the dated default name.
  pub async fn export(&self, path: Option<PathBuf>) -> Vec<Output> {
    let stats = match self.client.stats().await {
      Ok(stats) => stats,
      Err(err) => return failed(&err),
    };
    let path = path.unwrap_or_else(|| report::default_file_name(Local::now().date_naive()));

    match report::export_to(&stats.data, &path) {
      Ok(()) => {
        let mut out = Vec::new();
        if stats.is_offline() {
          out.push(Notice::warning(format!("Report built from saved data{}", view::source_note(&stats))).into());
        }
        out.push(Notice::success(format!("Report written to {}", path.display())).into());
        out
      }
      Err(e) => vec![Notice::error(e.to_string()).into()],
    }
  }

  /// Ask the backend to build its own report.
  pub async fn export_remote(&self) -> Vec<Output> {
    match self.client.export_report().await {
      Ok(body) => {
        let url = body.get("url").and_then(Value::as_str).unwrap_or("(no link returned)");
        vec![Notice::success(format!("Backend report ready: {}", url)).into()]
      }
      Err(err) => failed(&err),
    }
  }

  pub async fn init(&self) -> Vec<Output> {
    match self.client.initialize_sheets().await {
      Ok(_) => vec![Notice::success("Backend sheets initialized").into()],
      Err(err) => failed(&err),
    }
  }

  /// Run a sync and describe what it did. Quiet unless something happened
  /// or the sync was requested by hand.
  pub async fn sync(&self, trigger: SyncTrigger) -> Vec<Output> {
    let manual = trigger == SyncTrigger::Manual;
    let report = match self.sync.trigger(trigger).await {
      Ok(SyncOutcome::Completed(report)) => report,
      Ok(SyncOutcome::AlreadyRunning) if manual => {
        return vec![Notice::info("A sync is already running").into()];
      }
      Ok(SyncOutcome::AlreadyRunning) | Ok(SyncOutcome::Ignored) => return Vec::new(),
      Err(e) => return vec![Notice::error(e.to_string()).into()],
    };

    let drain = report.drain;
    if drain.replayed > 0 {
      self.settle_recent(&drain.delivered);
    }

    let mut out: Vec<Output> = Vec::new();
    if drain.replayed > 0 {
      out.push(Notice::success(format!("Sent {} queued update(s)", drain.replayed)).into());
    }
    if drain.failed > 0 {
      out.push(
        Notice::warning(format!(
          "{} queued update(s) were rejected and stay queued; see `queue list`",
          drain.failed
        ))
        .into(),
      );
    }
    if drain.halted {
      out.push(
        Notice::warning(format!(
          "Backend unreachable; {} update(s) still queued",
          drain.remaining
        ))
        .into(),
      );
    }
    if manual && out.is_empty() {
      out.push(Notice::info("Nothing to sync").into());
    }
    out
  }

  /// Queued scans become checked once their update has been delivered.
  fn settle_recent(&self, delivered: &[PendingAction]) {
    let codes: Vec<String> = delivered
      .iter()
      .filter(|a| a.action == "updateInventory")
      .filter_map(|a| a.payload.get("code").and_then(Value::as_str).map(String::from))
      .collect();
    if let Err(e) = self.recent.settle(&codes) {
      warn!(error = %e, "failed to update recent scans");
    }
  }

  pub fn queue_list(&self) -> Vec<Output> {
    match self.queue.list() {
      Ok(pending) => vec![Output::Text(view::queue(&pending))],
      Err(e) => vec![Notice::error(e.to_string()).into()],
    }
  }

  pub fn queue_drop(&self, id: i64) -> Vec<Output> {
    match self.queue.remove(id) {
      Ok(true) => vec![Notice::success(format!("Dropped queued update #{}", id)).into()],
      Ok(false) => vec![Notice::warning(format!("No queued update #{}", id)).into()],
      Err(e) => vec![Notice::error(e.to_string()).into()],
    }
  }

  pub fn queue_clear(&self) -> Vec<Output> {
    match self.queue.clear() {
      Ok(n) => vec![Notice::success(format!("Dropped {} queued update(s)", n)).into()],
      Err(e) => vec![Notice::error(e.to_string()).into()],
    }
  }

  pub fn recent_scans(&self) -> Vec<Output> {
    match self.recent.list() {
      Ok(scans) => vec![Output::Text(view::recent(&scans))],
      Err(e) => vec![Notice::error(e.to_string()).into()],
    }
  }

  pub fn settings_show(&self) -> Vec<Output> {
    match self.settings.load() {
      Ok(settings) => vec![Output::Text(view::settings(&settings))],
      Err(e) => vec![Notice::error(e.to_string()).into()],
    }
  }

  /// Change one saved setting: endpoint, name, email, department or location.
  pub fn settings_set(&self, key: &str, value: &str) -> Vec<Output> {
    let value = value.trim().to_string();
    let result = match key {
      "endpoint" => self.settings.update(|s| s.endpoint = Some(value.clone())),
      "name" => self.settings.update(|s| s.profile.name = value.clone()),
      "email" => self.settings.update(|s| s.profile.email = value.clone()),
      "department" => self.settings.update(|s| s.profile.department = value.clone()),
      "location" => self.settings.update(|s| s.profile.location = value.clone()),
      other => Err(eyre!(
        "Unknown setting '{}'; expected endpoint, name, email, department or location",
        other
      )),
    };
    match result {
      Ok(_) => vec![Notice::success(format!("Saved {}", key)).into()],
      Err(e) => vec![Notice::error(e.to_string()).into()],
    }
  }

  pub async fn resources(&self, handle: &WorkerHandle, action: ResourceAction) -> Vec<Output> {
    let result: Result<Output, ResourceError> = match action {
      ResourceAction::Install => handle
        .install()
        .await
        .map(|n| Notice::success(format!("Cached {} app resources", n)).into()),
      ResourceAction::Activate => handle.activate().await.map(|deleted| {
        if deleted.is_empty() {
          Notice::success("Resource cache active").into()
        } else {
          Notice::success(format!("Resource cache active; removed {}", deleted.join(", "))).into()
        }
      }),
      ResourceAction::Fetch { url, document } => {
        let url = match Url::parse(&url) {
          Ok(url) => url,
          Err(e) => return vec![Notice::error(format!("Invalid URL '{}': {}", url, e)).into()],
        };
        let request = if document {
          ResourceRequest::document(url)
        } else {
          ResourceRequest::get(url)
        };
        handle.fetch(request).await.map(|served| {
          let from = match served.from {
            ServedFrom::Network => "network",
            ServedFrom::Cache => "cache",
          };
          Output::Text(format!(
            "{} {} from {}, {} bytes",
            served.response.status,
            served.response.content_type.as_deref().unwrap_or("-"),
            from,
            served.response.body.len()
          ))
        })
      }
      ResourceAction::CacheData { json } => {
        let data: Value = match serde_json::from_str(&json) {
          Ok(data) => data,
          Err(e) => return vec![Notice::error(format!("Invalid JSON: {}", e)).into()],
        };
        handle
          .message(WorkerMessage::CacheInventoryData(data))
          .await
          .map(|_| Notice::success("Inventory data cached").into())
      }
      ResourceAction::GetData { key } => handle
        .message(WorkerMessage::GetCachedData(key))
        .await
        .map(|reply| match reply {
          MessageReply::Data(value) => Output::Text(value.to_string()),
          MessageReply::Done => Output::Text(String::new()),
        }),
      ResourceAction::Clear => handle
        .message(WorkerMessage::ClearCache)
        .await
        .map(|_| Notice::success("Resource caches cleared").into()),
    };

    match result {
      Ok(output) => vec![output],
      Err(e) => vec![Notice::error(e.to_string()).into()],
    }
  }
}

fn help() -> String {
  let mut lines = vec!["Scan or type an asset code to check it in. Commands:".to_string()];
  for cmd in COMMANDS {
    lines.push(format!("  :{:<8} {}", cmd.name, cmd.description));
  }
  lines.join("\n")
}

/// The interactive scan session.
pub struct App {
  ctx: AppContext,
  worker: Option<WorkerHandle>,
  should_quit: bool,
}

impl App {
  pub fn new(ctx: AppContext) -> Self {
    Self {
      ctx,
      worker: None,
      should_quit: false,
    }
  }

  pub async fn run(&mut self) -> Result<()> {
    let mut events = EventHandler::new(self.ctx.config.sync.periodic_sync());
    events.watch_connectivity(
      self.ctx.settings.clone(),
      self.ctx.config.sync.check_interval(),
    );

    self.worker = match self.ctx.spawn_resource_worker(Some(events.sender())) {
      Ok(handle) => Some(handle),
      Err(e) => {
        warn!(error = %e, "resource worker unavailable");
        None
      }
    };

    info!("scan session started");
    println!("{}", help());

    while !self.should_quit {
      match events.next().await {
        Some(event) => {
          for output in self.handle_event(event).await {
            println!("{}", output);
          }
        }
        None => break,
      }
    }

    info!("scan session ended");
    Ok(())
  }

  pub async fn handle_event(&mut self, event: Event) -> Vec<Output> {
    match event {
      Event::Input(line) => self.handle_input(&line).await,
      Event::InvalidInput(line) => vec![Notice::warning(format!(
        "Unreadable scan ignored: {}",
        line.trim()
      ))
      .into()],
      Event::InputClosed => {
        self.should_quit = true;
        Vec::new()
      }
      Event::Tick => self.periodic_sync().await,
      Event::Online => {
        let mut out = vec![Notice::info("Backend reachable").into()];
        out.extend(self.ctx.sync(SyncTrigger::ConnectivityRestored).await);
        out
      }
      Event::Offline => {
        vec![Notice::warning("Backend unreachable; check-ins will be saved offline").into()]
      }
      Event::Sync(trigger) => self.ctx.sync(trigger).await,
      Event::Notify(notification) => vec![Notice::info(format!(
        "{}: {}",
        notification.title, notification.body
      ))
      .into()],
      Event::Open(url) => vec![Notice::info(format!("Open {}", url)).into()],
    }
  }

  /// With a worker the periodic sync goes through it and comes back as a
  /// `Sync` event.
  async fn periodic_sync(&self) -> Vec<Output> {
    if let Some(worker) = &self.worker {
      match worker.periodic_sync(PERIODIC_INVENTORY) {
        Ok(()) => return Vec::new(),
        Err(e) => debug!(error = %e, "worker gone, syncing directly"),
      }
    }
    self
      .ctx
      .sync(SyncTrigger::PeriodicSync(PERIODIC_INVENTORY.to_string()))
      .await
  }

  async fn handle_input(&mut self, line: &str) -> Vec<Output> {
    let line = line.trim();
    if line.is_empty() {
      return Vec::new();
    }
    if !line.starts_with(':') {
      return self.ctx.check_in(line, &CheckInOptions::default()).await;
    }

    let Some((cmd, args)) = commands::resolve(line) else {
      return vec![Notice::warning(format!("Unknown command '{}'; try :help", line)).into()];
    };

    match cmd.name {
      "stats" => self.ctx.stats().await,
      "list" => self.ctx.list().await,
      "search" => self.ctx.search(args).await,
      "sync" => self.ctx.sync(SyncTrigger::Manual).await,
      "queue" => self.ctx.queue_list(),
      "recent" => self.ctx.recent_scans(),
      "export" => {
        let path = Some(args).filter(|a| !a.is_empty()).map(PathBuf::from);
        self.ctx.export(path).await
      }
      "help" => vec![Output::Text(help())],
      "quit" => {
        self.should_quit = true;
        Vec::new()
      }
      other => vec![Notice::warning(format!("Unhandled command '{}'", other)).into()],
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::settings::Settings;
  use httpmock::prelude::*;
  use serde_json::json;

  const DEAD: &str = "http://127.0.0.1:9/exec";

  fn context(endpoint: Option<&str>) -> AppContext {
    let config = Config {
      endpoint: endpoint.map(String::from),
      ..Config::default()
    };
    AppContext::with_database(config, Arc::new(Database::open_in_memory().unwrap())).unwrap()
  }

  fn has_level(outputs: &[Output], level: NoticeLevel) -> bool {
    outputs
      .iter()
      .any(|o| matches!(o, Output::Notice(n) if n.level == level))
  }

  #[test]
  fn test_duplicate_is_a_warning() {
    let notice = notice_for_error(&GatewayError::Duplicate("already checked".into()));
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(notice.message, "already checked");

    assert_eq!(notice_for_error(&GatewayError::Config).level, NoticeLevel::Error);
  }

  #[tokio::test]
  async fn test_empty_scan_is_ignored() {
    let mut app = App::new(context(None));
    assert!(app.handle_event(Event::Input("   ".into())).await.is_empty());
    assert!(app.ctx.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_unreadable_scan_warns_and_keeps_session() {
    let mut app = App::new(context(Some(DEAD)));
    let out = app
      .handle_event(Event::InvalidInput("\u{FFFD}B".into()))
      .await;

    assert!(has_level(&out, NoticeLevel::Warning));
    assert!(!app.should_quit);
    assert!(app.ctx.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_offline_scan_is_queued_and_remembered() {
    let mut app = App::new(context(Some(DEAD)));
    let out = app.handle_event(Event::Input("A1".into())).await;

    assert!(has_level(&out, NoticeLevel::Info));
    assert!(!has_level(&out, NoticeLevel::Error));
    assert_eq!(app.ctx.queue.len().unwrap(), 1);
    let recent = app.ctx.recent.list().unwrap();
    assert_eq!(recent[0].code, "A1");
    assert_eq!(recent[0].status, ScanStatus::Queued);
  }

  #[tokio::test]
  async fn test_scan_without_endpoint_reports_configuration_error() {
    let mut app = App::new(context(None));
    let out = app.handle_event(Event::Input("A1".into())).await;
    assert!(has_level(&out, NoticeLevel::Error));
    assert!(app.ctx.queue.is_empty().unwrap());
  }

  #[tokio::test]
  async fn test_already_checked_asset_is_not_resubmitted() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when
          .method(POST)
          .path("/exec")
          .json_body_partial(r#"{"action":"getAsset"}"#);
        then.status(200).json_body(json!({
          "success": true,
          "asset": {"Mã tài sản": "A1"},
          "inventoryStatus": {"checked": true, "date": "01/02/2024", "user": "An"}
        }));
      })
      .await;
    let update = server
      .mock_async(|when, then| {
        when
          .method(POST)
          .path("/exec")
          .json_body_partial(r#"{"action":"updateInventory"}"#);
        then.status(200).json_body(json!({"success": true}));
      })
      .await;

    let endpoint = server.url("/exec");
    let ctx = context(Some(&endpoint));
    let out = ctx.check_in("A1", &CheckInOptions::default()).await;

    assert!(has_level(&out, NoticeLevel::Warning));
    update.assert_hits_async(0).await;
  }

  #[tokio::test]
  async fn test_check_in_uses_asset_location_and_records_scan() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when
          .method(POST)
          .path("/exec")
          .json_body_partial(r#"{"action":"getAsset","code":"A1"}"#);
        then.status(200).json_body(json!({
          "success": true,
          "asset": {"Mã tài sản": "A1", "Tên tài sản": "Máy in", "Vị trí": "Kho A", "Serial": "SN-1"},
          "inventoryStatus": {"checked": false}
        }));
      })
      .await;
    let update = server
      .mock_async(|when, then| {
        when.method(POST).path("/exec").json_body_partial(
          r#"{"action":"updateInventory","code":"A1","location":"Kho A","serial":"SN-1","status":"Hỏng"}"#,
        );
        then.status(200).json_body(json!({"success": true}));
      })
      .await;

    let endpoint = server.url("/exec");
    let ctx = context(Some(&endpoint));
    let options = CheckInOptions {
      condition: Condition::Broken,
      ..CheckInOptions::default()
    };
    let out = ctx.check_in("A1", &options).await;

    update.assert_hits_async(1).await;
    assert_eq!(
      out,
      vec![Output::Notice(Notice::success("Checked A1 Máy in"))]
    );
    assert_eq!(ctx.recent.list().unwrap()[0].status, ScanStatus::Checked);
  }

  #[tokio::test]
  async fn test_commands_are_dispatched() {
    let mut app = App::new(context(Some(DEAD)));

    let out = app.handle_event(Event::Input(":que".into())).await;
    assert_eq!(out, vec![Output::Text("No queued updates".into())]);

    let out = app.handle_event(Event::Input(":nope".into())).await;
    assert!(has_level(&out, NoticeLevel::Warning));

    app.handle_event(Event::Input(":quit".into())).await;
    assert!(app.should_quit);
  }

  #[tokio::test]
  async fn test_sync_settles_only_delivered_scans() {
    let mut app = App::new(context(Some(DEAD)));
    app.handle_event(Event::Input("A1".into())).await;
    app.handle_event(Event::Input("A2".into())).await;

    let dropped = app
      .ctx
      .queue
      .list()
      .unwrap()
      .into_iter()
      .find(|a| a.payload["code"] == "A2")
      .unwrap();
    app.ctx.queue_drop(dropped.id);

    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(POST).path("/exec");
        then.status(200).json_body(json!({"success": true}));
      })
      .await;
    let endpoint = server.url("/exec");
    app
      .ctx
      .settings
      .update(|s| s.endpoint = Some(endpoint.clone()))
      .unwrap();

    let out = app.ctx.sync(SyncTrigger::Manual).await;
    assert!(has_level(&out, NoticeLevel::Success));

    let recent = app.ctx.recent.list().unwrap();
    assert_eq!(recent[0].code, "A2");
    assert_eq!(recent[0].status, ScanStatus::Queued);
    assert_eq!(recent[1].code, "A1");
    assert_eq!(recent[1].status, ScanStatus::Checked);
  }

  #[tokio::test]
  async fn test_manual_sync_with_empty_queue() {
    let ctx = context(Some(DEAD));
    assert_eq!(
      ctx.sync(SyncTrigger::Manual).await,
      vec![Output::Notice(Notice::info("Nothing to sync"))]
    );
  }

  #[test]
  fn test_settings_set_validates_key_and_endpoint() {
    let ctx = context(None);
    assert!(ctx.settings_set("color", "blue")[0].is_error());
    assert!(ctx.settings_set("endpoint", "not a url")[0].is_error());
    assert!(!ctx.settings_set("endpoint", "https://script.example/exec")[0].is_error());
    assert_eq!(
      ctx.settings.load().unwrap().endpoint(),
      Some("https://script.example/exec")
    );
  }

  #[tokio::test]
  async fn test_settings_override_config_defaults() {
    let ctx = context(Some(DEAD));
    ctx
      .settings
      .save(&Settings {
        endpoint: Some("https://saved.example/exec".into()),
        ..Settings::default()
      })
      .unwrap();
    assert_eq!(
      ctx.settings.load().unwrap().endpoint(),
      Some("https://saved.example/exec")
    );
  }
}
