//! The resource cache worker.
//!
//! Runs as one sequential event loop on its own task. Fetches are the
//! exception: each one runs on a task of its own so network time never holds
//! up the loop. Callers talk to the worker through a [`WorkerHandle`];
//! anything the app shell has to act on (sync triggers, notifications) is
//! forwarded to the shell's event channel.

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::notify::{click_effect, notification_for_push, ClickEffect};
use super::policy::{classify, ResourceRequest, Strategy};
use super::store::{CachedResponse, ResourceStore};
use crate::config::CacheConfig;
use crate::event::Event;
use crate::settings::SettingsStore;
use crate::sync::SyncTrigger;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResourceError {
  #[error("failed to fetch {url}: {reason}")]
  Network { url: String, reason: String },

  /// Nothing was written to the static partition.
  #[error("install failed: {0}")]
  Install(String),

  #[error("no cached data for '{0}'")]
  NotCached(String),

  #[error("resource storage failure: {0}")]
  Storage(String),

  #[error("resource worker is not running")]
  Stopped,
}

impl ResourceError {
  fn storage(err: impl std::fmt::Display) -> Self {
    Self::Storage(err.to_string())
  }
}

/// Messages posted to the worker by the app.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
  /// Activate a worker that is installed but waiting
  SkipWaiting,
  /// Keep a JSON document for offline use under `/api/inventory-data`
  CacheInventoryData(Value),
  /// Read the JSON document kept under `/api/<key>`
  GetCachedData(String),
  /// Drop every partition
  ClearCache,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageReply {
  Done,
  Data(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Started, nothing installed yet
  Parsed,
  /// Static partition populated, waiting for activation
  Installed,
  /// Old partitions removed, serving requests
  Activated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  Network,
  Cache,
}

/// A response handed back to a fetch caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
  pub response: CachedResponse,
  pub from: ServedFrom,
}

impl Served {
  fn network(response: CachedResponse) -> Self {
    Self {
      response,
      from: ServedFrom::Network,
    }
  }

  fn cached(response: CachedResponse) -> Self {
    Self {
      response,
      from: ServedFrom::Cache,
    }
  }
}

type Reply<T> = oneshot::Sender<Result<T, ResourceError>>;

/// Everything the worker reacts to.
pub enum WorkerEvent {
  Install(Reply<usize>),
  Activate(Reply<Vec<String>>),
  Fetch {
    request: ResourceRequest,
    reply: Reply<Served>,
  },
  Message {
    message: WorkerMessage,
    reply: Reply<MessageReply>,
  },
  State(oneshot::Sender<WorkerState>),
  Sync(String),
  PeriodicSync(String),
  Push(Option<Value>),
  NotificationClick {
    action: Option<String>,
    data: Value,
  },
}

/// Partition names, bound and install manifest.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub static_cache: String,
  pub dynamic_cache: String,
  pub max_dynamic_entries: usize,
  pub manifest: Vec<Url>,
  manifest_error: Option<String>,
}

impl WorkerConfig {
  /// A manifest that cannot be resolved only fails installation.
  pub fn from_cache_config(config: &CacheConfig) -> Self {
    let (manifest, manifest_error) = match config.resolved_manifest() {
      Ok(manifest) => (manifest, None),
      Err(e) => (Vec::new(), Some(e.to_string())),
    };
    Self {
      static_cache: config.static_cache_name(),
      dynamic_cache: config.dynamic_cache_name(),
      max_dynamic_entries: config.max_dynamic_entries,
      manifest,
      manifest_error,
    }
  }

  fn partitions(&self) -> Vec<String> {
    vec![self.static_cache.clone(), self.dynamic_cache.clone()]
  }
}

/// Everything a fetch needs; each fetch runs on its own clone.
#[derive(Clone)]
struct Fetcher {
  config: WorkerConfig,
  store: ResourceStore,
  settings: SettingsStore,
  http: Client,
}

pub struct ResourceWorker {
  fetcher: Fetcher,
  state: WorkerState,
  shell: Option<mpsc::UnboundedSender<Event>>,
}

impl ResourceWorker {
  pub fn new(
    config: WorkerConfig,
    store: ResourceStore,
    settings: SettingsStore,
    timeout: Duration,
  ) -> color_eyre::Result<Self> {
    let http = Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| color_eyre::eyre::eyre!("Failed to build HTTP client: {}", e))?;

    Ok(Self {
      fetcher: Fetcher {
        config,
        store,
        settings,
        http,
      },
      state: WorkerState::Parsed,
      shell: None,
    })
  }

  /// Forward sync triggers and notifications to `shell`.
  pub fn with_shell(mut self, shell: mpsc::UnboundedSender<Event>) -> Self {
    self.shell = Some(shell);
    self
  }

  /// Start the event loop. It stops once every handle is dropped.
  pub fn spawn(mut self) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(async move {
      while let Some(event) = rx.recv().await {
        self.handle(event).await;
      }
      debug!("resource worker stopped");
    });
    (WorkerHandle { tx }, task)
  }

  pub async fn handle(&mut self, event: WorkerEvent) {
    match event {
      WorkerEvent::Install(reply) => {
        let _ = reply.send(self.install().await);
      }
      WorkerEvent::Activate(reply) => {
        let _ = reply.send(self.activate());
      }
      WorkerEvent::Fetch { request, reply } => {
        let fetcher = self.fetcher.clone();
        tokio::spawn(async move {
          let _ = reply.send(fetcher.fetch(&request).await);
        });
      }
      WorkerEvent::Message { message, reply } => {
        let _ = reply.send(self.message(message));
      }
      WorkerEvent::State(reply) => {
        let _ = reply.send(self.state);
      }
      WorkerEvent::Sync(tag) => {
        info!(tag = %tag, "background sync");
        self.forward(Event::Sync(SyncTrigger::BackgroundSync(tag)));
      }
      WorkerEvent::PeriodicSync(tag) => {
        info!(tag = %tag, "periodic sync");
        self.forward(Event::Sync(SyncTrigger::PeriodicSync(tag)));
      }
      WorkerEvent::Push(data) => {
        self.forward(Event::Notify(notification_for_push(data.as_ref())));
      }
      WorkerEvent::NotificationClick { action, data } => {
        match click_effect(action.as_deref(), &data) {
          ClickEffect::Close => debug!("notification dismissed"),
          ClickEffect::Open { url } => self.forward(Event::Open(url)),
        }
      }
    }
  }

  fn forward(&self, event: Event) {
    match &self.shell {
      Some(shell) => {
        if shell.send(event).is_err() {
          debug!("app shell is gone, dropping event");
        }
      }
      None => debug!("no app shell attached, dropping event"),
    }
  }

  async fn install(&mut self) -> Result<usize, ResourceError> {
    if let Some(reason) = &self.fetcher.config.manifest_error {
      error!(reason = %reason, "cannot install resource cache");
      return Err(ResourceError::Install(reason.clone()));
    }

    info!(
      cache = %self.fetcher.config.static_cache,
      entries = self.fetcher.config.manifest.len(),
      "installing resource cache"
    );

    let fetches = self
      .fetcher
      .config
      .manifest
      .iter()
      .map(|url| self.fetcher.fetch_network(ResourceRequest::get(url.clone())));
    let results = futures::future::join_all(fetches).await;

    let mut responses = Vec::with_capacity(results.len());
    for result in results {
      match result {
        Ok(response) if response.is_success() => responses.push(response),
        Ok(response) => {
          error!(url = %response.url, status = response.status, "install fetch rejected");
          return Err(ResourceError::Install(format!(
            "{} answered {}",
            response.url, response.status
          )));
        }
        Err(e) => {
          error!(error = %e, "install fetch failed");
          return Err(ResourceError::Install(e.to_string()));
        }
      }
    }

    self
      .fetcher
      .store
      .put_all(&self.fetcher.config.static_cache, &responses)
      .map_err(ResourceError::storage)?;
    self.state = WorkerState::Installed;
    Ok(responses.len())
  }

  /// Delete every partition that is not one of the current ones.
  fn activate(&mut self) -> Result<Vec<String>, ResourceError> {
    let current = self.fetcher.config.partitions();
    let mut deleted = Vec::new();

    for name in self.fetcher.store.cache_names().map_err(ResourceError::storage)? {
      if current.contains(&name) {
        continue;
      }
      self
        .fetcher
        .store
        .delete_cache(&name)
        .map_err(ResourceError::storage)?;
      info!(cache = %name, "deleted old cache");
      deleted.push(name);
    }

    self.state = WorkerState::Activated;
    info!("resource worker active");
    Ok(deleted)
  }

  fn message(&mut self, message: WorkerMessage) -> Result<MessageReply, ResourceError> {
    match message {
      WorkerMessage::SkipWaiting => {
        if self.state == WorkerState::Installed {
          self.activate()?;
        }
        Ok(MessageReply::Done)
      }
      WorkerMessage::CacheInventoryData(data) => {
        let body = serde_json::to_vec(&data).map_err(ResourceError::storage)?;
        let response = CachedResponse {
          url: api_key("inventory-data"),
          status: 200,
          content_type: Some("application/json".into()),
          body,
        };
        self
          .fetcher
          .store
          .put(&self.fetcher.config.dynamic_cache, &response)
          .map_err(ResourceError::storage)?;
        self.fetcher.enforce_bound();
        Ok(MessageReply::Done)
      }
      WorkerMessage::GetCachedData(key) => {
        let stored = self
          .fetcher
          .store
          .get(&self.fetcher.config.dynamic_cache, &api_key(&key))
          .map_err(ResourceError::storage)?
          .ok_or_else(|| ResourceError::NotCached(key.clone()))?;
        let value = serde_json::from_slice(&stored.response.body)
          .map_err(|e| ResourceError::Storage(format!("cached '{}' is not JSON: {}", key, e)))?;
        Ok(MessageReply::Data(value))
      }
      WorkerMessage::ClearCache => {
        for name in self.fetcher.store.cache_names().map_err(ResourceError::storage)? {
          self
            .fetcher
            .store
            .delete_cache(&name)
            .map_err(ResourceError::storage)?;
        }
        info!("cleared all resource caches");
        Ok(MessageReply::Done)
      }
    }
  }
}

impl Fetcher {
  async fn fetch(&self, request: &ResourceRequest) -> Result<Served, ResourceError> {
    let endpoint = self.endpoint();
    let strategy = classify(request, &self.config.manifest, endpoint.as_ref());
    debug!(url = %request.url, ?strategy, "routing request");

    match strategy {
      Strategy::PassThrough => self.fetch_network(request.clone()).await.map(Served::network),
      Strategy::Static => self.cache_first(request, &self.config.static_cache).await,
      Strategy::CacheFirst => self.cache_first(request, &self.config.dynamic_cache).await,
      Strategy::Backend => self.network_first(request).await,
    }
  }

  fn endpoint(&self) -> Option<Url> {
    match self.settings.load() {
      Ok(settings) => settings.endpoint().and_then(|e| Url::parse(e).ok()),
      Err(e) => {
        warn!(error = %e, "failed to load settings");
        None
      }
    }
  }

  async fn cache_first(
    &self,
    request: &ResourceRequest,
    partition: &str,
  ) -> Result<Served, ResourceError> {
    if let Some(hit) = self.lookup(request.url.as_str())? {
      debug!(url = %request.url, "resource cache hit");
      return Ok(Served::cached(hit));
    }

    match self.fetch_network(request.clone()).await {
      Ok(response) => {
        if response.is_success() {
          self.remember(partition, &response);
        }
        Ok(Served::network(response))
      }
      Err(err) => self.document_fallback(request, err),
    }
  }

  async fn network_first(&self, request: &ResourceRequest) -> Result<Served, ResourceError> {
    match self.fetch_network(request.clone()).await {
      Ok(response) => {
        if response.is_success() {
          self.remember(&self.config.dynamic_cache, &response);
        }
        Ok(Served::network(response))
      }
      Err(err) => match self.lookup(request.url.as_str())? {
        Some(hit) => {
          warn!(url = %request.url, "backend unreachable, serving stored response");
          Ok(Served::cached(hit))
        }
        None => Err(err),
      },
    }
  }

  fn document_fallback(
    &self,
    request: &ResourceRequest,
    err: ResourceError,
  ) -> Result<Served, ResourceError> {
    if request.document {
      if let Some(root) = self.lookup(request.root_url().as_str())? {
        warn!(url = %request.url, "serving cached root document");
        return Ok(Served::cached(root));
      }
    }
    Err(err)
  }

  fn lookup(&self, url: &str) -> Result<Option<CachedResponse>, ResourceError> {
    Ok(
      self
        .store
        .get_any(&self.config.partitions(), url)
        .map_err(ResourceError::storage)?
        .map(|stored| stored.response),
    )
  }

  /// Store a response. Failures are logged, the caller still gets its answer.
  fn remember(&self, partition: &str, response: &CachedResponse) {
    if let Err(e) = self.store.put(partition, response) {
      warn!(url = %response.url, error = %e, "failed to cache response");
      return;
    }
    if partition == self.config.dynamic_cache {
      self.enforce_bound();
    }
  }

  fn enforce_bound(&self) {
    match self
      .store
      .trim(&self.config.dynamic_cache, self.config.max_dynamic_entries)
    {
      Ok(0) => {}
      Ok(evicted) => debug!(evicted, "trimmed dynamic cache"),
      Err(e) => warn!(error = %e, "failed to trim dynamic cache"),
    }
  }

  async fn fetch_network(&self, request: ResourceRequest) -> Result<CachedResponse, ResourceError> {
    let network = |e: reqwest::Error| ResourceError::Network {
      url: request.url.to_string(),
      reason: e.to_string(),
    };

    let mut builder = self.http.request(request.method.clone(), request.url.clone());
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }
    let response = builder.send().await.map_err(network)?;

    let status = response.status().as_u16();
    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(String::from);
    let body = response.bytes().await.map_err(network)?.to_vec();

    Ok(CachedResponse {
      url: request.url.to_string(),
      status,
      content_type,
      body,
    })
  }
}

fn api_key(key: &str) -> String {
  format!("/api/{}", key)
}

/// Cloneable async front for a running [`ResourceWorker`].
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  async fn request<T>(
    &self,
    event: impl FnOnce(Reply<T>) -> WorkerEvent,
  ) -> Result<T, ResourceError> {
    let (reply, rx) = oneshot::channel();
    self.send(event(reply))?;
    rx.await.map_err(|_| ResourceError::Stopped)?
  }

  fn send(&self, event: WorkerEvent) -> Result<(), ResourceError> {
    self.tx.send(event).map_err(|_| ResourceError::Stopped)
  }

  /// Populate the static partition; returns how many entries were cached.
  pub async fn install(&self) -> Result<usize, ResourceError> {
    self.request(WorkerEvent::Install).await
  }

  /// Returns the names of the deleted partitions.
  pub async fn activate(&self) -> Result<Vec<String>, ResourceError> {
    self.request(WorkerEvent::Activate).await
  }

  pub async fn fetch(&self, request: ResourceRequest) -> Result<Served, ResourceError> {
    self
      .request(|reply| WorkerEvent::Fetch { request, reply })
      .await
  }

  pub async fn message(&self, message: WorkerMessage) -> Result<MessageReply, ResourceError> {
    self
      .request(|reply| WorkerEvent::Message { message, reply })
      .await
  }

  pub async fn state(&self) -> Result<WorkerState, ResourceError> {
    let (reply, rx) = oneshot::channel();
    self.send(WorkerEvent::State(reply))?;
    rx.await.map_err(|_| ResourceError::Stopped)
  }

  pub fn sync(&self, tag: &str) -> Result<(), ResourceError> {
    self.send(WorkerEvent::Sync(tag.to_string()))
  }

  pub fn periodic_sync(&self, tag: &str) -> Result<(), ResourceError> {
    self.send(WorkerEvent::PeriodicSync(tag.to_string()))
  }

  pub fn push(&self, data: Option<Value>) -> Result<(), ResourceError> {
    self.send(WorkerEvent::Push(data))
  }

  pub fn notification_click(&self, action: Option<&str>, data: Value) -> Result<(), ResourceError> {
    self.send(WorkerEvent::NotificationClick {
      action: action.map(String::from),
      data,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::settings::Settings;
  use httpmock::prelude::*;
  use serde_json::json;
  use std::sync::Arc;

  const DEAD: &str = "http://127.0.0.1:9";

  struct Fixture {
    handle: WorkerHandle,
    store: ResourceStore,
  }

  fn fixture(cache: CacheConfig, endpoint: Option<String>) -> Fixture {
    fixture_with_shell(cache, endpoint, None)
  }

  fn fixture_with_shell(
    cache: CacheConfig,
    endpoint: Option<String>,
    shell: Option<mpsc::UnboundedSender<Event>>,
  ) -> Fixture {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let store = ResourceStore::new(db.clone());
    let settings = SettingsStore::new(
      db,
      Settings {
        endpoint,
        ..Settings::default()
      },
    );
    let mut worker = ResourceWorker::new(
      WorkerConfig::from_cache_config(&cache),
      store.clone(),
      settings,
      Duration::from_secs(5),
    )
    .unwrap();
    if let Some(shell) = shell {
      worker = worker.with_shell(shell);
    }
    let (handle, _task) = worker.spawn();
    Fixture { handle, store }
  }

  fn cache_config(origin: &str, manifest: &[&str]) -> CacheConfig {
    CacheConfig {
      prefix: "test".into(),
      version: 2,
      max_dynamic_entries: 3,
      app_origin: Some(origin.to_string()),
      static_manifest: manifest.iter().map(|s| s.to_string()).collect(),
      snapshots: true,
    }
  }

  fn stored(url: &str, body: &str) -> CachedResponse {
    CachedResponse {
      url: url.to_string(),
      status: 200,
      content_type: Some("text/plain".into()),
      body: body.as_bytes().to_vec(),
    }
  }

  fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
  }

  #[tokio::test]
  async fn test_install_writes_nothing_when_one_fetch_fails() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/");
        then.status(200).body("<html>shell</html>");
      })
      .await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/app.js");
        then.status(404);
      })
      .await;

    let f = fixture(cache_config(&server.base_url(), &["/", "/app.js"]), None);
    let err = f.handle.install().await.unwrap_err();

    assert!(matches!(err, ResourceError::Install(_)));
    assert_eq!(f.store.len("test-static-v2").unwrap(), 0);
    assert_eq!(f.handle.state().await.unwrap(), WorkerState::Parsed);
  }

  #[tokio::test]
  async fn test_install_caches_whole_manifest() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET);
        then.status(200).body("ok");
      })
      .await;

    let f = fixture(cache_config(&server.base_url(), &["/", "/app.js"]), None);

    assert_eq!(f.handle.install().await.unwrap(), 2);
    assert_eq!(f.store.len("test-static-v2").unwrap(), 2);
    assert_eq!(f.handle.state().await.unwrap(), WorkerState::Installed);
  }

  #[tokio::test]
  async fn test_install_fails_on_unresolvable_manifest() {
    let mut cache = cache_config("http://unused", &["/"]);
    cache.app_origin = None;
    let f = fixture(cache, None);

    assert!(matches!(
      f.handle.install().await.unwrap_err(),
      ResourceError::Install(_)
    ));
  }

  #[tokio::test]
  async fn test_activate_deletes_old_partitions() {
    let f = fixture(cache_config(DEAD, &[]), None);
    f.store.put("test-static-v1", &stored("https://a.example/", "old")).unwrap();
    f.store.put("test-static-v2", &stored("https://a.example/", "new")).unwrap();

    let deleted = f.handle.activate().await.unwrap();

    assert_eq!(deleted, vec!["test-static-v1"]);
    assert_eq!(f.store.cache_names().unwrap(), vec!["test-static-v2"]);
    assert_eq!(f.handle.state().await.unwrap(), WorkerState::Activated);
  }

  #[tokio::test]
  async fn test_dynamic_partition_stays_bounded() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET);
        then.status(200).body("lib");
      })
      .await;

    let f = fixture(cache_config(&server.base_url(), &[]), None);
    for i in 0..5 {
      let request = ResourceRequest::get(url(&server.url(format!("/lib{}.js", i))));
      let served = f.handle.fetch(request).await.unwrap();
      assert_eq!(served.from, ServedFrom::Network);
    }

    let keys = f.store.keys("test-dynamic-v2").unwrap();
    assert_eq!(keys.len(), 3);
    assert_eq!(keys[0], server.url("/lib2.js"));
  }

  #[tokio::test]
  async fn test_cache_first_does_not_touch_network_on_hit() {
    let server = MockServer::start_async().await;
    let mock = server
      .mock_async(|when, then| {
        when.method(GET).path("/lib.js");
        then.status(200).body("fresh");
      })
      .await;

    let f = fixture(cache_config(&server.base_url(), &[]), None);
    let lib = server.url("/lib.js");
    f.store.put("test-dynamic-v2", &stored(&lib, "cached")).unwrap();

    let served = f.handle.fetch(ResourceRequest::get(url(&lib))).await.unwrap();

    assert_eq!(served.from, ServedFrom::Cache);
    assert_eq!(served.response.body, b"cached");
    mock.assert_hits_async(0).await;
  }

  #[tokio::test]
  async fn test_backend_is_network_first_with_stored_fallback() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/exec").query_param("action", "getStats");
        then.status(200).body(r#"{"success":true}"#);
      })
      .await;

    let live = fixture(cache_config(&server.base_url(), &[]), Some(server.url("/exec")));
    let stats = url(&format!("{}?action=getStats", server.url("/exec")));
    let served = live.handle.fetch(ResourceRequest::get(stats.clone())).await.unwrap();
    assert_eq!(served.from, ServedFrom::Network);
    assert!(live.store.get("test-dynamic-v2", stats.as_str()).unwrap().is_some());

    let endpoint = format!("{}/exec", DEAD);
    let offline = fixture(cache_config(DEAD, &[]), Some(endpoint.clone()));
    let request = ResourceRequest::get(url(&format!("{}?action=getStats", endpoint)));

    let err = offline.handle.fetch(request.clone()).await.unwrap_err();
    assert!(matches!(err, ResourceError::Network { .. }));

    offline
      .store
      .put("test-dynamic-v2", &stored(request.url.as_str(), "last"))
      .unwrap();
    let served = offline.handle.fetch(request).await.unwrap();
    assert_eq!(served.from, ServedFrom::Cache);
    assert_eq!(served.response.body, b"last");
  }

  #[tokio::test]
  async fn test_failed_document_falls_back_to_root() {
    let f = fixture(cache_config(DEAD, &[]), None);
    f.store
      .put("test-static-v2", &stored(&format!("{}/", DEAD), "shell"))
      .unwrap();

    let page = url(&format!("{}/reports", DEAD));
    let served = f.handle.fetch(ResourceRequest::document(page.clone())).await.unwrap();
    assert_eq!(served.response.body, b"shell");

    assert!(f.handle.fetch(ResourceRequest::get(page)).await.is_err());
  }

  #[tokio::test]
  async fn test_messages() {
    let f = fixture(cache_config(DEAD, &[]), None);
    let data = json!({"assets": [{"code": "A1"}]});

    f.handle
      .message(WorkerMessage::CacheInventoryData(data.clone()))
      .await
      .unwrap();
    let reply = f
      .handle
      .message(WorkerMessage::GetCachedData("inventory-data".into()))
      .await
      .unwrap();
    assert_eq!(reply, MessageReply::Data(data));

    let missing = f
      .handle
      .message(WorkerMessage::GetCachedData("nothing".into()))
      .await
      .unwrap_err();
    assert_eq!(missing, ResourceError::NotCached("nothing".into()));

    f.handle.message(WorkerMessage::ClearCache).await.unwrap();
    assert!(f.store.cache_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_slow_fetch_does_not_hold_up_messages() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET).path("/slow.js");
        then.status(200).delay(Duration::from_secs(2)).body("slow");
      })
      .await;

    let f = fixture(cache_config(&server.base_url(), &[]), None);
    let data = json!({"assets": []});
    f.handle
      .message(WorkerMessage::CacheInventoryData(data.clone()))
      .await
      .unwrap();

    let slow = tokio::spawn({
      let handle = f.handle.clone();
      let request = ResourceRequest::get(url(&server.url("/slow.js")));
      async move { handle.fetch(request).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    let reply = f
      .handle
      .message(WorkerMessage::GetCachedData("inventory-data".into()))
      .await
      .unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(reply, MessageReply::Data(data));

    let served = slow.await.unwrap().unwrap();
    assert_eq!(served.response.body, b"slow");
  }

  #[tokio::test]
  async fn test_skip_waiting_activates_installed_worker() {
    let server = MockServer::start_async().await;
    server
      .mock_async(|when, then| {
        when.method(GET);
        then.status(200).body("shell");
      })
      .await;

    let f = fixture(cache_config(&server.base_url(), &["/"]), None);
    f.store.put("test-static-v1", &stored("https://a.example/", "old")).unwrap();
    f.handle.install().await.unwrap();

    let reply = f.handle.message(WorkerMessage::SkipWaiting).await.unwrap();

    assert_eq!(reply, MessageReply::Done);
    assert_eq!(f.handle.state().await.unwrap(), WorkerState::Activated);
    assert_eq!(f.store.cache_names().unwrap(), vec!["test-static-v2"]);
  }

  #[tokio::test]
  async fn test_skip_waiting_before_install_does_nothing() {
    let f = fixture(cache_config(DEAD, &[]), None);
    f.store.put("test-static-v1", &stored("https://a.example/", "old")).unwrap();

    let reply = f.handle.message(WorkerMessage::SkipWaiting).await.unwrap();

    assert_eq!(reply, MessageReply::Done);
    assert_eq!(f.handle.state().await.unwrap(), WorkerState::Parsed);
    assert_eq!(f.store.cache_names().unwrap(), vec!["test-static-v1"]);
  }

  #[tokio::test]
  async fn test_forwards_periodic_sync_to_shell() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let f = fixture_with_shell(cache_config(DEAD, &[]), None, Some(tx));

    f.handle.periodic_sync(crate::sync::PERIODIC_INVENTORY).unwrap();

    assert!(matches!(
      rx.recv().await,
      Some(Event::Sync(SyncTrigger::PeriodicSync(tag))) if tag == "inventory-sync"
    ));
  }

  #[tokio::test]
  async fn test_forwards_sync_and_notifications_to_shell() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let f = fixture_with_shell(cache_config(DEAD, &[]), None, Some(tx));

    f.handle.sync("sync-inventory").unwrap();
    assert!(matches!(
      rx.recv().await,
      Some(Event::Sync(SyncTrigger::BackgroundSync(tag))) if tag == "sync-inventory"
    ));

    f.handle.push(Some(json!({"title": "Hi"}))).unwrap();
    assert!(matches!(rx.recv().await, Some(Event::Notify(n)) if n.title == "Hi"));

    f.handle
      .notification_click(Some("dismiss"), json!({"url": "/a"}))
      .unwrap();
    f.handle
      .notification_click(Some("view"), json!({"url": "/b"}))
      .unwrap();
    assert!(matches!(rx.recv().await, Some(Event::Open(url)) if url == "/b"));
  }
}
