use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::error::GatewayError;
use super::request::{query_value, Payload, Request};
use super::response::check_envelope;
use crate::queue::OfflineQueue;
use crate::settings::{Settings, SettingsStore};

/// Outcome of a gateway call.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  /// Backend body, or a synthesized optimistic body when queued.
  pub body: Value,
  /// True when the call was deferred to the offline queue.
  pub offline: bool,
  /// Queue id of the deferred action.
  pub pending_id: Option<i64>,
}

impl Response {
  fn delivered(body: Value) -> Self {
    Self {
      body,
      offline: false,
      pending_id: None,
    }
  }

  fn queued(id: i64) -> Self {
    Self {
      body: json!({ "success": true, "offline": true, "pendingId": id }),
      offline: true,
      pending_id: Some(id),
    }
  }
}

/// How a single transport attempt turned out.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseClass {
  /// Successful status with a JSON body.
  Usable(Value),
  /// Successful status but the body cannot be inspected as JSON.
  Opaque(String),
  /// Non-success HTTP status.
  Status(u16),
  /// The request never got an answer.
  Unreachable(String),
}

impl ResponseClass {
  /// Classify an answered request from its status and body.
  pub fn from_parts(status: StatusCode, body: &[u8]) -> Self {
    if !status.is_success() {
      return Self::Status(status.as_u16());
    }
    if body.iter().all(u8::is_ascii_whitespace) {
      return Self::Opaque("empty body".to_string());
    }
    match serde_json::from_slice::<Value>(body) {
      Ok(value @ Value::Object(_)) => Self::Usable(value),
      Ok(_) => Self::Opaque("body is not a JSON object".to_string()),
      Err(e) => Self::Opaque(format!("body is not JSON: {}", e)),
    }
  }

  fn from_error(err: reqwest::Error) -> Self {
    if err.is_connect() || err.is_timeout() || err.is_request() {
      Self::Unreachable(err.to_string())
    } else {
      Self::Opaque(err.to_string())
    }
  }

  fn describe(&self) -> String {
    match self {
      Self::Usable(_) => "usable".to_string(),
      Self::Opaque(reason) => format!("opaque response ({})", reason),
      Self::Status(code) => format!("HTTP {}", code),
      Self::Unreachable(reason) => reason.clone(),
    }
  }
}

/// Single entry point for every backend call.
///
/// Tries a JSON `POST` first and falls back once to a `GET` with the payload
/// in the query string. When neither reaches the backend, mutations are
/// handed to the offline queue and reported as optimistic successes.
#[derive(Clone)]
pub struct Gateway {
  http: reqwest::Client,
  settings: SettingsStore,
  queue: OfflineQueue,
}

impl Gateway {
  pub fn new(
    settings: SettingsStore,
    queue: OfflineQueue,
    timeout: Duration,
  ) -> Result<Self, GatewayError> {
    let http = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| GatewayError::Protocol(format!("failed to build HTTP client: {}", e)))?;

    Ok(Self {
      http,
      settings,
      queue,
    })
  }

  pub fn queue(&self) -> &OfflineQueue {
    &self.queue
  }

  /// Call the backend, queueing mutations when it cannot be reached.
  pub async fn call(&self, request: &Request) -> Result<Response, GatewayError> {
    let settings = self.current_settings()?;
    let endpoint = settings.endpoint().ok_or(GatewayError::Config)?;
    let payload = annotate(request.payload(), &settings);

    match self.send(endpoint, request.action(), &payload).await {
      Ok(body) => Ok(Response::delivered(body)),
      Err(err) if err.is_connectivity() && request.is_mutation() => {
        let pending = self
          .queue
          .enqueue(request.action(), payload, request.target())
          .map_err(GatewayError::storage)?;
        warn!(
          action = request.action(),
          pending_id = pending.id,
          "backend unreachable, action queued"
        );
        Ok(Response::queued(pending.id))
      }
      Err(err) => Err(err),
    }
  }

  /// Deliver an already-annotated action without ever queueing it.
  pub async fn deliver(&self, action: &str, payload: &Payload) -> Result<Value, GatewayError> {
    let settings = self.current_settings()?;
    let endpoint = settings.endpoint().ok_or(GatewayError::Config)?;
    self.send(endpoint, action, payload).await
  }

  fn current_settings(&self) -> Result<Settings, GatewayError> {
    self.settings.load().map_err(GatewayError::storage)
  }

  async fn send(&self, endpoint: &str, action: &str, payload: &Payload) -> Result<Value, GatewayError> {
    let primary = self.post(endpoint, action, payload).await;

    let body = match primary {
      ResponseClass::Usable(body) => body,
      primary => {
        debug!(action, primary = %primary.describe(), "primary transport unusable, trying query transport");
        match self.get(endpoint, action, payload).await? {
          ResponseClass::Usable(body) => body,
          ResponseClass::Unreachable(reason) if matches!(primary, ResponseClass::Unreachable(_)) => {
            return Err(GatewayError::Transport(reason));
          }
          fallback => {
            return Err(GatewayError::Protocol(format!(
              "primary: {}; fallback: {}",
              primary.describe(),
              fallback.describe()
            )));
          }
        }
      }
    };

    check_envelope(&body)?;
    Ok(body)
  }

  async fn post(&self, endpoint: &str, action: &str, payload: &Payload) -> ResponseClass {
    let mut body = Payload::new();
    body.insert("action".into(), action.into());
    body.extend(payload.iter().map(|(k, v)| (k.clone(), v.clone())));

    let result = self.http.post(endpoint).json(&body).send().await;
    read_class(result).await
  }

  async fn get(
    &self,
    endpoint: &str,
    action: &str,
    payload: &Payload,
  ) -> Result<ResponseClass, GatewayError> {
    let url = query_url(endpoint, action, payload)?;
    let result = self.http.get(url).send().await;
    Ok(read_class(result).await)
  }
}

async fn read_class(result: reqwest::Result<reqwest::Response>) -> ResponseClass {
  let response = match result {
    Ok(r) => r,
    Err(e) => return ResponseClass::from_error(e),
  };
  let status = response.status();
  match response.bytes().await {
    Ok(bytes) => ResponseClass::from_parts(status, &bytes),
    Err(e) => ResponseClass::from_error(e),
  }
}

/// Build the fallback URL: `endpoint?action=..&key=value..`.
pub fn query_url(endpoint: &str, action: &str, payload: &Payload) -> Result<url::Url, GatewayError> {
  let mut url = url::Url::parse(endpoint)
    .map_err(|e| GatewayError::Protocol(format!("invalid endpoint '{}': {}", endpoint, e)))?;
  {
    let mut pairs = url.query_pairs_mut();
    pairs.append_pair("action", action);
    for (key, value) in payload {
      pairs.append_pair(key, &query_value(value));
    }
  }
  Ok(url)
}

/// Add the current user's identity to an outbound payload.
///
/// Keys already present in the payload win.
fn annotate(mut payload: Payload, settings: &Settings) -> Payload {
  let profile = &settings.profile;
  let identity = [
    ("user", profile.display_name()),
    ("email", profile.email.as_str()),
    ("department", profile.department.as_str()),
  ];
  for (key, value) in identity {
    payload
      .entry(key.to_string())
      .or_insert_with(|| Value::from(value));
  }
  payload
}
