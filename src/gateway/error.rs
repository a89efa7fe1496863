//! Failure taxonomy for backend calls.

use thiserror::Error;

/// Error returned by the request gateway and the typed client built on it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
  /// No backend endpoint is configured. Never retried.
  #[error("no backend endpoint configured")]
  Config,

  /// Neither transport could reach the backend.
  #[error("backend unreachable: {0}")]
  Transport(String),

  /// The backend was reached but its answer could not be used.
  #[error("unusable response from backend: {0}")]
  Protocol(String),

  /// The backend reported `success: false`.
  #[error("{0}")]
  Backend(String),

  /// The backend reported the asset as already processed this period.
  #[error("{0}")]
  Duplicate(String),

  /// A read failed and no snapshot exists to fall back on.
  #[error("no cached data for {key} ({cause})")]
  CacheMiss { key: String, cause: String },

  /// Local persistence failed while handling the call.
  #[error("local storage failure: {0}")]
  Storage(String),
}

impl GatewayError {
  /// True when the failure means the network is absent rather than the
  /// backend disagreeing with us.
  pub fn is_connectivity(&self) -> bool {
    matches!(self, Self::Transport(_))
  }

  /// True when no later queued action could be delivered either.
  pub fn halts_replay(&self) -> bool {
    matches!(self, Self::Config | Self::Transport(_) | Self::Storage(_))
  }

  pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
    Self::Storage(err.to_string())
  }
}
