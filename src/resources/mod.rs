//! Offline cache for HTTP resources: the app shell, third-party libraries and
//! backend answers.
//!
//! Responses live in versioned, named partitions (`<prefix>-static-v<N>` and
//! `<prefix>-dynamic-v<N>`). The static partition is filled at install time
//! from a manifest and served cache-first. Backend answers are network-first
//! with the last good response kept for offline use. Everything else is
//! cache-first into the dynamic partition, which is bounded and evicts its
//! oldest entries.

pub mod notify;
pub mod policy;
pub mod store;
pub mod worker;

pub use notify::Notification;
pub use policy::ResourceRequest;
pub use store::ResourceStore;
pub use worker::{
  MessageReply, ResourceError, ResourceWorker, ServedFrom, WorkerConfig, WorkerHandle,
  WorkerMessage,
};
