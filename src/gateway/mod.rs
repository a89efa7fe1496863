//! Request gateway to the spreadsheet-backed RPC endpoint.

pub mod cache;
pub mod cached_client;
pub mod client;
pub mod error;
pub mod request;
pub mod response;

pub use cached_client::{InventoryClient, MutationOutcome};
pub use client::Gateway;
pub use error::GatewayError;
pub use request::{Condition, InventoryUpdate, Payload, Request};
pub use response::{Asset, AssetLookup, QrEntry, Stats};
