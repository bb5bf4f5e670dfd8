// xpkit-core: Stateful WebSocket client core for the X-Plane Web API.
//
// Connection lifecycle, request correlation, monitoring subscriptions,
// and callback dispatch over the wire layer provided by xpkit-api.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod request;

mod monitor;
mod registry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::{ConnectionState, XplaneClient};
pub use config::{ClientConfig, ReconnectConfig};
pub use dispatch::{ClientEvent, EventKind};
pub use error::CoreError;
pub use model::{Command, Dataref, DatarefValue, MonitorState};
pub use request::RequestHandle;

// Re-export the endpoint type consumers need to build a config.
pub use xpkit_api::ApiEndpoint;
