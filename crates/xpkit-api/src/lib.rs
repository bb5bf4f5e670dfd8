// xpkit-api: Async Rust client for the X-Plane Web API (REST + WebSocket + legacy UDP)

pub mod beacon;
pub mod endpoint;
pub mod error;
pub mod meta;
pub mod rest;
pub mod transport;
pub mod udp;
pub mod wire;

pub use endpoint::ApiEndpoint;
pub use error::Error;
pub use meta::{CommandMeta, DatarefMeta, DatarefType};
pub use rest::RestClient;
