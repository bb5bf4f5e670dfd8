// ── API endpoint addressing ──
//
// The simulator serves REST and WebSocket from the same host/port under
// a common root path (`/api/<version>`). Both URL builders live here so
// the two transports can never drift apart.

use url::Url;

use crate::error::Error;

/// Network address of an X-Plane Web API instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiEndpoint {
    /// Simulator host (e.g. `127.0.0.1`, or discovered via beacon).
    pub host: String,
    /// Web API port (default 8086).
    pub port: u16,
    /// API root path, always with a leading slash.
    pub root: String,
    /// API version segment (`v1`, `v2`, ...).
    pub version: String,
}

impl Default for ApiEndpoint {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8086,
            root: "/api".into(),
            version: "v2".into(),
        }
    }
}

impl ApiEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    fn url(&self, scheme: &str, version: &str) -> Result<Url, Error> {
        Url::parse(&format!(
            "{scheme}://{}:{}{}/{version}",
            self.host, self.port, self.root
        ))
        .map_err(Error::from)
    }

    /// Base URL for the REST API (`http://host:port/api/v2`).
    pub fn rest_url(&self) -> Result<Url, Error> {
        self.url("http", &self.version)
    }

    /// Base URL for a specific REST API version.
    pub fn rest_url_for(&self, version: &str) -> Result<Url, Error> {
        self.url("http", version)
    }

    /// URL for the WebSocket API (`ws://host:port/api/v2`).
    pub fn ws_url(&self) -> Result<Url, Error> {
        self.url("ws", &self.version)
    }

    /// Version-independent capabilities URL (`http://host:port/api/capabilities`).
    pub fn capabilities_url(&self) -> Result<Url, Error> {
        Url::parse(&format!(
            "http://{}:{}{}/capabilities",
            self.host, self.port, self.root
        ))
        .map_err(Error::from)
    }
}
