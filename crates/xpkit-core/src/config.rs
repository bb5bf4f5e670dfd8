// ── Runtime connection configuration ──
//
// These types describe *how* to reach a simulator instance. They are
// built by the consumer (possibly from beacon discovery) and handed in;
// core never reads config files.

use std::time::Duration;

use xpkit_api::ApiEndpoint;

/// Exponential backoff configuration for connection retries.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,

    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_retries: None,
        }
    }
}

/// Configuration for a single client instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Where the simulator's Web API lives (default 127.0.0.1:8086).
    pub endpoint: ApiEndpoint,
    /// Route writes and command activations through REST instead of the
    /// WebSocket.
    pub use_rest: bool,
    /// Timeout for REST requests.
    pub request_timeout: Duration,
    /// Connection retry policy.
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: ApiEndpoint::default(),
            use_rest: false,
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Config for a simulator at a specific host and port.
    pub fn for_host(host: impl Into<String>, port: u16) -> Self {
        Self {
            endpoint: ApiEndpoint::new(host, port),
            ..Self::default()
        }
    }
}
