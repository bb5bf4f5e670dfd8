use thiserror::Error;

/// Top-level error type for the `xpkit-api` crate.
///
/// Covers every failure mode across all transport surfaces: REST,
/// WebSocket, beacon discovery, and the legacy UDP protocol.
/// `xpkit-core` maps these into consumer-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Socket-level I/O error (UDP beacon/legacy protocol).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── REST API ────────────────────────────────────────────────────
    /// Non-success status from the REST API.
    #[error("REST API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// The simulator exposes no usable API version.
    #[error("No supported API version advertised: {0}")]
    NoApiVersion(String),

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    // ── Beacon / UDP ────────────────────────────────────────────────
    /// Malformed or foreign beacon packet.
    #[error("Beacon error: {0}")]
    Beacon(String),

    /// Malformed legacy UDP datagram.
    #[error("UDP protocol error: {0}")]
    UdpProtocol(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Outbound frame could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::Io(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}
