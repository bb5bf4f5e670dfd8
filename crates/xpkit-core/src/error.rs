// ── Core error types ──
//
// Consumer-facing errors from xpkit-core. These are NOT wire-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<xpkit_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Not connected to the simulator")]
    NotConnected,

    #[error("Cannot connect to simulator: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection to simulator lost")]
    ConnectionLost,

    #[error("Operation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Request errors (server-reported, per request id) ─────────────
    #[error("Request rejected by simulator: {message}")]
    Request {
        message: String,
        code: Option<String>,
    },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Dataref not found: {path}")]
    UnknownDataref { path: String },

    #[error("Command not found: {path}")]
    UnknownCommand { path: String },

    #[error("Dataref is not writable: {path}")]
    NotWritable { path: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<xpkit_api::Error> for CoreError {
    fn from(err: xpkit_api::Error) -> Self {
        match err {
            xpkit_api::Error::Transport(ref e) if e.is_connect() => CoreError::ConnectionFailed {
                reason: e.to_string(),
            },
            xpkit_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            xpkit_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed { reason },
            xpkit_api::Error::NoApiVersion(detail) => CoreError::ConnectionFailed {
                reason: format!("no supported API version: {detail}"),
            },
            other => CoreError::Api {
                message: other.to_string(),
            },
        }
    }
}
