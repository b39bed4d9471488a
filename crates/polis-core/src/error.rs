// ── Core error types ──
//
// User-facing errors from polis-core. These are NOT API-specific --
// consumers never see HTTP status codes or JSON parse failures directly.
// The `From<polis_api::Error>` impl translates transport-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach the data platform: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The store was explicitly disconnected and will not accept work.
    #[error("Store disconnected")]
    StoreDisconnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("Platform error: {message}")]
    Api {
        message: String,
        /// Platform-specific error code (e.g. a SQLSTATE like "23505").
        code: Option<String>,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<polis_api::Error> for CoreError {
    fn from(err: polis_api::Error) -> Self {
        match err {
            polis_api::Error::Authentication { message } => Self::AuthenticationFailed { message },
            polis_api::Error::Transport(e) => Self::ConnectionFailed {
                reason: e.to_string(),
            },
            polis_api::Error::InvalidUrl(e) => Self::Config {
                message: e.to_string(),
            },
            polis_api::Error::Tls(reason) | polis_api::Error::FeedConnect(reason) => {
                Self::ConnectionFailed { reason }
            }
            polis_api::Error::Api {
                message,
                code,
                status,
            } => Self::Api {
                message,
                code,
                status: Some(status),
            },
            polis_api::Error::Deserialization { message, .. } => Self::Internal(message),
        }
    }
}
