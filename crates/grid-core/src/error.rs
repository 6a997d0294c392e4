//! Typed error definitions for exchange connectivity.
//!
//! Provides [`GridError`], returned by every signer, REST client, stream
//! session and adapter operation. Callers classify failures by variant:
//! transport errors are transient and retried by the owning loop, API errors
//! carry the exchange's own code and message, and config errors are fatal at
//! construction time.

use thiserror::Error;

/// Result alias used across the exchange-facing crates.
pub type GridResult<T> = Result<T, GridError>;

/// Errors produced while talking to an exchange.
#[derive(Debug, Clone, Error)]
pub enum GridError {
    /// Missing credentials or an invalid configuration value.
    #[error("config error: {0}")]
    Config(String),

    /// DNS failure, refused connection, timeout or reset.
    #[error("transport error: {0}")]
    Transport(String),

    /// Business-level failure reported inside the exchange's response envelope.
    #[error("exchange error {code}: {message}")]
    Api { code: String, message: String },

    /// The exchange does not know the requested order.
    #[error("order not found: {0}")]
    OrderNotFound(String),

    /// A response body or stream frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// WebSocket handshake or framing error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// A stream was started while a previous session is still running.
    #[error("stream already running: {0}")]
    StreamAlreadyRunning(String),

    /// The venue does not offer the requested capability.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl GridError {
    /// Build an [`GridError::Api`] from any displayable code.
    pub fn api(code: impl ToString, message: impl Into<String>) -> Self {
        Self::Api { code: code.to_string(), message: message.into() }
    }

    /// `true` for failures worth retrying after a backoff.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::WebSocket(_))
    }

    /// `true` when the exchange reported the order as unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::OrderNotFound(_))
    }
}

impl From<serde_json::Error> for GridError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        assert!(GridError::Transport("timeout".into()).is_transport());
        assert!(GridError::WebSocket("reset".into()).is_transport());
        assert!(!GridError::api(2005, "balance insufficient").is_transport());
        assert!(GridError::OrderNotFound("42".into()).is_not_found());
    }

    #[test]
    fn api_error_display_keeps_exchange_message() {
        let err = GridError::api("40768", "Order does not exist");
        assert_eq!(err.to_string(), "exchange error 40768: Order does not exist");
    }
}
