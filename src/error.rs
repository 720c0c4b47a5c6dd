//! Crate-level error types.
//!
//! [`TradeBotError`] unifies every error source (configuration, WebSocket,
//! exchange, store, condition expressions) behind a single enum so callers
//! can match on the variant they care about while still using `?`.

use crate::condition::expr::ExpressionError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TradeBotError>;

/// Top-level error type returned by all public APIs.
#[derive(Debug, thiserror::Error)]
pub enum TradeBotError {
    /// Required configuration is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A WebSocket operation (accept, send, receive) failed.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An HTTP request to the exchange failed.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A filesystem or socket operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The balance/session store could not be read or written.
    #[error("store error: {0}")]
    Store(String),

    /// The exchange answered but reported a failure.
    #[error("exchange error: {0}")]
    Exchange(String),

    /// A condition expression could not be parsed or evaluated.
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// The requested command is not in the condition registry.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A watch session could not be created or continued.
    #[error("session error: {0}")]
    Session(String),

    /// The broadcast hub actor is no longer running.
    #[error("broadcast hub is closed")]
    HubClosed,
}
