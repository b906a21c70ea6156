//! Caller-facing error type.
//!
//! Only usage and validation failures are surfaced as `Err` values. Transport,
//! protocol, and server-side failures are delivered as [`Message`] variants
//! (`ConnectionFailed`, `Error`, `Close`) because the connection engine
//! recovers from them on its own; a `Result` would suggest the caller should.
//!
//! [`Message`]: crate::rpc::Message

use thiserror::Error;

/// Shared result type.
pub type Result<T> = std::result::Result<T, DiscordError>;

/// Errors returned by [`DiscordClient`](crate::DiscordClient) operations.
#[derive(Debug, Error)]
pub enum DiscordError {
    /// Operation requires [`initialize`](crate::DiscordClient::initialize) first.
    #[error("client is not initialized")]
    NotInitialized,

    /// The client was already initialized.
    #[error("client is already initialized")]
    AlreadyInitialized,

    /// The client has been disposed and cannot be reused.
    #[error("client is disposed")]
    Disposed,

    /// Graceful shutdown has started; no further commands are accepted.
    #[error("connection is shutting down")]
    ShuttingDown,

    /// Event subscriptions require a registered URI scheme.
    #[error("no URI scheme registered for this application")]
    SchemeNotRegistered,

    /// The presence failed validation before it was enqueued.
    #[error("invalid presence: {0}")]
    InvalidPresence(String),

    /// [`invoke`](crate::DiscordClient::invoke) is only valid in manual
    /// delivery mode; auto mode dispatches on the worker thread.
    #[error("invoke() is forbidden in auto-events mode")]
    ManualInvokeInAutoMode,

    /// The client was constructed with an unusable option combination.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
}
