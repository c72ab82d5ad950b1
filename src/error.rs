//! Error handling for the client stack.

use std::time::Duration;

use thiserror::Error;

/// The result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared by every layer of a client stack.
///
/// Layers are transparent to errors they do not own: a pool or rate limiter
/// forwards whatever the inner client produced, while the circuit breaker
/// swallows intermediate errors across retries and the status-code decorator
/// synthesizes [`Error::InvalidStatus`].
#[derive(Error, Debug)]
pub enum Error {
    /// The governing cancellation token fired, or the client was closed.
    #[error("request cancelled")]
    Cancelled,

    /// The client (or response) was closed and can no longer be used.
    #[error("closed")]
    Closed,

    /// HTTP transport error from the underlying client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error.
    #[error("websocket error: {message}")]
    WebSocket { message: String },

    /// A response carried a status code configured to be treated as an error.
    #[error("invalid status code {status}")]
    InvalidStatus { status: u16 },

    /// The retry limit of a circuit breaker was exhausted.
    #[error("max retries limit reached {limit}, last error: {source}")]
    RetriesExhausted {
        limit: u32,
        #[source]
        source: Box<Error>,
    },

    /// The mock ran out of scripted side effects.
    #[error("no side effects left")]
    NoSideEffects,

    /// A JSON payload failed to decode.
    #[error(transparent)]
    Parse(#[from] crate::codec::ParseError),

    /// A body value failed to serialize.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stack assembly error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// An operation exceeded its deadline.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket {
            message: e.to_string(),
        }
    }
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a WebSocket error.
    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(duration: Duration) -> Self {
        Self::Timeout { duration }
    }

    /// Create an invalid-status error.
    pub fn invalid_status(status: u16) -> Self {
        Self::InvalidStatus { status }
    }

    /// Wrap the last error of an exhausted retry loop.
    pub fn retries_exhausted(limit: u32, last: Error) -> Self {
        Self::RetriesExhausted {
            limit,
            source: Box::new(last),
        }
    }

    /// True for cancellation-class errors, which are never retried.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Closed)
    }
}
