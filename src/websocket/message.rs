//! WebSocket message values.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::Error;

/// An immutable message: a byte payload, a UTF-8 text payload, or an error
/// carried in-band on the message stream.
#[derive(Clone, Debug)]
pub enum Message {
    Bytes(Bytes),
    Text(String),
    Error(Arc<Error>),
}

impl Message {
    /// A binary message.
    pub fn bytes(payload: impl Into<Bytes>) -> Self {
        Self::Bytes(payload.into())
    }

    /// A text message.
    pub fn text(payload: impl Into<String>) -> Self {
        Self::Text(payload.into())
    }

    /// An error message.
    pub fn error(error: Error) -> Self {
        Self::Error(Arc::new(error))
    }

    /// An error message from a plain reason string.
    pub fn error_reason(reason: impl Into<String>) -> Self {
        Self::error(Error::websocket(reason))
    }

    /// The message payload; empty for error messages.
    pub fn buff(&self) -> Bytes {
        match self {
            Self::Bytes(payload) => payload.clone(),
            Self::Text(payload) => Bytes::copy_from_slice(payload.as_bytes()),
            Self::Error(_) => Bytes::new(),
        }
    }

    /// The carried error, if this is an error message.
    pub fn err(&self) -> Option<&Error> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Error(a), Self::Error(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}
