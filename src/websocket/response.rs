//! The WebSocket response contract.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{error::Error, error::Result, websocket::Message};

/// A live bidirectional message stream created by one WebSocket request.
///
/// The producer side closes the incoming channel exactly once; `recv`
/// drains buffered messages afterwards and then yields `None`. `close` is
/// idempotent and joins the response's reader before returning.
#[async_trait]
pub trait RawResponse: Send + Sync + std::fmt::Debug {
    /// Send an outgoing message.
    async fn send(&self, message: Message) -> Result<()>;

    /// Receive the next incoming message; `None` once the stream has ended
    /// and the buffer is drained.
    async fn recv(&self) -> Option<Message>;

    /// Token cancelled when the response is closed (by either side).
    fn closed(&self) -> CancellationToken;

    /// Terminal error of the underlying read loop, available after the
    /// incoming channel has drained.
    fn err(&self) -> Option<Arc<Error>>;

    /// Close the response and join its reader.
    async fn close(&self);
}

/// A shared, type-erased response.
pub type BoxRawResponse = Arc<dyn RawResponse>;
