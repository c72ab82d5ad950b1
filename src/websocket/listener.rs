//! Message handlers and bounded collection helpers.

use tokio_util::sync::CancellationToken;

use crate::{
    client::Client,
    error::Result,
    websocket::{BoxRawResponse, Message, WsRequest},
};

/// A message consumer; returning `false` stops the listening loop.
pub trait Handler<T>: Send {
    fn handle(&mut self, message: T) -> bool;
}

/// Adapter turning a closure into a [`Handler`].
pub struct HandlerFn<F>(pub F);

impl<T, F> Handler<T> for HandlerFn<F>
where
    F: FnMut(T) -> bool + Send,
{
    fn handle(&mut self, message: T) -> bool {
        (self.0)(message)
    }
}

/// Compose handlers into one that stops at the first refusal.
pub fn chain<T: Clone + 'static>(mut handlers: Vec<Box<dyn Handler<T>>>) -> impl Handler<T> {
    HandlerFn(move |message: T| {
        for handler in handlers.iter_mut() {
            if !handler.handle(message.clone()) {
                return false;
            }
        }
        true
    })
}

/// Collects messages into a vector, refusing further messages once
/// `max_size` is reached (0 = unbounded).
pub struct SliceListener<T> {
    pub messages: Vec<T>,
    max_size: usize,
}

impl<T> SliceListener<T> {
    pub fn new(max_size: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_size,
        }
    }
}

impl<T: Send> Handler<T> for SliceListener<T> {
    fn handle(&mut self, message: T) -> bool {
        self.messages.push(message);
        self.max_size == 0 || self.messages.len() < self.max_size
    }
}

/// Issue one request and collect up to `max_size` raw messages, honoring
/// `token`. The response is closed before returning.
pub async fn listen_slice(
    token: &CancellationToken,
    client: &dyn Client<WsRequest, BoxRawResponse>,
    request: WsRequest,
    max_size: usize,
) -> Result<Vec<Message>> {
    let response = client.request(request).await?;

    let mut listener = SliceListener::new(max_size);
    loop {
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = response.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        if !listener.handle(message) {
            break;
        }
    }

    response.close().await;
    Ok(listener.messages)
}
