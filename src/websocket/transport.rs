//! The WebSocket transport leaf over `tokio-tungstenite`.
//!
//! `request` dials synchronously (racing both cancellation tokens) and, on
//! success, spawns one reader task per response. The reader decodes frames
//! onto a bounded channel until a clean close, a transient network error,
//! or cancellation; any other error is recorded as the response's terminal
//! error, surfaced as a final error message, and ends the reader.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use http::HeaderValue;
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self, client::IntoClientRequest, error::ProtocolError, protocol::Message as Frame,
    },
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    client::{leaf_option, BoxClient, Cancel, Client, ClientOpt, Config},
    error::{Error, Result},
    options::{apply, Opt},
    task::WorkerSet,
    websocket::{BoxRawResponse, Message, RawResponse, WsRequest},
};

/// Default handshake origin.
pub const DEFAULT_ORIGIN: &str = "http://localhost";

/// Default per-response incoming buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 128;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Options of the WebSocket leaf; per-request values override them.
#[derive(Clone, Debug)]
pub struct WsOptions {
    pub protocol: String,
    pub origin: String,
    pub send_timeout: Option<Duration>,
    pub receive_timeout: Option<Duration>,
    pub buffer_size: usize,
}

impl Default for WsOptions {
    fn default() -> Self {
        Self {
            protocol: String::new(),
            origin: DEFAULT_ORIGIN.to_string(),
            send_timeout: None,
            receive_timeout: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Transport option installing the WebSocket leaf. Must be the first layer
/// of a stack.
pub fn transport(opts: Vec<Opt<WsOptions>>) -> ClientOpt<WsRequest, BoxRawResponse> {
    leaf_option("websocket transport", move || {
        Arc::new(WsConfig {
            options: apply(opts),
        })
    })
}

/// Set the default subprotocol.
pub fn with_protocol(protocol: impl Into<String>) -> Opt<WsOptions> {
    let protocol = protocol.into();
    Opt::new(move |mut options: WsOptions| {
        options.protocol = protocol;
        options
    })
}

/// Set the default handshake origin.
pub fn with_origin(origin: impl Into<String>) -> Opt<WsOptions> {
    let origin = origin.into();
    Opt::new(move |mut options: WsOptions| {
        options.origin = origin;
        options
    })
}

/// Bound each outgoing send by `timeout`.
pub fn with_send_timeout(timeout: Duration) -> Opt<WsOptions> {
    Opt::new(move |mut options: WsOptions| {
        options.send_timeout = Some(timeout);
        options
    })
}

/// Bound each frame read by `timeout`.
pub fn with_receive_timeout(timeout: Duration) -> Opt<WsOptions> {
    Opt::new(move |mut options: WsOptions| {
        options.receive_timeout = Some(timeout);
        options
    })
}

/// Set the default per-response buffer size.
pub fn with_buffer_size(size: usize) -> Opt<WsOptions> {
    Opt::new(move |mut options: WsOptions| {
        options.buffer_size = size;
        options
    })
}

struct WsConfig {
    options: WsOptions,
}

#[async_trait]
impl Config<WsRequest, BoxRawResponse> for WsConfig {
    async fn create(&self, shutdown: CancellationToken) -> Result<BoxClient<WsRequest, BoxRawResponse>> {
        Ok(Arc::new(WsClient {
            token: shutdown.child_token(),
            options: self.options.clone(),
            tasks: WorkerSet::new(),
        }))
    }
}

struct WsClient {
    token: CancellationToken,
    options: WsOptions,
    tasks: WorkerSet,
}

#[async_trait]
impl Client<WsRequest, BoxRawResponse> for WsClient {
    async fn request(&self, request: WsRequest) -> Result<BoxRawResponse> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let req_token = request.cancel_token();

        let url = request
            .url
            .as_ref()
            .ok_or_else(|| Error::config("websocket request has no url"))?;
        let protocol = if request.protocol.is_empty() {
            self.options.protocol.clone()
        } else {
            request.protocol.clone()
        };
        let origin = if request.origin.is_empty() {
            self.options.origin.clone()
        } else {
            request.origin.clone()
        };
        let receive_timeout = request.receive_timeout.or(self.options.receive_timeout);
        let buffer_size = match request.buffer_size {
            0 => self.options.buffer_size.max(1),
            n => n,
        };

        let mut handshake = url.as_str().into_client_request()?;
        {
            let headers = handshake.headers_mut();
            for (name, value) in request.headers.iter() {
                headers.insert(name, value.clone());
            }
            if !origin.is_empty() {
                let value = HeaderValue::from_str(&origin)
                    .map_err(|_| Error::config(format!("invalid origin {origin:?}")))?;
                headers.insert(http::header::ORIGIN, value);
            }
            if !protocol.is_empty() {
                let value = HeaderValue::from_str(&protocol)
                    .map_err(|_| Error::config(format!("invalid subprotocol {protocol:?}")))?;
                headers.insert(http::header::SEC_WEBSOCKET_PROTOCOL, value);
            }
        }

        debug!(url = %url, "dialing websocket");
        let (stream, _response) = tokio::select! {
            _ = self.token.cancelled() => return Err(Error::Cancelled),
            _ = req_token.cancelled() => return Err(Error::Cancelled),
            connected = connect_async(handshake) => connected?,
        };

        let (write, read) = stream.split();
        let token = req_token.child_token();
        let done = CancellationToken::new();
        let err = Arc::new(parking_lot::Mutex::new(None));
        let (messages_tx, messages_rx) = mpsc::channel(buffer_size);

        let response = Arc::new(NetResponse {
            token: token.clone(),
            done: done.clone(),
            send_timeout: self.options.send_timeout,
            write: tokio::sync::Mutex::new(write),
            messages: tokio::sync::Mutex::new(messages_rx),
            err: Arc::clone(&err),
        });

        let client_token = self.token.clone();
        self.tasks
            .spawn(async move {
                run_reader(client_token, token, read, messages_tx, receive_timeout, err).await;
                done.cancel();
            })
            .await;

        Ok(response)
    }

    async fn close(&self) {
        self.token.cancel();
        self.tasks.join().await;
    }
}

impl std::fmt::Debug for NetResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetResponse").finish_non_exhaustive()
    }
}

struct NetResponse {
    token: CancellationToken,
    done: CancellationToken,
    send_timeout: Option<Duration>,
    write: tokio::sync::Mutex<SplitSink<WsStream, Frame>>,
    messages: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    err: Arc<parking_lot::Mutex<Option<Arc<Error>>>>,
}

#[async_trait]
impl RawResponse for NetResponse {
    async fn send(&self, message: Message) -> Result<()> {
        let frame = match message {
            Message::Text(text) => Frame::Text(text.into()),
            Message::Bytes(payload) => Frame::Binary(payload),
            Message::Error(_) => {
                return Err(Error::websocket("cannot send an error message"));
            }
        };

        let mut write = self.write.lock().await;
        match self.send_timeout {
            Some(timeout) => tokio::time::timeout(timeout, write.send(frame))
                .await
                .map_err(|_| Error::timeout(timeout))??,
            None => write.send(frame).await?,
        }

        Ok(())
    }

    async fn recv(&self) -> Option<Message> {
        self.messages.lock().await.recv().await
    }

    fn closed(&self) -> CancellationToken {
        self.token.clone()
    }

    fn err(&self) -> Option<Arc<Error>> {
        self.err.lock().clone()
    }

    async fn close(&self) {
        self.token.cancel();
        self.done.cancelled().await;
    }
}

enum ReadEvent {
    Message(Message),
    Eof,
    Timeout(Duration),
    Terminal(Error),
}

async fn run_reader(
    client_token: CancellationToken,
    token: CancellationToken,
    mut read: SplitStream<WsStream>,
    messages: mpsc::Sender<Message>,
    receive_timeout: Option<Duration>,
    err: Arc<parking_lot::Mutex<Option<Arc<Error>>>>,
) {
    loop {
        let event = tokio::select! {
            _ = client_token.cancelled() => break,
            _ = token.cancelled() => break,
            event = next_frame(&mut read, receive_timeout) => event,
        };

        match event {
            ReadEvent::Message(message) => {
                let delivered = tokio::select! {
                    _ = token.cancelled() => false,
                    sent = messages.send(message) => sent.is_ok(),
                };
                if !delivered {
                    break;
                }
            }
            ReadEvent::Eof => break,
            ReadEvent::Timeout(timeout) => {
                *err.lock() = Some(Arc::new(Error::timeout(timeout)));
                break;
            }
            ReadEvent::Terminal(error) => {
                warn!(error = %error, "websocket read failed");
                let error = Arc::new(error);
                *err.lock() = Some(Arc::clone(&error));
                let _ = messages.try_send(Message::Error(error));
                break;
            }
        }
    }

    token.cancel();
    debug!("websocket reader stopped");
}

async fn next_frame(read: &mut SplitStream<WsStream>, receive_timeout: Option<Duration>) -> ReadEvent {
    loop {
        let frame = match receive_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, read.next()).await {
                Ok(frame) => frame,
                Err(_) => return ReadEvent::Timeout(timeout),
            },
            None => read.next().await,
        };

        return match frame {
            None => ReadEvent::Eof,
            Some(Ok(Frame::Binary(payload))) => {
                ReadEvent::Message(Message::Bytes(Bytes::from(payload)))
            }
            Some(Ok(Frame::Text(text))) => ReadEvent::Message(Message::text(text.as_str())),
            Some(Ok(Frame::Close(_))) => ReadEvent::Eof,
            // Control frames are not application messages.
            Some(Ok(_)) => continue,
            Some(Err(error)) => match error {
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed
                | tungstenite::Error::Io(_)
                | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                    ReadEvent::Eof
                }
                error => ReadEvent::Terminal(error.into()),
            },
        };
    }
}
