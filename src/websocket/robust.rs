//! The robust WebSocket layer: one logical response over transient
//! physical connections.
//!
//! Each logical request starts three workers plus a helper:
//!
//! 1. a **producer** running the connect/live state machine, publishing
//!    every live physical response onto two single-slot pipes;
//! 2. an **incoming forwarder** draining each physical response into the
//!    logical incoming channel, in publication order;
//! 3. an **outgoing forwarder** sending queued messages on the current
//!    physical response, recycling it on failure, with a helper task that
//!    keeps the "current physical" cell up to date.
//!
//! The logical response stays open across disconnects and periodic
//! refreshes; only closing it (or cancelling one of the governing tokens)
//! ends the stream.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, watch},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::{middleware_option, BoxClient, BoxConfig, Cancel, Client, ClientOpt, Config},
    error::{Error, Result},
    options::{apply, Opt},
    task::WorkerSet,
    timer::{Jitter, Ticker},
    websocket::{BoxRawResponse, Message, RawResponse, WsRequest},
};

/// Robust-layer knobs.
#[derive(Clone, Copy, Debug, Default)]
pub struct RobustOptions {
    /// Periodic refresh of the underlying connection; a zero period
    /// disables it.
    pub auto_refresh: Ticker,
}

/// Layer option making the WebSocket stack below it reconnect
/// transparently.
pub fn with_robust(opts: Vec<Opt<RobustOptions>>) -> ClientOpt<WsRequest, BoxRawResponse> {
    middleware_option("robust layer", move |inner| {
        let options = apply(opts);
        Arc::new(RobustConfig {
            inner,
            auto_refresh: options.auto_refresh,
        })
    })
}

/// Refresh the underlying connection every `period`.
pub fn with_auto_refresh_period(period: Duration) -> Opt<RobustOptions> {
    Opt::new(move |mut options: RobustOptions| {
        options.auto_refresh.period = period;
        options
    })
}

/// Randomize the refresh period.
pub fn with_auto_refresh_jitter(jitter: Jitter) -> Opt<RobustOptions> {
    Opt::new(move |mut options: RobustOptions| {
        options.auto_refresh.jitter = jitter;
        options
    })
}

/// Config wrapping an inner WebSocket config with reconnect behavior.
pub struct RobustConfig {
    inner: BoxConfig<WsRequest, BoxRawResponse>,
    auto_refresh: Ticker,
}

impl RobustConfig {
    /// Wrap `inner` directly, without going through the option list.
    pub fn new(inner: BoxConfig<WsRequest, BoxRawResponse>, auto_refresh: Ticker) -> Self {
        Self {
            inner,
            auto_refresh,
        }
    }
}

#[async_trait]
impl Config<WsRequest, BoxRawResponse> for RobustConfig {
    async fn create(&self, shutdown: CancellationToken) -> Result<BoxClient<WsRequest, BoxRawResponse>> {
        let token = shutdown.child_token();
        let inner = self.inner.create(token.clone()).await?;

        Ok(Arc::new(Robust {
            token,
            inner,
            auto_refresh: self.auto_refresh,
            tasks: WorkerSet::new(),
        }))
    }
}

struct Robust {
    token: CancellationToken,
    inner: BoxClient<WsRequest, BoxRawResponse>,
    auto_refresh: Ticker,
    tasks: WorkerSet,
}

#[async_trait]
impl Client<WsRequest, BoxRawResponse> for Robust {
    async fn request(&self, request: WsRequest) -> Result<BoxRawResponse> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let token = request.cancel_token().child_token();
        let done = CancellationToken::new();
        let buffer_size = request.buffer_size.max(1);

        let (incoming_tx, incoming_rx) = mpsc::channel(buffer_size);
        let (outgoing_tx, outgoing_rx) = mpsc::channel(buffer_size);

        // Single-slot pipes publishing each live physical response to the
        // two forwarders, plus the current-physical cell kept fresh by a
        // helper reader.
        let (incoming_pipe_tx, incoming_pipe_rx) = mpsc::channel::<BoxRawResponse>(1);
        let (outgoing_pipe_tx, outgoing_pipe_rx) = mpsc::channel::<BoxRawResponse>(1);
        let (current_tx, current_rx) = watch::channel::<Option<BoxRawResponse>>(None);

        let mut workers = JoinSet::new();
        workers.spawn(produce_underlying(
            Arc::clone(&self.inner),
            self.token.clone(),
            token.clone(),
            request,
            self.auto_refresh,
            [incoming_pipe_tx, outgoing_pipe_tx],
        ));
        workers.spawn(forward_incoming(
            self.token.clone(),
            token.clone(),
            incoming_pipe_rx,
            incoming_tx,
        ));
        workers.spawn(forward_outgoing(
            self.token.clone(),
            token.clone(),
            current_rx,
            outgoing_rx,
        ));
        workers.spawn(track_current(outgoing_pipe_rx, current_tx));

        let supervisor_done = done.clone();
        self.tasks
            .spawn(async move {
                let mut workers = workers;
                while workers.join_next().await.is_some() {}
                supervisor_done.cancel();
            })
            .await;

        Ok(Arc::new(RobustResponse {
            token,
            done,
            incoming: tokio::sync::Mutex::new(incoming_rx),
            outgoing: parking_lot::Mutex::new(Some(outgoing_tx)),
        }))
    }

    async fn close(&self) {
        self.token.cancel();
        self.inner.close().await;
        self.tasks.join().await;
    }
}

/// The connect/live state machine.
async fn produce_underlying(
    inner: BoxClient<WsRequest, BoxRawResponse>,
    client_token: CancellationToken,
    token: CancellationToken,
    request: WsRequest,
    auto_refresh: Ticker,
    pipes: [mpsc::Sender<BoxRawResponse>; 2],
) {
    loop {
        // Connecting: redial until a physical connection comes up.
        let response = loop {
            if client_token.is_cancelled() || token.is_cancelled() {
                return;
            }
            match inner.request(request.clone()).await {
                Ok(response) => break response,
                Err(err) if err.is_cancelled() => return,
                Err(err) => {
                    debug!(error = %err, "redial failed");
                }
            }
        };

        for pipe in &pipes {
            let published = tokio::select! {
                _ = client_token.cancelled() => false,
                _ = token.cancelled() => false,
                sent = pipe.send(Arc::clone(&response)) => sent.is_ok(),
            };
            if !published {
                return;
            }
        }

        // Live: hold the physical until it closes or a refresh is due.
        let mut refresh = auto_refresh.timer();
        let closed = response.closed();
        tokio::select! {
            _ = client_token.cancelled() => return,
            _ = token.cancelled() => return,
            _ = closed.cancelled() => {
                debug!("underlying connection closed; reconnecting");
            }
            _ = refresh.tick() => {
                debug!("auto refresh due; recycling connection");
                response.close().await;
            }
        }
    }
}

/// Drains each physical response into the logical incoming channel, in
/// publication order. Dropping the sender on exit closes the logical
/// channel.
async fn forward_incoming(
    client_token: CancellationToken,
    token: CancellationToken,
    mut pipe: mpsc::Receiver<BoxRawResponse>,
    incoming: mpsc::Sender<Message>,
) {
    loop {
        let response = tokio::select! {
            _ = client_token.cancelled() => return,
            _ = token.cancelled() => return,
            response = pipe.recv() => match response {
                Some(response) => response,
                None => return,
            },
        };

        loop {
            let message = tokio::select! {
                _ = client_token.cancelled() => return,
                _ = token.cancelled() => return,
                message = response.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let delivered = tokio::select! {
                _ = client_token.cancelled() => false,
                _ = token.cancelled() => false,
                sent = incoming.send(message) => sent.is_ok(),
            };
            if !delivered {
                return;
            }
        }
    }
}

/// Sends queued outgoing messages on the current physical response; a
/// failed send recycles the physical (forcing the producer to reconnect)
/// and the message is retried on the next one published.
async fn forward_outgoing(
    client_token: CancellationToken,
    token: CancellationToken,
    mut current: watch::Receiver<Option<BoxRawResponse>>,
    mut outgoing: mpsc::Receiver<Message>,
) {
    loop {
        let message = tokio::select! {
            _ = client_token.cancelled() => return,
            _ = token.cancelled() => return,
            message = outgoing.recv() => match message {
                Some(message) => message,
                None => return,
            },
        };

        loop {
            let response = current.borrow_and_update().clone();
            if let Some(response) = response {
                match response.send(message.clone()).await {
                    Ok(()) => break,
                    Err(err) => {
                        debug!(error = %err, "send failed; recycling connection");
                        response.close().await;
                    }
                }
            }

            let changed = tokio::select! {
                _ = client_token.cancelled() => return,
                _ = token.cancelled() => return,
                changed = current.changed() => changed.is_ok(),
            };
            if !changed {
                return;
            }
        }
    }
}

/// Keeps the one-slot current-physical cell up to date.
async fn track_current(
    mut pipe: mpsc::Receiver<BoxRawResponse>,
    current: watch::Sender<Option<BoxRawResponse>>,
) {
    while let Some(response) = pipe.recv().await {
        if current.send(Some(response)).is_err() {
            return;
        }
    }
}

impl std::fmt::Debug for RobustResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobustResponse").finish_non_exhaustive()
    }
}

struct RobustResponse {
    token: CancellationToken,
    done: CancellationToken,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    outgoing: parking_lot::Mutex<Option<mpsc::Sender<Message>>>,
}

#[async_trait]
impl RawResponse for RobustResponse {
    async fn send(&self, message: Message) -> Result<()> {
        let Some(outgoing) = self.outgoing.lock().clone() else {
            return Err(Error::Closed);
        };
        outgoing.send(message).await.map_err(|_| Error::Closed)
    }

    async fn recv(&self) -> Option<Message> {
        self.incoming.lock().await.recv().await
    }

    fn closed(&self) -> CancellationToken {
        self.token.clone()
    }

    fn err(&self) -> Option<Arc<Error>> {
        None
    }

    async fn close(&self) {
        self.token.cancel();
        self.outgoing.lock().take();
        self.done.cancelled().await;
    }
}
