//! A deterministic WebSocket test double.
//!
//! The mock answers every request with a response fabricated from scripted
//! side effects: push messages, fail the request, close the response. A
//! dispatcher worker pulls jobs from the pending queue and asks the
//! side-effect generator for the next script; a recorder worker keeps the
//! `(request, response)` log that tests inspect. `close` joins both
//! workers first, so reading the log afterwards is race-free.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::{leaf_option, BoxClient, Cancel, Client, ClientOpt, Config},
    error::{Error, Result},
    options::{apply, Opt},
    task::WorkerSet,
    websocket::{BoxRawResponse, Message, RawResponse, WsRequest},
};

/// One scripted effect applied while building a mock response.
#[derive(Clone, Debug)]
pub enum SideEffect {
    /// Push these messages onto the response (no-op once it is closed).
    Messages(Vec<Message>),
    /// Fail the whole request with this reason.
    RequestError(String),
    /// Close the response immediately.
    Close,
}

impl SideEffect {
    /// Push `messages` onto the response.
    pub fn messages(messages: impl IntoIterator<Item = Message>) -> Self {
        Self::Messages(messages.into_iter().collect())
    }

    /// Push text messages onto the response.
    pub fn texts<I>(texts: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::Messages(texts.into_iter().map(Message::text).collect())
    }

    /// Fail the request with `reason`.
    pub fn request_error(reason: impl Into<String>) -> Self {
        Self::RequestError(reason.into())
    }
}

/// A scripted source of mock response scripts, one per incoming request.
pub trait SideEffectGenerator: Send {
    /// Whether another request can be served.
    fn has_next(&mut self) -> bool;

    /// The script for the next request.
    fn next(&mut self) -> Vec<SideEffect>;
}

type GeneratorFactory = Arc<dyn Fn() -> Box<dyn SideEffectGenerator> + Send + Sync>;

/// Mock configuration.
#[derive(Clone, Default)]
pub struct MockOptions {
    generator: Option<GeneratorFactory>,
    pending_capacity: usize,
}

const DEFAULT_PENDING_CAPACITY: usize = 1000;

/// Install a custom generator factory; each created mock gets a fresh
/// generator.
pub fn with_generator_factory(
    factory: impl Fn() -> Box<dyn SideEffectGenerator> + Send + Sync + 'static,
) -> Opt<MockOptions> {
    Opt::new(move |mut options: MockOptions| {
        options.generator = Some(Arc::new(factory));
        options
    })
}

/// Serve the same script on every request, forever.
pub fn with_side_effects(effects: Vec<SideEffect>) -> Opt<MockOptions> {
    with_generator_factory(move || Box::new(Infinite(effects.clone())))
}

/// Serve `f(i)` for the i-th request, for at most `max` requests.
pub fn with_side_effects_fn(
    f: impl Fn(usize) -> Vec<SideEffect> + Send + Sync + 'static,
    max: usize,
) -> Opt<MockOptions> {
    let f: Arc<dyn Fn(usize) -> Vec<SideEffect> + Send + Sync> = Arc::new(f);
    with_generator_factory(move || {
        Box::new(Finite {
            f: Arc::clone(&f),
            max,
            served: 0,
        })
    })
}

/// Serve one scripted entry per request index.
pub fn with_scripted_side_effects(scripts: Vec<Vec<SideEffect>>) -> Opt<MockOptions> {
    let max = scripts.len();
    with_side_effects_fn(move |i| scripts[i].clone(), max)
}

struct Infinite(Vec<SideEffect>);

impl SideEffectGenerator for Infinite {
    fn has_next(&mut self) -> bool {
        true
    }

    fn next(&mut self) -> Vec<SideEffect> {
        self.0.clone()
    }
}

struct Finite {
    f: Arc<dyn Fn(usize) -> Vec<SideEffect> + Send + Sync>,
    max: usize,
    served: usize,
}

impl SideEffectGenerator for Finite {
    fn has_next(&mut self) -> bool {
        self.served < self.max
    }

    fn next(&mut self) -> Vec<SideEffect> {
        let effects = (self.f)(self.served);
        self.served += 1;
        effects
    }
}

/// Transport option installing a mock leaf built from `opts`.
pub fn mock_transport(opts: Vec<Opt<MockOptions>>) -> ClientOpt<WsRequest, BoxRawResponse> {
    leaf_option("websocket mock", move || {
        Arc::new(MockConfig {
            options: apply(opts),
        })
    })
}

struct MockConfig {
    options: MockOptions,
}

#[async_trait]
impl Config<WsRequest, BoxRawResponse> for MockConfig {
    async fn create(&self, shutdown: CancellationToken) -> Result<BoxClient<WsRequest, BoxRawResponse>> {
        Ok(Arc::new(Mock::new(shutdown, self.options.clone()).await))
    }
}

struct MockJob {
    request: WsRequest,
    reply: oneshot::Sender<Arc<MockResponse>>,
}

/// The mock client. Cheap to clone; clones share the same workers and
/// record log, so a test can keep one handle for inspection while the
/// stack under test owns another.
#[derive(Clone)]
pub struct Mock {
    token: CancellationToken,
    pending: Arc<parking_lot::Mutex<Option<mpsc::Sender<MockJob>>>>,
    records: Arc<parking_lot::Mutex<Vec<Arc<MockResponse>>>>,
    tasks: Arc<WorkerSet>,
}

impl Mock {
    /// Build a mock from options (see the `with_*` constructors) and start
    /// its dispatcher and recorder workers.
    pub async fn new(shutdown: CancellationToken, options: MockOptions) -> Self {
        let token = shutdown.child_token();
        let capacity = match options.pending_capacity {
            0 => DEFAULT_PENDING_CAPACITY,
            n => n,
        };
        let generator: Box<dyn SideEffectGenerator> = match &options.generator {
            Some(factory) => factory(),
            None => Box::new(Infinite(Vec::new())),
        };

        let (pending_tx, pending_rx) = mpsc::channel(capacity);
        let (handled_tx, handled_rx) = mpsc::channel(capacity);

        let mock = Self {
            token,
            pending: Arc::new(parking_lot::Mutex::new(Some(pending_tx))),
            records: Arc::new(parking_lot::Mutex::new(Vec::new())),
            tasks: Arc::new(WorkerSet::new()),
        };

        mock.tasks
            .spawn(run_dispatcher(
                mock.token.clone(),
                generator,
                pending_rx,
                handled_tx,
            ))
            .await;
        mock.tasks
            .spawn(run_recorder(handled_rx, Arc::clone(&mock.records)))
            .await;

        mock
    }

    /// Build a mock from option values, like [`Mock::new`] but taking the
    /// same option list the leaf constructor takes.
    pub async fn with_options(
        shutdown: CancellationToken,
        opts: Vec<Opt<MockOptions>>,
    ) -> Self {
        Self::new(shutdown, apply(opts)).await
    }

    /// Requests handled so far, in handling order.
    pub fn requests(&self) -> Vec<WsRequest> {
        self.records
            .lock()
            .iter()
            .map(|response| response.request.clone())
            .collect()
    }

    /// Responses fabricated so far, paired with their requests via
    /// [`MockResponse::request`].
    pub fn responses(&self) -> Vec<Arc<MockResponse>> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl Client<WsRequest, BoxRawResponse> for Mock {
    async fn request(&self, request: WsRequest) -> Result<BoxRawResponse> {
        if self.token.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let Some(pending) = self.pending.lock().clone() else {
            return Err(Error::Cancelled);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        pending
            .send(MockJob {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::Cancelled)?;

        let response = reply_rx.await.map_err(|_| Error::Cancelled)?;
        if let Some(err) = response.take_request_error() {
            return Err(err);
        }

        Ok(response)
    }

    async fn close(&self) {
        self.token.cancel();
        self.pending.lock().take();

        let responses = self.records.lock().clone();
        for response in responses {
            response.close_now();
        }

        self.tasks.join().await;
    }
}

/// The mock doubles as its own config, so an existing instance can sit at
/// the bottom of a stack while the test keeps a handle on it.
#[async_trait]
impl Config<WsRequest, BoxRawResponse> for Mock {
    async fn create(&self, _shutdown: CancellationToken) -> Result<BoxClient<WsRequest, BoxRawResponse>> {
        Ok(Arc::new(self.clone()))
    }
}

async fn run_dispatcher(
    token: CancellationToken,
    mut generator: Box<dyn SideEffectGenerator>,
    mut pending: mpsc::Receiver<MockJob>,
    handled: mpsc::Sender<Arc<MockResponse>>,
) {
    while let Some(job) = pending.recv().await {
        let effects = generator.has_next().then(|| generator.next());
        // Each response is built in its own task so a slow script does not
        // hold up the queue.
        tokio::spawn(handle_one_job(token.clone(), job, effects, handled.clone()));
    }
    debug!("mock dispatcher stopped");
}

async fn run_recorder(
    mut handled: mpsc::Receiver<Arc<MockResponse>>,
    records: Arc<parking_lot::Mutex<Vec<Arc<MockResponse>>>>,
) {
    while let Some(response) = handled.recv().await {
        records.lock().push(response);
    }
    debug!("mock recorder stopped");
}

async fn handle_one_job(
    token: CancellationToken,
    job: MockJob,
    effects: Option<Vec<SideEffect>>,
    handled: mpsc::Sender<Arc<MockResponse>>,
) {
    let response = Arc::new(MockResponse::new(job.request));

    match effects {
        None => response.set_request_error(Error::NoSideEffects),
        Some(effects) => {
            for effect in effects {
                match effect {
                    SideEffect::Messages(messages) => {
                        // Pushes block on buffer capacity; the mock's own
                        // token unblocks them at shutdown.
                        let interrupted = tokio::select! {
                            _ = token.cancelled() => true,
                            _ = response.push(messages) => false,
                        };
                        if interrupted {
                            break;
                        }
                    }
                    SideEffect::RequestError(reason) => {
                        response.set_request_error(Error::websocket(reason));
                    }
                    SideEffect::Close => response.close_now(),
                }
            }
        }
    }

    let _ = job.reply.send(Arc::clone(&response));
    let _ = handled.send(response).await;
}

impl std::fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockResponse").finish_non_exhaustive()
    }
}

/// A fabricated response; pushes are no-ops once the response is closed.
pub struct MockResponse {
    request: WsRequest,
    token: CancellationToken,
    request_err: parking_lot::Mutex<Option<Error>>,
    messages_tx: parking_lot::Mutex<Option<mpsc::Sender<Message>>>,
    messages_rx: tokio::sync::Mutex<mpsc::Receiver<Message>>,
}

impl MockResponse {
    fn new(request: WsRequest) -> Self {
        let token = request.cancel_token().child_token();
        let (messages_tx, messages_rx) = mpsc::channel(request.buffer_size.max(1));

        Self {
            request,
            token,
            request_err: parking_lot::Mutex::new(None),
            messages_tx: parking_lot::Mutex::new(Some(messages_tx)),
            messages_rx: tokio::sync::Mutex::new(messages_rx),
        }
    }

    /// The request this response was fabricated for.
    pub fn request(&self) -> &WsRequest {
        &self.request
    }

    /// Push messages onto the incoming channel; silently stops once the
    /// response is closed.
    pub async fn push(&self, messages: impl IntoIterator<Item = Message> + Send) {
        for message in messages {
            let Some(sender) = self.messages_tx.lock().clone() else {
                return;
            };
            let delivered = tokio::select! {
                _ = self.token.cancelled() => false,
                sent = sender.send(message) => sent.is_ok(),
            };
            if !delivered {
                return;
            }
        }
    }

    fn set_request_error(&self, err: Error) {
        *self.request_err.lock() = Some(err);
    }

    fn take_request_error(&self) -> Option<Error> {
        self.request_err.lock().take()
    }

    fn close_now(&self) {
        self.token.cancel();
        self.messages_tx.lock().take();
    }
}

#[async_trait]
impl RawResponse for MockResponse {
    async fn send(&self, _message: Message) -> Result<()> {
        Err(Error::websocket(
            "mock response does not accept outgoing messages",
        ))
    }

    async fn recv(&self) -> Option<Message> {
        self.messages_rx.lock().await.recv().await
    }

    fn closed(&self) -> CancellationToken {
        self.token.clone()
    }

    fn err(&self) -> Option<Arc<Error>> {
        None
    }

    async fn close(&self) {
        self.close_now();
    }
}
