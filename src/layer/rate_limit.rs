//! The rate limiter layer: a single-lane queue metering entry into the
//! inner client.
//!
//! `create` spawns one worker draining a bounded pending channel, so the
//! layer is strictly FIFO. The worker brackets every inner call with
//! [`RateLimiter::enter`] (which may sleep) and [`RateLimiter::exit`];
//! both the sleep and the wait for a reply race the two cancellation
//! tokens.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::{middleware_option, BoxClient, BoxConfig, Cancel, Client, ClientOpt, Config},
    error::{Error, Result},
    layer::job::Job,
    task::WorkerSet,
};

const PENDING_CAPACITY: usize = 1000;

/// Meters requests entering the inner client.
#[async_trait]
pub trait RateLimiter<Req, Res>: Send + Sync {
    /// Called before the inner call; may sleep to shape traffic. The sleep
    /// must abort when the request's token cancels.
    async fn enter(&self, request: &Req);

    /// Called after the inner call with the request and its result.
    async fn exit(&self, request: &Req, result: &Result<Res>);
}

/// Layer option installing `limiter` in front of the stack.
pub fn rate_limiter<Req, Res>(limiter: Arc<dyn RateLimiter<Req, Res>>) -> ClientOpt<Req, Res>
where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    middleware_option("rate limiter", move |inner| {
        Arc::new(RateLimitConfig { inner, limiter })
    })
}

/// Layer option limiting throughput to `max_rps` requests per second with
/// the default token-bucket limiter. A rate of zero disables the layer.
pub fn requests_per_second<Req, Res>(max_rps: f64) -> ClientOpt<Req, Res>
where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    if max_rps == 0.0 {
        return ClientOpt::none();
    }

    rate_limiter(Arc::new(TokenBucketLimiter::new(max_rps)))
}

/// Layer option limiting throughput to `amount` requests per `interval`.
pub fn requests_per_duration<Req, Res>(amount: u64, interval: Duration) -> ClientOpt<Req, Res>
where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    if interval.is_zero() {
        return ClientOpt::none();
    }

    requests_per_second(amount as f64 / interval.as_secs_f64())
}

/// The default limiter: tracks a running request count against the elapsed
/// time and sleeps `count / max_rps` seconds whenever the effective rate
/// would exceed `max_rps`.
pub struct TokenBucketLimiter {
    max_rps: f64,
    state: parking_lot::Mutex<BucketState>,
}

#[derive(Default)]
struct BucketState {
    last_update: Option<Instant>,
    count: f64,
}

impl TokenBucketLimiter {
    pub fn new(max_rps: f64) -> Self {
        Self {
            max_rps,
            state: parking_lot::Mutex::new(BucketState::default()),
        }
    }
}

#[async_trait]
impl<Req, Res> RateLimiter<Req, Res> for TokenBucketLimiter
where
    Req: Cancel + Send + Sync,
    Res: Send + Sync,
{
    async fn enter(&self, request: &Req) {
        let (mut count, cooldown) = {
            let state = self.state.lock();
            let count = state.count + 1.0;
            match state.last_update {
                // The very first request has no elapsed window to measure
                // against; record the timestamp and wave it through.
                None => (1.0, None),
                Some(last) => {
                    let elapsed = last.elapsed().as_secs_f64();
                    let rate = if elapsed > 0.0 {
                        count / elapsed
                    } else {
                        f64::INFINITY
                    };

                    if rate > self.max_rps {
                        (count, Some(Duration::from_secs_f64(count / self.max_rps)))
                    } else {
                        (count, None)
                    }
                }
            }
        };

        if let Some(wait) = cooldown {
            debug!(wait_ms = wait.as_millis() as u64, "rate limit cooldown");
            let token = request.cancel_token();
            tokio::select! {
                // Cancelled mid-sleep: leave the bucket untouched.
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(wait) => {}
            }
            count = 1.0;
        }

        let mut state = self.state.lock();
        state.last_update = Some(Instant::now());
        state.count = count;
    }

    async fn exit(&self, _request: &Req, _result: &Result<Res>) {}
}

struct RateLimitConfig<Req, Res> {
    inner: BoxConfig<Req, Res>,
    limiter: Arc<dyn RateLimiter<Req, Res>>,
}

#[async_trait]
impl<Req, Res> Config<Req, Res> for RateLimitConfig<Req, Res>
where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn create(&self, shutdown: CancellationToken) -> Result<BoxClient<Req, Res>> {
        let token = shutdown.child_token();
        let inner = self.inner.create(token.clone()).await?;

        let (pending_tx, pending_rx) = mpsc::channel(PENDING_CAPACITY);
        let client = RateLimitClient {
            token: token.clone(),
            inner: Arc::clone(&inner),
            pending: parking_lot::Mutex::new(Some(pending_tx)),
            tasks: WorkerSet::new(),
        };

        client
            .tasks
            .spawn(run_worker(
                token,
                inner,
                Arc::clone(&self.limiter),
                pending_rx,
            ))
            .await;

        Ok(Arc::new(client))
    }
}

struct RateLimitClient<Req, Res> {
    token: CancellationToken,
    inner: BoxClient<Req, Res>,
    pending: parking_lot::Mutex<Option<mpsc::Sender<Job<Req, Res>>>>,
    tasks: WorkerSet,
}

#[async_trait]
impl<Req, Res> Client<Req, Res> for RateLimitClient<Req, Res>
where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn request(&self, request: Req) -> Result<Res> {
        let req_token = request.cancel_token();
        let Some(pending) = self.pending.lock().clone() else {
            return Err(Error::Cancelled);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        if pending
            .send(Job {
                request,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            _ = self.token.cancelled() => Err(Error::Cancelled),
            _ = req_token.cancelled() => Err(Error::Cancelled),
            reply = reply_rx => reply.unwrap_or(Err(Error::Cancelled)),
        }
    }

    async fn close(&self) {
        self.token.cancel();
        self.pending.lock().take();
        self.inner.close().await;
        self.tasks.join().await;
    }
}

async fn run_worker<Req, Res>(
    token: CancellationToken,
    inner: BoxClient<Req, Res>,
    limiter: Arc<dyn RateLimiter<Req, Res>>,
    mut pending: mpsc::Receiver<Job<Req, Res>>,
) where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    loop {
        let job = tokio::select! {
            _ = token.cancelled() => break,
            job = pending.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        handle_job(&token, inner.as_ref(), limiter.as_ref(), job).await;
    }
    debug!("rate limiter worker stopped");
}

async fn handle_job<Req, Res>(
    token: &CancellationToken,
    inner: &dyn Client<Req, Res>,
    limiter: &dyn RateLimiter<Req, Res>,
    job: Job<Req, Res>,
) where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    let request = job.request;
    let req_token = request.cancel_token();

    let result = if token.is_cancelled() || req_token.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        limiter.enter(&request).await;
        let result = inner.request(request.clone()).await;
        limiter.exit(&request, &result).await;
        result
    };

    if req_token.is_cancelled() {
        return;
    }
    let _ = job.reply.send(result);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::client::{client, leaf_option};

    #[derive(Clone)]
    struct Plain {
        token: CancellationToken,
    }

    impl Cancel for Plain {
        fn cancel_token(&self) -> CancellationToken {
            self.token.clone()
        }
    }

    struct Sequenced {
        seen: Arc<parking_lot::Mutex<Vec<usize>>>,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Client<Plain, usize> for Sequenced {
        async fn request(&self, _request: Plain) -> Result<usize> {
            let n = self.counter.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().push(n);
            Ok(n)
        }

        async fn close(&self) {}
    }

    struct SequencedConfig {
        seen: Arc<parking_lot::Mutex<Vec<usize>>>,
        counter: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Config<Plain, usize> for SequencedConfig {
        async fn create(&self, _: CancellationToken) -> Result<BoxClient<Plain, usize>> {
            Ok(Arc::new(Sequenced {
                seen: Arc::clone(&self.seen),
                counter: Arc::clone(&self.counter),
            }))
        }
    }

    #[tokio::test]
    async fn requests_are_serialized_fifo() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));
        let (seen2, counter2) = (Arc::clone(&seen), Arc::clone(&counter));

        let cl = client(
            CancellationToken::new(),
            vec![
                leaf_option("seq", move || {
                    Arc::new(SequencedConfig {
                        seen: seen2,
                        counter: counter2,
                    }) as BoxConfig<_, _>
                }),
                requests_per_second(10_000.0),
            ],
        )
        .await
        .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cl = Arc::clone(&cl);
            let token = CancellationToken::new();
            handles.push(tokio::spawn(
                async move { cl.request(Plain { token }).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let seen = seen.lock().clone();
        assert_eq!(seen.len(), 16);
        // The single worker admits one request at a time, in arrival order.
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        assert_eq!(seen, sorted);

        cl.close().await;
    }

    #[tokio::test]
    async fn zero_rate_disables_the_layer() {
        assert!(requests_per_second::<Plain, usize>(0.0).is_none());
        assert!(requests_per_duration::<Plain, usize>(5, Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn first_request_is_not_throttled() {
        let limiter = TokenBucketLimiter::new(0.001);
        let request = Plain {
            token: CancellationToken::new(),
        };

        let started = Instant::now();
        RateLimiter::<Plain, usize>::enter(&limiter, &request).await;
        assert!(
            started.elapsed() < Duration::from_millis(50),
            "first entry must pass without a cooldown"
        );
    }

    #[tokio::test]
    async fn cooldown_sleep_is_cancellable() {
        let limiter = TokenBucketLimiter::new(0.01);
        let warmup = Plain {
            token: CancellationToken::new(),
        };
        RateLimiter::<Plain, usize>::enter(&limiter, &warmup).await;

        // The second entry immediately after the first wants a long
        // cooldown; cancelling its token must abort the sleep.
        let token = CancellationToken::new();
        let request = Plain {
            token: token.clone(),
        };
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        };

        let started = Instant::now();
        let (_, ()) = tokio::join!(
            RateLimiter::<Plain, usize>::enter(&limiter, &request),
            cancel
        );
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn closed_client_rejects_requests() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        let cl = client(
            CancellationToken::new(),
            vec![
                leaf_option("seq", move || {
                    Arc::new(SequencedConfig { seen, counter }) as BoxConfig<_, _>
                }),
                requests_per_second(100.0),
            ],
        )
        .await
        .unwrap();

        cl.close().await;

        let result = cl
            .request(Plain {
                token: CancellationToken::new(),
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
