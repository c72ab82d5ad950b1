//! The pool layer: fixed-size fan-out over independent inner clients.
//!
//! `create` with size N > 1 builds N workers, each owning its own inner
//! client (the inner config's `create` runs N times), all draining one
//! bounded pending queue. Jobs dispatch to whichever worker is idle, so
//! the pool offers no per-request ordering.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::{middleware_option, BoxClient, BoxConfig, Cancel, Client, ClientOpt, Config},
    error::{Error, Result},
    layer::job::Job,
    options::{apply, Opt},
    task::WorkerSet,
};

/// Pool sizing knobs.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoolOptions {
    /// Number of workers (and inner clients). Zero or one degenerates to
    /// the inner config.
    pub size: usize,
    /// Capacity of the pending queue. Zero means 2×size; values below the
    /// pool size are raised to it.
    pub pending_size: usize,
}

/// Layer option fanning requests out over `size` inner clients.
pub fn pool<Req, Res>(opts: Vec<Opt<PoolOptions>>) -> ClientOpt<Req, Res>
where
    Req: Cancel + Send + Sync + 'static,
    Res: Send + 'static,
{
    middleware_option("pool layer", move |inner| {
        Arc::new(PoolConfig {
            inner,
            options: apply(opts),
        })
    })
}

/// Set the number of pool workers.
pub fn with_pool_size(size: usize) -> Opt<PoolOptions> {
    Opt::new(move |mut options: PoolOptions| {
        options.size = size;
        options
    })
}

/// Set the pending queue capacity.
pub fn with_pool_pending_size(size: usize) -> Opt<PoolOptions> {
    Opt::new(move |mut options: PoolOptions| {
        options.pending_size = size;
        options
    })
}

struct PoolConfig<Req, Res> {
    inner: BoxConfig<Req, Res>,
    options: PoolOptions,
}

#[async_trait]
impl<Req, Res> Config<Req, Res> for PoolConfig<Req, Res>
where
    Req: Cancel + Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn create(&self, shutdown: CancellationToken) -> Result<BoxClient<Req, Res>> {
        let size = self.options.size;
        if size <= 1 {
            return self.inner.create(shutdown).await;
        }

        let pending_size = match self.options.pending_size {
            0 => size * 2,
            n => n.max(size),
        };

        let token = shutdown.child_token();
        let (pending_tx, pending_rx) = mpsc::channel(pending_size);
        let pending_rx = Arc::new(Mutex::new(pending_rx));

        let pool = Pool {
            token: token.clone(),
            pending: parking_lot::Mutex::new(Some(pending_tx)),
            tasks: WorkerSet::new(),
        };

        for worker in 0..size {
            let inner = match self.inner.create(shutdown.clone()).await {
                Ok(inner) => inner,
                Err(err) => {
                    pool.close().await;
                    return Err(err);
                }
            };

            pool.tasks
                .spawn(run_worker(
                    worker,
                    token.clone(),
                    inner,
                    Arc::clone(&pending_rx),
                ))
                .await;
        }

        Ok(Arc::new(pool))
    }
}

struct Pool<Req, Res> {
    token: CancellationToken,
    pending: parking_lot::Mutex<Option<mpsc::Sender<Job<Req, Res>>>>,
    tasks: WorkerSet,
}

#[async_trait]
impl<Req, Res> Client<Req, Res> for Pool<Req, Res>
where
    Req: Cancel + Send + Sync + 'static,
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
        self.tasks.join().await;
    }
}

async fn run_worker<Req, Res>(
    worker: usize,
    token: CancellationToken,
    inner: BoxClient<Req, Res>,
    pending: Arc<Mutex<mpsc::Receiver<Job<Req, Res>>>>,
) where
    Req: Cancel + Send + Sync + 'static,
    Res: Send + 'static,
{
    loop {
        let job = tokio::select! {
            _ = token.cancelled() => break,
            job = async { pending.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        handle_job(&token, inner.as_ref(), job).await;
    }

    inner.close().await;
    // A worker leaving takes the whole pool down with it.
    token.cancel();
    debug!(worker, "pool worker stopped");
}

async fn handle_job<Req, Res>(token: &CancellationToken, inner: &dyn Client<Req, Res>, job: Job<Req, Res>)
where
    Req: Cancel + Send + Sync + 'static,
    Res: Send + 'static,
{
    let req_token = job.request.cancel_token();
    let result = inner.request(job.request).await;

    if token.is_cancelled() || req_token.is_cancelled() {
        return;
    }
    let _ = job.reply.send(result);
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::client::{client, leaf_option};

    #[derive(Clone)]
    struct Plain {
        token: CancellationToken,
    }

    impl Plain {
        fn new() -> Self {
            Self {
                token: CancellationToken::new(),
            }
        }
    }

    impl Cancel for Plain {
        fn cancel_token(&self) -> CancellationToken {
            self.token.clone()
        }
    }

    struct Slow {
        id: usize,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Client<Plain, usize> for Slow {
        async fn request(&self, _request: Plain) -> Result<usize> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.id)
        }

        async fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SlowConfig {
        created: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Config<Plain, usize> for SlowConfig {
        async fn create(&self, _: CancellationToken) -> Result<BoxClient<Plain, usize>> {
            let id = self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Slow {
                id,
                in_flight: Arc::clone(&self.in_flight),
                peak: Arc::clone(&self.peak),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    struct Counters {
        created: Arc<AtomicUsize>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
    }

    fn counters() -> Counters {
        Counters {
            created: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn slow_leaf(c: &Counters) -> ClientOpt<Plain, usize> {
        let (created, in_flight, peak, closed) = (
            Arc::clone(&c.created),
            Arc::clone(&c.in_flight),
            Arc::clone(&c.peak),
            Arc::clone(&c.closed),
        );
        leaf_option("slow", move || {
            Arc::new(SlowConfig {
                created,
                in_flight,
                peak,
                closed,
            }) as BoxConfig<_, _>
        })
    }

    #[tokio::test]
    async fn pool_runs_requests_in_parallel() {
        let c = counters();
        let cl = client(
            CancellationToken::new(),
            vec![slow_leaf(&c), pool(vec![with_pool_size(4)])],
        )
        .await
        .unwrap();

        assert_eq!(c.created.load(Ordering::SeqCst), 4);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cl = Arc::clone(&cl);
            handles.push(tokio::spawn(async move { cl.request(Plain::new()).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(
            c.peak.load(Ordering::SeqCst) > 1,
            "expected concurrent inner calls"
        );

        cl.close().await;
        assert_eq!(c.closed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn size_one_degenerates_to_the_inner_client() {
        let c = counters();
        let cl = client(
            CancellationToken::new(),
            vec![slow_leaf(&c), pool(vec![with_pool_size(1)])],
        )
        .await
        .unwrap();

        assert_eq!(c.created.load(Ordering::SeqCst), 1);
        cl.request(Plain::new()).await.unwrap();
        cl.close().await;
    }

    #[tokio::test]
    async fn closed_pool_rejects_requests() {
        let c = counters();
        let cl = client(
            CancellationToken::new(),
            vec![slow_leaf(&c), pool(vec![with_pool_size(2)])],
        )
        .await
        .unwrap();

        cl.close().await;
        let result = cl.request(Plain::new()).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn cancelled_request_returns_promptly() {
        let c = counters();
        let cl = client(
            CancellationToken::new(),
            vec![slow_leaf(&c), pool(vec![with_pool_size(2)])],
        )
        .await
        .unwrap();

        let request = Plain::new();
        request.token.cancel();
        let result = cl.request(request).await;
        assert!(matches!(result, Err(Error::Cancelled)));

        cl.close().await;
    }
}
