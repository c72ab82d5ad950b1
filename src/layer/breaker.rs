//! The circuit breaker layer: a per-call bounded retry loop with pluggable
//! policies.
//!
//! A breaker is a stateful iterator fed the request and the latest result
//! after every inner call. Policies are wrappers composed onto a noop base
//! that stops on success and retries on error; each wrapper option wraps
//! the factory, so the most recently applied wrapper runs first and every
//! outer request gets a fresh breaker instance.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    client::{middleware_option, BoxClient, BoxConfig, Cancel, Client, ClientOpt, Config},
    error::{Error, Result},
    options::{apply, Opt},
};

/// The breaker's decision after one inner call.
pub enum Verdict<Req, Res> {
    /// Run another iteration with this (possibly rewritten) request.
    Retry(Req),
    /// Stop and return this result.
    Stop(Result<Res>),
}

/// A per-call retry controller.
#[async_trait]
pub trait CircuitBreaker<Req, Res>: Send {
    /// Inspect the latest result and decide whether to iterate again.
    async fn next(&mut self, request: Req, result: Result<Res>) -> Verdict<Req, Res>;
}

type Wrapper<Req, Res> =
    dyn Fn(Box<dyn CircuitBreaker<Req, Res>>) -> Box<dyn CircuitBreaker<Req, Res>> + Send + Sync;

type Factory<Req, Res> = Arc<dyn Fn() -> Box<dyn CircuitBreaker<Req, Res>> + Send + Sync>;

/// Accumulates breaker wrappers into a factory.
pub struct BreakerOptions<Req, Res> {
    factory: Option<Factory<Req, Res>>,
}

impl<Req, Res> Default for BreakerOptions<Req, Res> {
    fn default() -> Self {
        Self { factory: None }
    }
}

impl<Req, Res> BreakerOptions<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    fn wrap(&mut self, wrapper: Box<Wrapper<Req, Res>>) {
        let inner = self.factory.take();
        self.factory = Some(Arc::new(move || match &inner {
            Some(factory) => wrapper(factory()),
            None => wrapper(Box::new(Noop)),
        }));
    }
}

/// Layer option installing a circuit breaker built from `opts`. Without any
/// wrapper option the layer is transparent.
pub fn circuit_breaker<Req, Res>(opts: Vec<Opt<BreakerOptions<Req, Res>>>) -> ClientOpt<Req, Res>
where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    middleware_option("circuit breaker", move |inner| {
        let options = apply(opts);
        Arc::new(BreakerConfig {
            inner,
            factory: options.factory,
        })
    })
}

/// Stop after `limit` inner calls, wrapping the last error. A zero limit is
/// a null option.
pub fn with_max_retries<Req, Res>(limit: u32) -> Opt<BreakerOptions<Req, Res>>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    if limit == 0 {
        return Opt::none();
    }

    Opt::new(move |mut options: BreakerOptions<Req, Res>| {
        options.wrap(Box::new(move |inner| {
            Box::new(AttemptLimit {
                inner,
                max_retries: limit,
                retries: 0,
            })
        }));
        options
    })
}

/// Sleep before each retry, growing the delay by `multiplier` up to
/// `max_delay`. A zero multiplier is a null option.
pub fn with_exponential_backoff<Req, Res>(
    initial: Duration,
    multiplier: f64,
    max_delay: Duration,
) -> Opt<BreakerOptions<Req, Res>>
where
    Req: Cancel + Send + Sync + 'static,
    Res: Send + 'static,
{
    if multiplier == 0.0 {
        return Opt::none();
    }

    Opt::new(move |mut options: BreakerOptions<Req, Res>| {
        options.wrap(Box::new(move |inner| {
            Box::new(ExponentialBackoff {
                inner,
                delay: initial,
                multiplier,
                max_delay,
            })
        }));
        options
    })
}

/// Base of every breaker stack: stop on success, retry on error.
struct Noop;

#[async_trait]
impl<Req, Res> CircuitBreaker<Req, Res> for Noop
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn next(&mut self, request: Req, result: Result<Res>) -> Verdict<Req, Res> {
        match result {
            Ok(res) => Verdict::Stop(Ok(res)),
            Err(_) => Verdict::Retry(request),
        }
    }
}

struct AttemptLimit<Req, Res> {
    inner: Box<dyn CircuitBreaker<Req, Res>>,
    max_retries: u32,
    retries: u32,
}

#[async_trait]
impl<Req, Res> CircuitBreaker<Req, Res> for AttemptLimit<Req, Res>
where
    Req: Send + 'static,
    Res: Send + 'static,
{
    async fn next(&mut self, request: Req, result: Result<Res>) -> Verdict<Req, Res> {
        if let Err(err) = result {
            let retries = self.retries + 1;
            if retries >= self.max_retries {
                return Verdict::Stop(Err(Error::retries_exhausted(self.max_retries, err)));
            }
            self.retries = retries;
            return self.inner.next(request, Err(err)).await;
        }

        self.inner.next(request, result).await
    }
}

struct ExponentialBackoff<Req, Res> {
    inner: Box<dyn CircuitBreaker<Req, Res>>,
    delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

#[async_trait]
impl<Req, Res> CircuitBreaker<Req, Res> for ExponentialBackoff<Req, Res>
where
    Req: Cancel + Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn next(&mut self, request: Req, result: Result<Res>) -> Verdict<Req, Res> {
        if result.is_err() {
            debug!(delay_ms = self.delay.as_millis() as u64, "retry backoff");
            let token = request.cancel_token();
            tokio::select! {
                _ = token.cancelled() => return Verdict::Stop(Err(Error::Cancelled)),
                _ = tokio::time::sleep(self.delay) => {}
            }

            self.delay = self.delay.mul_f64(self.multiplier);
            if !self.max_delay.is_zero() && self.delay > self.max_delay {
                self.delay = self.max_delay;
            }
        }

        self.inner.next(request, result).await
    }
}

struct BreakerConfig<Req, Res> {
    inner: BoxConfig<Req, Res>,
    factory: Option<Factory<Req, Res>>,
}

#[async_trait]
impl<Req, Res> Config<Req, Res> for BreakerConfig<Req, Res>
where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn create(&self, shutdown: CancellationToken) -> Result<BoxClient<Req, Res>> {
        let inner = self.inner.create(shutdown).await?;
        match &self.factory {
            None => Ok(inner),
            Some(factory) => Ok(Arc::new(BreakerClient {
                inner,
                factory: Arc::clone(factory),
            })),
        }
    }
}

struct BreakerClient<Req, Res> {
    inner: BoxClient<Req, Res>,
    factory: Factory<Req, Res>,
}

#[async_trait]
impl<Req, Res> Client<Req, Res> for BreakerClient<Req, Res>
where
    Req: Cancel + Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn request(&self, request: Req) -> Result<Res> {
        let mut breaker = (self.factory)();
        let mut request = request;

        loop {
            let result = self.inner.request(request.clone()).await;

            // Cancellation is terminal, never retried.
            if matches!(&result, Err(err) if err.is_cancelled()) {
                return result;
            }

            match breaker.next(request, result).await {
                Verdict::Stop(result) => return result,
                Verdict::Retry(next) => request = next,
            }
        }
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
