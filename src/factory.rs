//! One-call assembly of the default HTTP stack.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::{
    client::{client, BoxClient},
    error::Result,
    http::{self, HttpRequest},
    layer::{self, BoxDecorator},
};

/// Configuration of the full HTTP stack: transport, pool, rate limit,
/// decorators, and retry policy.
pub struct HttpStackConfig {
    /// Timeout applied to each whole call.
    pub timeout: Duration,
    /// Number of pool workers.
    pub pool_size: usize,
    /// Maximum requests per second (0 disables the rate limiter).
    pub max_rps: f64,
    /// Decorators run before the status-code check.
    pub pre_processors: Vec<BoxDecorator<HttpRequest, reqwest::Response>>,
    /// Decorators run after the status-code check.
    pub post_processors: Vec<BoxDecorator<HttpRequest, reqwest::Response>>,
    /// Status codes converted to errors (and thereby retried).
    pub retry_on_status_codes: Vec<u16>,
    /// First retry delay.
    pub initial_retry_delay: Duration,
    /// Backoff growth factor (0 disables backoff).
    pub retry_delay_multiplier: f64,
    /// Backoff ceiling.
    pub max_retry_delay: Duration,
    /// Inner-call budget per outer request (0 disables the limit).
    pub max_retries: u32,
}

impl Default for HttpStackConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            pool_size: 10,
            max_rps: 100.0,
            pre_processors: Vec::new(),
            post_processors: Vec::new(),
            retry_on_status_codes: vec![429],
            initial_retry_delay: Duration::from_secs(1),
            retry_delay_multiplier: 2.0,
            max_retry_delay: Duration::from_secs(60),
            max_retries: 10,
        }
    }
}

/// Build the default HTTP stack: pool of 10, 100 rps, retry on 429 with
/// 1s/×2/60s backoff and at most 10 inner calls, 60s per-call timeout.
pub async fn default_http(
    shutdown: CancellationToken,
) -> Result<BoxClient<HttpRequest, reqwest::Response>> {
    new_http(shutdown, HttpStackConfig::default()).await
}

/// Build an HTTP stack from `config`.
pub async fn new_http(
    shutdown: CancellationToken,
    config: HttpStackConfig,
) -> Result<BoxClient<HttpRequest, reqwest::Response>> {
    let mut decorators = config.pre_processors;
    decorators.extend(layer::status_codes_as_errors(
        config.retry_on_status_codes.iter().copied(),
    ));
    decorators.extend(config.post_processors);

    client(
        shutdown,
        vec![
            http::transport(vec![http::with_timeout(config.timeout)]),
            layer::pool(vec![layer::with_pool_size(config.pool_size)]),
            layer::requests_per_second(config.max_rps),
            layer::decorators(decorators),
            layer::circuit_breaker(vec![
                layer::with_exponential_backoff(
                    config.initial_retry_delay,
                    config.retry_delay_multiplier,
                    config.max_retry_delay,
                ),
                layer::with_max_retries(config.max_retries),
            ]),
        ],
    )
    .await
}
