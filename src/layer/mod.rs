//! Middleware layers: decorators, rate limiting, worker pools, and circuit
//! breakers.
//!
//! Every layer is a [`crate::ClientOpt`] wrapping the stack assembled so
//! far; layers compose in any order and stay independent of the transport
//! underneath them.

mod breaker;
mod decorator;
mod job;
mod pool;
mod rate_limit;

pub use breaker::{
    circuit_breaker, with_exponential_backoff, with_max_retries, BreakerOptions, CircuitBreaker,
    Verdict,
};
pub use decorator::{
    decorators, post_process, pre_process, response_error_check, status_codes_as_errors,
    BoxDecorator, Decorator,
};
pub use pool::{pool, with_pool_pending_size, with_pool_size, PoolOptions};
pub use rate_limit::{
    rate_limiter, requests_per_duration, requests_per_second, RateLimiter, TokenBucketLimiter,
};
