//! # wirestack
//!
//! Composable client-side networking middleware: a layered client
//! abstraction over HTTP and WebSocket transports.
//!
//! A stack is assembled declaratively from options — a transport leaf
//! first, then any combination of middleware layers:
//!
//! - **Decorators**: symmetric enter/exit hooks around each call
//! - **Rate limiter**: a single-lane queue metering request entry
//! - **Pool**: fixed-size fan-out over independent inner clients
//! - **Circuit breaker**: bounded retries with exponential backoff
//! - **Robust WebSocket**: a logical connection that transparently
//!   re-dials its physical connection on failure or periodic refresh
//!
//! Every layer is a client wrapping an inner client with the same
//! contract, so layers compose in any order without coupling.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tokio_util::sync::CancellationToken;
//! use wirestack::{factory, http::HttpRequest, Client};
//!
//! #[tokio::main]
//! async fn main() -> wirestack::Result<()> {
//!     let shutdown = CancellationToken::new();
//!
//!     // Pool of 10, 100 rps, retries on 429 with exponential backoff.
//!     let client = factory::default_http(shutdown.clone()).await?;
//!
//!     let url = url::Url::parse("https://api.example.com/items").unwrap();
//!     let response = client.request(HttpRequest::get(url)).await?;
//!     println!("status: {}", response.status());
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! Cancellation is two-level throughout: the shutdown token passed at
//! creation governs a client and all of its workers, and every request
//! carries its own token governing that single call.

pub mod client;
pub mod codec;
pub mod error;
pub mod factory;
pub mod http;
pub mod layer;
pub mod options;
pub mod timer;
pub mod websocket;

mod task;

pub use client::{client, config, BoxClient, BoxConfig, Cancel, Client, ClientOpt, Config};
pub use error::{Error, Result};
pub use options::Opt;
