//! The HTTP transport leaf.
//!
//! `create` snapshots the options into an immutable client around
//! `reqwest`; `request` is a blocking delegation racing the request's
//! cancellation token; `close` is a no-op because the leaf spawns nothing.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    client::{leaf_option, BoxClient, Cancel, Client, ClientOpt, Config},
    error::{Error, Result},
    http::HttpRequest,
    options::{apply, Opt},
};

/// Options of the HTTP leaf.
#[derive(Debug, Default)]
pub struct HttpOptions {
    /// Prebuilt client to delegate to; overrides every other option.
    pub client: Option<reqwest::Client>,
    /// Redirect policy. `None` keeps the underlying client's default.
    pub redirect: Option<Redirect>,
    /// Enable an in-memory cookie store.
    pub cookie_store: bool,
    /// Timeout applied to each whole call.
    pub timeout: Option<Duration>,
}

#[derive(Clone, Copy, Debug)]
pub enum Redirect {
    Limited(usize),
    Disabled,
}

/// Transport option installing the HTTP leaf. Must be the first layer of a
/// stack.
pub fn transport(opts: Vec<Opt<HttpOptions>>) -> ClientOpt<HttpRequest, reqwest::Response> {
    leaf_option("http transport", move || {
        Arc::new(HttpConfig {
            options: apply(opts),
        })
    })
}

/// Delegate to a prebuilt `reqwest` client.
pub fn with_client(client: reqwest::Client) -> Opt<HttpOptions> {
    Opt::new(move |mut options: HttpOptions| {
        options.client = Some(client);
        options
    })
}

/// Follow at most `limit` redirects.
pub fn with_redirect_limit(limit: usize) -> Opt<HttpOptions> {
    Opt::new(move |mut options: HttpOptions| {
        options.redirect = Some(Redirect::Limited(limit));
        options
    })
}

/// Do not follow redirects.
pub fn with_no_redirect() -> Opt<HttpOptions> {
    Opt::new(|mut options: HttpOptions| {
        options.redirect = Some(Redirect::Disabled);
        options
    })
}

/// Enable an in-memory cookie store.
pub fn with_cookie_store(enabled: bool) -> Opt<HttpOptions> {
    Opt::new(move |mut options: HttpOptions| {
        options.cookie_store = enabled;
        options
    })
}

/// Bound each whole call by `timeout`.
pub fn with_timeout(timeout: Duration) -> Opt<HttpOptions> {
    Opt::new(move |mut options: HttpOptions| {
        options.timeout = Some(timeout);
        options
    })
}

struct HttpConfig {
    options: HttpOptions,
}

#[async_trait]
impl Config<HttpRequest, reqwest::Response> for HttpConfig {
    async fn create(
        &self,
        _shutdown: CancellationToken,
    ) -> Result<BoxClient<HttpRequest, reqwest::Response>> {
        let client = match &self.options.client {
            Some(client) => client.clone(),
            None => {
                let mut builder = reqwest::Client::builder();
                match self.options.redirect {
                    Some(Redirect::Limited(limit)) => {
                        builder = builder.redirect(reqwest::redirect::Policy::limited(limit));
                    }
                    Some(Redirect::Disabled) => {
                        builder = builder.redirect(reqwest::redirect::Policy::none());
                    }
                    None => {}
                }
                if self.options.cookie_store {
                    builder = builder.cookie_store(true);
                }
                if let Some(timeout) = self.options.timeout {
                    builder = builder.timeout(timeout);
                }
                builder.build()?
            }
        };

        Ok(Arc::new(HttpClient { client }))
    }
}

struct HttpClient {
    client: reqwest::Client,
}

#[async_trait]
impl Client<HttpRequest, reqwest::Response> for HttpClient {
    async fn request(&self, request: HttpRequest) -> Result<reqwest::Response> {
        let token = request.cancel_token();

        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tokio::select! {
            _ = token.cancelled() => Err(Error::Cancelled),
            response = builder.send() => Ok(response?),
        }
    }

    async fn close(&self) {}
}
