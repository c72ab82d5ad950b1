//! WebSocket request values.

use std::time::Duration;

use http::HeaderMap;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::client::Cancel;

/// A WebSocket request: endpoint, handshake parameters, per-response
/// buffering, and the token governing this single call. Immutable once
/// built.
///
/// Empty/zero fields fall back to the transport's configured values.
#[derive(Clone, Debug, Default)]
pub struct WsRequest {
    pub url: Option<Url>,
    pub headers: HeaderMap,
    pub protocol: String,
    pub origin: String,
    pub receive_timeout: Option<Duration>,
    pub buffer_size: usize,
    token: CancellationToken,
}

impl WsRequest {
    /// An empty request; transport defaults fill the gaps.
    pub fn new() -> Self {
        Self::default()
    }

    /// A request for the given endpoint.
    pub fn to(url: Url) -> Self {
        Self {
            url: Some(url),
            ..Self::default()
        }
    }

    /// Set the endpoint.
    #[must_use]
    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    /// Replace the handshake headers.
    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Set the handshake origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Bound each frame read by `timeout`.
    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Size of this response's incoming message buffer.
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Set the cancellation token governing this call.
    #[must_use]
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }
}

impl Cancel for WsRequest {
    fn cancel_token(&self) -> CancellationToken {
        self.token.clone()
    }
}
