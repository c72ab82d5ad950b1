//! HTTP transport leaf and request builders.

mod request;
mod transport;

pub use request::HttpRequest;
pub use transport::{
    transport, with_client, with_cookie_store, with_no_redirect, with_redirect_limit,
    with_timeout, HttpOptions, Redirect,
};

/// The response type served by the HTTP leaf: the underlying client's
/// response, with status, headers, and a body stream owned by the caller.
pub type HttpResponse = reqwest::Response;
