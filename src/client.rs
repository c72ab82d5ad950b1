//! Core client abstractions: the layered [`Client`]/[`Config`] contract and
//! stack assembly.
//!
//! A [`Config`] is a deferred client constructor; a [`Client`] services
//! requests for a fixed request/response pair. Layers are [`ClientOpt`]s —
//! nullable edits of an optional config — applied in order, so the first
//! option installs a transport leaf and every later option wraps the stack
//! built so far. The outermost layer is the last option in the list.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    options::{apply_init, Opt},
};

/// Capability bound for requests: every request carries a per-call
/// cancellation token, the request-scoped half of the crate's two-level
/// cancellation model (the other half being the client-scoped token handed
/// to [`Config::create`]).
pub trait Cancel {
    /// The token governing this single call.
    fn cancel_token(&self) -> CancellationToken;
}

/// An object servicing requests for a fixed request/response type.
///
/// Implementations allow concurrent `request` calls. `close` is idempotent
/// and returns only once every task the client spawned has exited; after
/// `close`, `request` fails promptly with [`Error::Cancelled`].
#[async_trait]
pub trait Client<Req, Res>: Send + Sync {
    /// Perform one request.
    async fn request(&self, request: Req) -> Result<Res>;

    /// Shut the client down and join all of its workers.
    async fn close(&self);
}

/// A deferred [`Client`] constructor.
///
/// `create` may be called more than once (the pool layer creates one inner
/// client per worker). The `shutdown` token is the client-scoped
/// cancellation root: layers derive child tokens from it.
#[async_trait]
pub trait Config<Req, Res>: Send + Sync {
    /// Build a client governed by `shutdown`.
    async fn create(&self, shutdown: CancellationToken) -> Result<BoxClient<Req, Res>>;
}

/// A shared, type-erased client.
pub type BoxClient<Req, Res> = Arc<dyn Client<Req, Res>>;

/// A shared, type-erased config.
pub type BoxConfig<Req, Res> = Arc<dyn Config<Req, Res>>;

/// A stack layer: a nullable edit of an optional config.
pub type ClientOpt<Req, Res> = Opt<Option<BoxConfig<Req, Res>>>;

/// Fold `opts` into a config, or `None` when no layer installed a transport.
pub fn config<Req, Res>(
    opts: impl IntoIterator<Item = ClientOpt<Req, Res>>,
) -> Option<BoxConfig<Req, Res>> {
    apply_init(opts, None)
}

/// Assemble a stack from `opts` and create its client.
pub async fn client<Req, Res>(
    shutdown: CancellationToken,
    opts: impl IntoIterator<Item = ClientOpt<Req, Res>>,
) -> Result<BoxClient<Req, Res>> {
    match config(opts) {
        Some(config) => config.create(shutdown).await,
        None => Err(Error::config("client stack has no transport layer")),
    }
}

/// Build a transport-leaf option.
///
/// Panics when applied over an existing config: installing two transports
/// in one stack is a programmer error.
pub(crate) fn leaf_option<Req, Res>(
    name: &'static str,
    make: impl FnOnce() -> BoxConfig<Req, Res> + Send + 'static,
) -> ClientOpt<Req, Res> {
    Opt::new(move |config: Option<BoxConfig<Req, Res>>| {
        if config.is_some() {
            panic!("{name} is a transport layer and must come first in the stack");
        }
        Some(make())
    })
}

/// Build a middleware option wrapping the config assembled so far.
///
/// Panics when no transport has been installed yet.
pub(crate) fn middleware_option<Req, Res>(
    name: &'static str,
    wrap: impl FnOnce(BoxConfig<Req, Res>) -> BoxConfig<Req, Res> + Send + 'static,
) -> ClientOpt<Req, Res> {
    Opt::new(move |config: Option<BoxConfig<Req, Res>>| {
        let Some(inner) = config else {
            panic!("{name} requires a transport layer below it");
        };
        Some(wrap(inner))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(&'static str);

    #[async_trait]
    impl Client<String, String> for Echo {
        async fn request(&self, request: String) -> Result<String> {
            Ok(format!("{}:{request}", self.0))
        }

        async fn close(&self) {}
    }

    struct EchoConfig(&'static str);

    #[async_trait]
    impl Config<String, String> for EchoConfig {
        async fn create(&self, _shutdown: CancellationToken) -> Result<BoxClient<String, String>> {
            Ok(Arc::new(Echo(self.0)))
        }
    }

    struct Tagged {
        inner: BoxClient<String, String>,
        tag: &'static str,
    }

    #[async_trait]
    impl Client<String, String> for Tagged {
        async fn request(&self, request: String) -> Result<String> {
            let res = self.inner.request(request).await?;
            Ok(format!("{res}+{}", self.tag))
        }

        async fn close(&self) {
            self.inner.close().await;
        }
    }

    struct TaggedConfig {
        inner: BoxConfig<String, String>,
        tag: &'static str,
    }

    #[async_trait]
    impl Config<String, String> for TaggedConfig {
        async fn create(&self, shutdown: CancellationToken) -> Result<BoxClient<String, String>> {
            let inner = self.inner.create(shutdown).await?;
            Ok(Arc::new(Tagged {
                inner,
                tag: self.tag,
            }))
        }
    }

    fn tag_layer(tag: &'static str) -> ClientOpt<String, String> {
        middleware_option("tag", move |inner| Arc::new(TaggedConfig { inner, tag }))
    }

    #[tokio::test]
    async fn later_options_wrap_earlier_ones() {
        let cl = client(
            CancellationToken::new(),
            vec![
                leaf_option("echo", || Arc::new(EchoConfig("leaf")) as BoxConfig<_, _>),
                tag_layer("a"),
                tag_layer("b"),
            ],
        )
        .await
        .unwrap();

        // The leaf answers first, then each wrapper appends on the way out.
        let got = cl.request("x".into()).await.unwrap();
        assert_eq!(got, "leaf:x+a+b");
    }

    #[tokio::test]
    async fn null_layers_are_skipped() {
        let cl = client(
            CancellationToken::new(),
            vec![
                leaf_option("echo", || Arc::new(EchoConfig("leaf")) as BoxConfig<_, _>),
                Opt::none(),
                tag_layer("a"),
            ],
        )
        .await
        .unwrap();

        let got = cl.request("x".into()).await.unwrap();
        assert_eq!(got, "leaf:x+a");
    }

    #[tokio::test]
    async fn empty_stack_is_a_config_error() {
        let result = client::<String, String>(CancellationToken::new(), Vec::new()).await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    #[should_panic(expected = "transport layer")]
    async fn double_transport_panics() {
        let _ = client(
            CancellationToken::new(),
            vec![
                leaf_option("echo", || Arc::new(EchoConfig("one")) as BoxConfig<_, _>),
                leaf_option("echo", || Arc::new(EchoConfig("two")) as BoxConfig<_, _>),
            ],
        )
        .await;
    }

    #[tokio::test]
    #[should_panic(expected = "requires a transport layer")]
    async fn middleware_without_transport_panics() {
        let _ = client(CancellationToken::new(), vec![tag_layer("a")]).await;
    }
}
