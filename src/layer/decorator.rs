//! The decorator layer: a symmetric enter/exit pipeline around the inner
//! call.
//!
//! Requests flow through `enter` left to right, reach the inner client, and
//! results flow back through `exit` right to left (last in, first out).
//! `exit` always runs, on the error path included, so decorators can
//! observe failures and rewrite results either way.

use std::{collections::HashSet, marker::PhantomData, sync::Arc};

use async_trait::async_trait;

use crate::{
    client::{middleware_option, BoxClient, BoxConfig, Client, ClientOpt, Config},
    error::{Error, Result},
};

/// A before/after hook pair around the inner call.
#[async_trait]
pub trait Decorator<Req, Res>: Send + Sync
where
    Req: Send + Sync + 'static,
    Res: Send + 'static,
{
    /// Transform the request on the way in.
    async fn enter(&self, request: Req) -> Req {
        request
    }

    /// Inspect or rewrite the result on the way out. `request` is the fully
    /// entered request that reached the inner client.
    async fn exit(&self, request: &Req, result: Result<Res>) -> Result<Res> {
        let _ = request;
        result
    }
}

/// A shared, type-erased decorator.
pub type BoxDecorator<Req, Res> = Arc<dyn Decorator<Req, Res>>;

/// Layer option installing a decorator chain. An empty list is a null
/// option.
pub fn decorators<Req, Res>(decorators: Vec<BoxDecorator<Req, Res>>) -> ClientOpt<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    if decorators.is_empty() {
        return ClientOpt::none();
    }

    middleware_option("decorator layer", move |inner| {
        Arc::new(DecoratorConfig { inner, decorators })
    })
}

/// An enter-only decorator from a request transformation.
pub fn pre_process<Req, Res, F>(f: F) -> BoxDecorator<Req, Res>
where
    F: Fn(Req) -> Req + Send + Sync + 'static,
    Req: Send + Sync + 'static,
    Res: Send + 'static,
{
    Arc::new(PreProcess(f, PhantomData))
}

/// An exit-only decorator from a result transformation.
pub fn post_process<Req, Res, F>(f: F) -> BoxDecorator<Req, Res>
where
    F: Fn(&Req, Result<Res>) -> Result<Res> + Send + Sync + 'static,
    Req: Send + Sync + 'static,
    Res: Send + 'static,
{
    Arc::new(PostProcess(f, PhantomData))
}

/// A decorator converting successful responses into errors when `checker`
/// reports one.
pub fn response_error_check<Req, Res, F>(checker: F) -> BoxDecorator<Req, Res>
where
    F: Fn(&Res) -> Option<Error> + Send + Sync + 'static,
    Req: Send + Sync + 'static,
    Res: Send + 'static,
{
    post_process(move |_req, result| match result {
        Ok(res) => match checker(&res) {
            Some(err) => Err(err),
            None => Ok(res),
        },
        err => err,
    })
}

/// A decorator mapping the configured status codes to
/// [`Error::InvalidStatus`]. An empty code set yields no decorator.
pub fn status_codes_as_errors<Req>(
    codes: impl IntoIterator<Item = u16>,
) -> Option<BoxDecorator<Req, reqwest::Response>>
where
    Req: Send + Sync + 'static,
{
    let codes: HashSet<u16> = codes.into_iter().collect();
    if codes.is_empty() {
        return None;
    }

    Some(response_error_check(move |res: &reqwest::Response| {
        let status = res.status().as_u16();
        codes.contains(&status).then(|| Error::invalid_status(status))
    }))
}

struct PreProcess<F, Req>(F, PhantomData<fn(Req) -> Req>);

#[async_trait]
impl<Req, Res, F> Decorator<Req, Res> for PreProcess<F, Req>
where
    F: Fn(Req) -> Req + Send + Sync,
    Req: Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn enter(&self, request: Req) -> Req {
        (self.0)(request)
    }
}

struct PostProcess<F, Req>(F, PhantomData<fn(Req) -> Req>);

#[async_trait]
impl<Req, Res, F> Decorator<Req, Res> for PostProcess<F, Req>
where
    F: Fn(&Req, Result<Res>) -> Result<Res> + Send + Sync,
    Req: Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn exit(&self, request: &Req, result: Result<Res>) -> Result<Res> {
        (self.0)(request, result)
    }
}

struct DecoratorConfig<Req, Res> {
    inner: BoxConfig<Req, Res>,
    decorators: Vec<BoxDecorator<Req, Res>>,
}

#[async_trait]
impl<Req, Res> Config<Req, Res> for DecoratorConfig<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn create(
        &self,
        shutdown: tokio_util::sync::CancellationToken,
    ) -> Result<BoxClient<Req, Res>> {
        let inner = self.inner.create(shutdown).await?;
        Ok(Arc::new(DecoratorClient {
            inner,
            decorators: self.decorators.clone(),
        }))
    }
}

struct DecoratorClient<Req, Res> {
    inner: BoxClient<Req, Res>,
    decorators: Vec<BoxDecorator<Req, Res>>,
}

#[async_trait]
impl<Req, Res> Client<Req, Res> for DecoratorClient<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Send + 'static,
{
    async fn request(&self, request: Req) -> Result<Res> {
        let mut request = request;
        for decorator in &self.decorators {
            request = decorator.enter(request).await;
        }

        let mut result = self.inner.request(request.clone()).await;

        for decorator in self.decorators.iter().rev() {
            result = decorator.exit(&request, result).await;
        }

        result
    }

    async fn close(&self) {
        self.inner.close().await;
    }
}
