//! Dispatch pipeline - routes one inbound message through decode, handler and encode

use std::borrow::Cow;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use axum::http::StatusCode;
use futures::future::BoxFuture;
use tracing::{Instrument, Span};

use crate::application::errors::{ConfigError, DispatchError, DispatchResult};
use super::classifier::{Classification, ErrorClassifier};
use super::codec::{Decoder, Encoder, DECODE_FAILED};
use super::context::DispatchContext;
use super::middleware::MiddlewareChain;

/// An inbound message as seen by the pipeline
pub trait Inbound: Send + Sync + 'static {
    /// Route-matching key (method and path, or a command token)
    type Selector: PartialEq + Display + Clone + Send + Sync + 'static;

    fn selector(&self) -> Self::Selector;

    /// Text rendering of the raw payload, for logs
    fn payload(&self) -> Cow<'_, str>;

    /// Who sent the message, when the transport knows
    fn principal(&self) -> Option<String> {
        None
    }

    /// Human-readable sender for logs
    fn sender_name(&self) -> Option<String> {
        None
    }
}

/// A transport response that reports its own status
pub trait Outcome: Send + 'static {
    fn status(&self) -> StatusCode;
}

impl Outcome for axum::response::Response {
    fn status(&self) -> StatusCode {
        axum::response::Response::status(self)
    }
}

impl Outcome for String {
    fn status(&self) -> StatusCode {
        StatusCode::OK
    }
}

/// Boxed business handler
pub type BoxHandler<In, Out> =
    Arc<dyn Fn(DispatchContext, In) -> BoxFuture<'static, DispatchResult<Out>> + Send + Sync>;

/// A route with middleware applied, as stored by a transport
pub type Endpoint<Req, Resp> =
    Arc<dyn Fn(DispatchContext, Req) -> BoxFuture<'static, DispatchResult<Resp>> + Send + Sync>;

/// Box any async function returning `Result<Out, E>` as a business handler
pub fn into_handler<In, Out, E, F, Fut>(handler: F) -> BoxHandler<In, Out>
where
    F: Fn(DispatchContext, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Out, E>> + Send + 'static,
    E: Into<DispatchError>,
    In: Send + 'static,
    Out: Send + 'static,
{
    Arc::new(
        move |ctx: DispatchContext, input: In| -> BoxFuture<'static, DispatchResult<Out>> {
            let fut = handler(ctx, input);
            Box::pin(async move { fut.await.map_err(Into::into) })
        },
    )
}

enum Input<Req, In> {
    Decode(Decoder<Req, In>),
    Empty(fn() -> In),
}

/// Builder for a [`Route`]
pub struct RouteBuilder<Req: Inbound, In, Out, Resp> {
    selector: Req::Selector,
    handler: BoxHandler<In, Out>,
    input: Option<Input<Req, In>>,
    encoder: Option<Encoder<Out, Resp>>,
    fallback: Option<Encoder<Out, Resp>>,
    classifier: ErrorClassifier,
    span: Option<Span>,
}

impl<Req, In, Out, Resp> RouteBuilder<Req, In, Out, Resp>
where
    Req: Inbound,
    In: Send + 'static,
    Out: Send + 'static,
    Resp: Send + 'static,
{
    pub fn decoder<F>(mut self, decode: F) -> Self
    where
        F: Fn(&Req) -> DispatchResult<In> + Send + Sync + 'static,
    {
        self.input = Some(Input::Decode(Arc::new(decode)));
        self
    }

    /// Skip decoding; the handler receives `In::default()`
    pub fn without_input(mut self) -> Self
    where
        In: Default,
    {
        self.input = Some(Input::Empty(In::default));
        self
    }

    pub fn encoder<F>(mut self, encode: F) -> Self
    where
        F: Fn(Out) -> DispatchResult<Resp> + Send + Sync + 'static,
    {
        self.encoder = Some(Arc::new(encode));
        self
    }

    /// Drop any encoder so the transport's default send is used
    pub fn without_encoder(mut self) -> Self {
        self.encoder = None;
        self
    }

    /// The transport's default send, used when no encoder is registered
    pub fn fallback(mut self, send: Encoder<Out, Resp>) -> Self {
        self.fallback = Some(send);
        self
    }

    pub fn classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Span every event of this route is emitted in
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> Result<Route<Req, In, Out, Resp>, ConfigError> {
        let input = self.input.ok_or_else(|| {
            ConfigError::MissingField(format!("{}: decoder or without_input", self.selector))
        })?;
        let respond = self.encoder.or(self.fallback).ok_or_else(|| {
            ConfigError::MissingField(format!("{}: encoder or fallback", self.selector))
        })?;
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("route", selector = %self.selector));

        Ok(Route {
            core: Arc::new(RouteCore {
                selector: self.selector,
                input,
                handler: self.handler,
                respond,
            }),
            classifier: self.classifier,
            span,
        })
    }
}

struct RouteCore<Req: Inbound, In, Out, Resp> {
    selector: Req::Selector,
    input: Input<Req, In>,
    handler: BoxHandler<In, Out>,
    respond: Encoder<Out, Resp>,
}

impl<Req, In, Out, Resp> RouteCore<Req, In, Out, Resp>
where
    Req: Inbound,
    In: Send + 'static,
    Out: Send + 'static,
    Resp: Send + 'static,
{
    async fn dispatch(&self, ctx: DispatchContext, request: Req) -> DispatchResult<Resp> {
        let selector = request.selector();
        if selector != self.selector {
            return Err(DispatchError::NotPermitted {
                selector: selector.to_string(),
            });
        }

        let input = match &self.input {
            Input::Decode(decode) => decode(&request).map_err(as_decode)?,
            Input::Empty(empty) => empty(),
        };
        drop(request);

        let output = (self.handler)(ctx, input).await?;

        (self.respond)(output).map_err(as_encode)
    }
}

fn as_decode(err: DispatchError) -> DispatchError {
    match err {
        DispatchError::Decode { .. } => err,
        other => DispatchError::decode(StatusCode::BAD_REQUEST, DECODE_FAILED, other),
    }
}

fn as_encode(err: DispatchError) -> DispatchError {
    match err {
        DispatchError::Encode { .. } => err,
        other => DispatchError::encode(other),
    }
}

/// A typed route: selector, codec pair, business handler, error policy.
///
/// Immutable once built. Call [`Route::register`] to wrap it in a middleware
/// chain and get the [`Registration`] a transport stores.
pub struct Route<Req: Inbound, In, Out, Resp> {
    core: Arc<RouteCore<Req, In, Out, Resp>>,
    classifier: ErrorClassifier,
    span: Span,
}

impl<Req, In, Out, Resp> Route<Req, In, Out, Resp>
where
    Req: Inbound,
    In: Send + 'static,
    Out: Send + 'static,
    Resp: Send + 'static,
{
    pub fn builder<F, Fut, E>(selector: Req::Selector, handler: F) -> RouteBuilder<Req, In, Out, Resp>
    where
        F: Fn(DispatchContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Out, E>> + Send + 'static,
        E: Into<DispatchError>,
    {
        RouteBuilder {
            selector,
            handler: into_handler(handler),
            input: None,
            encoder: None,
            fallback: None,
            classifier: ErrorClassifier::default(),
            span: None,
        }
    }

    pub fn selector(&self) -> &Req::Selector {
        &self.core.selector
    }

    /// Run the bare pipeline, without middleware or classification
    pub async fn dispatch(&self, ctx: DispatchContext, request: Req) -> DispatchResult<Resp> {
        self.core.dispatch(ctx, request).await
    }

    /// Compose the middleware chain around this route, once
    pub fn register(self, chain: &MiddlewareChain<Req, Resp>) -> Registration<Req, Resp> {
        let selector = self.core.selector.clone();
        let core = self.core;
        let endpoint: Endpoint<Req, Resp> = Arc::new(
            move |ctx: DispatchContext, request: Req| -> BoxFuture<'static, DispatchResult<Resp>> {
                let core = Arc::clone(&core);
                Box::pin(async move { core.dispatch(ctx, request).await })
            },
        );

        Registration {
            selector,
            endpoint: chain.build(endpoint),
            classifier: self.classifier,
            span: self.span,
        }
    }
}

/// A registered route: the effective handler plus its error policy and log span
pub struct Registration<Req: Inbound, Resp> {
    selector: Req::Selector,
    endpoint: Endpoint<Req, Resp>,
    classifier: ErrorClassifier,
    span: Span,
}

impl<Req: Inbound, Resp> Clone for Registration<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            selector: self.selector.clone(),
            endpoint: Arc::clone(&self.endpoint),
            classifier: self.classifier.clone(),
            span: self.span.clone(),
        }
    }
}

impl<Req, Resp> Registration<Req, Resp>
where
    Req: Inbound,
    Resp: Send + 'static,
{
    pub fn selector(&self) -> &Req::Selector {
        &self.selector
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Run one invocation; a failure is classified and logged exactly once
    pub async fn invoke(&self, ctx: DispatchContext, request: Req) -> Result<Resp, Classification> {
        let meta = ctx.clone();
        let payload = request.payload().into_owned();

        let result = (self.endpoint)(ctx, request)
            .instrument(self.span.clone())
            .await;

        result.map_err(|err| {
            self.span
                .in_scope(|| self.classifier.classify_error(&meta, &payload, &err))
        })
    }
}
