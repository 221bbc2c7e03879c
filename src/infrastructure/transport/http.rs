//! HTTP binding - serves registered routes through one axum router

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::Request;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::dispatch::codec::{decode_json, decode_query, encode_json};
use crate::application::dispatch::{
    Classification, DispatchContext, Inbound, MiddlewareChain, Registration, Route, RouteBuilder,
};
use crate::application::errors::{ConfigError, DispatchError, DispatchResult};

/// Header carrying the caller's identity, used by rate limiting and the allowlist
pub const PRINCIPAL_HEADER: &str = "x-user-id";

const BODY_TOO_LARGE: &str = "request body too large";

/// Method and path a route answers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSelector {
    pub method: Method,
    pub path: String,
}

impl HttpSelector {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

impl fmt::Display for HttpSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// An HTTP request with its body already read
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Inbound for HttpRequest {
    type Selector = HttpSelector;

    fn selector(&self) -> HttpSelector {
        HttpSelector::new(self.method.clone(), self.path.clone())
    }

    fn payload(&self) -> Cow<'_, str> {
        if self.body.is_empty() {
            Cow::Borrowed(&self.query)
        } else {
            String::from_utf8_lossy(&self.body)
        }
    }

    fn principal(&self) -> Option<String> {
        self.headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

pub type HttpRoute<In, Out> = Route<HttpRequest, In, Out, Response>;

/// Route builder with the HTTP codecs preset.
///
/// GET, HEAD and DELETE decode the query string; every other method decodes
/// a JSON body. Output is always JSON.
pub fn endpoint<In, Out, F, Fut, E>(
    method: Method,
    path: impl Into<String>,
    handler: F,
) -> RouteBuilder<HttpRequest, In, Out, Response>
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(DispatchContext, In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Out, E>> + Send + 'static,
    E: Into<DispatchError>,
{
    let reads_query = method == Method::GET || method == Method::HEAD || method == Method::DELETE;
    let builder = Route::builder(HttpSelector::new(method, path), handler);

    let builder = if reads_query {
        builder.decoder(|req: &HttpRequest| decode_query(&req.query))
    } else {
        builder.decoder(|req: &HttpRequest| decode_json(&req.body))
    };
    builder.encoder(json_response::<Out>)
}

/// Encode a value as a `200 OK` JSON response
pub fn json_response<Out: Serialize>(out: Out) -> DispatchResult<Response> {
    let body = encode_json(&out)?;
    Ok(([(CONTENT_TYPE, "application/json")], body).into_response())
}

/// Write a classified failure: 4xx gets `{"message": ...}`, 5xx an empty body
pub fn error_response(classification: &Classification) -> Response {
    if classification.is_client_error() {
        (
            classification.status,
            Json(serde_json::json!({ "message": classification.message })),
        )
            .into_response()
    } else {
        classification.status.into_response()
    }
}

/// Collects HTTP routes and builds the axum router serving them
pub struct HttpTransport {
    chain: MiddlewareChain<HttpRequest, Response>,
    routes: Vec<Registration<HttpRequest, Response>>,
    body_limit: usize,
    request_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl HttpTransport {
    pub fn new(chain: MiddlewareChain<HttpRequest, Response>) -> Self {
        Self {
            chain,
            routes: Vec::new(),
            body_limit: 1024 * 1024,
            request_timeout: None,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Deadline handed to handlers; the binding does not enforce it
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Every request context is a child of this token
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Register a route, composing the middleware chain around it once
    pub fn add_route<In, Out>(&mut self, route: HttpRoute<In, Out>) -> Result<(), ConfigError>
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        let selector = route.selector().clone();
        if !selector.path.starts_with('/') {
            return Err(ConfigError::InvalidValue(format!(
                "route path must start with '/': {}",
                selector
            )));
        }
        if is_templated(&selector.path) {
            return Err(ConfigError::InvalidValue(format!(
                "route path must be literal, templates are not matched: {}",
                selector
            )));
        }
        if self.routes.iter().any(|r| r.selector() == &selector) {
            return Err(ConfigError::InvalidValue(format!(
                "route registered twice: {}",
                selector
            )));
        }

        tracing::debug!(route = %selector, "registered http route");
        self.routes.push(route.register(&self.chain));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn into_router(self) -> Router {
        let mut by_path: Vec<(String, Vec<Registration<HttpRequest, Response>>)> = Vec::new();
        for registration in self.routes {
            let path = registration.selector().path.clone();
            match by_path.iter_mut().find(|(p, _)| *p == path) {
                Some((_, group)) => group.push(registration),
                None => by_path.push((path, vec![registration])),
            }
        }

        by_path
            .into_iter()
            .fold(Router::new(), |router, (path, registrations)| {
                let group = Arc::new(PathRoutes {
                    registrations,
                    body_limit: self.body_limit,
                    request_timeout: self.request_timeout,
                    shutdown: self.shutdown.clone(),
                });
                router.route(
                    &path,
                    any(move |request: Request| {
                        let group = Arc::clone(&group);
                        async move { group.handle(request).await }
                    }),
                )
            })
    }
}

/// Capture segments (`{id}`, `:id`) and wildcards (`*rest`) would let axum
/// match paths the selector check then refuses
fn is_templated(path: &str) -> bool {
    path.contains(['{', '}', '*']) || path.split('/').any(|segment| segment.starts_with(':'))
}

/// All registrations sharing one path
struct PathRoutes {
    registrations: Vec<Registration<HttpRequest, Response>>,
    body_limit: usize,
    request_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl PathRoutes {
    /// A method with no registration goes to the first one, whose selector
    /// check answers 405
    fn pick(&self, method: &Method) -> Option<&Registration<HttpRequest, Response>> {
        self.registrations
            .iter()
            .find(|r| &r.selector().method == method)
            .or_else(|| self.registrations.first())
    }

    async fn handle(&self, request: Request) -> Response {
        let (parts, body) = request.into_parts();
        let Some(registration) = self.pick(&parts.method) else {
            return StatusCode::NOT_FOUND.into_response();
        };

        let token = self.shutdown.child_token();
        // Cancels the context when the connection future is dropped
        let _cancel_on_drop = token.clone().drop_guard();

        let selector = format!("{} {}", parts.method, parts.uri.path());
        let mut ctx = DispatchContext::new(selector)
            .with_cancellation(token)
            .with_field("path", parts.uri.path());
        if let Some(timeout) = self.request_timeout {
            ctx = ctx.with_timeout(timeout);
        }

        let body = match axum::body::to_bytes(body, self.body_limit).await {
            Ok(body) => body,
            Err(e) => {
                let err = DispatchError::decode(StatusCode::PAYLOAD_TOO_LARGE, BODY_TOO_LARGE, e);
                let classification = registration
                    .classifier()
                    .classify_error(&ctx, parts.uri.query().unwrap_or_default(), &err);
                return error_response(&classification);
            }
        };

        let request = HttpRequest {
            method: parts.method,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().unwrap_or_default().to_string(),
            headers: parts.headers,
            body,
        };

        match registration.invoke(ctx, request).await {
            Ok(response) => response,
            Err(classification) => error_response(&classification),
        }
    }
}
