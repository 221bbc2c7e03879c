//! Middleware system for the dispatch pipeline

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::StatusCode;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use prometheus::{Encoder as _, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::application::errors::{DispatchError, DispatchResult};
use super::classifier::ErrorClassifier;
use super::context::DispatchContext;
use super::pipeline::{Endpoint, Inbound, Outcome};

/// Middleware trait - wraps the rest of the chain with cross-cutting behaviour.
///
/// Implementations own whatever state they keep and must synchronise it
/// themselves: one instance serves every concurrent invocation of every route
/// it is registered on.
#[async_trait]
pub trait Middleware<Req, Resp>: Send + Sync
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    async fn process(
        &self,
        ctx: DispatchContext,
        request: Req,
        next: Next<Req, Resp>,
    ) -> DispatchResult<Resp>;
}

/// The rest of the chain, ending in the route itself
pub struct Next<Req, Resp> {
    endpoint: Endpoint<Req, Resp>,
}

impl<Req, Resp> Next<Req, Resp> {
    pub async fn run(self, ctx: DispatchContext, request: Req) -> DispatchResult<Resp> {
        (self.endpoint)(ctx, request).await
    }
}

/// Ordered middleware list; the first added is the outermost wrapper
pub struct MiddlewareChain<Req, Resp> {
    middlewares: Vec<Arc<dyn Middleware<Req, Resp>>>,
}

impl<Req, Resp> Clone for MiddlewareChain<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            middlewares: self.middlewares.clone(),
        }
    }
}

impl<Req, Resp> MiddlewareChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub fn new() -> Self {
        Self {
            middlewares: Vec::new(),
        }
    }

    pub fn add<M: Middleware<Req, Resp> + 'static>(self, middleware: M) -> Self {
        self.add_shared(Arc::new(middleware))
    }

    /// Add a middleware instance that is also held elsewhere
    pub fn add_shared(mut self, middleware: Arc<dyn Middleware<Req, Resp>>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Wrap `endpoint` right to left so the first middleware runs first
    pub fn build(&self, endpoint: Endpoint<Req, Resp>) -> Endpoint<Req, Resp> {
        self.middlewares.iter().rev().fold(endpoint, |inner, middleware| {
            let middleware = Arc::clone(middleware);
            let wrapped: Endpoint<Req, Resp> = Arc::new(
                move |ctx: DispatchContext, request: Req| -> BoxFuture<'static, DispatchResult<Resp>> {
                    let middleware = Arc::clone(&middleware);
                    let next = Next {
                        endpoint: Arc::clone(&inner),
                    };
                    Box::pin(async move { middleware.process(ctx, request, next).await })
                },
            );
            wrapped
        })
    }
}

impl<Req, Resp> Default for MiddlewareChain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Logs an "incoming request" event before and a "request processed" event after
pub struct LoggingMiddleware;

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for LoggingMiddleware
where
    Req: Inbound,
    Resp: Outcome,
{
    async fn process(
        &self,
        ctx: DispatchContext,
        request: Req,
        next: Next<Req, Resp>,
    ) -> DispatchResult<Resp> {
        let started = Instant::now();
        let selector = request.selector().to_string();
        let request_id = ctx.request_id().to_string();
        let context = ctx.render_fields();
        tracing::info!(
            selector = %selector,
            payload = %request.payload(),
            principal = request.principal().as_deref().unwrap_or("-"),
            sender = request.sender_name().as_deref().unwrap_or("-"),
            request_id = %request_id,
            context = %context,
            "incoming request"
        );

        let result = next.run(ctx, request).await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(response) => tracing::info!(
                selector = %selector,
                request_id = %request_id,
                context = %context,
                duration_ms,
                status = response.status().as_u16(),
                "request processed"
            ),
            Err(err) => tracing::warn!(
                selector = %selector,
                request_id = %request_id,
                context = %context,
                duration_ms,
                error = %err,
                "request processed"
            ),
        }

        result
    }
}

/// Dispatch counters and latency histogram.
///
/// Registered on an injected registry rather than a process global. The
/// prometheus vectors are atomic internally, so one instance can be shared by
/// every route and invocation.
pub struct DispatchMetrics {
    registry: Registry,
    requests: IntCounterVec,
    duration: HistogramVec,
}

impl DispatchMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let requests = IntCounterVec::new(
            Opts::new(
                "switchyard_requests_total",
                "Dispatched requests by selector, status and outcome",
            ),
            &["selector", "status", "outcome"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "switchyard_request_duration_seconds",
                "Dispatch latency including middleware",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["selector", "outcome"],
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(duration.clone()))?;

        Ok(Self {
            registry: registry.clone(),
            requests,
            duration,
        })
    }

    pub fn observe(&self, selector: &str, status: StatusCode, outcome: &str, elapsed: Duration) {
        self.requests
            .with_label_values(&[selector, status.as_str(), outcome])
            .inc();
        self.duration
            .with_label_values(&[selector, outcome])
            .observe(elapsed.as_secs_f64());
    }

    /// Current request count for one label set
    pub fn request_count(&self, selector: &str, status: StatusCode, outcome: &str) -> u64 {
        self.requests
            .with_label_values(&[selector, status.as_str(), outcome])
            .get()
    }

    /// Prometheus text exposition of the whole registry
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_else(|e| {
            tracing::error!(error = %e, "metrics were not valid UTF-8");
            String::new()
        })
    }
}

/// Records duration and count per selector and outcome
pub struct MetricsMiddleware {
    metrics: Arc<DispatchMetrics>,
    classifier: ErrorClassifier,
}

impl MetricsMiddleware {
    pub fn new(metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            metrics,
            classifier: ErrorClassifier::default(),
        }
    }

    /// Classifier used to label failures; should match the routes'
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for MetricsMiddleware
where
    Req: Inbound,
    Resp: Outcome,
{
    async fn process(
        &self,
        ctx: DispatchContext,
        request: Req,
        next: Next<Req, Resp>,
    ) -> DispatchResult<Resp> {
        let selector = request.selector().to_string();
        let started = Instant::now();

        let result = next.run(ctx, request).await;

        let (status, outcome) = match &result {
            Ok(response) => (response.status(), "success"),
            Err(err) => (self.classifier.resolve(err).0, "error"),
        };
        self.metrics
            .observe(&selector, status, outcome, started.elapsed());

        result
    }
}

/// Sliding-window rate limit per principal, or per selector when anonymous
pub struct RateLimitMiddleware {
    requests: Mutex<HashMap<String, Vec<Instant>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimitMiddleware {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            max_requests,
            window: Duration::from_secs(window_secs),
        }
    }

    fn check_rate_limit(&self, key: &str) -> DispatchResult<()> {
        let mut requests = self.requests.lock();
        let now = Instant::now();

        let times = requests.entry(key.to_string()).or_default();
        times.retain(|&t| now.duration_since(t) < self.window);

        if times.len() >= self.max_requests as usize {
            let retry_after = times
                .first()
                .map(|t| self.window.saturating_sub(now.duration_since(*t)))
                .unwrap_or(self.window);
            tracing::debug!(key, retry_after_ms = retry_after.as_millis() as u64, "rate limited");
            return Err(DispatchError::classified(
                StatusCode::TOO_MANY_REQUESTS,
                "rate limited",
            ));
        }

        times.push(now);
        Ok(())
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for RateLimitMiddleware
where
    Req: Inbound,
    Resp: Send + 'static,
{
    async fn process(
        &self,
        ctx: DispatchContext,
        request: Req,
        next: Next<Req, Resp>,
    ) -> DispatchResult<Resp> {
        let key = request
            .principal()
            .unwrap_or_else(|| request.selector().to_string());
        self.check_rate_limit(&key)?;

        next.run(ctx, request).await
    }
}

/// Only lets listed principals through
pub struct AllowListMiddleware {
    allowed: HashSet<String>,
}

impl AllowListMiddleware {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_allowed(&self, principal: Option<&str>) -> bool {
        principal.is_some_and(|p| self.allowed.contains(p))
    }
}

#[async_trait]
impl<Req, Resp> Middleware<Req, Resp> for AllowListMiddleware
where
    Req: Inbound,
    Resp: Send + 'static,
{
    async fn process(
        &self,
        ctx: DispatchContext,
        request: Req,
        next: Next<Req, Resp>,
    ) -> DispatchResult<Resp> {
        let principal = request.principal();
        if !self.is_allowed(principal.as_deref()) {
            tracing::warn!(
                selector = %request.selector(),
                principal = principal.as_deref().unwrap_or("-"),
                "principal not on allowlist"
            );
            return Err(DispatchError::classified(
                StatusCode::FORBIDDEN,
                "not authorized",
            ));
        }

        next.run(ctx, request).await
    }
}
