//! Request/response interceptors for the outbound client

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::future::BoxFuture;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use super::{OutboundRequest, OutboundResponse};
use crate::application::errors::ClientError;

/// One request/response exchange, possibly already wrapped by interceptors
pub type Exchange =
    Arc<dyn Fn(OutboundRequest) -> BoxFuture<'static, Result<OutboundResponse, ClientError>> + Send + Sync>;

/// Wraps every outbound exchange, the same way middleware wraps a route
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(
        &self,
        request: OutboundRequest,
        next: InterceptorNext,
    ) -> Result<OutboundResponse, ClientError>;
}

/// The rest of the interceptor chain, ending in the network call
pub struct InterceptorNext {
    exchange: Exchange,
}

impl InterceptorNext {
    pub(super) fn new(exchange: Exchange) -> Self {
        Self { exchange }
    }

    pub async fn run(self, request: OutboundRequest) -> Result<OutboundResponse, ClientError> {
        (self.exchange)(request).await
    }
}

/// Logs each request, its failure, and with `log_all` every completed response
pub struct LoggingInterceptor {
    log_all: bool,
}

impl LoggingInterceptor {
    pub fn new(log_all: bool) -> Self {
        Self { log_all }
    }
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn intercept(
        &self,
        request: OutboundRequest,
        next: InterceptorNext,
    ) -> Result<OutboundResponse, ClientError> {
        let started = Instant::now();
        let url = format!("{}: {}", request.method, request.url);
        let body = request.body_text();

        tracing::info!(url = %url, request_body = %body, "httpclient: send request");

        match next.run(request).await {
            Ok(response) => {
                if self.log_all {
                    tracing::info!(
                        url = %url,
                        request_body = %body,
                        status = response.status.as_u16(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "httpclient: request processed"
                    );
                }
                Ok(response)
            }
            Err(e) => {
                tracing::info!(url = %url, request_body = %body, error = %e, "httpclient: request error");
                Err(e)
            }
        }
    }
}

/// Counts calls and observes latency per method, path and error flag
pub struct MetricsInterceptor {
    duration: HistogramVec,
    requests: IntCounterVec,
}

impl MetricsInterceptor {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "http_client_request_duration_seconds",
                "Duration of outbound HTTP requests in seconds",
            ),
            &["method", "path", "error"],
        )?;
        let requests = IntCounterVec::new(
            Opts::new("http_client_requests_total", "Total number of outbound HTTP requests"),
            &["method", "path", "status", "error"],
        )?;

        registry.register(Box::new(duration.clone()))?;
        registry.register(Box::new(requests.clone()))?;

        Ok(Self { duration, requests })
    }
}

#[async_trait]
impl Interceptor for MetricsInterceptor {
    async fn intercept(
        &self,
        request: OutboundRequest,
        next: InterceptorNext,
    ) -> Result<OutboundResponse, ClientError> {
        let method = request.method.to_string();
        let path = request.url.path().to_string();
        let started = Instant::now();

        let result = next.run(request).await;
        let elapsed = started.elapsed().as_secs_f64();

        let (status, error) = match &result {
            Ok(response) => (response.status.as_str().to_string(), "false"),
            Err(_) => ("error".to_string(), "true"),
        };
        self.duration
            .with_label_values(&[method.as_str(), path.as_str(), error])
            .observe(elapsed);
        self.requests
            .with_label_values(&[method.as_str(), path.as_str(), status.as_str(), error])
            .inc();

        result
    }
}
