//! Per-invocation dispatch context

use std::time::Duration;

use axum::http::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::application::errors::{DispatchError, DispatchResult};

/// State scoped to one dispatch invocation.
///
/// Created by the transport binding when a message arrives and dropped when the
/// invocation ends. Cloning hands the same cancellation signal to the handler;
/// a context is never reused for another invocation.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    selector: String,
    request_id: String,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    fields: Vec<(&'static str, String)>,
}

impl DispatchContext {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            cancel: CancellationToken::new(),
            deadline: None,
            fields: Vec::new(),
        }
    }

    /// Inherit cancellation from the host transport
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach a structured log field
    pub fn with_field(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.fields.push((key, value.into()));
        self
    }

    pub fn selector(&self) -> &str {
        &self.selector
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn fields(&self) -> &[(&'static str, String)] {
        &self.fields
    }

    /// Fields as `key=value` pairs separated by spaces, for log records
    pub fn render_fields(&self) -> String {
        self.fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the inbound message is cancelled
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when no deadline is set
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast when the caller is gone or the deadline has passed
    pub fn check(&self) -> DispatchResult<()> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::classified(
                StatusCode::REQUEST_TIMEOUT,
                "request canceled",
            ));
        }
        if matches!(self.deadline, Some(d) if Instant::now() >= d) {
            return Err(DispatchError::classified(
                StatusCode::GATEWAY_TIMEOUT,
                "request deadline exceeded",
            ));
        }
        Ok(())
    }
}
