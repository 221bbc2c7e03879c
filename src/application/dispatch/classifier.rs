//! Error classifier - resolves a dispatch failure into status and user message

use axum::http::StatusCode;

use crate::application::errors::{DispatchError, ErrorKind};
use super::codec::ENCODE_FAILED;
use super::context::DispatchContext;

/// Fixed message for selector mismatches
pub const NOT_PERMITTED: &str = "method not allowed";

/// Generic message for anything unclassified
pub const INTERNAL: &str = "internal server error";

/// Outcome of classifying one failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ErrorKind,
    pub status: StatusCode,
    pub message: String,
    /// Text rendering of the underlying error, for the logs only
    pub cause: String,
}

impl Classification {
    /// Whether the message may be shown to the caller
    pub fn is_client_error(&self) -> bool {
        self.status.is_client_error()
    }
}

/// Maps dispatch failures to a status and a user-facing message.
///
/// Policy, first match wins: selector mismatch gets the fixed not-permitted
/// status; errors carrying their own status and message (decode, encode,
/// classified) keep them verbatim; everything else is a generic internal error
/// whose cause goes to the log and nowhere else.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    not_permitted_status: StatusCode,
    not_permitted_message: String,
    internal_message: String,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            not_permitted_status: StatusCode::METHOD_NOT_ALLOWED,
            not_permitted_message: NOT_PERMITTED.to_string(),
            internal_message: INTERNAL.to_string(),
        }
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_not_permitted(mut self, status: StatusCode, message: impl Into<String>) -> Self {
        self.not_permitted_status = status;
        self.not_permitted_message = message.into();
        self
    }

    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = message.into();
        self
    }

    /// Resolve status and message without logging
    pub fn resolve(&self, err: &DispatchError) -> (StatusCode, String) {
        match err {
            DispatchError::NotPermitted { .. } => (
                self.not_permitted_status,
                self.not_permitted_message.clone(),
            ),
            DispatchError::Decode {
                status, message, ..
            } => (*status, message.clone()),
            DispatchError::Encode { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, ENCODE_FAILED.to_string())
            }
            DispatchError::Classified {
                status, message, ..
            } => (*status, message.clone()),
            DispatchError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                self.internal_message.clone(),
            ),
        }
    }

    /// Classify an optional failure; `None` means there was no failure and
    /// nothing is logged.
    pub fn classify(
        &self,
        ctx: &DispatchContext,
        payload: &str,
        err: Option<&DispatchError>,
    ) -> Option<Classification> {
        err.map(|err| self.classify_error(ctx, payload, err))
    }

    /// Classify a failure and emit one structured log record for it, carrying
    /// the invocation's selector, request id and context fields
    pub fn classify_error(&self, ctx: &DispatchContext, payload: &str, err: &DispatchError) -> Classification {
        let (status, message) = self.resolve(err);
        let cause = error_chain(err);

        tracing::error!(
            selector = %ctx.selector(),
            request_id = %ctx.request_id(),
            context = %ctx.render_fields(),
            payload = %payload,
            status = status.as_u16(),
            user_message = %message,
            kind = err.kind().as_str(),
            cause = %cause,
            "request failed"
        );

        Classification {
            kind: err.kind(),
            status,
            message,
            cause,
        }
    }
}

/// Render an error and its sources as `outer: inner: ...`
fn error_chain(err: &DispatchError) -> String {
    let mut rendered = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        let text = inner.to_string();
        if !rendered.contains(&text) {
            rendered.push_str(": ");
            rendered.push_str(&text);
        }
        source = inner.source();
    }
    rendered
}
