//! Application layer errors

use axum::http::StatusCode;
use thiserror::Error;

/// Boxed error used as the cause behind dispatch failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the dispatch pipeline
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Failures that can end one dispatch invocation.
///
/// The set is closed on purpose: the classifier matches on it exhaustively
/// instead of probing arbitrary error types.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The inbound method or command does not match the route's selector
    #[error("{selector} is not permitted on this route")]
    NotPermitted { selector: String },

    /// The raw payload could not be decoded into the route's input type
    #[error("decode failed: {source}")]
    Decode {
        status: StatusCode,
        message: String,
        #[source]
        source: BoxError,
    },

    /// The handler output could not be encoded for the transport
    #[error("encode failed: {source}")]
    Encode {
        #[source]
        source: BoxError,
    },

    /// A failure the business handler annotated with a status and user message
    #[error("{status}: {message}")]
    Classified {
        status: StatusCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Anything else; never surfaced to the caller
    #[error("internal error: {0}")]
    Internal(#[source] BoxError),
}

impl DispatchError {
    pub fn classified(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Classified {
            status,
            message: message.into(),
            source: None,
        }
    }

    /// Classified error that keeps the underlying cause for the logs
    pub fn classified_with(
        status: StatusCode,
        message: impl Into<String>,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Classified {
            status,
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn decode(status: StatusCode, message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Decode {
            status,
            message: message.into(),
            source: source.into(),
        }
    }

    pub fn encode(source: impl Into<BoxError>) -> Self {
        Self::Encode {
            source: source.into(),
        }
    }

    pub fn internal(source: impl Into<BoxError>) -> Self {
        Self::Internal(source.into())
    }

    /// Short kind label used in logs and metrics
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::NotPermitted { .. } => ErrorKind::NotPermitted,
            DispatchError::Decode { .. } => ErrorKind::Decode,
            DispatchError::Encode { .. } => ErrorKind::Encode,
            DispatchError::Classified { .. } => ErrorKind::Classified,
            DispatchError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Kind of a dispatch failure, detached from its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotPermitted,
    Decode,
    Encode,
    Classified,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotPermitted => "not_permitted",
            ErrorKind::Decode => "decode",
            ErrorKind::Encode => "encode",
            ErrorKind::Classified => "classified",
            ErrorKind::Internal => "internal",
        }
    }
}

impl From<StorageError> for DispatchError {
    fn from(err: StorageError) -> Self {
        DispatchError::internal(err)
    }
}

impl From<ClientError> for DispatchError {
    fn from(err: ClientError) -> Self {
        DispatchError::internal(err)
    }
}

impl From<SessionError> for DispatchError {
    fn from(err: SessionError) -> Self {
        DispatchError::internal(err)
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid database configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Outbound HTTP call errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Failed to build client: {0}")]
    Build(String),

    #[error("Invalid URL: {0}")]
    Url(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Unexpected response status {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Chat session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Send failed: {0}")]
    Send(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Transport error: {0}")]
    Transport(#[from] ClientError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
