//! Codec contract - translating raw transport payloads to and from typed values
//!
//! Decoders and encoders are plain functions stored behind `Arc` so a route can
//! be shared across concurrent invocations. The helpers here are the default
//! JSON and query-string codecs both transports build on.

use std::fmt::Display;
use std::sync::Arc;

use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::application::errors::{DispatchError, DispatchResult};

/// Turns a raw inbound request into the route's typed input
pub type Decoder<Req, In> = Arc<dyn Fn(&Req) -> DispatchResult<In> + Send + Sync>;

/// Turns the handler's typed output into the transport's response
pub type Encoder<Out, Resp> = Arc<dyn Fn(Out) -> DispatchResult<Resp> + Send + Sync>;

/// User-facing message for every decode failure
pub const DECODE_FAILED: &str = "unable to decode request";

/// User-facing message for encode failures (only ever logged)
pub const ENCODE_FAILED: &str = "unable to encode response";

/// Decode a JSON document
pub fn decode_json<In: DeserializeOwned>(raw: &[u8]) -> DispatchResult<In> {
    serde_json::from_slice(raw)
        .map_err(|e| DispatchError::decode(StatusCode::BAD_REQUEST, DECODE_FAILED, e))
}

/// Encode a value as a JSON document
pub fn encode_json<Out: Serialize>(out: &Out) -> DispatchResult<Vec<u8>> {
    serde_json::to_vec(out).map_err(DispatchError::encode)
}

/// Decode a query string into the input shape.
///
/// Keys are matched case-insensitively: every key is lowercased before binding,
/// so `UserID=7`, `userId=7` and `userid=7` all bind to a field named `userid`.
/// Values go through `serde_urlencoded`, which parses numeric and boolean
/// fields out of their string form.
pub fn decode_query<In: DeserializeOwned>(query: &str) -> DispatchResult<In> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
        .map_err(|e| DispatchError::decode(StatusCode::BAD_REQUEST, DECODE_FAILED, e))?;

    let normalized: Vec<(String, String)> = pairs
        .into_iter()
        .map(|(key, value)| (key.to_lowercase(), value))
        .collect();

    let encoded = serde_urlencoded::to_string(&normalized)
        .map_err(|e| DispatchError::decode(StatusCode::BAD_REQUEST, DECODE_FAILED, e))?;

    serde_urlencoded::from_str(&encoded)
        .map_err(|e| DispatchError::decode(StatusCode::BAD_REQUEST, DECODE_FAILED, e))
}

/// Encoder that renders the output with its `Display` impl
pub fn stringify<Out: Display>() -> Encoder<Out, String> {
    Arc::new(|out: Out| Ok(out.to_string()))
}
