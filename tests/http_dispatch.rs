mod common;

use std::collections::HashMap;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower::ServiceExt;

use switchyard::application::dispatch::{DispatchContext, LoggingMiddleware, MiddlewareChain};
use switchyard::application::errors::DispatchError;
use switchyard::infrastructure::transport::{endpoint, HttpTransport};

use common::capture_logs;

#[derive(Deserialize)]
struct Lookup {
    #[serde(rename = "userid")]
    user_id: u64,
}

#[derive(Deserialize)]
struct Create {
    name: String,
}

#[derive(Serialize)]
struct Named {
    name: String,
}

fn router(body_limit: usize) -> Router {
    let mut transport =
        HttpTransport::new(MiddlewareChain::new().add(LoggingMiddleware)).with_body_limit(body_limit);

    transport
        .add_route(
            endpoint(Method::GET, "/users", |_ctx: DispatchContext, q: Lookup| async move {
                match q.user_id {
                    7 => Ok(Named {
                        name: "ann".to_string(),
                    }),
                    _ => Err(DispatchError::classified(StatusCode::NOT_FOUND, "user not found")),
                }
            })
            .build()
            .unwrap(),
        )
        .unwrap();

    transport
        .add_route(
            endpoint(Method::POST, "/users", |_ctx: DispatchContext, c: Create| async move {
                Ok::<_, DispatchError>(Named { name: c.name })
            })
            .build()
            .unwrap(),
        )
        .unwrap();

    transport
        .add_route(
            endpoint(Method::PUT, "/users", |_ctx: DispatchContext, _c: Create| async move {
                Err::<Named, _>(DispatchError::internal(std::io::Error::other("disk full")))
            })
            .build()
            .unwrap(),
        )
        .unwrap();

    transport
        .add_route(
            endpoint(Method::GET, "/broken", |_ctx: DispatchContext, _q: serde_json::Value| async move {
                // JSON object keys must be strings
                Ok::<_, DispatchError>(HashMap::from([((1u8, 2u8), 3u8)]))
            })
            .build()
            .unwrap(),
        )
        .unwrap();

    transport.into_router()
}

async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_query_input_is_decoded_and_encoded_as_json() {
    let (status, body) = call(router(1024), Method::GET, "/users?userid=7", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"name":"ann"}"#);
}

#[tokio::test]
async fn test_query_keys_match_case_insensitively() {
    let (status, body) = call(router(1024), Method::GET, "/users?UserID=7", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"name":"ann"}"#);
}

#[tokio::test]
async fn test_json_body_round_trip() {
    let (status, body) = call(router(1024), Method::POST, "/users", r#"{"name":"bob"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, r#"{"name":"bob"}"#);
}

#[tokio::test]
async fn test_malformed_body_is_a_bad_request() {
    let (logs, _guard) = capture_logs();

    let (status, body) = call(router(1024), Method::POST, "/users", "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, r#"{"message":"unable to decode request"}"#);

    let failures = logs.with_message("request failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].field("kind"), Some("decode"));
    assert_eq!(failures[0].field("payload"), Some("{not json"));
}

#[tokio::test]
async fn test_classified_handler_error_reaches_the_client() {
    let (status, body) = call(router(1024), Method::GET, "/users?userid=8", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, r#"{"message":"user not found"}"#);
}

#[tokio::test]
async fn test_internal_error_has_empty_body_and_logged_cause() {
    let (logs, _guard) = capture_logs();

    let (status, body) = call(router(1024), Method::PUT, "/users", r#"{"name":"bob"}"#).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());

    let failures = logs.with_message("request failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].field("kind"), Some("internal"));
    assert!(failures[0].field("cause").unwrap_or_default().contains("disk full"));
}

#[tokio::test]
async fn test_encode_failure_is_a_server_error_with_empty_body() {
    let (logs, _guard) = capture_logs();

    let (status, body) = call(router(1024), Method::GET, "/broken", "").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.is_empty());

    let failures = logs.with_message("request failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].field("kind"), Some("encode"));
    assert_eq!(failures[0].field("selector"), Some("GET /broken"));
    assert_eq!(failures[0].field("context"), Some("path=/broken"));
    assert!(failures[0].field("request_id").is_some());
}

#[tokio::test]
async fn test_unregistered_method_is_not_permitted() {
    let (status, body) = call(router(1024), Method::PATCH, "/users", "{}").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, r#"{"message":"method not allowed"}"#);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let big = format!(r#"{{"name":"{}"}}"#, "x".repeat(64));
    let (status, body) = call(router(16), Method::POST, "/users", &big).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, r#"{"message":"request body too large"}"#);
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let (status, _) = call(router(1024), Method::GET, "/nowhere", "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
