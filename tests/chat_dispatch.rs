mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use switchyard::application::dispatch::{CommandParser, DispatchContext, LoggingMiddleware, MiddlewareChain};
use switchyard::application::errors::DispatchError;
use switchyard::domain::entities::User;
use switchyard::domain::entities::Message;
use switchyard::infrastructure::transport::{command, raw_command, ChatRouter};

use common::{capture_logs, RecordingSession};

#[derive(Debug, Default, Deserialize)]
struct FindQuery {
    email: Option<String>,
}

#[derive(Serialize)]
struct Found {
    name: String,
}

fn router(session: Arc<RecordingSession>) -> ChatRouter {
    router_with(session, MiddlewareChain::new())
}

fn router_with(session: Arc<RecordingSession>, chain: MiddlewareChain<Message, String>) -> ChatRouter {
    let mut router = ChatRouter::new(CommandParser::new("/").unwrap(), chain, session);

    router
        .add_command(
            command("/find", |_ctx: DispatchContext, q: FindQuery| async move {
                match q.email.as_deref() {
                    Some("ann@b.com") => Ok(Found {
                        name: "ann".to_string(),
                    }),
                    Some("a@b.com") => Err(DispatchError::internal(std::io::Error::other(
                        "connection reset",
                    ))),
                    Some(_) => Err(DispatchError::classified(StatusCode::NOT_FOUND, "no such user")),
                    None => Err(DispatchError::classified(StatusCode::BAD_REQUEST, "email is required")),
                }
            })
            .build()
            .unwrap(),
        )
        .unwrap();

    router
        .add_command(
            raw_command("/ping", |_ctx: DispatchContext, _input: ()| async move {
                Ok::<_, DispatchError>(42)
            })
            .build()
            .unwrap(),
        )
        .unwrap();

    router
}

#[tokio::test]
async fn test_success_reply_is_json() {
    let session = Arc::new(RecordingSession::default());
    let router = router(session.clone());

    let reply = router
        .dispatch_text("100", r#"/find {"email":"ann@b.com"}"#, Some(User::new("7")))
        .await;

    assert_eq!(reply.as_deref(), Some(r#"{"name":"ann"}"#));
    assert_eq!(
        session.sent(),
        vec![("100".to_string(), r#"{"name":"ann"}"#.to_string())]
    );
}

#[tokio::test]
async fn test_unclassified_error_sends_generic_text() {
    let (logs, _guard) = capture_logs();
    let session = Arc::new(RecordingSession::default());
    let router = router(session.clone());

    router
        .dispatch_text("100", r#"/find {"email":"a@b.com"}"#, None)
        .await;

    assert_eq!(session.sent()[0].1, "An error occurred");
    let failures = logs.with_message("request failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].field("kind"), Some("internal"));
    assert_eq!(failures[0].field("selector"), Some("/find"));
    assert!(failures[0]
        .field("cause")
        .unwrap_or_default()
        .contains("connection reset"));
}

#[tokio::test]
async fn test_client_error_message_is_sent() {
    let session = Arc::new(RecordingSession::default());
    let router = router(session.clone());

    router
        .dispatch_text("100", r#"/find {"email":"zed@b.com"}"#, None)
        .await;
    router.dispatch_text("100", "/find", None).await;

    let texts: Vec<String> = session.sent().into_iter().map(|(_, text)| text).collect();
    assert_eq!(texts, vec!["no such user", "email is required"]);
}

#[tokio::test]
async fn test_bad_payload_is_a_decode_error() {
    let session = Arc::new(RecordingSession::default());
    let router = router(session.clone());

    router.dispatch_text("100", "/find {email", None).await;

    assert_eq!(session.sent()[0].1, "Error decoding input");
}

#[tokio::test]
async fn test_output_without_encoder_uses_display() {
    let session = Arc::new(RecordingSession::default());
    let router = router(session.clone());

    let reply = router.dispatch_text("100", "/PING@switchyard_bot", None).await;

    assert_eq!(reply.as_deref(), Some("42"));
}

#[tokio::test]
async fn test_unknown_commands_and_plain_text_get_no_reply() {
    let session = Arc::new(RecordingSession::default());
    let router = router(session.clone());

    assert!(router.dispatch_text("100", "/nope", None).await.is_none());
    assert!(router.dispatch_text("100", "hello there", None).await.is_none());
    assert!(session.sent().is_empty());
    assert_eq!(router.commands(), vec!["/find", "/ping"]);
}

#[tokio::test]
async fn test_failure_record_carries_chat_id_and_request_id() {
    let (logs, _guard) = capture_logs();
    let session = Arc::new(RecordingSession::default());
    let router = router_with(session, MiddlewareChain::new().add(LoggingMiddleware));
    let sender = User {
        username: Some("ann".to_string()),
        ..User::new("7")
    };

    router
        .dispatch_text("100", r#"/find {"email":"a@b.com"}"#, Some(sender))
        .await;

    let incoming = logs.with_message("incoming request");
    assert_eq!(incoming.len(), 1);
    assert_eq!(incoming[0].field("principal"), Some("7"));
    assert_eq!(incoming[0].field("sender"), Some("@ann"));
    assert_eq!(incoming[0].field("context"), Some("chat_id=100"));
    let request_id = incoming[0].field("request_id").unwrap_or_default().to_string();
    assert!(!request_id.is_empty());

    let failures = logs.with_message("request failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].field("request_id"), Some(request_id.as_str()));
    assert_eq!(failures[0].field("context"), Some("chat_id=100"));

    let processed = logs.with_message("request processed");
    assert_eq!(processed.len(), 1);
    assert_eq!(processed[0].field("selector"), Some("/find"));
    assert_eq!(processed[0].field("request_id"), Some(request_id.as_str()));
}
