//! Chat-command binding - dispatches parsed commands and always answers in text

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::dispatch::codec::{decode_json, stringify};
use crate::application::dispatch::{
    Classification, CommandParser, DispatchContext, Inbound, MiddlewareChain, Registration, Route,
    RouteBuilder,
};
use crate::application::errors::{ConfigError, DispatchError, DispatchResult, ErrorKind};
use crate::domain::entities::{Message, User};
use crate::domain::traits::ChatSession;

pub const NOT_PERMITTED_TEXT: &str = "Command not permitted";
pub const DECODE_FAILED_TEXT: &str = "Error decoding input";
pub const ENCODE_FAILED_TEXT: &str = "Error encoding output";
pub const INTERNAL_TEXT: &str = "An error occurred";

impl Inbound for Message {
    type Selector = String;

    fn selector(&self) -> String {
        self.command().unwrap_or_default().to_string()
    }

    fn payload(&self) -> Cow<'_, str> {
        Cow::Borrowed(Message::payload(self))
    }

    fn principal(&self) -> Option<String> {
        self.sender.as_ref().map(|u| u.id.clone())
    }

    fn sender_name(&self) -> Option<String> {
        self.sender.as_ref().map(|u| u.to_string())
    }
}

pub type ChatRoute<In, Out> = Route<Message, In, Out, String>;

/// Command whose payload is JSON and whose reply is the output as JSON.
///
/// An empty payload skips decoding and hands the handler `In::default()`.
pub fn command<In, Out, F, Fut, E>(token: impl Into<String>, handler: F) -> RouteBuilder<Message, In, Out, String>
where
    In: DeserializeOwned + Default + Send + 'static,
    Out: Serialize + Send + 'static,
    F: Fn(DispatchContext, In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Out, E>> + Send + 'static,
    E: Into<DispatchError>,
{
    with_json_input(Route::builder(token.into(), handler)).encoder(|out: Out| {
        serde_json::to_string(&out).map_err(DispatchError::encode)
    })
}

/// Command with no encoder: the output is sent with its `Display` rendering
pub fn raw_command<In, Out, F, Fut, E>(token: impl Into<String>, handler: F) -> RouteBuilder<Message, In, Out, String>
where
    In: DeserializeOwned + Default + Send + 'static,
    Out: Display + Send + 'static,
    F: Fn(DispatchContext, In) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Out, E>> + Send + 'static,
    E: Into<DispatchError>,
{
    with_json_input(Route::builder(token.into(), handler)).fallback(stringify())
}

fn with_json_input<In, Out>(
    builder: RouteBuilder<Message, In, Out, String>,
) -> RouteBuilder<Message, In, Out, String>
where
    In: DeserializeOwned + Default + Send + 'static,
    Out: Send + 'static,
{
    builder.decoder(|message: &Message| -> DispatchResult<In> {
        let payload = message.payload().trim();
        if payload.is_empty() {
            return Ok(In::default());
        }
        decode_json(payload.as_bytes())
    })
}

/// Reply text for a classified failure
pub fn fallback_text(classification: &Classification) -> String {
    match classification.kind {
        ErrorKind::NotPermitted => NOT_PERMITTED_TEXT.to_string(),
        ErrorKind::Decode => DECODE_FAILED_TEXT.to_string(),
        ErrorKind::Encode => ENCODE_FAILED_TEXT.to_string(),
        ErrorKind::Classified if classification.is_client_error() => classification.message.clone(),
        ErrorKind::Classified | ErrorKind::Internal => INTERNAL_TEXT.to_string(),
    }
}

/// Routes chat commands to registered handlers and replies through a session
pub struct ChatRouter {
    parser: CommandParser,
    chain: MiddlewareChain<Message, String>,
    routes: HashMap<String, Registration<Message, String>>,
    session: Arc<dyn ChatSession>,
    shutdown: CancellationToken,
}

impl ChatRouter {
    pub fn new(
        parser: CommandParser,
        chain: MiddlewareChain<Message, String>,
        session: Arc<dyn ChatSession>,
    ) -> Self {
        Self {
            parser,
            chain,
            routes: HashMap::new(),
            session,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn add_command<In, Out>(&mut self, route: ChatRoute<In, Out>) -> Result<(), ConfigError>
    where
        In: Send + 'static,
        Out: Send + 'static,
    {
        let token = route.selector().clone();
        if !token.starts_with('/') || token.len() < 2 {
            return Err(ConfigError::InvalidValue(format!(
                "command must look like /name: {}",
                token
            )));
        }
        if self.routes.contains_key(&token) {
            return Err(ConfigError::InvalidValue(format!(
                "command registered twice: {}",
                token
            )));
        }

        tracing::debug!(command = %token, "registered chat command");
        self.routes.insert(token, route.register(&self.chain));
        Ok(())
    }

    /// Registered command tokens, sorted
    pub fn commands(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        tokens.sort_unstable();
        tokens
    }

    /// Parse raw text and dispatch it
    pub async fn dispatch_text(&self, chat_id: &str, text: &str, sender: Option<User>) -> Option<String> {
        let message = self.parser.parse(chat_id, text, sender);
        self.dispatch(message).await
    }

    /// Dispatch one message and send the reply, returning the text sent.
    ///
    /// Non-command messages and unknown commands get no reply.
    pub async fn dispatch(&self, message: Message) -> Option<String> {
        let Some(token) = message.command().map(str::to_string) else {
            tracing::debug!(chat_id = %message.chat_id, "ignoring non-command message");
            return None;
        };
        let Some(registration) = self.routes.get(&token) else {
            tracing::debug!(chat_id = %message.chat_id, command = %token, "unknown command");
            return None;
        };

        let chat_id = message.chat_id.clone();
        let ctx = DispatchContext::new(token)
            .with_cancellation(self.shutdown.child_token())
            .with_field("chat_id", chat_id.clone());

        let text = match registration.invoke(ctx, message).await {
            Ok(text) => text,
            Err(classification) => fallback_text(&classification),
        };

        if text.is_empty() {
            tracing::debug!(chat_id = %chat_id, "empty reply not sent");
            return Some(text);
        }
        if let Err(e) = self.session.send_message(&chat_id, &text).await {
            tracing::error!(chat_id = %chat_id, error = %e, "failed to send reply");
        }
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn classification(kind: ErrorKind, status: StatusCode, message: &str) -> Classification {
        Classification {
            kind,
            status,
            message: message.to_string(),
            cause: String::new(),
        }
    }

    #[test]
    fn test_fallback_texts() {
        assert_eq!(
            fallback_text(&classification(ErrorKind::NotPermitted, StatusCode::METHOD_NOT_ALLOWED, "x")),
            NOT_PERMITTED_TEXT
        );
        assert_eq!(
            fallback_text(&classification(ErrorKind::Decode, StatusCode::BAD_REQUEST, "x")),
            DECODE_FAILED_TEXT
        );
        assert_eq!(
            fallback_text(&classification(ErrorKind::Encode, StatusCode::INTERNAL_SERVER_ERROR, "x")),
            ENCODE_FAILED_TEXT
        );
        assert_eq!(
            fallback_text(&classification(ErrorKind::Classified, StatusCode::NOT_FOUND, "no such user")),
            "no such user"
        );
        assert_eq!(
            fallback_text(&classification(ErrorKind::Classified, StatusCode::BAD_GATEWAY, "upstream")),
            INTERNAL_TEXT
        );
        assert_eq!(
            fallback_text(&classification(ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR, "x")),
            INTERNAL_TEXT
        );
    }

    #[test]
    fn test_message_as_inbound() {
        let message = Message::from_command("1", "/find", "{}").with_sender(User::new("42"));
        assert_eq!(Inbound::selector(&message), "/find");
        assert_eq!(Inbound::payload(&message), "{}");
        assert_eq!(message.principal().as_deref(), Some("42"));
    }
}
