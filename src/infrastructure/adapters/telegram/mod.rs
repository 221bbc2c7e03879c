//! Telegram adapter

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::application::errors::{ClientError, SessionError};
use crate::domain::entities::User as ChatUser;
use crate::domain::traits::{ChatSession, SessionInfo};
use crate::infrastructure::http_client::{HttpClient, LoggingInterceptor};
use crate::infrastructure::transport::ChatRouter;

/// Telegram API base URL
const API_BASE: &str = "https://api.telegram.org";

/// Pause before polling again after a failed poll
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl From<&User> for ChatUser {
    fn from(user: &User) -> Self {
        let mut chat_user = ChatUser::new(user.id.to_string());
        chat_user.username = user.username.clone();
        chat_user.first_name = user.first_name.clone();
        chat_user.last_name = user.last_name.clone();
        chat_user
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    result: T,
}

/// Telegram bot adapter: a chat session plus a long-polling update loop
pub struct TelegramAdapter {
    client: HttpClient,
    info: SessionInfo,
    poll_timeout: Duration,
}

impl TelegramAdapter {
    pub fn new(token: &str, poll_timeout: Duration) -> Result<Self, SessionError> {
        Self::with_api_base(API_BASE, token, poll_timeout)
    }

    /// Talk to a different API host
    pub fn with_api_base(api_base: &str, token: &str, poll_timeout: Duration) -> Result<Self, SessionError> {
        let client = HttpClient::builder(format!("{}/bot{}", api_base.trim_end_matches('/'), token))
            .timeout(poll_timeout + Duration::from_secs(10))
            .interceptor(LoggingInterceptor::new(false))
            .build()?;

        Ok(Self {
            client,
            info: SessionInfo {
                id: "unknown".to_string(),
                name: "switchyard".to_string(),
                username: "switchyard_bot".to_string(),
            },
            poll_timeout,
        })
    }

    /// Fetch bot identity from the getMe endpoint
    pub async fn fetch_bot_info(&mut self) -> Result<(), SessionError> {
        #[derive(Deserialize)]
        struct BotInfoResponse {
            id: i64,
            first_name: String,
            username: String,
        }

        let response = self.client.get("/getMe", &(), &[]).await.map_err(session_error)?;
        let data: ApiResponse<BotInfoResponse> = response.json()?;

        self.info = SessionInfo {
            id: data.result.id.to_string(),
            name: data.result.first_name,
            username: data.result.username,
        };
        Ok(())
    }

    /// Get updates using the getUpdates long poll
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, SessionError> {
        #[derive(Serialize)]
        struct GetUpdatesRequest {
            offset: i64,
            timeout: u64,
            allowed_updates: Vec<String>,
        }

        let request = GetUpdatesRequest {
            offset,
            timeout: self.poll_timeout.as_secs(),
            allowed_updates: vec!["message".to_string()],
        };

        let response = self
            .client
            .post("/getUpdates", &request, &[])
            .await
            .map_err(session_error)?;
        let data: ApiResponse<Vec<Update>> = response.json()?;
        Ok(data.result)
    }

    /// Get the next update offset
    pub fn next_offset(updates: &[Update]) -> Option<i64> {
        updates.iter().map(|u| u.update_id + 1).max()
    }

    /// Advertise the router's commands in the Telegram client menu
    pub async fn register_commands(&self, commands: &[&str]) -> Result<(), SessionError> {
        #[derive(Serialize)]
        struct Command {
            command: String,
            description: String,
        }

        #[derive(Serialize)]
        struct SetMyCommandsRequest {
            commands: Vec<Command>,
        }

        let request = SetMyCommandsRequest {
            commands: commands
                .iter()
                .map(|c| Command {
                    command: c.trim_start_matches('/').to_string(),
                    description: format!("Run {}", c),
                })
                .collect(),
        };

        self.client
            .post("/setMyCommands", &request, &[])
            .await
            .map_err(session_error)?;
        tracing::info!(count = commands.len(), "registered bot commands with Telegram");
        Ok(())
    }

    /// Poll for updates until `shutdown` fires; each message is dispatched on
    /// its own task
    pub async fn poll(&self, router: Arc<ChatRouter>, shutdown: CancellationToken) -> Result<(), SessionError> {
        tracing::info!(bot = %self.info.username, "starting Telegram polling");
        let mut offset = 0;

        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Telegram polling stopped");
                    return Ok(());
                }
                result = self.get_updates(offset) => result,
            };

            let updates = match result {
                Ok(updates) => updates,
                Err(SessionError::Unauthorized(reason)) => return Err(SessionError::Unauthorized(reason)),
                Err(e) => {
                    tracing::warn!(error = %e, "Telegram poll failed, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(RETRY_DELAY) => continue,
                    }
                }
            };

            if let Some(next) = Self::next_offset(&updates) {
                offset = offset.max(next);
            }

            for update in updates {
                let Some(message) = update.message else { continue };
                let Some(text) = message.text else { continue };
                let chat_id = message.chat.id.to_string();
                let sender = message.from.as_ref().map(ChatUser::from);
                let router = Arc::clone(&router);
                tokio::spawn(async move {
                    router.dispatch_text(&chat_id, &text, sender).await;
                });
            }
        }
    }
}

fn session_error(err: ClientError) -> SessionError {
    match err {
        ClientError::Status { status, body } if status == StatusCode::UNAUTHORIZED => {
            SessionError::Unauthorized(body)
        }
        other => SessionError::Transport(other),
    }
}

#[async_trait]
impl ChatSession for TelegramAdapter {
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, SessionError> {
        #[derive(Serialize)]
        struct SendMessageRequest<'a> {
            chat_id: &'a str,
            text: &'a str,
        }

        #[derive(Deserialize)]
        struct MessageResult {
            message_id: i64,
        }

        tracing::debug!(chat_id, "sending Telegram message");
        let response = self
            .client
            .post("/sendMessage", &SendMessageRequest { chat_id, text }, &[])
            .await
            .map_err(session_error)?;
        let data: ApiResponse<MessageResult> = response.json()?;
        Ok(data.result.message_id.to_string())
    }

    fn session_info(&self) -> SessionInfo {
        self.info.clone()
    }
}
