//! Console adapter for development/testing

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::errors::SessionError;
use crate::domain::entities::User;
use crate::domain::traits::{ChatSession, SessionInfo};
use crate::infrastructure::transport::ChatRouter;

/// Chat id every console line is dispatched under
pub const CONSOLE_CHAT_ID: &str = "console";

/// Console chat session for local development
pub struct ConsoleAdapter {
    info: SessionInfo,
    sender: Option<mpsc::Sender<String>>,
}

impl ConsoleAdapter {
    pub fn new() -> Self {
        Self {
            info: SessionInfo {
                id: "console".to_string(),
                name: "switchyard".to_string(),
                username: "console".to_string(),
            },
            sender: None,
        }
    }

    /// Forward replies to a channel instead of stdout
    pub fn with_sender(mut self, sender: mpsc::Sender<String>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Dispatch stdin lines until EOF or shutdown
    pub async fn run(router: Arc<ChatRouter>, shutdown: CancellationToken) -> std::io::Result<()> {
        Self::run_with(router, BufReader::new(tokio::io::stdin()), shutdown).await
    }

    /// Dispatch each line read from `input` as a message from the console user
    pub async fn run_with<R>(router: Arc<ChatRouter>, input: R, shutdown: CancellationToken) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        tracing::info!(commands = ?router.commands(), "starting console session (dev mode)");
        let mut lines = input.lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            router
                .dispatch_text(CONSOLE_CHAT_ID, &line, Some(User::new(CONSOLE_CHAT_ID)))
                .await;
        }

        tracing::info!("console session closed");
        Ok(())
    }
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatSession for ConsoleAdapter {
    async fn send_message(&self, _chat_id: &str, text: &str) -> Result<String, SessionError> {
        match &self.sender {
            Some(sender) => sender
                .send(text.to_string())
                .await
                .map_err(|e| SessionError::Send(e.to_string()))?,
            None => println!("[BOT] {}", text),
        }
        Ok("console_msg".to_string())
    }

    fn session_info(&self) -> SessionInfo {
        self.info.clone()
    }
}
