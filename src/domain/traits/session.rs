use async_trait::async_trait;

use crate::application::errors::SessionError;

/// Chat session - the outbound half of a chat platform adapter
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// Send a text message to a chat, returning the platform message id
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<String, SessionError>;

    /// Get session info
    fn session_info(&self) -> SessionInfo;
}

/// Chat session information
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub username: String,
}
