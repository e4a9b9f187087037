pub mod telegram;

use anyhow::Result;
use async_trait::async_trait;

/// A message received from the chat platform
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    /// Platform chat ID the reply goes back to
    pub chat_id: i64,
    /// Display name of the sender, for logs only
    pub user_name: String,
    /// The message text; `None` for stickers, photos and the like
    pub text: Option<String>,
}

/// Outbound side of a chat platform.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Show a transient "typing" indicator in the chat.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;

    /// Deliver a reply to the chat.
    async fn send_reply(&self, chat_id: i64, text: &str) -> Result<()>;
}
