use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageId, ReplyParameters};
use tracing::{debug, info};

use crate::llm::GeminiClient;
use crate::platform::{ChatSink, IncomingMessage};
use crate::relay::Relay;

/// Telegram rejects messages above 4096 chars; leave some headroom.
const MAX_MESSAGE_LEN: usize = 4000;

/// Bot commands are left to other handlers.
fn is_command(text: &str) -> bool {
    text.starts_with('/')
}

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

/// Sends replies threaded under the message that triggered them.
struct TelegramSink {
    bot: Bot,
    reply_to: MessageId,
}

#[async_trait]
impl ChatSink for TelegramSink {
    async fn send_typing(&self, chat_id: i64) -> Result<()> {
        self.bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await?;
        Ok(())
    }

    async fn send_reply(&self, chat_id: i64, text: &str) -> Result<()> {
        for (i, chunk) in split_message(text, MAX_MESSAGE_LEN).into_iter().enumerate() {
            let mut request = self.bot.send_message(ChatId(chat_id), chunk);
            if i == 0 {
                request = request.reply_parameters(
                    ReplyParameters::new(self.reply_to).allow_sending_without_reply(),
                );
            }
            request.await?;
        }
        Ok(())
    }
}

/// Run the Telegram long-polling dispatcher until Ctrl-C.
pub async fn run(relay: Arc<Relay<GeminiClient>>, bot: Bot) -> Result<()> {
    info!("Starting Telegram platform...");

    let handler = Update::filter_message()
        .filter(|msg: Message| !msg.text().is_some_and(is_command))
        .endpoint(handle_message);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![relay])
        .default_handler(|upd| async move {
            debug!("Ignored update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("telegram"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(
    bot: Bot,
    msg: Message,
    relay: Arc<Relay<GeminiClient>>,
) -> ResponseResult<()> {
    let incoming = IncomingMessage {
        chat_id: msg.chat.id.0,
        user_name: msg
            .from
            .as_ref()
            .map(|u| u.first_name.clone())
            .unwrap_or_default(),
        text: msg.text().map(str::to_string),
    };

    let sink = TelegramSink {
        bot,
        reply_to: msg.id,
    };

    // Failures are logged inside the relay and never reach the dispatcher.
    relay.handle(&sink, &incoming).await;

    Ok(())
}
