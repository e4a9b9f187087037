use tracing::{error, info, warn};

use crate::llm::{GenerationError, Generator};
use crate::platform::{ChatSink, IncomingMessage};

/// Sent when neither model produced a reply.
pub const APOLOGY_TEXT: &str =
    "⚠️ Unable to reach AI models right now. Please try asking again in a moment.";

/// Which step of the fallback chain produced the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySource {
    Primary,
    Fallback,
    Apology,
}

/// Relays chat messages to a primary model, then a fallback model, then
/// gives up with [`APOLOGY_TEXT`]. Each tier is tried exactly once.
pub struct Relay<G> {
    generator: G,
    primary_model: String,
    fallback_model: String,
}

impl<G: Generator> Relay<G> {
    pub fn new(
        generator: G,
        primary_model: impl Into<String>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            generator,
            primary_model: primary_model.into(),
            fallback_model: fallback_model.into(),
        }
    }

    /// Handle one inbound message. Returns `None` when the message was
    /// skipped (no text), otherwise which tier produced the reply.
    pub async fn handle(
        &self,
        sink: &dyn ChatSink,
        incoming: &IncomingMessage,
    ) -> Option<ReplySource> {
        let text = match incoming.text.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => return None,
        };

        info!(
            "Message from {} in chat {}: {} chars",
            incoming.user_name,
            incoming.chat_id,
            text.len()
        );

        if let Err(e) = sink.send_typing(incoming.chat_id).await {
            warn!("Failed to send typing indicator: {:#}", e);
        }

        let (reply, source) = self.compose_reply(text).await;

        if let Err(e) = sink.send_reply(incoming.chat_id, &reply).await {
            error!("Failed to send reply to chat {}: {:#}", incoming.chat_id, e);
        }

        Some(source)
    }

    /// Run the two-tier generation policy for one prompt.
    pub async fn compose_reply(&self, text: &str) -> (String, ReplySource) {
        let primary_err = match self.attempt(&self.primary_model, text).await {
            Ok(reply) => return (reply, ReplySource::Primary),
            Err(e) => e,
        };
        log_failure("Primary", &self.primary_model, &primary_err);

        match self.attempt(&self.fallback_model, text).await {
            Ok(reply) => {
                info!("Fallback model '{}' answered", self.fallback_model);
                (reply, ReplySource::Fallback)
            }
            Err(e) => {
                log_failure("Fallback", &self.fallback_model, &e);
                error!("Both models failed, sending apology");
                (APOLOGY_TEXT.to_string(), ReplySource::Apology)
            }
        }
    }

    /// One tier. Blank output counts as a failure so no empty reply is sent.
    async fn attempt(&self, model: &str, text: &str) -> Result<String, GenerationError> {
        let reply = self.generator.generate(model, text).await?;
        if reply.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        Ok(reply)
    }
}

fn log_failure(tier: &str, model: &str, err: &GenerationError) {
    if err.is_permanent() {
        warn!("{} model '{}' failed (check configuration): {}", tier, model, err);
    } else {
        warn!("{} model '{}' failed: {}", tier, model, err);
    }
}
