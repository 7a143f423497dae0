use std::sync::Arc;

use crate::{
    ai::AiProvider,
    domain::ThreadId,
    formatting::escape_html,
    messaging::{port::ChatPlatform, types::InboundMessage},
};

/// Knowledge-base answers for relayed messages. Best effort: failures are logged only.
pub struct AutoReplier {
    provider: Arc<dyn AiProvider>,
    knowledge: String,
    platform: Arc<dyn ChatPlatform>,
}

impl AutoReplier {
    pub fn new(provider: Arc<dyn AiProvider>, knowledge: String, platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            provider,
            knowledge,
            platform,
        }
    }

    /// Answer the user and mirror the answer into their thread.
    pub async fn reply(&self, message: &InboundMessage, thread: ThreadId) {
        let Some(text) = message.content.text() else {
            return;
        };
        let user_id = message.user_id();

        let reply = match self.provider.generate_autoreply(text, &self.knowledge).await {
            Ok(Some(reply)) if !reply.trim().is_empty() => reply,
            Ok(_) => {
                tracing::debug!(user_id = %user_id, "knowledge base has no answer");
                return;
            }
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "auto reply generation failed");
                return;
            }
        };

        if let Err(e) = self.platform.send_text(message.chat_id, &reply).await {
            tracing::warn!(user_id = %user_id, error = %e, "auto reply delivery failed");
            return;
        }
        let mirror = format!("🤖 <b>Auto reply sent</b>\n\n{}", escape_html(&reply));
        if let Err(e) = self.platform.send_to_thread(thread, &mirror, None).await {
            tracing::warn!(user_id = %user_id, thread_id = %thread, error = %e, "auto reply mirror failed");
        }
    }
}
