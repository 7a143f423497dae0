use std::sync::Arc;

use crate::{
    ai::AiProvider,
    blacklist::BlacklistRegistry,
    domain::{MessageRef, QuarantineRecord, UserAccount},
    messaging::{port::ChatPlatform, types::InboundMessage},
    notices,
    store::Store,
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModerationDecision {
    pub forward: bool,
    pub reason: Option<String>,
    /// "Checking" notice left in the user's chat for the caller to turn into the rejection.
    pub notice: Option<MessageRef>,
}

impl ModerationDecision {
    fn pass() -> Self {
        Self {
            forward: true,
            reason: None,
            notice: None,
        }
    }

    fn reject(reason: String, notice: Option<MessageRef>) -> Self {
        Self {
            forward: false,
            reason: Some(reason),
            notice,
        }
    }
}

/// Content classifier gate. Fail-open: classifier trouble forwards the message.
pub struct ModerationGate {
    enabled: bool,
    provider: Option<Arc<dyn AiProvider>>,
    platform: Arc<dyn ChatPlatform>,
    blacklist: Arc<BlacklistRegistry>,
    store: Arc<dyn Store>,
}

impl ModerationGate {
    pub fn new(
        enabled: bool,
        provider: Option<Arc<dyn AiProvider>>,
        platform: Arc<dyn ChatPlatform>,
        blacklist: Arc<BlacklistRegistry>,
        store: Arc<dyn Store>,
    ) -> Self {
        Self {
            enabled,
            provider,
            platform,
            blacklist,
            store,
        }
    }

    pub async fn evaluate(
        &self,
        message: &InboundMessage,
        account: &UserAccount,
    ) -> Result<ModerationDecision> {
        let Some(provider) = self.provider.as_ref().filter(|_| self.enabled) else {
            return Ok(ModerationDecision::pass());
        };
        let user_id = message.user_id();
        if account.moderation_opt_out || self.blacklist.is_exempt(user_id)? {
            return Ok(ModerationDecision::pass());
        }
        let content = &message.content;
        if content.is_uninspectable() {
            return Ok(ModerationDecision::pass());
        }

        let image = match content.inspectable_image() {
            Some(file_id) => match self.platform.download_file(file_id).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "image download failed; forwarding unchecked");
                    return Ok(ModerationDecision::pass());
                }
            },
            None => None,
        };
        let text = content.text();
        if text.is_none() && image.is_none() {
            return Ok(ModerationDecision::pass());
        }

        let notice = match self
            .platform
            .send_text(message.chat_id, notices::ANALYZING)
            .await
        {
            Ok(m) => Some(m),
            Err(e) => {
                tracing::debug!(user_id = %user_id, error = %e, "could not send moderation notice");
                None
            }
        };

        let verdict = match provider.analyze(text, image.as_deref()).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    user_id = %user_id,
                    provider = provider.name(),
                    error = %e,
                    "classifier unavailable; forwarding unchecked"
                );
                self.retire(notice).await;
                return Ok(ModerationDecision::pass());
            }
        };
        if !verdict.is_spam {
            self.retire(notice).await;
            return Ok(ModerationDecision::pass());
        }

        let reason = if verdict.reason.trim().is_empty() {
            "flagged by content filter".to_string()
        } else {
            verdict.reason.trim().to_string()
        };
        self.store.append_quarantine(&QuarantineRecord {
            user_id,
            message_id: message.message_id,
            content: text.map(str::to_string),
            reason: reason.clone(),
            media_type: content.media_type().map(str::to_string),
            media_file_id: content.inspectable_image().map(str::to_string),
            filtered_at: message.received_at,
        })?;
        tracing::info!(user_id = %user_id, reason = %reason, "message quarantined");
        Ok(ModerationDecision::reject(reason, notice))
    }

    async fn retire(&self, notice: Option<MessageRef>) {
        if let Some(msg) = notice {
            if let Err(e) = self.platform.delete_message(msg).await {
                tracing::debug!(error = %e, "could not delete moderation notice");
            }
        }
    }
}
