use std::sync::Arc;

use chrono::Utc;

use crate::{
    blacklist::BlacklistRegistry,
    domain::{BlockStatus, ThreadId, UserAccount, UserId},
    errors::Error,
    formatting,
    messaging::{
        port::ChatPlatform,
        types::{CallbackCommand, InboundMessage, InlineKeyboard},
    },
    store::Store,
    Result,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadResolution {
    /// Mapped thread exists; the caller relays the message.
    Existing(ThreadId),
    /// Thread was just created and the message already relayed into it.
    Created(ThreadId),
    /// Mapped thread is gone; mapping and verification were cleared.
    Invalid,
    /// The platform refused to create a thread.
    CreateFailed,
}

/// Durable user <-> thread mapping on top of `UserAccount.thread_id`.
pub struct ThreadRouter {
    platform: Arc<dyn ChatPlatform>,
    store: Arc<dyn Store>,
    blacklist: Arc<BlacklistRegistry>,
}

impl ThreadRouter {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn Store>,
        blacklist: Arc<BlacklistRegistry>,
    ) -> Self {
        Self {
            platform,
            store,
            blacklist,
        }
    }

    pub async fn resolve(&self, message: &InboundMessage) -> Result<ThreadResolution> {
        let user_id = message.user_id();
        let account = self
            .store
            .user(user_id)?
            .ok_or_else(|| Error::Persistence(format!("no account for user {user_id}")))?;

        if let Some(thread) = account.thread_id {
            return match self.platform.probe_thread(thread).await {
                Ok(true) => Ok(ThreadResolution::Existing(thread)),
                Ok(false) | Err(Error::ThreadInvalid { .. }) => {
                    self.invalidate(user_id)?;
                    Ok(ThreadResolution::Invalid)
                }
                Err(e) => {
                    // Inconclusive probe; relay will surface a real loss.
                    tracing::warn!(user_id = %user_id, thread_id = %thread, error = %e, "thread probe failed");
                    Ok(ThreadResolution::Existing(thread))
                }
            };
        }

        self.create_for(account, message).await
    }

    async fn create_for(
        &self,
        mut account: UserAccount,
        message: &InboundMessage,
    ) -> Result<ThreadResolution> {
        let user_id = account.id;
        let title = formatting::thread_title(&account);
        let thread = match self.platform.create_thread(&title).await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "thread creation failed");
                return Ok(ThreadResolution::CreateFailed);
            }
        };

        account.thread_id = Some(thread);
        self.store.upsert_user(&account)?;
        tracing::info!(user_id = %user_id, thread_id = %thread, "thread created");

        let status = self.blacklist.status(user_id)?;
        let card = formatting::profile_card(&account, status.blocked);
        self.platform
            .send_to_thread(thread, &card, Some(moderation_keyboard(user_id, status)))
            .await?;
        self.platform.relay_to_thread(thread, message).await?;

        Ok(ThreadResolution::Created(thread))
    }

    /// Forget a vanished thread and require the user to verify again.
    pub fn invalidate(&self, user_id: UserId) -> Result<()> {
        let mut account = self
            .store
            .user(user_id)?
            .unwrap_or_else(|| UserAccount::placeholder(user_id, Utc::now()));
        let old = account.thread_id.take();
        account.is_verified = false;
        self.store.upsert_user(&account)?;
        tracing::warn!(user_id = %user_id, thread_id = ?old.map(|t| t.0), "thread invalidated");
        Ok(())
    }

    pub fn user_for_thread(&self, thread: ThreadId) -> Result<Option<UserId>> {
        Ok(self.store.user_by_thread(thread)?.map(|a| a.id))
    }

    pub fn thread_for_user(&self, user_id: UserId) -> Result<Option<ThreadId>> {
        Ok(self.store.user(user_id)?.and_then(|a| a.thread_id))
    }
}

/// Profile-card button reflecting the current blacklist status.
///
/// Permanent bans get an inert marker; lifting one takes an explicit `/unblock`.
pub fn moderation_keyboard(user_id: UserId, status: BlockStatus) -> InlineKeyboard {
    match status {
        BlockStatus {
            blocked: true,
            permanent: true,
        } => InlineKeyboard::single(
            "⛔ Permanently banned",
            CallbackCommand::AlreadyBanned { user: user_id },
        ),
        BlockStatus { blocked: true, .. } => {
            InlineKeyboard::single("✅ Unblock", CallbackCommand::AdminUnblock { user: user_id })
        }
        _ => InlineKeyboard::single("🚫 Block", CallbackCommand::AdminBlock { user: user_id }),
    }
}
