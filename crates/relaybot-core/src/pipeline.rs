//! Per-message orchestration: rate limit, blacklist, verification, moderation,
//! thread resolution, relay, auto reply.
//!
//! Everything for one user runs under that user's lock, so attempt counting,
//! escalation and the pending-message buffer are race-free per user.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    ai::AiProvider,
    autoreply::AutoReplier,
    blacklist::{BlacklistRegistry, UnblockOutcome},
    config::RelayPolicy,
    domain::{
        BlacklistEntry, BlockStatus, ChatId, ExemptionEntry, MessageId, MessageRef, Modality,
        ThreadId, UserAccount, UserId, UserProfile, SYSTEM_ADMIN,
    },
    errors::Error,
    formatting::escape_html,
    messaging::{
        port::ChatPlatform,
        types::{CallbackCommand, InboundMessage},
    },
    moderation::ModerationGate,
    notices,
    rate_limit::{RateDecision, RateLimiter},
    store::Store,
    threads::{moderation_keyboard, ThreadResolution, ThreadRouter},
    verification::{AnswerOutcome, Challenge, ChallengeFactory, VerificationManager},
    Result,
};

/// What happened to one inbound message or answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    RateWarned,
    RateBanned,
    Blocked { permanent: bool },
    UnblockChallenged { resumed: bool },
    ChallengeIssued { resumed: bool },
    Quarantined { reason: String },
    Relayed { thread: ThreadId, created: bool },
    /// Thread vanished; the message is buffered behind a fresh challenge.
    ThreadReset,
    ThreadCreateFailed,
    DeliveryFailed,

    ChallengeExpired,
    Verified { replay: Option<Box<PipelineOutcome>> },
    ChallengeRetried { attempts_remaining: u32 },
    VerificationBanned,
    Unblocked,
    UnblockFailed,
}

#[derive(Default)]
pub struct UserLocks {
    inner: Mutex<HashMap<UserId, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub async fn lock_user(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            // Entries nobody holds or waits on are only referenced by the map.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(user_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct RelayPipeline {
    policy: RelayPolicy,
    platform: Arc<dyn ChatPlatform>,
    store: Arc<dyn Store>,
    rate: Mutex<RateLimiter>,
    blacklist: Arc<BlacklistRegistry>,
    verification: Arc<VerificationManager>,
    moderation: ModerationGate,
    router: ThreadRouter,
    autoreply: Option<AutoReplier>,
    /// At most one buffered message per user while a challenge is open.
    pending: Mutex<HashMap<UserId, InboundMessage>>,
    locks: UserLocks,
}

impl RelayPipeline {
    pub fn new(
        policy: RelayPolicy,
        platform: Arc<dyn ChatPlatform>,
        store: Arc<dyn Store>,
        provider: Option<Arc<dyn AiProvider>>,
        knowledge_base: Option<String>,
    ) -> Self {
        let factory = Arc::new(ChallengeFactory::new(provider.clone(), policy.captcha_charset));
        let blacklist = Arc::new(BlacklistRegistry::new(
            store.clone(),
            factory.clone(),
            policy.verification_ttl,
        ));
        let verification = Arc::new(VerificationManager::new(
            factory,
            blacklist.clone(),
            store.clone(),
            policy.verification_ttl,
            policy.max_verification_attempts,
        ));
        let moderation = ModerationGate::new(
            policy.moderation_enabled,
            provider.clone(),
            platform.clone(),
            blacklist.clone(),
            store.clone(),
        );
        let router = ThreadRouter::new(platform.clone(), store.clone(), blacklist.clone());
        let autoreply = match (policy.autoreply_enabled, provider, knowledge_base) {
            (true, Some(p), Some(kb)) => Some(AutoReplier::new(p, kb, platform.clone())),
            (true, _, _) => {
                tracing::warn!("auto reply enabled but no provider or knowledge base; disabled");
                None
            }
            _ => None,
        };

        Self {
            rate: Mutex::new(RateLimiter::new(
                policy.rate_limit_enabled,
                policy.rate_limit_per_minute,
            )),
            policy,
            platform,
            store,
            blacklist,
            verification,
            moderation,
            router,
            autoreply,
            pending: Mutex::new(HashMap::new()),
            locks: UserLocks::default(),
        }
    }

    pub fn blacklist(&self) -> &BlacklistRegistry {
        &self.blacklist
    }

    #[cfg(test)]
    pub(crate) fn verification(&self) -> &VerificationManager {
        &self.verification
    }

    pub fn router(&self) -> &ThreadRouter {
        &self.router
    }

    #[cfg(test)]
    pub(crate) async fn pending_for(&self, user_id: UserId) -> Option<InboundMessage> {
        self.pending.lock().await.get(&user_id).cloned()
    }

    // ============== Inbound messages ==============

    pub async fn handle_message(&self, msg: InboundMessage) -> Result<PipelineOutcome> {
        let user_id = msg.user_id();
        let _guard = self.locks.lock_user(user_id).await;
        let chat = msg.chat_id;

        let decision = { self.rate.lock().await.check(user_id) };
        match decision {
            RateDecision::Allowed => {}
            RateDecision::Warn => {
                tracing::info!(user_id = %user_id, "rate limit warning");
                self.notify(chat, notices::RATE_WARNING).await;
                return Ok(PipelineOutcome::RateWarned);
            }
            RateDecision::Banned => {
                if !self.blacklist.status(user_id)?.permanent {
                    self.blacklist
                        .block(user_id, "rate limit exceeded", SYSTEM_ADMIN, true)
                        .await?;
                }
                self.discard_open_state(user_id).await;
                self.notify(chat, notices::RATE_BANNED).await;
                return Ok(PipelineOutcome::RateBanned);
            }
        }

        let status = self.blacklist.status(user_id)?;
        if status.blocked {
            if status.permanent {
                self.notify(chat, notices::PERMANENTLY_BLOCKED).await;
                return Ok(PipelineOutcome::Blocked { permanent: true });
            }
            if self.policy.auto_unblock_enabled {
                if let Some((challenge, resumed)) = self.blacklist.start_unblock(user_id).await? {
                    let intro = if resumed {
                        notices::UNBLOCK_RESUMED
                    } else {
                        notices::UNBLOCK_PROMPT
                    };
                    self.send_challenge(chat, intro, &challenge, |option| {
                        CallbackCommand::Unblock { option }
                    })
                    .await?;
                    return Ok(PipelineOutcome::UnblockChallenged { resumed });
                }
            }
            self.notify(chat, notices::BLOCKED_CONTACT_ADMIN).await;
            return Ok(PipelineOutcome::Blocked { permanent: false });
        }

        let mut account = self.ensure_account(&msg.sender, chat, msg.received_at).await?;

        if !account.is_verified {
            if !self.policy.verification_enabled {
                account.is_verified = true;
                self.store.upsert_user(&account)?;
            } else {
                self.pending.lock().await.insert(user_id, msg);
                let modality = self.modality_for(&account);
                let (challenge, resumed) =
                    self.verification.issue_or_resume(user_id, modality).await?;
                let intro = if resumed {
                    notices::VERIFY_RESUMED
                } else {
                    notices::VERIFY_PROMPT
                };
                self.send_challenge(chat, intro, &challenge, |option| CallbackCommand::Verify {
                    option,
                })
                .await?;
                return Ok(PipelineOutcome::ChallengeIssued { resumed });
            }
        }

        self.deliver(msg, account).await
    }

    /// Moderation, thread resolution, relay and auto reply.
    async fn deliver(&self, msg: InboundMessage, account: UserAccount) -> Result<PipelineOutcome> {
        let user_id = msg.user_id();
        let chat = msg.chat_id;

        let decision = self.moderation.evaluate(&msg, &account).await?;
        if !decision.forward {
            let reason = decision.reason.unwrap_or_default();
            let text = notices::rejected(&reason);
            // The "checking" notice becomes the rejection when it still exists.
            let edited = match decision.notice {
                Some(notice) => match self.platform.edit_text(notice, &text, None).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!(user_id = %user_id, error = %e, "could not edit moderation notice");
                        false
                    }
                },
                None => false,
            };
            if !edited {
                self.notify(chat, &text).await;
            }
            return Ok(PipelineOutcome::Quarantined { reason });
        }

        let (thread, created) = match self.router.resolve(&msg).await {
            Ok(ThreadResolution::Existing(thread)) => {
                match self.platform.relay_to_thread(thread, &msg).await {
                    Ok(_) => (thread, false),
                    Err(e) if e.is_thread_invalid() => {
                        self.router.invalidate(user_id)?;
                        return self.reverify(msg, &account).await;
                    }
                    Err(e) => return self.delivery_failed(chat, user_id, e).await,
                }
            }
            Ok(ThreadResolution::Created(thread)) => (thread, true),
            Ok(ThreadResolution::Invalid) => return self.reverify(msg, &account).await,
            Ok(ThreadResolution::CreateFailed) => {
                self.notify(chat, notices::THREAD_CREATE_FAILED).await;
                return Ok(PipelineOutcome::ThreadCreateFailed);
            }
            Err(e) if e.is_thread_invalid() => {
                self.router.invalidate(user_id)?;
                return self.reverify(msg, &account).await;
            }
            Err(e) if e.is_persistence() => return Err(e),
            Err(e) => return self.delivery_failed(chat, user_id, e).await,
        };

        tracing::info!(user_id = %user_id, thread_id = %thread, created, "message relayed");
        if let Some(autoreply) = &self.autoreply {
            autoreply.reply(&msg, thread).await;
        }
        Ok(PipelineOutcome::Relayed { thread, created })
    }

    /// The user's thread is gone: buffer the message behind a fresh challenge.
    async fn reverify(&self, msg: InboundMessage, account: &UserAccount) -> Result<PipelineOutcome> {
        let user_id = msg.user_id();
        let chat = msg.chat_id;

        if !self.policy.verification_enabled {
            let mut account = self
                .store
                .user(user_id)?
                .unwrap_or_else(|| account.clone());
            account.is_verified = true;
            self.store.upsert_user(&account)?;
            return match self.router.resolve(&msg).await {
                Ok(ThreadResolution::Created(thread)) => {
                    Ok(PipelineOutcome::Relayed { thread, created: true })
                }
                Ok(_) => {
                    self.notify(chat, notices::THREAD_CREATE_FAILED).await;
                    Ok(PipelineOutcome::ThreadCreateFailed)
                }
                Err(e) if e.is_persistence() => Err(e),
                Err(e) => self.delivery_failed(chat, user_id, e).await,
            };
        }

        let modality = self.modality_for(account);
        self.pending.lock().await.insert(user_id, msg);
        let challenge = self.verification.create_challenge(user_id, modality).await?;
        self.send_challenge(chat, notices::THREAD_CLOSED, &challenge, |option| {
            CallbackCommand::Verify { option }
        })
        .await?;
        Ok(PipelineOutcome::ThreadReset)
    }

    async fn delivery_failed(
        &self,
        chat: ChatId,
        user_id: UserId,
        e: Error,
    ) -> Result<PipelineOutcome> {
        tracing::error!(user_id = %user_id, error = %e, "relay failed; message dropped");
        self.notify(chat, notices::DELIVERY_FAILED).await;
        Ok(PipelineOutcome::DeliveryFailed)
    }

    // ============== Challenge answers ==============

    pub async fn handle_verification_answer(
        &self,
        user_id: UserId,
        option: usize,
        prompt: Option<MessageRef>,
    ) -> Result<PipelineOutcome> {
        let _guard = self.locks.lock_user(user_id).await;
        let chat = user_id.chat();

        let outcome = self.verification.submit_answer(user_id, option).await?;
        self.retire_prompt(prompt).await;

        match outcome {
            AnswerOutcome::Expired => {
                self.notify(chat, notices::VERIFICATION_EXPIRED).await;
                Ok(PipelineOutcome::ChallengeExpired)
            }
            AnswerOutcome::Verified => {
                let pending = self.pending.lock().await.remove(&user_id);
                let Some(msg) = pending else {
                    self.notify(chat, notices::VERIFIED_NOTHING_PENDING).await;
                    return Ok(PipelineOutcome::Verified { replay: None });
                };
                self.notify(chat, notices::VERIFIED_REPLAYING).await;
                let account = self
                    .store
                    .user(user_id)?
                    .ok_or_else(|| Error::Persistence(format!("no account for user {user_id}")))?;
                let replay = self.deliver(msg, account).await?;
                Ok(PipelineOutcome::Verified {
                    replay: Some(Box::new(replay)),
                })
            }
            AnswerOutcome::Retry {
                challenge,
                attempts_remaining,
            } => {
                self.send_challenge(
                    chat,
                    &notices::wrong_answer(attempts_remaining),
                    &challenge,
                    |option| CallbackCommand::Verify { option },
                )
                .await?;
                Ok(PipelineOutcome::ChallengeRetried { attempts_remaining })
            }
            AnswerOutcome::Banned => {
                self.pending.lock().await.remove(&user_id);
                self.notify(chat, notices::VERIFICATION_BANNED).await;
                Ok(PipelineOutcome::VerificationBanned)
            }
        }
    }

    pub async fn handle_unblock_answer(
        &self,
        user_id: UserId,
        option: usize,
        prompt: Option<MessageRef>,
    ) -> Result<PipelineOutcome> {
        let _guard = self.locks.lock_user(user_id).await;
        let chat = user_id.chat();

        let outcome = self.blacklist.answer_unblock(user_id, option).await?;
        self.retire_prompt(prompt).await;

        match outcome {
            UnblockOutcome::Expired => {
                self.notify(chat, notices::UNBLOCK_EXPIRED).await;
                Ok(PipelineOutcome::ChallengeExpired)
            }
            UnblockOutcome::Unblocked => {
                self.rate.lock().await.reset(user_id);
                self.notify(chat, notices::UNBLOCKED).await;
                self.thread_note(
                    user_id,
                    "✅ User unblocked themselves by answering the challenge.",
                    BlockStatus::default(),
                )
                .await;
                Ok(PipelineOutcome::Unblocked)
            }
            UnblockOutcome::PermanentlyBanned => {
                self.notify(chat, notices::PERMANENTLY_BLOCKED).await;
                Ok(PipelineOutcome::UnblockFailed)
            }
        }
    }

    // ============== Admin operations ==============

    pub async fn admin_block(
        &self,
        user_id: UserId,
        admin: i64,
        permanent: bool,
        reason: &str,
    ) -> Result<BlacklistEntry> {
        let _guard = self.locks.lock_user(user_id).await;
        let entry = self
            .blacklist
            .block(user_id, reason, admin, permanent)
            .await?;
        self.discard_open_state(user_id).await;

        let kind = if permanent { "permanently" } else { "temporarily" };
        let note = format!(
            "🚫 User {kind} blocked by admin <code>{admin}</code>.\nReason: {}",
            escape_html(reason)
        );
        let status = BlockStatus {
            blocked: true,
            permanent,
        };
        self.thread_note(user_id, &note, status).await;
        Ok(entry)
    }

    pub async fn admin_unblock(&self, user_id: UserId, admin: i64) -> Result<bool> {
        let _guard = self.locks.lock_user(user_id).await;
        let existed = self.blacklist.unblock(user_id).await?;
        self.rate.lock().await.reset(user_id);
        if existed {
            self.notify(user_id.chat(), notices::UNBLOCKED_BY_ADMIN).await;
            let note = format!("✅ User unblocked by admin <code>{admin}</code>.");
            self.thread_note(user_id, &note, BlockStatus::default()).await;
        }
        Ok(existed)
    }

    pub async fn admin_exempt(
        &self,
        user_id: UserId,
        admin: i64,
        permanent: bool,
        expires_at: Option<DateTime<Utc>>,
        reason: Option<String>,
    ) -> Result<ExemptionEntry> {
        let _guard = self.locks.lock_user(user_id).await;
        self.blacklist
            .exempt(user_id, permanent, admin, reason, expires_at)
    }

    pub async fn admin_unexempt(&self, user_id: UserId) -> Result<bool> {
        let _guard = self.locks.lock_user(user_id).await;
        self.blacklist.unexempt(user_id)
    }

    /// Per-user modality override. `false` when the user is unknown.
    pub async fn set_modality(&self, user_id: UserId, modality: Option<Modality>) -> Result<bool> {
        let _guard = self.locks.lock_user(user_id).await;
        let Some(mut account) = self.store.user(user_id)? else {
            return Ok(false);
        };
        account.verification_modality = modality;
        self.store.upsert_user(&account)?;
        Ok(true)
    }

    pub async fn set_moderation_opt_out(&self, sender: &UserProfile, opt_out: bool) -> Result<()> {
        let _guard = self.locks.lock_user(sender.id).await;
        let mut account = self
            .ensure_account(sender, sender.id.chat(), Utc::now())
            .await?;
        account.moderation_opt_out = opt_out;
        self.store.upsert_user(&account)?;
        tracing::info!(user_id = %sender.id, opt_out, "moderation opt-out changed");
        Ok(())
    }

    /// Unknown users have not opted out.
    pub fn moderation_opted_out(&self, user_id: UserId) -> Result<bool> {
        Ok(self
            .store
            .user(user_id)?
            .is_some_and(|a| a.moderation_opt_out))
    }

    /// Copy an admin's reply in a thread back to the thread's user.
    pub async fn relay_admin_reply(
        &self,
        thread: ThreadId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<Option<UserId>> {
        let Some(user_id) = self.router.user_for_thread(thread)? else {
            return Ok(None);
        };
        self.platform
            .copy_to_user(user_id.chat(), from_chat, message_id)
            .await?;
        Ok(Some(user_id))
    }

    // ============== Helpers ==============

    async fn ensure_account(
        &self,
        sender: &UserProfile,
        chat: ChatId,
        now: DateTime<Utc>,
    ) -> Result<UserAccount> {
        match self.store.user(sender.id)? {
            Some(mut account) => {
                account.touch(sender, now);
                self.store.upsert_user(&account)?;
                Ok(account)
            }
            None => {
                let account = UserAccount::new(sender, now);
                self.store.upsert_user(&account)?;
                tracing::info!(user_id = %sender.id, "new user");
                self.notify(chat, notices::WELCOME).await;
                Ok(account)
            }
        }
    }

    fn modality_for(&self, account: &UserAccount) -> Modality {
        account
            .verification_modality
            .unwrap_or(self.policy.default_modality)
    }

    async fn discard_open_state(&self, user_id: UserId) {
        self.pending.lock().await.remove(&user_id);
        self.verification.cancel(user_id).await;
    }

    async fn send_challenge(
        &self,
        chat: ChatId,
        intro: &str,
        challenge: &Challenge,
        command: impl Fn(usize) -> CallbackCommand,
    ) -> Result<MessageRef> {
        let keyboard = challenge.keyboard(command);
        let text = format!("{intro}\n\n{}", challenge.prompt);
        match &challenge.image {
            Some(png) => {
                self.platform
                    .send_photo(chat, png.clone(), &text, Some(keyboard))
                    .await
            }
            None => self.platform.send_keyboard(chat, &text, keyboard).await,
        }
    }

    async fn retire_prompt(&self, prompt: Option<MessageRef>) {
        if let Some(msg) = prompt {
            if let Err(e) = self.platform.delete_message(msg).await {
                tracing::debug!(error = %e, "could not delete challenge prompt");
            }
        }
    }

    async fn notify(&self, chat: ChatId, text: &str) {
        if let Err(e) = self.platform.send_text(chat, text).await {
            tracing::warn!(chat_id = chat.0, error = %e, "notice delivery failed");
        }
    }

    async fn thread_note(&self, user_id: UserId, html: &str, status: BlockStatus) {
        let thread = match self.router.thread_for_user(user_id) {
            Ok(Some(thread)) => thread,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "thread lookup failed");
                return;
            }
        };
        let keyboard = moderation_keyboard(user_id, status);
        if let Err(e) = self
            .platform
            .send_to_thread(thread, html, Some(keyboard))
            .await
        {
            tracing::warn!(user_id = %user_id, thread_id = %thread, error = %e, "thread note failed");
        }
    }
}
