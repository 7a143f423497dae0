//! Human verification: challenge sessions, attempt counting, escalation.

pub mod captcha;
pub mod generator;
pub mod questions;

use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{sync::Mutex, time::Instant};

use crate::{
    blacklist::BlacklistRegistry,
    domain::{Modality, UserAccount, UserId, SYSTEM_ADMIN},
    messaging::types::{CallbackCommand, InlineKeyboard},
    store::Store,
    Result,
};

pub use generator::ChallengeFactory;

const MAX_BUTTON_LABEL: usize = 40;

/// A multiple-choice challenge. `options[correct_option]` is the answer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge {
    pub modality: Modality,
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    /// PNG bytes for image challenges.
    pub image: Option<Vec<u8>>,
}

impl Challenge {
    pub fn keyboard(&self, command: impl Fn(usize) -> CallbackCommand) -> InlineKeyboard {
        InlineKeyboard::one_per_row(&self.options, MAX_BUTTON_LABEL, command)
    }
}

#[derive(Clone, Debug)]
pub struct VerificationSession {
    pub user_id: UserId,
    pub challenge: Challenge,
    pub attempts: u32,
    pub created_at: Instant,
    pub expires_at: Instant,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// No live session (never issued, already answered, or past its TTL).
    Expired,
    Verified,
    Retry {
        challenge: Challenge,
        attempts_remaining: u32,
    },
    /// Attempts exhausted; the user is now permanently blacklisted.
    Banned,
}

/// Challenge/response sessions, one per user.
///
/// `sessions` is only held for map reads and writes, never across generator calls.
/// Callers serialize per user (see `pipeline::UserLocks`).
pub struct VerificationManager {
    factory: Arc<ChallengeFactory>,
    blacklist: Arc<BlacklistRegistry>,
    store: Arc<dyn Store>,
    ttl: Duration,
    max_attempts: u32,
    sessions: Mutex<HashMap<UserId, VerificationSession>>,
}

impl VerificationManager {
    pub fn new(
        factory: Arc<ChallengeFactory>,
        blacklist: Arc<BlacklistRegistry>,
        store: Arc<dyn Store>,
        ttl: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            factory,
            blacklist,
            store,
            ttl,
            max_attempts: max_attempts.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Issue a fresh challenge, superseding any existing session.
    pub async fn create_challenge(&self, user_id: UserId, modality: Modality) -> Result<Challenge> {
        let challenge = self.factory.create(modality).await?;
        let now = Instant::now();
        self.sessions.lock().await.insert(
            user_id,
            VerificationSession {
                user_id,
                challenge: challenge.clone(),
                attempts: 0,
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        tracing::info!(user_id = %user_id, modality = modality.as_str(), "verification challenge issued");
        Ok(challenge)
    }

    /// Return the live challenge if there is one, else issue a new one.
    ///
    /// The bool is `true` when an existing session was resumed.
    pub async fn issue_or_resume(
        &self,
        user_id: UserId,
        modality: Modality,
    ) -> Result<(Challenge, bool)> {
        {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&user_id) {
                Some(s) if Instant::now() < s.expires_at => {
                    return Ok((s.challenge.clone(), true));
                }
                Some(_) => {
                    sessions.remove(&user_id);
                }
                None => {}
            }
        }
        let challenge = self.create_challenge(user_id, modality).await?;
        Ok((challenge, false))
    }

    pub async fn submit_answer(&self, user_id: UserId, option: usize) -> Result<AnswerOutcome> {
        self.submit_answer_at(user_id, option, Instant::now()).await
    }

    pub async fn submit_answer_at(
        &self,
        user_id: UserId,
        option: usize,
        now: Instant,
    ) -> Result<AnswerOutcome> {
        let Some(mut session) = self.sessions.lock().await.remove(&user_id) else {
            return Ok(AnswerOutcome::Expired);
        };
        if now >= session.expires_at {
            tracing::info!(user_id = %user_id, "verification session expired");
            return Ok(AnswerOutcome::Expired);
        }

        if option == session.challenge.correct_option {
            self.mark_verified(user_id)?;
            tracing::info!(user_id = %user_id, attempts = session.attempts + 1, "user verified");
            return Ok(AnswerOutcome::Verified);
        }

        session.attempts += 1;
        if session.attempts >= self.max_attempts {
            self.blacklist
                .block(user_id, "verification failed", SYSTEM_ADMIN, true)
                .await?;
            tracing::warn!(user_id = %user_id, attempts = session.attempts, "verification attempts exhausted");
            return Ok(AnswerOutcome::Banned);
        }

        let challenge = self.factory.create(session.challenge.modality).await?;
        let attempts_remaining = self.max_attempts - session.attempts;
        session.challenge = challenge.clone();
        session.created_at = now;
        session.expires_at = now + self.ttl;
        self.sessions.lock().await.insert(user_id, session);

        Ok(AnswerOutcome::Retry {
            challenge,
            attempts_remaining,
        })
    }

    #[cfg(test)]
    pub(crate) async fn session(&self, user_id: UserId) -> Option<VerificationSession> {
        self.sessions.lock().await.get(&user_id).cloned()
    }

    /// Drop a user's session. Returns whether one existed.
    pub async fn cancel(&self, user_id: UserId) -> bool {
        self.sessions.lock().await.remove(&user_id).is_some()
    }

    fn mark_verified(&self, user_id: UserId) -> Result<()> {
        let mut account = self
            .store
            .user(user_id)?
            .unwrap_or_else(|| UserAccount::placeholder(user_id, Utc::now()));
        account.is_verified = true;
        self.store.upsert_user(&account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{store::JsonFileStore, verification::captcha::CaptchaCharset};

    const U: UserId = UserId(1001);

    fn manager(max_attempts: u32) -> (VerificationManager, Arc<JsonFileStore>, Arc<BlacklistRegistry>) {
        let store = Arc::new(JsonFileStore::in_memory());
        let factory = Arc::new(ChallengeFactory::local(CaptchaCharset::Digits));
        let blacklist = Arc::new(BlacklistRegistry::new(
            store.clone(),
            factory.clone(),
            Duration::from_secs(300),
        ));
        let vm = VerificationManager::new(
            factory,
            blacklist.clone(),
            store.clone(),
            Duration::from_secs(300),
            max_attempts,
        );
        (vm, store, blacklist)
    }

    fn wrong(c: &Challenge) -> usize {
        (c.correct_option + 1) % c.options.len()
    }

    #[tokio::test]
    async fn correct_answer_verifies_and_clears_session() {
        let (vm, store, _) = manager(3);
        let c = vm.create_challenge(U, Modality::Text).await.unwrap();

        let out = vm.submit_answer(U, c.correct_option).await.unwrap();
        assert_eq!(out, AnswerOutcome::Verified);
        assert!(vm.session(U).await.is_none());
        assert!(store.user(U).unwrap().unwrap().is_verified);
    }

    #[tokio::test]
    async fn exhausting_attempts_bans_permanently() {
        let (vm, store, blacklist) = manager(3);
        let mut c = vm.create_challenge(U, Modality::Text).await.unwrap();

        match vm.submit_answer(U, wrong(&c)).await.unwrap() {
            AnswerOutcome::Retry {
                challenge,
                attempts_remaining,
            } => {
                assert_eq!(attempts_remaining, 2);
                c = challenge;
            }
            other => panic!("unexpected {other:?}"),
        }
        match vm.submit_answer(U, wrong(&c)).await.unwrap() {
            AnswerOutcome::Retry {
                challenge,
                attempts_remaining,
            } => {
                assert_eq!(attempts_remaining, 1);
                c = challenge;
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            vm.submit_answer(U, wrong(&c)).await.unwrap(),
            AnswerOutcome::Banned
        );

        assert!(vm.session(U).await.is_none());
        let status = blacklist.status(U).unwrap();
        assert!(status.blocked && status.permanent);
        assert!(store.user(U).unwrap().unwrap().is_blacklisted);
    }

    #[tokio::test]
    async fn retry_keeps_modality() {
        let (vm, _, _) = manager(3);
        let c = vm.create_challenge(U, Modality::Image).await.unwrap();
        match vm.submit_answer(U, wrong(&c)).await.unwrap() {
            AnswerOutcome::Retry { challenge, .. } => {
                assert_eq!(challenge.modality, Modality::Image);
                assert!(challenge.image.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn answer_after_ttl_is_expired() {
        let (vm, store, _) = manager(3);
        let c = vm.create_challenge(U, Modality::Text).await.unwrap();

        let late = Instant::now() + Duration::from_secs(301);
        assert_eq!(
            vm.submit_answer_at(U, c.correct_option, late).await.unwrap(),
            AnswerOutcome::Expired
        );
        assert!(vm.session(U).await.is_none());
        assert!(store.user(U).unwrap().is_none());
    }

    #[tokio::test]
    async fn answer_without_session_is_expired() {
        let (vm, _, _) = manager(3);
        assert_eq!(vm.submit_answer(U, 0).await.unwrap(), AnswerOutcome::Expired);
    }

    #[tokio::test]
    async fn new_challenge_supersedes_previous_session() {
        let (vm, _, _) = manager(3);
        let first = vm.create_challenge(U, Modality::Text).await.unwrap();
        let _ = vm.submit_answer(U, wrong(&first)).await.unwrap();
        assert_eq!(vm.session(U).await.unwrap().attempts, 1);

        let second = vm.create_challenge(U, Modality::Text).await.unwrap();
        let session = vm.session(U).await.unwrap();
        assert_eq!(session.attempts, 0);
        assert_eq!(session.challenge, second);
    }

    #[tokio::test]
    async fn resume_returns_live_challenge_without_resetting_attempts() {
        let (vm, _, _) = manager(3);
        let c = vm.create_challenge(U, Modality::Text).await.unwrap();
        let retried = match vm.submit_answer(U, wrong(&c)).await.unwrap() {
            AnswerOutcome::Retry { challenge, .. } => challenge,
            other => panic!("unexpected {other:?}"),
        };

        let (resumed, was_resumed) = vm.issue_or_resume(U, Modality::Text).await.unwrap();
        assert!(was_resumed);
        assert_eq!(resumed, retried);
        assert_eq!(vm.session(U).await.unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn cancel_drops_session() {
        let (vm, _, _) = manager(3);
        vm.create_challenge(U, Modality::Text).await.unwrap();
        assert!(vm.cancel(U).await);
        assert!(!vm.cancel(U).await);
    }
}
