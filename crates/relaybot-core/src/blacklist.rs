use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{sync::Mutex, time::Instant};

use crate::{
    domain::{BlacklistEntry, BlockStatus, ExemptionEntry, UserAccount, UserId, SYSTEM_ADMIN},
    store::Store,
    verification::{Challenge, ChallengeFactory},
    Result,
};

#[derive(Clone, Debug)]
pub struct UnblockSession {
    pub user_id: UserId,
    pub challenge: Challenge,
    pub created_at: Instant,
    pub expires_at: Instant,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnblockOutcome {
    Expired,
    Unblocked,
    /// Wrong answer: the temporary block became permanent.
    PermanentlyBanned,
}

/// Durable block and exemption state, plus self-service unblock challenges.
pub struct BlacklistRegistry {
    store: Arc<dyn Store>,
    factory: Arc<ChallengeFactory>,
    ttl: Duration,
    sessions: Mutex<HashMap<UserId, UnblockSession>>,
}

impl BlacklistRegistry {
    pub fn new(store: Arc<dyn Store>, factory: Arc<ChallengeFactory>, ttl: Duration) -> Self {
        Self {
            store,
            factory,
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// A permanent block also drops any open unblock challenge.
    pub async fn block(
        &self,
        user_id: UserId,
        reason: &str,
        blocked_by: i64,
        permanent: bool,
    ) -> Result<BlacklistEntry> {
        if permanent {
            self.sessions.lock().await.remove(&user_id);
        }
        let now = Utc::now();
        let mut account = self
            .store
            .user(user_id)?
            .unwrap_or_else(|| UserAccount::placeholder(user_id, now));
        account.is_blacklisted = true;
        account.blacklist_strikes += 1;
        self.store.upsert_user(&account)?;

        let entry = BlacklistEntry {
            user_id,
            reason: reason.to_string(),
            blocked_by,
            permanent,
            blocked_at: now,
        };
        self.store.upsert_blacklist(&entry)?;

        tracing::warn!(
            user_id = %user_id,
            blocked_by,
            permanent,
            strikes = account.blacklist_strikes,
            reason,
            "user blocked"
        );
        Ok(entry)
    }

    /// Lift a block. Strikes always reset to zero. Returns whether an entry existed.
    pub async fn unblock(&self, user_id: UserId) -> Result<bool> {
        self.sessions.lock().await.remove(&user_id);
        self.clear_block(user_id)
    }

    fn clear_block(&self, user_id: UserId) -> Result<bool> {
        let existed = self.store.blacklist_entry(user_id)?.is_some();
        if let Some(mut account) = self.store.user(user_id)? {
            account.is_blacklisted = false;
            account.blacklist_strikes = 0;
            self.store.upsert_user(&account)?;
        }
        self.store.delete_blacklist(user_id)?;
        if existed {
            tracing::info!(user_id = %user_id, "user unblocked");
        }
        Ok(existed)
    }

    pub fn status(&self, user_id: UserId) -> Result<BlockStatus> {
        Ok(match self.store.blacklist_entry(user_id)? {
            Some(entry) => BlockStatus {
                blocked: true,
                permanent: entry.permanent,
            },
            None => BlockStatus::default(),
        })
    }

    /// Issue (or resume) an unblock challenge for a temporarily blocked user.
    ///
    /// `None` when the user is not blocked or the block is permanent.
    pub async fn start_unblock(&self, user_id: UserId) -> Result<Option<(Challenge, bool)>> {
        let status = self.status(user_id)?;
        if !status.blocked || status.permanent {
            return Ok(None);
        }

        {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(&user_id) {
                Some(s) if Instant::now() < s.expires_at => {
                    return Ok(Some((s.challenge.clone(), true)));
                }
                Some(_) => {
                    sessions.remove(&user_id);
                }
                None => {}
            }
        }

        let challenge = self.factory.question().await;
        let now = Instant::now();
        self.sessions.lock().await.insert(
            user_id,
            UnblockSession {
                user_id,
                challenge: challenge.clone(),
                created_at: now,
                expires_at: now + self.ttl,
            },
        );
        tracing::info!(user_id = %user_id, "unblock challenge issued");
        Ok(Some((challenge, false)))
    }

    pub async fn answer_unblock(&self, user_id: UserId, option: usize) -> Result<UnblockOutcome> {
        self.answer_unblock_at(user_id, option, Instant::now()).await
    }

    /// Single attempt: a wrong answer makes the block permanent.
    pub async fn answer_unblock_at(
        &self,
        user_id: UserId,
        option: usize,
        now: Instant,
    ) -> Result<UnblockOutcome> {
        let Some(session) = self.sessions.lock().await.remove(&user_id) else {
            return Ok(UnblockOutcome::Expired);
        };
        if now >= session.expires_at {
            return Ok(UnblockOutcome::Expired);
        }
        // The block may have changed since the challenge was issued.
        let status = self.status(user_id)?;
        if !status.blocked {
            return Ok(UnblockOutcome::Expired);
        }
        if status.permanent {
            return Ok(UnblockOutcome::PermanentlyBanned);
        }

        if option == session.challenge.correct_option {
            self.clear_block(user_id)?;
            return Ok(UnblockOutcome::Unblocked);
        }

        self.block(user_id, "failed unblock challenge", SYSTEM_ADMIN, true)
            .await?;
        Ok(UnblockOutcome::PermanentlyBanned)
    }

    #[cfg(test)]
    pub(crate) async fn unblock_session(&self, user_id: UserId) -> Option<UnblockSession> {
        self.sessions.lock().await.get(&user_id).cloned()
    }

    pub fn exempt(
        &self,
        user_id: UserId,
        permanent: bool,
        exempted_by: i64,
        reason: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ExemptionEntry> {
        let entry = ExemptionEntry {
            user_id,
            permanent,
            expires_at: if permanent { None } else { expires_at },
            exempted_by,
            reason,
            created_at: Utc::now(),
        };
        self.store.upsert_exemption(&entry)?;
        tracing::info!(user_id = %user_id, exempted_by, permanent, "moderation exemption granted");
        Ok(entry)
    }

    /// Returns whether an exemption row existed.
    pub fn unexempt(&self, user_id: UserId) -> Result<bool> {
        let existed = self.store.exemption(user_id)?.is_some();
        self.store.delete_exemption(user_id)?;
        Ok(existed)
    }

    pub fn is_exempt(&self, user_id: UserId) -> Result<bool> {
        self.is_exempt_at(user_id, Utc::now())
    }

    /// Expired rows count as absent but are kept.
    pub fn is_exempt_at(&self, user_id: UserId, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .exemption(user_id)?
            .is_some_and(|e| e.is_active_at(now)))
    }

    pub fn exemption(&self, user_id: UserId) -> Result<Option<ExemptionEntry>> {
        self.store.exemption(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    use crate::{store::JsonFileStore, verification::captcha::CaptchaCharset};

    const U: UserId = UserId(55);
    const ADMIN: i64 = 900;

    fn registry() -> (BlacklistRegistry, Arc<JsonFileStore>) {
        let store = Arc::new(JsonFileStore::in_memory());
        let reg = BlacklistRegistry::new(
            store.clone(),
            Arc::new(ChallengeFactory::local(CaptchaCharset::Digits)),
            Duration::from_secs(300),
        );
        (reg, store)
    }

    #[tokio::test]
    async fn block_counts_strikes_and_unblock_resets_them() {
        let (reg, store) = registry();
        reg.block(U, "spam", ADMIN, false).await.unwrap();
        reg.block(U, "spam again", ADMIN, false).await.unwrap();
        assert_eq!(store.user(U).unwrap().unwrap().blacklist_strikes, 2);
        assert_eq!(
            reg.status(U).unwrap(),
            BlockStatus {
                blocked: true,
                permanent: false
            }
        );

        assert!(reg.unblock(U).await.unwrap());
        let account = store.user(U).unwrap().unwrap();
        assert_eq!(account.blacklist_strikes, 0);
        assert!(!account.is_blacklisted);
        assert!(!reg.status(U).unwrap().blocked);
    }

    #[tokio::test]
    async fn unblock_resets_strikes_even_without_entry() {
        let (reg, store) = registry();
        let mut account = UserAccount::placeholder(U, Utc::now());
        account.blacklist_strikes = 4;
        store.upsert_user(&account).unwrap();

        assert!(!reg.unblock(U).await.unwrap());
        assert_eq!(store.user(U).unwrap().unwrap().blacklist_strikes, 0);
    }

    #[tokio::test]
    async fn permanent_block_never_gets_a_challenge() {
        let (reg, _) = registry();
        reg.block(U, "rate limit", SYSTEM_ADMIN, true).await.unwrap();
        assert!(reg.start_unblock(U).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unblock_challenge_is_resumed_not_reissued() {
        let (reg, _) = registry();
        reg.block(U, "manual", ADMIN, false).await.unwrap();
        let (first, resumed) = reg.start_unblock(U).await.unwrap().unwrap();
        assert!(!resumed);
        let (second, resumed) = reg.start_unblock(U).await.unwrap().unwrap();
        assert!(resumed);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn correct_unblock_answer_lifts_block() {
        let (reg, _) = registry();
        reg.block(U, "manual", ADMIN, false).await.unwrap();
        let (c, _) = reg.start_unblock(U).await.unwrap().unwrap();
        assert_eq!(
            reg.answer_unblock(U, c.correct_option).await.unwrap(),
            UnblockOutcome::Unblocked
        );
        assert!(!reg.status(U).unwrap().blocked);
    }

    #[tokio::test]
    async fn wrong_unblock_answer_makes_block_permanent() {
        let (reg, _) = registry();
        reg.block(U, "manual", ADMIN, false).await.unwrap();
        let (c, _) = reg.start_unblock(U).await.unwrap().unwrap();
        let wrong = (c.correct_option + 1) % c.options.len();
        assert_eq!(
            reg.answer_unblock(U, wrong).await.unwrap(),
            UnblockOutcome::PermanentlyBanned
        );
        assert!(reg.status(U).unwrap().permanent);
        assert!(reg.unblock_session(U).await.is_none());
    }

    #[tokio::test]
    async fn late_unblock_answer_is_expired() {
        let (reg, _) = registry();
        reg.block(U, "manual", ADMIN, false).await.unwrap();
        let (c, _) = reg.start_unblock(U).await.unwrap().unwrap();
        let late = Instant::now() + Duration::from_secs(600);
        assert_eq!(
            reg.answer_unblock_at(U, c.correct_option, late).await.unwrap(),
            UnblockOutcome::Expired
        );
        assert!(reg.status(U).unwrap().blocked);
    }

    #[test]
    fn temporary_exemption_expires_strictly() {
        let (reg, _) = registry();
        let t = Utc::now() + ChronoDuration::hours(2);
        reg.exempt(U, false, ADMIN, Some("vip".into()), Some(t)).unwrap();

        assert!(reg.is_exempt_at(U, t - ChronoDuration::seconds(1)).unwrap());
        assert!(!reg.is_exempt_at(U, t).unwrap());
        assert!(!reg.is_exempt_at(U, t + ChronoDuration::seconds(1)).unwrap());
        // Expired rows stay visible to admins.
        assert!(reg.exemption(U).unwrap().is_some());
    }

    #[test]
    fn permanent_exemption_and_removal() {
        let (reg, _) = registry();
        reg.exempt(U, true, ADMIN, None, None).unwrap();
        assert!(reg.is_exempt(U).unwrap());
        assert!(reg.unexempt(U).unwrap());
        assert!(!reg.is_exempt(U).unwrap());
    }

    #[tokio::test]
    async fn exemption_is_independent_of_blacklist() {
        let (reg, _) = registry();
        reg.block(U, "manual", ADMIN, true).await.unwrap();
        reg.exempt(U, true, ADMIN, None, None).unwrap();
        assert!(reg.is_exempt(U).unwrap());
        assert!(reg.status(U).unwrap().blocked);
    }

    #[tokio::test]
    async fn permanent_block_drops_open_unblock_challenge() {
        let (reg, _) = registry();
        reg.block(U, "manual", ADMIN, false).await.unwrap();
        let (c, _) = reg.start_unblock(U).await.unwrap().unwrap();

        reg.block(U, "abuse", ADMIN, true).await.unwrap();
        assert!(reg.unblock_session(U).await.is_none());
        assert_eq!(
            reg.answer_unblock(U, c.correct_option).await.unwrap(),
            UnblockOutcome::Expired
        );
        assert!(reg.status(U).unwrap().permanent);
    }

    #[tokio::test]
    async fn stale_challenge_cannot_lift_a_block_made_permanent_elsewhere() {
        let (reg, store) = registry();
        reg.block(U, "manual", ADMIN, false).await.unwrap();
        let (c, _) = reg.start_unblock(U).await.unwrap().unwrap();

        // Entry rewritten directly, bypassing `block`.
        let mut entry = store.blacklist_entry(U).unwrap().unwrap();
        entry.permanent = true;
        store.upsert_blacklist(&entry).unwrap();

        assert_eq!(
            reg.answer_unblock(U, c.correct_option).await.unwrap(),
            UnblockOutcome::PermanentlyBanned
        );
        assert!(reg.status(U).unwrap().blocked);
    }

    #[tokio::test]
    async fn challenge_for_a_lifted_block_is_expired() {
        let (reg, store) = registry();
        reg.block(U, "manual", ADMIN, false).await.unwrap();
        let (c, _) = reg.start_unblock(U).await.unwrap().unwrap();
        store.delete_blacklist(U).unwrap();

        assert_eq!(
            reg.answer_unblock(U, c.correct_option).await.unwrap(),
            UnblockOutcome::Expired
        );
    }
}
