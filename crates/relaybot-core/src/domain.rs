use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram user id (numeric). Private chats share the user's id.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// The private chat with this user.
    pub fn chat(self) -> ChatId {
        ChatId(self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i32);

/// Forum topic id inside the admin group.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(pub i32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Admin id recorded on blacklist entries created by the relay itself.
pub const SYSTEM_ADMIN: i64 = 0;

/// How a user proves they are human.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    #[default]
    Text,
    Image,
}

impl Modality {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "text" | "question" => Some(Modality::Text),
            "image" | "captcha" => Some(Modality::Image),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
        }
    }
}

/// Profile fields the platform reports for a sender.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

impl UserProfile {
    pub fn display_name(&self) -> String {
        match self.last_name.as_deref().map(str::trim) {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

/// Durable per-user record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: UserId,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_blacklisted: bool,
    #[serde(default)]
    pub blacklist_strikes: u32,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    /// Per-user override of the configured verification modality.
    #[serde(default)]
    pub verification_modality: Option<Modality>,
    /// User opted out of content moderation.
    #[serde(default)]
    pub moderation_opt_out: bool,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl UserAccount {
    pub fn new(profile: &UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            id: profile.id,
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            username: profile.username.clone(),
            language_code: profile.language_code.clone(),
            is_verified: false,
            is_blacklisted: false,
            blacklist_strikes: 0,
            thread_id: None,
            verification_modality: None,
            moderation_opt_out: false,
            created_at: now,
            last_active: now,
        }
    }

    /// Placeholder record for users blocked before they ever wrote to the bot.
    pub fn placeholder(id: UserId, now: DateTime<Utc>) -> Self {
        let profile = UserProfile {
            id,
            first_name: format!("User_{}", id.0),
            ..UserProfile::default()
        };
        Self::new(&profile, now)
    }

    /// Refresh profile fields reported by the platform on a new message.
    pub fn touch(&mut self, profile: &UserProfile, now: DateTime<Utc>) {
        self.first_name = profile.first_name.clone();
        self.last_name = profile.last_name.clone();
        self.username = profile.username.clone();
        self.language_code = profile.language_code.clone();
        self.last_active = now;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub user_id: UserId,
    pub reason: String,
    pub blocked_by: i64,
    pub permanent: bool,
    pub blocked_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BlockStatus {
    pub blocked: bool,
    pub permanent: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExemptionEntry {
    pub user_id: UserId,
    pub permanent: bool,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub exempted_by: i64,
    #[serde(default)]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExemptionEntry {
    /// Permanent, or temporary with an expiry strictly after `now`.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if self.permanent {
            return true;
        }
        matches!(self.expires_at, Some(exp) if exp > now)
    }
}

/// A message held back by the moderation gate for admin review.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub user_id: UserId,
    pub message_id: MessageId,
    #[serde(default)]
    pub content: Option<String>,
    pub reason: String,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub media_file_id: Option<String>,
    pub filtered_at: DateTime<Utc>,
}
