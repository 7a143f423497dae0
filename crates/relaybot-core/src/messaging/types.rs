use chrono::{DateTime, Utc};

use crate::domain::{ChatId, MessageId, MessageRef, UserId, UserProfile};

/// Platform-neutral inbound private message.
///
/// Telegram-specific fields stay in the Telegram adapter.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub sender: UserProfile,
    pub content: MessageContent,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn user_id(&self) -> UserId {
        self.sender.id
    }

    pub fn message_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat_id,
            message_id: self.message_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageContent {
    Text {
        text: String,
    },
    Photo {
        file_id: String,
        caption: Option<String>,
    },
    Sticker {
        file_id: String,
        emoji: Option<String>,
        is_animated: bool,
        is_video: bool,
    },
    Animation {
        file_id: String,
        caption: Option<String>,
    },
    Video {
        file_id: String,
        caption: Option<String>,
    },
    Document {
        file_id: String,
        file_name: Option<String>,
        caption: Option<String>,
    },
    Audio {
        file_id: String,
        caption: Option<String>,
    },
    Voice {
        file_id: String,
    },
    VideoNote {
        file_id: String,
    },
    /// Anything else (location, contact, poll...). Relayed as-is.
    Other,
}

impl MessageContent {
    /// Text body or caption, if any.
    pub fn text(&self) -> Option<&str> {
        let raw = match self {
            MessageContent::Text { text } => Some(text.as_str()),
            MessageContent::Photo { caption, .. }
            | MessageContent::Animation { caption, .. }
            | MessageContent::Video { caption, .. }
            | MessageContent::Document { caption, .. }
            | MessageContent::Audio { caption, .. } => caption.as_deref(),
            MessageContent::Sticker { emoji, .. } => emoji.as_deref(),
            MessageContent::Voice { .. } | MessageContent::VideoNote { .. } | MessageContent::Other => {
                None
            }
        };
        raw.map(str::trim).filter(|s| !s.is_empty())
    }

    /// File id of a still image the classifier can look at.
    pub fn inspectable_image(&self) -> Option<&str> {
        match self {
            MessageContent::Photo { file_id, .. } => Some(file_id),
            MessageContent::Sticker {
                file_id,
                is_animated: false,
                is_video: false,
                ..
            } => Some(file_id),
            _ => None,
        }
    }

    /// Media the classifier cannot inspect; forwarded without a check.
    pub fn is_uninspectable(&self) -> bool {
        match self {
            MessageContent::Video { .. } | MessageContent::Animation { .. } => true,
            MessageContent::Sticker {
                is_animated,
                is_video,
                ..
            } => *is_animated || *is_video,
            _ => false,
        }
    }

    /// Short media label for quarantine records.
    pub fn media_type(&self) -> Option<&'static str> {
        match self {
            MessageContent::Photo { .. } => Some("photo"),
            MessageContent::Sticker { .. } => Some("sticker"),
            _ => None,
        }
    }
}

/// Inline keyboard, one `Vec` per row.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineKeyboard {
    pub fn single(label: impl Into<String>, command: CallbackCommand) -> Self {
        Self {
            rows: vec![vec![InlineButton {
                label: label.into(),
                callback_data: command.encode(),
            }]],
        }
    }

    /// Convenience for "one button per row" answer layouts.
    pub fn one_per_row(
        options: &[String],
        max_label_len: usize,
        command: impl Fn(usize) -> CallbackCommand,
    ) -> Self {
        let rows = options
            .iter()
            .enumerate()
            .map(|(idx, opt)| {
                let label = if opt.chars().count() > max_label_len {
                    format!("{}...", opt.chars().take(max_label_len).collect::<String>())
                } else {
                    opt.clone()
                };
                vec![InlineButton {
                    label,
                    callback_data: command(idx).encode(),
                }]
            })
            .collect();
        Self { rows }
    }

    pub fn buttons(&self) -> impl Iterator<Item = &InlineButton> {
        self.rows.iter().flatten()
    }
}

/// Typed callback payloads, parsed once at the adapter edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallbackCommand {
    /// Answer to a verification challenge.
    Verify { option: usize },
    /// Answer to a self-service unblock challenge.
    Unblock { option: usize },
    /// Admin pressed "Block" on a profile card.
    AdminBlock { user: UserId },
    /// Admin pressed "Unblock" on a profile card.
    AdminUnblock { user: UserId },
    /// Marker button on a permanently banned user's card.
    AlreadyBanned { user: UserId },
    /// Page of the quarantine review.
    QuarantinePage { page: usize },
    /// Page of the blacklist listing.
    BlacklistPage { page: usize },
}

impl CallbackCommand {
    pub fn encode(&self) -> String {
        match self {
            CallbackCommand::Verify { option } => format!("verify:{option}"),
            CallbackCommand::Unblock { option } => format!("unblock:{option}"),
            CallbackCommand::AdminBlock { user } => format!("admin_block:{}", user.0),
            CallbackCommand::AdminUnblock { user } => format!("admin_unblock:{}", user.0),
            CallbackCommand::AlreadyBanned { user } => format!("already_banned:{}", user.0),
            CallbackCommand::QuarantinePage { page } => format!("filtered_page:{page}"),
            CallbackCommand::BlacklistPage { page } => format!("blacklist_page:{page}"),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        let (kind, arg) = data.split_once(':')?;
        match kind {
            "verify" => arg.parse().ok().map(|option| CallbackCommand::Verify { option }),
            "unblock" => arg.parse().ok().map(|option| CallbackCommand::Unblock { option }),
            "admin_block" => arg
                .parse()
                .ok()
                .map(|id| CallbackCommand::AdminBlock { user: UserId(id) }),
            "admin_unblock" => arg
                .parse()
                .ok()
                .map(|id| CallbackCommand::AdminUnblock { user: UserId(id) }),
            "already_banned" => arg
                .parse()
                .ok()
                .map(|id| CallbackCommand::AlreadyBanned { user: UserId(id) }),
            "filtered_page" => arg
                .parse()
                .ok()
                .map(|page| CallbackCommand::QuarantinePage { page }),
            "blacklist_page" => arg
                .parse()
                .ok()
                .map(|page| CallbackCommand::BlacklistPage { page }),
            _ => None,
        }
    }
}
