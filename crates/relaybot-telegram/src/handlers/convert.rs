use teloxide::types::{Message, User};

use relaybot_core::{
    domain::{ChatId, MessageId, UserId, UserProfile},
    messaging::types::{InboundMessage, MessageContent},
};

pub fn profile(user: &User) -> UserProfile {
    UserProfile {
        id: UserId(user.id.0 as i64),
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        language_code: user.language_code.clone(),
    }
}

/// Teloxide message -> platform-neutral inbound message. `None` without a sender.
pub fn inbound(msg: &Message) -> Option<InboundMessage> {
    let sender = msg.from()?;
    Some(InboundMessage {
        message_id: MessageId(msg.id.0),
        chat_id: ChatId(msg.chat.id.0),
        sender: profile(sender),
        content: content(msg),
        received_at: msg.date,
    })
}

fn content(msg: &Message) -> MessageContent {
    let caption = msg.caption().map(str::to_string);

    if let Some(text) = msg.text() {
        return MessageContent::Text {
            text: text.to_string(),
        };
    }
    // Largest size is last.
    if let Some(photo) = msg.photo().and_then(|sizes| sizes.last()) {
        return MessageContent::Photo {
            file_id: photo.file.id.clone(),
            caption,
        };
    }
    if let Some(sticker) = msg.sticker() {
        return MessageContent::Sticker {
            file_id: sticker.file.id.clone(),
            emoji: sticker.emoji.clone(),
            is_animated: sticker.is_animated(),
            is_video: sticker.is_video(),
        };
    }
    if let Some(animation) = msg.animation() {
        return MessageContent::Animation {
            file_id: animation.file.id.clone(),
            caption,
        };
    }
    if let Some(video) = msg.video() {
        return MessageContent::Video {
            file_id: video.file.id.clone(),
            caption,
        };
    }
    if let Some(doc) = msg.document() {
        return MessageContent::Document {
            file_id: doc.file.id.clone(),
            file_name: doc.file_name.clone(),
            caption,
        };
    }
    if let Some(audio) = msg.audio() {
        return MessageContent::Audio {
            file_id: audio.file.id.clone(),
            caption,
        };
    }
    if let Some(voice) = msg.voice() {
        return MessageContent::Voice {
            file_id: voice.file.id.clone(),
        };
    }
    if let Some(note) = msg.video_note() {
        return MessageContent::VideoNote {
            file_id: note.file.id.clone(),
        };
    }
    MessageContent::Other
}
