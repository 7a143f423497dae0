//! Telegram adapter (teloxide).
//!
//! This crate implements the `relaybot-core` ChatPlatform over the Telegram Bot API,
//! with one forum group as the admin space (one topic per user).

use async_trait::async_trait;

use teloxide::{
    net::Download,
    prelude::*,
    types::{
        ChatAction, ForumTopic, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode,
    },
};

use tokio::time::sleep;

pub mod handlers;
pub mod router;

use relaybot_core::{
    domain::{ChatId, MessageId, MessageRef, ThreadId},
    errors::Error,
    messaging::{
        port::ChatPlatform,
        types::{InboundMessage, InlineKeyboard},
    },
    Result,
};

/// Fragments of Bot API errors meaning the topic is gone.
const THREAD_GONE: &[&str] = &["message thread not found", "topic_deleted", "topic_id_invalid"];

/// Topic icon color (Telegram accepts a fixed palette).
const TOPIC_COLOR: u32 = 0x6FB9F0;

#[derive(Clone)]
pub struct TelegramPlatform {
    bot: Bot,
    forum: ChatId,
}

impl TelegramPlatform {
    pub fn new(bot: Bot, forum: ChatId) -> Self {
        Self { bot, forum }
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat_id: ChatId) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat_id.0)
    }

    fn tg_msg_id(message_id: MessageId) -> teloxide::types::MessageId {
        teloxide::types::MessageId(message_id.0)
    }

    fn topic_thread(topic: &ForumTopic) -> ThreadId {
        ThreadId(topic.message_thread_id)
    }

    pub(crate) fn markup(keyboard: InlineKeyboard) -> InlineKeyboardMarkup {
        let rows: Vec<Vec<InlineKeyboardButton>> = keyboard
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|b| InlineKeyboardButton::callback(b.label, b.callback_data))
                    .collect()
            })
            .collect();
        InlineKeyboardMarkup::new(rows)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    /// Like `map_err`, but recognizes a vanished topic.
    fn map_thread_err(thread: ThreadId, e: teloxide::RequestError) -> Error {
        if is_thread_gone(&e.to_string()) {
            Error::ThreadInvalid {
                thread_id: thread.0,
            }
        } else {
            Self::map_err(e)
        }
    }

    async fn with_retry<T, Fut>(
        &self,
        mut op: impl FnMut() -> Fut,
    ) -> std::result::Result<T, teloxide::RequestError>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(teloxide::RequestError::RetryAfter(d)) if attempts < MAX_RETRIES => {
                    attempts += 1;
                    tracing::debug!(retry_after = ?d, "telegram flood control; retrying");
                    sleep(d).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn forum_ref(&self, id: teloxide::types::MessageId) -> MessageRef {
        MessageRef {
            chat_id: self.forum,
            message_id: MessageId(id.0),
        }
    }
}

fn is_thread_gone(err: &str) -> bool {
    let lower = err.to_lowercase();
    THREAD_GONE.iter().any(|needle| lower.contains(needle))
}

#[async_trait]
impl ChatPlatform for TelegramPlatform {
    async fn create_thread(&self, title: &str) -> Result<ThreadId> {
        let topic = self
            .with_retry(|| {
                self.bot.create_forum_topic(
                    Self::tg_chat(self.forum),
                    title.to_string(),
                    TOPIC_COLOR,
                    String::new(),
                )
            })
            .await
            .map_err(Self::map_err)?;
        Ok(Self::topic_thread(&topic))
    }

    async fn probe_thread(&self, thread: ThreadId) -> Result<bool> {
        let res = self
            .with_retry(|| {
                self.bot
                    .send_chat_action(Self::tg_chat(self.forum), ChatAction::Typing)
                    .message_thread_id(thread.0)
            })
            .await;
        match res {
            Ok(_) => Ok(true),
            Err(e) if is_thread_gone(&e.to_string()) => Ok(false),
            Err(e) => Err(Self::map_err(e)),
        }
    }

    async fn relay_to_thread(
        &self,
        thread: ThreadId,
        message: &InboundMessage,
    ) -> Result<MessageRef> {
        let id = self
            .with_retry(|| {
                self.bot
                    .copy_message(
                        Self::tg_chat(self.forum),
                        Self::tg_chat(message.chat_id),
                        Self::tg_msg_id(message.message_id),
                    )
                    .message_thread_id(thread.0)
            })
            .await
            .map_err(|e| Self::map_thread_err(thread, e))?;
        Ok(self.forum_ref(id))
    }

    async fn send_to_thread(
        &self,
        thread: ThreadId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.map(Self::markup);
        let msg = self
            .with_retry(|| {
                let req = self
                    .bot
                    .send_message(Self::tg_chat(self.forum), html.to_string())
                    .parse_mode(ParseMode::Html)
                    .message_thread_id(thread.0);
                match markup.clone() {
                    Some(m) => req.reply_markup(m),
                    None => req,
                }
            })
            .await
            .map_err(|e| Self::map_thread_err(thread, e))?;
        Ok(self.forum_ref(msg.id))
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        let msg = self
            .with_retry(|| self.bot.send_message(Self::tg_chat(chat_id), text.to_string()))
            .await
            .map_err(Self::map_err)?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        let markup = Self::markup(keyboard);
        let msg = self
            .with_retry(|| {
                self.bot
                    .send_message(Self::tg_chat(chat_id), text.to_string())
                    .reply_markup(markup.clone())
            })
            .await
            .map_err(Self::map_err)?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        png: Vec<u8>,
        caption: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        let markup = keyboard.map(Self::markup);
        let msg = self
            .with_retry(|| {
                let req = self
                    .bot
                    .send_photo(
                        Self::tg_chat(chat_id),
                        InputFile::memory(png.clone()).file_name("challenge.png"),
                    )
                    .caption(caption.to_string());
                match markup.clone() {
                    Some(m) => req.reply_markup(m),
                    None => req,
                }
            })
            .await
            .map_err(Self::map_err)?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(msg.id.0),
        })
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        let markup = keyboard.map(Self::markup);
        self.with_retry(|| {
            let req = self.bot.edit_message_text(
                Self::tg_chat(msg.chat_id),
                Self::tg_msg_id(msg.message_id),
                text.to_string(),
            );
            match markup.clone() {
                Some(m) => req.reply_markup(m),
                None => req,
            }
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .delete_message(Self::tg_chat(msg.chat_id), Self::tg_msg_id(msg.message_id))
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        let file = self
            .with_retry(|| self.bot.get_file(file_id.to_string()))
            .await
            .map_err(Self::map_err)?;
        let mut buf = Vec::with_capacity(file.size as usize);
        self.bot
            .download_file(&file.path, &mut buf)
            .await
            .map_err(|e| Error::External(format!("telegram download error: {e}")))?;
        Ok(buf)
    }

    async fn copy_to_user(
        &self,
        chat_id: ChatId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageRef> {
        let id = self
            .with_retry(|| {
                self.bot.copy_message(
                    Self::tg_chat(chat_id),
                    Self::tg_chat(from_chat),
                    Self::tg_msg_id(message_id),
                )
            })
            .await
            .map_err(Self::map_err)?;
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(id.0),
        })
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        self.with_retry(|| {
            let mut req = self.bot.answer_callback_query(callback_id.to_string());
            if let Some(t) = text {
                req = req.text(t.to_string());
            }
            req
        })
        .await
        .map_err(Self::map_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaybot_core::{domain::UserId, messaging::types::CallbackCommand};

    #[test]
    fn thread_loss_is_recognized() {
        assert!(is_thread_gone(
            "A Telegram's error: Bad Request: message thread not found"
        ));
        assert!(is_thread_gone("Bad Request: TOPIC_DELETED"));
        assert!(!is_thread_gone("Bad Request: chat not found"));
    }

    #[test]
    fn created_topic_maps_to_its_thread_id() {
        let topic: ForumTopic = serde_json::from_value(serde_json::json!({
            "message_thread_id": 42,
            "name": "Ada (@ada) 7",
            "icon_color": TOPIC_COLOR,
        }))
        .unwrap();
        assert_eq!(TelegramPlatform::topic_thread(&topic), ThreadId(42));
    }

    #[test]
    fn markup_keeps_rows_and_payloads() {
        let kb = InlineKeyboard::one_per_row(&["a".to_string(), "b".to_string()], 40, |option| {
            CallbackCommand::Verify { option }
        });
        let markup = TelegramPlatform::markup(kb);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[1][0].text, "b");

        let single = TelegramPlatform::markup(InlineKeyboard::single(
            "Block",
            CallbackCommand::AdminBlock { user: UserId(5) },
        ));
        assert_eq!(single.inline_keyboard[0].len(), 1);
    }
}
