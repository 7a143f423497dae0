use async_trait::async_trait;

use crate::{
    domain::{ChatId, MessageId, MessageRef, ThreadId},
    messaging::types::{InboundMessage, InlineKeyboard},
    Result,
};

/// Chat platform port.
///
/// Threads live in one admin space (a Telegram forum group today). Errors that
/// mean the thread no longer exists must surface as `Error::ThreadInvalid`.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn create_thread(&self, title: &str) -> Result<ThreadId>;

    /// `Ok(false)` when the thread is gone; `Err` for anything inconclusive.
    async fn probe_thread(&self, thread: ThreadId) -> Result<bool>;

    /// Copy a user's message, media included, into their thread.
    async fn relay_to_thread(&self, thread: ThreadId, message: &InboundMessage)
        -> Result<MessageRef>;

    async fn send_to_thread(
        &self,
        thread: ThreadId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef>;

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef>;

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef>;

    async fn send_photo(
        &self,
        chat_id: ChatId,
        png: Vec<u8>,
        caption: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef>;

    /// Replace a message's text; `keyboard` replaces its buttons (none when `None`).
    async fn edit_text(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()>;

    async fn delete_message(&self, msg: MessageRef) -> Result<()>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Copy an admin message (from the thread) into the user's private chat.
    async fn copy_to_user(
        &self,
        chat_id: ChatId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageRef>;

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()>;
}
