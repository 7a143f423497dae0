//! In-memory fakes for the ports, shared by the component tests.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicI32, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use chrono::Utc;

use crate::{
    ai::{AiProvider, GeneratedQuestion, Verdict},
    domain::{ChatId, MessageId, MessageRef, ThreadId, UserId, UserProfile},
    errors::Error,
    messaging::{
        port::ChatPlatform,
        types::{InboundMessage, InlineKeyboard, MessageContent},
    },
    Result,
};

/// Forum group id the fake platform reports for thread messages.
pub const FORUM: ChatId = ChatId(-100);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    ThreadCreated { thread: ThreadId, title: String },
    ThreadNote { thread: ThreadId, html: String, keyboard: Option<InlineKeyboard> },
    Relayed { thread: ThreadId, message_id: MessageId },
    Text { chat: ChatId, text: String },
    Keyboard { chat: ChatId, text: String, keyboard: InlineKeyboard },
    Photo { chat: ChatId, caption: String, keyboard: Option<InlineKeyboard> },
    Edited { msg: MessageRef, text: String, keyboard: Option<InlineKeyboard> },
    Deleted { msg: MessageRef },
    Copied { chat: ChatId, from: ChatId, message_id: MessageId },
}

#[derive(Default)]
pub struct FakePlatform {
    next_id: AtomicI32,
    live_threads: Mutex<HashSet<i32>>,
    sent: Mutex<Vec<Sent>>,
    pub fail_create: AtomicBool,
    pub fail_relay: AtomicBool,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(100),
            ..Self::default()
        }
    }

    fn alloc(&self) -> i32 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn push(&self, s: Sent) {
        self.sent.lock().unwrap().push(s);
    }

    /// Simulate an admin deleting the topic.
    pub fn kill_thread(&self, thread: ThreadId) {
        self.live_threads.lock().unwrap().remove(&thread.0);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn created_threads(&self) -> Vec<ThreadId> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::ThreadCreated { thread, .. } => Some(thread),
                _ => None,
            })
            .collect()
    }

    pub fn relayed(&self) -> Vec<(ThreadId, MessageId)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Relayed { thread, message_id } => Some((thread, message_id)),
                _ => None,
            })
            .collect()
    }

    /// Everything shown to `chat` as text: plain texts, keyboard prompts, photo captions.
    pub fn texts_to(&self, chat: ChatId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { chat: c, text } | Sent::Keyboard { chat: c, text, .. } if c == chat => {
                    Some(text)
                }
                Sent::Photo { chat: c, caption, .. } if c == chat => Some(caption),
                Sent::Edited { msg, text, .. } if msg.chat_id == chat => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn thread_notes(&self, thread: ThreadId) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::ThreadNote { thread: t, html, .. } if t == thread => Some(html),
                _ => None,
            })
            .collect()
    }

    pub fn photos_to(&self, chat: ChatId) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Photo { chat: c, .. } if *c == chat))
            .count()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn create_thread(&self, title: &str) -> Result<ThreadId> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(Error::External("not enough rights to create a topic".into()));
        }
        let thread = ThreadId(self.alloc());
        self.live_threads.lock().unwrap().insert(thread.0);
        self.push(Sent::ThreadCreated {
            thread,
            title: title.to_string(),
        });
        Ok(thread)
    }

    async fn probe_thread(&self, thread: ThreadId) -> Result<bool> {
        Ok(self.live_threads.lock().unwrap().contains(&thread.0))
    }

    async fn relay_to_thread(
        &self,
        thread: ThreadId,
        message: &InboundMessage,
    ) -> Result<MessageRef> {
        if !self.live_threads.lock().unwrap().contains(&thread.0) {
            return Err(Error::ThreadInvalid {
                thread_id: thread.0,
            });
        }
        if self.fail_relay.load(Ordering::SeqCst) {
            return Err(Error::External("Bad Request: message is too long".into()));
        }
        self.push(Sent::Relayed {
            thread,
            message_id: message.message_id,
        });
        Ok(MessageRef {
            chat_id: FORUM,
            message_id: MessageId(self.alloc()),
        })
    }

    async fn send_to_thread(
        &self,
        thread: ThreadId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        if !self.live_threads.lock().unwrap().contains(&thread.0) {
            return Err(Error::ThreadInvalid {
                thread_id: thread.0,
            });
        }
        self.push(Sent::ThreadNote {
            thread,
            html: html.to_string(),
            keyboard,
        });
        Ok(MessageRef {
            chat_id: FORUM,
            message_id: MessageId(self.alloc()),
        })
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.push(Sent::Text {
            chat: chat_id,
            text: text.to_string(),
        });
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(self.alloc()),
        })
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.push(Sent::Keyboard {
            chat: chat_id,
            text: text.to_string(),
            keyboard,
        });
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(self.alloc()),
        })
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        _png: Vec<u8>,
        caption: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.push(Sent::Photo {
            chat: chat_id,
            caption: caption.to_string(),
            keyboard,
        });
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(self.alloc()),
        })
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.push(Sent::Edited {
            msg,
            text: text.to_string(),
            keyboard,
        });
        Ok(())
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.push(Sent::Deleted { msg });
        Ok(())
    }

    async fn download_file(&self, _file_id: &str) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn copy_to_user(
        &self,
        chat_id: ChatId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageRef> {
        self.push(Sent::Copied {
            chat: chat_id,
            from: from_chat,
            message_id,
        });
        Ok(MessageRef {
            chat_id,
            message_id: MessageId(self.alloc()),
        })
    }

    async fn answer_callback_query(&self, _callback_id: &str, _text: Option<&str>) -> Result<()> {
        Ok(())
    }
}

/// Scripted AI provider. `None` fields behave as an unavailable backend.
#[derive(Default)]
pub struct FakeProvider {
    pub verdict: Mutex<Option<Verdict>>,
    pub autoreply: Mutex<Option<String>>,
    pub analyzed: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn clean() -> Self {
        let p = Self::default();
        *p.verdict.lock().unwrap() = Some(Verdict {
            is_spam: false,
            reason: "ok".into(),
        });
        p
    }

    pub fn set_spam(&self, reason: &str) {
        *self.verdict.lock().unwrap() = Some(Verdict {
            is_spam: true,
            reason: reason.to_string(),
        });
    }

    pub fn analyzed(&self) -> Vec<String> {
        self.analyzed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiProvider for FakeProvider {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn analyze(&self, text: Option<&str>, _image: Option<&[u8]>) -> Result<Verdict> {
        self.analyzed
            .lock()
            .unwrap()
            .push(text.unwrap_or_default().to_string());
        self.verdict
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::Classifier("deadline exceeded".into()))
    }

    async fn generate_question(&self) -> Result<GeneratedQuestion> {
        Err(Error::Generator("offline".into()))
    }

    async fn generate_autoreply(&self, _message: &str, _knowledge: &str) -> Result<Option<String>> {
        Ok(self.autoreply.lock().unwrap().clone())
    }
}

pub fn profile(id: i64) -> UserProfile {
    UserProfile {
        id: UserId(id),
        first_name: format!("User{id}"),
        last_name: None,
        username: Some(format!("user{id}")),
        language_code: Some("en".into()),
    }
}

pub fn text_message(user: i64, message_id: i32, text: &str) -> InboundMessage {
    InboundMessage {
        message_id: MessageId(message_id),
        chat_id: ChatId(user),
        sender: profile(user),
        content: MessageContent::Text {
            text: text.to_string(),
        },
        received_at: Utc::now(),
    }
}
