use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{ChatId, MessageId, MessageRef, ThreadId},
    messaging::{
        port::ChatPlatform,
        types::{InboundMessage, InlineKeyboard},
    },
    Result,
};

/// All thread operations land in the same admin group and share one slot.
const FORUM_KEY: i64 = i64::MIN;

#[derive(Clone, Copy, Debug)]
pub struct ThrottleConfig {
    /// Minimum spacing between *any* platform API calls (global flood control).
    pub global_min_interval: Duration,
    /// Minimum spacing between calls per chat (Telegram 1 msg/sec style limits).
    pub per_chat_min_interval: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            global_min_interval: Duration::from_millis(40), // ~25/sec
            per_chat_min_interval: Duration::from_millis(1050), // ~0.95/sec
        }
    }
}

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// ChatPlatform decorator that spaces outbound calls.
///
/// Best effort against 429s when many users write at once; it does not
/// guarantee zero flood errors.
pub struct ThrottledPlatform {
    inner: Arc<dyn ChatPlatform>,
    cfg: ThrottleConfig,
    global: Mutex<IntervalLimiter>,
    per_chat: Mutex<HashMap<i64, Arc<Mutex<IntervalLimiter>>>>,
}

impl ThrottledPlatform {
    pub fn new(inner: Arc<dyn ChatPlatform>, cfg: ThrottleConfig) -> Self {
        Self {
            inner,
            cfg,
            global: Mutex::new(IntervalLimiter::new(cfg.global_min_interval)),
            per_chat: Mutex::new(HashMap::new()),
        }
    }

    async fn limiter_for_chat(&self, chat_id: i64) -> Arc<Mutex<IntervalLimiter>> {
        let mut map = self.per_chat.lock().await;
        map.entry(chat_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(IntervalLimiter::new(
                    self.cfg.per_chat_min_interval,
                )))
            })
            .clone()
    }

    async fn throttle_chat(&self, chat_id: i64) {
        let global_wait = { self.global.lock().await.reserve() };
        let chat_wait = {
            let lim = self.limiter_for_chat(chat_id).await;
            let mut guard = lim.lock().await;
            guard.reserve()
        };

        let wait = global_wait.max(chat_wait);
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn throttle_global(&self) {
        let wait = { self.global.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl ChatPlatform for ThrottledPlatform {
    async fn create_thread(&self, title: &str) -> Result<ThreadId> {
        self.throttle_chat(FORUM_KEY).await;
        self.inner.create_thread(title).await
    }

    async fn probe_thread(&self, thread: ThreadId) -> Result<bool> {
        self.throttle_chat(FORUM_KEY).await;
        self.inner.probe_thread(thread).await
    }

    async fn relay_to_thread(
        &self,
        thread: ThreadId,
        message: &InboundMessage,
    ) -> Result<MessageRef> {
        self.throttle_chat(FORUM_KEY).await;
        self.inner.relay_to_thread(thread, message).await
    }

    async fn send_to_thread(
        &self,
        thread: ThreadId,
        html: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.throttle_chat(FORUM_KEY).await;
        self.inner.send_to_thread(thread, html, keyboard).await
    }

    async fn send_text(&self, chat_id: ChatId, text: &str) -> Result<MessageRef> {
        self.throttle_chat(chat_id.0).await;
        self.inner.send_text(chat_id, text).await
    }

    async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: InlineKeyboard,
    ) -> Result<MessageRef> {
        self.throttle_chat(chat_id.0).await;
        self.inner.send_keyboard(chat_id, text, keyboard).await
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        png: Vec<u8>,
        caption: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<MessageRef> {
        self.throttle_chat(chat_id.0).await;
        self.inner.send_photo(chat_id, png, caption, keyboard).await
    }

    async fn edit_text(
        &self,
        msg: MessageRef,
        text: &str,
        keyboard: Option<InlineKeyboard>,
    ) -> Result<()> {
        self.throttle_chat(msg.chat_id.0).await;
        self.inner.edit_text(msg, text, keyboard).await
    }

    async fn delete_message(&self, msg: MessageRef) -> Result<()> {
        self.throttle_chat(msg.chat_id.0).await;
        self.inner.delete_message(msg).await
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        // Downloads do not count against per-chat message limits.
        self.throttle_global().await;
        self.inner.download_file(file_id).await
    }

    async fn copy_to_user(
        &self,
        chat_id: ChatId,
        from_chat: ChatId,
        message_id: MessageId,
    ) -> Result<MessageRef> {
        self.throttle_chat(chat_id.0).await;
        self.inner.copy_to_user(chat_id, from_chat, message_id).await
    }

    async fn answer_callback_query(&self, callback_id: &str, text: Option<&str>) -> Result<()> {
        // No chat_id available here; apply global throttling only.
        self.throttle_global().await;
        self.inner.answer_callback_query(callback_id, text).await
    }
}
