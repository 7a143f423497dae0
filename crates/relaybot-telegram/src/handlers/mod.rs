//! Telegram update handlers.
//!
//! Private chats feed the relay pipeline; topic messages in the forum group are
//! admin replies copied back to the topic's user.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, Message},
};

use relaybot_core::domain::{ChatId, MessageId, ThreadId};

use crate::router::AppState;

mod callback;
mod commands;
mod convert;

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    callback::handle_callback(bot, q, state).await
}

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    if from.is_bot {
        return Ok(());
    }
    let sender_id = from.id.0 as i64;

    if let Some(text) = msg.text() {
        if text.starts_with('/') && commands::handle_command(&bot, &msg, &state, text).await? {
            return Ok(());
        }
    }

    if msg.chat.is_private() {
        let Some(inbound) = convert::inbound(&msg) else {
            return Ok(());
        };
        let user_id = inbound.user_id();
        match state.pipeline.handle_message(inbound).await {
            Ok(outcome) => tracing::debug!(user_id = %user_id, ?outcome, "message handled"),
            Err(e) => tracing::error!(user_id = %user_id, error = %e, "message handling failed"),
        }
        return Ok(());
    }

    if msg.chat.id.0 == state.cfg.forum_group_id {
        let Some(thread) = msg.thread_id else {
            return Ok(());
        };
        if !state.is_admin(sender_id) {
            tracing::debug!(sender_id, "ignoring topic message from non-admin");
            return Ok(());
        }
        let res = state
            .pipeline
            .relay_admin_reply(ThreadId(thread), ChatId(msg.chat.id.0), MessageId(msg.id.0))
            .await;
        match res {
            Ok(Some(user_id)) => {
                tracing::info!(user_id = %user_id, thread_id = thread, "admin reply relayed")
            }
            Ok(None) => tracing::debug!(thread_id = thread, "topic has no mapped user"),
            Err(e) => {
                tracing::warn!(thread_id = thread, error = %e, "admin reply relay failed");
                let _ = bot
                    .send_message(msg.chat.id, format!("⚠️ Could not deliver reply: {e}"))
                    .message_thread_id(thread)
                    .await;
            }
        }
    }

    Ok(())
}
