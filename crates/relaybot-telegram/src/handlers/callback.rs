use std::sync::Arc;

use teloxide::prelude::*;

use relaybot_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    messaging::types::CallbackCommand,
    notices,
    pipeline::PipelineOutcome,
    review::ReviewPage,
    Result,
};

use crate::router::AppState;

fn answer_text(outcome: &PipelineOutcome) -> Option<&'static str> {
    match outcome {
        PipelineOutcome::Verified { .. } | PipelineOutcome::Unblocked => Some("✅ Correct"),
        PipelineOutcome::ChallengeRetried { .. } => Some("❌ Wrong answer"),
        PipelineOutcome::ChallengeExpired => Some("⌛ Expired"),
        PipelineOutcome::VerificationBanned | PipelineOutcome::UnblockFailed => Some("⛔ Blocked"),
        _ => None,
    }
}

pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    let cb_id = q.id.clone();
    let from_id = q.from.id.0 as i64;

    let Some(cmd) = q.data.as_deref().and_then(CallbackCommand::parse) else {
        let _ = bot
            .answer_callback_query(cb_id)
            .text("Invalid callback data".to_string())
            .await;
        return Ok(());
    };

    let prompt = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });

    let text: Option<String> = match cmd {
        CallbackCommand::Verify { option } => {
            match state
                .pipeline
                .handle_verification_answer(UserId(from_id), option, prompt)
                .await
            {
                Ok(outcome) => answer_text(&outcome).map(str::to_string),
                Err(e) => {
                    tracing::error!(user_id = from_id, error = %e, "verification answer failed");
                    Some("Something went wrong".to_string())
                }
            }
        }
        CallbackCommand::Unblock { option } => {
            match state
                .pipeline
                .handle_unblock_answer(UserId(from_id), option, prompt)
                .await
            {
                Ok(outcome) => answer_text(&outcome).map(str::to_string),
                Err(e) => {
                    tracing::error!(user_id = from_id, error = %e, "unblock answer failed");
                    Some("Something went wrong".to_string())
                }
            }
        }
        CallbackCommand::AdminBlock { .. }
        | CallbackCommand::AdminUnblock { .. }
        | CallbackCommand::AlreadyBanned { .. }
        | CallbackCommand::QuarantinePage { .. }
        | CallbackCommand::BlacklistPage { .. }
            if !state.is_admin(from_id) =>
        {
            tracing::warn!(sender_id = from_id, "non-admin pressed an admin button");
            Some("Unauthorized".to_string())
        }
        CallbackCommand::AlreadyBanned { user } => {
            Some(format!("{user} is permanently banned. Use /unblock {user} to lift it."))
        }
        CallbackCommand::QuarantinePage { page } => {
            let rendered = state.review.quarantine_page(page);
            show_page(&state, prompt, rendered, notices::NO_QUARANTINE).await
        }
        CallbackCommand::BlacklistPage { page } => {
            let rendered = state.review.blacklist_page(page);
            show_page(&state, prompt, rendered, notices::NO_BLOCKED_USERS).await
        }
        CallbackCommand::AdminBlock { user } => {
            match state
                .pipeline
                .admin_block(user, from_id, true, "blocked via profile card")
                .await
            {
                Ok(_) => Some(format!("🚫 Blocked {user}")),
                Err(e) => {
                    tracing::error!(user_id = %user, error = %e, "admin block failed");
                    Some(format!("Block failed: {e}"))
                }
            }
        }
        CallbackCommand::AdminUnblock { user } => match state.pipeline.admin_unblock(user, from_id).await {
            Ok(true) => Some(format!("✅ Unblocked {user}")),
            Ok(false) => Some(format!("{user} was not blocked")),
            Err(e) => {
                tracing::error!(user_id = %user, error = %e, "admin unblock failed");
                Some(format!("Unblock failed: {e}"))
            }
        },
    };

    if let Err(e) = state
        .platform
        .answer_callback_query(&cb_id, text.as_deref())
        .await
    {
        tracing::debug!(error = %e, "answer_callback_query failed");
    }
    Ok(())
}

/// Rewrites the listing message in place; empty listings replace it with `empty`.
async fn show_page(
    state: &AppState,
    prompt: Option<MessageRef>,
    rendered: Result<Option<ReviewPage>>,
    empty: &str,
) -> Option<String> {
    let page = match rendered {
        Ok(page) => page,
        Err(e) => {
            tracing::error!(error = %e, "review page failed");
            return Some("Something went wrong".to_string());
        }
    };
    let prompt = prompt?;
    let (text, keyboard) = match page {
        Some(page) => (page.text, page.keyboard),
        None => (empty.to_string(), None),
    };
    if let Err(e) = state.platform.edit_text(prompt, &text, keyboard).await {
        tracing::debug!(error = %e, "review page edit failed");
    }
    None
}
