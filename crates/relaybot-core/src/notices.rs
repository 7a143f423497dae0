//! User-facing texts.

pub const WELCOME: &str = "👋 Welcome! Messages you send here are forwarded to the team, and replies come back in this chat.";

pub const HELP: &str = "Send any message and it will be forwarded to the team.\n\n\
/start - show the welcome message\n\
/help - show this help\n\
/getid - show your numeric id\n\
/disable_ai_check on|off - turn the automatic content check off or back on";

pub const VERIFY_PROMPT: &str = "🤖 Please confirm you are human before your message is delivered.";
pub const VERIFY_RESUMED: &str = "⏳ You still have an open verification. Please answer it first.";
pub const VERIFIED_REPLAYING: &str = "✅ Verified! Delivering your message now.";
pub const VERIFIED_NOTHING_PENDING: &str = "✅ Verified! You can now send messages.";
pub const VERIFICATION_EXPIRED: &str = "⌛ That verification has expired. Send any message to get a new one.";
pub const VERIFICATION_BANNED: &str = "⛔ Too many wrong answers. You have been permanently blocked.";
pub const THREAD_CLOSED: &str = "🔄 Your previous conversation was closed. Please verify again and your message will be delivered.";

pub const RATE_WARNING: &str = "⚠️ You are sending messages too fast. Slow down or you will be blocked.";
pub const RATE_BANNED: &str = "⛔ You kept sending messages too fast and have been permanently blocked.";

pub const PERMANENTLY_BLOCKED: &str = "⛔ You have been permanently blocked.";
pub const BLOCKED_CONTACT_ADMIN: &str = "🚫 You are blocked. Please contact an administrator.";
pub const UNBLOCK_PROMPT: &str = "🚫 You are temporarily blocked. Answer correctly to be unblocked.";
pub const UNBLOCK_RESUMED: &str = "⏳ You still have an open unblock question. Please answer it first.";
pub const UNBLOCK_EXPIRED: &str = "⌛ That question has expired. Send any message to get a new one.";
pub const UNBLOCKED: &str = "✅ You have been unblocked. You can send messages again.";
pub const UNBLOCKED_BY_ADMIN: &str = "✅ An administrator unblocked you. You can send messages again.";

pub const THREAD_CREATE_FAILED: &str = "❌ Could not create your conversation. Please contact an administrator.";
pub const DELIVERY_FAILED: &str = "❌ Your message could not be delivered. Please try again later.";

pub const ANALYZING: &str = "🔎 Checking your message for spam...";

pub const AI_CHECK_DISABLED: &str = "✅ Automatic content checks are now disabled for your messages.";
pub const AI_CHECK_ENABLED: &str = "✅ Automatic content checks are enabled again for your messages.";
pub const AI_CHECK_USAGE: &str = "Usage:\n/disable_ai_check on - stop checking my messages\n/disable_ai_check off - check my messages again";

pub const NO_QUARANTINE: &str = "No quarantined messages.";
pub const NO_BLOCKED_USERS: &str = "Nobody is blocked.";

pub fn ai_check_status(opted_out: bool) -> String {
    let state = if opted_out { "disabled" } else { "enabled" };
    format!("Automatic content check: {state}.\n\n{AI_CHECK_USAGE}")
}

pub fn rejected(reason: &str) -> String {
    format!("🛡️ Your message was not delivered because it was flagged by the content filter.\nReason: {reason}")
}

pub fn wrong_answer(attempts_remaining: u32) -> String {
    let noun = if attempts_remaining == 1 { "attempt" } else { "attempts" };
    format!("❌ Wrong answer. {attempts_remaining} {noun} remaining.")
}

pub fn your_id(user_id: i64) -> String {
    format!("Your id: {user_id}")
}
