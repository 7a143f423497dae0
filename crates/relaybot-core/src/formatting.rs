use chrono::{DateTime, Utc};

use crate::domain::UserAccount;

/// Telegram forum topic names are capped at 128 characters.
const MAX_THREAD_TITLE: usize = 128;

/// Escape text for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Char-boundary safe truncation with a trailing ellipsis.
pub fn truncate_text(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out = s.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

/// `"<name> (ID: <id>)"`, shortened to fit the topic name limit.
pub fn thread_title(account: &UserAccount) -> String {
    let suffix = format!(" (ID: {})", account.id.0);
    let name = display_name(account);
    let budget = MAX_THREAD_TITLE.saturating_sub(suffix.chars().count() + 3);
    format!("{}{suffix}", truncate_text(&name, budget))
}

pub fn display_name(account: &UserAccount) -> String {
    let first = account.first_name.trim();
    match account.last_name.as_deref().map(str::trim) {
        Some(last) if !last.is_empty() => format!("{first} {last}"),
        _ if first.is_empty() => format!("User_{}", account.id.0),
        _ => first.to_string(),
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// HTML profile card posted as the first message of a user's thread.
pub fn profile_card(account: &UserAccount, blocked: bool) -> String {
    let name = escape_html(&display_name(account));
    let username = account
        .username
        .as_deref()
        .map(|u| format!("@{}", escape_html(u)))
        .unwrap_or_else(|| "none".to_string());
    let status = if blocked { "blocked" } else { "active" };

    format!(
        "👤 <b>New conversation</b>\n\n\
         <b>Name:</b> <a href=\"tg://user?id={id}\">{name}</a>\n\
         <b>ID:</b> <code>{id}</code>\n\
         <b>Username:</b> {username}\n\
         <b>Language:</b> {lang}\n\
         <b>First contact:</b> {first}\n\
         <b>Status:</b> {status}",
        id = account.id.0,
        lang = escape_html(account.language_code.as_deref().unwrap_or("unknown")),
        first = format_timestamp(account.created_at),
    )
}
