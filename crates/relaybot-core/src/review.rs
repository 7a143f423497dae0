//! Admin review listings: statistics, the blacklist and quarantined messages.
//!
//! Pages are 1-based and clamp to the available range, so a stale "next" button
//! pressed after rows were removed still shows something sensible.

use std::sync::Arc;

use crate::{
    domain::{BlacklistEntry, QuarantineRecord, UserAccount, UserId},
    formatting::{display_name, format_timestamp, truncate_text},
    messaging::types::{CallbackCommand, InlineButton, InlineKeyboard},
    store::Store,
    Result,
};

pub const PAGE_SIZE: usize = 5;

const CONTENT_PREVIEW: usize = 100;

/// One rendered listing page (plain text) with its buttons.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReviewPage {
    pub text: String,
    pub keyboard: Option<InlineKeyboard>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Stats {
    pub users: usize,
    pub blocked: usize,
    pub quarantined: usize,
}

pub struct ReviewBoard {
    store: Arc<dyn Store>,
}

impl ReviewBoard {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            users: self.store.user_count()?,
            blocked: self.store.blacklist_page(0, 0)?.1,
            quarantined: self.store.quarantine_page(0, 0)?.1,
        })
    }

    pub fn stats_page(&self) -> Result<ReviewPage> {
        let stats = self.stats()?;
        let text = format!(
            "📊 Statistics\n\n\
             Users: {}\n\
             Blocked: {}\n\
             Quarantined messages: {}",
            stats.users, stats.blocked, stats.quarantined
        );
        let keyboard = InlineKeyboard {
            rows: vec![
                vec![button("🚫 Blacklist", CallbackCommand::BlacklistPage { page: 1 })],
                vec![button(
                    "🛡️ Quarantined messages",
                    CallbackCommand::QuarantinePage { page: 1 },
                )],
            ],
        };
        Ok(ReviewPage {
            text,
            keyboard: Some(keyboard),
        })
    }

    /// `None` when nothing has been quarantined.
    pub fn quarantine_page(&self, page: usize) -> Result<Option<ReviewPage>> {
        let total = self.store.quarantine_page(0, 0)?.1;
        let Some((page, pages)) = clamp_page(page, total) else {
            return Ok(None);
        };
        let (rows, _) = self.store.quarantine_page((page - 1) * PAGE_SIZE, PAGE_SIZE)?;

        let mut text = format!("🛡️ Quarantined messages (page {page}/{pages})\n");
        for (idx, record) in rows.iter().enumerate() {
            let who = describe(record.user_id, self.store.user(record.user_id)?.as_ref());
            text.push_str(&format!(
                "\n{n}. {who}\n\
                 Reason: {reason}\n\
                 Content: {content}\n\
                 Time: {time}\n",
                n = (page - 1) * PAGE_SIZE + idx + 1,
                reason = record.reason,
                content = content_preview(record),
                time = format_timestamp(record.filtered_at),
            ));
        }

        let keyboard = pager(page, pages, |page| CallbackCommand::QuarantinePage { page })
            .map(|row| InlineKeyboard { rows: vec![row] });
        Ok(Some(ReviewPage { text, keyboard }))
    }

    /// `None` when nobody is blocked. Every row carries an unblock button.
    pub fn blacklist_page(&self, page: usize) -> Result<Option<ReviewPage>> {
        let total = self.store.blacklist_page(0, 0)?.1;
        let Some((page, pages)) = clamp_page(page, total) else {
            return Ok(None);
        };
        let (rows, _) = self.store.blacklist_page((page - 1) * PAGE_SIZE, PAGE_SIZE)?;

        let mut text = format!("🚫 Blacklist (page {page}/{pages})\n");
        let mut buttons = Vec::with_capacity(rows.len() + 1);
        for (idx, entry) in rows.iter().enumerate() {
            let account = self.store.user(entry.user_id)?;
            text.push_str(&format!(
                "\n{n}. {who}\n\
                 Kind: {kind}\n\
                 Reason: {reason}\n\
                 Blocked: {time}\n",
                n = (page - 1) * PAGE_SIZE + idx + 1,
                who = describe(entry.user_id, account.as_ref()),
                kind = block_kind(entry),
                reason = entry.reason,
                time = format_timestamp(entry.blocked_at),
            ));
            let name = account
                .as_ref()
                .map(display_name)
                .unwrap_or_else(|| entry.user_id.to_string());
            buttons.push(vec![button(
                format!("✅ Unblock {}", truncate_text(&name, 24)),
                CallbackCommand::AdminUnblock {
                    user: entry.user_id,
                },
            )]);
        }
        if let Some(row) = pager(page, pages, |page| CallbackCommand::BlacklistPage { page }) {
            buttons.push(row);
        }

        Ok(Some(ReviewPage {
            text,
            keyboard: Some(InlineKeyboard { rows: buttons }),
        }))
    }
}

/// `(page, total_pages)`, or `None` for an empty listing.
fn clamp_page(page: usize, total: usize) -> Option<(usize, usize)> {
    if total == 0 {
        return None;
    }
    let pages = total.div_ceil(PAGE_SIZE);
    Some((page.clamp(1, pages), pages))
}

fn pager(
    page: usize,
    pages: usize,
    command: impl Fn(usize) -> CallbackCommand,
) -> Option<Vec<InlineButton>> {
    let mut row = Vec::new();
    if page > 1 {
        row.push(button("◀️ Previous", command(page - 1)));
    }
    if page < pages {
        row.push(button("Next ▶️", command(page + 1)));
    }
    (!row.is_empty()).then_some(row)
}

fn button(label: impl Into<String>, command: CallbackCommand) -> InlineButton {
    InlineButton {
        label: label.into(),
        callback_data: command.encode(),
    }
}

fn describe(user_id: UserId, account: Option<&UserAccount>) -> String {
    match account {
        Some(a) => {
            let username = a
                .username
                .as_deref()
                .map(|u| format!(" (@{u})"))
                .unwrap_or_default();
            format!("{}{username}, id {user_id}", display_name(a))
        }
        None => format!("id {user_id}"),
    }
}

fn block_kind(entry: &BlacklistEntry) -> &'static str {
    if entry.permanent {
        "permanent"
    } else {
        "temporary"
    }
}

fn content_preview(record: &QuarantineRecord) -> String {
    match (record.content.as_deref(), record.media_type.as_deref()) {
        (Some(text), _) if !text.trim().is_empty() => truncate_text(text, CONTENT_PREVIEW),
        (_, Some(media)) => format!("[{media}]"),
        _ => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    use crate::{
        domain::{MessageId, UserProfile, SYSTEM_ADMIN},
        store::JsonFileStore,
    };

    fn board() -> (ReviewBoard, Arc<JsonFileStore>) {
        let store = Arc::new(JsonFileStore::in_memory());
        (ReviewBoard::new(store.clone()), store)
    }

    fn quarantine(store: &JsonFileStore, user: i64, message_id: i32, content: Option<&str>) {
        store
            .append_quarantine(&QuarantineRecord {
                user_id: UserId(user),
                message_id: MessageId(message_id),
                content: content.map(str::to_string),
                reason: "phishing link".to_string(),
                media_type: content.is_none().then(|| "photo".to_string()),
                media_file_id: None,
                filtered_at: Utc::now(),
            })
            .unwrap();
    }

    fn callbacks(kb: &InlineKeyboard) -> Vec<String> {
        kb.buttons().map(|b| b.callback_data.clone()).collect()
    }

    #[test]
    fn empty_listings_render_nothing() {
        let (board, _) = board();
        assert!(board.quarantine_page(1).unwrap().is_none());
        assert!(board.blacklist_page(1).unwrap().is_none());
        assert_eq!(
            board.stats().unwrap(),
            Stats {
                users: 0,
                blocked: 0,
                quarantined: 0
            }
        );
    }

    #[test]
    fn quarantine_pages_clamp_and_navigate() {
        let (board, store) = board();
        store
            .upsert_user(&UserAccount::new(
                &UserProfile {
                    id: UserId(7),
                    first_name: "Eve".to_string(),
                    username: Some("eve".to_string()),
                    ..UserProfile::default()
                },
                Utc::now(),
            ))
            .unwrap();
        for id in 1..=7 {
            quarantine(&store, 7, id, Some("free coins"));
        }

        let first = board.quarantine_page(1).unwrap().unwrap();
        assert!(first.text.contains("(page 1/2)"));
        assert_eq!(first.text.matches("Reason:").count(), PAGE_SIZE);
        assert!(first.text.contains("1. Eve (@eve), id 7"));
        assert!(first.text.contains("Reason: phishing link"));
        assert_eq!(callbacks(&first.keyboard.unwrap()), vec!["filtered_page:2"]);

        let clamped = board.quarantine_page(9).unwrap().unwrap();
        assert!(clamped.text.contains("(page 2/2)"));
        assert_eq!(clamped.text.matches("Reason:").count(), 2);
        assert!(clamped.text.contains("7. Eve"));
        assert_eq!(callbacks(&clamped.keyboard.unwrap()), vec!["filtered_page:1"]);
    }

    #[test]
    fn media_without_caption_is_labelled() {
        let (board, store) = board();
        quarantine(&store, 3, 1, None);
        let page = board.quarantine_page(1).unwrap().unwrap();
        assert!(page.text.contains("Content: [photo]"));
        assert!(page.text.contains("1. id 3"));
        assert!(page.keyboard.is_none());
    }

    #[test]
    fn blacklist_rows_offer_unblock() {
        let (board, store) = board();
        let now = Utc::now();
        for (id, permanent, minutes) in [(1, false, 0), (2, true, 1)] {
            store
                .upsert_blacklist(&BlacklistEntry {
                    user_id: UserId(id),
                    reason: "rude".to_string(),
                    blocked_by: SYSTEM_ADMIN,
                    permanent,
                    blocked_at: now + Duration::minutes(minutes),
                })
                .unwrap();
        }

        let page = board.blacklist_page(1).unwrap().unwrap();
        assert!(page.text.contains("Kind: permanent"));
        assert!(page.text.contains("Kind: temporary"));
        assert_eq!(
            callbacks(&page.keyboard.unwrap()),
            vec!["admin_unblock:2", "admin_unblock:1"]
        );
        assert_eq!(board.stats().unwrap().blocked, 2);
    }

    #[test]
    fn stats_page_links_both_listings() {
        let (board, store) = board();
        quarantine(&store, 3, 1, Some("x"));
        let page = board.stats_page().unwrap();
        assert!(page.text.contains("Quarantined messages: 1"));
        assert_eq!(
            callbacks(&page.keyboard.unwrap()),
            vec!["blacklist_page:1", "filtered_page:1"]
        );
    }
}
