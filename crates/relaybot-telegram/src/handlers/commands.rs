use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use teloxide::prelude::*;

use relaybot_core::{
    domain::{ExemptionEntry, Modality, ThreadId, UserId},
    formatting::format_timestamp,
    notices,
    review::ReviewPage,
    Result as CoreResult,
};

use crate::{router::AppState, TelegramPlatform};

use super::convert;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Leading numeric user id wins; otherwise the topic's user.
fn split_target(args: &str, thread_user: Option<UserId>) -> Option<(UserId, String)> {
    let mut parts = args.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("");
    if let Ok(id) = first.parse::<i64>() {
        return Some((UserId(id), parts.next().unwrap_or("").trim().to_string()));
    }
    thread_user.map(|u| (u, args.trim().to_string()))
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum ExemptArgs {
    Permanent { reason: Option<String> },
    Temporary { hours: i64, reason: Option<String> },
    Remove,
    Status,
}

fn parse_exempt(args: &str) -> Result<ExemptArgs, &'static str> {
    const USAGE: &str = "Usage: /exempt [user_id] permanent|temp <hours>|remove|status [reason]";
    let mut parts = args.split_whitespace();
    let reason_from = |rest: Vec<&str>| {
        let r = rest.join(" ");
        (!r.is_empty()).then_some(r)
    };
    match parts.next() {
        Some("permanent") | Some("perm") => Ok(ExemptArgs::Permanent {
            reason: reason_from(parts.collect()),
        }),
        Some("temp") | Some("temporary") => {
            let hours = parts
                .next()
                .and_then(|h| h.parse::<i64>().ok())
                .filter(|h| *h > 0)
                .ok_or(USAGE)?;
            Ok(ExemptArgs::Temporary {
                hours,
                reason: reason_from(parts.collect()),
            })
        }
        Some("remove") => Ok(ExemptArgs::Remove),
        None | Some("status") => Ok(ExemptArgs::Status),
        _ => Err(USAGE),
    }
}

fn exemption_status(user: UserId, entry: Option<ExemptionEntry>) -> String {
    let reason = |entry: &ExemptionEntry| {
        entry
            .reason
            .as_deref()
            .map(|r| format!(" Reason: {r}"))
            .unwrap_or_default()
    };
    match entry {
        None => format!("{user} has no exemption."),
        Some(e) if e.permanent => format!("🛡️ {user} is permanently exempt.{}", reason(&e)),
        Some(e) => match e.expires_at {
            Some(until) if until > Utc::now() => format!(
                "🛡️ {user} is exempt until {}.{}",
                format_timestamp(until),
                reason(&e)
            ),
            _ => format!("{user}'s exemption has expired."),
        },
    }
}

/// `Some(None)` shows the current setting.
fn parse_opt_out(arg: &str) -> Option<Option<bool>> {
    match arg.trim().to_lowercase().as_str() {
        "" | "status" => Some(None),
        "on" => Some(Some(true)),
        "off" => Some(Some(false)),
        _ => None,
    }
}

/// Listing page number; defaults to the first.
fn parse_page(arg: &str) -> usize {
    arg.trim().parse::<usize>().unwrap_or(1)
}

/// `Some(None)` resets to the global default.
fn parse_modality(arg: &str) -> Option<Option<Modality>> {
    match arg.trim().to_lowercase().as_str() {
        "default" | "reset" => Some(None),
        other => Modality::parse(other).map(Some),
    }
}

fn reason_or_default(rest: &str) -> &str {
    if rest.trim().is_empty() {
        "no reason given"
    } else {
        rest.trim()
    }
}

async fn reply(bot: &Bot, msg: &Message, text: impl Into<String>) -> ResponseResult<()> {
    let mut req = bot.send_message(msg.chat.id, text.into());
    if let Some(thread) = msg.thread_id {
        req = req.message_thread_id(thread);
    }
    if let Err(e) = req.await {
        tracing::warn!(chat_id = msg.chat.id.0, error = %e, "command reply failed");
    }
    Ok(())
}

async fn reply_page(
    bot: &Bot,
    msg: &Message,
    rendered: CoreResult<Option<ReviewPage>>,
    empty: &str,
) -> ResponseResult<()> {
    let page = match rendered {
        Ok(Some(page)) => page,
        Ok(None) => return reply(bot, msg, empty).await,
        Err(e) => {
            tracing::error!(error = %e, "review page failed");
            return reply(bot, msg, format!("Failed: {e}")).await;
        }
    };
    let mut req = bot.send_message(msg.chat.id, page.text);
    if let Some(thread) = msg.thread_id {
        req = req.message_thread_id(thread);
    }
    if let Some(keyboard) = page.keyboard {
        req = req.reply_markup(TelegramPlatform::markup(keyboard));
    }
    if let Err(e) = req.await {
        tracing::warn!(chat_id = msg.chat.id.0, error = %e, "review reply failed");
    }
    Ok(())
}

/// Returns `false` when the text is not a command we own (it is then relayed as a message).
pub async fn handle_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    text: &str,
) -> ResponseResult<bool> {
    let (cmd, args) = parse_command(text);
    let Some(from) = msg.from() else {
        return Ok(false);
    };
    let sender_id = from.id.0 as i64;

    match cmd.as_str() {
        "start" if msg.chat.is_private() => {
            reply(bot, msg, notices::WELCOME).await?;
            Ok(true)
        }
        "help" if msg.chat.is_private() => {
            reply(bot, msg, notices::HELP).await?;
            Ok(true)
        }
        "getid" => {
            let text = if msg.chat.is_private() {
                notices::your_id(sender_id)
            } else {
                let mut t = format!("Chat id: {}", msg.chat.id.0);
                if let Some(user) = thread_user(state, msg) {
                    t.push_str(&format!("\nTopic user id: {user}"));
                }
                t
            };
            reply(bot, msg, text).await?;
            Ok(true)
        }
        "disable_ai_check" if msg.chat.is_private() => {
            let profile = convert::profile(from);
            let text = match parse_opt_out(&args) {
                None => notices::AI_CHECK_USAGE.to_string(),
                Some(None) => match state.pipeline.moderation_opted_out(profile.id) {
                    Ok(opted_out) => notices::ai_check_status(opted_out),
                    Err(e) => {
                        tracing::error!(user_id = sender_id, error = %e, "opt-out lookup failed");
                        notices::DELIVERY_FAILED.to_string()
                    }
                },
                Some(Some(opt_out)) => {
                    match state.pipeline.set_moderation_opt_out(&profile, opt_out).await {
                        Ok(()) if opt_out => notices::AI_CHECK_DISABLED.to_string(),
                        Ok(()) => notices::AI_CHECK_ENABLED.to_string(),
                        Err(e) => {
                            tracing::error!(user_id = sender_id, error = %e, "opt-out failed");
                            notices::DELIVERY_FAILED.to_string()
                        }
                    }
                }
            };
            reply(bot, msg, text).await?;
            Ok(true)
        }
        "stats" | "blacklist" | "view_filtered" => {
            if !state.is_admin(sender_id) {
                return Ok(!msg.chat.is_private());
            }
            match cmd.as_str() {
                "stats" => reply_page(bot, msg, state.review.stats_page().map(Some), "").await?,
                "blacklist" => {
                    let rendered = state.review.blacklist_page(parse_page(&args));
                    reply_page(bot, msg, rendered, notices::NO_BLOCKED_USERS).await?
                }
                _ => {
                    let rendered = state.review.quarantine_page(parse_page(&args));
                    reply_page(bot, msg, rendered, notices::NO_QUARANTINE).await?
                }
            }
            tracing::info!(admin = sender_id, command = %cmd, "admin review command");
            Ok(true)
        }
        "block" | "ban" | "unblock" | "exempt" | "modality" => {
            if !state.is_admin(sender_id) {
                return Ok(!msg.chat.is_private());
            }
            admin_command(bot, msg, state, sender_id, &cmd, &args).await?;
            Ok(true)
        }
        _ => Ok(!msg.chat.is_private()),
    }
}

fn thread_user(state: &AppState, msg: &Message) -> Option<UserId> {
    if msg.chat.id.0 != state.cfg.forum_group_id {
        return None;
    }
    let thread = ThreadId(msg.thread_id?);
    match state.pipeline.router().user_for_thread(thread) {
        Ok(user) => user,
        Err(e) => {
            tracing::warn!(thread_id = %thread, error = %e, "thread lookup failed");
            None
        }
    }
}

async fn admin_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    admin: i64,
    cmd: &str,
    args: &str,
) -> ResponseResult<()> {
    let Some((user, rest)) = split_target(args, thread_user(state, msg)) else {
        return reply(
            bot,
            msg,
            format!("Run /{cmd} inside a user's topic or pass a user id first."),
        )
        .await;
    };
    let pipeline = &state.pipeline;

    let text = match cmd {
        "block" | "ban" => {
            let (permanent, reason) = match rest.split_once(char::is_whitespace) {
                _ if cmd == "ban" => (true, rest.as_str()),
                Some((flag, tail)) if flag == "perm" || flag == "permanent" => (true, tail),
                None if rest == "perm" || rest == "permanent" => (true, ""),
                _ => (false, rest.as_str()),
            };
            match pipeline
                .admin_block(user, admin, permanent, reason_or_default(reason))
                .await
            {
                Ok(entry) if entry.permanent => format!("⛔ {user} permanently blocked."),
                Ok(_) => format!("🚫 {user} temporarily blocked (self-service unblock allowed)."),
                Err(e) => format!("Block failed: {e}"),
            }
        }
        "unblock" => match pipeline.admin_unblock(user, admin).await {
            Ok(true) => format!("✅ {user} unblocked."),
            Ok(false) => format!("{user} was not blocked."),
            Err(e) => format!("Unblock failed: {e}"),
        },
        "exempt" => match parse_exempt(&rest) {
            Err(usage) => usage.to_string(),
            Ok(ExemptArgs::Status) => match pipeline.blacklist().exemption(user) {
                Ok(entry) => exemption_status(user, entry),
                Err(e) => format!("Failed: {e}"),
            },
            Ok(ExemptArgs::Remove) => match pipeline.admin_unexempt(user).await {
                Ok(true) => format!("Exemption for {user} removed."),
                Ok(false) => format!("{user} had no exemption."),
                Err(e) => format!("Failed: {e}"),
            },
            Ok(ExemptArgs::Permanent { reason }) => {
                match pipeline.admin_exempt(user, admin, true, None, reason).await {
                    Ok(_) => format!("🛡️ {user} permanently exempt from content checks."),
                    Err(e) => format!("Failed: {e}"),
                }
            }
            Ok(ExemptArgs::Temporary { hours, reason }) => {
                let until = Utc::now() + ChronoDuration::hours(hours);
                match pipeline
                    .admin_exempt(user, admin, false, Some(until), reason)
                    .await
                {
                    Ok(_) => format!(
                        "🛡️ {user} exempt from content checks until {}.",
                        format_timestamp(until)
                    ),
                    Err(e) => format!("Failed: {e}"),
                }
            }
        },
        "modality" => match parse_modality(&rest) {
            None => "Usage: /modality [user_id] text|image|default".to_string(),
            Some(modality) => match pipeline.set_modality(user, modality).await {
                Ok(true) => format!(
                    "Verification for {user}: {}.",
                    modality.map(|m| m.as_str()).unwrap_or("default")
                ),
                Ok(false) => format!("Unknown user {user}."),
                Err(e) => format!("Failed: {e}"),
            },
        },
        _ => return Ok(()),
    };

    tracing::info!(admin, user_id = %user, command = cmd, "admin command");
    reply(bot, msg, text).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_strips_bot_suffix_and_splits_args() {
        assert_eq!(
            parse_command("/Block@relay_bot 42 spam links"),
            ("block".to_string(), "42 spam links".to_string())
        );
        assert_eq!(parse_command("/start"), ("start".to_string(), String::new()));
    }

    #[test]
    fn target_prefers_explicit_id_over_topic() {
        assert_eq!(
            split_target("42 rude", Some(UserId(7))),
            Some((UserId(42), "rude".to_string()))
        );
        assert_eq!(
            split_target("rude", Some(UserId(7))),
            Some((UserId(7), "rude".to_string()))
        );
        assert_eq!(split_target("rude", None), None);
    }

    #[test]
    fn exempt_arguments() {
        assert_eq!(
            parse_exempt("permanent trusted partner"),
            Ok(ExemptArgs::Permanent {
                reason: Some("trusted partner".into())
            })
        );
        assert_eq!(
            parse_exempt("temp 24"),
            Ok(ExemptArgs::Temporary {
                hours: 24,
                reason: None
            })
        );
        assert_eq!(parse_exempt("remove"), Ok(ExemptArgs::Remove));
        assert!(parse_exempt("temp").is_err());
        assert!(parse_exempt("temp -3").is_err());
        assert_eq!(parse_exempt(""), Ok(ExemptArgs::Status));
        assert_eq!(parse_exempt("status"), Ok(ExemptArgs::Status));
        assert!(parse_exempt("forever").is_err());
    }

    #[test]
    fn exemption_status_texts() {
        let now = Utc::now();
        let entry = |permanent, expires_at| ExemptionEntry {
            user_id: UserId(9),
            permanent,
            expires_at,
            exempted_by: 1,
            reason: Some("partner".into()),
            created_at: now,
        };
        assert_eq!(exemption_status(UserId(9), None), "9 has no exemption.");
        assert!(exemption_status(UserId(9), Some(entry(true, None)))
            .contains("permanently exempt. Reason: partner"));
        assert!(exemption_status(
            UserId(9),
            Some(entry(false, Some(now + ChronoDuration::hours(2))))
        )
        .contains("exempt until"));
        assert!(exemption_status(
            UserId(9),
            Some(entry(false, Some(now - ChronoDuration::hours(2))))
        )
        .contains("expired"));
    }

    #[test]
    fn opt_out_arguments() {
        assert_eq!(parse_opt_out(""), Some(None));
        assert_eq!(parse_opt_out("status"), Some(None));
        assert_eq!(parse_opt_out("ON"), Some(Some(true)));
        assert_eq!(parse_opt_out("off"), Some(Some(false)));
        assert_eq!(parse_opt_out("maybe"), None);
    }

    #[test]
    fn page_argument_defaults_to_first() {
        assert_eq!(parse_page(""), 1);
        assert_eq!(parse_page(" 3 "), 3);
        assert_eq!(parse_page("x"), 1);
    }

    #[test]
    fn modality_arguments() {
        assert_eq!(parse_modality("image"), Some(Some(Modality::Image)));
        assert_eq!(parse_modality("Default"), Some(None));
        assert_eq!(parse_modality("audio"), None);
    }

    #[test]
    fn empty_reason_gets_placeholder() {
        assert_eq!(reason_or_default("  "), "no reason given");
        assert_eq!(reason_or_default(" spam "), "spam");
    }
}
