use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    domain::Modality, errors::Error, verification::captcha::CaptchaCharset, Result,
};

/// Which AI backend serves classification, question generation and auto replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AiProviderKind {
    Gemini,
    OpenAi,
}

impl AiProviderKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "gemini" => Some(AiProviderKind::Gemini),
            "openai" => Some(AiProviderKind::OpenAi),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model_filter: String,
    pub model_verification: String,
    pub model_autoreply: String,
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_filter: String,
    pub model_verification: String,
    pub model_autoreply: String,
}

/// The knobs the relay pipeline and its components consume.
///
/// Split from [`Config`] so components can be built without a bot token.
#[derive(Clone, Debug)]
pub struct RelayPolicy {
    pub verification_enabled: bool,
    pub verification_ttl: Duration,
    pub max_verification_attempts: u32,
    pub default_modality: Modality,
    pub captcha_charset: CaptchaCharset,

    pub rate_limit_enabled: bool,
    pub rate_limit_per_minute: u32,

    pub auto_unblock_enabled: bool,
    pub moderation_enabled: bool,
    pub autoreply_enabled: bool,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            verification_enabled: true,
            verification_ttl: Duration::from_secs(300),
            max_verification_attempts: 3,
            default_modality: Modality::Text,
            captcha_charset: CaptchaCharset::Digits,
            rate_limit_enabled: true,
            rate_limit_per_minute: 30,
            auto_unblock_enabled: true,
            moderation_enabled: true,
            autoreply_enabled: false,
        }
    }
}

/// Typed configuration loaded from the environment (and an optional `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Telegram
    pub bot_token: String,
    pub forum_group_id: i64,
    pub admin_ids: Vec<i64>,

    // Storage
    pub data_path: PathBuf,

    // Relay behavior
    pub policy: RelayPolicy,
    pub knowledge_base: Option<String>,

    // AI providers
    pub ai_provider: AiProviderKind,
    pub gemini: Option<GeminiConfig>,
    pub openai: Option<OpenAiConfig>,
    pub ai_timeout: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let bot_token = env_str("BOT_TOKEN").unwrap_or_default();
        if bot_token.trim().is_empty() {
            return Err(Error::Config(
                "BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        let forum_group_id = env_i64("FORUM_GROUP_ID").unwrap_or(0);
        if forum_group_id == 0 {
            return Err(Error::Config(
                "FORUM_GROUP_ID environment variable is required".to_string(),
            ));
        }
        let admin_ids = parse_csv_i64(env_str("ADMIN_IDS"));
        if admin_ids.is_empty() {
            return Err(Error::Config(
                "ADMIN_IDS environment variable is required".to_string(),
            ));
        }

        let data_path = PathBuf::from(
            env_str("DATA_PATH").unwrap_or_else(|| "./data/relaybot.json".to_string()),
        );

        let defaults = RelayPolicy::default();
        let default_modality = match env_str("VERIFICATION_MODALITY") {
            Some(raw) => Modality::parse(&raw).ok_or_else(|| {
                Error::Config(format!("VERIFICATION_MODALITY must be text or image, got {raw}"))
            })?,
            None => defaults.default_modality,
        };
        let captcha_charset = match env_str("CAPTCHA_CHARSET") {
            Some(raw) => CaptchaCharset::parse(&raw).ok_or_else(|| {
                Error::Config(format!(
                    "CAPTCHA_CHARSET must be digits, letters or mixed, got {raw}"
                ))
            })?,
            None => defaults.captcha_charset,
        };

        let policy = RelayPolicy {
            verification_enabled: env_bool("VERIFICATION_ENABLED")
                .unwrap_or(defaults.verification_enabled),
            verification_ttl: env_u64("VERIFICATION_TIMEOUT")
                .map(Duration::from_secs)
                .unwrap_or(defaults.verification_ttl),
            max_verification_attempts: env_u32("MAX_VERIFICATION_ATTEMPTS")
                .unwrap_or(defaults.max_verification_attempts)
                .max(1),
            default_modality,
            captcha_charset,
            rate_limit_enabled: env_bool("RATE_LIMIT_ENABLED")
                .unwrap_or(defaults.rate_limit_enabled),
            rate_limit_per_minute: env_u32("MAX_MESSAGES_PER_MINUTE")
                .unwrap_or(defaults.rate_limit_per_minute)
                .max(1),
            auto_unblock_enabled: env_bool("AUTO_UNBLOCK_ENABLED")
                .unwrap_or(defaults.auto_unblock_enabled),
            moderation_enabled: env_bool("ENABLE_AI_FILTER").unwrap_or(defaults.moderation_enabled),
            autoreply_enabled: env_bool("AUTOREPLY_ENABLED").unwrap_or(defaults.autoreply_enabled),
        };

        let knowledge_base = match env_path("KNOWLEDGE_BASE_PATH") {
            Some(p) => Some(fs::read_to_string(&p).map_err(|e| {
                Error::Config(format!("failed to read knowledge base {}: {e}", p.display()))
            })?)
            .and_then(non_empty),
            None => None,
        };

        // Providers
        let ai_provider = match env_str("AI_PROVIDER") {
            Some(raw) => AiProviderKind::parse(&raw).ok_or_else(|| {
                Error::Config(format!("AI_PROVIDER must be gemini or openai, got {raw}"))
            })?,
            None => AiProviderKind::Gemini,
        };
        let gemini = env_str("GEMINI_API_KEY")
            .and_then(non_empty)
            .map(|api_key| GeminiConfig {
                api_key,
                model_filter: env_or("GEMINI_MODEL_FILTER", "gemini-2.5-flash"),
                model_verification: env_or("GEMINI_MODEL_VERIFICATION", "gemini-2.5-flash-lite"),
                model_autoreply: env_or("GEMINI_MODEL_AUTOREPLY", "gemini-2.5-flash"),
            });
        let openai = env_str("OPENAI_API_KEY")
            .and_then(non_empty)
            .map(|api_key| OpenAiConfig {
                api_key,
                base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1")
                    .trim_end_matches('/')
                    .to_string(),
                model_filter: env_or("OPENAI_MODEL_FILTER", "gpt-4.1"),
                model_verification: env_or("OPENAI_MODEL_VERIFICATION", "gpt-4.1-mini"),
                model_autoreply: env_or("OPENAI_MODEL_AUTOREPLY", "gpt-4.1"),
            });
        let ai_timeout = Duration::from_secs(env_u64("AI_TIMEOUT_SECS").unwrap_or(20));

        Ok(Self {
            bot_token,
            forum_group_id,
            admin_ids,
            data_path,
            policy,
            knowledge_base,
            ai_provider,
            gemini,
            openai,
            ai_timeout,
        })
    }

    pub fn policy(&self) -> RelayPolicy {
        self.policy.clone()
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_or(key: &str, default: &str) -> String {
    env_str(key)
        .and_then(non_empty)
        .unwrap_or_else(|| default.to_string())
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| parse_bool(&s))
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_i64(key: &str) -> Option<i64> {
    env_str(key).and_then(|s| s.trim().parse::<i64>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key).map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_ids_skip_garbage() {
        let ids = parse_csv_i64(Some(" 1, 2,,x, -100123 ".to_string()));
        assert_eq!(ids, vec![1, 2, -100123]);
    }

    #[test]
    fn bool_parsing_accepts_common_spellings() {
        assert!(parse_bool("TRUE"));
        assert!(parse_bool(" on "));
        assert!(parse_bool("1"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("nope"));
    }

    #[test]
    fn provider_kind_parse() {
        assert_eq!(AiProviderKind::parse("Gemini"), Some(AiProviderKind::Gemini));
        assert_eq!(AiProviderKind::parse("openai"), Some(AiProviderKind::OpenAi));
        assert_eq!(AiProviderKind::parse("local"), None);
    }

    #[test]
    fn default_policy_matches_documented_defaults() {
        let p = RelayPolicy::default();
        assert!(p.verification_enabled);
        assert_eq!(p.verification_ttl, Duration::from_secs(300));
        assert_eq!(p.max_verification_attempts, 3);
        assert_eq!(p.default_modality, Modality::Text);
        assert!(!p.autoreply_enabled);
    }
}
