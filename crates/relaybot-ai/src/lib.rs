//! AI adapters: Gemini and OpenAI-compatible chat backends.
//!
//! Both speak plain REST over reqwest and expose the same `AiProvider` port:
//! spam classification, verification question generation, knowledge-base replies.

mod gemini;
mod openai;

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use regex::Regex;
use relaybot_core::{
    ai::{AiProvider, GeneratedQuestion, Verdict},
    config::{AiProviderKind, Config},
    errors::Error,
    Result,
};
use serde::Deserialize;

pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

/// Marker the auto-reply prompt asks for when the knowledge base has no answer.
const NO_ANSWER: &str = "NO_ANSWER";

const MODERATION_PROMPT: &str = "You are a content moderator for a support inbox. \
Decide whether the message (text and/or image) is spam, advertising, phishing, malware, \
scam, harassment, hate speech or otherwise violates a basic safety policy.\n\
Reply with strict JSON only, no commentary and no code fences:\n\
{\"is_spam\": boolean, \"reason\": \"one sentence naming the violation, or 'no violation found'\"}";

const QUESTION_PROMPT: &str = "Generate one random general-knowledge multiple choice question \
that almost any adult can answer instantly, to tell humans from bots. Vary the style: sometimes \
ask directly, sometimes ask which option does not belong. The question must have exactly one \
correct answer and three plausible wrong answers.\n\
Reply with strict JSON only:\n\
{\"question\": \"...\", \"correct_answer\": \"...\", \"incorrect_answers\": [\"...\", \"...\", \"...\"]}";

fn autoreply_prompt(message: &str, knowledge: &str) -> String {
    format!(
        "You are a support assistant. Answer the user's message strictly from the knowledge base \
below. Do not invent facts. If the knowledge base does not cover the question, reply with exactly \
{NO_ANSWER}.\n\n--- KNOWLEDGE BASE ---\n{knowledge}\n--- END ---\n\nUser message:\n{message}"
    )
}

/// Provider selected at startup.
pub enum AiBackend {
    Gemini(GeminiProvider),
    OpenAi(OpenAiProvider),
}

impl AiBackend {
    /// Build the configured provider, or `None` when its API key is missing.
    pub fn from_config(cfg: &Config) -> Result<Option<Arc<dyn AiProvider>>> {
        let backend = match cfg.ai_provider {
            AiProviderKind::Gemini => match &cfg.gemini {
                Some(g) => AiBackend::Gemini(GeminiProvider::new(g.clone(), cfg.ai_timeout)?),
                None => {
                    tracing::warn!("AI_PROVIDER=gemini but GEMINI_API_KEY is unset; AI features off");
                    return Ok(None);
                }
            },
            AiProviderKind::OpenAi => match &cfg.openai {
                Some(o) => AiBackend::OpenAi(OpenAiProvider::new(o.clone(), cfg.ai_timeout)?),
                None => {
                    tracing::warn!("AI_PROVIDER=openai but OPENAI_API_KEY is unset; AI features off");
                    return Ok(None);
                }
            },
        };
        tracing::info!(provider = backend.name(), "AI provider ready");
        Ok(Some(Arc::new(backend)))
    }
}

#[async_trait::async_trait]
impl AiProvider for AiBackend {
    fn name(&self) -> &'static str {
        match self {
            AiBackend::Gemini(p) => p.name(),
            AiBackend::OpenAi(p) => p.name(),
        }
    }

    async fn analyze(&self, text: Option<&str>, image: Option<&[u8]>) -> Result<Verdict> {
        match self {
            AiBackend::Gemini(p) => p.analyze(text, image).await,
            AiBackend::OpenAi(p) => p.analyze(text, image).await,
        }
    }

    async fn generate_question(&self) -> Result<GeneratedQuestion> {
        match self {
            AiBackend::Gemini(p) => p.generate_question().await,
            AiBackend::OpenAi(p) => p.generate_question().await,
        }
    }

    async fn generate_autoreply(&self, message: &str, knowledge: &str) -> Result<Option<String>> {
        match self {
            AiBackend::Gemini(p) => p.generate_autoreply(message, knowledge).await,
            AiBackend::OpenAi(p) => p.generate_autoreply(message, knowledge).await,
        }
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("http client: {e}")))
}

/// Read a non-2xx response into an error with a short body excerpt.
pub(crate) async fn error_from_response(
    what: &str,
    resp: reqwest::Response,
    to_err: fn(String) -> Error,
) -> Error {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    to_err(format!(
        "{what} failed: {status} {}",
        body.chars().take(200).collect::<String>()
    ))
}

/// Models like to wrap JSON in ```json fences despite instructions.
pub(crate) fn strip_code_fences(raw: &str) -> String {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let re = FENCE.get_or_init(|| Regex::new(r"```(?:json)?\s*|\s*```").expect("valid regex"));
    re.replace_all(raw, "").trim().to_string()
}

pub(crate) fn parse_verdict(raw: &str) -> Result<Verdict> {
    serde_json::from_str(&strip_code_fences(raw))
        .map_err(|e| Error::Classifier(format!("malformed verdict: {e}")))
}

#[derive(Deserialize)]
struct QuestionPayload {
    question: String,
    correct_answer: String,
    incorrect_answers: Vec<String>,
}

pub(crate) fn parse_question(raw: &str) -> Result<GeneratedQuestion> {
    let payload: QuestionPayload = serde_json::from_str(&strip_code_fences(raw))
        .map_err(|e| Error::Generator(format!("malformed question: {e}")))?;
    let question = GeneratedQuestion {
        prompt: payload.question.trim().to_string(),
        correct_answer: payload.correct_answer.trim().to_string(),
        distractors: payload
            .incorrect_answers
            .into_iter()
            .map(|s| s.trim().to_string())
            .collect(),
    };
    if !question.is_well_formed() {
        return Err(Error::Generator("question failed validation".to_string()));
    }
    Ok(question)
}

pub(crate) fn parse_autoreply(raw: &str) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() || text.contains(NO_ANSWER) {
        return None;
    }
    Some(text.to_string())
}

/// Sniff the image type from magic bytes; Telegram photos are JPEG.
pub(crate) fn image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fences_are_stripped() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {} "), "{}");
    }

    #[test]
    fn verdict_parses_with_and_without_reason() {
        let v = parse_verdict("```json\n{\"is_spam\": true, \"reason\": \"phishing link\"}\n```")
            .unwrap();
        assert!(v.is_spam);
        assert_eq!(v.reason, "phishing link");

        let v = parse_verdict("{\"is_spam\": false}").unwrap();
        assert!(!v.is_spam);
        assert!(v.reason.is_empty());

        assert!(matches!(
            parse_verdict("I think this is fine"),
            Err(Error::Classifier(_))
        ));
    }

    #[test]
    fn question_payload_is_validated() {
        let ok = parse_question(
            r#"{"question":"Which is a fruit?","correct_answer":"Apple","incorrect_answers":["Chair","Brick","Spoon"]}"#,
        )
        .unwrap();
        assert_eq!(ok.correct_answer, "Apple");
        assert_eq!(ok.distractors.len(), 3);

        let dup = parse_question(
            r#"{"question":"Q?","correct_answer":"A","incorrect_answers":["A","B","C"]}"#,
        );
        assert!(matches!(dup, Err(Error::Generator(_))));

        let short = parse_question(r#"{"question":"Q?","correct_answer":"A","incorrect_answers":["B"]}"#);
        assert!(short.is_err());
    }

    #[test]
    fn autoreply_sentinel_means_no_answer() {
        assert_eq!(parse_autoreply("NO_ANSWER"), None);
        assert_eq!(parse_autoreply("  "), None);
        assert_eq!(
            parse_autoreply(" We open at 9. "),
            Some("We open at 9.".to_string())
        );
    }

    #[test]
    fn mime_is_sniffed() {
        assert_eq!(image_mime(&[0x89, b'P', b'N', b'G', 0, 0]), "image/png");
        assert_eq!(image_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(image_mime(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
    }

    #[test]
    fn autoreply_prompt_embeds_knowledge_and_message() {
        let p = autoreply_prompt("when?", "Open 9-17");
        assert!(p.contains("Open 9-17"));
        assert!(p.contains("when?"));
        assert!(p.contains(NO_ANSWER));
    }
}
