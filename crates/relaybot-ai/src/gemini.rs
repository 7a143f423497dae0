use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use relaybot_core::{
    ai::{AiProvider, GeneratedQuestion, Verdict},
    config::GeminiConfig,
    errors::Error,
    Result,
};
use serde_json::{json, Value};

use crate::{
    autoreply_prompt, error_from_response, http_client, image_mime, parse_autoreply,
    parse_question, parse_verdict, MODERATION_PROMPT, QUESTION_PROMPT,
};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini `generateContent` backend.
///
/// The key travels in the `x-goog-api-key` header so it never appears in URLs
/// (and therefore never in reqwest error text).
pub struct GeminiProvider {
    cfg: GeminiConfig,
    http: reqwest::Client,
    api_base: String,
}

/// Result of one `generateContent` call.
#[derive(Debug, PartialEq, Eq)]
enum Reply {
    Text(String),
    /// No candidates: the prompt itself was blocked by Gemini's safety layer.
    Blocked,
}

impl GeminiProvider {
    pub fn new(cfg: GeminiConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            cfg,
            http: http_client(timeout)?,
            api_base: API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.to_string();
        self
    }

    async fn generate(&self, model: &str, body: Value, to_err: fn(String) -> Error) -> Result<Reply> {
        let url = format!("{}/{model}:generateContent", self.api_base);
        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| to_err(format!("gemini request error: {}", e.without_url())))?;

        if !resp.status().is_success() {
            return Err(error_from_response("gemini generateContent", resp, to_err).await);
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| to_err(format!("gemini json error: {}", e.without_url())))?;
        reply_from(&v).ok_or_else(|| to_err("gemini returned an empty response".to_string()))
    }
}

fn request_body(prompt: &str, text: Option<&str>, image: Option<&[u8]>) -> Value {
    let mut parts = vec![json!({ "text": prompt })];
    if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
        parts.push(json!({ "text": format!("Message text:\n{text}") }));
    }
    if let Some(bytes) = image {
        parts.push(json!({
            "inline_data": {
                "mime_type": image_mime(bytes),
                "data": STANDARD.encode(bytes),
            }
        }));
    }
    json!({ "contents": [{ "role": "user", "parts": parts }] })
}

fn reply_from(v: &Value) -> Option<Reply> {
    let candidates = match v.get("candidates").and_then(Value::as_array) {
        Some(c) if !c.is_empty() => c,
        _ => return Some(Reply::Blocked),
    };
    let text: String = candidates[0]
        .pointer("/content/parts")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    (!text.trim().is_empty()).then_some(Reply::Text(text))
}

#[async_trait]
impl AiProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn analyze(&self, text: Option<&str>, image: Option<&[u8]>) -> Result<Verdict> {
        let body = request_body(MODERATION_PROMPT, text, image);
        match self
            .generate(&self.cfg.model_filter, body, Error::Classifier)
            .await?
        {
            Reply::Text(raw) => parse_verdict(&raw),
            Reply::Blocked => Ok(Verdict {
                is_spam: true,
                reason: "blocked by the provider's safety filter".to_string(),
            }),
        }
    }

    async fn generate_question(&self) -> Result<GeneratedQuestion> {
        let body = request_body(QUESTION_PROMPT, None, None);
        match self
            .generate(&self.cfg.model_verification, body, Error::Generator)
            .await?
        {
            Reply::Text(raw) => parse_question(&raw),
            Reply::Blocked => Err(Error::Generator("gemini returned no candidates".to_string())),
        }
    }

    async fn generate_autoreply(&self, message: &str, knowledge: &str) -> Result<Option<String>> {
        let body = request_body(&autoreply_prompt(message, knowledge), None, None);
        match self
            .generate(&self.cfg.model_autoreply, body, Error::External)
            .await?
        {
            Reply::Text(raw) => Ok(parse_autoreply(&raw)),
            Reply::Blocked => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn transport_errors_never_carry_the_api_key() {
        let cfg = GeminiConfig {
            api_key: "SECRET-KEY-123".to_string(),
            model_filter: "m".to_string(),
            model_verification: "m".to_string(),
            model_autoreply: "m".to_string(),
        };
        // Nothing listens on the discard port; the request fails before any response.
        let provider = GeminiProvider::new(cfg, Duration::from_millis(500))
            .unwrap()
            .with_api_base("http://127.0.0.1:9/v1beta/models");

        let err = provider.analyze(Some("hello"), None).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("gemini request error"), "{text}");
        assert!(!text.contains("SECRET-KEY-123"), "{text}");
    }

    #[test]
    fn body_carries_text_and_inline_image() {
        let body = request_body("classify", Some("buy now"), Some(&[0xFF, 0xD8, 0xFF]));
        let parts = body.pointer("/contents/0/parts").unwrap().as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["text"], "classify");
        assert!(parts[1]["text"].as_str().unwrap().contains("buy now"));
        assert_eq!(parts[2]["inline_data"]["mime_type"], "image/jpeg");
        assert_eq!(parts[2]["inline_data"]["data"], "/9j/");
    }

    #[test]
    fn blank_text_is_not_sent() {
        let body = request_body("classify", Some("  "), None);
        let parts = body.pointer("/contents/0/parts").unwrap().as_array().unwrap();
        assert_eq!(parts.len(), 1);
    }

    #[test]
    fn reply_joins_text_parts() {
        let v = json!({
            "candidates": [{ "content": { "parts": [{ "text": "{\"is_spam\":" }, { "text": "false}" }] } }]
        });
        assert_eq!(
            reply_from(&v),
            Some(Reply::Text("{\"is_spam\":false}".to_string()))
        );
    }

    #[test]
    fn missing_candidates_means_blocked() {
        assert_eq!(reply_from(&json!({ "promptFeedback": {} })), Some(Reply::Blocked));
        assert_eq!(reply_from(&json!({ "candidates": [] })), Some(Reply::Blocked));
    }

    #[test]
    fn empty_candidate_is_no_reply() {
        let v = json!({ "candidates": [{ "content": { "parts": [] } }] });
        assert_eq!(reply_from(&v), None);
    }
}
