use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use relaybot_core::{
    ai::{AiProvider, GeneratedQuestion, Verdict},
    config::OpenAiConfig,
    errors::Error,
    Result,
};
use serde_json::{json, Value};

use crate::{
    autoreply_prompt, error_from_response, http_client, image_mime, parse_autoreply,
    parse_question, parse_verdict, MODERATION_PROMPT, QUESTION_PROMPT,
};

/// OpenAI-compatible `chat/completions` backend (any base URL).
pub struct OpenAiProvider {
    cfg: OpenAiConfig,
    http: reqwest::Client,
}

impl OpenAiProvider {
    pub fn new(cfg: OpenAiConfig, timeout: Duration) -> Result<Self> {
        Ok(Self {
            cfg,
            http: http_client(timeout)?,
        })
    }

    async fn complete(&self, body: Value, to_err: fn(String) -> Error) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| to_err(format!("openai request error: {}", e.without_url())))?;

        if !resp.status().is_success() {
            return Err(error_from_response("openai chat completion", resp, to_err).await);
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| to_err(format!("openai json error: {}", e.without_url())))?;
        completion_text(&v).ok_or_else(|| to_err("openai returned an empty completion".to_string()))
    }
}

fn moderation_body(model: &str, text: Option<&str>, image: Option<&[u8]>) -> Value {
    let mut content = Vec::new();
    if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
        content.push(json!({ "type": "text", "text": text }));
    }
    if let Some(bytes) = image {
        let url = format!("data:{};base64,{}", image_mime(bytes), STANDARD.encode(bytes));
        content.push(json!({ "type": "image_url", "image_url": { "url": url } }));
    }
    json!({
        "model": model,
        "messages": [
            { "role": "system", "content": MODERATION_PROMPT },
            { "role": "user", "content": content },
        ],
        "response_format": { "type": "json_object" },
    })
}

fn prompt_body(model: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
    })
}

fn completion_text(v: &Value) -> Option<String> {
    v.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
        .filter(|s| !s.trim().is_empty())
}

#[async_trait]
impl AiProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn analyze(&self, text: Option<&str>, image: Option<&[u8]>) -> Result<Verdict> {
        let body = moderation_body(&self.cfg.model_filter, text, image);
        let raw = self.complete(body, Error::Classifier).await?;
        parse_verdict(&raw)
    }

    async fn generate_question(&self) -> Result<GeneratedQuestion> {
        let body = prompt_body(&self.cfg.model_verification, QUESTION_PROMPT);
        let raw = self.complete(body, Error::Generator).await?;
        parse_question(&raw)
    }

    async fn generate_autoreply(&self, message: &str, knowledge: &str) -> Result<Option<String>> {
        let body = prompt_body(&self.cfg.model_autoreply, &autoreply_prompt(message, knowledge));
        let raw = self.complete(body, Error::External).await?;
        Ok(parse_autoreply(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moderation_body_uses_json_mode_and_data_uri() {
        let body = moderation_body("gpt-4.1", Some("hello"), Some(&[0x89, b'P', b'N', b'G']));
        assert_eq!(body["model"], "gpt-4.1");
        assert_eq!(body["response_format"]["type"], "json_object");
        let content = body.pointer("/messages/1/content").unwrap().as_array().unwrap();
        assert_eq!(content[0]["text"], "hello");
        let url = content[1]["image_url"]["url"].as_str().unwrap();
        assert!(url.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn image_only_message_has_single_part() {
        let body = moderation_body("m", None, Some(&[0xFF, 0xD8]));
        let content = body.pointer("/messages/1/content").unwrap().as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "image_url");
    }

    #[test]
    fn completion_text_is_extracted() {
        let v = json!({ "choices": [{ "message": { "content": "{\"is_spam\":false}" } }] });
        assert_eq!(completion_text(&v).as_deref(), Some("{\"is_spam\":false}"));
        assert_eq!(completion_text(&json!({ "choices": [] })), None);
        let blank = json!({ "choices": [{ "message": { "content": " " } }] });
        assert_eq!(completion_text(&blank), None);
    }
}
