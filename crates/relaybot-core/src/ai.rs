use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Classifier output for one message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub is_spam: bool,
    #[serde(default)]
    pub reason: String,
}

/// A multiple-choice question as produced by a model (before shuffling).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratedQuestion {
    pub prompt: String,
    pub correct_answer: String,
    pub distractors: Vec<String>,
}

impl GeneratedQuestion {
    /// Exactly three distinct, non-empty distractors that differ from the answer.
    pub fn is_well_formed(&self) -> bool {
        let answer = self.correct_answer.trim();
        if self.prompt.trim().is_empty() || answer.is_empty() || self.distractors.len() != 3 {
            return false;
        }
        let mut seen = vec![answer];
        for d in &self.distractors {
            let d = d.trim();
            if d.is_empty() || seen.contains(&d) {
                return false;
            }
            seen.push(d);
        }
        true
    }
}

/// AI backend port: moderation classifier, question generator, auto replier.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Score text and/or a still image.
    async fn analyze(&self, text: Option<&str>, image: Option<&[u8]>) -> Result<Verdict>;

    async fn generate_question(&self) -> Result<GeneratedQuestion>;

    /// `Ok(None)` when the knowledge base does not cover the message.
    async fn generate_autoreply(&self, message: &str, knowledge: &str) -> Result<Option<String>>;
}
