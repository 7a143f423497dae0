use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::{
    ai::{AiProvider, GeneratedQuestion},
    domain::Modality,
    verification::{
        captcha::{self, CaptchaCharset},
        questions, Challenge,
    },
    Result,
};

/// Produces challenges: model-generated questions with a local fallback, and
/// locally rendered CAPTCHAs.
pub struct ChallengeFactory {
    provider: Option<Arc<dyn AiProvider>>,
    charset: CaptchaCharset,
}

impl ChallengeFactory {
    pub fn new(provider: Option<Arc<dyn AiProvider>>, charset: CaptchaCharset) -> Self {
        Self { provider, charset }
    }

    /// Bank questions and captchas only.
    pub fn local(charset: CaptchaCharset) -> Self {
        Self::new(None, charset)
    }

    pub async fn create(&self, modality: Modality) -> Result<Challenge> {
        match modality {
            Modality::Text => Ok(self.question().await),
            Modality::Image => self.captcha(),
        }
    }

    /// A text question. Never fails: generator errors fall back to the bank.
    pub async fn question(&self) -> Challenge {
        let generated = match &self.provider {
            Some(provider) => match provider.generate_question().await {
                Ok(q) if q.is_well_formed() => Some(q),
                Ok(q) => {
                    tracing::warn!(
                        provider = provider.name(),
                        prompt = %q.prompt,
                        "generated question is malformed; using local bank"
                    );
                    None
                }
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %e,
                        "question generator unavailable; using local bank"
                    );
                    None
                }
            },
            None => None,
        };

        let q = generated.unwrap_or_else(questions::random_question);
        shuffle_into_challenge(q, Modality::Text, None)
    }

    pub fn captcha(&self) -> Result<Challenge> {
        let captcha = captcha::generate(self.charset)?;
        let q = GeneratedQuestion {
            prompt: "Select the code shown in the image.".to_string(),
            distractors: captcha::distractors(&captcha.code, self.charset),
            correct_answer: captcha.code,
        };
        Ok(shuffle_into_challenge(q, Modality::Image, Some(captcha.png)))
    }
}

fn shuffle_into_challenge(
    q: GeneratedQuestion,
    modality: Modality,
    image: Option<Vec<u8>>,
) -> Challenge {
    let answer = q.correct_answer.trim().to_string();
    let mut options: Vec<String> = q
        .distractors
        .iter()
        .map(|d| d.trim().to_string())
        .chain(std::iter::once(answer.clone()))
        .collect();
    options.shuffle(&mut rand::thread_rng());
    let correct_option = options.iter().position(|o| *o == answer).unwrap_or(0);

    Challenge {
        modality,
        prompt: q.prompt.trim().to_string(),
        options,
        correct_option,
        image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::{ai::Verdict, errors::Error};

    struct FakeProvider {
        question: Option<GeneratedQuestion>,
    }

    #[async_trait]
    impl AiProvider for FakeProvider {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn analyze(&self, _text: Option<&str>, _image: Option<&[u8]>) -> Result<Verdict> {
            Err(Error::Classifier("unused".into()))
        }

        async fn generate_question(&self) -> Result<GeneratedQuestion> {
            self.question
                .clone()
                .ok_or_else(|| Error::Generator("offline".into()))
        }

        async fn generate_autoreply(&self, _m: &str, _k: &str) -> Result<Option<String>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn uses_generated_question_and_tracks_correct_index() {
        let factory = ChallengeFactory::new(
            Some(Arc::new(FakeProvider {
                question: Some(GeneratedQuestion {
                    prompt: "Capital of France?".into(),
                    correct_answer: "Paris".into(),
                    distractors: vec!["Rome".into(), "Berlin".into(), "Madrid".into()],
                }),
            })),
            CaptchaCharset::Digits,
        );
        for _ in 0..20 {
            let c = factory.question().await;
            assert_eq!(c.prompt, "Capital of France?");
            assert_eq!(c.options.len(), 4);
            assert_eq!(c.options[c.correct_option], "Paris");
            assert!(c.image.is_none());
        }
    }

    #[tokio::test]
    async fn generator_failure_falls_back_to_bank() {
        let factory = ChallengeFactory::new(
            Some(Arc::new(FakeProvider { question: None })),
            CaptchaCharset::Digits,
        );
        let c = factory.question().await;
        assert_eq!(c.options.len(), 4);
        assert!(!c.prompt.is_empty());
    }

    #[tokio::test]
    async fn malformed_generated_question_falls_back_to_bank() {
        let factory = ChallengeFactory::new(
            Some(Arc::new(FakeProvider {
                question: Some(GeneratedQuestion {
                    prompt: "Pick".into(),
                    correct_answer: "A".into(),
                    distractors: vec!["A".into(), "B".into(), "C".into()],
                }),
            })),
            CaptchaCharset::Digits,
        );
        let c = factory.question().await;
        assert_ne!(c.prompt, "Pick");
    }

    #[tokio::test]
    async fn image_challenge_carries_png_and_four_codes() {
        let factory = ChallengeFactory::local(CaptchaCharset::Digits);
        let c = factory.create(Modality::Image).await.unwrap();
        assert_eq!(c.modality, Modality::Image);
        assert_eq!(c.options.len(), 4);
        assert!(c.options.iter().all(|o| o.len() == 4));
        assert!(c.image.as_ref().is_some_and(|png| png.starts_with(b"\x89PNG")));
    }
}
