//! Question classifier.
//!
//! Tags a form question with type, keywords, language, and expected answer
//! format by asking the provider gateway for a JSON classification. The
//! classifier is advisory: the answer engine records its output but does not
//! branch on it. Results are cached per session, keyed on the normalised
//! question text, and the cache is cleared with the profile.
//!
//! A provider failure or a response that does not validate against the
//! closed enums falls back to keyword heuristics instead of failing.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::answer::is_numeric_question;
use crate::models::{ChatMessage, Classification, ExpectedFormat, QuestionType};
use crate::prompts::{CLASSIFY_PROMPT, CLASSIFY_SYSTEM};
use crate::provider::{parse_json_lenient, LlmProvider, ProviderError};

/// Language names (English and German forms) that mark a
/// language-proficiency question.
const LANGUAGE_NAMES: &[&str] = &[
    "english", "german", "french", "spanish", "italian", "dutch", "polish", "englisch", "deutsch",
    "französisch", "spanisch", "italienisch",
];

/// Words that mark a years-of-experience question.
const EXPERIENCE_MARKERS: &[&str] = &["years", "experience", "jahre", "erfahrung"];

/// Common German function words for the fallback language guess.
const GERMAN_MARKERS: &[&str] = &["sie ", "haben", "wie viele", "ihre", "sind sie", "welche"];

#[derive(Debug, Error)]
enum ClassifyError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Classification response failed validation: {0}")]
    Validation(String),
}

pub struct Classifier {
    model: String,
    cache: HashMap<String, Classification>,
}

impl Classifier {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            cache: HashMap::new(),
        }
    }

    /// Classify a question, consulting the cache first. Never fails: provider
    /// or validation errors yield the heuristic fallback, which is cached too
    /// so repeat questions stay cheap.
    pub async fn classify(
        &mut self,
        question: &str,
        provider: Arc<dyn LlmProvider>,
    ) -> Classification {
        let key = normalize_question(question);
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let classification = match self.request(question, provider).await {
            Ok(c) => c,
            Err(e) => {
                debug!("Classification fell back to heuristics: {e}");
                fallback_classification(question)
            }
        };

        self.cache.insert(key, classification.clone());
        classification
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    async fn request(
        &self,
        question: &str,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<Classification, ClassifyError> {
        let prompt = CLASSIFY_PROMPT.replace("{question}", question);
        let messages = [
            ChatMessage::system(CLASSIFY_SYSTEM),
            ChatMessage::user(prompt),
        ];
        let raw = provider.chat(&self.model, &messages, 0.0).await?;
        parse_classification(&raw)
    }
}

/// Parse the first JSON object in the response and validate it against the
/// closed enums. Unknown `question_type` strings collapse to `general`;
/// a missing `question_type` fails validation.
fn parse_classification(raw: &str) -> Result<Classification, ClassifyError> {
    let value = parse_json_lenient(raw)?;

    let type_str = value
        .get("question_type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ClassifyError::Validation("missing question_type".to_string()))?;

    let keywords = value
        .get("keywords")
        .and_then(|k| k.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|k| k.as_str().map(|s| s.to_lowercase()))
                .collect()
        })
        .unwrap_or_default();

    let language = value
        .get("language")
        .and_then(|l| l.as_str())
        .unwrap_or("en")
        .to_lowercase();

    let expected_format = value
        .get("expected_format")
        .and_then(|f| f.as_str())
        .map(ExpectedFormat::from_wire)
        .unwrap_or(ExpectedFormat::Text);

    let confidence = value
        .get("confidence")
        .and_then(|c| c.as_f64())
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);

    Ok(Classification {
        question_type: QuestionType::from_wire(type_str),
        keywords,
        language,
        expected_format,
        confidence,
    })
}

/// Keyword-heuristic classification used when the provider is unavailable or
/// returns unusable JSON.
pub fn fallback_classification(question: &str) -> Classification {
    let q = question.to_lowercase();

    let question_type = if LANGUAGE_NAMES.iter().any(|n| q.contains(n)) {
        QuestionType::LanguageProficiency
    } else if EXPERIENCE_MARKERS.iter().any(|m| q.contains(m)) {
        QuestionType::YearsExperience
    } else {
        QuestionType::General
    };

    let expected_format = if is_numeric_question(&q) {
        ExpectedFormat::Number
    } else {
        ExpectedFormat::Text
    };

    let language = if q.chars().any(|c| "äöüß".contains(c))
        || GERMAN_MARKERS.iter().any(|m| q.contains(m))
    {
        "de".to_string()
    } else {
        "en".to_string()
    };

    let keywords = q
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 4)
        .take(5)
        .map(String::from)
        .collect();

    Classification {
        question_type,
        keywords,
        language,
        expected_format,
        confidence: 0.3,
    }
}

fn normalize_question(question: &str) -> String {
    question.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a canned response and counts calls.
    struct CannedProvider {
        response: String,
        calls: AtomicUsize,
    }

    impl CannedProvider {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }
        async fn chat(
            &self,
            _model: &str,
            _messages: &[ChatMessage],
            _temperature: f32,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.response == "<fail>" {
                return Err(ProviderError::Network("canned failure".to_string()));
            }
            Ok(self.response.clone())
        }
        async fn generate(&self, _m: &str, _p: &str) -> Result<String, ProviderError> {
            unreachable!()
        }
        async fn embed(&self, _m: &str, _t: &str) -> Result<Vec<f32>, ProviderError> {
            unreachable!()
        }
        async fn is_available(&self) -> bool {
            true
        }
    }

    const GOOD_JSON: &str = r#"Here you go: {"question_type": "salary", "keywords": ["salary", "expectations"], "language": "en", "expected_format": "number", "confidence": 0.9} hope that helps"#;

    #[tokio::test]
    async fn test_classification_parses_first_json_object() {
        let provider = Arc::new(CannedProvider::new(GOOD_JSON));
        let mut classifier = Classifier::new("m");

        let c = classifier
            .classify("What are your salary expectations?", provider)
            .await;
        assert_eq!(c.question_type, QuestionType::Salary);
        assert_eq!(c.expected_format, ExpectedFormat::Number);
        assert_eq!(c.keywords, vec!["salary", "expectations"]);
        assert!((c.confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cache_idempotent_under_whitespace_and_case() {
        let provider = Arc::new(CannedProvider::new(GOOD_JSON));
        let mut classifier = Classifier::new("m");

        let a = classifier
            .classify("What are your salary expectations?", Arc::clone(&provider) as _)
            .await;
        let b = classifier
            .classify("  What are your SALARY expectations?  ", Arc::clone(&provider) as _)
            .await;

        assert_eq!(a.question_type, b.question_type);
        assert_eq!(a.keywords, b.keywords);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(classifier.cache_len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_type_collapses_to_general() {
        let provider = Arc::new(CannedProvider::new(
            r#"{"question_type": "horoscope", "keywords": [], "language": "en", "expected_format": "text", "confidence": 0.8}"#,
        ));
        let mut classifier = Classifier::new("m");
        let c = classifier.classify("What is your sign?", provider).await;
        assert_eq!(c.question_type, QuestionType::General);
    }

    #[tokio::test]
    async fn test_provider_failure_falls_back_to_heuristics() {
        let provider = Arc::new(CannedProvider::new("<fail>"));
        let mut classifier = Classifier::new("m");

        let c = classifier
            .classify("How many years of experience do you have?", provider)
            .await;
        assert_eq!(c.question_type, QuestionType::YearsExperience);
        assert_eq!(c.expected_format, ExpectedFormat::Number);
        assert!(c.confidence < 0.5);
    }

    #[tokio::test]
    async fn test_invalid_json_falls_back() {
        let provider = Arc::new(CannedProvider::new("I cannot classify that, sorry."));
        let mut classifier = Classifier::new("m");

        let c = classifier
            .classify("Wie gut sprechen Sie Deutsch?", provider)
            .await;
        assert_eq!(c.question_type, QuestionType::LanguageProficiency);
        assert_eq!(c.language, "de");
    }

    #[tokio::test]
    async fn test_clear_cache_forces_reclassification() {
        let provider = Arc::new(CannedProvider::new(GOOD_JSON));
        let mut classifier = Classifier::new("m");

        classifier
            .classify("Salary?", Arc::clone(&provider) as _)
            .await;
        classifier.clear_cache();
        classifier
            .classify("Salary?", Arc::clone(&provider) as _)
            .await;
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_question_type_is_validation_error() {
        let err = parse_classification(r#"{"keywords": []}"#).unwrap_err();
        assert!(matches!(err, ClassifyError::Validation(_)));
    }
}
