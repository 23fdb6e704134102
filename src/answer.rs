//! The answer engine: orchestrates direct lookup → retrieval → prompt →
//! validation for one form question at a time.
//!
//! `answer` never fails. Provider errors degrade to a context-based fallback
//! (the best retrieved entry, numeric-extracted for numeric questions) and
//! then to per-category defaults; with options present the result is always
//! element-equal to one option. Every produced answer, fallbacks included,
//! is enqueued to the batch journal, except after a stop signal.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::classify::Classifier;
use crate::config::Config;
use crate::index::EmbeddingIndex;
use crate::journal::{BatchJournal, RecordSink};
use crate::models::{ChatMessage, Classification, IngestReport, JobContext};
use crate::options::match_option;
use crate::profile::Profile;
use crate::progress::IngestProgressReporter;
use crate::prompts::{ANSWER_PROMPT, GENERIC_CONTEXT, OPTION_PROMPT};
use crate::provider::{chat_with_stop, LlmProvider};
use crate::stop::StopToken;
use crate::store::Store;

/// Terminal fallback for free-text questions.
pub const NOT_AVAILABLE: &str = "Information not available";

static NUMBER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-?\d+(?:[.,]\d+)?").expect("number regex"));
static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("think regex"));

/// Keywords marking a question whose answer must be a single number.
const NUMERIC_MARKERS: &[&str] = &[
    "number", "how many", "salary", "euro", "eur", "year", "years", "jahre", "gehalt",
];
const EXPERIENCE_MARKERS: &[&str] = &["experience", "erfahrung"];
const SALARY_MARKERS: &[&str] = &["salary", "gehalt", "compensation"];
const PHONE_MARKERS: &[&str] = &["phone", "telefon", "mobile"];

pub struct AnswerEngine {
    profile: Profile,
    index: EmbeddingIndex,
    classifier: Classifier,
    chat: Arc<dyn LlmProvider>,
    embedder: Option<Arc<dyn LlmProvider>>,
    store: Arc<Store>,
    journal: BatchJournal,
    stop: StopToken,
    chat_model: String,
    temperature: f32,
    top_k: usize,
}

impl AnswerEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        profile: Profile,
        chat: Arc<dyn LlmProvider>,
        embedder: Option<Arc<dyn LlmProvider>>,
        store: Arc<Store>,
        sink: Arc<dyn RecordSink>,
        job: JobContext,
        stop: StopToken,
    ) -> Self {
        let index = EmbeddingIndex::new(
            config.embedding.model.clone().unwrap_or_default(),
            config.embedding.batch_size,
            config.store.spill_threshold_bytes,
        );
        let journal = BatchJournal::new(
            sink,
            job,
            Duration::from_millis(config.journal.debounce_ms),
        );

        Self {
            profile,
            index,
            classifier: Classifier::new(config.chat.model.clone()),
            chat,
            embedder,
            store,
            journal,
            stop,
            chat_model: config.chat.model.clone(),
            temperature: config.chat.temperature,
            top_k: config.retrieval.top_k,
        }
    }

    /// Ingest the profile into the embedding index. Clears the classification
    /// cache: cached tags belong to the previous profile.
    pub async fn ingest(&mut self, progress: &dyn IngestProgressReporter) -> Result<IngestReport> {
        let embedder = self
            .embedder
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Embedding provider is disabled. Set [embedding] provider in config."))?;

        self.classifier.clear_cache();
        self.index
            .ingest(&self.profile, embedder, &self.store, progress, &self.stop)
            .await
    }

    /// Advisory classification of a question. The engine records it but does
    /// not branch on it when answering.
    pub async fn classify(&mut self, question: &str) -> Classification {
        self.classifier
            .classify(question, Arc::clone(&self.chat))
            .await
    }

    /// Top-k retrieval over the ingested profile, for inspection.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<(String, f32)>> {
        let Some(embedder) = self.embedder.clone() else {
            return Ok(Vec::new());
        };
        self.index.search(query, k, embedder, &self.store).await
    }

    /// Answer one form question. Never fails; the result is non-empty, and
    /// element-equal to one option when options are given.
    pub async fn answer(&mut self, question: &str, options: Option<&[String]>) -> String {
        let answer = self.resolve(question, options).await;
        if !self.stop.is_stopped() {
            self.journal.enqueue(question, &answer, options);
        }
        answer
    }

    /// Flush the journal immediately (page transitions, stop).
    pub async fn flush(&self) {
        self.journal.flush().await;
    }

    pub fn journal(&self) -> &BatchJournal {
        &self.journal
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    async fn resolve(&mut self, question: &str, options: Option<&[String]>) -> String {
        // 1. Direct profile mapping, no LLM involved.
        if let Some(direct) = self.profile.direct_match(question) {
            return match options {
                Some(opts) => match_option(&direct, opts),
                None => direct,
            };
        }

        if self.stop.is_stopped() {
            return self.fallback(question, options, &[]);
        }

        // 2. Retrieval context.
        let retrieved = self.retrieve(question).await;
        let context = if retrieved.is_empty() {
            GENERIC_CONTEXT.to_string()
        } else {
            retrieved
                .iter()
                .map(|(key, text)| format!("{key}: {text}"))
                .collect::<Vec<_>>()
                .join(", ")
        };

        if self.stop.is_stopped() {
            return self.fallback(question, options, &retrieved);
        }

        // 3-4. Prompt and chat at the configured (default zero) temperature.
        let prompt = build_prompt(question, &context, options, &self.profile);
        let messages = [ChatMessage::user(prompt)];
        let raw = chat_with_stop(
            self.chat.as_ref(),
            &self.chat_model,
            &messages,
            self.temperature,
            &self.stop,
        )
        .await;

        match raw {
            Ok(raw) => {
                // 5. Reasoning tags are never part of an answer.
                let mut text = strip_think_tags(&raw).trim().to_string();

                // 6. Numeric coercion.
                if is_numeric_question(question) {
                    if let Some(n) = extract_first_number(&text) {
                        text = format_number(clamp_experience(question, n));
                    }
                }

                // 7. Option closure.
                match options {
                    Some(opts) => match_option(&text, opts),
                    None if text.is_empty() => NOT_AVAILABLE.to_string(),
                    None => text,
                }
            }
            Err(e) => {
                warn!("Provider call failed, answering from fallback: {e}");
                self.fallback(question, options, &retrieved)
            }
        }
    }

    async fn retrieve(&self, question: &str) -> Vec<(String, String)> {
        let Some(embedder) = self.embedder.clone() else {
            return Vec::new();
        };
        match self
            .index
            .search_texts(question, self.top_k, embedder, &self.store)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                debug!("Retrieval failed, continuing without context: {e}");
                Vec::new()
            }
        }
    }

    /// Context-based fallback ladder for provider failure and stop.
    fn fallback(
        &self,
        question: &str,
        options: Option<&[String]>,
        retrieved: &[(String, String)],
    ) -> String {
        let q = question.to_lowercase();

        let text = if let Some((_, best)) = retrieved.first() {
            if is_numeric_question(question) {
                extract_first_number(best)
                    .map(|n| format_number(clamp_experience(question, n)))
                    .unwrap_or_else(|| best.clone())
            } else {
                best.clone()
            }
        } else if SALARY_MARKERS.iter().any(|m| q.contains(m)) {
            self.profile
                .salary()
                .unwrap_or_else(|| "Negotiable".to_string())
        } else if PHONE_MARKERS.iter().any(|m| q.contains(m)) {
            self.profile
                .phone()
                .unwrap_or_else(|| "Not provided".to_string())
        } else {
            NOT_AVAILABLE.to_string()
        };

        match options {
            Some(opts) => match_option(&text, opts),
            None => text,
        }
    }
}

fn build_prompt(
    question: &str,
    context: &str,
    options: Option<&[String]>,
    profile: &Profile,
) -> String {
    match options {
        Some(opts) => {
            let listed = opts
                .iter()
                .map(|o| format!("- {o}"))
                .collect::<Vec<_>>()
                .join("\n");
            OPTION_PROMPT
                .replace("{question}", question)
                .replace("{context}", context)
                .replace("{options}", &listed)
        }
        None => ANSWER_PROMPT
            .replace("{question}", question)
            .replace("{context}", context)
            .replace(
                "{phone}",
                &profile.phone().unwrap_or_else(|| "not provided".to_string()),
            )
            .replace(
                "{salary}",
                &profile
                    .salary()
                    .unwrap_or_else(|| "not specified".to_string()),
            ),
    }
}

fn clamp_experience(question: &str, n: f64) -> f64 {
    if is_experience_question(question) && n < 1.0 {
        1.0
    } else {
        n
    }
}

/// Whether the question expects a single number as its answer.
pub fn is_numeric_question(question: &str) -> bool {
    let q = question.to_lowercase();
    NUMERIC_MARKERS.iter().any(|m| q.contains(m))
}

/// Whether the question asks for years of experience (clamped to ≥ 1).
pub fn is_experience_question(question: &str) -> bool {
    let q = question.to_lowercase();
    EXPERIENCE_MARKERS.iter().any(|m| q.contains(m))
}

/// Remove `<think>…</think>` reasoning spans some providers emit.
pub fn strip_think_tags(text: &str) -> String {
    THINK_RE.replace_all(text, "").to_string()
}

/// Extract the first decimal number in the text. A comma followed by exactly
/// three digits is a thousands separator; otherwise it is a decimal comma.
pub fn extract_first_number(text: &str) -> Option<f64> {
    let m = NUMBER_RE.find(text)?;
    let raw = m.as_str();

    let normalised = match raw.split_once(',') {
        Some((whole, frac)) if frac.len() == 3 => format!("{whole}{frac}"),
        Some((whole, frac)) => format!("{whole}.{frac}"),
        None => raw.to_string(),
    };

    normalised.parse().ok()
}

/// Render a number without a trailing `.0` for integral values.
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}
