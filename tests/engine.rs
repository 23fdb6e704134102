//! End-to-end answer engine scenarios with a scripted provider.
//!
//! No network: the provider is a deterministic stub whose chat replies are
//! scripted per test and whose embeddings are derived from topic words, so
//! retrieval behaves like the real pipeline.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use formfill::answer::{AnswerEngine, NOT_AVAILABLE};
use formfill::config::Config;
use formfill::journal::RecordSink;
use formfill::models::{ChatMessage, ConversationRecord, JobContext};
use formfill::profile::Profile;
use formfill::progress::NoProgress;
use formfill::provider::{LlmProvider, ProviderError};
use formfill::stop::StopToken;
use formfill::store::Store;

const PROFILE: &str = r#"
personal_information:
  name: Jane
  surname: Doe
  email: jane@x.io
  phone_prefix: "+49"
  phone: "1761234567"
  country: Germany
  city: Berlin
  salary: 75000
experiences:
  - company: Acme GmbH
    role: Backend Engineer
    employment_period: 2019-2024
    technologies:
      - Python
      - Kubernetes
skills:
  - Python
  - Rust
languages:
  - language: German
    level: C1
"#;

/// Scripted chat replies; embeddings are topic-word vectors.
struct ScriptedProvider {
    chat_reply: Option<String>,
    chat_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            chat_reply: Some(reply.to_string()),
            chat_calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            chat_reply: None,
            chat_calls: AtomicUsize::new(0),
        })
    }

    fn chat_calls(&self) -> usize {
        self.chat_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(
        &self,
        _model: &str,
        _messages: &[ChatMessage],
        _temperature: f32,
    ) -> Result<String, ProviderError> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        match &self.chat_reply {
            Some(reply) => Ok(reply.clone()),
            None => Err(ProviderError::Network("scripted outage".to_string())),
        }
    }

    async fn generate(&self, _model: &str, prompt: &str) -> Result<String, ProviderError> {
        self.chat(_model, &[ChatMessage::user(prompt)], 0.0).await
    }

    async fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>, ProviderError> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; 6];
        for (dim, words) in [
            (0usize, vec!["python", "kubernetes"]),
            (1, vec!["salary", "compensation", "gehalt"]),
            (2, vec!["email", "e-mail"]),
            (3, vec!["experience", "erfahrung", "jahre", "employment"]),
            (4, vec!["german", "deutsch", "language"]),
        ] {
            if words.iter().any(|w| lower.contains(w)) {
                v[dim] = 1.0;
            }
        }
        v[5] = 0.05;
        Ok(v)
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<ConversationRecord>>,
}

#[async_trait]
impl RecordSink for CollectingSink {
    async fn record(&self, record: &ConversationRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

struct TestHarness {
    engine: AnswerEngine,
    provider: Arc<ScriptedProvider>,
    sink: Arc<CollectingSink>,
}

async fn harness(provider: Arc<ScriptedProvider>) -> TestHarness {
    let mut cfg = Config::minimal();
    cfg.embedding.provider = "local".to_string();
    cfg.embedding.model = Some("stub-embed".to_string());

    let store = Arc::new(Store::connect_in_memory().await.unwrap());
    store.migrate().await.unwrap();

    let sink = Arc::new(CollectingSink::default());
    let job = JobContext {
        company: "Acme GmbH".to_string(),
        title: "Backend Engineer".to_string(),
        ..Default::default()
    };

    let mut engine = AnswerEngine::new(
        &cfg,
        Profile::parse(PROFILE).unwrap(),
        Arc::clone(&provider) as Arc<dyn LlmProvider>,
        Some(Arc::clone(&provider) as Arc<dyn LlmProvider>),
        store,
        Arc::clone(&sink) as Arc<dyn RecordSink>,
        job,
        StopToken::new(),
    );
    engine.ingest(&NoProgress).await.unwrap();

    TestHarness {
        engine,
        provider,
        sink,
    }
}

fn opts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// Scenario 1: direct email match, no LLM involved.
#[tokio::test]
async fn direct_email_match() {
    let mut h = harness(ScriptedProvider::failing()).await;
    let answer = h.engine.answer("What is your email address?", None).await;
    assert_eq!(answer, "jane@x.io");
    assert_eq!(h.provider.chat_calls(), 0);
}

// Scenario 2: phone is prefix + number, concatenated.
#[tokio::test]
async fn direct_phone_concatenation() {
    let mut h = harness(ScriptedProvider::failing()).await;
    let answer = h.engine.answer("Mobile Telefon?", None).await;
    assert_eq!(answer, "+491761234567");
}

// Scenario 3: country-code selector resolved through the bilingual hint table.
#[tokio::test]
async fn country_code_selector() {
    let mut h = harness(ScriptedProvider::failing()).await;
    let options = opts(&["Option auswählen", "Deutschland (+49)", "Frankreich (+33)"]);
    let answer = h.engine.answer("Landesvorwahl", Some(&options)).await;
    assert_eq!(answer, "Deutschland (+49)");
    assert_eq!(h.provider.chat_calls(), 0);
}

// Scenario 4: numeric coercion with reasoning-tag stripping and clamping.
#[tokio::test]
async fn numeric_experience_answer() {
    let provider = ScriptedProvider::replying(
        "<think>Employment 2019-2024, so about five years.</think>I would say 5 years of Python.",
    );
    let mut h = harness(provider).await;
    let answer = h
        .engine
        .answer("Wie viele Jahre Erfahrung haben Sie mit Python?", None)
        .await;
    assert_eq!(answer, "5");
}

#[tokio::test]
async fn experience_clamped_to_at_least_one() {
    let provider = ScriptedProvider::replying("0.5");
    let mut h = harness(provider).await;
    let answer = h
        .engine
        .answer("How many years of experience with Rust?", None)
        .await;
    assert_eq!(answer, "1");
}

// Scenario 5: yes/no authorization question answered through the LLM.
#[tokio::test]
async fn authorization_question_selects_option() {
    let provider = ScriptedProvider::replying("Ja");
    let mut h = harness(provider).await;
    let options = opts(&["Ja", "Nein"]);
    let answer = h
        .engine
        .answer(
            "Sind Sie rechtlich befugt, in Deutschland zu arbeiten?",
            Some(&options),
        )
        .await;
    assert_eq!(answer, "Ja");
}

// Scenario 6: salary passes through as a single numeric literal.
#[tokio::test]
async fn salary_expectation_numeric() {
    let provider = ScriptedProvider::replying("75,000 EUR per year");
    let mut h = harness(provider).await;
    let answer = h
        .engine
        .answer("What are your salary expectations (EUR)?", None)
        .await;
    assert_eq!(answer, "75000");
}

// Property 2: with options the answer is always element-equal to one option.
#[tokio::test]
async fn option_closure_holds_across_replies() {
    for reply in ["Yes", "something entirely off-script", ""] {
        let provider = ScriptedProvider::replying(reply);
        let mut h = harness(provider).await;
        let options = opts(&["Please select", "Yes", "No"]);
        let answer = h
            .engine
            .answer("Do you have a driver's licence?", Some(&options))
            .await;
        assert!(options.contains(&answer), "{answer:?} not in options");
    }
}

// Property 3: provider failure with options avoids the placeholder first option.
#[tokio::test]
async fn provider_failure_defaults_to_second_option() {
    let mut h = harness(ScriptedProvider::failing()).await;
    let options = opts(&["Bitte wählen", "Ja", "Nein"]);
    let answer = h
        .engine
        .answer("Besitzen Sie einen Führerschein?", Some(&options))
        .await;
    assert_eq!(answer, "Ja");
}

// Provider failure without options: first retrieved entry backs the answer.
#[tokio::test]
async fn provider_failure_falls_back_to_context() {
    let mut h = harness(ScriptedProvider::failing()).await;
    let answer = h
        .engine
        .answer("Tell me about your Python background", None)
        .await;
    assert!(
        answer.to_lowercase().contains("python"),
        "expected a context-backed answer, got {answer:?}"
    );
}

// Provider failure on a numeric question: number extracted from context.
#[tokio::test]
async fn provider_failure_numeric_salary_fallback() {
    let mut h = harness(ScriptedProvider::failing()).await;
    let answer = h
        .engine
        .answer("What is your salary expectation in EUR?", None)
        .await;
    assert_eq!(answer, "75000");
}

// Empty reply without options degrades to the terminal fallback.
#[tokio::test]
async fn empty_reply_is_information_not_available() {
    let provider = ScriptedProvider::replying("");
    let mut h = harness(provider).await;
    let answer = h.engine.answer("Favourite colour?", None).await;
    assert_eq!(answer, NOT_AVAILABLE);
}

// Every answer, fallbacks included, is journaled FIFO and labelled with the job.
#[tokio::test]
async fn answers_are_journaled_fifo() {
    let provider = ScriptedProvider::replying("Ja");
    let mut h = harness(provider).await;

    h.engine.answer("What is your email address?", None).await;
    let options = opts(&["Ja", "Nein"]);
    h.engine.answer("Arbeitserlaubnis vorhanden?", Some(&options)).await;
    h.engine.flush().await;

    let records = h.sink.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].answer, "jane@x.io");
    assert_eq!(records[0].company, "Acme GmbH");
    assert_eq!(records[0].job_title, "Backend Engineer");
    assert_eq!(records[0].messages.len(), 3);
    assert_eq!(records[1].answer, "Ja");
    assert_eq!(records[1].options.as_deref().unwrap(), options.as_slice());
    assert!(records[0].timestamp <= records[1].timestamp);
}

// Property 8: once stop is signalled, answers still resolve but are not journaled.
#[tokio::test]
async fn stop_prevents_journaling_and_uses_fallback() {
    let provider = ScriptedProvider::replying("should never be used");
    let mut h = harness(provider).await;

    h.engine.stop_token().stop();
    let answer = h.engine.answer("What is your desired salary?", None).await;
    assert_eq!(answer, "75000");
    assert_eq!(h.provider.chat_calls(), 0);

    h.engine.flush().await;
    assert!(h.sink.records.lock().unwrap().is_empty());
}

// Stopped engine with options still honours option closure.
#[tokio::test]
async fn stop_with_options_defaults_to_second() {
    let mut h = harness(ScriptedProvider::replying("ignored")).await;
    h.engine.stop_token().stop();

    let options = opts(&["Select one", "Immediately", "3 months"]);
    let answer = h
        .engine
        .answer("When could you start?", Some(&options))
        .await;
    assert_eq!(answer, "Immediately");
}

// Direct matches are journaled too.
#[tokio::test]
async fn direct_match_emits_record() {
    let mut h = harness(ScriptedProvider::failing()).await;
    h.engine.answer("Vorname?", None).await;
    h.engine.flush().await;

    let records = h.sink.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].answer, "Jane");
    assert_eq!(records[0].question_id, "Vorname?");
}
