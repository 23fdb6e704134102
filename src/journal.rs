//! Debounced write-behind journal for answered questions.
//!
//! Answers are accepted synchronously and persisted asynchronously: each
//! [`BatchJournal::enqueue`] re-arms a debounce timer, and when the timer
//! fires (or [`BatchJournal::flush`] is called, e.g. before navigating away)
//! the queue drains FIFO. Each entry becomes a three-message conversation
//! (system, user, assistant) forwarded to the [`RecordSink`] collaborator.
//!
//! A single in-flight flag guards re-entrancy; a flush that races another is
//! a no-op. Failed forwards are logged and dropped so one bad record cannot
//! block the rest of the queue.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::models::{ChatMessage, ConversationRecord, JobContext};
use crate::prompts::RECORD_SYSTEM;

/// Maximum length of a question identifier.
const QUESTION_ID_CHARS: usize = 50;

/// Persistence collaborator for conversation records. No delivery guarantee
/// is required of implementations.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn record(&self, record: &ConversationRecord) -> Result<()>;
}

#[derive(Debug, Clone)]
struct PendingAnswer {
    question: String,
    answer: String,
    options: Option<Vec<String>>,
    timestamp: DateTime<Utc>,
}

struct Inner {
    sink: Arc<dyn RecordSink>,
    job: JobContext,
    debounce: Duration,
    state: Mutex<State>,
    in_flight: AtomicBool,
}

#[derive(Default)]
struct State {
    queue: VecDeque<PendingAnswer>,
    timer: Option<JoinHandle<()>>,
}

/// Write-behind batcher for one `(company, job)` answering session.
#[derive(Clone)]
pub struct BatchJournal {
    inner: Arc<Inner>,
}

impl BatchJournal {
    pub fn new(sink: Arc<dyn RecordSink>, job: JobContext, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                job,
                debounce,
                state: Mutex::new(State::default()),
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    /// Accept an answered question and (re)arm the debounce timer.
    pub fn enqueue(&self, question: &str, answer: &str, options: Option<&[String]>) {
        let entry = PendingAnswer {
            question: question.to_string(),
            answer: answer.to_string(),
            options: options.map(|o| o.to_vec()),
            timestamp: Utc::now(),
        };

        let mut state = self.inner.state.lock().expect("journal lock poisoned");
        state.queue.push_back(entry);

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let inner = Arc::clone(&self.inner);
        let debounce = self.inner.debounce;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            drain(inner).await;
        }));
    }

    /// Cancel the timer and process the queue immediately.
    pub async fn flush(&self) {
        {
            let mut state = self.inner.state.lock().expect("journal lock poisoned");
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
        }
        drain(Arc::clone(&self.inner)).await;
    }

    /// Number of entries awaiting a flush.
    pub fn pending(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("journal lock poisoned")
            .queue
            .len()
    }
}

/// Drain the queue FIFO and forward each record. Re-entrant calls are no-ops.
async fn drain(inner: Arc<Inner>) {
    if inner.in_flight.swap(true, Ordering::SeqCst) {
        return;
    }

    loop {
        let entry = {
            let mut state = inner.state.lock().expect("journal lock poisoned");
            state.queue.pop_front()
        };
        let Some(entry) = entry else { break };

        let record = build_record(&inner.job, &entry);
        if let Err(e) = inner.sink.record(&record).await {
            warn!(
                question_id = %record.question_id,
                "Failed to persist conversation record, dropping: {e}"
            );
        }
    }

    inner.in_flight.store(false, Ordering::SeqCst);
}

fn build_record(job: &JobContext, entry: &PendingAnswer) -> ConversationRecord {
    let system = RECORD_SYSTEM
        .replace("{company}", &job.company)
        .replace("{title}", &job.title);

    let user = match &entry.options {
        Some(options) => format!("{}\nOptions: {}", entry.question, options.join(", ")),
        None => entry.question.clone(),
    };

    ConversationRecord {
        company: job.company.clone(),
        job_title: job.title.clone(),
        question_id: question_id(&entry.question),
        messages: vec![
            ChatMessage::system(system),
            ChatMessage::user(user),
            ChatMessage::assistant(entry.answer.clone()),
        ],
        answer: entry.answer.clone(),
        options: entry.options.clone(),
        timestamp: entry.timestamp,
    }
}

/// Cleaned question text truncated to 50 characters: whitespace collapsed,
/// char-boundary safe.
pub fn question_id(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(QUESTION_ID_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct CollectingSink {
        records: StdMutex<Vec<ConversationRecord>>,
        fail_on: Option<String>,
    }

    #[async_trait]
    impl RecordSink for CollectingSink {
        async fn record(&self, record: &ConversationRecord) -> Result<()> {
            if let Some(bad) = &self.fail_on {
                if record.question_id.contains(bad.as_str()) {
                    anyhow::bail!("sink rejected record");
                }
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    /// Let spawned timer tasks run to completion under the paused clock.
    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn journal(sink: Arc<CollectingSink>) -> BatchJournal {
        BatchJournal::new(
            sink,
            JobContext {
                company: "Acme".to_string(),
                title: "Engineer".to_string(),
                ..Default::default()
            },
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_question_id_cleans_and_truncates() {
        assert_eq!(question_id("  What   is\nyour  email? "), "What is your email?");
        let long = "x".repeat(120);
        assert_eq!(question_id(&long).chars().count(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_enqueues_fifo() {
        let sink = Arc::new(CollectingSink::default());
        let j = journal(Arc::clone(&sink));

        // Let each spawned debounce timer register its deadline against the
        // current (paused) clock before advancing; `tokio::time::advance` does
        // not poll a freshly-spawned task, so without this the last timer's
        // deadline would be computed from the already-advanced clock.
        j.enqueue("first question", "a1", None);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        j.enqueue("second question", "a2", None);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(500)).await;
        j.enqueue("third question", "a3", None);
        tokio::task::yield_now().await;

        // Nothing fires before the debounce window elapses.
        tokio::time::advance(Duration::from_millis(1999)).await;
        assert!(sink.records.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(2)).await;
        settle().await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].answer, "a1");
        assert_eq!(records[1].answer, "a2");
        assert_eq!(records[2].answer, "a3");
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_cancels_timer_and_drains() {
        let sink = Arc::new(CollectingSink::default());
        let j = journal(Arc::clone(&sink));

        j.enqueue("q", "a", None);
        j.flush().await;
        assert_eq!(sink.records.lock().unwrap().len(), 1);
        assert_eq!(j.pending(), 0);

        // The aborted timer must not produce a second forward.
        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_forward_dropped_without_blocking() {
        let sink = Arc::new(CollectingSink {
            fail_on: Some("poison".to_string()),
            ..Default::default()
        });
        let j = journal(Arc::clone(&sink));

        j.enqueue("good one", "a1", None);
        j.enqueue("poison pill", "a2", None);
        j.enqueue("another good", "a3", None);
        j.flush().await;

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].answer, "a1");
        assert_eq!(records[1].answer, "a3");
        assert_eq!(j.pending(), 0);
    }

    #[tokio::test]
    async fn test_record_shape() {
        let sink = Arc::new(CollectingSink::default());
        let j = journal(Arc::clone(&sink));

        let options = vec!["Ja".to_string(), "Nein".to_string()];
        j.enqueue("Visum erforderlich?", "Ja", Some(&options));
        j.flush().await;

        let records = sink.records.lock().unwrap();
        let r = &records[0];
        assert_eq!(r.company, "Acme");
        assert_eq!(r.job_title, "Engineer");
        assert_eq!(r.messages.len(), 3);
        assert_eq!(r.messages[0].role, "system");
        assert!(r.messages[0].content.contains("Acme"));
        assert_eq!(r.messages[1].role, "user");
        assert!(r.messages[1].content.contains("Options: Ja, Nein"));
        assert_eq!(r.messages[2].role, "assistant");
        assert_eq!(r.messages[2].content, "Ja");
        assert_eq!(r.options.as_deref().unwrap().len(), 2);
    }
}
