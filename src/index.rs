//! Embedding index over profile fields.
//!
//! Ingests the rendered profile into a flat entry list, requesting a dense
//! vector for each entry from the provider gateway. Entries whose embedding
//! fails are retained with no vector and excluded from retrieval, so one bad
//! field never sinks the ingest.
//!
//! When the estimated serialised size of buffered entries crosses the spill
//! threshold (≈1 MiB by default), the buffer is written to the store as a
//! chunk and cleared, bounding peak memory for large profiles. The final
//! state is always persisted so later invocations can search without
//! re-ingesting.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

use crate::models::{FieldEntry, IngestReport};
use crate::profile::Profile;
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::provider::LlmProvider;
use crate::render::render_profile;
use crate::stop::StopToken;
use crate::store::Store;

pub struct EmbeddingIndex {
    /// In-memory entries; empty when the index was spilled to the store.
    entries: Vec<FieldEntry>,
    model: String,
    batch_size: usize,
    spill_threshold: usize,
}

impl EmbeddingIndex {
    pub fn new(model: impl Into<String>, batch_size: usize, spill_threshold: usize) -> Self {
        Self {
            entries: Vec::new(),
            model: model.into(),
            batch_size: batch_size.max(1),
            spill_threshold,
        }
    }

    /// Number of in-memory entries (0 when spilled).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ingest the profile: render, embed in concurrent batches, persist.
    ///
    /// The stop token is polled between batches; a stopped ingest keeps what
    /// it has embedded so far. A refused chunk write (store quota) aborts the
    /// ingest with a structured error.
    pub async fn ingest(
        &mut self,
        profile: &Profile,
        provider: Arc<dyn LlmProvider>,
        store: &Store,
        progress: &dyn IngestProgressReporter,
        stop: &StopToken,
    ) -> Result<IngestReport> {
        self.entries.clear();
        store
            .clear_index()
            .await
            .context("Failed to clear previous index")?;

        progress.report(IngestProgressEvent::Rendering);
        let rendered = render_profile(profile);

        let mut report = IngestReport {
            total: rendered.len(),
            ..Default::default()
        };

        let mut buffer: Vec<FieldEntry> = Vec::new();
        let mut buffered_bytes = 0usize;
        let mut next_chunk: i64 = 0;
        let mut processed = 0u64;
        let total = rendered.len() as u64;

        for batch in rendered.chunks(self.batch_size) {
            if stop.is_stopped() {
                break;
            }

            // One concurrent embedding request per entry in the batch.
            let handles: Vec<_> = batch
                .iter()
                .map(|entry| {
                    let provider = Arc::clone(&provider);
                    let model = self.model.clone();
                    let text = entry.text.clone();
                    tokio::spawn(async move { provider.embed(&model, &text).await })
                })
                .collect();

            for (entry, handle) in batch.iter().zip(handles) {
                let mut entry = entry.clone();
                match handle.await {
                    Ok(Ok(vector)) => {
                        entry.vector = Some(vector);
                        report.embedded += 1;
                    }
                    Ok(Err(e)) => {
                        debug!(key = %entry.key, "Embedding failed, entry kept without vector: {e}");
                        report.failed += 1;
                    }
                    Err(e) => {
                        debug!(key = %entry.key, "Embedding task panicked: {e}");
                        report.failed += 1;
                    }
                }

                buffered_bytes += estimate_entry_size(&entry);
                buffer.push(entry);
                processed += 1;
            }

            progress.report(IngestProgressEvent::Embedding {
                n: processed,
                total,
            });

            if buffered_bytes > self.spill_threshold {
                store
                    .put_index_chunk(next_chunk, &buffer)
                    .await
                    .context("Index chunk write refused; ingest aborted")?;
                next_chunk += 1;
                report.chunks_spilled += 1;
                buffer.clear();
                buffered_bytes = 0;
            }
        }

        // Persist the final state. A never-spilled index keeps its entries in
        // memory as the fast path; the stored snapshot serves later sessions.
        if !buffer.is_empty() || next_chunk == 0 {
            store
                .put_index_chunk(next_chunk, &buffer)
                .await
                .context("Index chunk write refused; ingest aborted")?;
        }

        if report.chunks_spilled == 0 {
            self.entries = buffer;
        }

        Ok(report)
    }

    /// Top-k entries by cosine similarity to the query. Entries without a
    /// vector are skipped; ties break by insertion order.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        provider: Arc<dyn LlmProvider>,
        store: &Store,
    ) -> Result<Vec<(String, f32)>> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let query_vec = provider
            .embed(&self.model, query)
            .await
            .context("Failed to embed search query")?;

        let mut scored: Vec<(String, f32)> = Vec::new();

        if !self.entries.is_empty() {
            score_entries(&self.entries, &query_vec, &mut scored);
        } else {
            // Stream chunks from the store so a spilled index never has to
            // fit in memory at once.
            let chunks = store.index_chunk_count().await?;
            for idx in 0..chunks {
                let chunk = store.get_index_chunk(idx).await?;
                score_entries(&chunk, &query_vec, &mut scored);
            }
        }

        // Stable sort preserves insertion order on ties.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Retrieved entries with their rendered text, for prompt context.
    pub async fn search_texts(
        &self,
        query: &str,
        k: usize,
        provider: Arc<dyn LlmProvider>,
        store: &Store,
    ) -> Result<Vec<(String, String)>> {
        let hits = self.search(query, k, provider, store).await?;
        let mut out = Vec::with_capacity(hits.len());
        for (key, _) in hits {
            if let Some(text) = self.entry_text(&key, store).await? {
                out.push((key, text));
            }
        }
        Ok(out)
    }

    async fn entry_text(&self, key: &str, store: &Store) -> Result<Option<String>> {
        if !self.entries.is_empty() {
            return Ok(self
                .entries
                .iter()
                .find(|e| e.key == key)
                .map(|e| e.text.clone()));
        }
        let chunks = store.index_chunk_count().await?;
        for idx in 0..chunks {
            let chunk = store.get_index_chunk(idx).await?;
            if let Some(entry) = chunk.iter().find(|e| e.key == key) {
                return Ok(Some(entry.text.clone()));
            }
        }
        Ok(None)
    }

    /// Drop in-memory entries and stored chunks.
    pub async fn clear(&mut self, store: &Store) -> Result<()> {
        self.entries.clear();
        store.clear_index().await?;
        Ok(())
    }
}

fn score_entries(entries: &[FieldEntry], query_vec: &[f32], out: &mut Vec<(String, f32)>) {
    for entry in entries {
        let Some(vector) = &entry.vector else { continue };
        let score = cosine_similarity(query_vec, vector);
        out.push((entry.key.clone(), score));
    }
}

/// Rough serialised footprint of one entry: key, text, and ~12 bytes per
/// vector element in JSON form.
fn estimate_entry_size(entry: &FieldEntry) -> usize {
    entry.key.len()
        + entry.text.len()
        + entry.vector.as_ref().map(|v| v.len() * 12).unwrap_or(0)
        + 32
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, and
/// zero-norm vectors — never `NaN`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
