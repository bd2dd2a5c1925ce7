//! Retrieval pipeline: question in, grounded answer out.
//!
//! Embeds the query, ranks stored memories by cosine similarity, and asks
//! the language model to answer strictly from the retrieved context. An
//! empty store (or nothing above the threshold) is a successful query with
//! a fixed no-knowledge answer, not an error. Synthesis failures keep the
//! retrieved sources attached so callers can still show what was found.

use std::sync::Arc;
use tracing::{debug, info};

use crate::embedding::EmbeddingGenerator;
use crate::error::PipelineError;
use crate::llm::{LanguageModel, LlmError};
use crate::models::{QueryResponse, SourceRef};
use crate::retry::{retry, RetryPolicy};
use crate::store::{self, RecordStore, ScoredMemory};

/// Answer returned when nothing relevant is stored.
pub const NO_KNOWLEDGE_ANSWER: &str =
    "I don't have any stored knowledge relevant to that question yet.";

const PREVIEW_CHARS: usize = 200;

pub struct RetrievalPipeline {
    embedder: EmbeddingGenerator,
    llm: Arc<dyn LanguageModel>,
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl RetrievalPipeline {
    pub fn new(
        embedder: EmbeddingGenerator,
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn RecordStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            embedder,
            llm,
            store,
            retry,
        }
    }

    /// Answer a natural-language question from stored memories.
    pub async fn query(
        &self,
        query_text: &str,
        top_k: i64,
        threshold: f32,
    ) -> Result<QueryResponse, PipelineError> {
        if query_text.trim().is_empty() {
            return Err(PipelineError::Validation(
                "query text must not be empty".to_string(),
            ));
        }

        let query_vec = self.embedder.generate(query_text).await?;

        let hits = retry(&self.retry, "search", store::is_retryable, || {
            self.store.similarity_search(&query_vec, top_k, threshold)
        })
        .await
        .map_err(|e| PipelineError::Persistence(e.to_string()))?;

        if hits.is_empty() {
            debug!("no memories above threshold");
            return Ok(QueryResponse {
                answer: NO_KNOWLEDGE_ANSWER.to_string(),
                source_memories: Vec::new(),
                query_text: query_text.to_string(),
            });
        }

        let sources: Vec<SourceRef> = hits
            .iter()
            .map(|s| SourceRef {
                memory_id: s.memory.id.clone(),
                score: s.score,
                preview: truncate(&s.memory.enriched.summary, PREVIEW_CHARS),
            })
            .collect();

        let prompt = build_synthesis_prompt(query_text, &hits);
        let answer = retry(&self.retry, "synthesize", LlmError::is_transient, || {
            self.llm.complete_text(&prompt)
        })
        .await
        .map_err(|e| PipelineError::Synthesis {
            message: e.to_string(),
            sources: sources.clone(),
        })?;

        info!(sources = sources.len(), "answered query");
        Ok(QueryResponse {
            answer: answer.trim().to_string(),
            source_memories: sources,
            query_text: query_text.to_string(),
        })
    }
}

/// Context blocks are ordered most relevant first and numbered so the model
/// can cite them.
fn build_synthesis_prompt(query_text: &str, hits: &[ScoredMemory]) -> String {
    let mut context = String::new();
    for (i, hit) in hits.iter().enumerate() {
        context.push_str(&format!(
            "[{}] ({}, {})\nSummary: {}\nContent: {}\n\n",
            i + 1,
            hit.memory.created_at.format("%Y-%m-%d"),
            hit.memory.source_type,
            hit.memory.enriched.summary,
            hit.memory.raw_text,
        ));
    }

    format!(
        "You are a personal memory assistant. Answer the question using ONLY \
         the context below. If the context does not contain the answer, say \
         so plainly. Cite context blocks by number where relevant.\n\n\
         Context:\n{}\
         Question: {}\n\nAnswer:",
        context, query_text
    )
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars).collect();
        format!("{}...", cut.trim_end())
    }
}
