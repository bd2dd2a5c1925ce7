//! Ingestion pipeline: raw text in, durable memory out.
//!
//! Fixed order: validate, enrich, embed, normalize commitments, persist.
//! Any failure aborts the whole ingestion; nothing is stored for a failed
//! run. The store insert is expected to be atomic, but if it fails anyway a
//! compensating delete clears any partial state an adapter may have left.

use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::commitments;
use crate::embedding::EmbeddingGenerator;
use crate::enrich::EnrichmentEngine;
use crate::error::PipelineError;
use crate::models::{Memory, SourceType};
use crate::retry::{retry, RetryPolicy};
use crate::store::{self, DuplicateKey, RecordStore};

pub struct IngestionPipeline {
    enricher: EnrichmentEngine,
    embedder: EmbeddingGenerator,
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl IngestionPipeline {
    pub fn new(
        enricher: EnrichmentEngine,
        embedder: EmbeddingGenerator,
        store: Arc<dyn RecordStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            enricher,
            embedder,
            store,
            retry,
        }
    }

    /// Run the full ingestion for one piece of content.
    ///
    /// Returns the persisted memory. On any error the store holds nothing
    /// from this run.
    pub async fn ingest(
        &self,
        raw_text: &str,
        source_type: SourceType,
        metadata: Value,
    ) -> Result<Memory, PipelineError> {
        if raw_text.trim().is_empty() {
            return Err(PipelineError::Validation(
                "raw_text must not be empty".to_string(),
            ));
        }
        let metadata = match metadata {
            Value::Null => serde_json::json!({}),
            Value::Object(_) => metadata,
            other => {
                return Err(PipelineError::Validation(format!(
                    "metadata must be an object, got {}",
                    value_kind(&other)
                )))
            }
        };

        let enriched = self.enricher.enrich(raw_text).await?;

        // The embedding covers the raw text, not the summary, so retrieval
        // can match details the summary dropped.
        let embedding = self.embedder.generate(raw_text).await?;

        let memory = Memory::create(
            raw_text.to_string(),
            source_type,
            enriched,
            embedding,
            metadata,
        );
        let extracted =
            commitments::normalize(&memory.enriched.commitments, &memory.id, memory.created_at);

        // Persistence goes through the same retry policy as the model calls.
        let inserted = retry(&self.retry, "persist", store::is_retryable, || {
            self.store.insert(&memory, &extracted)
        })
        .await;

        if let Err(e) = inserted {
            if let Some(dup) = e.downcast_ref::<DuplicateKey>() {
                return Err(PipelineError::Validation(dup.to_string()));
            }
            // Compensating delete for adapters whose insert is not atomic.
            if let Err(cleanup) = self.store.delete_memory(&memory.id).await {
                warn!(memory_id = %memory.id, error = %cleanup, "cleanup after failed insert also failed");
            }
            return Err(PipelineError::Persistence(e.to_string()));
        }

        info!(
            memory_id = %memory.id,
            source_type = %memory.source_type,
            entities = memory.enriched.entities.len(),
            commitments = extracted.len(),
            "ingested memory"
        );
        Ok(memory)
    }
}

fn value_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
