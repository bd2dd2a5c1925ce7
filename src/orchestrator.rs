//! Top-level façade wiring config, model client, store, and pipelines.
//!
//! The one place that knows how the pieces fit together; the CLI and any
//! embedding application talk to [`Orchestrator`] and nothing below it.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::EmbeddingGenerator;
use crate::enrich::EnrichmentEngine;
use crate::error::PipelineError;
use crate::ingest::IngestionPipeline;
use crate::llm::LanguageModel;
use crate::models::{Commitment, CommitmentStatus, Memory, QueryResponse, SourceType};
use crate::query::RetrievalPipeline;
use crate::retry::RetryPolicy;
use crate::store::{CommitmentFilter, RecordStore};

pub struct Orchestrator {
    config: Config,
    store: Arc<dyn RecordStore>,
    ingestion: IngestionPipeline,
    retrieval: RetrievalPipeline,
}

impl Orchestrator {
    /// Wire pipelines from a config, a model client, and a store.
    ///
    /// Injectable seams for both collaborators so tests can substitute
    /// scripted models and in-memory storage.
    pub fn new(config: Config, llm: Arc<dyn LanguageModel>, store: Arc<dyn RecordStore>) -> Self {
        let retry = RetryPolicy::from_config(&config.llm);
        let ingestion = IngestionPipeline::new(
            EnrichmentEngine::new(llm.clone(), retry.clone()),
            EmbeddingGenerator::new(llm.clone(), retry.clone()),
            store.clone(),
            retry.clone(),
        );
        let retrieval = RetrievalPipeline::new(
            EmbeddingGenerator::new(llm.clone(), retry.clone()),
            llm,
            store.clone(),
            retry,
        );
        Self {
            config,
            store,
            ingestion,
            retrieval,
        }
    }

    /// Ingest one piece of content.
    ///
    /// `source_type` is validated before any model or store work happens;
    /// an unknown label costs nothing but the string comparison.
    pub async fn ingest(
        &self,
        raw_text: &str,
        source_type: &str,
        metadata: Value,
    ) -> Result<Memory, PipelineError> {
        let source_type = SourceType::parse(source_type).ok_or_else(|| {
            PipelineError::Validation(format!(
                "unknown source_type '{}': expected markdown, url, slack, or transcript",
                source_type
            ))
        })?;
        self.ingestion.ingest(raw_text, source_type, metadata).await
    }

    /// Answer a question from stored memories.
    ///
    /// `top_k` and `threshold` default from config when not given.
    pub async fn query(
        &self,
        query_text: &str,
        top_k: Option<i64>,
        threshold: Option<f32>,
    ) -> Result<QueryResponse, PipelineError> {
        let top_k = top_k.unwrap_or(self.config.retrieval.top_k);
        let threshold = threshold.unwrap_or(self.config.retrieval.similarity_threshold);
        self.retrieval.query(query_text, top_k, threshold).await
    }

    /// List commitments with their status as of today.
    pub async fn commitments(
        &self,
        filter: &CommitmentFilter,
    ) -> Result<Vec<(Commitment, CommitmentStatus)>, PipelineError> {
        let today = Utc::now().date_naive();
        let rows = self
            .store
            .commitments(filter, today)
            .await
            .map_err(|e| PipelineError::Persistence(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|c| {
                let status = c.status(today);
                (c, status)
            })
            .collect())
    }
}
