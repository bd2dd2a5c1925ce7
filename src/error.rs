//! Error types for the ingestion and retrieval pipelines.
//!
//! Every pipeline failure is one of these variants; the orchestrator passes
//! them through unchanged so inbound layers (CLI, integrations) can map each
//! kind to an exit code or status without string matching.

use thiserror::Error;

use crate::models::SourceRef;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Bad caller input. Never retried, no collaborator is contacted.
    #[error("validation error: {0}")]
    Validation(String),

    /// The language model failed to enrich after the retry budget.
    #[error("enrichment failed: {0}")]
    Enrichment(String),

    /// A successful enrichment response that does not match the schema,
    /// after one stricter re-prompt. Distinct from [`Enrichment`] so a
    /// prompt/schema bug can be told apart from an outage.
    ///
    /// [`Enrichment`]: PipelineError::Enrichment
    #[error("enrichment response did not match schema: {0}")]
    EnrichmentParse(String),

    /// The embedding endpoint failed after the retry budget.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// Answer synthesis failed after retrieval succeeded. The ranked
    /// sources are carried so the caller is not left with nothing.
    #[error("answer synthesis failed: {message}")]
    Synthesis {
        message: String,
        sources: Vec<SourceRef>,
    },

    /// Storage transport or transaction failure, after best-effort rollback
    /// of any partial write.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
