//! # Exo Memory
//!
//! A personal knowledge base: ingest raw content (markdown, URLs captures,
//! Slack threads, meeting transcripts), enrich it with an LLM into summaries,
//! entities, and commitments, embed it for semantic retrieval, and answer
//! natural-language questions grounded in what was stored.
//!
//! The flow is two pipelines over one store:
//!
//! - **Ingestion** ([`ingest::IngestionPipeline`]): validate → enrich →
//!   embed → normalize commitments → persist atomically.
//! - **Retrieval** ([`query::RetrievalPipeline`]): embed query → rank by
//!   cosine similarity → synthesize an answer from the top matches.
//!
//! [`orchestrator::Orchestrator`] wires both from a [`config::Config`], a
//! [`llm::LanguageModel`], and a [`store::RecordStore`] — the two trait
//! seams that tests substitute.

pub mod commitments;
pub mod config;
pub mod embedding;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod query;
pub mod retry;
pub mod store;
