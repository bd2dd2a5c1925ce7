//! Core data models for the memory pipeline.
//!
//! These types represent the memories, enrichment output, commitments, and
//! query results that flow through ingestion and retrieval.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Closed set of inbound content origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Markdown,
    Url,
    Slack,
    Transcript,
}

impl SourceType {
    /// Parse a source type label. Returns `None` for anything outside the
    /// closed set; callers surface that as a validation error.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "markdown" => Some(Self::Markdown),
            "url" => Some(Self::Url),
            "slack" => Some(Self::Slack),
            "transcript" => Some(Self::Transcript),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Url => "url",
            Self::Slack => "slack",
            Self::Transcript => "transcript",
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named entity extracted from content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity name as mentioned in the text.
    pub name: String,
    /// Type tag: person, company, project, date, amount, location.
    #[serde(rename = "type")]
    pub kind: String,
}

/// AI-derived structured view of a memory's text.
///
/// Produced once by the enrichment engine; never mutated afterward.
/// `entities` and `commitments` may be empty but are never absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedContent {
    /// One-paragraph summary. Non-empty whenever the raw text is non-empty.
    pub summary: String,
    /// Entities deduplicated by (name, type), first-seen order.
    pub entities: Vec<Entity>,
    /// Raw commitment mentions, as extracted, pre-normalization.
    pub commitments: Vec<String>,
}

/// A persisted unit of ingested knowledge.
///
/// Created exclusively by the ingestion pipeline and append-only after
/// creation: either all of raw_text, enriched, and embedding are durably
/// stored, or none are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub raw_text: String,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
    pub enriched: EnrichedContent,
    pub embedding: Vec<f32>,
    /// Open key/value mapping supplied by the caller.
    pub metadata: serde_json::Value,
    /// SHA-256 of raw_text, kept for provenance. Not used to deduplicate.
    pub content_hash: String,
    /// Caller-chosen dedup key, lifted from `metadata["idempotency_key"]`.
    /// Enforced by the store, not by pipeline logic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl Memory {
    /// Assemble a new memory with a fresh id and creation timestamp.
    pub fn create(
        raw_text: String,
        source_type: SourceType,
        enriched: EnrichedContent,
        embedding: Vec<f32>,
        metadata: serde_json::Value,
    ) -> Self {
        let content_hash = content_hash(&raw_text);
        let idempotency_key = metadata
            .get("idempotency_key")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        Self {
            id: Uuid::new_v4().to_string(),
            raw_text,
            source_type,
            created_at: Utc::now(),
            enriched,
            embedding,
            metadata,
            content_hash,
            idempotency_key,
        }
    }
}

/// SHA-256 hex digest of a text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derived commitment state. Computed on every read, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentStatus {
    Open,
    Fulfilled,
    Overdue,
}

impl CommitmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "open" => Some(Self::Open),
            "fulfilled" => Some(Self::Fulfilled),
            "overdue" => Some(Self::Overdue),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Fulfilled => "fulfilled",
            Self::Overdue => "overdue",
        }
    }
}

impl std::fmt::Display for CommitmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized, queryable obligation extracted from a memory's text.
///
/// Many commitments may reference one memory; deleting the memory cascades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commitment {
    pub id: String,
    /// Back-reference to the owning memory, not ownership.
    pub memory_id: String,
    pub description: String,
    pub committed_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    /// Set only by an explicit out-of-scope update path.
    pub fulfilled: bool,
}

impl Commitment {
    /// Derive the status for a given day.
    ///
    /// Purely a function of (due_date, fulfilled, today); recomputed on
    /// every read rather than cached in storage.
    pub fn status(&self, today: NaiveDate) -> CommitmentStatus {
        if self.fulfilled {
            return CommitmentStatus::Fulfilled;
        }
        match self.due_date {
            Some(due) if due < today => CommitmentStatus::Overdue,
            _ => CommitmentStatus::Open,
        }
    }
}

/// Reference to a memory that contributed to an answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub memory_id: String,
    /// Cosine similarity to the query embedding.
    pub score: f32,
    /// Short preview of the memory's summary for attribution.
    pub preview: String,
}

/// Transient result of a query. Constructed fresh per query, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    /// Source memories ranked by relevance, most similar first.
    pub source_memories: Vec<SourceRef>,
    /// Echo of the input.
    pub query_text: String,
}
