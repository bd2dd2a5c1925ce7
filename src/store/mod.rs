//! Storage abstraction for memories and commitments.
//!
//! [`RecordStore`] is the single seam between the pipelines and persistence.
//! Two implementations live here: [`SqliteStore`] for real use and
//! [`InMemoryStore`] for tests. Pipelines hold `Arc<dyn RecordStore>` and
//! never know which one they talk to.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;

use crate::models::{Commitment, CommitmentStatus, Memory};

/// A memory paired with its similarity to a query embedding.
#[derive(Debug, Clone)]
pub struct ScoredMemory {
    pub memory: Memory,
    pub score: f32,
}

/// Read-side filter for commitment listings. All fields conjunctive.
#[derive(Debug, Clone, Default)]
pub struct CommitmentFilter {
    /// Derived status to match; derivation uses the `today` passed to
    /// [`RecordStore::commitments`].
    pub status: Option<CommitmentStatus>,
    /// Exact match on `committed_by`.
    pub owner: Option<String>,
    /// Keep only commitments due strictly before this date.
    pub due_before: Option<NaiveDate>,
}

/// Rejection of a write whose idempotency key already exists.
///
/// Typed so callers can tell a duplicate from an infrastructure failure
/// via `anyhow`'s downcast.
#[derive(Error, Debug)]
#[error("idempotency key already used: {0}")]
pub struct DuplicateKey(pub String);

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a memory and its commitments atomically.
    ///
    /// Either everything lands or nothing does. Fails with [`DuplicateKey`]
    /// when the memory carries an idempotency key that is already stored.
    async fn insert(&self, memory: &Memory, commitments: &[Commitment]) -> anyhow::Result<()>;

    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<Memory>>;

    /// Memories ranked by cosine similarity to `query`.
    ///
    /// Drops scores below `threshold`, orders by score descending with ties
    /// broken by recency (newest first) then id, and returns at most
    /// `top_k` results.
    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: i64,
        threshold: f32,
    ) -> anyhow::Result<Vec<ScoredMemory>>;

    /// Commitments matching `filter`, with status derived for `today`.
    async fn commitments(
        &self,
        filter: &CommitmentFilter,
        today: NaiveDate,
    ) -> anyhow::Result<Vec<Commitment>>;

    /// Remove a memory and its commitments. Returns whether it existed.
    async fn delete_memory(&self, id: &str) -> anyhow::Result<bool>;
}

/// Whether a storage failure is worth retrying with backoff.
///
/// A duplicate idempotency key is deterministic and repeats identically;
/// anything else may be a transient transport or locking fault.
pub fn is_retryable(error: &anyhow::Error) -> bool {
    error.downcast_ref::<DuplicateKey>().is_none()
}

/// Order scored memories: similarity descending, then newest first, then id.
///
/// Shared by both store implementations so a given store state and query
/// always produce the same ranking.
pub(crate) fn rank(results: &mut Vec<ScoredMemory>, top_k: i64, threshold: f32) {
    results.retain(|s| s.score >= threshold);
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
            .then_with(|| a.memory.id.cmp(&b.memory.id))
    });
    results.truncate(top_k.max(0) as usize);
}
