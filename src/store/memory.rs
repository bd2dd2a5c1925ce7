//! In-memory store for tests and ephemeral use.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::embedding::cosine_similarity;
use crate::models::{Commitment, Memory};

use super::{rank, CommitmentFilter, DuplicateKey, RecordStore, ScoredMemory};

/// HashMap-backed [`RecordStore`]. Same visible semantics as the SQLite
/// store, including idempotency-key rejection and cascade delete.
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    memories: HashMap<String, Memory>,
    commitments: Vec<Commitment>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn memory_count(&self) -> usize {
        self.inner.read().unwrap().memories.len()
    }

    pub fn commitment_count(&self) -> usize {
        self.inner.read().unwrap().commitments.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn insert(&self, memory: &Memory, commitments: &[Commitment]) -> anyhow::Result<()> {
        let mut inner = self.inner.write().unwrap();

        if let Some(key) = &memory.idempotency_key {
            let taken = inner
                .memories
                .values()
                .any(|m| m.idempotency_key.as_deref() == Some(key.as_str()));
            if taken {
                return Err(DuplicateKey(key.clone()).into());
            }
        }

        inner.memories.insert(memory.id.clone(), memory.clone());
        inner.commitments.extend_from_slice(commitments);
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> anyhow::Result<Option<Memory>> {
        Ok(self.inner.read().unwrap().memories.get(id).cloned())
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: i64,
        threshold: f32,
    ) -> anyhow::Result<Vec<ScoredMemory>> {
        let inner = self.inner.read().unwrap();
        let mut results: Vec<ScoredMemory> = inner
            .memories
            .values()
            .map(|m| ScoredMemory {
                score: cosine_similarity(query, &m.embedding),
                memory: m.clone(),
            })
            .collect();
        rank(&mut results, top_k, threshold);
        Ok(results)
    }

    async fn commitments(
        &self,
        filter: &CommitmentFilter,
        today: NaiveDate,
    ) -> anyhow::Result<Vec<Commitment>> {
        let inner = self.inner.read().unwrap();
        let mut out: Vec<Commitment> = inner
            .commitments
            .iter()
            .filter(|c| {
                filter
                    .owner
                    .as_ref()
                    .is_none_or(|owner| &c.committed_by == owner)
                    && filter
                        .due_before
                        .is_none_or(|limit| c.due_date.is_some_and(|due| due < limit))
                    && filter
                        .status
                        .is_none_or(|status| c.status(today) == status)
            })
            .cloned()
            .collect();
        // Soonest due first, no-due-date last, matching the SQLite ordering.
        out.sort_by(|a, b| {
            a.due_date
                .is_none()
                .cmp(&b.due_date.is_none())
                .then_with(|| a.due_date.cmp(&b.due_date))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(out)
    }

    async fn delete_memory(&self, id: &str) -> anyhow::Result<bool> {
        let mut inner = self.inner.write().unwrap();
        let existed = inner.memories.remove(id).is_some();
        inner.commitments.retain(|c| c.memory_id != id);
        Ok(existed)
    }
}
