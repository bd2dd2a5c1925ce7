//! SQLite-backed store.
//!
//! One database file holds both tables. Embeddings are stored as
//! little-endian f32 BLOBs and compared in Rust; at personal-knowledge-base
//! scale a full scan is cheaper than maintaining an ANN index.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::{Commitment, EnrichedContent, Memory, SourceType};

use super::{rank, CommitmentFilter, DuplicateKey, RecordStore, ScoredMemory};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and run migrations.
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Idempotent schema setup.
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                raw_text TEXT NOT NULL,
                source_type TEXT NOT NULL,
                created_at TEXT NOT NULL,
                summary TEXT NOT NULL,
                entities_json TEXT NOT NULL DEFAULT '[]',
                mentions_json TEXT NOT NULL DEFAULT '[]',
                embedding BLOB NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                content_hash TEXT NOT NULL,
                idempotency_key TEXT UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS commitments (
                id TEXT PRIMARY KEY,
                memory_id TEXT NOT NULL,
                description TEXT NOT NULL,
                committed_by TEXT NOT NULL,
                committed_to TEXT,
                due_date TEXT,
                fulfilled INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (memory_id) REFERENCES memories(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_commitments_memory_id ON commitments(memory_id)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_commitments_committed_by ON commitments(committed_by)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memories_created_at ON memories(created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn insert(&self, memory: &Memory, commitments: &[Commitment]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO memories
                (id, raw_text, source_type, created_at, summary, entities_json,
                 mentions_json, embedding, metadata_json, content_hash, idempotency_key)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&memory.id)
        .bind(&memory.raw_text)
        .bind(memory.source_type.as_str())
        .bind(memory.created_at.to_rfc3339())
        .bind(&memory.enriched.summary)
        .bind(serde_json::to_string(&memory.enriched.entities)?)
        .bind(serde_json::to_string(&memory.enriched.commitments)?)
        .bind(vec_to_blob(&memory.embedding))
        .bind(serde_json::to_string(&memory.metadata)?)
        .bind(&memory.content_hash)
        .bind(memory.idempotency_key.as_deref())
        .execute(&mut *tx)
        .await;

        if let Err(e) = result {
            if let Some(key) = &memory.idempotency_key {
                if e.to_string().contains("UNIQUE") {
                    return Err(DuplicateKey(key.clone()).into());
                }
            }
            return Err(e.into());
        }

        for c in commitments {
            sqlx::query(
                r#"
                INSERT INTO commitments
                    (id, memory_id, description, committed_by, committed_to, due_date, fulfilled)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&c.id)
            .bind(&c.memory_id)
            .bind(&c.description)
            .bind(&c.committed_by)
            .bind(c.committed_to.as_deref())
            .bind(c.due_date.map(|d| d.to_string()))
            .bind(c.fulfilled as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(memory_id = %memory.id, commitments = commitments.len(), "inserted memory");
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Memory>> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| row_to_memory(&r)).transpose()
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: i64,
        threshold: f32,
    ) -> Result<Vec<ScoredMemory>> {
        // Full scan with similarity computed in Rust.
        let rows = sqlx::query("SELECT * FROM memories")
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in &rows {
            let memory = row_to_memory(row)?;
            let score = cosine_similarity(query, &memory.embedding);
            results.push(ScoredMemory { memory, score });
        }

        rank(&mut results, top_k, threshold);
        Ok(results)
    }

    async fn commitments(
        &self,
        filter: &CommitmentFilter,
        today: NaiveDate,
    ) -> Result<Vec<Commitment>> {
        let mut sql = String::from("SELECT * FROM commitments WHERE 1=1");
        if filter.owner.is_some() {
            sql.push_str(" AND committed_by = ?");
        }
        if filter.due_before.is_some() {
            sql.push_str(" AND due_date IS NOT NULL AND due_date < ?");
        }
        sql.push_str(" ORDER BY due_date IS NULL, due_date ASC, id ASC");

        let mut query = sqlx::query(&sql);
        if let Some(owner) = &filter.owner {
            query = query.bind(owner);
        }
        if let Some(limit) = filter.due_before {
            query = query.bind(limit.to_string());
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let c = row_to_commitment(row)?;
            // Status derived at read time, never stored.
            if filter.status.is_none_or(|s| c.status(today) == s) {
                out.push(c);
            }
        }
        Ok(out)
    }

    async fn delete_memory(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM commitments WHERE memory_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_memory(row: &sqlx::sqlite::SqliteRow) -> Result<Memory> {
    let source_type_str: String = row.get("source_type");
    let source_type = SourceType::parse(&source_type_str)
        .with_context(|| format!("unknown source_type in database: {}", source_type_str))?;

    let created_at_str: String = row.get("created_at");
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .context("invalid created_at in database")?
        .with_timezone(&Utc);

    let entities_json: String = row.get("entities_json");
    let mentions_json: String = row.get("mentions_json");
    let metadata_json: String = row.get("metadata_json");
    let blob: Vec<u8> = row.get("embedding");

    Ok(Memory {
        id: row.get("id"),
        raw_text: row.get("raw_text"),
        source_type,
        created_at,
        enriched: EnrichedContent {
            summary: row.get("summary"),
            entities: serde_json::from_str(&entities_json)?,
            commitments: serde_json::from_str(&mentions_json)?,
        },
        embedding: blob_to_vec(&blob),
        metadata: serde_json::from_str(&metadata_json)?,
        content_hash: row.get("content_hash"),
        idempotency_key: row.get("idempotency_key"),
    })
}

fn row_to_commitment(row: &sqlx::sqlite::SqliteRow) -> Result<Commitment> {
    let due_date: Option<String> = row.get("due_date");
    let due_date = due_date
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d"))
        .transpose()
        .context("invalid due_date in database")?;
    let fulfilled: i64 = row.get("fulfilled");

    Ok(Commitment {
        id: row.get("id"),
        memory_id: row.get("memory_id"),
        description: row.get("description"),
        committed_by: row.get("committed_by"),
        committed_to: row.get("committed_to"),
        due_date,
        fulfilled: fulfilled != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CommitmentStatus;
    use tempfile::TempDir;

    fn mem(id: &str, embedding: Vec<f32>, key: Option<&str>) -> Memory {
        let mut metadata = serde_json::json!({ "origin": "test" });
        if let Some(k) = key {
            metadata["idempotency_key"] = serde_json::json!(k);
        }
        let mut m = Memory::create(
            format!("raw text of {}", id),
            SourceType::Slack,
            EnrichedContent {
                summary: format!("summary of {}", id),
                entities: vec![crate::models::Entity {
                    name: "John".to_string(),
                    kind: "person".to_string(),
                }],
                commitments: vec!["John will do it".to_string()],
            },
            embedding,
            metadata,
        );
        m.id = id.to_string();
        m
    }

    async fn open(dir: &TempDir) -> SqliteStore {
        SqliteStore::connect(&dir.path().join("exo.db")).await.unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_memory() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let m = mem("m1", vec![0.1, -0.2, 0.3], Some("key-1"));
        store.insert(&m, &[]).await.unwrap();

        let got = store.get_by_id("m1").await.unwrap().unwrap();
        assert_eq!(got.raw_text, m.raw_text);
        assert_eq!(got.source_type, SourceType::Slack);
        assert_eq!(got.enriched.summary, m.enriched.summary);
        assert_eq!(got.enriched.entities, m.enriched.entities);
        assert_eq!(got.embedding, m.embedding);
        assert_eq!(got.content_hash, m.content_hash);
        assert_eq!(got.idempotency_key.as_deref(), Some("key-1"));
        assert_eq!(got.metadata["origin"], "test");
    }

    #[tokio::test]
    async fn test_duplicate_key_rejected_atomically() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let c = Commitment {
            id: "c1".to_string(),
            memory_id: "m1".to_string(),
            description: "d".to_string(),
            committed_by: "John".to_string(),
            committed_to: None,
            due_date: None,
            fulfilled: false,
        };
        store
            .insert(&mem("m1", vec![1.0], Some("key-1")), &[c.clone()])
            .await
            .unwrap();

        let mut dup_c = c;
        dup_c.id = "c2".to_string();
        dup_c.memory_id = "m2".to_string();
        let err = store
            .insert(&mem("m2", vec![1.0], Some("key-1")), &[dup_c])
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<DuplicateKey>().is_some());

        // Nothing from the rejected write is visible.
        assert!(store.get_by_id("m2").await.unwrap().is_none());
        let all = store
            .commitments(&CommitmentFilter::default(), Utc::now().date_naive())
            .await
            .unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_similarity_search_threshold_and_order() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        store.insert(&mem("close", vec![1.0, 0.0], None), &[]).await.unwrap();
        store.insert(&mem("far", vec![0.0, 1.0], None), &[]).await.unwrap();
        store
            .insert(&mem("mid", vec![0.7, 0.7], None), &[])
            .await
            .unwrap();

        let results = store
            .similarity_search(&[1.0, 0.0], 10, 0.1)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].memory.id, "close");
        assert_eq!(results[1].memory.id, "mid");
        assert!(results[0].score > results[1].score);
    }

    #[tokio::test]
    async fn test_commitment_status_and_filters() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let today = NaiveDate::from_ymd_opt(2026, 8, 27).unwrap();

        let commitments = vec![
            Commitment {
                id: "c1".to_string(),
                memory_id: "m1".to_string(),
                description: "late one".to_string(),
                committed_by: "John".to_string(),
                committed_to: Some("Sarah".to_string()),
                due_date: NaiveDate::from_ymd_opt(2026, 8, 1),
                fulfilled: false,
            },
            Commitment {
                id: "c2".to_string(),
                memory_id: "m1".to_string(),
                description: "future one".to_string(),
                committed_by: "John".to_string(),
                committed_to: None,
                due_date: NaiveDate::from_ymd_opt(2026, 9, 15),
                fulfilled: false,
            },
            Commitment {
                id: "c3".to_string(),
                memory_id: "m1".to_string(),
                description: "undated one".to_string(),
                committed_by: "John".to_string(),
                committed_to: None,
                due_date: None,
                fulfilled: false,
            },
        ];
        store
            .insert(&mem("m1", vec![1.0], None), &commitments)
            .await
            .unwrap();

        // Due dates ascending, undated commitments at the end.
        let all = store
            .commitments(&CommitmentFilter::default(), today)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, "c1");
        assert_eq!(all[1].id, "c2");
        assert_eq!(all[2].id, "c3");

        let overdue = store
            .commitments(
                &CommitmentFilter {
                    status: Some(CommitmentStatus::Overdue),
                    ..Default::default()
                },
                today,
            )
            .await
            .unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, "c1");
        assert_eq!(overdue[0].committed_to.as_deref(), Some("Sarah"));

        let johns_due_soon = store
            .commitments(
                &CommitmentFilter {
                    owner: Some("John".to_string()),
                    due_before: NaiveDate::from_ymd_opt(2026, 9, 1),
                    ..Default::default()
                },
                today,
            )
            .await
            .unwrap();
        assert_eq!(johns_due_soon.len(), 1);
        assert_eq!(johns_due_soon[0].id, "c1");
    }

    #[tokio::test]
    async fn test_delete_cascades() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let c = Commitment {
            id: "c1".to_string(),
            memory_id: "m1".to_string(),
            description: "d".to_string(),
            committed_by: "John".to_string(),
            committed_to: None,
            due_date: None,
            fulfilled: false,
        };
        store.insert(&mem("m1", vec![1.0], None), &[c]).await.unwrap();

        assert!(store.delete_memory("m1").await.unwrap());
        assert!(store.get_by_id("m1").await.unwrap().is_none());
        let remaining = store
            .commitments(&CommitmentFilter::default(), Utc::now().date_naive())
            .await
            .unwrap();
        assert!(remaining.is_empty());

        assert!(!store.delete_memory("m1").await.unwrap());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.insert(&mem("m1", vec![1.0], None), &[]).await.unwrap();
        store.migrate().await.unwrap();
        assert!(store.get_by_id("m1").await.unwrap().is_some());
    }
}
