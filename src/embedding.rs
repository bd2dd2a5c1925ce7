//! Embedding generation and vector utilities.
//!
//! [`EmbeddingGenerator`] wraps the language-model collaborator's embedding
//! endpoint with the shared retry policy. The free functions handle vector
//! storage and comparison:
//! - [`cosine_similarity`] — compare two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for
//!   SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`

use std::sync::Arc;
use tracing::debug;

use crate::error::PipelineError;
use crate::llm::{LanguageModel, LlmError};
use crate::retry::{retry, RetryPolicy};

/// Generates fixed-length embedding vectors for raw text and queries.
///
/// No knowledge of storage or enrichment; transient transport failures are
/// retried per the policy and exhaustion surfaces as
/// [`PipelineError::Embedding`].
pub struct EmbeddingGenerator {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl EmbeddingGenerator {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Embed a text, retrying transient failures.
    ///
    /// An empty returned vector is a terminal failure: it would make the
    /// memory invisible to similarity search.
    pub async fn generate(&self, text: &str) -> Result<Vec<f32>, PipelineError> {
        let vector = retry(&self.retry, "embed", LlmError::is_transient, || {
            self.llm.embed(text)
        })
        .await
        .map_err(|e| PipelineError::Embedding(e.to_string()))?;

        if vector.is_empty() {
            return Err(PipelineError::Embedding(
                "provider returned an empty vector".to_string(),
            ));
        }

        debug!(dims = vector.len(), "embedded text");
        Ok(vector)
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a BLOB
/// of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values from
/// the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
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
