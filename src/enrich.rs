//! Enrichment engine: structured extraction from raw text.
//!
//! Sends a single fixed-schema prompt to the language-model collaborator
//! and validates the response against an explicit serde schema — never by
//! best-effort field access. A malformed-but-successful response indicates
//! a prompt/schema mismatch rather than an outage, so it is retried exactly
//! once with a stricter re-prompt and then surfaced as
//! [`PipelineError::EnrichmentParse`].

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::llm::{LanguageModel, LlmError};
use crate::models::{EnrichedContent, Entity};
use crate::retry::{retry, RetryPolicy};

const ENRICH_PROMPT: &str = "\
You are an expert at analyzing conversations and documents to extract \
structured information.

Analyze the text below and extract:
1. Summary: a concise one-paragraph summary
2. Entities: named entities (people, companies, projects, dates, amounts)
3. Commitments: promises made, quoted as short standalone mentions \
(who promised what to whom, and when)

Be precise and only extract information that is clearly stated or strongly \
implied.

Return your response as valid JSON with this exact structure:
{
    \"summary\": \"One paragraph summary\",
    \"entities\": [{\"name\": \"...\", \"type\": \"person|company|project|date|amount|location\"}],
    \"commitments\": [\"John committed to deliver the API by Dec 15\"]
}";

const STRICT_SUFFIX: &str = "\
IMPORTANT: your previous response did not match the schema. Respond with \
ONLY a single JSON object containing exactly the keys \"summary\" (string), \
\"entities\" (array of {\"name\", \"type\"} objects), and \"commitments\" \
(array of strings). No prose, no markdown fences, no additional keys.";

/// The schema contract for enrichment responses.
#[derive(Debug, Deserialize)]
struct EnrichmentResponse {
    summary: String,
    #[serde(default)]
    entities: Vec<EntityResponse>,
    #[serde(default)]
    commitments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EntityResponse {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

/// Turns raw text into [`EnrichedContent`] via the language model.
///
/// No knowledge of storage.
pub struct EnrichmentEngine {
    llm: Arc<dyn LanguageModel>,
    retry: RetryPolicy,
}

impl EnrichmentEngine {
    pub fn new(llm: Arc<dyn LanguageModel>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Enrich a text into summary, entities, and commitment mentions.
    ///
    /// Transient transport failures are retried per the policy and surface
    /// as [`PipelineError::Enrichment`] when the budget is exhausted.
    pub async fn enrich(&self, text: &str) -> Result<EnrichedContent, PipelineError> {
        let prompt = build_prompt(text, false);

        let parse_failure = match self.complete(&prompt).await {
            Ok(value) => match parse_response(value, text) {
                Ok(enriched) => return Ok(enriched),
                Err(msg) => msg,
            },
            Err(e) if matches!(e, LlmError::InvalidResponse(_)) => e.to_string(),
            Err(e) => return Err(PipelineError::Enrichment(e.to_string())),
        };

        warn!(error = %parse_failure, "enrichment response rejected, re-prompting strictly");

        let strict = build_prompt(text, true);
        let value = self.complete(&strict).await.map_err(|e| match e {
            LlmError::InvalidResponse(_) => PipelineError::EnrichmentParse(e.to_string()),
            other => PipelineError::Enrichment(other.to_string()),
        })?;

        parse_response(value, text).map_err(PipelineError::EnrichmentParse)
    }

    async fn complete(&self, prompt: &str) -> Result<Value, LlmError> {
        retry(&self.retry, "enrich", LlmError::is_transient, || {
            self.llm.complete_structured(prompt)
        })
        .await
    }
}

fn build_prompt(text: &str, strict: bool) -> String {
    if strict {
        format!(
            "{}\n\n{}\n\nText to analyze:\n\n{}",
            ENRICH_PROMPT, STRICT_SUFFIX, text
        )
    } else {
        format!("{}\n\nText to analyze:\n\n{}", ENRICH_PROMPT, text)
    }
}

/// Validate a structured response against the schema contract.
///
/// Returns a description of the violation on failure so the caller can
/// re-prompt or surface it.
fn parse_response(value: Value, raw_text: &str) -> Result<EnrichedContent, String> {
    let resp: EnrichmentResponse =
        serde_json::from_value(value).map_err(|e| format!("schema mismatch: {}", e))?;

    if resp.summary.trim().is_empty() && !raw_text.trim().is_empty() {
        return Err("summary is empty for non-empty input".to_string());
    }

    Ok(EnrichedContent {
        summary: resp.summary,
        entities: dedup_entities(resp.entities),
        commitments: resp.commitments,
    })
}

/// Deduplicate by (name, type) pair, preserving first-seen order.
fn dedup_entities(entities: Vec<EntityResponse>) -> Vec<Entity> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(entities.len());
    for e in entities {
        if seen.insert((e.name.clone(), e.kind.clone())) {
            out.push(Entity {
                name: e.name,
                kind: e.kind,
            });
        }
    }
    debug!(entities = out.len(), "deduplicated entities");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted model: pops one canned result per structured call.
    struct ScriptedModel {
        responses: Mutex<Vec<Result<Value, LlmError>>>,
        calls: AtomicU32,
    }

    impl ScriptedModel {
        fn new(responses: Vec<Result<Value, LlmError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn complete_structured(&self, _prompt: &str) -> Result<Value, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::Transport("script exhausted".to_string()));
            }
            responses.remove(0)
        }

        async fn embed(&self, _text: &str) -> Result<Vec<f32>, LlmError> {
            unimplemented!()
        }

        async fn complete_text(&self, _prompt: &str) -> Result<String, LlmError> {
            unimplemented!()
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn dims(&self) -> usize {
            0
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    fn good_response() -> Value {
        serde_json::json!({
            "summary": "Meeting notes about the API deadline.",
            "entities": [
                { "name": "John", "type": "person" },
                { "name": "API", "type": "project" },
                { "name": "John", "type": "person" }
            ],
            "commitments": ["John committed to deliver the API by Dec 15"]
        })
    }

    #[tokio::test]
    async fn test_enrich_parses_and_dedups() {
        let llm = ScriptedModel::new(vec![Ok(good_response())]);
        let engine = EnrichmentEngine::new(llm.clone(), fast_policy());
        let enriched = engine.enrich("Meeting notes ...").await.unwrap();

        assert_eq!(enriched.summary, "Meeting notes about the API deadline.");
        assert_eq!(enriched.entities.len(), 2);
        assert_eq!(enriched.entities[0].name, "John");
        assert_eq!(enriched.entities[1].name, "API");
        assert_eq!(enriched.commitments.len(), 1);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_schema_mismatch_reprompts_once_then_succeeds() {
        let llm = ScriptedModel::new(vec![
            Ok(serde_json::json!({ "wrong": "shape" })),
            Ok(good_response()),
        ]);
        let engine = EnrichmentEngine::new(llm.clone(), fast_policy());
        let enriched = engine.enrich("Meeting notes ...").await.unwrap();
        assert_eq!(enriched.entities.len(), 2);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_schema_mismatch_is_parse_error() {
        let llm = ScriptedModel::new(vec![
            Ok(serde_json::json!({ "wrong": "shape" })),
            Ok(serde_json::json!({ "still": "wrong" })),
        ]);
        let engine = EnrichmentEngine::new(llm.clone(), fast_policy());
        let err = engine.enrich("Meeting notes ...").await.unwrap_err();
        assert!(matches!(err, PipelineError::EnrichmentParse(_)));
        assert_eq!(llm.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_summary_is_schema_violation() {
        let llm = ScriptedModel::new(vec![
            Ok(serde_json::json!({ "summary": "  ", "entities": [], "commitments": [] })),
            Ok(serde_json::json!({ "summary": "", "entities": [], "commitments": [] })),
        ]);
        let engine = EnrichmentEngine::new(llm, fast_policy());
        let err = engine.enrich("non-empty text").await.unwrap_err();
        assert!(matches!(err, PipelineError::EnrichmentParse(_)));
    }

    #[tokio::test]
    async fn test_transient_failures_retried_then_enrichment_error() {
        let transient = || {
            Err(LlmError::Status {
                status: 500,
                message: "down".to_string(),
            })
        };
        let llm = ScriptedModel::new(vec![transient(), transient(), transient(), transient()]);
        let engine = EnrichmentEngine::new(llm.clone(), fast_policy());
        let err = engine.enrich("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::Enrichment(_)));
        // First attempt plus two retries, no strict re-prompt for outages.
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_missing_optional_fields_default_empty() {
        let llm = ScriptedModel::new(vec![Ok(serde_json::json!({ "summary": "Just a note." }))]);
        let engine = EnrichmentEngine::new(llm, fast_policy());
        let enriched = engine.enrich("note").await.unwrap();
        assert!(enriched.entities.is_empty());
        assert!(enriched.commitments.is_empty());
    }
}
