//! The ingestion kernel: the single entry point through which
//! any artifact-kind enters the graph.

pub mod canonical;
pub mod chunking;

use crate::collaborators::LlmCollaborator;
use crate::entities::artifact::{create_quote, get_or_create_artifact};
use crate::entities::claim::{create_claim, ClaimInput};
use crate::entities::concept::{normalize_name, resolve_concept_by_normalized_name, resolve_concept_ref};
use crate::entities::model::{DocumentSource, DocumentStatus};
use crate::entities::relationship::{create_relationship, RelationshipAttrs};
use crate::entities::source::{create_chunk, get_or_create_document, set_document_status};
use crate::error::EngineResult;
use crate::ids::ArtifactId;
use crate::scope::ActiveScope;
use crate::snapshots::{create_or_get_snapshot, SnapshotMetadata};
use crate::store::Store;
use canonical::canonicalize_url;
use chrono::Utc;
use chunking::{chunk_text, ChunkingPolicy};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Default)]
pub struct ArtifactInput {
    pub artifact_type: String,
    pub source: DocumentSource,
    pub source_url: String,
    pub external_id: String,
    pub title: Option<String>,
    pub domain: Option<String>,
    pub text: String,
    pub selection_text: Option<String>,
    pub metadata: serde_json::Value,
    pub is_amendment: bool,
}

impl Default for DocumentSource {
    fn default() -> Self {
        DocumentSource::Web
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionActions {
    pub run_lecture_extraction: bool,
    pub run_chunk_and_claims: bool,
    pub embed_claims: bool,
    pub create_artifact_node: bool,
}

#[derive(Debug, Clone)]
pub struct IngestionPolicy {
    pub local_only: bool,
    pub max_chars: usize,
    pub min_chars: usize,
    pub strip_url_query: bool,
    pub denylist_domains: Vec<String>,
    pub chunking: ChunkingPolicy,
}

impl Default for IngestionPolicy {
    fn default() -> Self {
        Self {
            local_only: false,
            max_chars: 2_000_000,
            min_chars: 1,
            strip_url_query: false,
            denylist_domains: Vec::new(),
            chunking: ChunkingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum IngestionStatus {
    Completed,
    Partial,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SummaryCounts {
    pub chunks_created: usize,
    pub claims_created: usize,
    pub mentions_created: usize,
}

#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub run_id: String,
    pub status: IngestionStatus,
    pub summary_counts: SummaryCounts,
    pub errors: Vec<String>,
    pub artifact_id: Option<ArtifactId>,
}

fn host_of(url: &str) -> Option<String> {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let host = without_scheme.split(['/', '?', '#']).next()?;
    Some(host.to_lowercase())
}

/// Runs the ten-step ingestion pipeline, returning an `IngestionResult`
/// with the `run_id` used to look up its `IngestionRun` record.
pub async fn ingest(
    store: &Store,
    scope: &ActiveScope,
    input: ArtifactInput,
    actions: IngestionActions,
    policy: IngestionPolicy,
    llm: &dyn LlmCollaborator,
) -> EngineResult<IngestionResult> {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO ingestion_runs (run_id, graph_id, status, created_at) VALUES (?1, ?2, 'RUNNING', ?3)",
            rusqlite::params![run_id, scope.graph_id.as_str(), started_at],
        )
    })?;

    let outcome = run_pipeline(store, scope, &input, &actions, &policy, llm, &run_id).await;

    let (status, summary, errors, artifact_id) = match &outcome {
        Ok(r) => (r.status, r.summary_counts.clone(), r.errors.clone(), r.artifact_id.clone()),
        Err(e) => (IngestionStatus::Failed, SummaryCounts::default(), vec![e.to_string()], None),
    };
    let finished_at = Utc::now().to_rfc3339();
    let summary_json = serde_json::to_string(&summary)?;
    let errors_json = serde_json::to_string(&errors)?;
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE ingestion_runs SET status = ?1, summary_json = ?2, errors_json = ?3, finished_at = ?4 \
             WHERE run_id = ?5",
            rusqlite::params![format!("{:?}", status).to_uppercase(), summary_json, errors_json, finished_at, run_id],
        )
    })?;

    outcome.map(|mut r| {
        r.artifact_id = artifact_id;
        r
    })
}

async fn run_pipeline(
    store: &Store,
    scope: &ActiveScope,
    input: &ArtifactInput,
    actions: &IngestionActions,
    policy: &IngestionPolicy,
    llm: &dyn LlmCollaborator,
    run_id: &str,
) -> EngineResult<IngestionResult> {
    let mut errors = Vec::new();

    // Step 2: canonicalize identity.
    let canonical_url = canonicalize_url(&input.source_url, policy.strip_url_query);
    let normalized = crate::snapshots::normalize(input.source.as_str(), &input.text);
    let content_hash = crate::snapshots::content_hash(&normalized);

    // Step 3: policy gates.
    if let Some(host) = host_of(&canonical_url) {
        if policy.denylist_domains.iter().any(|d| d == &host) {
            return Ok(skipped(run_id, "denylisted_host"));
        }
    }
    if input.text.chars().count() < policy.min_chars {
        return Ok(skipped(run_id, "below_min_chars"));
    }
    if input.text.chars().count() > policy.max_chars {
        return Ok(skipped(run_id, "above_max_chars"));
    }

    // Step 4: SourceDocument upsert.
    let document = get_or_create_document(store, scope, input.source, &input.external_id, Some(&canonical_url))?;

    // Step 5: snapshot + change event.
    let already_ingested = document.status == DocumentStatus::Ingested;
    let snapshot_outcome = create_or_get_snapshot(
        store,
        scope,
        Some(document.doc_id.as_str()),
        input.source.as_str(),
        &canonical_url,
        &input.text,
        SnapshotMetadata {
            is_amendment: input.is_amendment,
            normalized_title: input.title.clone(),
            company_id: None,
        },
    )?;
    if snapshot_outcome.change_event.is_none() && already_ingested {
        return Ok(skipped(run_id, "already_ingested"));
    }

    let mut summary = SummaryCounts::default();
    let mut artifact_id = None;

    // Step 6: artifact upsert.
    if actions.create_artifact_node {
        let artifact = get_or_create_artifact(
            store,
            scope,
            &canonical_url,
            &content_hash,
            &input.artifact_type,
            input.title.as_deref(),
            &input.text,
            input.metadata.clone(),
        )?;
        if let Some(selection) = &input.selection_text {
            create_quote(store, scope, &artifact.artifact_id, selection, serde_json::json!({}), 1.0)?;
        }
        artifact_id = Some(artifact.artifact_id);
    }

    // Step 7 + 8 + 9: chunk, extract claims, resolve mentions, persist.
    if actions.run_chunk_and_claims {
        let chunks = chunk_text(&input.text, policy.chunking);
        for (index, window) in chunks.iter().enumerate() {
            let chunk = create_chunk(
                store,
                scope,
                &document.doc_id,
                index as i64,
                &window.text,
                serde_json::json!({"start": window.start, "end": window.end}),
            )?;
            summary.chunks_created += 1;

            let extracted = if policy.local_only {
                Vec::new()
            } else {
                llm.extract_claims(&window.text).await
            };
            if extracted.is_empty() {
                continue;
            }

            for candidate in extracted {
                let embedding = None; // embedding collaborator wired in at the API layer when actions.embed_claims is set.
                let mut mentions = Vec::new();
                for raw_name in &candidate.mentioned_concept_names {
                    let normalized_name = normalize_name(raw_name);
                    match resolve_concept_by_normalized_name(store, scope, &normalized_name) {
                        Ok(concept) => mentions.push(concept.node_id.as_str().to_string()),
                        Err(_) => errors.push(format!("unmatched mention: {normalized_name}")),
                    }
                }
                let claim = create_claim(
                    store,
                    scope,
                    ClaimInput {
                        text: candidate.text,
                        confidence: candidate.confidence,
                        method: "llm".to_string(),
                        source_id: document.doc_id.as_str().to_string(),
                        source_span: candidate.source_span,
                        chunk_id: chunk.chunk_id.as_str().to_string(),
                        embedding,
                        mentions: mentions.clone(),
                    },
                )?;
                summary.claims_created += 1;
                summary.mentions_created += mentions.len();
                let _ = claim;
            }
        }
    }

    // Lecture extraction: propose Concepts/Relationships via the LLM collaborator.
    if actions.run_lecture_extraction && !policy.local_only {
        let relations = llm.extract_relations(&input.text).await;
        for relation in relations {
            let src = resolve_concept_ref(store, scope, &relation.source_name);
            let dst = resolve_concept_ref(store, scope, &relation.target_name);
            match (src, dst) {
                (Ok(s), Ok(d)) => {
                    create_relationship(
                        store,
                        scope,
                        s.node_id.as_str(),
                        d.node_id.as_str(),
                        &relation.predicate,
                        RelationshipAttrs {
                            confidence: Some(relation.confidence),
                            method: Some(crate::entities::model::RelationshipMethod::Llm),
                            rationale: relation.rationale,
                            ingestion_run_id: Some(run_id.to_string()),
                            ..Default::default()
                        },
                    )?;
                }
                _ => errors.push(format!(
                    "could not resolve relation {} -> {}",
                    relation.source_name, relation.target_name
                )),
            }
        }
    }

    set_document_status(store, &document.doc_id, DocumentStatus::Ingested, Some(&content_hash))?;

    let status = if !errors.is_empty() {
        IngestionStatus::Partial
    } else {
        IngestionStatus::Completed
    };

    Ok(IngestionResult {
        run_id: run_id.to_string(),
        status,
        summary_counts: summary,
        errors,
        artifact_id,
    })
}

fn skipped(run_id: &str, reason: &str) -> IngestionResult {
    IngestionResult {
        run_id: run_id.to_string(),
        status: IngestionStatus::Skipped,
        summary_counts: SummaryCounts::default(),
        errors: vec![reason.to_string()],
        artifact_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{ExtractedClaim, NullLlmCollaborator};
    use crate::config::EngineConfig;
    use crate::entities::concept::{create_concept, ConceptInput};
    use crate::scope::ScopeResolver;
    use async_trait::async_trait;

    fn scope(store: &Store) -> ActiveScope {
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(store, &config);
        resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap()
    }

    struct FixedClaimLlm;

    #[async_trait]
    impl LlmCollaborator for FixedClaimLlm {
        async fn extract_claims(&self, _chunk_text: &str) -> Vec<ExtractedClaim> {
            vec![ExtractedClaim {
                text: "Acme raised $5M".into(),
                confidence: 0.9,
                source_span: None,
                mentioned_concept_names: vec!["Acme".into(), "Ghost Co".into()],
            }]
        }
        async fn extract_relations(&self, _chunk_text: &str) -> Vec<crate::collaborators::ExtractedRelation> {
            Vec::new()
        }
        async fn classify_intent(&self, _message: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test]
    async fn reingesting_identical_content_is_skipped_as_already_ingested() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let llm = NullLlmCollaborator;
        let input = ArtifactInput {
            artifact_type: "webpage".into(),
            source_url: "https://x.test/page".into(),
            external_id: "x-page".into(),
            text: "Some stable content.".into(),
            ..Default::default()
        };
        let actions = IngestionActions { create_artifact_node: true, ..Default::default() };

        let first = ingest(&store, &scope, input.clone(), actions.clone(), IngestionPolicy::default(), &llm).await.unwrap();
        assert_eq!(first.status, IngestionStatus::Completed);

        let second = ingest(&store, &scope, input, actions, IngestionPolicy::default(), &llm).await.unwrap();
        assert_eq!(second.status, IngestionStatus::Skipped);
    }

    #[tokio::test]
    async fn only_resolved_mentions_produce_links_unmatched_names_are_not_auto_created() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        create_concept(&store, &scope, ConceptInput { name: "Acme".into(), node_type: "Company".into(), ..Default::default() }).unwrap();

        let llm = FixedClaimLlm;
        let input = ArtifactInput {
            artifact_type: "webpage".into(),
            source_url: "https://x.test/news".into(),
            external_id: "news-1".into(),
            text: "Acme raised funding from Ghost Co this week.".into(),
            ..Default::default()
        };
        let actions = IngestionActions { run_chunk_and_claims: true, ..Default::default() };

        let result = ingest(&store, &scope, input, actions, IngestionPolicy::default(), &llm).await.unwrap();
        assert_eq!(result.summary_counts.claims_created, 1);
        assert_eq!(result.summary_counts.mentions_created, 1);
        assert_eq!(result.status, IngestionStatus::Partial);
    }
}
