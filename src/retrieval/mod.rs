//! GraphRAG-style retrieval: classify intent, run the matching
//! plan, filter the evidence it gathered, and return it alongside a trace
//! of every step taken.

pub mod filters;
pub mod intent;
pub mod plans;
pub mod trace;

use crate::collaborators::{EmbeddingCollaborator, LlmCollaborator};
use crate::entities::model::{Claim, Community, Concept, Relationship};
use crate::entities::source::get_document;
use crate::error::EngineResult;
use crate::ids::{ClaimId, CommunityId, SourceDocumentId};
use crate::scope::ActiveScope;
use crate::store::Store;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use filters::RetrievalFilters;
use intent::{classify_intent, Intent, IntentClassification};
use trace::{RetrievalTraceStep, Trace};

const PLAN_VERSION: &str = "retrieval-plan-v1";

/// The evidence a plan gathered, trimmed to `filters.detail_level`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalContext {
    pub focus_concepts: Vec<Concept>,
    pub edges: Vec<Relationship>,
    pub claims: Vec<Claim>,
    pub communities: Vec<Community>,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub intent: IntentClassification,
    pub trace: Vec<RetrievalTraceStep>,
    pub context: RetrievalContext,
    pub plan_version: &'static str,
}

fn claim_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"CLAIM_[0-9a-fA-F]{8}").unwrap())
}

fn community_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"COMM_[0-9a-fA-F]{8}").unwrap())
}

/// The `published_at` of the SourceDocument backing `claim`, if it has one
/// and it parses — needed for `filters::claim_passes`'s `recency_days`
/// check, which is otherwise a silent no-op.
fn published_at_for_claim(store: &Store, claim: &Claim) -> Option<chrono::DateTime<chrono::Utc>> {
    let doc = get_document(store, &SourceDocumentId::from_string(claim.source_id.clone())).ok()?;
    let published_at = doc.published_at?;
    chrono::DateTime::parse_from_rfc3339(&published_at)
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

/// Runs retrieval for `message` under `scope`: classifies intent, executes
/// the matching plan, applies `filters`, and returns the assembled
/// evidence with its trace.
pub async fn retrieve(
    store: &Store,
    scope: &ActiveScope,
    message: &str,
    known_concept_names: &[String],
    filters: &RetrievalFilters,
    llm: &dyn LlmCollaborator,
    embeddings: &dyn EmbeddingCollaborator,
) -> EngineResult<RetrievalResult> {
    let mut trace = Trace::default();
    let classification = classify_intent(message, known_concept_names, llm).await;
    trace.push(
        "classify_intent",
        serde_json::json!({"message": message}),
        serde_json::json!({"intent": classification.intent.as_str(), "confidence": classification.confidence}),
    );

    let output = match classification.intent {
        Intent::ConceptLookup => {
            let name = known_concept_names
                .iter()
                .find(|n| message.to_lowercase().contains(&n.to_lowercase()))
                .cloned()
                .unwrap_or_else(|| message.to_string());
            plans::concept_lookup(store, scope, &mut trace, &name)?
        }
        Intent::SemanticSearch | Intent::General => {
            plans::semantic_search(store, scope, &mut trace, message, embeddings).await?
        }
        Intent::TickerQuery => plans::ticker_query(store, scope, &mut trace, message, filters)?,
        Intent::CommunitySummary => match community_id_re().find(message) {
            Some(m) => {
                let community_id = CommunityId::from_string(m.as_str());
                plans::community_summary(store, scope, &community_id)?
            }
            None => plans::semantic_search(store, scope, &mut trace, message, embeddings).await?,
        },
        Intent::EvidenceForClaim => match claim_id_re().find(message) {
            Some(m) => {
                let claim_id = ClaimId::from_string(m.as_str());
                plans::evidence_for_claim(store, scope, &mut trace, &claim_id)?
            }
            None => plans::semantic_search(store, scope, &mut trace, message, embeddings).await?,
        },
        Intent::CrossGraph => plans::semantic_search(store, scope, &mut trace, message, embeddings).await?,
    };

    let now = chrono::Utc::now();
    let mut claims: Vec<Claim> = output
        .claims
        .into_iter()
        .filter(|c| {
            let published_at = published_at_for_claim(store, c);
            filters::claim_passes(
                filters,
                c.confidence,
                c.status == crate::entities::model::ClaimStatus::Stale,
                published_at,
                now,
            )
        })
        .collect();
    let mut edges = output.edges;
    let mut focus_concepts = output.focus_concepts;
    let communities = output.communities;

    let limits = filters.detail_level.limits();
    let truncated = claims.len() > limits.claims
        || edges.len() > limits.edges
        || focus_concepts.len() > limits.focus_entities;

    claims.truncate(limits.claims);
    for claim in claims.iter_mut() {
        if claim.text.len() > limits.claim_text_chars {
            claim.text.truncate(limits.claim_text_chars);
        }
    }
    edges.truncate(limits.edges);
    focus_concepts.truncate(limits.focus_entities);

    trace.push(
        "assemble_context",
        serde_json::json!({"detail_level": format!("{:?}", filters.detail_level)}),
        serde_json::json!({
            "focus_concepts": focus_concepts.len(),
            "edges": edges.len(),
            "claims": claims.len(),
            "communities": communities.len(),
        }),
    );

    let summary_mode = matches!(filters.detail_level, filters::DetailLevel::Summary);
    Ok(RetrievalResult {
        intent: classification,
        trace: trace.finish(summary_mode),
        context: RetrievalContext {
            focus_concepts,
            edges,
            claims,
            communities,
            truncated,
        },
        plan_version: PLAN_VERSION,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{HashingEmbeddingCollaborator, NullLlmCollaborator};
    use crate::config::EngineConfig;
    use crate::entities::concept::{create_concept, ConceptInput};
    use crate::entities::relationship::{create_relationship, RelationshipAttrs};
    use crate::entities::model::RelationshipStatus;
    use crate::scope::ScopeResolver;

    fn scope(store: &Store) -> ActiveScope {
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(store, &config);
        resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap()
    }

    #[tokio::test]
    async fn concept_lookup_retrieval_returns_neighbors() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let a = create_concept(&store, &scope, ConceptInput { name: "Acme Corp".into(), node_type: "Company".into(), ..Default::default() }).unwrap();
        let b = create_concept(&store, &scope, ConceptInput { name: "Beta Inc".into(), node_type: "Company".into(), ..Default::default() }).unwrap();
        create_relationship(
            &store,
            &scope,
            a.node_id.as_str(),
            b.node_id.as_str(),
            "PARTNERS_WITH",
            RelationshipAttrs { status: Some(RelationshipStatus::Accepted), ..Default::default() },
        )
        .unwrap();

        let filters = RetrievalFilters::default();
        let result = retrieve(
            &store,
            &scope,
            "tell me about Acme Corp",
            &["Acme Corp".to_string()],
            &filters,
            &NullLlmCollaborator,
            &HashingEmbeddingCollaborator::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.intent.intent, Intent::ConceptLookup);
        assert_eq!(result.context.focus_concepts.len(), 1);
        assert_eq!(result.context.edges.len(), 1);
        assert!(!result.trace.is_empty());
    }

    #[tokio::test]
    async fn unmatched_message_falls_back_to_semantic_search() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        create_concept(&store, &scope, ConceptInput { name: "Gamma Holdings".into(), node_type: "Company".into(), ..Default::default() }).unwrap();

        let filters = RetrievalFilters::default();
        let result = retrieve(
            &store,
            &scope,
            "who are the major players in fintech",
            &[],
            &filters,
            &NullLlmCollaborator,
            &HashingEmbeddingCollaborator::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.intent.intent, Intent::SemanticSearch);
        assert!(!result.context.focus_concepts.is_empty());
    }

    #[tokio::test]
    async fn recency_filter_drops_claims_from_stale_source_documents() {
        use crate::entities::claim::create_claim;
        use crate::entities::claim::ClaimInput;
        use crate::entities::model::DocumentSource;
        use crate::entities::source::get_or_create_document;

        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let doc = get_or_create_document(&store, &scope, DocumentSource::Web, "old-doc", None).unwrap();
        let old_published_at = (chrono::Utc::now() - chrono::Duration::days(400)).to_rfc3339();
        store
            .with_conn(|conn| {
                conn.execute(
                    "UPDATE source_documents SET published_at = ?1 WHERE doc_id = ?2",
                    rusqlite::params![old_published_at, doc.doc_id.as_str()],
                )
            })
            .unwrap();
        let claim = create_claim(
            &store,
            &scope,
            ClaimInput {
                text: "an old claim".into(),
                confidence: 0.9,
                method: "llm".into(),
                source_id: doc.doc_id.as_str().to_string(),
                source_span: None,
                chunk_id: "CHUNK_1".into(),
                embedding: None,
                mentions: vec![],
            },
        )
        .unwrap();

        let message = format!("https://x.test evidence for {}", claim.claim_id.as_str());

        let permissive = retrieve(
            &store,
            &scope,
            &message,
            &[],
            &RetrievalFilters::default(),
            &NullLlmCollaborator,
            &HashingEmbeddingCollaborator::default(),
        )
        .await
        .unwrap();
        assert_eq!(permissive.context.claims.len(), 1);

        let strict = retrieve(
            &store,
            &scope,
            &message,
            &[],
            &RetrievalFilters { recency_days: Some(30), ..Default::default() },
            &NullLlmCollaborator,
            &HashingEmbeddingCollaborator::default(),
        )
        .await
        .unwrap();
        assert!(strict.context.claims.is_empty());
    }
}
