//! Per-intent plan executors.

use crate::collaborators::{cosine_similarity, EmbeddingCollaborator};
use crate::entities::claim::get_claim;
use crate::entities::community::{communities_for_node, get_community};
use crate::entities::concept::resolve_concept_ref;
use crate::entities::model::{Claim, Community, Concept, Relationship};
use crate::entities::relationship::get_neighbors;
use crate::error::EngineResult;
use crate::ids::ClaimId;
use crate::scope::ActiveScope;
use crate::store::Store;
use regex::Regex;
use std::sync::OnceLock;

use super::filters::RetrievalFilters;
use super::trace::Trace;

const DEFAULT_NEIGHBOR_LIMIT: usize = 80;
const DEFAULT_SEMANTIC_TOP_K: usize = 10;

/// Plain aggregate of everything a plan gathered, before filters and
/// detail-level trimming are applied in `assemble`.
#[derive(Debug, Clone, Default)]
pub struct PlanOutput {
    pub focus_concepts: Vec<Concept>,
    pub edges: Vec<Relationship>,
    pub claims: Vec<Claim>,
    pub communities: Vec<Community>,
}

/// *concept_lookup*: resolve by exact name, then 1-hop neighbors,
/// ACCEPTED edges only.
pub fn concept_lookup(
    store: &Store,
    scope: &ActiveScope,
    trace: &mut Trace,
    name: &str,
) -> EngineResult<PlanOutput> {
    let concept = resolve_concept_ref(store, scope, name)?;
    trace.push(
        "resolve_concept",
        serde_json::json!({"name": name}),
        serde_json::json!({"found": 1}),
    );
    let edges = get_neighbors(store, scope, concept.node_id.as_str(), crate::scope::IncludeProposed::Exclude)?;
    let limited: Vec<_> = edges.into_iter().take(DEFAULT_NEIGHBOR_LIMIT).collect();
    trace.push(
        "neighbors",
        serde_json::json!({"hops": 1, "limit": DEFAULT_NEIGHBOR_LIMIT}),
        serde_json::json!({"edges": limited.len()}),
    );
    Ok(PlanOutput {
        focus_concepts: vec![concept],
        edges: limited,
        ..Default::default()
    })
}

/// *semantic_search*: embed the query, rank concepts by cosine similarity
/// to the query embedding, then expand each top match via its neighbors.
pub async fn semantic_search(
    store: &Store,
    scope: &ActiveScope,
    trace: &mut Trace,
    query: &str,
    embeddings: &dyn EmbeddingCollaborator,
) -> EngineResult<PlanOutput> {
    let query_embedding = embeddings.embed(query).await;
    let candidates: Vec<Concept> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM concepts WHERE graph_id = ?1 AND coalesce(is_merged, 0) = 0",
        )?;
        stmt.query_map([scope.graph_id.as_str()], crate::entities::row_to_concept)?
            .collect::<rusqlite::Result<Vec<_>>>()
    })?;

    let mut scored: Vec<(f64, Concept)> = Vec::with_capacity(candidates.len());
    for concept in candidates {
        let embedding = embeddings.embed(&concept.name).await;
        scored.push((cosine_similarity(&query_embedding, &embedding), concept));
    }
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    let top: Vec<Concept> = scored.into_iter().take(DEFAULT_SEMANTIC_TOP_K).map(|(_, c)| c).collect();
    trace.push(
        "semantic_rank",
        serde_json::json!({"top_k": DEFAULT_SEMANTIC_TOP_K}),
        serde_json::json!({"candidates": top.len()}),
    );

    let mut edges = Vec::new();
    for concept in &top {
        edges.extend(get_neighbors(store, scope, concept.node_id.as_str(), crate::scope::IncludeProposed::Auto)?);
    }
    trace.push(
        "expand_neighbors",
        serde_json::json!({}),
        serde_json::json!({"edges": edges.len()}),
    );
    Ok(PlanOutput {
        focus_concepts: top,
        edges,
        ..Default::default()
    })
}

fn ticker_detect_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Z]{1,5}):\s*(.*)$").unwrap())
}

/// *ticker_query*: detect the ticker, resolve its anchor Company concept,
/// pull relevant Communities and Claims filtered by ticker and the active
/// filters, and assemble the evidence subgraph.
pub fn ticker_query(
    store: &Store,
    scope: &ActiveScope,
    trace: &mut Trace,
    message: &str,
    filters: &RetrievalFilters,
) -> EngineResult<PlanOutput> {
    let captures = ticker_detect_re().captures(message);
    let ticker = captures
        .as_ref()
        .map(|c| c[1].to_string())
        .unwrap_or_default();
    let residual_query = captures.map(|c| c[2].to_string()).unwrap_or_else(|| message.to_string());
    trace.push(
        "detect_ticker",
        serde_json::json!({"message": message}),
        serde_json::json!({"ticker": ticker}),
    );

    let anchor = resolve_concept_ref(store, scope, &ticker)?;
    trace.push(
        "resolve_anchor_company",
        serde_json::json!({"ticker": ticker}),
        serde_json::json!({"found": 1}),
    );

    let community_ids = communities_for_node(store, anchor.node_id.as_str())?;
    let mut communities = Vec::new();
    for id in &community_ids {
        communities.push(get_community(store, id)?);
    }
    trace.push(
        "fetch_communities",
        serde_json::json!({"residual_query": residual_query}),
        serde_json::json!({"communities": communities.len()}),
    );

    let mut claims = Vec::new();
    for community in &communities {
        for node_id in &community.member_node_ids {
            let claim_ids: Vec<ClaimId> = store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT claim_id FROM claim_mentions WHERE node_id = ?1",
                )?;
                stmt.query_map([node_id], |row| row.get::<_, String>(0))?
                    .map(|r| r.map(ClaimId::from_string))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })?;
            for id in claim_ids {
                if let Ok(claim) = get_claim(store, &id) {
                    if claim.confidence >= filters.evidence_strictness.confidence_threshold()
                        && claim.status != crate::entities::model::ClaimStatus::Stale
                    {
                        claims.push(claim);
                    }
                }
            }
        }
    }
    trace.push(
        "fetch_claims",
        serde_json::json!({"strictness": format!("{:?}", filters.evidence_strictness)}),
        serde_json::json!({"claims": claims.len()}),
    );

    Ok(PlanOutput {
        focus_concepts: vec![anchor],
        claims,
        communities,
        ..Default::default()
    })
}

/// *community_summary*: fetch a Community's summary text and member
/// concepts.
pub fn community_summary(
    store: &Store,
    scope: &ActiveScope,
    community_id: &crate::ids::CommunityId,
) -> EngineResult<PlanOutput> {
    let community = get_community(store, community_id)?;
    let mut members = Vec::new();
    for node_id in &community.member_node_ids {
        if let Ok(concept) = resolve_concept_ref(store, scope, node_id) {
            members.push(concept);
        }
    }
    Ok(PlanOutput {
        focus_concepts: members,
        communities: vec![community],
        ..Default::default()
    })
}

/// *evidence_for_claim*: fetch a Claim, its source chunk/artifact
/// lineage, and the Concepts (plus their neighbors) it mentions.
pub fn evidence_for_claim(
    store: &Store,
    scope: &ActiveScope,
    trace: &mut Trace,
    claim_id: &ClaimId,
) -> EngineResult<PlanOutput> {
    let claim = get_claim(store, claim_id)?;
    trace.push(
        "fetch_claim",
        serde_json::json!({"claim_id": claim_id.as_str()}),
        serde_json::json!({"found": 1}),
    );

    let mut focus_concepts = Vec::new();
    let mut edges = Vec::new();
    for node_id in &claim.mentions {
        if let Ok(concept) = resolve_concept_ref(store, scope, node_id) {
            edges.extend(get_neighbors(store, scope, concept.node_id.as_str(), crate::scope::IncludeProposed::Exclude)?);
            focus_concepts.push(concept);
        }
    }
    trace.push(
        "expand_mentions",
        serde_json::json!({}),
        serde_json::json!({"concepts": focus_concepts.len(), "edges": edges.len()}),
    );

    Ok(PlanOutput {
        focus_concepts,
        edges,
        claims: vec![claim],
        ..Default::default()
    })
}
