//! Merge candidate generation and execution.
//!
//! Candidate generation blocks by a normalized-name prefix key, scores
//! candidate pairs with a hybrid string+embedding signal, and caps both
//! per-node fan-out and the total pair budget so generation stays bounded
//! on large graphs.

use super::model::{Concept, MergeCandidate, MergeCandidateStatus};
use crate::collaborators::{cosine_similarity, EmbeddingCollaborator};
use crate::error::{EngineError, EngineResult};
use crate::ids::MergeCandidateId;
use crate::scope::ActiveScope;
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

const TOP_K_PER_NODE: usize = 3;
const SCORE_THRESHOLD: f64 = 0.82;
const LIMIT_PAIRS: usize = 3000;
const STRING_WEIGHT: f64 = 0.4;
const EMBEDDING_WEIGHT: f64 = 0.6;

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// First 3 characters of the normalized name, the blocking key candidates
/// are grouped by before any pairwise scoring happens.
pub fn blocking_key(name: &str) -> String {
    let normalized = normalize_name(name);
    normalized.chars().take(3).collect()
}

/// Token-set overlap ratio in `[0, 1]`: `2 * |A ∩ B| / (|A| + |B|)`.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let tokens_a: HashSet<&str> = normalize_name(a).split(' ').filter(|s| !s.is_empty()).collect();
    let tokens_b: HashSet<&str> = normalize_name(b).split(' ').filter(|s| !s.is_empty()).collect();
    if tokens_a.is_empty() || tokens_b.is_empty() {
        return if normalize_name(a) == normalize_name(b) { 1.0 } else { 0.0 };
    }
    let intersection = tokens_a.intersection(&tokens_b).count();
    (2.0 * intersection as f64) / (tokens_a.len() + tokens_b.len()) as f64
}

/// `0.4 * string_similarity + 0.6 * embedding_similarity`, falling back to
/// string-only scoring (method `"string"`) when no embeddings are
/// available for one or both concepts.
pub fn compute_hybrid_score(
    a: &Concept,
    b: &Concept,
    embedding_a: Option<&[f32]>,
    embedding_b: Option<&[f32]>,
) -> (f64, &'static str) {
    let string_score = string_similarity(&a.name, &b.name);
    match (embedding_a, embedding_b) {
        (Some(ea), Some(eb)) => {
            let embedding_score = cosine_similarity(ea, eb);
            (
                STRING_WEIGHT * string_score + EMBEDDING_WEIGHT * embedding_score,
                "hybrid",
            )
        }
        _ => (string_score, "string"),
    }
}

/// `"MERGE_" + sha256(graph_id + min(id) + max(id)).hex[:16].upper()`,
/// i.e. order-independent in `(src, dst)` so the same pair never produces
/// two candidates.
pub fn candidate_id(graph_id: &str, node_a: &str, node_b: &str) -> MergeCandidateId {
    let (lo, hi) = if node_a < node_b { (node_a, node_b) } else { (node_b, node_a) };
    let mut hasher = Sha256::new();
    hasher.update(graph_id.as_bytes());
    hasher.update(lo.as_bytes());
    hasher.update(hi.as_bytes());
    let digest = hasher.finalize();
    let hex = hex::encode(digest);
    MergeCandidateId::from_string(format!("MERGE_{}", hex[..16].to_uppercase()))
}

fn row_to_concept_light(row: &Row) -> rusqlite::Result<Concept> {
    Ok(Concept {
        node_id: crate::ids::ConceptId::from_string(row.get::<_, String>("node_id")?),
        graph_id: row.get("graph_id")?,
        name: row.get("name")?,
        domain: row.get("domain")?,
        node_type: row.get("node_type")?,
        description: row.get("description")?,
        tags: Vec::new(),
        alias_names: Vec::new(),
        merged_node_ids: Vec::new(),
        is_merged: false,
        merged_into: None,
        merged_at: None,
        on_branches: Vec::new(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Generates (and persists) merge candidates for every pair of live
/// Concepts in the current graph that block together and score at or
/// above threshold, capped at `TOP_K_PER_NODE` candidates per node and
/// `LIMIT_PAIRS` total comparisons.
pub async fn generate_merge_candidates(
    store: &Store,
    scope: &ActiveScope,
    embeddings: &dyn EmbeddingCollaborator,
) -> EngineResult<Vec<MergeCandidate>> {
    let concepts: Vec<Concept> = store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM concepts WHERE graph_id = ?1 AND coalesce(is_merged, 0) = 0",
        )?;
        stmt.query_map([scope.graph_id.as_str()], row_to_concept_light)?
            .collect::<rusqlite::Result<Vec<_>>>()
    })?;

    let mut blocks: std::collections::HashMap<String, Vec<usize>> = std::collections::HashMap::new();
    for (i, c) in concepts.iter().enumerate() {
        blocks.entry(blocking_key(&c.name)).or_default().push(i);
    }

    let mut embedding_cache: Vec<Option<Vec<f32>>> = Vec::with_capacity(concepts.len());
    for c in &concepts {
        embedding_cache.push(Some(embeddings.embed(&c.name).await));
    }

    let mut pair_count = 0usize;
    let mut per_node_counts: Vec<usize> = vec![0; concepts.len()];
    let mut scored: Vec<(f64, &'static str, usize, usize)> = Vec::new();

    'blocks: for indices in blocks.values() {
        for a in 0..indices.len() {
            for b in (a + 1)..indices.len() {
                if pair_count >= LIMIT_PAIRS {
                    break 'blocks;
                }
                pair_count += 1;
                let (i, j) = (indices[a], indices[b]);
                if per_node_counts[i] >= TOP_K_PER_NODE && per_node_counts[j] >= TOP_K_PER_NODE {
                    continue;
                }
                let (score, method) = compute_hybrid_score(
                    &concepts[i],
                    &concepts[j],
                    embedding_cache[i].as_deref(),
                    embedding_cache[j].as_deref(),
                );
                if score >= SCORE_THRESHOLD {
                    scored.push((score, method, i, j));
                    per_node_counts[i] += 1;
                    per_node_counts[j] += 1;
                }
            }
        }
    }

    let now = Utc::now().to_rfc3339();
    let mut created = Vec::with_capacity(scored.len());
    for (score, method, i, j) in scored {
        let (src, dst) = if concepts[i].node_id.as_str() < concepts[j].node_id.as_str() {
            (&concepts[i], &concepts[j])
        } else {
            (&concepts[j], &concepts[i])
        };
        let id = candidate_id(scope.graph_id.as_str(), src.node_id.as_str(), dst.node_id.as_str());
        store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO merge_candidates \
                    (candidate_id, graph_id, src_node_id, dst_node_id, score, method, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(graph_id, candidate_id) DO UPDATE SET score = excluded.score",
                params![
                    id.as_str(), scope.graph_id.as_str(), src.node_id.as_str(), dst.node_id.as_str(),
                    score, method, MergeCandidateStatus::Proposed.as_str(), now
                ],
            )
        })?;
        created.push(MergeCandidate {
            candidate_id: id,
            graph_id: scope.graph_id.as_str().to_string(),
            src_node_id: src.node_id.as_str().to_string(),
            dst_node_id: dst.node_id.as_str().to_string(),
            score,
            method: method.to_string(),
            rationale: None,
            status: MergeCandidateStatus::Proposed,
            reviewed_by: None,
            reviewed_at: None,
            created_at: now.clone(),
        });
    }
    Ok(created)
}

/// Outcome of [`merge_concepts`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub redirected: usize,
    pub skipped: usize,
    pub deleted: usize,
}

/// Executes the five-step merge algorithm atomically:
/// validate both concepts are live and on the same branch, re-home every
/// edge incident to `drop` onto `keep` (skipping true duplicates and
/// accumulating their `on_branches`), combine descriptive fields, tombstone
/// `drop`, and drop its old incident edges.
pub fn merge_concepts(
    store: &Store,
    scope: &ActiveScope,
    keep_id: &str,
    drop_id: &str,
    reviewer: &str,
) -> EngineResult<MergeOutcome> {
    if keep_id == drop_id {
        return Err(EngineError::Invalid("cannot merge a concept into itself".into()));
    }
    store.transaction(|tx| {
        let (keep_live, keep_branches_json): (i64, String) = tx.query_row(
            "SELECT coalesce(is_merged,0), on_branches_json FROM concepts WHERE node_id = ?1 AND graph_id = ?2",
            params![keep_id, scope.graph_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (drop_live, drop_name, drop_desc, drop_tags_json, drop_alias_json, drop_merged_json, drop_branches_json): (
            i64, String, Option<String>, String, String, String, String,
        ) = tx.query_row(
            "SELECT coalesce(is_merged,0), name, description, tags_json, alias_names_json, merged_node_ids_json, on_branches_json \
             FROM concepts WHERE node_id = ?1 AND graph_id = ?2",
            params![drop_id, scope.graph_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?, row.get(6)?)),
        )?;
        if keep_live != 0 || drop_live != 0 {
            return Err(rusqlite::Error::ExecuteReturnedResults);
        }
        let keep_branches: HashSet<String> = serde_json::from_str(&keep_branches_json).unwrap_or_default();
        let drop_branches: HashSet<String> = serde_json::from_str(&drop_branches_json).unwrap_or_default();
        if keep_branches.is_disjoint(&drop_branches) {
            return Err(rusqlite::Error::ExecuteReturnedResults);
        }

        let mut redirected = 0usize;
        let mut skipped = 0usize;

        let mut stmt = tx.prepare(
            "SELECT id, source_id, target_id, predicate, on_branches_json FROM relationships \
             WHERE graph_id = ?1 AND (source_id = ?2 OR target_id = ?2)",
        )?;
        let incident: Vec<(String, String, String, String, String)> = stmt
            .query_map(params![scope.graph_id.as_str(), drop_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        for (edge_id, source_id, target_id, predicate, branches_json) in incident {
            let new_source = if source_id == drop_id { keep_id.to_string() } else { source_id.clone() };
            let new_target = if target_id == drop_id { keep_id.to_string() } else { target_id.clone() };
            let equivalent: Option<String> = tx
                .query_row(
                    "SELECT id FROM relationships WHERE graph_id = ?1 AND source_id = ?2 \
                     AND target_id = ?3 AND predicate = ?4 AND id != ?5",
                    params![scope.graph_id.as_str(), new_source, new_target, predicate, edge_id],
                    |row| row.get(0),
                )
                .optional()?;
            match equivalent {
                Some(other_id) => {
                    let other_branches_json: String = tx.query_row(
                        "SELECT on_branches_json FROM relationships WHERE id = ?1",
                        [&other_id],
                        |row| row.get(0),
                    )?;
                    let mut other_branches: HashSet<String> =
                        serde_json::from_str(&other_branches_json).unwrap_or_default();
                    let this_branches: HashSet<String> =
                        serde_json::from_str(&branches_json).unwrap_or_default();
                    other_branches.extend(this_branches);
                    let merged_json = serde_json::to_string(&other_branches)
                        .map_err(|_| rusqlite::Error::ExecuteReturnedResults)?;
                    tx.execute(
                        "UPDATE relationships SET on_branches_json = ?1 WHERE id = ?2",
                        params![merged_json, other_id],
                    )?;
                    tx.execute("DELETE FROM relationships WHERE id = ?1", [&edge_id])?;
                    skipped += 1;
                }
                None => {
                    tx.execute(
                        "UPDATE relationships SET source_id = ?1, target_id = ?2 WHERE id = ?3",
                        params![new_source, new_target, edge_id],
                    )?;
                    redirected += 1;
                }
            }
        }

        let keep_desc: Option<String> = tx.query_row(
            "SELECT description FROM concepts WHERE node_id = ?1",
            [keep_id],
            |row| row.get(0),
        )?;
        let combined_desc = match (keep_desc, drop_desc) {
            (Some(k), Some(d)) if !k.contains(&d) => Some(format!("{k}\n{d}")),
            (Some(k), _) => Some(k),
            (None, d) => d,
        };
        let keep_tags_json: String = tx.query_row(
            "SELECT tags_json FROM concepts WHERE node_id = ?1", [keep_id], |row| row.get(0),
        )?;
        let mut tags: HashSet<String> = serde_json::from_str(&keep_tags_json).unwrap_or_default();
        tags.extend(serde_json::from_str::<Vec<String>>(&drop_tags_json).unwrap_or_default());
        let keep_alias_json: String = tx.query_row(
            "SELECT alias_names_json FROM concepts WHERE node_id = ?1", [keep_id], |row| row.get(0),
        )?;
        let mut aliases: Vec<String> = serde_json::from_str(&keep_alias_json).unwrap_or_default();
        aliases.push(drop_name);
        let keep_merged_json: String = tx.query_row(
            "SELECT merged_node_ids_json FROM concepts WHERE node_id = ?1", [keep_id], |row| row.get(0),
        )?;
        let mut merged_ids: Vec<String> = serde_json::from_str(&keep_merged_json).unwrap_or_default();
        merged_ids.push(drop_id.to_string());
        merged_ids.extend(serde_json::from_str::<Vec<String>>(&drop_merged_json).unwrap_or_default());

        let now = Utc::now().to_rfc3339();
        tx.execute(
            "UPDATE concepts SET description = ?1, tags_json = ?2, alias_names_json = ?3, \
             merged_node_ids_json = ?4, updated_at = ?5 WHERE node_id = ?6",
            params![
                combined_desc,
                serde_json::to_string(&tags).map_err(|_| rusqlite::Error::ExecuteReturnedResults)?,
                serde_json::to_string(&aliases).map_err(|_| rusqlite::Error::ExecuteReturnedResults)?,
                serde_json::to_string(&merged_ids).map_err(|_| rusqlite::Error::ExecuteReturnedResults)?,
                now,
                keep_id,
            ],
        )?;
        tx.execute(
            "UPDATE concepts SET is_merged = 1, merged_into = ?1, merged_at = ?2 WHERE node_id = ?3",
            params![keep_id, now, drop_id],
        )?;
        tx.execute(
            "INSERT INTO audit_log (id, graph_id, actor, action, target_kind, target_id, detail_json, created_at) \
             VALUES (?1, ?2, ?3, 'merge_concepts', 'Concept', ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                scope.graph_id.as_str(),
                reviewer,
                drop_id,
                serde_json::json!({"keep": keep_id, "redirected": redirected, "skipped": skipped}).to_string(),
                now,
            ],
        )?;

        Ok(MergeOutcome { redirected, skipped, deleted: 1 })
    }).map_err(|e| match e {
        EngineError::Internal(msg) if msg.contains("ExecuteReturnedResults") || msg.is_empty() => {
            EngineError::Conflict("both concepts must be live and share a branch".into())
        }
        other => other,
    })
}

fn row_to_merge_candidate(row: &Row) -> rusqlite::Result<MergeCandidate> {
    Ok(MergeCandidate {
        candidate_id: MergeCandidateId::from_string(row.get::<_, String>("candidate_id")?),
        graph_id: row.get("graph_id")?,
        src_node_id: row.get("src_node_id")?,
        dst_node_id: row.get("dst_node_id")?,
        score: row.get("score")?,
        method: row.get("method")?,
        rationale: row.get("rationale")?,
        status: MergeCandidateStatus::parse(&row.get::<_, String>("status")?),
        reviewed_by: row.get("reviewed_by")?,
        reviewed_at: row.get("reviewed_at")?,
        created_at: row.get("created_at")?,
    })
}

/// Merge candidates in `graph_id`, optionally narrowed to one `status`.
pub fn list_candidates(
    store: &Store,
    graph_id: &str,
    status: Option<MergeCandidateStatus>,
) -> EngineResult<Vec<MergeCandidate>> {
    let graph_id = graph_id.to_string();
    let status_str = status.map(|s| s.as_str().to_string());
    store.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM merge_candidates WHERE graph_id = ?1 AND (?2 IS NULL OR status = ?2) \
             ORDER BY score DESC",
        )?;
        stmt.query_map(params![graph_id, status_str], row_to_merge_candidate)?
            .collect::<rusqlite::Result<Vec<_>>>()
    })
}

pub fn get_candidate(store: &Store, candidate_id: &MergeCandidateId) -> EngineResult<MergeCandidate> {
    store
        .with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM merge_candidates WHERE candidate_id = ?1",
                [candidate_id.as_str()],
                row_to_merge_candidate,
            )
        })
        .map_err(|e| match e {
            EngineError::NotFound(_) => {
                EngineError::NotFound(format!("merge candidate {} not found", candidate_id))
            }
            other => other,
        })
}

/// Moves a candidate from `PROPOSED` to `ACCEPTED` or `REJECTED`,
/// stamping the reviewer. Re-reviewing an already-decided candidate is a
/// state-machine violation.
fn set_candidate_status(
    store: &Store,
    candidate_id: &MergeCandidateId,
    next: MergeCandidateStatus,
    reviewer: &str,
) -> EngineResult<MergeCandidate> {
    let current = get_candidate(store, candidate_id)?;
    if current.status != MergeCandidateStatus::Proposed {
        return Err(EngineError::Conflict(format!(
            "merge candidate {} is already {}",
            candidate_id,
            current.status.as_str()
        )));
    }
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE merge_candidates SET status = ?1, reviewed_by = ?2, reviewed_at = ?3 \
             WHERE candidate_id = ?4",
            params![next.as_str(), reviewer, now, candidate_id.as_str()],
        )
    })?;
    get_candidate(store, candidate_id)
}

pub fn accept_candidate(
    store: &Store,
    candidate_id: &MergeCandidateId,
    reviewer: &str,
) -> EngineResult<MergeCandidate> {
    set_candidate_status(store, candidate_id, MergeCandidateStatus::Accepted, reviewer)
}

pub fn reject_candidate(
    store: &Store,
    candidate_id: &MergeCandidateId,
    reviewer: &str,
) -> EngineResult<MergeCandidate> {
    set_candidate_status(store, candidate_id, MergeCandidateStatus::Rejected, reviewer)
}

/// Runs [`merge_concepts`] for an `ACCEPTED` candidate (`src` kept, `dst`
/// dropped) and marks it `MERGED`. Executing a candidate that hasn't been
/// accepted is a state-machine violation.
pub fn execute_candidate(
    store: &Store,
    scope: &ActiveScope,
    candidate_id: &MergeCandidateId,
    reviewer: &str,
) -> EngineResult<MergeOutcome> {
    let candidate = get_candidate(store, candidate_id)?;
    if candidate.status != MergeCandidateStatus::Accepted {
        return Err(EngineError::Conflict(format!(
            "merge candidate {} must be ACCEPTED before execute",
            candidate_id
        )));
    }
    let outcome = merge_concepts(store, scope, &candidate.src_node_id, &candidate.dst_node_id, reviewer)?;
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE merge_candidates SET status = ?1 WHERE candidate_id = ?2",
            params![MergeCandidateStatus::Merged.as_str(), candidate_id.as_str()],
        )
    })?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_name_collapses_whitespace_and_case() {
        assert_eq!(normalize_name("  Acme   CORP "), "acme corp");
    }

    #[test]
    fn blocking_key_is_first_three_normalized_chars() {
        assert_eq!(blocking_key("Acme Corp"), "acm");
    }

    #[test]
    fn string_similarity_of_identical_names_is_one() {
        assert_eq!(string_similarity("Acme Corp", "acme corp"), 1.0);
    }

    #[test]
    fn candidate_id_is_order_independent() {
        let a = candidate_id("G1", "N1", "N2");
        let b = candidate_id("G1", "N2", "N1");
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn generate_merge_candidates_finds_similar_pair() {
        use crate::collaborators::HashingEmbeddingCollaborator;
        use crate::config::EngineConfig;
        use crate::entities::concept::{create_concept, ConceptInput};
        use crate::scope::ScopeResolver;

        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let scope = resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap();
        create_concept(&store, &scope, ConceptInput { name: "Acme Corp".into(), node_type: "Company".into(), ..Default::default() }).unwrap();
        create_concept(&store, &scope, ConceptInput { name: "Acme Corporation".into(), node_type: "Company".into(), ..Default::default() }).unwrap();
        create_concept(&store, &scope, ConceptInput { name: "Totally Different".into(), node_type: "Company".into(), ..Default::default() }).unwrap();

        let embeddings = HashingEmbeddingCollaborator::default();
        let candidates = generate_merge_candidates(&store, &scope, &embeddings).await.unwrap();
        assert!(candidates.iter().any(|c| c.score >= SCORE_THRESHOLD));
    }

    #[test]
    fn merge_concepts_redirects_edges_and_tombstones_drop() {
        use crate::config::EngineConfig;
        use crate::entities::concept::{create_concept, ConceptInput};
        use crate::entities::relationship::{create_relationship, RelationshipAttrs};
        use crate::scope::ScopeResolver;

        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let scope = resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap();

        let keep = create_concept(&store, &scope, ConceptInput { name: "Acme".into(), node_type: "Company".into(), ..Default::default() }).unwrap();
        let drop = create_concept(&store, &scope, ConceptInput { name: "Acme Inc".into(), node_type: "Company".into(), ..Default::default() }).unwrap();
        let other = create_concept(&store, &scope, ConceptInput { name: "Widget".into(), node_type: "Product".into(), ..Default::default() }).unwrap();
        create_relationship(&store, &scope, drop.node_id.as_str(), other.node_id.as_str(), "MAKES", RelationshipAttrs::default()).unwrap();

        let outcome = merge_concepts(&store, &scope, keep.node_id.as_str(), drop.node_id.as_str(), "reviewer-1").unwrap();
        assert_eq!(outcome.redirected, 1);
        assert_eq!(outcome.deleted, 1);

        let neighbors = crate::entities::relationship::get_neighbors(
            &store, &scope, keep.node_id.as_str(), crate::scope::IncludeProposed::Include,
        ).unwrap();
        assert!(neighbors.iter().any(|r| r.source_id == keep.node_id.as_str()));
    }

    #[test]
    fn candidate_lifecycle_requires_accept_before_execute() {
        use crate::config::EngineConfig;
        use crate::entities::concept::{create_concept, ConceptInput};
        use crate::scope::ScopeResolver;

        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let scope = resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap();

        let a = create_concept(&store, &scope, ConceptInput { name: "Apple Inc".into(), node_type: "Company".into(), ..Default::default() }).unwrap();
        let b = create_concept(&store, &scope, ConceptInput { name: "Apple, Inc.".into(), node_type: "Company".into(), ..Default::default() }).unwrap();
        let id = candidate_id(scope.graph_id.as_str(), a.node_id.as_str(), b.node_id.as_str());
        let now = Utc::now().to_rfc3339();
        store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO merge_candidates (candidate_id, graph_id, src_node_id, dst_node_id, score, method, status, created_at) \
                 VALUES (?1, ?2, ?3, ?4, 0.9, 'hybrid', 'PROPOSED', ?5)",
                params![id.as_str(), scope.graph_id.as_str(), a.node_id.as_str(), b.node_id.as_str(), now],
            )
        }).unwrap();

        let err = execute_candidate(&store, &scope, &id, "reviewer-1").unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        accept_candidate(&store, &id, "reviewer-1").unwrap();
        assert!(matches!(accept_candidate(&store, &id, "reviewer-1"), Err(EngineError::Conflict(_))));

        let outcome = execute_candidate(&store, &scope, &id, "reviewer-1").unwrap();
        assert_eq!(outcome.deleted, 1);
        let candidate = get_candidate(&store, &id).unwrap();
        assert_eq!(candidate.status, MergeCandidateStatus::Merged);
    }
}
