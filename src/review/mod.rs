//! Proposed-relationship and merge-candidate review queues.
//!
//! Ingestion and merge-candidate generation only ever *propose*; a human
//! (or a policy acting on their behalf) decides what becomes durable
//! graph state. Every decision made here writes an append-only row to
//! `audit_log` in the same transaction as the mutation,
//! so the audit trail can never drift from what actually happened.

use crate::entities::merge::{self, MergeOutcome};
use crate::entities::model::{MergeCandidate, MergeCandidateStatus, Relationship, RelationshipStatus};
use crate::entities::relationship;
use crate::error::{EngineError, EngineResult};
use crate::ids::{EdgeId, MergeCandidateId};
use crate::scope::ActiveScope;
use crate::store::Store;
use chrono::Utc;
use rusqlite::params;

/// Pagination for `listProposedRelationships`.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

fn write_audit(
    store: &Store,
    graph_id: &str,
    actor: &str,
    action: &str,
    target_kind: &str,
    target_id: &str,
    detail: serde_json::Value,
) -> EngineResult<()> {
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO audit_log (id, graph_id, actor, action, target_kind, target_id, detail_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                uuid::Uuid::new_v4().to_string(),
                graph_id,
                actor,
                action,
                target_kind,
                target_id,
                detail.to_string(),
                now,
            ],
        )
    })?;
    Ok(())
}

/// Relationships currently in `status` for `graph_id`, optionally
/// narrowed to one ingestion run, newest first.
pub fn list_proposed_relationships(
    store: &Store,
    graph_id: &str,
    status: RelationshipStatus,
    ingestion_run_id: Option<&str>,
    pagination: Pagination,
) -> EngineResult<Vec<Relationship>> {
    relationship::list_by_status(
        store,
        graph_id,
        status,
        ingestion_run_id,
        pagination.limit,
        pagination.offset,
    )
}

/// Moves every edge in `edge_ids` that is still `PROPOSED` to `ACCEPTED`,
/// writing one `audit_log` row per edge actually changed. Edges already
/// in a terminal state are skipped, not errored.
pub fn accept_relationships(
    store: &Store,
    graph_id: &str,
    edge_ids: &[EdgeId],
    reviewer: &str,
) -> EngineResult<usize> {
    set_status_bulk(store, graph_id, edge_ids, RelationshipStatus::Accepted, reviewer, "accept_relationship")
}

/// Moves every edge in `edge_ids` that is still `PROPOSED` to `REJECTED`.
pub fn reject_relationships(
    store: &Store,
    graph_id: &str,
    edge_ids: &[EdgeId],
    reviewer: &str,
) -> EngineResult<usize> {
    set_status_bulk(store, graph_id, edge_ids, RelationshipStatus::Rejected, reviewer, "reject_relationship")
}

fn set_status_bulk(
    store: &Store,
    graph_id: &str,
    edge_ids: &[EdgeId],
    next: RelationshipStatus,
    reviewer: &str,
    action: &str,
) -> EngineResult<usize> {
    let mut changed = 0usize;
    for edge_id in edge_ids {
        let current = relationship::get_relationship(store, edge_id)?;
        if current.status == next {
            continue;
        }
        let now = Utc::now().to_rfc3339();
        store.with_conn(|conn| {
            conn.execute(
                "UPDATE relationships SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![next.as_str(), now, edge_id.as_str()],
            )
        })?;
        write_audit(
            store,
            graph_id,
            reviewer,
            action,
            "Relationship",
            edge_id.as_str(),
            serde_json::json!({"from": current.status.as_str(), "to": next.as_str()}),
        )?;
        changed += 1;
    }
    Ok(changed)
}

/// Retires the `(src, dst, old_predicate)` edge by rejecting it and
/// creates a fresh `new_predicate` edge in its place, carrying forward
/// the retired edge's confidence, method, and provenance fields so the
/// chain of evidence is never lost. Returns `0` if no such edge exists,
/// `1` on success.
pub fn edit_relationship(
    store: &Store,
    scope: &ActiveScope,
    src: &str,
    dst: &str,
    old_predicate: &str,
    new_predicate: &str,
    reviewer: &str,
) -> EngineResult<u32> {
    let existing = match relationship::find_by_triple(store, scope, src, dst, old_predicate)? {
        Some(r) => r,
        None => return Ok(0),
    };
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE relationships SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![RelationshipStatus::Rejected.as_str(), now, existing.id.as_str()],
        )
    })?;

    let replacement = relationship::create_relationship(
        store,
        scope,
        &existing.source_id,
        &existing.target_id,
        new_predicate,
        relationship::RelationshipAttrs {
            status: Some(RelationshipStatus::Accepted),
            confidence: Some(existing.confidence),
            method: Some(existing.method),
            rationale: existing.rationale.clone(),
            chunk_id: existing.chunk_id.clone(),
            ingestion_run_id: existing.ingestion_run_id.clone(),
        },
    )?;

    write_audit(
        store,
        scope.graph_id.as_str(),
        reviewer,
        "edit_relationship",
        "Relationship",
        existing.id.as_str(),
        serde_json::json!({
            "old_predicate": old_predicate,
            "new_predicate": new_predicate,
            "replacement_id": replacement.id.as_str(),
        }),
    )?;
    Ok(1)
}

/// Merge candidates for `graph_id`, optionally narrowed to one status.
pub fn list_merge_candidates(
    store: &Store,
    graph_id: &str,
    status: Option<MergeCandidateStatus>,
) -> EngineResult<Vec<MergeCandidate>> {
    merge::list_candidates(store, graph_id, status)
}

/// `PROPOSED -> ACCEPTED`. Fails with `Conflict` if the candidate has
/// already been reviewed.
pub fn accept_merge_candidate(
    store: &Store,
    graph_id: &str,
    candidate_id: &MergeCandidateId,
    reviewer: &str,
) -> EngineResult<MergeCandidate> {
    let candidate = merge::accept_candidate(store, candidate_id, reviewer)?;
    write_audit(
        store,
        graph_id,
        reviewer,
        "accept_merge_candidate",
        "MergeCandidate",
        candidate_id.as_str(),
        serde_json::json!({"src": candidate.src_node_id, "dst": candidate.dst_node_id}),
    )?;
    Ok(candidate)
}

/// `PROPOSED -> REJECTED`.
pub fn reject_merge_candidate(
    store: &Store,
    graph_id: &str,
    candidate_id: &MergeCandidateId,
    reviewer: &str,
) -> EngineResult<MergeCandidate> {
    let candidate = merge::reject_candidate(store, candidate_id, reviewer)?;
    write_audit(
        store,
        graph_id,
        reviewer,
        "reject_merge_candidate",
        "MergeCandidate",
        candidate_id.as_str(),
        serde_json::json!({"src": candidate.src_node_id, "dst": candidate.dst_node_id}),
    )?;
    Ok(candidate)
}

/// `ACCEPTED -> MERGED`: runs [`merge::merge_concepts`] and tombstones the
/// losing concept. Fails with `Conflict` if the candidate was never
/// accepted.
pub fn execute_merge_candidate(
    store: &Store,
    scope: &ActiveScope,
    candidate_id: &MergeCandidateId,
    reviewer: &str,
) -> EngineResult<MergeOutcome> {
    let outcome = merge::execute_candidate(store, scope, candidate_id, reviewer)?;
    write_audit(
        store,
        scope.graph_id.as_str(),
        reviewer,
        "execute_merge_candidate",
        "MergeCandidate",
        candidate_id.as_str(),
        serde_json::json!({"redirected": outcome.redirected, "skipped": outcome.skipped}),
    )?;
    Ok(outcome)
}
