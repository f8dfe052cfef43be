//! Offline sync outbox.
//!
//! A client that was offline replays its queued local events through
//! `apply_events`. Each event is gated by a `(graph_id, event_id)` row in
//! `client_events`: the first sighting of an `event_id` is dispatched,
//! every subsequent sighting is reported `duplicate` without touching
//! graph state, even if the first attempt actually failed. That is the
//! known, deliberate trade-off: a proper exactly-once implementation
//! would flip `applied` only inside the handler's own transaction. Fixing
//! it is future work, not a bug here; a failed event needs an
//! operator-driven repair path, not a naive retry of the same `event_id`.

use crate::collaborators::LlmCollaborator;
use crate::config::EngineConfig;
use crate::entities::model::DocumentSource;
use crate::error::{EngineError, EngineResult};
use crate::ids::{BranchId, GraphId, TenantId};
use crate::ingest::{ingest, ArtifactInput, IngestionActions, IngestionPolicy};
use crate::scope::{ActiveScope, ScopeResolver};
use crate::store::Store;
use chrono::Utc;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One client-queued event as received by `POST /sync/events`.
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub event_id: String,
    pub graph_id: String,
    pub branch_id: Option<String>,
    pub event_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventOutcome {
    Applied,
    Duplicate,
    Error,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::Duplicate => "duplicate",
            EventOutcome::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncEventResult {
    pub event_id: String,
    pub status: EventOutcome,
    pub error: Option<String>,
}

fn get_str<'a>(payload: &'a serde_json::Value, key: &str) -> EngineResult<&'a str> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::Invalid(format!("sync event payload missing '{key}'")))
}

/// Applies a batch of client events in order, never aborting the batch on
/// a per-item failure.
pub async fn apply_events(
    store: &Store,
    config: &EngineConfig,
    tenant_id: &TenantId,
    events: Vec<SyncEvent>,
    llm: &dyn LlmCollaborator,
) -> EngineResult<Vec<SyncEventResult>> {
    let resolver = ScopeResolver::new(store, config);
    let mut results = Vec::with_capacity(events.len());
    for event in events {
        results.push(apply_one(store, &resolver, &config.default_branch, tenant_id, event, llm).await);
    }
    Ok(results)
}

async fn apply_one(
    store: &Store,
    resolver: &ScopeResolver<'_>,
    default_branch: &str,
    tenant_id: &TenantId,
    event: SyncEvent,
    llm: &dyn LlmCollaborator,
) -> SyncEventResult {
    match apply_one_inner(store, resolver, default_branch, tenant_id, &event, llm).await {
        Ok(Some(output)) => {
            let _ = mark_applied(store, &event, &output);
            SyncEventResult { event_id: event.event_id, status: EventOutcome::Applied, error: None }
        }
        Ok(None) => SyncEventResult { event_id: event.event_id, status: EventOutcome::Duplicate, error: None },
        Err(e) => {
            let _ = mark_errored(store, &event, &e.to_string());
            SyncEventResult { event_id: event.event_id, status: EventOutcome::Error, error: Some(e.to_string()) }
        }
    }
}

/// Returns `Ok(None)` when the dedupe gate reports a repeat sighting;
/// otherwise dispatches the event and returns its output JSON.
async fn apply_one_inner(
    store: &Store,
    resolver: &ScopeResolver<'_>,
    default_branch: &str,
    tenant_id: &TenantId,
    event: &SyncEvent,
    llm: &dyn LlmCollaborator,
) -> EngineResult<Option<serde_json::Value>> {
    let graph_id = GraphId::from_string(event.graph_id.clone());
    resolver.ensure_graph(&graph_id, tenant_id)?;
    resolver.check_tenant(tenant_id, &graph_id)?;
    let branch_id = BranchId::from_string(event.branch_id.clone().unwrap_or_else(|| default_branch.to_string()));
    resolver.ensure_branch(&graph_id, &branch_id)?;
    let scope = ActiveScope { graph_id, branch_id };

    let received_at = Utc::now().to_rfc3339();
    let inserted = store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO client_events (graph_id, event_id, event_type, branch_id, payload_json, applied, received_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6) \
             ON CONFLICT(graph_id, event_id) DO NOTHING",
            params![
                scope.graph_id.as_str(),
                event.event_id,
                event.event_type,
                scope.branch_id.as_str(),
                event.payload.to_string(),
                received_at,
            ],
        )
    })?;
    if inserted == 0 {
        return Ok(None);
    }

    let output = dispatch(store, &scope, event, llm).await?;
    Ok(Some(output))
}

async fn dispatch(
    store: &Store,
    scope: &ActiveScope,
    event: &SyncEvent,
    llm: &dyn LlmCollaborator,
) -> EngineResult<serde_json::Value> {
    match event.event_type.as_str() {
        "artifact.ingest" => dispatch_artifact_ingest(store, scope, event, llm).await,
        "resource.create" => dispatch_resource_create(store, scope, event),
        "resource.link" => dispatch_resource_link(store, scope, event),
        "trail.step.append" => dispatch_trail_step_append(store, scope, event),
        other => Err(EngineError::Invalid(format!("unrecognized sync event type: {other}"))),
    }
}

async fn dispatch_artifact_ingest(
    store: &Store,
    scope: &ActiveScope,
    event: &SyncEvent,
    llm: &dyn LlmCollaborator,
) -> EngineResult<serde_json::Value> {
    let url = get_str(&event.payload, "url")?.to_string();
    let text = get_str(&event.payload, "text")?.to_string();
    let external_id = event
        .payload
        .get("external_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| url.clone());
    let title = event.payload.get("title").and_then(|v| v.as_str()).map(|s| s.to_string());

    let input = ArtifactInput {
        artifact_type: event
            .payload
            .get("artifact_type")
            .and_then(|v| v.as_str())
            .unwrap_or("webpage")
            .to_string(),
        source: DocumentSource::Web,
        source_url: url,
        external_id,
        title,
        text,
        metadata: event.payload.get("metadata").cloned().unwrap_or(serde_json::json!({})),
        ..Default::default()
    };
    let actions = IngestionActions { create_artifact_node: true, ..Default::default() };
    let policy = IngestionPolicy { local_only: true, ..Default::default() };
    let result = ingest(store, scope, input, actions, policy, llm).await?;
    Ok(serde_json::json!({
        "run_id": result.run_id,
        "status": format!("{:?}", result.status),
        "artifact_id": result.artifact_id.map(|id| id.as_str().to_string()),
    }))
}

fn dispatch_resource_create(
    store: &Store,
    scope: &ActiveScope,
    event: &SyncEvent,
) -> EngineResult<serde_json::Value> {
    let resource_id = get_str(&event.payload, "resource_id")?.to_string();
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO resources (graph_id, resource_id, payload_json, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?4) \
             ON CONFLICT(graph_id, resource_id) DO UPDATE SET payload_json = excluded.payload_json, updated_at = excluded.updated_at",
            params![scope.graph_id.as_str(), resource_id, event.payload.to_string(), now],
        )
    })?;
    Ok(serde_json::json!({"resource_id": resource_id}))
}

fn dispatch_resource_link(
    store: &Store,
    scope: &ActiveScope,
    event: &SyncEvent,
) -> EngineResult<serde_json::Value> {
    let node_id = get_str(&event.payload, "node_id")?.to_string();
    let resource_id = get_str(&event.payload, "resource_id")?.to_string();

    let existing_branches_json: Option<String> = store.with_conn(|conn| {
        conn.query_row(
            "SELECT on_branches_json FROM resource_links WHERE graph_id = ?1 AND node_id = ?2 AND resource_id = ?3",
            params![scope.graph_id.as_str(), node_id, resource_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
    })?;
    let mut branches: HashSet<String> = existing_branches_json
        .as_deref()
        .map(|j| serde_json::from_str(j).unwrap_or_default())
        .unwrap_or_default();
    branches.insert(scope.branch_id.as_str().to_string());
    let branches_json = serde_json::to_string(&branches)?;

    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO resource_links (graph_id, node_id, resource_id, on_branches_json) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(graph_id, node_id, resource_id) DO UPDATE SET on_branches_json = excluded.on_branches_json",
            params![scope.graph_id.as_str(), node_id, resource_id, branches_json],
        )
    })?;
    Ok(serde_json::json!({"node_id": node_id, "resource_id": resource_id}))
}

fn dispatch_trail_step_append(
    store: &Store,
    scope: &ActiveScope,
    event: &SyncEvent,
) -> EngineResult<serde_json::Value> {
    let trail_id = get_str(&event.payload, "trail_id")?.to_string();
    let step_id = get_str(&event.payload, "step_id")?.to_string();
    let step_payload = event.payload.get("step").cloned().unwrap_or(serde_json::json!({}));

    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO trails (graph_id, trail_id, payload_json) VALUES (?1, ?2, '{}') \
             ON CONFLICT(graph_id, trail_id) DO NOTHING",
            params![scope.graph_id.as_str(), trail_id],
        )
    })?;

    let existing_branches_json: Option<String> = store.with_conn(|conn| {
        conn.query_row(
            "SELECT on_branches_json FROM trail_steps WHERE graph_id = ?1 AND trail_id = ?2 AND step_id = ?3",
            params![scope.graph_id.as_str(), trail_id, step_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
    })?;
    let mut branches: HashSet<String> = existing_branches_json
        .as_deref()
        .map(|j| serde_json::from_str(j).unwrap_or_default())
        .unwrap_or_default();
    branches.insert(scope.branch_id.as_str().to_string());
    let branches_json = serde_json::to_string(&branches)?;

    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO trail_steps (graph_id, trail_id, step_id, payload_json, on_branches_json) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(graph_id, trail_id, step_id) DO UPDATE SET payload_json = excluded.payload_json, on_branches_json = excluded.on_branches_json",
            params![scope.graph_id.as_str(), trail_id, step_id, step_payload.to_string(), branches_json],
        )
    })?;
    Ok(serde_json::json!({"trail_id": trail_id, "step_id": step_id}))
}

fn mark_applied(store: &Store, event: &SyncEvent, output: &serde_json::Value) -> EngineResult<()> {
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE client_events SET applied = 1, output_json = ?1, applied_at = ?2 \
             WHERE graph_id = ?3 AND event_id = ?4",
            params![output.to_string(), now, event.graph_id, event.event_id],
        )
    })?;
    Ok(())
}

fn mark_errored(store: &Store, event: &SyncEvent, detail: &str) -> EngineResult<()> {
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE client_events SET error_detail = ?1 WHERE graph_id = ?2 AND event_id = ?3",
            params![detail, event.graph_id, event.event_id],
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::NullLlmCollaborator;

    fn event(event_id: &str, event_type: &str, payload: serde_json::Value) -> SyncEvent {
        SyncEvent {
            event_id: event_id.to_string(),
            graph_id: "G1".to_string(),
            branch_id: None,
            event_type: event_type.to_string(),
            payload,
        }
    }

    #[tokio::test]
    async fn repeated_event_id_is_reported_duplicate_and_applied_once() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let tenant = TenantId::from_string("t1");
        let llm = NullLlmCollaborator;

        let events = vec![
            event("e1", "resource.create", serde_json::json!({"resource_id": "R1", "kind": "link", "url": "https://x"})),
            event("e1", "resource.create", serde_json::json!({"resource_id": "R1", "kind": "link", "url": "https://x"})),
        ];
        let results = apply_events(&store, &config, &tenant, events, &llm).await.unwrap();
        assert_eq!(results[0].status, EventOutcome::Applied);
        assert_eq!(results[1].status, EventOutcome::Duplicate);

        let count: i64 = store
            .with_conn(|conn| conn.query_row("SELECT COUNT(*) FROM resources WHERE resource_id = 'R1'", [], |row| row.get(0)))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn unrecognized_event_type_reports_error_without_aborting_the_batch() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let tenant = TenantId::from_string("t1");
        let llm = NullLlmCollaborator;

        let events = vec![
            event("bad-1", "not.a.real.type", serde_json::json!({})),
            event("e2", "resource.create", serde_json::json!({"resource_id": "R2"})),
        ];
        let results = apply_events(&store, &config, &tenant, events, &llm).await.unwrap();
        assert_eq!(results[0].status, EventOutcome::Error);
        assert_eq!(results[1].status, EventOutcome::Applied);
    }

    #[tokio::test]
    async fn trail_step_append_unions_branches_across_calls() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let tenant = TenantId::from_string("t1");
        let llm = NullLlmCollaborator;

        let mut first = event("e1", "trail.step.append", serde_json::json!({"trail_id": "T1", "step_id": "S1"}));
        first.branch_id = Some("main".into());
        let mut second = event("e2", "trail.step.append", serde_json::json!({"trail_id": "T1", "step_id": "S1"}));
        second.branch_id = Some("feature".into());

        apply_events(&store, &config, &tenant, vec![first], &llm).await.unwrap();
        apply_events(&store, &config, &tenant, vec![second], &llm).await.unwrap();

        let branches_json: String = store
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT on_branches_json FROM trail_steps WHERE graph_id = 'G1' AND trail_id = 'T1' AND step_id = 'S1'",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        let branches: HashSet<String> = serde_json::from_str(&branches_json).unwrap();
        assert!(branches.contains("main"));
        assert!(branches.contains("feature"));
    }
}
