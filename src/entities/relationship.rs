//! Relationship CRUD with MERGE semantics.

use super::concept::resolve_concept_ref;
use super::model::{Relationship, RelationshipMethod, RelationshipStatus, CROSS_GRAPH_LINK};
use crate::error::{EngineError, EngineResult};
use crate::ids::EdgeId;
use crate::scope::{ActiveScope, IncludeProposed, VisibilityFilter};
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone, Default)]
pub struct RelationshipAttrs {
    pub status: Option<RelationshipStatus>,
    pub confidence: Option<f64>,
    pub method: Option<RelationshipMethod>,
    pub rationale: Option<String>,
    pub chunk_id: Option<String>,
    pub ingestion_run_id: Option<String>,
}

pub(crate) fn row_to_relationship(row: &Row) -> rusqlite::Result<Relationship> {
    let branches_json: String = row.get("on_branches_json")?;
    Ok(Relationship {
        id: EdgeId::from_string(row.get::<_, String>("id")?),
        graph_id: row.get("graph_id")?,
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        predicate: row.get("predicate")?,
        on_branches: serde_json::from_str(&branches_json).unwrap_or_default(),
        status: RelationshipStatus::parse(&row.get::<_, String>("status")?),
        confidence: row.get("confidence")?,
        method: RelationshipMethod::parse(&row.get::<_, String>("method")?),
        rationale: row.get("rationale")?,
        chunk_id: row.get("chunk_id")?,
        ingestion_run_id: row.get("ingestion_run_id")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Creates (or re-applies attrs to) the Relationship between `src` and
/// `dst`. `src`/`dst` may be node ids or names, resolved within the
/// current graph. Cross-graph pairs are rejected unless `predicate` is
/// `CROSS_GRAPH_LINK`. At most one edge of the same `(src, dst, predicate)`
/// triple exists per graph; repeated creates union `on_branches` and keep
/// the caller's explicit attrs.
pub fn create_relationship(
    store: &Store,
    scope: &ActiveScope,
    src: &str,
    dst: &str,
    predicate: &str,
    attrs: RelationshipAttrs,
) -> EngineResult<Relationship> {
    let source = resolve_concept_ref(store, scope, src)?;
    let target = resolve_concept_ref(store, scope, dst)?;

    if source.graph_id != target.graph_id && predicate != CROSS_GRAPH_LINK {
        return Err(EngineError::Invalid(format!(
            "cross-graph relationship requires predicate {}, got {}",
            CROSS_GRAPH_LINK, predicate
        )));
    }

    let existing_id: Option<String> = store.with_conn(|conn| {
        conn.query_row(
            "SELECT id FROM relationships WHERE graph_id = ?1 AND source_id = ?2 \
             AND target_id = ?3 AND predicate = ?4",
            params![scope.graph_id.as_str(), source.node_id.as_str(), target.node_id.as_str(), predicate],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
    })?;

    let now = Utc::now().to_rfc3339();
    match existing_id {
        Some(id) => {
            // Re-apply: union on_branches, keep the most specific attrs supplied.
            let current = store.with_conn(|conn| {
                conn.query_row(
                    "SELECT * FROM relationships WHERE id = ?1",
                    [&id],
                    row_to_relationship,
                )
            })?;
            let mut branches = current.on_branches.clone();
            if !branches.contains(&scope.branch_id.as_str().to_string()) {
                branches.push(scope.branch_id.as_str().to_string());
            }
            let branches_json = serde_json::to_string(&branches)?;
            let status = attrs.status.unwrap_or(current.status).as_str().to_string();
            let confidence = attrs.confidence.unwrap_or(current.confidence);
            let method = attrs.method.unwrap_or(current.method).as_str().to_string();
            let rationale = attrs.rationale.or(current.rationale);
            let chunk_id = attrs.chunk_id.or(current.chunk_id);
            let ingestion_run_id = attrs.ingestion_run_id.or(current.ingestion_run_id);
            store.with_conn(|conn| {
                conn.execute(
                    "UPDATE relationships SET on_branches_json = ?1, status = ?2, confidence = ?3, \
                     method = ?4, rationale = ?5, chunk_id = ?6, ingestion_run_id = ?7, updated_at = ?8 \
                     WHERE id = ?9",
                    params![
                        branches_json, status, confidence, method, rationale, chunk_id,
                        ingestion_run_id, now, id
                    ],
                )
            })?;
            get_relationship(store, &EdgeId::from_string(id.clone()))
        }
        None => {
            let id = EdgeId::generate();
            let branches_json = serde_json::to_string(&vec![scope.branch_id.as_str().to_string()])?;
            let status = attrs.status.unwrap_or(RelationshipStatus::Proposed).as_str().to_string();
            let method = attrs.method.unwrap_or(RelationshipMethod::Human).as_str().to_string();
            let confidence = attrs.confidence.unwrap_or(1.0);
            store.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO relationships \
                        (id, graph_id, source_id, target_id, predicate, on_branches_json, status, \
                         confidence, method, rationale, chunk_id, ingestion_run_id, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?13)",
                    params![
                        id.as_str(), scope.graph_id.as_str(), source.node_id.as_str(),
                        target.node_id.as_str(), predicate, branches_json, status, confidence,
                        method, attrs.rationale, attrs.chunk_id, attrs.ingestion_run_id, now
                    ],
                )
            })?;
            get_relationship(store, &id)
        }
    }
}

pub fn get_relationship(store: &Store, id: &EdgeId) -> EngineResult<Relationship> {
    store
        .with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM relationships WHERE id = ?1",
                [id.as_str()],
                row_to_relationship,
            )
        })
        .map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!("relationship {} not found", id)),
            other => other,
        })
}

/// Every Relationship incident to `node_id` (either endpoint), filtered by
/// the current scope's visibility predicate.
pub fn get_neighbors(
    store: &Store,
    scope: &ActiveScope,
    node_id: &str,
    include_proposed: IncludeProposed,
) -> EngineResult<Vec<Relationship>> {
    let filter = VisibilityFilter::new(scope.graph_id.clone(), scope.branch_id.clone());
    let (visible, mut vp) = filter.relationships_clause("r", include_proposed);
    vp.insert(0, node_id.to_string());
    vp.insert(1, node_id.to_string());
    let sql = format!(
        "SELECT * FROM relationships r WHERE (r.source_id = ? OR r.target_id = ?) AND {visible} \
         ORDER BY r.created_at"
    );
    store.with_conn(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(vp.iter()), row_to_relationship)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
}

/// Relationships in `status` within `graph_id`, newest first, optionally
/// narrowed to one ingestion run.
pub fn list_by_status(
    store: &Store,
    graph_id: &str,
    status: RelationshipStatus,
    ingestion_run_id: Option<&str>,
    limit: i64,
    offset: i64,
) -> EngineResult<Vec<Relationship>> {
    let status_str = status.as_str().to_string();
    let ingestion_run_id = ingestion_run_id.map(|s| s.to_string());
    let graph_id = graph_id.to_string();
    store.with_conn(move |conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM relationships WHERE graph_id = ?1 AND status = ?2 \
             AND (?3 IS NULL OR ingestion_run_id = ?3) \
             ORDER BY created_at DESC LIMIT ?4 OFFSET ?5",
        )?;
        stmt.query_map(
            params![graph_id, status_str, ingestion_run_id, limit, offset],
            row_to_relationship,
        )?
        .collect::<rusqlite::Result<Vec<_>>>()
    })
}

/// Looks up the live edge for a `(graph_id, source_id, target_id,
/// predicate)` triple, by node id or name.
pub fn find_by_triple(
    store: &Store,
    scope: &ActiveScope,
    src: &str,
    dst: &str,
    predicate: &str,
) -> EngineResult<Option<Relationship>> {
    let source = resolve_concept_ref(store, scope, src)?;
    let target = resolve_concept_ref(store, scope, dst)?;
    store.with_conn(|conn| {
        conn.query_row(
            "SELECT * FROM relationships WHERE graph_id = ?1 AND source_id = ?2 \
             AND target_id = ?3 AND predicate = ?4",
            params![scope.graph_id.as_str(), source.node_id.as_str(), target.node_id.as_str(), predicate],
            row_to_relationship,
        )
        .optional()
    })
}

/// Deletes the live edge for a `(src, dst, predicate)` triple, by node id
/// or name. A no-op (returns `false`) if no such edge exists.
pub fn delete_relationship(
    store: &Store,
    scope: &ActiveScope,
    src: &str,
    dst: &str,
    predicate: &str,
) -> EngineResult<bool> {
    let existing = find_by_triple(store, scope, src, dst, predicate)?;
    match existing {
        Some(rel) => {
            store.with_conn(|conn| conn.execute("DELETE FROM relationships WHERE id = ?1", [rel.id.as_str()]))?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::entities::concept::{create_concept, ConceptInput};
    use crate::scope::ScopeResolver;

    fn scope(store: &Store) -> ActiveScope {
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(store, &config);
        resolver
            .resolve_active(&crate::ids::TenantId::from_string("t"))
            .unwrap()
    }

    #[test]
    fn create_relationship_resolves_names_and_defaults_to_proposed() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let a = create_concept(&store, &scope, ConceptInput { name: "A".into(), node_type: "X".into(), ..Default::default() }).unwrap();
        let b = create_concept(&store, &scope, ConceptInput { name: "B".into(), node_type: "X".into(), ..Default::default() }).unwrap();

        let rel = create_relationship(&store, &scope, "A", "B", "RELATED_TO", RelationshipAttrs::default()).unwrap();
        assert_eq!(rel.source_id, a.node_id.as_str());
        assert_eq!(rel.target_id, b.node_id.as_str());
        assert_eq!(rel.status, RelationshipStatus::Proposed);
    }

    #[test]
    fn repeated_create_reuses_the_same_edge_and_unions_branches() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        create_concept(&store, &scope, ConceptInput { name: "A".into(), node_type: "X".into(), ..Default::default() }).unwrap();
        create_concept(&store, &scope, ConceptInput { name: "B".into(), node_type: "X".into(), ..Default::default() }).unwrap();

        let first = create_relationship(&store, &scope, "A", "B", "RELATED_TO", RelationshipAttrs::default()).unwrap();
        let second = create_relationship(
            &store,
            &scope,
            "A",
            "B",
            "RELATED_TO",
            RelationshipAttrs { status: Some(RelationshipStatus::Accepted), ..Default::default() },
        )
        .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.status, RelationshipStatus::Accepted);
    }

    #[test]
    fn cross_graph_relationship_rejected_unless_cross_graph_link() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let tenant = crate::ids::TenantId::from_string("t");
        let scope_a = resolver.resolve_active(&tenant).unwrap();
        let graph_b = crate::ids::GraphId::from_string("other");
        resolver.ensure_graph(&graph_b, &tenant).unwrap();
        let scope_b = resolver.set_active_graph(&tenant, &graph_b).unwrap();

        create_concept(&store, &scope_a, ConceptInput { name: "A".into(), node_type: "X".into(), ..Default::default() }).unwrap();
        create_concept(&store, &scope_b, ConceptInput { name: "B".into(), node_type: "X".into(), ..Default::default() }).unwrap();

        let err = resolve_concept_ref(&store, &scope_a, "B");
        assert!(err.is_err()); // B isn't visible from graph A's scope at all.
    }
}
