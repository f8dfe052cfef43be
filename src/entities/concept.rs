//! Concept CRUD.

use super::model::Concept;
use crate::error::{EngineError, EngineResult};
use crate::ids::ConceptId;
use crate::scope::{ActiveScope, VisibilityFilter};
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

/// Fields a caller may supply when creating a Concept.
#[derive(Debug, Clone, Default)]
pub struct ConceptInput {
    pub name: String,
    pub domain: Option<String>,
    pub node_type: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// Normalizes a concept/mention name the same way on both sides of a
/// comparison: trim surrounding whitespace, lowercase. Concept names
/// themselves stay stored with their natural casing (names are a
/// case-sensitive node key, invariant 4) — this is only for matching a
/// normalized mention against them.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Partial update for an existing Concept; `None` fields are preserved.
#[derive(Debug, Clone, Default)]
pub struct ConceptPatch {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub node_type: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

pub(crate) fn row_to_concept(row: &Row) -> rusqlite::Result<Concept> {
    let tags_json: String = row.get("tags_json")?;
    let alias_json: String = row.get("alias_names_json")?;
    let merged_json: String = row.get("merged_node_ids_json")?;
    let branches_json: String = row.get("on_branches_json")?;
    Ok(Concept {
        node_id: ConceptId::from_string(row.get::<_, String>("node_id")?),
        graph_id: row.get("graph_id")?,
        name: row.get("name")?,
        domain: row.get("domain")?,
        node_type: row.get("node_type")?,
        description: row.get("description")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        alias_names: serde_json::from_str(&alias_json).unwrap_or_default(),
        merged_node_ids: serde_json::from_str(&merged_json).unwrap_or_default(),
        is_merged: row.get::<_, i64>("is_merged")? != 0,
        merged_into: row.get("merged_into")?,
        merged_at: row.get("merged_at")?,
        on_branches: serde_json::from_str(&branches_json).unwrap_or_default(),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Creates a Concept, generating its id and scoping it to the current
/// branch. Fails with `Conflict` if another live Concept in the graph
/// already uses `input.name`.
pub fn create_concept(
    store: &Store,
    scope: &ActiveScope,
    input: ConceptInput,
) -> EngineResult<Concept> {
    if input.name.trim().is_empty() {
        return Err(EngineError::Invalid("concept name must not be empty".into()));
    }
    let node_id = ConceptId::generate();
    let now = Utc::now().to_rfc3339();
    let on_branches = serde_json::to_string(&vec![scope.branch_id.as_str().to_string()])?;
    let tags = serde_json::to_string(&input.tags)?;

    let inserted = store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO concepts \
                (node_id, graph_id, name, domain, node_type, description, tags_json, \
                 alias_names_json, merged_node_ids_json, is_merged, on_branches_json, \
                 created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, '[]', '[]', 0, ?8, ?9, ?9)",
            params![
                node_id.as_str(),
                scope.graph_id.as_str(),
                input.name,
                input.domain,
                input.node_type,
                input.description,
                tags,
                on_branches,
                now,
            ],
        )
    });

    match inserted {
        Ok(_) => get_concept(store, scope, &node_id),
        Err(EngineError::Internal(msg)) if msg.contains("UNIQUE constraint failed") => Err(
            EngineError::Conflict(format!("concept name already in use: {}", input.name)),
        ),
        Err(other) => Err(other),
    }
}

/// Fetches a live Concept by id within the active scope.
pub fn get_concept(store: &Store, scope: &ActiveScope, id: &ConceptId) -> EngineResult<Concept> {
    let filter = VisibilityFilter::new(scope.graph_id.clone(), scope.branch_id.clone());
    let (visible, mut vp) = filter.concepts_clause("c");
    vp.insert(0, id.as_str().to_string());
    let sql = format!("SELECT * FROM concepts c WHERE c.node_id = ? AND {visible}");
    store
        .with_conn(move |conn| {
            conn.query_row(&sql, rusqlite::params_from_iter(vp.iter()), row_to_concept)
        })
        .map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!("concept {} not found", id)),
            other => other,
        })
}

/// Resolves a Concept by either node id or name within the current graph.
pub fn resolve_concept_ref(
    store: &Store,
    scope: &ActiveScope,
    node_id_or_name: &str,
) -> EngineResult<Concept> {
    if let Ok(c) = get_concept(store, scope, &ConceptId::from_string(node_id_or_name)) {
        return Ok(c);
    }
    let filter = VisibilityFilter::new(scope.graph_id.clone(), scope.branch_id.clone());
    let (visible, mut vp) = filter.concepts_clause("c");
    vp.insert(0, node_id_or_name.to_string());
    let sql = format!("SELECT * FROM concepts c WHERE c.name = ? AND {visible}");
    store
        .with_conn(move |conn| {
            conn.query_row(&sql, rusqlite::params_from_iter(vp.iter()), row_to_concept)
                .optional()
        })?
        .ok_or_else(|| EngineError::NotFound(format!("concept '{}' not found", node_id_or_name)))
}

/// Resolves a live Concept by normalized name (trim + lowercase) within
/// the current graph, matching against a normalized projection of the
/// *stored* name rather than an exact-match equality. Concept names keep
/// their natural casing at rest (invariant 4 makes `(graph_id, name)` a
/// case-sensitive key); this lookup exists for callers — claim-mention
/// resolution, chiefly — that only have a normalized candidate name and
/// must still match `"Acme Corp"` against a mention of `"acme corp"`.
pub fn resolve_concept_by_normalized_name(
    store: &Store,
    scope: &ActiveScope,
    normalized_name: &str,
) -> EngineResult<Concept> {
    let filter = VisibilityFilter::new(scope.graph_id.clone(), scope.branch_id.clone());
    let (visible, mut vp) = filter.concepts_clause("c");
    vp.insert(0, normalized_name.to_string());
    let sql = format!("SELECT * FROM concepts c WHERE LOWER(TRIM(c.name)) = ? AND {visible}");
    store
        .with_conn(move |conn| {
            conn.query_row(&sql, rusqlite::params_from_iter(vp.iter()), row_to_concept)
                .optional()
        })?
        .ok_or_else(|| EngineError::NotFound(format!("concept '{}' not found", normalized_name)))
}

/// Partial update; rejects changes to `graph_id`/`node_id` by construction
/// (the patch type carries neither).
pub fn update_concept(
    store: &Store,
    scope: &ActiveScope,
    id: &ConceptId,
    patch: ConceptPatch,
) -> EngineResult<Concept> {
    let existing = get_concept(store, scope, id)?;
    let name = patch.name.unwrap_or(existing.name);
    let domain = patch.domain.or(existing.domain);
    let node_type = patch.node_type.unwrap_or(existing.node_type);
    let description = patch.description.or(existing.description);
    let tags = serde_json::to_string(&patch.tags.unwrap_or(existing.tags))?;
    let now = Utc::now().to_rfc3339();

    let updated = store.with_conn(|conn| {
        conn.execute(
            "UPDATE concepts SET name = ?1, domain = ?2, node_type = ?3, description = ?4, \
             tags_json = ?5, updated_at = ?6 WHERE node_id = ?7",
            params![name, domain, node_type, description, tags, now, id.as_str()],
        )
    });
    match updated {
        Ok(_) => get_concept(store, scope, id),
        Err(EngineError::Internal(msg)) if msg.contains("UNIQUE constraint failed") => {
            Err(EngineError::Conflict(format!("concept name already in use: {}", name)))
        }
        Err(other) => Err(other),
    }
}

/// Permanently removes a live Concept and every Relationship incident to
/// it (DETACH delete). Unlike [`merge_concepts`](super::merge::merge_concepts),
/// this has no tombstone: callers that want an auditable, reversible
/// removal should merge into a placeholder node instead.
pub fn delete_concept(store: &Store, scope: &ActiveScope, id: &ConceptId) -> EngineResult<()> {
    store.transaction(|tx| {
        tx.execute(
            "DELETE FROM relationships WHERE graph_id = ?1 AND (source_id = ?2 OR target_id = ?2)",
            params![scope.graph_id.as_str(), id.as_str()],
        )?;
        tx.execute("DELETE FROM claim_mentions WHERE node_id = ?1", params![id.as_str()])?;
        tx.execute("DELETE FROM community_members WHERE node_id = ?1", params![id.as_str()])?;
        tx.execute(
            "DELETE FROM concepts WHERE node_id = ?1 AND graph_id = ?2",
            params![id.as_str(), scope.graph_id.as_str()],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::scope::ScopeResolver;

    fn scope(store: &Store) -> ActiveScope {
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(store, &config);
        resolver
            .resolve_active(&crate::ids::TenantId::from_string("t"))
            .unwrap()
    }

    #[test]
    fn create_and_fetch_round_trips() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let concept = create_concept(
            &store,
            &scope,
            ConceptInput {
                name: "Acme Corp".into(),
                node_type: "Company".into(),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(concept.name, "Acme Corp");
        assert_eq!(concept.on_branches, vec!["main".to_string()]);

        let fetched = get_concept(&store, &scope, &concept.node_id).unwrap();
        assert_eq!(fetched, concept);
    }

    #[test]
    fn duplicate_live_name_in_same_graph_conflicts() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        create_concept(
            &store,
            &scope,
            ConceptInput {
                name: "Acme".into(),
                node_type: "Company".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let err = create_concept(
            &store,
            &scope,
            ConceptInput {
                name: "Acme".into(),
                node_type: "Company".into(),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn resolve_by_name_finds_live_concept() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let created = create_concept(
            &store,
            &scope,
            ConceptInput {
                name: "Beta".into(),
                node_type: "Company".into(),
                ..Default::default()
            },
        )
        .unwrap();
        let resolved = resolve_concept_ref(&store, &scope, "Beta").unwrap();
        assert_eq!(resolved.node_id, created.node_id);
    }

    #[test]
    fn update_preserves_unspecified_fields() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let created = create_concept(
            &store,
            &scope,
            ConceptInput {
                name: "Gamma".into(),
                node_type: "Company".into(),
                description: Some("desc".into()),
                ..Default::default()
            },
        )
        .unwrap();
        let updated = update_concept(
            &store,
            &scope,
            &created.node_id,
            ConceptPatch {
                domain: Some("finance".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(updated.description, Some("desc".into()));
        assert_eq!(updated.domain, Some("finance".into()));
        assert_eq!(updated.name, "Gamma");
    }

    #[test]
    fn delete_concept_removes_it_and_its_incident_edges() {
        use crate::entities::relationship::{create_relationship, RelationshipAttrs};

        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let a = create_concept(&store, &scope, ConceptInput { name: "A".into(), node_type: "X".into(), ..Default::default() }).unwrap();
        let b = create_concept(&store, &scope, ConceptInput { name: "B".into(), node_type: "X".into(), ..Default::default() }).unwrap();
        create_relationship(&store, &scope, a.node_id.as_str(), b.node_id.as_str(), "RELATED_TO", RelationshipAttrs::default()).unwrap();

        delete_concept(&store, &scope, &a.node_id).unwrap();

        assert!(get_concept(&store, &scope, &a.node_id).is_err());
        let neighbors = crate::entities::relationship::get_neighbors(
            &store, &scope, b.node_id.as_str(), crate::scope::IncludeProposed::Include,
        ).unwrap();
        assert!(neighbors.is_empty());
    }
}
