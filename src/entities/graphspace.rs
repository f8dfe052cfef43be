//! Graph-level read operations.

use super::model::{Concept, Relationship};
use crate::entities::concept::row_to_concept;
use crate::entities::relationship::row_to_relationship;
use crate::error::EngineResult;
use crate::scope::{ActiveScope, IncludeProposed, VisibilityFilter};
use crate::store::Store;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphOverviewMeta {
    pub total_live_concepts: i64,
    pub nodes_truncated: bool,
    pub edges_truncated: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GraphOverview {
    pub nodes: Vec<Concept>,
    pub edges: Vec<Relationship>,
    pub meta: GraphOverviewMeta,
}

/// The top-`limit_nodes` live Concepts by degree (relationship fan-in plus
/// fan-out, filtered by `include_proposed`), with `edges` restricted to
/// pairs whose *both* endpoints fall in the returned node set, capped at
/// `limit_edges`.
pub fn get_graph_overview(
    store: &Store,
    scope: &ActiveScope,
    limit_nodes: usize,
    limit_edges: usize,
    include_proposed: IncludeProposed,
) -> EngineResult<GraphOverview> {
    let filter = VisibilityFilter::new(scope.graph_id.clone(), scope.branch_id.clone());

    let (c_visible, c_params) = filter.concepts_clause("c");
    let total_live_concepts: i64 = {
        let sql = format!("SELECT COUNT(*) FROM concepts c WHERE {c_visible}");
        let params = c_params.clone();
        store.with_conn(move |conn| {
            conn.query_row(&sql, rusqlite::params_from_iter(params.iter()), |row| row.get(0))
        })?
    };

    let (r_visible, r_params) = filter.relationships_clause("r", include_proposed);
    let degree_sql = format!(
        "SELECT c.*, COALESCE(deg.degree, 0) AS degree FROM concepts c \
         LEFT JOIN ( \
            SELECT node_id, COUNT(*) AS degree FROM ( \
                SELECT r.source_id AS node_id FROM relationships r WHERE {r_visible} \
                UNION ALL \
                SELECT r.target_id AS node_id FROM relationships r WHERE {r_visible} \
            ) GROUP BY node_id \
         ) deg ON deg.node_id = c.node_id \
         WHERE {c_visible} \
         ORDER BY degree DESC, c.created_at ASC \
         LIMIT {limit_nodes}"
    );
    let mut node_params = r_params.clone();
    node_params.extend(r_params.clone());
    node_params.extend(c_params.clone());
    let nodes: Vec<Concept> = store.with_conn(move |conn| {
        let mut stmt = conn.prepare(&degree_sql)?;
        stmt.query_map(rusqlite::params_from_iter(node_params.iter()), row_to_concept)?
            .collect::<rusqlite::Result<Vec<_>>>()
    })?;

    let node_ids: Vec<String> = nodes.iter().map(|c| c.node_id.as_str().to_string()).collect();
    let edges = if node_ids.is_empty() {
        Vec::new()
    } else {
        let placeholders = node_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let (r_visible2, r_params2) = filter.relationships_clause("r", include_proposed);
        let edge_sql = format!(
            "SELECT * FROM relationships r \
             WHERE r.source_id IN ({placeholders}) AND r.target_id IN ({placeholders}) AND {r_visible2} \
             ORDER BY r.created_at \
             LIMIT {limit_edges}"
        );
        let mut edge_params = node_ids.clone();
        edge_params.extend(node_ids.clone());
        edge_params.extend(r_params2);
        store.with_conn(move |conn| {
            let mut stmt = conn.prepare(&edge_sql)?;
            stmt.query_map(rusqlite::params_from_iter(edge_params.iter()), row_to_relationship)?
                .collect::<rusqlite::Result<Vec<_>>>()
        })?
    };

    let nodes_truncated = (total_live_concepts as usize) > nodes.len() && nodes.len() >= limit_nodes;
    let edges_truncated = edges.len() >= limit_edges && limit_edges > 0;
    Ok(GraphOverview {
        nodes,
        edges,
        meta: GraphOverviewMeta {
            total_live_concepts,
            nodes_truncated,
            edges_truncated,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::entities::concept::{create_concept, ConceptInput};
    use crate::entities::relationship::{create_relationship, RelationshipAttrs};
    use crate::scope::ScopeResolver;

    fn scope(store: &Store) -> ActiveScope {
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(store, &config);
        resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap()
    }

    #[test]
    fn overview_contains_nodes_and_the_edge_between_them() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let a = create_concept(&store, &scope, ConceptInput { name: "Transformer".into(), node_type: "concept".into(), ..Default::default() }).unwrap();
        let b = create_concept(&store, &scope, ConceptInput { name: "Attention".into(), node_type: "concept".into(), ..Default::default() }).unwrap();
        create_relationship(
            &store, &scope, a.node_id.as_str(), b.node_id.as_str(), "USES",
            RelationshipAttrs { status: Some(crate::entities::model::RelationshipStatus::Accepted), ..Default::default() },
        ).unwrap();

        let overview = get_graph_overview(&store, &scope, 10, 10, IncludeProposed::Include).unwrap();
        assert_eq!(overview.nodes.len(), 2);
        assert_eq!(overview.edges.len(), 1);
        assert_eq!(overview.meta.total_live_concepts, 2);
    }

    #[test]
    fn edges_excluded_when_one_endpoint_falls_outside_the_node_limit() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let hub = create_concept(&store, &scope, ConceptInput { name: "Hub".into(), node_type: "concept".into(), ..Default::default() }).unwrap();
        for i in 0..3 {
            let leaf = create_concept(&store, &scope, ConceptInput { name: format!("Leaf{i}"), node_type: "concept".into(), ..Default::default() }).unwrap();
            create_relationship(
                &store, &scope, hub.node_id.as_str(), leaf.node_id.as_str(), "RELATED_TO",
                RelationshipAttrs { status: Some(crate::entities::model::RelationshipStatus::Accepted), ..Default::default() },
            ).unwrap();
        }
        let lonely = create_concept(&store, &scope, ConceptInput { name: "Lonely".into(), node_type: "concept".into(), ..Default::default() }).unwrap();

        let overview = get_graph_overview(&store, &scope, 1, 10, IncludeProposed::Include).unwrap();
        assert_eq!(overview.nodes.len(), 1);
        assert_eq!(overview.nodes[0].node_id, hub.node_id);
        assert!(overview.edges.is_empty());
        let _ = lonely;
    }
}
