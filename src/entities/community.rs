//! Community CRUD.

use super::model::Community;
use crate::error::{EngineError, EngineResult};
use crate::ids::CommunityId;
use crate::scope::ActiveScope;
use crate::store::Store;

pub fn create_community(
    store: &Store,
    scope: &ActiveScope,
    name: &str,
    summary: &str,
    member_node_ids: &[String],
) -> EngineResult<Community> {
    let community_id = CommunityId::generate();
    store.transaction(|tx| {
        tx.execute(
            "INSERT INTO communities (community_id, graph_id, name, summary) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![community_id.as_str(), scope.graph_id.as_str(), name, summary],
        )?;
        for node_id in member_node_ids {
            tx.execute(
                "INSERT OR IGNORE INTO community_members (community_id, node_id) VALUES (?1, ?2)",
                rusqlite::params![community_id.as_str(), node_id],
            )?;
        }
        Ok(())
    })?;
    get_community(store, &community_id)
}

pub fn get_community(store: &Store, id: &CommunityId) -> EngineResult<Community> {
    let (name, summary): (String, String) = store
        .with_conn(|conn| {
            conn.query_row(
                "SELECT name, summary FROM communities WHERE community_id = ?1",
                [id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
        })
        .map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!("community {} not found", id)),
            other => other,
        })?;
    let member_node_ids = store.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT node_id FROM community_members WHERE community_id = ?1")?;
        stmt.query_map([id.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
    })?;
    Ok(Community {
        community_id: id.clone(),
        graph_id: scope_graph_id(store, id)?,
        name,
        summary,
        member_node_ids,
    })
}

fn scope_graph_id(store: &Store, id: &CommunityId) -> EngineResult<String> {
    store
        .with_conn(|conn| {
            conn.query_row(
                "SELECT graph_id FROM communities WHERE community_id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )
        })
        .map_err(EngineError::from)
}

/// Communities a Concept belongs to.
pub fn communities_for_node(store: &Store, node_id: &str) -> EngineResult<Vec<CommunityId>> {
    store.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT community_id FROM community_members WHERE node_id = ?1")?;
        stmt.query_map([node_id], |row| row.get::<_, String>(0))?
            .map(|r| r.map(CommunityId::from_string))
            .collect::<rusqlite::Result<Vec<_>>>()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::entities::concept::{create_concept, ConceptInput};
    use crate::scope::ScopeResolver;

    #[test]
    fn create_and_lookup_community_membership() {
        let store = Store::open_in_memory().unwrap();
        let config = EngineConfig::default();
        let resolver = ScopeResolver::new(&store, &config);
        let scope = resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap();
        let c1 = create_concept(&store, &scope, ConceptInput { name: "A".into(), node_type: "X".into(), ..Default::default() }).unwrap();

        let community = create_community(&store, &scope, "Fintech", "summary", &[c1.node_id.as_str().to_string()]).unwrap();
        assert_eq!(community.member_node_ids, vec![c1.node_id.as_str().to_string()]);

        let memberships = communities_for_node(&store, c1.node_id.as_str()).unwrap();
        assert_eq!(memberships, vec![community.community_id]);
    }
}
