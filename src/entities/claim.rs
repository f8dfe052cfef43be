//! Claim CRUD and status transitions.
//!
//! Every ACCEPTED Claim has a non-null `source_id` and `chunk_id` — both
//! are mandatory constructor arguments here, so the invariant holds by
//! construction rather than by a runtime check.

use super::model::{Claim, ClaimStatus};
use crate::error::{EngineError, EngineResult};
use crate::ids::ClaimId;
use crate::scope::ActiveScope;
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, Row};

#[derive(Debug, Clone)]
pub struct ClaimInput {
    pub text: String,
    pub confidence: f64,
    pub method: String,
    pub source_id: String,
    pub source_span: Option<String>,
    pub chunk_id: String,
    pub embedding: Option<Vec<f32>>,
    pub mentions: Vec<String>,
}

fn row_to_claim(row: &Row) -> rusqlite::Result<Claim> {
    let embedding_json: Option<String> = row.get("embedding_json")?;
    Ok(Claim {
        claim_id: ClaimId::from_string(row.get::<_, String>("claim_id")?),
        graph_id: row.get("graph_id")?,
        text: row.get("text")?,
        confidence: row.get("confidence")?,
        method: row.get("method")?,
        source_id: row.get("source_id")?,
        source_span: row.get("source_span")?,
        chunk_id: row.get("chunk_id")?,
        embedding: embedding_json.and_then(|s| serde_json::from_str(&s).ok()),
        status: ClaimStatus::parse(&row.get::<_, String>("status")?),
        stale_change_event_id: row.get("stale_change_event_id")?,
        mentions: Vec::new(),
        created_at: row.get("created_at")?,
    })
}

pub fn create_claim(store: &Store, scope: &ActiveScope, input: ClaimInput) -> EngineResult<Claim> {
    let claim_id = ClaimId::generate();
    let now = Utc::now().to_rfc3339();
    let embedding_json = input.embedding.as_ref().map(|e| serde_json::to_string(e)).transpose()?;

    store.transaction(|tx| {
        tx.execute(
            "INSERT INTO claims \
                (claim_id, graph_id, text, confidence, method, source_id, source_span, chunk_id, \
                 embedding_json, status, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                claim_id.as_str(), scope.graph_id.as_str(), input.text, input.confidence, input.method,
                input.source_id, input.source_span, input.chunk_id, embedding_json,
                ClaimStatus::Proposed.as_str(), now
            ],
        )?;
        for node_id in &input.mentions {
            tx.execute(
                "INSERT OR IGNORE INTO claim_mentions (claim_id, node_id) VALUES (?1, ?2)",
                params![claim_id.as_str(), node_id],
            )?;
        }
        Ok(())
    })?;

    get_claim(store, &claim_id)
}

pub fn get_claim(store: &Store, id: &ClaimId) -> EngineResult<Claim> {
    let mut claim = store
        .with_conn(|conn| {
            conn.query_row("SELECT * FROM claims WHERE claim_id = ?1", [id.as_str()], row_to_claim)
        })
        .map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!("claim {} not found", id)),
            other => other,
        })?;
    claim.mentions = store.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT node_id FROM claim_mentions WHERE claim_id = ?1")?;
        stmt.query_map([id.as_str()], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()
    })?;
    Ok(claim)
}

/// Transitions a Claim to `ACCEPTED`. Requires it currently be `PROPOSED`.
pub fn accept_claim(store: &Store, id: &ClaimId) -> EngineResult<Claim> {
    let claim = get_claim(store, id)?;
    if claim.status != ClaimStatus::Proposed {
        return Err(EngineError::Conflict(format!(
            "claim {} is {:?}, cannot accept", id, claim.status
        )));
    }
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE claims SET status = ?1 WHERE claim_id = ?2",
            params![ClaimStatus::Accepted.as_str(), id.as_str()],
        )
    })?;
    get_claim(store, id)
}

/// Marks a Claim `STALE`, recording the ChangeEvent that superseded its
/// source document.
pub fn mark_claim_stale(
    store: &Store,
    id: &ClaimId,
    change_event_id: &str,
) -> EngineResult<Claim> {
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE claims SET status = ?1, stale_change_event_id = ?2 WHERE claim_id = ?3",
            params![ClaimStatus::Stale.as_str(), change_event_id, id.as_str()],
        )
    })?;
    get_claim(store, id)
}

/// All claims sourced from a given document id, used to find claims a
/// ChangeEvent on that document might stale out.
pub fn claims_for_source(store: &Store, source_id: &str) -> EngineResult<Vec<ClaimId>> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT claim_id FROM claims WHERE source_id = ?1")?;
        stmt.query_map([source_id], |row| row.get::<_, String>(0))?
            .map(|r| r.map(ClaimId::from_string))
            .collect::<rusqlite::Result<Vec<_>>>()
    })
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
        resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap()
    }

    #[test]
    fn create_claim_persists_mentions() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let concept = create_concept(&store, &scope, ConceptInput { name: "A".into(), node_type: "X".into(), ..Default::default() }).unwrap();
        let claim = create_claim(
            &store,
            &scope,
            ClaimInput {
                text: "A raised $5M".into(),
                confidence: 0.9,
                method: "llm".into(),
                source_id: "DOC1".into(),
                source_span: None,
                chunk_id: "CHUNK_1".into(),
                embedding: None,
                mentions: vec![concept.node_id.as_str().to_string()],
            },
        )
        .unwrap();
        assert_eq!(claim.status, ClaimStatus::Proposed);
        assert_eq!(claim.mentions, vec![concept.node_id.as_str().to_string()]);
    }

    #[test]
    fn accept_then_stale_transitions() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let claim = create_claim(
            &store,
            &scope,
            ClaimInput {
                text: "x".into(), confidence: 0.5, method: "human".into(), source_id: "DOC1".into(),
                source_span: None, chunk_id: "CHUNK_1".into(), embedding: None, mentions: vec![],
            },
        )
        .unwrap();
        let accepted = accept_claim(&store, &claim.claim_id).unwrap();
        assert_eq!(accepted.status, ClaimStatus::Accepted);

        let stale = mark_claim_stale(&store, &claim.claim_id, "CHG_1").unwrap();
        assert_eq!(stale.status, ClaimStatus::Stale);
        assert_eq!(stale.stale_change_event_id, Some("CHG_1".to_string()));
    }
}
