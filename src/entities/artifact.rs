//! Artifact and Quote CRUD. Artifacts are immutable once
//! created: re-ingesting identical normalized content at the same URL is a
//! no-op by construction of the `(graph_id, url, content_hash)` node key.

use super::model::{Artifact, Quote};
use crate::error::{EngineError, EngineResult};
use crate::ids::{ArtifactId, QuoteId};
use crate::scope::ActiveScope;
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, Row};

fn row_to_artifact(row: &Row) -> rusqlite::Result<Artifact> {
    let metadata_json: String = row.get("metadata_json")?;
    Ok(Artifact {
        artifact_id: ArtifactId::from_string(row.get::<_, String>("artifact_id")?),
        graph_id: row.get("graph_id")?,
        url: row.get("url")?,
        content_hash: row.get("content_hash")?,
        artifact_type: row.get("artifact_type")?,
        title: row.get("title")?,
        text: row.get("text")?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        captured_at: row.get("captured_at")?,
    })
}

/// Returns the existing Artifact for `(graph_id, url, content_hash)` if one
/// exists, otherwise creates it.
pub fn get_or_create_artifact(
    store: &Store,
    scope: &ActiveScope,
    url: &str,
    content_hash: &str,
    artifact_type: &str,
    title: Option<&str>,
    text: &str,
    metadata: serde_json::Value,
) -> EngineResult<Artifact> {
    let existing: Option<String> = store.with_conn(|conn| {
        conn.query_row(
            "SELECT artifact_id FROM artifacts WHERE graph_id = ?1 AND url = ?2 AND content_hash = ?3",
            params![scope.graph_id.as_str(), url, content_hash],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
    })?;

    let artifact_id = match existing {
        Some(id) => ArtifactId::from_string(id),
        None => {
            let id = ArtifactId::generate();
            let now = Utc::now().to_rfc3339();
            let metadata_json = serde_json::to_string(&metadata)?;
            store.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO artifacts \
                        (artifact_id, graph_id, url, content_hash, artifact_type, title, text, \
                         metadata_json, captured_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![id.as_str(), scope.graph_id.as_str(), url, content_hash, artifact_type, title, text, metadata_json, now],
                )
            })?;
            id
        }
    };
    get_artifact(store, &artifact_id)
}

pub fn get_artifact(store: &Store, id: &ArtifactId) -> EngineResult<Artifact> {
    store
        .with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM artifacts WHERE artifact_id = ?1",
                [id.as_str()],
                row_to_artifact,
            )
        })
        .map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!("artifact {} not found", id)),
            other => other,
        })
}

pub fn create_quote(
    store: &Store,
    scope: &ActiveScope,
    artifact_id: &ArtifactId,
    text: &str,
    anchor: serde_json::Value,
    confidence: f64,
) -> EngineResult<Quote> {
    let quote_id = QuoteId::generate();
    let anchor_json = serde_json::to_string(&anchor)?;
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO quotes (quote_id, graph_id, artifact_id, text, anchor_json, confidence) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![quote_id.as_str(), scope.graph_id.as_str(), artifact_id.as_str(), text, anchor_json, confidence],
        )
    })?;
    Ok(Quote {
        quote_id,
        graph_id: scope.graph_id.as_str().to_string(),
        artifact_id: artifact_id.as_str().to_string(),
        text: text.to_string(),
        anchor,
        confidence,
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
        resolver.resolve_active(&crate::ids::TenantId::from_string("t")).unwrap()
    }

    #[test]
    fn reingesting_identical_content_is_a_no_op() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let first = get_or_create_artifact(&store, &scope, "https://x.test", "hash1", "page", None, "hello", serde_json::json!({})).unwrap();
        let second = get_or_create_artifact(&store, &scope, "https://x.test", "hash1", "page", None, "hello", serde_json::json!({})).unwrap();
        assert_eq!(first.artifact_id, second.artifact_id);
    }

    #[test]
    fn changed_content_at_same_url_creates_a_new_artifact() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let first = get_or_create_artifact(&store, &scope, "https://x.test", "hash1", "page", None, "hello", serde_json::json!({})).unwrap();
        let second = get_or_create_artifact(&store, &scope, "https://x.test", "hash2", "page", None, "goodbye", serde_json::json!({})).unwrap();
        assert_ne!(first.artifact_id, second.artifact_id);
    }
}
