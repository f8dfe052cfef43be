//! SourceDocument and SourceChunk CRUD.

use super::model::{DocumentSource, DocumentStatus, SourceChunk, SourceDocument};
use crate::error::{EngineError, EngineResult};
use crate::ids::{SourceChunkId, SourceDocumentId};
use crate::scope::ActiveScope;
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, Row};

fn row_to_document(row: &Row) -> rusqlite::Result<SourceDocument> {
    let metadata_json: String = row.get("metadata_json")?;
    Ok(SourceDocument {
        doc_id: SourceDocumentId::from_string(row.get::<_, String>("doc_id")?),
        graph_id: row.get("graph_id")?,
        source: DocumentSource::parse(&row.get::<_, String>("source")?)
            .unwrap_or(DocumentSource::Web),
        external_id: row.get("external_id")?,
        url: row.get("url")?,
        status: DocumentStatus::parse(&row.get::<_, String>("status")?),
        checksum: row.get("checksum")?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        published_at: row.get("published_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Returns the existing SourceDocument for `(graph_id, source, external_id)`
/// if one exists, otherwise creates it in `DISCOVERED` status.
pub fn get_or_create_document(
    store: &Store,
    scope: &ActiveScope,
    source: DocumentSource,
    external_id: &str,
    url: Option<&str>,
) -> EngineResult<SourceDocument> {
    let existing: Option<String> = store.with_conn(|conn| {
        conn.query_row(
            "SELECT doc_id FROM source_documents WHERE graph_id = ?1 AND source = ?2 AND external_id = ?3",
            params![scope.graph_id.as_str(), source.as_str(), external_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })
    })?;

    let doc_id = match existing {
        Some(id) => SourceDocumentId::from_string(id),
        None => {
            let id = SourceDocumentId::generate();
            let now = Utc::now().to_rfc3339();
            store.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO source_documents \
                        (doc_id, graph_id, source, external_id, url, status, metadata_json, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, '{}', ?7, ?7)",
                    params![id.as_str(), scope.graph_id.as_str(), source.as_str(), external_id, url, DocumentStatus::Discovered.as_str(), now],
                )
            })?;
            id
        }
    };
    get_document(store, &doc_id)
}

pub fn get_document(store: &Store, id: &SourceDocumentId) -> EngineResult<SourceDocument> {
    store
        .with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM source_documents WHERE doc_id = ?1",
                [id.as_str()],
                row_to_document,
            )
        })
        .map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!("document {} not found", id)),
            other => other,
        })
}

pub fn set_document_status(
    store: &Store,
    id: &SourceDocumentId,
    status: DocumentStatus,
    checksum: Option<&str>,
) -> EngineResult<SourceDocument> {
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE source_documents SET status = ?1, checksum = coalesce(?2, checksum), updated_at = ?3 \
             WHERE doc_id = ?4",
            params![status.as_str(), checksum, now, id.as_str()],
        )
    })?;
    get_document(store, id)
}

fn row_to_chunk(row: &Row) -> rusqlite::Result<SourceChunk> {
    let metadata_json: String = row.get("metadata_json")?;
    Ok(SourceChunk {
        chunk_id: SourceChunkId::from_string(row.get::<_, String>("chunk_id")?),
        graph_id: row.get("graph_id")?,
        source_id: row.get("source_id")?,
        chunk_index: row.get("chunk_index")?,
        text: row.get("text")?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
    })
}

pub fn create_chunk(
    store: &Store,
    scope: &ActiveScope,
    source_id: &SourceDocumentId,
    chunk_index: i64,
    text: &str,
    metadata: serde_json::Value,
) -> EngineResult<SourceChunk> {
    let chunk_id = SourceChunkId::generate();
    let metadata_json = serde_json::to_string(&metadata)?;
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO source_chunks (chunk_id, graph_id, source_id, chunk_index, text, metadata_json) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![chunk_id.as_str(), scope.graph_id.as_str(), source_id.as_str(), chunk_index, text, metadata_json],
        )
    })?;
    Ok(SourceChunk {
        chunk_id,
        graph_id: scope.graph_id.as_str().to_string(),
        source_id: source_id.as_str().to_string(),
        chunk_index,
        text: text.to_string(),
        metadata,
    })
}

pub fn get_chunks_for_document(
    store: &Store,
    source_id: &SourceDocumentId,
) -> EngineResult<Vec<SourceChunk>> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM source_chunks WHERE source_id = ?1 ORDER BY chunk_index",
        )?;
        stmt.query_map([source_id.as_str()], row_to_chunk)?
            .collect::<rusqlite::Result<Vec<_>>>()
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
    fn get_or_create_document_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let a = get_or_create_document(&store, &scope, DocumentSource::Edgar, "0001-23", None).unwrap();
        let b = get_or_create_document(&store, &scope, DocumentSource::Edgar, "0001-23", None).unwrap();
        assert_eq!(a.doc_id, b.doc_id);
        assert_eq!(a.status, DocumentStatus::Discovered);
    }

    #[test]
    fn chunks_are_ordered_by_index() {
        let store = Store::open_in_memory().unwrap();
        let scope = scope(&store);
        let doc = get_or_create_document(&store, &scope, DocumentSource::Web, "u1", Some("https://x")).unwrap();
        create_chunk(&store, &scope, &doc.doc_id, 1, "second", serde_json::json!({})).unwrap();
        create_chunk(&store, &scope, &doc.doc_id, 0, "first", serde_json::json!({})).unwrap();
        let chunks = get_chunks_for_document(&store, &doc.doc_id).unwrap();
        assert_eq!(chunks.iter().map(|c| c.text.as_str()).collect::<Vec<_>>(), vec!["first", "second"]);
    }
}
