//! Contextual branches: anchored sub-conversations over either a text span
//! within a parent message or an opaque anchor reference to a graph-entity
//! region. Stored in the same sqlite database as the rest of
//! the substrate, in their own tabular tables rather than the property
//! graph.

use crate::error::{EngineError, EngineResult};
use crate::ids::ContextualBranchId;
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnchorKind {
    Span,
    Ref,
}

impl AnchorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnchorKind::Span => "span",
            AnchorKind::Ref => "ref",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ref" => AnchorKind::Ref,
            _ => AnchorKind::Span,
        }
    }
}

/// Either a `(start_offset, end_offset)` span within the parent message, or
/// a reference to an external anchor (e.g. a bbox on a note image).
#[derive(Debug, Clone)]
pub struct Anchor {
    pub kind: AnchorKind,
    pub selected_text: String,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
    pub anchor_ref: Option<serde_json::Value>,
}

impl Anchor {
    fn validate(&self) -> EngineResult<()> {
        if self.selected_text.trim().is_empty() {
            return Err(EngineError::Invalid("selected_text must not be empty".into()));
        }
        if self.kind == AnchorKind::Span {
            match (self.start_offset, self.end_offset) {
                (Some(start), Some(end)) if start >= 0 && start < end => {}
                _ => {
                    return Err(EngineError::Invalid(
                        "span anchors require 0 <= start_offset < end_offset".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// The key a branch on this anchor is looked up / idempotently created
    /// under: the parent message id itself for spans, or `anchor:{ref.id}`
    /// for opaque refs.
    fn lookup_key(&self, parent_message_id: &str) -> EngineResult<String> {
        match self.kind {
            AnchorKind::Span => Ok(parent_message_id.to_string()),
            AnchorKind::Ref => {
                let id = self
                    .anchor_ref
                    .as_ref()
                    .and_then(|v| v.get("id"))
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| EngineError::Invalid("ref anchors require anchor_ref.id".into()))?;
                Ok(format!("anchor:{id}"))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub id: ContextualBranchId,
    pub parent_message_id: String,
    pub anchor_kind: String,
    pub selected_text: String,
    pub selected_text_hash: String,
    pub start_offset: Option<i64>,
    pub end_offset: Option<i64>,
    pub chat_id: Option<String>,
    pub parent_message_version: i64,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
}

fn row_to_branch(row: &Row) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: ContextualBranchId::from_string(row.get::<_, String>("id")?),
        parent_message_id: row.get("parent_message_id")?,
        anchor_kind: row.get("anchor_kind")?,
        selected_text: row.get("selected_text")?,
        selected_text_hash: row.get("selected_text_hash")?,
        start_offset: row.get("start_offset")?,
        end_offset: row.get("end_offset")?,
        chat_id: row.get("chat_id")?,
        parent_message_version: row.get("parent_message_version")?,
        archived: row.get::<_, i64>("archived")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn selected_text_hash(selected_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(selected_text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Creates (or returns the existing) Branch anchored to `anchor` within
/// `parent_message_id`. `parent_message_content` is
/// persisted under a monotonically increasing version whenever it differs
/// from the last version recorded for this message, so later edits of the
/// parent never corrupt already-open branches.
pub fn create_branch(
    store: &Store,
    parent_message_id: &str,
    parent_message_content: &str,
    anchor: Anchor,
    chat_id: Option<&str>,
) -> EngineResult<Branch> {
    anchor.validate()?;
    let hash = selected_text_hash(&anchor.selected_text);
    let lookup_key = anchor.lookup_key(parent_message_id)?;

    let existing: Option<String> = store.with_conn(|conn| {
        conn.query_row(
            "SELECT id FROM contextual_branches WHERE parent_message_id = ?1 AND selected_text_hash = ?2",
            params![lookup_key, hash],
            |row| row.get(0),
        )
        .optional()
    })?;
    if let Some(id) = existing {
        return get_branch(store, &ContextualBranchId::from_string(id));
    }

    let version = store.transaction(|tx| {
        let last: Option<i64> = tx
            .query_row(
                "SELECT max(version) FROM parent_message_versions WHERE message_id = ?1",
                [parent_message_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let current_content: Option<String> = match last {
            Some(v) => tx
                .query_row(
                    "SELECT content FROM parent_message_versions WHERE message_id = ?1 AND version = ?2",
                    params![parent_message_id, v],
                    |row| row.get(0),
                )
                .optional()?,
            None => None,
        };
        if current_content.as_deref() == Some(parent_message_content) {
            return Ok(last.unwrap_or(1));
        }
        let next = last.unwrap_or(0) + 1;
        tx.execute(
            "INSERT INTO parent_message_versions (message_id, version, content) VALUES (?1, ?2, ?3)",
            params![parent_message_id, next, parent_message_content],
        )?;
        Ok(next)
    })?;

    let short_hash: String = hash.chars().take(12).collect();
    let id = ContextualBranchId::from_string(format!("branch-{short_hash}"));
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "INSERT INTO contextual_branches \
                (id, parent_message_id, anchor_kind, selected_text, selected_text_hash, \
                 start_offset, end_offset, anchor_ref_json, chat_id, parent_message_version, \
                 archived, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, ?11, ?11)",
            params![
                id.as_str(),
                lookup_key,
                anchor.kind.as_str(),
                anchor.selected_text,
                hash,
                anchor.start_offset,
                anchor.end_offset,
                anchor.anchor_ref.as_ref().map(|v| v.to_string()),
                chat_id,
                version,
                now,
            ],
        )
    })?;
    get_branch(store, &id)
}

pub fn get_branch(store: &Store, id: &ContextualBranchId) -> EngineResult<Branch> {
    store
        .with_conn(|conn| {
            conn.query_row(
                "SELECT * FROM contextual_branches WHERE id = ?1",
                [id.as_str()],
                row_to_branch,
            )
        })
        .map_err(|e| match e {
            EngineError::NotFound(_) => EngineError::NotFound(format!("branch {} not found", id)),
            other => other,
        })
}

/// Every Branch anchored to `message_id` (either as its parent directly, or
/// as `anchor:{ref.id}` — callers pass whichever key they anchored under).
pub fn branches_for_message(store: &Store, message_id: &str) -> EngineResult<Vec<Branch>> {
    store.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM contextual_branches WHERE parent_message_id = ?1 ORDER BY created_at")?;
        stmt.query_map([message_id], row_to_branch)?
            .collect::<rusqlite::Result<Vec<_>>>()
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BranchMessage {
    pub id: String,
    pub branch_id: String,
    pub role: String,
    pub content: String,
    pub created_at: String,
}

/// Appends a message to a Branch's history and bumps its `updated_at`
///. Concurrent appends to the same branch are
/// serialized by the store's transaction.
pub fn add_message(store: &Store, branch_id: &ContextualBranchId, role: &str, content: &str) -> EngineResult<BranchMessage> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    store.transaction(|tx| {
        tx.execute(
            "INSERT INTO branch_messages (id, branch_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, branch_id.as_str(), role, content, now],
        )?;
        tx.execute(
            "UPDATE contextual_branches SET updated_at = ?1 WHERE id = ?2",
            params![now, branch_id.as_str()],
        )?;
        Ok(())
    })?;
    Ok(BranchMessage {
        id,
        branch_id: branch_id.as_str().to_string(),
        role: role.to_string(),
        content: content.to_string(),
        created_at: now,
    })
}

pub fn messages_for_branch(store: &Store, branch_id: &ContextualBranchId) -> EngineResult<Vec<BranchMessage>> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, branch_id, role, content, created_at FROM branch_messages \
             WHERE branch_id = ?1 ORDER BY created_at",
        )?;
        stmt.query_map([branch_id.as_str()], |row| {
            Ok(BranchMessage {
                id: row.get(0)?,
                branch_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgingHint {
    pub id: String,
    pub branch_id: String,
    pub hint_text: String,
    pub target_offset: i64,
}

#[derive(Debug, Clone)]
pub struct HintInput {
    pub hint_text: String,
    pub target_phrase: Option<String>,
}

/// Replaces a Branch's bridging-hint set atomically. `target_offset` for each hint is the first occurrence of its
/// `target_phrase` within the parent message at the branch's stored
/// version; on a miss (or no phrase given), it falls back to the branch
/// anchor's `end_offset`.
pub fn save_bridging_hints(
    store: &Store,
    branch_id: &ContextualBranchId,
    hints: Vec<HintInput>,
) -> EngineResult<Vec<BridgingHint>> {
    let branch = get_branch(store, branch_id)?;
    let parent_content: Option<String> = store.with_conn(|conn| {
        conn.query_row(
            "SELECT content FROM parent_message_versions WHERE message_id = ?1 AND version = ?2",
            params![branch.parent_message_id, branch.parent_message_version],
            |row| row.get(0),
        )
        .optional()
    })?;
    let fallback_offset = branch.end_offset.unwrap_or(0);

    let resolved: Vec<(String, String, i64)> = hints
        .into_iter()
        .map(|h| {
            let offset = h
                .target_phrase
                .as_deref()
                .zip(parent_content.as_deref())
                .and_then(|(phrase, content)| content.find(phrase).map(|b| b as i64))
                .unwrap_or(fallback_offset);
            (uuid::Uuid::new_v4().to_string(), h.hint_text, offset)
        })
        .collect();

    let now = Utc::now().to_rfc3339();
    store.transaction(|tx| {
        tx.execute("DELETE FROM bridging_hints WHERE branch_id = ?1", [branch_id.as_str()])?;
        for (id, hint_text, offset) in &resolved {
            tx.execute(
                "INSERT INTO bridging_hints (id, branch_id, hint_text, target_offset, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, branch_id.as_str(), hint_text, offset, now],
            )?;
        }
        Ok(())
    })?;

    Ok(resolved
        .into_iter()
        .map(|(id, hint_text, target_offset)| BridgingHint {
            id,
            branch_id: branch_id.as_str().to_string(),
            hint_text,
            target_offset,
        })
        .collect())
}

pub fn hints_for_branch(store: &Store, branch_id: &ContextualBranchId) -> EngineResult<Vec<BridgingHint>> {
    store.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, branch_id, hint_text, target_offset FROM bridging_hints WHERE branch_id = ?1",
        )?;
        stmt.query_map([branch_id.as_str()], |row| {
            Ok(BridgingHint {
                id: row.get(0)?,
                branch_id: row.get(1)?,
                hint_text: row.get(2)?,
                target_offset: row.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
    })
}

pub fn archive_branch(store: &Store, branch_id: &ContextualBranchId) -> EngineResult<()> {
    let now = Utc::now().to_rfc3339();
    store.with_conn(|conn| {
        conn.execute(
            "UPDATE contextual_branches SET archived = 1, updated_at = ?1 WHERE id = ?2",
            params![now, branch_id.as_str()],
        )
        .map(|_| ())
    })
}

pub fn delete_branch(store: &Store, branch_id: &ContextualBranchId) -> EngineResult<()> {
    store.transaction(|tx| {
        tx.execute("DELETE FROM bridging_hints WHERE branch_id = ?1", [branch_id.as_str()])?;
        tx.execute("DELETE FROM branch_messages WHERE branch_id = ?1", [branch_id.as_str()])?;
        tx.execute("DELETE FROM contextual_branches WHERE id = ?1", [branch_id.as_str()])?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_anchor(text: &str) -> Anchor {
        Anchor {
            kind: AnchorKind::Span,
            selected_text: text.to_string(),
            start_offset: Some(0),
            end_offset: Some(text.len() as i64),
            anchor_ref: None,
        }
    }

    #[test]
    fn create_branch_is_idempotent_by_content_hash() {
        let store = Store::open_in_memory().unwrap();
        let first = create_branch(&store, "msg-1", "full parent content", span_anchor("parent"), None).unwrap();
        let second = create_branch(&store, "msg-1", "full parent content", span_anchor("parent"), None).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn invalid_span_offsets_are_rejected() {
        let store = Store::open_in_memory().unwrap();
        let bad = Anchor {
            kind: AnchorKind::Span,
            selected_text: "x".into(),
            start_offset: Some(5),
            end_offset: Some(2),
            anchor_ref: None,
        };
        let err = create_branch(&store, "msg-1", "content", bad, None).unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)));
    }

    #[test]
    fn messages_append_and_bump_updated_at() {
        let store = Store::open_in_memory().unwrap();
        let branch = create_branch(&store, "msg-1", "parent content", span_anchor("parent"), None).unwrap();
        add_message(&store, &branch.id, "user", "what does this mean?").unwrap();
        add_message(&store, &branch.id, "assistant", "it means...").unwrap();
        let messages = messages_for_branch(&store, &branch.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "user");
    }

    #[test]
    fn bridging_hints_resolve_target_phrase_or_fall_back_to_anchor_end() {
        let store = Store::open_in_memory().unwrap();
        let anchor = Anchor {
            kind: AnchorKind::Span,
            selected_text: "parent".into(),
            start_offset: Some(0),
            end_offset: Some(6),
            anchor_ref: None,
        };
        let branch = create_branch(&store, "msg-1", "the parent content has more text here", anchor, None).unwrap();
        let hints = save_bridging_hints(
            &store,
            &branch.id,
            vec![
                HintInput { hint_text: "see more".into(), target_phrase: Some("more text".into()) },
                HintInput { hint_text: "no match".into(), target_phrase: Some("nonexistent phrase".into()) },
            ],
        )
        .unwrap();
        assert_eq!(hints[0].target_offset, "the parent content has more text here".find("more text").unwrap() as i64);
        assert_eq!(hints[1].target_offset, 6);
    }

    #[test]
    fn replacing_hints_is_atomic() {
        let store = Store::open_in_memory().unwrap();
        let branch = create_branch(&store, "msg-1", "parent content", span_anchor("parent"), None).unwrap();
        save_bridging_hints(&store, &branch.id, vec![HintInput { hint_text: "a".into(), target_phrase: None }]).unwrap();
        save_bridging_hints(&store, &branch.id, vec![HintInput { hint_text: "b".into(), target_phrase: None }]).unwrap();
        let hints = hints_for_branch(&store, &branch.id).unwrap();
        assert_eq!(hints.len(), 1);
        assert_eq!(hints[0].hint_text, "b");
    }
}
