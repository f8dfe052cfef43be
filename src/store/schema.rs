//! Schema bootstrap.
//!
//! Idempotent: every statement is `CREATE TABLE/INDEX IF NOT EXISTS`. Run
//! once per process at `Store::open`, never lazily from a request handler.

use rusqlite::Connection;

pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        PRAGMA journal_mode = WAL;

        -- === Scoping ===

        CREATE TABLE IF NOT EXISTS graph_spaces (
            graph_id    TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            tenant_id   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_graph_spaces_tenant ON graph_spaces(tenant_id);

        CREATE TABLE IF NOT EXISTS branches (
            graph_id    TEXT NOT NULL,
            branch_id   TEXT NOT NULL,
            name        TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            PRIMARY KEY (graph_id, branch_id)
        );

        -- === Concepts & Relationships ===

        CREATE TABLE IF NOT EXISTS concepts (
            node_id             TEXT PRIMARY KEY,
            graph_id            TEXT NOT NULL,
            name                TEXT NOT NULL,
            domain              TEXT,
            node_type           TEXT NOT NULL,
            description         TEXT,
            tags_json           TEXT NOT NULL DEFAULT '[]',
            alias_names_json    TEXT NOT NULL DEFAULT '[]',
            merged_node_ids_json TEXT NOT NULL DEFAULT '[]',
            is_merged           INTEGER NOT NULL DEFAULT 0,
            merged_into         TEXT,
            merged_at           TEXT,
            on_branches_json    TEXT NOT NULL DEFAULT '[]',
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_concepts_graph ON concepts(graph_id);
        -- Node key: (graph_id, name) unique among live (non-merged) concepts.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_concepts_live_name
            ON concepts(graph_id, name) WHERE is_merged = 0;

        CREATE TABLE IF NOT EXISTS relationships (
            id                  TEXT PRIMARY KEY,
            graph_id            TEXT NOT NULL,
            source_id           TEXT NOT NULL,
            target_id           TEXT NOT NULL,
            predicate           TEXT NOT NULL,
            on_branches_json    TEXT NOT NULL DEFAULT '[]',
            status              TEXT NOT NULL DEFAULT 'ACCEPTED',
            confidence          REAL NOT NULL DEFAULT 1.0,
            method              TEXT NOT NULL DEFAULT 'human',
            rationale           TEXT,
            chunk_id            TEXT,
            ingestion_run_id    TEXT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_relationships_triple
            ON relationships(graph_id, source_id, target_id, predicate);
        CREATE INDEX IF NOT EXISTS idx_relationships_source ON relationships(graph_id, source_id);
        CREATE INDEX IF NOT EXISTS idx_relationships_target ON relationships(graph_id, target_id);

        -- === Artifacts & Quotes ===

        CREATE TABLE IF NOT EXISTS artifacts (
            artifact_id     TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            url             TEXT NOT NULL,
            content_hash    TEXT NOT NULL,
            artifact_type   TEXT NOT NULL,
            title           TEXT,
            text            TEXT NOT NULL,
            metadata_json   TEXT NOT NULL DEFAULT '{}',
            captured_at     TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_artifacts_key
            ON artifacts(graph_id, url, content_hash);

        CREATE TABLE IF NOT EXISTS quotes (
            quote_id        TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            artifact_id     TEXT NOT NULL,
            text            TEXT NOT NULL,
            anchor_json     TEXT NOT NULL DEFAULT '{}',
            confidence      REAL NOT NULL DEFAULT 1.0
        );
        CREATE INDEX IF NOT EXISTS idx_quotes_artifact ON quotes(artifact_id);

        -- === Source documents, chunks, claims ===

        CREATE TABLE IF NOT EXISTS source_documents (
            doc_id          TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            source          TEXT NOT NULL,
            external_id     TEXT NOT NULL,
            url             TEXT,
            status          TEXT NOT NULL DEFAULT 'DISCOVERED',
            checksum        TEXT,
            metadata_json   TEXT NOT NULL DEFAULT '{}',
            published_at    TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_source_documents_key
            ON source_documents(graph_id, source, external_id);
        CREATE INDEX IF NOT EXISTS idx_source_documents_url ON source_documents(graph_id, url);

        CREATE TABLE IF NOT EXISTS source_chunks (
            chunk_id        TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            source_id       TEXT NOT NULL,
            chunk_index     INTEGER NOT NULL,
            text            TEXT NOT NULL,
            metadata_json   TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_source_chunks_doc ON source_chunks(source_id);

        CREATE TABLE IF NOT EXISTS claims (
            claim_id                TEXT PRIMARY KEY,
            graph_id                TEXT NOT NULL,
            text                    TEXT NOT NULL,
            confidence              REAL NOT NULL,
            method                  TEXT NOT NULL,
            source_id               TEXT NOT NULL,
            source_span             TEXT,
            chunk_id                TEXT NOT NULL,
            embedding_json          TEXT,
            status                  TEXT NOT NULL DEFAULT 'PROPOSED',
            stale_change_event_id   TEXT,
            created_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_claims_source ON claims(graph_id, source_id);
        CREATE INDEX IF NOT EXISTS idx_claims_chunk ON claims(chunk_id);

        CREATE TABLE IF NOT EXISTS claim_mentions (
            claim_id    TEXT NOT NULL,
            node_id     TEXT NOT NULL,
            PRIMARY KEY (claim_id, node_id)
        );
        CREATE INDEX IF NOT EXISTS idx_claim_mentions_node ON claim_mentions(node_id);

        -- === Evidence snapshots & change events ===

        CREATE TABLE IF NOT EXISTS evidence_snapshots (
            snapshot_id         TEXT PRIMARY KEY,
            graph_id            TEXT NOT NULL,
            source_document_id  TEXT,
            source_url          TEXT NOT NULL,
            content_hash        TEXT NOT NULL,
            observed_at         TEXT NOT NULL,
            normalized_title    TEXT,
            company_id          TEXT,
            normalized_length   INTEGER NOT NULL DEFAULT 0
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshots_key
            ON evidence_snapshots(graph_id, source_url, content_hash);
        CREATE INDEX IF NOT EXISTS idx_snapshots_url ON evidence_snapshots(graph_id, source_url, observed_at);

        CREATE TABLE IF NOT EXISTS change_events (
            change_event_id TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            change_type     TEXT NOT NULL,
            severity        TEXT NOT NULL,
            diff_summary    TEXT NOT NULL,
            prev_snapshot_id TEXT,
            next_snapshot_id TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_change_events_graph ON change_events(graph_id);

        -- === Communities ===

        CREATE TABLE IF NOT EXISTS communities (
            community_id    TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            name            TEXT NOT NULL,
            summary         TEXT NOT NULL DEFAULT ''
        );
        CREATE TABLE IF NOT EXISTS community_members (
            community_id    TEXT NOT NULL,
            node_id         TEXT NOT NULL,
            PRIMARY KEY (community_id, node_id)
        );
        CREATE INDEX IF NOT EXISTS idx_community_members_node ON community_members(node_id);

        -- === Merge candidates ===

        CREATE TABLE IF NOT EXISTS merge_candidates (
            candidate_id    TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            src_node_id     TEXT NOT NULL,
            dst_node_id     TEXT NOT NULL,
            score           REAL NOT NULL,
            method          TEXT NOT NULL,
            rationale       TEXT,
            status          TEXT NOT NULL DEFAULT 'PROPOSED',
            reviewed_by     TEXT,
            reviewed_at     TEXT,
            created_at      TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_merge_candidates_key
            ON merge_candidates(graph_id, candidate_id);
        CREATE INDEX IF NOT EXISTS idx_merge_candidates_status ON merge_candidates(graph_id, status);

        -- === Contextual branches ===

        CREATE TABLE IF NOT EXISTS contextual_branches (
            id                      TEXT PRIMARY KEY,
            parent_message_id      TEXT NOT NULL,
            anchor_kind             TEXT NOT NULL,
            selected_text           TEXT NOT NULL,
            selected_text_hash      TEXT NOT NULL,
            start_offset             INTEGER,
            end_offset               INTEGER,
            anchor_ref_json          TEXT,
            chat_id                  TEXT,
            parent_message_version   INTEGER NOT NULL,
            archived                 INTEGER NOT NULL DEFAULT 0,
            created_at               TEXT NOT NULL,
            updated_at               TEXT NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_contextual_branches_idem
            ON contextual_branches(parent_message_id, selected_text_hash);

        CREATE TABLE IF NOT EXISTS branch_messages (
            id          TEXT PRIMARY KEY,
            branch_id   TEXT NOT NULL,
            role        TEXT NOT NULL,
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_branch_messages_branch ON branch_messages(branch_id, created_at);

        CREATE TABLE IF NOT EXISTS bridging_hints (
            id              TEXT PRIMARY KEY,
            branch_id       TEXT NOT NULL,
            hint_text       TEXT NOT NULL,
            target_offset   INTEGER NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_bridging_hints_branch ON bridging_hints(branch_id);

        CREATE TABLE IF NOT EXISTS parent_message_versions (
            message_id  TEXT NOT NULL,
            version     INTEGER NOT NULL,
            content     TEXT NOT NULL,
            PRIMARY KEY (message_id, version)
        );

        -- === Ingestion runs ===

        CREATE TABLE IF NOT EXISTS ingestion_runs (
            run_id          TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            status          TEXT NOT NULL,
            summary_json    TEXT NOT NULL DEFAULT '{}',
            errors_json     TEXT NOT NULL DEFAULT '[]',
            created_at      TEXT NOT NULL,
            finished_at     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_ingestion_runs_graph ON ingestion_runs(graph_id);

        -- === Offline sync outbox ===

        CREATE TABLE IF NOT EXISTS client_events (
            graph_id        TEXT NOT NULL,
            event_id        TEXT NOT NULL,
            event_type      TEXT NOT NULL,
            branch_id       TEXT,
            payload_json    TEXT NOT NULL,
            applied         INTEGER NOT NULL DEFAULT 0,
            output_json     TEXT,
            error_detail    TEXT,
            received_at     TEXT NOT NULL,
            applied_at      TEXT,
            PRIMARY KEY (graph_id, event_id)
        );

        CREATE TABLE IF NOT EXISTS resources (
            graph_id        TEXT NOT NULL,
            resource_id     TEXT NOT NULL,
            payload_json    TEXT NOT NULL,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            PRIMARY KEY (graph_id, resource_id)
        );
        CREATE TABLE IF NOT EXISTS resource_links (
            graph_id            TEXT NOT NULL,
            node_id             TEXT NOT NULL,
            resource_id         TEXT NOT NULL,
            on_branches_json    TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (graph_id, node_id, resource_id)
        );
        CREATE TABLE IF NOT EXISTS trails (
            graph_id        TEXT NOT NULL,
            trail_id        TEXT NOT NULL,
            payload_json    TEXT NOT NULL,
            PRIMARY KEY (graph_id, trail_id)
        );
        CREATE TABLE IF NOT EXISTS trail_steps (
            graph_id            TEXT NOT NULL,
            trail_id            TEXT NOT NULL,
            step_id              TEXT NOT NULL,
            payload_json         TEXT NOT NULL,
            on_branches_json     TEXT NOT NULL DEFAULT '[]',
            PRIMARY KEY (graph_id, trail_id, step_id)
        );

        -- === Audit log ===

        CREATE TABLE IF NOT EXISTS audit_log (
            id              TEXT PRIMARY KEY,
            graph_id        TEXT NOT NULL,
            actor           TEXT,
            action          TEXT NOT NULL,
            target_kind     TEXT NOT NULL,
            target_id       TEXT NOT NULL,
            detail_json     TEXT NOT NULL DEFAULT '{}',
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_log_graph ON audit_log(graph_id, created_at);
        "#,
    )
}
