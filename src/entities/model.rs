//! Plain data carriers for the entity families. Kept free of storage
//! concerns — rows are mapped to/from these in each submodule's
//! `row_to_*` helper, keeping the struct and its persistence separate.

use crate::ids::{
    ArtifactId, ChangeEventId, ClaimId, CommunityId, ConceptId, EdgeId, MergeCandidateId,
    QuoteId, SnapshotId, SourceChunkId, SourceDocumentId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Concept {
    pub node_id: ConceptId,
    pub graph_id: String,
    pub name: String,
    pub domain: Option<String>,
    pub node_type: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub alias_names: Vec<String>,
    pub merged_node_ids: Vec<String>,
    pub is_merged: bool,
    pub merged_into: Option<String>,
    pub merged_at: Option<String>,
    pub on_branches: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelationshipStatus {
    Proposed,
    Accepted,
    Rejected,
}

impl RelationshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipStatus::Proposed => "PROPOSED",
            RelationshipStatus::Accepted => "ACCEPTED",
            RelationshipStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "PROPOSED" => RelationshipStatus::Proposed,
            "REJECTED" => RelationshipStatus::Rejected,
            _ => RelationshipStatus::Accepted,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RelationshipMethod {
    Human,
    Llm,
    Heuristic,
}

impl RelationshipMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipMethod::Human => "human",
            RelationshipMethod::Llm => "llm",
            RelationshipMethod::Heuristic => "heuristic",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "llm" => RelationshipMethod::Llm,
            "heuristic" => RelationshipMethod::Heuristic,
            _ => RelationshipMethod::Human,
        }
    }
}

pub const CROSS_GRAPH_LINK: &str = "CROSS_GRAPH_LINK";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Relationship {
    pub id: EdgeId,
    pub graph_id: String,
    pub source_id: String,
    pub target_id: String,
    pub predicate: String,
    pub on_branches: Vec<String>,
    pub status: RelationshipStatus,
    pub confidence: f64,
    pub method: RelationshipMethod,
    pub rationale: Option<String>,
    pub chunk_id: Option<String>,
    pub ingestion_run_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Artifact {
    pub artifact_id: ArtifactId,
    pub graph_id: String,
    pub url: String,
    pub content_hash: String,
    pub artifact_type: String,
    pub title: Option<String>,
    pub text: String,
    pub metadata: serde_json::Value,
    pub captured_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub quote_id: QuoteId,
    pub graph_id: String,
    pub artifact_id: String,
    pub text: String,
    pub anchor: serde_json::Value,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentSource {
    Web,
    Edgar,
    Ir,
    News,
    Notion,
    Finance,
    Upload,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Web => "WEB",
            DocumentSource::Edgar => "EDGAR",
            DocumentSource::Ir => "IR",
            DocumentSource::News => "NEWS",
            DocumentSource::Notion => "NOTION",
            DocumentSource::Finance => "FINANCE",
            DocumentSource::Upload => "UPLOAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "WEB" => DocumentSource::Web,
            "EDGAR" => DocumentSource::Edgar,
            "IR" => DocumentSource::Ir,
            "NEWS" => DocumentSource::News,
            "NOTION" => DocumentSource::Notion,
            "FINANCE" => DocumentSource::Finance,
            "UPLOAD" => DocumentSource::Upload,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DocumentStatus {
    Discovered,
    Ingested,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Discovered => "DISCOVERED",
            DocumentStatus::Ingested => "INGESTED",
            DocumentStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "INGESTED" => DocumentStatus::Ingested,
            "FAILED" => DocumentStatus::Failed,
            _ => DocumentStatus::Discovered,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    pub doc_id: SourceDocumentId,
    pub graph_id: String,
    pub source: DocumentSource,
    pub external_id: String,
    pub url: Option<String>,
    pub status: DocumentStatus,
    pub checksum: Option<String>,
    pub metadata: serde_json::Value,
    pub published_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceChunk {
    pub chunk_id: SourceChunkId,
    pub graph_id: String,
    pub source_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ClaimStatus {
    Proposed,
    Accepted,
    Stale,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Proposed => "PROPOSED",
            ClaimStatus::Accepted => "ACCEPTED",
            ClaimStatus::Stale => "STALE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ACCEPTED" => ClaimStatus::Accepted,
            "STALE" => ClaimStatus::Stale,
            _ => ClaimStatus::Proposed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claim {
    pub claim_id: ClaimId,
    pub graph_id: String,
    pub text: String,
    pub confidence: f64,
    pub method: String,
    pub source_id: String,
    pub source_span: Option<String>,
    pub chunk_id: String,
    pub embedding: Option<Vec<f32>>,
    pub status: ClaimStatus,
    pub stale_change_event_id: Option<String>,
    pub mentions: Vec<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvidenceSnapshot {
    pub snapshot_id: SnapshotId,
    pub graph_id: String,
    pub source_document_id: Option<String>,
    pub source_url: String,
    pub content_hash: String,
    pub observed_at: String,
    pub normalized_title: Option<String>,
    pub company_id: Option<String>,
    /// Length in bytes of the normalized text this snapshot was taken
    /// from — enough to diff against the next observation's length
    /// without retaining the full normalized text at rest.
    pub normalized_length: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChangeType {
    NewDocument,
    ContentUpdated,
    Amendment,
    MetadataUpdated,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::NewDocument => "NEW_DOCUMENT",
            ChangeType::ContentUpdated => "CONTENT_UPDATED",
            ChangeType::Amendment => "AMENDMENT",
            ChangeType::MetadataUpdated => "METADATA_UPDATED",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChangeEvent {
    pub change_event_id: ChangeEventId,
    pub graph_id: String,
    pub change_type: ChangeType,
    pub severity: Severity,
    pub diff_summary: String,
    pub prev_snapshot_id: Option<String>,
    pub next_snapshot_id: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Community {
    pub community_id: CommunityId,
    pub graph_id: String,
    pub name: String,
    pub summary: String,
    pub member_node_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum MergeCandidateStatus {
    Proposed,
    Accepted,
    Rejected,
    /// Terminal: `executeMergeCandidate` has run `mergeConcepts`.
    Merged,
}

impl MergeCandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeCandidateStatus::Proposed => "PROPOSED",
            MergeCandidateStatus::Accepted => "ACCEPTED",
            MergeCandidateStatus::Rejected => "REJECTED",
            MergeCandidateStatus::Merged => "MERGED",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ACCEPTED" => MergeCandidateStatus::Accepted,
            "REJECTED" => MergeCandidateStatus::Rejected,
            "MERGED" => MergeCandidateStatus::Merged,
            _ => MergeCandidateStatus::Proposed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeCandidate {
    pub candidate_id: MergeCandidateId,
    pub graph_id: String,
    pub src_node_id: String,
    pub dst_node_id: String,
    pub score: f64,
    pub method: String,
    pub rationale: Option<String>,
    pub status: MergeCandidateStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub created_at: String,
}
