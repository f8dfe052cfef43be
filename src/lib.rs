//! Knowledge graph engine: a multi-tenant, branch-scoped property-graph
//! substrate for capture, retrieval, and synthesis of learning material.
//!
//! [`Engine`] is the single facade every transport drives: the optional
//! `service` feature's HTTP binary, a CLI, or a test harness. It owns the
//! backing [`store::Store`], process [`config::EngineConfig`], the rate
//! limiters in [`limits`], and the two external-collaborator seams in
//! [`collaborators`].
//!
//! # Layout
//!
//! - [`store`] — transactional façade over the sqlite-backed property
//!   graph, schema bootstrap, transient-failure retry.
//! - [`scope`] — tenant/graph/branch resolution and the visibility
//!   predicate every read applies.
//! - [`entities`] — CRUD and merge semantics for every node/edge family.
//! - [`ingest`] — the artifact ingestion kernel.
//! - [`snapshots`] — content-hash dedup and change-event detection.
//! - [`retrieval`] — intent routing and GraphRAG-style context assembly.
//! - [`branches`] — span/anchor-anchored contextual sub-conversations.
//! - [`sync`] — offline client-event intake and dispatch.
//! - [`review`] — proposed-relationship and merge-candidate queues.

pub mod branches;
pub mod collaborators;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod entities;
pub mod error;
pub mod ids;
pub mod ingest;
pub mod limits;
pub mod retrieval;
pub mod review;
pub mod scope;
pub mod snapshots;
pub mod store;
pub mod sync;

pub use collaborators::{EmbeddingCollaborator, LlmCollaborator};
pub use config::EngineConfig;
pub use deadline::Deadline;
pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use ids::{
    ArtifactId, BranchId, ChangeEventId, ClaimId, ClientEventId, CommunityId, ConceptId,
    ContextualBranchId, EdgeId, GraphId, MergeCandidateId, QuoteId, SnapshotId,
    SourceChunkId, SourceDocumentId, TenantId,
};
pub use scope::{ActiveScope, GraphSpace, IncludeProposed};
pub use store::Store;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
