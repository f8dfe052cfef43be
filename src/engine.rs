//! `Engine`: the single facade every transport (the `service` feature, a
//! future CLI, a test harness) drives instead of reaching into
//! `entities`/`ingest`/`retrieval`/... directly. It owns the `Store`, the
//! process `EngineConfig`, the rate limiters guarding outbound collaborator
//! calls, and the two collaborator seams, and is responsible for resolving
//! tenant scope and enforcing the handful of cross-cutting rules (demo-mode
//! write rejection, per-tenant throttling, deadline propagation) once
//! rather than at every call site.

use std::sync::Arc;

use crate::branches::{self, Anchor, Branch, BranchMessage, BridgingHint, HintInput};
use crate::collaborators::{EmbeddingCollaborator, LlmCollaborator};
use crate::config::EngineConfig;
use crate::deadline::Deadline;
use crate::entities::artifact::{self};
use crate::entities::claim::{self, ClaimInput};
use crate::entities::community::{self};
use crate::entities::concept::{self, ConceptInput, ConceptPatch};
use crate::entities::graphspace::{self, GraphOverview};
use crate::entities::merge::{self, MergeOutcome};
use crate::entities::model::{
    Artifact, Claim, Community, Concept, MergeCandidate, MergeCandidateStatus, Quote,
    Relationship, RelationshipStatus, SourceChunk, SourceDocument,
};
use crate::entities::relationship::{self, RelationshipAttrs};
use crate::entities::source::{self};
use crate::error::{EngineError, EngineResult};
use crate::ids::{
    ArtifactId, ClaimId, CommunityId, ConceptId, ContextualBranchId, EdgeId, GraphId,
    MergeCandidateId, QuoteId, SourceChunkId, SourceDocumentId, TenantId,
};
use crate::ingest::{self, ArtifactInput, IngestionActions, IngestionPolicy, IngestionResult};
use crate::limits::RateLimiters;
use crate::retrieval::{self, filters::RetrievalFilters, RetrievalResult};
use crate::review::{self, Pagination};
use crate::scope::{ActiveScope, IncludeProposed, ScopeResolver};
use crate::store::Store;
use crate::sync::{self, SyncEvent, SyncEventResult};

/// Owns the backing store and every process-wide collaborator/limiter this
/// crate needs, and is the type every public operation hangs off of.
/// Cheap to clone the pieces it wraps but the `Engine` itself is meant to be
/// constructed once per process and shared behind an `Arc`.
pub struct Engine {
    store: Store,
    config: EngineConfig,
    limiters: RateLimiters,
    llm: Arc<dyn LlmCollaborator>,
    embeddings: Arc<dyn EmbeddingCollaborator>,
}

impl Engine {
    pub fn new(
        store: Store,
        config: EngineConfig,
        llm: Arc<dyn LlmCollaborator>,
        embeddings: Arc<dyn EmbeddingCollaborator>,
    ) -> Self {
        let limiters = RateLimiters::new(config.rate_limit);
        Self { store, config, limiters, llm, embeddings }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn resolver(&self) -> ScopeResolver<'_> {
        ScopeResolver::new(&self.store, &self.config)
    }

    /// The tenant's currently active `(graph, branch)` pair, creating the
    /// default one on first use.
    pub fn active_scope(&self, tenant_id: &TenantId) -> EngineResult<ActiveScope> {
        self.resolver().resolve_active(tenant_id)
    }

    /// Switches the tenant's active graph, rejecting graphs owned by a
    /// different tenant or that don't exist.
    pub fn switch_graph(&self, tenant_id: &TenantId, graph_id: &GraphId) -> EngineResult<ActiveScope> {
        self.resolver().set_active_graph(tenant_id, graph_id)
    }

    /// Every GraphSpace owned by `tenant_id`.
    pub fn list_graphs(&self, tenant_id: &TenantId) -> EngineResult<Vec<crate::scope::GraphSpace>> {
        self.resolver().list_graphs(tenant_id)
    }

    /// Creates a new GraphSpace and switches it active.
    pub fn create_graph(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> EngineResult<crate::scope::GraphSpace> {
        self.guard_write(tenant_id)?;
        self.resolver().create_graph(tenant_id, name)
    }

    /// Renames a GraphSpace.
    pub fn rename_graph(
        &self,
        tenant_id: &TenantId,
        graph_id: &GraphId,
        name: &str,
    ) -> EngineResult<crate::scope::GraphSpace> {
        self.guard_write(tenant_id)?;
        self.resolver().rename_graph(tenant_id, graph_id, name)
    }

    /// Deletes a GraphSpace; the default graph is never deletable.
    pub fn delete_graph(&self, tenant_id: &TenantId, graph_id: &GraphId) -> EngineResult<()> {
        self.guard_write(tenant_id)?;
        self.resolver().delete_graph(tenant_id, graph_id)
    }

    /// Demo-mode tenants may read freely but never mutate graph state: their
    /// fixed demo graph is a shared, reset-on-a-schedule sandbox.
    /// Every mutating method below calls this before touching the store.
    fn guard_write(&self, tenant_id: &TenantId) -> EngineResult<()> {
        if tenant_id.as_str() == "demo" {
            return Err(EngineError::Forbidden(
                "demo-mode tenants cannot write to the graph".into(),
            ));
        }
        Ok(())
    }

    // ---- Concepts ---------------------------------------------------

    pub fn create_concept(&self, tenant_id: &TenantId, input: ConceptInput) -> EngineResult<Concept> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        concept::create_concept(&self.store, &scope, input)
    }

    pub fn get_concept(&self, tenant_id: &TenantId, id: &ConceptId) -> EngineResult<Concept> {
        let scope = self.active_scope(tenant_id)?;
        concept::get_concept(&self.store, &scope, id)
    }

    pub fn resolve_concept(&self, tenant_id: &TenantId, node_id_or_name: &str) -> EngineResult<Concept> {
        let scope = self.active_scope(tenant_id)?;
        concept::resolve_concept_ref(&self.store, &scope, node_id_or_name)
    }

    pub fn update_concept(
        &self,
        tenant_id: &TenantId,
        id: &ConceptId,
        patch: ConceptPatch,
    ) -> EngineResult<Concept> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        concept::update_concept(&self.store, &scope, id, patch)
    }

    pub fn delete_concept(&self, tenant_id: &TenantId, id: &ConceptId) -> EngineResult<()> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        concept::delete_concept(&self.store, &scope, id)
    }

    // ---- Relationships ------------------------------------------------

    pub fn create_relationship(
        &self,
        tenant_id: &TenantId,
        src: &str,
        dst: &str,
        predicate: &str,
        attrs: RelationshipAttrs,
    ) -> EngineResult<Relationship> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        relationship::create_relationship(&self.store, &scope, src, dst, predicate, attrs)
    }

    pub fn get_relationship(&self, id: &EdgeId) -> EngineResult<Relationship> {
        relationship::get_relationship(&self.store, id)
    }

    pub fn delete_relationship(
        &self,
        tenant_id: &TenantId,
        src: &str,
        dst: &str,
        predicate: &str,
    ) -> EngineResult<bool> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        relationship::delete_relationship(&self.store, &scope, src, dst, predicate)
    }

    pub fn get_neighbors(
        &self,
        tenant_id: &TenantId,
        node_id: &str,
        include_proposed: IncludeProposed,
    ) -> EngineResult<Vec<Relationship>> {
        let scope = self.active_scope(tenant_id)?;
        relationship::get_neighbors(&self.store, &scope, node_id, include_proposed)
    }

    /// The top-N-by-degree subgraph for the tenant's active graph.
    pub fn graph_overview(
        &self,
        tenant_id: &TenantId,
        limit_nodes: usize,
        limit_edges: usize,
        include_proposed: IncludeProposed,
    ) -> EngineResult<GraphOverview> {
        let scope = self.active_scope(tenant_id)?;
        graphspace::get_graph_overview(&self.store, &scope, limit_nodes, limit_edges, include_proposed)
    }

    // ---- Artifacts & Quotes --------------------------------------------

    pub fn get_or_create_artifact(
        &self,
        tenant_id: &TenantId,
        url: &str,
        content_hash: &str,
        artifact_type: &str,
        title: Option<&str>,
        text: &str,
        metadata: serde_json::Value,
    ) -> EngineResult<Artifact> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        artifact::get_or_create_artifact(&self.store, &scope, url, content_hash, artifact_type, title, text, metadata)
    }

    pub fn get_artifact(&self, id: &ArtifactId) -> EngineResult<Artifact> {
        artifact::get_artifact(&self.store, id)
    }

    pub fn create_quote(
        &self,
        tenant_id: &TenantId,
        artifact_id: &ArtifactId,
        text: &str,
        anchor: serde_json::Value,
        confidence: f64,
    ) -> EngineResult<Quote> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        artifact::create_quote(&self.store, &scope, artifact_id, text, anchor, confidence)
    }

    // ---- Claims ---------------------------------------------------------

    pub fn create_claim(&self, tenant_id: &TenantId, input: ClaimInput) -> EngineResult<Claim> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        claim::create_claim(&self.store, &scope, input)
    }

    pub fn get_claim(&self, id: &ClaimId) -> EngineResult<Claim> {
        claim::get_claim(&self.store, id)
    }

    pub fn accept_claim(&self, tenant_id: &TenantId, id: &ClaimId) -> EngineResult<Claim> {
        self.guard_write(tenant_id)?;
        claim::accept_claim(&self.store, id)
    }

    // ---- Communities ------------------------------------------------

    pub fn create_community(
        &self,
        tenant_id: &TenantId,
        name: &str,
        summary: &str,
        member_node_ids: &[String],
    ) -> EngineResult<Community> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        community::create_community(&self.store, &scope, name, summary, member_node_ids)
    }

    pub fn get_community(&self, id: &CommunityId) -> EngineResult<Community> {
        community::get_community(&self.store, id)
    }

    // ---- Source documents & chunks --------------------------------------

    pub fn get_or_create_document(
        &self,
        tenant_id: &TenantId,
        source: crate::entities::model::DocumentSource,
        external_id: &str,
        url: Option<&str>,
    ) -> EngineResult<SourceDocument> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        source::get_or_create_document(&self.store, &scope, source, external_id, url)
    }

    pub fn get_chunks_for_document(&self, source_id: &SourceDocumentId) -> EngineResult<Vec<SourceChunk>> {
        source::get_chunks_for_document(&self.store, source_id)
    }

    // ---- Ingestion --------------------------------------------------------

    /// Runs the ingestion pipeline for one artifact. Throttled
    /// by the tenant's outbound-collaborator rate limit whenever the policy
    /// actually calls out to the LLM collaborator (`!policy.local_only`).
    pub async fn ingest_artifact(
        &self,
        tenant_id: &TenantId,
        input: ArtifactInput,
        actions: IngestionActions,
        policy: IngestionPolicy,
        deadline: Deadline,
    ) -> EngineResult<IngestionResult> {
        self.guard_write(tenant_id)?;
        deadline.check()?;
        if !policy.local_only {
            self.limiters.check_tenant(tenant_id.as_str())?;
        }
        let scope = self.active_scope(tenant_id)?;
        ingest::ingest(&self.store, &scope, input, actions, policy, self.llm.as_ref()).await
    }

    // ---- Retrieval --------------------------------------------------------

    /// Runs a retrieval turn for `message`. Always throttled:
    /// every intent branch either classifies via the LLM collaborator or
    /// embeds via the embedding collaborator.
    pub async fn retrieve(
        &self,
        tenant_id: &TenantId,
        message: &str,
        known_concept_names: &[String],
        filters: &RetrievalFilters,
        deadline: Deadline,
    ) -> EngineResult<RetrievalResult> {
        deadline.check()?;
        self.limiters.check_tenant(tenant_id.as_str())?;
        let scope = self.active_scope(tenant_id)?;
        retrieval::retrieve(
            &self.store,
            &scope,
            message,
            known_concept_names,
            filters,
            self.llm.as_ref(),
            self.embeddings.as_ref(),
        )
        .await
    }

    // ---- Merge candidates --------------------------------------------

    /// Generates fresh merge candidates for the tenant's active graph.
    /// Throttled like retrieval since it embeds every live Concept's name.
    pub async fn generate_merge_candidates(
        &self,
        tenant_id: &TenantId,
        deadline: Deadline,
    ) -> EngineResult<Vec<MergeCandidate>> {
        self.guard_write(tenant_id)?;
        deadline.check()?;
        self.limiters.check_tenant(tenant_id.as_str())?;
        let scope = self.active_scope(tenant_id)?;
        merge::generate_merge_candidates(&self.store, &scope, self.embeddings.as_ref()).await
    }

    pub fn merge_concepts(
        &self,
        tenant_id: &TenantId,
        keep_id: &str,
        drop_id: &str,
        reviewer: &str,
    ) -> EngineResult<MergeOutcome> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        merge::merge_concepts(&self.store, &scope, keep_id, drop_id, reviewer)
    }

    // ---- Review: proposed relationships -------------------------------

    pub fn list_proposed_relationships(
        &self,
        tenant_id: &TenantId,
        status: RelationshipStatus,
        ingestion_run_id: Option<&str>,
        pagination: Pagination,
    ) -> EngineResult<Vec<Relationship>> {
        let scope = self.active_scope(tenant_id)?;
        review::list_proposed_relationships(&self.store, scope.graph_id.as_str(), status, ingestion_run_id, pagination)
    }

    pub fn accept_relationships(
        &self,
        tenant_id: &TenantId,
        edge_ids: &[EdgeId],
        reviewer: &str,
    ) -> EngineResult<usize> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        review::accept_relationships(&self.store, scope.graph_id.as_str(), edge_ids, reviewer)
    }

    pub fn reject_relationships(
        &self,
        tenant_id: &TenantId,
        edge_ids: &[EdgeId],
        reviewer: &str,
    ) -> EngineResult<usize> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        review::reject_relationships(&self.store, scope.graph_id.as_str(), edge_ids, reviewer)
    }

    pub fn edit_relationship(
        &self,
        tenant_id: &TenantId,
        src: &str,
        dst: &str,
        old_predicate: &str,
        new_predicate: &str,
        reviewer: &str,
    ) -> EngineResult<u32> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        review::edit_relationship(&self.store, &scope, src, dst, old_predicate, new_predicate, reviewer)
    }

    // ---- Review: merge candidates --------------------------------------

    pub fn list_merge_candidates(
        &self,
        tenant_id: &TenantId,
        status: Option<MergeCandidateStatus>,
    ) -> EngineResult<Vec<MergeCandidate>> {
        let scope = self.active_scope(tenant_id)?;
        review::list_merge_candidates(&self.store, scope.graph_id.as_str(), status)
    }

    pub fn accept_merge_candidate(
        &self,
        tenant_id: &TenantId,
        candidate_id: &MergeCandidateId,
        reviewer: &str,
    ) -> EngineResult<MergeCandidate> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        review::accept_merge_candidate(&self.store, scope.graph_id.as_str(), candidate_id, reviewer)
    }

    pub fn reject_merge_candidate(
        &self,
        tenant_id: &TenantId,
        candidate_id: &MergeCandidateId,
        reviewer: &str,
    ) -> EngineResult<MergeCandidate> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        review::reject_merge_candidate(&self.store, scope.graph_id.as_str(), candidate_id, reviewer)
    }

    pub fn execute_merge_candidate(
        &self,
        tenant_id: &TenantId,
        candidate_id: &MergeCandidateId,
        reviewer: &str,
    ) -> EngineResult<MergeOutcome> {
        self.guard_write(tenant_id)?;
        let scope = self.active_scope(tenant_id)?;
        review::execute_merge_candidate(&self.store, &scope, candidate_id, reviewer)
    }

    // ---- Contextual branches --------------------------------------------
    //
    // Branches are not graph-scoped: they anchor to a chat
    // message id, not a `(graph, branch)` pair, so these pass straight
    // through to the `branches` module without resolving tenant scope.
    // Demo-mode tenants may still open and use branches; only graph writes
    // are pinned.

    pub fn create_branch(
        &self,
        parent_message_id: &str,
        parent_message_content: &str,
        anchor: Anchor,
        chat_id: Option<&str>,
    ) -> EngineResult<Branch> {
        branches::create_branch(&self.store, parent_message_id, parent_message_content, anchor, chat_id)
    }

    pub fn get_branch(&self, id: &ContextualBranchId) -> EngineResult<Branch> {
        branches::get_branch(&self.store, id)
    }

    pub fn branches_for_message(&self, message_id: &str) -> EngineResult<Vec<Branch>> {
        branches::branches_for_message(&self.store, message_id)
    }

    pub fn add_branch_message(
        &self,
        branch_id: &ContextualBranchId,
        role: &str,
        content: &str,
    ) -> EngineResult<BranchMessage> {
        branches::add_message(&self.store, branch_id, role, content)
    }

    pub fn branch_messages(&self, branch_id: &ContextualBranchId) -> EngineResult<Vec<BranchMessage>> {
        branches::messages_for_branch(&self.store, branch_id)
    }

    pub fn save_bridging_hints(
        &self,
        branch_id: &ContextualBranchId,
        hints: Vec<HintInput>,
    ) -> EngineResult<Vec<BridgingHint>> {
        branches::save_bridging_hints(&self.store, branch_id, hints)
    }

    pub fn bridging_hints(&self, branch_id: &ContextualBranchId) -> EngineResult<Vec<BridgingHint>> {
        branches::hints_for_branch(&self.store, branch_id)
    }

    pub fn archive_branch(&self, branch_id: &ContextualBranchId) -> EngineResult<()> {
        branches::archive_branch(&self.store, branch_id)
    }

    pub fn delete_branch(&self, branch_id: &ContextualBranchId) -> EngineResult<()> {
        branches::delete_branch(&self.store, branch_id)
    }

    // ---- Offline sync ------------------------------------------------

    /// Applies a batch of queued client events. Demo-mode
    /// tenants are rejected up front rather than per-event: a batch might
    /// span several event types, some of which are pure writes.
    pub async fn apply_sync_events(
        &self,
        tenant_id: &TenantId,
        events: Vec<SyncEvent>,
    ) -> EngineResult<Vec<SyncEventResult>> {
        self.guard_write(tenant_id)?;
        sync::apply_events(&self.store, &self.config, tenant_id, events, self.llm.as_ref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{HashingEmbeddingCollaborator, NullLlmCollaborator};

    fn test_engine() -> Engine {
        Engine::new(
            Store::open_in_memory().unwrap(),
            EngineConfig::default(),
            Arc::new(NullLlmCollaborator),
            Arc::new(HashingEmbeddingCollaborator::default()),
        )
    }

    #[test]
    fn demo_tenant_cannot_create_concepts() {
        let engine = test_engine();
        let demo = TenantId::from_string("demo");
        let err = engine
            .create_concept(&demo, ConceptInput { name: "X".into(), node_type: "Y".into(), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn demo_tenant_can_still_read() {
        let engine = test_engine();
        let demo = TenantId::from_string("demo");
        let scope = engine.active_scope(&demo).unwrap();
        assert_eq!(scope.graph_id.as_str(), engine.config().demo_graph_id);
        let overview = engine
            .graph_overview(&demo, 10, 10, IncludeProposed::Include)
            .unwrap();
        assert!(overview.nodes.is_empty());
    }

    #[test]
    fn ordinary_tenant_can_create_and_fetch_a_concept() {
        let engine = test_engine();
        let tenant = TenantId::from_string("acme-user");
        let concept = engine
            .create_concept(&tenant, ConceptInput { name: "Acme".into(), node_type: "Company".into(), ..Default::default() })
            .unwrap();
        let fetched = engine.get_concept(&tenant, &concept.node_id).unwrap();
        assert_eq!(fetched.name, "Acme");
    }

    #[tokio::test]
    async fn retrieval_is_rate_limited_per_tenant() {
        let mut config = EngineConfig::default();
        config.rate_limit.burst = 1;
        config.rate_limit.per_tenant_rps = 0.0;
        let engine = Engine::new(
            Store::open_in_memory().unwrap(),
            config,
            Arc::new(NullLlmCollaborator),
            Arc::new(HashingEmbeddingCollaborator::default()),
        );
        let tenant = TenantId::from_string("rate-limited-user");
        let filters = RetrievalFilters::default();
        let first = engine.retrieve(&tenant, "hello", &[], &filters, Deadline::never()).await;
        assert!(first.is_ok());
        let second = engine.retrieve(&tenant, "hello", &[], &filters, Deadline::never()).await;
        assert!(matches!(second, Err(EngineError::Unavailable(_))));
    }

    #[tokio::test]
    async fn ingesting_against_an_expired_deadline_is_canceled() {
        let engine = test_engine();
        let tenant = TenantId::from_string("acme-user");
        let input = ArtifactInput {
            artifact_type: "webpage".into(),
            source_url: "https://x.test".into(),
            external_id: "x".into(),
            text: "hello".into(),
            ..Default::default()
        };
        let expired = Deadline::after(std::time::Duration::from_millis(0));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let result = engine
            .ingest_artifact(&tenant, input, IngestionActions::default(), IngestionPolicy::default(), expired)
            .await;
        assert!(matches!(result, Err(EngineError::Canceled)));
    }
}
