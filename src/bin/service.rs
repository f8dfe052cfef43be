//! `kge-service`: a thin axum HTTP layer over [`knowledge_graph_engine::Engine`].
//! HTTP framing, authentication, and authorization policy are explicitly
//! out of scope for the core; this binary is the external collaborator
//! that owns them, kept as small as the route table allows. Every handler
//! does request parsing and response shaping only — all behavior lives in
//! `Engine`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;

use knowledge_graph_engine::branches::{Anchor, AnchorKind, HintInput};
use knowledge_graph_engine::collaborators::{HashingEmbeddingCollaborator, NullLlmCollaborator};
use knowledge_graph_engine::entities::relationship::RelationshipAttrs;
use knowledge_graph_engine::ids::{
    ConceptId, ContextualBranchId, EdgeId, GraphId, MergeCandidateId, TenantId,
};
use knowledge_graph_engine::ingest::{ArtifactInput, IngestionActions, IngestionPolicy};
use knowledge_graph_engine::retrieval::filters::{DetailLevel, EvidenceStrictness, RetrievalFilters};
use knowledge_graph_engine::scope::IncludeProposed;
use knowledge_graph_engine::sync::SyncEvent;
use knowledge_graph_engine::{Deadline, Engine, EngineConfig, EngineError, Store};

struct AppState {
    engine: Engine,
}

/// Every operation runs under a tenant; auth policy is out of scope here,
/// so the tenant is read straight off a header the front door is trusted
/// to have already authenticated.
fn tenant_of(headers: &HeaderMap) -> TenantId {
    let raw = headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("default-tenant");
    TenantId::from_string(raw.to_string())
}

/// Maps a closed [`EngineError`] kind to its HTTP status code.
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({ "error": self.0.to_string() });
        if matches!(self.0, EngineError::Unavailable(_)) {
            body["retry_after_seconds"] = json!(1);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Command-line overrides for the env-var-driven defaults in `EngineConfig`.
#[derive(clap::Parser)]
#[command(name = "kge-service", about = "HTTP service over the knowledge graph engine")]
struct Args {
    /// Port to listen on.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path to the sqlite database file; overrides KGE_DATABASE_PATH.
    #[arg(long)]
    database_path: Option<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = <Args as clap::Parser>::parse();
    let mut config = EngineConfig::from_env();
    if let Some(path) = args.database_path {
        config.database_path = path;
    }
    let store = Store::open(&config.database_path, config.retry).expect("opening store");
    let engine = Engine::new(
        store,
        config,
        Arc::new(NullLlmCollaborator),
        Arc::new(HashingEmbeddingCollaborator::default()),
    );
    let state = Arc::new(AppState { engine });

    let app = Router::new()
        // --- Graphs & scope ---
        .route("/graphs", get(list_graphs).post(create_graph))
        .route("/graphs/:graph_id/select", post(select_graph))
        .route("/graphs/:graph_id", patch(rename_graph).delete(delete_graph))
        .route("/graphs/:graph_id/overview", get(graph_overview))
        .route("/graphs/:graph_id/neighbors", get(graph_neighbors))
        // --- Concepts ---
        .route("/concepts/", post(create_concept))
        .route("/concepts/:id", get(get_concept).put(update_concept).delete(delete_concept))
        .route("/concepts/by-name/:name", get(get_concept_by_name))
        .route(
            "/concepts/relationship",
            post(create_relationship_accepted).delete(delete_relationship),
        )
        .route("/concepts/relationship-by-ids", post(create_relationship_accepted))
        .route("/concepts/relationship/propose", post(create_relationship_proposed))
        .route("/concepts/:id/link-cross-graph", post(link_cross_graph))
        // --- Review ---
        .route("/review/relationships", get(list_proposed_relationships))
        .route("/review/relationships/accept", post(accept_relationships))
        .route("/review/relationships/reject", post(reject_relationships))
        .route("/review/relationships/edit", post(edit_relationship))
        .route("/review/merges", get(list_merge_candidates))
        .route("/review/merges/accept", post(accept_merge_candidate))
        .route("/review/merges/reject", post(reject_merge_candidate))
        .route("/review/merges/execute", post(execute_merge_candidate))
        .route("/review/merges/generate", post(generate_merge_candidates))
        // --- Retrieval ---
        .route("/ai/retrieve", post(retrieve))
        // --- Ingestion ---
        .route("/web/ingest", post(web_ingest))
        .route("/lectures/ingest", post(lectures_ingest))
        .route("/notion/ingest", post(notion_ingest))
        .route("/finance/ingest", post(finance_ingest))
        // --- Sync & offline ---
        .route("/sync/events", post(sync_events))
        // --- Contextual branches ---
        .route("/contextual-branches", post(create_branch))
        .route("/contextual-branches/:id", get(get_branch).delete(delete_branch))
        .route("/contextual-branches/:id/messages", post(add_branch_message).get(list_branch_messages))
        .route("/contextual-branches/:id/hints", post(save_bridging_hints).get(list_bridging_hints))
        .route("/contextual-branches/messages/:message_id/branches", get(branches_for_message))
        .route("/contextual-branches/:id/archive", post(archive_branch))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    tracing::info!(%addr, "kge-service listening");
    let listener = tokio::net::TcpListener::bind(addr).await.expect("binding listener");
    axum::serve(listener, app).await.expect("serving http");
}

// ------------------------------------------------------------------------
// Graphs & scope
// ------------------------------------------------------------------------

async fn list_graphs(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let graphs = state.engine.list_graphs(&tenant)?;
    let active = state.engine.active_scope(&tenant)?;
    Ok(Json(json!({
        "graphs": graphs,
        "active_graph_id": active.graph_id,
        "active_branch_id": active.branch_id,
    })))
}

#[derive(Deserialize)]
struct CreateGraphBody {
    name: String,
}

async fn create_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateGraphBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let graph = state.engine.create_graph(&tenant, &body.name)?;
    let active = state.engine.switch_graph(&tenant, &graph.graph_id)?;
    Ok(Json(json!({ "graph": graph, "active_branch_id": active.branch_id })))
}

async fn select_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(graph_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let active = state.engine.switch_graph(&tenant, &GraphId::from_string(graph_id))?;
    Ok(Json(json!({ "active_graph_id": active.graph_id, "active_branch_id": active.branch_id })))
}

#[derive(Deserialize)]
struct RenameGraphBody {
    name: String,
}

async fn rename_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(graph_id): Path<String>,
    Json(body): Json<RenameGraphBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let graph = state.engine.rename_graph(&tenant, &GraphId::from_string(graph_id), &body.name)?;
    Ok(Json(serde_json::to_value(graph).unwrap()))
}

async fn delete_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(graph_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tenant = tenant_of(&headers);
    state.engine.delete_graph(&tenant, &GraphId::from_string(graph_id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct OverviewParams {
    #[serde(default = "default_limit")]
    limit_nodes: usize,
    #[serde(default = "default_limit")]
    limit_edges: usize,
    #[serde(default)]
    include_proposed: IncludeProposedParam,
}

fn default_limit() -> usize {
    50
}

async fn graph_overview(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_graph_id): Path<String>,
    Query(params): Query<OverviewParams>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let overview = state.engine.graph_overview(
        &tenant,
        params.limit_nodes,
        params.limit_edges,
        params.include_proposed.0,
    )?;
    Ok(Json(json!({
        "nodes": overview.nodes,
        "edges": overview.edges,
        "meta": {
            "total_live_concepts": overview.meta.total_live_concepts,
            "nodes_truncated": overview.meta.nodes_truncated,
            "edges_truncated": overview.meta.edges_truncated,
        },
    })))
}

#[derive(Deserialize)]
struct NeighborsParams {
    concept_id: String,
    #[serde(default)]
    include_proposed: IncludeProposedParam,
}

async fn graph_neighbors(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(_graph_id): Path<String>,
    Query(params): Query<NeighborsParams>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let edges = state.engine.get_neighbors(&tenant, &params.concept_id, params.include_proposed.0)?;
    Ok(Json(json!({ "center": params.concept_id, "edges": edges })))
}

/// `?include_proposed=true|false|auto`, defaulting to `false`.
#[derive(Clone, Copy)]
struct IncludeProposedParam(IncludeProposed);

impl Default for IncludeProposedParam {
    fn default() -> Self {
        IncludeProposedParam(IncludeProposed::Exclude)
    }
}

impl<'de> Deserialize<'de> for IncludeProposedParam {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(IncludeProposedParam(match raw.as_str() {
            "true" => IncludeProposed::Include,
            "auto" => IncludeProposed::Auto,
            _ => IncludeProposed::Exclude,
        }))
    }
}

// ------------------------------------------------------------------------
// Concepts
// ------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateConceptBody {
    name: String,
    #[serde(rename = "type")]
    node_type: String,
    domain: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

async fn create_concept(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateConceptBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let input = knowledge_graph_engine::entities::concept::ConceptInput {
        name: body.name,
        domain: body.domain,
        node_type: body.node_type,
        description: body.description,
        tags: body.tags,
    };
    let concept = state.engine.create_concept(&tenant, input)?;
    Ok(Json(serde_json::to_value(concept).unwrap()))
}

async fn get_concept(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let concept = state.engine.get_concept(&tenant, &ConceptId::from_string(id))?;
    Ok(Json(serde_json::to_value(concept).unwrap()))
}

async fn get_concept_by_name(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let concept = state.engine.resolve_concept(&tenant, &name)?;
    Ok(Json(serde_json::to_value(concept).unwrap()))
}

#[derive(Deserialize, Default)]
struct UpdateConceptBody {
    name: Option<String>,
    domain: Option<String>,
    #[serde(rename = "type")]
    node_type: Option<String>,
    description: Option<String>,
    tags: Option<Vec<String>>,
}

async fn update_concept(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<UpdateConceptBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let patch = knowledge_graph_engine::entities::concept::ConceptPatch {
        name: body.name,
        domain: body.domain,
        node_type: body.node_type,
        description: body.description,
        tags: body.tags,
    };
    let concept = state.engine.update_concept(&tenant, &ConceptId::from_string(id), patch)?;
    Ok(Json(serde_json::to_value(concept).unwrap()))
}

async fn delete_concept(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let tenant = tenant_of(&headers);
    state.engine.delete_concept(&tenant, &ConceptId::from_string(id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RelationshipBody {
    source_name: Option<String>,
    target_name: Option<String>,
    source_id: Option<String>,
    target_id: Option<String>,
    predicate: String,
    confidence: Option<f64>,
    rationale: Option<String>,
}

impl RelationshipBody {
    fn endpoints(&self) -> Result<(&str, &str), ApiError> {
        let src = self.source_id.as_deref().or(self.source_name.as_deref());
        let dst = self.target_id.as_deref().or(self.target_name.as_deref());
        match (src, dst) {
            (Some(s), Some(d)) => Ok((s, d)),
            _ => Err(ApiError(EngineError::Invalid(
                "relationship requires source/target id or name".into(),
            ))),
        }
    }
}

async fn create_relationship_accepted(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RelationshipBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let (src, dst) = body.endpoints()?;
    let attrs = RelationshipAttrs {
        status: Some(knowledge_graph_engine::entities::model::RelationshipStatus::Accepted),
        confidence: body.confidence,
        rationale: body.rationale.clone(),
        ..Default::default()
    };
    let rel = state.engine.create_relationship(&tenant, src, dst, &body.predicate, attrs)?;
    Ok(Json(json!({ "status": "ok", "relationship": rel })))
}

async fn create_relationship_proposed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RelationshipBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let (src, dst) = body.endpoints()?;
    let attrs = RelationshipAttrs {
        status: Some(knowledge_graph_engine::entities::model::RelationshipStatus::Proposed),
        confidence: body.confidence,
        rationale: body.rationale.clone(),
        ..Default::default()
    };
    let rel = state.engine.create_relationship(&tenant, src, dst, &body.predicate, attrs)?;
    Ok(Json(json!({ "status": "ok", "relationship": rel })))
}

#[derive(Deserialize)]
struct DeleteRelationshipParams {
    source_id: String,
    target_id: String,
    predicate: String,
}

async fn delete_relationship(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<DeleteRelationshipParams>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let deleted = state.engine.delete_relationship(
        &tenant,
        &params.source_id,
        &params.target_id,
        &params.predicate,
    )?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Deserialize)]
struct LinkCrossGraphParams {
    target_node_id: String,
}

async fn link_cross_graph(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<LinkCrossGraphParams>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let attrs = RelationshipAttrs::default();
    let rel = state.engine.create_relationship(
        &tenant,
        &id,
        &params.target_node_id,
        "CROSS_GRAPH_LINK",
        attrs,
    )?;
    Ok(Json(json!({ "status": "ok", "relationship": rel })))
}

// ------------------------------------------------------------------------
// Review
// ------------------------------------------------------------------------

#[derive(Deserialize)]
struct ReviewRelationshipsParams {
    #[serde(default)]
    status: Option<String>,
    ingestion_run_id: Option<String>,
}

async fn list_proposed_relationships(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ReviewRelationshipsParams>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let status = params
        .status
        .as_deref()
        .map(parse_relationship_status)
        .unwrap_or(knowledge_graph_engine::entities::model::RelationshipStatus::Proposed);
    let items = state.engine.list_proposed_relationships(
        &tenant,
        status,
        params.ingestion_run_id.as_deref(),
        knowledge_graph_engine::review::Pagination::default(),
    )?;
    Ok(Json(json!({ "items": items })))
}

fn parse_relationship_status(s: &str) -> knowledge_graph_engine::entities::model::RelationshipStatus {
    match s {
        "ACCEPTED" => knowledge_graph_engine::entities::model::RelationshipStatus::Accepted,
        "REJECTED" => knowledge_graph_engine::entities::model::RelationshipStatus::Rejected,
        _ => knowledge_graph_engine::entities::model::RelationshipStatus::Proposed,
    }
}

#[derive(Deserialize)]
struct EdgeIdsBody {
    edge_ids: Vec<String>,
    reviewer: String,
}

async fn accept_relationships(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<EdgeIdsBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let ids: Vec<EdgeId> = body.edge_ids.into_iter().map(EdgeId::from_string).collect();
    let count = state.engine.accept_relationships(&tenant, &ids, &body.reviewer)?;
    Ok(Json(json!({ "count": count })))
}

async fn reject_relationships(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<EdgeIdsBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let ids: Vec<EdgeId> = body.edge_ids.into_iter().map(EdgeId::from_string).collect();
    let count = state.engine.reject_relationships(&tenant, &ids, &body.reviewer)?;
    Ok(Json(json!({ "count": count })))
}

#[derive(Deserialize)]
struct EditRelationshipBody {
    source_id: String,
    target_id: String,
    old_predicate: String,
    new_predicate: String,
    reviewer: String,
}

async fn edit_relationship(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<EditRelationshipBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let changed = state.engine.edit_relationship(
        &tenant,
        &body.source_id,
        &body.target_id,
        &body.old_predicate,
        &body.new_predicate,
        &body.reviewer,
    )?;
    Ok(Json(json!({ "changed": changed })))
}

#[derive(Deserialize)]
struct MergeListParams {
    status: Option<String>,
}

async fn list_merge_candidates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<MergeListParams>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let status = params.status.as_deref().map(|s| match s {
        "ACCEPTED" => knowledge_graph_engine::entities::model::MergeCandidateStatus::Accepted,
        "REJECTED" => knowledge_graph_engine::entities::model::MergeCandidateStatus::Rejected,
        "MERGED" => knowledge_graph_engine::entities::model::MergeCandidateStatus::Merged,
        _ => knowledge_graph_engine::entities::model::MergeCandidateStatus::Proposed,
    });
    let items = state.engine.list_merge_candidates(&tenant, status)?;
    Ok(Json(json!({ "items": items })))
}

#[derive(Deserialize)]
struct MergeCandidateBody {
    candidate_id: String,
    reviewer: String,
}

async fn accept_merge_candidate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<MergeCandidateBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let candidate = state.engine.accept_merge_candidate(
        &tenant,
        &MergeCandidateId::from_string(body.candidate_id),
        &body.reviewer,
    )?;
    Ok(Json(serde_json::to_value(candidate).unwrap()))
}

async fn reject_merge_candidate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<MergeCandidateBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let candidate = state.engine.reject_merge_candidate(
        &tenant,
        &MergeCandidateId::from_string(body.candidate_id),
        &body.reviewer,
    )?;
    Ok(Json(serde_json::to_value(candidate).unwrap()))
}

async fn execute_merge_candidate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<MergeCandidateBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let outcome = state.engine.execute_merge_candidate(
        &tenant,
        &MergeCandidateId::from_string(body.candidate_id),
        &body.reviewer,
    )?;
    Ok(Json(json!({
        "redirected": outcome.redirected,
        "skipped": outcome.skipped,
        "deleted": outcome.deleted,
    })))
}

async fn generate_merge_candidates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let candidates = state
        .engine
        .generate_merge_candidates(&tenant, Deadline::after(std::time::Duration::from_secs(30)))
        .await?;
    Ok(Json(json!({ "candidates": candidates })))
}

// ------------------------------------------------------------------------
// Retrieval
// ------------------------------------------------------------------------

#[derive(Deserialize)]
struct RetrieveBody {
    message: String,
    #[serde(default)]
    known_concept_names: Vec<String>,
    #[serde(default)]
    detail_level: Option<String>,
    #[serde(default)]
    evidence_strictness: Option<String>,
    #[serde(default)]
    recency_days: Option<u32>,
}

async fn retrieve(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<RetrieveBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let mut filters = RetrievalFilters::default();
    if let Some(level) = body.detail_level.as_deref() {
        filters.detail_level = if level == "full" { DetailLevel::Full } else { DetailLevel::Summary };
    }
    if let Some(strictness) = body.evidence_strictness.as_deref() {
        filters.evidence_strictness = match strictness {
            "low" => EvidenceStrictness::Low,
            "high" => EvidenceStrictness::High,
            _ => EvidenceStrictness::Medium,
        };
    }
    filters.recency_days = body.recency_days;

    let result = state
        .engine
        .retrieve(
            &tenant,
            &body.message,
            &body.known_concept_names,
            &filters,
            Deadline::after(std::time::Duration::from_secs(30)),
        )
        .await?;
    Ok(Json(serde_json::to_value(result).unwrap()))
}

// ------------------------------------------------------------------------
// Ingestion
// ------------------------------------------------------------------------

#[derive(Deserialize)]
struct WebIngestBody {
    url: String,
    text: String,
    title: Option<String>,
    domain: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    run_chunk_and_claims: bool,
    #[serde(default)]
    create_artifact_node: bool,
}

async fn web_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<WebIngestBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let input = ArtifactInput {
        artifact_type: "webpage".to_string(),
        source: knowledge_graph_engine::entities::model::DocumentSource::Web,
        source_url: body.url.clone(),
        external_id: body.url,
        title: body.title,
        domain: body.domain,
        text: body.text,
        metadata: body.metadata,
        ..Default::default()
    };
    let actions = IngestionActions {
        create_artifact_node: body.create_artifact_node,
        run_chunk_and_claims: body.run_chunk_and_claims,
        ..Default::default()
    };
    let result = state
        .engine
        .ingest_artifact(
            &tenant,
            input,
            actions,
            IngestionPolicy::default(),
            Deadline::after(std::time::Duration::from_secs(30)),
        )
        .await?;
    Ok(Json(json!({
        "status": format!("{:?}", result.status).to_uppercase(),
        "run_id": result.run_id,
        "chunks_created": result.summary_counts.chunks_created,
        "claims_created": result.summary_counts.claims_created,
        "errors": result.errors,
        "artifact_id": result.artifact_id,
    })))
}

#[derive(Deserialize)]
struct TextCorpusIngestBody {
    external_id: String,
    text: String,
    title: Option<String>,
    domain: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
    #[serde(default)]
    run_lecture_extraction: bool,
    #[serde(default)]
    run_chunk_and_claims: bool,
}

/// `/lectures/ingest` — text-corpus artifacts (lecture transcripts, pasted
/// notes). Distinct from `/web/ingest` only in its `DocumentSource` and the
/// default action toggles; both funnel through the same ingest kernel.
async fn lectures_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<TextCorpusIngestBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let input = ArtifactInput {
        artifact_type: "lecture".to_string(),
        source: knowledge_graph_engine::entities::model::DocumentSource::Upload,
        source_url: format!("lecture:{}", body.external_id),
        external_id: body.external_id,
        title: body.title,
        domain: body.domain,
        text: body.text,
        metadata: body.metadata,
        ..Default::default()
    };
    let actions = IngestionActions {
        create_artifact_node: true,
        run_lecture_extraction: body.run_lecture_extraction,
        run_chunk_and_claims: true,
        ..Default::default()
    };
    let result = state
        .engine
        .ingest_artifact(
            &tenant,
            input,
            actions,
            IngestionPolicy::default(),
            Deadline::after(std::time::Duration::from_secs(30)),
        )
        .await?;
    Ok(Json(json!({
        "status": format!("{:?}", result.status).to_uppercase(),
        "run_id": result.run_id,
        "chunks_created": result.summary_counts.chunks_created,
        "claims_created": result.summary_counts.claims_created,
        "errors": result.errors,
        "artifact_id": result.artifact_id,
    })))
}

#[derive(Deserialize)]
struct NotionIngestBody {
    page_id: String,
    url: Option<String>,
    text: String,
    title: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// `/notion/...` Notion-page ingest. Scraping/syncing the Notion API itself
/// is an external connector concern (spec.md §1); this handler only accepts
/// the page the connector already fetched and feeds it through the kernel.
async fn notion_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<NotionIngestBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let input = ArtifactInput {
        artifact_type: "notion_page".to_string(),
        source: knowledge_graph_engine::entities::model::DocumentSource::Notion,
        source_url: body.url.clone().unwrap_or_else(|| format!("notion:{}", body.page_id)),
        external_id: body.page_id,
        title: body.title,
        text: body.text,
        metadata: body.metadata,
        ..Default::default()
    };
    let actions = IngestionActions {
        create_artifact_node: true,
        run_chunk_and_claims: true,
        ..Default::default()
    };
    let result = state
        .engine
        .ingest_artifact(
            &tenant,
            input,
            actions,
            IngestionPolicy::default(),
            Deadline::after(std::time::Duration::from_secs(30)),
        )
        .await?;
    Ok(Json(json!({
        "status": format!("{:?}", result.status).to_uppercase(),
        "run_id": result.run_id,
        "chunks_created": result.summary_counts.chunks_created,
        "claims_created": result.summary_counts.claims_created,
        "errors": result.errors,
        "artifact_id": result.artifact_id,
    })))
}

#[derive(Deserialize)]
struct FinanceIngestBody {
    accession_or_id: String,
    url: Option<String>,
    text: String,
    title: Option<String>,
    #[serde(default)]
    is_amendment: bool,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// `/finance/.../ingest` — EDGAR/IR/finance documents. Crawling EDGAR/IR is
/// an external connector concern; this handler carries the one finance-
/// specific wrinkle the kernel needs to know about, `is_amendment`, which
/// drives the snapshot subsystem's amendment/staleness path (spec.md §4.5).
async fn finance_ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<FinanceIngestBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let input = ArtifactInput {
        artifact_type: "finance_doc".to_string(),
        source: knowledge_graph_engine::entities::model::DocumentSource::Edgar,
        source_url: body.url.clone().unwrap_or_else(|| format!("edgar:{}", body.accession_or_id)),
        external_id: body.accession_or_id,
        title: body.title,
        text: body.text,
        metadata: body.metadata,
        is_amendment: body.is_amendment,
        ..Default::default()
    };
    let actions = IngestionActions {
        create_artifact_node: true,
        run_chunk_and_claims: true,
        ..Default::default()
    };
    let result = state
        .engine
        .ingest_artifact(
            &tenant,
            input,
            actions,
            IngestionPolicy::default(),
            Deadline::after(std::time::Duration::from_secs(30)),
        )
        .await?;
    Ok(Json(json!({
        "status": format!("{:?}", result.status).to_uppercase(),
        "run_id": result.run_id,
        "chunks_created": result.summary_counts.chunks_created,
        "claims_created": result.summary_counts.claims_created,
        "errors": result.errors,
        "artifact_id": result.artifact_id,
    })))
}

// ------------------------------------------------------------------------
// Sync
// ------------------------------------------------------------------------

#[derive(Deserialize)]
struct SyncEventBody {
    event_id: String,
    graph_id: String,
    branch_id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct SyncEventsBody {
    events: Vec<SyncEventBody>,
}

async fn sync_events(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<SyncEventsBody>,
) -> ApiResult<serde_json::Value> {
    let tenant = tenant_of(&headers);
    let events = body
        .events
        .into_iter()
        .map(|e| SyncEvent {
            event_id: e.event_id,
            graph_id: e.graph_id,
            branch_id: e.branch_id,
            event_type: e.event_type,
            payload: e.payload,
        })
        .collect();
    let results = state.engine.apply_sync_events(&tenant, events).await?;
    Ok(Json(json!({ "results": results })))
}

// ------------------------------------------------------------------------
// Contextual branches
// ------------------------------------------------------------------------

#[derive(Deserialize)]
struct CreateBranchBody {
    parent_message_id: String,
    parent_message_content: String,
    selected_text: String,
    start_offset: Option<i64>,
    end_offset: Option<i64>,
    anchor_ref: Option<serde_json::Value>,
    chat_id: Option<String>,
}

async fn create_branch(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBranchBody>,
) -> ApiResult<serde_json::Value> {
    let kind = if body.anchor_ref.is_some() { AnchorKind::Ref } else { AnchorKind::Span };
    let anchor = Anchor {
        kind,
        selected_text: body.selected_text,
        start_offset: body.start_offset,
        end_offset: body.end_offset,
        anchor_ref: body.anchor_ref,
    };
    let branch = state.engine.create_branch(
        &body.parent_message_id,
        &body.parent_message_content,
        anchor,
        body.chat_id.as_deref(),
    )?;
    Ok(Json(serde_json::to_value(branch).unwrap()))
}

async fn get_branch(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<serde_json::Value> {
    let branch = state.engine.get_branch(&ContextualBranchId::from_string(id))?;
    Ok(Json(serde_json::to_value(branch).unwrap()))
}

async fn delete_branch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.delete_branch(&ContextualBranchId::from_string(id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct AddMessageBody {
    role: String,
    content: String,
}

async fn add_branch_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AddMessageBody>,
) -> ApiResult<serde_json::Value> {
    let branch_id = ContextualBranchId::from_string(id);
    let message = state.engine.add_branch_message(&branch_id, &body.role, &body.content)?;
    Ok(Json(serde_json::to_value(message).unwrap()))
}

async fn list_branch_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let messages = state.engine.branch_messages(&ContextualBranchId::from_string(id))?;
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Deserialize)]
struct SaveHintsBody {
    hints: Vec<HintBody>,
}

#[derive(Deserialize)]
struct HintBody {
    hint_text: String,
    target_phrase: Option<String>,
}

async fn save_bridging_hints(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<SaveHintsBody>,
) -> ApiResult<serde_json::Value> {
    let branch_id = ContextualBranchId::from_string(id);
    let hints = body
        .hints
        .into_iter()
        .map(|h| HintInput { hint_text: h.hint_text, target_phrase: h.target_phrase })
        .collect();
    let saved = state.engine.save_bridging_hints(&branch_id, hints)?;
    Ok(Json(json!({ "hints": saved })))
}

async fn list_bridging_hints(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let hints = state.engine.bridging_hints(&ContextualBranchId::from_string(id))?;
    Ok(Json(json!({ "hints": hints })))
}

async fn branches_for_message(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let branches = state.engine.branches_for_message(&message_id)?;
    Ok(Json(json!({ "branches": branches })))
}

async fn archive_branch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.archive_branch(&ContextualBranchId::from_string(id))?;
    Ok(StatusCode::NO_CONTENT)
}
