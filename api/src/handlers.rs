//! REST facade: validates parameters, takes the block's lock and translates
//! each route into a reconciler operation. All domain rules live in the
//! orchestrator crate; this layer only shapes requests and responses.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use basalt_orchestrator::{
    Error,
    config::ControllerOpts,
    controller, replica,
    snapshot::{self, CloneOpts},
    store::{EntityStore as _, require},
    substrate::DiskService as _,
    volume,
};
use basalt_types::{Block, ReplicaMode};
use serde_json::json;
use tracing::error;

use crate::{
    models::{
        CreateReplicaRequest, ExpandRequest, ForceRequest, FormatRequest, ProvisionRequest,
        PurgeRequest, ReplicaListItem, SnapshotNameRequest, UpdateModeRequest,
    },
    server::AppState,
};

pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("{}", self.0);
        }
        (
            status,
            Json(json!({
                "kind": self.0.kind(),
                "reason": self.0.to_string(),
            })),
        )
            .into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

pub async fn health() -> impl IntoResponse {
    "OK"
}

pub async fn list_blocks(State(state): State<AppState>) -> ApiResult<Json<Vec<Block>>> {
    Ok(Json(state.core.store.list().await?))
}

pub async fn get_block(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Block>> {
    Ok(Json(require(state.core.store.as_ref(), &id).await?))
}

pub async fn provision(
    State(state): State<AppState>,
    Json(req): Json<ProvisionRequest>,
) -> ApiResult<Json<Block>> {
    let size = req.size.unwrap_or(state.core.config.default_size);
    let replicas = req.replicas.unwrap_or(state.core.config.replica_count);
    let block = volume::provision(&state.core, &req.name, &req.node, size, replicas).await?;
    Ok(Json(block))
}

pub async fn deprovision(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Block>> {
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(volume::deprovision(&state.core, &id).await?))
}

pub async fn format_block(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<FormatRequest>>,
) -> ApiResult<Json<Block>> {
    let mut opts = volume::FormatOpts::default();
    if let Some(Json(req)) = body {
        opts.force = req.force;
        if let Some(fs_type) = req.fs_type {
            opts.fs_type = fs_type;
        }
        if let Some(reserve) = req.reserve {
            opts.reserve = reserve;
        }
    }
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(volume::format(&state.core, &id, &opts).await?))
}

pub async fn mount_block(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ForceRequest>>,
) -> ApiResult<Json<Block>> {
    let force = body.map(|Json(b)| b.force).unwrap_or(false);
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(volume::mount(&state.core, &id, force).await?))
}

pub async fn unmount_block(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ForceRequest>>,
) -> ApiResult<Json<Block>> {
    let force = body.map(|Json(b)| b.force).unwrap_or(false);
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(volume::unmount(&state.core, &id, force).await?))
}

pub async fn usage(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<volume::Usage>> {
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(volume::usage(&state.core, &id).await?))
}

pub async fn trim(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let _guard = state.core.locks.acquire(&id).await;
    volume::trim(&state.core, &id).await?;
    Ok(StatusCode::OK)
}

pub async fn check_pods(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Block>> {
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(volume::check_pods(&state.core, &id).await?))
}

pub async fn balance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Block>> {
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(volume::balance(&state.core, &id).await?))
}

pub async fn expand(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ExpandRequest>,
) -> ApiResult<Json<Block>> {
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(controller::expand(&state.core, &id, req.size).await?))
}

// ----- replicas -----

pub async fn create_replica(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CreateReplicaRequest>,
) -> ApiResult<Json<Block>> {
    let disk = state
        .core
        .disks
        .resolve(&req.disk)
        .await?
        .ok_or(Error::DiskNotFound(req.disk))?;
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(replica::create_replica(&state.core, &id, &disk).await?))
}

pub async fn delete_replica(
    State(state): State<AppState>,
    Path((id, rid)): Path<(String, String)>,
    Query(query): Query<ForceRequest>,
) -> ApiResult<Json<Block>> {
    let _guard = state.core.locks.acquire(&id).await;
    let block = require(state.core.store.as_ref(), &id).await?;
    if block.replicas.len() <= 1 && !query.force {
        return Err(Error::LastReplica(block.name).into());
    }
    Ok(Json(
        replica::remove_replica_from_block(&state.core, &id, &rid).await?,
    ))
}

pub async fn list_replicas(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ReplicaListItem>>> {
    let entries = replica::list_replicas(&state.core, &id).await?;
    Ok(Json(
        entries
            .into_iter()
            .map(|e| ReplicaListItem {
                endpoint: e.row.endpoint,
                mode: e.row.mode.map(|m| m.to_string()),
                chain: e.row.chain,
                replica: e.replica,
            })
            .collect(),
    ))
}

pub async fn update_replica_mode(
    State(state): State<AppState>,
    Path((id, rid)): Path<(String, String)>,
    Json(req): Json<UpdateModeRequest>,
) -> ApiResult<Json<Block>> {
    let mode: ReplicaMode = req
        .mode
        .parse()
        .map_err(|_| Error::InvalidMode(req.mode.clone()))?;
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(
        replica::update_replica_mode(&state.core, &id, &rid, mode).await?,
    ))
}

pub async fn rebuild_status(
    State(state): State<AppState>,
    Path((id, rid)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = replica::rebuild_status(&state.core, &id, &rid).await?;
    Ok(Json(json!({ "status": status })))
}

pub async fn verify_rebuild(
    State(state): State<AppState>,
    Path((id, rid)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let _guard = state.core.locks.acquire(&id).await;
    replica::verify_rebuild(&state.core, &id, &rid).await?;
    Ok(StatusCode::OK)
}

// ----- snapshots -----

pub async fn snapshot_create(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let _guard = state.core.locks.acquire(&id).await;
    let name = snapshot::create(&state.core, &id).await?;
    Ok(Json(json!({ "name": name })))
}

pub async fn snapshot_list(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(snapshot::list(&state.core, &id).await?))
}

pub async fn snapshot_revert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SnapshotNameRequest>,
) -> ApiResult<StatusCode> {
    let _guard = state.core.locks.acquire(&id).await;
    snapshot::revert(&state.core, &id, &req.name).await?;
    Ok(StatusCode::OK)
}

pub async fn snapshot_remove(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let _guard = state.core.locks.acquire(&id).await;
    snapshot::remove(&state.core, &id, &name).await?;
    Ok(StatusCode::OK)
}

pub async fn snapshot_purge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<PurgeRequest>>,
) -> ApiResult<StatusCode> {
    let skip = body.map(|Json(b)| b.skip_if_in_progress).unwrap_or(false);
    let _guard = state.core.locks.acquire(&id).await;
    snapshot::purge(&state.core, &id, skip).await?;
    Ok(StatusCode::OK)
}

pub async fn snapshot_purge_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = snapshot::purge_status(&state.core, &id).await?;
    Ok(Json(json!({ "status": status })))
}

pub async fn snapshot_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(snapshot::info(&state.core, &id).await?))
}

pub async fn snapshot_clone(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CloneOpts>,
) -> ApiResult<StatusCode> {
    let _guard = state.core.locks.acquire(&id).await;
    snapshot::clone_from(&state.core, &id, &req).await?;
    Ok(StatusCode::OK)
}

pub async fn snapshot_clone_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SnapshotNameRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = snapshot::clone_status(&state.core, &id, &query.name).await?;
    Ok(Json(json!({ "status": status })))
}

pub async fn snapshot_hash(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SnapshotNameRequest>,
) -> ApiResult<StatusCode> {
    snapshot::hash(&state.core, &id, &req.name).await?;
    Ok(StatusCode::OK)
}

pub async fn snapshot_hash_cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SnapshotNameRequest>,
) -> ApiResult<StatusCode> {
    snapshot::hash_cancel(&state.core, &id, &req.name).await?;
    Ok(StatusCode::OK)
}

pub async fn snapshot_hash_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<SnapshotNameRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    Ok(Json(
        snapshot::hash_status(&state.core, &id, &query.name).await?,
    ))
}

// ----- controller -----

pub async fn controller_create(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<ControllerOpts>>,
) -> ApiResult<Json<Block>> {
    let opts = body.map(|Json(b)| b).unwrap_or_default();
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(
        controller::create_controller(&state.core, &id, &opts).await?,
    ))
}

pub async fn controller_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Block>> {
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(controller::delete_controller(&state.core, &id).await?))
}

pub async fn controller_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<controller::ControllerInfo>> {
    let block = require(state.core.store.as_ref(), &id).await?;
    Ok(Json(controller::controller_info(&state.core, &block).await?))
}

pub async fn frontend_start(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Block>> {
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(controller::start_frontend(&state.core, &id).await?))
}

pub async fn frontend_shutdown(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Block>> {
    let _guard = state.core.locks.acquire(&id).await;
    Ok(Json(controller::shutdown_frontend(&state.core, &id).await?))
}
