//! HTTP server wiring: builds the orchestrator core from the CLI args,
//! starts the pod-event multiplexer and serves the REST surface until the
//! process is told to stop.

use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{delete, get, post, put},
};
use basalt_orchestrator::{
    Core,
    events::{self, EventBus},
    lock::LockManager,
    store::MemoryStore,
    substrate::kube::KubeOrchestrator,
};
use kube::client::Client;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    args::ServerArgs,
    handlers,
    substrate::{AgentTerminal, FileInventory, FolderManager},
};

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<Core>,
}

pub async fn run(args: ServerArgs) -> Result<()> {
    let config = args.blocks_config();
    config
        .validate()
        .map_err(|e| anyhow::anyhow!(e))
        .context("invalid blocks configuration")?;

    let client = Client::try_default()
        .await
        .context("failed to build Kubernetes client")?;
    let pods = Arc::new(KubeOrchestrator::new(client));
    let inventory = Arc::new(FileInventory::load(&args.inventory)?);
    let terminal = Arc::new(AgentTerminal::new(
        pods.clone(),
        &args.cluster,
        &config.namespace,
    ));
    let core = Arc::new(Core {
        config,
        pods,
        terminal: terminal.clone(),
        nodes: inventory.clone(),
        disks: inventory,
        folders: Arc::new(FolderManager::new(terminal)),
        store: Arc::new(MemoryStore::new()),
        locks: LockManager::new(),
        events: EventBus::new(),
    });

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        basalt_common::shutdown::shutdown_signal().await;
        signal.cancel();
    });

    let multiplexer = tokio::spawn(events::run_multiplexer(core.clone(), cancel.clone()));

    let state = AppState { core };
    run_server(cancel, args.port, args.cors_origins, state).await?;

    multiplexer.await?.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

pub async fn run_server(
    cancel: CancellationToken,
    port: u16,
    cors_origins: Vec<String>,
    state: AppState,
) -> Result<()> {
    let cors = if cors_origins.is_empty() {
        basalt_common::cors::dev()
    } else {
        basalt_common::cors::restricted(&cors_origins)
    };
    let app = Router::new()
        .route("/healthz", get(handlers::health))
        .route("/readyz", get(handlers::health))
        .nest("/v1/storage/blocks", block_routes())
        .fallback(|| async { basalt_common::response::not_found(anyhow::anyhow!("no such route")) })
        .layer(cors)
        .with_state(state);

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {}", port))?;
    info!(port, "block-storage API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("server error")?;
    Ok(())
}

fn block_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_blocks))
        .route("/provision", post(handlers::provision))
        .route("/{id}", get(handlers::get_block))
        .route("/{id}/deprovision", delete(handlers::deprovision))
        .route("/{id}/format", post(handlers::format_block))
        .route("/{id}/mount", post(handlers::mount_block))
        .route("/{id}/unmount", post(handlers::unmount_block))
        .route("/{id}/usage", get(handlers::usage))
        .route("/{id}/trim", post(handlers::trim))
        .route("/{id}/check-pods", get(handlers::check_pods))
        .route("/{id}/balance", post(handlers::balance))
        .route("/{id}/expand", post(handlers::expand))
        .route(
            "/{id}/replicas",
            get(handlers::list_replicas).post(handlers::create_replica),
        )
        .route("/{id}/replicas/{rid}", delete(handlers::delete_replica))
        .route(
            "/{id}/replicas/{rid}/mode",
            put(handlers::update_replica_mode),
        )
        .route(
            "/{id}/replicas/{rid}/rebuild-status",
            get(handlers::rebuild_status),
        )
        .route(
            "/{id}/replicas/{rid}/verify-rebuild",
            post(handlers::verify_rebuild),
        )
        .route("/{id}/snapshots/create", post(handlers::snapshot_create))
        .route("/{id}/snapshots/list", get(handlers::snapshot_list))
        .route("/{id}/snapshots/revert", post(handlers::snapshot_revert))
        .route("/{id}/snapshots/purge", post(handlers::snapshot_purge))
        .route(
            "/{id}/snapshots/purge-status",
            get(handlers::snapshot_purge_status),
        )
        .route("/{id}/snapshots/info", get(handlers::snapshot_info))
        .route("/{id}/snapshots/clone", post(handlers::snapshot_clone))
        .route(
            "/{id}/snapshots/clone-status",
            get(handlers::snapshot_clone_status),
        )
        .route("/{id}/snapshots/hash", post(handlers::snapshot_hash))
        .route(
            "/{id}/snapshots/hash-cancel",
            post(handlers::snapshot_hash_cancel),
        )
        .route(
            "/{id}/snapshots/hash-status",
            get(handlers::snapshot_hash_status),
        )
        .route("/{id}/snapshots/{name}", delete(handlers::snapshot_remove))
        .route(
            "/{id}/controller",
            post(handlers::controller_create).delete(handlers::controller_delete),
        )
        .route("/{id}/controller/info", get(handlers::controller_info))
        .route(
            "/{id}/controller/frontend/start",
            post(handlers::frontend_start),
        )
        .route(
            "/{id}/controller/frontend/shutdown",
            post(handlers::frontend_shutdown),
        )
}
