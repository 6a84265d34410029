use std::sync::Arc;

use basalt_types::BlocksConfig;

use crate::{
    events::EventBus,
    lock::LockManager,
    store::EntityStore,
    substrate::{DiskService, FolderService, NodeService, NodeTerminal, PodOrchestrator},
};

/// Wiring for the block orchestrator: configuration, substrate boundaries,
/// the entity store, the per-block lock map and the domain event bus. The
/// operation modules (`controller`, `replica`, `snapshot`, `volume`,
/// `events`) are free functions over this context; callers hold the
/// per-block lock for the duration of any mutating call.
pub struct Core {
    pub config: BlocksConfig,
    pub pods: Arc<dyn PodOrchestrator>,
    pub terminal: Arc<dyn NodeTerminal>,
    pub nodes: Arc<dyn NodeService>,
    pub disks: Arc<dyn DiskService>,
    pub folders: Arc<dyn FolderService>,
    pub store: Arc<dyn EntityStore>,
    pub locks: LockManager,
    pub events: EventBus,
}
