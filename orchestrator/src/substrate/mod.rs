//! Boundaries to the physical substrate: the container orchestrator, the
//! bare-node terminal, and the node/disk/folder inventory services. The core
//! only ever talks to these traits; `kube.rs` provides the production
//! orchestrator client and the test harness provides in-memory fakes.

pub mod kube;

use async_trait::async_trait;
use basalt_types::{Disk, Folder, Node};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// Captured output of an exec'd command.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// The slice of pod state the control plane cares about.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodState {
    pub uid: String,
    pub name: String,
    pub namespace: String,
    pub phase: PodPhase,
    pub ip: Option<String>,
    /// Deletion timestamp present.
    pub terminating: bool,
}

/// A host directory bind-mounted into the container.
#[derive(Clone, Debug, PartialEq)]
pub struct HostPathMount {
    pub name: String,
    pub host_path: String,
    pub mount_path: String,
}

impl HostPathMount {
    pub fn new(name: &str, host_path: &str, mount_path: &str) -> Self {
        Self {
            name: name.to_string(),
            host_path: host_path.to_string(),
            mount_path: mount_path.to_string(),
        }
    }
}

/// Orchestrator-agnostic description of a single-container pod.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodManifest {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub node_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub ports: Vec<u16>,
    pub host_paths: Vec<HostPathMount>,
    pub privileged: bool,
    /// "Always" | "Never" | "OnFailure"; empty means the orchestrator default.
    pub restart_policy: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PodEventKind {
    Added,
    Modified,
    Deleted,
}

#[derive(Clone, Debug)]
pub struct PodEvent {
    pub kind: PodEventKind,
    pub pod: PodState,
}

/// Pod CRUD, in-container exec and the pod event stream.
#[async_trait]
pub trait PodOrchestrator: Send + Sync {
    async fn read_pod(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodState>>;

    async fn create_pod(
        &self,
        cluster: &str,
        namespace: &str,
        manifest: PodManifest,
    ) -> Result<PodState>;

    async fn delete_pod(&self, cluster: &str, namespace: &str, name: &str) -> Result<()>;

    /// Issues argv inside the pod's only container and captures the output.
    /// Exec streams synchronously; this may take many seconds.
    async fn exec(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        argv: &[String],
    ) -> Result<ExecOutput>;

    /// Pod added/modified/deleted events for one namespace.
    async fn watch_pods(&self, namespace: &str) -> Result<BoxStream<'static, PodEvent>>;
}

/// Shell exec on a bare node, used by format/mount and folder size probes.
#[async_trait]
pub trait NodeTerminal: Send + Sync {
    async fn run(&self, node: &str, argv: &[String]) -> Result<ExecOutput>;
}

#[async_trait]
pub trait NodeService: Send + Sync {
    async fn resolve(&self, node: &str) -> Result<Option<Node>>;
}

#[async_trait]
pub trait DiskService: Send + Sync {
    async fn resolve(&self, disk: &str) -> Result<Option<Disk>>;

    async fn disks_for_node(&self, node: &str) -> Result<Vec<Disk>>;

    /// Disks in the cluster with at least `budget_mib` free, excluding the
    /// given disk ids, at most `limit` results.
    async fn available_disks(
        &self,
        cluster: &str,
        budget_mib: u64,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<Disk>>;
}

#[async_trait]
pub trait FolderService: Send + Sync {
    async fn resolve(&self, folder: &str) -> Result<Option<Folder>>;

    /// Allocates a fresh folder on the disk, named with the given prefix.
    async fn provision(&self, disk: &Disk, prefix: &str) -> Result<Folder>;

    async fn deprovision(&self, folder: &str) -> Result<()>;
}
