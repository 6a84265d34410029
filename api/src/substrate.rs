//! Production adapters for the substrate services the orchestrator core
//! consumes: a file-backed node/disk inventory, a node terminal that execs
//! through per-node agent pods, and a folder manager layered on top of it.

use async_trait::async_trait;
use basalt_orchestrator::{
    Error, Result,
    substrate::{DiskService, ExecOutput, FolderService, NodeService, NodeTerminal, PodOrchestrator},
};
use basalt_types::{Disk, Folder, Node};
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use tracing::info;
use uuid::Uuid;

/// Static node/disk inventory loaded from a JSON file.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileInventory {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub disks: Vec<Disk>,
}

impl FileInventory {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let inventory: FileInventory = serde_json::from_str(&raw)?;
        info!(
            nodes = inventory.nodes.len(),
            disks = inventory.disks.len(),
            path,
            "inventory loaded"
        );
        Ok(inventory)
    }
}

#[async_trait]
impl NodeService for FileInventory {
    async fn resolve(&self, node: &str) -> Result<Option<Node>> {
        Ok(self.nodes.iter().find(|n| n.id == node).cloned())
    }
}

#[async_trait]
impl DiskService for FileInventory {
    async fn resolve(&self, disk: &str) -> Result<Option<Disk>> {
        Ok(self.disks.iter().find(|d| d.id == disk).cloned())
    }

    async fn disks_for_node(&self, node: &str) -> Result<Vec<Disk>> {
        Ok(self
            .disks
            .iter()
            .filter(|d| d.node == node)
            .cloned()
            .collect())
    }

    async fn available_disks(
        &self,
        _cluster: &str,
        budget_mib: u64,
        exclude: &[String],
        limit: usize,
    ) -> Result<Vec<Disk>> {
        Ok(self
            .disks
            .iter()
            .filter(|d| d.available_mib >= budget_mib && !exclude.contains(&d.id))
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Runs shell commands on a bare node by exec'ing into that node's agent
/// pod (`basalt-agent-<node>`), which runs privileged with the host
/// filesystem bound in.
pub struct AgentTerminal {
    pods: Arc<dyn PodOrchestrator>,
    cluster: String,
    namespace: String,
}

impl AgentTerminal {
    pub fn new(pods: Arc<dyn PodOrchestrator>, cluster: &str, namespace: &str) -> Self {
        Self {
            pods,
            cluster: cluster.to_string(),
            namespace: namespace.to_string(),
        }
    }

    fn agent_pod(node: &str) -> String {
        format!("basalt-agent-{}", node)
    }
}

#[async_trait]
impl NodeTerminal for AgentTerminal {
    async fn run(&self, node: &str, argv: &[String]) -> Result<ExecOutput> {
        self.pods
            .exec(&self.cluster, &self.namespace, &Self::agent_pod(node), argv)
            .await
    }
}

/// Folder lifecycle on top of the node terminal: provisioning makes a
/// uniquely named directory under the disk's path, deprovisioning removes
/// it. The registry keeps the id → path/node association.
pub struct FolderManager {
    terminal: Arc<dyn NodeTerminal>,
    registry: Mutex<HashMap<String, (Folder, String)>>,
}

impl FolderManager {
    pub fn new(terminal: Arc<dyn NodeTerminal>) -> Self {
        Self {
            terminal,
            registry: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl FolderService for FolderManager {
    async fn resolve(&self, folder: &str) -> Result<Option<Folder>> {
        Ok(self
            .registry
            .lock()
            .unwrap()
            .get(folder)
            .map(|(f, _)| f.clone()))
    }

    async fn provision(&self, disk: &Disk, prefix: &str) -> Result<Folder> {
        let id = Uuid::new_v4().to_string();
        let suffix = &id[..8];
        let folder = Folder {
            id: id.clone(),
            disk: disk.id.clone(),
            path: format!("{}/{}-{}", disk.path, prefix, suffix),
        };
        self.terminal
            .run(
                &disk.node,
                &["mkdir".to_string(), "-p".to_string(), folder.path.clone()],
            )
            .await?;
        self.registry
            .lock()
            .unwrap()
            .insert(id, (folder.clone(), disk.node.clone()));
        Ok(folder)
    }

    async fn deprovision(&self, folder: &str) -> Result<()> {
        let entry = self.registry.lock().unwrap().remove(folder);
        let Some((folder, node)) = entry else {
            return Err(Error::FolderNotFound(folder.to_string()));
        };
        self.terminal
            .run(&node, &["rm".to_string(), "-rf".to_string(), folder.path])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inventory() -> FileInventory {
        serde_json::from_str(
            r#"{
                "nodes": [
                    {"id": "n-1", "hostname": "worker-1", "cluster": "c-1"},
                    {"id": "n-2", "hostname": "worker-2", "cluster": "c-1"}
                ],
                "disks": [
                    {"id": "d-1", "node": "n-1", "hostname": "worker-1", "path": "/mnt/disks/d-1", "availableMib": 20480},
                    {"id": "d-2", "node": "n-2", "hostname": "worker-2", "path": "/mnt/disks/d-2", "availableMib": 4096}
                ]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn inventory_resolves_nodes_and_disks() {
        let inv = inventory();
        let node = NodeService::resolve(&inv, "n-2").await.unwrap().unwrap();
        assert_eq!(node.hostname, "worker-2");
        assert!(NodeService::resolve(&inv, "n-9").await.unwrap().is_none());
        let disks = inv.disks_for_node("n-1").await.unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].id, "d-1");
    }

    #[tokio::test]
    async fn available_disks_respect_budget_exclusion_and_limit() {
        let inv = inventory();
        // 10 GiB budget rules out the 4 GiB disk.
        let disks = inv.available_disks("c-1", 10240, &[], 5).await.unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].id, "d-1");
        let disks = inv
            .available_disks("c-1", 1024, &["d-1".to_string()], 5)
            .await
            .unwrap();
        assert_eq!(disks.len(), 1);
        assert_eq!(disks[0].id, "d-2");
        let disks = inv.available_disks("c-1", 1024, &[], 1).await.unwrap();
        assert_eq!(disks.len(), 1);
    }
}
