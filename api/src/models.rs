use basalt_types::Replica;
use serde::{Deserialize, Serialize};

/// Request to provision a new block volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub name: String,
    /// Size in GiB; the configured default applies when omitted.
    pub size: Option<u64>,
    /// Preferred locality node.
    pub node: String,
    /// Desired replica count; the configured default applies when omitted.
    pub replicas: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForceRequest {
    #[serde(default)]
    pub force: bool,
}

/// Request to make a filesystem on the block device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatRequest {
    #[serde(default)]
    pub force: bool,
    /// Filesystem type, ext4 by default.
    #[serde(rename = "type")]
    pub fs_type: Option<String>,
    /// Reserved-blocks percentage.
    pub reserve: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpandRequest {
    /// New size in GiB.
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateReplicaRequest {
    /// Disk to allocate the replica folder on.
    pub disk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateModeRequest {
    /// RW | RO | ERR
    pub mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotNameRequest {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeRequest {
    #[serde(default)]
    pub skip_if_in_progress: bool,
}

/// One row of the engine's replica listing joined with the stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaListItem {
    pub endpoint: String,
    pub mode: Option<String>,
    pub chain: Vec<String>,
    pub replica: Option<Replica>,
}
