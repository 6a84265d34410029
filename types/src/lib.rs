use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;

/// TCP port every replica process listens on for the data server.
pub const REPLICA_PORT: u16 = 10000;

/// TCP port the engine controller listens on.
pub const CONTROLLER_PORT: u16 = 9501;

/// Aggregated health of a block volume.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    #[default]
    Pending,
    Healthy,
    Unhealthy,
    Repairing,
}

impl FromStr for BlockStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BlockStatus::Pending),
            "healthy" => Ok(BlockStatus::Healthy),
            "unhealthy" => Ok(BlockStatus::Unhealthy),
            "repairing" => Ok(BlockStatus::Repairing),
            _ => Err(()),
        }
    }
}

impl fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockStatus::Pending => write!(f, "pending"),
            BlockStatus::Healthy => write!(f, "healthy"),
            BlockStatus::Unhealthy => write!(f, "unhealthy"),
            BlockStatus::Repairing => write!(f, "repairing"),
        }
    }
}

/// Lifecycle of a single replica within a block.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplicaStatus {
    #[default]
    Pending,
    Healthy,
    Unhealthy,
    Repairing,
    Offline,
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaStatus::Pending => write!(f, "pending"),
            ReplicaStatus::Healthy => write!(f, "healthy"),
            ReplicaStatus::Unhealthy => write!(f, "unhealthy"),
            ReplicaStatus::Repairing => write!(f, "repairing"),
            ReplicaStatus::Offline => write!(f, "offline"),
        }
    }
}

/// The engine's view of a replica.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReplicaMode {
    #[default]
    RW,
    RO,
    ERR,
}

impl FromStr for ReplicaMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RW" => Ok(ReplicaMode::RW),
            "RO" => Ok(ReplicaMode::RO),
            "ERR" => Ok(ReplicaMode::ERR),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ReplicaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplicaMode::RW => write!(f, "RW"),
            ReplicaMode::RO => write!(f, "RO"),
            ReplicaMode::ERR => write!(f, "ERR"),
        }
    }
}

/// Whether a healthy replica shares the block's preferred node.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    Local,
    Remote,
    #[default]
    Unknown,
}

impl fmt::Display for Locality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locality::Local => write!(f, "local"),
            Locality::Remote => write!(f, "remote"),
            Locality::Unknown => write!(f, "unknown"),
        }
    }
}

/// One copy of the volume's data, embedded in its [`Block`].
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Replica {
    pub id: String,
    /// Globally unique human-readable name, also used as the pod name.
    pub name: String,
    /// Pod handle; None once the pod is gone.
    pub pod: Option<String>,
    pub disk: String,
    pub node: String,
    pub folder: String,
    pub status: ReplicaStatus,
    pub healthy: bool,
    /// Present in the engine's replica set.
    pub attached: bool,
    pub ip: Option<String>,
    /// `tcp://<ip>:10000`; derived from `ip`, both None together.
    pub endpoint: Option<String>,
    pub mode: ReplicaMode,
}

impl Replica {
    /// Derives the data-server endpoint for a pod IP.
    pub fn endpoint_of(ip: &str) -> String {
        format!("tcp://{}:{}", ip, REPLICA_PORT)
    }

    /// Sets `ip` and the endpoint derived from it.
    pub fn set_ip(&mut self, ip: &str) {
        self.endpoint = Some(Self::endpoint_of(ip));
        self.ip = Some(ip.to_string());
    }

    /// Clears `ip` and `endpoint` together.
    pub fn clear_ip(&mut self) {
        self.ip = None;
        self.endpoint = None;
    }
}

/// The root aggregate: a logical replicated block device.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub id: String,
    /// Unique, 3-128 chars, lowercase-trimmed.
    pub name: String,
    pub cluster: String,
    pub namespace: String,
    /// Preferred locality node.
    pub node: String,
    /// Size in GiB.
    pub size: u64,
    /// Used space in GiB.
    pub used: f64,
    pub replica_count: u32,
    /// Controller pod handle; None until the pod is created.
    pub controller: Option<String>,
    /// Host device path once the frontend is up.
    pub device: Option<String>,
    /// Mount-point folder handle.
    pub mount_point: String,
    pub formatted: bool,
    pub mounted: bool,
    /// Controller pod is Running.
    pub online: bool,
    /// Engine reports the frontend as "up".
    pub frontend_state: bool,
    pub locality: Locality,
    pub healthy: bool,
    pub status: BlockStatus,
    pub replicas: Vec<Replica>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Presence means soft-deleted; hidden from default reads.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Block {
    pub fn replica(&self, id: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.id == id)
    }

    pub fn replica_mut(&mut self, id: &str) -> Option<&mut Replica> {
        self.replicas.iter_mut().find(|r| r.id == id)
    }

    pub fn replica_by_pod(&self, uid: &str) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.pod.as_deref() == Some(uid))
    }

    pub fn replica_by_endpoint(&self, endpoint: &str) -> Option<&Replica> {
        self.replicas
            .iter()
            .find(|r| r.endpoint.as_deref() == Some(endpoint))
    }

    /// Endpoints of every replica that currently has one.
    pub fn replica_endpoints(&self) -> Vec<String> {
        self.replicas
            .iter()
            .filter_map(|r| r.endpoint.clone())
            .collect()
    }

    /// True when the pod handle belongs to the controller or any replica.
    pub fn owns_pod(&self, uid: &str) -> bool {
        self.controller.as_deref() == Some(uid) || self.replica_by_pod(uid).is_some()
    }

    pub fn all_replicas_healthy(&self) -> bool {
        self.replicas.iter().all(|r| r.healthy)
    }

    /// Locality as computed from the current replica set.
    pub fn computed_locality(&self) -> Locality {
        if self
            .replicas
            .iter()
            .any(|r| r.healthy && r.node == self.node)
        {
            Locality::Local
        } else {
            Locality::Remote
        }
    }
}

/// A worker node known to the node service.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub hostname: String,
    pub cluster: String,
}

/// A physical disk on a node.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub id: String,
    pub node: String,
    pub hostname: String,
    pub path: String,
    /// Remaining capacity in MiB.
    pub available_mib: u64,
}

/// A folder allocated on a disk, backing a replica or a mount point.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub disk: String,
    pub path: String,
}

pub fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

/// Normalizes and validates a block name: trimmed, lowercased, 3-128 chars.
pub fn normalize_block_name(name: &str) -> Result<String, String> {
    let name = name.trim().to_lowercase();
    if name.len() < 3 || name.len() > 128 {
        return Err(format!(
            "block name must be 3-128 characters, got {}",
            name.len()
        ));
    }
    Ok(name)
}

fn default_replica_count() -> u32 {
    3
}

fn default_stale_replica_timeout() -> u64 {
    28800
}

fn default_soft_anti_affinity() -> bool {
    true
}

fn default_namespace() -> String {
    "storage".to_string()
}

fn default_size() -> u64 {
    10
}

/// Recognised `storage.blocks.*` options.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BlocksConfig {
    #[serde(default = "default_replica_count")]
    pub replica_count: u32,
    /// Seconds before a stale replica is considered lost.
    #[serde(default = "default_stale_replica_timeout")]
    pub stale_replica_timeout: u64,
    #[serde(default = "default_soft_anti_affinity")]
    pub replica_soft_anti_affinity: bool,
    pub engine_image: String,
    /// Frontend presentation, e.g. `tgt-blockdev`.
    pub frontend: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Default volume size in GiB.
    #[serde(default = "default_size")]
    pub default_size: u64,
}

impl Default for BlocksConfig {
    fn default() -> Self {
        Self {
            replica_count: default_replica_count(),
            stale_replica_timeout: default_stale_replica_timeout(),
            replica_soft_anti_affinity: default_soft_anti_affinity(),
            engine_image: "longhornio/longhorn-engine:v1.5.1".to_string(),
            frontend: "tgt-blockdev".to_string(),
            namespace: default_namespace(),
            default_size: default_size(),
        }
    }
}

impl BlocksConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=7).contains(&self.replica_count) {
            return Err(format!(
                "replicaCount must be within 1-7, got {}",
                self.replica_count
            ));
        }
        if !(60..=86400).contains(&self.stale_replica_timeout) {
            return Err(format!(
                "staleReplicaTimeout must be within 60-86400, got {}",
                self.stale_replica_timeout
            ));
        }
        if self.engine_image.is_empty() {
            return Err("engineImage must not be empty".to_string());
        }
        if self.frontend.is_empty() {
            return Err("frontend must not be empty".to_string());
        }
        Ok(())
    }
}

/// Bounds for a volume size in GiB.
pub fn validate_size(size: u64) -> Result<(), String> {
    if !(1..=1024).contains(&size) {
        return Err(format!("size must be within 1-1024 GiB, got {}", size));
    }
    Ok(())
}

/// Bounds for a desired replica count.
pub fn validate_replica_count(count: u32) -> Result<(), String> {
    if !(1..=7).contains(&count) {
        return Err(format!("replicas must be within 1-7, got {}", count));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(node: &str, healthy: bool) -> Replica {
        Replica {
            id: fresh_id(),
            name: format!("block-replica-test-{}", node),
            node: node.to_string(),
            healthy,
            ..Default::default()
        }
    }

    #[test]
    fn endpoint_derivation() {
        let mut r = Replica::default();
        r.set_ip("10.0.0.11");
        assert_eq!(r.endpoint.as_deref(), Some("tcp://10.0.0.11:10000"));
        r.clear_ip();
        assert!(r.ip.is_none() && r.endpoint.is_none());
    }

    #[test]
    fn locality_requires_healthy_replica_on_preferred_node() {
        let mut block = Block {
            node: "n-1".to_string(),
            replicas: vec![replica("n-2", true), replica("n-1", false)],
            ..Default::default()
        };
        assert_eq!(block.computed_locality(), Locality::Remote);
        block.replicas[1].healthy = true;
        assert_eq!(block.computed_locality(), Locality::Local);
    }

    #[test]
    fn name_normalization_bounds() {
        assert_eq!(normalize_block_name("  My-Vol  ").unwrap(), "my-vol");
        assert!(normalize_block_name("ab").is_err());
        assert!(normalize_block_name(&"x".repeat(129)).is_err());
    }

    #[test]
    fn config_defaults_are_valid() {
        let config = BlocksConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.replica_count, 3);
        assert_eq!(config.stale_replica_timeout, 28800);
        assert!(config.replica_soft_anti_affinity);
        assert_eq!(config.namespace, "storage");
        assert_eq!(config.default_size, 10);
    }

    #[test]
    fn config_rejects_out_of_bounds() {
        let mut config = BlocksConfig::default();
        config.replica_count = 0;
        assert!(config.validate().is_err());
        config.replica_count = 8;
        assert!(config.validate().is_err());
        config.replica_count = 7;
        config.stale_replica_timeout = 59;
        assert!(config.validate().is_err());
    }

    #[test]
    fn mode_round_trips_through_str() {
        for mode in [ReplicaMode::RW, ReplicaMode::RO, ReplicaMode::ERR] {
            assert_eq!(mode.to_string().parse::<ReplicaMode>().unwrap(), mode);
        }
        assert!("rw".parse::<ReplicaMode>().is_err());
    }
}
