//! Volume reconciler: the top-level state machine for a block. Provision and
//! deprovision own the substrate end to end; format/mount/unmount drive the
//! node terminal; check-pods and balance converge actual state back toward
//! the desired shape.

use basalt_types::{
    Block, BlockStatus, Folder, Locality, ReplicaStatus, fresh_id, normalize_block_name,
    validate_replica_count, validate_size,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::{AddReplicaOpts, ControllerOpts},
    controller,
    core::Core,
    error::{Error, Result, tolerate},
    gateway, replica,
    store::{EntityStore as _, require},
    substrate::{
        DiskService as _, FolderService as _, NodeService as _, NodeTerminal as _,
        PodOrchestrator as _, PodPhase,
    },
};

/// Folder prefix for a block's mount point.
const MOUNT_POINT_PREFIX: &str = "block";

async fn mount_point(core: &Core, block: &Block) -> Result<Folder> {
    core.folders
        .resolve(&block.mount_point)
        .await?
        .ok_or_else(|| Error::FolderNotFound(block.mount_point.clone()))
}

/// Creates the entity, the controller pod and the initial replica set.
///
/// Replica pods come up asynchronously; the controller adopts each one on
/// its pod.Running event. Fewer available disks than requested replicas is
/// tolerated with a warning.
pub async fn provision(
    core: &Core,
    name: &str,
    node_id: &str,
    size: u64,
    replica_count: u32,
) -> Result<Block> {
    let name = normalize_block_name(name).map_err(Error::UserInput)?;
    validate_size(size).map_err(Error::UserInput)?;
    validate_replica_count(replica_count).map_err(Error::UserInput)?;
    if core.store.find_by_name(&name).await?.is_some() {
        return Err(Error::BlockExists(name));
    }
    let node = core
        .nodes
        .resolve(node_id)
        .await?
        .ok_or_else(|| Error::NodeNotFound(node_id.to_string()))?;
    let node_disks = core.disks.disks_for_node(&node.id).await?;
    let Some(first_disk) = node_disks.first() else {
        return Err(Error::NodeStorageNotFound(node.id));
    };
    let folder = core.folders.provision(first_disk, MOUNT_POINT_PREFIX).await?;
    let block = core
        .store
        .create(Block {
            id: fresh_id(),
            name,
            cluster: node.cluster.clone(),
            namespace: core.config.namespace.clone(),
            node: node.id.clone(),
            size,
            replica_count,
            mount_point: folder.id.clone(),
            status: BlockStatus::Pending,
            locality: Locality::Unknown,
            ..Default::default()
        })
        .await?;
    let _guard = core.locks.acquire(&block.id).await;
    if let Err(e) = controller::create_controller(core, &block.id, &ControllerOpts::default()).await
    {
        // Partial cleanup: the entity and its mount point must not leak.
        tolerate(
            core.folders.deprovision(&folder.id).await,
            "deprovision mount point after failed provision",
        )?;
        core.store.soft_remove(&block.id).await?;
        return Err(e);
    }
    let budget_mib = size * 1024;
    let available = core
        .disks
        .available_disks(&block.cluster, budget_mib, &[], replica_count as usize)
        .await?;
    for disk in &available {
        if let Err(e) = replica::create_replica(core, &block.id, disk).await {
            warn!(block = %block.name, disk = %disk.id, "replica creation failed: {}", e);
        }
    }
    let block = require(core.store.as_ref(), &block.id).await?;
    if (block.replicas.len() as u32) < replica_count {
        warn!(
            block = %block.name,
            provisioned = block.replicas.len(),
            requested = replica_count,
            "fewer replicas provisioned than requested",
        );
    }
    info!(block = %block.name, id = %block.id, "block provisioned");
    Ok(block)
}

/// Tears the block down: controller, replicas and mount point are removed
/// best-effort, then the entity is soft-deleted. Refused while mounted.
pub async fn deprovision(core: &Core, id: &str) -> Result<Block> {
    let block = require(core.store.as_ref(), id).await?;
    if block.mounted {
        return Err(Error::BlockMounted(block.name));
    }
    tolerate(
        controller::delete_controller(core, id).await,
        "delete controller during deprovision",
    )?;
    for r in &block.replicas {
        tolerate(
            replica::remove_replica_from_block(core, id, &r.id).await,
            "remove replica during deprovision",
        )?;
    }
    tolerate(
        core.folders.deprovision(&block.mount_point).await,
        "deprovision mount point",
    )?;
    let removed = core.store.soft_remove(id).await?;
    info!(block = %removed.name, "block deprovisioned");
    Ok(removed)
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormatOpts {
    pub force: bool,
    pub fs_type: String,
    /// Reserved-blocks percentage handed to mkfs `-m`.
    pub reserve: u32,
}

impl Default for FormatOpts {
    fn default() -> Self {
        Self {
            force: false,
            fs_type: "ext4".to_string(),
            reserve: 0,
        }
    }
}

/// Makes a filesystem on the block device. The device exists only while the
/// frontend is up.
pub async fn format(core: &Core, id: &str, opts: &FormatOpts) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    if block.formatted && !opts.force {
        return Err(Error::BlockFormatted(block.name));
    }
    if block.mounted {
        return Err(Error::BlockMounted(block.name));
    }
    let device = block
        .device
        .clone()
        .ok_or_else(|| Error::BlockOffline(block.name.clone()))?;
    let args = vec![
        "mkfs".to_string(),
        "-t".to_string(),
        opts.fs_type.clone(),
        "-m".to_string(),
        opts.reserve.to_string(),
        "-L".to_string(),
        block.name.clone(),
        device,
    ];
    core.terminal.run(&block.node, &args).await?;
    block.formatted = true;
    core.store.update(&block).await
}

pub async fn mount(core: &Core, id: &str, force: bool) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    if block.mounted && !force {
        return Err(Error::BlockMounted(block.name));
    }
    if !block.formatted {
        return Err(Error::BlockNotFormatted(block.name));
    }
    let device = block
        .device
        .clone()
        .ok_or_else(|| Error::BlockOffline(block.name.clone()))?;
    let folder = mount_point(core, &block).await?;
    let args = vec!["mount".to_string(), device, folder.path];
    core.terminal.run(&block.node, &args).await?;
    block.mounted = true;
    core.store.update(&block).await
}

pub async fn unmount(core: &Core, id: &str, force: bool) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    if !block.mounted && !force {
        return Err(Error::BlockNotMounted(block.name));
    }
    let folder = mount_point(core, &block).await?;
    let args = vec!["umount".to_string(), folder.path];
    core.terminal.run(&block.node, &args).await?;
    block.mounted = false;
    core.store.update(&block).await
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaUsage {
    pub id: String,
    pub name: String,
    /// Folder size in GiB; -1 for unhealthy replicas.
    pub size: f64,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub size: u64,
    pub used: f64,
    pub available: f64,
    pub used_percent: f64,
    pub replicas: Vec<ReplicaUsage>,
}

/// Reads `df` on the mount point, persists the used figure and augments the
/// report with per-replica folder sizes.
pub async fn usage(core: &Core, id: &str) -> Result<Usage> {
    let mut block = require(core.store.as_ref(), id).await?;
    let folder = mount_point(core, &block).await?;
    let out = core
        .terminal
        .run(&block.node, &["df".to_string(), folder.path])
        .await?;
    let df = gateway::parse_df(&out.stdout)?;
    block.used = df.used_gib;
    let block = core.store.update(&block).await?;
    let mut replicas = Vec::with_capacity(block.replicas.len());
    for r in &block.replicas {
        let size = if r.healthy {
            match replica_folder_size(core, r).await {
                Ok(size) => size,
                Err(e) => {
                    warn!(replica = %r.name, "du failed: {}", e);
                    -1.0
                }
            }
        } else {
            -1.0
        };
        replicas.push(ReplicaUsage {
            id: r.id.clone(),
            name: r.name.clone(),
            size,
        });
    }
    Ok(Usage {
        size: block.size,
        used: df.used_gib,
        available: df.available_gib,
        used_percent: df.used_percent,
        replicas,
    })
}

async fn replica_folder_size(core: &Core, r: &basalt_types::Replica) -> Result<f64> {
    let folder = core
        .folders
        .resolve(&r.folder)
        .await?
        .ok_or_else(|| Error::FolderNotFound(r.folder.clone()))?;
    let out = core
        .terminal
        .run(&r.node, &["du".to_string(), "-s".to_string(), folder.path])
        .await?;
    gateway::parse_du(&out.stdout)
}

/// Discards unused filesystem blocks on the mounted volume.
pub async fn trim(core: &Core, id: &str) -> Result<()> {
    let block = require(core.store.as_ref(), id).await?;
    let folder = mount_point(core, &block).await?;
    core.terminal
        .run(&block.node, &["fstrim".to_string(), folder.path])
        .await?;
    Ok(())
}

/// One reconciliation pass over the controller pod and every replica pod,
/// finishing with a frontend state refresh.
pub async fn check_pods(core: &Core, id: &str) -> Result<Block> {
    check_controller(core, id).await?;
    check_replicas(core, id).await?;
    controller::update_frontend_state(core, id).await
}

async fn check_controller(core: &Core, id: &str) -> Result<()> {
    let mut block = require(core.store.as_ref(), id).await?;
    let pod = core
        .pods
        .read_pod(&block.cluster, &block.namespace, &block.name)
        .await?
        .ok_or_else(|| Error::ControllerNotFound(block.name.clone()))?;
    if pod.phase != PodPhase::Running && block.online {
        warn!(block = %block.name, "controller pod left Running; marking offline");
        block.online = false;
        core.store.update(&block).await?;
    } else if pod.phase == PodPhase::Running && !block.online {
        info!(block = %block.name, "controller pod is Running; marking online");
        block.online = true;
        core.store.update(&block).await?;
    }
    Ok(())
}

async fn check_replicas(core: &Core, id: &str) -> Result<()> {
    let ids: Vec<String> = require(core.store.as_ref(), id)
        .await?
        .replicas
        .iter()
        .map(|r| r.id.clone())
        .collect();
    for rid in ids {
        // Reload each round: replica ops persist as they go.
        let mut block = require(core.store.as_ref(), id).await?;
        let Some(r) = block.replica(&rid).cloned() else {
            continue;
        };
        let pod = core
            .pods
            .read_pod(&block.cluster, &block.namespace, &r.name)
            .await?;
        match pod {
            None => {
                warn!(replica = %r.name, "replica pod is gone; marking unhealthy");
                tolerate(
                    replica::remove_replica_from_frontend(core, id, &rid).await,
                    "detach replica with missing pod",
                )?;
                let mut block = require(core.store.as_ref(), id).await?;
                if let Some(stored) = block.replica_mut(&rid) {
                    stored.healthy = false;
                    stored.attached = false;
                    stored.status = ReplicaStatus::Unhealthy;
                    stored.pod = None;
                    stored.clear_ip();
                }
                core.store.update(&block).await?;
            }
            Some(pod) if pod.phase != PodPhase::Running => {
                tolerate(
                    replica::remove_replica_from_frontend(core, id, &rid).await,
                    "detach non-running replica",
                )?;
                tolerate(
                    replica::add_replica_to_frontend(core, id, &rid, &AddReplicaOpts::default())
                        .await,
                    "reattach non-running replica",
                )?;
            }
            Some(pod) if !r.healthy => {
                if let Some(ip) = pod.ip.as_deref() {
                    if let Some(stored) = block.replica_mut(&rid) {
                        stored.set_ip(ip);
                        stored.healthy = true;
                        stored.status = ReplicaStatus::Healthy;
                        stored.pod = Some(pod.uid.clone());
                    }
                    core.store.update(&block).await?;
                    tolerate(
                        replica::add_replica_to_frontend(
                            core,
                            id,
                            &rid,
                            &AddReplicaOpts::default(),
                        )
                        .await,
                        "reattach recovered replica",
                    )?;
                }
            }
            Some(_) => {}
        }
    }
    Ok(())
}

/// Converges the replica count toward the desired shape and nudges locality
/// back toward the preferred node. Replica records whose pod is gone for
/// good are dropped first; their replacements are new replicas, never
/// resurrections.
pub async fn balance(core: &Core, id: &str) -> Result<Block> {
    let stale: Vec<String> = require(core.store.as_ref(), id)
        .await?
        .replicas
        .iter()
        .filter(|r| !r.healthy && r.pod.is_none())
        .map(|r| r.id.clone())
        .collect();
    for rid in stale {
        replica::remove_replica_from_block(core, id, &rid).await?;
    }
    let block = require(core.store.as_ref(), id).await?;
    let target = block.replica_count as usize;
    if block.replicas.len() < target {
        grow(core, id, target).await?;
    } else if block.replicas.len() > target {
        shrink(core, id, target).await?;
    } else if block.locality == Locality::Remote {
        restore_locality(core, id).await?;
    }
    controller::update_frontend_state(core, id).await
}

async fn grow(core: &Core, id: &str, target: usize) -> Result<()> {
    loop {
        let block = require(core.store.as_ref(), id).await?;
        if block.replicas.len() >= target {
            return Ok(());
        }
        let exclude: Vec<String> = block.replicas.iter().map(|r| r.disk.clone()).collect();
        let budget_mib = block.size * 1024;
        let disks = core
            .disks
            .available_disks(&block.cluster, budget_mib, &exclude, 1)
            .await?;
        let Some(disk) = disks.first() else {
            warn!(
                block = %block.name,
                have = block.replicas.len(),
                want = target,
                "no disk available to grow the replica set",
            );
            return Ok(());
        };
        replica::create_replica(core, id, disk).await?;
    }
}

async fn shrink(core: &Core, id: &str, target: usize) -> Result<()> {
    let block = require(core.store.as_ref(), id).await?;
    let excess = block.replicas.len() - target;
    let victims: Vec<String> = block
        .replicas
        .iter()
        .rev()
        .filter(|r| r.node != block.node)
        .take(excess)
        .map(|r| r.id.clone())
        .collect();
    for rid in victims {
        replica::remove_replica_from_block(core, id, &rid).await?;
    }
    Ok(())
}

/// Best-effort extra replica on the preferred node; the surplus elsewhere is
/// picked up by a later balance pass.
async fn restore_locality(core: &Core, id: &str) -> Result<()> {
    let block = require(core.store.as_ref(), id).await?;
    let budget_mib = block.size * 1024;
    let hosting: Vec<&str> = block.replicas.iter().map(|r| r.disk.as_str()).collect();
    let candidate = core
        .disks
        .disks_for_node(&block.node)
        .await?
        .into_iter()
        .find(|d| d.available_mib >= budget_mib && !hosting.contains(&d.id.as_str()));
    let Some(disk) = candidate else {
        warn!(block = %block.name, node = %block.node, "no local disk available to restore locality");
        return Ok(());
    };
    tolerate(
        replica::create_replica(core, id, &disk).await,
        "create local replica",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        store::EntityStore as _,
        testing::{harness, online_block},
    };

    #[tokio::test]
    async fn provision_creates_controller_and_replicas() {
        let h = harness();
        let block = provision(&h.core, " V1 ", "n-1", 10, 3).await.unwrap();
        assert_eq!(block.name, "v1");
        assert_eq!(block.size, 10);
        assert_eq!(block.replica_count, 3);
        assert!(block.controller.is_some());
        assert_eq!(block.replicas.len(), 3);
        assert!(block.replicas.iter().all(|r| r.status == ReplicaStatus::Pending));
        assert!(!block.online);
        // Controller pod plus three replica pods.
        assert_eq!(h.pods.manifests().len(), 4);
        // Mount-point folder plus one folder per replica.
        assert_eq!(h.folders.provisioned().len(), 4);
    }

    #[tokio::test]
    async fn provision_rejects_duplicate_names() {
        let h = harness();
        provision(&h.core, "v1", "n-1", 10, 1).await.unwrap();
        let err = provision(&h.core, "v1", "n-1", 10, 1).await.unwrap_err();
        assert!(matches!(err, Error::BlockExists(_)));
    }

    #[tokio::test]
    async fn provision_rejects_zero_replicas() {
        let h = harness();
        let err = provision(&h.core, "v1", "n-1", 10, 0).await.unwrap_err();
        assert!(matches!(err, Error::UserInput(_)));
    }

    #[tokio::test]
    async fn provision_fails_without_node_storage() {
        let h = harness();
        h.disks.clear();
        let err = provision(&h.core, "v1", "n-1", 10, 3).await.unwrap_err();
        assert!(matches!(err, Error::NodeStorageNotFound(_)));
    }

    #[tokio::test]
    async fn provision_tolerates_a_disk_shortfall() {
        let h = harness();
        h.disks.keep_only(2);
        let block = provision(&h.core, "v1", "n-1", 10, 3).await.unwrap();
        assert_eq!(block.replicas.len(), 2);
        assert_eq!(block.replica_count, 3);
    }

    #[tokio::test]
    async fn format_guards_and_effect() {
        let h = harness();
        let mut seeded = online_block("v1", 1);
        seeded.device = Some("/dev/longhorn/v1".to_string());
        let block = h.seed(seeded).await;
        let formatted = format(&h.core, &block.id, &FormatOpts::default())
            .await
            .unwrap();
        assert!(formatted.formatted);
        let cmds = h.terminal.commands();
        assert_eq!(
            cmds[0],
            vec!["mkfs", "-t", "ext4", "-m", "0", "-L", "v1", "/dev/longhorn/v1"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        );
        // Second format without force is a conflict; with force it runs again.
        let err = format(&h.core, &block.id, &FormatOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BlockFormatted(_)));
        format(
            &h.core,
            &block.id,
            &FormatOpts {
                force: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn mount_requires_formatting_first() {
        let h = harness();
        let mut seeded = online_block("v1", 1);
        seeded.device = Some("/dev/longhorn/v1".to_string());
        let block = h.seed(seeded).await;
        let err = mount(&h.core, &block.id, false).await.unwrap_err();
        assert!(matches!(err, Error::BlockNotFormatted(_)));
        format(&h.core, &block.id, &FormatOpts::default())
            .await
            .unwrap();
        let mounted = mount(&h.core, &block.id, false).await.unwrap();
        assert!(mounted.mounted);
        let err = mount(&h.core, &block.id, false).await.unwrap_err();
        assert!(matches!(err, Error::BlockMounted(_)));
    }

    #[tokio::test]
    async fn unmount_round_trip() {
        let h = harness();
        let mut seeded = online_block("v1", 1);
        seeded.device = Some("/dev/longhorn/v1".to_string());
        seeded.formatted = true;
        seeded.mounted = true;
        let block = h.seed(seeded).await;
        let unmounted = unmount(&h.core, &block.id, false).await.unwrap();
        assert!(!unmounted.mounted);
        let err = unmount(&h.core, &block.id, false).await.unwrap_err();
        assert!(matches!(err, Error::BlockNotMounted(_)));
        let mounted = mount(&h.core, &block.id, false).await.unwrap();
        assert!(mounted.mounted);
    }

    #[tokio::test]
    async fn usage_reports_df_and_replica_folders() {
        let h = harness();
        let mut seeded = online_block("v1", 2);
        seeded.replicas[1].healthy = false;
        let block = h.seed(seeded).await;
        h.terminal.script(
            "df",
            "Filesystem 1K-blocks Used Available Use% Mounted on\n\
             /dev/longhorn/v1 10485760 2097152 8388608 20% /mnt\n",
        );
        h.terminal.script("du", "1048576\t/mnt/replica\n");
        let report = usage(&h.core, &block.id).await.unwrap();
        assert_eq!(report.size, 10);
        assert!((report.used - 2.0).abs() < 1e-9);
        assert!((report.available - 8.0).abs() < 1e-9);
        assert!((report.used_percent - 20.0).abs() < 1e-9);
        assert_eq!(report.replicas.len(), 2);
        assert!((report.replicas[0].size - 1.0).abs() < 1e-9);
        assert_eq!(report.replicas[1].size, -1.0);
        assert!((h.get(&block.id).await.used - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn trim_runs_fstrim_on_the_mount_point() {
        let h = harness();
        let block = h.seed(online_block("v1", 1)).await;
        trim(&h.core, &block.id).await.unwrap();
        let cmds = h.terminal.commands();
        assert_eq!(cmds[0][0], "fstrim");
    }

    #[tokio::test]
    async fn deprovision_refuses_mounted_blocks_then_soft_deletes() {
        let h = harness();
        let mut seeded = online_block("v1", 2);
        seeded.mounted = true;
        let block = h.seed(seeded).await;
        let err = deprovision(&h.core, &block.id).await.unwrap_err();
        assert!(matches!(err, Error::BlockMounted(_)));
        let mut stored = h.get(&block.id).await;
        stored.mounted = false;
        h.core.store.update(&stored).await.unwrap();
        deprovision(&h.core, &block.id).await.unwrap();
        assert!(h.core.store.get(&block.id).await.unwrap().is_none());
        assert!(h.pods.deleted().contains(&"v1".to_string()));
    }

    #[tokio::test]
    async fn check_pods_is_fatal_without_a_controller_pod() {
        let h = harness();
        let block = h.seed(online_block("v1", 1)).await;
        h.pods.remove_pod("v1");
        let err = check_pods(&h.core, &block.id).await.unwrap_err();
        assert!(matches!(err, Error::ControllerNotFound(_)));
    }

    #[tokio::test]
    async fn check_pods_flips_online_with_the_controller_phase() {
        let h = harness();
        let block = h.seed(online_block("v1", 1)).await;
        h.pods.set_phase("v1", PodPhase::Pending);
        check_pods(&h.core, &block.id).await.unwrap();
        assert!(!h.get(&block.id).await.online);
        h.pods.set_phase("v1", PodPhase::Running);
        check_pods(&h.core, &block.id).await.unwrap();
        assert!(h.get(&block.id).await.online);
    }

    #[tokio::test]
    async fn check_pods_marks_replicas_with_missing_pods_unhealthy() {
        let h = harness();
        let block = h.seed(online_block("v1", 2)).await;
        h.pods.remove_pod(&block.replicas[1].name);
        check_pods(&h.core, &block.id).await.unwrap();
        let stored = h.get(&block.id).await;
        let r = &stored.replicas[1];
        assert!(!r.healthy);
        assert_eq!(r.status, ReplicaStatus::Unhealthy);
        assert!(r.pod.is_none() && r.ip.is_none() && r.endpoint.is_none());
    }

    #[tokio::test]
    async fn check_pods_recovers_running_but_unhealthy_replicas() {
        let h = harness();
        let mut seeded = online_block("v1", 2);
        seeded.replicas[0].healthy = false;
        seeded.replicas[0].attached = false;
        seeded.replicas[0].status = ReplicaStatus::Unhealthy;
        let block = h.seed(seeded).await;
        check_pods(&h.core, &block.id).await.unwrap();
        let stored = h.get(&block.id).await;
        let r = &stored.replicas[0];
        assert!(r.healthy);
        assert!(r.attached);
        assert_eq!(r.endpoint.as_deref(), Some("tcp://10.0.0.11:10000"));
    }

    #[tokio::test]
    async fn balance_grows_toward_the_desired_count() {
        let h = harness();
        let mut seeded = online_block("v1", 1);
        seeded.replica_count = 3;
        let block = h.seed(seeded).await;
        let balanced = balance(&h.core, &block.id).await.unwrap();
        assert_eq!(balanced.replicas.len(), 3);
    }

    #[tokio::test]
    async fn balance_stops_growing_when_no_disks_remain() {
        let h = harness();
        let mut seeded = online_block("v1", 1);
        seeded.replica_count = 3;
        let block = h.seed(seeded).await;
        h.disks.clear();
        let balanced = balance(&h.core, &block.id).await.unwrap();
        assert_eq!(balanced.replicas.len(), 1);
    }

    #[tokio::test]
    async fn balance_shrinks_from_the_tail_preserving_locality() {
        let h = harness();
        let mut seeded = online_block("v1", 3);
        seeded.replica_count = 1;
        // The tail replica lives on the preferred node and must survive.
        seeded.replicas[2].node = seeded.node.clone();
        let preferred = seeded.replicas[2].id.clone();
        let block = h.seed(seeded).await;
        let balanced = balance(&h.core, &block.id).await.unwrap();
        assert_eq!(balanced.replicas.len(), 1);
        assert_eq!(balanced.replicas[0].id, preferred);
    }

    #[tokio::test]
    async fn balance_restores_locality_with_a_local_replica() {
        let h = harness();
        let mut seeded = online_block("v1", 2);
        seeded.replica_count = 2;
        seeded.locality = Locality::Remote;
        for r in &mut seeded.replicas {
            r.node = "n-2".to_string();
        }
        let block = h.seed(seeded).await;
        let balanced = balance(&h.core, &block.id).await.unwrap();
        assert_eq!(balanced.replicas.len(), 3);
        assert!(balanced.replicas.iter().any(|r| r.node == balanced.node));
    }
}
