//! Replica driver: owns replica pod/folder lifecycle and the controller-side
//! add/remove/update/verify-rebuild protocol. Mutating operations expect the
//! caller to hold the block's lock.

use basalt_types::{Block, Disk, REPLICA_PORT, Replica, ReplicaMode, ReplicaStatus, fresh_id};
use tracing::{info, warn};

use crate::{
    config::{AddReplicaOpts, gb},
    controller,
    core::Core,
    error::{Error, Result, tolerate},
    gateway::{self, ReplicaRow},
    moniker::moniker,
    store::{EntityStore as _, require},
    substrate::{FolderService as _, HostPathMount, PodManifest, PodOrchestrator as _},
};

/// Replica pod name prefix; also the folder prefix on the backing disk.
pub const REPLICA_PREFIX: &str = "block-replica";

/// Stderr fragments the engine emits for known failures.
const ADD_REPLICA_FAILED: &str = "Error running add replica command";
const LAST_REPLICA_UP: &str = "cannot remove last replica if volume is up";

pub fn replica_name(block: &Block) -> String {
    format!("{}-{}-{}", REPLICA_PREFIX, block.name, moniker())
}

/// Argv for the replica process serving `/mnt/` inside its pod.
pub fn replica_args(block: &Block, name: &str) -> Vec<String> {
    vec![
        "longhorn".to_string(),
        "replica".to_string(),
        "/mnt/".to_string(),
        "--size".to_string(),
        gb(block.size),
        "--replica-instance-name".to_string(),
        name.to_string(),
        "--listen".to_string(),
        format!("0.0.0.0:{}", REPLICA_PORT),
        "--data-server-protocol".to_string(),
        "tcp".to_string(),
        "--snapshot-max-count".to_string(),
        "250".to_string(),
        "--snapshot-max-size".to_string(),
        "1gb".to_string(),
    ]
}

/// Pod manifest for a replica: engine container on the disk's node with the
/// allocated folder bound to /mnt and the data-server port range exposed.
pub fn replica_manifest(
    block: &Block,
    name: &str,
    hostname: &str,
    folder_path: &str,
    image: &str,
) -> PodManifest {
    PodManifest {
        name: name.to_string(),
        labels: [("block".to_string(), block.id.clone())].into(),
        node_name: hostname.to_string(),
        image: image.to_string(),
        command: replica_args(block, name),
        ports: (REPLICA_PORT..REPLICA_PORT + 15).collect(),
        host_paths: vec![HostPathMount::new("data", folder_path, "/mnt")],
        privileged: false,
        restart_policy: "Never".to_string(),
    }
}

/// Allocates a folder on the disk and submits a replica pod. On pod
/// submission failure the folder is deprovisioned again and the call fails
/// `PodCreationError`. The new replica starts pending/unhealthy and is
/// appended to the block's replica list.
pub async fn create_replica(core: &Core, id: &str, disk: &Disk) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    let folder = core.folders.provision(disk, REPLICA_PREFIX).await?;
    let name = replica_name(&block);
    let manifest = replica_manifest(
        &block,
        &name,
        &disk.hostname,
        &folder.path,
        &core.config.engine_image,
    );
    let pod = match core
        .pods
        .create_pod(&block.cluster, &block.namespace, manifest)
        .await
    {
        Ok(pod) => pod,
        Err(e) => {
            if let Err(e) = core.folders.deprovision(&folder.id).await {
                warn!(folder = %folder.id, "failed to deprovision folder: {}", e);
            }
            return Err(Error::PodCreationError(e.to_string()));
        }
    };
    info!(block = %block.name, replica = %name, disk = %disk.id, "replica pod created");
    block.replicas.push(Replica {
        id: fresh_id(),
        name,
        pod: Some(pod.uid),
        disk: disk.id.clone(),
        node: disk.node.clone(),
        folder: folder.id,
        status: ReplicaStatus::Pending,
        healthy: false,
        attached: false,
        ip: None,
        endpoint: None,
        mode: ReplicaMode::RW,
    });
    core.store.update(&block).await
}

/// Asks the engine to adopt a healthy replica. Skips (with a log) when the
/// replica is unhealthy or the block is offline; both resolve themselves on
/// the next pod.Running event.
pub async fn add_replica_to_frontend(
    core: &Core,
    id: &str,
    replica_id: &str,
    opts: &AddReplicaOpts,
) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    let replica = block
        .replica(replica_id)
        .ok_or_else(|| Error::ReplicaNotFound(replica_id.to_string()))?
        .clone();
    if !replica.healthy || !block.online {
        info!(
            block = %block.name,
            replica = %replica.name,
            healthy = replica.healthy,
            online = block.online,
            "skipping add-replica",
        );
        return Ok(block);
    }
    let endpoint = replica
        .endpoint
        .clone()
        .ok_or_else(|| Error::NoReplicaEndpoint(replica.name.clone()))?;
    let mut args = vec![
        "longhorn".to_string(),
        "add-replica".to_string(),
        "--replica-instance-name".to_string(),
        replica.name.clone(),
        "--size".to_string(),
        gb(block.size),
        "--current-size".to_string(),
        gb(block.size),
    ];
    opts.append_flags(&mut args);
    args.push(endpoint);
    let out = gateway::exec(core, &block, &args).await?;
    if out.stderr.contains(ADD_REPLICA_FAILED) {
        return Err(Error::AddReplicaError(out.stderr));
    }
    if let Some(stored) = block.replica_mut(replica_id) {
        stored.attached = true;
    }
    core.store.update(&block).await?;
    controller::update_frontend_state(core, id).await
}

/// Removes a replica from the engine's set. The persisted detach lands
/// before the frontend state is re-read.
pub async fn remove_replica_from_frontend(
    core: &Core,
    id: &str,
    replica_id: &str,
) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    let replica = block
        .replica(replica_id)
        .ok_or_else(|| Error::ReplicaNotFound(replica_id.to_string()))?
        .clone();
    let endpoint = replica
        .endpoint
        .clone()
        .ok_or_else(|| Error::NoReplicaEndpoint(replica.name.clone()))?;
    let args = vec![
        "longhorn".to_string(),
        "rm-replica".to_string(),
        endpoint,
    ];
    let out = gateway::exec(core, &block, &args).await?;
    if out.stderr.contains(LAST_REPLICA_UP) {
        return Err(Error::CannotRemoveLastReplica(out.stderr));
    }
    if let Some(stored) = block.replica_mut(replica_id) {
        stored.attached = false;
    }
    core.store.update(&block).await?;
    controller::update_frontend_state(core, id).await
}

/// Tears a replica down entirely: detach, pod deletion and folder
/// deprovisioning are each best-effort, then the record is dropped from the
/// block's list.
pub async fn remove_replica_from_block(core: &Core, id: &str, replica_id: &str) -> Result<Block> {
    let block = require(core.store.as_ref(), id).await?;
    let replica = block
        .replica(replica_id)
        .ok_or_else(|| Error::ReplicaNotFound(replica_id.to_string()))?
        .clone();
    tolerate(
        remove_replica_from_frontend(core, id, replica_id).await,
        "remove replica from frontend",
    )?;
    tolerate(
        core.pods
            .delete_pod(&block.cluster, &block.namespace, &replica.name)
            .await,
        "delete replica pod",
    )?;
    tolerate(
        core.folders.deprovision(&replica.folder).await,
        "deprovision replica folder",
    )?;
    let mut block = require(core.store.as_ref(), id).await?;
    block.replicas.retain(|r| r.id != replica_id);
    core.store.update(&block).await?;
    controller::update_frontend_state(core, id).await
}

/// A `ls-replica` row joined with the stored replica that owns the endpoint.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicaListEntry {
    pub row: ReplicaRow,
    pub replica: Option<Replica>,
}

/// Lists the engine's replica set and joins each row with the stored record
/// by whole-endpoint equality. Rows without a match carry the parsed fields
/// only.
pub async fn list_replicas(core: &Core, id: &str) -> Result<Vec<ReplicaListEntry>> {
    let block = require(core.store.as_ref(), id).await?;
    let args = gateway::argv(&["longhorn", "ls-replica"]);
    let out = gateway::exec(core, &block, &args).await?;
    Ok(gateway::parse_replica_table(&out.stdout)
        .into_iter()
        .map(|row| ReplicaListEntry {
            replica: block.replica_by_endpoint(&row.endpoint).cloned(),
            row,
        })
        .collect())
}

/// Sets the engine-side mode of one replica. The replica is resolved by id
/// here so the reference cannot be lost between the API layer and the
/// command.
pub async fn update_replica_mode(
    core: &Core,
    id: &str,
    replica_id: &str,
    mode: ReplicaMode,
) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    let replica = block
        .replica(replica_id)
        .ok_or_else(|| Error::ReplicaNotFound(replica_id.to_string()))?
        .clone();
    let endpoint = replica
        .endpoint
        .clone()
        .ok_or_else(|| Error::NoReplicaEndpoint(replica.name.clone()))?;
    let args = vec![
        "longhorn".to_string(),
        "update-replica".to_string(),
        "--mode".to_string(),
        mode.to_string(),
        endpoint,
    ];
    gateway::exec(core, &block, &args).await?;
    if let Some(stored) = block.replica_mut(replica_id) {
        stored.mode = mode;
    }
    core.store.update(&block).await
}

pub async fn rebuild_status(core: &Core, id: &str, replica_id: &str) -> Result<String> {
    let block = require(core.store.as_ref(), id).await?;
    let replica = block
        .replica(replica_id)
        .ok_or_else(|| Error::ReplicaNotFound(replica_id.to_string()))?;
    let endpoint = replica
        .endpoint
        .clone()
        .ok_or_else(|| Error::NoReplicaEndpoint(replica.name.clone()))?;
    let args = vec![
        "longhorn".to_string(),
        "replica-rebuild-status".to_string(),
        endpoint,
    ];
    let out = gateway::exec(core, &block, &args).await?;
    Ok(out.stdout)
}

pub async fn verify_rebuild(core: &Core, id: &str, replica_id: &str) -> Result<()> {
    let block = require(core.store.as_ref(), id).await?;
    let replica = block
        .replica(replica_id)
        .ok_or_else(|| Error::ReplicaNotFound(replica_id.to_string()))?;
    let endpoint = replica
        .endpoint
        .clone()
        .ok_or_else(|| Error::NoReplicaEndpoint(replica.name.clone()))?;
    let args = vec![
        "longhorn".to_string(),
        "verify-rebuild-replica".to_string(),
        "--replica-instance-name".to_string(),
        replica.id.clone(),
        endpoint,
    ];
    gateway::exec(core, &block, &args).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{disk, harness, online_block};

    #[test]
    fn replica_args_carry_fixed_engine_settings() {
        let block = Block {
            name: "v1".to_string(),
            size: 10,
            ..Default::default()
        };
        let args = replica_args(&block, "block-replica-v1-calm-ribbed-basalt");
        assert_eq!(
            args,
            vec![
                "longhorn",
                "replica",
                "/mnt/",
                "--size",
                "10gb",
                "--replica-instance-name",
                "block-replica-v1-calm-ribbed-basalt",
                "--listen",
                "0.0.0.0:10000",
                "--data-server-protocol",
                "tcp",
                "--snapshot-max-count",
                "250",
                "--snapshot-max-size",
                "1gb",
            ]
        );
    }

    #[test]
    fn replica_manifest_exposes_the_port_range() {
        let block = online_block("v1", 0);
        let m = replica_manifest(&block, "r", "worker-2", "/mnt/disks/d2/f", "engine:latest");
        assert_eq!(m.ports.len(), 15);
        assert_eq!(*m.ports.first().unwrap(), 10000);
        assert_eq!(*m.ports.last().unwrap(), 10014);
        assert_eq!(m.restart_policy, "Never");
        assert!(!m.privileged);
        assert_eq!(m.host_paths[0].mount_path, "/mnt");
    }

    #[tokio::test]
    async fn create_replica_appends_a_pending_record() {
        let h = harness();
        let block = h.seed(online_block("v1", 0)).await;
        let d = disk("disk-2", "n-2", "worker-2");
        let updated = create_replica(&h.core, &block.id, &d).await.unwrap();
        assert_eq!(updated.replicas.len(), 1);
        let r = &updated.replicas[0];
        assert!(r.name.starts_with("block-replica-v1-"));
        assert_eq!(r.status, ReplicaStatus::Pending);
        assert!(!r.healthy && !r.attached);
        assert!(r.ip.is_none() && r.endpoint.is_none());
        assert_eq!(r.disk, "disk-2");
        assert_eq!(r.node, "n-2");
    }

    #[tokio::test]
    async fn create_replica_rolls_back_the_folder_on_pod_failure() {
        let h = harness();
        let block = h.seed(online_block("v1", 0)).await;
        h.pods.fail_next_create();
        let d = disk("disk-2", "n-2", "worker-2");
        let err = create_replica(&h.core, &block.id, &d).await.unwrap_err();
        assert!(matches!(err, Error::PodCreationError(_)));
        assert_eq!(h.folders.deprovisioned().len(), 1);
        let stored = h.get(&block.id).await;
        assert!(stored.replicas.is_empty());
    }

    #[tokio::test]
    async fn add_replica_skips_unhealthy_or_offline() {
        let h = harness();
        let mut block = online_block("v1", 1);
        block.replicas[0].healthy = false;
        let block = h.seed(block).await;
        let rid = block.replicas[0].id.clone();
        add_replica_to_frontend(&h.core, &block.id, &rid, &AddReplicaOpts::default())
            .await
            .unwrap();
        assert!(h.pods.exec_log().is_empty());
    }

    #[tokio::test]
    async fn add_replica_builds_the_exact_argv() {
        let h = harness();
        let block = h.seed(online_block("v1", 1)).await;
        let rid = block.replicas[0].id.clone();
        let updated =
            add_replica_to_frontend(&h.core, &block.id, &rid, &AddReplicaOpts::default())
                .await
                .unwrap();
        assert!(updated.replica(&rid).unwrap().attached);
        let log = h.pods.exec_log();
        assert_eq!(
            log[0],
            vec![
                "longhorn",
                "add-replica",
                "--replica-instance-name",
                &block.replicas[0].name,
                "--size",
                "10gb",
                "--current-size",
                "10gb",
                "tcp://10.0.0.11:10000",
            ]
            .into_iter()
            .map(String::from)
            .collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn add_replica_surfaces_the_engine_error_string() {
        let h = harness();
        let block = h.seed(online_block("v1", 1)).await;
        let rid = block.replicas[0].id.clone();
        h.pods.script(
            &["longhorn", "add-replica"],
            "",
            "Error running add replica command: exit 1",
        );
        let err = add_replica_to_frontend(&h.core, &block.id, &rid, &AddReplicaOpts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AddReplicaError(_)));
        assert!(!h.get(&block.id).await.replicas[0].attached);
    }

    #[tokio::test]
    async fn remove_replica_requires_an_endpoint() {
        let h = harness();
        let mut block = online_block("v1", 1);
        block.replicas[0].clear_ip();
        let block = h.seed(block).await;
        let rid = block.replicas[0].id.clone();
        let err = remove_replica_from_frontend(&h.core, &block.id, &rid)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoReplicaEndpoint(_)));
    }

    #[tokio::test]
    async fn remove_last_replica_while_up_is_refused_by_the_engine() {
        let h = harness();
        let block = h.seed(online_block("v1", 1)).await;
        let rid = block.replicas[0].id.clone();
        h.pods.script(
            &["longhorn", "rm-replica"],
            "",
            "cannot remove last replica if volume is up",
        );
        let err = remove_replica_from_frontend(&h.core, &block.id, &rid)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CannotRemoveLastReplica(_)));
    }

    #[tokio::test]
    async fn remove_from_block_is_best_effort_and_drops_the_record() {
        let h = harness();
        let mut block = online_block("v1", 2);
        // Endpointless replica: the frontend detach cannot even be attempted.
        block.replicas[1].clear_ip();
        let block = h.seed(block).await;
        let rid = block.replicas[1].id.clone();
        let name = block.replicas[1].name.clone();
        let folder = block.replicas[1].folder.clone();
        let updated = remove_replica_from_block(&h.core, &block.id, &rid)
            .await
            .unwrap();
        assert_eq!(updated.replicas.len(), 1);
        assert!(h.pods.deleted().contains(&name));
        assert!(h.folders.deprovisioned().contains(&folder));
    }

    #[tokio::test]
    async fn list_replicas_joins_rows_by_endpoint() {
        let h = harness();
        let block = h.seed(online_block("v1", 2)).await;
        h.pods.script(
            &["longhorn", "ls-replica"],
            "ADDRESS MODE CHAIN\n\
             tcp://10.0.0.11:10000 RW [volume-head-001.img]\n\
             tcp://10.9.9.9:10000 RW\n",
            "",
        );
        let entries = list_replicas(&h.core, &block.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].replica.as_ref().unwrap().id,
            block.replicas[0].id
        );
        assert!(entries[1].replica.is_none());
    }

    #[tokio::test]
    async fn update_mode_resolves_the_replica_by_id() {
        let h = harness();
        let block = h.seed(online_block("v1", 1)).await;
        let rid = block.replicas[0].id.clone();
        let updated = update_replica_mode(&h.core, &block.id, &rid, ReplicaMode::RO)
            .await
            .unwrap();
        assert_eq!(updated.replicas[0].mode, ReplicaMode::RO);
        assert!(h.pods.exec_log().contains(&vec![
            "longhorn".to_string(),
            "update-replica".to_string(),
            "--mode".to_string(),
            "RO".to_string(),
            "tcp://10.0.0.11:10000".to_string(),
        ]));
    }
}
