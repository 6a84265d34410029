//! Snapshot operator: drives the engine's snapshot CLI. Every operation
//! requires the block to be online and fails `BlockOffline` before issuing
//! any command. Purge, hash and clone are asynchronous inside the engine;
//! callers poll the matching status operation.

use basalt_types::Block;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    core::Core,
    error::{Error, Result},
    gateway,
    store::require,
};

fn require_online(block: &Block) -> Result<()> {
    if !block.online {
        return Err(Error::BlockOffline(block.name.clone()));
    }
    Ok(())
}

async fn snapshots_exec(core: &Core, id: &str, tail: &[&str]) -> Result<String> {
    let block = require(core.store.as_ref(), id).await?;
    require_online(&block)?;
    let mut args = gateway::argv(&["longhorn", "snapshots"]);
    args.extend(tail.iter().map(|p| p.to_string()));
    let out = gateway::exec(core, &block, &args).await?;
    Ok(out.stdout)
}

/// Creates a snapshot and returns its engine-assigned name.
pub async fn create(core: &Core, id: &str) -> Result<String> {
    let stdout = snapshots_exec(core, id, &["create"]).await?;
    Ok(stdout.trim().to_string())
}

pub async fn revert(core: &Core, id: &str, name: &str) -> Result<()> {
    snapshots_exec(core, id, &["revert", name]).await?;
    Ok(())
}

pub async fn list(core: &Core, id: &str) -> Result<Vec<String>> {
    let stdout = snapshots_exec(core, id, &["ls"]).await?;
    Ok(gateway::parse_snapshot_list(&stdout))
}

pub async fn remove(core: &Core, id: &str, name: &str) -> Result<()> {
    snapshots_exec(core, id, &["rm", name]).await?;
    Ok(())
}

/// Kicks off a purge across the replicas. Asynchronous; poll
/// [`purge_status`].
pub async fn purge(core: &Core, id: &str, skip_if_in_progress: bool) -> Result<()> {
    if skip_if_in_progress {
        snapshots_exec(core, id, &["purge", "--skip-if-in-progress"]).await?;
    } else {
        snapshots_exec(core, id, &["purge"]).await?;
    }
    Ok(())
}

pub async fn purge_status(core: &Core, id: &str) -> Result<String> {
    snapshots_exec(core, id, &["purge-status"]).await
}

pub async fn info(core: &Core, id: &str) -> Result<Value> {
    let stdout = snapshots_exec(core, id, &["info"]).await?;
    gateway::parse_json(&stdout)
}

/// Source coordinates for cloning a snapshot from another volume's
/// controller.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloneOpts {
    pub snapshot_name: String,
    pub from_controller_address: String,
    pub from_volume_name: String,
    pub from_controller_instance_name: String,
}

pub async fn clone_from(core: &Core, id: &str, opts: &CloneOpts) -> Result<()> {
    snapshots_exec(
        core,
        id,
        &[
            "clone",
            "--snapshot-name",
            &opts.snapshot_name,
            "--from-controller-address",
            &opts.from_controller_address,
            "--from-volume-name",
            &opts.from_volume_name,
            "--from-controller-instance-name",
            &opts.from_controller_instance_name,
        ],
    )
    .await?;
    Ok(())
}

pub async fn clone_status(core: &Core, id: &str, name: &str) -> Result<String> {
    snapshots_exec(core, id, &["clone-status", name]).await
}

pub async fn hash(core: &Core, id: &str, name: &str) -> Result<()> {
    snapshots_exec(core, id, &["hash", name]).await?;
    Ok(())
}

pub async fn hash_cancel(core: &Core, id: &str, name: &str) -> Result<()> {
    snapshots_exec(core, id, &["hash-cancel", name]).await?;
    Ok(())
}

pub async fn hash_status(core: &Core, id: &str, name: &str) -> Result<Value> {
    let stdout = snapshots_exec(core, id, &["hash-status", name]).await?;
    gateway::parse_json(&stdout)
}
