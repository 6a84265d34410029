//! Engine controller driver: owns the controller pod lifecycle and the
//! frontend start/shutdown/expand/info protocol. All mutating operations
//! expect the caller to hold the block's lock.

use basalt_types::{Block, BlockStatus, CONTROLLER_PORT, validate_size};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    config::{ControllerOpts, gb},
    core::Core,
    error::{Error, Result, tolerate},
    events::DomainEvent,
    gateway,
    store::{EntityStore as _, require},
    substrate::{HostPathMount, NodeService as _, PodManifest, PodOrchestrator as _},
    volume,
};

/// Builds the controller argv: listen address, sizes, frontend, one
/// `--replica` per currently-known endpoint, the conditional flags in their
/// fixed order, then the volume name.
pub fn controller_args(block: &Block, frontend: &str, opts: &ControllerOpts) -> Vec<String> {
    let mut args = vec![
        "longhorn".to_string(),
        "controller".to_string(),
        "--listen".to_string(),
        format!("0.0.0.0:{}", CONTROLLER_PORT),
        "--size".to_string(),
        gb(block.size),
        "--current-size".to_string(),
        gb(block.size),
        "--frontend".to_string(),
        frontend.to_string(),
    ];
    for endpoint in block.replica_endpoints() {
        args.push("--replica".to_string());
        args.push(endpoint);
    }
    opts.append_flags(&mut args);
    args.push(block.name.clone());
    args
}

/// Pod manifest for the controller: privileged engine container with the
/// host's /mnt, /dev and /proc bound in, pinned to the block's node.
pub fn controller_manifest(block: &Block, hostname: &str, image: &str, command: Vec<String>) -> PodManifest {
    PodManifest {
        name: block.name.clone(),
        labels: [("block".to_string(), block.id.clone())].into(),
        node_name: hostname.to_string(),
        image: image.to_string(),
        command,
        ports: vec![CONTROLLER_PORT],
        host_paths: vec![
            HostPathMount::new("mnt", "/mnt", "/mnt"),
            HostPathMount::new("dev", "/dev", "/host/dev"),
            HostPathMount::new("proc", "/proc", "/host/proc"),
        ],
        privileged: true,
        restart_policy: String::new(),
    }
}

/// Creates the controller pod for a block that does not have one yet.
pub async fn create_controller(core: &Core, id: &str, opts: &ControllerOpts) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    if block.controller.is_some() {
        return Err(Error::ControllerExists(block.name.clone()));
    }
    let node = core
        .nodes
        .resolve(&block.node)
        .await?
        .ok_or_else(|| Error::NodeNotFound(block.node.clone()))?;
    let command = controller_args(&block, &core.config.frontend, opts);
    let manifest = controller_manifest(&block, &node.hostname, &core.config.engine_image, command);
    let pod = core
        .pods
        .create_pod(&block.cluster, &block.namespace, manifest)
        .await?;
    info!(block = %block.name, pod = %pod.uid, "controller pod created");
    block.controller = Some(pod.uid);
    core.store.update(&block).await
}

pub async fn start_frontend(core: &Core, id: &str) -> Result<Block> {
    let block = require(core.store.as_ref(), id).await?;
    let args = gateway::argv(&["longhorn", "frontend", "start"])
        .into_iter()
        .chain([core.config.frontend.clone()])
        .collect::<Vec<_>>();
    gateway::exec(core, &block, &args).await?;
    update_frontend_state(core, id).await
}

pub async fn shutdown_frontend(core: &Core, id: &str) -> Result<Block> {
    let block = require(core.store.as_ref(), id).await?;
    let args = gateway::argv(&["longhorn", "frontend", "shutdown"]);
    gateway::exec(core, &block, &args).await?;
    update_frontend_state(core, id).await
}

/// Engine-reported controller state, from `longhorn info`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerInfo {
    /// "up" | "down"
    pub frontend_state: String,
    /// Host device path while the frontend is up.
    pub endpoint: Option<String>,
}

pub async fn controller_info(core: &Core, block: &Block) -> Result<ControllerInfo> {
    let args = gateway::argv(&["longhorn", "info"]);
    let out = gateway::exec(core, block, &args).await?;
    let value = gateway::parse_json(&out.stdout)?;
    Ok(serde_json::from_value(value)?)
}

/// Grows the volume and tells the engine. The new size must not shrink the
/// volume.
pub async fn expand(core: &Core, id: &str, size: u64) -> Result<Block> {
    validate_size(size).map_err(Error::UserInput)?;
    let mut block = require(core.store.as_ref(), id).await?;
    if size < block.size {
        return Err(Error::UserInput(format!(
            "cannot shrink block '{}' from {} to {} GiB",
            block.name, block.size, size
        )));
    }
    block.size = size;
    let block = core.store.update(&block).await?;
    let args = gateway::argv(&["longhorn", "expand", "--size"])
        .into_iter()
        .chain([gb(block.size)])
        .collect::<Vec<_>>();
    gateway::exec(core, &block, &args).await?;
    Ok(block)
}

/// Deletes the controller pod and clears the handle. The block must be
/// unmounted first.
pub async fn delete_controller(core: &Core, id: &str) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    if block.mounted {
        return Err(Error::ControllerMounted(block.name.clone()));
    }
    core.pods
        .delete_pod(&block.cluster, &block.namespace, &block.name)
        .await?;
    block.controller = None;
    block.online = false;
    core.store.update(&block).await
}

/// Re-reads `longhorn info` and merges the frontend state into the entity;
/// emits `FrontendStateUp|Down` on a transition, then runs the mount-state
/// follow-ons under the caller's lock: frontend up and unmounted ⇒ format
/// (if needed) and mount; frontend down and mounted ⇒ unmount.
pub async fn update_frontend_state(core: &Core, id: &str) -> Result<Block> {
    let mut block = require(core.store.as_ref(), id).await?;
    let info = match controller_info(core, &block).await {
        Ok(info) => info,
        Err(e) => {
            warn!(block = %block.name, "controller info unavailable: {}", e);
            return Ok(block);
        }
    };
    let was_up = block.frontend_state;
    block.frontend_state = info.frontend_state == "up";
    block.device = info.endpoint.clone();
    block.locality = block.computed_locality();
    block.healthy = block.all_replicas_healthy();
    block.status = if block.replicas.is_empty() {
        BlockStatus::Pending
    } else if block.healthy {
        BlockStatus::Healthy
    } else {
        BlockStatus::Unhealthy
    };
    let block = core.store.update(&block).await?;
    if was_up != block.frontend_state {
        core.events.emit(if block.frontend_state {
            DomainEvent::FrontendStateUp {
                block: block.id.clone(),
            }
        } else {
            DomainEvent::FrontendStateDown {
                block: block.id.clone(),
            }
        });
    }
    if block.frontend_state && !block.mounted {
        if !block.formatted {
            tolerate(
                volume::format(core, id, &volume::FormatOpts::default()).await,
                "format after frontend up",
            )?;
        }
        let formatted = require(core.store.as_ref(), id).await?.formatted;
        if formatted {
            tolerate(
                volume::mount(core, id, false).await,
                "mount after frontend up",
            )?;
        }
    } else if !block.frontend_state && block.mounted {
        tolerate(
            volume::unmount(core, id, false).await,
            "unmount after frontend down",
        )?;
    }
    require(core.store.as_ref(), id).await
}
