//! Event multiplexer: maps pod lifecycle events to the owning block and
//! dispatches the repair actions under that block's lock. Also home of the
//! domain event bus the reconciler publishes state transitions on.

use basalt_types::ReplicaStatus;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use futures::StreamExt;

use crate::{
    config::AddReplicaOpts,
    controller,
    core::Core,
    error::{Result, tolerate},
    replica,
    store::EntityStore as _,
    substrate::{PodEvent, PodEventKind, PodOrchestrator as _, PodPhase},
};

/// State transitions published after the entity write that caused them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    FrontendStateUp { block: String },
    FrontendStateDown { block: String },
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Lagging or absent subscribers are not an error.
    pub fn emit(&self, event: DomainEvent) {
        let _ = self.tx.send(event);
    }
}

/// Consumes the namespace's pod event stream until cancelled. Handler
/// failures are logged; only a broken stream ends the loop.
pub async fn run_multiplexer(core: Arc<Core>, cancel: CancellationToken) -> Result<()> {
    let mut stream = core.pods.watch_pods(&core.config.namespace).await?;
    info!(namespace = %core.config.namespace, "watching pod events");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            event = stream.next() => match event {
                Some(event) => {
                    if let Err(e) = handle_pod_event(&core, &event).await {
                        error!(pod = %event.pod.name, "pod event handler failed: {}", e);
                    }
                }
                None => {
                    warn!("pod event stream ended");
                    return Ok(());
                }
            }
        }
    }
}

/// Resolves the owning block, takes its lock, reloads the entity and
/// dispatches. Substrate failures inside the dispatch are caught and
/// logged; entity-store failures abort the handler (the lock is released
/// on every path by the guard).
pub async fn handle_pod_event(core: &Core, event: &PodEvent) -> Result<()> {
    if event.pod.namespace != core.config.namespace {
        return Ok(());
    }
    let Some(owner) = core.store.find_by_pod(&event.pod.uid).await? else {
        return Ok(());
    };
    let _guard = core.locks.acquire(&owner.id).await;
    // Reload under the lock; the pre-lock copy may be stale.
    let Some(block) = core.store.get(&owner.id).await? else {
        return Ok(());
    };
    let terminating = event.pod.terminating || event.kind == PodEventKind::Deleted;
    let running = event.pod.phase == PodPhase::Running && !terminating;
    if block.controller.as_deref() == Some(event.pod.uid.as_str()) {
        if running && !block.online {
            info!(block = %block.name, "controller pod is Running; block online");
            let mut block = block;
            block.online = true;
            let block = core.store.update(&block).await?;
            for r in &block.replicas {
                tolerate(
                    replica::add_replica_to_frontend(
                        core,
                        &block.id,
                        &r.id,
                        &AddReplicaOpts::default(),
                    )
                    .await,
                    "attach replica after controller start",
                )?;
            }
            tolerate(
                controller::update_frontend_state(core, &block.id).await,
                "frontend refresh after controller start",
            )?;
        } else if terminating && block.online {
            warn!(block = %block.name, "controller pod terminating; block offline");
            let mut block = block;
            block.online = false;
            block.mounted = false;
            block.frontend_state = false;
            block.device = None;
            core.store.update(&block).await?;
        }
    } else if let Some(r) = block.replica_by_pod(&event.pod.uid).cloned() {
        if running && !r.healthy {
            let Some(ip) = event.pod.ip.as_deref() else {
                return Ok(());
            };
            info!(block = %block.name, replica = %r.name, ip, "replica pod is Running");
            let mut block = block;
            if let Some(stored) = block.replica_mut(&r.id) {
                stored.set_ip(ip);
                stored.healthy = true;
                stored.status = ReplicaStatus::Healthy;
            }
            let block = core.store.update(&block).await?;
            tolerate(
                replica::add_replica_to_frontend(
                    core,
                    &block.id,
                    &r.id,
                    &AddReplicaOpts::default(),
                )
                .await,
                "attach running replica",
            )?;
            tolerate(
                controller::update_frontend_state(core, &block.id).await,
                "frontend refresh after replica start",
            )?;
        } else if terminating && r.healthy {
            warn!(block = %block.name, replica = %r.name, "replica pod terminating");
            tolerate(
                replica::remove_replica_from_frontend(core, &block.id, &r.id).await,
                "detach terminating replica",
            )?;
            let mut block = crate::store::require(core.store.as_ref(), &block.id).await?;
            if let Some(stored) = block.replica_mut(&r.id) {
                stored.pod = None;
                stored.clear_ip();
                stored.healthy = false;
                stored.attached = false;
                stored.status = ReplicaStatus::Unhealthy;
            }
            let block = core.store.update(&block).await?;
            tolerate(
                controller::update_frontend_state(core, &block.id).await,
                "frontend refresh after replica loss",
            )?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{store::EntityStore as _, testing::harness, volume};
    use basalt_types::Locality;

    const INFO_UP: &str = "{\"frontendState\":\"up\",\"endpoint\":\"/dev/longhorn/v1\"}";

    /// Scenario: provision, bring three replica pods and the controller pod
    /// to Running, and watch the reconciler walk the block all the way to
    /// mounted.
    #[tokio::test]
    async fn provision_then_mount() {
        let h = harness();
        let block = volume::provision(&h.core, "v1", "n-1", 10, 3).await.unwrap();
        assert_eq!(block.replicas.len(), 3);
        assert!(block.controller.is_some());
        h.pods.script(&["longhorn", "info"], INFO_UP, "");

        for (i, r) in block.replicas.iter().enumerate() {
            let event = h.pods.set_running(&r.name, Some(&format!("10.0.0.{}", 11 + i)));
            handle_pod_event(&h.core, &event).await.unwrap();
        }
        // Replicas are healthy but not attached: the block is still offline.
        let mid = h.get(&block.id).await;
        assert!(mid.replicas.iter().all(|r| r.healthy && !r.attached));

        let event = h.pods.set_running("v1", None);
        handle_pod_event(&h.core, &event).await.unwrap();

        let done = h.get(&block.id).await;
        assert!(done.online);
        assert!(done.frontend_state);
        assert!(done.formatted);
        assert!(done.mounted);
        assert!(done.healthy);
        assert_eq!(done.device.as_deref(), Some("/dev/longhorn/v1"));
        assert!(done.replicas.iter().all(|r| r.attached));

        let log = h.pods.exec_log();
        for i in 0..3 {
            let endpoint = format!("tcp://10.0.0.{}:10000", 11 + i);
            assert!(
                log.iter()
                    .any(|argv| argv[1] == "add-replica" && argv.last() == Some(&endpoint)),
                "missing add-replica for {}",
                endpoint
            );
        }
        let cmds = h.terminal.commands();
        assert!(cmds.contains(
            &vec!["mkfs", "-t", "ext4", "-m", "0", "-L", "v1", "/dev/longhorn/v1"]
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
        ));
        assert!(cmds.iter().any(|c| c[0] == "mount" && c[1] == "/dev/longhorn/v1"));
    }

    /// Scenario: a replica pod dies, the engine detaches it, and a balance
    /// pass rebuilds the set back to three attached replicas.
    #[tokio::test]
    async fn replica_loss_and_rebalance() {
        let h = harness();
        let block = volume::provision(&h.core, "v1", "n-1", 10, 3).await.unwrap();
        h.pods.script(&["longhorn", "info"], INFO_UP, "");
        for (i, r) in block.replicas.iter().enumerate() {
            let event = h.pods.set_running(&r.name, Some(&format!("10.0.0.{}", 11 + i)));
            handle_pod_event(&h.core, &event).await.unwrap();
        }
        let event = h.pods.set_running("v1", None);
        handle_pod_event(&h.core, &event).await.unwrap();

        let lost = h.get(&block.id).await.replicas[1].clone();
        let event = h.pods.terminate(&lost.name);
        handle_pod_event(&h.core, &event).await.unwrap();

        assert!(h.pods.exec_log().contains(&vec![
            "longhorn".to_string(),
            "rm-replica".to_string(),
            "tcp://10.0.0.12:10000".to_string(),
        ]));
        let wounded = h.get(&block.id).await;
        let r = wounded.replica(&lost.id).unwrap();
        assert!(!r.healthy && !r.attached);
        assert_eq!(r.status, ReplicaStatus::Unhealthy);
        assert!(r.ip.is_none() && r.endpoint.is_none() && r.pod.is_none());
        assert!(!wounded.healthy);

        // Balance drops the dead record and replaces it on a fresh disk...
        volume::balance(&h.core, &block.id).await.unwrap();
        let grown = h.get(&block.id).await;
        assert_eq!(grown.replicas.len(), 3);
        assert!(grown.replica(&lost.id).is_none());
        let fresh = grown
            .replicas
            .iter()
            .find(|r| !r.healthy)
            .unwrap()
            .clone();
        // ...whose pod then comes up and re-attaches.
        let event = h.pods.set_running(&fresh.name, Some("10.0.0.14"));
        handle_pod_event(&h.core, &event).await.unwrap();
        let healed = h.get(&block.id).await;
        assert_eq!(
            healed.replicas.iter().filter(|r| r.attached).count(),
            3
        );
    }

    #[tokio::test]
    async fn controller_termination_takes_the_block_offline() {
        let h = harness();
        let block = volume::provision(&h.core, "v1", "n-1", 10, 1).await.unwrap();
        h.pods.script(&["longhorn", "info"], INFO_UP, "");
        let r = block.replicas[0].clone();
        let event = h.pods.set_running(&r.name, Some("10.0.0.11"));
        handle_pod_event(&h.core, &event).await.unwrap();
        let event = h.pods.set_running("v1", None);
        handle_pod_event(&h.core, &event).await.unwrap();
        assert!(h.get(&block.id).await.mounted);

        let event = h.pods.terminate("v1");
        handle_pod_event(&h.core, &event).await.unwrap();
        let offline = h.get(&block.id).await;
        assert!(!offline.online);
        assert!(!offline.mounted);
        assert!(!offline.frontend_state);
        assert!(offline.device.is_none());
    }

    #[tokio::test]
    async fn events_for_unknown_pods_are_ignored() {
        let h = harness();
        volume::provision(&h.core, "v1", "n-1", 10, 1).await.unwrap();
        let before = h.pods.exec_log().len();
        let event = PodEvent {
            kind: PodEventKind::Modified,
            pod: crate::substrate::PodState {
                uid: "stranger".to_string(),
                name: "stranger".to_string(),
                namespace: "storage".to_string(),
                phase: PodPhase::Running,
                ip: Some("10.9.9.9".to_string()),
                terminating: false,
            },
        };
        handle_pod_event(&h.core, &event).await.unwrap();
        assert_eq!(h.pods.exec_log().len(), before);
    }

    #[tokio::test]
    async fn events_outside_the_namespace_are_ignored() {
        let h = harness();
        let block = volume::provision(&h.core, "v1", "n-1", 10, 1).await.unwrap();
        let r = block.replicas[0].clone();
        let mut event = h.pods.set_running(&r.name, Some("10.0.0.11"));
        event.pod.namespace = "elsewhere".to_string();
        handle_pod_event(&h.core, &event).await.unwrap();
        assert!(!h.get(&block.id).await.replicas[0].healthy);
    }

    #[tokio::test]
    async fn soft_deleted_blocks_do_not_receive_events() {
        let h = harness();
        let block = volume::provision(&h.core, "v1", "n-1", 10, 1).await.unwrap();
        let r = block.replicas[0].clone();
        h.core.store.soft_remove(&block.id).await.unwrap();
        let event = h.pods.set_running(&r.name, Some("10.0.0.11"));
        handle_pod_event(&h.core, &event).await.unwrap();
        let hidden = h.core.store.get_any(&block.id).await.unwrap().unwrap();
        assert!(!hidden.replicas[0].healthy);
    }

    #[tokio::test]
    async fn frontend_up_event_follows_the_persisted_transition() {
        let h = harness();
        let block = volume::provision(&h.core, "v1", "n-1", 10, 1).await.unwrap();
        h.pods.script(&["longhorn", "info"], INFO_UP, "");
        let mut events = h.core.events.subscribe();
        let r = block.replicas[0].clone();
        let event = h.pods.set_running(&r.name, Some("10.0.0.11"));
        handle_pod_event(&h.core, &event).await.unwrap();
        let event = h.pods.set_running("v1", None);
        handle_pod_event(&h.core, &event).await.unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            DomainEvent::FrontendStateUp {
                block: block.id.clone()
            }
        );
        // The entity had already recorded the transition when the event fired.
        assert!(h.get(&block.id).await.frontend_state);
    }

    #[tokio::test]
    async fn multiplexer_drains_pushed_events_until_cancelled() {
        let h = harness();
        let block = volume::provision(&h.core, "v1", "n-1", 10, 1).await.unwrap();
        let r = block.replicas[0].clone();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_multiplexer(h.core.clone(), cancel.clone()));
        h.pods.push_event(h.pods.set_running(&r.name, Some("10.0.0.11")));
        // Poll until the handler has run.
        for _ in 0..100 {
            if h.get(&block.id).await.replicas[0].healthy {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(h.get(&block.id).await.replicas[0].healthy);
        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn locality_follows_replica_placement() {
        let h = harness();
        let block = volume::provision(&h.core, "v1", "n-1", 10, 2).await.unwrap();
        h.pods.script(&["longhorn", "info"], INFO_UP, "");
        for (i, r) in block.replicas.iter().enumerate() {
            let event = h.pods.set_running(&r.name, Some(&format!("10.0.0.{}", 11 + i)));
            handle_pod_event(&h.core, &event).await.unwrap();
        }
        let event = h.pods.set_running("v1", None);
        handle_pod_event(&h.core, &event).await.unwrap();
        // Provision placed the first replica on the preferred node's disk.
        assert_eq!(h.get(&block.id).await.locality, Locality::Local);
    }
}
