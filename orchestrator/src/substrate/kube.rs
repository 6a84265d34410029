//! kube-backed [`PodOrchestrator`]. The client is built against a single
//! cluster, so the `cluster` parameter of the trait is carried for
//! addressing parity but not consulted here.

use futures::stream::{BoxStream, StreamExt};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, HostPathVolumeSource, Pod, PodSpec, SecurityContext, Volume,
    VolumeMount,
};
use kube::{
    Api,
    api::{AttachParams, ObjectMeta},
    client::Client,
    runtime::watcher,
};
use tokio::io::AsyncReadExt;
use tracing::warn;

use super::{ExecOutput, PodEvent, PodEventKind, PodManifest, PodOrchestrator, PodPhase, PodState};
use crate::error::{Error, Result};

pub struct KubeOrchestrator {
    client: Client,
}

impl KubeOrchestrator {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn pod_phase(pod: &Pod) -> PodPhase {
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Running") => PodPhase::Running,
        Some("Pending") => PodPhase::Pending,
        Some("Succeeded") => PodPhase::Succeeded,
        Some("Failed") => PodPhase::Failed,
        _ => PodPhase::Unknown,
    }
}

fn pod_state(pod: &Pod) -> PodState {
    PodState {
        uid: pod.metadata.uid.clone().unwrap_or_default(),
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        phase: pod_phase(pod),
        ip: pod.status.as_ref().and_then(|s| s.pod_ip.clone()),
        terminating: pod.metadata.deletion_timestamp.is_some(),
    }
}

fn pod_resource(namespace: &str, manifest: &PodManifest) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(manifest.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: (!manifest.labels.is_empty()).then(|| manifest.labels.clone()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(manifest.node_name.clone()).filter(|n| !n.is_empty()),
            restart_policy: (!manifest.restart_policy.is_empty())
                .then(|| manifest.restart_policy.clone()),
            containers: vec![Container {
                name: "engine".to_string(),
                image: Some(manifest.image.clone()),
                command: Some(manifest.command.clone()),
                ports: (!manifest.ports.is_empty()).then(|| {
                    manifest
                        .ports
                        .iter()
                        .map(|port| ContainerPort {
                            container_port: *port as i32,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        })
                        .collect()
                }),
                security_context: manifest.privileged.then(|| SecurityContext {
                    privileged: Some(true),
                    ..Default::default()
                }),
                volume_mounts: (!manifest.host_paths.is_empty()).then(|| {
                    manifest
                        .host_paths
                        .iter()
                        .map(|hp| VolumeMount {
                            name: hp.name.clone(),
                            mount_path: hp.mount_path.clone(),
                            ..Default::default()
                        })
                        .collect()
                }),
                ..Default::default()
            }],
            volumes: (!manifest.host_paths.is_empty()).then(|| {
                manifest
                    .host_paths
                    .iter()
                    .map(|hp| Volume {
                        name: hp.name.clone(),
                        host_path: Some(HostPathVolumeSource {
                            path: hp.host_path.clone(),
                            type_: None,
                        }),
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        }),
        status: None,
    }
}

#[async_trait::async_trait]
impl PodOrchestrator for KubeOrchestrator {
    async fn read_pod(
        &self,
        _cluster: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodState>> {
        match self.pods(namespace).get(name).await {
            Ok(pod) => Ok(Some(pod_state(&pod))),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_pod(
        &self,
        _cluster: &str,
        namespace: &str,
        manifest: PodManifest,
    ) -> Result<PodState> {
        let pod = pod_resource(namespace, &manifest);
        match self.pods(namespace).create(&Default::default(), &pod).await {
            Ok(created) => Ok(pod_state(&created)),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_pod(&self, _cluster: &str, namespace: &str, name: &str) -> Result<()> {
        match self.pods(namespace).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exec(
        &self,
        _cluster: &str,
        namespace: &str,
        name: &str,
        argv: &[String],
    ) -> Result<ExecOutput> {
        let params = AttachParams::default().stdout(true).stderr(true);
        let mut attached = self
            .pods(namespace)
            .exec(name, argv.to_vec(), &params)
            .await?;
        let mut stdout_pipe = attached.stdout();
        let mut stderr_pipe = attached.stderr();
        let mut stdout = String::new();
        let mut stderr = String::new();
        // Drain both pipes concurrently so neither blocks the other.
        let (out_read, err_read) = tokio::join!(
            async {
                match stdout_pipe.as_mut() {
                    Some(pipe) => pipe.read_to_string(&mut stdout).await.map(|_| ()),
                    None => Ok(()),
                }
            },
            async {
                match stderr_pipe.as_mut() {
                    Some(pipe) => pipe.read_to_string(&mut stderr).await.map(|_| ()),
                    None => Ok(()),
                }
            },
        );
        if let Err(e) = out_read.and(err_read) {
            return Err(Error::EngineCommandFailed(format!(
                "reading exec stream for pod '{}': {}",
                name, e
            )));
        }
        attached.join().await.ok();
        Ok(ExecOutput { stdout, stderr })
    }

    async fn watch_pods(&self, namespace: &str) -> Result<BoxStream<'static, PodEvent>> {
        let api = self.pods(namespace);
        let stream = watcher(api, watcher::Config::default())
            .filter_map(|event| async move {
                match event {
                    Ok(watcher::Event::InitApply(pod)) => Some(PodEvent {
                        kind: PodEventKind::Added,
                        pod: pod_state(&pod),
                    }),
                    Ok(watcher::Event::Apply(pod)) => Some(PodEvent {
                        kind: PodEventKind::Modified,
                        pod: pod_state(&pod),
                    }),
                    Ok(watcher::Event::Delete(pod)) => Some(PodEvent {
                        kind: PodEventKind::Deleted,
                        pod: pod_state(&pod),
                    }),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("pod watch error: {}", e);
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}
