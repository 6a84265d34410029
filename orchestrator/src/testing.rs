//! In-memory fakes for every substrate boundary plus a ready-made harness.
//! The fake orchestrator scripts engine exec responses by argv prefix and
//! can replay pod lifecycle events into the multiplexer.

use basalt_types::{
    Block, BlockStatus, BlocksConfig, Disk, Folder, Node, Replica, ReplicaMode, ReplicaStatus,
    fresh_id,
};
use futures::{StreamExt, stream::BoxStream};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    core::Core,
    error::{Error, Result},
    events::EventBus,
    lock::LockManager,
    store::{EntityStore, MemoryStore},
    substrate::{
        DiskService, ExecOutput, FolderService, NodeService, NodeTerminal, PodEvent, PodEventKind,
        PodManifest, PodOrchestrator, PodPhase, PodState,
    },
};

#[derive(Default)]
struct PodsInner {
    pods: HashMap<String, PodState>,
    manifests: Vec<PodManifest>,
    deleted: Vec<String>,
    exec_log: Vec<Vec<String>>,
    scripts: Vec<(Vec<String>, ExecOutput)>,
    uid_counter: usize,
}

pub struct FakePods {
    inner: Mutex<PodsInner>,
    fail_create: AtomicBool,
    events_tx: UnboundedSender<PodEvent>,
    events_rx: Mutex<Option<UnboundedReceiver<PodEvent>>>,
}

impl FakePods {
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded_channel();
        Self {
            inner: Mutex::new(PodsInner::default()),
            fail_create: AtomicBool::new(false),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        }
    }

    pub fn insert(&self, pod: PodState) {
        let mut inner = self.inner.lock().unwrap();
        inner.pods.insert(pod.name.clone(), pod);
    }

    pub fn remove_pod(&self, name: &str) {
        self.inner.lock().unwrap().pods.remove(name);
    }

    pub fn set_phase(&self, name: &str, phase: PodPhase) {
        let mut inner = self.inner.lock().unwrap();
        inner.pods.get_mut(name).expect("unknown pod").phase = phase;
    }

    /// Marks the pod Running (optionally with an IP) and returns the
    /// matching modified event.
    pub fn set_running(&self, name: &str, ip: Option<&str>) -> PodEvent {
        let mut inner = self.inner.lock().unwrap();
        let pod = inner.pods.get_mut(name).expect("unknown pod");
        pod.phase = PodPhase::Running;
        if let Some(ip) = ip {
            pod.ip = Some(ip.to_string());
        }
        PodEvent {
            kind: PodEventKind::Modified,
            pod: pod.clone(),
        }
    }

    /// Marks the pod terminating and returns the matching event.
    pub fn terminate(&self, name: &str) -> PodEvent {
        let mut inner = self.inner.lock().unwrap();
        let pod = inner.pods.get_mut(name).expect("unknown pod");
        pod.terminating = true;
        PodEvent {
            kind: PodEventKind::Modified,
            pod: pod.clone(),
        }
    }

    pub fn push_event(&self, event: PodEvent) {
        self.events_tx.send(event).ok();
    }

    /// Scripts the exec response for any argv starting with the prefix. The
    /// longest matching prefix wins; re-scripting a prefix overrides it.
    pub fn script(&self, prefix: &[&str], stdout: &str, stderr: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.push((
            prefix.iter().map(|p| p.to_string()).collect(),
            ExecOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
            },
        ));
    }

    pub fn fail_next_create(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn manifests(&self) -> Vec<PodManifest> {
        self.inner.lock().unwrap().manifests.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }

    pub fn exec_log(&self) -> Vec<Vec<String>> {
        self.inner.lock().unwrap().exec_log.clone()
    }
}

#[async_trait::async_trait]
impl PodOrchestrator for FakePods {
    async fn read_pod(
        &self,
        _cluster: &str,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<PodState>> {
        Ok(self.inner.lock().unwrap().pods.get(name).cloned())
    }

    async fn create_pod(
        &self,
        _cluster: &str,
        namespace: &str,
        manifest: PodManifest,
    ) -> Result<PodState> {
        if self.fail_create.swap(false, Ordering::SeqCst) {
            return Err(Error::PodCreationError("simulated pod failure".to_string()));
        }
        let mut inner = self.inner.lock().unwrap();
        inner.uid_counter += 1;
        let pod = PodState {
            uid: format!("uid-{}", inner.uid_counter),
            name: manifest.name.clone(),
            namespace: namespace.to_string(),
            phase: PodPhase::Pending,
            ip: None,
            terminating: false,
        };
        inner.pods.insert(pod.name.clone(), pod.clone());
        inner.manifests.push(manifest);
        Ok(pod)
    }

    async fn delete_pod(&self, _cluster: &str, _namespace: &str, name: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.pods.remove(name);
        inner.deleted.push(name.to_string());
        Ok(())
    }

    async fn exec(
        &self,
        _cluster: &str,
        _namespace: &str,
        _name: &str,
        argv: &[String],
    ) -> Result<ExecOutput> {
        let mut inner = self.inner.lock().unwrap();
        inner.exec_log.push(argv.to_vec());
        let mut best: Option<&(Vec<String>, ExecOutput)> = None;
        for entry in &inner.scripts {
            let (prefix, _) = entry;
            let matches = argv.len() >= prefix.len() && argv[..prefix.len()] == prefix[..];
            if matches && best.is_none_or(|(b, _)| prefix.len() >= b.len()) {
                best = Some(entry);
            }
        }
        Ok(best.map(|(_, out)| out.clone()).unwrap_or_default())
    }

    async fn watch_pods(&self, _namespace: &str) -> Result<BoxStream<'static, PodEvent>> {
        let rx = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .expect("watch_pods called twice");
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[derive(Default)]
pub struct FakeTerminal {
    commands: Mutex<Vec<Vec<String>>>,
    scripts: Mutex<HashMap<String, String>>,
}

impl FakeTerminal {
    /// Scripts stdout for every command whose argv[0] matches.
    pub fn script(&self, program: &str, stdout: &str) {
        self.scripts
            .lock()
            .unwrap()
            .insert(program.to_string(), stdout.to_string());
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NodeTerminal for FakeTerminal {
    async fn run(&self, _node: &str, argv: &[String]) -> Result<ExecOutput> {
        self.commands.lock().unwrap().push(argv.to_vec());
        let stdout = self
            .scripts
            .lock()
            .unwrap()
            .get(&argv[0])
            .cloned()
            .unwrap_or_default();
        Ok(ExecOutput {
            stdout,
            stderr: String::new(),
        })
    }
}

pub struct FakeNodes {
    nodes: Mutex<HashMap<String, Node>>,
}

impl Default for FakeNodes {
    fn default() -> Self {
        let nodes = (1..=4)
            .map(|i| {
                let id = format!("n-{}", i);
                (
                    id.clone(),
                    Node {
                        id,
                        hostname: format!("worker-{}", i),
                        cluster: "c-1".to_string(),
                    },
                )
            })
            .collect();
        Self {
            nodes: Mutex::new(nodes),
        }
    }
}

#[async_trait::async_trait]
impl NodeService for FakeNodes {
    async fn resolve(&self, node: &str) -> Result<Option<Node>> {
        Ok(self.nodes.lock().unwrap().get(node).cloned())
    }
}

pub fn disk(id: &str, node: &str, hostname: &str) -> Disk {
    Disk {
        id: id.to_string(),
        node: node.to_string(),
        hostname: hostname.to_string(),
        path: format!("/mnt/disks/{}", id),
        available_mib: 102400,
    }
}

pub struct FakeDisks {
    disks: Mutex<Vec<Disk>>,
}

impl Default for FakeDisks {
    fn default() -> Self {
        Self {
            disks: Mutex::new(vec![
                disk("disk-1", "n-1", "worker-1"),
                disk("disk-2", "n-2", "worker-2"),
                disk("disk-3", "n-3", "worker-3"),
                disk("disk-4", "n-4", "worker-4"),
                disk("disk-5", "n-1", "worker-1"),
            ]),
        }
    }
}

impl FakeDisks {
    pub fn clear(&self) {
        self.disks.lock().unwrap().clear();
    }

    pub fn keep_only(&self, count: usize) {
        self.disks.lock().unwrap().truncate(count);
    }
}

#[async_trait::async_trait]
impl DiskService for FakeDisks {
    async fn resolve(&self, id: &str) -> Result<Option<Disk>> {
        Ok(self
            .disks
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned())
    }

    async fn disks_for_node(&self, node: &str) -> Result<Vec<Disk>> {
        Ok(self
            .disks
            .lock()
            .unwrap()
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
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.available_mib >= budget_mib && !exclude.contains(&d.id))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct FakeFolders {
    folders: Mutex<HashMap<String, Folder>>,
    provisioned: Mutex<Vec<Folder>>,
    deprovisioned: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl FakeFolders {
    pub fn insert(&self, folder: Folder) {
        self.folders
            .lock()
            .unwrap()
            .insert(folder.id.clone(), folder);
    }

    pub fn provisioned(&self) -> Vec<Folder> {
        self.provisioned.lock().unwrap().clone()
    }

    pub fn deprovisioned(&self) -> Vec<String> {
        self.deprovisioned.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FolderService for FakeFolders {
    async fn resolve(&self, folder: &str) -> Result<Option<Folder>> {
        Ok(self.folders.lock().unwrap().get(folder).cloned())
    }

    async fn provision(&self, disk: &Disk, prefix: &str) -> Result<Folder> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let folder = Folder {
            id: format!("folder-{}", n),
            disk: disk.id.clone(),
            path: format!("{}/{}-{}", disk.path, prefix, n),
        };
        self.insert(folder.clone());
        self.provisioned.lock().unwrap().push(folder.clone());
        Ok(folder)
    }

    async fn deprovision(&self, folder: &str) -> Result<()> {
        self.folders.lock().unwrap().remove(folder);
        self.deprovisioned.lock().unwrap().push(folder.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub core: Arc<Core>,
    pub pods: Arc<FakePods>,
    pub terminal: Arc<FakeTerminal>,
    pub nodes: Arc<FakeNodes>,
    pub disks: Arc<FakeDisks>,
    pub folders: Arc<FakeFolders>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    /// Persists the block and registers Running pods and resolvable folders
    /// for its controller and replicas.
    pub async fn seed(&self, block: Block) -> Block {
        let block = self.store.create(block).await.unwrap();
        if let Some(uid) = &block.controller {
            self.pods.insert(PodState {
                uid: uid.clone(),
                name: block.name.clone(),
                namespace: block.namespace.clone(),
                phase: PodPhase::Running,
                ip: None,
                terminating: false,
            });
        }
        self.folders.insert(Folder {
            id: block.mount_point.clone(),
            disk: "disk-1".to_string(),
            path: format!("/mnt/disks/disk-1/{}", block.mount_point),
        });
        for (i, r) in block.replicas.iter().enumerate() {
            if let Some(uid) = &r.pod {
                self.pods.insert(PodState {
                    uid: uid.clone(),
                    name: r.name.clone(),
                    namespace: block.namespace.clone(),
                    phase: PodPhase::Running,
                    ip: r.ip.clone().or(Some(format!("10.0.0.{}", 11 + i))),
                    terminating: false,
                });
            }
            self.folders.insert(Folder {
                id: r.folder.clone(),
                disk: r.disk.clone(),
                path: format!("/mnt/disks/{}/{}", r.disk, r.folder),
            });
        }
        block
    }

    pub async fn get(&self, id: &str) -> Block {
        self.store.get(id).await.unwrap().unwrap()
    }
}

pub fn harness() -> Harness {
    let pods = Arc::new(FakePods::new());
    let terminal = Arc::new(FakeTerminal::default());
    let nodes = Arc::new(FakeNodes::default());
    let disks = Arc::new(FakeDisks::default());
    let folders = Arc::new(FakeFolders::default());
    let store = Arc::new(MemoryStore::new());
    let core = Arc::new(Core {
        config: BlocksConfig::default(),
        pods: pods.clone(),
        terminal: terminal.clone(),
        nodes: nodes.clone(),
        disks: disks.clone(),
        folders: folders.clone(),
        store: store.clone(),
        locks: LockManager::new(),
        events: EventBus::new(),
    });
    Harness {
        core,
        pods,
        terminal,
        nodes,
        disks,
        folders,
        store,
    }
}

/// A healthy, online block with `replicas` attached replicas on remote
/// nodes (n-2 upward) and IPs 10.0.0.11 upward.
pub fn online_block(name: &str, replicas: usize) -> Block {
    let mut block = Block {
        id: fresh_id(),
        name: name.to_string(),
        cluster: "c-1".to_string(),
        namespace: "storage".to_string(),
        node: "n-1".to_string(),
        size: 10,
        replica_count: replicas.max(1) as u32,
        controller: Some("ctl-uid".to_string()),
        online: true,
        mount_point: "folder-mp".to_string(),
        status: BlockStatus::Healthy,
        ..Default::default()
    };
    for i in 0..replicas {
        let mut replica = Replica {
            id: format!("r{}", i + 1),
            name: format!("block-replica-{}-{}", name, i + 1),
            pod: Some(format!("rep-uid-{}", i + 1)),
            disk: format!("disk-{}", i + 2),
            node: format!("n-{}", i + 2),
            folder: format!("folder-r{}", i + 1),
            status: ReplicaStatus::Healthy,
            healthy: true,
            attached: true,
            mode: ReplicaMode::RW,
            ..Default::default()
        };
        replica.set_ip(&format!("10.0.0.{}", 11 + i));
        block.replicas.push(replica);
    }
    block
}
