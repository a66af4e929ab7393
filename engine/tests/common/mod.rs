//! Shared test harness: an engine wired against fake platform pieces.
//! The fake VM launcher interprets a handful of guest commands (`echo`,
//! `sh -c "exit N"`, `cat`) so lifecycle tests can drive real exits and
//! stdio without a hypervisor.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};

use arca_engine::{
    core::{
        ContainerCore,
        ContainerCoreBuilder,
        CoreOptions,
        CreateOpts,
        NativeId,
    },
    diff::{BaselineEntry, RootfsInspector},
    guest::{GuestError, GuestGateway},
    hooks::{ContainerEvent, EventAction, EventSink},
    image::ImageRuntimeConfig,
    network::{
        NetworkCore,
        NetworkDriver,
        NullDriver,
        VmnetDriver,
        WireGuardDriver,
    },
    stdio::LogFanout,
    store::StateStore,
    subsys::{LocalImageStore, LocalVolumeStore},
    vm::{
        ContainerVm,
        NativeContainerConfig,
        OutputSink,
        StdinSource,
        VmError,
        VmLauncher,
        VmRegistry,
    },
};

use arca_guest_api::v1::{
    AddNetworkRequest,
    AddNetworkResponse,
    AddPeerRequest,
    PublishPortRequest,
    RemoveNetworkRequest,
    RemovePeerRequest,
    UnpublishPortRequest,
};

// === fake VM ===

#[derive(Clone, Debug)]
enum Script {
    ExitWith { code: i64, output: Vec<u8> },
    CopyStdin,
    RunForever,
}

fn script_for(command: &[String]) -> Script {
    match command.first().map(String::as_str) {
        Some("echo") => Script::ExitWith {
            code: 0,
            output: format!("{}\n", command[1 ..].join(" ")).into_bytes(),
        },
        Some("cat") => Script::CopyStdin,
        Some("sh") if command.len() == 3 && command[1] == "-c" => {
            match command[2].strip_prefix("exit ") {
                Some(code) => Script::ExitWith {
                    code: code.trim().parse().unwrap_or(1),
                    output: Vec::new(),
                },
                None => Script::RunForever,
            }
        }
        _ => Script::RunForever,
    }
}

pub struct FakeVm {
    native_id: NativeId,
    script: Script,
    stdout: Arc<dyn OutputSink>,
    stderr: Arc<dyn OutputSink>,
    stdin: Mutex<Option<StdinSource>>,
    socket_dir: PathBuf,
    pid: i64,
    created: AtomicBool,
    paused: AtomicBool,
    exit_tx: watch::Sender<Option<i64>>,
    exit_rx: watch::Receiver<Option<i64>>,
}

impl FakeVm {
    fn exit(&self, code: i64) {
        let _ = self.exit_tx.send(Some(code));
    }

    fn exited(&self) -> Option<i64> {
        *self.exit_rx.borrow()
    }

    async fn await_exit(&self, timeout: Option<Duration>) -> Result<i64, VmError> {
        let mut rx = self.exit_rx.clone();
        let wait = async {
            loop {
                if let Some(code) = *rx.borrow_and_update() {
                    return code;
                }
                if rx.changed().await.is_err() {
                    return 137;
                }
            }
        };
        match timeout {
            None => Ok(wait.await),
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(
                |_| VmError::WaitTimedOut {
                    native_id: self.native_id.to_string(),
                },
            ),
        }
    }
}

#[async_trait]
impl ContainerVm for FakeVm {
    fn native_id(&self) -> &NativeId {
        &self.native_id
    }

    fn pid(&self) -> Option<i64> {
        Some(self.pid)
    }

    fn control_socket(&self, port: u32) -> PathBuf {
        self.socket_dir.join(format!("vsock_{port}.sock"))
    }

    async fn create(&self) -> Result<(), VmError> {
        self.created.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<(), VmError> {
        match &self.script {
            Script::ExitWith {
                code, output,
            } => {
                let stdout = self.stdout.clone();
                let output = output.clone();
                let code = *code;
                let tx = self.exit_tx.clone();
                tokio::spawn(async move {
                    if !output.is_empty() {
                        stdout.write(&output).await;
                    }
                    let _ = tx.send(Some(code));
                });
            }
            Script::CopyStdin => {
                let stdout = self.stdout.clone();
                let stdin = self.stdin.lock().take();
                let tx = self.exit_tx.clone();
                tokio::spawn(async move {
                    if let Some(mut stdin) = stdin {
                        use tokio::io::AsyncReadExt;
                        let mut buf = [0u8; 1024];
                        loop {
                            match stdin.read(&mut buf).await {
                                Ok(0) | Err(_) => break,
                                Ok(n) => stdout.write(&buf[.. n]).await,
                            }
                        }
                    }
                    let _ = tx.send(Some(0));
                });
            }
            Script::RunForever => {}
        }
        Ok(())
    }

    async fn stop(&self, _timeout: Duration) -> Result<i64, VmError> {
        if let Some(code) = self.exited() {
            return Ok(code);
        }
        self.exit(143);
        Ok(143)
    }

    async fn kill(&self, signal: i32) -> Result<(), VmError> {
        if self.exited().is_none() {
            self.exit(128 + i64::from(signal));
        }
        Ok(())
    }

    async fn pause(&self) -> Result<(), VmError> {
        self.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), VmError> {
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&self, timeout: Option<Duration>) -> Result<i64, VmError> {
        self.await_exit(timeout).await
    }
}

pub struct FakeVmLauncher {
    socket_root: PathBuf,
    next_pid: AtomicI64,
    pub launched: Mutex<Vec<Arc<FakeVm>>>,
}

impl FakeVmLauncher {
    pub fn new(socket_root: PathBuf) -> Arc<FakeVmLauncher> {
        Arc::new(FakeVmLauncher {
            socket_root,
            next_pid: AtomicI64::new(1000),
            launched: Mutex::new(Vec::new()),
        })
    }

    pub fn launch_count(&self) -> usize {
        self.launched.lock().len()
    }
}

#[async_trait]
impl VmLauncher for FakeVmLauncher {
    async fn launch(
        &self,
        config: NativeContainerConfig,
    ) -> Result<Arc<dyn ContainerVm>, VmError> {
        let (exit_tx, exit_rx) = watch::channel(None);
        let vm = Arc::new(FakeVm {
            socket_dir: self.socket_root.join(config.native_id.as_str()),
            script: script_for(&config.command),
            stdout: config.stdout,
            stderr: config.stderr,
            stdin: Mutex::new(config.stdin),
            native_id: config.native_id,
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            created: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            exit_tx,
            exit_rx,
        });
        self.launched.lock().push(vm.clone());
        Ok(vm)
    }
}

// === fake guest gateway ===

#[derive(Debug, Clone)]
pub enum GuestCall {
    AddNetwork {
        target: String,
        req: AddNetworkRequest,
    },
    RemoveNetwork {
        target: String,
        req: RemoveNetworkRequest,
    },
    AddPeer {
        target: String,
        req: AddPeerRequest,
    },
    RemovePeer {
        target: String,
        req: RemovePeerRequest,
    },
    SyncFilesystem {
        target: String,
    },
}

#[derive(Default)]
pub struct FakeGateway {
    pub calls: Mutex<Vec<GuestCall>>,
    /// Native ids that answer every call with a timeout.
    pub unreachable: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Arc<FakeGateway> {
        Arc::new(FakeGateway::default())
    }

    fn check(&self, vm: &dyn ContainerVm, what: &str) -> Result<(), GuestError> {
        let native = vm.native_id().to_string();
        if self.unreachable.lock().contains(&native) {
            return Err(GuestError::Timeout {
                native_id: native,
                what: what.to_string(),
            });
        }
        Ok(())
    }

    pub fn endpoint_for(native_id: &str) -> String {
        format!("{}.vmnet:51820", &native_id[.. 8])
    }

    pub fn public_key_for(native_id: &str, index: u32) -> String {
        format!("pub-{}-{index}", &native_id[.. 8])
    }

    pub fn calls_snapshot(&self) -> Vec<GuestCall> {
        self.calls.lock().clone()
    }

    pub fn add_peer_calls(&self, target_native: &str) -> Vec<AddPeerRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                GuestCall::AddPeer {
                    target, req,
                } if target == target_native => Some(req.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn remove_peer_calls(
        &self,
        target_native: &str,
    ) -> Vec<RemovePeerRequest> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                GuestCall::RemovePeer {
                    target, req,
                } if target == target_native => Some(req.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl GuestGateway for FakeGateway {
    async fn add_network(
        &self,
        vm: &dyn ContainerVm,
        req: AddNetworkRequest,
    ) -> Result<AddNetworkResponse, GuestError> {
        self.check(vm, "AddNetwork")?;
        let target = vm.native_id().to_string();
        let response = AddNetworkResponse {
            wireguard_interface: format!("wg{}", req.network_index),
            ethernet_interface: format!("eth{}", req.network_index),
            public_key: Self::public_key_for(&target, req.network_index),
        };
        self.calls.lock().push(GuestCall::AddNetwork {
            target,
            req,
        });
        Ok(response)
    }

    async fn remove_network(
        &self,
        vm: &dyn ContainerVm,
        req: RemoveNetworkRequest,
    ) -> Result<(), GuestError> {
        self.check(vm, "RemoveNetwork")?;
        self.calls.lock().push(GuestCall::RemoveNetwork {
            target: vm.native_id().to_string(),
            req,
        });
        Ok(())
    }

    async fn add_peer(
        &self,
        vm: &dyn ContainerVm,
        req: AddPeerRequest,
    ) -> Result<(), GuestError> {
        self.check(vm, "AddPeer")?;
        self.calls.lock().push(GuestCall::AddPeer {
            target: vm.native_id().to_string(),
            req,
        });
        Ok(())
    }

    async fn remove_peer(
        &self,
        vm: &dyn ContainerVm,
        req: RemovePeerRequest,
    ) -> Result<(), GuestError> {
        self.check(vm, "RemovePeer")?;
        self.calls.lock().push(GuestCall::RemovePeer {
            target: vm.native_id().to_string(),
            req,
        });
        Ok(())
    }

    async fn vmnet_endpoint(
        &self,
        vm: &dyn ContainerVm,
    ) -> Result<String, GuestError> {
        self.check(vm, "GetVmnetEndpoint")?;
        Ok(Self::endpoint_for(vm.native_id().as_str()))
    }

    async fn publish_port(
        &self,
        vm: &dyn ContainerVm,
        _req: PublishPortRequest,
    ) -> Result<(), GuestError> {
        self.check(vm, "PublishPort")
    }

    async fn unpublish_port(
        &self,
        vm: &dyn ContainerVm,
        _req: UnpublishPortRequest,
    ) -> Result<(), GuestError> {
        self.check(vm, "UnpublishPort")
    }

    async fn sync_filesystem(
        &self,
        vm: &dyn ContainerVm,
    ) -> Result<(), GuestError> {
        self.check(vm, "SyncFilesystem")?;
        self.calls.lock().push(GuestCall::SyncFilesystem {
            target: vm.native_id().to_string(),
        });
        Ok(())
    }

    async fn dump_nftables(
        &self,
        vm: &dyn ContainerVm,
    ) -> Result<String, GuestError> {
        self.check(vm, "DumpNftables")?;
        Ok(String::new())
    }

    async fn list_processes(
        &self,
        vm: &dyn ContainerVm,
        _ps_args: &str,
    ) -> Result<(Vec<String>, Vec<Vec<String>>), GuestError> {
        self.check(vm, "ListProcesses")?;
        Ok((
            vec!["PID".to_string(), "CMD".to_string()],
            vec![vec!["1".to_string(), "sh".to_string()]],
        ))
    }
}

// === fake filesystem inspector ===

/// Returns a configurable file table per rootfs path; unknown paths
/// enumerate empty, which matches a pristine image.
#[derive(Default)]
pub struct FakeInspector {
    pub tables: Mutex<HashMap<PathBuf, Vec<BaselineEntry>>>,
}

impl FakeInspector {
    pub fn new() -> Arc<FakeInspector> {
        Arc::new(FakeInspector::default())
    }

    pub fn set_table(&self, rootfs: PathBuf, entries: Vec<BaselineEntry>) {
        self.tables.lock().insert(rootfs, entries);
    }
}

impl RootfsInspector for FakeInspector {
    fn enumerate(
        &self,
        image: &std::path::Path,
    ) -> Result<Vec<BaselineEntry>, arca_engine::diff::DiffError> {
        Ok(self
            .tables
            .lock()
            .get(image)
            .cloned()
            .unwrap_or_default())
    }
}

// === recording event sink ===

#[derive(Default)]
pub struct RecordingEventSink {
    pub events: Mutex<Vec<ContainerEvent>>,
    notify: Notify,
}

impl RecordingEventSink {
    pub fn new() -> Arc<RecordingEventSink> {
        Arc::new(RecordingEventSink::default())
    }

    pub fn count(&self, action: EventAction, container_id: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action && e.id == container_id)
            .count()
    }

    /// Wait until `count` events of the kind arrived, with a timeout.
    pub async fn wait_for(
        &self,
        action: EventAction,
        container_id: &str,
        count: usize,
        timeout: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count(action, container_id) >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            let _ = tokio::time::timeout(
                Duration::from_millis(25),
                self.notify.notified(),
            )
            .await;
        }
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: ContainerEvent) {
        self.events.lock().push(event);
        self.notify.notify_waiters();
    }
}

// === harness ===

pub struct TestHarness {
    pub dir: Arc<tempfile::TempDir>,
    pub store: Arc<StateStore>,
    pub core: Arc<ContainerCore>,
    pub network: Arc<NetworkCore>,
    pub gateway: Arc<FakeGateway>,
    pub launcher: Arc<FakeVmLauncher>,
    pub events: Arc<RecordingEventSink>,
    pub inspector: Arc<FakeInspector>,
    pub vms: Arc<VmRegistry>,
}

impl TestHarness {
    pub async fn new() -> TestHarness {
        let dir = Arc::new(tempfile::tempdir().unwrap());
        let harness = Self::build(dir).await;
        harness.seed_image("alpine:3", ImageRuntimeConfig::default()).await;
        harness
    }

    /// Rebuild the daemon on the same state directory; the previous
    /// incarnation is simply dropped, like a crashed process.
    pub async fn reopen(self) -> TestHarness {
        let dir = self.dir.clone();
        drop(self);
        Self::build(dir).await
    }

    async fn build(dir: Arc<tempfile::TempDir>) -> TestHarness {
        arca_engine::logger::init_for_tests();
        let root = dir.path();
        std::fs::create_dir_all(root.join("images")).unwrap();
        std::fs::create_dir_all(root.join("logs")).unwrap();
        // the kernel existence check runs before every VM build
        std::fs::write(root.join("vmlinux"), b"kernel").unwrap();

        let store =
            Arc::new(StateStore::open(&root.join("state.db")).unwrap());
        let vms = VmRegistry::new();
        let gateway = FakeGateway::new();
        let wireguard =
            WireGuardDriver::new(store.clone(), vms.clone(), gateway.clone());
        let mut drivers: Vec<Arc<dyn NetworkDriver>> = Vec::new();
        drivers.push(wireguard);
        drivers.push(Arc::new(VmnetDriver));
        drivers.push(Arc::new(NullDriver));
        let network = NetworkCore::new(store.clone(), vms.clone(), drivers);
        network.init().await.unwrap();

        let images = Arc::new(LocalImageStore::new(
            root.join("images"),
            root.join("rootfs"),
        ));
        let volumes = Arc::new(LocalVolumeStore::new(root.join("volumes")));
        let fanout = Arc::new(LogFanout::new(root.join("logs")));
        let launcher = FakeVmLauncher::new(root.join("vsock"));
        let events = RecordingEventSink::new();
        let inspector = FakeInspector::new();

        let core = ContainerCoreBuilder::new(
            store.clone(),
            images,
            volumes,
            network.clone(),
            launcher.clone(),
            gateway.clone(),
            fanout,
            vms.clone(),
        )
        .with_events(events.clone())
        .with_inspector(inspector.clone())
        .with_options(CoreOptions {
            kernel_path: root.join("vmlinux"),
            platform: "linux/arm64".to_string(),
            stop_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_millis(50),
        })
        .build();
        core.recover().await.unwrap();

        TestHarness {
            dir,
            store,
            core,
            network,
            gateway,
            launcher,
            events,
            inspector,
            vms,
        }
    }

    pub async fn seed_image(&self, reference: &str, config: ImageRuntimeConfig) {
        let dir = self
            .dir
            .path()
            .join("images")
            .join(reference.replace([':', '/'], "_"));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("rootfs.img"), b"rootfs").unwrap();
        std::fs::write(
            dir.join("config.json"),
            serde_json::to_string(&config).unwrap(),
        )
        .unwrap();
    }

    /// Create options for a throwaway container.
    pub fn opts(name: &str, command: &[&str]) -> CreateOpts {
        CreateOpts {
            name: if name.is_empty() {
                None
            } else {
                Some(name.to_string())
            },
            image: "alpine:3".to_string(),
            cmd: Some(command.iter().map(|s| s.to_string()).collect()),
            entrypoint: Some(Vec::new()),
            ..Default::default()
        }
    }

    /// Native id of a container, for gateway call assertions.
    pub async fn native_of(&self, id_or_name: &str) -> String {
        let id = self.core.resolve(id_or_name).await.unwrap();
        id.native().to_string()
    }

    /// Insert a bare container row, for store-level tests that need
    /// the foreign keys satisfied without a full lifecycle.
    pub async fn seed_container_row(&self, docker_id: &str, name: &str) {
        use arca_engine::core::{
            Container,
            ContainerConfig,
            ContainerState,
            DockerId,
            HostConfig,
        };
        let id = DockerId::parse(docker_id).unwrap();
        let container = Container {
            native_id: id.native(),
            id,
            name: name.to_string(),
            config: ContainerConfig {
                image: "alpine:3".to_string(),
                image_id: "sha256:seed".to_string(),
                entrypoint: Vec::new(),
                cmd: vec!["sh".to_string()],
                env: Vec::new(),
                working_dir: "/".to_string(),
                user: String::new(),
                group_add: Vec::new(),
                tty: false,
                open_stdin: false,
                labels: HashMap::new(),
                host: HostConfig::default(),
                healthcheck: None,
                mounts: Vec::new(),
                rootfs: self.dir.path().join("unused.img"),
            },
            state: ContainerState::Created,
            pid: None,
            exit_code: None,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            stopped_by_user: false,
            needs_create: false,
            attachments: HashMap::new(),
        };
        self.store.insert_container(&container).await.unwrap();
    }
}
