//! Contract of the platform VM abstraction. The core configures a guest
//! through an explicit [`NativeContainerConfig`] value — every field is
//! translated to the underlying VM before `create()` — and drives it
//! through the [`ContainerVm`] handle. Stdio is wired before creation.

pub use process::{ProcessVm, ProcessVmLauncher};

pub mod process;

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use snafu::Snafu;
use tokio::io::AsyncRead;

use crate::core::{CapabilitySets, MountSpec, NativeId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum VmError {
    #[snafu(display("kernel image {} not found", path))]
    KernelNotFound {
        path: String,
    },
    #[snafu(display("failed to create vm {}: {}", native_id, reason))]
    CreateFailed {
        native_id: String,
        reason: String,
    },
    #[snafu(display("failed to start vm {}: {}", native_id, reason))]
    StartFailed {
        native_id: String,
        reason: String,
    },
    #[snafu(display("failed to stop vm {}: {}", native_id, reason))]
    StopFailed {
        native_id: String,
        reason: String,
    },
    #[snafu(display("failed to signal vm {}: {}", native_id, reason))]
    SignalFailed {
        native_id: String,
        reason: String,
    },
    #[snafu(display("vm {} does not support {}", native_id, operation))]
    NotSupported {
        native_id: String,
        operation: String,
    },
    #[snafu(display("wait on vm {} timed out", native_id))]
    WaitTimedOut {
        native_id: String,
    },
}

pub type Result<T, E = VmError> = std::result::Result<T, E>;

/// Byte sink for one guest output stream. Sinks absorb downstream
/// failures; the VM never sees them.
#[async_trait]
pub trait OutputSink: Send + Sync {
    async fn write(&self, buf: &[u8]);
    async fn close(&self);
}

/// Reader handed to the VM as the guest process stdin.
pub type StdinSource = Box<dyn AsyncRead + Send + Unpin>;

/// The complete recipe for a container VM. Built by the core from the
/// persisted container config, consumed once by the launcher.
pub struct NativeContainerConfig {
    pub native_id: NativeId,
    /// Writable ext4 rootfs image.
    pub rootfs: PathBuf,
    pub kernel: PathBuf,
    /// argv, entrypoint already concatenated with cmd.
    pub command: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub tty: bool,
    /// 0 leaves the platform default.
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub capabilities: CapabilitySets,
    pub mounts: Vec<MountSpec>,
    pub stdin: Option<StdinSource>,
    pub stdout: Arc<dyn OutputSink>,
    pub stderr: Arc<dyn OutputSink>,
    /// Attach the VM to the native NAT network at creation time.
    pub vmnet: bool,
}

impl std::fmt::Debug for NativeContainerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeContainerConfig")
            .field("native_id", &self.native_id)
            .field("rootfs", &self.rootfs)
            .field("kernel", &self.kernel)
            .field("command", &self.command)
            .field("working_dir", &self.working_dir)
            .field("tty", &self.tty)
            .field("memory_bytes", &self.memory_bytes)
            .field("nano_cpus", &self.nano_cpus)
            .field("mounts", &self.mounts.len())
            .field("stdin", &self.stdin.is_some())
            .field("vmnet", &self.vmnet)
            .finish()
    }
}

/// Handle to a single guest VM.
#[async_trait]
pub trait ContainerVm: Send + Sync {
    fn native_id(&self) -> &NativeId;

    /// Host-side process id of the VM, once created.
    fn pid(&self) -> Option<i64>;

    /// Path of the host unix socket bridging the given guest vsock port.
    fn control_socket(&self, port: u32) -> PathBuf;

    async fn create(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    /// Drive the VM from started back to stopped, giving the guest
    /// `timeout` to exit cleanly. Returns the guest exit code.
    async fn stop(&self, timeout: Duration) -> Result<i64>;

    async fn kill(&self, signal: i32) -> Result<()>;

    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    /// Block until the guest process exits. A `timeout` of `None` waits
    /// forever; an exceeded timeout is `WaitTimedOut`, distinct from any
    /// exit.
    async fn wait(&self, timeout: Option<Duration>) -> Result<i64>;
}

/// Creates VMs from configs; the platform (Virtualization.framework,
/// test fakes) hides behind this.
#[async_trait]
pub trait VmLauncher: Send + Sync {
    async fn launch(
        &self,
        config: NativeContainerConfig,
    ) -> Result<Arc<dyn ContainerVm>>;
}

/// Live VMs keyed by container DockerId. The container core maintains
/// it; the network backends read it to reach mesh peers.
#[derive(Default)]
pub struct VmRegistry {
    inner: parking_lot::RwLock<
        std::collections::HashMap<String, Arc<dyn ContainerVm>>,
    >,
}

impl VmRegistry {
    pub fn new() -> Arc<VmRegistry> {
        Arc::new(VmRegistry::default())
    }

    pub fn insert(&self, container_id: &str, vm: Arc<dyn ContainerVm>) {
        self.inner.write().insert(container_id.to_string(), vm);
    }

    pub fn remove(&self, container_id: &str) {
        self.inner.write().remove(container_id);
    }

    pub fn get(&self, container_id: &str) -> Option<Arc<dyn ContainerVm>> {
        self.inner.read().get(container_id).cloned()
    }
}
