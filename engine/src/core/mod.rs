//!
//! core contains the container registry and its lifecycle state machine.
//! All mutable container state is owned by [`ContainerCore`]; every public
//! operation is atomic with respect to that state.

use snafu::Snafu;

pub use attach::{AttachStreams, ExitWaiter};
pub use caps::{resolve_capabilities, CapabilitySets, DEFAULT_CAPABILITIES};
pub use config::{CreateOpts, UpdateOpts};
pub use container::{
    Attachment,
    Container,
    ContainerConfig,
    ContainerDetails,
    ContainerState,
    ContainerSummary,
    DockerId,
    HealthConfig,
    HostConfig,
    MountSource,
    MountSpec,
    NativeId,
    PortBinding,
    RestartPolicy,
};
pub use registry::{ContainerCore, ContainerCoreBuilder, CoreOptions};
pub use signal::parse_signal;

mod attach;
mod caps;
mod config;
mod container;
mod lifecycle;
mod monitor;
mod registry;
mod signal;

use crate::{
    guest::GuestError,
    network::NetworkError,
    store::StoreError,
    vm::VmError,
};

/// Exit code recorded for containers that were running when the daemon
/// went down; mirrors a SIGKILL death.
pub const DAEMON_SHUTDOWN_EXIT_CODE: i64 = 137;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum Error {
    #[snafu(display("container core is not initialised yet"))]
    NotInitialized {},
    #[snafu(display("kernel image {} not found", path))]
    KernelNotFound {
        path: String,
    },
    #[snafu(display("no such container: {}", id))]
    ContainerNotFound {
        id: String,
    },
    #[snafu(display(
        "cannot remove running container {}, stop it first or use force",
        id
    ))]
    ContainerRunning {
        id: String,
    },
    #[snafu(display("container {} is not running", id))]
    ContainerNotRunning {
        id: String,
    },
    #[snafu(display("container {} is not paused", id))]
    ContainerNotPaused {
        id: String,
    },
    #[snafu(display(
        "the container name '{}' is already in use by container {}",
        name,
        holder
    ))]
    NameConflict {
        name: String,
        holder: String,
    },
    #[snafu(display("no such image: {}", reference))]
    ImageNotFound {
        reference: String,
    },
    #[snafu(display("invalid parameter: {}", reason))]
    InvalidParameter {
        reason: String,
    },
    #[snafu(display("invalid configuration: {}", reason))]
    InvalidConfiguration {
        reason: String,
    },
    #[snafu(display("bind source path {} does not exist", path))]
    VolumeSourceNotFound {
        path: String,
    },
    #[snafu(display("no such volume: {}", name))]
    VolumeNotFound {
        name: String,
    },
    #[snafu(display("volume manager is not available"))]
    VolumeManagerNotAvailable {},
    #[snafu(display("no filesystem baseline captured for container {}", id))]
    NoFilesystemBaseline {
        id: String,
    },
    #[snafu(display("failed to read container filesystem: {}", reason))]
    FailedToReadFilesystem {
        reason: String,
    },
    #[snafu(display("failed to create log writers: {}", reason))]
    LogWriterCreationFailed {
        reason: String,
    },
    #[snafu(display("wait for container {} timed out", id))]
    WaitTimeout {
        id: String,
    },
    #[snafu(display("state store failure: {}", source))]
    Store {
        source: StoreError,
    },
    #[snafu(display("vm failure: {}", source))]
    Vm {
        source: VmError,
    },
    #[snafu(display("network failure: {}", source))]
    Network {
        source: NetworkError,
    },
    #[snafu(display("guest control failure: {}", source))]
    Guest {
        source: GuestError,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<crate::image::ImageError> for Error {
    fn from(e: crate::image::ImageError) -> Self {
        match e {
            crate::image::ImageError::NotFound { reference } => {
                Error::ImageNotFound { reference }
            }
            other => Error::InvalidConfiguration {
                reason: other.to_string(),
            },
        }
    }
}

impl From<crate::volume::VolumeError> for Error {
    fn from(e: crate::volume::VolumeError) -> Self {
        match e {
            crate::volume::VolumeError::NotFound { name } => {
                Error::VolumeNotFound { name }
            }
            crate::volume::VolumeError::Unavailable {} => {
                Error::VolumeManagerNotAvailable {}
            }
            other => Error::InvalidConfiguration {
                reason: other.to_string(),
            },
        }
    }
}

impl From<VmError> for Error {
    fn from(e: VmError) -> Self {
        match e {
            VmError::KernelNotFound { path } => Error::KernelNotFound { path },
            other => Error::Vm { source: other },
        }
    }
}
