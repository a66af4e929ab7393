//! Contract of the volume store collaborator.

use std::path::PathBuf;

use async_trait::async_trait;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum VolumeError {
    #[snafu(display("no such volume: {}", name))]
    NotFound {
        name: String,
    },
    #[snafu(display("volume manager is not available"))]
    Unavailable {},
    #[snafu(display("volume {} is in use", name))]
    InUse {
        name: String,
    },
    #[snafu(display("volume operation failed: {}", reason))]
    Internal {
        reason: String,
    },
}

/// How a volume's bytes are exposed to the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeBacking {
    /// Shared directory on the host.
    Directory(PathBuf),
    /// Exclusive ext4 block image, attached as a virtual disk.
    BlockImage(PathBuf),
}

/// A resolved named or anonymous volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub backing: VolumeBacking,
}

#[async_trait]
pub trait VolumeStore: Send + Sync {
    /// Resolve a named volume to its mount source.
    async fn resolve(&self, name: &str) -> Result<Volume, VolumeError>;

    /// Create an anonymous volume owned by (and fate-shared with) a
    /// container.
    async fn create_anonymous(&self) -> Result<Volume, VolumeError>;

    /// Delete a volume; called for anonymous volumes on container
    /// removal and for named volumes when `remove(removeVolumes)` asks.
    async fn delete(&self, name: &str) -> Result<(), VolumeError>;
}
