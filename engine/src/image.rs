//! Contract of the image store collaborator. The orchestration core only
//! needs reference resolution, per-platform runtime config and a writable
//! rootfs clone per container; the store's internals (pulling, layer
//! unpacking, OCI layouts) live elsewhere.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum ImageError {
    #[snafu(display("no such image: {}", reference))]
    NotFound {
        reference: String,
    },
    #[snafu(display("image {} has no config for platform {}", id, platform))]
    NoPlatformConfig {
        id: String,
        platform: String,
    },
    #[snafu(display("failed to clone rootfs for image {}: {}", id, reason))]
    RootfsClone {
        id: String,
        reason: String,
    },
    #[snafu(display("invalid OCI layout at {}: {}", path, reason))]
    InvalidLayout {
        path: String,
        reason: String,
    },
}

/// Runtime defaults baked into an image config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ImageRuntimeConfig {
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    /// `"<port>/<proto>"` spellings.
    pub exposed_ports: Vec<String>,
}

/// A resolved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    /// Content digest, `sha256:...`.
    pub id: String,
    /// The reference it was resolved from.
    pub reference: String,
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Resolve a reference (`alpine:3`, digest, short id) to an image.
    async fn get_image(
        &self,
        reference: &str,
    ) -> Result<ImageRecord, ImageError>;

    /// Runtime config of the image for the requested platform
    /// (e.g. `linux/arm64`); empty selects the store default.
    async fn config(
        &self,
        id: &str,
        platform: &str,
    ) -> Result<ImageRuntimeConfig, ImageError>;

    /// Produce the container's writable ext4 rootfs image and return its
    /// path on the host.
    async fn clone_rootfs(
        &self,
        id: &str,
        native_id: &str,
    ) -> Result<PathBuf, ImageError>;

    /// Import images from an OCI image layout directory.
    async fn load_from_oci_layout(
        &self,
        path: &Path,
    ) -> Result<Vec<ImageRecord>, ImageError>;
}
