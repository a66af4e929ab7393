//! Minimal filesystem-backed implementations of the image and volume
//! collaborator contracts, enough to run the daemon standalone against
//! pre-provisioned images. Pulling and building stay out of scope; an
//! image is a directory `<image_root>/<name>/` holding `rootfs.img` and
//! a `config.json` with the runtime defaults.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    image::{ImageError, ImageRecord, ImageRuntimeConfig, ImageStore},
    volume::{Volume, VolumeBacking, VolumeError, VolumeStore},
};

pub struct LocalImageStore {
    image_root: PathBuf,
    rootfs_root: PathBuf,
}

impl LocalImageStore {
    pub fn new(image_root: PathBuf, rootfs_root: PathBuf) -> LocalImageStore {
        LocalImageStore {
            image_root,
            rootfs_root,
        }
    }

    /// Directory of an image reference; the tag separates with `:` on
    /// the wire but `_` on disk.
    fn dir_of(&self, reference: &str) -> PathBuf {
        self.image_root.join(reference.replace([':', '/'], "_"))
    }

    fn dir_by_id(&self, id: &str) -> Option<PathBuf> {
        let entries = std::fs::read_dir(&self.image_root).ok()?;
        for entry in entries.flatten() {
            if Self::digest_of(&entry.path()) == id {
                return Some(entry.path());
            }
        }
        None
    }

    fn digest_of(dir: &Path) -> String {
        let mut hasher = Sha256::new();
        hasher.update(dir.as_os_str().as_encoded_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn get_image(
        &self,
        reference: &str,
    ) -> Result<ImageRecord, ImageError> {
        let dir = self.dir_of(reference);
        if !dir.join("rootfs.img").exists() {
            return Err(ImageError::NotFound {
                reference: reference.to_string(),
            });
        }
        Ok(ImageRecord {
            id: Self::digest_of(&dir),
            reference: reference.to_string(),
        })
    }

    async fn config(
        &self,
        id: &str,
        platform: &str,
    ) -> Result<ImageRuntimeConfig, ImageError> {
        let dir = self.dir_by_id(id).ok_or_else(|| ImageError::NotFound {
            reference: id.to_string(),
        })?;
        let raw = std::fs::read_to_string(dir.join("config.json"))
            .map_err(|_| ImageError::NoPlatformConfig {
                id: id.to_string(),
                platform: platform.to_string(),
            })?;
        serde_json::from_str(&raw).map_err(|_| {
            ImageError::NoPlatformConfig {
                id: id.to_string(),
                platform: platform.to_string(),
            }
        })
    }

    async fn clone_rootfs(
        &self,
        id: &str,
        native_id: &str,
    ) -> Result<PathBuf, ImageError> {
        let dir = self.dir_by_id(id).ok_or_else(|| ImageError::NotFound {
            reference: id.to_string(),
        })?;
        let target = self.rootfs_root.join(format!("{native_id}.img"));
        if target.exists() {
            return Ok(target);
        }
        tokio::fs::create_dir_all(&self.rootfs_root).await.map_err(
            |e| ImageError::RootfsClone {
                id: id.to_string(),
                reason: e.to_string(),
            },
        )?;
        tokio::fs::copy(dir.join("rootfs.img"), &target)
            .await
            .map_err(|e| ImageError::RootfsClone {
                id: id.to_string(),
                reason: e.to_string(),
            })?;
        Ok(target)
    }

    async fn load_from_oci_layout(
        &self,
        path: &Path,
    ) -> Result<Vec<ImageRecord>, ImageError> {
        Err(ImageError::InvalidLayout {
            path: path.display().to_string(),
            reason: "oci import is not supported by the local store"
                .to_string(),
        })
    }
}

pub struct LocalVolumeStore {
    volume_root: PathBuf,
}

impl LocalVolumeStore {
    pub fn new(volume_root: PathBuf) -> LocalVolumeStore {
        LocalVolumeStore {
            volume_root,
        }
    }

    fn dir_of(&self, name: &str) -> PathBuf {
        self.volume_root.join(name)
    }
}

#[async_trait]
impl VolumeStore for LocalVolumeStore {
    async fn resolve(&self, name: &str) -> Result<Volume, VolumeError> {
        let dir = self.dir_of(name);
        if !dir.exists() {
            return Err(VolumeError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(Volume {
            name: name.to_string(),
            backing: VolumeBacking::Directory(dir),
        })
    }

    async fn create_anonymous(&self) -> Result<Volume, VolumeError> {
        let name = Uuid::new_v4().simple().to_string();
        let dir = self.dir_of(&name);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            VolumeError::Internal {
                reason: e.to_string(),
            }
        })?;
        Ok(Volume {
            name,
            backing: VolumeBacking::Directory(dir),
        })
    }

    async fn delete(&self, name: &str) -> Result<(), VolumeError> {
        match tokio::fs::remove_dir_all(self.dir_of(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VolumeError::Internal {
                reason: e.to_string(),
            }),
        }
    }
}
