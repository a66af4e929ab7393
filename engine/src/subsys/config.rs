//! Daemon configuration, optionally loaded from a YAML file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_data_root() -> PathBuf {
    PathBuf::from("/var/lib/arca")
}

fn default_platform() -> String {
    "linux/arm64".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_guest_timeout() -> u64 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Root of all daemon state: database, logs, rootfs images, vsock
    /// bridge sockets.
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Kernel booted in every container VM; defaults to
    /// `<data_root>/kernel/vmlinux`.
    #[serde(default)]
    pub kernel_path: Option<PathBuf>,
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
    #[serde(default = "default_guest_timeout")]
    pub guest_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            data_root: default_data_root(),
            kernel_path: None,
            platform: default_platform(),
            stop_timeout_secs: default_stop_timeout(),
            guest_timeout_secs: default_guest_timeout(),
        }
    }
}

impl DaemonConfig {
    /// Read the config file; absent files yield the defaults.
    pub fn from_file(path: &Path) -> Result<DaemonConfig, String> {
        match std::fs::read_to_string(path) {
            Ok(raw) => serde_yaml::from_str(&raw)
                .map_err(|e| format!("invalid config {}: {e}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(DaemonConfig::default())
            }
            Err(e) => {
                Err(format!("cannot read config {}: {e}", path.display()))
            }
        }
    }

    pub fn kernel(&self) -> PathBuf {
        self.kernel_path
            .clone()
            .unwrap_or_else(|| self.data_root.join("kernel/vmlinux"))
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_root.join("state.db")
    }

    pub fn log_root(&self) -> PathBuf {
        self.data_root.join("logs")
    }

    pub fn image_root(&self) -> PathBuf {
        self.data_root.join("images")
    }

    pub fn rootfs_root(&self) -> PathBuf {
        self.data_root.join("rootfs")
    }

    pub fn volume_root(&self) -> PathBuf {
        self.data_root.join("volumes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config =
            DaemonConfig::from_file(Path::new("/nonexistent/arca.yaml"))
                .unwrap();
        assert_eq!(config.data_root, PathBuf::from("/var/lib/arca"));
        assert_eq!(config.stop_timeout_secs, 10);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("arca.yaml");
        std::fs::write(&path, "data_root: /tmp/arca-test\n").unwrap();
        let config = DaemonConfig::from_file(&path).unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/arca-test"));
        assert_eq!(config.platform, "linux/arm64");
        assert_eq!(config.kernel(), PathBuf::from("/tmp/arca-test/kernel/vmlinux"));
    }
}
