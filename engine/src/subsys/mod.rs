//! Daemon-level subsystems: configuration and the local filesystem
//! implementations of the collaborator seams used by the standalone
//! daemon.

pub use config::DaemonConfig;
pub use local::{LocalImageStore, LocalVolumeStore};

mod config;
mod local;
