//! Container identity and record types. The persisted shape lives in
//! [`ContainerConfig`]; runtime-only state stays on [`Container`].

use std::{collections::HashMap, fmt, path::PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

/// 64-char lowercase hex identifier exposed to API callers. The scheme
/// doubles the native UUID, so the guest-side identity is always
/// recoverable from the first half.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DockerId(String);

/// 32-char identifier used by the VM layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeId(String);

impl DockerId {
    /// Mint a fresh identity pair.
    pub fn generate() -> (DockerId, NativeId) {
        let native = Uuid::new_v4().simple().to_string();
        let docker = format!("{native}{native}");
        (DockerId(docker), NativeId(native))
    }

    /// Recover the guest-side identity; the ID scheme guarantees the
    /// first 32 characters are the native UUID.
    pub fn native(&self) -> NativeId {
        NativeId(self.0[.. 32].to_string())
    }

    pub fn parse(s: &str) -> Option<DockerId> {
        let len = s.len();
        if !(48 ..= 64).contains(&len) {
            return None;
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return None;
        }
        Some(DockerId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form used in log lines and list output.
    pub fn short(&self) -> &str {
        &self.0[.. 12]
    }
}

impl fmt::Display for DockerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl NativeId {
    pub fn from_string(s: String) -> NativeId {
        NativeId(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Container lifecycle states, using the wire spellings of the Docker API.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
}

impl ContainerState {
    /// A live guest VM object must exist exactly in these states.
    pub fn has_vm(&self) -> bool {
        matches!(
            self,
            ContainerState::Running
                | ContainerState::Paused
                | ContainerState::Restarting
        )
    }
}

/// Restart policy attached to a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case", tag = "name")]
pub enum RestartPolicy {
    #[default]
    No,
    Always,
    UnlessStopped,
    OnFailure {
        #[serde(default)]
        maximum_retry_count: u32,
    },
}

impl RestartPolicy {
    /// Parse the Docker API `{name, maximumRetryCount}` pair.
    pub fn from_wire(name: &str, maximum_retry_count: u32) -> Option<Self> {
        match name {
            "" | "no" => Some(RestartPolicy::No),
            "always" => Some(RestartPolicy::Always),
            "unless-stopped" => Some(RestartPolicy::UnlessStopped),
            "on-failure" => Some(RestartPolicy::OnFailure {
                maximum_retry_count,
            }),
            _ => None,
        }
    }

    /// The decision table evaluated by the exit monitor. `stopped_by_user`
    /// is the persisted flag, `restarts` the in-memory attempt count.
    pub fn should_restart(
        &self,
        exit_code: i64,
        stopped_by_user: bool,
        restarts: u32,
    ) -> bool {
        if stopped_by_user {
            return false;
        }
        match self {
            RestartPolicy::No => false,
            RestartPolicy::Always => true,
            RestartPolicy::UnlessStopped => true,
            RestartPolicy::OnFailure {
                maximum_retry_count,
            } => {
                exit_code != 0
                    && (*maximum_retry_count == 0
                        || restarts < *maximum_retry_count)
            }
        }
    }
}

/// One host-side binding of a published container port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PortBinding {
    #[serde(default)]
    pub host_ip: String,
    #[serde(default)]
    pub host_port: String,
}

/// Health probe configuration; times are nanoseconds as on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HealthConfig {
    /// `[]` inherit, `["NONE"]` disabled, `["CMD", ..]` exec,
    /// `["CMD-SHELL", cmd]` shell.
    pub test: Vec<String>,
    #[serde(default)]
    pub interval_ns: i64,
    #[serde(default)]
    pub timeout_ns: i64,
    #[serde(default)]
    pub start_period_ns: i64,
    #[serde(default)]
    pub retries: i64,
}

impl HealthConfig {
    pub fn disabled(&self) -> bool {
        self.test.first().map(String::as_str) == Some("NONE")
    }
}

/// Where a mount gets its bytes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountSource {
    /// Host path shared into the guest.
    Bind {
        host_path: PathBuf,
    },
    /// Named volume backed by a shared directory.
    Volume {
        name: String,
        host_path: PathBuf,
        anonymous: bool,
    },
    /// Named volume backed by an exclusive ext4 block image.
    Block {
        name: String,
        image: PathBuf,
        anonymous: bool,
    },
}

/// A resolved mount, persisted so a cold restore can rebuild the VM
/// without consulting the original request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub source: MountSource,
    pub destination: String,
    pub read_only: bool,
}

impl MountSpec {
    pub fn volume_name(&self) -> Option<(&str, bool)> {
        match &self.source {
            MountSource::Volume {
                name, anonymous, ..
            }
            | MountSource::Block {
                name, anonymous, ..
            } => Some((name.as_str(), *anonymous)),
            MountSource::Bind {
                ..
            } => None,
        }
    }
}

/// Host-config resource limits and policies, Docker wire semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub memory: i64,
    #[serde(default)]
    pub memory_reservation: i64,
    #[serde(default)]
    pub memory_swap: i64,
    /// -1 means kernel default.
    #[serde(default)]
    pub memory_swappiness: i64,
    #[serde(default)]
    pub nano_cpus: i64,
    #[serde(default)]
    pub cpu_shares: i64,
    #[serde(default)]
    pub cpu_period: i64,
    #[serde(default)]
    pub cpu_quota: i64,
    #[serde(default)]
    pub cpuset_cpus: String,
    #[serde(default)]
    pub cpuset_mems: String,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub cap_add: Vec<String>,
    #[serde(default)]
    pub cap_drop: Vec<String>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
    #[serde(default)]
    pub network_mode: String,
    /// Keyed by `"<port>/<proto>"`.
    #[serde(default)]
    pub port_bindings: HashMap<String, Vec<PortBinding>>,
    #[serde(default)]
    pub binds: Vec<String>,
    #[serde(default)]
    pub extra_hosts: Vec<String>,
}

/// The full persisted configuration of a container: everything needed to
/// rebuild the guest VM after a daemon restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub image: String,
    pub image_id: String,
    /// Effective process arguments after image defaulting.
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub group_add: Vec<String>,
    pub tty: bool,
    pub open_stdin: bool,
    pub labels: HashMap<String, String>,
    pub host: HostConfig,
    pub healthcheck: Option<HealthConfig>,
    /// Resolved mounts, in request order.
    pub mounts: Vec<MountSpec>,
    /// The container's writable rootfs disk image.
    pub rootfs: PathBuf,
}

impl ContainerConfig {
    /// `entrypoint ++ cmd`, the argv handed to the guest supervisor.
    pub fn command(&self) -> Vec<String> {
        let mut v = self.entrypoint.clone();
        v.extend(self.cmd.iter().cloned());
        v
    }

    pub fn anonymous_volumes(&self) -> Vec<String> {
        self.mounts
            .iter()
            .filter_map(|m| m.volume_name())
            .filter(|(_, anon)| *anon)
            .map(|(name, _)| name.to_string())
            .collect()
    }
}

/// A (container, network) attachment as seen by inspect/list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub network_id: String,
    pub network_name: String,
    pub ip: String,
    pub mac: String,
    pub gateway: String,
    pub subnet: String,
    pub aliases: Vec<String>,
    /// Per-container ordinal of the network; names wgN/ethN in-guest.
    pub index: u32,
}

/// The authoritative in-memory record of one container.
#[derive(Debug, Clone)]
pub struct Container {
    pub id: DockerId,
    pub native_id: NativeId,
    pub name: String,
    pub config: ContainerConfig,
    pub state: ContainerState,
    pub pid: Option<i64>,
    pub exit_code: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Last stop was operator-initiated; consulted by `unless-stopped`.
    pub stopped_by_user: bool,
    /// VM creation was deferred to the first start.
    pub needs_create: bool,
    /// Keyed by network ID.
    pub attachments: HashMap<String, Attachment>,
}

impl Container {
    pub fn is_internal(&self) -> bool {
        self.config
            .labels
            .get("com.arca.internal")
            .map(String::as_str)
            == Some("true")
    }
}

/// `list` row.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSummary {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub image_id: String,
    pub command: String,
    pub created: i64,
    pub state: ContainerState,
    pub status: String,
    pub labels: HashMap<String, String>,
}

/// `inspect` view.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerDetails {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub state: ContainerState,
    pub running: bool,
    pub paused: bool,
    pub restarting: bool,
    pub pid: i64,
    pub exit_code: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub image: String,
    pub image_id: String,
    pub entrypoint: Vec<String>,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub tty: bool,
    pub labels: HashMap<String, String>,
    pub host_config: HostConfig,
    pub mounts: Vec<MountSpec>,
    pub networks: HashMap<String, Attachment>,
    pub health: Option<String>,
}
