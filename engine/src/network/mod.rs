//!
//! network contains the driver facade and the backends that attach
//! containers to overlay networks. Each persisted network records its
//! driver; operations dispatch through a routing table built from the
//! state store on startup.

use std::{collections::HashMap, str::FromStr};

use chrono::{DateTime, Utc};
use snafu::Snafu;

pub use self::core::{NetworkCore, NetworkDetails};
pub use driver::{AttachOutcome, AttachRequest, DetachRequest, NetworkDriver};
pub use ipam::{deterministic_mac, generate_wireguard_key, SubnetPlan};
pub use null::NullDriver;
pub use vmnet::VmnetDriver;
pub use wireguard::WireGuardDriver;

mod core;
mod driver;
mod hostip;
mod ipam;
mod null;
mod vmnet;
mod wireguard;

use crate::{guest::GuestError, store::StoreError};

/// Default bridge network parameters.
pub const DEFAULT_BRIDGE_NAME: &str = "bridge";
pub const DEFAULT_BRIDGE_SUBNET: &str = "172.17.0.0/16";
pub const DEFAULT_HOST_NAME: &str = "host";
pub const DEFAULT_NONE_NAME: &str = "none";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum NetworkError {
    #[snafu(display("invalid network name '{}'", name))]
    InvalidName {
        name: String,
    },
    #[snafu(display("network '{}' already exists", name))]
    NameExists {
        name: String,
    },
    #[snafu(display("no such network: {}", id))]
    NetworkNotFound {
        id: String,
    },
    #[snafu(display("network id prefix '{}' is ambiguous", id))]
    AmbiguousID {
        id: String,
    },
    #[snafu(display("unsupported network driver '{}'", driver))]
    UnsupportedDriver {
        driver: String,
    },
    #[snafu(display("network '{}' has active endpoints", name))]
    HasActiveEndpoints {
        name: String,
    },
    #[snafu(display("default network '{}' cannot be deleted", name))]
    CannotDeleteDefault {
        name: String,
    },
    #[snafu(display(
        "container {} is already connected to network {}",
        container,
        network
    ))]
    AlreadyConnected {
        container: String,
        network: String,
    },
    #[snafu(display(
        "container {} is not connected to network {}",
        container,
        network
    ))]
    NotConnected {
        container: String,
        network: String,
    },
    #[snafu(display("ip allocation failed: {}", reason))]
    IPAllocationFailed {
        reason: String,
    },
    #[snafu(display("address {} is already in use", ip))]
    IpAlreadyInUse {
        ip: String,
    },
    #[snafu(display("invalid ip address '{}'", ip))]
    InvalidIPAddress {
        ip: String,
    },
    #[snafu(display(
        "driver '{}' does not support attaching running containers",
        driver
    ))]
    DynamicAttachNotSupported {
        driver: String,
    },
    #[snafu(display("no subnet left in the auto-allocation space"))]
    NoAvailableSubnets {},
    #[snafu(display("network backend is not ready"))]
    BackendNotReady {},
    #[snafu(display("state store failure: {}", source))]
    Store {
        source: StoreError,
    },
    #[snafu(display("guest control failure: {}", source))]
    Guest {
        source: GuestError,
    },
}

pub type Result<T, E = NetworkError> = std::result::Result<T, E>;

impl From<StoreError> for NetworkError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::IpTaken {
                ip,
            } => NetworkError::IpAlreadyInUse {
                ip,
            },
            StoreError::NoFreeAddress {
                network,
            } => NetworkError::IPAllocationFailed {
                reason: format!("no free address in network {network}"),
            },
            StoreError::NameTaken {
                name, ..
            } => NetworkError::NameExists {
                name,
            },
            other => NetworkError::Store {
                source: other,
            },
        }
    }
}

/// Routing tag of a network backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverKind {
    /// WireGuard-backed overlay; the Docker-facing name is `bridge`.
    Bridge,
    /// Native host NAT, attach at VM creation time only.
    Vmnet,
    /// Loopback only.
    Null,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::Bridge => "bridge",
            DriverKind::Vmnet => "vmnet",
            DriverKind::Null => "null",
        }
    }
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "default" | "bridge" | "wireguard" => Ok(DriverKind::Bridge),
            "vmnet" => Ok(DriverKind::Vmnet),
            "null" => Ok(DriverKind::Null),
            other => Err(other.to_string()),
        }
    }
}

/// Persisted network object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    /// 64-char hex id.
    pub id: String,
    pub name: String,
    pub driver: DriverKind,
    /// CIDR; empty for the null driver.
    pub subnet: String,
    pub gateway: String,
    /// Optional sub-CIDR constraining allocation.
    pub ip_range: Option<String>,
    pub options: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl NetworkRecord {
    /// Shortened id for log lines.
    pub fn short_id(&self) -> &str {
        &self.id[.. 12.min(self.id.len())]
    }
}

/// Options for `createNetwork`.
#[derive(Debug, Clone, Default)]
pub struct CreateNetworkOpts {
    pub name: String,
    pub driver: String,
    /// CIDR; auto-allocated when empty.
    pub subnet: String,
    pub gateway: String,
    pub ip_range: Option<String>,
    pub options: HashMap<String, String>,
    pub labels: HashMap<String, String>,
}
