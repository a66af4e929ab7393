//! Linux capability handling for the guest process.

use super::{Error, Result};

/// Docker's default capability set for unprivileged containers.
pub const DEFAULT_CAPABILITIES: [&str; 14] = [
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_FSETID",
    "CAP_FOWNER",
    "CAP_MKNOD",
    "CAP_NET_RAW",
    "CAP_SETGID",
    "CAP_SETUID",
    "CAP_SETFCAP",
    "CAP_SETPCAP",
    "CAP_NET_BIND_SERVICE",
    "CAP_SYS_CHROOT",
    "CAP_KILL",
    "CAP_AUDIT_WRITE",
];

/// Everything a privileged container gets.
pub const ALL_CAPABILITIES: [&str; 41] = [
    "CAP_AUDIT_CONTROL",
    "CAP_AUDIT_READ",
    "CAP_AUDIT_WRITE",
    "CAP_BLOCK_SUSPEND",
    "CAP_BPF",
    "CAP_CHECKPOINT_RESTORE",
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_KILL",
    "CAP_LEASE",
    "CAP_LINUX_IMMUTABLE",
    "CAP_MAC_ADMIN",
    "CAP_MAC_OVERRIDE",
    "CAP_MKNOD",
    "CAP_NET_ADMIN",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_RAW",
    "CAP_PERFMON",
    "CAP_SETGID",
    "CAP_SETFCAP",
    "CAP_SETPCAP",
    "CAP_SETUID",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_CHROOT",
    "CAP_SYS_MODULE",
    "CAP_SYS_NICE",
    "CAP_SYS_PACCT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_SYSLOG",
    "CAP_WAKE_ALARM",
];

/// The same final set is written to all five capability groups of the
/// guest process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitySets {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub inheritable: Vec<String>,
    pub permitted: Vec<String>,
    pub ambient: Vec<String>,
}

impl CapabilitySets {
    fn uniform(set: Vec<String>) -> Self {
        CapabilitySets {
            bounding: set.clone(),
            effective: set.clone(),
            inheritable: set.clone(),
            permitted: set.clone(),
            ambient: set,
        }
    }
}

/// Accepts `NET_ADMIN` and `CAP_NET_ADMIN` spellings, case-insensitive.
fn normalize(name: &str) -> Result<&'static str> {
    let upper = name.trim().to_ascii_uppercase();
    let full = if upper.starts_with("CAP_") {
        upper
    } else {
        format!("CAP_{upper}")
    };
    ALL_CAPABILITIES
        .iter()
        .find(|c| **c == full)
        .copied()
        .ok_or(Error::InvalidParameter {
            reason: format!("unknown capability: {name}"),
        })
}

/// Compute the final capability sets from the request. `ALL` is accepted
/// in `cap_add`/`cap_drop` the way the Docker CLI spells it.
pub fn resolve_capabilities(
    privileged: bool,
    cap_add: &[String],
    cap_drop: &[String],
) -> Result<CapabilitySets> {
    if privileged {
        return Ok(CapabilitySets::uniform(
            ALL_CAPABILITIES.iter().map(|s| s.to_string()).collect(),
        ));
    }

    let mut set: Vec<&'static str> = DEFAULT_CAPABILITIES.to_vec();

    for add in cap_add {
        if add.eq_ignore_ascii_case("ALL") {
            set = ALL_CAPABILITIES.to_vec();
            continue;
        }
        let cap = normalize(add)?;
        if !set.contains(&cap) {
            set.push(cap);
        }
    }
    for drop in cap_drop {
        if drop.eq_ignore_ascii_case("ALL") {
            set.clear();
            continue;
        }
        let cap = normalize(drop)?;
        set.retain(|c| *c != cap);
    }

    Ok(CapabilitySets::uniform(
        set.into_iter().map(|s| s.to_string()).collect(),
    ))
}
