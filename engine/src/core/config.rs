//! Create/update request shapes and their validation rules.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{
    container::{HealthConfig, HostConfig, RestartPolicy},
    Error,
    Result,
};
use crate::image::ImageRuntimeConfig;

static NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^/?[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap());

/// A container create request, after the HTTP front-end has translated
/// the wire payload.
#[derive(Debug, Clone, Default)]
pub struct CreateOpts {
    pub name: Option<String>,
    pub image: String,
    pub platform: String,
    /// `None` inherits the image default; `Some(vec![])` clears it.
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub env: Vec<String>,
    pub working_dir: String,
    pub user: String,
    pub group_add: Vec<String>,
    pub tty: bool,
    pub attach_stdin: bool,
    pub attach_stdout: bool,
    pub attach_stderr: bool,
    pub open_stdin: bool,
    pub labels: HashMap<String, String>,
    pub healthcheck: Option<HealthConfig>,
    /// Destinations that get an anonymous volume each.
    pub volumes: Vec<String>,
    pub host: HostConfig,
}

impl CreateOpts {
    /// Interactive stdio defers VM creation to the first `start`.
    pub fn wants_deferred_create(&self) -> bool {
        (self.attach_stdin || self.attach_stdout || self.attach_stderr)
            && self.open_stdin
    }
}

/// Validate a container or network object name.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidParameter {
            reason: format!(
                "invalid name '{name}': must match [a-zA-Z0-9][a-zA-Z0-9_.-]*"
            ),
        })
    }
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidParameter {
        reason: reason.into(),
    }
}

/// The resource-limit validation table, shared by create and update.
pub fn validate_host_config(hc: &HostConfig) -> Result<()> {
    if hc.memory < 0 {
        return Err(invalid("memory limit must be non-negative"));
    }
    if hc.memory_reservation < 0 {
        return Err(invalid("memory reservation must be non-negative"));
    }
    if hc.memory > 0
        && hc.memory_reservation > 0
        && hc.memory_reservation > hc.memory
    {
        return Err(invalid(
            "memory reservation must not exceed the memory limit",
        ));
    }
    match hc.memory_swap {
        // -1 is unlimited, 0 leaves the driver default.
        -1 | 0 => {}
        swap if swap < -1 => {
            return Err(invalid("memory swap must be -1, 0 or positive"));
        }
        swap => {
            if hc.memory == 0 {
                return Err(invalid(
                    "memory limit is required when memory swap is set",
                ));
            }
            if swap < hc.memory {
                return Err(invalid(
                    "memory swap must be at least the memory limit",
                ));
            }
        }
    }
    if !(-1 ..= 100).contains(&hc.memory_swappiness) {
        return Err(invalid("memory swappiness must be in [-1, 100]"));
    }
    if hc.nano_cpus < 0
        || hc.cpu_shares < 0
        || hc.cpu_period < 0
        || hc.cpu_quota < 0
    {
        return Err(invalid("cpu limits must be non-negative"));
    }
    validate_cpuset(&hc.cpuset_cpus, "cpuset-cpus")?;
    validate_cpuset(&hc.cpuset_mems, "cpuset-mems")?;
    Ok(())
}

fn validate_cpuset(value: &str, what: &str) -> Result<()> {
    if value
        .chars()
        .all(|c| c.is_ascii_digit() || c == ',' || c == '-')
    {
        Ok(())
    } else {
        Err(invalid(format!(
            "{what} must contain only digits, ',' and '-'"
        )))
    }
}

/// Resolve the effective process shape against the image defaults:
/// request entrypoint/cmd override, otherwise inherit; empty working
/// directory falls back to the image and finally to "/".
pub fn effective_process(
    opts: &CreateOpts,
    image: &ImageRuntimeConfig,
) -> (Vec<String>, Vec<String>, String) {
    let entrypoint = match &opts.entrypoint {
        Some(ep) => ep.clone(),
        None => image.entrypoint.clone(),
    };
    let cmd = match &opts.cmd {
        Some(cmd) => cmd.clone(),
        None => image.cmd.clone(),
    };
    let working_dir = if !opts.working_dir.is_empty() {
        opts.working_dir.clone()
    } else if !image.working_dir.is_empty() {
        image.working_dir.clone()
    } else {
        "/".to_string()
    };
    (entrypoint, cmd, working_dir)
}

/// Merge image and request environments; the request wins per variable.
pub fn effective_env(image_env: &[String], req_env: &[String]) -> Vec<String> {
    let key_of = |entry: &str| {
        entry.split_once('=').map(|(k, _)| k.to_string()).unwrap_or_else(
            || entry.to_string(),
        )
    };
    let overridden: Vec<String> =
        req_env.iter().map(|e| key_of(e)).collect();
    let mut out: Vec<String> = image_env
        .iter()
        .filter(|e| !overridden.contains(&key_of(e)))
        .cloned()
        .collect();
    out.extend(req_env.iter().cloned());
    out
}

/// A `docker update` delta. Zero leaves a numeric field unchanged;
/// `memorySwap=-1` means unlimited and `memorySwappiness=-1` means the
/// kernel default.
#[derive(Debug, Clone, Default)]
pub struct UpdateOpts {
    pub memory: i64,
    pub memory_reservation: i64,
    pub memory_swap: i64,
    pub memory_swappiness: i64,
    pub nano_cpus: i64,
    pub cpu_shares: i64,
    pub cpu_period: i64,
    pub cpu_quota: i64,
    pub cpuset_cpus: Option<String>,
    pub cpuset_mems: Option<String>,
    pub restart_policy: Option<RestartPolicy>,
}

impl UpdateOpts {
    /// Apply the delta on top of the current host config and validate
    /// the combined result.
    pub fn merge_into(&self, hc: &mut HostConfig) -> Result<()> {
        fn merge(current: &mut i64, delta: i64) {
            if delta != 0 {
                *current = delta;
            }
        }
        merge(&mut hc.memory, self.memory);
        merge(&mut hc.memory_reservation, self.memory_reservation);
        merge(&mut hc.memory_swap, self.memory_swap);
        merge(&mut hc.memory_swappiness, self.memory_swappiness);
        merge(&mut hc.nano_cpus, self.nano_cpus);
        merge(&mut hc.cpu_shares, self.cpu_shares);
        merge(&mut hc.cpu_period, self.cpu_period);
        merge(&mut hc.cpu_quota, self.cpu_quota);
        if let Some(cpus) = &self.cpuset_cpus {
            hc.cpuset_cpus = cpus.clone();
        }
        if let Some(mems) = &self.cpuset_mems {
            hc.cpuset_mems = mems.clone();
        }
        if let Some(policy) = &self.restart_policy {
            hc.restart_policy = policy.clone();
        }
        validate_host_config(hc)
    }
}
