//! Host IPv4 detection. The primary interface (`en0` on the mac hosts we
//! run on) is preferred; the first non-loopback IPv4 is the fallback.
//! The answer is cached for the daemon's lifetime and backs
//! `host.docker.internal` and `host-gateway` resolution in the guests.

use std::net::Ipv4Addr;

use nix::ifaddrs::getifaddrs;
use once_cell::sync::Lazy;

const PRIMARY_INTERFACE: &str = "en0";
const HOST_GATEWAY_TOKEN: &str = "host-gateway";

static HOST_IPV4: Lazy<Option<Ipv4Addr>> = Lazy::new(detect);

fn detect() -> Option<Ipv4Addr> {
    let addrs = match getifaddrs() {
        Ok(addrs) => addrs,
        Err(error) => {
            warn!(%error, "failed to enumerate host interfaces");
            return None;
        }
    };
    let mut fallback = None;
    for ifaddr in addrs {
        let Some(storage) = ifaddr.address else {
            continue;
        };
        let Some(sin) = storage.as_sockaddr_in() else {
            continue;
        };
        let ip = Ipv4Addr::from(sin.ip());
        if ip.is_loopback() {
            continue;
        }
        if ifaddr.interface_name == PRIMARY_INTERFACE {
            return Some(ip);
        }
        if fallback.is_none() {
            fallback = Some(ip);
        }
    }
    fallback
}

/// The host's primary IPv4, if any.
pub fn host_ipv4() -> Option<Ipv4Addr> {
    *HOST_IPV4
}

/// Expand `host-gateway` tokens in `host:ip` records. Records that
/// cannot be resolved are dropped with a warning rather than handed to
/// the guest resolver broken.
pub fn resolve_extra_hosts(extra_hosts: &[String]) -> Vec<String> {
    extra_hosts
        .iter()
        .filter_map(|entry| {
            let Some((host, value)) = entry.rsplit_once(':') else {
                warn!(%entry, "ignoring malformed extra host");
                return None;
            };
            if value != HOST_GATEWAY_TOKEN {
                return Some(entry.clone());
            }
            match host_ipv4() {
                Some(ip) => Some(format!("{host}:{ip}")),
                None => {
                    warn!(%entry, "cannot resolve host-gateway, no host ip");
                    None
                }
            }
        })
        .collect()
}
