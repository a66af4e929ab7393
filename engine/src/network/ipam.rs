//! Address-space math, deterministic MAC derivation and WireGuard key
//! material. The actual reserve-an-IP step is the state store's atomic
//! primitive; this module computes the ranges it works over.

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use super::{NetworkError, NetworkRecord, Result};

/// The allocatable window of a network: host addresses of the subnet,
/// narrowed by `ipRange` when present. Bounds are inclusive host-order
/// integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubnetPlan {
    pub subnet: Ipv4Network,
    pub gateway: Ipv4Addr,
    pub range_start: u32,
    pub range_end: u32,
}

fn host_range(net: &Ipv4Network) -> (u32, u32) {
    let network = u32::from(net.network());
    let broadcast = u32::from(net.broadcast());
    if net.prefix() >= 31 {
        (network, broadcast)
    } else {
        (network + 1, broadcast - 1)
    }
}

impl SubnetPlan {
    pub fn for_network(record: &NetworkRecord) -> Result<SubnetPlan> {
        let subnet: Ipv4Network =
            record.subnet.parse().map_err(|_| NetworkError::InvalidIPAddress {
                ip: record.subnet.clone(),
            })?;
        let gateway: Ipv4Addr =
            record.gateway.parse().map_err(|_| {
                NetworkError::InvalidIPAddress {
                    ip: record.gateway.clone(),
                }
            })?;
        let (range_start, range_end) = match &record.ip_range {
            Some(range) => {
                let range_net: Ipv4Network =
                    range.parse().map_err(|_| {
                        NetworkError::InvalidIPAddress {
                            ip: range.clone(),
                        }
                    })?;
                host_range(&range_net)
            }
            None => host_range(&subnet),
        };
        Ok(SubnetPlan {
            subnet,
            gateway,
            range_start,
            range_end,
        })
    }

    /// A user-supplied address must sit inside the subnet and must not
    /// be the gateway.
    pub fn validate_static(&self, ip: Ipv4Addr) -> Result<u32> {
        if !self.subnet.contains(ip) {
            return Err(NetworkError::InvalidIPAddress {
                ip: ip.to_string(),
            });
        }
        if ip == self.gateway {
            return Err(NetworkError::IpAlreadyInUse {
                ip: ip.to_string(),
            });
        }
        Ok(u32::from(ip))
    }
}

/// Stable per-(container, network) MAC in the locally administered
/// `02:` range: five bytes from a hash of both identities.
pub fn deterministic_mac(container_id: &str, network_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(container_id.as_bytes());
    hasher.update(b"/");
    hasher.update(network_id.as_bytes());
    let digest = hasher.finalize();
    format!(
        "02:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        digest[0], digest[1], digest[2], digest[3], digest[4]
    )
}

/// Fresh 32-byte WireGuard private key, base64. The public half is
/// derived in-guest; keys are ephemeral runtime state by design.
pub fn generate_wireguard_key() -> String {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    base64::encode(key)
}

/// Fresh 64-char hex network identity.
pub fn generate_network_id() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    hex::encode(raw)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::network::DriverKind;

    fn record(subnet: &str, gateway: &str, ip_range: Option<&str>) -> NetworkRecord {
        NetworkRecord {
            id: "ab".repeat(32),
            name: "net".into(),
            driver: DriverKind::Bridge,
            subnet: subnet.into(),
            gateway: gateway.into(),
            ip_range: ip_range.map(String::from),
            options: HashMap::new(),
            labels: HashMap::new(),
            is_default: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plan_covers_host_addresses() {
        let plan =
            SubnetPlan::for_network(&record("172.17.0.0/16", "172.17.0.1", None))
                .unwrap();
        assert_eq!(plan.range_start, u32::from(Ipv4Addr::new(172, 17, 0, 1)));
        assert_eq!(
            plan.range_end,
            u32::from(Ipv4Addr::new(172, 17, 255, 254))
        );
    }

    #[test]
    fn ip_range_narrows_allocation() {
        let plan = SubnetPlan::for_network(&record(
            "172.20.0.0/16",
            "172.20.0.1",
            Some("172.20.5.0/24"),
        ))
        .unwrap();
        assert_eq!(plan.range_start, u32::from(Ipv4Addr::new(172, 20, 5, 1)));
        assert_eq!(plan.range_end, u32::from(Ipv4Addr::new(172, 20, 5, 254)));
    }

    #[test]
    fn static_ip_validation() {
        let plan =
            SubnetPlan::for_network(&record("172.17.0.0/16", "172.17.0.1", None))
                .unwrap();
        assert!(plan.validate_static("172.17.0.9".parse().unwrap()).is_ok());
        assert!(matches!(
            plan.validate_static("10.0.0.9".parse().unwrap()),
            Err(NetworkError::InvalidIPAddress { .. })
        ));
        assert!(matches!(
            plan.validate_static("172.17.0.1".parse().unwrap()),
            Err(NetworkError::IpAlreadyInUse { .. })
        ));
    }

    #[test]
    fn mac_is_stable_and_locally_administered() {
        let a = deterministic_mac("c1", "n1");
        let b = deterministic_mac("c1", "n1");
        let c = deterministic_mac("c2", "n1");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("02:"));
        assert_eq!(a.len(), 17);
    }

    #[test]
    fn wireguard_keys_are_unique_base64() {
        let k1 = generate_wireguard_key();
        let k2 = generate_wireguard_key();
        assert_ne!(k1, k2);
        assert_eq!(base64::decode(&k1).unwrap().len(), 32);
    }
}
