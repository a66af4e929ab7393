//! The network facade: CRUD, id/name resolution, driver routing and the
//! container attach/detach entry points the container core calls.

use std::{
    collections::HashMap,
    net::Ipv4Addr,
    sync::Arc,
};

use chrono::Utc;
use ipnetwork::Ipv4Network;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;

use super::{
    driver::{AttachRequest, DetachRequest, NetworkDriver},
    ipam::generate_network_id,
    CreateNetworkOpts,
    DriverKind,
    NetworkError,
    NetworkRecord,
    Result,
    DEFAULT_BRIDGE_NAME,
    DEFAULT_BRIDGE_SUBNET,
    DEFAULT_HOST_NAME,
    DEFAULT_NONE_NAME,
};
use crate::{
    core::Attachment,
    store::{
        AttachmentRecord,
        StateStore,
        SUBNET_BYTE_FIRST,
        SUBNET_BYTE_LAST,
    },
    vm::{ContainerVm, VmRegistry},
};

static NET_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new("^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").unwrap());

/// One member row in `inspect network`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkEndpoint {
    pub container_name: String,
    pub ip: String,
    pub mac: String,
}

/// `inspect network` view.
#[derive(Debug, Clone)]
pub struct NetworkDetails {
    pub record: NetworkRecord,
    /// Keyed by container id.
    pub containers: HashMap<String, NetworkEndpoint>,
}

pub struct NetworkCore {
    store: Arc<StateStore>,
    vms: Arc<VmRegistry>,
    drivers: HashMap<DriverKind, Arc<dyn NetworkDriver>>,
    /// networkID -> driver tag, rebuilt from the store on startup.
    routes: RwLock<HashMap<String, DriverKind>>,
    /// Single-writer discipline for mutating operations.
    ops: tokio::sync::Mutex<()>,
}

impl NetworkCore {
    pub fn new(
        store: Arc<StateStore>,
        vms: Arc<VmRegistry>,
        drivers: Vec<Arc<dyn NetworkDriver>>,
    ) -> Arc<NetworkCore> {
        let drivers =
            drivers.into_iter().map(|d| (d.kind(), d)).collect();
        Arc::new(NetworkCore {
            store,
            vms,
            drivers,
            routes: RwLock::new(HashMap::new()),
            ops: tokio::sync::Mutex::new(()),
        })
    }

    fn driver(&self, kind: DriverKind) -> Result<&Arc<dyn NetworkDriver>> {
        self.drivers
            .get(&kind)
            .ok_or(NetworkError::BackendNotReady {})
    }

    /// O(1) dispatch through the routing table; the persisted driver
    /// column is the fallback for rows predating the table build.
    fn route(&self, network: &NetworkRecord) -> Result<&Arc<dyn NetworkDriver>> {
        let tag = self
            .routes
            .read()
            .get(&network.id)
            .copied()
            .unwrap_or(network.driver);
        self.driver(tag)
    }

    /// Build the routing table and idempotently ensure the default
    /// networks exist.
    pub async fn init(&self) -> Result<()> {
        {
            let networks = self.store.all_networks().await?;
            let mut routes = self.routes.write();
            for network in &networks {
                routes.insert(network.id.clone(), network.driver);
            }
        }

        self.ensure_default(DEFAULT_BRIDGE_NAME, DriverKind::Bridge)
            .await?;
        self.ensure_default(DEFAULT_HOST_NAME, DriverKind::Vmnet).await?;
        self.ensure_default(DEFAULT_NONE_NAME, DriverKind::Null).await?;
        Ok(())
    }

    async fn ensure_default(
        &self,
        name: &str,
        driver: DriverKind,
    ) -> Result<()> {
        if self.store.get_network_by_name(name).await?.is_some() {
            return Ok(());
        }
        let (subnet, gateway) = match driver {
            DriverKind::Bridge => {
                let net: Ipv4Network = DEFAULT_BRIDGE_SUBNET
                    .parse()
                    .expect("default subnet is valid");
                (
                    DEFAULT_BRIDGE_SUBNET.to_string(),
                    net.nth(1).expect("/16 has a gateway").to_string(),
                )
            }
            DriverKind::Vmnet => self.allocate_subnet().await?,
            DriverKind::Null => (String::new(), String::new()),
        };
        let record = NetworkRecord {
            id: generate_network_id(),
            name: name.to_string(),
            driver,
            subnet,
            gateway,
            ip_range: None,
            options: HashMap::new(),
            labels: HashMap::new(),
            is_default: true,
            created_at: Utc::now(),
        };
        self.store.insert_network(&record).await?;
        self.routes.write().insert(record.id.clone(), driver);
        self.driver(driver)?.create(&record).await?;
        info!(network = name, driver = driver.as_str(), "default network ready");
        Ok(())
    }

    /// Walk 172.{18..31}.0.0/16 from the persisted cursor, skipping
    /// bytes taken by existing networks.
    async fn allocate_subnet(&self) -> Result<(String, String)> {
        let span = (SUBNET_BYTE_LAST - SUBNET_BYTE_FIRST + 1) as u32;
        let cursor = self.store.next_subnet_byte().await?;
        let cursor = cursor.clamp(SUBNET_BYTE_FIRST, SUBNET_BYTE_LAST);

        let used: Vec<u8> = self
            .store
            .all_networks()
            .await?
            .iter()
            .filter_map(|n| n.subnet.parse::<Ipv4Network>().ok())
            .filter(|net| net.network().octets()[0] == 172)
            .map(|net| net.network().octets()[1])
            .collect();

        for step in 0 .. span {
            let byte = SUBNET_BYTE_FIRST
                + ((cursor as u32 - SUBNET_BYTE_FIRST as u32 + step) % span)
                    as u8;
            if used.contains(&byte) {
                continue;
            }
            let next = if byte >= SUBNET_BYTE_LAST {
                SUBNET_BYTE_FIRST
            } else {
                byte + 1
            };
            self.store.set_next_subnet_byte(next).await?;
            return Ok((
                format!("172.{byte}.0.0/16"),
                format!("172.{byte}.0.1"),
            ));
        }
        Err(NetworkError::NoAvailableSubnets {})
    }

    /// Resolve a network reference: exact id, then name, then unique id
    /// prefix.
    pub async fn resolve(&self, id_or_name: &str) -> Result<NetworkRecord> {
        if let Some(network) = self.store.get_network(id_or_name).await? {
            return Ok(network);
        }
        if let Some(network) =
            self.store.get_network_by_name(id_or_name).await?
        {
            return Ok(network);
        }
        let matches: Vec<NetworkRecord> = self
            .store
            .all_networks()
            .await?
            .into_iter()
            .filter(|n| n.id.starts_with(id_or_name))
            .collect();
        match matches.len() {
            0 => Err(NetworkError::NetworkNotFound {
                id: id_or_name.to_string(),
            }),
            1 => Ok(matches.into_iter().next().expect("one match")),
            _ => Err(NetworkError::AmbiguousID {
                id: id_or_name.to_string(),
            }),
        }
    }

    pub async fn create_network(
        &self,
        opts: CreateNetworkOpts,
    ) -> Result<NetworkRecord> {
        let _serialized = self.ops.lock().await;

        if !NET_NAME_RE.is_match(&opts.name) {
            return Err(NetworkError::InvalidName {
                name: opts.name.clone(),
            });
        }
        if let Some(existing) =
            self.store.get_network_by_name(&opts.name).await?
        {
            // creating a default network again is idempotent
            if existing.is_default {
                return Ok(existing);
            }
            return Err(NetworkError::NameExists {
                name: opts.name.clone(),
            });
        }

        let driver: DriverKind = opts.driver.parse().map_err(
            |driver: String| NetworkError::UnsupportedDriver { driver },
        )?;

        let (subnet, gateway) = match driver {
            DriverKind::Null => (String::new(), String::new()),
            _ if opts.subnet.is_empty() => self.allocate_subnet().await?,
            _ => {
                let net: Ipv4Network = opts.subnet.parse().map_err(|_| {
                    NetworkError::InvalidIPAddress {
                        ip: opts.subnet.clone(),
                    }
                })?;
                let gateway = if opts.gateway.is_empty() {
                    net.nth(1)
                        .ok_or_else(|| NetworkError::InvalidIPAddress {
                            ip: opts.subnet.clone(),
                        })?
                        .to_string()
                } else {
                    let gw: Ipv4Addr =
                        opts.gateway.parse().map_err(|_| {
                            NetworkError::InvalidIPAddress {
                                ip: opts.gateway.clone(),
                            }
                        })?;
                    if !net.contains(gw) {
                        return Err(NetworkError::InvalidIPAddress {
                            ip: opts.gateway.clone(),
                        });
                    }
                    gw.to_string()
                };
                (opts.subnet.clone(), gateway)
            }
        };

        let record = NetworkRecord {
            id: generate_network_id(),
            name: opts.name.clone(),
            driver,
            subnet,
            gateway,
            ip_range: opts.ip_range.clone(),
            options: opts.options.clone(),
            labels: opts.labels.clone(),
            is_default: false,
            created_at: Utc::now(),
        };
        self.store.insert_network(&record).await?;
        self.routes.write().insert(record.id.clone(), driver);
        self.driver(driver)?.create(&record).await?;
        info!(
            network = %record.name,
            id = record.short_id(),
            driver = driver.as_str(),
            subnet = %record.subnet,
            "network created"
        );
        Ok(record)
    }

    pub async fn delete_network(
        &self,
        id_or_name: &str,
        force: bool,
    ) -> Result<()> {
        let _serialized = self.ops.lock().await;

        let network = self.resolve(id_or_name).await?;
        if network.is_default {
            return Err(NetworkError::CannotDeleteDefault {
                name: network.name.clone(),
            });
        }
        let members =
            self.store.attachments_for_network(&network.id).await?;
        if !members.is_empty() && !force {
            return Err(NetworkError::HasActiveEndpoints {
                name: network.name.clone(),
            });
        }
        let driver = self.route(&network)?;
        for member in members {
            let name = self
                .container_name_of(&member.container_id)
                .await
                .unwrap_or_default();
            driver
                .detach(
                    &network,
                    DetachRequest {
                        container_id: member.container_id.clone(),
                        container_name: name,
                        vm: self.vms.get(&member.container_id),
                        release_address: true,
                    },
                )
                .await?;
        }
        driver.delete(&network).await?;
        self.store.delete_network(&network.id).await?;
        self.routes.write().remove(&network.id);
        info!(network = %network.name, id = network.short_id(), "network deleted");
        Ok(())
    }

    async fn container_name_of(&self, container_id: &str) -> Option<String> {
        self.store
            .get_container(container_id)
            .await
            .ok()
            .flatten()
            .map(|c| c.name)
    }

    pub async fn list_networks(&self) -> Result<Vec<NetworkRecord>> {
        Ok(self.store.all_networks().await?)
    }

    pub async fn inspect(&self, id_or_name: &str) -> Result<NetworkDetails> {
        let record = self.resolve(id_or_name).await?;
        let mut containers = HashMap::new();
        for member in
            self.store.attachments_for_network(&record.id).await?
        {
            containers.insert(
                member.container_id.clone(),
                NetworkEndpoint {
                    container_name: self
                        .container_name_of(&member.container_id)
                        .await
                        .unwrap_or_default(),
                    ip: member.ip.to_string(),
                    mac: member.mac.clone(),
                },
            );
        }
        Ok(NetworkDetails {
            record,
            containers,
        })
    }

    /// `docker network connect`: dynamic attach of a container. Fails
    /// when the pair is already connected.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        &self,
        id_or_name: &str,
        container_id: &str,
        container_name: &str,
        aliases: Vec<String>,
        requested_ip: Option<Ipv4Addr>,
        extra_hosts: Vec<String>,
        vm: Option<Arc<dyn ContainerVm>>,
    ) -> Result<Attachment> {
        let _serialized = self.ops.lock().await;

        let network = self.resolve(id_or_name).await?;
        if self
            .store
            .get_attachment(&network.id, container_id)
            .await?
            .is_some()
        {
            return Err(NetworkError::AlreadyConnected {
                container: container_id.to_string(),
                network: network.name.clone(),
            });
        }
        self.route(&network)?
            .attach(
                &network,
                AttachRequest {
                    container_id: container_id.to_string(),
                    container_name: container_name.to_string(),
                    aliases,
                    requested_ip,
                    extra_hosts,
                    vm,
                },
            )
            .await
    }

    /// Attach during `start`: restores a persisted attachment (same IP,
    /// same index) or allocates a fresh one.
    #[allow(clippy::too_many_arguments)]
    pub async fn attach_for_start(
        &self,
        id_or_name: &str,
        container_id: &str,
        container_name: &str,
        aliases: Vec<String>,
        requested_ip: Option<Ipv4Addr>,
        extra_hosts: Vec<String>,
        vm: Arc<dyn ContainerVm>,
    ) -> Result<Attachment> {
        let _serialized = self.ops.lock().await;

        let network = self.resolve(id_or_name).await?;
        self.route(&network)?
            .attach(
                &network,
                AttachRequest {
                    container_id: container_id.to_string(),
                    container_name: container_name.to_string(),
                    aliases,
                    requested_ip,
                    extra_hosts,
                    vm: Some(vm),
                },
            )
            .await
    }

    /// `docker network disconnect`.
    pub async fn disconnect(
        &self,
        id_or_name: &str,
        container_id: &str,
        container_name: &str,
    ) -> Result<()> {
        let _serialized = self.ops.lock().await;

        let network = self.resolve(id_or_name).await?;
        if self
            .store
            .get_attachment(&network.id, container_id)
            .await?
            .is_none()
        {
            return Err(NetworkError::NotConnected {
                container: container_id.to_string(),
                network: network.name.clone(),
            });
        }
        self.route(&network)?
            .detach(
                &network,
                DetachRequest {
                    container_id: container_id.to_string(),
                    container_name: container_name.to_string(),
                    vm: self.vms.get(container_id),
                    release_address: true,
                },
            )
            .await
    }

    /// Tear down runtime network state of a stopping container; the
    /// persisted attachments survive so a restart reuses address and
    /// index.
    pub async fn detach_runtime(
        &self,
        container_id: &str,
        container_name: &str,
    ) -> Result<()> {
        let _serialized = self.ops.lock().await;
        self.detach_each(container_id, container_name, false).await
    }

    /// Remove every attachment of a container, database rows included;
    /// used by `remove`. Works database-only when no VM is live.
    pub async fn detach_all(
        &self,
        container_id: &str,
        container_name: &str,
    ) -> Result<()> {
        let _serialized = self.ops.lock().await;
        self.detach_each(container_id, container_name, true).await
    }

    async fn detach_each(
        &self,
        container_id: &str,
        container_name: &str,
        release_address: bool,
    ) -> Result<()> {
        for attachment in
            self.store.attachments_for_container(container_id).await?
        {
            let Some(network) =
                self.store.get_network(&attachment.network_id).await?
            else {
                continue;
            };
            self.route(&network)?
                .detach(
                    &network,
                    DetachRequest {
                        container_id: container_id.to_string(),
                        container_name: container_name.to_string(),
                        vm: self.vms.get(container_id),
                        release_address,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Persisted attachments of a container with their networks, index
    /// order.
    pub async fn attachments_of(
        &self,
        container_id: &str,
    ) -> Result<Vec<(NetworkRecord, AttachmentRecord)>> {
        let mut out = Vec::new();
        for attachment in
            self.store.attachments_for_container(container_id).await?
        {
            if let Some(network) =
                self.store.get_network(&attachment.network_id).await?
            {
                out.push((network, attachment));
            }
        }
        Ok(out)
    }

    /// Re-announce DNS topology on every network the container sits on.
    /// Idempotent and best-effort.
    pub async fn push_dns_for_container(&self, container_id: &str) {
        let attachments = match self
            .store
            .attachments_for_container(container_id)
            .await
        {
            Ok(attachments) => attachments,
            Err(error) => {
                warn!(%error, "failed to load attachments for dns push");
                return;
            }
        };
        for attachment in attachments {
            if let Err(error) =
                self.push_dns_topology(&attachment.network_id).await
            {
                warn!(
                    network = &attachment.network_id[.. 12],
                    %error,
                    "dns topology push failed"
                );
            }
        }
    }

    /// Re-announce the topology of one network.
    pub async fn push_dns_topology(&self, id_or_name: &str) -> Result<()> {
        let network = self.resolve(id_or_name).await?;
        self.route(&network)?.push_dns(&network).await
    }
}
