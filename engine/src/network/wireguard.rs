//! The WireGuard backend. Every member of a network gets a dedicated
//! wgN/ethN pair in its own guest — a per-container hub — and the mesh
//! is kept converged by installing every member as a peer on every
//! other. Keys and interface indices are ephemeral runtime state: a
//! restarted container re-joins with fresh keys but the same address and
//! the same index, both remembered by the attachment row.
//!
//! Mesh maintenance is best-effort. An unreachable peer is logged and
//! skipped; it converges again on its own next state-changing event.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use async_trait::async_trait;

use arca_guest_api::v1::{
    AddNetworkRequest,
    AddPeerRequest,
    RemoveNetworkRequest,
    RemovePeerRequest,
};

use super::{
    driver::{AttachOutcome, AttachRequest, DetachRequest, NetworkDriver},
    hostip,
    ipam::{deterministic_mac, generate_wireguard_key, SubnetPlan},
    DriverKind,
    NetworkError,
    NetworkRecord,
    Result,
};
use crate::{
    core::Attachment,
    guest::GuestGateway,
    store::{AllocateAttachment, AttachmentRecord, StateStore},
    vm::{ContainerVm, VmRegistry},
};

/// UDP listen port of a hub's first interface; wgN listens on base + N.
const WIREGUARD_UDP_BASE_PORT: u32 = 51820;

/// Ephemeral hub state of one (container, network) membership.
#[derive(Debug, Clone)]
struct HubState {
    public_key: String,
    index: u32,
}

pub struct WireGuardDriver {
    store: Arc<StateStore>,
    vms: Arc<VmRegistry>,
    gateway: Arc<dyn GuestGateway>,
    /// Keyed by (container id, network id); never persisted.
    hubs: Mutex<HashMap<(String, String), HubState>>,
}

impl WireGuardDriver {
    pub fn new(
        store: Arc<StateStore>,
        vms: Arc<VmRegistry>,
        gateway: Arc<dyn GuestGateway>,
    ) -> Arc<WireGuardDriver> {
        Arc::new(WireGuardDriver {
            store,
            vms,
            gateway,
            hubs: Mutex::new(HashMap::new()),
        })
    }

    fn hub_of(&self, container_id: &str, network_id: &str) -> Option<HubState> {
        self.hubs
            .lock()
            .get(&(container_id.to_string(), network_id.to_string()))
            .cloned()
    }

    async fn container_name(&self, container_id: &str) -> String {
        match self.store.get_container(container_id).await {
            Ok(Some(c)) => c.name,
            _ => String::new(),
        }
    }

    /// Best-effort endpoint lookup; an unreachable guest yields an
    /// empty endpoint and the peer entry is still installed so DNS
    /// converges.
    async fn endpoint_of(&self, vm: &dyn ContainerVm) -> String {
        match self.gateway.vmnet_endpoint(vm).await {
            Ok(endpoint) => endpoint,
            Err(error) => {
                warn!(
                    guest = %vm.native_id(),
                    %error,
                    "failed to fetch vmnet endpoint"
                );
                String::new()
            }
        }
    }

    /// Install `peer` (with its hub key/endpoint) on `target`.
    async fn install_peer(
        &self,
        target_vm: &dyn ContainerVm,
        target_index: u32,
        network: &NetworkRecord,
        peer: &AttachmentRecord,
        peer_key: &str,
        peer_endpoint: &str,
        peer_name: &str,
    ) {
        let request = AddPeerRequest {
            network_id: network.id.clone(),
            network_index: target_index,
            peer_public_key: peer_key.to_string(),
            peer_endpoint: peer_endpoint.to_string(),
            peer_ip: peer.ip.to_string(),
            peer_name: peer_name.to_string(),
            peer_container_id: peer.container_id.clone(),
            peer_aliases: peer.aliases.clone(),
        };
        if let Err(error) =
            self.gateway.add_peer(target_vm, request).await
        {
            warn!(
                network = network.short_id(),
                target = %target_vm.native_id(),
                peer = &peer.container_id[.. 12.min(peer.container_id.len())],
                %error,
                "failed to install peer, mesh will reconverge"
            );
        }
    }

    fn view(
        network: &NetworkRecord,
        record: &AttachmentRecord,
    ) -> Attachment {
        Attachment {
            network_id: network.id.clone(),
            network_name: network.name.clone(),
            ip: record.ip.to_string(),
            mac: record.mac.clone(),
            gateway: network.gateway.clone(),
            subnet: network.subnet.clone(),
            aliases: record.aliases.clone(),
            index: record.index,
        }
    }
}

#[async_trait]
impl NetworkDriver for WireGuardDriver {
    fn kind(&self) -> DriverKind {
        DriverKind::Bridge
    }

    async fn create(&self, network: &NetworkRecord) -> Result<()> {
        // hubs are created lazily when the first container joins
        debug!(network = network.short_id(), "wireguard network created");
        Ok(())
    }

    async fn delete(&self, network: &NetworkRecord) -> Result<()> {
        let network_id = network.id.clone();
        self.hubs.lock().retain(|(_, net), _| *net != network_id);
        Ok(())
    }

    async fn attach(
        &self,
        network: &NetworkRecord,
        request: AttachRequest,
    ) -> Result<AttachOutcome> {
        let plan = SubnetPlan::for_network(network)?;
        let requested = match request.requested_ip {
            Some(ip) => Some(plan.validate_static(ip)?),
            None => None,
        };

        let mut aliases = request.aliases.clone();
        if !request.container_name.is_empty()
            && !aliases.contains(&request.container_name)
        {
            aliases.push(request.container_name.clone());
        }

        let (record, created) = self
            .store
            .allocate_attachment(AllocateAttachment {
                network_id: network.id.clone(),
                container_id: request.container_id.clone(),
                mac: deterministic_mac(&request.container_id, &network.id),
                aliases,
                range_start: plan.range_start,
                range_end: plan.range_end,
                gateway: u32::from(plan.gateway),
                requested,
            })
            .await?;

        if !created {
            // Reconnect: the same (container, network, ip) is accepted,
            // asking for a different static ip while attached is not.
            if let Some(want) = requested {
                if u32::from(record.ip) != want {
                    return Err(NetworkError::AlreadyConnected {
                        container: request.container_id.clone(),
                        network: network.name.clone(),
                    });
                }
            }
        }

        let Some(vm) = request.vm else {
            // Database-only restore; the guest joins when it starts.
            return Ok(Self::view(network, &record));
        };

        let private_key = generate_wireguard_key();
        let host_ip = hostip::host_ipv4()
            .map(|ip| ip.to_string())
            .unwrap_or_default();
        let response = self
            .gateway
            .add_network(
                vm.as_ref(),
                AddNetworkRequest {
                    network_id: network.id.clone(),
                    network_index: record.index,
                    private_key,
                    listen_port: WIREGUARD_UDP_BASE_PORT + record.index,
                    peer_endpoint: String::new(),
                    peer_public_key: String::new(),
                    ip: record.ip.to_string(),
                    cidr: network.subnet.clone(),
                    gateway: network.gateway.clone(),
                    host_ip,
                    extra_hosts: hostip::resolve_extra_hosts(
                        &request.extra_hosts,
                    ),
                },
            )
            .await
            .map_err(|source| NetworkError::Guest { source })?;

        info!(
            network = network.short_id(),
            container = &request.container_id[.. 12],
            ip = %record.ip,
            interface = %response.wireguard_interface,
            "joined wireguard network"
        );

        self.hubs.lock().insert(
            (request.container_id.clone(), network.id.clone()),
            HubState {
                public_key: response.public_key.clone(),
                index: record.index,
            },
        );

        let own_endpoint = self.endpoint_of(vm.as_ref()).await;
        let own_name = request.container_name.clone();

        // Walk the other members; every reachable peer learns about us
        // and we learn about it.
        let peers = self
            .store
            .attachments_for_network(&network.id)
            .await
            .map_err(NetworkError::from)?;
        for peer in peers
            .iter()
            .filter(|p| p.container_id != request.container_id)
        {
            let Some(peer_vm) = self.vms.get(&peer.container_id) else {
                debug!(
                    peer = &peer.container_id[.. 12],
                    "peer has no live vm, skipping"
                );
                continue;
            };
            let Some(peer_hub) =
                self.hub_of(&peer.container_id, &network.id)
            else {
                debug!(
                    peer = &peer.container_id[.. 12],
                    "peer hub not established yet, skipping"
                );
                continue;
            };
            let peer_endpoint = self.endpoint_of(peer_vm.as_ref()).await;
            let peer_name = self.container_name(&peer.container_id).await;

            self.install_peer(
                peer_vm.as_ref(),
                peer_hub.index,
                network,
                &record,
                &response.public_key,
                &own_endpoint,
                &own_name,
            )
            .await;
            self.install_peer(
                vm.as_ref(),
                record.index,
                network,
                peer,
                &peer_hub.public_key,
                &peer_endpoint,
                &peer_name,
            )
            .await;
        }

        Ok(Self::view(network, &record))
    }

    async fn detach(
        &self,
        network: &NetworkRecord,
        request: DetachRequest,
    ) -> Result<()> {
        let record = self
            .store
            .get_attachment(&network.id, &request.container_id)
            .await
            .map_err(NetworkError::from)?;
        let Some(record) = record else {
            return Ok(());
        };

        let hub = self
            .hubs
            .lock()
            .remove(&(request.container_id.clone(), network.id.clone()));
        let public_key =
            hub.as_ref().map(|h| h.public_key.clone()).unwrap_or_default();

        // Remove us from every reachable member first, then tear our
        // interfaces down. An unreachable target loses them with its VM.
        let peers = self
            .store
            .attachments_for_network(&network.id)
            .await
            .map_err(NetworkError::from)?;
        for peer in peers
            .iter()
            .filter(|p| p.container_id != request.container_id)
        {
            let Some(peer_vm) = self.vms.get(&peer.container_id) else {
                continue;
            };
            let Some(peer_hub) =
                self.hub_of(&peer.container_id, &network.id)
            else {
                continue;
            };
            if let Err(error) = self
                .gateway
                .remove_peer(
                    peer_vm.as_ref(),
                    RemovePeerRequest {
                        network_id: network.id.clone(),
                        network_index: peer_hub.index,
                        peer_public_key: public_key.clone(),
                        peer_container_id: request.container_id.clone(),
                        peer_name: request.container_name.clone(),
                    },
                )
                .await
            {
                warn!(
                    network = network.short_id(),
                    peer = &peer.container_id[.. 12],
                    %error,
                    "failed to remove peer entry"
                );
            }
        }

        if let Some(vm) = &request.vm {
            if let Err(error) = self
                .gateway
                .remove_network(
                    vm.as_ref(),
                    RemoveNetworkRequest {
                        network_id: network.id.clone(),
                        network_index: record.index,
                    },
                )
                .await
            {
                warn!(
                    network = network.short_id(),
                    container = &request.container_id[.. 12],
                    %error,
                    "failed to tear down wireguard interfaces"
                );
            }
        }

        if request.release_address {
            self.store
                .delete_attachment(&network.id, &request.container_id)
                .await
                .map_err(NetworkError::from)?;
        }
        Ok(())
    }

    /// Re-announce every member to every other reachable member.
    async fn push_dns(&self, network: &NetworkRecord) -> Result<()> {
        let members = self
            .store
            .attachments_for_network(&network.id)
            .await
            .map_err(NetworkError::from)?;
        for target in &members {
            let Some(target_vm) = self.vms.get(&target.container_id) else {
                continue;
            };
            let Some(target_hub) =
                self.hub_of(&target.container_id, &network.id)
            else {
                continue;
            };
            for peer in members
                .iter()
                .filter(|p| p.container_id != target.container_id)
            {
                let Some(peer_hub) =
                    self.hub_of(&peer.container_id, &network.id)
                else {
                    continue;
                };
                let peer_endpoint = match self.vms.get(&peer.container_id) {
                    Some(peer_vm) => {
                        self.endpoint_of(peer_vm.as_ref()).await
                    }
                    None => String::new(),
                };
                let peer_name =
                    self.container_name(&peer.container_id).await;
                self.install_peer(
                    target_vm.as_ref(),
                    target_hub.index,
                    network,
                    peer,
                    &peer_hub.public_key,
                    &peer_endpoint,
                    &peer_name,
                )
                .await;
            }
        }
        Ok(())
    }
}
