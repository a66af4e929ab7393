//! The capability set every network backend implements. The facade
//! routes to a driver by the network's persisted tag and never inspects
//! backend internals.

use std::{net::Ipv4Addr, sync::Arc};

use async_trait::async_trait;

use super::{DriverKind, NetworkRecord, Result};
use crate::{core::Attachment, vm::ContainerVm};

/// Outcome of an attach: the populated attachment view.
pub type AttachOutcome = Attachment;

/// One container joining a network.
pub struct AttachRequest {
    pub container_id: String,
    /// Canonical name, registered in guest DNS alongside the aliases.
    pub container_name: String,
    pub aliases: Vec<String>,
    pub requested_ip: Option<Ipv4Addr>,
    pub extra_hosts: Vec<String>,
    /// Live VM of the container; `None` restores database state only.
    pub vm: Option<Arc<dyn ContainerVm>>,
}

/// One container leaving a network.
pub struct DetachRequest {
    pub container_id: String,
    pub container_name: String,
    /// Live VM, when the guest is still reachable for interface
    /// teardown.
    pub vm: Option<Arc<dyn ContainerVm>>,
    /// Drop the persisted attachment row, releasing the IP. A plain
    /// `stop` keeps the row so a restart reuses address and index.
    pub release_address: bool,
}

#[async_trait]
pub trait NetworkDriver: Send + Sync {
    fn kind(&self) -> DriverKind;

    /// Materialise backend state for a new network.
    async fn create(&self, network: &NetworkRecord) -> Result<()>;

    /// Tear down backend state of a deleted network.
    async fn delete(&self, network: &NetworkRecord) -> Result<()>;

    async fn attach(
        &self,
        network: &NetworkRecord,
        request: AttachRequest,
    ) -> Result<AttachOutcome>;

    async fn detach(
        &self,
        network: &NetworkRecord,
        request: DetachRequest,
    ) -> Result<()>;

    /// Re-announce the DNS topology of a network to every reachable
    /// member; idempotent, best-effort.
    async fn push_dns(&self, _network: &NetworkRecord) -> Result<()> {
        Ok(())
    }
}
