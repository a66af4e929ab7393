//! gRPC clients to the in-guest control-plane services. The transport is
//! vsock, surfaced on the host as one unix socket per (VM, guest port) by
//! the VM layer; tonic dials through a connector that opens that socket.
//!
//! Calls to unreachable guests time out and come back classified, never
//! hang: callers running best-effort reconciliation decide whether to
//! swallow or surface them.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use snafu::Snafu;
use tokio::net::UnixStream;
use tonic::{
    transport::{Channel, Endpoint, Uri},
    Code,
};
use tower::service_fn;

use arca_guest_api::v1::{
    AddNetworkRequest,
    AddNetworkResponse,
    AddPeerRequest,
    DumpNftablesRequest,
    GetVmnetEndpointRequest,
    ListProcessesRequest,
    PublishPortRequest,
    RemoveNetworkRequest,
    RemovePeerRequest,
    SyncFilesystemRequest,
    UnpublishPortRequest,
};
use arca_guest_api::{ProcessListClient, WireGuardClient};

use crate::vm::ContainerVm;

/// Guest vsock port of the WireGuard/vminit service.
pub const WIREGUARD_VSOCK_PORT: u32 = 51820;
/// Guest vsock port of the process-list service.
pub const PROCESS_LIST_VSOCK_PORT: u32 = 51822;

/// Default timeout for dialling a guest and for each RPC.
pub const DEFAULT_GUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum GuestError {
    #[snafu(display("guest {} is unreachable: {}", native_id, source))]
    Unreachable {
        native_id: String,
        source: tonic::transport::Error,
    },
    #[snafu(display("guest {} call timed out: {}", native_id, what))]
    Timeout {
        native_id: String,
        what: String,
    },
    #[snafu(display("guest {} rpc failed: {}", native_id, source))]
    Rpc {
        native_id: String,
        source: tonic::Status,
    },
}

pub type Result<T, E = GuestError> = std::result::Result<T, E>;

fn classify(native_id: &str, what: &str, status: tonic::Status) -> GuestError {
    match status.code() {
        Code::DeadlineExceeded | Code::Cancelled => GuestError::Timeout {
            native_id: native_id.to_string(),
            what: what.to_string(),
        },
        _ => GuestError::Rpc {
            native_id: native_id.to_string(),
            source: status,
        },
    }
}

/// Typed access to the guest services, seam for tests.
#[async_trait]
pub trait GuestGateway: Send + Sync {
    async fn add_network(
        &self,
        vm: &dyn ContainerVm,
        req: AddNetworkRequest,
    ) -> Result<AddNetworkResponse>;

    async fn remove_network(
        &self,
        vm: &dyn ContainerVm,
        req: RemoveNetworkRequest,
    ) -> Result<()>;

    async fn add_peer(
        &self,
        vm: &dyn ContainerVm,
        req: AddPeerRequest,
    ) -> Result<()>;

    async fn remove_peer(
        &self,
        vm: &dyn ContainerVm,
        req: RemovePeerRequest,
    ) -> Result<()>;

    /// The guest's externally reachable "ip:port" for WireGuard UDP.
    async fn vmnet_endpoint(&self, vm: &dyn ContainerVm) -> Result<String>;

    async fn publish_port(
        &self,
        vm: &dyn ContainerVm,
        req: PublishPortRequest,
    ) -> Result<()>;

    async fn unpublish_port(
        &self,
        vm: &dyn ContainerVm,
        req: UnpublishPortRequest,
    ) -> Result<()>;

    /// Flush guest filesystem buffers before the host reads the rootfs.
    async fn sync_filesystem(&self, vm: &dyn ContainerVm) -> Result<()>;

    /// Diagnostic dump of the in-guest nftables ruleset.
    async fn dump_nftables(&self, vm: &dyn ContainerVm) -> Result<String>;

    /// (titles, process rows) straight from the guest's /proc.
    async fn list_processes(
        &self,
        vm: &dyn ContainerVm,
        ps_args: &str,
    ) -> Result<(Vec<String>, Vec<Vec<String>>)>;
}

/// Production gateway: tonic over the per-VM vsock bridge sockets. A
/// fresh channel is dialled per call; control-plane traffic is sparse
/// and reconnecting keeps stale sockets from lingering across VM
/// restarts.
pub struct TonicGuestGateway {
    timeout: Duration,
}

impl Default for TonicGuestGateway {
    fn default() -> Self {
        TonicGuestGateway {
            timeout: DEFAULT_GUEST_TIMEOUT,
        }
    }
}

impl TonicGuestGateway {
    pub fn new(timeout: Duration) -> Arc<TonicGuestGateway> {
        Arc::new(TonicGuestGateway { timeout })
    }

    async fn channel(&self, vm: &dyn ContainerVm, port: u32) -> Result<Channel> {
        let socket = vm.control_socket(port);
        let native_id = vm.native_id().to_string();
        // The authority is ignored; the connector below dials the unix
        // socket bridging the guest vsock port.
        Endpoint::try_from("http://[::]:50051")
            .expect("static endpoint uri is valid")
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .connect_with_connector(service_fn(move |_: Uri| {
                UnixStream::connect(socket.clone())
            }))
            .await
            .map_err(|e| GuestError::Unreachable {
                native_id,
                source: e,
            })
    }

    async fn wireguard(
        &self,
        vm: &dyn ContainerVm,
    ) -> Result<WireGuardClient<Channel>> {
        Ok(WireGuardClient::new(
            self.channel(vm, WIREGUARD_VSOCK_PORT).await?,
        ))
    }
}

#[async_trait]
impl GuestGateway for TonicGuestGateway {
    async fn add_network(
        &self,
        vm: &dyn ContainerVm,
        req: AddNetworkRequest,
    ) -> Result<AddNetworkResponse> {
        let mut client = self.wireguard(vm).await?;
        client
            .add_network(req)
            .await
            .map(|r| r.into_inner())
            .map_err(|s| classify(vm.native_id().as_str(), "AddNetwork", s))
    }

    async fn remove_network(
        &self,
        vm: &dyn ContainerVm,
        req: RemoveNetworkRequest,
    ) -> Result<()> {
        let mut client = self.wireguard(vm).await?;
        client
            .remove_network(req)
            .await
            .map(|_| ())
            .map_err(|s| classify(vm.native_id().as_str(), "RemoveNetwork", s))
    }

    async fn add_peer(
        &self,
        vm: &dyn ContainerVm,
        req: AddPeerRequest,
    ) -> Result<()> {
        let mut client = self.wireguard(vm).await?;
        client
            .add_peer(req)
            .await
            .map(|_| ())
            .map_err(|s| classify(vm.native_id().as_str(), "AddPeer", s))
    }

    async fn remove_peer(
        &self,
        vm: &dyn ContainerVm,
        req: RemovePeerRequest,
    ) -> Result<()> {
        let mut client = self.wireguard(vm).await?;
        client
            .remove_peer(req)
            .await
            .map(|_| ())
            .map_err(|s| classify(vm.native_id().as_str(), "RemovePeer", s))
    }

    async fn vmnet_endpoint(&self, vm: &dyn ContainerVm) -> Result<String> {
        let mut client = self.wireguard(vm).await?;
        client
            .get_vmnet_endpoint(GetVmnetEndpointRequest {})
            .await
            .map(|r| r.into_inner().endpoint)
            .map_err(|s| {
                classify(vm.native_id().as_str(), "GetVmnetEndpoint", s)
            })
    }

    async fn publish_port(
        &self,
        vm: &dyn ContainerVm,
        req: PublishPortRequest,
    ) -> Result<()> {
        let mut client = self.wireguard(vm).await?;
        client
            .publish_port(req)
            .await
            .map(|_| ())
            .map_err(|s| classify(vm.native_id().as_str(), "PublishPort", s))
    }

    async fn unpublish_port(
        &self,
        vm: &dyn ContainerVm,
        req: UnpublishPortRequest,
    ) -> Result<()> {
        let mut client = self.wireguard(vm).await?;
        client
            .unpublish_port(req)
            .await
            .map(|_| ())
            .map_err(|s| classify(vm.native_id().as_str(), "UnpublishPort", s))
    }

    async fn sync_filesystem(&self, vm: &dyn ContainerVm) -> Result<()> {
        let mut client = self.wireguard(vm).await?;
        client
            .sync_filesystem(SyncFilesystemRequest {})
            .await
            .map(|_| ())
            .map_err(|s| classify(vm.native_id().as_str(), "SyncFilesystem", s))
    }

    async fn dump_nftables(&self, vm: &dyn ContainerVm) -> Result<String> {
        let mut client = self.wireguard(vm).await?;
        client
            .dump_nftables(DumpNftablesRequest {})
            .await
            .map(|r| r.into_inner().ruleset)
            .map_err(|s| classify(vm.native_id().as_str(), "DumpNftables", s))
    }

    async fn list_processes(
        &self,
        vm: &dyn ContainerVm,
        ps_args: &str,
    ) -> Result<(Vec<String>, Vec<Vec<String>>)> {
        let channel = self.channel(vm, PROCESS_LIST_VSOCK_PORT).await?;
        let mut client = ProcessListClient::new(channel);
        let reply = client
            .list_processes(ListProcessesRequest {
                ps_args: ps_args.to_string(),
            })
            .await
            .map_err(|s| classify(vm.native_id().as_str(), "ListProcesses", s))?
            .into_inner();
        Ok((
            reply.titles,
            reply.processes.into_iter().map(|row| row.cells).collect(),
        ))
    }
}
