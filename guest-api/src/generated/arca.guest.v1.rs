#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddNetworkRequest {
    /// 64-char hex network identity.
    #[prost(string, tag = "1")]
    pub network_id: ::prost::alloc::string::String,
    /// Ordinal of this network for the container; names wgN/ethN.
    #[prost(uint32, tag = "2")]
    pub network_index: u32,
    /// Freshly generated 32-byte private key, base64.
    #[prost(string, tag = "3")]
    pub private_key: ::prost::alloc::string::String,
    /// WireGuard UDP listen port (51820 + index).
    #[prost(uint32, tag = "4")]
    pub listen_port: u32,
    /// Reserved for a static first peer; empty for hub mode.
    #[prost(string, tag = "5")]
    pub peer_endpoint: ::prost::alloc::string::String,
    #[prost(string, tag = "6")]
    pub peer_public_key: ::prost::alloc::string::String,
    /// Address assigned to ethN.
    #[prost(string, tag = "7")]
    pub ip: ::prost::alloc::string::String,
    /// Subnet in CIDR notation.
    #[prost(string, tag = "8")]
    pub cidr: ::prost::alloc::string::String,
    #[prost(string, tag = "9")]
    pub gateway: ::prost::alloc::string::String,
    /// Host primary IPv4, backs host.docker.internal.
    #[prost(string, tag = "10")]
    pub host_ip: ::prost::alloc::string::String,
    /// Additional "host:ip" records for the guest resolver.
    #[prost(string, repeated, tag = "11")]
    pub extra_hosts: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddNetworkResponse {
    /// Assigned interface names, e.g. "wg0"/"eth0".
    #[prost(string, tag = "1")]
    pub wireguard_interface: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub ethernet_interface: ::prost::alloc::string::String,
    /// Public key derived in-guest from the supplied private key, base64.
    #[prost(string, tag = "3")]
    pub public_key: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveNetworkRequest {
    #[prost(string, tag = "1")]
    pub network_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub network_index: u32,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemoveNetworkResponse {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddPeerRequest {
    #[prost(string, tag = "1")]
    pub network_id: ::prost::alloc::string::String,
    /// Index of the hub on the *receiving* container.
    #[prost(uint32, tag = "2")]
    pub network_index: u32,
    #[prost(string, tag = "3")]
    pub peer_public_key: ::prost::alloc::string::String,
    /// Peer's vmnet endpoint, "ip:port".
    #[prost(string, tag = "4")]
    pub peer_endpoint: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub peer_ip: ::prost::alloc::string::String,
    /// Canonical container name, registered in DNS.
    #[prost(string, tag = "6")]
    pub peer_name: ::prost::alloc::string::String,
    #[prost(string, tag = "7")]
    pub peer_container_id: ::prost::alloc::string::String,
    #[prost(string, repeated, tag = "8")]
    pub peer_aliases: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AddPeerResponse {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemovePeerRequest {
    #[prost(string, tag = "1")]
    pub network_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub network_index: u32,
    #[prost(string, tag = "3")]
    pub peer_public_key: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub peer_container_id: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub peer_name: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RemovePeerResponse {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStatusRequest {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct HubStatus {
    #[prost(string, tag = "1")]
    pub network_id: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub network_index: u32,
    #[prost(string, tag = "3")]
    pub wireguard_interface: ::prost::alloc::string::String,
    #[prost(string, tag = "4")]
    pub ethernet_interface: ::prost::alloc::string::String,
    #[prost(string, tag = "5")]
    pub ip: ::prost::alloc::string::String,
    #[prost(uint32, tag = "6")]
    pub peer_count: u32,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetStatusResponse {
    #[prost(message, repeated, tag = "1")]
    pub hubs: ::prost::alloc::vec::Vec<HubStatus>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetVmnetEndpointRequest {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetVmnetEndpointResponse {
    /// "ip:port" reachable from sibling guests.
    #[prost(string, tag = "1")]
    pub endpoint: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishPortRequest {
    #[prost(string, tag = "1")]
    pub protocol: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub guest_port: u32,
    #[prost(string, tag = "3")]
    pub host_ip: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub host_port: u32,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PublishPortResponse {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnpublishPortRequest {
    #[prost(string, tag = "1")]
    pub protocol: ::prost::alloc::string::String,
    #[prost(uint32, tag = "2")]
    pub guest_port: u32,
    #[prost(string, tag = "3")]
    pub host_ip: ::prost::alloc::string::String,
    #[prost(uint32, tag = "4")]
    pub host_port: u32,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UnpublishPortResponse {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncFilesystemRequest {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncFilesystemResponse {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DumpNftablesRequest {}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DumpNftablesResponse {
    #[prost(string, tag = "1")]
    pub ruleset: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListProcessesRequest {
    /// Arguments in ps(1) syntax, e.g. "-ef".
    #[prost(string, tag = "1")]
    pub ps_args: ::prost::alloc::string::String,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProcessRow {
    #[prost(string, repeated, tag = "1")]
    pub cells: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[allow(clippy::derive_partial_eq_without_eq)]
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListProcessesResponse {
    #[prost(string, repeated, tag = "1")]
    pub titles: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(message, repeated, tag = "2")]
    pub processes: ::prost::alloc::vec::Vec<ProcessRow>,
}
/// Generated client implementations.
pub mod wire_guard_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::*;
    use tonic::codegen::http::Uri;
    #[derive(Debug, Clone)]
    pub struct WireGuardClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl WireGuardClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> WireGuardClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }
        pub fn with_interceptor<F>(
            inner: T,
            interceptor: F,
        ) -> WireGuardClient<InterceptedService<T, F>>
        where
            F: tonic::service::Interceptor,
            T::ResponseBody: Default,
            T: tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
                Response = http::Response<
                    <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                >,
            >,
            <T as tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
            >>::Error: Into<StdError> + Send + Sync,
        {
            WireGuardClient::new(InterceptedService::new(inner, interceptor))
        }
        /// Compress requests with the given encoding.
        ///
        /// This requires the server to support it otherwise it might respond with an
        /// error.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.send_compressed(encoding);
            self
        }
        /// Enable decompressing responses.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.accept_compressed(encoding);
            self
        }
        /// Limits the maximum size of a decoded message.
        ///
        /// Default: `4MB`
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }
        /// Limits the maximum size of an encoded message.
        ///
        /// Default: `usize::MAX`
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_encoding_message_size(limit);
            self
        }
        /// Create the wgN/ethN interface pair for a network. The hub is created
        /// lazily on the first call for a container.
        pub async fn add_network(
            &mut self,
            request: impl tonic::IntoRequest<super::AddNetworkRequest>,
        ) -> std::result::Result<
            tonic::Response<super::AddNetworkResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/AddNetwork",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "AddNetwork"));
            self.inner.unary(req, path, codec).await
        }
        /// Tear down the wgN/ethN pair of a network.
        pub async fn remove_network(
            &mut self,
            request: impl tonic::IntoRequest<super::RemoveNetworkRequest>,
        ) -> std::result::Result<
            tonic::Response<super::RemoveNetworkResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/RemoveNetwork",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "RemoveNetwork"));
            self.inner.unary(req, path, codec).await
        }
        /// Install a peer on an existing hub and register its DNS names.
        pub async fn add_peer(
            &mut self,
            request: impl tonic::IntoRequest<super::AddPeerRequest>,
        ) -> std::result::Result<
            tonic::Response<super::AddPeerResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/AddPeer",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "AddPeer"));
            self.inner.unary(req, path, codec).await
        }
        /// Remove a peer and its DNS names.
        pub async fn remove_peer(
            &mut self,
            request: impl tonic::IntoRequest<super::RemovePeerRequest>,
        ) -> std::result::Result<
            tonic::Response<super::RemovePeerResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/RemovePeer",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "RemovePeer"));
            self.inner.unary(req, path, codec).await
        }
        /// Current hub/interface state, for diagnostics.
        pub async fn get_status(
            &mut self,
            request: impl tonic::IntoRequest<super::GetStatusRequest>,
        ) -> std::result::Result<
            tonic::Response<super::GetStatusResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/GetStatus",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "GetStatus"));
            self.inner.unary(req, path, codec).await
        }
        /// Externally reachable ip:port for WireGuard UDP traffic of this guest.
        pub async fn get_vmnet_endpoint(
            &mut self,
            request: impl tonic::IntoRequest<super::GetVmnetEndpointRequest>,
        ) -> std::result::Result<
            tonic::Response<super::GetVmnetEndpointResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/GetVmnetEndpoint",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(
                    GrpcMethod::new("arca.guest.v1.WireGuard", "GetVmnetEndpoint"),
                );
            self.inner.unary(req, path, codec).await
        }
        /// Expose a guest port on the vmnet-facing interface.
        pub async fn publish_port(
            &mut self,
            request: impl tonic::IntoRequest<super::PublishPortRequest>,
        ) -> std::result::Result<
            tonic::Response<super::PublishPortResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/PublishPort",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "PublishPort"));
            self.inner.unary(req, path, codec).await
        }
        pub async fn unpublish_port(
            &mut self,
            request: impl tonic::IntoRequest<super::UnpublishPortRequest>,
        ) -> std::result::Result<
            tonic::Response<super::UnpublishPortResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/UnpublishPort",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "UnpublishPort"));
            self.inner.unary(req, path, codec).await
        }
        /// Flush guest filesystem buffers so the host can read the rootfs image.
        pub async fn sync_filesystem(
            &mut self,
            request: impl tonic::IntoRequest<super::SyncFilesystemRequest>,
        ) -> std::result::Result<
            tonic::Response<super::SyncFilesystemResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/SyncFilesystem",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "SyncFilesystem"));
            self.inner.unary(req, path, codec).await
        }
        /// Dump the in-guest nftables ruleset, for diagnostics.
        pub async fn dump_nftables(
            &mut self,
            request: impl tonic::IntoRequest<super::DumpNftablesRequest>,
        ) -> std::result::Result<
            tonic::Response<super::DumpNftablesResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.WireGuard/DumpNftables",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.WireGuard", "DumpNftables"));
            self.inner.unary(req, path, codec).await
        }
    }
}
/// Generated client implementations.
pub mod process_list_client {
    #![allow(unused_variables, dead_code, missing_docs, clippy::let_unit_value)]
    use tonic::codegen::*;
    use tonic::codegen::http::Uri;
    #[derive(Debug, Clone)]
    pub struct ProcessListClient<T> {
        inner: tonic::client::Grpc<T>,
    }
    impl ProcessListClient<tonic::transport::Channel> {
        /// Attempt to create a new client by connecting to a given endpoint.
        pub async fn connect<D>(dst: D) -> Result<Self, tonic::transport::Error>
        where
            D: TryInto<tonic::transport::Endpoint>,
            D::Error: Into<StdError>,
        {
            let conn = tonic::transport::Endpoint::new(dst)?.connect().await?;
            Ok(Self::new(conn))
        }
    }
    impl<T> ProcessListClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError>,
        T::ResponseBody: Body<Data = Bytes> + Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + Send,
    {
        pub fn new(inner: T) -> Self {
            let inner = tonic::client::Grpc::new(inner);
            Self { inner }
        }
        pub fn with_origin(inner: T, origin: Uri) -> Self {
            let inner = tonic::client::Grpc::with_origin(inner, origin);
            Self { inner }
        }
        pub fn with_interceptor<F>(
            inner: T,
            interceptor: F,
        ) -> ProcessListClient<InterceptedService<T, F>>
        where
            F: tonic::service::Interceptor,
            T::ResponseBody: Default,
            T: tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
                Response = http::Response<
                    <T as tonic::client::GrpcService<tonic::body::BoxBody>>::ResponseBody,
                >,
            >,
            <T as tonic::codegen::Service<
                http::Request<tonic::body::BoxBody>,
            >>::Error: Into<StdError> + Send + Sync,
        {
            ProcessListClient::new(InterceptedService::new(inner, interceptor))
        }
        /// Compress requests with the given encoding.
        ///
        /// This requires the server to support it otherwise it might respond with an
        /// error.
        #[must_use]
        pub fn send_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.send_compressed(encoding);
            self
        }
        /// Enable decompressing responses.
        #[must_use]
        pub fn accept_compressed(mut self, encoding: CompressionEncoding) -> Self {
            self.inner = self.inner.accept_compressed(encoding);
            self
        }
        /// Limits the maximum size of a decoded message.
        ///
        /// Default: `4MB`
        #[must_use]
        pub fn max_decoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_decoding_message_size(limit);
            self
        }
        /// Limits the maximum size of an encoded message.
        ///
        /// Default: `usize::MAX`
        #[must_use]
        pub fn max_encoding_message_size(mut self, limit: usize) -> Self {
            self.inner = self.inner.max_encoding_message_size(limit);
            self
        }
        /// Read the guest process table directly from /proc.
        pub async fn list_processes(
            &mut self,
            request: impl tonic::IntoRequest<super::ListProcessesRequest>,
        ) -> std::result::Result<
            tonic::Response<super::ListProcessesResponse>,
            tonic::Status,
        > {
            self.inner
                .ready()
                .await
                .map_err(|e| {
                    tonic::Status::new(
                        tonic::Code::Unknown,
                        format!("Service was not ready: {}", e.into()),
                    )
                })?;
            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/arca.guest.v1.ProcessList/ListProcesses",
            );
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("arca.guest.v1.ProcessList", "ListProcesses"));
            self.inner.unary(req, path, codec).await
        }
    }
}
