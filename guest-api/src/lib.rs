//! Typed gRPC surface of the arca in-guest control-plane services.
//!
//! The message definitions live in `protos/arca_guest.proto`. The modules
//! under `generated/` are produced with `tonic-build` from those protos and
//! committed, so building the workspace does not require `protoc`. Regenerate
//! with `tonic_build::configure().build_server(false)` after editing a proto.

pub mod v1 {
    include!("generated/arca.guest.v1.rs");
}

pub use v1::{
    process_list_client::ProcessListClient,
    wire_guard_client::WireGuardClient,
};
