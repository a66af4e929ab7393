//! Network CRUD, the WireGuard mesh protocol, and driver routing.

pub mod common;

use assert_matches::assert_matches;

use arca_engine::network::{CreateNetworkOpts, NetworkError};
use common::{FakeGateway, GuestCall, TestHarness};

#[tokio::test]
async fn default_networks_exist_and_are_idempotent() {
    let h = TestHarness::new().await;
    let names: Vec<String> = h
        .network
        .list_networks()
        .await
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    for expected in ["bridge", "host", "none"] {
        assert!(names.contains(&expected.to_string()), "missing {expected}");
    }

    let bridge = h.network.resolve("bridge").await.unwrap();
    assert_eq!(bridge.subnet, "172.17.0.0/16");
    assert_eq!(bridge.gateway, "172.17.0.1");
    assert!(bridge.is_default);

    // re-creating a default network hands back the existing one
    let again = h
        .network
        .create_network(CreateNetworkOpts {
            name: "bridge".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(again.id, bridge.id);

    // a second init must not duplicate anything either
    h.network.init().await.unwrap();
    assert_eq!(h.network.list_networks().await.unwrap().len(), 3);
}

#[tokio::test]
async fn default_networks_cannot_be_deleted() {
    let h = TestHarness::new().await;
    for name in ["bridge", "host", "none"] {
        assert_matches!(
            h.network.delete_network(name, false).await,
            Err(NetworkError::CannotDeleteDefault { .. })
        );
    }
}

#[tokio::test]
async fn network_crud_and_resolution() {
    let h = TestHarness::new().await;
    let net = h
        .network
        .create_network(CreateNetworkOpts {
            name: "apps".to_string(),
            subnet: "10.5.0.0/24".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(net.gateway, "10.5.0.1");

    assert_matches!(
        h.network
            .create_network(CreateNetworkOpts {
                name: "apps".to_string(),
                ..Default::default()
            })
            .await,
        Err(NetworkError::NameExists { .. })
    );
    assert_matches!(
        h.network
            .create_network(CreateNetworkOpts {
                name: "bad/name!".to_string(),
                ..Default::default()
            })
            .await,
        Err(NetworkError::InvalidName { .. })
    );
    assert_matches!(
        h.network
            .create_network(CreateNetworkOpts {
                name: "weird".to_string(),
                driver: "ovs".to_string(),
                ..Default::default()
            })
            .await,
        Err(NetworkError::UnsupportedDriver { .. })
    );

    // id-prefix resolution with ambiguity detection
    let resolved = h.network.resolve(&net.id[.. 10]).await.unwrap();
    assert_eq!(resolved.id, net.id);
    assert_matches!(
        h.network.resolve("no-such-network").await,
        Err(NetworkError::NetworkNotFound { .. })
    );

    h.network.delete_network("apps", false).await.unwrap();
    assert_matches!(
        h.network.resolve("apps").await,
        Err(NetworkError::NetworkNotFound { .. })
    );
}

#[tokio::test]
async fn wireguard_mesh_converges_on_start_and_stop() {
    let h = TestHarness::new().await;
    let a = h
        .core
        .create(TestHarness::opts("mesh-a", &["sleep"]))
        .await
        .unwrap();
    let b = h
        .core
        .create(TestHarness::opts("mesh-b", &["sleep"]))
        .await
        .unwrap();

    h.core.start(a.as_str()).await.unwrap();
    let a_native = h.native_of("mesh-a").await;
    let a_view = h.core.inspect("mesh-a").await.unwrap();
    let a_attach = a_view.networks.values().next().unwrap();
    assert_eq!(a_attach.ip, "172.17.0.2");
    assert_eq!(a_attach.index, 0);
    assert!(a_attach.mac.starts_with("02:"));

    h.core.start(b.as_str()).await.unwrap();
    let b_native = h.native_of("mesh-b").await;
    let b_view = h.core.inspect("mesh-b").await.unwrap();
    let b_attach = b_view.networks.values().next().unwrap();
    assert_eq!(b_attach.ip, "172.17.0.3");

    // both AddNetwork calls went out with the network parameters
    let add_networks: Vec<(String, u32)> = h
        .gateway
        .calls_snapshot()
        .into_iter()
        .filter_map(|c| match c {
            GuestCall::AddNetwork { target, req } => {
                assert_eq!(req.cidr, "172.17.0.0/16");
                assert_eq!(req.gateway, "172.17.0.1");
                assert_eq!(req.listen_port, 51820 + req.network_index);
                assert!(!req.private_key.is_empty());
                Some((target, req.network_index))
            }
            _ => None,
        })
        .collect();
    assert_eq!(add_networks.len(), 2);

    // A learned about B, with B's public key and endpoint
    let on_a = h.gateway.add_peer_calls(&a_native);
    assert!(!on_a.is_empty());
    for peer in &on_a {
        assert_eq!(peer.peer_ip, "172.17.0.3");
        assert_eq!(peer.peer_name, "mesh-b");
        assert_eq!(peer.peer_container_id, b.as_str());
        assert_eq!(
            peer.peer_public_key,
            FakeGateway::public_key_for(&b_native, 0)
        );
        assert_eq!(
            peer.peer_endpoint,
            FakeGateway::endpoint_for(&b_native)
        );
    }

    // and B about A
    let on_b = h.gateway.add_peer_calls(&b_native);
    assert!(!on_b.is_empty());
    for peer in &on_b {
        assert_eq!(peer.peer_ip, "172.17.0.2");
        assert_eq!(peer.peer_name, "mesh-a");
        assert_eq!(
            peer.peer_public_key,
            FakeGateway::public_key_for(&a_native, 0)
        );
    }

    // stopping A removes it as a peer on B
    h.core.stop(a.as_str(), None).await.unwrap();
    let removed_on_b = h.gateway.remove_peer_calls(&b_native);
    assert_eq!(removed_on_b.len(), 1);
    assert_eq!(removed_on_b[0].peer_container_id, a.as_str());
    assert_eq!(removed_on_b[0].peer_name, "mesh-a");

    // the attachment row survives the stop for a later restart
    let rows = h
        .store
        .attachments_for_container(a.as_str())
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].ip.to_string(), "172.17.0.2");
}

#[tokio::test]
async fn restart_reuses_ip_and_index_with_fresh_keys() {
    let h = TestHarness::new().await;
    let id = h
        .core
        .create(TestHarness::opts("sticky", &["sleep"]))
        .await
        .unwrap();
    h.core.start(id.as_str()).await.unwrap();
    let first: Vec<String> = h
        .gateway
        .calls_snapshot()
        .into_iter()
        .filter_map(|c| match c {
            GuestCall::AddNetwork { req, .. } => Some(req.private_key),
            _ => None,
        })
        .collect();

    h.core.stop(id.as_str(), None).await.unwrap();
    h.core.start(id.as_str()).await.unwrap();

    let view = h.core.inspect("sticky").await.unwrap();
    let attach = view.networks.values().next().unwrap();
    assert_eq!(attach.ip, "172.17.0.2");
    assert_eq!(attach.index, 0);

    let keys: Vec<String> = h
        .gateway
        .calls_snapshot()
        .into_iter()
        .filter_map(|c| match c {
            GuestCall::AddNetwork { req, .. } => Some(req.private_key),
            _ => None,
        })
        .collect();
    assert_eq!(keys.len(), 2);
    // ephemeral key material: never reused across restarts
    assert_ne!(keys[0], keys[1]);
    assert_eq!(first[0], keys[0]);
}

#[tokio::test]
async fn vmnet_rejects_dynamic_attach() {
    let h = TestHarness::new().await;
    let id = h
        .core
        .create(TestHarness::opts("nat", &["sleep"]))
        .await
        .unwrap();
    h.core.start(id.as_str()).await.unwrap();

    let err = h
        .network
        .connect(
            "host",
            id.as_str(),
            "nat",
            Vec::new(),
            None,
            Vec::new(),
            h.vms.get(id.as_str()),
        )
        .await
        .unwrap_err();
    assert_matches!(err, NetworkError::DynamicAttachNotSupported { .. });
}

#[tokio::test]
async fn none_network_attaches_nothing() {
    let h = TestHarness::new().await;
    let mut opts = TestHarness::opts("loner", &["sleep"]);
    opts.host.network_mode = "none".to_string();
    let id = h.core.create(opts).await.unwrap();
    h.core.start(id.as_str()).await.unwrap();

    assert!(h.core.inspect("loner").await.unwrap().networks.is_empty());
    assert!(h
        .gateway
        .calls_snapshot()
        .iter()
        .all(|c| !matches!(c, GuestCall::AddNetwork { .. })));
    assert!(h
        .store
        .attachments_for_container(id.as_str())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unreachable_peer_does_not_fail_the_join() {
    let h = TestHarness::new().await;
    let a = h
        .core
        .create(TestHarness::opts("reach-a", &["sleep"]))
        .await
        .unwrap();
    let b = h
        .core
        .create(TestHarness::opts("reach-b", &["sleep"]))
        .await
        .unwrap();
    h.core.start(a.as_str()).await.unwrap();

    // A's guest stops answering; B can still join the network
    let a_native = h.native_of("reach-a").await;
    h.gateway.unreachable.lock().push(a_native);
    h.core.start(b.as_str()).await.unwrap();

    assert_eq!(
        h.core.inspect("reach-b").await.unwrap().state.to_string(),
        "running"
    );
    let rows = h
        .store
        .attachments_for_network(
            &h.network.resolve("bridge").await.unwrap().id,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn deleting_a_network_with_members_requires_force() {
    let h = TestHarness::new().await;
    let net = h
        .network
        .create_network(CreateNetworkOpts {
            name: "members".to_string(),
            subnet: "10.9.0.0/24".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut opts = TestHarness::opts("member", &["sleep"]);
    opts.host.network_mode = "members".to_string();
    let id = h.core.create(opts).await.unwrap();
    h.core.start(id.as_str()).await.unwrap();

    assert_matches!(
        h.network.delete_network("members", false).await,
        Err(NetworkError::HasActiveEndpoints { .. })
    );

    h.network.delete_network("members", true).await.unwrap();
    assert!(h
        .store
        .attachments_for_network(&net.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn push_dns_topology_is_idempotent() {
    let h = TestHarness::new().await;
    let a = h
        .core
        .create(TestHarness::opts("dns-a", &["sleep"]))
        .await
        .unwrap();
    let b = h
        .core
        .create(TestHarness::opts("dns-b", &["sleep"]))
        .await
        .unwrap();
    h.core.start(a.as_str()).await.unwrap();
    h.core.start(b.as_str()).await.unwrap();

    let before = h.gateway.calls_snapshot().len();
    h.network.push_dns_topology("bridge").await.unwrap();
    let first = h.gateway.calls_snapshot().len();
    h.network.push_dns_topology("bridge").await.unwrap();
    let second = h.gateway.calls_snapshot().len();

    // every push re-announces the same pairs; nothing accumulates
    assert_eq!(first - before, second - first);
}
