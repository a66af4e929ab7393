//! Address allocation: atomicity, static reservations, release and the
//! subnet auto-allocation cursor.

pub mod common;

use assert_matches::assert_matches;

use arca_engine::{
    network::{CreateNetworkOpts, NetworkError},
    store::AllocateAttachment,
};
use common::TestHarness;

fn allocation(
    network_id: &str,
    container_id: &str,
    requested: Option<u32>,
) -> AllocateAttachment {
    AllocateAttachment {
        network_id: network_id.to_string(),
        container_id: container_id.to_string(),
        mac: "02:00:00:00:00:01".to_string(),
        aliases: vec![],
        range_start: u32::from(std::net::Ipv4Addr::new(172, 17, 0, 1)),
        range_end: u32::from(std::net::Ipv4Addr::new(172, 17, 255, 254)),
        gateway: u32::from(std::net::Ipv4Addr::new(172, 17, 0, 1)),
        requested,
    }
}

fn container_id(n: u8) -> String {
    format!("{:02x}", n).repeat(32)
}

#[tokio::test]
async fn concurrent_attaches_get_distinct_addresses() {
    let h = TestHarness::new().await;
    let net = h.network.resolve("bridge").await.unwrap();
    for n in 1 ..= 20u8 {
        h.seed_container_row(&container_id(n), &format!("seed-{n}")).await;
    }

    let mut tasks = Vec::new();
    for n in 1 ..= 20u8 {
        let store = h.store.clone();
        let network_id = net.id.clone();
        tasks.push(tokio::spawn(async move {
            store
                .allocate_attachment(allocation(
                    &network_id,
                    &container_id(n),
                    None,
                ))
                .await
                .unwrap()
        }));
    }

    let mut ips = std::collections::HashSet::new();
    for task in tasks {
        let (record, created) = task.await.unwrap();
        assert!(created);
        assert!(ips.insert(record.ip), "duplicate ip {}", record.ip);
        assert_ne!(record.ip.to_string(), "172.17.0.1");
    }
    assert_eq!(ips.len(), 20);
}

#[tokio::test]
async fn static_reservation_conflict_yields_ip_in_use() {
    let h = TestHarness::new().await;
    let net = h.network.resolve("bridge").await.unwrap();
    let wanted = u32::from(std::net::Ipv4Addr::new(172, 17, 0, 5));
    h.seed_container_row(&container_id(1), "claim-1").await;
    h.seed_container_row(&container_id(2), "claim-2").await;

    let first = tokio::spawn({
        let store = h.store.clone();
        let id = net.id.clone();
        async move {
            store
                .allocate_attachment(allocation(&id, &container_id(1), Some(wanted)))
                .await
        }
    });
    let second = tokio::spawn({
        let store = h.store.clone();
        let id = net.id.clone();
        async move {
            store
                .allocate_attachment(allocation(&id, &container_id(2), Some(wanted)))
                .await
        }
    });

    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let won = outcomes.iter().filter(|o| o.is_ok()).count();
    assert_eq!(won, 1, "exactly one reservation may win");
    let lost = outcomes.into_iter().find(|o| o.is_err()).unwrap();
    assert_matches!(
        lost.unwrap_err(),
        arca_engine::store::StoreError::IpTaken { ip } if ip == "172.17.0.5"
    );
}

#[tokio::test]
async fn reconnect_returns_the_existing_attachment() {
    let h = TestHarness::new().await;
    let net = h.network.resolve("bridge").await.unwrap();
    h.seed_container_row(&container_id(1), "re-1").await;

    let (first, created) = h
        .store
        .allocate_attachment(allocation(&net.id, &container_id(1), None))
        .await
        .unwrap();
    assert!(created);

    let (second, created) = h
        .store
        .allocate_attachment(allocation(&net.id, &container_id(1), None))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(first.ip, second.ip);
    assert_eq!(first.index, second.index);
}

#[tokio::test]
async fn release_frees_the_address_for_reuse() {
    let h = TestHarness::new().await;
    let net = h.network.resolve("bridge").await.unwrap();
    for n in 1 ..= 3u8 {
        h.seed_container_row(&container_id(n), &format!("rel-{n}")).await;
    }

    let (first, _) = h
        .store
        .allocate_attachment(allocation(&net.id, &container_id(1), None))
        .await
        .unwrap();
    let (second, _) = h
        .store
        .allocate_attachment(allocation(&net.id, &container_id(2), None))
        .await
        .unwrap();
    assert_ne!(first.ip, second.ip);

    assert!(h
        .store
        .delete_attachment(&net.id, &container_id(1))
        .await
        .unwrap());
    let (third, _) = h
        .store
        .allocate_attachment(allocation(&net.id, &container_id(3), None))
        .await
        .unwrap();
    // lowest-free allocation reuses the released address
    assert_eq!(third.ip, first.ip);
}

#[tokio::test]
async fn gateway_is_never_allocatable() {
    let h = TestHarness::new().await;
    let net = h.network.resolve("bridge").await.unwrap();
    let gateway = u32::from(std::net::Ipv4Addr::new(172, 17, 0, 1));

    let err = h
        .store
        .allocate_attachment(allocation(&net.id, &container_id(9), Some(gateway)))
        .await
        .unwrap_err();
    assert_matches!(err, arca_engine::store::StoreError::IpTaken { .. });
}

#[tokio::test]
async fn network_index_is_per_container_and_ordinal() {
    let h = TestHarness::new().await;
    let apps = h
        .network
        .create_network(CreateNetworkOpts {
            name: "apps".to_string(),
            subnet: "10.8.0.0/24".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let bridge = h.network.resolve("bridge").await.unwrap();
    h.seed_container_row(&container_id(1), "multi-1").await;

    let (on_bridge, _) = h
        .store
        .allocate_attachment(allocation(&bridge.id, &container_id(1), None))
        .await
        .unwrap();
    let mut second = allocation(&apps.id, &container_id(1), None);
    second.range_start = u32::from(std::net::Ipv4Addr::new(10, 8, 0, 1));
    second.range_end = u32::from(std::net::Ipv4Addr::new(10, 8, 0, 254));
    second.gateway = u32::from(std::net::Ipv4Addr::new(10, 8, 0, 1));
    let (on_apps, _) = h.store.allocate_attachment(second).await.unwrap();

    assert_eq!(on_bridge.index, 0);
    assert_eq!(on_apps.index, 1);
}

#[tokio::test]
async fn subnet_auto_allocation_exhausts_after_fourteen_bytes() {
    let h = TestHarness::new().await;
    // the host default network already consumed one byte of
    // 172.{18..31}; 13 more fit
    let mut created = 0;
    loop {
        let result = h
            .network
            .create_network(CreateNetworkOpts {
                name: format!("auto-{created}"),
                ..Default::default()
            })
            .await;
        match result {
            Ok(record) => {
                created += 1;
                assert!(record.subnet.starts_with("172."));
                assert!(created <= 13, "allocated past the subnet space");
            }
            Err(NetworkError::NoAvailableSubnets {}) => break,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 13);
}

#[tokio::test]
async fn static_ip_outside_the_subnet_is_invalid() {
    let h = TestHarness::new().await;
    let id = h
        .core
        .create(TestHarness::opts("static", &["sleep"]))
        .await
        .unwrap();
    h.core.start(id.as_str()).await.unwrap();
    // dynamic connect with an out-of-subnet address
    let err = h
        .network
        .connect(
            "bridge",
            &container_id(5),
            "other",
            Vec::new(),
            Some("10.0.0.9".parse().unwrap()),
            Vec::new(),
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err, NetworkError::InvalidIPAddress { .. });
}
