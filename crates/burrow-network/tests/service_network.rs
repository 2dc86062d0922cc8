//! End-to-end tests of the service network against the in-memory backend.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use burrow_artifacts::DirArtifactStore;
use burrow_backend::{BackendCall, ContainerBackend, InMemoryBackend};
use burrow_core::{EnclaveId, PartitionId, PortSpec, ServiceGuid, ServiceId};
use burrow_network::{
    ConnectionId, ErrorKind, GuidSuffixSource, NetworkError, PartitionConnection, ServiceNetwork,
    ServiceStartConfig,
};

const CIDR: &str = "172.23.0.0/16";

struct Harness {
    backend: Arc<InMemoryBackend>,
    network: Arc<ServiceNetwork>,
    cancel: CancellationToken,
    _tmp: tempfile::TempDir,
}

async fn harness(partitioning: bool) -> Harness {
    harness_with_cidr(partitioning, CIDR).await
}

async fn harness_with_cidr(partitioning: bool, cidr: &str) -> Harness {
    let backend = Arc::new(InMemoryBackend::new());
    let cancel = CancellationToken::new();
    let handle = backend
        .create_network(&cancel, "burrow-test", cidr, &BTreeMap::new())
        .await
        .unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(DirArtifactStore::new(tmp.path().join("enclave-data")));
    let network = ServiceNetwork::new(
        EnclaveId::from("test"),
        handle,
        partitioning,
        cidr,
        Arc::clone(&backend) as Arc<dyn ContainerBackend>,
        artifacts,
    )
    .unwrap()
    .with_guid_source(GuidSuffixSource::fixed(0));
    backend.clear_calls();
    Harness {
        backend,
        network: Arc::new(network),
        cancel,
        _tmp: tmp,
    }
}

fn sid(s: &str) -> ServiceId {
    ServiceId::from(s)
}

fn pid(s: &str) -> PartitionId {
    PartitionId::from(s)
}

fn grpc_port() -> BTreeMap<String, PortSpec> {
    BTreeMap::from([("grpc".to_string(), PortSpec::tcp(1323))])
}

async fn reg_of(h: &Harness, id: &str) -> burrow_network::RegistrationInfo {
    h.network.registration_info(&sid(id)).await.unwrap()
}

async fn guid_of(h: &Harness, id: &str) -> ServiceGuid {
    reg_of(h, id).await.guid
}

/// Create the given partitions (plus connections) on a fresh network.
async fn lay_out_partitions(
    h: &Harness,
    partitions: &[&str],
    connections: &[(&str, &str, f32)],
    default_loss: f32,
) {
    let new_partitions: BTreeMap<PartitionId, BTreeSet<ServiceGuid>> = partitions
        .iter()
        .map(|p| (pid(p), BTreeSet::new()))
        .collect();
    let new_connections = connections
        .iter()
        .map(|(a, b, loss)| {
            (
                ConnectionId::new(pid(a), pid(b)),
                PartitionConnection::new(*loss).unwrap(),
            )
        })
        .collect();
    h.network
        .repartition(
            &h.cancel,
            new_partitions,
            new_connections,
            PartitionConnection::new(default_loss).unwrap(),
        )
        .await
        .unwrap();
}

// ── S1: basic register / start / exec / remove / re-register ───────

#[tokio::test]
async fn register_start_exec_remove_reregister() {
    let h = harness(false).await;

    let (ip, artifact_dir) = h.network.register_service(&sid("svc-a"), None).await.unwrap();
    assert!(ip.octets()[0] == 172 && ip.octets()[1] == 23, "IP {ip} outside CIDR");
    assert!(artifact_dir.is_dir());
    let first_guid = h
        .network
        .registration_info(&sid("svc-a"))
        .await
        .unwrap()
        .guid;

    let (public_ip, _public_ports) = h
        .network
        .start_service(&h.cancel, &sid("svc-a"), ServiceStartConfig {
            image: "example/img".to_string(),
            private_ports: grpc_port(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(public_ip.is_none()); // ports not published

    let (exit_code, output) = h
        .network
        .exec_command(&h.cancel, &sid("svc-a"), &["echo".to_string(), "hi".to_string()])
        .await
        .unwrap();
    assert_eq!(exit_code, 0);
    assert_eq!(output, b"hi\n");

    let removed_guid = h
        .network
        .remove_service(&h.cancel, &sid("svc-a"), Duration::from_secs(1))
        .await
        .unwrap();
    assert_eq!(removed_guid, first_guid);

    // The ID is reusable; the GUID is not reused.
    h.network.register_service(&sid("svc-a"), None).await.unwrap();
    let second_guid = h
        .network
        .registration_info(&sid("svc-a"))
        .await
        .unwrap()
        .guid;
    assert_ne!(second_guid, first_guid);
}

// ── S2: three-partition packet loss ────────────────────────────────

#[tokio::test]
async fn three_partition_packet_loss() {
    let h = harness(true).await;
    lay_out_partitions(&h, &["p1", "p2"], &[("p1", "p2", 100.0)], 0.0).await;

    h.network
        .register_service(&sid("a"), Some(pid("p1")))
        .await
        .unwrap();
    h.network
        .register_service(&sid("b"), Some(pid("p1")))
        .await
        .unwrap();
    h.network
        .register_service(&sid("c"), Some(pid("p2")))
        .await
        .unwrap();

    let (a, b, c) = (
        guid_of(&h, "a").await,
        guid_of(&h, "b").await,
        guid_of(&h, "c").await,
    );

    let loss = h.network.packet_loss_by_service().await.unwrap();
    assert_eq!(loss[&a][&c], 100.0);
    assert_eq!(loss[&a][&b], 0.0);
    assert_eq!(loss[&b][&c], 100.0);
}

// ── S3: repartition during traffic ─────────────────────────────────

#[tokio::test]
async fn repartition_rewrites_every_sidecar_once() {
    let h = harness(true).await;
    lay_out_partitions(&h, &["p1", "p2"], &[("p1", "p2", 100.0)], 0.0).await;

    for (id, partition) in [("a", "p1"), ("b", "p1"), ("c", "p2")] {
        h.network
            .register_service(&sid(id), Some(pid(partition)))
            .await
            .unwrap();
        h.network
            .start_service(&h.cancel, &sid(id), ServiceStartConfig::image("example/img"))
            .await
            .unwrap();
    }

    let (reg_a, reg_b, reg_c) = (
        reg_of(&h, "a").await,
        reg_of(&h, "b").await,
        reg_of(&h, "c").await,
    );
    let sidecar_a = h.backend.sidecar_for("test--a").unwrap();
    let sidecar_b = h.backend.sidecar_for("test--b").unwrap();
    let sidecar_c = h.backend.sidecar_for("test--c").unwrap();

    h.backend.clear_calls();
    h.network
        .repartition(
            &h.cancel,
            BTreeMap::from([
                (pid("p1"), BTreeSet::from([reg_a.guid.clone()])),
                (
                    pid("p2"),
                    BTreeSet::from([reg_b.guid.clone(), reg_c.guid.clone()]),
                ),
            ]),
            BTreeMap::from([(
                ConnectionId::new(pid("p1"), pid("p2")),
                PartitionConnection::new(50.0).unwrap(),
            )]),
            PartitionConnection::lossless(),
        )
        .await
        .unwrap();

    let loss = h.network.packet_loss_by_service().await.unwrap();
    assert_eq!(loss[&reg_a.guid][&reg_b.guid], 50.0);

    // Exactly one update call landed on each sidecar.
    let updates_for = |sidecar: &burrow_backend::ContainerHandle| {
        h.backend
            .calls()
            .into_iter()
            .filter(|call| matches!(call, BackendCall::RunInSidecar { sidecar: s, .. } if s == sidecar.as_str()))
            .collect::<Vec<_>>()
    };
    for sidecar in [&sidecar_a, &sidecar_b, &sidecar_c] {
        assert_eq!(updates_for(sidecar).len(), 1);
    }

    // B and C share a partition now, so their tables stop naming each
    // other as lossy destinations.
    let command_of = |calls: Vec<BackendCall>| match &calls[0] {
        BackendCall::RunInSidecar { argv, .. } => argv.join(" "),
        other => panic!("unexpected call {other:?}"),
    };
    let b_command = command_of(updates_for(&sidecar_b));
    assert!(!b_command.contains(&reg_c.private_ip.to_string()));
    assert!(b_command.contains(&reg_a.private_ip.to_string()));
    let c_command = command_of(updates_for(&sidecar_c));
    assert!(!c_command.contains(&reg_b.private_ip.to_string()));
}

// ── S4: peers are partitioned before the new node starts ───────────

#[tokio::test]
async fn peers_updated_before_new_container_starts() {
    let h = harness(true).await;
    lay_out_partitions(&h, &["pa", "pb"], &[("pa", "pb", 100.0)], 0.0).await;

    h.network
        .register_service(&sid("a"), Some(pid("pa")))
        .await
        .unwrap();
    h.network
        .start_service(&h.cancel, &sid("a"), ServiceStartConfig::image("example/img"))
        .await
        .unwrap();
    let sidecar_a = h.backend.sidecar_for("test--a").unwrap();

    h.backend.clear_calls();
    h.network
        .register_service(&sid("b"), Some(pid("pb")))
        .await
        .unwrap();
    let reg_b = h.network.registration_info(&sid("b")).await.unwrap();
    h.network
        .start_service(&h.cancel, &sid("b"), ServiceStartConfig::image("example/img"))
        .await
        .unwrap();

    let calls = h.backend.calls();
    let update_of_a = calls
        .iter()
        .position(|call| {
            matches!(
                call,
                BackendCall::RunInSidecar { sidecar, argv }
                    if sidecar == sidecar_a.as_str()
                        && argv.join(" ").contains(&reg_b.private_ip.to_string())
            )
        })
        .expect("sidecar A never learned about B");
    let start_of_b = calls
        .iter()
        .position(|call| matches!(call, BackendCall::StartContainer { name } if name == "test--b"))
        .expect("B's container never started");
    assert!(
        update_of_a < start_of_b,
        "A's sidecar must drop traffic to B before B's container exists"
    );
}

// ── S5: start failure rolls the service back to absent ─────────────

#[tokio::test]
async fn start_failure_releases_every_resource() {
    let h = harness(false).await;

    let (ip_x, _) = h.network.register_service(&sid("svc-x"), None).await.unwrap();
    h.backend.inject_failure("start_container", "image pull failed");

    let err = h
        .network
        .start_service(&h.cancel, &sid("svc-x"), ServiceStartConfig::image("example/img"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BackendFailure);

    // Registration is gone along with its run info…
    assert!(matches!(
        h.network.registration_info(&sid("svc-x")).await,
        Err(NetworkError::NotFound(_))
    ));
    assert!(matches!(
        h.network.run_info(&sid("svc-x")).await,
        Err(NetworkError::NotFound(_))
    ));

    // …and the IP returned to the pool: the next registration gets the
    // same lowest-free address.
    let (ip_y, _) = h.network.register_service(&sid("svc-y"), None).await.unwrap();
    assert_eq!(ip_y, ip_x);
}

#[tokio::test]
async fn sidecar_attach_failure_tears_down_the_container() {
    let h = harness(true).await;

    h.network.register_service(&sid("a"), None).await.unwrap();
    h.backend.inject_failure("create_sidecar", "no capacity");

    h.network
        .start_service(&h.cancel, &sid("a"), ServiceStartConfig::image("example/img"))
        .await
        .unwrap_err();

    // The started container was destroyed again and the registration
    // rolled back.
    let calls = h.backend.calls();
    let started = calls
        .iter()
        .any(|call| matches!(call, BackendCall::StartContainer { name } if name == "test--a"));
    let destroyed = calls
        .iter()
        .any(|call| matches!(call, BackendCall::DestroyContainer { .. }));
    assert!(started && destroyed);
    assert!(matches!(
        h.network.registration_info(&sid("a")).await,
        Err(NetworkError::NotFound(_))
    ));
}

// ── S6: destroyed network refuses everything ───────────────────────

#[tokio::test]
async fn destroyed_network_rejects_all_calls() {
    let h = harness(false).await;
    h.network.register_service(&sid("a"), None).await.unwrap();
    h.network
        .start_service(&h.cancel, &sid("a"), ServiceStartConfig::image("example/img"))
        .await
        .unwrap();

    h.network.destroy(&h.cancel).await.unwrap();

    let conflict = |err: NetworkError| {
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("destroyed"));
    };
    conflict(h.network.register_service(&sid("b"), None).await.unwrap_err());
    conflict(
        h.network
            .start_service(&h.cancel, &sid("a"), ServiceStartConfig::image("x"))
            .await
            .unwrap_err(),
    );
    conflict(
        h.network
            .remove_service(&h.cancel, &sid("a"), Duration::from_secs(1))
            .await
            .unwrap_err(),
    );
    conflict(
        h.network
            .exec_command(&h.cancel, &sid("a"), &["true".to_string()])
            .await
            .unwrap_err(),
    );
    conflict(h.network.registration_info(&sid("a")).await.unwrap_err());
    conflict(h.network.run_info(&sid("a")).await.unwrap_err());
    conflict(h.network.service_ids().await.unwrap_err());
    conflict(h.network.destroy(&h.cancel).await.unwrap_err());
}

#[tokio::test]
async fn destroy_removes_containers_and_sidecars() {
    let h = harness(true).await;
    for id in ["a", "b"] {
        h.network.register_service(&sid(id), None).await.unwrap();
        h.network
            .start_service(&h.cancel, &sid(id), ServiceStartConfig::image("example/img"))
            .await
            .unwrap();
    }
    let container_a = h.network.run_info(&sid("a")).await.unwrap().container;
    let sidecar_a = h.backend.sidecar_for("test--a").unwrap();

    h.network.destroy(&h.cancel).await.unwrap();

    assert!(!h.backend.container_exists(&container_a));
    assert!(!h.backend.container_exists(&sidecar_a));
}

// ── Boundary behaviors ─────────────────────────────────────────────

#[tokio::test]
async fn exhaustion_then_reuse() {
    // /29 leaves six host addresses.
    let h = harness_with_cidr(false, "10.0.0.0/29").await;

    for i in 0..6 {
        h.network
            .register_service(&sid(&format!("svc-{i}")), None)
            .await
            .unwrap();
    }
    let err = h
        .network
        .register_service(&sid("one-too-many"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exhausted);

    h.network
        .remove_service(&h.cancel, &sid("svc-0"), Duration::from_secs(1))
        .await
        .unwrap();
    h.network
        .register_service(&sid("one-too-many"), None)
        .await
        .unwrap();
}

#[tokio::test]
async fn start_requires_registration() {
    let h = harness(false).await;
    let err = h
        .network
        .start_service(&h.cancel, &sid("ghost"), ServiceStartConfig::image("x"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn exec_requires_run_info() {
    let h = harness(false).await;
    h.network.register_service(&sid("a"), None).await.unwrap();
    let err = h
        .network
        .exec_command(&h.cancel, &sid("a"), &["true".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn repartition_requires_partitioning() {
    let h = harness(false).await;
    let err = h
        .network
        .repartition(
            &h.cancel,
            BTreeMap::new(),
            BTreeMap::new(),
            PartitionConnection::lossless(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn empty_and_duplicate_ids_are_rejected() {
    let h = harness(false).await;
    let err = h.network.register_service(&sid("  "), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    h.network.register_service(&sid("a"), None).await.unwrap();
    let err = h.network.register_service(&sid("a"), None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = h
        .network
        .register_service(&sid("b"), Some(pid("ghost")))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn removal_is_idempotent_in_error() {
    let h = harness(false).await;
    h.network.register_service(&sid("a"), None).await.unwrap();
    h.network
        .remove_service(&h.cancel, &sid("a"), Duration::from_secs(1))
        .await
        .unwrap();

    let err = h
        .network
        .remove_service(&h.cancel, &sid("a"), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn removal_frees_the_alias_for_reuse() {
    let h = harness(false).await;
    h.network.register_service(&sid("a"), None).await.unwrap();
    h.network
        .start_service(&h.cancel, &sid("a"), ServiceStartConfig::image("example/img"))
        .await
        .unwrap();
    h.network
        .remove_service(&h.cancel, &sid("a"), Duration::from_secs(1))
        .await
        .unwrap();

    // Same ID, fresh container, same DNS name on the backend.
    h.network.register_service(&sid("a"), None).await.unwrap();
    h.network
        .start_service(&h.cancel, &sid("a"), ServiceStartConfig::image("example/img"))
        .await
        .unwrap();
}

// ── Invariants ─────────────────────────────────────────────────────

#[tokio::test]
async fn live_registrations_never_share_ips_or_guids() {
    let h = harness(false).await;
    let mut seen_guids = BTreeSet::new();

    for round in 0..5 {
        let mut ips = BTreeSet::new();
        for i in 0..8 {
            let id = sid(&format!("svc-{i}"));
            let (ip, _) = h.network.register_service(&id, None).await.unwrap();
            assert!(ips.insert(ip), "IP {ip} handed out twice in round {round}");
            let guid = h.network.registration_info(&id).await.unwrap().guid;
            assert!(seen_guids.insert(guid.clone()), "GUID {guid} reused");
        }
        for i in 0..8 {
            h.network
                .remove_service(&h.cancel, &sid(&format!("svc-{i}")), Duration::from_secs(1))
                .await
                .unwrap();
        }
    }
}

#[tokio::test]
async fn every_live_service_sits_in_exactly_one_partition() {
    let h = harness(true).await;
    lay_out_partitions(&h, &["p1", "p2"], &[], 0.0).await;

    for (id, partition) in [("a", "p1"), ("b", "p2"), ("c", "p1")] {
        h.network
            .register_service(&sid(id), Some(pid(partition)))
            .await
            .unwrap();
    }
    h.network
        .remove_service(&h.cancel, &sid("b"), Duration::from_secs(1))
        .await
        .unwrap();

    let loss = h.network.packet_loss_by_service().await.unwrap();
    assert_eq!(loss.len(), 2);
    for id in h.network.service_ids().await.unwrap() {
        let registration = h.network.registration_info(&id).await.unwrap();
        assert!(loss.contains_key(&registration.guid));
    }
}

#[tokio::test]
async fn concurrent_registrations_serialize_cleanly() {
    let h = harness(false).await;
    let mut handles = Vec::new();
    for i in 0..16 {
        let network = Arc::clone(&h.network);
        handles.push(tokio::spawn(async move {
            network
                .register_service(&sid(&format!("svc-{i}")), None)
                .await
        }));
    }

    let mut ips = BTreeSet::new();
    for handle in handles {
        let (ip, _) = handle.await.unwrap().unwrap();
        assert!(ips.insert(ip), "concurrent registrations shared an IP");
    }
    assert_eq!(h.network.service_ids().await.unwrap().len(), 16);
}

#[tokio::test]
async fn partial_sidecar_failure_reports_affected_guids() {
    let h = harness(true).await;
    lay_out_partitions(&h, &["p1", "p2"], &[("p1", "p2", 100.0)], 0.0).await;
    for (id, partition) in [("a", "p1"), ("b", "p2"), ("c", "p2")] {
        h.network
            .register_service(&sid(id), Some(pid(partition)))
            .await
            .unwrap();
        h.network
            .start_service(&h.cancel, &sid(id), ServiceStartConfig::image("example/img"))
            .await
            .unwrap();
    }

    let guids: BTreeSet<ServiceGuid> = {
        let mut set = BTreeSet::new();
        for id in ["a", "b", "c"] {
            set.insert(h.network.registration_info(&sid(id)).await.unwrap().guid);
        }
        set
    };

    h.backend.inject_failure("run_in_sidecar", "qdisc rejected");
    let err = h
        .network
        .repartition(
            &h.cancel,
            BTreeMap::from([(pid("all"), guids.clone())]),
            BTreeMap::new(),
            PartitionConnection::lossless(),
        )
        .await
        .unwrap_err();

    match err {
        NetworkError::PartialEnforcement { affected } => {
            assert_eq!(affected.len(), 1);
            assert!(guids.contains(affected.keys().next().unwrap()));
        }
        other => panic!("expected PartialEnforcement, got {other}"),
    }

    // The topology swap itself took effect despite the failed push.
    let loss = h.network.packet_loss_by_service().await.unwrap();
    for row in loss.values() {
        for value in row.values() {
            assert_eq!(*value, 0.0);
        }
    }
}

#[tokio::test]
async fn cancellation_before_start_rolls_back_and_reports() {
    let h = harness(false).await;
    h.network.register_service(&sid("a"), None).await.unwrap();

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let err = h
        .network
        .start_service(&cancelled, &sid("a"), ServiceStartConfig::image("example/img"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);

    // Local rollback ran even though the call was cancelled.
    assert!(matches!(
        h.network.registration_info(&sid("a")).await,
        Err(NetworkError::NotFound(_))
    ));
}
