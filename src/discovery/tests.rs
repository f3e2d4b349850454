//! Discovery Module Tests
//!
//! ## Test Scopes
//! - **Snapshots**: each notification fully replaces the previous view, and
//!   instances that cannot be resolved are left out without failing the refresh.
//! - **Selection**: random picks always come from current membership.
//! - **Lifecycle**: idempotent start/stop and connection failures.
//! - **End-to-end**: participants joining and leaving a cluster as seen by a spectator.

#[cfg(test)]
mod tests {
    use crate::config::{ClusterIdentity, NodeAddress};
    use crate::coordination::memory::{InMemoryClient, InMemoryCoordinator};
    use crate::coordination::{CoordinationClient, InstanceRecord, LiveInstanceListener};
    use crate::discovery::handlers::{handle_get_random_service, handle_get_services};
    use crate::discovery::{Endpoint, MembershipWatcher, WatcherOptions};
    use crate::error::{CoordinationError, DiscoveryError};
    use crate::participant::ParticipantRegistrar;
    use axum::extract::Extension;
    use axum::http::StatusCode;
    use std::sync::Arc;
    use std::time::Duration;

    const ADDR: &str = "127.0.0.1:2181";
    const CLUSTER: &str = "discovery-test";
    const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(5);

    fn identity() -> ClusterIdentity {
        ClusterIdentity::new(CLUSTER, ADDR)
    }

    fn setup() -> InMemoryCoordinator {
        let coordinator = InMemoryCoordinator::new(ADDR);
        coordinator.add_cluster(CLUSTER);
        coordinator
    }

    async fn connected_client(coordinator: &InMemoryCoordinator) -> Arc<InMemoryClient> {
        let client = coordinator.client(ADDR);
        client.connect().await.expect("connect");
        client
    }

    async fn register(client: &InMemoryClient, host: &str, port: u16) -> String {
        let name = format!("{}_{}", host, port);
        client
            .add_instance(CLUSTER, InstanceRecord::new(&name, host, port))
            .await
            .expect("add instance");
        name
    }

    /// A watcher over an already connected client, driven by `refresh` directly.
    fn detached_watcher(client: Arc<InMemoryClient>, options: WatcherOptions) -> MembershipWatcher {
        MembershipWatcher::with_options(client, identity(), options)
    }

    async fn wait_for_services(watcher: &MembershipWatcher, expected: usize) -> bool {
        tokio::time::timeout(CONVERGENCE_TIMEOUT, async {
            loop {
                if watcher.snapshot().map(|s| s.len()) == Some(expected) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    // ============================================================
    // SNAPSHOT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_no_snapshot_before_first_notification() {
        let coordinator = setup();
        let watcher = MembershipWatcher::new(coordinator.client(ADDR), identity());

        assert!(watcher.snapshot().is_none());
        assert!(watcher.get_services().is_empty());
        assert!(matches!(
            watcher.pick_random(),
            Err(DiscoveryError::NoEndpointsAvailable)
        ));
    }

    #[tokio::test]
    async fn test_latest_notification_replaces_snapshot() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let a = register(&client, "host-a", 8080).await;
        let b = register(&client, "host-b", 8080).await;
        let c = register(&client, "host-c", 8080).await;

        let watcher = detached_watcher(client, WatcherOptions::default());

        let first = watcher.refresh(vec![a.clone(), b.clone()]).await;
        assert_eq!(first.generation, 1);
        assert_eq!(first.len(), 2);

        let second = watcher.refresh(vec![c.clone()]).await;
        assert_eq!(second.generation, 2);

        let current = watcher.snapshot().expect("snapshot published");
        assert_eq!(current.endpoints, vec![Endpoint::new("host-c", 8080)]);
        assert!(!current.contains(&Endpoint::new("host-a", 8080)));

        // Readers holding the old snapshot still see it whole.
        assert_eq!(first.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_notification_clears_services() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let a = register(&client, "host-a", 8080).await;

        let watcher = detached_watcher(client, WatcherOptions::default());
        watcher.refresh(vec![a]).await;
        watcher.refresh(vec![]).await;

        let snapshot = watcher.snapshot().expect("snapshot published");
        assert!(snapshot.is_empty());
        assert!(matches!(
            watcher.get_random_service(),
            Err(DiscoveryError::NoEndpointsAvailable)
        ));
    }

    #[tokio::test]
    async fn test_partial_resolution_failure_skips_instance() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let a = register(&client, "host-a", 8080).await;
        let b = register(&client, "host-b", 8080).await;
        let c = register(&client, "host-c", 8080).await;
        coordinator.fail_config_reads(&b);

        let watcher = detached_watcher(client, WatcherOptions::default());
        let snapshot = watcher.refresh(vec![a, b, c]).await;

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.live_instances, 3);
        assert_eq!(snapshot.unresolved(), 1);
        assert!(!snapshot.contains(&Endpoint::new("host-b", 8080)));
    }

    #[tokio::test]
    async fn test_missing_and_malformed_records_are_skipped() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let a = register(&client, "host-a", 8080).await;
        let broken = register(&client, "host-b", 8080).await;
        coordinator.corrupt_instance_config(CLUSTER, &broken).unwrap();

        let watcher = detached_watcher(client, WatcherOptions::default());
        let snapshot = watcher
            .refresh(vec![a, broken, "never-registered_1".to_string()])
            .await;

        assert_eq!(snapshot.endpoints, vec![Endpoint::new("host-a", 8080)]);
    }

    #[tokio::test]
    async fn test_incomplete_address_is_skipped() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        client
            .add_instance(CLUSTER, InstanceRecord::new("blank_0", "", 0))
            .await
            .unwrap();

        let watcher = detached_watcher(client, WatcherOptions::default());
        let snapshot = watcher.refresh(vec!["blank_0".to_string()]).await;

        assert!(snapshot.is_empty());
        assert_eq!(snapshot.unresolved(), 1);
    }

    #[tokio::test]
    async fn test_slow_config_read_is_bounded() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let fast = register(&client, "host-a", 8080).await;
        let slow = register(&client, "host-b", 8080).await;
        coordinator.delay_config_reads(&slow, Duration::from_secs(30));

        let watcher = detached_watcher(
            client,
            WatcherOptions {
                resolve_timeout: Duration::from_millis(50),
                seed: Some(7),
            },
        );

        let snapshot = tokio::time::timeout(
            Duration::from_secs(5),
            watcher.refresh(vec![fast, slow]),
        )
        .await
        .expect("refresh must not wait for the slow read");

        assert_eq!(snapshot.endpoints, vec![Endpoint::new("host-a", 8080)]);
    }

    #[tokio::test]
    async fn test_resolution_errors_keep_their_cause() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let failing = register(&client, "host-a", 8080).await;
        let slow = register(&client, "host-b", 8080).await;
        coordinator.fail_config_reads(&failing);
        coordinator.delay_config_reads(&slow, Duration::from_secs(30));

        let watcher = detached_watcher(
            client,
            WatcherOptions {
                resolve_timeout: Duration::from_millis(50),
                seed: Some(1),
            },
        );

        match watcher.resolve(&failing).await {
            Err(DiscoveryError::Resolution { instance, source }) => {
                assert_eq!(instance, failing);
                assert_eq!(source, CoordinationError::Unreachable(ADDR.to_string()));
            }
            other => panic!("expected Resolution, got {:?}", other),
        }

        assert!(matches!(
            watcher.resolve(&slow).await,
            Err(DiscoveryError::ResolutionTimeout { timeout, .. })
                if timeout == Duration::from_millis(50)
        ));

        assert!(matches!(
            watcher.resolve("never-registered_1").await,
            Err(DiscoveryError::IncompleteRecord { .. })
        ));
    }

    // ============================================================
    // SELECTION TESTS
    // ============================================================

    #[tokio::test]
    async fn test_random_pick_is_drawn_from_snapshot() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let mut names = vec![];
        for port in 8080..8085 {
            names.push(register(&client, "host", port).await);
        }

        let watcher = detached_watcher(client, WatcherOptions::default());
        let snapshot = watcher.refresh(names).await;

        for _ in 0..200 {
            let picked = watcher.pick_random().expect("non-empty snapshot");
            assert!(snapshot.contains(&picked));
        }
    }

    #[tokio::test]
    async fn test_seeded_selection_is_deterministic() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let mut names = vec![];
        for port in 9000..9010 {
            names.push(register(&client, "host", port).await);
        }

        let options = WatcherOptions {
            seed: Some(42),
            ..WatcherOptions::default()
        };
        let first = detached_watcher(client.clone(), options.clone());
        let second = detached_watcher(client, options);
        first.refresh(names.clone()).await;
        second.refresh(names).await;

        let picks_a: Vec<Endpoint> = (0..20).map(|_| first.pick_random().unwrap()).collect();
        let picks_b: Vec<Endpoint> = (0..20).map(|_| second.pick_random().unwrap()).collect();

        assert_eq!(picks_a, picks_b);
    }

    // ============================================================
    // LIFECYCLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let coordinator = setup();
        let watcher = MembershipWatcher::new(coordinator.client(ADDR), identity());

        watcher.start().await.unwrap();
        watcher.start().await.unwrap();
        assert!(watcher.is_started());
        assert_eq!(coordinator.listener_count(CLUSTER), 1);

        watcher.stop().await.unwrap();
        watcher.stop().await.unwrap();
        assert!(!watcher.is_started());
        assert_eq!(coordinator.listener_count(CLUSTER), 0);
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let coordinator = setup();
        let watcher = MembershipWatcher::new(coordinator.client(ADDR), identity());

        watcher.stop().await.unwrap();
        assert!(!watcher.is_started());
    }

    #[tokio::test]
    async fn test_start_fails_when_unreachable_and_can_retry() {
        let coordinator = setup();
        coordinator.set_reachable(false);
        let watcher = MembershipWatcher::new(coordinator.client(ADDR), identity());

        let result = watcher.start().await;
        assert!(matches!(result, Err(DiscoveryError::Connection(_))));
        assert!(!watcher.is_started());

        coordinator.set_reachable(true);
        watcher.start().await.unwrap();
        assert!(watcher.is_started());
        assert!(wait_for_services(&watcher, 0).await);
    }

    #[tokio::test]
    async fn test_start_fails_for_unknown_cluster() {
        let coordinator = setup();
        let watcher = MembershipWatcher::new(
            coordinator.client(ADDR),
            ClusterIdentity::new("missing", ADDR),
        );

        assert!(matches!(
            watcher.start().await,
            Err(DiscoveryError::Coordination(_))
        ));
        assert!(!watcher.is_started());
    }

    #[tokio::test]
    async fn test_notifications_after_stop_are_not_published() {
        let coordinator = setup();
        let admin = connected_client(&coordinator).await;
        let a = register(&admin, "host-a", 8080).await;
        let b = register(&admin, "host-b", 8080).await;
        coordinator.force_live(CLUSTER, &a).unwrap();

        let watcher = MembershipWatcher::new(coordinator.client(ADDR), identity());
        watcher.start().await.unwrap();
        assert!(wait_for_services(&watcher, 1).await);
        let published = watcher.snapshot().expect("snapshot after start");

        watcher.stop().await.unwrap();

        // A notification that was already queued when stop ran.
        watcher.listener().on_live_instance_change(vec![a, b]).await;

        let current = watcher.snapshot().expect("last snapshot stays readable");
        assert_eq!(current.generation, published.generation);
        assert_eq!(watcher.get_services(), vec![Endpoint::new("host-a", 8080)]);
    }

    #[tokio::test]
    async fn test_follows_live_changes_after_start() {
        let coordinator = setup();
        let admin = connected_client(&coordinator).await;
        let a = register(&admin, "host-a", 8080).await;
        let b = register(&admin, "host-b", 8080).await;

        let watcher = MembershipWatcher::new(coordinator.client(ADDR), identity());
        watcher.start().await.unwrap();
        assert!(wait_for_services(&watcher, 0).await);

        coordinator.force_live(CLUSTER, &a).unwrap();
        coordinator.force_live(CLUSTER, &b).unwrap();
        assert!(wait_for_services(&watcher, 2).await);

        coordinator.force_dead(CLUSTER, &a).unwrap();
        assert!(wait_for_services(&watcher, 1).await);
        assert_eq!(watcher.get_services(), vec![Endpoint::new("host-b", 8080)]);

        watcher.stop().await.unwrap();
    }

    // ============================================================
    // END-TO-END TESTS
    // ============================================================

    #[tokio::test]
    async fn test_spectator_sees_participants_join_and_leave() {
        let coordinator = setup();

        let mut registrars = vec![];
        for port in [7001u16, 7002, 7003] {
            let registrar = ParticipantRegistrar::new(
                coordinator.client(ADDR),
                identity(),
                NodeAddress::new("127.0.0.1", port),
            );
            registrar.run().await.expect("participant should start");
            registrars.push(registrar);
        }

        let watcher = MembershipWatcher::new(coordinator.client(ADDR), identity());
        watcher.start().await.unwrap();

        assert!(
            wait_for_services(&watcher, 3).await,
            "spectator should observe 3 services"
        );

        registrars[1].shutdown().await.unwrap();

        assert!(
            wait_for_services(&watcher, 2).await,
            "spectator should converge to 2 services"
        );
        assert!(
            !watcher
                .get_services()
                .contains(&Endpoint::new("127.0.0.1", 7002))
        );

        watcher.stop().await.unwrap();
        for registrar in &registrars {
            registrar.shutdown().await.unwrap();
        }
    }

    // ============================================================
    // HTTP HANDLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_handlers_with_no_services() {
        let coordinator = setup();
        let watcher = Arc::new(MembershipWatcher::new(coordinator.client(ADDR), identity()));

        let (status, body) = handle_get_services(Extension(watcher.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.0.generation.is_none());
        assert!(body.0.services.is_empty());

        let (status, body) = handle_get_random_service(Extension(watcher)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.0.service.is_none());
        assert!(body.0.error.is_some());
    }

    #[tokio::test]
    async fn test_handlers_serve_current_snapshot() {
        let coordinator = setup();
        let client = connected_client(&coordinator).await;
        let a = register(&client, "host-a", 8080).await;

        let watcher = Arc::new(detached_watcher(client, WatcherOptions::default()));
        watcher.refresh(vec![a]).await;

        let (status, body) = handle_get_services(Extension(watcher.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0.generation, Some(1));
        assert_eq!(body.0.services, vec![Endpoint::new("host-a", 8080)]);

        let (status, body) = handle_get_random_service(Extension(watcher)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0.service, Some(Endpoint::new("host-a", 8080)));
    }
}
