//! Daemon crash recovery and the restart-policy engine.

pub mod common;

use std::time::Duration;

use arca_engine::{
    core::{ContainerState, RestartPolicy},
    hooks::EventAction,
};
use common::TestHarness;

#[tokio::test]
async fn crash_recovery_marks_running_containers_killed() {
    let h = TestHarness::new().await;
    let a = h
        .core
        .create(TestHarness::opts("crash-a", &["sleep"]))
        .await
        .unwrap();
    let b = h
        .core
        .create(TestHarness::opts("crash-b", &["sleep"]))
        .await
        .unwrap();
    h.core.start(a.as_str()).await.unwrap();
    h.core.start(b.as_str()).await.unwrap();

    let (a_stdout, _) = h.core.log_paths(a.as_str()).await.unwrap();

    // the daemon dies without any shutdown
    let h = h.reopen().await;

    let rows = h.core.list(true, &Default::default()).await.unwrap();
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.state, ContainerState::Exited);
    }
    for id in [&a, &b] {
        let stored = h
            .store
            .get_container(id.as_str())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, ContainerState::Exited);
        assert_eq!(stored.exit_code, Some(137));
        assert!(stored.finished_at.is_some());
        // the native identity is recoverable from the doubled id
        assert_eq!(
            stored.native_id.as_str(),
            &id.as_str()[.. 32]
        );
    }

    // log paths are registered again and history survives
    assert!(a_stdout.exists());
    h.core.start(a.as_str()).await.unwrap();
    assert_eq!(
        h.core.inspect(a.as_str()).await.unwrap().state,
        ContainerState::Running
    );
}

#[tokio::test]
async fn recovery_restarts_always_policy_containers() {
    let h = TestHarness::new().await;
    let mut opts = TestHarness::opts("comeback", &["sleep"]);
    opts.host.restart_policy = RestartPolicy::Always;
    let id = h.core.create(opts).await.unwrap();
    h.core.start(id.as_str()).await.unwrap();

    let mut stopped = TestHarness::opts("stays-down", &["sleep"]);
    stopped.host.restart_policy = RestartPolicy::UnlessStopped;
    let down = h.core.create(stopped).await.unwrap();
    h.core.start(down.as_str()).await.unwrap();
    h.core.stop(down.as_str(), None).await.unwrap();

    let h = h.reopen().await;
    h.core.apply_restart_policies().await;

    assert!(
        h.events
            .wait_for(
                EventAction::Start,
                id.as_str(),
                1,
                Duration::from_secs(5)
            )
            .await,
        "always-policy container was not restarted"
    );
    assert_eq!(
        h.core.inspect(id.as_str()).await.unwrap().state,
        ContainerState::Running
    );
    // unless-stopped respects the operator's stop
    assert_eq!(
        h.core.inspect(down.as_str()).await.unwrap().state,
        ContainerState::Exited
    );
}

#[tokio::test]
async fn restart_policy_cycles_a_failing_container() {
    let h = TestHarness::new().await;
    let mut opts = TestHarness::opts("flappy", &["sh", "-c", "exit 1"]);
    opts.host.restart_policy = RestartPolicy::Always;
    let id = h.core.create(opts).await.unwrap();

    let first_start = chrono::Utc::now();
    h.core.start(id.as_str()).await.unwrap();

    assert!(
        h.events
            .wait_for(
                EventAction::Start,
                id.as_str(),
                3,
                Duration::from_secs(10)
            )
            .await,
        "expected three starts under the always policy"
    );
    assert!(h.events.count(EventAction::Die, id.as_str()) >= 2);

    h.core.stop(id.as_str(), None).await.unwrap();
    let stored = h
        .store
        .get_container(id.as_str())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.started_at.unwrap() > first_start);
}

#[tokio::test]
async fn on_failure_stops_after_max_retries() {
    let h = TestHarness::new().await;
    let mut opts = TestHarness::opts("bounded", &["sh", "-c", "exit 7"]);
    opts.host.restart_policy = RestartPolicy::OnFailure {
        maximum_retry_count: 2,
    };
    let id = h.core.create(opts).await.unwrap();
    h.core.start(id.as_str()).await.unwrap();

    // initial start plus at most two policy retries
    assert!(
        h.events
            .wait_for(
                EventAction::Die,
                id.as_str(),
                3,
                Duration::from_secs(10)
            )
            .await
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.events.count(EventAction::Start, id.as_str()), 3);
    assert_eq!(
        h.core.inspect(id.as_str()).await.unwrap().exit_code,
        7
    );
}

#[tokio::test]
async fn successful_exit_does_not_trigger_on_failure() {
    let h = TestHarness::new().await;
    let mut opts = TestHarness::opts("clean-exit", &["sh", "-c", "exit 0"]);
    opts.host.restart_policy = RestartPolicy::OnFailure {
        maximum_retry_count: 0,
    };
    let id = h.core.create(opts).await.unwrap();
    h.core.start(id.as_str()).await.unwrap();

    assert!(
        h.events
            .wait_for(
                EventAction::Die,
                id.as_str(),
                1,
                Duration::from_secs(5)
            )
            .await
    );
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(h.events.count(EventAction::Start, id.as_str()), 1);
    assert_eq!(
        h.core.inspect(id.as_str()).await.unwrap().state,
        ContainerState::Exited
    );
}
