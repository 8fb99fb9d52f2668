//! Integration tests for concurrent health status updates
//!
//! Many requests finish at once in production; outcome recording must not
//! lose updates or leave an endpoint in a state no sequence could produce.

use modelgate::{
    config::Config,
    gateway::AttemptOutcome,
    metrics::Metrics,
    models::{EndpointRegistry, HealthPolicy, HealthTracker, WeightedSelector},
};
use std::sync::Arc;
use std::time::Duration;

fn create_tracker(failure_threshold: u32) -> (Arc<EndpointRegistry>, Arc<HealthTracker>) {
    let config = Config::from_toml_str(
        r#"
[server]

[[endpoints]]
name = "e1"
base_url = "http://192.0.2.1:8000/v1"
models = ["m"]

[[endpoints]]
name = "e2"
base_url = "http://192.0.2.2:8000/v1"
models = ["m"]
"#,
    )
    .expect("test config should be valid");
    let registry = Arc::new(EndpointRegistry::from_config(&config).unwrap());
    let metrics = Arc::new(Metrics::new().expect("should create metrics"));
    let policy = HealthPolicy::new(
        failure_threshold,
        Duration::from_secs(1),
        Duration::from_secs(60),
    );
    let tracker = Arc::new(HealthTracker::new(&registry, policy, metrics));
    (registry, tracker)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_failures_are_all_counted() {
    let (_, tracker) = create_tracker(1_000);

    let handles: Vec<_> = (0..200)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.record("e1", AttemptOutcome::ServerError).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot[0].consecutive_failures(), 200);
    assert_eq!(snapshot[1].consecutive_failures(), 0, "e2 is untouched");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_interleaved_outcomes_leave_consistent_state() {
    let (_, tracker) = create_tracker(3);

    let handles: Vec<_> = (0..100)
        .map(|i| {
            let tracker = Arc::clone(&tracker);
            let outcome = if i % 2 == 0 {
                AttemptOutcome::Success
            } else {
                AttemptOutcome::Timeout
            };
            tokio::spawn(async move { tracker.record("e2", outcome).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let e2 = tracker
        .snapshot()
        .await
        .into_iter()
        .find(|h| h.name() == "e2")
        .unwrap();
    assert!(e2.consecutive_failures() <= 50);
    // Suspended exactly when the trailing run of faults reached the threshold
    assert_eq!(
        e2.suspended_until().is_some(),
        e2.consecutive_failures() >= 3
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_selection_runs_alongside_recording() {
    let (registry, tracker) = create_tracker(1);
    let selector = Arc::new(WeightedSelector::new(registry, Arc::clone(&tracker)));

    let writers: Vec<_> = (0..50)
        .map(|i| {
            let tracker = Arc::clone(&tracker);
            let name = if i % 2 == 0 { "e1" } else { "e2" };
            tokio::spawn(async move { tracker.record(name, AttemptOutcome::ConnectionError).await })
        })
        .collect();
    let readers: Vec<_> = (0..50)
        .map(|_| {
            let selector = Arc::clone(&selector);
            tokio::spawn(async move { selector.select("m").await })
        })
        .collect();

    for writer in writers {
        writer.await.unwrap().unwrap();
    }
    for reader in readers {
        let candidates = reader.await.unwrap().unwrap();
        // Never empty: a fully suspended pool falls back to every endpoint
        assert!(!candidates.is_empty());
        assert!(candidates.len() <= 2);
    }

    let snapshot = tracker.snapshot().await;
    assert_eq!(snapshot[0].consecutive_failures(), 25);
    assert_eq!(snapshot[1].consecutive_failures(), 25);
}

#[tokio::test]
async fn test_unknown_endpoint_is_rejected() {
    let (_, tracker) = create_tracker(3);
    let result = tracker.record("nope", AttemptOutcome::ServerError).await;
    tokio_test::assert_err!(result);
    assert!(!tracker.is_available("nope").await);
}
