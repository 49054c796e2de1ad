//! End-to-end benchmark runs against the simulated broker.

use std::{sync::Arc, time::Duration};

use rama::rt::Executor;

use crate::{
    aggregate::{AggregateResult, aggregate},
    broker::mock::{MockBroker, MockBrokerConfig},
    client::tests::test_client_config,
    coordinator::ConnectionCoordinator,
    pipeline::PublishPhase,
    stats::RunResult,
};

struct Run {
    results: Vec<RunResult>,
    totals: Result<AggregateResult, rama::error::BoxError>,
}

async fn run_benchmark(broker: MockBroker, clients: usize, msg_count: u64) -> Run {
    let exec = Executor::default();
    let configs = (0..clients)
        .map(|i| test_client_config(i, msg_count))
        .collect();

    let report = ConnectionCoordinator::new(exec.clone(), Arc::new(broker))
        .connect(configs)
        .await;
    let stats = report.stats.clone();

    let publish = PublishPhase::new(exec)
        .with_seed(Some(7))
        .run(report.into_connected())
        .await;
    let totals = aggregate(&publish.results, &stats, publish.elapsed);

    Run {
        results: publish.results,
        totals,
    }
}

#[tokio::test]
async fn test_reliable_broker() {
    let broker = MockBroker::default();
    let run = run_benchmark(broker.clone(), 8, 20).await;

    let totals = run.totals.unwrap();
    assert_eq!(run.results.len(), 8);
    assert_eq!(totals.successes, 160);
    assert_eq!(totals.failures, 0);
    assert_eq!(totals.ratio, 1.);
    assert_eq!(totals.conn_ratio, 1.);
    assert_eq!(broker.published(), 160);
    assert_eq!(broker.disconnects(), 8);
}

#[tokio::test]
async fn test_every_other_connection_refused() {
    let broker = MockBroker::new(MockBrokerConfig {
        connect_failure_every: Some(2),
        ..Default::default()
    });
    let run = run_benchmark(broker.clone(), 6, 4).await;

    let totals = run.totals.unwrap();
    assert_eq!(totals.conn_ratio, 0.5);
    assert_eq!(totals.connected, 3);
    assert_eq!(run.results.len(), 3);
    assert_eq!(totals.clients, run.results.len());
    assert_eq!(totals.successes, 12);
    assert_eq!(broker.published(), 12);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_latency_scenario() {
    let broker = MockBroker::new(MockBrokerConfig {
        ack_latency: Duration::from_millis(10),
        ..Default::default()
    });
    let run = run_benchmark(broker, 3, 5).await;

    for result in &run.results {
        assert_eq!(result.successes, 5);
        assert_eq!(result.failures, 0);
        assert_eq!(result.msg_time_min, 10.);
        assert_eq!(result.msg_time_max, 10.);
        assert_eq!(result.msg_time_mean, 10.);
    }

    let totals = run.totals.unwrap();
    assert_eq!(totals.ratio, 1.);
    assert_eq!(totals.msg_time_mean_avg, 10.);
    assert_eq!(totals.msg_time_min, 10.);
    assert_eq!(totals.msg_time_max, 10.);
}

#[tokio::test]
async fn test_unreliable_broker_degrades_statistics_only() {
    let broker = MockBroker::new(MockBrokerConfig {
        publish_error_rate: 0.2,
        ack_error_rate: 0.2,
        seed: Some(3),
        ..Default::default()
    });
    let run = run_benchmark(broker, 5, 40).await;

    let totals = run.totals.unwrap();
    assert_eq!(run.results.len(), 5);
    assert_eq!(totals.successes + totals.failures, 200);
    assert!(totals.failures > 0);
    assert!(totals.ratio < 1.);
    for result in &run.results {
        assert_eq!(result.total(), 40);
    }
}

#[tokio::test]
async fn test_nothing_connected() {
    let broker = MockBroker::new(MockBrokerConfig {
        connect_failure_every: Some(1),
        ..Default::default()
    });
    let run = run_benchmark(broker.clone(), 4, 10).await;

    assert!(run.results.is_empty());
    assert!(run.totals.is_err());
    assert_eq!(broker.published(), 0);
}
