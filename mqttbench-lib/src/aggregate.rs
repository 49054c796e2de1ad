//! Combine the per-client results into the numbers of a whole benchmark run.

use std::time::Duration;

use rama::error::BoxError;

use crate::{
    stats::{ConnectionStats, RunResult},
    utils::time::per_second,
};

/// Totals of a benchmark run.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateResult {
    pub attempted: usize,
    pub connected: usize,
    /// Clients that reported a run result.
    pub clients: usize,
    pub conn_ratio: f64,
    /// Average connect time (ms).
    pub avg_conn_time: f64,
    pub conn_per_sec: f64,
    /// Successes over all accounted messages.
    pub ratio: f64,
    pub successes: u64,
    pub failures: u64,
    /// Wall time of the publish phase.
    pub total_run_time: Duration,
    pub avg_run_time: Duration,
    /// Fastest delivery (ms) of any client.
    pub msg_time_min: f64,
    /// Slowest delivery (ms) of any client.
    pub msg_time_max: f64,
    /// Mean of the per-client mean delivery times (ms).
    pub msg_time_mean_avg: f64,
    /// Successes per second of publish-phase wall time.
    pub total_msgs_per_sec: f64,
    /// Mean of the per-client throughput.
    pub avg_msgs_per_sec: f64,
}

/// Aggregate the results of all clients that made it through the publish phase.
///
/// Latency figures only consider clients with at least one delivered message,
/// and are `0` when no client delivered anything.
/// Fails when there is no result to aggregate.
pub fn aggregate(
    results: &[RunResult],
    conn: &ConnectionStats,
    total_run_time: Duration,
) -> Result<AggregateResult, BoxError> {
    if results.is_empty() {
        return Err(BoxError::from(format!(
            "no results to aggregate: {} of {} clients connected",
            conn.connected, conn.attempted,
        )));
    }
    let n = results.len() as f64;

    let successes: u64 = results.iter().map(|r| r.successes).sum();
    let failures: u64 = results.iter().map(|r| r.failures).sum();
    let total = successes + failures;
    let ratio = if total == 0 {
        0.
    } else {
        successes as f64 / total as f64
    };

    let run_time_sum: Duration = results.iter().map(|r| r.run_time).sum();
    let avg_run_time = run_time_sum.div_f64(n);

    let mut msg_time_min = f64::INFINITY;
    let mut msg_time_max = f64::NEG_INFINITY;
    let mut mean_sum = 0.;
    let mut sampled = 0usize;
    for result in results.iter().filter(|r| r.has_latency_samples()) {
        msg_time_min = msg_time_min.min(result.msg_time_min);
        msg_time_max = msg_time_max.max(result.msg_time_max);
        mean_sum += result.msg_time_mean;
        sampled += 1;
    }
    let (msg_time_min, msg_time_max, msg_time_mean_avg) = if sampled == 0 {
        (0., 0., 0.)
    } else {
        (msg_time_min, msg_time_max, mean_sum / sampled as f64)
    };

    let avg_msgs_per_sec = results.iter().map(|r| r.msgs_per_sec).sum::<f64>() / n;

    Ok(AggregateResult {
        attempted: conn.attempted,
        connected: conn.connected,
        clients: results.len(),
        conn_ratio: conn.conn_ratio,
        avg_conn_time: conn.avg_conn_time,
        conn_per_sec: conn.conn_per_sec,
        ratio,
        successes,
        failures,
        total_run_time,
        avg_run_time,
        msg_time_min,
        msg_time_max,
        msg_time_mean_avg,
        total_msgs_per_sec: per_second(successes, total_run_time),
        avg_msgs_per_sec,
    })
}
