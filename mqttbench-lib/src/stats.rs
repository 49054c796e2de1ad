//! Per-client and connection-phase statistics.

use std::{num::NonZeroU64, time::Duration};

use crate::{
    client::ClientConfig,
    message::Message,
    utils::time::{millis_f64, per_second},
};

/// Smallest elapsed time used as divisor for the connection rate,
/// so connections landing within one timer tick do not yield an infinite rate.
pub const MIN_CONNECT_PHASE_ELAPSED: Duration = Duration::from_millis(1);

/// Streaming min / max / mean over latency samples in milliseconds.
///
/// An empty summary reports `0` for all of its values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencySummary {
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl LatencySummary {
    pub fn record(&mut self, ms: f64) {
        if self.count == 0 {
            self.min = ms;
            self.max = ms;
        } else {
            self.min = self.min.min(ms);
            self.max = self.max.max(ms);
        }
        self.sum += ms;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Results of a single client's publish phase.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    pub client_index: usize,
    pub client_id: String,
    pub successes: u64,
    pub failures: u64,
    /// Wall time from pipeline start until the last message was accounted for.
    pub run_time: Duration,
    /// Fastest delivery (ms), `0` if no message was delivered.
    pub msg_time_min: f64,
    /// Slowest delivery (ms), `0` if no message was delivered.
    pub msg_time_max: f64,
    /// Mean delivery time (ms), `0` if no message was delivered.
    pub msg_time_mean: f64,
    /// Delivered messages per second of run time.
    pub msgs_per_sec: f64,
}

impl RunResult {
    pub fn total(&self) -> u64 {
        self.successes + self.failures
    }

    /// `false` when the latency fields carry no data.
    pub fn has_latency_samples(&self) -> bool {
        self.successes > 0
    }
}

/// Completion tally of one client, owned by its collector.
#[derive(Debug)]
pub struct Tally {
    expected: NonZeroU64,
    successes: u64,
    failures: u64,
    latency: LatencySummary,
}

impl Tally {
    pub fn new(expected: NonZeroU64) -> Self {
        Self {
            expected,
            successes: 0,
            failures: 0,
            latency: LatencySummary::default(),
        }
    }

    /// Account for a completed message.
    ///
    /// Returns `false` and ignores the message once
    /// the expected amount of messages is reached.
    pub fn record(&mut self, msg: &Message) -> bool {
        if self.is_complete() {
            return false;
        }
        match msg.latency() {
            Some(latency) => {
                self.successes += 1;
                self.latency.record(millis_f64(latency));
            }
            None => self.failures += 1,
        }
        true
    }

    pub fn accounted(&self) -> u64 {
        self.successes + self.failures
    }

    pub fn is_complete(&self) -> bool {
        self.accounted() >= self.expected.get()
    }

    pub fn finish(self, config: &ClientConfig, run_time: Duration) -> RunResult {
        RunResult {
            client_index: config.index,
            client_id: config.client_id.clone(),
            successes: self.successes,
            failures: self.failures,
            run_time,
            msg_time_min: self.latency.min(),
            msg_time_max: self.latency.max(),
            msg_time_mean: self.latency.mean(),
            msgs_per_sec: per_second(self.successes, run_time),
        }
    }
}

/// Statistics of the connection phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStats {
    pub attempted: usize,
    pub connected: usize,
    /// Time from the start of the phase until the last successful connect.
    pub last_connect: Option<Duration>,
    /// `connected / attempted`.
    pub conn_ratio: f64,
    /// Average connect time (ms): `last_connect / connected`.
    pub avg_conn_time: f64,
    /// Connections established per second: `connected / last_connect`.
    pub conn_per_sec: f64,
}

impl ConnectionStats {
    /// Compute the connection-phase statistics.
    ///
    /// When no client connected all ratios are `0`.
    pub fn compute(attempted: usize, connected: usize, last_connect: Option<Duration>) -> Self {
        let conn_ratio = if attempted == 0 {
            0.
        } else {
            connected as f64 / attempted as f64
        };

        let (avg_conn_time, conn_per_sec) = match last_connect {
            Some(elapsed) if connected > 0 => (
                millis_f64(elapsed) / connected as f64,
                per_second(connected as u64, elapsed.max(MIN_CONNECT_PHASE_ELAPSED)),
            ),
            _ => (0., 0.),
        };

        Self {
            attempted,
            connected,
            last_connect,
            conn_ratio,
            avg_conn_time,
            conn_per_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;
    use crate::{broker::QoS, client::tests::test_client_config};

    fn completed(latency: Option<Duration>) -> Message {
        let mut msg = Message::new(0, Arc::from("/test"), QoS::AtLeastOnce);
        let sent = Instant::now();
        msg.mark_sent(sent);
        match latency {
            Some(latency) => msg.mark_delivered(sent + latency),
            None => msg.mark_failed(),
        }
        msg
    }

    #[test]
    fn test_latency_summary() {
        let mut summary = LatencySummary::default();
        assert_eq!(summary.mean(), 0.);
        assert_eq!(summary.min(), 0.);
        assert_eq!(summary.max(), 0.);

        for ms in [5., 1., 9., 5.] {
            summary.record(ms);
        }
        assert_eq!(summary.count(), 4);
        assert_eq!(summary.min(), 1.);
        assert_eq!(summary.max(), 9.);
        assert_eq!(summary.mean(), 5.);
    }

    #[test]
    fn test_tally_never_exceeds_expected() {
        let mut tally = Tally::new(NonZeroU64::new(3).unwrap());
        assert!(tally.record(&completed(Some(Duration::from_millis(2)))));
        assert!(tally.record(&completed(None)));
        assert!(!tally.is_complete());
        assert!(tally.record(&completed(Some(Duration::from_millis(4)))));
        assert!(tally.is_complete());

        assert!(!tally.record(&completed(None)));
        assert!(!tally.record(&completed(Some(Duration::from_millis(1)))));
        assert_eq!(tally.accounted(), 3);

        let config = test_client_config(7, 3);
        let result = tally.finish(&config, Duration::from_secs(2));
        assert_eq!(result.client_index, 7);
        assert_eq!(result.successes, 2);
        assert_eq!(result.failures, 1);
        assert_eq!(result.total(), 3);
        assert_eq!(result.msg_time_min, 2.);
        assert_eq!(result.msg_time_max, 4.);
        assert_eq!(result.msg_time_mean, 3.);
        assert_eq!(result.msgs_per_sec, 1.);
    }

    #[test]
    fn test_tally_without_successes() {
        let mut tally = Tally::new(NonZeroU64::new(2).unwrap());
        tally.record(&completed(None));
        tally.record(&completed(None));

        let result = tally.finish(&test_client_config(0, 2), Duration::from_secs(1));
        assert!(!result.has_latency_samples());
        assert_eq!(result.msg_time_min, 0.);
        assert_eq!(result.msg_time_max, 0.);
        assert_eq!(result.msg_time_mean, 0.);
        assert_eq!(result.msgs_per_sec, 0.);
        assert!(!result.msg_time_mean.is_nan());
    }

    #[test]
    fn test_connection_stats() {
        let stats = ConnectionStats::compute(10, 5, Some(Duration::from_millis(500)));
        assert_eq!(stats.conn_ratio, 0.5);
        assert_eq!(stats.avg_conn_time, 100.);
        assert_eq!(stats.conn_per_sec, 10.);
    }

    #[test]
    fn test_connection_stats_without_connections() {
        let stats = ConnectionStats::compute(4, 0, None);
        assert_eq!(stats.conn_ratio, 0.);
        assert_eq!(stats.avg_conn_time, 0.);
        assert_eq!(stats.conn_per_sec, 0.);
    }

    #[test]
    fn test_connection_stats_floors_elapsed() {
        let stats = ConnectionStats::compute(3, 3, Some(Duration::ZERO));
        assert_eq!(stats.conn_ratio, 1.);
        assert_eq!(stats.avg_conn_time, 0.);
        assert!((stats.conn_per_sec - 3000.).abs() < 1e-6);
    }
}
