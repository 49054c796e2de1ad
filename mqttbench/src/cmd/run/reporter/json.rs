use std::io::Write;

use mqttbench_lib::{
    aggregate::AggregateResult,
    stats::{ConnectionStats, RunResult},
};
use rama::error::{BoxError, ErrorContext as _};
use serde_json::{Value, json};

use super::Reporter;

/// A single JSON document with every client result and the totals.
pub struct JsonReporter<W> {
    out: W,
    runs: Vec<Value>,
}

impl<W> JsonReporter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            runs: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(super) fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> Reporter for JsonReporter<W> {
    fn on_connect_phase(&mut self, _stats: &ConnectionStats) -> Result<(), BoxError> {
        Ok(())
    }

    fn on_run_result(&mut self, r: &RunResult) -> Result<(), BoxError> {
        self.runs.push(json!({
            "id": r.client_index,
            "client_id": r.client_id,
            "successes": r.successes,
            "failures": r.failures,
            "run_time": r.run_time.as_secs_f64(),
            "msg_time_min": r.msg_time_min,
            "msg_time_max": r.msg_time_max,
            "msg_time_mean": r.msg_time_mean,
            "msgs_per_sec": r.msgs_per_sec,
        }));
        Ok(())
    }

    fn finish(&mut self, t: &AggregateResult) -> Result<(), BoxError> {
        let doc = json!({
            "runs": std::mem::take(&mut self.runs),
            "totals": {
                "conn_ratio": t.conn_ratio,
                "avg_conn_time": t.avg_conn_time,
                "conn_per_sec": t.conn_per_sec,
                "ratio": t.ratio,
                "successes": t.successes,
                "failures": t.failures,
                "total_run_time": t.total_run_time.as_secs_f64(),
                "avg_run_time": t.avg_run_time.as_secs_f64(),
                "msg_time_min": t.msg_time_min,
                "msg_time_max": t.msg_time_max,
                "msg_time_mean_avg": t.msg_time_mean_avg,
                "total_msgs_per_sec": t.total_msgs_per_sec,
                "avg_msgs_per_sec": t.avg_msgs_per_sec,
            },
        });

        serde_json::to_writer_pretty(&mut self.out, &doc).context("write json report")?;
        writeln!(self.out)
            .and_then(|_| self.out.flush())
            .context("write json report")
    }
}
