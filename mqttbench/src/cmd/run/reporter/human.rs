use std::io::Write;

use mqttbench_lib::{
    aggregate::AggregateResult,
    stats::{ConnectionStats, RunResult},
};
use rama::error::{BoxError, ErrorContext as _};

use super::Reporter;

/// Plain text report, meant to be read by humans.
pub struct HumanReporter<W> {
    out: W,
}

impl<W> HumanReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    #[cfg(test)]
    pub(super) fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> Reporter for HumanReporter<W> {
    fn on_connect_phase(&mut self, stats: &ConnectionStats) -> Result<(), BoxError> {
        writeln!(
            self.out,
            ">>>>>> {}/{} clients connected, start publishing...",
            stats.connected, stats.attempted,
        )
        .context("write connect phase report")
    }

    fn on_run_result(&mut self, _result: &RunResult) -> Result<(), BoxError> {
        Ok(())
    }

    fn finish(&mut self, t: &AggregateResult) -> Result<(), BoxError> {
        let out = &mut self.out;
        writeln!(out, "========= TOTAL ({}) =========", t.clients)
            .and_then(|_| writeln!(out, "Connect Ratio:               {:.3}", t.conn_ratio))
            .and_then(|_| writeln!(out, "Average Connect Time (ms):   {:.3}", t.avg_conn_time))
            .and_then(|_| writeln!(out, "Connect Speed (conn/sec):    {:.3}", t.conn_per_sec))
            .and_then(|_| {
                writeln!(
                    out,
                    "Total Ratio:                 {:.3} ({}/{})",
                    t.ratio,
                    t.successes,
                    t.successes + t.failures,
                )
            })
            .and_then(|_| {
                writeln!(
                    out,
                    "Total Runtime (sec):         {:.3}",
                    t.total_run_time.as_secs_f64()
                )
            })
            .and_then(|_| {
                writeln!(
                    out,
                    "Average Runtime (sec):       {:.3}",
                    t.avg_run_time.as_secs_f64()
                )
            })
            .and_then(|_| writeln!(out, "Msg time min (ms):           {:.3}", t.msg_time_min))
            .and_then(|_| writeln!(out, "Msg time max (ms):           {:.3}", t.msg_time_max))
            .and_then(|_| writeln!(out, "Msg time mean mean (ms):     {:.3}", t.msg_time_mean_avg))
            .and_then(|_| writeln!(out, "Average Bandwidth (msg/sec): {:.3}", t.avg_msgs_per_sec))
            .and_then(|_| writeln!(out, "Total Bandwidth (msg/sec):   {:.3}", t.total_msgs_per_sec))
            .and_then(|_| out.flush())
            .context("write human report")
    }
}
