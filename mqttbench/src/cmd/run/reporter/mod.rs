use mqttbench_lib::{
    aggregate::AggregateResult,
    stats::{ConnectionStats, RunResult},
};
use rama::error::BoxError;

mod human;
mod json;

pub use self::{human::HumanReporter, json::JsonReporter};

/// Renders the outcome of a benchmark run.
pub trait Reporter: Send + 'static {
    /// Called once all connection attempts reported back.
    fn on_connect_phase(&mut self, stats: &ConnectionStats) -> Result<(), BoxError>;
    /// Called for every client that finished its publish phase.
    fn on_run_result(&mut self, result: &RunResult) -> Result<(), BoxError>;
    fn finish(&mut self, totals: &AggregateResult) -> Result<(), BoxError>;
}
