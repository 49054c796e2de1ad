use std::time::Duration;

use mqttbench_lib::broker::mock::MockBrokerConfig;
use rama::error::BoxError;

/// Behaviour of the in-process broker, used with `mock://` brokers only.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct MockArgs {
    /// time the simulated broker takes to accept a connection
    #[arg(long = "mock-connect-latency", value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub connect_latency: Option<Duration>,

    /// time between a publish and its simulated acknowledgement
    #[arg(long = "mock-ack-latency", value_name = "DURATION", value_parser = humantime::parse_duration)]
    pub ack_latency: Option<Duration>,

    /// refuse every n-th connection attempt
    #[arg(long = "mock-connect-failure-every", value_name = "N")]
    pub connect_failure_every: Option<u64>,

    /// chance in [0, 1] that a publish is rejected
    #[arg(long = "mock-publish-error-rate", value_name = "RATE", value_parser = parse_rate)]
    pub publish_error_rate: Option<f64>,

    /// chance in [0, 1] that a delivery is not acknowledged
    #[arg(long = "mock-ack-error-rate", value_name = "RATE", value_parser = parse_rate)]
    pub ack_error_rate: Option<f64>,
}

impl MockArgs {
    pub fn is_defined(&self) -> bool {
        self.connect_latency.is_some()
            || self.ack_latency.is_some()
            || self.connect_failure_every.is_some()
            || self.publish_error_rate.is_some()
            || self.ack_error_rate.is_some()
    }

    pub fn broker_config(&self, seed: Option<u64>) -> MockBrokerConfig {
        MockBrokerConfig {
            connect_latency: self.connect_latency.unwrap_or_default(),
            ack_latency: self.ack_latency.unwrap_or_default(),
            connect_failure_every: self.connect_failure_every.filter(|n| *n > 0),
            publish_error_rate: self.publish_error_rate.unwrap_or_default(),
            ack_error_rate: self.ack_error_rate.unwrap_or_default(),
            seed,
        }
    }
}

fn parse_rate(s: &str) -> Result<f64, BoxError> {
    let rate: f64 = s.trim().parse()?;
    if !(0. ..=1.).contains(&rate) {
        return Err(BoxError::from(format!("rate {rate} is not within [0, 1]")));
    }
    Ok(rate)
}
