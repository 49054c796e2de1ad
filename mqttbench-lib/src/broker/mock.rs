//! In-process simulated broker.
//!
//! Used to exercise the benchmark engine without a network, both from tests
//! and from the CLI (`mock://` broker scheme).

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use rama::{error::BoxError, telemetry::tracing};
use rand::{Rng as _, SeedableRng as _, rngs::SmallRng};
use tokio::time::{Instant, sleep, sleep_until};

use super::{BrokerConnection, BrokerConnector, ConnectRequest, DeliveryAck, QoS};

/// Behaviour of a [`MockBroker`].
#[derive(Debug, Clone, Default)]
pub struct MockBrokerConfig {
    /// Time it takes to accept a connection.
    pub connect_latency: Duration,
    /// Time between a publish and its delivery acknowledgement.
    pub ack_latency: Duration,
    /// Refuse every n-th connection attempt (`2` refuses every other attempt).
    pub connect_failure_every: Option<u64>,
    /// Chance in `[0, 1]` that a publish call itself fails.
    pub publish_error_rate: f64,
    /// Chance in `[0, 1]` that a delivery is not acknowledged.
    pub ack_error_rate: f64,
    /// Seed for the error rate draws, random if not defined.
    pub seed: Option<u64>,
}

#[derive(Debug)]
struct MockState {
    cfg: MockBrokerConfig,
    rng: Mutex<SmallRng>,
    connect_attempts: AtomicU64,
    connections: AtomicU64,
    published: AtomicU64,
    disconnects: AtomicU64,
}

impl MockState {
    fn chance(&self, rate: f64) -> bool {
        if rate <= 0. {
            return false;
        }
        if rate >= 1. {
            return true;
        }
        self.rng.lock().random_bool(rate)
    }
}

/// Simulated broker, cheap to clone: clones share their state and counters.
#[derive(Debug, Clone)]
pub struct MockBroker {
    state: Arc<MockState>,
}

impl MockBroker {
    pub fn new(cfg: MockBrokerConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Self {
            state: Arc::new(MockState {
                cfg,
                rng: Mutex::new(rng),
                connect_attempts: AtomicU64::new(0),
                connections: AtomicU64::new(0),
                published: AtomicU64::new(0),
                disconnects: AtomicU64::new(0),
            }),
        }
    }

    pub fn connect_attempts(&self) -> u64 {
        self.state.connect_attempts.load(Ordering::Acquire)
    }

    pub fn connections(&self) -> u64 {
        self.state.connections.load(Ordering::Acquire)
    }

    pub fn published(&self) -> u64 {
        self.state.published.load(Ordering::Acquire)
    }

    pub fn disconnects(&self) -> u64 {
        self.state.disconnects.load(Ordering::Acquire)
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new(MockBrokerConfig::default())
    }
}

impl BrokerConnector for MockBroker {
    type Connection = MockConnection;

    async fn connect(&self, request: ConnectRequest) -> Result<Self::Connection, BoxError> {
        let attempt = self.state.connect_attempts.fetch_add(1, Ordering::AcqRel) + 1;

        let latency = self.state.cfg.connect_latency;
        if latency > request.timeout {
            sleep(request.timeout).await;
            return Err(BoxError::from(format!(
                "mock broker: connect timeout for client '{}' after {:?}",
                request.client_id, request.timeout
            )));
        }
        if !latency.is_zero() {
            sleep(latency).await;
        }

        if let Some(every) = self.state.cfg.connect_failure_every
            && every > 0
            && attempt.is_multiple_of(every)
        {
            return Err(BoxError::from(format!(
                "mock broker: refused connection attempt #{attempt} of client '{}'",
                request.client_id
            )));
        }

        self.state.connections.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(client_id = %request.client_id, %attempt, "mock broker: connection accepted");

        Ok(MockConnection {
            state: self.state.clone(),
            client_id: request.client_id,
        })
    }
}

#[derive(Debug)]
pub struct MockConnection {
    state: Arc<MockState>,
    client_id: String,
}

impl BrokerConnection for MockConnection {
    type Ack = MockAck;

    async fn publish(&self, topic: &str, qos: QoS, payload: Vec<u8>) -> Result<MockAck, BoxError> {
        if self.state.chance(self.state.cfg.publish_error_rate) {
            return Err(BoxError::from(format!(
                "mock broker: publish to '{topic}' rejected for client '{}'",
                self.client_id
            )));
        }

        self.state.published.fetch_add(1, Ordering::AcqRel);
        tracing::trace!(
            client_id = %self.client_id,
            %topic,
            %qos,
            payload.size = payload.len(),
            "mock broker: message published",
        );

        Ok(MockAck {
            deadline: Instant::now() + self.state.cfg.ack_latency,
            fail: self.state.chance(self.state.cfg.ack_error_rate),
        })
    }

    async fn disconnect(&self) {
        self.state.disconnects.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Debug)]
pub struct MockAck {
    deadline: Instant,
    fail: bool,
}

impl DeliveryAck for MockAck {
    async fn wait(self) -> Result<(), BoxError> {
        sleep_until(self.deadline).await;
        if self.fail {
            Err(BoxError::from("mock broker: delivery not acknowledged"))
        } else {
            Ok(())
        }
    }
}
