use std::{num::NonZeroU64, sync::Arc, time::Duration};

use rama::{error::BoxError, telemetry::tracing};
use tokio::time::Instant;

use crate::{
    broker::{BrokerConnector, BrokerTarget, ConnectRequest, Credentials, QoS, TlsMaterial},
    payload::PayloadSpec,
};

/// Configuration of a single simulated publisher.
///
/// Immutable once its [`VirtualClient`] is started.
#[derive(Debug)]
pub struct ClientConfig {
    /// Position of the client in the benchmark, starting at `0`.
    pub index: usize,
    pub client_id: String,
    pub broker: BrokerTarget,
    pub credentials: Option<Credentials>,
    pub topic: String,
    pub payload: PayloadSpec,
    /// Amount of messages the client publishes.
    pub msg_count: NonZeroU64,
    pub qos: QoS,
    /// Pause after every publish, before the next one is sent.
    pub wait: Duration,
    pub tls: Option<Arc<TlsMaterial>>,
    /// Upper bound for establishing the connection.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            target: self.broker.clone(),
            client_id: self.client_id.clone(),
            credentials: self.credentials.clone(),
            tls: self.tls.clone(),
            timeout: self.connect_timeout,
        }
    }
}

/// A simulated publisher with an established broker connection.
#[derive(Debug)]
pub struct VirtualClient<C> {
    config: Arc<ClientConfig>,
    connection: C,
}

impl<C> VirtualClient<C> {
    pub fn new(config: Arc<ClientConfig>, connection: C) -> Self {
        Self { config, connection }
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        &self.config
    }

    pub fn into_parts(self) -> (Arc<ClientConfig>, C) {
        (self.config, self.connection)
    }

    /// Attempt to connect the client described by `config`.
    ///
    /// Connection failures are not retried: a failed client
    /// is excluded from the publish phase.
    pub async fn connect<B>(config: Arc<ClientConfig>, connector: &B) -> ConnectionOutcome<C>
    where
        B: BrokerConnector<Connection = C>,
    {
        match connector.connect(config.connect_request()).await {
            Ok(connection) => {
                let connected_at = Instant::now();
                tracing::debug!(
                    client.index = config.index,
                    client.id = %config.client_id,
                    "client connected",
                );
                ConnectionOutcome::Connected {
                    client: Self::new(config, connection),
                    connected_at,
                }
            }
            Err(error) => {
                tracing::warn!(
                    client.index = config.index,
                    client.id = %config.client_id,
                    "client {} fail to conn: {error}",
                    config.index,
                );
                ConnectionOutcome::Failed { config, error }
            }
        }
    }
}

/// Outcome of a single connection attempt.
#[derive(Debug)]
pub enum ConnectionOutcome<C> {
    Connected {
        client: VirtualClient<C>,
        connected_at: Instant,
    },
    Failed {
        config: Arc<ClientConfig>,
        error: BoxError,
    },
}

impl<C> ConnectionOutcome<C> {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn config(&self) -> &Arc<ClientConfig> {
        match self {
            Self::Connected { client, .. } => client.config(),
            Self::Failed { config, .. } => config,
        }
    }

    pub fn connected_at(&self) -> Option<Instant> {
        match self {
            Self::Connected { connected_at, .. } => Some(*connected_at),
            Self::Failed { .. } => None,
        }
    }

    pub fn into_client(self) -> Option<VirtualClient<C>> {
        match self {
            Self::Connected { client, .. } => Some(client),
            Self::Failed { .. } => None,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::broker::mock::{MockBroker, MockBrokerConfig};

    pub(crate) fn test_client_config(index: usize, msg_count: u64) -> ClientConfig {
        ClientConfig {
            index,
            client_id: format!("mqtt-benchmark-{index}"),
            broker: "mock://local".parse().unwrap(),
            credentials: None,
            topic: "/test".to_owned(),
            payload: PayloadSpec::default(),
            msg_count: NonZeroU64::new(msg_count).unwrap(),
            qos: QoS::AtLeastOnce,
            wait: Duration::ZERO,
            tls: None,
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_connect_success() {
        let broker = MockBroker::default();
        let outcome =
            VirtualClient::connect(Arc::new(test_client_config(3, 1)), &broker).await;

        assert!(outcome.is_connected());
        assert!(outcome.connected_at().is_some());
        assert_eq!(outcome.config().index, 3);

        let client = outcome.into_client().unwrap();
        assert_eq!(client.config().client_id, "mqtt-benchmark-3");
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let broker = MockBroker::new(MockBrokerConfig {
            connect_failure_every: Some(1),
            ..Default::default()
        });
        let outcome =
            VirtualClient::connect(Arc::new(test_client_config(0, 1)), &broker).await;

        assert!(!outcome.is_connected());
        assert!(outcome.connected_at().is_none());
        assert_eq!(outcome.config().index, 0);
        assert!(outcome.into_client().is_none());
    }
}
