//! Connection phase: connect all virtual clients concurrently
//! and wait until every attempt reported back.

use std::{sync::Arc, time::Duration};

use rama::{rt::Executor, telemetry::tracing};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep},
};

use crate::{
    broker::BrokerConnector,
    client::{ClientConfig, ConnectionOutcome, VirtualClient},
    stats::ConnectionStats,
};

/// Launches the connection attempts of all clients.
#[derive(Debug)]
pub struct ConnectionCoordinator<B> {
    connector: Arc<B>,
    exec: Executor,
    stagger: Duration,
}

impl<B> Clone for ConnectionCoordinator<B> {
    fn clone(&self) -> Self {
        Self {
            connector: self.connector.clone(),
            exec: self.exec.clone(),
            stagger: self.stagger,
        }
    }
}

/// Everything the connection phase produced.
#[derive(Debug)]
pub struct ConnectReport<C> {
    /// Outcomes in arrival order.
    pub outcomes: Vec<ConnectionOutcome<C>>,
    pub stats: ConnectionStats,
}

impl<C> ConnectReport<C> {
    /// Consume the report, keeping only the connected clients.
    pub fn into_connected(self) -> Vec<VirtualClient<C>> {
        self.outcomes
            .into_iter()
            .filter_map(ConnectionOutcome::into_client)
            .collect()
    }
}

impl<B: BrokerConnector> ConnectionCoordinator<B> {
    pub fn new(exec: Executor, connector: Arc<B>) -> Self {
        Self {
            connector,
            exec,
            stagger: Duration::ZERO,
        }
    }

    /// Delay between two consecutive connection launches.
    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn stagger(&self) -> Duration {
        self.stagger
    }

    /// Connect all `clients` and wait for every outcome.
    ///
    /// Attempts run concurrently, each in its own task. Only the launches
    /// are staggered, the attempts themselves are not serialized.
    pub async fn connect(&self, clients: Vec<ClientConfig>) -> ConnectReport<B::Connection> {
        let attempted = clients.len();
        let (tx, mut rx) = mpsc::channel(attempted.max(1));

        tracing::info!(
            clients = attempted,
            stagger = ?self.stagger,
            "connection phase started",
        );
        let phase_start = Instant::now();

        for (i, config) in clients.into_iter().enumerate() {
            if i > 0 && !self.stagger.is_zero() {
                sleep(self.stagger).await;
            }

            self.exec.spawn_task({
                let connector = self.connector.clone();
                let tx = tx.clone();

                async move {
                    let outcome = VirtualClient::connect(Arc::new(config), connector.as_ref()).await;
                    if tx.send(outcome).await.is_err() {
                        tracing::debug!("connection outcome dropped: coordinator is gone");
                    }
                }
            });
        }
        drop(tx);

        let mut outcomes = Vec::with_capacity(attempted);
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        if outcomes.len() != attempted {
            tracing::error!(
                "connection phase lost {} of {attempted} outcomes; treat them as failed",
                attempted - outcomes.len(),
            );
        }

        let connected = outcomes.iter().filter(|o| o.is_connected()).count();
        let last_connect = outcomes
            .iter()
            .filter_map(ConnectionOutcome::connected_at)
            .max()
            .map(|at| at.saturating_duration_since(phase_start));

        let stats = ConnectionStats::compute(attempted, connected, last_connect);
        tracing::info!(
            attempted,
            connected,
            conn_ratio = stats.conn_ratio,
            avg_conn_time_ms = stats.avg_conn_time,
            conn_per_sec = stats.conn_per_sec,
            "connection phase finished",
        );

        ConnectReport { outcomes, stats }
    }
}
