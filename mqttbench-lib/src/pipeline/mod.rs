//! Publish phase: one generator / publisher / collector pipeline
//! per connected client.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use rama::{error::BoxError, rt::Executor, telemetry::tracing};
use rand::{SeedableRng as _, rngs::SmallRng};
use tokio::{
    sync::mpsc,
    time::{Instant, sleep},
};

use crate::{
    broker::{BrokerConnection, DeliveryAck},
    client::{ClientConfig, VirtualClient},
    message::Message,
    payload::PayloadTemplate,
    stats::{RunResult, Tally},
};

/// Upper bound of completed messages waiting for the collector.
const COMPLETION_QUEUE_CAPACITY: usize = 1024;

/// Runs the publish workload of a single connected client.
#[derive(Debug)]
pub struct PublishPipeline<C> {
    exec: Executor,
    client: VirtualClient<C>,
    rng: SmallRng,
}

impl<C: BrokerConnection> PublishPipeline<C> {
    pub fn new(exec: Executor, client: VirtualClient<C>, rng: SmallRng) -> Self {
        Self { exec, client, rng }
    }

    /// Publish exactly `msg_count` messages and wait until each
    /// of them is either delivered or failed.
    ///
    /// There is no timeout: a broker which never acknowledges
    /// a publish stalls the pipeline.
    pub async fn run(self) -> Result<RunResult, BoxError> {
        let Self { exec, client, rng } = self;
        let (config, connection) = client.into_parts();
        let connection = Arc::new(connection);

        tracing::debug!(
            client.index = config.index,
            client.id = %config.client_id,
            msg_count = config.msg_count.get(),
            "publish pipeline started",
        );
        let start = Instant::now();

        let (msg_tx, msg_rx) = mpsc::channel(1);
        let completion_capacity = usize::try_from(config.msg_count.get())
            .map_or(COMPLETION_QUEUE_CAPACITY, |n| n.min(COMPLETION_QUEUE_CAPACITY));
        let (done_tx, mut done_rx) = mpsc::channel(completion_capacity);

        exec.spawn_task(generate(config.clone(), msg_tx));
        exec.spawn_task(publish(
            exec.clone(),
            config.clone(),
            connection.clone(),
            rng,
            msg_rx,
            done_tx,
        ));

        let mut tally = Tally::new(config.msg_count);
        while !tally.is_complete() {
            let Some(msg) = done_rx.recv().await else {
                break;
            };
            tally.record(&msg);
        }
        let run_time = start.elapsed();
        drop(done_rx);

        connection.disconnect().await;

        if !tally.is_complete() {
            return Err(BoxError::from(format!(
                "publish pipeline of client {} ended after {} of {} messages",
                config.index,
                tally.accounted(),
                config.msg_count,
            )));
        }

        let result = tally.finish(&config, run_time);
        tracing::info!(
            client.index = result.client_index,
            client.id = %result.client_id,
            successes = result.successes,
            failures = result.failures,
            run_time = ?result.run_time,
            msgs_per_sec = result.msgs_per_sec,
            "publish pipeline finished",
        );
        Ok(result)
    }
}

/// Produce the client's messages. Dropping `tx` marks the end of the stream.
async fn generate(config: Arc<ClientConfig>, tx: mpsc::Sender<Message>) {
    let topic: Arc<str> = Arc::from(config.topic.as_str());

    for index in 0..config.msg_count.get() {
        let msg = Message::new(index, topic.clone(), config.qos);
        if tx.send(msg).await.is_err() {
            tracing::debug!(
                client.index = config.index,
                "generator stopped at message #{index}: publisher is gone",
            );
            return;
        }
    }
}

/// Send messages one at a time, spawning an ack waiter for each publish.
///
/// Payloads are rendered right before their publish,
/// so `${createTs}` is the actual send time.
async fn publish<C: BrokerConnection>(
    exec: Executor,
    config: Arc<ClientConfig>,
    connection: Arc<C>,
    mut rng: SmallRng,
    mut rx: mpsc::Receiver<Message>,
    done_tx: mpsc::Sender<Message>,
) {
    let template = PayloadTemplate::compile(&config.payload);

    while let Some(mut msg) = rx.recv().await {
        if done_tx.is_closed() {
            break;
        }

        let payload = template.render(SystemTime::now(), &mut rng);
        msg.mark_sent(Instant::now());

        match connection.publish(&msg.topic, msg.qos, payload).await {
            Ok(ack) => {
                exec.spawn_task(wait_for_ack(config.index, msg, ack, done_tx.clone()));
            }
            Err(err) => {
                tracing::debug!(
                    client.index = config.index,
                    msg.index = msg.index,
                    "publish failed: {err}",
                );
                msg.mark_failed();
                if done_tx.send(msg).await.is_err() {
                    break;
                }
            }
        }

        if !config.wait.is_zero() {
            sleep(config.wait).await;
        }
    }
}

async fn wait_for_ack<A: DeliveryAck>(
    client_index: usize,
    mut msg: Message,
    ack: A,
    done_tx: mpsc::Sender<Message>,
) {
    tokio::select! {
        result = ack.wait() => {
            match result {
                Ok(()) => msg.mark_delivered(Instant::now()),
                Err(err) => {
                    tracing::debug!(
                        client.index = client_index,
                        msg.index = msg.index,
                        "delivery failed: {err}",
                    );
                    msg.mark_failed();
                }
            }
            let _ = done_tx.send(msg).await;
        }
        _ = done_tx.closed() => {
            tracing::trace!(
                client.index = client_index,
                msg.index = msg.index,
                "collector is gone: stop waiting for ack",
            );
        }
    }
}

/// Results of the publish phase of all clients.
#[derive(Debug, Clone)]
pub struct PublishReport {
    /// One result per finished client, in completion order.
    pub results: Vec<RunResult>,
    /// Wall time of the publish phase as a whole.
    pub elapsed: Duration,
}

/// Fans out one [`PublishPipeline`] per connected client.
#[derive(Debug, Clone)]
pub struct PublishPhase {
    exec: Executor,
    seed: Option<u64>,
}

impl PublishPhase {
    pub fn new(exec: Executor) -> Self {
        Self { exec, seed: None }
    }

    /// Seed the `${randN}` source: client `i` uses `seed + i`.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    fn client_rng(&self, index: usize) -> SmallRng {
        match self.seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(index as u64)),
            None => SmallRng::from_os_rng(),
        }
    }

    /// Run all client pipelines concurrently and wait until every one of them finished.
    pub async fn run<C: BrokerConnection>(&self, clients: Vec<VirtualClient<C>>) -> PublishReport {
        let expected = clients.len();
        let (tx, mut rx) = mpsc::channel(expected.max(1));

        tracing::info!(clients = expected, "publish phase started");
        let start = Instant::now();

        for client in clients {
            let rng = self.client_rng(client.config().index);
            let pipeline = PublishPipeline::new(self.exec.clone(), client, rng);
            let tx = tx.clone();
            self.exec.spawn_task(async move {
                let _ = tx.send(pipeline.run().await).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(expected);
        while let Some(result) = rx.recv().await {
            match result {
                Ok(result) => results.push(result),
                Err(err) => tracing::error!("client dropped from the results: {err}"),
            }
        }
        let elapsed = start.elapsed();

        tracing::info!(
            clients = expected,
            finished = results.len(),
            elapsed = ?elapsed,
            "publish phase finished",
        );
        PublishReport { results, elapsed }
    }
}
