use std::{sync::Arc, time::Duration};

use clap::Args;
use mqttbench_lib::{
    aggregate::aggregate,
    broker::{BrokerConnector, BrokerScheme, mock::MockBroker},
    client::ClientConfig,
    coordinator::ConnectionCoordinator,
    pipeline::PublishPhase,
};
use rama::{
    error::{BoxError, ErrorContext as _, ErrorExt as _},
    graceful::ShutdownGuard,
    rt::Executor,
    telemetry::tracing,
};

use crate::{
    broker::mqtt::MqttConnector,
    config::{ClientArgs, MockArgs},
};

pub mod reporter;

use self::reporter::*;

#[derive(Debug, Clone, Args)]
/// run the publish benchmark
pub struct RunCommand {
    #[command(flatten)]
    client: ClientArgs,

    #[command(flatten)]
    mock: MockArgs,

    /// report json instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,

    /// seed for the `${randN}` payload placeholders, random if not defined
    #[arg(long)]
    seed: Option<u64>,

    /// abort the benchmark when it did not finish within this duration
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    deadline: Option<Duration>,
}

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), BoxError> {
    let configs = args
        .client
        .client_configs()
        .await
        .context("prepare client configs")?;

    let reporter: Box<dyn Reporter> = if args.json {
        Box::new(JsonReporter::new(std::io::stdout()))
    } else {
        Box::new(HumanReporter::new(std::io::stdout()))
    };

    let benchmark = Benchmark {
        exec: Executor::graceful(guard.clone()),
        stagger: args.client.conn_wait(),
        seed: args.seed,
        reporter,
    };

    let RunCommand {
        client,
        mock,
        seed,
        deadline,
        ..
    } = args;

    let run = async move {
        if client.broker.scheme == BrokerScheme::Mock {
            benchmark
                .run(MockBroker::new(mock.broker_config(seed)), configs)
                .await
        } else {
            if mock.is_defined() {
                tracing::warn!("mock broker arguments are ignored for a non-mock broker");
            }
            let connector = MqttConnector::new(benchmark.exec.clone());
            benchmark.run(connector, configs).await
        }
    };

    let expired = async {
        match deadline {
            Some(deadline) => tokio::time::sleep(deadline).await,
            None => std::future::pending().await,
        }
    };

    let cancelled = guard.clone_weak().into_cancelled();

    tokio::select! {
        _ = cancelled => {
            tracing::error!("exit benchmark early: guard shutdown");
            Err(BoxError::from("benchmark cancelled"))
        }
        _ = expired => {
            Err(BoxError::from("benchmark deadline expired")
                .context_debug_field("deadline", deadline))
        }
        result = run => result,
    }
}

struct Benchmark {
    exec: Executor,
    stagger: Duration,
    seed: Option<u64>,
    reporter: Box<dyn Reporter>,
}

impl Benchmark {
    /// Connect all clients, run their publish pipelines and report the outcome.
    async fn run<B: BrokerConnector>(
        mut self,
        connector: B,
        configs: Vec<ClientConfig>,
    ) -> Result<(), BoxError> {
        let report = ConnectionCoordinator::new(self.exec.clone(), Arc::new(connector))
            .with_stagger(self.stagger)
            .connect(configs)
            .await;

        let conn_stats = report.stats.clone();
        self.reporter.on_connect_phase(&conn_stats)?;

        let mut publish = PublishPhase::new(self.exec.clone())
            .with_seed(self.seed)
            .run(report.into_connected())
            .await;

        publish.results.sort_by_key(|r| r.client_index);
        for result in &publish.results {
            self.reporter.on_run_result(result)?;
        }

        let totals = aggregate(&publish.results, &conn_stats, publish.elapsed)?;
        self.reporter.finish(&totals)
    }
}
