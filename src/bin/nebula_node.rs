//! `nebula-node` is the executable entry point for one peer in a
//! federated-learning experiment: it loads a scenario configuration,
//! wires up logging, builds an [`Engine`] from the configured
//! aggregator/reputation/role, and drives it through the experiment.

#![forbid(unsafe_code)]
#![warn(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications
)]

use std::net::SocketAddr;
use std::process::exit;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use color_eyre::eyre::{eyre, Result, WrapErr};
use structopt::StructOpt;
use tracing::{error, info, warn};
use tracing_subscriber::filter::EnvFilter;

use nebula_core::aggregation::fedavg::FedAvg;
use nebula_core::aggregation::krum::Krum;
use nebula_core::aggregation::median::Median;
use nebula_core::aggregation::trimmed_mean::TrimmedMean;
use nebula_core::aggregation::Aggregator;
use nebula_core::config::{AlgorithmKind, Cli, Config};
use nebula_core::controller::ControllerClient;
use nebula_core::engine::Engine;
use nebula_core::parameter_store::DenseParameters;
use nebula_core::reputation::WeightingMode;
use nebula_core::role::{Aggregator as AggregatorRole, IdleOrProxy, RoleBehavior, Server, Trainer, TrainerAggregator};
use nebula_core::training::Trainer as TrainerBackend;

const MODULE_NAME: &str = "nebula_core";

/// Runs one node. Exit codes: 0 normal, 1 configuration error,
/// 2 fatal runtime error, 130 interrupted.
fn main() -> Result<()> {
    color_eyre::install()?;

    let rt = tokio::runtime::Runtime::new().wrap_err("failed to start the tokio runtime")?;
    match rt.block_on(run_node()) {
        Ok(()) => Ok(()),
        Err(report) => {
            if let Some(error) = report.downcast_ref::<nebula_core::Error>() {
                let code = error.exit_code();
                error!(%error, "node exiting after a fatal error");
                exit(code);
            }
            Err(report)
        }
    }
}

async fn run_node() -> Result<()> {
    let cli = Cli::from_args();
    let config = Config::from_cli(cli).map_err(|error| eyre!(error))?;

    init_logging(&config);

    let message = format!("starting nebula-node v{}", env!("CARGO_PKG_VERSION"));
    info!("{}", message);

    let local = config.local_id().map_err(|error| eyre!(error))?;
    let neighbors = config.neighbors().map_err(|error| eyre!(error))?;

    let aggregator = build_aggregator(&config);
    let role = build_role(&config);
    let controller = config.controller_url().map(ControllerClient::new);
    // `network.subnet` is a free-text scenario label (used by the launcher
    // to group nodes), not a shaping profile; there is no rate/latency/loss
    // impairment to derive from it, so this node runs with netsim disabled.
    let sim = None;

    let engine = Engine::new(
        local,
        neighbors,
        config.scenario.start,
        config.scenario.rounds,
        config.scenario.name.clone(),
        aggregator,
        config.aggregator.aggregation_timeout(),
        config.defense.weighting_factor.into(),
        config.defense.initial_reputation,
        config.defense.active_metrics(),
        config.defense.static_weights(),
        config.defense.with_reputation,
        Arc::new(NoopTrainer::new(config.training.learning_rate)),
        role,
        controller,
        sim,
    );

    let listen_addr = SocketAddr::new(
        config.network.ip.unwrap_or_else(|| std::net::IpAddr::from([0, 0, 0, 0])),
        config.network.port.ok_or_else(|| eyre!("network.port must be set"))?,
    );
    engine
        .listen(listen_addr)
        .await
        .map_err(|error| eyre!(error))
        .wrap_err("failed to bind the listener")?;

    let shutdown = {
        let engine = engine.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, shutting down");
                engine.shutdown().await;
            }
        }
    };

    tokio::select! {
        result = engine.run() => {
            result.map_err(|error| eyre!(error)).wrap_err("round loop ended with an error")?;
            info!("experiment finished");
            Ok(())
        }
        _ = shutdown => {
            exit(130);
        }
    }
}

fn init_logging(config: &Config) {
    let filter = match EnvFilter::try_from_env("RUST_LOG") {
        Ok(filter) => filter,
        Err(_) => {
            let level = match config.verbose() {
                0 => "info",
                1 => "debug",
                _ => "trace",
            };
            EnvFilter::new(format!("{}={}", MODULE_NAME, level))
        }
    };

    match config.log_dir() {
        Some(log_dir) => {
            let appender = tracing_appender::rolling::hourly(log_dir, "nebula-node.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            // Leaking the guard keeps the non-blocking writer alive for the
            // process lifetime; this binary never tears down logging early.
            Box::leak(Box::new(guard));
            tracing_subscriber::fmt()
                .with_writer(writer)
                .with_env_filter(filter)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

fn build_aggregator(config: &Config) -> Arc<dyn Aggregator> {
    match config.aggregator.algorithm {
        AlgorithmKind::FedAvg => Arc::new(FedAvg),
        AlgorithmKind::Median => Arc::new(Median),
        AlgorithmKind::TrimmedMean => Arc::new(TrimmedMean::with_rounding(
            config.aggregator.trimmed_mean_beta,
            config.aggregator.trimmed_mean_rounding,
        )),
        AlgorithmKind::Krum => Arc::new(Krum::new(config.aggregator.krum_assumed_byzantine)),
    }
}

fn build_role(config: &Config) -> Arc<dyn RoleBehavior> {
    use nebula_core::config::RoleKind;
    match config.scenario.role {
        RoleKind::Trainer => Arc::new(Trainer),
        RoleKind::Aggregator => Arc::new(AggregatorRole),
        RoleKind::TrainerAggregator => Arc::new(TrainerAggregator),
        RoleKind::Server => Arc::new(Server),
        RoleKind::Idle | RoleKind::Proxy => Arc::new(IdleOrProxy),
        RoleKind::Malicious => {
            warn!("role=malicious requires an attack/impersonation pair configured by the scenario launcher; falling back to idle");
            Arc::new(IdleOrProxy)
        }
    }
}

/// Placeholder training backend until a real tensor library is wired
/// in from outside the core. Keeps a fixed-size zero vector and never actually
/// trains, so a scenario can exercise the round loop, aggregation and
/// reputation machinery end to end without a model library present.
struct NoopTrainer {
    parameters: std::sync::Mutex<DenseParameters>,
    #[allow(dead_code)]
    learning_rate: f64,
}

impl NoopTrainer {
    fn new(learning_rate: f64) -> Self {
        Self {
            parameters: std::sync::Mutex::new(DenseParameters::new(vec![0.0; 8])),
            learning_rate,
        }
    }
}

#[async_trait]
impl TrainerBackend for NoopTrainer {
    async fn test(&self) {}

    async fn train(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn model_parameters(&self) -> DenseParameters {
        self.parameters.lock().expect("parameter lock poisoned").clone()
    }

    fn model_weight(&self) -> f64 {
        1.0
    }

    fn set_model_parameters(&self, parameters: DenseParameters) {
        *self.parameters.lock().expect("parameter lock poisoned") = parameters;
    }
}
