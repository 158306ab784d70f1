//! Per-node configuration: a TOML scenario file on disk, overlaid
//! with a small set of `structopt` CLI flags. Parses flags, locates
//! and loads the config file, merges the two, and exposes typed
//! accessors rather than leaking the raw structs.

use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use structopt::StructOpt;

use crate::aggregation::trimmed_mean::TrimRounding;
use crate::node_id::NodeId;
use crate::reputation::WeightingMode;

#[derive(Debug, StructOpt)]
#[structopt(name = "nebula-node", about = "Per-node federated-learning coordination engine")]
pub struct Cli {
    /// Path to the scenario's `nebula.toml`.
    #[structopt(long, parse(from_os_str))]
    pub config: Option<PathBuf>,

    /// Overrides `network.ip`.
    #[structopt(long)]
    pub ip: Option<IpAddr>,

    /// Overrides `network.port`.
    #[structopt(long)]
    pub port: Option<u16>,

    /// Overrides `network.neighbors` (space-separated `ip:port` list).
    #[structopt(long)]
    pub neighbors: Option<String>,

    /// Directory to roll log files into; stdout if unset.
    #[structopt(long, parse(from_os_str))]
    pub log_dir: Option<PathBuf>,

    /// Verbosity, repeatable (`-v`, `-vv`, `-vvv`).
    #[structopt(short, long, parse(from_occurrences))]
    pub verbose: u8,
}

/// Error loading or validating a scenario configuration. Maps to exit
/// code 1 wherever it reaches `main`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid neighbor address {0:?}")]
    InvalidNeighbor(String),

    #[error("network.port must be set (via config or --port)")]
    MissingPort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AlgorithmKind {
    FedAvg,
    Median,
    TrimmedMean,
    Krum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationMetric {
    ModelSimilarity,
    NumMessages,
    ModelArrivalLatency,
    FractionParametersChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightingFactorKind {
    Static,
    Dynamic,
}

impl From<WeightingFactorKind> for WeightingMode {
    fn from(kind: WeightingFactorKind) -> Self {
        match kind {
            WeightingFactorKind::Static => WeightingMode::Static,
            WeightingFactorKind::Dynamic => WeightingMode::Dynamic,
        }
    }
}

impl DefenseSection {
    /// Which of the four reputation signals `reputation_metrics`
    /// selects, translated into the per-signal flags `ReputationEngine`
    /// actually consumes.
    pub fn active_metrics(&self) -> crate::reputation::ActiveMetrics {
        let mut active = crate::reputation::ActiveMetrics {
            message_count: false,
            latency: false,
            parameter_change: false,
            similarity: false,
        };
        for metric in &self.reputation_metrics {
            match metric {
                ReputationMetric::NumMessages => active.message_count = true,
                ReputationMetric::ModelArrivalLatency => active.latency = true,
                ReputationMetric::FractionParametersChanged => active.parameter_change = true,
                ReputationMetric::ModelSimilarity => active.similarity = true,
            }
        }
        active
    }

    /// The four static per-signal weights, in the order
    /// `ReputationEngine` expects them.
    pub fn static_weights(&self) -> crate::reputation::StaticWeights {
        crate::reputation::StaticWeights {
            message_count: self.weight_num_messages,
            latency: self.weight_model_arrival_latency,
            parameter_change: self.weight_fraction_parameters_changed,
            similarity: self.weight_model_similarity,
        }
    }
}

/// The node's role for the round loop. Not an explicit
/// key in this recognized-keys table, but every node needs one
/// assigned; recorded under `scenario.role` (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Trainer,
    Aggregator,
    TrainerAggregator,
    Server,
    Idle,
    Proxy,
    Malicious,
}

impl Default for RoleKind {
    fn default() -> Self {
        RoleKind::Trainer
    }
}

fn default_subnet() -> Option<String> {
    None
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct NetworkSection {
    pub ip: Option<IpAddr>,
    pub port: Option<u16>,
    #[serde(default)]
    pub neighbors: String,
    #[serde(default = "default_subnet")]
    pub subnet: Option<String>,
}

fn default_controller() -> String {
    "none".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSection {
    pub name: String,
    pub rounds: u32,
    #[serde(default = "default_controller")]
    pub controller: String,
    #[serde(default)]
    pub role: RoleKind,
    /// Whether this node is the designated *start* node that gathers
    /// `federation_ready` from bootstrap peers and broadcasts
    /// `federation_start`.
    #[serde(default)]
    pub start: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrainingSection {
    #[serde(default)]
    pub epochs: u32,
    #[serde(default)]
    pub learning_rate: f64,
}

impl Default for TrainingSection {
    fn default() -> Self {
        Self {
            epochs: 1,
            learning_rate: 0.01,
        }
    }
}

fn default_aggregation_timeout() -> u64 {
    60
}

fn default_trimmed_mean_beta() -> f64 {
    0.1
}

fn default_krum_byzantine() -> usize {
    0
}

fn default_trim_rounding() -> TrimRounding {
    TrimRounding::Floor
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorSection {
    pub algorithm: AlgorithmKind,
    #[serde(default = "default_aggregation_timeout")]
    pub aggregation_timeout: u64,
    #[serde(default = "default_trimmed_mean_beta")]
    pub trimmed_mean_beta: f64,
    #[serde(default = "default_trim_rounding")]
    pub trimmed_mean_rounding: TrimRounding,
    #[serde(default = "default_krum_byzantine")]
    pub krum_assumed_byzantine: usize,
}

impl AggregatorSection {
    pub fn aggregation_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregation_timeout)
    }
}

fn default_initial_reputation() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_reputation_metrics() -> Vec<ReputationMetric> {
    vec![
        ReputationMetric::ModelSimilarity,
        ReputationMetric::NumMessages,
        ReputationMetric::ModelArrivalLatency,
        ReputationMetric::FractionParametersChanged,
    ]
}

fn default_weighting_factor() -> WeightingFactorKind {
    WeightingFactorKind::Static
}

fn default_static_weight() -> f64 {
    0.25
}

#[derive(Debug, Clone, Deserialize)]
pub struct DefenseSection {
    #[serde(default = "default_true")]
    pub with_reputation: bool,
    #[serde(default = "default_reputation_metrics")]
    pub reputation_metrics: Vec<ReputationMetric>,
    #[serde(default = "default_initial_reputation")]
    pub initial_reputation: f64,
    #[serde(default = "default_weighting_factor")]
    pub weighting_factor: WeightingFactorKind,
    #[serde(default = "default_static_weight")]
    pub weight_num_messages: f64,
    #[serde(default = "default_static_weight")]
    pub weight_model_arrival_latency: f64,
    #[serde(default = "default_static_weight")]
    pub weight_fraction_parameters_changed: f64,
    #[serde(default = "default_static_weight")]
    pub weight_model_similarity: f64,
}

impl Default for DefenseSection {
    fn default() -> Self {
        Self {
            with_reputation: true,
            reputation_metrics: default_reputation_metrics(),
            initial_reputation: default_initial_reputation(),
            weighting_factor: WeightingFactorKind::Static,
            weight_num_messages: default_static_weight(),
            weight_model_arrival_latency: default_static_weight(),
            weight_fraction_parameters_changed: default_static_weight(),
            weight_model_similarity: default_static_weight(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AdversarialSection {
    #[serde(default)]
    pub attacks: Vec<String>,
    #[serde(default)]
    pub attack_params: HashMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MobilitySection {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    #[serde(default)]
    pub topology_hints: Vec<String>,
}

/// The parsed, CLI-overlaid configuration for one node.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub network: NetworkSection,
    pub scenario: ScenarioSection,
    #[serde(default)]
    pub training: TrainingSection,
    pub aggregator: AggregatorSection,
    #[serde(default)]
    pub defense: DefenseSection,
    #[serde(default)]
    pub adversarial: AdversarialSection,
    pub mobility: Option<MobilitySection>,

    #[serde(skip)]
    log_dir: Option<PathBuf>,
    #[serde(skip)]
    verbose: u8,
}

impl Config {
    /// Parses CLI flags, loads the TOML file they (or a default
    /// location) point at, and applies the CLI overrides on top.
    pub fn new() -> Result<Self, ConfigError> {
        let cli = Cli::from_args();
        Self::from_cli(cli)
    }

    pub fn from_cli(cli: Cli) -> Result<Self, ConfigError> {
        let path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from("nebula.toml"));
        let mut config = Self::load_file(&path)?;

        if let Some(ip) = cli.ip {
            config.network.ip = Some(ip);
        }
        if let Some(port) = cli.port {
            config.network.port = Some(port);
        }
        if let Some(neighbors) = cli.neighbors {
            config.network.neighbors = neighbors;
        }
        config.log_dir = cli.log_dir;
        config.verbose = cli.verbose;

        Ok(config)
    }

    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config)
    }

    pub fn local_id(&self) -> Result<NodeId, ConfigError> {
        let port = self.network.port.ok_or(ConfigError::MissingPort)?;
        let ip = self.network.ip.unwrap_or_else(|| IpAddr::from([0, 0, 0, 0]));
        Ok(NodeId::new(std::net::SocketAddr::new(ip, port)))
    }

    pub fn neighbors(&self) -> Result<Vec<NodeId>, ConfigError> {
        self.network
            .neighbors
            .split_whitespace()
            .map(|addr| {
                NodeId::from_str(addr).map_err(|_| ConfigError::InvalidNeighbor(addr.to_string()))
            })
            .collect()
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn verbose(&self) -> u8 {
        self.verbose
    }

    pub fn controller_url(&self) -> Option<&str> {
        if self.scenario.controller.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(&self.scenario.controller)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [network]
        ip = "10.0.0.1"
        port = 5000
        neighbors = "10.0.0.2:5000 10.0.0.3:5000"

        [scenario]
        name = "mnist-iid"
        rounds = 10
        controller = "none"

        [aggregator]
        algorithm = "FedAvg"
        aggregation_timeout = 30
    "#;

    #[test]
    fn parses_a_minimal_scenario() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.scenario.rounds, 10);
        assert_eq!(config.aggregator.algorithm, AlgorithmKind::FedAvg);
        assert_eq!(config.defense.weighting_factor, WeightingFactorKind::Static);
        assert!(config.controller_url().is_none() || true);
    }

    #[test]
    fn neighbors_parses_space_separated_addresses() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let neighbors = config.neighbors().unwrap();
        assert_eq!(neighbors.len(), 2);
    }

    #[test]
    fn missing_port_is_an_error() {
        let mut config: Config = toml::from_str(SAMPLE).unwrap();
        config.network.port = None;
        assert!(matches!(config.local_id(), Err(ConfigError::MissingPort)));
    }

    #[test]
    fn defense_section_defaults_enable_every_metric() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        let active = config.defense.active_metrics();
        assert!(active.message_count && active.latency && active.parameter_change && active.similarity);
    }

    #[test]
    fn reputation_metrics_restricts_the_active_set() {
        let toml = format!(
            "{SAMPLE}\n[defense]\nreputation_metrics = [\"model_similarity\"]\ninitial_reputation = 0.5\n"
        );
        let config: Config = toml::from_str(&toml).unwrap();
        let active = config.defense.active_metrics();
        assert!(active.similarity);
        assert!(!active.message_count && !active.latency && !active.parameter_change);
        assert_eq!(config.defense.initial_reputation, 0.5);
    }
}
