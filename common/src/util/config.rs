use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("'{first}' cannot be combined with '{second}'")]
    MutuallyExclusive {
        first: &'static str,
        second: &'static str,
    },
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("unknown routing algorithm '{0}'")]
    UnknownAlgorithm(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RouterAlgorithm {
    Serial,
    Parallel,
    Decomposing,
    Nested,
}

impl fmt::Display for RouterAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RouterAlgorithm::Serial => "serial",
            RouterAlgorithm::Parallel => "parallel",
            RouterAlgorithm::Decomposing => "decomposing",
            RouterAlgorithm::Nested => "nested",
        };
        f.write_str(name)
    }
}

impl FromStr for RouterAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(RouterAlgorithm::Serial),
            "parallel" => Ok(RouterAlgorithm::Parallel),
            "decomposing" | "decomp" => Ok(RouterAlgorithm::Decomposing),
            "nested" => Ok(RouterAlgorithm::Nested),
            other => Err(ConfigError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Early abort of the outer loop when the overuse trend predicts a
/// successful route only far beyond the iteration limit.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePredictor {
    Off,
    #[default]
    Safe,
    Aggressive,
}

impl FailurePredictor {
    /// Multiple of `max_iterations` past which a predicted success is given up on.
    pub fn abort_factor(self) -> Option<f64> {
        match self {
            FailurePredictor::Off => None,
            FailurePredictor::Safe => Some(3.0),
            FailurePredictor::Aggressive => Some(1.5),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: RouterAlgorithm,
    /// 0 selects the available parallelism of the host.
    #[serde(default)]
    pub num_workers: usize,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_initial_pres_fac")]
    pub initial_pres_fac: f64,
    #[serde(default = "default_pres_fac_mult")]
    pub pres_fac_mult: f64,
    #[serde(default = "default_max_pres_fac")]
    pub max_pres_fac: f64,
    #[serde(default = "default_acc_fac")]
    pub acc_fac: f64,
    /// History kept per iteration, 1.0 never forgets.
    #[serde(default = "default_history_decay")]
    pub history_decay: f64,
    #[serde(default)]
    pub failure_predictor: FailurePredictor,
    #[serde(default = "default_astar_fac")]
    pub astar_fac: f64,
    #[serde(default = "default_max_criticality")]
    pub max_criticality: f64,
    #[serde(default = "default_bb_factor")]
    pub bb_factor: u32,
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_via_cost")]
    pub via_cost: f64,
    #[serde(default)]
    pub rcv_enabled: bool,
    #[serde(default = "default_rcv_penalty")]
    pub rcv_penalty: f64,
    #[serde(default = "default_high_fanout_threshold")]
    pub high_fanout_threshold: usize,
    #[serde(default)]
    pub nested_decomposition: bool,
    #[serde(default)]
    pub decomposition: DecompositionConfig,
    #[serde(default)]
    pub partition: PartitionConfig,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            num_workers: 0,
            max_iterations: default_max_iterations(),
            initial_pres_fac: default_initial_pres_fac(),
            pres_fac_mult: default_pres_fac_mult(),
            max_pres_fac: default_max_pres_fac(),
            acc_fac: default_acc_fac(),
            history_decay: default_history_decay(),
            failure_predictor: FailurePredictor::default(),
            astar_fac: default_astar_fac(),
            max_criticality: default_max_criticality(),
            bb_factor: default_bb_factor(),
            capacity: default_capacity(),
            via_cost: default_via_cost(),
            rcv_enabled: false,
            rcv_penalty: default_rcv_penalty(),
            high_fanout_threshold: default_high_fanout_threshold(),
            nested_decomposition: false,
            decomposition: DecompositionConfig::default(),
            partition: PartitionConfig::default(),
        }
    }
}

impl RouterConfig {
    pub fn decomposition_enabled(&self) -> bool {
        match self.algorithm {
            RouterAlgorithm::Decomposing => true,
            RouterAlgorithm::Nested => self.nested_decomposition,
            _ => false,
        }
    }

    pub fn worker_count(&self) -> usize {
        if self.num_workers > 0 {
            return self.num_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Rejects combinations that cannot be honoured before any routing starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decomposition_enabled() && self.rcv_enabled {
            return Err(ConfigError::MutuallyExclusive {
                first: "net decomposition",
                second: "rcv_enabled",
            });
        }
        if self.capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.pres_fac_mult < 1.0 {
            return Err(ConfigError::Invalid {
                field: "pres_fac_mult",
                reason: format!("{} would shrink congestion pressure", self.pres_fac_mult),
            });
        }
        if !(0.0..1.0).contains(&self.max_criticality) {
            return Err(ConfigError::Invalid {
                field: "max_criticality",
                reason: format!("{} is outside [0, 1)", self.max_criticality),
            });
        }
        if !(self.history_decay > 0.0 && self.history_decay <= 1.0) {
            return Err(ConfigError::Invalid {
                field: "history_decay",
                reason: format!("{} is outside (0, 1]", self.history_decay),
            });
        }
        if self.astar_fac < 0.0 {
            return Err(ConfigError::Invalid {
                field: "astar_fac",
                reason: "must not be negative".to_string(),
            });
        }
        self.partition.validate()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DecompositionConfig {
    /// Last outer iteration in which nets may still be decomposed.
    #[serde(default = "default_max_decomp_iter")]
    pub max_decomp_iter: usize,
    #[serde(default = "default_max_decomp_depth")]
    pub max_decomp_depth: usize,
    #[serde(default = "default_min_net_sinks")]
    pub min_net_sinks: usize,
    #[serde(default = "default_min_vnet_sinks")]
    pub min_vnet_sinks: usize,
    #[serde(default = "default_min_split_span")]
    pub min_split_span: u32,
    #[serde(default = "default_reduction_min_sinks")]
    pub reduction_min_sinks: usize,
    #[serde(default = "default_min_side_width")]
    pub min_side_width: u32,
    #[serde(default = "default_max_attempts_per_iteration")]
    pub max_attempts_per_iteration: usize,
    #[serde(default = "default_predictor_tolerance")]
    pub predictor_tolerance: f64,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            max_decomp_iter: default_max_decomp_iter(),
            max_decomp_depth: default_max_decomp_depth(),
            min_net_sinks: default_min_net_sinks(),
            min_vnet_sinks: default_min_vnet_sinks(),
            min_split_span: default_min_split_span(),
            reduction_min_sinks: default_reduction_min_sinks(),
            min_side_width: default_min_side_width(),
            max_attempts_per_iteration: default_max_attempts_per_iteration(),
            predictor_tolerance: default_predictor_tolerance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartitionConfig {
    #[serde(default = "default_min_nets_to_split")]
    pub min_nets_to_split: usize,
    /// Fraction of changed nets above which an update rebuilds the whole tree.
    #[serde(default = "default_rebuild_fraction")]
    pub rebuild_fraction: f64,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            min_nets_to_split: default_min_nets_to_split(),
            rebuild_fraction: default_rebuild_fraction(),
        }
    }
}

impl PartitionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.rebuild_fraction) {
            return Err(ConfigError::Invalid {
                field: "partition.rebuild_fraction",
                reason: format!("{} is outside [0, 1]", self.rebuild_fraction),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneratorConfig {
    #[serde(default = "default_gen_width")]
    pub width: u32,
    #[serde(default = "default_gen_height")]
    pub height: u32,
    #[serde(default = "default_gen_layers")]
    pub layers: u8,
    #[serde(default = "default_gen_nets")]
    pub num_nets: usize,
    #[serde(default = "default_gen_max_fanout")]
    pub max_fanout: usize,
    #[serde(default = "default_gen_high_fanout_nets")]
    pub high_fanout_nets: usize,
    #[serde(default = "default_gen_locality")]
    pub locality: u32,
    #[serde(default = "default_gen_obstacle_density")]
    pub obstacle_density: f64,
    #[serde(default = "default_gen_seed")]
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            width: default_gen_width(),
            height: default_gen_height(),
            layers: default_gen_layers(),
            num_nets: default_gen_nets(),
            max_fanout: default_gen_max_fanout(),
            high_fanout_nets: default_gen_high_fanout_nets(),
            locality: default_gen_locality(),
            obstacle_density: default_gen_obstacle_density(),
            seed: default_gen_seed(),
        }
    }
}

fn default_algorithm() -> RouterAlgorithm {
    RouterAlgorithm::Parallel
}

fn default_max_iterations() -> usize {
    50
}

fn default_initial_pres_fac() -> f64 {
    0.5
}

fn default_pres_fac_mult() -> f64 {
    1.3
}

fn default_max_pres_fac() -> f64 {
    1000.0
}

fn default_acc_fac() -> f64 {
    1.0
}

fn default_history_decay() -> f64 {
    1.0
}

fn default_astar_fac() -> f64 {
    1.0
}

fn default_max_criticality() -> f64 {
    0.99
}

fn default_bb_factor() -> u32 {
    3
}

fn default_capacity() -> u32 {
    1
}

fn default_via_cost() -> f64 {
    2.0
}

fn default_rcv_penalty() -> f64 {
    1.0
}

fn default_high_fanout_threshold() -> usize {
    64
}

fn default_max_decomp_iter() -> usize {
    5
}

fn default_max_decomp_depth() -> usize {
    2
}

fn default_min_net_sinks() -> usize {
    8
}

fn default_min_vnet_sinks() -> usize {
    4
}

fn default_min_split_span() -> u32 {
    4
}

fn default_reduction_min_sinks() -> usize {
    4
}

fn default_min_side_width() -> u32 {
    10
}

fn default_max_attempts_per_iteration() -> usize {
    3
}

fn default_predictor_tolerance() -> f64 {
    1.1
}

fn default_min_nets_to_split() -> usize {
    2
}

fn default_rebuild_fraction() -> f64 {
    0.25
}

fn default_gen_width() -> u32 {
    64
}

fn default_gen_height() -> u32 {
    64
}

fn default_gen_layers() -> u8 {
    2
}

fn default_gen_nets() -> usize {
    200
}

fn default_gen_max_fanout() -> usize {
    6
}

fn default_gen_high_fanout_nets() -> usize {
    4
}

fn default_gen_locality() -> u32 {
    10
}

fn default_gen_obstacle_density() -> f64 {
    0.0
}

fn default_gen_seed() -> u64 {
    1
}
