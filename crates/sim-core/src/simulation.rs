//! Trial Runner
//!
//! A [`Simulation`] turns a declarative configuration into `num_trials`
//! independent environments. The topology is loaded once and shared; each
//! trial gets its own seed, its own population draw and its own history.
//!
//! Everything that can be wrong with a configuration is checked when the
//! simulation is built, so running only fails for behavior or I/O reasons.
//! A trial whose behavior fails is reported as failed; the others still run.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::agents::{Agent, AgentState, BehaviorRegistry, State};
use crate::config::{to_canonical, AgentStates, ConfigFormat, LiveState, SimulationConfig};
use crate::environment::{AbortSignal, Environment, Phase};
use crate::error::{ConfigError, SimError};
use crate::topology::{load_network, Topology};

/// Output root when the configuration sets no `dir_path`.
pub const DEFAULT_OUTPUT_DIR: &str = "netsim_output";

/// Behavior assigned to nodes when no agent type is configured at all.
const DEFAULT_AGENT_TYPE: &str = "BaseAgent";

/// Multiplier deriving the population seed from the trial seed
const POPULATION_SEED_MIX: u64 = 0x9e37_79b9_7f4a_7c15;

/// How a trial ended.
#[derive(Debug)]
pub enum TrialOutcome {
    /// Ran to `max_time`
    Complete,
    /// Stopped by an abort signal
    Aborted,
    /// A behavior failed; history up to the last committed tick is kept
    Failed(SimError),
}

#[derive(Debug)]
pub struct Trial {
    pub index: usize,
    pub seed: u64,
    pub env: Environment,
    pub outcome: TrialOutcome,
}

impl Trial {
    pub fn is_complete(&self) -> bool {
        matches!(self.outcome, TrialOutcome::Complete)
    }
}

/// Results of one `run_simulation` call, in trial order.
#[derive(Debug, Default)]
pub struct SimulationReport {
    pub trials: Vec<Trial>,
}

impl SimulationReport {
    /// Environments of trials that ran to completion.
    pub fn completed_environments(&self) -> Vec<&Environment> {
        self.trials
            .iter()
            .filter(|t| t.is_complete())
            .map(|t| &t.env)
            .collect()
    }

    pub fn failures(&self) -> Vec<&Trial> {
        self.trials
            .iter()
            .filter(|t| matches!(t.outcome, TrialOutcome::Failed(_)))
            .collect()
    }

    /// True when every trial completed.
    pub fn is_success(&self) -> bool {
        !self.trials.is_empty() && self.trials.iter().all(Trial::is_complete)
    }
}

/// One population segment after defaults are applied.
#[derive(Debug)]
struct Segment<'a> {
    field: String,
    agent_type: &'a str,
    weight: f64,
    state: Option<&'a State>,
}

pub struct Simulation {
    config: SimulationConfig,
    topology: Arc<Topology>,
    registry: Arc<BehaviorRegistry>,
    format: ConfigFormat,
}

impl Simulation {
    /// Validates `config` and loads its topology. Relative topology paths are
    /// resolved against the working directory.
    pub fn from_config(config: SimulationConfig, registry: BehaviorRegistry) -> Result<Self, ConfigError> {
        Self::build(config, registry, None)
    }

    /// Like [`Simulation::from_config`], resolving relative topology paths
    /// against `base_dir`.
    pub fn from_config_in(
        config: SimulationConfig,
        registry: BehaviorRegistry,
        base_dir: &Path,
    ) -> Result<Self, ConfigError> {
        Self::build(config, registry, Some(base_dir))
    }

    /// Loads a TOML or JSON configuration file. Relative topology paths are
    /// resolved against the file's directory, and the live state is saved in
    /// the file's format.
    pub fn from_file(path: &Path, registry: BehaviorRegistry) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let config = SimulationConfig::from_file(path)?;
        Ok(Self::build(config, registry, path.parent())?.with_format(format))
    }

    /// Format of the saved live state. Defaults to TOML.
    pub fn with_format(mut self, format: ConfigFormat) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> ConfigFormat {
        self.format
    }

    fn build(
        config: SimulationConfig,
        registry: BehaviorRegistry,
        base_dir: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        if config.num_trials == 0 {
            return Err(ConfigError::InvalidTrials);
        }
        let topology = load_network(&config.network_params, base_dir, config.seed)?;
        let simulation = Self {
            config,
            topology: Arc::new(topology),
            registry: Arc::new(registry),
            format: ConfigFormat::Toml,
        };
        simulation.validate()?;
        info!(
            "Loaded simulation {} ({} nodes, {} trials)",
            simulation.config.display_name(),
            simulation.topology.len(),
            simulation.config.num_trials
        );
        Ok(simulation)
    }

    fn segments(&self) -> Result<Vec<Segment<'_>>, ConfigError> {
        let config = &self.config;
        if config.network_agents.is_empty() {
            return Ok(vec![Segment {
                field: "agent_type".to_string(),
                agent_type: config.agent_type.as_deref().unwrap_or(DEFAULT_AGENT_TYPE),
                weight: 1.0,
                state: None,
            }]);
        }
        config
            .network_agents
            .iter()
            .enumerate()
            .map(|(i, segment)| {
                let field = format!("network_agents[{}].agent_type", i);
                let agent_type = segment
                    .agent_type
                    .as_deref()
                    .or(config.agent_type.as_deref())
                    .ok_or_else(|| ConfigError::MissingAgentType { field: field.clone() })?;
                Ok(Segment {
                    field,
                    agent_type,
                    weight: segment.effective_weight(),
                    state: Some(&segment.state),
                })
            })
            .collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let segments = self.segments()?;
        for (i, segment) in segments.iter().enumerate() {
            if !segment.weight.is_finite() || segment.weight < 0.0 {
                return Err(ConfigError::InvalidParameter {
                    field: format!("network_agents[{}].weight", i),
                    reason: format!("expected a non-negative number, got {}", segment.weight),
                });
            }
            self.registry
                .create(&segment.field, segment.agent_type, &self.config.environment_params)?;
        }
        if segments.iter().map(|s| s.weight).sum::<f64>() <= 0.0 {
            return Err(ConfigError::InvalidParameter {
                field: "network_agents".to_string(),
                reason: "weights sum to zero".to_string(),
            });
        }

        match &self.config.states {
            Some(AgentStates::Map(states)) => {
                if let Some(id) = states.keys().find(|id| self.topology.index_of(id).is_none()) {
                    return Err(ConfigError::UnknownNode {
                        field: "states".to_string(),
                        node: id.clone(),
                    });
                }
            }
            Some(AgentStates::List(states)) if states.len() > self.topology.len() => {
                return Err(ConfigError::InvalidParameter {
                    field: "states".to_string(),
                    reason: format!(
                        "{} entries for a topology of {} nodes",
                        states.len(),
                        self.topology.len()
                    ),
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Runs every trial without an external abort signal. A configuration
    /// without `max_time` never terminates on its own; run it through
    /// [`Simulation::run_with`] and raise the signal to stop it.
    pub fn run_simulation(&self, dry_run: bool) -> Result<SimulationReport, SimError> {
        self.run_with(dry_run, &AbortSignal::new())
    }

    /// Runs every trial in order, each until `max_time` or until `signal` is
    /// raised. Trials not yet started when `signal` is raised are skipped. Non-dry runs write each trial's history and graph,
    /// and the live configuration, under [`Simulation::output_dir`].
    pub fn run_with(&self, dry_run: bool, signal: &AbortSignal) -> Result<SimulationReport, SimError> {
        let name = self.config.display_name();
        let base_seed = self.config.seed.unwrap_or_else(rand::random);
        info!(
            "Running {} ({} trials, base seed {}, dry run: {})",
            name, self.config.num_trials, base_seed, dry_run
        );

        let out_dir = if dry_run {
            None
        } else {
            Some(self.persist_config()?)
        };

        let mut report = SimulationReport::default();
        for index in 0..self.config.num_trials {
            if signal.is_aborted() {
                warn!("{}: aborted before trial {}", name, index);
                break;
            }
            let seed = base_seed.wrapping_add(index as u64);
            let mut env = self.trial_environment(index, seed, dry_run)?;

            let outcome = match env.run_with(signal) {
                Ok(()) if env.phase() != Phase::Terminal => {
                    warn!("{}: aborted at tick {}", env.name(), env.now());
                    TrialOutcome::Aborted
                }
                Ok(()) => TrialOutcome::Complete,
                Err(err) => {
                    warn!("{} failed: {}", env.name(), err);
                    TrialOutcome::Failed(err)
                }
            };
            info!("{} finished at tick {} ({} history entries)", env.name(), env.now(), env.history().len());

            if let Some(dir) = &out_dir {
                env.dump_history(dir)?;
                env.dump_gexf(dir)?;
            }
            report.trials.push(Trial {
                index,
                seed,
                env,
                outcome,
            });
        }
        Ok(report)
    }

    /// Builds the environment for trial `index`, with its population drawn
    /// from a stream derived from `seed`.
    pub fn trial_environment(&self, index: usize, seed: u64, dry_run: bool) -> Result<Environment, SimError> {
        let name = format!("{}_trial_{}", self.config.display_name(), index);
        let mut env = Environment::new(name, Arc::clone(&self.topology), seed)
            .with_params(self.config.environment_params.clone())
            .with_max_time(self.config.max_time)
            .with_dry_run(dry_run);

        let segments = self.segments()?;
        let weights: Vec<f64> = segments.iter().map(|s| s.weight).collect();
        let mut rng = SmallRng::seed_from_u64(seed.wrapping_mul(POPULATION_SEED_MIX));

        let mut agents = Vec::with_capacity(self.topology.len());
        for (i, id) in self.topology.node_ids().enumerate() {
            let segment = &segments[weighted_select(&mut rng, &weights)];
            let mut state = self.config.default_state.clone();
            if let Some(extra) = segment.state {
                state.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            if let Some(extra) = self.config.states.as_ref().and_then(|s| s.for_node(i, id)) {
                state.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            let behavior = self
                .registry
                .create(&segment.field, segment.agent_type, &self.config.environment_params)?;
            agents.push(Agent::new(segment.agent_type, AgentState::new(id.clone(), state), behavior));
        }
        env.populate(agents)?;
        Ok(env)
    }

    /// Live state: the configuration plus the resolved topology, the dry-run
    /// flag and the registry name.
    pub fn live_state(&self, dry_run: bool) -> LiveState {
        to_canonical(&self.config, self.topology.to_data(), dry_run, self.registry.name())
    }

    pub fn to_toml(&self, dry_run: bool) -> Result<String, SimError> {
        self.live_state(dry_run).to_toml()
    }

    /// Live state serialized in [`Simulation::format`].
    pub fn serialize(&self, dry_run: bool) -> Result<String, SimError> {
        self.live_state(dry_run).serialize(self.format)
    }

    /// `dir_path/<name>`, defaulting `dir_path` to [`DEFAULT_OUTPUT_DIR`].
    pub fn output_dir(&self) -> PathBuf {
        self.config
            .dir_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
            .join(self.config.display_name())
    }

    fn persist_config(&self) -> Result<PathBuf, SimError> {
        let dir = self.output_dir();
        let path = dir.join(format!("{}.{}", self.config.display_name(), self.format.extension()));
        let io_error = |source| SimError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(&dir).map_err(io_error)?;
        fs::write(&path, self.serialize(false)?).map_err(io_error)?;
        info!("Wrote configuration to {}", path.display());
        Ok(dir)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn registry(&self) -> &BehaviorRegistry {
        &self.registry
    }
}

/// Index drawn with probability proportional to its weight.
fn weighted_select(rng: &mut SmallRng, weights: &[f64]) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return 0;
    }
    let r = rng.gen::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        cumulative += w;
        if r < cumulative {
            return i;
        }
    }
    weights.len() - 1
}
