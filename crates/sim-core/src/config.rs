//! Simulation Configuration
//!
//! Declarative description of a simulation, loaded from TOML (or JSON), and
//! the live state a running simulation reports about itself.
//!
//! The live state is the declarative config plus three derived fields: the
//! resolved topology, the dry-run flag and the behavior module in use.
//! [`to_canonical`] and [`to_declarative`] convert between the two without
//! touching anything else, so a config survives a round trip through the
//! live state unchanged.

use serde::{Deserialize, Serialize};
use sim_history::NodeId;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::agents::{Params, State};
use crate::error::{ConfigError, SimError};
use crate::topology::TopologyData;

/// Supported configuration file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "toml" => Ok(ConfigFormat::Toml),
            "json" => Ok(ConfigFormat::Json),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            }),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ConfigFormat::Toml => "toml",
            ConfigFormat::Json => "json",
        }
    }
}

/// Where the topology comes from: a file, or a named generator plus its
/// parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    /// Generator parameters (`n`, `m`, `p`, `seed`, ...)
    #[serde(flatten)]
    pub params: Params,
}

impl NetworkParams {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn generator(name: impl Into<String>) -> Self {
        Self {
            generator: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<sim_history::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// One population segment of `network_agents`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDistribution {
    /// Falls back to the top-level `agent_type` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    /// Relative share of the population (default 1)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "State::is_empty")]
    pub state: State,
}

impl AgentDistribution {
    pub fn effective_weight(&self) -> f64 {
        self.weight.unwrap_or(1.0)
    }
}

/// Per-node initial states, either by node position or by node id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentStates {
    List(Vec<State>),
    Map(BTreeMap<NodeId, State>),
}

impl AgentStates {
    /// State for the node at `index` with identifier `id`, if any.
    pub fn for_node(&self, index: usize, id: &NodeId) -> Option<&State> {
        match self {
            AgentStates::List(states) => states.get(index),
            AgentStates::Map(states) => states.get(id),
        }
    }
}

fn default_trials() -> usize {
    1
}

fn is_one(n: &usize) -> bool {
    *n == 1
}

/// Declarative simulation description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub network_params: NetworkParams,
    /// Default behavior type for every node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_agents: Vec<AgentDistribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub states: Option<AgentStates>,
    #[serde(default, skip_serializing_if = "State::is_empty")]
    pub default_state: State,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub environment_params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_time: Option<u64>,
    #[serde(default = "default_trials", skip_serializing_if = "is_one")]
    pub num_trials: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Output root for non-dry runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_path: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: None,
            network_params: NetworkParams::default(),
            agent_type: None,
            network_agents: Vec::new(),
            states: None,
            default_state: State::new(),
            environment_params: Params::new(),
            max_time: None,
            num_trials: default_trials(),
            seed: None,
            dir_path: None,
        }
    }
}

impl SimulationConfig {
    /// Loads a configuration, choosing the format by file extension.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let format = ConfigFormat::from_path(path)?;
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, format).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parses configuration text.
    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }

    pub fn to_toml(&self) -> Result<String, SimError> {
        toml::to_string_pretty(self).map_err(|e| SimError::Serialize(e.to_string()))
    }

    /// Display name, defaulting to `"simulation"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("simulation")
    }
}

/// What a simulation reports about itself: the declarative config plus the
/// derived-only fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    #[serde(flatten)]
    pub config: SimulationConfig,
    pub topology: TopologyData,
    pub dry_run: bool,
    pub load_module: String,
}

impl LiveState {
    pub fn to_toml(&self) -> Result<String, SimError> {
        toml::to_string_pretty(self).map_err(|e| SimError::Serialize(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, SimError> {
        serde_json::to_string_pretty(self).map_err(|e| SimError::Serialize(e.to_string()))
    }

    /// Serializes in `format`. TOML has no null, so a state holding
    /// [`sim_history::Value::Null`] only serializes as JSON.
    pub fn serialize(&self, format: ConfigFormat) -> Result<String, SimError> {
        match format {
            ConfigFormat::Toml => self.to_toml(),
            ConfigFormat::Json => self.to_json(),
        }
    }

    pub fn parse(content: &str, format: ConfigFormat) -> Result<Self, String> {
        match format {
            ConfigFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
            ConfigFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        }
    }
}

/// Declarative config to live state.
pub fn to_canonical(
    config: &SimulationConfig,
    topology: TopologyData,
    dry_run: bool,
    load_module: &str,
) -> LiveState {
    LiveState {
        config: config.clone(),
        topology,
        dry_run,
        load_module: load_module.to_string(),
    }
}

/// Live state back to the declarative config it came from.
pub fn to_declarative(live: LiveState) -> SimulationConfig {
    live.config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Topology;
    use sim_history::Value;

    const TORVALDS: &str = r#"
        name = "torvalds_example"
        max_time = 10
        agent_type = "CounterModel"

        [network_params]
        path = "torvalds.edgelist"

        [default_state]
        skill_level = "beginner"

        [states.Torvalds]
        skill_level = "God"

        [states.balkian]
        skill_level = "developer"
    "#;

    #[test]
    fn test_parse_toml_config() {
        let config = SimulationConfig::parse(TORVALDS, ConfigFormat::Toml).unwrap();
        assert_eq!(config.name.as_deref(), Some("torvalds_example"));
        assert_eq!(config.num_trials, 1);
        assert_eq!(config.max_time, Some(10));
        assert_eq!(config.network_params.path, Some(PathBuf::from("torvalds.edgelist")));
        let states = config.states.as_ref().unwrap();
        let god = states.for_node(0, &NodeId::from("Torvalds")).unwrap();
        assert_eq!(god.get("skill_level"), Some(&Value::from("God")));
        assert!(states.for_node(2, &NodeId::from("other")).is_none());
    }

    #[test]
    fn test_generator_params_are_flattened() {
        let json = r#"{
            "network_params": {"generator": "barabasi_albert_graph", "n": 100, "m": 2},
            "states": [{"neighbors": 10}, {"total": 12}],
            "network_agents": [{"agent_type": "CounterModel", "weight": 1, "state": {"id": 0}}]
        }"#;
        let config = SimulationConfig::parse(json, ConfigFormat::Json).unwrap();
        assert_eq!(config.network_params.generator.as_deref(), Some("barabasi_albert_graph"));
        assert_eq!(config.network_params.params.get("n"), Some(&Value::Int(100)));
        assert_eq!(config.network_agents[0].effective_weight(), 1.0);
        assert!(matches!(config.states, Some(AgentStates::List(ref s)) if s.len() == 2));
    }

    #[test]
    fn test_unknown_config_extension() {
        assert!(matches!(
            ConfigFormat::from_path(Path::new("sim.yml")),
            Err(ConfigError::UnsupportedFormat { .. })
        ));
        assert_eq!(ConfigFormat::from_path(Path::new("a/sim.TOML")).unwrap(), ConfigFormat::Toml);
    }

    #[test]
    fn test_live_state_round_trip_toml() {
        let config = SimulationConfig::parse(TORVALDS, ConfigFormat::Toml).unwrap();
        let mut topology = Topology::undirected();
        topology.add_edge("Torvalds".into(), "balkian".into(), None);
        topology.add_edge("Torvalds".into(), "other".into(), Some(0.5));

        let live = to_canonical(&config, topology.to_data(), true, "netsim.models");
        let text = live.to_toml().unwrap();
        let back = LiveState::parse(&text, ConfigFormat::Toml).unwrap();
        assert!(back.dry_run);
        assert_eq!(back.load_module, "netsim.models");
        assert_eq!(back.topology.nodes.len(), 3);
        assert_eq!(to_declarative(back), config);
    }

    #[test]
    fn test_live_state_round_trip_json() {
        let config = SimulationConfig {
            network_params: NetworkParams::generator("complete_graph").with_param("n", 4),
            environment_params: [("increment".to_string(), Value::from(2))].into_iter().collect(),
            num_trials: 3,
            seed: Some(7),
            ..Default::default()
        };
        let live = to_canonical(&config, Topology::with_nodes(4).to_data(), false, "custom");
        let back = LiveState::parse(&live.to_json().unwrap(), ConfigFormat::Json).unwrap();
        assert_eq!(back, live);
        assert_eq!(to_declarative(back), config);
    }

    #[test]
    fn test_config_to_toml_skips_defaults() {
        let config = SimulationConfig {
            network_params: NetworkParams::from_path("test.gexf"),
            agent_type: Some("BaseAgent".to_string()),
            ..Default::default()
        };
        let text = config.to_toml().unwrap();
        assert!(!text.contains("num_trials"));
        assert!(!text.contains("states"));
        let back = SimulationConfig::parse(&text, ConfigFormat::Toml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_nested_tables_in_state_and_params() {
        let text = r#"
            agent_type = "BaseAgent"

            [network_params]
            generator = "empty_graph"
            n = 2

            [default_state.profile]
            age = 3
            tags = ["a", "b"]

            [environment_params.schedule]
            start = 0.5
        "#;
        let config = SimulationConfig::parse(text, ConfigFormat::Toml).unwrap();
        let profile = config.default_state["profile"].as_map().unwrap();
        assert_eq!(profile["age"], Value::Int(3));
        assert_eq!(profile["tags"].as_list().map(<[Value]>::len), Some(2));
        let schedule = config.environment_params["schedule"].as_map().unwrap();
        assert_eq!(schedule["start"], Value::Float(0.5));

        let live = to_canonical(&config, Topology::with_nodes(2).to_data(), true, "netsim.models");
        for format in [ConfigFormat::Toml, ConfigFormat::Json] {
            let back = LiveState::parse(&live.serialize(format).unwrap(), format).unwrap();
            assert_eq!(to_declarative(back), config);
        }

        let json = r#"{"network_params": {"generator": "empty_graph", "n": 1},
                       "default_state": {"profile": {"age": 3}}}"#;
        let config = SimulationConfig::parse(json, ConfigFormat::Json).unwrap();
        assert!(config.default_state["profile"].as_map().is_some());
    }
}
