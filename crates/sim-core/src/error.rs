//! Error Types
//!
//! Configuration errors surface before any tick runs; behavior failures are
//! fatal to the owning trial only.

use sim_history::{HistoryError, NodeId};
use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unresolvable configuration. Always names the offending field.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported topology format {extension:?} for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("unknown graph generator: {0}")]
    UnknownGenerator(String),

    #[error("generator {generator} is missing required parameter {parameter:?}")]
    MissingParameter { generator: String, parameter: String },

    #[error("invalid value for {field}: {reason}")]
    InvalidParameter { field: String, reason: String },

    #[error("network_params needs either `path` or `generator`")]
    MissingNetworkParams,

    #[error("unknown agent type {agent_type:?} in {field}")]
    UnknownAgentType { field: String, agent_type: String },

    #[error("no agent type given for {field} and no default `agent_type`")]
    MissingAgentType { field: String },

    #[error("{field} refers to unknown node {node}")]
    UnknownNode { field: String, node: NodeId },

    #[error("population size {agents} does not match topology size {nodes}")]
    PopulationMismatch { agents: usize, nodes: usize },

    #[error("num_trials must be at least 1")]
    InvalidTrials,

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Failure raised by a behavior's `step`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StepError {
    #[error("state attribute {0:?} is missing")]
    MissingState(String),
    #[error("state attribute {key:?} should be {expected}")]
    InvalidState { key: String, expected: &'static str },
    #[error("{0}")]
    Failed(String),
}

/// Errors raised while running an environment or a simulation.
#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("agent {agent} failed at tick {tick}: {source}")]
    Behavior {
        agent: NodeId,
        tick: u64,
        #[source]
        source: StepError,
    },

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("environment {0} has already terminated")]
    Terminated(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize configuration: {0}")]
    Serialize(String),
}
