//! Network Diffusion Simulation Engine
//!
//! Discrete-time agent-based simulation on a graph: one agent per node,
//! synchronized ticks, and an append-only history of every state change.
//!
//! ```no_run
//! use sim_core::{BehaviorRegistry, Simulation};
//! use std::path::Path;
//!
//! let sim = Simulation::from_file(Path::new("torvalds.toml"), BehaviorRegistry::builtin())?;
//! let report = sim.run_simulation(true)?;
//! for env in report.completed_environments() {
//!     println!("{} ended at tick {}", env.name(), env.now());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod agents;
pub mod config;
pub mod environment;
pub mod error;
pub mod simulation;
pub mod topology;

pub use agents::{Agent, AgentState, Behavior, BehaviorRegistry, Params, State, StepContext};
pub use config::{to_canonical, to_declarative, ConfigFormat, LiveState, NetworkParams, SimulationConfig};
pub use environment::{AbortSignal, AgentRef, Environment, Phase};
pub use error::{ConfigError, SimError, StepError};
pub use simulation::{Simulation, SimulationReport, Trial, TrialOutcome};
pub use topology::Topology;

pub use sim_history::{Entity, History, HistoryRow, Key, NodeId, Query, QueryResult, Value};
