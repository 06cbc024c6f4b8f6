//! Agents
//!
//! An agent is the mutable state bound to one topology node plus the
//! [`Behavior`] that advances it. Behaviors only see the rest of the
//! population through a [`StepContext`], which reads the state every agent
//! had at the start of the current tick.

pub mod models;
pub mod registry;

use rand::rngs::SmallRng;
use rand::Rng;
use sim_history::{NodeId, Value};
use std::collections::BTreeMap;

use crate::error::StepError;
use crate::topology::Topology;

pub use models::{AggregatedCounter, BaseAgent, BassModel, CounterModel};
pub use registry::{BehaviorRegistry, Factory};

/// Open per-agent state mapping.
pub type State = BTreeMap<String, Value>;

/// Environment and generator parameters.
pub type Params = BTreeMap<String, Value>;

/// State key compared by the `state_id` filters.
pub const STATE_ID: &str = "id";

/// Recorded state of one agent.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentState {
    pub id: NodeId,
    /// Model state; every change is recorded in history.
    pub state: State,
    /// Auxiliary attributes, recorded under the `attrs.` prefix.
    pub attrs: State,
}

impl AgentState {
    pub fn new(id: NodeId, state: State) -> Self {
        Self {
            id,
            state,
            attrs: State::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.insert(key.into(), value.into());
    }

    /// Inserts `value` only when `key` is not set yet.
    pub fn set_default(&mut self, key: &str, value: impl Into<Value>) {
        self.state
            .entry(key.to_string())
            .or_insert_with(|| value.into());
    }

    pub fn state_id(&self) -> Option<&Value> {
        self.state.get(STATE_ID)
    }

    /// Integer state value; fails when missing or not an integer.
    pub fn int(&self, key: &str) -> Result<i64, StepError> {
        match self.state.get(key) {
            None => Err(StepError::MissingState(key.to_string())),
            Some(value) => value.as_i64().ok_or_else(|| StepError::InvalidState {
                key: key.to_string(),
                expected: "an integer",
            }),
        }
    }

    /// Like [`AgentState::int`], but a missing key reads as `default`.
    pub fn int_or(&self, key: &str, default: i64) -> Result<i64, StepError> {
        if self.state.contains_key(key) {
            self.int(key)
        } else {
            Ok(default)
        }
    }

    /// True if this agent passes a `state_id` filter.
    pub fn matches(&self, state_id: Option<&Value>) -> bool {
        match state_id {
            None => true,
            Some(wanted) => self.state_id() == Some(wanted),
        }
    }
}

/// Per-agent rule advancing its own state by one tick.
pub trait Behavior: Send {
    /// Called once before tick 0 is recorded.
    fn init(&mut self, _agent: &mut AgentState) {}

    /// Advances `agent` by one tick. Any error aborts the trial.
    fn step(&mut self, agent: &mut AgentState, ctx: &mut StepContext<'_>) -> Result<(), StepError>;
}

/// An agent bound to a node.
pub struct Agent {
    /// Behavior type identifier, as named in the registry
    pub kind: String,
    pub data: AgentState,
    pub behavior: Box<dyn Behavior>,
}

impl Agent {
    pub fn new(kind: impl Into<String>, data: AgentState, behavior: Box<dyn Behavior>) -> Self {
        Self {
            kind: kind.into(),
            data,
            behavior,
        }
    }

    /// A [`BaseAgent`] with empty state.
    pub fn base(id: NodeId) -> Self {
        Self::new("BaseAgent", AgentState::new(id, State::new()), Box::new(BaseAgent))
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("kind", &self.kind)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

/// Services available to a behavior while it steps.
pub struct StepContext<'a> {
    now: u64,
    index: usize,
    topology: &'a Topology,
    snapshot: &'a [AgentState],
    params: &'a Params,
    rng: &'a mut SmallRng,
}

impl<'a> StepContext<'a> {
    pub(crate) fn new(
        now: u64,
        index: usize,
        topology: &'a Topology,
        snapshot: &'a [AgentState],
        params: &'a Params,
        rng: &'a mut SmallRng,
    ) -> Self {
        Self {
            now,
            index,
            topology,
            snapshot,
            params,
            rng,
        }
    }

    /// Clock value when this tick started. Neighbor queries see the state
    /// recorded at this tick.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn id(&self) -> &'a NodeId {
        &self.snapshot[self.index].id
    }

    pub fn degree(&self) -> usize {
        self.topology.degree(self.index)
    }

    pub fn param(&self, key: &str) -> Option<&'a Value> {
        self.params.get(key)
    }

    pub fn rng(&mut self) -> &mut SmallRng {
        &mut *self.rng
    }

    /// Uniform sample in `[0, 1)`.
    pub fn random(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Adjacent agents whose `state["id"]` equals `state_id`, or every
    /// neighbor when `state_id` is `None`.
    pub fn get_neighboring_agents(&self, state_id: Option<&Value>) -> Vec<&'a AgentState> {
        neighbors_matching(self.topology, self.snapshot, self.index, state_id)
    }

    /// Counts matching agents among the neighbors, or across the whole
    /// population (the caller included) when `limit_neighbors` is false.
    pub fn count_agents(&self, state_id: Option<&Value>, limit_neighbors: bool) -> usize {
        if limit_neighbors {
            self.get_neighboring_agents(state_id).len()
        } else {
            count_matching(self.snapshot, state_id)
        }
    }
}

pub(crate) fn neighbors_matching<'a>(
    topology: &Topology,
    population: &'a [AgentState],
    index: usize,
    state_id: Option<&Value>,
) -> Vec<&'a AgentState> {
    topology
        .neighbors(index)
        .iter()
        .filter_map(|&j| population.get(j))
        .filter(|agent| agent.matches(state_id))
        .collect()
}

pub(crate) fn count_matching(population: &[AgentState], state_id: Option<&Value>) -> usize {
    population.iter().filter(|agent| agent.matches(state_id)).count()
}
