//! Environment
//!
//! Owns one trial's population and clock. Every tick steps each agent once,
//! in topology node order, against the state the population had when the
//! tick began. Agent updates are staged and only committed when every agent
//! stepped successfully; the committed changes are then recorded in history
//! at the new clock value.
//!
//! Tick 0 holds the initial state. After `n` ticks the clock reads `n` and
//! history holds entries for ticks `0..=n`.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use sim_history::{Entity, History, HistoryLog, HistoryRow, NodeId, Query, QueryError, QueryResult, Value};
use std::collections::BTreeMap;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agents::{Agent, AgentState, Params, State, StepContext};
use crate::error::{ConfigError, SimError};
use crate::topology::{gexf, Attributes, Topology};

/// Prefix of history attributes holding `attrs` entries.
pub const ATTRS_PREFIX: &str = "attrs.";

/// Lifecycle of an environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Population may still be replaced; nothing recorded yet
    Initializing,
    Stepping,
    /// Reached `max_time`, or a behavior failed
    Terminal,
}

/// Cooperative cancellation flag, checked between ticks.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Environment {
    name: String,
    topology: Arc<Topology>,
    seed: u64,
    rng: SmallRng,
    now: u64,
    phase: Phase,
    max_time: Option<u64>,
    dry_run: bool,
    agents: Vec<Agent>,
    params: Params,
    history: History,
    failure: Option<String>,
}

impl Environment {
    /// Creates an environment with a [`BaseAgent`](crate::agents::BaseAgent)
    /// on every node.
    pub fn new(name: impl Into<String>, topology: Arc<Topology>, seed: u64) -> Self {
        let agents = topology.node_ids().cloned().map(Agent::base).collect();
        Self {
            name: name.into(),
            topology,
            seed,
            rng: SmallRng::seed_from_u64(seed),
            now: 0,
            phase: Phase::Initializing,
            max_time: None,
            dry_run: false,
            agents,
            params: Params::new(),
            history: History::new(),
            failure: None,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Ticks to run before becoming terminal. `None` runs until aborted.
    pub fn with_max_time(mut self, max_time: Option<u64>) -> Self {
        self.max_time = max_time;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Replaces the whole population. `agents[i]` is bound to node `i`.
    pub fn populate(&mut self, agents: Vec<Agent>) -> Result<(), SimError> {
        self.ensure_initializing()?;
        if agents.len() != self.topology.len() {
            return Err(ConfigError::PopulationMismatch {
                agents: agents.len(),
                nodes: self.topology.len(),
            }
            .into());
        }
        self.agents = agents;
        for (agent, id) in self.agents.iter_mut().zip(self.topology.node_ids()) {
            agent.data.id = id.clone();
        }
        Ok(())
    }

    /// Binds `agent` to the node `id`.
    pub fn set_agent(&mut self, id: &NodeId, mut agent: Agent) -> Result<(), SimError> {
        self.ensure_initializing()?;
        let index = self.topology.index_of(id).ok_or_else(|| ConfigError::UnknownNode {
            field: "agents".to_string(),
            node: id.clone(),
        })?;
        agent.data.id = id.clone();
        self.agents[index] = agent;
        Ok(())
    }

    /// Runs every `init` hook and records tick 0.
    pub fn start(&mut self) -> Result<(), SimError> {
        self.ensure_initializing()?;
        for agent in &mut self.agents {
            agent.behavior.init(&mut agent.data);
        }
        self.save_state(0)?;
        self.phase = if self.max_time == Some(0) {
            Phase::Terminal
        } else {
            Phase::Stepping
        };
        debug!("{}: started with {} agents", self.name, self.agents.len());
        Ok(())
    }

    /// Advances the clock by one tick.
    pub fn tick(&mut self) -> Result<(), SimError> {
        if self.phase == Phase::Initializing {
            self.start()?;
        }
        if self.phase == Phase::Terminal {
            return Err(SimError::Terminated(self.name.clone()));
        }

        let snapshot: Vec<AgentState> = self.agents.iter().map(|a| a.data.clone()).collect();
        let mut staged = Vec::with_capacity(snapshot.len());

        for (index, agent) in self.agents.iter_mut().enumerate() {
            let mut data = snapshot[index].clone();
            let mut ctx = StepContext::new(
                self.now,
                index,
                &self.topology,
                &snapshot,
                &self.params,
                &mut self.rng,
            );
            if let Err(source) = agent.behavior.step(&mut data, &mut ctx) {
                let err = SimError::Behavior {
                    agent: data.id,
                    tick: self.now,
                    source,
                };
                warn!("{}: {}", self.name, err);
                self.failure = Some(err.to_string());
                self.phase = Phase::Terminal;
                return Err(err);
            }
            staged.push(data);
        }

        for (agent, data) in self.agents.iter_mut().zip(staged) {
            agent.data = data;
        }
        self.now += 1;
        let recorded = self.save_state(self.now)?;
        debug!("{}: tick {} recorded {} changes", self.name, self.now, recorded);

        if self.max_time.is_some_and(|max| self.now >= max) {
            self.phase = Phase::Terminal;
        }
        Ok(())
    }

    /// Ticks until terminal.
    pub fn run(&mut self) -> Result<(), SimError> {
        self.run_with(&AbortSignal::new())
    }

    /// Ticks until terminal or until `signal` is raised. Returns `Ok` when
    /// aborted; check [`AbortSignal::is_aborted`] to tell the two apart.
    pub fn run_with(&mut self, signal: &AbortSignal) -> Result<(), SimError> {
        if self.phase == Phase::Initializing {
            self.start()?;
        }
        while self.phase == Phase::Stepping {
            if signal.is_aborted() {
                info!("{}: aborted at tick {}", self.name, self.now);
                return Ok(());
            }
            self.tick()?;
        }
        Ok(())
    }

    /// Records every agent attribute and environment parameter whose value
    /// differs from the one in force at `now`. Returns the number of entries
    /// written.
    pub fn save_state(&mut self, now: u64) -> Result<usize, SimError> {
        let mut written = 0;
        for agent in &self.agents {
            let entity = Entity::Agent(agent.data.id.clone());
            written += record_changes(&mut self.history, &entity, now, "", &agent.data.state)?;
            written += record_changes(&mut self.history, &entity, now, ATTRS_PREFIX, &agent.data.attrs)?;
        }
        written += record_changes(&mut self.history, &Entity::Environment, now, "", &self.params)?;
        Ok(written)
    }

    /// Sets an environment parameter. Recorded by the next commit.
    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn get_agent(&self, id: impl Into<NodeId>) -> Option<AgentRef<'_>> {
        let index = self.topology.index_of(&id.into())?;
        Some(AgentRef { env: self, index })
    }

    /// Agents in topology node order.
    pub fn agents(&self) -> impl Iterator<Item = AgentRef<'_>> + '_ {
        (0..self.agents.len()).map(move |index| AgentRef { env: self, index })
    }

    /// Agents whose `state["id"]` equals `state_id` (all when `None`).
    /// With `limit_neighbors`, only the neighbors of that node are counted,
    /// the same query a behavior makes through
    /// [`StepContext::count_agents`].
    pub fn count_agents(&self, state_id: Option<&Value>, limit_neighbors: Option<&NodeId>) -> usize {
        match limit_neighbors {
            Some(id) => self.get_neighboring_agents(id, state_id).len(),
            None => self.agents.iter().filter(|a| a.data.matches(state_id)).count(),
        }
    }

    /// Neighbors of `id` whose `state["id"]` equals `state_id`.
    pub fn get_neighboring_agents(&self, id: &NodeId, state_id: Option<&Value>) -> Vec<AgentRef<'_>> {
        let Some(index) = self.topology.index_of(id) else {
            return Vec::new();
        };
        self.topology
            .neighbors(index)
            .iter()
            .filter(|&&j| self.agents[j].data.matches(state_id))
            .map(|&j| AgentRef { env: self, index: j })
            .collect()
    }

    pub fn query(&self, query: &Query) -> Result<QueryResult, QueryError> {
        self.history.query(query)
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Flattened history rows; restartable.
    pub fn history_to_tuples(&self) -> impl Iterator<Item = HistoryRow> + '_ {
        self.history.to_tuples()
    }

    /// Writes the topology with the current agent state as node attributes.
    pub fn write_gexf<W: std::io::Write>(&self, out: W) -> std::io::Result<()> {
        let overlays: Vec<Attributes> = self
            .agents
            .iter()
            .map(|a| {
                let mut attrs = a.data.state.clone();
                for (key, value) in &a.data.attrs {
                    attrs.insert(format!("{}{}", ATTRS_PREFIX, key), value.clone());
                }
                attrs.insert("agent_type".to_string(), Value::from(a.kind.as_str()));
                attrs
            })
            .collect();
        gexf::write(out, &self.topology, &overlays)
    }

    /// Writes `<dir>/<name>.gexf`, creating `dir` if needed.
    pub fn dump_gexf(&self, dir: &Path) -> Result<PathBuf, SimError> {
        let path = dir.join(format!("{}.gexf", self.name));
        let io_error = |source| SimError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_error)?;
        let file = fs::File::create(&path).map_err(io_error)?;
        self.write_gexf(BufWriter::new(file)).map_err(io_error)?;
        debug!("{}: wrote {}", self.name, path.display());
        Ok(path)
    }

    /// Writes `<dir>/<name>.history.jsonl`, creating `dir` if needed.
    pub fn dump_history(&self, dir: &Path) -> Result<PathBuf, SimError> {
        let path = dir.join(format!("{}.history.jsonl", self.name));
        let io_error = |source| SimError::Io {
            path: path.clone(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_error)?;
        let mut log = HistoryLog::new(&path).map_err(io_error)?;
        log.log_batch(self.history.to_tuples()).map_err(io_error)?;
        log.flush().map_err(io_error)?;
        debug!("{}: wrote {} history rows to {}", self.name, log.row_count(), path.display());
        Ok(path)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn max_time(&self) -> Option<u64> {
        self.max_time
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Why the environment stopped early, if a behavior failed.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn ensure_initializing(&self) -> Result<(), SimError> {
        match self.phase {
            Phase::Initializing => Ok(()),
            _ => Err(SimError::Terminated(format!("{} (already started)", self.name))),
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("name", &self.name)
            .field("now", &self.now)
            .field("phase", &self.phase)
            .field("agents", &self.agents.len())
            .finish_non_exhaustive()
    }
}

fn record_changes(
    history: &mut History,
    entity: &Entity,
    now: u64,
    prefix: &str,
    values: &State,
) -> Result<usize, SimError> {
    let mut written = 0;
    for (key, value) in values {
        let attribute = format!("{}{}", prefix, key);
        if !history.get(entity, now, &attribute).is_some_and(|recorded| recorded.same(value)) {
            history.record(entity.clone(), now, attribute, value.clone())?;
            written += 1;
        }
    }
    Ok(written)
}

/// Read-only view of one agent and its history.
#[derive(Clone, Copy)]
pub struct AgentRef<'a> {
    env: &'a Environment,
    index: usize,
}

impl<'a> AgentRef<'a> {
    fn agent(&self) -> &'a Agent {
        &self.env.agents[self.index]
    }

    pub fn id(&self) -> &'a NodeId {
        &self.agent().data.id
    }

    /// Behavior type identifier.
    pub fn kind(&self) -> &'a str {
        &self.agent().kind
    }

    pub fn state(&self) -> &'a State {
        &self.agent().data.state
    }

    pub fn attrs(&self) -> &'a State {
        &self.agent().data.attrs
    }

    /// Current value of a state attribute.
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.state().get(key)
    }

    pub fn degree(&self) -> usize {
        self.env.topology.degree(self.index)
    }

    /// Value of `attribute` in force at `tick`.
    pub fn at(&self, attribute: &str, tick: u64) -> Option<&'a Value> {
        self.env.history.get(&self.entity(), tick, attribute)
    }

    /// Recorded changes of `attribute`, ordered by tick.
    pub fn series(&self, attribute: &str) -> Vec<(u64, &'a Value)> {
        self.env.history.series(&self.entity(), attribute)
    }

    /// Every recorded entry of this agent, grouped by tick.
    pub fn history(&self) -> BTreeMap<u64, BTreeMap<&'a str, &'a Value>> {
        self.env.history.entity_ticks(&self.entity())
    }

    fn entity(&self) -> Entity {
        Entity::Agent(self.id().clone())
    }
}

impl std::fmt::Debug for AgentRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRef")
            .field("id", self.id())
            .field("kind", &self.kind())
            .field("state", self.state())
            .finish()
    }
}
