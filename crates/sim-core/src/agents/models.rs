//! Built-in Behaviors

use sim_history::Value;

use super::{AgentState, Behavior, Params, StepContext, STATE_ID};
use crate::error::{ConfigError, StepError};

/// Does nothing. Nodes without an explicit agent type get this.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaseAgent;

impl Behavior for BaseAgent {
    fn step(&mut self, _agent: &mut AgentState, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        Ok(())
    }
}

/// Records how many neighbors and how many agents exist each tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterModel;

impl Behavior for CounterModel {
    fn step(&mut self, agent: &mut AgentState, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let times = agent.int_or("times", 0)?;
        agent.set("neighbors", ctx.count_agents(None, true));
        agent.set("total", ctx.count_agents(None, false));
        agent.set("times", times + 1);
        Ok(())
    }
}

/// Accumulates neighbor counts over time.
///
/// Each tick adds the degree to `neighbors` and `increment * degree` to
/// `total`, where `increment` is an environment parameter (default 1).
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregatedCounter;

impl Behavior for AggregatedCounter {
    fn init(&mut self, agent: &mut AgentState) {
        agent.set_default("times", 0);
        agent.set_default("neighbors", 0);
        agent.set_default("total", 0);
    }

    fn step(&mut self, agent: &mut AgentState, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let increment = match ctx.param("increment") {
            None => 1,
            Some(value) => value.as_i64().ok_or_else(|| {
                StepError::Failed(format!("increment should be an integer, got {}", value))
            })?,
        };
        let degree = ctx.degree() as i64;

        let times = agent.int("times")?;
        let neighbors = agent.int("neighbors")?;
        let total = agent.int("total")?;
        agent.set("times", times + 1);
        agent.set("neighbors", neighbors + degree);
        agent.set("total", total + increment * degree);
        Ok(())
    }
}

/// Bass diffusion: an unaware agent (`id == 0`) becomes aware (`id == 1`)
/// either spontaneously or by imitating aware neighbors.
///
/// Innovation is tried first; if it fires, imitation is skipped for that
/// tick. The current status is mirrored into `attrs["status"]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BassModel {
    pub innovation_prob: f64,
    pub imitation_prob: f64,
}

const UNAWARE: i64 = 0;
const AWARE: i64 = 1;

impl BassModel {
    pub fn from_params(params: &Params) -> Result<Self, ConfigError> {
        Ok(Self {
            innovation_prob: probability(params, "innovation_prob")?,
            imitation_prob: probability(params, "imitation_prob")?,
        })
    }

    fn mirror_status(agent: &mut AgentState) {
        if let Some(id) = agent.state_id().cloned() {
            agent.attrs.insert("status".to_string(), id);
        }
    }
}

fn probability(params: &Params, key: &str) -> Result<f64, ConfigError> {
    let field = format!("environment_params.{}", key);
    match params.get(key) {
        None => Err(ConfigError::InvalidParameter {
            field,
            reason: "required by BassModel".to_string(),
        }),
        Some(value) => value.as_f64().ok_or(ConfigError::InvalidParameter {
            field,
            reason: format!("expected a number, got {}", value),
        }),
    }
}

impl Behavior for BassModel {
    fn init(&mut self, agent: &mut AgentState) {
        agent.set_default(STATE_ID, UNAWARE);
    }

    fn step(&mut self, agent: &mut AgentState, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        let status = agent.int(STATE_ID)?;

        if ctx.random() < self.innovation_prob {
            if status == UNAWARE {
                agent.set(STATE_ID, AWARE);
            }
            Self::mirror_status(agent);
            return Ok(());
        }

        if status == UNAWARE {
            let aware = ctx.get_neighboring_agents(Some(&Value::Int(AWARE))).len();
            if ctx.random() < self.imitation_prob * aware as f64 {
                agent.set(STATE_ID, AWARE);
            }
        }
        Self::mirror_status(agent);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::State;
    use crate::topology::Topology;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use sim_history::NodeId;

    fn agents(n: usize) -> Vec<AgentState> {
        (0..n).map(|i| AgentState::new(NodeId::from(i), State::new())).collect()
    }

    fn step_once<B: Behavior>(
        behavior: &mut B,
        topology: &Topology,
        snapshot: &[AgentState],
        index: usize,
        params: &Params,
        rng: &mut SmallRng,
    ) -> Result<AgentState, StepError> {
        let mut working = snapshot[index].clone();
        let mut ctx = StepContext::new(1, index, topology, snapshot, params, rng);
        behavior.step(&mut working, &mut ctx)?;
        Ok(working)
    }

    #[test]
    fn test_counter_model_counts() {
        let mut t = Topology::with_nodes(3);
        t.add_edge_by_index(0, 1, None);
        t.add_edge_by_index(0, 2, None);
        let snapshot = agents(3);
        let mut rng = SmallRng::seed_from_u64(0);
        let after = step_once(&mut CounterModel, &t, &snapshot, 0, &Params::new(), &mut rng).unwrap();
        assert_eq!(after.get("neighbors"), Some(&Value::Int(2)));
        assert_eq!(after.get("total"), Some(&Value::Int(3)));
        assert_eq!(after.get("times"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_aggregated_counter_uses_increment() {
        let mut t = Topology::with_nodes(3);
        t.add_edge_by_index(0, 1, None);
        t.add_edge_by_index(0, 2, None);
        let mut snapshot = agents(3);
        AggregatedCounter.init(&mut snapshot[0]);
        let mut params = Params::new();
        params.insert("increment".to_string(), Value::from(5));
        let mut rng = SmallRng::seed_from_u64(0);

        let after = step_once(&mut AggregatedCounter, &t, &snapshot, 0, &params, &mut rng).unwrap();
        assert_eq!(after.get("neighbors"), Some(&Value::Int(2)));
        assert_eq!(after.get("total"), Some(&Value::Int(10)));
    }

    #[test]
    fn test_aggregated_counter_needs_initialized_state() {
        let t = Topology::with_nodes(1);
        let snapshot = agents(1);
        let mut rng = SmallRng::seed_from_u64(0);
        let err = step_once(&mut AggregatedCounter, &t, &snapshot, 0, &Params::new(), &mut rng).unwrap_err();
        assert_eq!(err, StepError::MissingState("times".to_string()));
    }

    #[test]
    fn test_bass_model_requires_probabilities() {
        let mut params = Params::new();
        params.insert("innovation_prob".to_string(), Value::from(0.5));
        match BassModel::from_params(&params) {
            Err(ConfigError::InvalidParameter { field, .. }) => {
                assert_eq!(field, "environment_params.imitation_prob")
            }
            other => panic!("expected invalid parameter, got {:?}", other),
        }
    }

    #[test]
    fn test_bass_model_certain_innovation() {
        let t = Topology::with_nodes(1);
        let mut snapshot = agents(1);
        let mut model = BassModel {
            innovation_prob: 1.0,
            imitation_prob: 0.0,
        };
        model.init(&mut snapshot[0]);
        assert_eq!(snapshot[0].state_id(), Some(&Value::Int(0)));

        let mut rng = SmallRng::seed_from_u64(0);
        let after = step_once(&mut model, &t, &snapshot, 0, &Params::new(), &mut rng).unwrap();
        assert_eq!(after.state_id(), Some(&Value::Int(1)));
        assert_eq!(after.attrs.get("status"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_bass_model_imitation_needs_aware_neighbors() {
        let mut t = Topology::with_nodes(2);
        t.add_edge_by_index(0, 1, None);
        let mut model = BassModel {
            innovation_prob: 0.0,
            imitation_prob: 1.0,
        };
        let mut snapshot = agents(2);
        model.init(&mut snapshot[0]);
        model.init(&mut snapshot[1]);
        let mut rng = SmallRng::seed_from_u64(0);

        let after = step_once(&mut model, &t, &snapshot, 0, &Params::new(), &mut rng).unwrap();
        assert_eq!(after.state_id(), Some(&Value::Int(0)));

        snapshot[1].set(STATE_ID, 1);
        let after = step_once(&mut model, &t, &snapshot, 0, &Params::new(), &mut rng).unwrap();
        assert_eq!(after.state_id(), Some(&Value::Int(1)));
        assert_eq!(after.attrs.get("status"), Some(&Value::Int(1)));
    }
}
