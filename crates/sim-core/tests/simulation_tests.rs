//! End-to-end tests: configuration in, trial reports and history out.

use sim_core::agents::{AgentState, Behavior, StepContext, STATE_ID};
use sim_core::config::{AgentDistribution, AgentStates, ConfigFormat, LiveState, NetworkParams};
use sim_core::topology::{generators::random_geometric_graph, load_network};
use sim_core::{
    to_declarative, BehaviorRegistry, ConfigError, Environment, NodeId, Simulation, SimulationConfig,
    State, StepError, Topology, Value,
};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn gexf_config() -> SimulationConfig {
    SimulationConfig {
        network_params: NetworkParams::from_path(fixture("test.gexf")),
        ..Default::default()
    }
}

fn state(pairs: &[(&str, Value)]) -> State {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn test_load_graph() {
    let topology = load_network(&NetworkParams::from_path(fixture("test.gexf")), None, None).unwrap();
    assert_eq!(topology.len(), 2);
    assert_eq!(topology.edge_count(), 1);

    let err = load_network(&NetworkParams::from_path(fixture("unknown.extension")), None, None).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat { .. }));
}

#[test]
fn test_generate_barabasi() {
    let mut params = NetworkParams::generator("barabasi_albert_graph");
    assert!(matches!(
        load_network(&params, None, Some(1)),
        Err(ConfigError::MissingParameter { .. })
    ));
    params = params.with_param("n", 100).with_param("m", 10);
    let topology = load_network(&params, None, Some(1)).unwrap();
    assert_eq!(topology.len(), 100);
}

#[test]
fn test_empty_simulation() {
    let config = SimulationConfig {
        agent_type: Some("BaseAgent".to_string()),
        ..gexf_config()
    };
    let unbounded = Simulation::from_config(config.clone(), BehaviorRegistry::builtin()).unwrap();
    assert_eq!(unbounded.trial_environment(0, 1, true).unwrap().max_time(), None);

    let config = SimulationConfig {
        max_time: Some(7),
        ..config
    };
    let sim = Simulation::from_config(config, BehaviorRegistry::builtin()).unwrap();
    let report = sim.run_simulation(true).unwrap();
    assert!(report.is_success());
    let env = &report.trials[0].env;
    assert_eq!(env.now(), 7);
    assert!(env.history().is_empty());
}

#[test]
fn test_counter_agent() {
    let config = SimulationConfig {
        name: Some("CounterAgent".to_string()),
        agent_type: Some("CounterModel".to_string()),
        states: Some(AgentStates::List(vec![
            state(&[("neighbors", Value::from(10))]),
            state(&[("total", Value::from(12))]),
        ])),
        max_time: Some(2),
        ..gexf_config()
    };
    let sim = Simulation::from_config(config, BehaviorRegistry::builtin()).unwrap();
    let report = sim.run_simulation(true).unwrap();
    let env = report.completed_environments()[0];

    let a0 = env.get_agent("0").unwrap();
    let a1 = env.get_agent("1").unwrap();
    assert_eq!(a0.at("neighbors", 0), Some(&Value::Int(10)));
    assert_eq!(a0.at("neighbors", 1), Some(&Value::Int(1)));
    assert_eq!(a1.at("total", 0), Some(&Value::Int(12)));
    assert_eq!(a1.at("neighbors", 1), Some(&Value::Int(1)));
}

#[test]
fn test_counter_agent_history() {
    let config = SimulationConfig {
        name: Some("CounterAgent".to_string()),
        network_agents: vec![AgentDistribution {
            agent_type: Some("AggregatedCounter".to_string()),
            weight: Some(1.0),
            state: state(&[("id", Value::from(0))]),
        }],
        environment_params: state(&[("increment", Value::from(2))]),
        max_time: Some(10),
        ..gexf_config()
    };
    let sim = Simulation::from_config(config, BehaviorRegistry::builtin()).unwrap();
    let report = sim.run_simulation(true).unwrap();
    let env = report.completed_environments()[0];

    for agent in env.agents() {
        assert_eq!(agent.history().len(), 11);
        let mut last = 0;
        for (tick, total) in agent.series("total") {
            let total = total.as_i64().unwrap();
            if tick > 0 {
                assert_eq!(total, last + 2);
            }
            last = total;
        }
        assert_eq!(agent.series("total").len(), 11);
    }
}

struct NeighborsInState0;

impl Behavior for NeighborsInState0 {
    fn step(&mut self, agent: &mut AgentState, ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        agent.set("neighbors", ctx.count_agents(Some(&Value::Int(0)), true));
        Ok(())
    }
}

#[test]
fn test_custom_agent() {
    let mut registry = BehaviorRegistry::builtin();
    registry.register("CustomAgent", |_| Ok(Box::new(NeighborsInState0)));
    let config = SimulationConfig {
        network_agents: vec![AgentDistribution {
            agent_type: Some("CustomAgent".to_string()),
            weight: Some(1.0),
            state: state(&[(STATE_ID, Value::from(0))]),
        }],
        max_time: Some(10),
        ..gexf_config()
    };
    let sim = Simulation::from_config(config, registry).unwrap();
    let report = sim.run_simulation(true).unwrap();
    let env = report.completed_environments()[0];
    assert_eq!(env.get_agent("0").unwrap().get("neighbors"), Some(&Value::Int(1)));
}

#[test]
fn test_unknown_agent_type_fails_before_running() {
    let config = SimulationConfig {
        agent_type: Some("Oracle".to_string()),
        ..gexf_config()
    };
    match Simulation::from_config(config, BehaviorRegistry::builtin()) {
        Err(ConfigError::UnknownAgentType { field, agent_type }) => {
            assert_eq!(field, "agent_type");
            assert_eq!(agent_type, "Oracle");
        }
        other => panic!("expected unknown agent type, got {:?}", other.err()),
    }
}

#[test]
fn test_torvalds_example() {
    let sim = Simulation::from_file(&fixture("torvalds.toml"), BehaviorRegistry::builtin()).unwrap();
    let report = sim.run_simulation(true).unwrap();
    let env = report.completed_environments()[0];
    assert_eq!(env.now(), 10);

    for agent in env.agents() {
        let skill_level = agent.get("skill_level").and_then(Value::as_str).unwrap();
        assert_eq!(agent.get("total"), Some(&Value::Int(3)));
        match agent.id().as_str() {
            "Torvalds" => {
                assert_eq!(skill_level, "God");
                assert_eq!(agent.get("neighbors"), Some(&Value::Int(2)));
            }
            "balkian" => {
                assert_eq!(skill_level, "developer");
                assert_eq!(agent.get("neighbors"), Some(&Value::Int(1)));
            }
            _ => {
                assert_eq!(skill_level, "beginner");
                assert_eq!(agent.get("neighbors"), Some(&Value::Int(1)));
            }
        }
    }
}

#[test]
fn test_toml_round_trip() {
    let config = SimulationConfig::from_file(&fixture("complete.toml")).unwrap();
    let sim = Simulation::from_config(config.clone(), BehaviorRegistry::builtin()).unwrap();

    let serial = sim.to_toml(true).unwrap();
    let recovered = LiveState::parse(&serial, ConfigFormat::Toml).unwrap();
    assert!(recovered.dry_run);
    assert_eq!(recovered.load_module, sim.registry().name());
    assert_eq!(recovered.topology.nodes.len(), 100);
    assert_eq!(to_declarative(recovered), config);
}

#[test]
fn test_configuration_changes() {
    let config = SimulationConfig::from_file(&fixture("complete.toml")).unwrap();
    let sim = Simulation::from_config(config.clone(), BehaviorRegistry::builtin()).unwrap();
    for _ in 0..5 {
        sim.run_simulation(true).unwrap();
        assert_eq!(to_declarative(sim.live_state(true)), config);
    }
}

#[test]
fn test_complete_example_population() {
    let sim = Simulation::from_file(&fixture("complete.toml"), BehaviorRegistry::builtin()).unwrap();
    let report = sim.run_simulation(true).unwrap();
    assert_eq!(report.trials.len(), 3);
    assert!(report.is_success());
    for env in report.completed_environments() {
        assert_eq!(env.agents().count(), 100);
        assert_eq!(env.now(), 20);
        let kinds: Vec<&str> = env.agents().map(|a| a.kind()).collect();
        assert!(kinds.iter().all(|k| ["BassModel", "CounterModel", "AggregatedCounter"].contains(k)));
        // every agent starts with the default state
        assert!(env.agents().all(|a| a.at("incidents", 0) == Some(&Value::Int(0))));
    }
}

/// Fails the first step taken by any agent sharing the flag.
struct FailOnce(Arc<AtomicBool>);

impl Behavior for FailOnce {
    fn step(&mut self, agent: &mut AgentState, _ctx: &mut StepContext<'_>) -> Result<(), StepError> {
        if self.0.swap(false, Ordering::SeqCst) {
            return Err(StepError::Failed("sensor offline".to_string()));
        }
        let times = agent.int_or("times", 0)?;
        agent.set("times", times + 1);
        Ok(())
    }
}

#[test]
fn test_failing_trial_is_isolated() {
    let armed = Arc::new(AtomicBool::new(true));
    let mut registry = BehaviorRegistry::new("flaky");
    let flag = Arc::clone(&armed);
    registry.register("FailOnce", move |_| Ok(Box::new(FailOnce(Arc::clone(&flag)))));

    let config = SimulationConfig {
        name: Some("flaky".to_string()),
        agent_type: Some("FailOnce".to_string()),
        num_trials: 3,
        max_time: Some(4),
        ..gexf_config()
    };
    let sim = Simulation::from_config(config, registry).unwrap();
    let report = sim.run_simulation(true).unwrap();

    assert!(!report.is_success());
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 0);
    assert_eq!(failures[0].env.now(), 0);
    assert!(failures[0].env.failure().unwrap().contains("sensor offline"));

    let completed = report.completed_environments();
    assert_eq!(completed.len(), 2);
    for env in completed {
        assert_eq!(env.get_agent("0").unwrap().at("times", 4), Some(&Value::Int(4)));
    }
}

#[test]
fn test_persisted_run() {
    let dir = TempDir::new().unwrap();
    let config = SimulationConfig {
        name: Some("persisted".to_string()),
        agent_type: Some("CounterModel".to_string()),
        max_time: Some(3),
        num_trials: 2,
        dir_path: Some(dir.path().to_path_buf()),
        ..gexf_config()
    };
    let sim = Simulation::from_config(config.clone(), BehaviorRegistry::builtin()).unwrap();
    let report = sim.run_simulation(false).unwrap();

    let out = dir.path().join("persisted");
    assert_eq!(sim.output_dir(), out);
    let saved = std::fs::read_to_string(out.join("persisted.toml")).unwrap();
    let live = LiveState::parse(&saved, ConfigFormat::Toml).unwrap();
    assert!(!live.dry_run);
    assert_eq!(to_declarative(live), config);

    for trial in &report.trials {
        let name = trial.env.name();
        assert!(out.join(format!("{}.gexf", name)).exists());
        let history = sim_history::read_history(out.join(format!("{}.history.jsonl", name))).unwrap();
        assert_eq!(history.len(), trial.env.history().len());
    }
}

#[test]
fn test_json_config_with_null_runs_persisted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("notes.json");
    let content = serde_json::json!({
        "name": "notes",
        "network_params": {"path": fixture("test.gexf")},
        "agent_type": "CounterModel",
        "default_state": {"profile": {"age": 3}},
        "environment_params": {"note": null},
        "max_time": 2,
        "dir_path": dir.path(),
    });
    std::fs::write(&path, content.to_string()).unwrap();

    let sim = Simulation::from_file(&path, BehaviorRegistry::builtin()).unwrap();
    assert!(sim.run_simulation(true).unwrap().is_success());
    let report = sim.run_simulation(false).unwrap();
    assert!(report.is_success());

    let out = dir.path().join("notes");
    let saved = std::fs::read_to_string(out.join("notes.json")).unwrap();
    let live = LiveState::parse(&saved, ConfigFormat::Json).unwrap();
    assert_eq!(to_declarative(live), *sim.config());
    assert!(!out.join("notes.toml").exists());
    assert!(out.join("notes_trial_0.history.jsonl").exists());
}

#[test]
fn test_dry_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let config = SimulationConfig {
        agent_type: Some("CounterModel".to_string()),
        max_time: Some(2),
        dir_path: Some(dir.path().to_path_buf()),
        ..gexf_config()
    };
    let sim = Simulation::from_config(config, BehaviorRegistry::builtin()).unwrap();
    sim.run_simulation(true).unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_states_for_unknown_node() {
    let mut states = std::collections::BTreeMap::new();
    states.insert(NodeId::from("nobody"), State::new());
    let config = SimulationConfig {
        agent_type: Some("BaseAgent".to_string()),
        states: Some(AgentStates::Map(states)),
        ..gexf_config()
    };
    assert!(matches!(
        Simulation::from_config(config, BehaviorRegistry::builtin()),
        Err(ConfigError::UnknownNode { .. })
    ));
}

#[test]
fn test_save_geometric() {
    let dir = TempDir::new().unwrap();
    let mut rng = SmallRng::seed_from_u64(20);
    let topology: Topology = random_geometric_graph(20, 0.1, 2, &mut rng);
    let env = Environment::new("geometric", Arc::new(topology), 0).with_dry_run(true);
    let path = env.dump_gexf(&dir.path().join("dump-gexf")).unwrap();
    assert!(path.exists());
}
