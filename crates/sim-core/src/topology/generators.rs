//! Graph Generators
//!
//! Named generator functions used by `network_params.generator`.

use rand::rngs::SmallRng;
use rand::Rng;
use sim_history::{NodeId, Value};

use super::{Attributes, Topology};
use crate::agents::Params;
use crate::error::ConfigError;

/// Names accepted by [`generate`].
pub const GENERATORS: &[&str] = &[
    "empty_graph",
    "complete_graph",
    "erdos_renyi_graph",
    "barabasi_albert_graph",
    "random_geometric_graph",
];

/// Builds a graph with the named generator. `params` holds the
/// generator-specific keys (`n`, `m`, `p`, `radius`, ...).
pub fn generate(name: &str, params: &Params, rng: &mut SmallRng) -> Result<Topology, ConfigError> {
    match name {
        "empty_graph" => Ok(Topology::with_nodes(required_usize(name, params, "n")?)),
        "complete_graph" => Ok(complete_graph(required_usize(name, params, "n")?)),
        "erdos_renyi_graph" | "gnp_random_graph" => {
            let n = required_usize(name, params, "n")?;
            let p = required_f64(name, params, "p")?;
            Ok(erdos_renyi_graph(n, p, rng))
        }
        "barabasi_albert_graph" => {
            let n = required_usize(name, params, "n")?;
            let m = required_usize(name, params, "m")?;
            barabasi_albert_graph(n, m, rng)
        }
        "random_geometric_graph" => {
            let n = required_usize(name, params, "n")?;
            let radius = required_f64(name, params, "radius")?;
            let dim = match params.get("dim") {
                Some(_) => required_usize(name, params, "dim")?,
                None => 2,
            };
            Ok(random_geometric_graph(n, radius, dim, rng))
        }
        other => Err(ConfigError::UnknownGenerator(other.to_string())),
    }
}

pub fn complete_graph(n: usize) -> Topology {
    let mut t = Topology::with_nodes(n);
    for a in 0..n {
        for b in (a + 1)..n {
            t.add_edge_by_index(a, b, None);
        }
    }
    t
}

/// G(n, p): every pair is connected independently with probability `p`.
pub fn erdos_renyi_graph(n: usize, p: f64, rng: &mut SmallRng) -> Topology {
    let mut t = Topology::with_nodes(n);
    for a in 0..n {
        for b in (a + 1)..n {
            if rng.gen::<f64>() < p {
                t.add_edge_by_index(a, b, None);
            }
        }
    }
    t
}

/// Preferential attachment: each new node attaches to `m` distinct existing
/// nodes, chosen with probability proportional to their degree.
pub fn barabasi_albert_graph(n: usize, m: usize, rng: &mut SmallRng) -> Result<Topology, ConfigError> {
    if m < 1 || m >= n {
        return Err(ConfigError::InvalidParameter {
            field: "network_params.m".to_string(),
            reason: format!("barabasi_albert_graph needs 1 <= m < n (m={}, n={})", m, n),
        });
    }

    let mut t = Topology::with_nodes(n);
    let mut targets: Vec<usize> = (0..m).collect();
    let mut repeated: Vec<usize> = Vec::with_capacity(2 * n * m);

    for source in m..n {
        for &target in &targets {
            t.add_edge_by_index(source, target, None);
        }
        repeated.extend(targets.iter().copied());
        repeated.extend(std::iter::repeat(source).take(m));

        targets.clear();
        while targets.len() < m {
            let candidate = repeated[rng.gen_range(0..repeated.len())];
            if !targets.contains(&candidate) {
                targets.push(candidate);
            }
        }
    }
    Ok(t)
}

/// Nodes placed uniformly in the unit cube of `dim` dimensions; nodes within
/// `radius` of each other are connected. Positions are kept in the `pos`
/// node attribute.
pub fn random_geometric_graph(n: usize, radius: f64, dim: usize, rng: &mut SmallRng) -> Topology {
    let mut t = Topology::undirected();
    let positions: Vec<Vec<f64>> = (0..n)
        .map(|_| (0..dim).map(|_| rng.gen::<f64>()).collect())
        .collect();

    for (i, pos) in positions.iter().enumerate() {
        let mut attrs = Attributes::new();
        attrs.insert(
            "pos".to_string(),
            Value::List(pos.iter().map(|c| Value::Float(*c)).collect()),
        );
        t.add_node(NodeId::from(i), attrs);
    }

    let r2 = radius * radius;
    for a in 0..n {
        for b in (a + 1)..n {
            let d2: f64 = positions[a]
                .iter()
                .zip(&positions[b])
                .map(|(x, y)| (x - y) * (x - y))
                .sum();
            if d2 <= r2 {
                t.add_edge_by_index(a, b, None);
            }
        }
    }
    t
}

fn required<'a>(generator: &str, params: &'a Params, key: &str) -> Result<&'a Value, ConfigError> {
    params.get(key).ok_or_else(|| ConfigError::MissingParameter {
        generator: generator.to_string(),
        parameter: key.to_string(),
    })
}

fn required_usize(generator: &str, params: &Params, key: &str) -> Result<usize, ConfigError> {
    let value = required(generator, params, key)?;
    value
        .as_i64()
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| ConfigError::InvalidParameter {
            field: format!("network_params.{}", key),
            reason: format!("expected a non-negative integer, got {}", value),
        })
}

fn required_f64(generator: &str, params: &Params, key: &str) -> Result<f64, ConfigError> {
    let value = required(generator, params, key)?;
    value.as_f64().ok_or_else(|| ConfigError::InvalidParameter {
        field: format!("network_params.{}", key),
        reason: format!("expected a number, got {}", value),
    })
}
