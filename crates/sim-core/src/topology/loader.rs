//! Topology Loader
//!
//! Resolves `network_params` into a [`Topology`], either by reading a file
//! (format chosen by extension) or by calling a named generator.

use rand::rngs::SmallRng;
use rand::SeedableRng;
use sim_history::NodeId;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{generators, gexf, Topology, TopologyData};
use crate::config::NetworkParams;
use crate::error::ConfigError;

/// File extensions understood by [`read_network`].
pub const FORMATS: &[&str] = &["gexf", "json", "edgelist"];

/// Builds the topology described by `params`.
///
/// Relative paths are resolved against `base_dir` (normally the directory of
/// the config file). Generators use `params.seed` when present, otherwise
/// `fallback_seed`, otherwise a random seed.
pub fn load_network(
    params: &NetworkParams,
    base_dir: Option<&Path>,
    fallback_seed: Option<u64>,
) -> Result<Topology, ConfigError> {
    if let Some(path) = &params.path {
        return read_network(&resolve(path, base_dir));
    }

    let Some(generator) = &params.generator else {
        return Err(ConfigError::MissingNetworkParams);
    };
    let seed = match params.params.get("seed") {
        Some(value) => value
            .as_i64()
            .map(|s| s as u64)
            .ok_or_else(|| ConfigError::InvalidParameter {
                field: "network_params.seed".to_string(),
                reason: format!("expected an integer, got {}", value),
            })?,
        None => fallback_seed.unwrap_or_else(rand::random),
    };
    let mut rng = SmallRng::seed_from_u64(seed);
    let topology = generators::generate(generator, &params.params, &mut rng)?;
    info!(
        "Generated {} with {} nodes and {} edges (seed {})",
        generator,
        topology.len(),
        topology.edge_count(),
        seed
    );
    Ok(topology)
}

/// Reads a topology file. Unknown extensions fail before the file is opened.
pub fn read_network(path: &Path) -> Result<Topology, ConfigError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !FORMATS.contains(&extension.as_str()) {
        return Err(ConfigError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension,
        });
    }

    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let parse_error = |message: String| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    };

    let topology = match extension.as_str() {
        "gexf" => gexf::parse(&text).map_err(|e| parse_error(e.to_string()))?,
        "json" => {
            let data: TopologyData =
                serde_json::from_str(&text).map_err(|e| parse_error(e.to_string()))?;
            Topology::from_data(data)?
        }
        _ => parse_edgelist(&text).map_err(parse_error)?,
    };
    debug!(
        "Loaded {} ({} nodes, {} edges)",
        path.display(),
        topology.len(),
        topology.edge_count()
    );
    Ok(topology)
}

/// Whitespace-separated `source target [weight]` lines. `#` starts a
/// comment. Nodes are ordered by first appearance.
pub fn parse_edgelist(text: &str) -> Result<Topology, String> {
    let mut topology = Topology::undirected();
    for (number, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or_default().trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        let weight = match fields.as_slice() {
            [_, _] => None,
            [_, _, w] => Some(
                w.parse::<f64>()
                    .map_err(|_| format!("line {}: bad weight {:?}", number + 1, w))?,
            ),
            _ => return Err(format!("line {}: expected `source target [weight]`", number + 1)),
        };
        topology.add_edge(NodeId::from(fields[0]), NodeId::from(fields[1]), weight);
    }
    Ok(topology)
}

/// Resolves `path` against `base_dir` the way [`load_network`] does.
pub fn resolve(path: &Path, base_dir: Option<&Path>) -> PathBuf {
    match base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}
