//! Behavior Registry
//!
//! Maps agent type identifiers used in configuration to behavior factories.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::models::{AggregatedCounter, BaseAgent, BassModel, CounterModel};
use super::{Behavior, Params};
use crate::error::ConfigError;

/// Builds a behavior from the environment parameters.
pub type Factory = Arc<dyn Fn(&Params) -> Result<Box<dyn Behavior>, ConfigError> + Send + Sync>;

/// Name of the registry returned by [`BehaviorRegistry::builtin`].
pub const BUILTIN_MODULE: &str = "netsim.models";

#[derive(Clone)]
pub struct BehaviorRegistry {
    name: String,
    factories: BTreeMap<String, Factory>,
}

impl BehaviorRegistry {
    /// An empty registry. `name` is reported as the `load_module` of
    /// simulations built with it.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the bundled models.
    pub fn builtin() -> Self {
        let mut registry = Self::new(BUILTIN_MODULE);
        registry
            .register("BaseAgent", |_| Ok(Box::new(BaseAgent)))
            .register("CounterModel", |_| Ok(Box::new(CounterModel)))
            .register("AggregatedCounter", |_| Ok(Box::new(AggregatedCounter)))
            .register("BassModel", |params| Ok(Box::new(BassModel::from_params(params)?)));
        registry
    }

    /// Adds or replaces the factory for `kind`.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Params) -> Result<Box<dyn Behavior>, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> + '_ {
        self.factories.keys().map(String::as_str)
    }

    /// Instantiates `kind`. `field` names the configuration entry that asked
    /// for it and is reported if the type is unknown.
    pub fn create(&self, field: &str, kind: &str, params: &Params) -> Result<Box<dyn Behavior>, ConfigError> {
        let factory = self
            .factories
            .get(kind)
            .ok_or_else(|| ConfigError::UnknownAgentType {
                field: field.to_string(),
                agent_type: kind.to_string(),
            })?;
        factory(params)
    }
}

impl fmt::Debug for BehaviorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorRegistry")
            .field("name", &self.name)
            .field("kinds", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for BehaviorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
