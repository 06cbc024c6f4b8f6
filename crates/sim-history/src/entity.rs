//! Entity Identifiers
//!
//! Node identifiers and the history entity key (agent or environment).

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Text used for the environment entity in flattened history rows.
pub const ENV_SENTINEL: &str = "env";

/// Stable identifier of a topology node, and of the agent bound to it.
///
/// Integer identifiers are stored in their decimal form, so nodes produced by
/// a generator are `"0"`, `"1"`, ... Deserialization accepts both forms.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NodeIdVisitor;

        impl<'de> Visitor<'de> for NodeIdVisitor {
            type Value = NodeId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a string or integer node id")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<NodeId, E> {
                Ok(NodeId::from(v))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<NodeId, E> {
                Ok(NodeId(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<NodeId, E> {
                Ok(NodeId(v.to_string()))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<NodeId, E> {
                Ok(NodeId(v.to_string()))
            }
        }

        deserializer.deserialize_any(NodeIdVisitor)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<usize> for NodeId {
    fn from(index: usize) -> Self {
        Self(index.to_string())
    }
}

/// Owner of a history entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Entity {
    /// Environment-level attributes (parameters set on the environment itself)
    Environment,
    /// An agent, keyed by the node it is bound to
    Agent(NodeId),
}

impl Entity {
    pub fn agent(id: impl Into<NodeId>) -> Self {
        Entity::Agent(id.into())
    }

    /// Parses the flattened form. [`ENV_SENTINEL`] is reserved for the
    /// environment; anything else is an agent id.
    pub fn parse(text: &str) -> Self {
        if text == ENV_SENTINEL {
            Entity::Environment
        } else {
            Entity::Agent(NodeId::from(text))
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Environment => write!(f, "{}", ENV_SENTINEL),
            Entity::Agent(id) => write!(f, "{}", id),
        }
    }
}

impl From<NodeId> for Entity {
    fn from(id: NodeId) -> Self {
        Entity::Agent(id)
    }
}

impl Serialize for Entity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Entity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Entity::parse(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_index() {
        assert_eq!(NodeId::from(7usize), NodeId::from("7"));
        assert_eq!(NodeId::from("Torvalds").to_string(), "Torvalds");
    }

    #[test]
    fn test_entity_text_form() {
        assert_eq!(Entity::Environment.to_string(), "env");
        assert_eq!(Entity::parse("env"), Entity::Environment);
        assert_eq!(Entity::parse("balkian"), Entity::agent("balkian"));
        let json = serde_json::to_string(&Entity::agent("3")).unwrap();
        assert_eq!(json, r#""3""#);
    }

    #[test]
    fn test_node_id_accepts_integers() {
        let id: NodeId = serde_json::from_str("4").unwrap();
        assert_eq!(id, NodeId::from("4"));
        let id: NodeId = serde_json::from_str(r#""balkian""#).unwrap();
        assert_eq!(id.as_str(), "balkian");
    }

    #[test]
    fn test_environment_sorts_first() {
        let mut entities = vec![Entity::agent("0"), Entity::Environment];
        entities.sort();
        assert_eq!(entities[0], Entity::Environment);
    }
}
