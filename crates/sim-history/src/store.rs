//! History Store
//!
//! Append-only record of attribute changes keyed by (entity, tick, attribute).
//!
//! Nothing distinguishes a "current value" from history: the value of an
//! attribute at tick `t` is the entry with the greatest recorded tick `<= t`.
//! An entry, once written for a triple, is never replaced; a later change is a
//! new entry at a later tick.

use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::{Entity, Value};

type Series = BTreeMap<u64, Value>;

/// Errors raised when appending to the store.
#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("history entry for {entity} at tick {tick} ({attribute}) already holds a different value")]
    Overwrite {
        entity: Entity,
        tick: u64,
        attribute: String,
    },
    #[error("attribute name must not be empty")]
    EmptyAttribute,
}

/// Errors raised for malformed queries. A well-formed query that matches
/// nothing is not an error.
#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("attribute name must not be empty")]
    EmptyAttribute,
}

/// One position of a [`Query`]: either fixed or a wildcard.
#[derive(Debug, Clone, PartialEq)]
pub enum Key<T> {
    Any,
    Exact(T),
}

impl<T> Key<T> {
    fn matches(&self, other: &T) -> bool
    where
        T: PartialEq,
    {
        match self {
            Key::Any => true,
            Key::Exact(v) => v == other,
        }
    }
}

impl From<Entity> for Key<Entity> {
    fn from(entity: Entity) -> Self {
        Key::Exact(entity)
    }
}

impl From<Option<Entity>> for Key<Entity> {
    fn from(entity: Option<Entity>) -> Self {
        entity.map_or(Key::Any, Key::Exact)
    }
}

impl From<u64> for Key<u64> {
    fn from(tick: u64) -> Self {
        Key::Exact(tick)
    }
}

impl From<Option<u64>> for Key<u64> {
    fn from(tick: Option<u64>) -> Self {
        tick.map_or(Key::Any, Key::Exact)
    }
}

impl From<&str> for Key<String> {
    fn from(attribute: &str) -> Self {
        Key::Exact(attribute.to_string())
    }
}

impl From<String> for Key<String> {
    fn from(attribute: String) -> Self {
        Key::Exact(attribute)
    }
}

impl From<Option<&str>> for Key<String> {
    fn from(attribute: Option<&str>) -> Self {
        attribute.map_or(Key::Any, |a| Key::Exact(a.to_string()))
    }
}

/// A (entity, tick, attribute) query where any position may be a wildcard.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub entity: Key<Entity>,
    pub tick: Key<u64>,
    pub attribute: Key<String>,
}

impl Query {
    pub fn new(
        entity: impl Into<Key<Entity>>,
        tick: impl Into<Key<u64>>,
        attribute: impl Into<Key<String>>,
    ) -> Self {
        Self {
            entity: entity.into(),
            tick: tick.into(),
            attribute: attribute.into(),
        }
    }

    /// Every recorded entry.
    pub fn all() -> Self {
        Self {
            entity: Key::Any,
            tick: Key::Any,
            attribute: Key::Any,
        }
    }
}

/// Result shape depends on which positions of the query were wildcards.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Fully specified: the value in force at that tick, if any
    Value(Option<Value>),
    /// Wildcard tick: evolution of one attribute, ordered by tick
    Series(Vec<(u64, Value)>),
    /// Wildcard attribute at a fixed tick: every attribute in force
    Attributes(BTreeMap<String, Value>),
    /// Wildcard attribute and tick: recorded entries grouped by tick
    Ticks(BTreeMap<u64, BTreeMap<String, Value>>),
    /// Wildcard entity: matching rows
    Rows(Vec<HistoryRow>),
}

impl QueryResult {
    /// Unwraps a point result. Other shapes yield `None`.
    pub fn into_value(self) -> Option<Value> {
        match self {
            QueryResult::Value(v) => v,
            _ => None,
        }
    }

    /// Number of entries in the result (0 or 1 for a point result).
    pub fn len(&self) -> usize {
        match self {
            QueryResult::Value(v) => usize::from(v.is_some()),
            QueryResult::Series(s) => s.len(),
            QueryResult::Attributes(a) => a.len(),
            QueryResult::Ticks(t) => t.len(),
            QueryResult::Rows(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Flattened history entry: `(entity, tick, attribute, value, value_type)`.
///
/// Serializes as a 5-tuple with the value rendered as text, so rows can be
/// written to line-oriented files and reloaded with their types.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRow {
    pub entity: Entity,
    pub tick: u64,
    pub attribute: String,
    pub value: Value,
}

impl HistoryRow {
    pub fn new(entity: Entity, tick: u64, attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            entity,
            tick,
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn value_type(&self) -> &'static str {
        self.value.type_tag()
    }

    /// Plain-text tuple form.
    pub fn to_tuple(&self) -> (String, u64, String, String, &'static str) {
        (
            self.entity.to_string(),
            self.tick,
            self.attribute.clone(),
            self.value.to_text(),
            self.value_type(),
        )
    }
}

impl Serialize for HistoryRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(5)?;
        tuple.serialize_element(&self.entity)?;
        tuple.serialize_element(&self.tick)?;
        tuple.serialize_element(&self.attribute)?;
        tuple.serialize_element(&self.value.to_text())?;
        tuple.serialize_element(self.value_type())?;
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for HistoryRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RowVisitor;

        impl<'de> Visitor<'de> for RowVisitor {
            type Value = HistoryRow;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a [entity, tick, attribute, value, value_type] tuple")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<HistoryRow, A::Error> {
                let entity: Entity = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let tick: u64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let attribute: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let text: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                let tag: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(4, &self))?;
                let value = Value::from_text(&tag, &text).map_err(de::Error::custom)?;
                Ok(HistoryRow {
                    entity,
                    tick,
                    attribute,
                    value,
                })
            }
        }

        deserializer.deserialize_tuple(5, RowVisitor)
    }
}

/// Append-only, multi-key history of attribute values.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: BTreeMap<Entity, BTreeMap<String, Series>>,
    len: usize,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from flattened rows (e.g. a reloaded log).
    pub fn from_rows(rows: impl IntoIterator<Item = HistoryRow>) -> Result<Self, HistoryError> {
        let mut history = Self::new();
        for row in rows {
            history.record(row.entity, row.tick, row.attribute, row.value)?;
        }
        Ok(history)
    }

    /// Total number of recorded entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Appends an entry.
    ///
    /// Writes for past ticks are accepted. Re-recording an identical value for
    /// an existing triple is a no-op; a different value fails.
    pub fn record(
        &mut self,
        entity: Entity,
        tick: u64,
        attribute: impl Into<String>,
        value: Value,
    ) -> Result<(), HistoryError> {
        let attribute = attribute.into();
        if attribute.is_empty() {
            return Err(HistoryError::EmptyAttribute);
        }
        let series = self
            .entries
            .entry(entity.clone())
            .or_default()
            .entry(attribute.clone())
            .or_default();
        match series.get(&tick) {
            Some(existing) if existing.same(&value) => Ok(()),
            Some(_) => Err(HistoryError::Overwrite {
                entity,
                tick,
                attribute,
            }),
            None => {
                series.insert(tick, value);
                self.len += 1;
                Ok(())
            }
        }
    }

    /// Value of `attribute` in force at `tick`.
    pub fn get(&self, entity: &Entity, tick: u64, attribute: &str) -> Option<&Value> {
        self.series_map(entity, attribute)?
            .range(..=tick)
            .next_back()
            .map(|(_, v)| v)
    }

    /// Entry recorded at exactly `tick`, without carrying earlier values forward.
    pub fn recorded(&self, entity: &Entity, tick: u64, attribute: &str) -> Option<&Value> {
        self.series_map(entity, attribute)?.get(&tick)
    }

    /// Most recent entry for an attribute.
    pub fn latest(&self, entity: &Entity, attribute: &str) -> Option<(u64, &Value)> {
        self.series_map(entity, attribute)?
            .iter()
            .next_back()
            .map(|(t, v)| (*t, v))
    }

    /// Every recorded change of an attribute, ordered by tick.
    pub fn series(&self, entity: &Entity, attribute: &str) -> Vec<(u64, &Value)> {
        self.series_map(entity, attribute)
            .map(|s| s.iter().map(|(t, v)| (*t, v)).collect())
            .unwrap_or_default()
    }

    /// Every attribute of an entity in force at `tick`.
    pub fn attributes_at(&self, entity: &Entity, tick: u64) -> BTreeMap<&str, &Value> {
        let mut attributes = BTreeMap::new();
        if let Some(attrs) = self.entries.get(entity) {
            for (name, series) in attrs {
                if let Some((_, v)) = series.range(..=tick).next_back() {
                    attributes.insert(name.as_str(), v);
                }
            }
        }
        attributes
    }

    /// Recorded entries of an entity grouped by tick.
    pub fn entity_ticks(&self, entity: &Entity) -> BTreeMap<u64, BTreeMap<&str, &Value>> {
        let mut ticks: BTreeMap<u64, BTreeMap<&str, &Value>> = BTreeMap::new();
        if let Some(attrs) = self.entries.get(entity) {
            for (name, series) in attrs {
                for (tick, v) in series {
                    ticks.entry(*tick).or_default().insert(name.as_str(), v);
                }
            }
        }
        ticks
    }

    /// Entities with at least one entry.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.entries.keys()
    }

    /// Answers a query with any mix of wildcards.
    pub fn query(&self, query: &Query) -> Result<QueryResult, QueryError> {
        if let Key::Exact(attribute) = &query.attribute {
            if attribute.is_empty() {
                return Err(QueryError::EmptyAttribute);
            }
        }

        let entity = match &query.entity {
            Key::Any => {
                let rows = self
                    .to_tuples()
                    .filter(|row| query.tick.matches(&row.tick))
                    .filter(|row| query.attribute.matches(&row.attribute))
                    .collect();
                return Ok(QueryResult::Rows(rows));
            }
            Key::Exact(entity) => entity,
        };

        let result = match (&query.tick, &query.attribute) {
            (Key::Exact(tick), Key::Exact(attribute)) => {
                QueryResult::Value(self.get(entity, *tick, attribute).cloned())
            }
            (Key::Any, Key::Exact(attribute)) => QueryResult::Series(
                self.series(entity, attribute)
                    .into_iter()
                    .map(|(t, v)| (t, v.clone()))
                    .collect(),
            ),
            (Key::Exact(tick), Key::Any) => QueryResult::Attributes(
                self.attributes_at(entity, *tick)
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            ),
            (Key::Any, Key::Any) => QueryResult::Ticks(
                self.entity_ticks(entity)
                    .into_iter()
                    .map(|(t, attrs)| {
                        let attrs = attrs
                            .into_iter()
                            .map(|(k, v)| (k.to_string(), v.clone()))
                            .collect();
                        (t, attrs)
                    })
                    .collect(),
            ),
        };
        Ok(result)
    }

    /// Lazily flattens the store into rows, ordered by entity, attribute and
    /// tick. Call again to restart.
    pub fn to_tuples(&self) -> impl Iterator<Item = HistoryRow> + '_ {
        self.entries.iter().flat_map(|(entity, attrs)| {
            attrs.iter().flat_map(move |(attribute, series)| {
                series.iter().map(move |(tick, value)| HistoryRow {
                    entity: entity.clone(),
                    tick: *tick,
                    attribute: attribute.clone(),
                    value: value.clone(),
                })
            })
        })
    }

    fn series_map(&self, entity: &Entity, attribute: &str) -> Option<&Series> {
        self.entries.get(entity)?.get(attribute)
    }
}
