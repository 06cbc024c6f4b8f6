//! Shared history types for the network simulation.
//!
//! This crate contains pure data structures with no simulation logic:
//! attribute values, entity identifiers, the append-only history store and
//! its JSONL persistence. It is a dependency for every other crate in the
//! workspace.

pub mod entity;
pub mod log;
pub mod store;
pub mod value;

pub use entity::{Entity, NodeId, ENV_SENTINEL};
pub use log::{read_history, HistoryLog, LogError};
pub use store::{History, HistoryError, HistoryRow, Key, Query, QueryError, QueryResult};
pub use value::{Value, ValueParseError};
