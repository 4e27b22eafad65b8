//! Query planning and execution engine for chess game archives.
//!
//! Queries are built with [`QueryBuilder`] over games or one of the entity
//! collections, planned by a cost-based [`Planner`] against sampled
//! statistics, and executed as lazy pull-based operator trees over a pinned
//! archive snapshot.

#![warn(missing_docs)]

pub mod config;
pub mod engine;
pub mod model;
pub mod query;
pub mod storage;
pub mod types;

pub use config::{ConfigError, EngineConfig};
pub use engine::{explain, QueryEngine, QuerySession};
pub use model::{GameResult, Kind, Record, Relation};
pub use query::{
    Direction, Field, Filter, JoinCondition, PhysicalNode, PlanError, Planner, PlannerOutput,
    Query, QueryBuilder, QueryData, SortKey, SortOrder,
};
pub use storage::{ArchiveSnapshot, IdRange, IdSpace, MemoryArchive, SnapshotSource};
pub use types::{GambitError, RecordId, Result};
