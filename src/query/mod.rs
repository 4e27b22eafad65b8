#![forbid(unsafe_code)]

//! Query planning and execution.
//!
//! This module provides the query descriptors, the physical operator algebra,
//! the cost model and statistics it is ranked with, the planner, and the
//! pull-based executor.

/// Query builder for programmatic query construction.
///
/// Provides a fluent API that validates each step and reports the first
/// error from `build()`.
pub mod builder;

/// Cost estimates and the formulas deriving them.
pub mod cost;

/// Errors raised while building queries and operator trees.
pub mod errors;

/// Query execution engine.
///
/// Executes physical plans and streams result rows back to clients.
pub mod executor;

/// Explain trees and plan fingerprints.
pub mod explain;

/// Row predicates, their source hints and selectivity estimates.
pub mod filter;

/// Join conditions over game references.
pub mod join;

/// Physical query plan representation.
///
/// Executable plan containing specific operators and their configurations.
pub mod physical;

/// Query plan generation and optimization.
///
/// Converts query descriptors to ranked physical plans.
pub mod planner;

/// Per-node execution counters.
pub mod profile;

/// Sort specifications.
pub mod sort;

/// Sampled statistics used for selectivity estimates.
pub mod stats;

/// Scalar values, record fields and index keys.
pub mod value;

pub use builder::{Join, Query, QueryBuilder};
pub use cost::{CostModel, CostWeights, QueryCost};
pub use errors::PlanError;
pub use executor::{QueryContext, QueryData, ResultStream};
pub use filter::Filter;
pub use join::JoinCondition;
pub use physical::{PhysicalNode, PhysicalOp};
pub use profile::ExecutionTrace;
pub use sort::{Direction, SortKey, SortOrder};
pub use value::{Field, Value};

/// Execution plan output with explanation capabilities.
pub use planner::{PlanExplain, Planner, PlannerConfig, PlannerOutput};
