//! Declarative query descriptors and the fluent builder producing them.

use crate::model::{Kind, Relation};
use crate::query::errors::PlanError;
use crate::query::filter::Filter;
use crate::query::join::JoinCondition;
use crate::query::physical::validate_order;
use crate::query::sort::SortOrder;
use crate::types::Result;

/// Query over one collection.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Collection the rows come from.
    pub kind: Kind,
    /// AND-ed predicates on the rows.
    pub filters: Vec<Filter>,
    /// Semi-joins to nested queries on the opposite side.
    pub joins: Vec<Join>,
    /// Requested output order; empty for no guarantee.
    pub sort: SortOrder,
    /// Maximum rows; 0 for unlimited.
    pub limit: u32,
    /// Whether rows must carry their records.
    pub full_data: bool,
}

/// Semi-join between games and one referenced entity kind.
#[derive(Clone, Debug, PartialEq)]
pub struct Join {
    /// Reference connecting the two sides.
    pub relation: Relation,
    /// Which references must match.
    pub condition: JoinCondition,
    /// Query on the opposite side.
    pub query: Query,
}

impl Query {
    /// Unfiltered, unordered query over `kind` returning full records.
    pub fn new(kind: Kind) -> Self {
        Self {
            kind,
            filters: Vec::new(),
            joins: Vec::new(),
            sort: SortOrder::none(),
            limit: 0,
            full_data: true,
        }
    }

    /// Depth of the deepest nested join; 0 without joins.
    pub fn depth(&self) -> usize {
        self.joins
            .iter()
            .map(|join| 1 + join.query.depth())
            .max()
            .unwrap_or(0)
    }

    /// Whether the query is nothing but predicates on its own rows.
    pub fn is_filter_only(&self) -> bool {
        self.joins.is_empty() && self.limit == 0
    }

    /// Checks the query and every nested query.
    pub fn validate(&self) -> std::result::Result<(), PlanError> {
        for filter in &self.filters {
            filter.validate(self.kind)?;
        }
        validate_order(&self.sort, self.kind)?;
        for join in &self.joins {
            validate_join(self.kind, join.relation, join.condition, join.query.kind)?;
            join.query.validate()?;
        }
        Ok(())
    }
}

fn validate_join(
    outer: Kind,
    relation: Relation,
    condition: JoinCondition,
    inner: Kind,
) -> std::result::Result<(), PlanError> {
    let connects = match outer {
        Kind::Game => inner == relation.entity_kind(),
        entity => inner == Kind::Game && relation.entity_kind() == entity,
    };
    if !connects {
        return Err(PlanError::RelationMismatch {
            relation,
            outer,
            inner,
        });
    }
    condition.validate(relation)
}

/// Fluent builder for [`Query`].
///
/// The first invalid step is remembered and reported by [`build`]; later
/// steps are ignored.
///
/// [`build`]: QueryBuilder::build
#[derive(Debug)]
pub struct QueryBuilder {
    query: Query,
    error: Option<PlanError>,
}

impl QueryBuilder {
    /// Starts a query over `kind`.
    pub fn new(kind: Kind) -> Self {
        Self {
            query: Query::new(kind),
            error: None,
        }
    }

    /// Query over games.
    pub fn games() -> Self {
        Self::new(Kind::Game)
    }

    /// Query over players.
    pub fn players() -> Self {
        Self::new(Kind::Player)
    }

    /// Query over tournaments.
    pub fn tournaments() -> Self {
        Self::new(Kind::Tournament)
    }

    /// Adds a predicate.
    pub fn filter(mut self, filter: Filter) -> Self {
        if self.error.is_some() {
            return self;
        }
        match filter.validate(self.query.kind) {
            Ok(()) => self.query.filters.push(filter),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Joins the query built by `nested`.
    pub fn join(self, relation: Relation, condition: JoinCondition, nested: QueryBuilder) -> Self {
        match nested.error {
            Some(err) if self.error.is_none() => Self {
                error: Some(err),
                ..self
            },
            _ => self.join_query(relation, condition, nested.query),
        }
    }

    /// Joins an already built query.
    pub fn join_query(mut self, relation: Relation, condition: JoinCondition, query: Query) -> Self {
        if self.error.is_some() {
            return self;
        }
        if let Err(err) = validate_join(self.query.kind, relation, condition, query.kind) {
            self.error = Some(err);
            return self;
        }
        self.query.joins.push(Join {
            relation,
            condition,
            query,
        });
        self
    }

    /// Requests an output order.
    pub fn sort_by(mut self, order: SortOrder) -> Self {
        if self.error.is_some() {
            return self;
        }
        match validate_order(&order, self.query.kind) {
            Ok(()) => self.query.sort = order,
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Caps the number of rows; 0 removes the cap.
    pub fn limit(mut self, limit: u32) -> Self {
        self.query.limit = limit;
        self
    }

    /// Returns identifiers and weights without records.
    pub fn ids_only(mut self) -> Self {
        self.query.full_data = false;
        self
    }

    /// Finishes the query, reporting the first invalid step.
    pub fn build(self) -> Result<Query> {
        if let Some(err) = self.error {
            return Err(err.into());
        }
        Ok(self.query)
    }
}
