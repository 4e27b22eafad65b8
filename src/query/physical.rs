//! Physical operator tree produced by the planner.
//!
//! Nodes are immutable once built. Each constructor checks the operator's
//! contract against its inputs (kinds, data availability, ordering,
//! duplicates), derives the output properties and computes the cost, so an
//! existing node is always executable and its estimate never changes.

use std::collections::BTreeSet;

use crate::model::{Kind, Relation};
use crate::query::cost::{CostModel, QueryCost};
use crate::query::errors::PlanError;
use crate::query::filter::Filter;
use crate::query::join::JoinCondition;
use crate::query::sort::{Direction, SortOrder};
use crate::query::value::{index_fields, IndexKey};
use crate::storage::IdRange;
use crate::types::RecordId;

/// Physical operators.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicalOp {
    /// Reads records of a kind in id order.
    TableScan {
        /// Collection to scan.
        kind: Kind,
        /// Identifier range to read.
        range: IdRange,
        /// Predicates applied to each record read.
        filters: Vec<Filter>,
    },
    /// Reads records of a kind in secondary index order.
    IndexScan {
        /// Collection to scan.
        kind: Kind,
        /// Inclusive lower bound on the leading key components.
        lo: Option<IndexKey>,
        /// Inclusive upper bound on the leading key components.
        hi: Option<IndexKey>,
        /// Scan direction.
        direction: Direction,
        /// Predicates applied to each record read.
        filters: Vec<Filter>,
    },
    /// Emits a fixed, sorted set of identifiers without data.
    Manual {
        /// Collection the identifiers belong to.
        kind: Kind,
        /// Identifiers, ascending and unique.
        ids: Vec<RecordId>,
    },
    /// Resolves identifier-only rows to records.
    Lookup {
        /// Predicates applied to the resolved records.
        filters: Vec<Filter>,
    },
    /// Drops rows failing residual predicates.
    Filter {
        /// Predicates every emitted row satisfies.
        filters: Vec<Filter>,
    },
    /// Stable in-memory sort.
    Sort {
        /// Requested order.
        order: SortOrder,
    },
    /// Collapses rows with the same id, summing weights.
    Distinct,
    /// Stops after `count` rows; zero means unlimited.
    Limit {
        /// Maximum rows emitted.
        count: u32,
    },
    /// Intersects two id-sorted, duplicate-free inputs.
    MergeJoin,
    /// Keeps left rows whose id appears in the right input.
    HashJoin,
    /// Keeps games whose referenced entities pass the entity filters.
    GameFilterJoin {
        /// Reference followed from each game.
        relation: Relation,
        /// Which references must match.
        condition: JoinCondition,
        /// Predicates on the referenced entity.
        filters: Vec<Filter>,
    },
    /// Keeps games whose referenced entities appear in the right input.
    GameHashJoin {
        /// Reference followed from each game.
        relation: Relation,
        /// Which references must match.
        condition: JoinCondition,
    },
    /// Expands entities to the games that reference them.
    GameLoopJoin {
        /// Reference the game id lists are kept for.
        relation: Relation,
        /// Which references must match.
        condition: JoinCondition,
    },
    /// Maps games to the ids of the entities they reference.
    EntityProjection {
        /// Reference followed from each game.
        relation: Relation,
        /// Which references are emitted.
        condition: JoinCondition,
    },
}

impl PhysicalOp {
    /// Operator name used by explain output and plan hashing.
    pub fn name(&self) -> &'static str {
        match self {
            PhysicalOp::TableScan { .. } => "TableScan",
            PhysicalOp::IndexScan { .. } => "IndexScan",
            PhysicalOp::Manual { .. } => "Manual",
            PhysicalOp::Lookup { .. } => "Lookup",
            PhysicalOp::Filter { .. } => "Filter",
            PhysicalOp::Sort { .. } => "Sort",
            PhysicalOp::Distinct => "Distinct",
            PhysicalOp::Limit { .. } => "Limit",
            PhysicalOp::MergeJoin => "MergeJoin",
            PhysicalOp::HashJoin => "HashJoin",
            PhysicalOp::GameFilterJoin { .. } => "GameFilterJoin",
            PhysicalOp::GameHashJoin { .. } => "GameHashJoin",
            PhysicalOp::GameLoopJoin { .. } => "GameLoopJoin",
            PhysicalOp::EntityProjection { .. } => "EntityProjection",
        }
    }
}

/// Output properties of a node, fixed at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeProps {
    /// Kind of the emitted rows.
    pub kind: Kind,
    /// Whether every row carries its record.
    pub full_data: bool,
    /// Guaranteed output order.
    pub sort_order: SortOrder,
    /// Whether the same id may be emitted more than once.
    pub duplicates: bool,
    /// Whether the first rows arrive before the inputs are drained.
    pub pipelined: bool,
    /// Estimated cost of the whole subtree.
    pub cost: QueryCost,
}

/// Node within the physical plan tree.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicalNode {
    /// The physical operator at this node.
    pub op: PhysicalOp,
    /// Child nodes that provide input to this operator.
    pub inputs: Vec<PhysicalNode>,
    props: NodeProps,
}

impl PhysicalNode {
    /// Scans `range` of `kind` in id order.
    pub fn table_scan(
        model: &CostModel,
        kind: Kind,
        range: IdRange,
        filters: Vec<Filter>,
    ) -> Result<Self, PlanError> {
        validate_filters(&filters, kind)?;
        let cost = model.table_scan(kind, range, &filters);
        Ok(Self::leaf(
            PhysicalOp::TableScan {
                kind,
                range,
                filters,
            },
            NodeProps {
                kind,
                full_data: true,
                sort_order: SortOrder::by_id(),
                duplicates: false,
                pipelined: true,
                cost,
            },
        ))
    }

    /// Scans `kind`'s secondary index between the partial keys `lo` and
    /// `hi`.
    pub fn index_scan(
        model: &CostModel,
        kind: Kind,
        lo: Option<IndexKey>,
        hi: Option<IndexKey>,
        direction: Direction,
        filters: Vec<Filter>,
    ) -> Result<Self, PlanError> {
        if index_fields(kind).is_empty() {
            return Err(PlanError::NoSecondaryIndex { kind });
        }
        validate_filters(&filters, kind)?;
        let cost = model.index_scan(kind, lo.as_ref(), hi.as_ref(), &filters);
        Ok(Self::leaf(
            PhysicalOp::IndexScan {
                kind,
                lo,
                hi,
                direction,
                filters,
            },
            NodeProps {
                kind,
                full_data: true,
                sort_order: SortOrder::index_order(kind, direction),
                duplicates: false,
                pipelined: true,
                cost,
            },
        ))
    }

    /// Emits `ids` in ascending order without touching storage.
    pub fn manual(model: &CostModel, kind: Kind, ids: impl IntoIterator<Item = RecordId>) -> Self {
        let ids: Vec<RecordId> = ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
        let cost = model.manual(ids.len());
        Self::leaf(
            PhysicalOp::Manual { kind, ids },
            NodeProps {
                kind,
                full_data: false,
                sort_order: SortOrder::by_id(),
                duplicates: false,
                pipelined: true,
                cost,
            },
        )
    }

    /// Resolves the records of an identifier-only `input`.
    pub fn lookup(model: &CostModel, input: Self, filters: Vec<Filter>) -> Result<Self, PlanError> {
        if input.props.full_data {
            return Err(PlanError::SourceHasFullData { context: "lookup" });
        }
        let kind = input.props.kind;
        validate_filters(&filters, kind)?;
        let cost = model.lookup(&input.props.cost, kind, &filters);
        let props = NodeProps {
            full_data: true,
            cost,
            ..input.props.clone()
        };
        Ok(Self::unary(PhysicalOp::Lookup { filters }, input, props))
    }

    /// Applies residual predicates to `input`.
    pub fn filter(model: &CostModel, input: Self, filters: Vec<Filter>) -> Result<Self, PlanError> {
        let kind = input.props.kind;
        validate_filters(&filters, kind)?;
        if !input.props.full_data && filters.iter().any(Filter::needs_data) {
            return Err(PlanError::MissingFullData { context: "filter" });
        }
        let cost = model.filter(&input.props.cost, kind, &filters);
        let props = NodeProps {
            cost,
            ..input.props.clone()
        };
        Ok(Self::unary(PhysicalOp::Filter { filters }, input, props))
    }

    /// Sorts `input` by `order`.
    pub fn sort(model: &CostModel, input: Self, order: SortOrder) -> Result<Self, PlanError> {
        if order.is_none() {
            return Err(PlanError::EmptyQuery("sort order"));
        }
        let kind = input.props.kind;
        validate_order(&order, kind)?;
        if order.needs_data() && !input.props.full_data {
            return Err(PlanError::MissingFullData { context: "sort" });
        }
        let cost = model.sort(&input.props.cost);
        let props = NodeProps {
            sort_order: order.clone(),
            pipelined: false,
            cost,
            ..input.props.clone()
        };
        Ok(Self::unary(PhysicalOp::Sort { order }, input, props))
    }

    /// Collapses rows sharing an id.
    pub fn distinct(model: &CostModel, input: Self) -> Self {
        let cost = model.distinct(&input.props.cost);
        let props = NodeProps {
            duplicates: false,
            pipelined: false,
            cost,
            ..input.props.clone()
        };
        Self::unary(PhysicalOp::Distinct, input, props)
    }

    /// Emits at most `count` rows of `input`; zero means unlimited.
    pub fn limit(model: &CostModel, input: Self, count: u32) -> Self {
        let cost = model.limit(&input.props.cost, count, input.props.pipelined);
        let props = NodeProps {
            cost,
            ..input.props.clone()
        };
        Self::unary(PhysicalOp::Limit { count }, input, props)
    }

    /// Intersects two id-sorted, duplicate-free inputs.
    pub fn merge_join(model: &CostModel, left: Self, right: Self) -> Result<Self, PlanError> {
        let kind = same_kind(&left, &right, "merge join")?;
        for side in [&left, &right] {
            if !side.props.sort_order.is_by_id() {
                return Err(PlanError::SourceNotSorted {
                    context: "merge join",
                    order: side.props.sort_order.to_string(),
                });
            }
            if side.props.duplicates {
                return Err(PlanError::SourceHasDuplicates {
                    context: "merge join",
                });
            }
        }
        let cost = model.join(kind, &left.props.cost, &right.props.cost);
        let props = NodeProps {
            kind,
            full_data: left.props.full_data || right.props.full_data,
            sort_order: SortOrder::by_id(),
            duplicates: false,
            pipelined: left.props.pipelined && right.props.pipelined,
            cost,
        };
        Ok(Self::binary(PhysicalOp::MergeJoin, left, right, props))
    }

    /// Filters `left` by the ids of `right`, keeping left order and data.
    pub fn hash_join(model: &CostModel, left: Self, right: Self) -> Result<Self, PlanError> {
        let kind = same_kind(&left, &right, "hash join")?;
        let cost = model.join(kind, &left.props.cost, &right.props.cost);
        let props = NodeProps {
            pipelined: false,
            cost,
            ..left.props.clone()
        };
        Ok(Self::binary(PhysicalOp::HashJoin, left, right, props))
    }

    /// Keeps full-data games whose `relation` entities pass `filters`.
    pub fn game_filter_join(
        model: &CostModel,
        games: Self,
        relation: Relation,
        condition: JoinCondition,
        filters: Vec<Filter>,
    ) -> Result<Self, PlanError> {
        expect_games(&games, "game filter join")?;
        condition.validate(relation)?;
        validate_filters(&filters, relation.entity_kind())?;
        let cost = model.game_filter_join(&games.props.cost, relation, condition, &filters);
        let props = NodeProps {
            cost,
            ..games.props.clone()
        };
        Ok(Self::unary(
            PhysicalOp::GameFilterJoin {
                relation,
                condition,
                filters,
            },
            games,
            props,
        ))
    }

    /// Keeps full-data games whose `relation` entities appear in
    /// `entities`.
    pub fn game_hash_join(
        model: &CostModel,
        games: Self,
        entities: Self,
        relation: Relation,
        condition: JoinCondition,
    ) -> Result<Self, PlanError> {
        expect_games(&games, "game hash join")?;
        condition.validate(relation)?;
        expect_entities(&entities, relation)?;
        let cost = model.game_hash_join(&games.props.cost, &entities.props.cost, relation, condition);
        let props = NodeProps {
            pipelined: false,
            cost,
            ..games.props.clone()
        };
        Ok(Self::binary(
            PhysicalOp::GameHashJoin {
                relation,
                condition,
            },
            games,
            entities,
            props,
        ))
    }

    /// Expands `entities` to the games referencing them through `relation`.
    ///
    /// The entity input is drained into a map first; a game reachable from
    /// several matching entities is emitted only from the first of them in
    /// input order, so the output is duplicate-free.
    pub fn game_loop_join(
        model: &CostModel,
        entities: Self,
        relation: Relation,
        condition: JoinCondition,
    ) -> Result<Self, PlanError> {
        condition.validate(relation)?;
        expect_entities(&entities, relation)?;
        let cost = model.game_loop_join(&entities.props.cost, relation);
        let props = NodeProps {
            kind: Kind::Game,
            full_data: true,
            sort_order: SortOrder::none(),
            duplicates: false,
            pipelined: false,
            cost,
        };
        Ok(Self::unary(
            PhysicalOp::GameLoopJoin {
                relation,
                condition,
            },
            entities,
            props,
        ))
    }

    /// Projects full-data games onto the entity ids `condition` selects.
    pub fn entity_projection(
        model: &CostModel,
        games: Self,
        relation: Relation,
        condition: JoinCondition,
    ) -> Result<Self, PlanError> {
        expect_games(&games, "entity projection")?;
        condition.validate(relation)?;
        let cost = model.entity_projection(&games.props.cost, relation, condition);
        let props = NodeProps {
            kind: relation.entity_kind(),
            full_data: false,
            sort_order: SortOrder::none(),
            duplicates: true,
            pipelined: games.props.pipelined,
            cost,
        };
        Ok(Self::unary(
            PhysicalOp::EntityProjection {
                relation,
                condition,
            },
            games,
            props,
        ))
    }

    fn leaf(op: PhysicalOp, props: NodeProps) -> Self {
        Self {
            op,
            inputs: Vec::new(),
            props,
        }
    }

    fn unary(op: PhysicalOp, input: Self, props: NodeProps) -> Self {
        Self {
            op,
            inputs: vec![input],
            props,
        }
    }

    fn binary(op: PhysicalOp, left: Self, right: Self, props: NodeProps) -> Self {
        Self {
            op,
            inputs: vec![left, right],
            props,
        }
    }

    /// Input operators, left to right.
    pub fn sources(&self) -> &[PhysicalNode] {
        &self.inputs
    }

    /// Output properties fixed at construction.
    pub fn props(&self) -> &NodeProps {
        &self.props
    }

    /// Collection of the emitted rows.
    pub fn kind(&self) -> Kind {
        self.props.kind
    }

    /// Whether rows carry their materialized record.
    pub fn has_full_data(&self) -> bool {
        self.props.full_data
    }

    /// Order the rows are emitted in.
    pub fn sort_order(&self) -> &SortOrder {
        &self.props.sort_order
    }

    /// Whether an id may be emitted more than once.
    pub fn may_contain_duplicates(&self) -> bool {
        self.props.duplicates
    }

    /// Whether the first row is produced without draining an input.
    pub fn is_pipelined(&self) -> bool {
        self.props.pipelined
    }

    /// Estimated cost of this subtree, computed at construction.
    pub fn estimate_cost(&self) -> QueryCost {
        self.props.cost
    }

    /// Number of nodes in the subtree.
    pub fn node_count(&self) -> usize {
        1 + self.inputs.iter().map(PhysicalNode::node_count).sum::<usize>()
    }
}

fn validate_filters(filters: &[Filter], kind: Kind) -> Result<(), PlanError> {
    filters.iter().try_for_each(|filter| filter.validate(kind))
}

pub(crate) fn validate_order(order: &SortOrder, kind: Kind) -> Result<(), PlanError> {
    for key in order.keys() {
        if !key.field.applies_to(kind) {
            return Err(PlanError::FieldNotInKind {
                field: key.field,
                kind,
            });
        }
    }
    Ok(())
}

fn same_kind(left: &PhysicalNode, right: &PhysicalNode, context: &'static str) -> Result<Kind, PlanError> {
    if left.props.kind != right.props.kind {
        return Err(PlanError::kind_mismatch(left.props.kind, right.props.kind, context));
    }
    Ok(left.props.kind)
}

fn expect_games(games: &PhysicalNode, context: &'static str) -> Result<(), PlanError> {
    if games.props.kind != Kind::Game {
        return Err(PlanError::kind_mismatch(Kind::Game, games.props.kind, context));
    }
    if !games.props.full_data {
        return Err(PlanError::MissingFullData { context });
    }
    Ok(())
}

fn expect_entities(entities: &PhysicalNode, relation: Relation) -> Result<(), PlanError> {
    if entities.props.kind != relation.entity_kind() {
        return Err(PlanError::RelationMismatch {
            relation,
            outer: Kind::Game,
            inner: entities.props.kind,
        });
    }
    Ok(())
}
