//! Cost-based planner.
//!
//! Planning enumerates row sources for a [`Query`] (one per seeding filter,
//! one per join, plus full-scan fallbacks), combines small subsets of them
//! with id joins, completes each combination with residual filters, game
//! joins, deduplication, sorting and the limit, and ranks every candidate
//! that could be built by estimated cost.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::Kind;
use crate::query::builder::{Join, Query};
use crate::query::cost::{CostModel, CostWeights};
use crate::query::errors::PlanError;
use crate::query::explain::{explain, plan_hash, ExplainNode};
use crate::query::filter::{Filter, SourceHint};
use crate::query::physical::PhysicalNode;
use crate::query::sort::{Direction, SortOrder};
use crate::query::value::index_fields;
use crate::storage::IdRange;
use crate::types::Result;

/// Planner inputs that influence candidate enumeration and ranking.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Largest number of sources intersected within one candidate.
    pub max_combination_sources: usize,
    /// Deepest join nesting accepted.
    pub max_nesting_depth: usize,
    /// Weights used to rank candidates.
    pub cost_weights: CostWeights,
    /// Whether to add candidates that keep an order-satisfying source in
    /// front instead of sorting.
    pub alternate_plans: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_combination_sources: 3,
            max_nesting_depth: 4,
            cost_weights: CostWeights::default(),
            alternate_plans: true,
        }
    }
}

/// Planner output containing the chosen physical plan and explain tree.
#[derive(Clone, Debug)]
pub struct PlannerOutput {
    /// The cheapest candidate.
    pub plan: PhysicalNode,
    /// Every candidate that could be built, cheapest first.
    pub candidates: Vec<PhysicalNode>,
    /// Human-readable explain tree of `plan`.
    pub explain: PlanExplain,
    /// Deterministic plan hash of `plan`.
    pub plan_hash: u64,
}

/// Human-readable explain tree.
#[derive(Clone, Debug)]
pub struct PlanExplain {
    /// Root node of the explain tree
    pub root: ExplainNode,
    /// Deterministic hash for the plan.
    pub plan_hash: u64,
}

/// Row source for the root query together with the predicates it covers.
#[derive(Clone, Debug)]
struct Source {
    node: PhysicalNode,
    filters: Vec<usize>,
    joins: Vec<usize>,
    scan: bool,
    standalone: bool,
}

impl Source {
    fn seed(node: PhysicalNode, filter: usize, scan: bool) -> Self {
        Self {
            node,
            filters: vec![filter],
            joins: Vec::new(),
            scan,
            standalone: false,
        }
    }

    fn join(node: PhysicalNode, join: usize) -> Self {
        Self {
            node,
            filters: Vec::new(),
            joins: vec![join],
            scan: false,
            standalone: false,
        }
    }

    fn fallback(node: PhysicalNode) -> Self {
        Self {
            node,
            filters: Vec::new(),
            joins: Vec::new(),
            scan: true,
            standalone: true,
        }
    }

    fn rows(&self) -> u64 {
        self.node.estimate_cost().estimated_rows
    }
}

/// Intersection of sources before completion.
struct Combination {
    root: std::result::Result<PhysicalNode, PlanError>,
    filters: Vec<usize>,
    joins: Vec<usize>,
}

/// Query planner that converts [`Query`] descriptors to physical plans.
#[derive(Clone, Debug, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    /// Creates a new planner with the given configuration.
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plans `query` against the sizes and statistics captured in `model`.
    pub fn plan(&self, model: &CostModel, query: &Query) -> Result<PlannerOutput> {
        query.validate()?;
        let depth = query.depth();
        if depth > self.config.max_nesting_depth {
            return Err(PlanError::NestingTooDeep {
                depth,
                max: self.config.max_nesting_depth,
            }
            .into());
        }
        let candidates = self.rank(model, query)?;
        let plan = candidates
            .first()
            .cloned()
            .ok_or(PlanError::NoValidPlan { kind: query.kind })?;
        let hash = plan_hash(&plan);
        debug!(
            target: "gambit::planner",
            kind = %query.kind,
            candidates = candidates.len(),
            cost = %plan.estimate_cost(),
            plan_hash = hash,
            "selected plan"
        );
        Ok(PlannerOutput {
            explain: PlanExplain {
                root: explain(&plan, None),
                plan_hash: hash,
            },
            plan,
            candidates,
            plan_hash: hash,
        })
    }

    /// Every buildable candidate for `query`, cheapest first.
    fn rank(&self, model: &CostModel, query: &Query) -> std::result::Result<Vec<PhysicalNode>, PlanError> {
        let nested = self.nested_plans(model, query);
        let sources = self.sources(model, query, &nested);
        let limit = self.config.max_combination_sources.max(1);

        let mut combinations = Vec::new();
        for members in subsets(sources.len(), limit) {
            if !admissible(query, &sources, &members) {
                continue;
            }
            let chosen: Vec<&Source> = members.iter().map(|&idx| &sources[idx]).collect();
            let filters: Vec<usize> = chosen.iter().flat_map(|s| s.filters.iter().copied()).collect();
            let joins: Vec<usize> = chosen.iter().flat_map(|s| s.joins.iter().copied()).collect();
            combinations.push(Combination {
                root: fold(model, &chosen),
                filters: filters.clone(),
                joins: joins.clone(),
            });
            if !self.config.alternate_plans || query.sort.is_none() || chosen.len() < 2 {
                continue;
            }
            for (idx, lead) in chosen.iter().enumerate() {
                if !lead.node.sort_order().is_stronger_or_equal(&query.sort) {
                    continue;
                }
                let rest: Vec<&Source> = chosen
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != idx)
                    .map(|(_, source)| *source)
                    .collect();
                combinations.push(Combination {
                    root: fold_from(model, lead, &rest),
                    filters: filters.clone(),
                    joins: joins.clone(),
                });
            }
        }

        let mut seen = FxHashSet::default();
        let mut candidates = Vec::new();
        for combination in combinations {
            for candidate in self.complete(model, query, combination, &nested) {
                match candidate {
                    Ok(plan) => {
                        if seen.insert(plan_hash(&plan)) {
                            candidates.push(plan);
                        }
                    }
                    Err(err) => debug!(
                        target: "gambit::planner",
                        kind = %query.kind,
                        code = err.code(),
                        error = %err,
                        "dropping candidate"
                    ),
                }
            }
        }
        if candidates.is_empty() {
            return Err(PlanError::NoValidPlan { kind: query.kind });
        }
        let weights = self.config.cost_weights;
        candidates.sort_by(|a, b| a.estimate_cost().compare(&b.estimate_cost(), &weights));
        Ok(candidates)
    }

    /// Best plan for each join's nested query.
    ///
    /// Entity queries need full-data games to project; games only need the
    /// entity ids, resolved so that missing entities drop out.
    fn nested_plans(
        &self,
        model: &CostModel,
        query: &Query,
    ) -> Vec<std::result::Result<PhysicalNode, PlanError>> {
        query
            .joins
            .iter()
            .map(|join| {
                let mut nested = join.query.clone();
                nested.full_data = query.kind != Kind::Game;
                let best = self
                    .rank(model, &nested)
                    .and_then(|mut candidates| resolved(model, candidates.swap_remove(0)));
                if let Err(err) = &best {
                    debug!(
                        target: "gambit::planner",
                        relation = join.relation.name(),
                        error = %err,
                        "nested query has no plan"
                    );
                }
                best
            })
            .collect()
    }

    fn sources(
        &self,
        model: &CostModel,
        query: &Query,
        nested: &[std::result::Result<PhysicalNode, PlanError>],
    ) -> Vec<Source> {
        let kind = query.kind;
        let mut sources = Vec::new();
        let mut keep = |source: std::result::Result<Source, PlanError>| match source {
            Ok(source) => sources.push(source),
            Err(err) => debug!(
                target: "gambit::planner",
                kind = %kind,
                error = %err,
                "skipping source"
            ),
        };

        for (idx, filter) in query.filters.iter().enumerate() {
            let hint = match filter.hint(kind) {
                Ok(Some(hint)) => hint,
                Ok(None) => continue,
                Err(err) => {
                    keep(Err(err));
                    continue;
                }
            };
            match hint {
                SourceHint::Ids(ids) => {
                    keep(Ok(Source::seed(PhysicalNode::manual(model, kind, ids), idx, false)));
                }
                SourceHint::IdRange(range) => {
                    keep(
                        PhysicalNode::table_scan(model, kind, range, Vec::new())
                            .map(|node| Source::seed(node, idx, true)),
                    );
                }
                SourceHint::KeyRange { lo, hi, exact } => {
                    let recheck = if exact { Vec::new() } else { vec![filter.clone()] };
                    for direction in key_range_directions(query) {
                        keep(
                            PhysicalNode::index_scan(model, kind, lo.clone(), hi.clone(), direction, recheck.clone())
                                .map(|node| Source::seed(node, idx, true)),
                        );
                    }
                }
            }
        }

        for (idx, (join, inner)) in query.joins.iter().zip(nested).enumerate() {
            let Ok(inner) = inner else {
                continue;
            };
            let node = if kind == Kind::Game {
                games_of_entities(model, inner.clone(), join)
            } else {
                entities_of_games(model, inner.clone(), join)
            };
            keep(node.map(|node| Source::join(node, idx)));
        }

        keep(PhysicalNode::table_scan(model, kind, IdRange::all(), Vec::new()).map(Source::fallback));
        if let Some(direction) = index_direction_for(query) {
            keep(
                PhysicalNode::index_scan(model, kind, None, None, direction, Vec::new())
                    .map(Source::fallback),
            );
        }
        sources
    }

    /// Turns one combination into finished candidates: residual filters,
    /// the remaining game joins (each as a filter join and as a hash join),
    /// then deduplication, sorting and the limit.
    fn complete(
        &self,
        model: &CostModel,
        query: &Query,
        combination: Combination,
        nested: &[std::result::Result<PhysicalNode, PlanError>],
    ) -> Vec<std::result::Result<PhysicalNode, PlanError>> {
        let Combination {
            root,
            filters,
            joins,
        } = combination;
        let root = root.and_then(|root| enrich(model, query, root, &filters, &joins));
        let mut partial = vec![root];
        if query.kind == Kind::Game {
            for (idx, join) in query.joins.iter().enumerate() {
                if joins.contains(&idx) {
                    continue;
                }
                partial = partial
                    .into_iter()
                    .flat_map(|node| match node {
                        Ok(node) => apply_game_join(model, node, join, &nested[idx]),
                        Err(err) => vec![Err(err)],
                    })
                    .collect();
            }
        }
        partial
            .into_iter()
            .map(|node| node.and_then(|node| finish(model, query, node)))
            .collect()
    }
}

/// Nested game plan projected onto the entities it references, unique,
/// sorted by id and resolved.
fn entities_of_games(
    model: &CostModel,
    games: PhysicalNode,
    join: &Join,
) -> std::result::Result<PhysicalNode, PlanError> {
    let projected = PhysicalNode::entity_projection(model, games, join.relation, join.condition)?;
    let unique = PhysicalNode::distinct(model, projected);
    let sorted = PhysicalNode::sort(model, unique, SortOrder::by_id())?;
    resolved(model, sorted)
}

/// Resolves the records behind an identifier-only join input so that ids
/// without a record drop out; a dangling reference never matches.
fn resolved(model: &CostModel, node: PhysicalNode) -> std::result::Result<PhysicalNode, PlanError> {
    if node.has_full_data() {
        Ok(node)
    } else {
        PhysicalNode::lookup(model, node, Vec::new())
    }
}

/// Nested entity plan expanded to the games referencing it, unique and
/// sorted by id.
fn games_of_entities(
    model: &CostModel,
    entities: PhysicalNode,
    join: &Join,
) -> std::result::Result<PhysicalNode, PlanError> {
    let mut games = PhysicalNode::game_loop_join(model, entities, join.relation, join.condition)?;
    if games.may_contain_duplicates() {
        games = PhysicalNode::distinct(model, games);
    }
    PhysicalNode::sort(model, games, SortOrder::by_id())
}

fn admissible(query: &Query, sources: &[Source], members: &[usize]) -> bool {
    let chosen = || members.iter().map(|&idx| &sources[idx]);
    if members.len() > 1 && chosen().any(|source| source.standalone) {
        return false;
    }
    if chosen().filter(|source| source.scan).count() > 1 {
        return false;
    }
    let mut filters = FxHashSet::default();
    let mut joins = FxHashSet::default();
    for source in chosen() {
        if !source.filters.iter().all(|idx| filters.insert(*idx)) {
            return false;
        }
        if !source.joins.iter().all(|idx| joins.insert(*idx)) {
            return false;
        }
    }
    query.kind == Kind::Game || joins.len() == query.joins.len()
}

/// Intersects `members` smallest first, merging where both sides allow it.
/// Hash joins build their table from the smaller, accumulated side.
fn fold(model: &CostModel, members: &[&Source]) -> std::result::Result<PhysicalNode, PlanError> {
    let mut ordered = members.to_vec();
    ordered.sort_by_key(|source| source.rows());
    let (first, rest) = ordered
        .split_first()
        .ok_or(PlanError::EmptyInput("source combination"))?;
    rest.iter().try_fold(first.node.clone(), |acc, next| {
        if mergeable(&acc) && mergeable(&next.node) {
            PhysicalNode::merge_join(model, acc, next.node.clone())
        } else {
            PhysicalNode::hash_join(model, next.node.clone(), acc)
        }
    })
}

/// Intersects `rest` into `lead` with hash joins, keeping `lead`'s order.
fn fold_from(
    model: &CostModel,
    lead: &Source,
    rest: &[&Source],
) -> std::result::Result<PhysicalNode, PlanError> {
    let mut ordered = rest.to_vec();
    ordered.sort_by_key(|source| source.rows());
    ordered.iter().try_fold(lead.node.clone(), |acc, next| {
        PhysicalNode::hash_join(model, acc, next.node.clone())
    })
}

fn mergeable(node: &PhysicalNode) -> bool {
    node.sort_order().is_by_id() && !node.may_contain_duplicates()
}

/// Applies the filters no source covered and resolves records when they are
/// requested or needed downstream.
fn enrich(
    model: &CostModel,
    query: &Query,
    root: PhysicalNode,
    covered_filters: &[usize],
    covered_joins: &[usize],
) -> std::result::Result<PhysicalNode, PlanError> {
    let residual: Vec<Filter> = query
        .filters
        .iter()
        .enumerate()
        .filter(|(idx, _)| !covered_filters.contains(idx))
        .map(|(_, filter)| filter.clone())
        .collect();
    let joins_pending = query.kind == Kind::Game && covered_joins.len() < query.joins.len();
    let needs_data = query.full_data
        || query.sort.needs_data()
        || joins_pending
        || residual.iter().any(Filter::needs_data);
    if !root.has_full_data() && needs_data {
        return PhysicalNode::lookup(model, root, residual);
    }
    if residual.is_empty() {
        Ok(root)
    } else {
        PhysicalNode::filter(model, root, residual)
    }
}

/// Both ways of applying `join` to full-data games; a filter join is only
/// possible when the nested query is nothing but entity predicates.
fn apply_game_join(
    model: &CostModel,
    games: PhysicalNode,
    join: &Join,
    nested: &std::result::Result<PhysicalNode, PlanError>,
) -> Vec<std::result::Result<PhysicalNode, PlanError>> {
    let mut out = Vec::with_capacity(2);
    if join.query.is_filter_only() {
        out.push(PhysicalNode::game_filter_join(
            model,
            games.clone(),
            join.relation,
            join.condition,
            join.query.filters.clone(),
        ));
    }
    out.push(nested.clone().and_then(|entities| {
        PhysicalNode::game_hash_join(model, games, entities, join.relation, join.condition)
    }));
    out
}

fn finish(model: &CostModel, query: &Query, mut node: PhysicalNode) -> std::result::Result<PhysicalNode, PlanError> {
    if node.may_contain_duplicates() {
        node = PhysicalNode::distinct(model, node);
    }
    if !query.sort.is_none() && !node.sort_order().is_stronger_or_equal(&query.sort) {
        node = PhysicalNode::sort(model, node, query.sort.clone())?;
    }
    if query.limit > 0 {
        node = PhysicalNode::limit(model, node, query.limit);
    }
    Ok(node)
}

/// Directions to scan a key range in: ascending, plus descending when the
/// requested order leads with the index's first field descending.
fn key_range_directions(query: &Query) -> Vec<Direction> {
    let mut directions = vec![Direction::Ascending];
    let leading = index_fields(query.kind).first();
    if let Some(first) = query.sort.keys().first() {
        if Some(&first.field) == leading && first.direction == Direction::Descending {
            directions.push(Direction::Descending);
        }
    }
    directions
}

/// Direction of a full index scan that yields the requested order.
fn index_direction_for(query: &Query) -> Option<Direction> {
    if query.sort.is_none() || index_fields(query.kind).is_empty() {
        return None;
    }
    [Direction::Ascending, Direction::Descending]
        .into_iter()
        .find(|direction| SortOrder::index_order(query.kind, *direction).is_stronger_or_equal(&query.sort))
}

/// Non-empty subsets of `0..count` with at most `max` members, each in
/// ascending index order.
fn subsets(count: usize, max: usize) -> Vec<Vec<usize>> {
    fn extend(start: usize, count: usize, max: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        for idx in start..count {
            current.push(idx);
            out.push(current.clone());
            if current.len() < max {
                extend(idx + 1, count, max, current, out);
            }
            current.pop();
        }
    }
    let mut out = Vec::new();
    extend(0, count, max, &mut Vec::new(), &mut out);
    out
}
