//! Cost estimates and the formulas operators use to derive them.
//!
//! Every formula is a pure function of the operator configuration, the
//! input costs and the [`CostModel`] captured at planning time, so a node's
//! cost can be computed once when it is built.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::{Kind, Relation};
use crate::query::filter::{conjunction_selectivity, Filter};
use crate::query::join::JoinCondition;
use crate::query::stats::{
    clamp_selectivity, Statistics, DEFAULT_EQ_SELECTIVITY, DEFAULT_RANGE_SELECTIVITY,
};
use crate::query::value::{index_fields, IndexKey, Value};
use crate::storage::{ArchiveSnapshot, IdRange, IdSpace};

/// Upper bound for row estimates.
pub const MAX_ROWS: u64 = u32::MAX as u64;
/// Secondary index entries stored in one page.
pub const INDEX_ENTRIES_PER_PAGE: u64 = 128;
/// Comparisons per deserialization-equivalent unit of sort work.
pub const SORT_WORK_DIVISOR: u64 = 16;

/// Relative weights of the cost components.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// Weight of one page read.
    pub page_read: u64,
    /// Weight of one record deserialization.
    pub deserialization: u64,
    /// Weight of one output row.
    pub row: u64,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            page_read: 8,
            deserialization: 1,
            row: 0,
        }
    }
}

/// Estimated work of an operator subtree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryCost {
    /// Rows the subtree emits.
    pub estimated_rows: u64,
    /// Pages read by the whole subtree.
    pub estimated_page_reads: u64,
    /// Records deserialized by the whole subtree.
    pub estimated_deserializations: u64,
}

impl QueryCost {
    /// Builds a cost with rows clamped into `[1, MAX_ROWS]`.
    pub fn new(rows: u64, page_reads: u64, deserializations: u64) -> Self {
        Self {
            estimated_rows: clamp_rows(rows),
            estimated_page_reads: page_reads,
            estimated_deserializations: deserializations,
        }
    }

    /// Weighted scalar cost.
    pub fn total(&self, weights: &CostWeights) -> u64 {
        self.estimated_page_reads
            .saturating_mul(weights.page_read)
            .saturating_add(
                self.estimated_deserializations
                    .saturating_mul(weights.deserialization),
            )
            .saturating_add(self.estimated_rows.saturating_mul(weights.row))
    }

    /// Lower total first, then fewer page reads, deserializations and rows.
    pub fn compare(&self, other: &QueryCost, weights: &CostWeights) -> Ordering {
        self.total(weights)
            .cmp(&other.total(weights))
            .then(self.estimated_page_reads.cmp(&other.estimated_page_reads))
            .then(
                self.estimated_deserializations
                    .cmp(&other.estimated_deserializations),
            )
            .then(self.estimated_rows.cmp(&other.estimated_rows))
    }

    /// Work of `self` plus the work of `other`, keeping `self`'s rows.
    fn with_work_of(self, other: &QueryCost) -> Self {
        Self {
            estimated_rows: self.estimated_rows,
            estimated_page_reads: self
                .estimated_page_reads
                .saturating_add(other.estimated_page_reads),
            estimated_deserializations: self
                .estimated_deserializations
                .saturating_add(other.estimated_deserializations),
        }
    }
}

impl fmt::Display for QueryCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows={} pages={} deser={}",
            self.estimated_rows, self.estimated_page_reads, self.estimated_deserializations
        )
    }
}

fn clamp_rows(rows: u64) -> u64 {
    rows.clamp(1, MAX_ROWS)
}

/// `value * factor`, rounded and saturated into `u64`.
fn scale(value: u64, factor: f64) -> u64 {
    let scaled = (value as f64 * factor).round();
    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

fn scale_up(value: u64, factor: f64) -> u64 {
    let scaled = (value as f64 * factor).ceil();
    if scaled.is_nan() || scaled <= 0.0 {
        0
    } else if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

/// Fraction of games matched by a join whose per-entity match ratio is `r`,
/// assuming both sides of a game match independently.
pub fn match_ratio(relation: Relation, condition: JoinCondition, r: f64) -> f64 {
    let r = r.clamp(0.0, 1.0);
    let ratio = if !relation.is_two_sided() {
        r
    } else {
        match condition {
            JoinCondition::Any => 1.0 - (1.0 - r) * (1.0 - r),
            JoinCondition::Both => r * r,
            JoinCondition::White | JoinCondition::Black => r,
            JoinCondition::Winner | JoinCondition::Loser => r / 2.0,
        }
    };
    clamp_selectivity(ratio)
}

/// Entity ids a projection emits per game.
fn ids_per_game(relation: Relation, condition: JoinCondition) -> f64 {
    if !relation.is_two_sided() {
        return 1.0;
    }
    match condition {
        JoinCondition::Any | JoinCondition::Both => 2.0,
        JoinCondition::White | JoinCondition::Black => 1.0,
        JoinCondition::Winner | JoinCondition::Loser => 0.5,
    }
}

/// Planning environment: collection sizes and the statistics snapshot.
#[derive(Clone, Debug)]
pub struct CostModel {
    counts: [u64; 7],
    bounds: [u32; 7],
    pages: [u64; 7],
    stats: Arc<Statistics>,
}

impl CostModel {
    /// Captures sizes from `snapshot` alongside `stats`.
    pub fn new(snapshot: &dyn ArchiveSnapshot, stats: Arc<Statistics>) -> Self {
        let mut counts = [0; 7];
        let mut bounds = [0; 7];
        let mut pages = [0; 7];
        for kind in Kind::ALL {
            counts[kind.ordinal()] = snapshot.count(kind);
            bounds[kind.ordinal()] = snapshot.id_bound(kind);
            pages[kind.ordinal()] = snapshot.num_disk_pages(kind);
        }
        Self {
            counts,
            bounds,
            pages,
            stats,
        }
    }

    /// Environment with explicit sizes, for estimates without a snapshot.
    /// Ids are taken to fill `[0, count)`.
    pub fn with_sizes(counts: [u64; 7], pages: [u64; 7], stats: Arc<Statistics>) -> Self {
        Self {
            counts,
            bounds: counts.map(|count| IdSpace::dense(count).bound),
            pages,
            stats,
        }
    }

    /// Replaces the id bounds, for collections whose ids leave gaps.
    pub fn with_id_bounds(mut self, bounds: [u32; 7]) -> Self {
        self.bounds = bounds;
        self
    }

    /// Live records of `kind`.
    pub fn count(&self, kind: Kind) -> u64 {
        self.counts[kind.ordinal()]
    }

    /// Live records of `kind` and the span of their ids.
    pub fn id_space(&self, kind: Kind) -> IdSpace {
        IdSpace {
            count: self.count(kind),
            bound: self.bounds[kind.ordinal()],
        }
    }

    /// Disk pages of `kind`.
    pub fn pages(&self, kind: Kind) -> u64 {
        self.pages[kind.ordinal()]
    }

    /// Statistics the estimates are derived from.
    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    /// Fraction of `kind`'s rows passing all `filters`.
    pub fn selectivity(&self, kind: Kind, filters: &[Filter]) -> f64 {
        if filters.is_empty() {
            return 1.0;
        }
        conjunction_selectivity(filters, kind, &self.stats, self.id_space(kind))
    }

    /// Full or partial table scan over `range`.
    pub fn table_scan(&self, kind: Kind, range: IdRange, filters: &[Filter]) -> QueryCost {
        let n = self.count(kind);
        let fraction = self.id_space(kind).range_fraction(&range);
        let touched = scale(n, fraction);
        QueryCost::new(
            scale(touched, self.selectivity(kind, filters)),
            scale_up(self.pages(kind), fraction),
            touched,
        )
    }

    /// Ratio of `kind`'s secondary index covered by the key range.
    pub fn key_range_ratio(
        &self,
        kind: Kind,
        lo: Option<&IndexKey>,
        hi: Option<&IndexKey>,
    ) -> f64 {
        let Some(leading) = index_fields(kind).first().copied() else {
            return 1.0;
        };
        let lo = lo.and_then(|key| key.0.first());
        let hi = hi.and_then(|key| key.0.first());
        if lo.is_none() && hi.is_none() {
            return 1.0;
        }
        let ratio = match (lo, hi) {
            (Some(Value::Text(_)), _) | (_, Some(Value::Text(_))) => {
                fn as_text(v: Option<&Value>) -> Option<&str> {
                    match v {
                        Some(Value::Text(text)) => Some(text.as_str()),
                        _ => None,
                    }
                }
                match self.stats.key_distribution(leading) {
                    Some(dist) => dist.ratio_between(as_text(lo), as_text(hi)),
                    None if lo == hi => DEFAULT_EQ_SELECTIVITY,
                    None => DEFAULT_RANGE_SELECTIVITY,
                }
            }
            _ => {
                let as_int = |v: Option<&Value>, open: i64| match v {
                    Some(Value::Int(i)) => *i,
                    Some(Value::Float(f)) => *f as i64,
                    _ => open,
                };
                match self.stats.numeric_distribution(leading) {
                    Some(dist) => dist.ratio_between(as_int(lo, i64::MIN), as_int(hi, i64::MAX)),
                    None if lo == hi => DEFAULT_EQ_SELECTIVITY,
                    None => DEFAULT_RANGE_SELECTIVITY,
                }
            }
        };
        clamp_selectivity(ratio)
    }

    /// Secondary index range scan followed by record fetches.
    ///
    /// Filters on the leading index field overlap the key range, so only
    /// the part of their selectivity the range does not already cover
    /// reduces the output.
    pub fn index_scan(
        &self,
        kind: Kind,
        lo: Option<&IndexKey>,
        hi: Option<&IndexKey>,
        filters: &[Filter],
    ) -> QueryCost {
        let n = self.count(kind);
        let ratio = self.key_range_ratio(kind, lo, hi);
        let touched = scale(n, ratio);
        let leading = index_fields(kind).first().copied();
        let (keyed, rest): (Vec<&Filter>, Vec<&Filter>) = filters
            .iter()
            .partition(|filter| filter.field().is_some() && filter.field() == leading);
        let space = self.id_space(kind);
        let keyed = conjunction_selectivity(keyed, kind, &self.stats, space);
        let rest = conjunction_selectivity(rest, kind, &self.stats, space);
        let passing = (keyed / ratio).min(1.0) * rest;
        let index_pages = touched.div_ceil(INDEX_ENTRIES_PER_PAGE);
        let record_pages = touched.min(self.pages(kind));
        QueryCost::new(
            scale(touched, passing),
            index_pages.saturating_add(record_pages),
            touched,
        )
    }

    /// Fixed id set; no storage access until enriched.
    pub fn manual(&self, ids: usize) -> QueryCost {
        QueryCost::new(ids as u64, 0, 0)
    }

    /// Point lookups for each input row, then residual filtering.
    pub fn lookup(&self, input: &QueryCost, kind: Kind, filters: &[Filter]) -> QueryCost {
        let lookups = input.estimated_rows;
        QueryCost::new(
            scale(lookups, self.selectivity(kind, filters)),
            lookups.min(self.pages(kind)),
            lookups,
        )
        .with_work_of(input)
    }

    /// Residual filtering of materialized rows.
    pub fn filter(&self, input: &QueryCost, kind: Kind, filters: &[Filter]) -> QueryCost {
        QueryCost::new(
            scale(input.estimated_rows, self.selectivity(kind, filters)),
            0,
            0,
        )
        .with_work_of(input)
    }

    /// In-memory stable sort.
    pub fn sort(&self, input: &QueryCost) -> QueryCost {
        let rows = input.estimated_rows;
        let work = scale(rows, (rows as f64).log2().max(0.0)) / SORT_WORK_DIVISOR;
        QueryCost::new(rows, 0, work).with_work_of(input)
    }

    /// Deduplication; estimated as free and row-preserving.
    pub fn distinct(&self, input: &QueryCost) -> QueryCost {
        *input
    }

    /// Caps rows at `count`; a pipelined input stops early, so its work is
    /// scaled by the same fraction.
    pub fn limit(&self, input: &QueryCost, count: u32, pipelined: bool) -> QueryCost {
        let count = count as u64;
        if count == 0 || count >= input.estimated_rows {
            return *input;
        }
        if !pipelined {
            return QueryCost::new(count, input.estimated_page_reads, input.estimated_deserializations);
        }
        let fraction = count as f64 / input.estimated_rows as f64;
        QueryCost::new(
            count,
            scale_up(input.estimated_page_reads, fraction),
            scale_up(input.estimated_deserializations, fraction),
        )
    }

    /// Id intersection of two inputs over `kind`.
    pub fn join(&self, kind: Kind, left: &QueryCost, right: &QueryCost) -> QueryCost {
        let n = self.count(kind).max(1);
        let product = (left.estimated_rows as u128) * (right.estimated_rows as u128) / n as u128;
        let rows = (product.min(u64::MAX as u128) as u64)
            .min(left.estimated_rows)
            .min(right.estimated_rows);
        QueryCost::new(rows, 0, 0)
            .with_work_of(left)
            .with_work_of(right)
    }

    /// Games probing each relevant entity record against nested filters.
    pub fn game_filter_join(
        &self,
        games: &QueryCost,
        relation: Relation,
        condition: JoinCondition,
        filters: &[Filter],
    ) -> QueryCost {
        let entity = relation.entity_kind();
        let r = self.selectivity(entity, filters);
        let sides = if relation.is_two_sided() { 2 } else { 1 };
        let lookups = games.estimated_rows.saturating_mul(sides);
        QueryCost::new(
            scale(games.estimated_rows, match_ratio(relation, condition, r)),
            lookups.min(self.pages(entity)),
            lookups,
        )
        .with_work_of(games)
    }

    /// Games filtered through a hash set built from an entity id stream.
    pub fn game_hash_join(
        &self,
        games: &QueryCost,
        entities: &QueryCost,
        relation: Relation,
        condition: JoinCondition,
    ) -> QueryCost {
        let n = self.count(relation.entity_kind()).max(1);
        let r = (entities.estimated_rows as f64 / n as f64).min(1.0);
        QueryCost::new(
            scale(games.estimated_rows, match_ratio(relation, condition, r)),
            0,
            0,
        )
        .with_work_of(games)
        .with_work_of(entities)
    }

    /// Entities expanded to their games through the game id lists.
    pub fn game_loop_join(&self, entities: &QueryCost, relation: Relation) -> QueryCost {
        let entity_count = self.count(relation.entity_kind()).max(1);
        let sides = if relation.is_two_sided() { 2.0 } else { 1.0 };
        let games_per_entity = self.count(Kind::Game) as f64 * sides / entity_count as f64;
        let produced = scale(entities.estimated_rows, games_per_entity);
        let list_pages = produced.div_ceil(INDEX_ENTRIES_PER_PAGE);
        let game_pages = produced.min(self.pages(Kind::Game));
        QueryCost::new(produced, list_pages.saturating_add(game_pages), produced)
            .with_work_of(entities)
    }

    /// Games projected to the entity ids selected by `condition`.
    pub fn entity_projection(
        &self,
        games: &QueryCost,
        relation: Relation,
        condition: JoinCondition,
    ) -> QueryCost {
        QueryCost::new(
            scale(games.estimated_rows, ids_per_game(relation, condition)),
            0,
            0,
        )
        .with_work_of(games)
    }
}
