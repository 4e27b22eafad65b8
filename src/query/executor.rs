//! Pull-based execution of physical plans.
//!
//! Every operator becomes a [`RowStream`] borrowing the plan node and the
//! snapshot it reads from. Streams are single-pass; calling
//! [`PhysicalNode::rows`] again builds a fresh tree that restarts from the
//! snapshot. Nothing is read until the first row is pulled, and dropping the
//! [`ResultStream`] abandons the remaining work.

use std::time::Instant;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::model::{Game, Kind, Record, Relation};
use crate::query::filter::{matches_all, Filter};
use crate::query::join::{accept, id_groups, JoinCondition};
use crate::query::physical::{PhysicalNode, PhysicalOp};
use crate::query::profile::ExecutionTrace;
use crate::query::sort::{Direction, SortOrder};
use crate::query::value::IndexKey;
use crate::storage::{ArchiveSnapshot, IdCursor, IdRange, RecordCursor};
use crate::types::{GambitError, RecordId, Result};

/// One result row: an id, optionally its record, and a weight.
///
/// Weights start at 1.0, multiply across joins and add up when `Distinct`
/// collapses rows.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryData {
    /// Identifier of the row in its collection.
    pub id: RecordId,
    /// Materialized record, when the producing operator has it.
    pub data: Option<Record>,
    /// Aggregate weight.
    pub weight: f64,
}

impl QueryData {
    /// Identifier-only row with weight 1.0.
    pub fn new(id: RecordId) -> Self {
        Self {
            id,
            data: None,
            weight: 1.0,
        }
    }

    /// Row carrying `record`; the id is taken from the record.
    pub fn with_data(record: Record) -> Self {
        Self {
            id: record.id(),
            data: Some(record),
            weight: 1.0,
        }
    }

    /// Replaces the row weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Materialized record, if any.
    pub fn record(&self) -> Option<&Record> {
        self.data.as_ref()
    }

    /// Materialized game, if this row carries one.
    pub fn game(&self) -> Option<&Game> {
        self.data.as_ref().and_then(Record::as_game)
    }

    /// Attaches `record`, which must carry this row's id.
    fn attach(&mut self, record: Record) {
        debug_assert_eq!(record.id(), self.id);
        self.data = Some(record);
    }
}

/// What execution reads from.
#[derive(Clone, Copy)]
pub struct QueryContext<'a> {
    snapshot: &'a dyn ArchiveSnapshot,
    trace: Option<&'a ExecutionTrace>,
}

impl<'a> QueryContext<'a> {
    /// Untraced execution over `snapshot`.
    pub fn new(snapshot: &'a dyn ArchiveSnapshot) -> Self {
        Self {
            snapshot,
            trace: None,
        }
    }

    /// Records per-node counters into `trace` while executing.
    pub fn traced(snapshot: &'a dyn ArchiveSnapshot, trace: &'a ExecutionTrace) -> Self {
        Self {
            snapshot,
            trace: Some(trace),
        }
    }

    /// Snapshot rows are read from.
    pub fn snapshot(&self) -> &'a dyn ArchiveSnapshot {
        self.snapshot
    }
}

/// Lazily evaluated stream of rows.
pub(crate) trait RowStream {
    fn try_next(&mut self) -> Result<Option<QueryData>>;
}

type BoxRowStream<'a> = Box<dyn RowStream + 'a>;

/// Streaming handle over plan output.
///
/// The first error ends the stream.
pub struct ResultStream<'a> {
    rows: BoxRowStream<'a>,
    done: bool,
}

impl<'a> ResultStream<'a> {
    fn new(rows: BoxRowStream<'a>) -> Self {
        Self { rows, done: false }
    }
}

impl Iterator for ResultStream<'_> {
    type Item = Result<QueryData>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rows.try_next() {
            Ok(Some(row)) => Some(Ok(row)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

impl PhysicalNode {
    /// Builds the stream of this subtree's rows.
    pub fn rows<'a>(&'a self, ctx: &QueryContext<'a>) -> Result<ResultStream<'a>> {
        let mut position = 0;
        let rows = build(self, ctx, &mut position)?;
        Ok(ResultStream::new(rows))
    }

    /// Runs the subtree to completion.
    pub fn collect_rows(&self, ctx: &QueryContext<'_>) -> Result<Vec<QueryData>> {
        self.rows(ctx)?.collect()
    }
}

/// Reports storage work of one node to the trace, if any.
#[derive(Clone, Copy)]
struct NodeCounter<'a> {
    trace: Option<&'a ExecutionTrace>,
    node: usize,
}

impl NodeCounter<'_> {
    fn read(&self, records: u64) {
        if let Some(trace) = self.trace {
            trace.record_reads(self.node, records);
        }
    }

    fn lookup(&self) {
        if let Some(trace) = self.trace {
            trace.record_lookup(self.node);
        }
    }
}

fn build<'a>(
    node: &'a PhysicalNode,
    ctx: &QueryContext<'a>,
    position: &mut usize,
) -> Result<BoxRowStream<'a>> {
    let index = *position;
    *position += 1;
    let counter = NodeCounter {
        trace: ctx.trace,
        node: index,
    };
    let snapshot = ctx.snapshot;
    let mut inputs = Vec::with_capacity(node.inputs.len());
    for input in &node.inputs {
        inputs.push(build(input, ctx, position)?);
    }
    let mut inputs = inputs.into_iter();
    let mut next_input = move || {
        inputs
            .next()
            .ok_or(GambitError::Corruption("operator input missing"))
    };

    let stream: BoxRowStream<'a> = match &node.op {
        PhysicalOp::TableScan {
            kind,
            range,
            filters,
        } => Box::new(ScanStream {
            opener: ScanOpener::Table {
                kind: *kind,
                range: *range,
            },
            cursor: None,
            snapshot,
            filters,
            counter,
        }),
        PhysicalOp::IndexScan {
            kind,
            lo,
            hi,
            direction,
            filters,
        } => Box::new(ScanStream {
            opener: ScanOpener::Index {
                kind: *kind,
                lo: lo.as_ref(),
                hi: hi.as_ref(),
                direction: *direction,
            },
            cursor: None,
            snapshot,
            filters,
            counter,
        }),
        PhysicalOp::Manual { ids, .. } => Box::new(ManualStream {
            ids: ids.iter(),
        }),
        PhysicalOp::Lookup { filters } => Box::new(LookupStream {
            input: next_input()?,
            kind: node.kind(),
            snapshot,
            filters,
            counter,
        }),
        PhysicalOp::Filter { filters } => Box::new(FilterStream {
            input: next_input()?,
            filters,
        }),
        PhysicalOp::Sort { order } => Box::new(SortStream {
            input: Some(next_input()?),
            order,
            sorted: Vec::new().into_iter(),
        }),
        PhysicalOp::Distinct => Box::new(DistinctStream {
            input: Some(next_input()?),
            rows: Vec::new().into_iter(),
        }),
        PhysicalOp::Limit { count } => Box::new(LimitStream {
            input: next_input()?,
            remaining: (*count > 0).then_some(*count),
        }),
        PhysicalOp::MergeJoin => {
            let left = next_input()?;
            let right = next_input()?;
            Box::new(MergeJoinStream { left, right })
        }
        PhysicalOp::HashJoin => {
            let left = next_input()?;
            let right = next_input()?;
            Box::new(HashJoinStream {
                left,
                right: Some(right),
                weights: FxHashMap::default(),
            })
        }
        PhysicalOp::GameFilterJoin {
            relation,
            condition,
            filters,
        } => Box::new(GameFilterJoinStream {
            games: next_input()?,
            relation: *relation,
            condition: *condition,
            filters,
            snapshot,
            counter,
            resolved: FxHashMap::default(),
        }),
        PhysicalOp::GameHashJoin {
            relation,
            condition,
        } => {
            let games = next_input()?;
            let entities = next_input()?;
            Box::new(GameHashJoinStream {
                games,
                entities: Some(entities),
                relation: *relation,
                condition: *condition,
                weights: FxHashMap::default(),
            })
        }
        PhysicalOp::GameLoopJoin {
            relation,
            condition,
        } => Box::new(GameLoopJoinStream {
            entities: Some(next_input()?),
            relation: *relation,
            condition: *condition,
            snapshot,
            counter,
            matched: FxHashMap::default(),
            order: Vec::new(),
            next_entity: 0,
            current: None,
        }),
        PhysicalOp::EntityProjection {
            relation,
            condition,
        } => Box::new(EntityProjectionStream {
            games: next_input()?,
            relation: *relation,
            condition: *condition,
            pending: SmallVec::new(),
        }),
    };

    let Some(trace) = ctx.trace else {
        return Ok(stream);
    };
    Ok(Box::new(TracedStream {
        inner: stream,
        trace,
        node: index,
    }))
}

struct TracedStream<'a> {
    inner: BoxRowStream<'a>,
    trace: &'a ExecutionTrace,
    node: usize,
}

impl RowStream for TracedStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        let start = Instant::now();
        let row = self.inner.try_next();
        self.trace.record_elapsed(self.node, start);
        if let Ok(Some(_)) = &row {
            self.trace.record_row(self.node);
        }
        row
    }
}

enum ScanOpener<'a> {
    Table {
        kind: Kind,
        range: IdRange,
    },
    Index {
        kind: Kind,
        lo: Option<&'a IndexKey>,
        hi: Option<&'a IndexKey>,
        direction: Direction,
    },
}

struct ScanStream<'a> {
    opener: ScanOpener<'a>,
    cursor: Option<RecordCursor<'a>>,
    snapshot: &'a dyn ArchiveSnapshot,
    filters: &'a [Filter],
    counter: NodeCounter<'a>,
}

impl<'a> ScanStream<'a> {
    fn open(&mut self) -> Result<&mut RecordCursor<'a>> {
        if self.cursor.is_none() {
            let cursor = match &self.opener {
                ScanOpener::Table { kind, range } => self.snapshot.scan(*kind, *range)?,
                ScanOpener::Index {
                    kind,
                    lo,
                    hi,
                    direction,
                } => self.snapshot.scan_index(*kind, *lo, *hi, *direction)?,
            };
            self.cursor = Some(cursor);
        }
        self.cursor
            .as_mut()
            .ok_or(GambitError::Corruption("scan cursor missing"))
    }
}

impl RowStream for ScanStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        let counter = self.counter;
        let filters = self.filters;
        let cursor = self.open()?;
        for record in cursor {
            counter.read(1);
            let row = QueryData::with_data(record?);
            if matches_all(filters, &row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

struct ManualStream<'a> {
    ids: std::slice::Iter<'a, RecordId>,
}

impl RowStream for ManualStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        Ok(self.ids.next().map(|id| QueryData::new(*id)))
    }
}

struct LookupStream<'a> {
    input: BoxRowStream<'a>,
    kind: Kind,
    snapshot: &'a dyn ArchiveSnapshot,
    filters: &'a [Filter],
    counter: NodeCounter<'a>,
}

impl RowStream for LookupStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        while let Some(mut row) = self.input.try_next()? {
            self.counter.lookup();
            // Ids that no longer resolve are dropped.
            let Some(record) = self.snapshot.get(self.kind, row.id)? else {
                continue;
            };
            self.counter.read(1);
            row.attach(record);
            if matches_all(self.filters, &row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

struct FilterStream<'a> {
    input: BoxRowStream<'a>,
    filters: &'a [Filter],
}

impl RowStream for FilterStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        while let Some(row) = self.input.try_next()? {
            if matches_all(self.filters, &row) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

struct SortStream<'a> {
    input: Option<BoxRowStream<'a>>,
    order: &'a SortOrder,
    sorted: std::vec::IntoIter<QueryData>,
}

impl RowStream for SortStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        if let Some(mut input) = self.input.take() {
            let mut rows = Vec::new();
            while let Some(row) = input.try_next()? {
                rows.push(row);
            }
            // `sort_by` is stable: equal rows keep their input order.
            rows.sort_by(|a, b| self.order.compare(a, b));
            self.sorted = rows.into_iter();
        }
        Ok(self.sorted.next())
    }
}

struct DistinctStream<'a> {
    input: Option<BoxRowStream<'a>>,
    rows: std::vec::IntoIter<QueryData>,
}

impl RowStream for DistinctStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        if let Some(mut input) = self.input.take() {
            let mut rows: Vec<QueryData> = Vec::new();
            let mut positions: FxHashMap<RecordId, usize> = FxHashMap::default();
            while let Some(row) = input.try_next()? {
                match positions.get(&row.id) {
                    Some(&pos) => {
                        let kept = &mut rows[pos];
                        kept.weight += row.weight;
                        if kept.data.is_none() {
                            kept.data = row.data;
                        }
                    }
                    None => {
                        positions.insert(row.id, rows.len());
                        rows.push(row);
                    }
                }
            }
            self.rows = rows.into_iter();
        }
        Ok(self.rows.next())
    }
}

struct LimitStream<'a> {
    input: BoxRowStream<'a>,
    /// `None` when unlimited.
    remaining: Option<u32>,
}

impl RowStream for LimitStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        match self.remaining {
            None => self.input.try_next(),
            Some(0) => Ok(None),
            Some(n) => {
                let row = self.input.try_next()?;
                self.remaining = if row.is_some() { Some(n - 1) } else { Some(0) };
                Ok(row)
            }
        }
    }
}

struct MergeJoinStream<'a> {
    left: BoxRowStream<'a>,
    right: BoxRowStream<'a>,
}

impl RowStream for MergeJoinStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        let Some(mut left) = self.left.try_next()? else {
            return Ok(None);
        };
        let Some(mut right) = self.right.try_next()? else {
            return Ok(None);
        };
        loop {
            match left.id.cmp(&right.id) {
                std::cmp::Ordering::Equal => {
                    let weight = left.weight * right.weight;
                    let data = left.data.or(right.data);
                    return Ok(Some(QueryData {
                        id: left.id,
                        data,
                        weight,
                    }));
                }
                std::cmp::Ordering::Less => match self.left.try_next()? {
                    Some(row) => left = row,
                    None => return Ok(None),
                },
                std::cmp::Ordering::Greater => match self.right.try_next()? {
                    Some(row) => right = row,
                    None => return Ok(None),
                },
            }
        }
    }
}

struct HashJoinStream<'a> {
    left: BoxRowStream<'a>,
    right: Option<BoxRowStream<'a>>,
    weights: FxHashMap<RecordId, f64>,
}

impl RowStream for HashJoinStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        if let Some(mut right) = self.right.take() {
            while let Some(row) = right.try_next()? {
                *self.weights.entry(row.id).or_insert(0.0) += row.weight;
            }
        }
        while let Some(mut row) = self.left.try_next()? {
            if let Some(weight) = self.weights.get(&row.id) {
                row.weight *= weight;
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

struct GameFilterJoinStream<'a> {
    games: BoxRowStream<'a>,
    relation: Relation,
    condition: JoinCondition,
    filters: &'a [Filter],
    snapshot: &'a dyn ArchiveSnapshot,
    counter: NodeCounter<'a>,
    /// Entity id -> whether it passes the filters.
    resolved: FxHashMap<RecordId, bool>,
}

impl GameFilterJoinStream<'_> {
    fn resolve(&mut self, id: RecordId) -> Result<bool> {
        if let Some(passes) = self.resolved.get(&id) {
            return Ok(*passes);
        }
        self.counter.lookup();
        let passes = match self.snapshot.get(self.relation.entity_kind(), id)? {
            Some(record) => {
                self.counter.read(1);
                matches_all(self.filters, &QueryData::with_data(record))
            }
            // Broken references never match.
            None => false,
        };
        self.resolved.insert(id, passes);
        Ok(passes)
    }
}

impl RowStream for GameFilterJoinStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        while let Some(mut row) = self.games.try_next()? {
            let Some(game) = row.game() else {
                continue;
            };
            let groups = id_groups(game, self.relation, self.condition);
            for id in groups.iter().flatten() {
                self.resolve(*id)?;
            }
            let resolved = &self.resolved;
            let factor = row.game().and_then(|game| {
                accept(game, self.relation, self.condition, |id| {
                    resolved.get(&id).copied().unwrap_or(false).then_some(1.0)
                })
            });
            if let Some(factor) = factor {
                row.weight *= factor;
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

struct GameHashJoinStream<'a> {
    games: BoxRowStream<'a>,
    entities: Option<BoxRowStream<'a>>,
    relation: Relation,
    condition: JoinCondition,
    weights: FxHashMap<RecordId, f64>,
}

impl RowStream for GameHashJoinStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        if let Some(mut entities) = self.entities.take() {
            while let Some(row) = entities.try_next()? {
                *self.weights.entry(row.id).or_insert(0.0) += row.weight;
            }
        }
        while let Some(mut row) = self.games.try_next()? {
            let weights = &self.weights;
            let factor = row.game().and_then(|game| {
                accept(game, self.relation, self.condition, |id| weights.get(&id).copied())
            });
            if let Some(factor) = factor {
                row.weight *= factor;
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

struct GameLoopJoinStream<'a> {
    entities: Option<BoxRowStream<'a>>,
    relation: Relation,
    condition: JoinCondition,
    snapshot: &'a dyn ArchiveSnapshot,
    counter: NodeCounter<'a>,
    /// Entity id -> (aggregate weight, first position in the input).
    matched: FxHashMap<RecordId, (f64, usize)>,
    order: Vec<RecordId>,
    next_entity: usize,
    current: Option<(usize, IdCursor<'a>)>,
}

impl GameLoopJoinStream<'_> {
    fn drain_entities(&mut self) -> Result<()> {
        if let Some(mut entities) = self.entities.take() {
            while let Some(row) = entities.try_next()? {
                let position = self.order.len();
                let entry = self.matched.entry(row.id).or_insert_with(|| (0.0, position));
                entry.0 += row.weight;
                if entry.1 == position {
                    self.order.push(row.id);
                }
            }
        }
        Ok(())
    }

    /// Position of the first matched entity `game` references, which is
    /// the only entity that emits it.
    fn owner(&self, game: &Game) -> Option<usize> {
        let (white, black) = self.relation.refs(game);
        [white, black]
            .into_iter()
            .flatten()
            .filter_map(|id| self.matched.get(&id).map(|(_, position)| *position))
            .min()
    }
}

impl RowStream for GameLoopJoinStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        self.drain_entities()?;
        loop {
            if self.current.is_none() {
                let Some(entity) = self.order.get(self.next_entity).copied() else {
                    return Ok(None);
                };
                let cursor = self.snapshot.list_game_ids(self.relation, entity)?;
                self.current = Some((self.next_entity, cursor));
                self.next_entity += 1;
            }
            let next = self
                .current
                .as_mut()
                .and_then(|(position, cursor)| cursor.next().map(|id| (*position, id)));
            let Some((position, game_id)) = next else {
                self.current = None;
                continue;
            };
            let game_id = game_id?;
            self.counter.lookup();
            let Some(record) = self.snapshot.get(Kind::Game, game_id)? else {
                continue;
            };
            self.counter.read(1);
            let Some(game) = record.as_game() else {
                continue;
            };
            if self.owner(game) != Some(position) {
                continue;
            }
            let matched = &self.matched;
            let factor = accept(game, self.relation, self.condition, |id| {
                matched.get(&id).map(|(weight, _)| *weight)
            });
            if let Some(factor) = factor {
                return Ok(Some(QueryData::with_data(record).with_weight(factor)));
            }
        }
    }
}

struct EntityProjectionStream<'a> {
    games: BoxRowStream<'a>,
    relation: Relation,
    condition: JoinCondition,
    pending: SmallVec<[QueryData; 2]>,
}

impl RowStream for EntityProjectionStream<'_> {
    fn try_next(&mut self) -> Result<Option<QueryData>> {
        loop {
            if !self.pending.is_empty() {
                return Ok(Some(self.pending.remove(0)));
            }
            let Some(row) = self.games.try_next()? else {
                return Ok(None);
            };
            let Some(game) = row.game() else {
                continue;
            };
            let mut seen: FxHashSet<RecordId> = FxHashSet::default();
            for id in id_groups(game, self.relation, self.condition)
                .into_iter()
                .flatten()
            {
                if seen.insert(id) {
                    self.pending.push(QueryData::new(id).with_weight(row.weight));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::{GameResult, Player};
    use crate::query::cost::CostModel;
    use crate::query::sort::SortKey;
    use crate::query::stats::Statistics;
    use crate::query::value::Field;
    use crate::storage::MemoryArchive;

    fn archive() -> MemoryArchive {
        let archive = MemoryArchive::new();
        for (id, last) in [(1, "Tal"), (2, "Botvinnik"), (3, "Smyslov"), (4, "Petrosian")] {
            archive.insert(Player {
                id: RecordId(id),
                last_name: last.into(),
                first_name: String::new(),
            });
        }
        for (id, white, black, result) in [
            (10, 1, 2, GameResult::WhiteWins),
            (11, 2, 1, GameResult::Draw),
            (12, 3, 4, GameResult::BlackWins),
            (13, 1, 3, GameResult::BlackWins),
        ] {
            archive.insert(Game {
                id: RecordId(id),
                white_id: RecordId(white),
                black_id: RecordId(black),
                white_elo: 2600,
                black_elo: 2600,
                result,
                tournament_id: RecordId(0),
                annotator_id: RecordId(0),
                source_id: RecordId(0),
                white_team_id: None,
                black_team_id: None,
                tag_id: None,
                year: 1960,
                round: 1,
                eco: "C00".into(),
                ply_count: 60,
            });
        }
        archive
    }

    fn ids(rows: &[QueryData]) -> Vec<u32> {
        rows.iter().map(|row| row.id.0).collect()
    }

    #[test]
    fn loop_join_emits_each_game_once() {
        let archive = archive();
        let data = archive.data();
        let m = CostModel::new(data.as_ref(), Arc::new(Statistics::empty()));
        let players = PhysicalNode::manual(&m, Kind::Player, [RecordId(1), RecordId(2)]);
        let games =
            PhysicalNode::game_loop_join(&m, players, Relation::Player, JoinCondition::Any).unwrap();
        let ctx = QueryContext::new(data.as_ref());
        let mut rows = games.collect_rows(&ctx).unwrap();
        rows.sort_by_key(|row| row.id);
        assert_eq!(ids(&rows), vec![10, 11, 13]);
        assert!(rows.iter().all(|row| row.data.is_some()));
    }

    #[test]
    fn projection_then_distinct_counts_games() {
        let archive = archive();
        let data = archive.data();
        let m = CostModel::new(data.as_ref(), Arc::new(Statistics::empty()));
        let games = PhysicalNode::table_scan(&m, Kind::Game, IdRange::all(), vec![]).unwrap();
        let players =
            PhysicalNode::entity_projection(&m, games, Relation::Player, JoinCondition::Loser)
                .unwrap();
        let distinct = PhysicalNode::distinct(&m, players);
        let sorted = PhysicalNode::sort(&m, distinct, SortOrder::by_id()).unwrap();
        let rows = sorted.collect_rows(&QueryContext::new(data.as_ref())).unwrap();
        // Losers: 2 (game 10), 3 (game 12), 1 (game 13).
        assert_eq!(ids(&rows), vec![1, 2, 3]);
        assert!(rows.iter().all(|row| row.weight == 1.0));
    }

    #[test]
    fn lookup_drops_unresolved_ids_and_keeps_order() {
        let archive = archive();
        let data = archive.data();
        let m = CostModel::new(data.as_ref(), Arc::new(Statistics::empty()));
        let ids_node = PhysicalNode::manual(&m, Kind::Player, [RecordId(4), RecordId(9), RecordId(1)]);
        let lookup = PhysicalNode::lookup(&m, ids_node, vec![]).unwrap();
        let sorted = PhysicalNode::sort(
            &m,
            lookup,
            SortOrder::new([SortKey::desc(Field::PlayerLastName)]),
        )
        .unwrap();
        let rows = sorted.collect_rows(&QueryContext::new(data.as_ref())).unwrap();
        assert_eq!(ids(&rows), vec![1, 4]);
    }

    #[test]
    fn hash_join_preserves_left_order() {
        let archive = archive();
        let data = archive.data();
        let m = CostModel::new(data.as_ref(), Arc::new(Statistics::empty()));
        let left = PhysicalNode::index_scan(&m, Kind::Player, None, None, Direction::Ascending, vec![])
            .unwrap();
        let right = PhysicalNode::manual(&m, Kind::Player, [RecordId(1), RecordId(2), RecordId(3)]);
        let join = PhysicalNode::hash_join(&m, left, right).unwrap();
        let rows = join.collect_rows(&QueryContext::new(data.as_ref())).unwrap();
        // Botvinnik, Smyslov, Tal.
        assert_eq!(ids(&rows), vec![2, 3, 1]);
    }

    #[test]
    fn limit_stops_pulling_and_traces_rows() {
        let archive = archive();
        let data = archive.data();
        let m = CostModel::new(data.as_ref(), Arc::new(Statistics::empty()));
        let scan = PhysicalNode::table_scan(&m, Kind::Game, IdRange::all(), vec![]).unwrap();
        let limit = PhysicalNode::limit(&m, scan, 2);
        let trace = ExecutionTrace::for_plan(&limit);
        let rows = limit
            .collect_rows(&QueryContext::traced(data.as_ref(), &trace))
            .unwrap();
        assert_eq!(ids(&rows), vec![10, 11]);
        assert_eq!(trace.node(0).map(|n| n.rows), Some(2));
        assert_eq!(trace.node(1).map(|n| n.records_read), Some(2));
    }

    #[test]
    fn streams_restart_from_the_snapshot() {
        let archive = archive();
        let data = archive.data();
        let m = CostModel::new(data.as_ref(), Arc::new(Statistics::empty()));
        let scan = PhysicalNode::table_scan(&m, Kind::Player, IdRange::new(2, 4), vec![]).unwrap();
        let ctx = QueryContext::new(data.as_ref());
        assert_eq!(ids(&scan.collect_rows(&ctx).unwrap()), vec![2, 3]);
        assert_eq!(ids(&scan.collect_rows(&ctx).unwrap()), vec![2, 3]);
    }
}
