#![forbid(unsafe_code)]

mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use common::{game, init_tracing, player, Fixture, Shape};
use gambit::model::GameResult;
use gambit::query::stats::Statistics;
use gambit::query::value::IndexKey;
use gambit::query::{
    CostModel, ExecutionTrace, PhysicalOp, PlannerConfig, QueryContext, QueryData,
};
use gambit::storage::{ArchiveData, IdCursor, IdRange, RecordCursor};
use gambit::{
    explain, ArchiveSnapshot, Direction, EngineConfig, Field, Filter, GambitError, JoinCondition,
    Kind, MemoryArchive, PhysicalNode, QueryBuilder, QueryEngine, Record, RecordId, Relation,
    Result, SortOrder,
};

fn engine(fixture: &Fixture) -> QueryEngine {
    init_tracing();
    QueryEngine::open(fixture.archive.clone(), EngineConfig::default()).unwrap()
}

fn ids(rows: &[QueryData]) -> Vec<u32> {
    rows.iter().map(|row| row.id.0).collect()
}

fn run_plan(model_snapshot: &dyn gambit::ArchiveSnapshot, plan: &PhysicalNode) -> Vec<QueryData> {
    plan.collect_rows(&QueryContext::new(model_snapshot)).unwrap()
}

#[test]
fn name_range_uses_index_order_without_sort() {
    let fixture = Fixture::generate(11, Shape::default());
    let engine = engine(&fixture);
    let session = engine.session().unwrap();
    let query = QueryBuilder::players()
        .filter(Filter::text_range(Field::PlayerLastName, Some("Ca"), Some("Cz")))
        .sort_by(SortOrder::player_name(Direction::Ascending))
        .build()
        .unwrap();
    let output = session.plan(&query).unwrap();
    assert_ne!(output.plan.op.name(), "Sort");
    assert!(explain(&output.plan, None).contains("IndexScan"));

    let model = session.cost_model();
    let scan = PhysicalNode::table_scan(model, Kind::Player, IdRange::all(), vec![]).unwrap();
    let filtered = PhysicalNode::filter(model, scan, query.filters.clone()).unwrap();
    let reference = PhysicalNode::sort(model, filtered, query.sort.clone()).unwrap();
    let expected = ids(&run_plan(session.snapshot(), &reference));
    assert!(!expected.is_empty());

    for candidate in &output.candidates {
        assert_eq!(ids(&run_plan(session.snapshot(), candidate)), expected);
    }
    let names: Vec<&str> = expected
        .iter()
        .filter_map(|id| fixture.player(RecordId(*id)))
        .map(|p| p.last_name.as_str())
        .collect();
    assert!(names.iter().all(|name| name.starts_with('C')));
    assert!(names.windows(2).all(|pair| pair[0] <= pair[1]));
}

#[test]
fn games_in_tournaments_of_1972_are_exact_for_every_candidate() {
    let fixture = Fixture::generate(42, Shape::default());
    let engine = engine(&fixture);
    let session = engine.session().unwrap();
    let query = QueryBuilder::games()
        .join(
            Relation::Tournament,
            JoinCondition::Any,
            QueryBuilder::tournaments().filter(Filter::int_eq(Field::TournamentYear, 1972)),
        )
        .build()
        .unwrap();
    let expected: BTreeSet<u32> = fixture
        .games
        .iter()
        .filter(|g| fixture.tournaments[g.tournament_id.0 as usize].year == 1972)
        .map(|g| g.id.0)
        .collect();
    assert!(!expected.is_empty());

    let output = session.plan(&query).unwrap();
    assert!(output.candidates.len() >= 3);
    for candidate in &output.candidates {
        let rows = run_plan(session.snapshot(), candidate);
        let found: BTreeSet<u32> = rows.iter().map(|row| row.id.0).collect();
        assert_eq!(found.len(), rows.len(), "duplicates in {}", explain(candidate, None));
        assert_eq!(found, expected, "wrong rows from {}", explain(candidate, None));
        assert!(rows.iter().all(|row| row.data.is_some() && row.weight == 1.0));
    }
}

#[test]
fn join_conditions_follow_the_result() {
    init_tracing();
    let archive = Arc::new(MemoryArchive::new());
    archive.insert(player(5, "Short", "Nigel"));
    archive.insert(player(9, "Timman", "Jan"));
    archive.insert(game(1, 5, 9, GameResult::WhiteWins));
    let engine = QueryEngine::open(archive, EngineConfig::default()).unwrap();
    let session = engine.session().unwrap();

    for (condition, matches) in [
        (JoinCondition::Winner, false),
        (JoinCondition::Loser, true),
        (JoinCondition::Any, true),
        (JoinCondition::Both, false),
        (JoinCondition::Black, true),
        (JoinCondition::White, false),
    ] {
        let query = QueryBuilder::games()
            .join(
                Relation::Player,
                condition,
                QueryBuilder::players().filter(Filter::ids([9u32])),
            )
            .build()
            .unwrap();
        let output = session.plan(&query).unwrap();
        for candidate in &output.candidates {
            let rows = run_plan(session.snapshot(), candidate);
            assert_eq!(ids(&rows), if matches { vec![1] } else { vec![] }, "{condition}");
        }
    }
}

#[test]
fn dangling_references_never_match() {
    init_tracing();
    let archive = Arc::new(MemoryArchive::new());
    archive.insert(player(5, "Short", "Nigel"));
    archive.insert(game(1, 5, 9, GameResult::Draw));
    let engine = QueryEngine::open(archive, EngineConfig::default()).unwrap();
    let session = engine.session().unwrap();

    let games = QueryBuilder::games()
        .join(
            Relation::Player,
            JoinCondition::Any,
            QueryBuilder::players().filter(Filter::ids([9u32])),
        )
        .build()
        .unwrap();
    let output = session.plan(&games).unwrap();
    assert!(output.candidates.len() >= 3);
    for candidate in &output.candidates {
        let rows = run_plan(session.snapshot(), candidate);
        assert!(rows.is_empty(), "rows from {}", explain(candidate, None));
    }

    let players = QueryBuilder::players()
        .filter(Filter::ids([5u32, 9]))
        .join(Relation::Player, JoinCondition::Any, QueryBuilder::games())
        .ids_only()
        .build()
        .unwrap();
    let output = session.plan(&players).unwrap();
    for candidate in &output.candidates {
        let rows = run_plan(session.snapshot(), candidate);
        assert_eq!(ids(&rows), vec![5], "rows from {}", explain(candidate, None));
    }
}

#[test]
fn prefix_scans_reach_keys_past_the_last_scalar() {
    init_tracing();
    let archive = Arc::new(MemoryArchive::new());
    archive.insert(player(1, "Ca\u{10FFFF}x", ""));
    archive.insert(player(2, "Carlsen", "Magnus"));
    archive.insert(player(3, "Cb", ""));
    archive.insert(player(4, "Bc", ""));
    let engine = QueryEngine::open(archive, EngineConfig::default()).unwrap();
    let session = engine.session().unwrap();
    let query = QueryBuilder::players()
        .filter(Filter::text_prefix(Field::PlayerLastName, "Ca"))
        .build()
        .unwrap();
    let output = session.plan(&query).unwrap();
    let shapes: Vec<String> = output
        .candidates
        .iter()
        .map(|candidate| explain(candidate, None))
        .collect();
    assert!(shapes.iter().any(|shape| shape.contains("IndexScan")));
    for (candidate, shape) in output.candidates.iter().zip(&shapes) {
        let found: BTreeSet<u32> = ids(&run_plan(session.snapshot(), candidate)).into_iter().collect();
        assert_eq!(found, BTreeSet::from([1, 2]), "rows from {shape}");
    }
}

#[test]
fn draws_have_no_winner_or_loser() {
    let archive = Arc::new(MemoryArchive::new());
    archive.insert(player(5, "Short", "Nigel"));
    archive.insert(player(9, "Timman", "Jan"));
    archive.insert(game(1, 5, 9, GameResult::Draw));
    archive.insert(game(2, 9, 5, GameResult::WhiteWinsOnForfeit));
    let engine = QueryEngine::new(archive, EngineConfig::default());
    let session = engine.session().unwrap();
    for condition in [JoinCondition::Winner, JoinCondition::Loser] {
        let query = QueryBuilder::games()
            .join(Relation::Player, condition, QueryBuilder::players())
            .build()
            .unwrap();
        assert!(session.run(&query).unwrap().is_empty());
    }
}

#[test]
fn players_weighted_by_matched_games() {
    let fixture = Fixture::generate(7, Shape::default());
    let engine = engine(&fixture);
    let session = engine.session().unwrap();
    let query = QueryBuilder::players()
        .join(
            Relation::Player,
            JoinCondition::Any,
            QueryBuilder::games().filter(Filter::int_eq(Field::GameYear, 1975)),
        )
        .build()
        .unwrap();

    let mut expected: BTreeMap<u32, f64> = BTreeMap::new();
    for g in fixture.games.iter().filter(|g| g.year == 1975) {
        let sides: BTreeSet<u32> = [g.white_id.0, g.black_id.0].into_iter().collect();
        for id in sides {
            *expected.entry(id).or_default() += 1.0;
        }
    }
    assert!(!expected.is_empty());

    let rows = session.run(&query).unwrap();
    let found: BTreeMap<u32, f64> = rows.iter().map(|row| (row.id.0, row.weight)).collect();
    assert_eq!(found.len(), rows.len());
    assert_eq!(found, expected);
    assert!(rows.iter().all(|row| row.data.is_some()));
}

#[test]
fn negated_filters_stay_residual() {
    let fixture = Fixture::generate(3, Shape::default());
    let engine = engine(&fixture);
    let session = engine.session().unwrap();
    let filter = Filter::text_prefix(Field::PlayerLastName, "K").negate();
    assert!(filter.hint(Kind::Player).is_err());
    let query = QueryBuilder::players().filter(filter).build().unwrap();
    let expected: Vec<u32> = fixture
        .players
        .iter()
        .filter(|p| !p.last_name.starts_with('K'))
        .map(|p| p.id.0)
        .collect();
    assert_eq!(ids(&session.run(&query).unwrap()), expected);
}

#[test]
fn nesting_depth_is_configurable() {
    let fixture = Fixture::generate(5, Shape::default());
    let config = EngineConfig {
        planner: PlannerConfig {
            max_nesting_depth: 1,
            ..PlannerConfig::default()
        },
        ..EngineConfig::default()
    };
    let engine = QueryEngine::new(fixture.archive.clone(), config);
    let session = engine.session().unwrap();
    let nested = QueryBuilder::players().join(
        Relation::Player,
        JoinCondition::Any,
        QueryBuilder::games().filter(Filter::results([GameResult::Draw])),
    );
    let query = QueryBuilder::games()
        .join(Relation::Player, JoinCondition::Any, nested)
        .build()
        .unwrap();
    let err = session.plan(&query).unwrap_err();
    assert_eq!(err.as_plan_error().map(|e| e.code()), Some("NestingTooDeep"));

    let shallow = QueryBuilder::games()
        .join(Relation::Tournament, JoinCondition::Any, QueryBuilder::tournaments())
        .limit(5)
        .build()
        .unwrap();
    assert_eq!(session.run(&shallow).unwrap().len(), 5);
}

#[test]
fn limit_and_trace_report_rows() {
    let fixture = Fixture::generate(9, Shape::default());
    let engine = engine(&fixture);
    let session = engine.session().unwrap();
    let query = QueryBuilder::games()
        .filter(Filter::id_range(100, 400))
        .ids_only()
        .limit(25)
        .build()
        .unwrap();
    let output = session.plan(&query).unwrap();
    assert!(matches!(output.plan.op, PhysicalOp::Limit { count: 25 }));
    let trace = ExecutionTrace::for_plan(&output.plan);
    let rows = session
        .execute_traced(&output.plan, &trace)
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(ids(&rows), (100..125).collect::<Vec<u32>>());
    assert_eq!(trace.node(0).map(|node| node.rows), Some(25));
    assert!(trace.total_records_read() <= 25);
}

#[test]
fn statistics_swap_is_atomic() {
    let fixture = Fixture::generate(13, Shape::default());
    let engine = engine(&fixture);
    let players = fixture.players.len() as u64;
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..10 {
                engine.refresh_statistics().unwrap();
            }
        });
        for _ in 0..4 {
            scope.spawn(|| {
                let mut last = 0;
                for _ in 0..200 {
                    let stats = engine.statistics();
                    assert!(stats.generation() >= last);
                    assert_eq!(stats.count(Kind::Player), players);
                    last = stats.generation();
                }
            });
        }
    });
    assert_eq!(engine.statistics().generation(), 11);
}

#[test]
fn plan_costs_ignore_execution() {
    let fixture = Fixture::generate(21, Shape::default());
    let engine = engine(&fixture);
    let session = engine.session().unwrap();
    let model: &CostModel = session.cost_model();
    let plan = PhysicalNode::manual(model, Kind::Game, (0..10).map(RecordId));
    let plan = PhysicalNode::lookup(model, plan, vec![]).unwrap();
    let before = plan.estimate_cost();
    let _ = run_plan(session.snapshot(), &plan);
    assert_eq!(plan.estimate_cost(), before);
}

/// Snapshot whose point lookups fail with an I/O error.
struct FailingLookups(Arc<ArchiveData>);

impl ArchiveSnapshot for FailingLookups {
    fn scan(&self, kind: Kind, range: IdRange) -> Result<RecordCursor<'_>> {
        self.0.scan(kind, range)
    }

    fn scan_index(
        &self,
        kind: Kind,
        lo: Option<&IndexKey>,
        hi: Option<&IndexKey>,
        direction: Direction,
    ) -> Result<RecordCursor<'_>> {
        self.0.scan_index(kind, lo, hi, direction)
    }

    fn get(&self, _kind: Kind, _id: RecordId) -> Result<Option<Record>> {
        Err(std::io::Error::new(std::io::ErrorKind::Other, "page read failed").into())
    }

    fn count(&self, kind: Kind) -> u64 {
        self.0.count(kind)
    }

    fn id_bound(&self, kind: Kind) -> u32 {
        self.0.id_bound(kind)
    }

    fn num_disk_pages(&self, kind: Kind) -> u64 {
        self.0.num_disk_pages(kind)
    }

    fn list_game_ids(&self, relation: Relation, entity: RecordId) -> Result<IdCursor<'_>> {
        self.0.list_game_ids(relation, entity)
    }
}

#[test]
fn storage_faults_propagate_unchanged() {
    let archive = MemoryArchive::new();
    archive.insert(player(1, "Tal", "Mikhail"));
    let snapshot = FailingLookups(archive.data());
    let model = CostModel::new(&snapshot, Arc::new(Statistics::empty()));
    let manual = PhysicalNode::manual(&model, Kind::Player, [RecordId(1)]);
    let plan = PhysicalNode::lookup(&model, manual, vec![]).unwrap();
    let err = plan.collect_rows(&QueryContext::new(&snapshot)).unwrap_err();
    match err {
        GambitError::Io(io) => assert_eq!(io.kind(), std::io::ErrorKind::Other),
        other => panic!("unexpected error {other}"),
    }

    let scan = PhysicalNode::table_scan(&model, Kind::Player, IdRange::all(), vec![]).unwrap();
    assert_eq!(ids(&run_plan(&snapshot, &scan)), vec![1]);
}
