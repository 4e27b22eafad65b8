#![forbid(unsafe_code)]

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gambit::model::{Game, GameResult, Player, Tournament};
use gambit::{
    Direction, EngineConfig, Field, Filter, JoinCondition, MemoryArchive, QueryBuilder,
    QueryEngine, RecordId, Relation, SortOrder,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const PLAYERS: u32 = 2_000;
const TOURNAMENTS: u32 = 200;
const GAMES: u32 = 20_000;

fn archive() -> Arc<MemoryArchive> {
    let mut rng = ChaCha8Rng::seed_from_u64(0xC0FFEE);
    let archive = Arc::new(MemoryArchive::new());
    archive.extend((0..PLAYERS).map(|id| Player {
        id: RecordId(id),
        last_name: format!("{}{:04}", (b'A' + rng.gen_range(0..26u8)) as char, id),
        first_name: String::new(),
    }));
    archive.extend((0..TOURNAMENTS).map(|id| Tournament {
        id: RecordId(id),
        title: format!("Tournament {id}"),
        year: 1950 + (id % 70) as i32,
        place: String::new(),
        date: 0,
        category: 10,
        rounds: 9,
    }));
    let games: Vec<Game> = (0..GAMES)
        .map(|id| Game {
            id: RecordId(id),
            white_id: RecordId(rng.gen_range(0..PLAYERS)),
            black_id: RecordId(rng.gen_range(0..PLAYERS)),
            white_elo: rng.gen_range(1800..2800),
            black_elo: rng.gen_range(1800..2800),
            result: GameResult::Draw,
            tournament_id: RecordId(rng.gen_range(0..TOURNAMENTS)),
            annotator_id: RecordId(0),
            source_id: RecordId(0),
            white_team_id: None,
            black_team_id: None,
            tag_id: None,
            year: 1950 + (id % 70) as i32,
            round: 1,
            eco: "E60".into(),
            ply_count: 80,
        })
        .collect();
    archive.extend(games);
    archive
}

fn planner(c: &mut Criterion) {
    let engine = QueryEngine::open(archive(), EngineConfig::default()).expect("engine");
    let session = engine.session().expect("session");
    let name_range = QueryBuilder::players()
        .filter(Filter::text_range(Field::PlayerLastName, Some("C"), Some("F")))
        .sort_by(SortOrder::player_name(Direction::Ascending))
        .build()
        .expect("query");
    let games_of_year = QueryBuilder::games()
        .join(
            Relation::Tournament,
            JoinCondition::Any,
            QueryBuilder::tournaments().filter(Filter::int_eq(Field::TournamentYear, 1972)),
        )
        .join(
            Relation::Player,
            JoinCondition::Winner,
            QueryBuilder::players().filter(Filter::text_prefix(Field::PlayerLastName, "K")),
        )
        .build()
        .expect("query");

    let mut group = c.benchmark_group("planner");
    group.sample_size(40);
    group.bench_function("plan/name_range", |b| {
        b.iter(|| black_box(session.plan(&name_range).expect("plan")));
    });
    group.bench_function("plan/two_joins", |b| {
        b.iter(|| black_box(session.plan(&games_of_year).expect("plan")));
    });
    group.bench_function("run/two_joins", |b| {
        b.iter(|| black_box(session.run(&games_of_year).expect("run").len()));
    });
    group.finish();
}

criterion_group!(benches, planner);
criterion_main!(benches);
