#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::{Arc, Once};

use gambit::model::{Game, GameResult, Player, Tournament};
use gambit::{MemoryArchive, RecordId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

const LAST_NAMES: &[&str] = &[
    "Alekhine", "Anand", "Botvinnik", "Capablanca", "Carlsen", "Caruana", "Euwe", "Fischer",
    "Gelfand", "Ivanchuk", "Karpov", "Kasparov", "Kramnik", "Lasker", "Morphy", "Nakamura",
    "Petrosian", "Polgar", "Smyslov", "Spassky", "Steinitz", "Tal", "Topalov", "Xie",
];

const FIRST_NAMES: &[&str] = &["Alexander", "Boris", "Judit", "Magnus", "Mikhail", "Vera"];

const RESULTS: &[GameResult] = &[
    GameResult::WhiteWins,
    GameResult::BlackWins,
    GameResult::Draw,
    GameResult::Draw,
    GameResult::WhiteWinsOnForfeit,
    GameResult::NoResult,
];

pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

/// Sizes of a generated archive.
#[derive(Clone, Copy, Debug)]
pub struct Shape {
    pub players: u32,
    pub tournaments: u32,
    pub games: u32,
}

impl Default for Shape {
    fn default() -> Self {
        Self {
            players: 200,
            tournaments: 40,
            games: 1_500,
        }
    }
}

/// Deterministic archive of players, tournaments and the games between them.
pub struct Fixture {
    pub archive: Arc<MemoryArchive>,
    pub players: Vec<Player>,
    pub tournaments: Vec<Tournament>,
    pub games: Vec<Game>,
}

impl Fixture {
    pub fn generate(seed: u64, shape: Shape) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let players: Vec<Player> = (0..shape.players)
            .map(|id| Player {
                id: RecordId(id),
                last_name: LAST_NAMES[rng.gen_range(0..LAST_NAMES.len())].to_string(),
                first_name: FIRST_NAMES[rng.gen_range(0..FIRST_NAMES.len())].to_string(),
            })
            .collect();
        let tournaments: Vec<Tournament> = (0..shape.tournaments)
            .map(|id| Tournament {
                id: RecordId(id),
                title: format!("Open {id}"),
                year: 1960 + (id % 30) as i32,
                place: "Reykjavik".to_string(),
                date: 0,
                category: rng.gen_range(1..20),
                rounds: 9,
            })
            .collect();
        let games: Vec<Game> = (0..shape.games)
            .map(|id| {
                let white = rng.gen_range(0..shape.players);
                let black = rng.gen_range(0..shape.players);
                let tournament = rng.gen_range(0..shape.tournaments);
                Game {
                    id: RecordId(id),
                    white_id: RecordId(white),
                    black_id: RecordId(black),
                    white_elo: rng.gen_range(2000..2800),
                    black_elo: rng.gen_range(2000..2800),
                    result: RESULTS[rng.gen_range(0..RESULTS.len())],
                    tournament_id: RecordId(tournament),
                    annotator_id: RecordId(0),
                    source_id: RecordId(0),
                    white_team_id: None,
                    black_team_id: None,
                    tag_id: None,
                    year: tournaments[tournament as usize].year,
                    round: rng.gen_range(1..10),
                    eco: format!("B{:02}", rng.gen_range(0..100)),
                    ply_count: rng.gen_range(20..160),
                }
            })
            .collect();
        let archive = Arc::new(MemoryArchive::new());
        archive.extend(players.iter().cloned());
        archive.extend(tournaments.iter().cloned());
        archive.extend(games.iter().cloned());
        Self {
            archive,
            players,
            tournaments,
            games,
        }
    }

    pub fn player(&self, id: RecordId) -> Option<&Player> {
        self.players.get(id.0 as usize)
    }
}

/// Game with default references, for hand-built scenarios.
pub fn game(id: u32, white: u32, black: u32, result: GameResult) -> Game {
    Game {
        id: RecordId(id),
        white_id: RecordId(white),
        black_id: RecordId(black),
        white_elo: 2500,
        black_elo: 2500,
        result,
        tournament_id: RecordId(0),
        annotator_id: RecordId(0),
        source_id: RecordId(0),
        white_team_id: None,
        black_team_id: None,
        tag_id: None,
        year: 2000,
        round: 1,
        eco: "A00".into(),
        ply_count: 40,
    }
}

pub fn player(id: u32, last: &str, first: &str) -> Player {
    Player {
        id: RecordId(id),
        last_name: last.into(),
        first_name: first.into(),
    }
}
