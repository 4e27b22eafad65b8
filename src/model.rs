//! Records stored in the archive: games and the reference entities they point at.

use std::fmt;
use std::sync::Arc;

use crate::types::RecordId;

/// Collection a record belongs to.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Kind {
    /// Games, the fact collection.
    Game,
    /// Players, referenced from both sides of a game.
    Player,
    /// Tournaments and matches.
    Tournament,
    /// Annotators of commented games.
    Annotator,
    /// Sources a game was taken from.
    Source,
    /// Teams, referenced from both sides of a team game.
    Team,
    /// Free-form tags.
    Tag,
}

impl Kind {
    /// Every collection, games first.
    pub const ALL: [Kind; 7] = [
        Kind::Game,
        Kind::Player,
        Kind::Tournament,
        Kind::Annotator,
        Kind::Source,
        Kind::Team,
        Kind::Tag,
    ];

    /// Lower-case collection name used in explain output and logs.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Game => "game",
            Kind::Player => "player",
            Kind::Tournament => "tournament",
            Kind::Annotator => "annotator",
            Kind::Source => "source",
            Kind::Team => "team",
            Kind::Tag => "tag",
        }
    }

    /// Dense position of the kind, usable as an array index.
    pub fn ordinal(self) -> usize {
        self as usize
    }

    /// Relation a game uses to reference this kind, `None` for games.
    pub fn relation(self) -> Option<Relation> {
        match self {
            Kind::Game => None,
            Kind::Player => Some(Relation::Player),
            Kind::Tournament => Some(Relation::Tournament),
            Kind::Annotator => Some(Relation::Annotator),
            Kind::Source => Some(Relation::Source),
            Kind::Team => Some(Relation::Team),
            Kind::Tag => Some(Relation::Tag),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Reference from a game to an entity collection.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Relation {
    /// `white_id` and `black_id`.
    Player,
    /// `tournament_id`.
    Tournament,
    /// `annotator_id`.
    Annotator,
    /// `source_id`.
    Source,
    /// `white_team_id` and `black_team_id`, both optional.
    Team,
    /// `tag_id`, optional.
    Tag,
}

impl Relation {
    /// Collection on the entity side of the reference.
    pub fn entity_kind(self) -> Kind {
        match self {
            Relation::Player => Kind::Player,
            Relation::Tournament => Kind::Tournament,
            Relation::Annotator => Kind::Annotator,
            Relation::Source => Kind::Source,
            Relation::Team => Kind::Team,
            Relation::Tag => Kind::Tag,
        }
    }

    /// Whether games reference this kind once per side (white and black).
    pub fn is_two_sided(self) -> bool {
        matches!(self, Relation::Player | Relation::Team)
    }

    /// Entity ids referenced by `game` as `(white, black)`.
    ///
    /// One-sided relations report their single reference in the first slot.
    pub fn refs(self, game: &Game) -> (Option<RecordId>, Option<RecordId>) {
        match self {
            Relation::Player => (Some(game.white_id), Some(game.black_id)),
            Relation::Team => (game.white_team_id, game.black_team_id),
            Relation::Tournament => (Some(game.tournament_id), None),
            Relation::Annotator => (Some(game.annotator_id), None),
            Relation::Source => (Some(game.source_id), None),
            Relation::Tag => (game.tag_id, None),
        }
    }

    /// Name of the referenced collection.
    pub fn name(self) -> &'static str {
        self.entity_kind().name()
    }
}

/// Outcome recorded for a game.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum GameResult {
    /// White won over the board.
    WhiteWins,
    /// Black won over the board.
    BlackWins,
    /// Drawn game.
    Draw,
    /// White scored the point without play.
    WhiteWinsOnForfeit,
    /// Black scored the point without play.
    BlackWinsOnForfeit,
    /// Both sides were scored as losing.
    BothLost,
    /// Unfinished or unknown.
    NoResult,
}

impl GameResult {
    /// Short PGN-like notation.
    pub fn notation(self) -> &'static str {
        match self {
            GameResult::WhiteWins => "1-0",
            GameResult::BlackWins => "0-1",
            GameResult::Draw => "1/2",
            GameResult::WhiteWinsOnForfeit => "+:-",
            GameResult::BlackWinsOnForfeit => "-:+",
            GameResult::BothLost => "0-0",
            GameResult::NoResult => "*",
        }
    }
}

/// A player, indexed by last name.
#[derive(Clone, Debug, PartialEq)]
pub struct Player {
    /// Record id.
    pub id: RecordId,
    /// Last name; leading secondary index key.
    pub last_name: String,
    /// First name.
    pub first_name: String,
}

/// A tournament, indexed by title.
#[derive(Clone, Debug, PartialEq)]
pub struct Tournament {
    /// Record id.
    pub id: RecordId,
    /// Title; leading secondary index key.
    pub title: String,
    /// Year the tournament was held.
    pub year: i32,
    /// Venue.
    pub place: String,
    /// Start date encoded as `yyyymmdd`, 0 when unknown.
    pub date: i32,
    /// FIDE category, 0 when unrated.
    pub category: i32,
    /// Number of rounds.
    pub rounds: i32,
}

/// An annotator, indexed by name.
#[derive(Clone, Debug, PartialEq)]
pub struct Annotator {
    /// Record id.
    pub id: RecordId,
    /// Name; leading secondary index key.
    pub name: String,
}

/// A source, indexed by title.
#[derive(Clone, Debug, PartialEq)]
pub struct Source {
    /// Record id.
    pub id: RecordId,
    /// Title; leading secondary index key.
    pub title: String,
    /// Publisher.
    pub publisher: String,
    /// Publication date encoded as `yyyymmdd`, 0 when unknown.
    pub date: i32,
}

/// A team, indexed by title.
#[derive(Clone, Debug, PartialEq)]
pub struct Team {
    /// Record id.
    pub id: RecordId,
    /// Title; leading secondary index key.
    pub title: String,
    /// Team number within its club.
    pub number: i32,
    /// Season year.
    pub year: i32,
    /// Nation code.
    pub nation: String,
}

/// A tag, indexed by title.
#[derive(Clone, Debug, PartialEq)]
pub struct Tag {
    /// Record id.
    pub id: RecordId,
    /// Title; leading secondary index key.
    pub title: String,
}

/// A game header with its references to the entity collections.
#[derive(Clone, Debug, PartialEq)]
pub struct Game {
    /// Record id.
    pub id: RecordId,
    /// Player with the white pieces.
    pub white_id: RecordId,
    /// Player with the black pieces.
    pub black_id: RecordId,
    /// White's rating, 0 when unknown.
    pub white_elo: i32,
    /// Black's rating, 0 when unknown.
    pub black_elo: i32,
    /// Recorded outcome.
    pub result: GameResult,
    /// Tournament the game was played in.
    pub tournament_id: RecordId,
    /// Annotator of the game.
    pub annotator_id: RecordId,
    /// Source the game was taken from.
    pub source_id: RecordId,
    /// White's team, for team games.
    pub white_team_id: Option<RecordId>,
    /// Black's team, for team games.
    pub black_team_id: Option<RecordId>,
    /// Optional tag.
    pub tag_id: Option<RecordId>,
    /// Year played.
    pub year: i32,
    /// Round within the tournament.
    pub round: i32,
    /// ECO opening code.
    pub eco: String,
    /// Number of half-moves.
    pub ply_count: i32,
}

/// A materialized record of any kind.
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum Record {
    Game(Arc<Game>),
    Player(Arc<Player>),
    Tournament(Arc<Tournament>),
    Annotator(Arc<Annotator>),
    Source(Arc<Source>),
    Team(Arc<Team>),
    Tag(Arc<Tag>),
}

impl Record {
    /// Id of the record within its collection.
    pub fn id(&self) -> RecordId {
        match self {
            Record::Game(r) => r.id,
            Record::Player(r) => r.id,
            Record::Tournament(r) => r.id,
            Record::Annotator(r) => r.id,
            Record::Source(r) => r.id,
            Record::Team(r) => r.id,
            Record::Tag(r) => r.id,
        }
    }

    /// Collection the record belongs to.
    pub fn kind(&self) -> Kind {
        match self {
            Record::Game(_) => Kind::Game,
            Record::Player(_) => Kind::Player,
            Record::Tournament(_) => Kind::Tournament,
            Record::Annotator(_) => Kind::Annotator,
            Record::Source(_) => Kind::Source,
            Record::Team(_) => Kind::Team,
            Record::Tag(_) => Kind::Tag,
        }
    }

    /// Returns the game when this record is one.
    pub fn as_game(&self) -> Option<&Game> {
        match self {
            Record::Game(game) => Some(game),
            _ => None,
        }
    }
}

impl From<Game> for Record {
    fn from(value: Game) -> Self {
        Record::Game(Arc::new(value))
    }
}

impl From<Player> for Record {
    fn from(value: Player) -> Self {
        Record::Player(Arc::new(value))
    }
}

impl From<Tournament> for Record {
    fn from(value: Tournament) -> Self {
        Record::Tournament(Arc::new(value))
    }
}

impl From<Annotator> for Record {
    fn from(value: Annotator) -> Self {
        Record::Annotator(Arc::new(value))
    }
}

impl From<Source> for Record {
    fn from(value: Source) -> Self {
        Record::Source(Arc::new(value))
    }
}

impl From<Team> for Record {
    fn from(value: Team) -> Self {
        Record::Team(Arc::new(value))
    }
}

impl From<Tag> for Record {
    fn from(value: Tag) -> Self {
        Record::Tag(Arc::new(value))
    }
}
