//! Scalar values and the named record fields that filters and sort orders
//! project out of materialized rows.
use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Kind, Record};

/// Owned scalar used for filter literals and secondary index keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Value {
    /// Signed integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// UTF-8 string literal.
    Text(String),
}

impl Value {
    /// Borrowed view of the value.
    pub fn as_ref(&self) -> ValueRef<'_> {
        match self {
            Value::Int(v) => ValueRef::Int(*v),
            Value::Float(v) => ValueRef::Float(*v),
            Value::Text(v) => ValueRef::Text(v),
        }
    }

    /// Numeric view used by histogram estimators.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_ref().as_f64()
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v:?}"),
        }
    }
}

/// Borrowed scalar projected out of a row.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ValueRef<'a> {
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// Borrowed text.
    Text(&'a str),
}

impl ValueRef<'_> {
    /// Numeric view; text has none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ValueRef::Int(v) => Some(*v as f64),
            ValueRef::Float(v) => Some(*v),
            ValueRef::Text(_) => None,
        }
    }

    /// Text view; numbers have none.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ValueRef::Text(v) => Some(v),
            _ => None,
        }
    }
}

/// Total order over scalars: numbers before text, numbers compared as `f64`
/// (ints exactly when both sides are ints).
pub fn compare_values(a: ValueRef<'_>, b: ValueRef<'_>) -> Ordering {
    match (a, b) {
        (ValueRef::Int(x), ValueRef::Int(y)) => x.cmp(&y),
        (ValueRef::Text(x), ValueRef::Text(y)) => x.cmp(y),
        (ValueRef::Text(_), _) => Ordering::Greater,
        (_, ValueRef::Text(_)) => Ordering::Less,
        (x, y) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.total_cmp(&y)
        }
    }
}

/// Named, comparable projection of a row.
///
/// `Id` and `Weight` are available on identifier-only rows; every other
/// field requires the materialized record of its kind.
#[allow(missing_docs)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Field {
    Id,
    Weight,
    PlayerLastName,
    PlayerFirstName,
    TournamentTitle,
    TournamentYear,
    TournamentPlace,
    TournamentDate,
    TournamentCategory,
    TournamentRounds,
    AnnotatorName,
    SourceTitle,
    SourcePublisher,
    SourceDate,
    TeamTitle,
    TeamNumber,
    TeamYear,
    TeamNation,
    TagTitle,
    GameYear,
    GameWhiteElo,
    GameBlackElo,
    GameRound,
    GameEco,
    GamePlyCount,
}

impl Field {
    /// Kind whose records carry this field; `None` for row-level fields.
    pub fn kind(self) -> Option<Kind> {
        use Field::*;
        match self {
            Id | Weight => None,
            PlayerLastName | PlayerFirstName => Some(Kind::Player),
            TournamentTitle | TournamentYear | TournamentPlace | TournamentDate
            | TournamentCategory | TournamentRounds => Some(Kind::Tournament),
            AnnotatorName => Some(Kind::Annotator),
            SourceTitle | SourcePublisher | SourceDate => Some(Kind::Source),
            TeamTitle | TeamNumber | TeamYear | TeamNation => Some(Kind::Team),
            TagTitle => Some(Kind::Tag),
            GameYear | GameWhiteElo | GameBlackElo | GameRound | GameEco | GamePlyCount => {
                Some(Kind::Game)
            }
        }
    }

    /// Whether the field can be read from rows of `kind`.
    pub fn applies_to(self, kind: Kind) -> bool {
        self.kind().map_or(true, |owner| owner == kind)
    }

    /// Whether the projection needs the materialized record.
    pub fn needs_data(self) -> bool {
        self.kind().is_some()
    }

    /// Whether the field projects text.
    pub fn is_text(self) -> bool {
        use Field::*;
        matches!(
            self,
            PlayerLastName
                | PlayerFirstName
                | TournamentTitle
                | TournamentPlace
                | AnnotatorName
                | SourceTitle
                | SourcePublisher
                | TeamTitle
                | TeamNation
                | TagTitle
                | GameEco
        )
    }

    /// Name used in explain output.
    pub fn name(self) -> &'static str {
        use Field::*;
        match self {
            Id => "id",
            Weight => "weight",
            PlayerLastName => "player.last_name",
            PlayerFirstName => "player.first_name",
            TournamentTitle => "tournament.title",
            TournamentYear => "tournament.year",
            TournamentPlace => "tournament.place",
            TournamentDate => "tournament.date",
            TournamentCategory => "tournament.category",
            TournamentRounds => "tournament.rounds",
            AnnotatorName => "annotator.name",
            SourceTitle => "source.title",
            SourcePublisher => "source.publisher",
            SourceDate => "source.date",
            TeamTitle => "team.title",
            TeamNumber => "team.number",
            TeamYear => "team.year",
            TeamNation => "team.nation",
            TagTitle => "tag.title",
            GameYear => "game.year",
            GameWhiteElo => "game.white_elo",
            GameBlackElo => "game.black_elo",
            GameRound => "game.round",
            GameEco => "game.eco",
            GamePlyCount => "game.ply_count",
        }
    }

    /// Reads the field from a record. Returns `None` for row-level fields and
    /// for records of another kind.
    pub fn extract(self, record: &Record) -> Option<ValueRef<'_>> {
        use Field::*;
        let value = match (self, record) {
            (PlayerLastName, Record::Player(p)) => ValueRef::Text(&p.last_name),
            (PlayerFirstName, Record::Player(p)) => ValueRef::Text(&p.first_name),
            (TournamentTitle, Record::Tournament(t)) => ValueRef::Text(&t.title),
            (TournamentYear, Record::Tournament(t)) => ValueRef::Int(t.year as i64),
            (TournamentPlace, Record::Tournament(t)) => ValueRef::Text(&t.place),
            (TournamentDate, Record::Tournament(t)) => ValueRef::Int(t.date as i64),
            (TournamentCategory, Record::Tournament(t)) => ValueRef::Int(t.category as i64),
            (TournamentRounds, Record::Tournament(t)) => ValueRef::Int(t.rounds as i64),
            (AnnotatorName, Record::Annotator(a)) => ValueRef::Text(&a.name),
            (SourceTitle, Record::Source(s)) => ValueRef::Text(&s.title),
            (SourcePublisher, Record::Source(s)) => ValueRef::Text(&s.publisher),
            (SourceDate, Record::Source(s)) => ValueRef::Int(s.date as i64),
            (TeamTitle, Record::Team(t)) => ValueRef::Text(&t.title),
            (TeamNumber, Record::Team(t)) => ValueRef::Int(t.number as i64),
            (TeamYear, Record::Team(t)) => ValueRef::Int(t.year as i64),
            (TeamNation, Record::Team(t)) => ValueRef::Text(&t.nation),
            (TagTitle, Record::Tag(t)) => ValueRef::Text(&t.title),
            (GameYear, Record::Game(g)) => ValueRef::Int(g.year as i64),
            (GameWhiteElo, Record::Game(g)) => ValueRef::Int(g.white_elo as i64),
            (GameBlackElo, Record::Game(g)) => ValueRef::Int(g.black_elo as i64),
            (GameRound, Record::Game(g)) => ValueRef::Int(g.round as i64),
            (GameEco, Record::Game(g)) => ValueRef::Text(&g.eco),
            (GamePlyCount, Record::Game(g)) => ValueRef::Int(g.ply_count as i64),
            _ => return None,
        };
        Some(value)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Components of the secondary index maintained for `kind`, in key order.
///
/// Games have no secondary index; they are only reachable by id or through
/// the per-entity game id lists.
pub fn index_fields(kind: Kind) -> &'static [Field] {
    match kind {
        Kind::Game => &[],
        Kind::Player => &[Field::PlayerLastName, Field::PlayerFirstName],
        Kind::Tournament => &[
            Field::TournamentYear,
            Field::TournamentTitle,
            Field::TournamentPlace,
            Field::TournamentDate,
        ],
        Kind::Annotator => &[Field::AnnotatorName],
        Kind::Source => &[Field::SourceTitle, Field::SourceDate],
        Kind::Team => &[Field::TeamTitle, Field::TeamNumber],
        Kind::Tag => &[Field::TagTitle],
    }
}

/// Possibly partial key of a secondary index; compared component-wise
/// against the leading components of a record's full key.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct IndexKey(pub Vec<Value>);

impl IndexKey {
    /// Key from leading component values.
    pub fn new(values: impl IntoIterator<Item = Value>) -> Self {
        IndexKey(values.into_iter().collect())
    }

    /// Full index key of `record` in its kind's secondary index.
    pub fn of(record: &Record) -> Self {
        let fields = index_fields(record.kind());
        IndexKey(
            fields
                .iter()
                .filter_map(|field| field.extract(record))
                .map(|value| match value {
                    ValueRef::Int(v) => Value::Int(v),
                    ValueRef::Float(v) => Value::Float(v),
                    ValueRef::Text(v) => Value::Text(v.to_owned()),
                })
                .collect(),
        )
    }

    /// Whether the key has no components.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compares the leading `bound.len()` components of this (full) key with
    /// the partial key `bound`.
    pub fn prefix_cmp(&self, bound: &IndexKey) -> Ordering {
        for (bound, value) in bound.0.iter().zip(self.0.iter()) {
            match compare_values(value.as_ref(), bound.as_ref()) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    /// Full lexicographic comparison used to keep index entries sorted.
    pub fn compare(&self, other: &IndexKey) -> Ordering {
        for (a, b) in self.0.iter().zip(other.0.iter()) {
            match compare_values(a.as_ref(), b.as_ref()) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        self.0.len().cmp(&other.0.len())
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Player;
    use crate::types::RecordId;

    fn player(last: &str, first: &str) -> Record {
        Record::from(Player {
            id: RecordId(1),
            last_name: last.into(),
            first_name: first.into(),
        })
    }

    #[test]
    fn prefix_compare_uses_leading_components_only() {
        let full = IndexKey::of(&player("Carlsen", "Magnus"));
        let bound = IndexKey::new([Value::from("Carlsen")]);
        assert_eq!(full.prefix_cmp(&bound), Ordering::Equal);
        let lower = IndexKey::new([Value::from("Ca")]);
        assert_eq!(full.prefix_cmp(&lower), Ordering::Greater);
        let upper = IndexKey::new([Value::from("Cz")]);
        assert_eq!(full.prefix_cmp(&upper), Ordering::Less);
    }

    #[test]
    fn numbers_sort_before_text() {
        assert_eq!(
            compare_values(ValueRef::Int(5), ValueRef::Text("a")),
            Ordering::Less
        );
        assert_eq!(
            compare_values(ValueRef::Int(2), ValueRef::Float(1.5)),
            Ordering::Greater
        );
    }

    #[test]
    fn fields_report_owning_kind() {
        assert_eq!(Field::PlayerLastName.kind(), Some(Kind::Player));
        assert!(Field::Id.applies_to(Kind::Tag));
        assert!(!Field::GameYear.applies_to(Kind::Player));
        assert_eq!(
            Field::PlayerLastName.extract(&player("Tal", "Mikhail")),
            Some(ValueRef::Text("Tal"))
        );
    }
}
