//! Row predicates, the source hints they offer the planner, and their
//! selectivity estimates.

use std::collections::BTreeSet;
use std::fmt;

use crate::model::{GameResult, Kind, Record};
use crate::query::errors::PlanError;
use crate::query::executor::QueryData;
use crate::query::stats::{
    clamp_selectivity, Statistics, DEFAULT_EQ_SELECTIVITY, DEFAULT_FILTER_SELECTIVITY,
    DEFAULT_RANGE_SELECTIVITY,
};
use crate::query::value::{index_fields, Field, IndexKey, Value, ValueRef};
use crate::storage::{IdRange, IdSpace};
use crate::types::RecordId;

/// Share of each result among archived games, used in place of statistics.
fn result_share(result: GameResult) -> f64 {
    match result {
        GameResult::WhiteWins => 0.37,
        GameResult::BlackWins => 0.28,
        GameResult::Draw => 0.32,
        GameResult::WhiteWinsOnForfeit => 0.006,
        GameResult::BlackWinsOnForfeit => 0.004,
        GameResult::BothLost => 0.001,
        GameResult::NoResult => 0.019,
    }
}

/// Predicate over a single row.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Row id belongs to the set.
    Ids(BTreeSet<RecordId>),
    /// Row id lies in the half-open range.
    IdRange(IdRange),
    /// Text field within inclusive bounds; `None` leaves a side open.
    TextRange {
        /// Text field compared.
        field: Field,
        /// Inclusive lower bound.
        lo: Option<String>,
        /// Inclusive upper bound.
        hi: Option<String>,
    },
    /// Text field equals `value`.
    TextEq {
        /// Text field compared.
        field: Field,
        /// Required value.
        value: String,
    },
    /// Text field starts with `prefix`.
    TextPrefix {
        /// Text field compared.
        field: Field,
        /// Required prefix.
        prefix: String,
    },
    /// Integer field within `[lo, hi]`.
    IntRange {
        /// Integer field compared.
        field: Field,
        /// Inclusive lower bound.
        lo: i64,
        /// Inclusive upper bound.
        hi: i64,
    },
    /// Game result is one of the listed outcomes.
    Results(Vec<GameResult>),
    /// Inner filter does not hold.
    Not(Box<Filter>),
}

/// How a filter can seed a row source.
#[derive(Clone, Debug, PartialEq)]
pub enum SourceHint {
    /// Fixed id set, served without touching storage.
    Ids(BTreeSet<RecordId>),
    /// Id range, served by a table scan.
    IdRange(IdRange),
    /// Bounds on the first secondary index component.
    ///
    /// When `exact` is false the bounds cover a superset of the matching
    /// keys and the predicate has to be re-applied to the scanned rows.
    KeyRange {
        /// Inclusive lower key; `None` is unbounded.
        lo: Option<IndexKey>,
        /// Exclusive upper key; `None` is unbounded.
        hi: Option<IndexKey>,
        /// Whether every key in the bounds matches.
        exact: bool,
    },
}

impl Filter {
    /// Row id is one of `ids`.
    pub fn ids(ids: impl IntoIterator<Item = impl Into<RecordId>>) -> Self {
        Filter::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Row id lies in `[start, end)`.
    pub fn id_range(start: u32, end: u32) -> Self {
        Filter::IdRange(IdRange::new(start, end))
    }

    /// Text field within inclusive bounds.
    pub fn text_range(field: Field, lo: Option<&str>, hi: Option<&str>) -> Self {
        Filter::TextRange {
            field,
            lo: lo.map(str::to_owned),
            hi: hi.map(str::to_owned),
        }
    }

    /// Text field equals `value`.
    pub fn text_eq(field: Field, value: impl Into<String>) -> Self {
        Filter::TextEq {
            field,
            value: value.into(),
        }
    }

    /// Text field starts with `prefix`.
    pub fn text_prefix(field: Field, prefix: impl Into<String>) -> Self {
        Filter::TextPrefix {
            field,
            prefix: prefix.into(),
        }
    }

    /// Integer field within `[lo, hi]`.
    pub fn int_range(field: Field, lo: i64, hi: i64) -> Self {
        Filter::IntRange { field, lo, hi }
    }

    /// `field == value` on an integer field.
    pub fn int_eq(field: Field, value: i64) -> Self {
        Filter::IntRange {
            field,
            lo: value,
            hi: value,
        }
    }

    /// Game result is one of `results`.
    pub fn results(results: impl IntoIterator<Item = GameResult>) -> Self {
        Filter::Results(results.into_iter().collect())
    }

    /// Logical negation; a double negation unwraps.
    pub fn negate(self) -> Self {
        match self {
            Filter::Not(inner) => *inner,
            other => Filter::Not(Box::new(other)),
        }
    }

    /// Field the predicate reads, if it reads one.
    pub fn field(&self) -> Option<Field> {
        match self {
            Filter::TextRange { field, .. }
            | Filter::TextEq { field, .. }
            | Filter::TextPrefix { field, .. }
            | Filter::IntRange { field, .. } => Some(*field),
            Filter::Not(inner) => inner.field(),
            Filter::Ids(_) | Filter::IdRange(_) | Filter::Results(_) => None,
        }
    }

    /// Checks that the predicate can be evaluated on rows of `kind`.
    pub fn validate(&self, kind: Kind) -> Result<(), PlanError> {
        match self {
            Filter::Ids(_) | Filter::IdRange(_) => Ok(()),
            Filter::TextRange { field, .. }
            | Filter::TextEq { field, .. }
            | Filter::TextPrefix { field, .. } => {
                check_field(*field, kind)?;
                if !field.is_text() {
                    return Err(PlanError::FieldTypeMismatch {
                        field: *field,
                        context: "a text predicate",
                    });
                }
                Ok(())
            }
            Filter::IntRange { field, .. } => {
                check_field(*field, kind)?;
                if field.is_text() || !field.needs_data() {
                    return Err(PlanError::FieldTypeMismatch {
                        field: *field,
                        context: "an integer range",
                    });
                }
                Ok(())
            }
            Filter::Results(_) if kind == Kind::Game => Ok(()),
            Filter::Results(_) => Err(PlanError::kind_mismatch(Kind::Game, kind, "result filter")),
            Filter::Not(inner) => inner.validate(kind),
        }
    }

    /// Whether evaluation reads the materialized record.
    pub fn needs_data(&self) -> bool {
        match self {
            Filter::Ids(_) | Filter::IdRange(_) => false,
            Filter::Not(inner) => inner.needs_data(),
            _ => true,
        }
    }

    /// Evaluates the predicate. Rows lacking the data a predicate reads do
    /// not match.
    pub fn matches(&self, row: &QueryData) -> bool {
        match self {
            Filter::Ids(ids) => ids.contains(&row.id),
            Filter::IdRange(range) => range.contains(row.id),
            Filter::Not(inner) => {
                if inner.needs_data() && row.data.is_none() {
                    return false;
                }
                !inner.matches(row)
            }
            other => row.data.as_ref().is_some_and(|record| other.matches_record(record)),
        }
    }

    fn matches_record(&self, record: &Record) -> bool {
        match self {
            Filter::Ids(ids) => ids.contains(&record.id()),
            Filter::IdRange(range) => range.contains(record.id()),
            Filter::TextRange { field, lo, hi } => text_of(*field, record).is_some_and(|text| {
                lo.as_deref().map_or(true, |lo| text >= lo)
                    && hi.as_deref().map_or(true, |hi| text <= hi)
            }),
            Filter::TextEq { field, value } => text_of(*field, record) == Some(value.as_str()),
            Filter::TextPrefix { field, prefix } => {
                text_of(*field, record).is_some_and(|text| text.starts_with(prefix.as_str()))
            }
            Filter::IntRange { field, lo, hi } => field
                .extract(record)
                .and_then(|value| value.as_f64())
                .is_some_and(|value| value >= *lo as f64 && value <= *hi as f64),
            Filter::Results(results) => record
                .as_game()
                .is_some_and(|game| results.contains(&game.result)),
            Filter::Not(inner) => !inner.matches_record(record),
        }
    }

    /// Whether the predicate can seed a source on `kind`.
    pub fn can_seed(&self, kind: Kind) -> bool {
        matches!(self.hint(kind), Ok(Some(_)))
    }

    /// Source this predicate can seed on `kind`, if any.
    ///
    /// Negations have no bounded row set and fail with `UnsupportedSource`.
    pub fn hint(&self, kind: Kind) -> Result<Option<SourceHint>, PlanError> {
        let leading = index_fields(kind).first().copied();
        let on_index = |field: &Field| leading == Some(*field);
        let hint = match self {
            Filter::Not(_) => return Err(PlanError::UnsupportedSource("negated filter")),
            Filter::Ids(ids) => Some(SourceHint::Ids(ids.clone())),
            Filter::IdRange(range) => Some(SourceHint::IdRange(*range)),
            Filter::TextRange { field, lo, hi } if on_index(field) => Some(SourceHint::KeyRange {
                lo: lo.as_ref().map(|lo| text_key(lo.clone())),
                hi: hi.as_ref().map(|hi| text_key(hi.clone())),
                exact: true,
            }),
            Filter::TextEq { field, value } if on_index(field) => Some(SourceHint::KeyRange {
                lo: Some(text_key(value.clone())),
                hi: Some(text_key(value.clone())),
                exact: true,
            }),
            Filter::TextPrefix { field, prefix } if on_index(field) => Some(SourceHint::KeyRange {
                lo: Some(text_key(prefix.clone())),
                hi: prefix_successor(prefix).map(text_key),
                exact: false,
            }),
            Filter::IntRange { field, lo, hi } if on_index(field) => Some(SourceHint::KeyRange {
                lo: Some(IndexKey::new([Value::Int(*lo)])),
                hi: Some(IndexKey::new([Value::Int(*hi)])),
                exact: true,
            }),
            _ => None,
        };
        Ok(hint)
    }

    /// Estimated fraction of the rows of `kind`, spread over `space`,
    /// passing the predicate.
    ///
    /// Missing statistics fall back to the default estimates; the result is
    /// always within `[MIN_SELECTIVITY, 1]`.
    pub fn selectivity(&self, kind: Kind, stats: &Statistics, space: IdSpace) -> f64 {
        let count_f = space.count.max(1) as f64;
        let raw = match self {
            Filter::Ids(ids) => ids.len() as f64 / count_f,
            Filter::IdRange(range) => space.range_fraction(range),
            Filter::TextRange { field, lo, hi } => match stats.key_distribution(*field) {
                Some(dist) => dist.ratio_between(lo.as_deref(), hi.as_deref()),
                None => DEFAULT_RANGE_SELECTIVITY,
            },
            Filter::TextEq { field, value } => match stats.key_distribution(*field) {
                Some(dist) => dist
                    .ratio_between(Some(value.as_str()), Some(value.as_str()))
                    .max(1.0 / count_f),
                None => DEFAULT_EQ_SELECTIVITY,
            },
            Filter::TextPrefix { field, prefix } => match stats.key_distribution(*field) {
                Some(dist) => {
                    let upper = prefix_successor(prefix);
                    dist.ratio_between(Some(prefix.as_str()), upper.as_deref())
                }
                None => DEFAULT_RANGE_SELECTIVITY,
            },
            Filter::IntRange { field, lo, hi } => match stats.numeric_distribution(*field) {
                Some(dist) => dist.ratio_between(*lo, *hi),
                None if lo == hi => DEFAULT_EQ_SELECTIVITY,
                None => DEFAULT_RANGE_SELECTIVITY,
            },
            Filter::Results(results) if kind == Kind::Game => {
                let mut distinct = results.clone();
                distinct.sort_by_key(|r| *r as u8);
                distinct.dedup();
                distinct.into_iter().map(result_share).sum()
            }
            Filter::Results(_) => DEFAULT_FILTER_SELECTIVITY,
            Filter::Not(inner) => 1.0 - inner.selectivity(kind, stats, space),
        };
        clamp_selectivity(raw)
    }
}

/// Combined selectivity of AND-ed predicates under the independence
/// assumption.
pub fn conjunction_selectivity<'a>(
    filters: impl IntoIterator<Item = &'a Filter>,
    kind: Kind,
    stats: &Statistics,
    space: IdSpace,
) -> f64 {
    clamp_selectivity(
        filters
            .into_iter()
            .map(|filter| filter.selectivity(kind, stats, space))
            .product(),
    )
}

/// Evaluates AND-ed predicates.
pub fn matches_all(filters: &[Filter], row: &QueryData) -> bool {
    filters.iter().all(|filter| filter.matches(row))
}

fn check_field(field: Field, kind: Kind) -> Result<(), PlanError> {
    if field.applies_to(kind) {
        Ok(())
    } else {
        Err(PlanError::FieldNotInKind { field, kind })
    }
}

fn text_of(field: Field, record: &Record) -> Option<&str> {
    match field.extract(record)? {
        ValueRef::Text(text) => Some(text),
        _ => None,
    }
}

fn text_key(text: String) -> IndexKey {
    IndexKey::new([Value::Text(text)])
}

/// Smallest string greater than every extension of `prefix`, or `None` when
/// no such string exists.
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        let next = match last {
            '\u{D7FF}' => Some('\u{E000}'),
            c => char::from_u32(u32::from(c) + 1),
        };
        if let Some(next) = next {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Ids(ids) => {
                let shown: Vec<String> = ids.iter().take(8).map(|id| id.to_string()).collect();
                if ids.len() > 8 {
                    write!(f, "id in {{{}, … +{}}}", shown.join(", "), ids.len() - 8)
                } else {
                    write!(f, "id in {{{}}}", shown.join(", "))
                }
            }
            Filter::IdRange(range) => write!(f, "id in {range}"),
            Filter::TextRange { field, lo, hi } => write!(
                f,
                "{field} between {} and {}",
                lo.as_deref().map_or("-inf".to_string(), |v| format!("{v:?}")),
                hi.as_deref().map_or("+inf".to_string(), |v| format!("{v:?}")),
            ),
            Filter::TextEq { field, value } => write!(f, "{field} = {value:?}"),
            Filter::TextPrefix { field, prefix } => write!(f, "{field} starts with {prefix:?}"),
            Filter::IntRange { field, lo, hi } if lo == hi => write!(f, "{field} = {lo}"),
            Filter::IntRange { field, lo, hi } => write!(f, "{field} in [{lo}, {hi}]"),
            Filter::Results(results) => {
                let shown: Vec<&str> = results.iter().map(|r| r.notation()).collect();
                write!(f, "result in {{{}}}", shown.join(", "))
            }
            Filter::Not(inner) => write!(f, "not ({inner})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Player;
    use crate::query::stats::MIN_SELECTIVITY;

    fn row(last: &str) -> QueryData {
        QueryData::with_data(Record::from(Player {
            id: RecordId(4),
            last_name: last.into(),
            first_name: "X".into(),
        }))
    }

    #[test]
    fn text_filters_match_materialized_rows() {
        let carlsen = row("Carlsen");
        assert!(Filter::text_range(Field::PlayerLastName, Some("Ca"), Some("Cz")).matches(&carlsen));
        assert!(Filter::text_prefix(Field::PlayerLastName, "Car").matches(&carlsen));
        assert!(!Filter::text_eq(Field::PlayerLastName, "Carl").matches(&carlsen));
        assert!(Filter::text_eq(Field::PlayerLastName, "Carl")
            .negate()
            .matches(&carlsen));
        assert!(!Filter::text_prefix(Field::PlayerLastName, "Car").matches(&QueryData::new(RecordId(4))));
    }

    #[test]
    fn negation_cannot_seed_a_source() {
        let filter = Filter::ids([1u32]).negate();
        assert_eq!(
            filter.hint(Kind::Player),
            Err(PlanError::UnsupportedSource("negated filter"))
        );
        assert!(!filter.can_seed(Kind::Player));
    }

    #[test]
    fn only_leading_index_field_offers_key_range() {
        let last = Filter::text_prefix(Field::PlayerLastName, "Ca");
        match last.hint(Kind::Player).unwrap() {
            Some(SourceHint::KeyRange { lo, hi, exact }) => {
                assert_eq!(lo, Some(IndexKey::new([Value::from("Ca")])));
                assert_eq!(hi, Some(IndexKey::new([Value::from("Cb")])));
                assert!(!exact);
            }
            other => panic!("unexpected hint {other:?}"),
        }
        let first = Filter::text_eq(Field::PlayerFirstName, "Magnus");
        assert_eq!(first.hint(Kind::Player), Ok(None));
        let year = Filter::int_eq(Field::TournamentYear, 1972);
        assert!(year.can_seed(Kind::Tournament));
    }

    #[test]
    fn prefix_successor_skips_exhausted_positions() {
        assert_eq!(prefix_successor("Ca").as_deref(), Some("Cb"));
        assert_eq!(prefix_successor("a\u{10FFFF}").as_deref(), Some("b"));
        assert_eq!(prefix_successor("\u{D7FF}").as_deref(), Some("\u{E000}"));
        assert_eq!(prefix_successor("\u{10FFFF}"), None);
        assert_eq!(prefix_successor(""), None);
    }

    #[test]
    fn validation_rejects_foreign_fields() {
        let filter = Filter::int_eq(Field::GameYear, 1990);
        assert_eq!(
            filter.validate(Kind::Player),
            Err(PlanError::FieldNotInKind {
                field: Field::GameYear,
                kind: Kind::Player
            })
        );
        assert!(Filter::results([GameResult::Draw]).validate(Kind::Player).is_err());
        assert!(Filter::int_eq(Field::PlayerLastName, 3).validate(Kind::Player).is_err());
    }

    #[test]
    fn selectivity_defaults_without_statistics() {
        let stats = Statistics::empty();
        let eq = Filter::text_eq(Field::PlayerLastName, "Tal").selectivity(Kind::Player, &stats, IdSpace::dense(100));
        assert_eq!(eq, DEFAULT_EQ_SELECTIVITY);
        let ids = Filter::ids([1u32, 2]).selectivity(Kind::Player, &stats, IdSpace::dense(100));
        assert_eq!(ids, 0.02);
        let range = Filter::id_range(50, 500).selectivity(Kind::Player, &stats, IdSpace::dense(100));
        assert_eq!(range, 0.5);
        let none = Filter::id_range(200, 300).selectivity(Kind::Player, &stats, IdSpace::dense(100));
        assert_eq!(none, MIN_SELECTIVITY);
    }

    #[test]
    fn id_ranges_follow_the_id_span() {
        let stats = Statistics::empty();
        let sparse = IdSpace {
            count: 100,
            bound: 1_000,
        };
        let head = Filter::id_range(0, 100).selectivity(Kind::Player, &stats, sparse);
        assert!((head - 0.1).abs() < 1e-12);
        let tail = Filter::id_range(500, 5_000).selectivity(Kind::Player, &stats, sparse);
        assert!((tail - 0.5).abs() < 1e-12);
    }

    #[test]
    fn conjunction_multiplies() {
        let stats = Statistics::empty();
        let filters = [
            Filter::id_range(0, 50),
            Filter::text_range(Field::PlayerLastName, Some("A"), None),
        ];
        let s = conjunction_selectivity(&filters, Kind::Player, &stats, IdSpace::dense(100));
        assert!((s - 0.5 * DEFAULT_RANGE_SELECTIVITY).abs() < 1e-12);
    }
}
