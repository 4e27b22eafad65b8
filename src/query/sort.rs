//! Sort specifications and the "stronger-or-equal" preorder the planner uses
//! to skip redundant sorts.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::Kind;
use crate::query::executor::QueryData;
use crate::query::value::{compare_values, index_fields, Field};

/// Direction of a single sort key.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

impl Direction {
    /// Orients an ascending comparison.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        }
    }

    /// The opposite direction.
    pub fn reverse(self) -> Direction {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }
}

/// One `(field, direction)` component of a [`SortOrder`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SortKey {
    /// Field compared.
    pub field: Field,
    /// Direction of the comparison.
    pub direction: Direction,
}

impl SortKey {
    /// Ascending key on `field`.
    pub fn asc(field: Field) -> Self {
        Self {
            field,
            direction: Direction::Ascending,
        }
    }

    /// Descending key on `field`.
    pub fn desc(field: Field) -> Self {
        Self {
            field,
            direction: Direction::Descending,
        }
    }
}

/// Ordered list of sort keys. The empty order means "no guarantee".
#[derive(Clone, Debug, Eq, PartialEq, Hash, Default, Serialize, Deserialize)]
pub struct SortOrder(Vec<SortKey>);

impl SortOrder {
    /// No ordering guarantee.
    pub fn none() -> Self {
        SortOrder(Vec::new())
    }

    /// Order by `keys`, most significant first.
    pub fn new(keys: impl IntoIterator<Item = SortKey>) -> Self {
        SortOrder(keys.into_iter().collect())
    }

    /// Ascending by identifier, the natural order of table scans.
    pub fn by_id() -> Self {
        SortOrder(vec![SortKey::asc(Field::Id)])
    }

    /// Order produced by scanning `kind`'s secondary index in `direction`.
    ///
    /// Index entries are unique on `(key, id)`, so the id is the last
    /// component.
    pub fn index_order(kind: Kind, direction: Direction) -> Self {
        let mut keys: Vec<SortKey> = index_fields(kind)
            .iter()
            .map(|field| SortKey {
                field: *field,
                direction,
            })
            .collect();
        keys.push(SortKey {
            field: Field::Id,
            direction,
        });
        SortOrder(keys)
    }

    /// Player name order (last name, then first name).
    pub fn player_name(direction: Direction) -> Self {
        SortOrder(vec![
            SortKey {
                field: Field::PlayerLastName,
                direction,
            },
            SortKey {
                field: Field::PlayerFirstName,
                direction,
            },
        ])
    }

    /// Appends a less significant key.
    pub fn then(mut self, key: SortKey) -> Self {
        self.0.push(key);
        self
    }

    /// Keys, most significant first.
    pub fn keys(&self) -> &[SortKey] {
        &self.0
    }

    /// Whether the order has no keys.
    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether every key can be evaluated on identifier-only rows.
    pub fn needs_data(&self) -> bool {
        self.0.iter().any(|key| key.field.needs_data())
    }

    /// True iff `other` is a prefix of `self` with matching directions.
    ///
    /// Rows ordered by `self` are therefore also ordered by `other`.
    pub fn is_stronger_or_equal(&self, other: &SortOrder) -> bool {
        other.0.len() <= self.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| a == b)
    }

    /// Whether rows are ascending by id.
    pub fn is_by_id(&self) -> bool {
        self.is_stronger_or_equal(&SortOrder::by_id())
    }

    /// Compares two rows under this order; rows equal on every key compare
    /// equal so that a stable sort keeps their input order.
    pub fn compare(&self, a: &QueryData, b: &QueryData) -> Ordering {
        for key in &self.0 {
            let ordering = compare_field(key.field, a, b);
            if ordering != Ordering::Equal {
                return key.direction.apply(ordering);
            }
        }
        Ordering::Equal
    }
}

fn compare_field(field: Field, a: &QueryData, b: &QueryData) -> Ordering {
    match field {
        Field::Id => a.id.cmp(&b.id),
        Field::Weight => a.weight.total_cmp(&b.weight),
        _ => {
            let left = a.data.as_ref().and_then(|record| field.extract(record));
            let right = b.data.as_ref().and_then(|record| field.extract(record));
            match (left, right) {
                (Some(l), Some(r)) => compare_values(l, r),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|key| match key.direction {
                Direction::Ascending => format!("{} asc", key.field),
                Direction::Descending => format!("{} desc", key.field),
            })
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stronger_or_equal_is_prefix_relation() {
        let name = SortOrder::player_name(Direction::Ascending);
        let index = SortOrder::index_order(Kind::Player, Direction::Ascending);
        assert!(index.is_stronger_or_equal(&name));
        assert!(!name.is_stronger_or_equal(&index));
        assert!(name.is_stronger_or_equal(&SortOrder::none()));
        assert!(!SortOrder::none().is_stronger_or_equal(&name));
    }

    #[test]
    fn direction_mismatch_is_not_stronger() {
        let asc = SortOrder::player_name(Direction::Ascending);
        let desc = SortOrder::player_name(Direction::Descending);
        assert!(!asc.is_stronger_or_equal(&desc));
        assert!(!desc.is_stronger_or_equal(&asc));
    }

    #[test]
    fn display_lists_keys() {
        let order = SortOrder::by_id().then(SortKey::desc(Field::Weight));
        assert_eq!(order.to_string(), "id asc, weight desc");
        assert_eq!(SortOrder::none().to_string(), "none");
    }
}
