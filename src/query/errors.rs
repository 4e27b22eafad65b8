#![forbid(unsafe_code)]
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

use crate::model::{Kind, Relation};
use crate::query::join::JoinCondition;
use crate::query::value::Field;

/// Construction-time contract violations raised while building queries and
/// operator trees.
///
/// The planner treats these as "this candidate does not exist": it drops the
/// offending candidate and keeps going. Only when every candidate fails does
/// one of them reach the caller.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    /// An operator received rows of the wrong collection.
    #[error("{context} expects {expected} rows (got {found})")]
    KindMismatch {
        expected: Kind,
        found: Kind,
        context: &'static str,
    },
    /// A join references a relation that does not connect the two kinds.
    #[error("relation '{relation:?}' cannot join {outer} with {inner}")]
    RelationMismatch {
        relation: Relation,
        outer: Kind,
        inner: Kind,
    },
    /// One-sided relations only support `Any`.
    #[error("join condition {condition:?} requires a two-sided relation (got {relation:?})")]
    ConditionNotSupported {
        condition: JoinCondition,
        relation: Relation,
    },
    /// Filter or sort field does not belong to the queried kind.
    #[error("field '{field}' is not defined on {kind}")]
    FieldNotInKind { field: Field, kind: Kind },
    /// Filter literal type does not match the field type.
    #[error("field '{field}' cannot be compared with {context}")]
    FieldTypeMismatch { field: Field, context: &'static str },
    /// Lookup was handed a source that already carries full data.
    #[error("{context} requires an identifier-only source")]
    SourceHasFullData { context: &'static str },
    /// Merge join input is not ordered by id.
    #[error("{context} requires a source sorted by id (got {order})")]
    SourceNotSorted { context: &'static str, order: String },
    /// Merge join input may contain duplicate ids.
    #[error("{context} requires a duplicate-free source")]
    SourceHasDuplicates { context: &'static str },
    /// Operator needs materialized records but the source only yields ids.
    #[error("{context} requires a source with full data")]
    MissingFullData { context: &'static str },
    /// Secondary index scan requested for a kind without one.
    #[error("{kind} has no secondary index")]
    NoSecondaryIndex { kind: Kind },
    /// A predicate cannot produce rows on its own.
    #[error("{0} cannot seed a row source")]
    UnsupportedSource(&'static str),
    /// Nested joins exceed the configured depth.
    #[error("nested joins exceed depth {max} (got {depth})")]
    NestingTooDeep { depth: usize, max: usize },
    /// Join operators need at least one input on each side.
    #[error("{0} requires at least one input")]
    EmptyInput(&'static str),
    /// A sort or projection without any keys.
    #[error("{0} is empty")]
    EmptyQuery(&'static str),
    /// Every candidate plan failed construction.
    #[error("no valid plan for {kind} query")]
    NoValidPlan { kind: Kind },
}

/// Formats plan errors together with their codes.
pub struct PlanErrorWithCode<'a>(pub &'a PlanError);

impl fmt::Display for PlanErrorWithCode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.0.code(), self.0)
    }
}

impl PlanError {
    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            PlanError::KindMismatch { .. } => "KindMismatch",
            PlanError::RelationMismatch { .. } => "RelationMismatch",
            PlanError::ConditionNotSupported { .. } => "ConditionNotSupported",
            PlanError::FieldNotInKind { .. } => "FieldNotInKind",
            PlanError::FieldTypeMismatch { .. } => "TypeMismatch",
            PlanError::SourceHasFullData { .. } => "SourceHasFullData",
            PlanError::SourceNotSorted { .. } => "SourceNotSorted",
            PlanError::SourceHasDuplicates { .. } => "SourceHasDuplicates",
            PlanError::MissingFullData { .. } => "MissingFullData",
            PlanError::NoSecondaryIndex { .. } => "NoSecondaryIndex",
            PlanError::UnsupportedSource(_) => "UnsupportedSource",
            PlanError::NestingTooDeep { .. } => "NestingTooDeep",
            PlanError::EmptyInput(_) => "EmptyInput",
            PlanError::EmptyQuery(_) => "EmptyQuery",
            PlanError::NoValidPlan { .. } => "NoValidPlan",
        }
    }

    pub(crate) fn kind_mismatch(expected: Kind, found: Kind, context: &'static str) -> Self {
        PlanError::KindMismatch {
            expected,
            found,
            context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_prefixed_in_display() {
        let err = PlanError::NestingTooDeep { depth: 5, max: 4 };
        assert_eq!(
            PlanErrorWithCode(&err).to_string(),
            "[NestingTooDeep] nested joins exceed depth 4 (got 5)"
        );
    }
}
