#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Identifier newtypes and the crate-wide error type.

use std::fmt;

use crate::query::errors::PlanError;

/// Identifier of a game or entity record within its own collection.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct RecordId(pub u32);

impl RecordId {
    /// Returns the next identifier, saturating at `u32::MAX`.
    pub fn next(self) -> RecordId {
        RecordId(self.0.saturating_add(1))
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RecordId {
    fn from(value: u32) -> Self {
        RecordId(value)
    }
}

impl From<RecordId> for u32 {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

/// Errors surfaced by the archive engine.
///
/// Storage faults (`Io`, `Corruption`) come from the storage collaborator and
/// are propagated unchanged; `Plan` wraps construction-time contract
/// violations raised while building operator trees.
#[derive(thiserror::Error, Debug)]
pub enum GambitError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("corruption: {0}")]
    Corruption(&'static str),
    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),
}

impl GambitError {
    /// Returns the plan error when this is a construction-time failure.
    pub fn as_plan_error(&self) -> Option<&PlanError> {
        match self {
            GambitError::Plan(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GambitError>;
