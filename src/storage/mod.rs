//! Storage collaborator interface consumed by the query engine.
//!
//! The engine never touches record formats or pages directly. It reads a
//! consistent view of the archive through an [`ArchiveSnapshot`] handed out
//! by a [`SnapshotSource`]; everything below that boundary (page cache,
//! blob storage, locking) belongs to the storage implementation.

use std::fmt;
use std::sync::Arc;

use crate::model::{Kind, Record, Relation};
use crate::query::sort::Direction;
use crate::query::value::IndexKey;
use crate::types::{RecordId, Result};

/// In-memory archive with copy-on-write snapshots.
pub mod memory;

pub use memory::{ArchiveData, MemoryArchive};

/// Lazy cursor over materialized records.
pub type RecordCursor<'a> = Box<dyn Iterator<Item = Result<Record>> + 'a>;

/// Lazy cursor over record identifiers.
pub type IdCursor<'a> = Box<dyn Iterator<Item = Result<RecordId>> + 'a>;

/// Half-open identifier range `[start, end)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct IdRange {
    /// First id in the range.
    pub start: RecordId,
    /// First id past the range.
    pub end: RecordId,
}

impl IdRange {
    /// Range `[start, end)`.
    pub fn new(start: u32, end: u32) -> Self {
        Self {
            start: RecordId(start),
            end: RecordId(end),
        }
    }

    /// The whole identifier space.
    pub fn all() -> Self {
        Self::new(0, u32::MAX)
    }

    /// Whether `id` lies in the range.
    pub fn contains(&self, id: RecordId) -> bool {
        self.start <= id && id < self.end
    }

    /// Whether the range holds no id.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Number of identifiers in the range.
    pub fn len(&self) -> u64 {
        (self.end.0 as u64).saturating_sub(self.start.0 as u64)
    }

    /// Whether the range is the whole id space.
    pub fn is_all(&self) -> bool {
        *self == IdRange::all()
    }

    /// Overlap of two ranges; disjoint ranges produce an empty range.
    pub fn intersect(&self, other: &IdRange) -> IdRange {
        IdRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        }
    }
}

impl Default for IdRange {
    fn default() -> Self {
        IdRange::all()
    }
}

impl fmt::Display for IdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            f.write_str("[all]")
        } else {
            write!(f, "[{}, {})", self.start, self.end)
        }
    }
}

/// Live record count of a collection and the span its ids occupy.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct IdSpace {
    /// Number of live records.
    pub count: u64,
    /// One past the largest live id; zero for an empty collection.
    pub bound: u32,
}

impl IdSpace {
    /// Collection whose ids fill `[0, count)` without gaps.
    pub fn dense(count: u64) -> Self {
        Self {
            count,
            bound: count.min(u32::MAX as u64) as u32,
        }
    }

    /// Share of the live records expected inside `range`, with ids spread
    /// evenly over `[0, bound)`.
    pub fn range_fraction(&self, range: &IdRange) -> f64 {
        if self.count == 0 || self.bound == 0 {
            return 0.0;
        }
        let live = IdRange::new(0, self.bound);
        range.intersect(&live).len() as f64 / self.bound as f64
    }
}

/// Read-only, mutually consistent view of the archive.
///
/// All methods may block on page fetches; errors are storage faults and are
/// propagated to the caller unchanged.
pub trait ArchiveSnapshot: Send + Sync {
    /// Records of `kind` whose id lies in `range`, in ascending id order.
    fn scan(&self, kind: Kind, range: IdRange) -> Result<RecordCursor<'_>>;

    /// Records of `kind` whose secondary index key lies between the optional
    /// partial keys `lo` and `hi` (both inclusive, compared on their leading
    /// components), in index order for `direction`.
    fn scan_index(
        &self,
        kind: Kind,
        lo: Option<&IndexKey>,
        hi: Option<&IndexKey>,
        direction: Direction,
    ) -> Result<RecordCursor<'_>>;

    /// Point lookup; `None` when the id does not resolve.
    fn get(&self, kind: Kind, id: RecordId) -> Result<Option<Record>>;

    /// Number of live records of `kind`.
    fn count(&self, kind: Kind) -> u64;

    /// One past the largest live id of `kind`; zero when it has no records.
    fn id_bound(&self, kind: Kind) -> u32;

    /// Number of disk pages occupied by `kind`'s records.
    fn num_disk_pages(&self, kind: Kind) -> u64;

    /// Ids of the games referencing `entity` through `relation`, ascending.
    ///
    /// Two-sided relations list every game where the entity appears on
    /// either side.
    fn list_game_ids(&self, relation: Relation, entity: RecordId) -> Result<IdCursor<'_>>;
}

/// Hands out snapshots of the current archive state.
pub trait SnapshotSource: Send + Sync {
    /// Pins the current archive state.
    fn snapshot(&self) -> Result<Arc<dyn ArchiveSnapshot>>;
}
