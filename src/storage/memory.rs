use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::model::{Kind, Record, Relation};
use crate::query::sort::Direction;
use crate::query::value::IndexKey;
use crate::storage::{ArchiveSnapshot, IdCursor, IdRange, RecordCursor, SnapshotSource};
use crate::types::{GambitError, RecordId, Result};

/// Records packed into one simulated disk page, per kind.
const GAME_RECORDS_PER_PAGE: u64 = 16;
const ENTITY_RECORDS_PER_PAGE: u64 = 64;

#[derive(Clone, Debug, Default)]
struct Collection {
    records: BTreeMap<RecordId, Record>,
    /// Secondary index entries sorted by `(key, id)`.
    index: Vec<(IndexKey, RecordId)>,
}

impl Collection {
    fn insert(&mut self, record: Record) -> Option<Record> {
        let id = record.id();
        let previous = self.records.insert(id, record.clone());
        if let Some(old) = &previous {
            self.remove_index_entry(old);
        }
        let key = IndexKey::of(&record);
        let pos = self
            .index
            .partition_point(|(k, existing)| entry_cmp(k, *existing, &key, id).is_lt());
        self.index.insert(pos, (key, id));
        previous
    }

    fn remove(&mut self, id: RecordId) -> Option<Record> {
        let removed = self.records.remove(&id)?;
        self.remove_index_entry(&removed);
        Some(removed)
    }

    fn remove_index_entry(&mut self, record: &Record) {
        let key = IndexKey::of(record);
        let id = record.id();
        let pos = self
            .index
            .partition_point(|(k, existing)| entry_cmp(k, *existing, &key, id).is_lt());
        if self.index.get(pos).map(|(_, existing)| *existing) == Some(id) {
            self.index.remove(pos);
        }
    }

    fn index_bounds(&self, lo: Option<&IndexKey>, hi: Option<&IndexKey>) -> (usize, usize) {
        let start = match lo {
            Some(lo) => self.index.partition_point(|(key, _)| key.prefix_cmp(lo).is_lt()),
            None => 0,
        };
        let end = match hi {
            Some(hi) => self.index.partition_point(|(key, _)| key.prefix_cmp(hi).is_le()),
            None => self.index.len(),
        };
        (start, end.max(start))
    }
}

fn entry_cmp(a: &IndexKey, a_id: RecordId, b: &IndexKey, b_id: RecordId) -> std::cmp::Ordering {
    a.compare(b).then(a_id.cmp(&b_id))
}

/// Immutable archive state shared by every snapshot taken from it.
#[derive(Clone, Debug, Default)]
pub struct ArchiveData {
    collections: [Collection; 7],
    game_lists: FxHashMap<(Relation, RecordId), Vec<RecordId>>,
}

impl ArchiveData {
    fn collection(&self, kind: Kind) -> &Collection {
        &self.collections[kind.ordinal()]
    }

    fn collection_mut(&mut self, kind: Kind) -> &mut Collection {
        &mut self.collections[kind.ordinal()]
    }

    fn insert(&mut self, record: Record) {
        let kind = record.kind();
        let previous = self.collection_mut(kind).insert(record.clone());
        if let Record::Game(game) = &record {
            if let Some(Record::Game(old)) = previous {
                self.unlink_game(&old);
            }
            for relation in RELATIONS {
                let (white, black) = relation.refs(game);
                for entity in [white, black].into_iter().flatten() {
                    let list = self.game_lists.entry((relation, entity)).or_default();
                    if let Err(pos) = list.binary_search(&game.id) {
                        list.insert(pos, game.id);
                    }
                }
            }
        }
    }

    fn remove(&mut self, kind: Kind, id: RecordId) -> bool {
        match self.collection_mut(kind).remove(id) {
            Some(Record::Game(game)) => {
                self.unlink_game(&game);
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    fn unlink_game(&mut self, game: &crate::model::Game) {
        for relation in RELATIONS {
            let (white, black) = relation.refs(game);
            for entity in [white, black].into_iter().flatten() {
                if let Some(list) = self.game_lists.get_mut(&(relation, entity)) {
                    if let Ok(pos) = list.binary_search(&game.id) {
                        list.remove(pos);
                    }
                }
            }
        }
    }
}

const RELATIONS: [Relation; 6] = [
    Relation::Player,
    Relation::Tournament,
    Relation::Annotator,
    Relation::Source,
    Relation::Team,
    Relation::Tag,
];

impl ArchiveSnapshot for ArchiveData {
    fn scan(&self, kind: Kind, range: IdRange) -> Result<RecordCursor<'_>> {
        if range.is_empty() {
            return Ok(Box::new(std::iter::empty()));
        }
        let iter = self
            .collection(kind)
            .records
            .range(range.start..range.end)
            .map(|(_, record)| Ok(record.clone()));
        Ok(Box::new(iter))
    }

    fn scan_index(
        &self,
        kind: Kind,
        lo: Option<&IndexKey>,
        hi: Option<&IndexKey>,
        direction: Direction,
    ) -> Result<RecordCursor<'_>> {
        let collection = self.collection(kind);
        let (start, end) = collection.index_bounds(lo, hi);
        let entries = &collection.index[start..end];
        let resolve = move |(_, id): &(IndexKey, RecordId)| {
            collection
                .records
                .get(id)
                .cloned()
                .ok_or(GambitError::Corruption("index entry without record"))
        };
        let cursor: RecordCursor<'_> = match direction {
            Direction::Ascending => Box::new(entries.iter().map(resolve)),
            Direction::Descending => Box::new(entries.iter().rev().map(resolve)),
        };
        Ok(cursor)
    }

    fn get(&self, kind: Kind, id: RecordId) -> Result<Option<Record>> {
        Ok(self.collection(kind).records.get(&id).cloned())
    }

    fn count(&self, kind: Kind) -> u64 {
        self.collection(kind).records.len() as u64
    }

    fn id_bound(&self, kind: Kind) -> u32 {
        self.collection(kind)
            .records
            .last_key_value()
            .map_or(0, |(id, _)| id.0.saturating_add(1))
    }

    fn num_disk_pages(&self, kind: Kind) -> u64 {
        let per_page = match kind {
            Kind::Game => GAME_RECORDS_PER_PAGE,
            _ => ENTITY_RECORDS_PER_PAGE,
        };
        self.count(kind).div_ceil(per_page)
    }

    fn list_game_ids(&self, relation: Relation, entity: RecordId) -> Result<IdCursor<'_>> {
        match self.game_lists.get(&(relation, entity)) {
            Some(list) => Ok(Box::new(list.iter().copied().map(Ok))),
            None => Ok(Box::new(std::iter::empty())),
        }
    }
}

/// Archive kept entirely in memory.
///
/// Writers copy the shared state on first modification while any snapshot
/// still references it, so snapshots never observe later writes.
#[derive(Default)]
pub struct MemoryArchive {
    data: RwLock<Arc<ArchiveData>>,
}

impl MemoryArchive {
    /// Empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn insert(&self, record: impl Into<Record>) {
        let mut guard = self.data.write();
        Arc::make_mut(&mut guard).insert(record.into());
    }

    /// Inserts a batch of records under a single write lock.
    pub fn extend<I, R>(&self, records: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Record>,
    {
        let mut guard = self.data.write();
        let data = Arc::make_mut(&mut guard);
        for record in records {
            data.insert(record.into());
        }
    }

    /// Removes a record; returns whether it existed.
    pub fn remove(&self, kind: Kind, id: RecordId) -> bool {
        let mut guard = self.data.write();
        Arc::make_mut(&mut guard).remove(kind, id)
    }

    /// Current state as a concrete snapshot.
    pub fn data(&self) -> Arc<ArchiveData> {
        Arc::clone(&self.data.read())
    }
}

impl SnapshotSource for MemoryArchive {
    fn snapshot(&self) -> Result<Arc<dyn ArchiveSnapshot>> {
        Ok(self.data())
    }
}
