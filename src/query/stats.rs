//! Sampled selectivity statistics.
//!
//! Statistics are rebuilt from a snapshot by a bounded random walk over each
//! collection and published through a [`StatisticsHandle`]. Planning clones
//! the current `Arc` once, so a refresh running concurrently never changes
//! the numbers a plan is being costed with.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{Kind, Record};
use crate::query::value::Field;
use crate::storage::{ArchiveSnapshot, IdRange};
use crate::types::Result;

/// Selectivity assumed for equality predicates without statistics.
pub const DEFAULT_EQ_SELECTIVITY: f64 = 0.05;
/// Selectivity assumed for range predicates without statistics.
pub const DEFAULT_RANGE_SELECTIVITY: f64 = 0.3;
/// Selectivity assumed for predicates no estimator understands.
pub const DEFAULT_FILTER_SELECTIVITY: f64 = 0.25;
/// Floor applied to every estimate so products never reach zero.
pub const MIN_SELECTIVITY: f64 = 1e-6;

/// Lower edge of the rating histogram.
pub const ELO_MIN: i64 = 0;
/// Upper edge of the rating histogram.
pub const ELO_MAX: i64 = 3000;
/// Rating bucket width.
pub const ELO_BUCKET: i64 = 50;
/// Lower edge of the year histograms.
pub const YEAR_MIN: i64 = 0;
/// Upper edge of the year histograms.
pub const YEAR_MAX: i64 = 2100;
/// Year bucket width.
pub const YEAR_BUCKET: i64 = 10;

/// Clamps an estimate into `[MIN_SELECTIVITY, 1]`, mapping NaN to the floor.
pub fn clamp_selectivity(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_SELECTIVITY;
    }
    value.clamp(MIN_SELECTIVITY, 1.0)
}

/// Sorted sample of string keys.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OrderedKeyDistribution {
    sample: Vec<String>,
}

impl OrderedKeyDistribution {
    /// Builds the distribution from unsorted samples.
    pub fn from_samples(mut sample: Vec<String>) -> Self {
        sample.sort_unstable();
        Self { sample }
    }

    /// Number of sampled keys.
    pub fn len(&self) -> usize {
        self.sample.len()
    }

    /// Whether no key was sampled.
    pub fn is_empty(&self) -> bool {
        self.sample.is_empty()
    }

    /// Fraction of sampled keys in `[lo, hi]`; missing bounds are open.
    ///
    /// An empty sample carries no information and reports 1.0.
    pub fn ratio_between(&self, lo: Option<&str>, hi: Option<&str>) -> f64 {
        if self.sample.is_empty() {
            return 1.0;
        }
        let start = lo.map_or(0, |lo| self.sample.partition_point(|key| key.as_str() < lo));
        let end = hi.map_or(self.sample.len(), |hi| {
            self.sample.partition_point(|key| key.as_str() <= hi)
        });
        end.saturating_sub(start) as f64 / self.sample.len() as f64
    }
}

/// Fixed-width histogram over an integer domain. Values outside the domain
/// are clamped into the edge buckets.
#[derive(Clone, Debug, PartialEq)]
pub struct NumericDistribution {
    min: i64,
    max: i64,
    width: i64,
    buckets: Vec<u64>,
    total: u64,
}

impl NumericDistribution {
    /// Empty histogram over `[min, max]` with buckets of `width`.
    pub fn new(min: i64, max: i64, width: i64) -> Self {
        let width = width.max(1);
        let max = max.max(min);
        let len = ((max - min) / width + 1) as usize;
        Self {
            min,
            max,
            width,
            buckets: vec![0; len],
            total: 0,
        }
    }

    /// Elo ratings, 0 to 3000 in buckets of 50.
    pub fn elo() -> Self {
        Self::new(ELO_MIN, ELO_MAX, ELO_BUCKET)
    }

    /// Calendar years, 0 to 2100 in buckets of 10.
    pub fn years() -> Self {
        Self::new(YEAR_MIN, YEAR_MAX, YEAR_BUCKET)
    }

    fn bucket_of(&self, value: i64) -> usize {
        let value = value.clamp(self.min, self.max);
        (((value - self.min) / self.width) as usize).min(self.buckets.len() - 1)
    }

    /// Counts one sampled value.
    pub fn record(&mut self, value: i64) {
        let idx = self.bucket_of(value);
        self.buckets[idx] += 1;
        self.total += 1;
    }

    /// Number of recorded values.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Estimated fraction of values in `[lo, hi]`, interpolating linearly
    /// inside partially covered buckets. Empty histograms report 1.0.
    pub fn ratio_between(&self, lo: i64, hi: i64) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        if lo > hi {
            return 0.0;
        }
        let lo = lo.clamp(self.min, self.max);
        let hi = hi.clamp(self.min, self.max);
        let mut covered = 0.0;
        for idx in self.bucket_of(lo)..=self.bucket_of(hi) {
            let count = self.buckets[idx];
            if count == 0 {
                continue;
            }
            let bucket_lo = self.min + idx as i64 * self.width;
            let bucket_hi = (bucket_lo + self.width - 1).min(self.max);
            let span = bucket_hi - bucket_lo + 1;
            let overlap = (hi.min(bucket_hi) - lo.max(bucket_lo) + 1).max(0);
            covered += count as f64 * overlap as f64 / span as f64;
        }
        (covered / self.total as f64).clamp(0.0, 1.0)
    }
}

/// Knobs for statistics sampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Maximum records sampled per collection.
    pub sample_size: usize,
    /// Records taken from one cursor before jumping to a new random start.
    pub batch_size: usize,
    /// Largest number of records skipped between two samples in a batch.
    pub max_step: usize,
    /// Fixed seed for reproducible samples; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            sample_size: 2_000,
            batch_size: 32,
            max_step: 4,
            seed: None,
        }
    }
}

/// Snapshot of sampled statistics.
#[derive(Clone, Debug)]
pub struct Statistics {
    generation: u64,
    counts: [u64; 7],
    player_last_names: OrderedKeyDistribution,
    tournament_titles: OrderedKeyDistribution,
    annotator_names: OrderedKeyDistribution,
    source_titles: OrderedKeyDistribution,
    team_titles: OrderedKeyDistribution,
    tag_titles: OrderedKeyDistribution,
    game_years: NumericDistribution,
    game_elo: NumericDistribution,
    tournament_years: NumericDistribution,
    team_years: NumericDistribution,
}

impl Default for Statistics {
    fn default() -> Self {
        Self {
            generation: 0,
            counts: [0; 7],
            player_last_names: OrderedKeyDistribution::default(),
            tournament_titles: OrderedKeyDistribution::default(),
            annotator_names: OrderedKeyDistribution::default(),
            source_titles: OrderedKeyDistribution::default(),
            team_titles: OrderedKeyDistribution::default(),
            tag_titles: OrderedKeyDistribution::default(),
            game_years: NumericDistribution::years(),
            game_elo: NumericDistribution::elo(),
            tournament_years: NumericDistribution::years(),
            team_years: NumericDistribution::years(),
        }
    }
}

impl Statistics {
    /// Statistics with no samples; every estimator falls back to defaults.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Samples every collection of `snapshot`.
    pub fn sample(snapshot: &dyn ArchiveSnapshot, config: &StatsConfig) -> Result<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let mut stats = Statistics::empty();
        for kind in Kind::ALL {
            stats.counts[kind.ordinal()] = snapshot.count(kind);
            let mut titles = Vec::new();
            random_walk(snapshot, kind, config, &mut rng, |record| {
                stats.observe(record, &mut titles)
            })?;
            let keys = OrderedKeyDistribution::from_samples(titles);
            match kind {
                Kind::Game => {}
                Kind::Player => stats.player_last_names = keys,
                Kind::Tournament => stats.tournament_titles = keys,
                Kind::Annotator => stats.annotator_names = keys,
                Kind::Source => stats.source_titles = keys,
                Kind::Team => stats.team_titles = keys,
                Kind::Tag => stats.tag_titles = keys,
            }
        }
        Ok(stats)
    }

    fn observe(&mut self, record: &Record, keys: &mut Vec<String>) {
        match record {
            Record::Game(game) => {
                self.game_years.record(game.year as i64);
                self.game_elo.record(game.white_elo as i64);
                self.game_elo.record(game.black_elo as i64);
            }
            Record::Player(player) => keys.push(player.last_name.clone()),
            Record::Tournament(tournament) => {
                keys.push(tournament.title.clone());
                self.tournament_years.record(tournament.year as i64);
            }
            Record::Annotator(annotator) => keys.push(annotator.name.clone()),
            Record::Source(source) => keys.push(source.title.clone()),
            Record::Team(team) => {
                keys.push(team.title.clone());
                self.team_years.record(team.year as i64);
            }
            Record::Tag(tag) => keys.push(tag.title.clone()),
        }
    }

    /// Monotonic counter bumped by every refresh.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Record count of `kind` when the statistics were taken.
    pub fn count(&self, kind: Kind) -> u64 {
        self.counts[kind.ordinal()]
    }

    /// Sampled key distribution for `field`, when one is kept and non-empty.
    pub fn key_distribution(&self, field: Field) -> Option<&OrderedKeyDistribution> {
        let dist = match field {
            Field::PlayerLastName => &self.player_last_names,
            Field::TournamentTitle => &self.tournament_titles,
            Field::AnnotatorName => &self.annotator_names,
            Field::SourceTitle => &self.source_titles,
            Field::TeamTitle => &self.team_titles,
            Field::TagTitle => &self.tag_titles,
            _ => return None,
        };
        (!dist.is_empty()).then_some(dist)
    }

    /// Histogram for `field`, when one is kept and non-empty. Both Elo
    /// fields share one histogram.
    pub fn numeric_distribution(&self, field: Field) -> Option<&NumericDistribution> {
        let dist = match field {
            Field::GameYear => &self.game_years,
            Field::GameWhiteElo | Field::GameBlackElo => &self.game_elo,
            Field::TournamentYear => &self.tournament_years,
            Field::TeamYear => &self.team_years,
            _ => return None,
        };
        (dist.total() > 0).then_some(dist)
    }
}

/// Visits up to `sample_size` records of `kind` by hopping between random
/// starting ids and taking short, randomly strided batches from each.
///
/// Collections no larger than the sample are read in full.
fn random_walk<F>(
    snapshot: &dyn ArchiveSnapshot,
    kind: Kind,
    config: &StatsConfig,
    rng: &mut StdRng,
    mut visit: F,
) -> Result<()>
where
    F: FnMut(&Record),
{
    let count = snapshot.count(kind);
    if count == 0 || config.sample_size == 0 {
        return Ok(());
    }
    if count <= config.sample_size as u64 {
        for record in snapshot.scan(kind, IdRange::all())? {
            visit(&record?);
        }
        return Ok(());
    }
    let low = match snapshot.scan(kind, IdRange::all())?.next() {
        Some(first) => first?.id().0,
        None => return Ok(()),
    };
    let high = snapshot.id_bound(kind).max(low.saturating_add(1));
    let batch = config.batch_size.max(1);
    let mut sampled = 0usize;
    // Each batch yields at least one record unless the id space above the
    // random start is empty, so bound the walk to avoid spinning on gaps.
    let mut attempts = config.sample_size.saturating_mul(2);
    while sampled < config.sample_size && attempts > 0 {
        attempts -= 1;
        let start = rng.gen_range(low..high);
        let mut cursor = snapshot.scan(kind, IdRange::new(start, u32::MAX))?;
        let mut taken = 0;
        while taken < batch && sampled < config.sample_size {
            let skip = rng.gen_range(0..=config.max_step);
            match cursor.nth(skip) {
                Some(record) => {
                    visit(&record?);
                    taken += 1;
                    sampled += 1;
                }
                None => break,
            }
        }
    }
    debug!(
        target: "gambit::stats",
        kind = %kind,
        sampled,
        count,
        "random walk finished"
    );
    Ok(())
}

/// Shared, atomically replaceable statistics.
#[derive(Debug, Default)]
pub struct StatisticsHandle {
    current: RwLock<Arc<Statistics>>,
}

impl StatisticsHandle {
    /// Publishes `stats` as the first generation.
    pub fn new(stats: Statistics) -> Self {
        Self {
            current: RwLock::new(Arc::new(stats)),
        }
    }

    /// The statistics in effect right now.
    pub fn current(&self) -> Arc<Statistics> {
        Arc::clone(&self.current.read())
    }

    /// Publishes `stats` in a single swap.
    pub fn replace(&self, mut stats: Statistics) -> Arc<Statistics> {
        let mut guard = self.current.write();
        stats.generation = guard.generation + 1;
        let stats = Arc::new(stats);
        *guard = Arc::clone(&stats);
        stats
    }

    /// Resamples `snapshot` and publishes the result.
    ///
    /// Sampling happens outside the lock; readers keep seeing the previous
    /// statistics until the swap.
    pub fn refresh(
        &self,
        snapshot: &dyn ArchiveSnapshot,
        config: &StatsConfig,
    ) -> Result<Arc<Statistics>> {
        let started = Instant::now();
        let stats = Statistics::sample(snapshot, config)?;
        let stats = self.replace(stats);
        info!(
            target: "gambit::stats",
            generation = stats.generation(),
            games = stats.count(Kind::Game),
            players = stats.count(Kind::Player),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "statistics refreshed"
        );
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Player;
    use crate::storage::MemoryArchive;
    use crate::types::RecordId;

    fn keys(values: &[&str]) -> OrderedKeyDistribution {
        OrderedKeyDistribution::from_samples(values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn key_ratio_is_inclusive() {
        let dist = keys(&["Anand", "Carlsen", "Caruana", "Ding", "Nepo"]);
        assert_eq!(dist.ratio_between(Some("Carlsen"), Some("Caruana")), 0.4);
        assert_eq!(dist.ratio_between(Some("Ca"), Some("Cz")), 0.4);
        assert_eq!(dist.ratio_between(None, None), 1.0);
        assert_eq!(dist.ratio_between(Some("Z"), None), 0.0);
        assert_eq!(keys(&[]).ratio_between(Some("a"), Some("b")), 1.0);
    }

    #[test]
    fn numeric_ratio_interpolates_buckets() {
        let mut dist = NumericDistribution::years();
        for year in [1970, 1972, 1975, 1985] {
            dist.record(year);
        }
        assert_eq!(dist.ratio_between(1970, 1979), 0.75);
        let one_year = dist.ratio_between(1972, 1972);
        assert!(one_year > 0.0 && one_year < 0.75);
        assert_eq!(dist.ratio_between(1990, 1980), 0.0);
        assert_eq!(NumericDistribution::elo().ratio_between(0, 10), 1.0);
    }

    #[test]
    fn out_of_domain_values_land_in_edge_buckets() {
        let mut dist = NumericDistribution::elo();
        dist.record(-5);
        dist.record(4000);
        assert_eq!(dist.total(), 2);
        assert_eq!(dist.ratio_between(i64::MIN, i64::MAX), 1.0);
    }

    #[test]
    fn seeded_sampling_is_reproducible() {
        let archive = MemoryArchive::new();
        archive.extend((0..500u32).map(|id| Player {
            id: RecordId(id),
            last_name: format!("P{:03}", id % 97),
            first_name: String::new(),
        }));
        let config = StatsConfig {
            sample_size: 64,
            seed: Some(7),
            ..StatsConfig::default()
        };
        let data = archive.data();
        let a = Statistics::sample(data.as_ref(), &config).unwrap();
        let b = Statistics::sample(data.as_ref(), &config).unwrap();
        assert_eq!(a.player_last_names, b.player_last_names);
        assert_eq!(a.player_last_names.len(), 64);
        assert_eq!(a.count(Kind::Player), 500);
    }

    #[test]
    fn sampling_walks_offset_ids() {
        let archive = MemoryArchive::new();
        archive.extend((10_000..10_500u32).map(|id| Player {
            id: RecordId(id),
            last_name: format!("P{:03}", id - 10_000),
            first_name: String::new(),
        }));
        let config = StatsConfig {
            sample_size: 64,
            seed: Some(11),
            ..StatsConfig::default()
        };
        let stats = Statistics::sample(archive.data().as_ref(), &config).unwrap();
        let dist = stats.key_distribution(Field::PlayerLastName).unwrap();
        assert_eq!(dist.len(), 64);
        assert!(dist.ratio_between(Some("P250"), None) > 0.0);
    }

    #[test]
    fn refresh_swaps_whole_snapshot() {
        let handle = StatisticsHandle::default();
        let before = handle.current();
        assert_eq!(before.generation(), 0);
        assert!(before.key_distribution(Field::PlayerLastName).is_none());

        let archive = MemoryArchive::new();
        archive.insert(Player {
            id: RecordId(1),
            last_name: "Tal".into(),
            first_name: "Mikhail".into(),
        });
        let after = handle
            .refresh(archive.data().as_ref(), &StatsConfig::default())
            .unwrap();
        assert_eq!(after.generation(), 1);
        assert!(after.key_distribution(Field::PlayerLastName).is_some());
        // Earlier readers keep their view.
        assert!(before.key_distribution(Field::PlayerLastName).is_none());
        assert_eq!(handle.current().generation(), 1);
    }
}
