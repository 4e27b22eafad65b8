//! Entry point tying storage, statistics, planning and execution together.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::config::EngineConfig;
use crate::query::builder::Query;
use crate::query::cost::CostModel;
use crate::query::executor::{QueryContext, QueryData, ResultStream};
use crate::query::explain::explain as explain_tree;
use crate::query::physical::PhysicalNode;
use crate::query::planner::{Planner, PlannerOutput};
use crate::query::profile::ExecutionTrace;
use crate::query::stats::{Statistics, StatisticsHandle};
use crate::storage::{ArchiveSnapshot, SnapshotSource};
use crate::types::Result;

/// Long-lived query engine over one archive.
///
/// The engine owns the shared statistics; each [`QuerySession`] pins a
/// snapshot of the archive and of the statistics for its whole lifetime.
pub struct QueryEngine {
    source: Arc<dyn SnapshotSource>,
    stats: StatisticsHandle,
    planner: Planner,
    config: EngineConfig,
}

impl QueryEngine {
    /// Creates an engine with empty statistics; estimates use defaults until
    /// [`refresh_statistics`](Self::refresh_statistics) runs.
    pub fn new(source: Arc<dyn SnapshotSource>, config: EngineConfig) -> Self {
        Self {
            source,
            stats: StatisticsHandle::default(),
            planner: Planner::new(config.planner.clone()),
            config,
        }
    }

    /// Creates an engine and samples statistics before returning.
    pub fn open(source: Arc<dyn SnapshotSource>, config: EngineConfig) -> Result<Self> {
        let engine = Self::new(source, config);
        engine.refresh_statistics()?;
        Ok(engine)
    }

    /// Configuration the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Statistics currently used for planning.
    pub fn statistics(&self) -> Arc<Statistics> {
        self.stats.current()
    }

    /// Resamples the current archive state and publishes the result.
    ///
    /// Sessions opened earlier keep the statistics they started with.
    pub fn refresh_statistics(&self) -> Result<Arc<Statistics>> {
        let snapshot = self.source.snapshot()?;
        self.stats.refresh(snapshot.as_ref(), &self.config.stats)
    }

    /// Opens a session over the current snapshot and statistics.
    pub fn session(&self) -> Result<QuerySession<'_>> {
        let snapshot = self.source.snapshot()?;
        let stats = self.stats.current();
        debug!(
            target: "gambit::engine",
            stats_generation = stats.generation(),
            "opening session"
        );
        let model = CostModel::new(snapshot.as_ref(), stats);
        Ok(QuerySession {
            planner: &self.planner,
            snapshot,
            model,
        })
    }
}

/// Planning and execution against one pinned snapshot.
pub struct QuerySession<'e> {
    planner: &'e Planner,
    snapshot: Arc<dyn ArchiveSnapshot>,
    model: CostModel,
}

impl QuerySession<'_> {
    /// Archive state pinned for the session.
    pub fn snapshot(&self) -> &dyn ArchiveSnapshot {
        self.snapshot.as_ref()
    }

    /// Sizes and statistics the session plans with.
    pub fn cost_model(&self) -> &CostModel {
        &self.model
    }

    /// Ranks the candidates for `query` against the pinned sizes and
    /// statistics.
    pub fn plan(&self, query: &Query) -> Result<PlannerOutput> {
        self.planner.plan(&self.model, query)
    }

    /// Streams the rows of `plan`.
    pub fn execute<'a>(&'a self, plan: &'a PhysicalNode) -> Result<ResultStream<'a>> {
        plan.rows(&QueryContext::new(self.snapshot.as_ref()))
    }

    /// Streams the rows of `plan`, recording per-node counters into
    /// `trace`. The trace should be sized with [`ExecutionTrace::for_plan`].
    pub fn execute_traced<'a>(
        &'a self,
        plan: &'a PhysicalNode,
        trace: &'a ExecutionTrace,
    ) -> Result<ResultStream<'a>> {
        plan.rows(&QueryContext::traced(self.snapshot.as_ref(), trace))
    }

    /// Plans `query` and collects the rows of the cheapest candidate.
    pub fn run(&self, query: &Query) -> Result<Vec<QueryData>> {
        let started = Instant::now();
        let output = self.plan(query)?;
        let rows = self.execute(&output.plan)?.collect::<Result<Vec<_>>>()?;
        debug!(
            target: "gambit::engine",
            kind = %query.kind,
            plan_hash = output.plan_hash,
            rows = rows.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "query finished"
        );
        Ok(rows)
    }
}

/// Renders `plan` as an indented tree, with realized row counts when
/// `trace` is given.
pub fn explain(plan: &PhysicalNode, trace: Option<&ExecutionTrace>) -> String {
    explain_tree(plan, trace).render()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Kind, Player};
    use crate::query::builder::QueryBuilder;
    use crate::query::filter::Filter;
    use crate::query::value::Field;
    use crate::storage::MemoryArchive;
    use crate::types::RecordId;

    fn engine() -> (Arc<MemoryArchive>, QueryEngine) {
        let archive = Arc::new(MemoryArchive::new());
        for (id, last) in [(1, "Fischer"), (2, "Spassky"), (3, "Fine")] {
            archive.insert(Player {
                id: RecordId(id),
                last_name: last.into(),
                first_name: String::new(),
            });
        }
        let engine = QueryEngine::open(archive.clone(), EngineConfig::default()).unwrap();
        (archive, engine)
    }

    #[test]
    fn sessions_pin_their_snapshot() {
        let (archive, engine) = engine();
        let session = engine.session().unwrap();
        archive.insert(Player {
            id: RecordId(4),
            last_name: "Fridman".into(),
            first_name: String::new(),
        });
        let query = QueryBuilder::players()
            .filter(Filter::text_prefix(Field::PlayerLastName, "F"))
            .build()
            .unwrap();
        assert_eq!(session.run(&query).unwrap().len(), 2);
        assert_eq!(engine.session().unwrap().run(&query).unwrap().len(), 3);
    }

    #[test]
    fn traced_execution_feeds_explain() {
        let (_archive, engine) = engine();
        let session = engine.session().unwrap();
        let query = QueryBuilder::players()
            .filter(Filter::text_eq(Field::PlayerLastName, "Spassky"))
            .build()
            .unwrap();
        let output = session.plan(&query).unwrap();
        let trace = ExecutionTrace::for_plan(&output.plan);
        let rows = session
            .execute_traced(&output.plan, &trace)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(trace.node(0).map(|node| node.rows), Some(1));
        let text = explain(&output.plan, Some(&trace));
        assert!(text.contains("actual_rows=1"));
    }

    #[test]
    fn refresh_bumps_generation() {
        let (_archive, engine) = engine();
        let before = engine.statistics().generation();
        let stats = engine.refresh_statistics().unwrap();
        assert_eq!(stats.generation(), before + 1);
        assert_eq!(stats.count(Kind::Player), 3);
    }
}
