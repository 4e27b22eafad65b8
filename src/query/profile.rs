use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use crate::query::physical::PhysicalNode;

/// Realized counters of one plan node.
///
/// Row counts are exact. `elapsed_ns` is inclusive of the node's inputs,
/// since a pull on a node drives its whole subtree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeTrace {
    /// Rows the node emitted.
    pub rows: u64,
    /// Records the node read from storage (scans, lookups, game fetches).
    pub records_read: u64,
    /// Point lookups the node issued.
    pub lookups: u64,
    /// Nanoseconds spent inside the node's `try_next`.
    pub elapsed_ns: u64,
}

#[derive(Default)]
struct NodeCounters {
    rows: AtomicU64,
    records_read: AtomicU64,
    lookups: AtomicU64,
    elapsed_ns: AtomicU64,
}

/// Per-node execution counters for one plan, indexed by the node's
/// pre-order position (the root is 0, then each input subtree left to
/// right).
///
/// The trace is owned by the caller and handed to execution by reference;
/// operators never carry counters of their own, so a plan can be executed
/// many times, traced or not.
pub struct ExecutionTrace {
    nodes: Vec<NodeCounters>,
}

impl ExecutionTrace {
    /// Trace sized for `plan`.
    pub fn for_plan(plan: &PhysicalNode) -> Self {
        Self::with_nodes(plan.node_count())
    }

    /// Trace with `count` zeroed node slots.
    pub fn with_nodes(count: usize) -> Self {
        Self {
            nodes: (0..count).map(|_| NodeCounters::default()).collect(),
        }
    }

    /// Number of node slots.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the trace has no node slots.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn counters(&self, node: usize) -> Option<&NodeCounters> {
        self.nodes.get(node)
    }

    pub(crate) fn record_row(&self, node: usize) {
        if let Some(counters) = self.counters(node) {
            counters.rows.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_reads(&self, node: usize, records: u64) {
        if let Some(counters) = self.counters(node) {
            counters.records_read.fetch_add(records, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_lookup(&self, node: usize) {
        if let Some(counters) = self.counters(node) {
            counters.lookups.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_elapsed(&self, node: usize, start: Instant) {
        if let Some(counters) = self.counters(node) {
            let nanos = start.elapsed().as_nanos().min(u64::MAX as u128) as u64;
            counters.elapsed_ns.fetch_add(nanos, Ordering::Relaxed);
        }
    }

    /// Counters of the node at pre-order position `node`.
    pub fn node(&self, node: usize) -> Option<NodeTrace> {
        let counters = self.counters(node)?;
        Some(NodeTrace {
            rows: counters.rows.load(Ordering::Relaxed),
            records_read: counters.records_read.load(Ordering::Relaxed),
            lookups: counters.lookups.load(Ordering::Relaxed),
            elapsed_ns: counters.elapsed_ns.load(Ordering::Relaxed),
        })
    }

    /// Storage work summed over every node.
    pub fn total_records_read(&self) -> u64 {
        self.nodes
            .iter()
            .map(|counters| counters.records_read.load(Ordering::Relaxed))
            .sum()
    }

    /// Zeroes every counter.
    pub fn reset(&self) {
        for counters in &self.nodes {
            counters.rows.store(0, Ordering::Relaxed);
            counters.records_read.store(0, Ordering::Relaxed);
            counters.lookups.store(0, Ordering::Relaxed);
            counters.elapsed_ns.store(0, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for ExecutionTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let nodes: Vec<NodeTrace> = (0..self.nodes.len()).filter_map(|idx| self.node(idx)).collect();
        f.debug_struct("ExecutionTrace").field("nodes", &nodes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_nodes_are_ignored() {
        let trace = ExecutionTrace::with_nodes(2);
        trace.record_row(0);
        trace.record_row(0);
        trace.record_reads(1, 5);
        trace.record_row(7);
        assert_eq!(trace.node(0).map(|n| n.rows), Some(2));
        assert_eq!(trace.total_records_read(), 5);
        assert!(trace.node(7).is_none());
        trace.reset();
        assert_eq!(trace.node(0), Some(NodeTrace::default()));
    }
}
