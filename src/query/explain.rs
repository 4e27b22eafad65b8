//! Human-readable plan trees and deterministic plan fingerprints.

use std::fmt::{self, Write as _};
use std::hash::Hasher;

use serde::Serialize;
use xxhash_rust::xxh64::Xxh64;

use crate::query::filter::Filter;
use crate::query::physical::{PhysicalNode, PhysicalOp};
use crate::query::profile::{ExecutionTrace, NodeTrace};

/// Explain node representing an operator with its estimates.
#[derive(Clone, Debug, Serialize)]
pub struct ExplainNode {
    /// Operator name
    pub op: String,
    /// Operator configuration
    pub props: Vec<ExplainProp>,
    /// Estimated rows produced by the subtree.
    pub estimated_rows: u64,
    /// Estimated page reads of the subtree.
    pub estimated_page_reads: u64,
    /// Estimated deserializations of the subtree.
    pub estimated_deserializations: u64,
    /// Realized counters, when the plan ran with tracing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<NodeTrace>,
    /// Input operators
    pub inputs: Vec<ExplainNode>,
}

/// Single property associated with an [`ExplainNode`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExplainProp {
    /// Property key.
    pub key: String,
    /// Property value serialized for display.
    pub value: String,
    /// Whether this property contains literal data that may be redacted.
    pub redactable: bool,
}

impl ExplainProp {
    fn plain(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: false,
        }
    }

    fn literal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            redactable: true,
        }
    }
}

/// Builds the explain tree of `node`, attaching realized counters from
/// `trace` when the plan ran traced.
pub fn explain(node: &PhysicalNode, trace: Option<&ExecutionTrace>) -> ExplainNode {
    let mut position = 0;
    build_explain_tree(node, trace, &mut position)
}

fn build_explain_tree(
    node: &PhysicalNode,
    trace: Option<&ExecutionTrace>,
    position: &mut usize,
) -> ExplainNode {
    let index = *position;
    *position += 1;
    let cost = node.estimate_cost();
    let mut props = op_props(&node.op);
    props.push(ExplainProp::plain("order", node.sort_order().to_string()));
    if node.may_contain_duplicates() {
        props.push(ExplainProp::plain("duplicates", "true"));
    }
    ExplainNode {
        op: node.op.name().to_owned(),
        props,
        estimated_rows: cost.estimated_rows,
        estimated_page_reads: cost.estimated_page_reads,
        estimated_deserializations: cost.estimated_deserializations,
        actual: trace.and_then(|trace| trace.node(index)),
        inputs: node
            .inputs
            .iter()
            .map(|child| build_explain_tree(child, trace, position))
            .collect(),
    }
}

fn op_props(op: &PhysicalOp) -> Vec<ExplainProp> {
    match op {
        PhysicalOp::TableScan {
            kind,
            range,
            filters,
        } => {
            let mut props = vec![
                ExplainProp::plain("kind", kind.name()),
                ExplainProp::plain("range", range.to_string()),
            ];
            push_filters(&mut props, filters);
            props
        }
        PhysicalOp::IndexScan {
            kind,
            lo,
            hi,
            direction,
            filters,
        } => {
            let mut props = vec![
                ExplainProp::plain("kind", kind.name()),
                ExplainProp::plain("direction", format!("{direction:?}")),
            ];
            if let Some(lo) = lo {
                props.push(ExplainProp::literal("lo", lo.to_string()));
            }
            if let Some(hi) = hi {
                props.push(ExplainProp::literal("hi", hi.to_string()));
            }
            push_filters(&mut props, filters);
            props
        }
        PhysicalOp::Manual { kind, ids } => vec![
            ExplainProp::plain("kind", kind.name()),
            ExplainProp::plain("ids", ids.len().to_string()),
        ],
        PhysicalOp::Lookup { filters } | PhysicalOp::Filter { filters } => {
            let mut props = Vec::new();
            push_filters(&mut props, filters);
            props
        }
        PhysicalOp::Sort { order } => vec![ExplainProp::plain("by", order.to_string())],
        PhysicalOp::Distinct | PhysicalOp::MergeJoin | PhysicalOp::HashJoin => Vec::new(),
        PhysicalOp::Limit { count } => vec![ExplainProp::plain("count", count.to_string())],
        PhysicalOp::GameFilterJoin {
            relation,
            condition,
            filters,
        } => {
            let mut props = vec![
                ExplainProp::plain("relation", relation.name()),
                ExplainProp::plain("condition", condition.name()),
            ];
            push_filters(&mut props, filters);
            props
        }
        PhysicalOp::GameHashJoin {
            relation,
            condition,
        }
        | PhysicalOp::GameLoopJoin {
            relation,
            condition,
        }
        | PhysicalOp::EntityProjection {
            relation,
            condition,
        } => vec![
            ExplainProp::plain("relation", relation.name()),
            ExplainProp::plain("condition", condition.name()),
        ],
    }
}

fn push_filters(props: &mut Vec<ExplainProp>, filters: &[Filter]) {
    if filters.is_empty() {
        return;
    }
    let described: Vec<String> = filters.iter().map(Filter::to_string).collect();
    props.push(ExplainProp::literal("filter", described.join(" and ")));
}

impl ExplainNode {
    /// Renders the tree with two-space indentation per level.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&self.op);
        if !self.props.is_empty() {
            let props: Vec<String> = self
                .props
                .iter()
                .map(|prop| format!("{}={}", prop.key, prop.value))
                .collect();
            let _ = write!(out, " [{}]", props.join(", "));
        }
        let _ = write!(
            out,
            " (rows={} pages={} deser={}",
            self.estimated_rows, self.estimated_page_reads, self.estimated_deserializations
        );
        if let Some(actual) = &self.actual {
            let _ = write!(out, " actual_rows={} read={}", actual.rows, actual.records_read);
        }
        out.push_str(")\n");
        for input in &self.inputs {
            input.render_into(out, depth + 1);
        }
    }
}

impl ExplainNode {
    /// Serializes the tree as JSON, replacing literal values with `"?"`
    /// when `redact` is set.
    pub fn to_json(&self, redact: bool) -> serde_json::Result<String> {
        if redact {
            serde_json::to_string(&self.redacted())
        } else {
            serde_json::to_string(self)
        }
    }

    fn redacted(&self) -> ExplainNode {
        ExplainNode {
            props: self
                .props
                .iter()
                .map(|prop| ExplainProp {
                    value: if prop.redactable {
                        "?".to_owned()
                    } else {
                        prop.value.clone()
                    },
                    ..prop.clone()
                })
                .collect(),
            inputs: self.inputs.iter().map(ExplainNode::redacted).collect(),
            ..self.clone()
        }
    }
}

impl fmt::Display for ExplainNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Deterministic fingerprint of a plan's shape and configuration.
pub fn plan_hash(node: &PhysicalNode) -> u64 {
    let mut hasher = Xxh64::new(0);
    hash_physical_node(node, &mut hasher);
    hasher.finish()
}

fn hash_physical_node(node: &PhysicalNode, hasher: &mut Xxh64) {
    hasher.write(node.op.name().as_bytes());
    for prop in op_props(&node.op) {
        hasher.write(prop.key.as_bytes());
        hasher.write(prop.value.as_bytes());
    }
    hasher.write_u64(node.inputs.len() as u64);
    for child in &node.inputs {
        hash_physical_node(child, hasher);
    }
}
