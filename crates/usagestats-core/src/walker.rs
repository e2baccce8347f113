//! Trace walker
//!
//! Visits every execution node of a trace, including the sub-traces that
//! downstream services returned for each fetch in the query plan, and hands
//! each node to a visitor together with its response path.
//!
//! Order of visits:
//!
//! 1. The trace's own execution tree, starting from an empty path.
//! 2. The query plan, in plan order. The root of each fetched sub-trace is
//!    walked with a path of `service:<name>`.
//!
//! Within one tree, children are visited before their parent. A child extends
//! the path by its response name unless that name is empty.

use crate::models::{QueryPlanNode, Trace, TraceNode};

/// Prefix of the path segment that marks a federation boundary
pub const SERVICE_SEGMENT_PREFIX: &str = "service:";

/// Callback invoked for every node reached by the walker
pub trait TraceNodeVisitor {
    /// Visit `node`, found at response path `path`
    fn visit(&mut self, node: &TraceNode, path: &[&str]);
}

impl<F> TraceNodeVisitor for F
where
    F: FnMut(&TraceNode, &[&str]),
{
    fn visit(&mut self, node: &TraceNode, path: &[&str]) {
        self(node, path)
    }
}

/// Walk every node reachable from `trace`
pub fn iterate_over_trace<V: TraceNodeVisitor + ?Sized>(trace: &Trace, visitor: &mut V) {
    if let Some(root) = &trace.root {
        let mut path = Vec::new();
        iterate_over_trace_node(root, &mut path, visitor);
    }

    if let Some(plan) = &trace.query_plan {
        iterate_over_query_plan(plan, visitor);
    }
}

fn iterate_over_query_plan<V: TraceNodeVisitor + ?Sized>(node: &QueryPlanNode, visitor: &mut V) {
    match node {
        QueryPlanNode::Fetch(fetch) => {
            let Some(root) = fetch.trace.as_ref().and_then(|trace| trace.root.as_ref()) else {
                return;
            };
            if fetch.service_name.is_empty() {
                return;
            }

            let segment = format!("{SERVICE_SEGMENT_PREFIX}{}", fetch.service_name);
            let mut path = vec![segment.as_str()];
            iterate_over_trace_node(root, &mut path, visitor);
        }
        QueryPlanNode::Flatten { node } => {
            if let Some(inner) = node {
                iterate_over_query_plan(inner, visitor);
            }
        }
        QueryPlanNode::Parallel { nodes } | QueryPlanNode::Sequence { nodes } => {
            for inner in nodes {
                iterate_over_query_plan(inner, visitor);
            }
        }
    }
}

fn iterate_over_trace_node<'a, V: TraceNodeVisitor + ?Sized>(
    node: &'a TraceNode,
    path: &mut Vec<&'a str>,
    visitor: &mut V,
) {
    for child in &node.child {
        let named = !child.response_name.is_empty();
        if named {
            path.push(&child.response_name);
        }

        iterate_over_trace_node(child, path, visitor);

        if named {
            path.pop();
        }
    }

    visitor.visit(node, path);
}
