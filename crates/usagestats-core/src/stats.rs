//! Per-client aggregation of traces
//!
//! [`ContextualizedStats`] folds traces for one [`StatsContext`] into
//! request-level counters, an error path tree, and per-field resolver costs.
//! It is not synchronized: callers serialize `add_trace` calls for one
//! instance, while distinct instances can be updated in parallel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::models::{
    CacheScope, FieldStat, PathErrorStats, QueryLatencyStats, StatsContext, Trace, TraceNode,
    TypeStat,
};
use crate::walker::{iterate_over_trace, TraceNodeVisitor};

/// Aggregated statistics for one client context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextualizedStats {
    /// Client the stats belong to
    pub stats_context: StatsContext,

    /// Request-level counters and histograms
    pub query_latency_stats: QueryLatencyStats,

    /// Field stats keyed by parent type name
    pub per_type_stat: HashMap<String, TypeStat>,
}

impl ContextualizedStats {
    /// Create empty stats for `stats_context`
    pub fn new(stats_context: StatsContext) -> Self {
        Self {
            stats_context,
            query_latency_stats: QueryLatencyStats::default(),
            per_type_stat: HashMap::new(),
        }
    }

    /// Fold one trace into the aggregate
    ///
    /// Missing pieces of the trace only skip the accounting that depends on
    /// them; this never fails.
    pub fn add_trace(&mut self, trace: &Trace) {
        let stats = &mut self.query_latency_stats;
        stats.request_count += 1;

        if trace.full_query_cache_hit {
            stats.cache_latency_count.increment_duration(trace.duration_ns);
            stats.cache_hits += 1;
        } else {
            stats.latency_count.increment_duration(trace.duration_ns);
        }

        if !trace.full_query_cache_hit {
            if let Some(policy) = trace.cache_policy.filter(|policy| policy.max_age_ns > 0) {
                match policy.scope {
                    CacheScope::Private => {
                        stats.private_cache_ttl_count.increment_duration(policy.max_age_ns);
                    }
                    CacheScope::Public => {
                        stats.public_cache_ttl_count.increment_duration(policy.max_age_ns);
                    }
                    CacheScope::Unknown => {}
                }
            }
        }

        if trace.persisted_query_hit {
            stats.persisted_query_hits += 1;
        } else if trace.persisted_query_register {
            stats.persisted_query_misses += 1;
        }

        if trace.forbidden_operation {
            stats.forbidden_operation_count += 1;
        } else if trace.registered_operation {
            stats.registered_operation_count += 1;
        }

        let mut visitor = NodeStatsVisitor {
            root_error_stats: &mut stats.root_error_stats,
            per_type_stat: &mut self.per_type_stat,
            has_error: false,
        };
        iterate_over_trace(trace, &mut visitor);

        if visitor.has_error {
            stats.requests_with_errors_count += 1;
        }
    }

    /// Add stats from another shard for the same context
    pub fn merge(&mut self, other: &ContextualizedStats) {
        self.query_latency_stats.merge(&other.query_latency_stats);
        for (type_name, theirs) in &other.per_type_stat {
            self.per_type_stat
                .entry(type_name.clone())
                .or_default()
                .merge(theirs);
        }
    }

    /// Look up the stat for `parent_type.field_name`
    pub fn field_stat(&self, parent_type: &str, field_name: &str) -> Option<&FieldStat> {
        self.per_type_stat
            .get(parent_type)
            .and_then(|type_stat| type_stat.per_field_stat.get(field_name))
    }
}

/// Per-node accounting for one trace
struct NodeStatsVisitor<'s> {
    root_error_stats: &'s mut PathErrorStats,
    per_type_stat: &'s mut HashMap<String, TypeStat>,
    has_error: bool,
}

impl TraceNodeVisitor for NodeStatsVisitor<'_> {
    fn visit(&mut self, node: &TraceNode, path: &[&str]) {
        if node.has_errors() {
            self.has_error = true;

            let path_stats = self.root_error_stats.descend(path);
            path_stats.requests_with_errors_count += 1;
            path_stats.errors_count += node.error_count();
        }

        let (Some(parent_type), Some(field_name), Some(return_type), Some(duration_ns)) = (
            node.parent_type.as_deref(),
            node.original_field_name.as_deref(),
            node.return_type.as_deref(),
            node.duration_ns(),
        ) else {
            return;
        };

        let field_stat = self
            .per_type_stat
            .entry(parent_type.to_owned())
            .or_default()
            .per_field_stat
            .entry(field_name.to_owned())
            .or_insert_with(|| FieldStat::new(return_type));

        // Last write wins, not a running total.
        field_stat.errors_count = node.error_count();
        field_stat.count += 1;
        if node.has_errors() {
            field_stat.requests_with_errors_count += 1;
        }
        field_stat.latency_count.increment_duration(duration_ns);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::DurationHistogram;
    use crate::models::{CachePolicy, QueryPlanNode, TraceError};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const BASE_DURATION_NS: u64 = 30 * 1000;

    fn stats_context() -> StatsContext {
        StatsContext::new("reference", "version")
    }

    fn base_trace() -> Trace {
        Trace::with_duration(BASE_DURATION_NS)
    }

    fn histogram_of(durations: &[u64]) -> DurationHistogram {
        durations.iter().copied().collect()
    }

    fn erroring_node(response_name: &str, errors: usize, children: Vec<TraceNode>) -> TraceNode {
        TraceNode {
            response_name: response_name.to_string(),
            error: (0..errors)
                .map(|i| TraceError::new(format!("error {}", i + 1)))
                .collect(),
            child: children,
            ..TraceNode::new()
        }
    }

    fn resolved_field(
        response_name: &str,
        parent_type: &str,
        field_name: &str,
        return_type: &str,
        start: u64,
        end: u64,
    ) -> TraceNode {
        TraceNode {
            response_name: response_name.to_string(),
            original_field_name: Some(field_name.to_string()),
            parent_type: Some(parent_type.to_string()),
            return_type: Some(return_type.to_string()),
            start_time: Some(start),
            end_time: Some(end),
            ..TraceNode::new()
        }
    }

    fn trace_with_root(children: Vec<TraceNode>) -> Trace {
        Trace {
            root: Some(TraceNode {
                child: children,
                ..TraceNode::new()
            }),
            ..base_trace()
        }
    }

    fn single(trace: &Trace) -> ContextualizedStats {
        let mut stats = ContextualizedStats::new(stats_context());
        stats.add_trace(trace);
        stats
    }

    #[test]
    fn test_single_trace() {
        let stats = single(&base_trace());
        let latency = &stats.query_latency_stats;

        assert_eq!(latency.request_count, 1);
        assert_eq!(latency.latency_count, histogram_of(&[BASE_DURATION_NS]));
        assert_eq!(latency.requests_with_errors_count, 0);
        assert!(latency.cache_latency_count.is_empty());
        assert!(stats.per_type_stat.is_empty());
    }

    #[test]
    fn test_fully_cached_trace() {
        let stats = single(&Trace {
            full_query_cache_hit: true,
            cache_policy: Some(CachePolicy {
                scope: CacheScope::Public,
                max_age_ns: 1000,
            }),
            ..base_trace()
        });
        let latency = &stats.query_latency_stats;

        assert_eq!(latency.request_count, 1);
        assert_eq!(latency.cache_hits, 1);
        assert_eq!(latency.cache_latency_count, histogram_of(&[BASE_DURATION_NS]));
        assert!(latency.latency_count.is_empty());
        assert!(latency.public_cache_ttl_count.is_empty());
    }

    #[test]
    fn test_private_cached_trace() {
        let stats = single(&Trace {
            cache_policy: Some(CachePolicy {
                scope: CacheScope::Private,
                max_age_ns: 1000,
            }),
            ..base_trace()
        });

        assert_eq!(stats.query_latency_stats.request_count, 1);
        assert_eq!(stats.query_latency_stats.private_cache_ttl_count, histogram_of(&[1000]));
        assert!(stats.query_latency_stats.public_cache_ttl_count.is_empty());
    }

    #[test]
    fn test_public_cached_trace() {
        let stats = single(&Trace {
            cache_policy: Some(CachePolicy {
                scope: CacheScope::Public,
                max_age_ns: 1000,
            }),
            ..base_trace()
        });

        assert_eq!(stats.query_latency_stats.public_cache_ttl_count, histogram_of(&[1000]));
        assert!(stats.query_latency_stats.private_cache_ttl_count.is_empty());
    }

    #[test]
    fn test_zero_max_age_is_ignored() {
        let stats = single(&Trace {
            cache_policy: Some(CachePolicy {
                scope: CacheScope::Private,
                max_age_ns: 0,
            }),
            ..base_trace()
        });

        assert!(stats.query_latency_stats.private_cache_ttl_count.is_empty());
    }

    #[test]
    fn test_persisted_query_flags() {
        let hit = single(&Trace {
            persisted_query_hit: true,
            persisted_query_register: true,
            ..base_trace()
        });
        assert_eq!(hit.query_latency_stats.persisted_query_hits, 1);
        assert_eq!(hit.query_latency_stats.persisted_query_misses, 0);

        let miss = single(&Trace {
            persisted_query_register: true,
            ..base_trace()
        });
        assert_eq!(miss.query_latency_stats.persisted_query_hits, 0);
        assert_eq!(miss.query_latency_stats.persisted_query_misses, 1);
    }

    #[test]
    fn test_operation_registration_flags() {
        let forbidden = single(&Trace {
            forbidden_operation: true,
            registered_operation: true,
            ..base_trace()
        });
        assert_eq!(forbidden.query_latency_stats.forbidden_operation_count, 1);
        assert_eq!(forbidden.query_latency_stats.registered_operation_count, 0);

        let registered = single(&Trace {
            registered_operation: true,
            ..base_trace()
        });
        assert_eq!(registered.query_latency_stats.forbidden_operation_count, 0);
        assert_eq!(registered.query_latency_stats.registered_operation_count, 1);
    }

    #[test]
    fn test_errored_trace() {
        let mut user = erroring_node("user", 1, vec![]);
        user.parent_type = Some("Query".to_string());
        user.return_type = Some("User!".to_string());

        let stats = single(&Trace {
            registered_operation: true,
            ..trace_with_root(vec![user])
        });
        let latency = &stats.query_latency_stats;

        assert_eq!(latency.request_count, 1);
        assert_eq!(latency.requests_with_errors_count, 1);
        let user_errors = latency.root_error_stats.child("user").unwrap();
        assert_eq!(user_errors.requests_with_errors_count, 1);
        assert_eq!(user_errors.errors_count, 1);
        // No timing or original field name, so no field stat.
        assert!(stats.per_type_stat.is_empty());
    }

    #[test]
    fn test_merging_errored_traces() {
        let mut stats = ContextualizedStats::new(stats_context());
        stats.add_trace(&trace_with_root(vec![erroring_node("user", 1, vec![])]));
        stats.add_trace(&trace_with_root(vec![erroring_node(
            "account",
            0,
            vec![erroring_node("name", 1, vec![])],
        )]));
        for _ in 0..2 {
            stats.add_trace(&trace_with_root(vec![erroring_node(
                "user",
                0,
                vec![erroring_node("email", 1, vec![])],
            )]));
        }

        let latency = &stats.query_latency_stats;
        assert_eq!(latency.request_count, 4);
        assert_eq!(latency.requests_with_errors_count, 4);

        let root = &latency.root_error_stats;
        let user = root.child("user").unwrap();
        assert_eq!(user.requests_with_errors_count, 1);
        assert_eq!(user.errors_count, 1);

        let email = user.child("email").unwrap();
        assert_eq!(email.requests_with_errors_count, 2);
        assert_eq!(email.errors_count, 2);

        let account = root.child("account").unwrap();
        assert_eq!(account.requests_with_errors_count, 0);
        assert_eq!(account.errors_count, 0);
        assert_eq!(account.child("name").unwrap().requests_with_errors_count, 1);
    }

    #[test]
    fn test_multiple_erroring_nodes_count_request_once() {
        let stats = single(&trace_with_root(vec![
            erroring_node("a", 2, vec![]),
            erroring_node("b", 3, vec![]),
        ]));
        let latency = &stats.query_latency_stats;

        assert_eq!(latency.requests_with_errors_count, 1);
        assert_eq!(latency.root_error_stats.child("a").unwrap().errors_count, 2);
        assert_eq!(latency.root_error_stats.child("b").unwrap().errors_count, 3);
    }

    #[test]
    fn test_root_errors_land_on_root_path() {
        let stats = single(&Trace {
            root: Some(erroring_node("", 1, vec![])),
            ..base_trace()
        });

        let root = &stats.query_latency_stats.root_error_stats;
        assert_eq!(root.requests_with_errors_count, 1);
        assert_eq!(root.errors_count, 1);
        assert!(root.children.is_empty());
    }

    #[test]
    fn test_mixed_cache_merge() {
        let private = Trace {
            cache_policy: Some(CachePolicy {
                scope: CacheScope::Private,
                max_age_ns: 1000,
            }),
            ..base_trace()
        };
        let cached = Trace {
            full_query_cache_hit: true,
            ..base_trace()
        };

        let mut stats = ContextualizedStats::new(stats_context());
        for trace in [&base_trace(), &base_trace(), &private, &private, &cached, &cached] {
            stats.add_trace(trace);
        }

        let latency = &stats.query_latency_stats;
        assert_eq!(latency.request_count, 6);
        assert_eq!(latency.latency_count, histogram_of(&[BASE_DURATION_NS; 4]));
        assert_eq!(latency.cache_hits, 2);
        assert_eq!(latency.cache_latency_count, histogram_of(&[BASE_DURATION_NS; 2]));
        assert_eq!(latency.private_cache_ttl_count, histogram_of(&[1000, 1000]));
    }

    #[test]
    fn test_field_stats() {
        let mut erroring = resolved_field("me", "Query", "user", "User!", 100, 2100);
        erroring.error = vec![TraceError::new("boom"), TraceError::new("bang")];

        let mut stats = ContextualizedStats::new(stats_context());
        stats.add_trace(&trace_with_root(vec![erroring]));
        stats.add_trace(&trace_with_root(vec![resolved_field(
            "user", "Query", "user", "Ignored", 0, 5000,
        )]));

        let field = stats.field_stat("Query", "user").unwrap();
        assert_eq!(field.return_type, "User!");
        assert_eq!(field.count, 2);
        assert_eq!(field.requests_with_errors_count, 1);
        assert_eq!(field.errors_count, 0);
        assert_eq!(field.latency_count, histogram_of(&[2000, 5000]));
    }

    #[test]
    fn test_field_errors_count_is_last_write() {
        let mut first = resolved_field("a", "Query", "user", "User", 0, 10);
        first.error = vec![TraceError::new("one"), TraceError::new("two")];
        let second = resolved_field("b", "Query", "user", "User", 0, 10);
        let mut third = resolved_field("c", "Query", "user", "User", 0, 10);
        third.error = vec![TraceError::new("three")];

        let mut stats = ContextualizedStats::new(stats_context());
        stats.add_trace(&trace_with_root(vec![first, third]));
        assert_eq!(stats.field_stat("Query", "user").unwrap().errors_count, 1);

        stats.add_trace(&trace_with_root(vec![second]));
        let field = stats.field_stat("Query", "user").unwrap();
        assert_eq!(field.errors_count, 0);
        assert_eq!(field.count, 3);
        assert_eq!(field.requests_with_errors_count, 2);
    }

    #[test]
    fn test_federated_trace_is_attributed_to_service() {
        let mut email = resolved_field("email", "User", "email", "String", 10, 30);
        email.error = vec![TraceError::new("forbidden")];
        let accounts = Trace {
            root: Some(TraceNode {
                child: vec![TraceNode {
                    child: vec![email],
                    ..resolved_field("me", "Query", "me", "User", 0, 40)
                }],
                ..TraceNode::new()
            }),
            ..Trace::default()
        };
        let trace = Trace {
            query_plan: Some(QueryPlanNode::Sequence {
                nodes: vec![QueryPlanNode::flatten(QueryPlanNode::fetch(
                    "accounts", accounts,
                ))],
            }),
            ..base_trace()
        };

        let stats = single(&trace);
        let latency = &stats.query_latency_stats;
        assert_eq!(latency.requests_with_errors_count, 1);
        let email_errors = latency
            .root_error_stats
            .get(&["service:accounts", "me", "email"])
            .unwrap();
        assert_eq!(email_errors.errors_count, 1);
        assert_eq!(stats.field_stat("User", "email").unwrap().count, 1);
        assert_eq!(
            stats.field_stat("Query", "me").unwrap().latency_count,
            histogram_of(&[40])
        );
    }

    #[test]
    fn test_merge_matches_sequential_aggregation() {
        let traces = vec![
            trace_with_root(vec![erroring_node("user", 1, vec![])]),
            Trace {
                full_query_cache_hit: true,
                ..base_trace()
            },
            trace_with_root(vec![resolved_field("me", "Query", "me", "User", 0, 900)]),
        ];

        let mut sequential = ContextualizedStats::new(stats_context());
        for trace in &traces {
            sequential.add_trace(trace);
        }

        let mut left = single(&traces[0]);
        let mut right = single(&traces[1]);
        right.add_trace(&traces[2]);
        left.merge(&right);

        assert_eq!(left, sequential);
    }

    fn arb_trace() -> impl Strategy<Value = Trace> {
        (
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            0u64..1_000_000_000,
            prop::option::of(0usize..3),
        )
            .prop_map(|(cache_hit, persisted_hit, forbidden, duration_ns, errors)| Trace {
                duration_ns,
                full_query_cache_hit: cache_hit,
                persisted_query_hit: persisted_hit,
                forbidden_operation: forbidden,
                root: errors.map(|n| TraceNode {
                    child: vec![erroring_node("field", n, vec![])],
                    ..TraceNode::new()
                }),
                ..Trace::default()
            })
    }

    proptest! {
        #[test]
        fn request_count_is_conserved(traces in prop::collection::vec(arb_trace(), 0..30)) {
            let mut stats = ContextualizedStats::new(stats_context());
            for trace in &traces {
                stats.add_trace(trace);
            }

            let latency = &stats.query_latency_stats;
            prop_assert_eq!(latency.request_count, traces.len() as u64);
            prop_assert_eq!(
                latency.latency_count.total_count() + latency.cache_latency_count.total_count(),
                traces.len() as u64
            );
            prop_assert_eq!(latency.cache_hits, latency.cache_latency_count.total_count());
            prop_assert!(latency.requests_with_errors_count <= latency.request_count);
        }
    }
}
