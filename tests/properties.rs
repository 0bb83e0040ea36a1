use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use proptest::prelude::*;
use tokio_util::sync::CancellationToken;

use stagecuter::{
    CommandError, CommandOutput, ConfigError, Edge, RetryBudget, RetryExecutor, RetryOutcome,
    TaskGraph, TaskNode,
};

/// Forward edges only (lower index to higher index), so the graph is acyclic.
fn dag_strategy() -> impl Strategy<Value = (usize, Vec<(usize, usize)>)> {
    (1usize..12).prop_flat_map(|n| {
        let pairs = prop::collection::vec((0..n, 0..n), 0..(n * 2));
        (Just(n), pairs).prop_map(|(n, pairs)| {
            let edges: Vec<(usize, usize)> = pairs
                .into_iter()
                .filter(|(a, b)| a != b)
                .map(|(a, b)| if a < b { (a, b) } else { (b, a) })
                .collect();
            (n, edges)
        })
    })
}

fn build(n: usize, edges: &[(usize, usize)]) -> Result<TaskGraph, ConfigError> {
    let nodes = (0..n)
        .map(|i| TaskNode::new(format!("t{i}"), format!("echo {i}")))
        .collect();
    let edges = edges
        .iter()
        .map(|(a, b)| Edge::new(format!("t{a}"), format!("t{b}")))
        .collect();
    TaskGraph::build("prop", nodes, edges)
}

proptest! {
    #[test]
    fn topological_order_respects_every_edge((n, edges) in dag_strategy()) {
        let graph = build(n, &edges).unwrap();
        let order: Vec<&str> = graph.topological_order().into_iter().map(|t| t.name()).collect();
        prop_assert_eq!(order.len(), n);

        let position: HashMap<&str, usize> =
            order.iter().enumerate().map(|(i, name)| (*name, i)).collect();
        for (a, b) in &edges {
            let from = format!("t{a}");
            let to = format!("t{b}");
            prop_assert!(position[from.as_str()] < position[to.as_str()]);
        }
    }

    #[test]
    fn back_edge_on_a_chain_is_a_cycle(n in 2usize..12, back in 0usize..12) {
        let back = back % (n - 1);
        let mut edges: Vec<(usize, usize)> = (1..n).map(|i| (i - 1, i)).collect();
        edges.push((n - 1, back));

        let err = build(n, &edges).unwrap_err();
        prop_assert!(matches!(err, ConfigError::CycleDetected(_)));
    }

    #[test]
    fn invocations_never_exceed_budget(max_attempts in 1u32..6, failures in 0u32..8) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let calls = Arc::new(AtomicU32::new(0));

        let outcome = rt.block_on(async {
            RetryExecutor::new(RetryBudget::new(max_attempts, Duration::ZERO))
                .execute_with_retry(&CancellationToken::new(), "t", |_| {
                    let calls = Arc::clone(&calls);
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        if n <= failures {
                            Err(CommandError::Exit { code: Some(1), output: CommandOutput::default() })
                        } else {
                            Ok(n)
                        }
                    }
                })
                .await
        });

        let calls = calls.load(Ordering::SeqCst);
        prop_assert_eq!(calls, (failures + 1).min(max_attempts));
        prop_assert_eq!(outcome.attempts(), calls);
        prop_assert_eq!(matches!(outcome, RetryOutcome::Succeeded { .. }), failures < max_attempts);
    }
}
