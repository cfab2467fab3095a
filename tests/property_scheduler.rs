//! Property test: the scheduler state machine terminates on arbitrary
//! plans and never readies a node before its dependencies settled.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;

use common::Fixture;
use pointy::dag::scheduler::{FailureAction, Scheduler};
use pointy::dag::{build, NodeStatus};
use pointy::lang::{Expr, PipeKind, Pos};
use pointy::TaskError;

const NAMES: [&str; 8] = ["t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7"];

fn leaf() -> impl Strategy<Value = Expr> {
    prop::sample::select(NAMES.to_vec()).prop_map(|name| Expr::Task {
        name: name.to_string(),
        pos: Pos::new(1, 1),
    })
}

fn pipe_kind() -> impl Strategy<Value = PipeKind> {
    prop_oneof![Just(PipeKind::Seq), Just(PipeKind::Broadcast)]
}

fn operand(depth: u32) -> BoxedStrategy<Expr> {
    if depth == 0 {
        return leaf().boxed();
    }

    prop_oneof![
        4 => leaf(),
        1 => (leaf(), 0u32..3).prop_map(|(task, budget)| Expr::Retry {
            task: Box::new(task),
            budget,
        }),
        1 => (1u32..4, pipe_kind(), operand(depth - 1)).prop_map(|(count, pipe, child)| {
            Expr::Replicate {
                count,
                pipe,
                child: Box::new(child),
            }
        }),
        1 => (leaf(), prop::collection::vec(expr(depth - 1), 2..3)).prop_map(
            |(callee, branches)| Expr::Call {
                callee: Box::new(callee),
                branches,
            }
        ),
    ]
    .boxed()
}

fn expr(depth: u32) -> BoxedStrategy<Expr> {
    (
        operand(depth),
        prop::collection::vec((prop_oneof![Just(true), Just(false)], pipe_kind(), operand(depth)), 0..3),
    )
        .prop_map(|(first, rest)| {
            rest.into_iter()
                .fold(first, |left, (parallel, kind, right)| {
                    if parallel {
                        Expr::Parallel {
                            left: Box::new(left),
                            right: Box::new(right),
                        }
                    } else {
                        Expr::Pipe {
                            kind,
                            left: Box::new(left),
                            right: Box::new(right),
                        }
                    }
                })
        })
        .boxed()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn simulated_runs_terminate_with_consistent_states(
        e in expr(2),
        failing in prop::collection::hash_set(prop::sample::select(NAMES.to_vec()), 0..3),
        pick_first_branch in any::<bool>(),
    ) {
        let mut fixture = Fixture::new();
        for name in NAMES {
            fixture = fixture.ok(name, json!(null));
        }

        let graph = Arc::new(build(&e, &fixture.registry).expect("plan builds"));
        let failing: HashSet<&str> = failing.into_iter().collect();

        let mut scheduler = Scheduler::new(Arc::clone(&graph));
        let mut queue = scheduler.start();
        let mut steps = 0usize;

        while let Some(at) = queue.pop() {
            steps += 1;
            prop_assert!(steps < 10_000, "simulation did not terminate");

            let task_name = graph.node(at.node).task_name.clone();
            scheduler.mark_dispatched(at);

            if failing.contains(task_name.as_str()) {
                match scheduler.handle_failure(at, &TaskError::Handler(json!("boom"))) {
                    FailureAction::Retry { .. } => queue.push(at),
                    FailureAction::Exhausted => {}
                }
            } else if let Some(node) = scheduler.handle_success(at, json!("ok")) {
                if graph.node(node).is_conditional() {
                    let chosen = if pick_first_branch {
                        graph.node(node).branches[0]
                            .first()
                            .map(|id| graph.node(*id).task_name.clone())
                    } else {
                        None
                    };
                    scheduler.apply_selection(node, chosen.as_deref());
                }

                let newly = scheduler.collect_ready();
                for fresh in &newly {
                    // A node never readies before every live predecessor
                    // succeeded.
                    for &(pred, kind) in graph.preds_of(fresh.node) {
                        let status = scheduler.node_status(pred);
                        prop_assert!(
                            matches!(status, NodeStatus::Succeeded | NodeStatus::Skipped),
                            "node readied with unsettled predecessor ({:?} edge, status {:?})",
                            kind,
                            status,
                        );
                    }
                }
                queue.extend(newly);
            }
        }

        prop_assert!(scheduler.is_complete(), "scheduler left pending work behind");
    }
}
