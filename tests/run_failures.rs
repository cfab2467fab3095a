mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;

use common::{node_named, Fixture};
use pointy::exec::{RemoteRequest, RemoteResponse, RemoteTransport};
use pointy::{
    build, parse, EngineConfig, FailureReason, NodeError, NodeResult, RunOutcome, RunStatus,
    Runtime, TaskGraph, TaskRegistry,
};

async fn run_with(
    source: &str,
    registry: TaskRegistry,
    config: EngineConfig,
) -> (Arc<TaskGraph>, RunOutcome) {
    let expr = parse(source).expect("source parses");
    let graph = Arc::new(build(&expr, &registry).expect("plan builds"));
    let runtime = Runtime::new(Arc::clone(&graph), registry, config);
    let outcome = runtime.run().await;
    (graph, outcome)
}

async fn run(source: &str, registry: TaskRegistry) -> (Arc<TaskGraph>, RunOutcome) {
    run_with(source, registry, EngineConfig::default()).await
}

#[tokio::test]
async fn non_retryable_failure_skips_remaining_attempts() {
    let fixture = Fixture::new().failing_hard("a").ok("b", json!(null));
    let recorder = fixture.recorder.clone();

    let (_graph, outcome) = run("a * 5 -> b", fixture.registry).await;

    assert!(!outcome.succeeded());
    assert_eq!(recorder.count_of("a"), 1);
    assert_eq!(recorder.count_of("b"), 0);
}

#[tokio::test]
async fn zero_retry_budget_means_exactly_one_attempt() {
    let fixture = Fixture::new().failing("once");
    let recorder = fixture.recorder.clone();

    let (graph, outcome) = run("once * 0", fixture.registry).await;

    assert!(!outcome.succeeded());
    assert_eq!(recorder.count_of("once"), 1);
    assert_eq!(
        outcome.timing_of(node_named(&graph, "once")).unwrap().attempts,
        1
    );
}

#[tokio::test]
async fn parallel_branch_without_the_failed_dependency_continues() {
    let fixture = Fixture::new()
        .failing("bad")
        .ok("good", json!("fine"))
        .ok("sink", json!(null));
    let recorder = fixture.recorder.clone();

    let (graph, outcome) = run("bad || good -> sink", fixture.registry).await;

    assert!(!outcome.succeeded());
    // The sibling still ran to completion; only the join failed upstream.
    assert_eq!(recorder.count_of("good"), 1);
    assert_eq!(recorder.count_of("sink"), 0);

    let good = node_named(&graph, "good");
    let sink = node_named(&graph, "sink");
    let bad = node_named(&graph, "bad");

    assert_eq!(
        outcome.result_of(good),
        Some(&NodeResult::Value(json!("fine")))
    );
    assert_eq!(
        outcome.result_of(sink),
        Some(&NodeResult::Error(NodeError::UpstreamFailed { origin: bad }))
    );
}

#[tokio::test]
async fn unchosen_branch_subgraphs_are_skipped_recursively() {
    let fixture = Fixture::new()
        .router("router", Some("keep"))
        .ok("keep", json!(null))
        .ok("keep_next", json!(null))
        .ok("drop", json!(null))
        .ok("drop_next", json!(null));
    let recorder = fixture.recorder.clone();

    let (graph, outcome) = run(
        "router(keep -> keep_next, drop -> drop_next)",
        fixture.registry,
    )
    .await;

    assert!(outcome.succeeded());
    assert_eq!(recorder.count_of("keep"), 1);
    assert_eq!(recorder.count_of("keep_next"), 1);
    assert_eq!(recorder.count_of("drop"), 0);
    assert_eq!(recorder.count_of("drop_next"), 0);

    for name in ["drop", "drop_next"] {
        let id = node_named(&graph, name);
        assert_eq!(outcome.result_of(id), Some(&NodeResult::Skipped));
    }
}

#[tokio::test]
async fn selecting_no_branch_skips_every_child() {
    let fixture = Fixture::new()
        .router("router", None)
        .ok("left", json!(null))
        .ok("right", json!(null));
    let recorder = fixture.recorder.clone();

    let (graph, outcome) = run("router(left, right)", fixture.registry).await;

    assert!(outcome.succeeded());
    assert_eq!(recorder.count_of("left"), 0);
    assert_eq!(recorder.count_of("right"), 0);
    for name in ["left", "right"] {
        let id = node_named(&graph, name);
        assert_eq!(outcome.result_of(id), Some(&NodeResult::Skipped));
    }
}

#[tokio::test]
async fn cancelling_the_run_cancels_in_flight_handlers() {
    let fixture = Fixture::new().sleepy("slow").ok("after", json!(null));
    let recorder = fixture.recorder.clone();

    let expr = parse("slow -> after").unwrap();
    let graph = Arc::new(build(&expr, &fixture.registry).unwrap());
    let runtime = Runtime::new(Arc::clone(&graph), fixture.registry, EngineConfig::default());
    let cancel = runtime.cancel_token();

    let handle = tokio::spawn(runtime.run());
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let outcome = handle.await.unwrap();
    assert_eq!(outcome.status, RunStatus::Cancelled);
    assert_eq!(recorder.count_of("after"), 0);

    let slow = node_named(&graph, "slow");
    assert_eq!(
        outcome.result_of(slow),
        Some(&NodeResult::Error(NodeError::Cancelled))
    );
}

#[tokio::test]
async fn deadline_expiry_fails_the_run_and_cancels_workers() {
    let fixture = Fixture::new().sleepy("slow").ok("after", json!(null));
    let recorder = fixture.recorder.clone();

    let config = EngineConfig {
        deadline_ms: Some(50),
        ..EngineConfig::default()
    };

    let started = Instant::now();
    let (graph, outcome) = run_with("slow -> after", fixture.registry, config).await;

    // The sleepy handler honors cancellation, so the run ends promptly
    // instead of waiting out the handler.
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(recorder.count_of("after"), 0);

    match &outcome.status {
        RunStatus::Failed { reason, nodes } => {
            assert_eq!(*reason, FailureReason::Deadline);
            assert_eq!(nodes, &vec![node_named(&graph, "slow")]);
        }
        other => panic!("expected deadline failure, got {other:?}"),
    }
}

#[tokio::test]
async fn retry_backoff_delays_subsequent_attempts() {
    let fixture = Fixture::new().flaky("flaky", 2, json!(null));

    let config = EngineConfig::from_toml_str(
        r#"
        [engine.backoff]
        base_ms = 40
        multiplier = 2.0
        "#,
    )
    .unwrap();

    let started = Instant::now();
    let (_graph, outcome) = run_with("flaky * 2", fixture.registry, config).await;

    assert!(outcome.succeeded());
    // Two retries: 40ms then 80ms of back-off.
    assert!(started.elapsed() >= Duration::from_millis(100));
}

/// Scripted endpoint for the remote contract.
struct ScriptedTransport {
    calls: AtomicU32,
    seen: Mutex<Vec<RemoteRequest>>,
    responses: Vec<RemoteResponse>,
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn execute(&self, request: RemoteRequest) -> RemoteResponse {
        self.seen.lock().unwrap().push(request);
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        self.responses
            .get(call)
            .cloned()
            .unwrap_or(RemoteResponse::Err {
                message: "script exhausted".to_string(),
                retryable: false,
            })
    }
}

#[tokio::test]
async fn remote_handlers_marshal_requests_and_retry_transient_errors() {
    let transport = Arc::new(ScriptedTransport {
        calls: AtomicU32::new(0),
        seen: Mutex::new(Vec::new()),
        responses: vec![
            RemoteResponse::Err {
                message: "connection reset".to_string(),
                retryable: true,
            },
            RemoteResponse::Ok {
                value: json!("remote-done"),
            },
        ],
    });

    let fixture = Fixture::new().ok("seed", json!("payload"));
    let mut registry = fixture.registry;
    registry.register_remote("remote_work", transport.clone(), None);

    let (graph, outcome) = run("seed -> remote_work * 2", registry).await;

    assert!(outcome.succeeded());
    let remote = node_named(&graph, "remote_work");
    assert_eq!(
        outcome.result_of(remote),
        Some(&NodeResult::Value(json!("remote-done")))
    );

    let seen = transport.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].task_name, "remote_work");
    assert_eq!(
        seen[0].inputs,
        json!([{ "source": "seed", "value": "payload" }])
    );
}

#[tokio::test]
async fn non_retryable_remote_error_ignores_the_budget() {
    let transport = Arc::new(ScriptedTransport {
        calls: AtomicU32::new(0),
        seen: Mutex::new(Vec::new()),
        responses: vec![RemoteResponse::Err {
            message: "bad request".to_string(),
            retryable: false,
        }],
    });

    let mut registry = TaskRegistry::new();
    registry.register_remote("remote_work", transport.clone(), None);

    let (_graph, outcome) = run("remote_work * 5", registry).await;

    assert!(!outcome.succeeded());
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
}
