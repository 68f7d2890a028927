use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use trellis_foundation::{
    ExecutionEvent, ExecutionRecord, NodeStatus, PartialSuccessPolicy, RetryPolicy, WorkValue,
    WorkflowBuilder, WorkflowConfig, WorkflowExecutor, WorkflowNode, WorkflowStatus,
};
use trellis_kernel::unit::{UnitOfWork, UnitRegistry};
use trellis_testing::{EventLog, MockUnit};

fn registry_of(units: &[(&str, &MockUnit)]) -> Arc<UnitRegistry> {
    let registry = UnitRegistry::new();
    for (key, unit) in units {
        registry.register(key, Arc::new((*unit).clone()));
    }
    Arc::new(registry)
}

fn quick_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 10,
        max_delay_ms: 50,
        multiplier: 1.0,
        jitter: 0.0,
        retryable_errors: Vec::new(),
    }
}

#[tokio::test]
async fn mock_unit_echoes_and_records_history() {
    let unit = MockUnit::new("calculator");

    assert_eq!(unit.call_count().await, 0);

    let output = unit.run(WorkValue::from(json!({"a": 1, "b": 2}))).await;
    assert_eq!(output, Ok(WorkValue::from(json!({"a": 1, "b": 2}))));

    assert_eq!(unit.call_count().await, 1);
    assert_eq!(unit.history().await.len(), 1);

    trellis_testing::assert_unit_called!(unit, 1);
}

#[tokio::test]
async fn scripted_outcomes_come_back_in_order() {
    let unit = MockUnit::new("scripted");
    unit.enqueue_ok(WorkValue::from("first")).await;
    unit.enqueue_err("second call fails").await;

    assert_eq!(unit.run(WorkValue::Null).await, Ok(WorkValue::from("first")));
    assert_eq!(
        unit.run(WorkValue::Null).await,
        Err("second call fails".to_string())
    );
    // An exhausted script falls back to echoing the input
    assert_eq!(unit.run(WorkValue::Int(3)).await, Ok(WorkValue::Int(3)));
}

#[tokio::test]
async fn mock_units_drive_a_workflow_chain() {
    trellis_testing::init_test_logging();

    let fetch = MockUnit::new("fetch");
    let publish = MockUnit::new("publish");
    fetch.enqueue_ok(WorkValue::from("payload")).await;

    let registry = registry_of(&[("fetch", &fetch), ("publish", &publish)]);

    let mut builder = WorkflowBuilder::new("pipeline");
    builder
        .add_node(WorkflowNode::new("f", "fetch"))
        .add_node(WorkflowNode::new("p", "publish"))
        .add_edge("f", "p");
    let graph = builder.build().unwrap();

    let executor = WorkflowExecutor::new(registry);
    let record = executor.execute(&graph, WorkValue::Null).await.unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    assert_eq!(record.output, Some(WorkValue::from("payload")));
    // The publisher saw exactly what the fetcher produced
    assert_eq!(publish.history().await, vec![WorkValue::from("payload")]);
    trellis_testing::assert_unit_called!(fetch, 1);
    trellis_testing::assert_unit_called!(publish, 1);
}

#[tokio::test]
async fn single_permit_runs_strictly_serially() {
    let probe = MockUnit::new("probe").with_delay_ms(60);
    let registry = registry_of(&[("probe", &probe)]);

    let mut builder = WorkflowBuilder::new("serial");
    for id in ["n1", "n2", "n3"] {
        builder.add_node(WorkflowNode::new(id, "probe"));
    }
    builder.set_config(WorkflowConfig::default().with_max_concurrency(1));
    let graph = builder.build().unwrap();

    let executor = WorkflowExecutor::new(registry);
    let record = executor.execute(&graph, WorkValue::Null).await.unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    assert_eq!(record.metrics.peak_concurrency, 1);
    assert_eq!(probe.call_count().await, 3);
    // All three nodes share one probe, so any overlap would show up here
    assert_eq!(probe.max_overlap().await, 1);
}

#[tokio::test]
async fn spare_permits_let_independent_nodes_overlap() {
    let probe = MockUnit::new("probe").with_delay_ms(80);
    let registry = registry_of(&[("probe", &probe)]);

    let mut builder = WorkflowBuilder::new("parallel");
    builder.add_node(WorkflowNode::new("n1", "probe"));
    builder.add_node(WorkflowNode::new("n2", "probe"));
    let graph = builder.build().unwrap();

    let executor = WorkflowExecutor::new(registry);
    let record = executor.execute(&graph, WorkValue::Null).await.unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    assert!(record.metrics.peak_concurrency >= 2);
    assert!(probe.max_overlap().await >= 2);
}

#[tokio::test]
async fn scripted_failures_exercise_retry() {
    let flaky = MockUnit::new("flaky");
    flaky.enqueue_err("transient failure").await;
    flaky.enqueue_err("transient failure").await;
    flaky.enqueue_ok(WorkValue::from("recovered")).await;

    let registry = registry_of(&[("flaky", &flaky)]);

    let mut builder = WorkflowBuilder::new("retry");
    builder.add_node(WorkflowNode::new("f", "flaky").with_retry(quick_retry(3)));
    let graph = builder.build().unwrap();

    let executor = WorkflowExecutor::new(registry);
    let record = executor.execute(&graph, WorkValue::Null).await.unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    assert_eq!(record.output, Some(WorkValue::from("recovered")));
    assert_eq!(record.results["f"].attempts, 3);
    assert_eq!(record.metrics.total_retries, 2);
    trellis_testing::assert_unit_called!(flaky, 3);
}

#[tokio::test]
async fn fail_fast_and_resilient_runs_disagree_on_dispatch() {
    // Same shape twice: a failing source with a dependent, plus an
    // unrelated chain that only a resilient run gets to finish.
    async fn run_mode(fail_fast: bool) -> (ExecutionRecord, MockUnit) {
        let bad = MockUnit::new("bad");
        bad.enqueue_err("broken").await;
        let slow = MockUnit::new("slow").with_delay_ms(80);
        let tail = MockUnit::new("tail");

        let registry = registry_of(&[("bad", &bad), ("slow", &slow), ("tail", &tail)]);

        let mut builder = WorkflowBuilder::new("modes");
        builder
            .add_node(WorkflowNode::new("bad", "bad"))
            .add_node(WorkflowNode::new("dep", "tail"))
            .add_node(WorkflowNode::new("slow", "slow"))
            .add_node(WorkflowNode::new("after", "tail"))
            .add_edge("bad", "dep")
            .add_edge("slow", "after");
        builder.set_config(WorkflowConfig::default().with_fail_fast(fail_fast));
        let graph = builder.build().unwrap();

        let executor = WorkflowExecutor::new(registry);
        let record = executor.execute(&graph, WorkValue::Null).await.unwrap();
        (record, tail)
    }

    let (halted, tail) = run_mode(true).await;
    assert_eq!(halted.status, WorkflowStatus::Failed);
    assert_eq!(halted.results["dep"].status, NodeStatus::Skipped);
    // "slow" was in flight when "bad" failed and drains to completion,
    // but "after" is never dispatched
    assert_eq!(halted.results["slow"].status, NodeStatus::Completed);
    assert_eq!(halted.results["after"].status, NodeStatus::Pending);
    assert_eq!(tail.call_count().await, 0);

    let (resilient, tail) = run_mode(false).await;
    assert_eq!(resilient.status, WorkflowStatus::Completed);
    assert_eq!(resilient.results["dep"].status, NodeStatus::Skipped);
    assert_eq!(resilient.results["after"].status, NodeStatus::Completed);
    assert_eq!(tail.call_count().await, 1);
}

#[tokio::test]
async fn resilient_partial_policy_reports_partially_completed() {
    let bad = MockUnit::new("bad");
    bad.enqueue_err("no joy").await;
    let good = MockUnit::new("good");

    let registry = registry_of(&[("bad", &bad), ("good", &good)]);

    let mut builder = WorkflowBuilder::new("partial");
    builder
        .add_node(WorkflowNode::new("bad", "bad"))
        .add_node(WorkflowNode::new("good", "good"));
    let graph = builder.build().unwrap();

    let executor =
        WorkflowExecutor::new(registry).with_partial_success(PartialSuccessPolicy::Partial);
    let record = executor
        .execute(&graph, WorkValue::from("seed"))
        .await
        .unwrap();

    assert_eq!(record.status, WorkflowStatus::PartiallyCompleted);
    // The surviving end feeder echoed the run input straight through
    assert_eq!(record.output, Some(WorkValue::from("seed")));
}

#[tokio::test]
async fn event_log_captures_the_run_lifecycle() {
    let step = MockUnit::new("step");
    let registry = registry_of(&[("step", &step)]);

    let mut builder = WorkflowBuilder::new("observed");
    builder
        .add_node(WorkflowNode::new("a", "step"))
        .add_node(WorkflowNode::new("b", "step"))
        .add_edge("a", "b");
    let graph = builder.build().unwrap();

    let (tx, log) = EventLog::channel(64);
    let executor = WorkflowExecutor::new(registry).with_event_sender(tx);
    let record = executor.execute(&graph, WorkValue::Int(1)).await.unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);
    drop(executor);

    let events = log.into_events().await;
    assert!(matches!(events[0], ExecutionEvent::WorkflowStarted { .. }));
    assert!(events.last().unwrap().is_terminal());

    let started: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::NodeStarted { node_id, .. } => Some(node_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec!["a", "b"]);
}

#[tokio::test]
async fn deadline_leaves_partial_results_and_a_timeout_event() {
    trellis_testing::init_test_logging();

    let crawl = MockUnit::new("crawl").with_delay_ms(600);
    let registry = registry_of(&[("crawl", &crawl)]);

    let mut builder = WorkflowBuilder::new("deadline");
    builder
        .add_node(WorkflowNode::new("c1", "crawl"))
        .add_node(WorkflowNode::new("c2", "crawl"))
        .add_node(WorkflowNode::new("c3", "crawl"))
        .chain(&["c1", "c2", "c3"]);
    builder.set_config(WorkflowConfig::default().with_timeout(1_000));
    let graph = builder.build().unwrap();

    let (tx, log) = EventLog::channel(64);
    let executor = WorkflowExecutor::new(registry).with_event_sender(tx);
    let record = executor.execute(&graph, WorkValue::Null).await.unwrap();
    drop(executor);

    assert_eq!(record.status, WorkflowStatus::Cancelled);
    assert_eq!(record.results["c1"].status, NodeStatus::Completed);
    // c2 was in flight at the deadline and drained to completion; c3
    // never got dispatched
    assert_eq!(record.results["c2"].status, NodeStatus::Completed);
    assert_eq!(record.results["c3"].status, NodeStatus::Pending);
    assert_eq!(crawl.call_count().await, 2);

    let events = log.into_events().await;
    assert!(matches!(
        events.last(),
        Some(ExecutionEvent::WorkflowTimeout { .. })
    ));
}

#[tokio::test]
async fn branch_merge_hands_the_join_a_keyed_map() {
    let left = MockUnit::new("left");
    left.enqueue_ok(WorkValue::Int(1)).await;
    let right = MockUnit::new("right");
    right.enqueue_ok(WorkValue::Int(2)).await;
    let join = MockUnit::new("join");

    let registry = registry_of(&[("left", &left), ("right", &right), ("join", &join)]);

    let mut builder = WorkflowBuilder::new("diamond");
    builder
        .add_node(WorkflowNode::new("l", "left"))
        .add_node(WorkflowNode::new("r", "right"))
        .add_node(WorkflowNode::new("j", "join"))
        .fan_in(&["l", "r"], "j");
    let graph = builder.build().unwrap();

    let executor = WorkflowExecutor::new(registry);
    let record = executor.execute(&graph, WorkValue::Null).await.unwrap();

    assert_eq!(record.status, WorkflowStatus::Completed);
    let seen = join.history().await;
    let map = seen[0].as_map().expect("a keyed map");
    assert_eq!(map["l"], WorkValue::Int(1));
    assert_eq!(map["r"], WorkValue::Int(2));
}

#[tokio::test]
async fn mid_run_snapshot_sees_early_events() {
    let slow = MockUnit::new("slow").with_delay_ms(200);
    let registry = registry_of(&[("slow", &slow)]);

    let mut builder = WorkflowBuilder::new("peek");
    builder.add_node(WorkflowNode::new("s", "slow"));
    let graph = builder.build().unwrap();

    let (tx, log) = EventLog::channel(64);
    let executor = WorkflowExecutor::new(registry).with_event_sender(tx);

    let run = tokio::spawn(async move { executor.execute(&graph, WorkValue::Null).await });
    tokio::time::sleep(Duration::from_millis(80)).await;

    let early = log.snapshot().await;
    assert!(
        early
            .iter()
            .any(|e| matches!(e, ExecutionEvent::WorkflowStarted { .. }))
    );
    assert!(!early.iter().any(|e| e.is_terminal()));

    let record = run.await.unwrap().unwrap();
    assert_eq!(record.status, WorkflowStatus::Completed);
}
