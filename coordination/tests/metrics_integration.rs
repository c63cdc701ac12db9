//! Integration tests for the metrics collector
//!
//! Covers snapshot arithmetic over realistic series and the daily aggregate
//! flush against the in-memory store, including partial-failure behaviour.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use workflow_coordination::metrics::MetricsCollector;
use workflow_coordination::store::{AgentRecord, MemoryStore};
use workflow_coordination::CoordinationError;

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

#[tokio::test]
async fn lifecycle_scenario() {
    let metrics = MetricsCollector::new();
    metrics.record_workflow_start("wf-1", "research", "research");
    metrics.record_workflow_start("wf-2", "poc", "poc");

    let snap = metrics.snapshot().await;
    assert_eq!(snap.workflows.total_started, 2);
    assert_eq!(snap.workflows.active_count, 2);

    metrics.record_workflow_end("wf-1", "research", "research", Duration::from_millis(100), true);
    metrics.record_workflow_end("wf-2", "poc", "poc", Duration::from_millis(200), false);

    let snap = metrics.snapshot().await;
    assert_eq!(snap.workflows.total_completed, 1);
    assert_eq!(snap.workflows.total_failed, 1);
    assert_eq!(snap.workflows.success_rate, 50.0);
    assert_eq!(snap.workflows.avg_duration_ms, 150.0);

    metrics.reset();
    let snap = metrics.snapshot().await;
    assert_eq!(snap.workflows.total_started, 0);
    assert!(snap.workflows.by_type.is_empty());
    assert!(snap.steps.is_empty());
}

#[tokio::test]
async fn percentiles_over_hundred_samples() {
    let metrics = MetricsCollector::new();
    for i in 1..=100u64 {
        let id = format!("wf-{i}");
        metrics.record_workflow_start(&id, "research", "research");
        // Record out of order so sorting is exercised.
        let ms = ((i * 37) % 100 + 1) * 10;
        metrics.record_workflow_end(&id, "research", "research", Duration::from_millis(ms), true);
    }

    let snap = metrics.snapshot().await;
    // Series is 10..=1000 step 10; idx floor(99 * 0.95) = 94, floor(99 * 0.99) = 98.
    assert_eq!(snap.workflows.p95_duration_ms, 950.0);
    assert_eq!(snap.workflows.p99_duration_ms, 990.0);
    assert!(snap.workflows.p99_duration_ms >= 900.0);
    assert_eq!(snap.workflows.avg_duration_ms, 505.0);
    assert_eq!(snap.workflows.success_rate, 100.0);
}

#[tokio::test]
async fn per_type_breakdown() {
    let metrics = MetricsCollector::new();
    for (i, (workflow_type, ok)) in [
        ("research", true),
        ("research", true),
        ("research", false),
        ("documentation", true),
        ("validation", false),
    ]
    .into_iter()
    .enumerate()
    {
        let id = format!("wf-{i}");
        metrics.record_workflow_start(&id, workflow_type, workflow_type);
        metrics.record_workflow_end(
            &id,
            workflow_type,
            workflow_type,
            Duration::from_millis(100 * (i as u64 + 1)),
            ok,
        );
    }
    metrics.record_workflow_start("wf-open", "poc", "poc");

    let snap = metrics.snapshot().await;
    let by_type = &snap.workflows.by_type;
    assert_eq!(
        by_type.keys().cloned().collect::<Vec<_>>(),
        vec!["documentation", "poc", "research", "validation"]
    );

    let research = &by_type["research"];
    assert_eq!((research.started, research.completed, research.failed), (3, 2, 1));
    assert!((research.success_rate - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(research.avg_duration_ms, 200.0);

    let poc = &by_type["poc"];
    assert_eq!(poc.started, 1);
    assert_eq!(poc.success_rate, 0.0);
    assert_eq!(poc.avg_duration_ms, 0.0);

    assert_eq!(snap.workflows.active_count, 1);
    assert_eq!(snap.workflows.active_by_agent_type["poc"], 1);
    assert_eq!(snap.workflows.active_by_agent_type["research"], 0);
}

#[tokio::test]
async fn snapshot_is_detached() {
    let metrics = MetricsCollector::new();
    metrics.record_step_execution("poc", "build", Duration::from_millis(40), true);
    let before = metrics.snapshot().await;

    metrics.record_step_execution("poc", "build", Duration::from_millis(80), false);
    metrics.set_gauge("cpu", 0.5);

    assert_eq!(before.steps["poc/build"].total_executions, 1);
    assert!(before.gauges.is_empty());

    let after = metrics.snapshot().await;
    assert_eq!(after.steps["poc/build"].total_executions, 2);
    assert_eq!(after.steps["poc/build"].avg_duration_ms, 60.0);
}

#[tokio::test]
async fn snapshot_includes_agent_summary() {
    let store = MemoryStore::new().shared();
    store.upsert_agent(AgentRecord::new("r-1", "research", 4).with_workload(2));
    store.upsert_agent(AgentRecord::new("r-2", "research", 4));
    store.upsert_agent(AgentRecord::new("p-1", "poc", 2).with_workload(2));

    let metrics = MetricsCollector::with_store(store);
    let snap = metrics.snapshot().await;
    assert_eq!(snap.agents.total_registered, 3);
    assert_eq!(snap.agents.total_active, 3);
    assert_eq!(snap.agents.by_type["research"].active, 2);
    assert!((snap.agents.by_type["research"].avg_workload - 25.0).abs() < 1e-9);
    assert!((snap.agents.by_type["poc"].avg_workload - 100.0).abs() < 1e-9);

    let json = serde_json::to_value(&snap).unwrap();
    assert!(json["system"]["uptime_seconds"].is_u64());
    assert_eq!(json["workflows"]["total_started"], 0);
}

// ── Flush ───────────────────────────────────────────────────────────

fn collector_with_types(store: Arc<MemoryStore>, types: &[&str]) -> MetricsCollector {
    let metrics = MetricsCollector::with_store(store);
    for (i, workflow_type) in types.iter().enumerate() {
        let id = format!("wf-{i}");
        metrics.record_workflow_start(&id, workflow_type, workflow_type);
        metrics.record_workflow_end(&id, workflow_type, workflow_type, Duration::from_millis(99), true);
    }
    metrics
}

#[tokio::test]
async fn flush_is_an_upsert() {
    let store = MemoryStore::new().shared();
    let metrics = collector_with_types(store.clone(), &["research", "poc"]);

    assert_eq!(metrics.flush_for_date(date()).await.unwrap(), 2);
    metrics.record_workflow_start("wf-x", "poc", "poc");
    assert_eq!(metrics.flush_for_date(date()).await.unwrap(), 2);

    assert_eq!(store.aggregates().len(), 2);
    let poc = store.aggregate(date(), "poc").unwrap();
    assert_eq!(poc.total_workflows, 2);
    assert_eq!(poc.successful_workflows, 1);
    assert_eq!(poc.avg_execution_time_ms, 99);
}

#[tokio::test]
async fn flush_aborts_on_first_failure() {
    let store = MemoryStore::new().shared();
    store.reject_aggregates_for("poc");
    let metrics = collector_with_types(store.clone(), &["validation", "poc", "documentation"]);

    let err = metrics.flush_for_date(date()).await.unwrap_err();
    match &err {
        CoordinationError::Flush { workflow_type, .. } => assert_eq!(workflow_type, "poc"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().starts_with("failed to flush metrics for poc:"));

    // Types sort ascending: documentation went out, validation never did.
    assert!(store.aggregate(date(), "documentation").is_some());
    assert!(store.aggregate(date(), "validation").is_none());
}

#[tokio::test]
async fn flush_with_cancelled_token() {
    let store = MemoryStore::new().shared();
    let token = tokio_util::sync::CancellationToken::new();
    token.cancel();
    let metrics = MetricsCollector::with_store(store.clone()).with_cancellation(token);
    metrics.record_workflow_start("wf-1", "poc", "poc");

    let err = metrics.flush_for_date(date()).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(store.aggregates().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_recording_is_consistent() {
    let metrics = Arc::new(MetricsCollector::new());
    let mut handles = Vec::new();
    for t in 0..8 {
        let metrics = metrics.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..50 {
                let id = format!("wf-{t}-{i}");
                metrics.record_workflow_start(&id, "research", "research");
                metrics.record_workflow_end(&id, "research", "research", Duration::from_millis(10), i % 2 == 0);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let snap = metrics.snapshot().await;
    assert_eq!(snap.workflows.total_started, 400);
    assert_eq!(snap.workflows.total_completed, 200);
    assert_eq!(snap.workflows.total_failed, 200);
    assert_eq!(snap.workflows.active_count, 0);
    assert_eq!(snap.workflows.active_by_agent_type["research"], 0);
}
