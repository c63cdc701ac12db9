//! In-process metrics collection
//!
//! Counters, duration series and gauges live behind one `RwLock`. Recording
//! takes the write lock briefly; snapshots copy state under the read lock
//! and do all arithmetic after releasing it.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::keys::{CounterKey, StepKey, StepStatus, TimerKey, WorkflowOutcome};
use super::snapshot::{
    average_ms, percent, percentile_ms, MetricsSnapshot, StepMetrics, SystemMetrics, TypeMetrics,
    WorkflowMetrics,
};
use crate::error::{cancellable, CoordinationError, CoordinationResult};
use crate::store::{AgentSummary, DailyAggregate, SharedStore};

/// Collector tuning
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Keep at most this many samples per duration series, oldest dropped
    /// first; 0 keeps everything.
    pub max_timer_samples: usize,
}

#[derive(Debug, Clone, Default)]
struct MetricsState {
    counters: HashMap<CounterKey, u64>,
    timers: HashMap<TimerKey, Vec<Duration>>,
    gauges: BTreeMap<String, f64>,
}

impl MetricsState {
    fn counter(&self, key: &CounterKey) -> u64 {
        self.counters.get(key).copied().unwrap_or(0)
    }

    fn bump(&mut self, key: CounterKey) {
        *self.counters.entry(key).or_insert(0) += 1;
    }

    fn timer(&self, key: &TimerKey) -> &[Duration] {
        self.timers.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    fn push_sample(&mut self, key: TimerKey, duration: Duration, cap: usize) {
        let series = self.timers.entry(key).or_default();
        series.push(duration);
        if cap > 0 && series.len() > cap {
            let excess = series.len() - cap;
            series.drain(..excess);
        }
    }

    /// Workflow types with at least one start, ascending
    fn started_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .counters
            .iter()
            .filter_map(|(key, count)| match key {
                CounterKey::WorkflowType(WorkflowOutcome::Started, t) if *count > 0 => {
                    Some(t.clone())
                }
                _ => None,
            })
            .collect();
        types.sort();
        types
    }

    fn type_counts(&self, workflow_type: &str) -> (u64, u64, u64) {
        let get = |outcome| self.counter(&CounterKey::WorkflowType(outcome, workflow_type.to_string()));
        (
            get(WorkflowOutcome::Started),
            get(WorkflowOutcome::Completed),
            get(WorkflowOutcome::Failed),
        )
    }
}

/// Aggregates workflow, step and agent metrics in process
pub struct MetricsCollector {
    state: RwLock<MetricsState>,
    store: Option<SharedStore>,
    config: MetricsConfig,
    cancel: Option<CancellationToken>,
    started_at: Instant,
}

impl MetricsCollector {
    /// Collector without a persistence collaborator
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MetricsState::default()),
            store: None,
            config: MetricsConfig::default(),
            cancel: None,
            started_at: Instant::now(),
        }
    }

    /// Collector that reads agent summaries from and flushes aggregates to `store`
    pub fn with_store(store: SharedStore) -> Self {
        Self {
            store: Some(store),
            ..Self::new()
        }
    }

    pub fn with_config(mut self, config: MetricsConfig) -> Self {
        self.config = config;
        self
    }

    /// Abort in-flight store calls when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn record_workflow_start(&self, workflow_id: &str, workflow_type: &str, agent_type: &str) {
        let mut state = self.state.write();
        state.bump(CounterKey::Workflows(WorkflowOutcome::Started));
        state.bump(CounterKey::WorkflowType(
            WorkflowOutcome::Started,
            workflow_type.to_string(),
        ));
        state.bump(CounterKey::ActiveAgents(agent_type.to_string()));
        debug!(workflow_id, workflow_type, agent_type, "Recorded workflow start");
    }

    pub fn record_workflow_end(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        agent_type: &str,
        duration: Duration,
        success: bool,
    ) {
        let cap = self.config.max_timer_samples;
        let outcome = WorkflowOutcome::finished(success);

        let mut state = self.state.write();
        state.push_sample(TimerKey::WorkflowType(workflow_type.to_string()), duration, cap);
        state.push_sample(TimerKey::AllWorkflows, duration, cap);
        state.bump(CounterKey::Workflows(outcome));
        state.bump(CounterKey::WorkflowType(outcome, workflow_type.to_string()));

        // Floor at zero when an end arrives without a matching start.
        let active = state
            .counters
            .entry(CounterKey::ActiveAgents(agent_type.to_string()))
            .or_insert(0);
        *active = active.saturating_sub(1);

        debug!(
            workflow_id,
            workflow_type,
            agent_type,
            duration_ms = duration.as_millis() as u64,
            success,
            "Recorded workflow end"
        );
    }

    pub fn record_step_execution(
        &self,
        workflow_type: &str,
        step: &str,
        duration: Duration,
        success: bool,
    ) {
        let key = StepKey::new(workflow_type, step);
        let cap = self.config.max_timer_samples;

        let mut state = self.state.write();
        state.push_sample(TimerKey::Step(key.clone()), duration, cap);
        state.bump(CounterKey::Step(StepStatus::from_success(success), key));
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        self.state.write().gauges.insert(name.to_string(), value);
    }

    pub fn increment_counter(&self, name: &str) {
        self.state.write().bump(CounterKey::Named(name.to_string()));
    }

    /// Clear all counters, timers and gauges
    pub fn reset(&self) {
        *self.state.write() = MetricsState::default();
        debug!("Metrics reset");
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Detached point-in-time view of every metric
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.read().clone();

        let total_started = state.counter(&CounterKey::Workflows(WorkflowOutcome::Started));
        let total_completed = state.counter(&CounterKey::Workflows(WorkflowOutcome::Completed));
        let total_failed = state.counter(&CounterKey::Workflows(WorkflowOutcome::Failed));
        let all = state.timer(&TimerKey::AllWorkflows);

        let by_type = state
            .started_types()
            .into_iter()
            .map(|workflow_type| {
                let (started, completed, failed) = state.type_counts(&workflow_type);
                let metrics = TypeMetrics {
                    started,
                    completed,
                    failed,
                    success_rate: percent(completed, started),
                    avg_duration_ms: average_ms(
                        state.timer(&TimerKey::WorkflowType(workflow_type.clone())),
                    ),
                };
                (workflow_type, metrics)
            })
            .collect();

        let mut active_by_agent_type = BTreeMap::new();
        let mut counters = BTreeMap::new();
        let mut steps: BTreeMap<String, StepMetrics> = BTreeMap::new();
        let mut step_keys: Vec<&StepKey> = Vec::new();
        for (key, &value) in &state.counters {
            match key {
                CounterKey::ActiveAgents(agent_type) => {
                    active_by_agent_type.insert(agent_type.clone(), value);
                }
                CounterKey::Named(name) => {
                    counters.insert(name.clone(), value);
                }
                CounterKey::Step(status, step_key) => {
                    let entry = steps.entry(step_key.to_string()).or_default();
                    match status {
                        StepStatus::Success => entry.successes = value,
                        StepStatus::Failure => entry.failures = value,
                    }
                    step_keys.push(step_key);
                }
                CounterKey::Workflows(_) | CounterKey::WorkflowType(..) => {}
            }
        }
        for step_key in step_keys {
            if let Some(entry) = steps.get_mut(&step_key.to_string()) {
                entry.total_executions = entry.successes + entry.failures;
                entry.success_rate = percent(entry.successes, entry.total_executions);
                entry.avg_duration_ms = average_ms(state.timer(&TimerKey::Step(step_key.clone())));
            }
        }

        let workflows = WorkflowMetrics {
            total_started,
            total_completed,
            total_failed,
            active_count: total_started as i64 - total_completed as i64 - total_failed as i64,
            success_rate: percent(total_completed, total_started),
            avg_duration_ms: average_ms(all),
            p95_duration_ms: percentile_ms(all, 0.95),
            p99_duration_ms: percentile_ms(all, 0.99),
            by_type,
            active_by_agent_type,
        };

        MetricsSnapshot {
            timestamp: Utc::now(),
            system: SystemMetrics {
                uptime_seconds: self.uptime().as_secs(),
            },
            workflows,
            agents: self.agent_summary().await,
            steps,
            gauges: state.gauges.clone(),
            counters,
        }
    }

    async fn agent_summary(&self) -> AgentSummary {
        let Some(store) = &self.store else {
            return AgentSummary::default();
        };
        match cancellable(self.cancel.as_ref(), store.agent_summary()).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Agent summary unavailable, reporting empty");
                AgentSummary::default()
            }
        }
    }

    /// Persist today's per-type aggregates; returns how many types were written
    pub async fn flush_to_store(&self) -> CoordinationResult<usize> {
        self.flush_for_date(Local::now().date_naive()).await
    }

    /// Persist per-type aggregates under `date`, stopping at the first failure
    pub async fn flush_for_date(&self, date: NaiveDate) -> CoordinationResult<usize> {
        let Some(store) = &self.store else {
            debug!("No store configured, skipping metrics flush");
            return Ok(0);
        };

        let aggregates: Vec<DailyAggregate> = {
            let state = self.state.read();
            state
                .started_types()
                .into_iter()
                .map(|workflow_type| {
                    let (started, completed, failed) = state.type_counts(&workflow_type);
                    let avg = average_ms(state.timer(&TimerKey::WorkflowType(workflow_type.clone())));
                    DailyAggregate {
                        date,
                        agent_type: workflow_type.clone(),
                        workflow_type,
                        total_workflows: started,
                        successful_workflows: completed,
                        failed_workflows: failed,
                        avg_execution_time_ms: avg as u64,
                    }
                })
                .collect()
        };

        let mut written = 0;
        for aggregate in &aggregates {
            let write = store.upsert_daily_aggregate(aggregate);
            let result = match self.cancel.as_ref() {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(CoordinationError::Cancelled),
                    result = write => result,
                },
                None => write.await,
            };
            result.map_err(|source| CoordinationError::Flush {
                workflow_type: aggregate.workflow_type.clone(),
                source,
            })?;
            written += 1;
        }

        info!(%date, types = written, "Flushed workflow metrics");
        Ok(written)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AgentRecord, MemoryStore};

    #[tokio::test]
    async fn test_start_and_end_counts() {
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
        assert_eq!(snap.workflows.active_count, 0);
        assert_eq!(snap.workflows.by_type["poc"].failed, 1);
    }

    #[tokio::test]
    async fn test_active_gauge_floors_at_zero() {
        let metrics = MetricsCollector::new();
        metrics.record_workflow_end("wf-1", "poc", "poc", Duration::from_millis(5), true);
        metrics.record_workflow_end("wf-2", "poc", "poc", Duration::from_millis(5), true);
        metrics.record_workflow_start("wf-3", "poc", "poc");

        let snap = metrics.snapshot().await;
        assert_eq!(snap.workflows.active_by_agent_type["poc"], 1);
        // Types with ends but no recorded start stay out of the breakdown.
        metrics.reset();
        metrics.record_workflow_end("wf-4", "documentation", "docs", Duration::ZERO, true);
        assert!(metrics.snapshot().await.workflows.by_type.is_empty());
    }

    #[tokio::test]
    async fn test_step_breakdown() {
        let metrics = MetricsCollector::new();
        metrics.record_step_execution("poc", "compile", Duration::from_millis(10), true);
        metrics.record_step_execution("poc", "compile", Duration::from_millis(30), false);
        metrics.record_step_execution("poc", "test", Duration::from_millis(50), true);

        let snap = metrics.snapshot().await;
        let compile = &snap.steps["poc/compile"];
        assert_eq!(compile.total_executions, 2);
        assert_eq!(compile.successes, 1);
        assert_eq!(compile.failures, 1);
        assert_eq!(compile.success_rate, 50.0);
        assert_eq!(compile.avg_duration_ms, 20.0);
        assert_eq!(snap.steps["poc/test"].success_rate, 100.0);
    }

    #[tokio::test]
    async fn test_gauges_and_named_counters() {
        let metrics = MetricsCollector::new();
        metrics.set_gauge("queue.depth", 4.0);
        metrics.set_gauge("queue.depth", 7.0);
        metrics.increment_counter("handoffs");
        metrics.increment_counter("handoffs");

        let snap = metrics.snapshot().await;
        assert_eq!(snap.gauges["queue.depth"], 7.0);
        assert_eq!(snap.counters["handoffs"], 2);

        metrics.reset();
        let snap = metrics.snapshot().await;
        assert!(snap.gauges.is_empty());
        assert!(snap.counters.is_empty());
        assert_eq!(snap.workflows.total_started, 0);
    }

    #[tokio::test]
    async fn test_timer_cap_keeps_newest() {
        let metrics = MetricsCollector::new().with_config(MetricsConfig {
            max_timer_samples: 2,
        });
        for ms in [1000, 20, 40] {
            metrics.record_workflow_start("wf", "poc", "poc");
            metrics.record_workflow_end("wf", "poc", "poc", Duration::from_millis(ms), true);
        }
        assert_eq!(metrics.snapshot().await.workflows.avg_duration_ms, 30.0);
    }

    #[tokio::test]
    async fn test_snapshot_swallows_store_failure() {
        let store = MemoryStore::new().shared();
        store.upsert_agent(AgentRecord::new("r-1", "research", 2));
        let metrics = MetricsCollector::with_store(store.clone());

        assert_eq!(metrics.snapshot().await.agents.total_registered, 1);
        store.set_unavailable(true);
        assert_eq!(metrics.snapshot().await.agents, AgentSummary::default());
    }

    #[tokio::test]
    async fn test_flush_without_store_is_noop() {
        let metrics = MetricsCollector::new();
        metrics.record_workflow_start("wf-1", "poc", "poc");
        assert_eq!(metrics.flush_to_store().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flush_writes_started_types() {
        let store = MemoryStore::new().shared();
        let metrics = MetricsCollector::with_store(store.clone());
        metrics.record_workflow_start("wf-1", "research", "research");
        metrics.record_workflow_end("wf-1", "research", "research", Duration::from_millis(250), true);

        let date = NaiveDate::from_ymd_opt(2026, 5, 1).unwrap();
        assert_eq!(metrics.flush_for_date(date).await.unwrap(), 1);

        let row = store.aggregate(date, "research").unwrap();
        assert_eq!(row.agent_type, "research");
        assert_eq!(row.total_workflows, 1);
        assert_eq!(row.successful_workflows, 1);
        assert_eq!(row.avg_execution_time_ms, 250);
    }
}
