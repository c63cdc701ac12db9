//! Coordinator facade
//!
//! Wires one [`EventBus`], one [`MetricsCollector`] and one
//! [`HandoffOptimizer`] over a shared store. The three components never call
//! each other; the facade is the only place where a lifecycle call both
//! records metrics and publishes the matching event.
//!
//! ```text
//!                 ┌──────────────┐
//!  workflow  ───▶ │ Coordinator  │ ───▶ EventBus (publish)
//!  engine         └──────┬───────┘ ───▶ MetricsCollector (record)
//!                        │
//!                        ▼
//!                 HandoffOptimizer ───▶ CoordinationStore
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CoordinationConfig;
use crate::error::{CoordinationError, CoordinationResult};
use crate::events::{Event, EventBus, EventData, EventId, EventType, SharedEventBus};
use crate::handoff::{HandoffOptimizer, HandoffPlan, RebalanceSuggestion};
use crate::metrics::MetricsCollector;
use crate::retry::{retry_when, RetryError};
use crate::store::SharedStore;

/// Named counter bumped for every successful handoff plan
pub const HANDOFFS_PLANNED: &str = "handoffs.planned";

/// Identity of a running workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub workflow_id: String,
    pub workflow_type: String,
    pub agent_id: String,
    pub agent_type: String,
}

impl WorkflowRun {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_type: impl Into<String>,
        agent_id: impl Into<String>,
        agent_type: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            workflow_type: workflow_type.into(),
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
        }
    }

    fn event(&self, event_type: EventType) -> Event {
        Event::new(event_type)
            .workflow(&self.workflow_id)
            .agent(&self.agent_id)
    }
}

/// What one maintenance pass did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub flushed_types: usize,
    pub suggestions: Vec<RebalanceSuggestion>,
}

pub struct Coordinator {
    config: CoordinationConfig,
    events: SharedEventBus,
    metrics: Arc<MetricsCollector>,
    handoff: HandoffOptimizer,
}

impl Coordinator {
    pub fn new(store: SharedStore, config: CoordinationConfig) -> Self {
        Self::build(store, config, None)
    }

    /// Like [`Coordinator::new`], with store calls aborted when `token` fires
    pub fn with_cancellation(
        store: SharedStore,
        config: CoordinationConfig,
        token: CancellationToken,
    ) -> Self {
        Self::build(store, config, Some(token))
    }

    fn build(store: SharedStore, config: CoordinationConfig, cancel: Option<CancellationToken>) -> Self {
        let events = EventBus::with_config(config.events.clone()).shared();
        let mut metrics = MetricsCollector::with_store(store.clone()).with_config(config.metrics.clone());
        let mut handoff = HandoffOptimizer::with_config(store, config.handoff.clone());
        if let Some(token) = cancel {
            metrics = metrics.with_cancellation(token.clone());
            handoff = handoff.with_cancellation(token);
        }
        Self {
            config,
            events,
            metrics: Arc::new(metrics),
            handoff,
        }
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn handoff(&self) -> &HandoffOptimizer {
        &self.handoff
    }

    pub fn workflow_started(&self, run: &WorkflowRun) -> EventId {
        self.metrics
            .record_workflow_start(&run.workflow_id, &run.workflow_type, &run.agent_type);
        self.events.publish(run.event(EventType::WorkflowStarted).with_data(
            EventData::WorkflowStarted {
                workflow_type: run.workflow_type.clone(),
                agent_type: run.agent_type.clone(),
                issue_id: None,
            },
        ))
    }

    /// Record the end of a workflow; `outcome` carries the failure message
    pub fn workflow_finished(
        &self,
        run: &WorkflowRun,
        duration: Duration,
        outcome: Result<(), String>,
    ) -> EventId {
        let success = outcome.is_ok();
        self.metrics.record_workflow_end(
            &run.workflow_id,
            &run.workflow_type,
            &run.agent_type,
            duration,
            success,
        );

        let event_type = if success {
            EventType::WorkflowCompleted
        } else {
            EventType::WorkflowFailed
        };
        self.events
            .publish(run.event(event_type).with_data(EventData::WorkflowFinished {
                workflow_type: run.workflow_type.clone(),
                agent_type: run.agent_type.clone(),
                duration_ms: duration.as_millis() as u64,
                success,
                error: outcome.err(),
            }))
    }

    pub fn step_finished(
        &self,
        run: &WorkflowRun,
        step: &str,
        attempt: u32,
        duration: Duration,
        outcome: Result<(), String>,
    ) -> EventId {
        let success = outcome.is_ok();
        self.metrics
            .record_step_execution(&run.workflow_type, step, duration, success);

        let event_type = if success {
            EventType::StepCompleted
        } else {
            EventType::StepFailed
        };
        self.events.publish(
            run.event(event_type)
                .step(step)
                .with_data(EventData::StepProgress {
                    workflow_type: run.workflow_type.clone(),
                    step: step.to_string(),
                    attempt,
                    duration_ms: Some(duration.as_millis() as u64),
                    error: outcome.err(),
                }),
        )
    }

    /// Plan a handoff and announce it on the bus
    pub async fn plan_handoff(
        &self,
        workflow_id: &str,
        from_agent_id: &str,
        target_type: &str,
    ) -> CoordinationResult<HandoffPlan> {
        let plan = self
            .handoff
            .plan_handoff(workflow_id, from_agent_id, target_type)
            .await?;

        self.metrics.increment_counter(HANDOFFS_PLANNED);
        let from_agent_id = (!plan.from_agent_id.is_empty()).then(|| plan.from_agent_id.clone());
        self.events.publish(
            Event::new(EventType::AgentHandoff)
                .workflow(&plan.workflow_id)
                .agent(&plan.to_agent_id)
                .with_data(EventData::Handoff {
                    from_agent_id,
                    to_agent_id: plan.to_agent_id.clone(),
                    to_agent_type: plan.to_agent_type.clone(),
                    score: plan.score,
                    reason: plan.reason.clone(),
                }),
        );
        Ok(plan)
    }

    /// Flush metrics (with retry) and compute rebalance suggestions
    pub async fn maintenance_tick(
        &self,
        cancel: &CancellationToken,
    ) -> CoordinationResult<MaintenanceReport> {
        let policy = &self.config.maintenance.flush_retry;
        let metrics = &self.metrics;
        let flushed_types = retry_when(
            policy,
            cancel,
            move |attempt| {
                debug!(attempt, "Flushing metrics");
                metrics.flush_to_store()
            },
            |e: &CoordinationError| {
                matches!(
                    e,
                    CoordinationError::Flush { .. } | CoordinationError::Unavailable(_)
                )
            },
        )
        .await
        .map_err(|e| match e {
            RetryError::Cancelled => CoordinationError::Cancelled,
            RetryError::Exhausted { last, .. } | RetryError::Fatal(last) => last,
        })?;

        let suggestions = self.handoff.rebalance_agents().await?;
        for suggestion in &suggestions {
            info!(
                from = %suggestion.from_agent_id,
                to = %suggestion.to_agent_id,
                reason = %suggestion.reason,
                "Rebalance suggested"
            );
        }

        Ok(MaintenanceReport {
            flushed_types,
            suggestions,
        })
    }

    /// Run [`Coordinator::maintenance_tick`] on the configured interval until cancelled
    pub async fn run_maintenance(&self, cancel: CancellationToken) {
        self.run_maintenance_with(cancel, |report| {
            debug!(
                flushed_types = report.flushed_types,
                suggestions = report.suggestions.len(),
                "Maintenance pass complete"
            )
        })
        .await
    }

    /// Same loop as [`Coordinator::run_maintenance`], handing each report to `on_report`
    pub async fn run_maintenance_with<F>(&self, cancel: CancellationToken, mut on_report: F)
    where
        F: FnMut(&MaintenanceReport),
    {
        let mut ticker = tokio::time::interval(self.config.maintenance.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.maintenance_tick(&cancel).await {
                Ok(report) => on_report(&report),
                Err(e) if e.is_cancelled() => break,
                Err(e) => warn!(error = %e, "Maintenance pass failed"),
            }
        }

        info!("Maintenance loop stopped");
    }
}
