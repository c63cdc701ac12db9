//! Agent selection, handoff planning and load rebalancing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::scoring::{success_rate, AgentScore};
use crate::error::{cancellable, CoordinationError, CoordinationResult};
use crate::store::{AgentRecord, SharedStore};

/// Load thresholds for rebalancing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    /// Load factor at or above which an agent is overloaded
    pub overload_threshold: f64,
    /// Load factor below which an agent can take work from an overloaded peer
    pub underload_threshold: f64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            overload_threshold: 0.80,
            underload_threshold: 0.50,
        }
    }
}

/// A planned transfer of a workflow to another agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffPlan {
    pub workflow_id: String,
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub to_agent_type: String,
    pub score: f64,
    pub reason: String,
    pub result_count: u64,
    pub planned_at: DateTime<Utc>,
}

/// Suggested move from an overloaded agent to an underloaded peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSuggestion {
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub agent_type: String,
    pub from_load_percent: f64,
    pub to_load_percent: f64,
    pub reason: String,
}

/// Stateless optimizer over the persistence collaborator
pub struct HandoffOptimizer {
    store: SharedStore,
    config: HandoffConfig,
    cancel: Option<CancellationToken>,
}

impl HandoffOptimizer {
    pub fn new(store: SharedStore) -> Self {
        Self::with_config(store, HandoffConfig::default())
    }

    pub fn with_config(store: SharedStore, config: HandoffConfig) -> Self {
        Self {
            store,
            config,
            cancel: None,
        }
    }

    /// Abort in-flight store calls when `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &HandoffConfig {
        &self.config
    }

    /// Pick the highest-scoring available agent of `workflow_type`
    pub async fn select_best_agent(&self, workflow_type: &str) -> CoordinationResult<AgentScore> {
        if workflow_type.trim().is_empty() {
            return Err(CoordinationError::Invalid(
                "workflow type must not be empty".to_string(),
            ));
        }

        let cancel = self.cancel.as_ref();
        let candidates = cancellable(cancel, self.store.candidate_agents(workflow_type)).await?;

        let mut best: Option<AgentScore> = None;
        for agent in candidates.iter().filter(|a| a.has_capacity()) {
            let outcomes =
                cancellable(cancel, self.store.assignment_outcomes(&agent.agent_id)).await?;
            let rate = match success_rate(&agent.agent_id, outcomes) {
                Ok(rate) => rate,
                Err(e) => {
                    warn!(agent_id = %agent.agent_id, error = %e, "Skipping candidate with malformed history");
                    continue;
                }
            };
            let avg_ms = cancellable(cancel, self.store.average_duration_ms(&agent.agent_id))
                .await?
                .unwrap_or(0.0);

            let scored = AgentScore::from_record(agent, rate, avg_ms);
            debug!(
                agent_id = %scored.agent_id,
                score = scored.score,
                success_rate = rate,
                avg_duration_ms = avg_ms,
                "Scored candidate agent"
            );

            if best.as_ref().map_or(true, |b| scored.outranks(b)) {
                best = Some(scored);
            }
        }

        let mut best = best.ok_or_else(|| CoordinationError::NotFound(workflow_type.to_string()))?;
        best.reason = best.explain();
        Ok(best)
    }

    /// Plan moving `workflow_id` to the best agent of `target_type`
    pub async fn plan_handoff(
        &self,
        workflow_id: &str,
        from_agent_id: &str,
        target_type: &str,
    ) -> CoordinationResult<HandoffPlan> {
        if workflow_id.trim().is_empty() {
            return Err(CoordinationError::Invalid(
                "workflow id must not be empty".to_string(),
            ));
        }

        let target = self
            .select_best_agent(target_type)
            .await
            .map_err(|e| CoordinationError::Handoff(Box::new(e)))?;

        let result_count =
            cancellable(self.cancel.as_ref(), self.store.result_count(workflow_id)).await?;

        info!(
            workflow_id,
            from_agent_id,
            to_agent_id = %target.agent_id,
            score = target.score,
            "Planned agent handoff"
        );

        Ok(HandoffPlan {
            workflow_id: workflow_id.to_string(),
            from_agent_id: from_agent_id.to_string(),
            to_agent_id: target.agent_id,
            to_agent_type: target.agent_type,
            score: target.score,
            reason: target.reason,
            result_count,
            planned_at: Utc::now(),
        })
    }

    /// Suggest at most one move per overloaded agent
    pub async fn rebalance_agents(&self) -> CoordinationResult<Vec<RebalanceSuggestion>> {
        let mut agents: Vec<AgentRecord> =
            cancellable(self.cancel.as_ref(), self.store.active_agents()).await?;

        agents.sort_by(|a, b| {
            b.load_factor()
                .total_cmp(&a.load_factor())
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });

        let mut suggestions = Vec::new();
        for overloaded in &agents {
            let from_load = overloaded.load_factor();
            if from_load < self.config.overload_threshold {
                continue;
            }

            let target = agents.iter().find(|candidate| {
                candidate.agent_id != overloaded.agent_id
                    && candidate.agent_type == overloaded.agent_type
                    && candidate.load_factor() < self.config.underload_threshold
            });

            if let Some(target) = target {
                let from_percent = from_load * 100.0;
                let to_percent = target.load_factor() * 100.0;
                suggestions.push(RebalanceSuggestion {
                    from_agent_id: overloaded.agent_id.clone(),
                    to_agent_id: target.agent_id.clone(),
                    agent_type: overloaded.agent_type.clone(),
                    from_load_percent: from_percent,
                    to_load_percent: to_percent,
                    reason: format!(
                        "{} is at {:.0}% load, {} is at {:.0}% load",
                        overloaded.agent_id, from_percent, target.agent_id, to_percent
                    ),
                });
            }
        }

        info!(
            agents = agents.len(),
            suggestions = suggestions.len(),
            "Rebalance check complete"
        );
        Ok(suggestions)
    }
}
