//! Composite agent scoring
//!
//! ```text
//! availability = available_slots / max_workload   (0 if max_workload == 0)
//! success      = success_rate / 100
//! speed        = max(0, 1 - avg_duration_ms / 600000)
//! score        = 0.40*availability + 0.35*success + 0.25*speed
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{CoordinationError, CoordinationResult};
use crate::store::{AgentRecord, AssignmentOutcomes};

pub const AVAILABILITY_WEIGHT: f64 = 0.40;
pub const SUCCESS_WEIGHT: f64 = 0.35;
pub const SPEED_WEIGHT: f64 = 0.25;

/// Average duration at which the speed component reaches zero (10 minutes)
pub const SPEED_HORIZON_MS: f64 = 600_000.0;

/// Success rate assumed for agents with no assignment history
pub const DEFAULT_SUCCESS_RATE: f64 = 100.0;

/// A candidate agent with its computed score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentScore {
    pub agent_id: String,
    pub agent_type: String,
    /// In `[0, 1]`, higher is better
    pub score: f64,
    pub current_workload: u32,
    pub max_workload: u32,
    pub available_slots: u32,
    /// Percent, in `[0, 100]`
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub reason: String,
}

impl AgentScore {
    /// Score an agent from its directory row and history
    pub fn from_record(agent: &AgentRecord, success_rate: f64, avg_duration_ms: f64) -> Self {
        let available_slots = agent.available_slots();
        Self {
            agent_id: agent.agent_id.clone(),
            agent_type: agent.agent_type.clone(),
            score: score_agent(available_slots, agent.max_workload, success_rate, avg_duration_ms),
            current_workload: agent.current_workload,
            max_workload: agent.max_workload,
            available_slots,
            success_rate,
            avg_duration_ms,
            reason: String::new(),
        }
    }

    /// Human-readable explanation of why this agent was picked
    pub fn explain(&self) -> String {
        format!(
            "selected {} (score={:.2}): {}/{} slots used, {:.0}% success rate, avg {:.0}ms",
            self.agent_id,
            self.score,
            self.current_workload,
            self.max_workload,
            self.success_rate,
            self.avg_duration_ms
        )
    }

    /// Ordering used for selection: higher score first, then smaller id
    pub fn outranks(&self, other: &AgentScore) -> bool {
        match self.score.total_cmp(&other.score) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.agent_id < other.agent_id,
        }
    }
}

/// Weighted composite score
pub fn score_agent(
    available_slots: u32,
    max_workload: u32,
    success_rate: f64,
    avg_duration_ms: f64,
) -> f64 {
    let availability = if max_workload == 0 {
        0.0
    } else {
        f64::from(available_slots.min(max_workload)) / f64::from(max_workload)
    };
    let success = (success_rate / 100.0).clamp(0.0, 1.0);
    let speed = (1.0 - avg_duration_ms / SPEED_HORIZON_MS).clamp(0.0, 1.0);

    AVAILABILITY_WEIGHT * availability + SUCCESS_WEIGHT * success + SPEED_WEIGHT * speed
}

/// Historical success rate in percent; 100 without history
pub fn success_rate(agent_id: &str, outcomes: AssignmentOutcomes) -> CoordinationResult<f64> {
    if outcomes.completed > outcomes.total {
        return Err(CoordinationError::Internal(format!(
            "agent {agent_id} has {} completed of {} assignments",
            outcomes.completed, outcomes.total
        )));
    }
    if outcomes.total == 0 {
        return Ok(DEFAULT_SUCCESS_RATE);
    }
    Ok(outcomes.completed as f64 / outcomes.total as f64 * 100.0)
}
