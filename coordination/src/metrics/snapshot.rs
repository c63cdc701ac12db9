//! Point-in-time metrics views
//!
//! Everything here is an owned copy; nothing aliases collector state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::AgentSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub workflows: WorkflowMetrics,
    pub agents: AgentSummary,
    /// Keyed `workflow_type/step`
    pub steps: BTreeMap<String, StepMetrics>,
    pub gauges: BTreeMap<String, f64>,
    pub counters: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub total_started: u64,
    pub total_completed: u64,
    pub total_failed: u64,
    /// `started - completed - failed`
    pub active_count: i64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
    pub p99_duration_ms: f64,
    pub by_type: BTreeMap<String, TypeMetrics>,
    /// Running workflows per agent type
    pub active_by_agent_type: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeMetrics {
    pub started: u64,
    pub completed: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    pub total_executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

/// `part / whole * 100`, 0 when `whole` is 0
pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Whole milliseconds of the summed series divided by its length
pub(crate) fn average_ms(durations: &[Duration]) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    let total: Duration = durations.iter().sum();
    total.as_millis() as f64 / durations.len() as f64
}

/// Nearest-rank percentile at index `floor((n - 1) * p)` over a sorted copy
pub(crate) fn percentile_ms(durations: &[Duration], p: f64) -> f64 {
    if durations.is_empty() {
        return 0.0;
    }
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();
    let idx = ((sorted.len() - 1) as f64 * p) as usize;
    sorted[idx.min(sorted.len() - 1)].as_millis() as f64
}
