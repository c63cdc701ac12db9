//! Persistence collaborator contract
//!
//! The handoff optimizer and the metrics collector only ever talk to storage
//! through [`CoordinationStore`]. The contract is narrow:
//!
//! - an agent directory (id, type, status, current/max workload)
//! - historical assignment outcomes per agent
//! - historical execution durations per agent
//! - an upsertable daily aggregate table keyed by `(date, workflow_type)`
//!
//! Two implementations ship with the crate: [`MemoryStore`] (always available)
//! and `SqliteStore` (behind the `sqlite` feature).

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use memory::{AssignmentRecord, MemoryStore, WorkflowResultRecord};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

/// Error type for persistence operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Blocking task failed: {0}")]
    Join(String),
}

/// Result type for persistence operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle to a persistence collaborator
pub type SharedStore = Arc<dyn CoordinationStore>;

/// Lifecycle status of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Inactive,
    Busy,
    Error,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Busy => "busy",
            AgentStatus::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            "busy" => Ok(AgentStatus::Busy),
            "error" => Ok(AgentStatus::Error),
            other => Err(StoreError::Decode(format!("unknown agent status: {other}"))),
        }
    }
}

/// Outcome of a single agent assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Started,
    Completed,
    Failed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Started => "started",
            AssignmentStatus::Completed => "completed",
            AssignmentStatus::Failed => "failed",
        }
    }
}

/// One row of the agent directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: String,
    pub agent_type: String,
    pub status: AgentStatus,
    pub current_workload: u32,
    pub max_workload: u32,
}

impl AgentRecord {
    /// Create an active agent with no current work
    pub fn new(agent_id: impl Into<String>, agent_type: impl Into<String>, max_workload: u32) -> Self {
        Self {
            agent_id: agent_id.into(),
            agent_type: agent_type.into(),
            status: AgentStatus::Active,
            current_workload: 0,
            max_workload,
        }
    }

    /// Set the current workload
    pub fn with_workload(mut self, current_workload: u32) -> Self {
        self.current_workload = current_workload;
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: AgentStatus) -> Self {
        self.status = status;
        self
    }

    /// Free slots (never negative)
    pub fn available_slots(&self) -> u32 {
        self.max_workload.saturating_sub(self.current_workload)
    }

    /// Ratio of current to maximum workload; 0 when the maximum is 0
    pub fn load_factor(&self) -> f64 {
        if self.max_workload == 0 {
            0.0
        } else {
            f64::from(self.current_workload) / f64::from(self.max_workload)
        }
    }

    /// Whether the agent can accept another unit of work
    pub fn has_capacity(&self) -> bool {
        self.current_workload < self.max_workload
    }
}

/// Historical assignment counts for one agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentOutcomes {
    pub total: u64,
    pub completed: u64,
}

/// Daily per-type aggregate written by the metrics flush
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyAggregate {
    pub date: NaiveDate,
    pub workflow_type: String,
    pub agent_type: String,
    pub total_workflows: u64,
    pub successful_workflows: u64,
    pub failed_workflows: u64,
    pub avg_execution_time_ms: u64,
}

/// Agent directory summary used by metrics snapshots
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub total_registered: u64,
    pub total_active: u64,
    pub by_type: BTreeMap<String, AgentTypeSummary>,
}

/// Per-agent-type portion of [`AgentSummary`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentTypeSummary {
    pub active: u64,
    pub total_assignments: u64,
    /// Mean load of active agents, in percent
    pub avg_workload: f64,
}

/// Narrow query/execute interface over the relational store.
///
/// Implementations must be safe to share across tasks. Every method may
/// block on I/O; callers wrap them with their own cancellation.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Active agents of `agent_type` with `current_workload < max_workload`,
    /// least loaded first.
    async fn candidate_agents(&self, agent_type: &str) -> StoreResult<Vec<AgentRecord>>;

    /// Every active agent regardless of type or load.
    async fn active_agents(&self) -> StoreResult<Vec<AgentRecord>>;

    /// Count of past assignments for an agent and how many completed.
    async fn assignment_outcomes(&self, agent_id: &str) -> StoreResult<AssignmentOutcomes>;

    /// Mean execution time of the workflows an agent was assigned, if any.
    async fn average_duration_ms(&self, agent_id: &str) -> StoreResult<Option<f64>>;

    /// Number of results already recorded for a workflow.
    async fn result_count(&self, workflow_id: &str) -> StoreResult<u64>;

    /// Registered/active counts and per-type load.
    async fn agent_summary(&self) -> StoreResult<AgentSummary>;

    /// Insert or replace the aggregate row for `(date, workflow_type)`.
    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_factor_and_slots() {
        let agent = AgentRecord::new("a-1", "research", 5).with_workload(4);
        assert_eq!(agent.available_slots(), 1);
        assert!((agent.load_factor() - 0.8).abs() < f64::EPSILON);
        assert!(agent.has_capacity());

        let empty = AgentRecord::new("a-2", "research", 0);
        assert_eq!(empty.load_factor(), 0.0);
        assert!(!empty.has_capacity());
    }

    #[test]
    fn test_overcommitted_agent_has_no_slots() {
        let agent = AgentRecord::new("a-1", "poc", 2).with_workload(3);
        assert_eq!(agent.available_slots(), 0);
        assert!(!agent.has_capacity());
    }

    #[test]
    fn test_agent_status_round_trip() {
        for status in [
            AgentStatus::Active,
            AgentStatus::Inactive,
            AgentStatus::Busy,
            AgentStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<AgentStatus>().unwrap(), status);
        }
        assert!("retired".parse::<AgentStatus>().is_err());
    }
}
