//! In-process implementation of the persistence collaborator
//!
//! Mirrors the relational tables (agent directory, assignments, workflow
//! results, daily analytics) with lock-guarded collections. Besides being
//! the default for embedding hosts and tests, it can be switched into an
//! "unreachable" mode or made to reject specific aggregate writes so the
//! `Unavailable` paths of callers can be exercised.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{
    AgentRecord, AgentStatus, AgentSummary, AssignmentOutcomes, AssignmentStatus,
    CoordinationStore, DailyAggregate, StoreError, StoreResult,
};

/// One row of the assignment history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub workflow_id: String,
    pub agent_id: String,
    pub agent_type: String,
    pub status: AssignmentStatus,
}

/// One stored workflow result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResultRecord {
    pub workflow_id: String,
    pub execution_time_ms: u64,
}

#[derive(Debug, Default)]
struct Tables {
    agents: Vec<AgentRecord>,
    assignments: Vec<AssignmentRecord>,
    results: Vec<WorkflowResultRecord>,
    aggregates: BTreeMap<(NaiveDate, String), DailyAggregate>,
}

/// Lock-guarded in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
    rejected_aggregates: RwLock<HashSet<String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Insert an agent, replacing any existing row with the same id
    pub fn upsert_agent(&self, agent: AgentRecord) {
        let mut tables = self.tables.write();
        match tables
            .agents
            .iter_mut()
            .find(|a| a.agent_id == agent.agent_id)
        {
            Some(existing) => *existing = agent,
            None => tables.agents.push(agent),
        }
    }

    /// Update an agent's current workload; returns false for unknown agents
    pub fn set_workload(&self, agent_id: &str, current_workload: u32) -> bool {
        let mut tables = self.tables.write();
        match tables.agents.iter_mut().find(|a| a.agent_id == agent_id) {
            Some(agent) => {
                agent.current_workload = current_workload;
                true
            }
            None => false,
        }
    }

    /// Update an agent's status; returns false for unknown agents
    pub fn set_status(&self, agent_id: &str, status: AgentStatus) -> bool {
        let mut tables = self.tables.write();
        match tables.agents.iter_mut().find(|a| a.agent_id == agent_id) {
            Some(agent) => {
                agent.status = status;
                true
            }
            None => false,
        }
    }

    /// Append an assignment outcome
    pub fn record_assignment(&self, assignment: AssignmentRecord) {
        self.tables.write().assignments.push(assignment);
    }

    /// Append a workflow result
    pub fn record_result(&self, workflow_id: impl Into<String>, execution_time_ms: u64) {
        self.tables.write().results.push(WorkflowResultRecord {
            workflow_id: workflow_id.into(),
            execution_time_ms,
        });
    }

    /// All daily aggregates, ordered by `(date, workflow_type)`
    pub fn aggregates(&self) -> Vec<DailyAggregate> {
        self.tables.read().aggregates.values().cloned().collect()
    }

    /// Look up a single aggregate row
    pub fn aggregate(&self, date: NaiveDate, workflow_type: &str) -> Option<DailyAggregate> {
        self.tables
            .read()
            .aggregates
            .get(&(date, workflow_type.to_string()))
            .cloned()
    }

    /// Make every call fail as if the backend were unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reject aggregate upserts for one workflow type
    pub fn reject_aggregates_for(&self, workflow_type: impl Into<String>) {
        self.rejected_aggregates.write().insert(workflow_type.into());
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Backend("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn candidate_agents(&self, agent_type: &str) -> StoreResult<Vec<AgentRecord>> {
        self.check_available()?;
        let tables = self.tables.read();
        let mut candidates: Vec<AgentRecord> = tables
            .agents
            .iter()
            .filter(|a| {
                a.agent_type == agent_type && a.status == AgentStatus::Active && a.has_capacity()
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|a| a.current_workload);
        Ok(candidates)
    }

    async fn active_agents(&self) -> StoreResult<Vec<AgentRecord>> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(tables
            .agents
            .iter()
            .filter(|a| a.status == AgentStatus::Active)
            .cloned()
            .collect())
    }

    async fn assignment_outcomes(&self, agent_id: &str) -> StoreResult<AssignmentOutcomes> {
        self.check_available()?;
        let tables = self.tables.read();
        let mut outcomes = AssignmentOutcomes::default();
        for assignment in tables.assignments.iter().filter(|a| a.agent_id == agent_id) {
            outcomes.total += 1;
            if assignment.status == AssignmentStatus::Completed {
                outcomes.completed += 1;
            }
        }
        Ok(outcomes)
    }

    async fn average_duration_ms(&self, agent_id: &str) -> StoreResult<Option<f64>> {
        self.check_available()?;
        let tables = self.tables.read();

        // Same shape as the relational join: one sample per (assignment, result) pair.
        let results = &tables.results;
        let samples: Vec<u64> = tables
            .assignments
            .iter()
            .filter(|a| a.agent_id == agent_id)
            .flat_map(|a| {
                results
                    .iter()
                    .filter(move |r| r.workflow_id == a.workflow_id)
                    .map(|r| r.execution_time_ms)
            })
            .collect();

        if samples.is_empty() {
            return Ok(None);
        }
        let total: u64 = samples.iter().sum();
        Ok(Some(total as f64 / samples.len() as f64))
    }

    async fn result_count(&self, workflow_id: &str) -> StoreResult<u64> {
        self.check_available()?;
        let tables = self.tables.read();
        Ok(tables
            .results
            .iter()
            .filter(|r| r.workflow_id == workflow_id)
            .count() as u64)
    }

    async fn agent_summary(&self) -> StoreResult<AgentSummary> {
        self.check_available()?;
        let tables = self.tables.read();

        let mut summary = AgentSummary {
            total_registered: tables.agents.len() as u64,
            ..Default::default()
        };

        let mut load_sums: BTreeMap<String, (f64, u64)> = BTreeMap::new();
        for agent in tables.agents.iter().filter(|a| a.status == AgentStatus::Active) {
            summary.total_active += 1;
            let entry = summary.by_type.entry(agent.agent_type.clone()).or_default();
            entry.active += 1;
            if agent.max_workload > 0 {
                let sum = load_sums.entry(agent.agent_type.clone()).or_default();
                sum.0 += agent.load_factor();
                sum.1 += 1;
            }
        }

        for (agent_type, entry) in summary.by_type.iter_mut() {
            if let Some((sum, n)) = load_sums.get(agent_type) {
                entry.avg_workload = sum / *n as f64 * 100.0;
            }
            entry.total_assignments = tables
                .assignments
                .iter()
                .filter(|a| &a.agent_type == agent_type)
                .count() as u64;
        }

        Ok(summary)
    }

    async fn upsert_daily_aggregate(&self, aggregate: &DailyAggregate) -> StoreResult<()> {
        self.check_available()?;
        if self
            .rejected_aggregates
            .read()
            .contains(&aggregate.workflow_type)
        {
            return Err(StoreError::Backend(format!(
                "aggregate write rejected for {}",
                aggregate.workflow_type
            )));
        }
        self.tables.write().aggregates.insert(
            (aggregate.date, aggregate.workflow_type.clone()),
            aggregate.clone(),
        );
        Ok(())
    }
}
