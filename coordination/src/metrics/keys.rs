//! Composite metric keys

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle counter for workflows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowOutcome {
    Started,
    Completed,
    Failed,
}

impl WorkflowOutcome {
    /// Outcome for a finished workflow
    pub fn finished(success: bool) -> Self {
        if success {
            WorkflowOutcome::Completed
        } else {
            WorkflowOutcome::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
}

impl StepStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            StepStatus::Success
        } else {
            StepStatus::Failure
        }
    }
}

/// A step within a workflow type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepKey {
    pub workflow_type: String,
    pub step: String,
}

impl StepKey {
    pub fn new(workflow_type: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            step: step.into(),
        }
    }
}

/// Rendered as `workflow_type/step` in snapshots
impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_type, self.step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CounterKey {
    /// All workflow types together
    Workflows(WorkflowOutcome),
    WorkflowType(WorkflowOutcome, String),
    /// Workflows currently running per agent type
    ActiveAgents(String),
    Step(StepStatus, StepKey),
    /// Free-form counter set through `increment_counter`
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKey {
    AllWorkflows,
    WorkflowType(String),
    Step(StepKey),
}
