//! Event types for workflow coordination
//!
//! Wire names use the `scope:action` form (`workflow:started`,
//! `agent:handoff`, ...) so JSON produced here matches what existing
//! dashboards and log consumers already parse.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for events
pub type EventId = String;

/// Closed set of workflow system event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "workflow:started")]
    WorkflowStarted,
    #[serde(rename = "workflow:completed")]
    WorkflowCompleted,
    #[serde(rename = "workflow:failed")]
    WorkflowFailed,
    #[serde(rename = "workflow:cancelled")]
    WorkflowCancelled,
    #[serde(rename = "workflow:status_changed")]
    WorkflowStatusChanged,
    #[serde(rename = "workflow:recovered")]
    WorkflowRecovered,
    #[serde(rename = "step:started")]
    StepStarted,
    #[serde(rename = "step:completed")]
    StepCompleted,
    #[serde(rename = "step:failed")]
    StepFailed,
    #[serde(rename = "agent:assigned")]
    AgentAssigned,
    #[serde(rename = "agent:handoff")]
    AgentHandoff,
    #[serde(rename = "agent:heartbeat")]
    AgentHeartbeat,
    #[serde(rename = "result:stored")]
    ResultStored,
}

impl EventType {
    /// Every event type, in declaration order
    pub const ALL: [EventType; 13] = [
        EventType::WorkflowStarted,
        EventType::WorkflowCompleted,
        EventType::WorkflowFailed,
        EventType::WorkflowCancelled,
        EventType::WorkflowStatusChanged,
        EventType::WorkflowRecovered,
        EventType::StepStarted,
        EventType::StepCompleted,
        EventType::StepFailed,
        EventType::AgentAssigned,
        EventType::AgentHandoff,
        EventType::AgentHeartbeat,
        EventType::ResultStored,
    ];

    /// Get the wire name of this event type
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WorkflowStarted => "workflow:started",
            EventType::WorkflowCompleted => "workflow:completed",
            EventType::WorkflowFailed => "workflow:failed",
            EventType::WorkflowCancelled => "workflow:cancelled",
            EventType::WorkflowStatusChanged => "workflow:status_changed",
            EventType::WorkflowRecovered => "workflow:recovered",
            EventType::StepStarted => "step:started",
            EventType::StepCompleted => "step:completed",
            EventType::StepFailed => "step:failed",
            EventType::AgentAssigned => "agent:assigned",
            EventType::AgentHandoff => "agent:handoff",
            EventType::AgentHeartbeat => "agent:heartbeat",
            EventType::ResultStored => "result:stored",
        }
    }

    /// Whether this event ends a workflow
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::WorkflowCompleted | EventType::WorkflowFailed | EventType::WorkflowCancelled
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unknown event type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// Payload carried by an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventData {
    #[default]
    Empty,

    /// A workflow was created and handed to its first agent
    WorkflowStarted {
        workflow_type: String,
        agent_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issue_id: Option<String>,
    },

    /// A workflow reached a terminal state
    WorkflowFinished {
        workflow_type: String,
        agent_type: String,
        duration_ms: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// A step started, finished or failed
    StepProgress {
        workflow_type: String,
        step: String,
        #[serde(default)]
        attempt: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    StatusChanged {
        new_status: String,
    },

    /// Work moved between agents
    Handoff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_agent_id: Option<String>,
        to_agent_id: String,
        to_agent_type: String,
        score: f64,
        reason: String,
    },

    Heartbeat {
        status: String,
        current_workload: u32,
        max_workload: u32,
    },

    ResultStored {
        result_id: String,
        #[serde(default)]
        result_count: u64,
    },

    /// A workflow was picked back up after a restart
    Recovered {
        source: String,
    },

    /// Anything without a dedicated shape
    Other {
        fields: serde_json::Map<String, serde_json::Value>,
    },
}

/// A single workflow system event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Filled with a fresh UUID at publish when empty
    #[serde(default)]
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    #[serde(default)]
    pub data: EventData,
    /// Filled with the publish time when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Event {
    /// Create an event with no id, payload or timestamp
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: String::new(),
            event_type,
            workflow_id: None,
            agent_id: None,
            step_name: None,
            data: EventData::Empty,
            timestamp: None,
        }
    }

    /// Generate a new unique event ID
    pub fn new_id() -> EventId {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    pub fn agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn step(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = Some(step_name.into());
        self
    }

    pub fn with_data(mut self, data: EventData) -> Self {
        self.data = data;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Whether this event belongs to the given workflow
    pub fn is_for_workflow(&self, workflow_id: &str) -> bool {
        self.workflow_id.as_deref() == Some(workflow_id)
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
