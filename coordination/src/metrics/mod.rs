//! Metrics aggregation engine
//!
//! Answers "how healthy is the system right now?". Workflow, step and agent
//! activity is recorded in process; [`MetricsCollector::snapshot`] produces
//! a detached view with success rates and P95/P99 durations, and
//! [`MetricsCollector::flush_to_store`] persists daily per-type aggregates.

pub mod collector;
pub mod keys;
pub mod snapshot;

pub use collector::{MetricsCollector, MetricsConfig};
pub use keys::{CounterKey, StepKey, StepStatus, TimerKey, WorkflowOutcome};
pub use snapshot::{MetricsSnapshot, StepMetrics, SystemMetrics, TypeMetrics, WorkflowMetrics};
