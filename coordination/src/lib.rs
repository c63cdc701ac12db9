//! Adaptive coordination core for multi-agent workflows
//!
//! Three independent components answer three questions:
//!
//! - [`events`]: "what just happened?" An in-process event bus with bounded
//!   history and bounded per-subscriber queues.
//! - [`handoff`]: "who should do the next piece of work?" Scores candidate
//!   agents and proposes rebalancing moves.
//! - [`metrics`]: "how healthy is the system right now?" Counters, duration
//!   series and gauges with percentile snapshots and daily aggregates.
//!
//! The components never call each other. Storage is reached only through the
//! [`store::CoordinationStore`] trait; [`Coordinator`] wires everything
//! together for an embedding service.
//!
//! # Usage
//!
//! ```ignore
//! use workflow_coordination::store::MemoryStore;
//! use workflow_coordination::{CoordinationConfig, Coordinator, WorkflowRun};
//!
//! let store = MemoryStore::new().shared();
//! let coordinator = Coordinator::new(store, CoordinationConfig::from_env());
//!
//! let run = WorkflowRun::new("wf-1", "research", "research-1", "research");
//! coordinator.workflow_started(&run);
//! let plan = coordinator.plan_handoff("wf-1", "research-1", "poc").await?;
//! let snapshot = coordinator.metrics().snapshot().await;
//! ```
//!
//! # Features
//!
//! - `sqlite`: [`store::SqliteStore`] and the `coordination` binary.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod handoff;
pub mod metrics;
pub mod retry;
pub mod store;

pub use config::{ConfigError, CoordinationConfig, MaintenanceConfig};
pub use coordinator::{Coordinator, MaintenanceReport, WorkflowRun};
pub use error::{CoordinationError, CoordinationResult};
pub use events::{Event, EventBus, EventBusConfig, EventData, EventType, Subscription};
pub use handoff::{AgentScore, HandoffConfig, HandoffOptimizer, HandoffPlan, RebalanceSuggestion};
pub use metrics::{MetricsCollector, MetricsConfig, MetricsSnapshot};
pub use retry::{retry_with_backoff, RetryError, RetryPolicy};
pub use store::{CoordinationStore, SharedStore, StoreError};
