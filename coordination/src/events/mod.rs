//! Event stream for workflow coordination
//!
//! In-process publish/subscribe with a bounded replay history. Producers
//! (the workflow engine, agents, the coordinator facade) publish
//! [`Event`]s; consumers subscribe with an optional type filter and read
//! from a bounded queue.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   Producer   │────▶│  Event Bus   │────▶│ Subscription │
//! │  (publish)   │     │  (filter)    │     │  (bounded)   │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!                             │
//!                             ▼
//!                      ┌──────────────┐
//!                      │   History    │
//!                      │ (ring, FIFO) │
//!                      └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use workflow_coordination::events::{Event, EventBus, EventType};
//!
//! let bus = EventBus::new().shared();
//! let mut sub = bus.subscribe([EventType::WorkflowStarted]);
//!
//! bus.publish(Event::new(EventType::WorkflowStarted).workflow("wf-1"));
//!
//! let event = sub.recv().await;
//! let recent = bus.history(50, &[]);
//! ```

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusConfig, SharedEventBus, Subscription};
pub use types::{Event, EventData, EventId, EventType, UnknownEventType};
