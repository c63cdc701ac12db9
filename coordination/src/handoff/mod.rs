//! Agent handoff optimizer
//!
//! Answers "who should do the next piece of work?" by scoring candidate
//! agents from the persistence collaborator's directory and history, and
//! proposes moves from overloaded agents to idle peers of the same type.

pub mod optimizer;
pub mod scoring;

pub use optimizer::{HandoffConfig, HandoffOptimizer, HandoffPlan, RebalanceSuggestion};
pub use scoring::{score_agent, AgentScore};
