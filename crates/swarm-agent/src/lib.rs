//! Agent roles and the Swarm Coordinator (§4.5, §4.6).
//!
//! This crate provides:
//! - `swarm` — the Task/AgentReport/SwarmOutcome data model (§3)
//! - `planner` — the planner turn: prompt construction, plan parsing with
//!   repair, and the single-agent fallback
//! - `coordinator` — the Coordinator itself: Star and Map-reduce topologies,
//!   spawn/supervise with the partial-failure policy, and the merge/reduce
//!   turns

mod coordinator;
mod planner;
mod swarm;

pub use coordinator::{Coordinator, CoordinatorConfig, SwarmError};
pub use planner::{MapReducePlan, PlanAgentEntry, StarPlan};
pub use swarm::{AgentReport, SwarmOutcome, SwarmTask, Topology};
