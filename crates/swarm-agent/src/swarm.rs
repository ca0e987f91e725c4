//! Swarm data model (§3): the Task a client submits and the report the
//! Coordinator hands back once every Agent it spawned has reached a
//! terminal state.

use std::collections::HashMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use swarm_core::{AgentId, AgentStatus};

/// The execution graph shape for one swarm run (§4.6 Topologies).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// One planner turn, N agents in parallel over disjoint slices, one merge turn.
    #[default]
    Star,
    /// Planner produces one map role applied to partitioned inputs, then a
    /// reduce role runs once every mapper is done.
    MapReduce,
}

/// A client's request to the Coordinator (§3 Data Model, "Task").
#[derive(Debug, Clone)]
pub struct SwarmTask {
    pub task_id: String,
    pub prompt: String,
    pub max_agents: usize,
    pub topology: Topology,
    pub context: HashMap<String, String>,
    pub deadline: Option<Instant>,
}

impl SwarmTask {
    pub fn new(task_id: impl Into<String>, prompt: impl Into<String>, max_agents: usize) -> Self {
        Self {
            task_id: task_id.into(),
            prompt: prompt.into(),
            max_agents,
            topology: Topology::default(),
            context: HashMap::new(),
            deadline: None,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_context(mut self, context: HashMap<String, String>) -> Self {
        self.context = context;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Per-agent summary folded into the final report regardless of outcome
/// (§4.6 "structured report of per-agent statuses").
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub agent_id: AgentId,
    pub role: String,
    pub status: AgentStatus,
    pub output: Option<String>,
    pub error: Option<String>,
}

/// The Coordinator's result for one Task.
#[derive(Debug, Clone)]
pub struct SwarmOutcome {
    pub answer: String,
    /// True when the merge turn ran on fewer than all spawned agents
    /// (§4.6 "the task result is labelled partial").
    pub partial: bool,
    pub agent_reports: Vec<AgentReport>,
}
