//! The Swarm Coordinator (§4.6): turns one Task into a final answer by
//! running a planner turn, spawning a bounded population of Agents, and
//! folding their outputs through a merge (Star) or reduce (Map-reduce) turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::warn;

use swarm_core::{
    Agent, AgentOutcome, AgentSpec, AgentStatus, Cancellation, CompletionRequest, Error, Message,
    Provider, ToolRegistry,
};

use crate::planner::{self, PlanAgentEntry};
use crate::swarm::{AgentReport, SwarmOutcome, SwarmTask, Topology};

/// Tunables the Coordinator applies uniformly to every agent it spawns.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_turns_per_agent: usize,
    pub agent_token_budget: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_turns_per_agent: swarm_core::DEFAULT_MAX_TURNS,
            agent_token_budget: 4096,
        }
    }
}

/// A Coordinator failure, carrying the per-agent report required by §4.6
/// ("returns a structured report of per-agent statuses") alongside the
/// stable error kind every other subsystem uses.
#[derive(Debug)]
pub struct SwarmError {
    pub error: Error,
    pub agent_reports: Vec<AgentReport>,
}

impl std::fmt::Display for SwarmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for SwarmError {}

fn to_report(outcome: &AgentOutcome) -> AgentReport {
    AgentReport {
        agent_id: outcome.agent_id.clone(),
        role: outcome.role.clone(),
        status: outcome.status,
        output: outcome.output.clone(),
        error: outcome.error.clone(),
    }
}

fn render_context(context: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = context.keys().collect();
    keys.sort();
    keys.into_iter()
        .map(|k| format!("{k}: {}", context[k]))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Renders agent outputs for a merge/reduce prompt, in agent-id order (§5
/// "agent outputs presented to the merge turn are ordered by agent id, not
/// by completion time").
fn render_outputs(outcomes: &[&AgentOutcome]) -> String {
    let mut ordered: Vec<&AgentOutcome> = outcomes.to_vec();
    ordered.sort_by(|a, b| a.agent_id.0.cmp(&b.agent_id.0));
    ordered
        .iter()
        .map(|o| format!("### {} ({})\n{}", o.role, o.agent_id, o.output.as_deref().unwrap_or("")))
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub struct Coordinator {
    provider: Arc<dyn Provider>,
    tools: Arc<ToolRegistry>,
    config: CoordinatorConfig,
}

impl Coordinator {
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, config: CoordinatorConfig) -> Self {
        Self { provider, tools, config }
    }

    pub async fn run(&self, task: SwarmTask) -> Result<SwarmOutcome, SwarmError> {
        match task.topology {
            Topology::Star => self.run_star(task).await,
            Topology::MapReduce => self.run_map_reduce(task).await,
        }
    }

    async fn planner_call(&self, prompt: String) -> Result<String, Error> {
        let request = CompletionRequest::new(vec![Message::user(prompt)]).with_stream(false);
        let response = self.provider.complete(request).await?;
        Ok(response.message.content.to_string_lossy())
    }

    /// Runs the planner turn with up to 2 repair retries, falling back to a
    /// single-agent plan on a third consecutive failure (§4.6).
    async fn plan_star(&self, task: &SwarmTask) -> Vec<PlanAgentEntry> {
        let initial = planner::star_prompt(task);
        let mut prompt = initial.clone();
        for attempt in 1..=3 {
            match self.planner_call(prompt.clone()).await {
                Ok(text) => match planner::parse_star_plan(&text) {
                    Ok(plan) => return plan.agents,
                    Err(e) => {
                        warn!(attempt, error = %e, "planner produced a malformed star plan");
                        prompt = planner::repair_prompt(&initial, &text, &e.to_string());
                    }
                },
                Err(e) => warn!(attempt, error = %e, "planner call failed"),
            }
        }
        warn!("planner exhausted repair attempts; falling back to a single agent");
        planner::single_agent_fallback(task, &self.tools.names()).agents
    }

    async fn plan_map_reduce(&self, task: &SwarmTask) -> Option<planner::MapReducePlan> {
        let initial = planner::map_reduce_prompt(task);
        let mut prompt = initial.clone();
        for attempt in 1..=3 {
            match self.planner_call(prompt.clone()).await {
                Ok(text) => match planner::parse_map_reduce_plan(&text) {
                    Ok(plan) => return Some(plan),
                    Err(e) => {
                        warn!(attempt, error = %e, "planner produced a malformed map-reduce plan");
                        prompt = planner::repair_prompt(&initial, &text, &e.to_string());
                    }
                },
                Err(e) => warn!(attempt, error = %e, "planner call failed"),
            }
        }
        None
    }

    fn build_agent_spec(&self, agent_id: impl Into<String>, role: &str, role_prompt: &str, tools: &[String], context: String) -> AgentSpec {
        let allowed: Vec<String> = tools.iter().filter(|t| self.tools.contains(t)).cloned().collect();
        for dropped in tools.iter().filter(|t| !self.tools.contains(t)) {
            warn!(tool = %dropped, "planner referenced unknown tool; dropping from allowlist");
        }
        let agent_id: String = agent_id.into();
        AgentSpec::new(agent_id, role, role_prompt)
            .with_tools(allowed)
            .with_token_budget(self.config.agent_token_budget)
            .with_context(context)
    }

    fn spawn_deadline_watchdog(&self, deadline: Option<Instant>, cancel: Cancellation) {
        if let Some(dl) = deadline {
            tokio::spawn(async move {
                let now = Instant::now();
                if dl > now {
                    tokio::time::sleep(dl - now).await;
                }
                cancel.cancel();
            });
        }
    }

    /// Runs every spec's agent concurrently, returned in the same order as
    /// `specs` (agent-id order, since specs are built in that order) — §5's
    /// ordering guarantee falls out of `join_all` preserving input order.
    async fn spawn_and_supervise(&self, specs: Vec<AgentSpec>, task_id: &str, deadline: Option<Instant>, cancel: Cancellation) -> Vec<AgentOutcome> {
        let futures = specs.into_iter().map(|spec| {
            let provider = self.provider.clone();
            let tools = self.tools.clone();
            let cancel = cancel.clone();
            let task_id = task_id.to_string();
            let max_turns = self.config.max_turns_per_agent;
            async move {
                let mut agent = Agent::new(spec);
                agent.run(provider, tools, task_id, max_turns, cancel, deadline, None).await
            }
        });
        join_all(futures).await
    }

    /// §4.6 partial-failure policy. Returns whether the result is partial,
    /// or fails the task with `swarm_insufficient_successes` carrying the
    /// per-agent report.
    fn check_partial_failure(outcomes: &[AgentOutcome]) -> Result<bool, SwarmError> {
        let total = outcomes.len();
        let needed = total.div_ceil(2);
        let successes = outcomes.iter().filter(|o| o.status == AgentStatus::Done).count();
        if successes >= needed {
            Ok(successes < total)
        } else {
            Err(SwarmError {
                error: Error::swarm_insufficient_successes(successes, total, needed),
                agent_reports: outcomes.iter().map(to_report).collect(),
            })
        }
    }

    async fn run_star(&self, task: SwarmTask) -> Result<SwarmOutcome, SwarmError> {
        let cancel = Cancellation::new();
        self.spawn_deadline_watchdog(task.deadline, cancel.clone());

        let mut entries = self.plan_star(&task).await;
        entries.truncate(task.max_agents.max(1));

        let context = render_context(&task.context);
        let specs: Vec<AgentSpec> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| self.build_agent_spec(format!("agent-{i}"), &e.role, &e.prompt, &e.tools, context.clone()))
            .collect();

        let outcomes = self.spawn_and_supervise(specs, &task.task_id, task.deadline, cancel).await;
        let partial = Self::check_partial_failure(&outcomes)?;

        let successful: Vec<&AgentOutcome> = outcomes.iter().filter(|o| o.status == AgentStatus::Done).collect();
        let merge_prompt = format!(
            "Original task: {}\n\nBelow are the outputs from each agent that worked on this task.\n\n{}\n\nSynthesize these into one final answer to the original task.",
            task.prompt,
            render_outputs(&successful),
        );
        let answer = self.planner_call(merge_prompt).await.map_err(|e| SwarmError {
            error: e,
            agent_reports: outcomes.iter().map(to_report).collect(),
        })?;

        Ok(SwarmOutcome {
            answer,
            partial,
            agent_reports: outcomes.iter().map(to_report).collect(),
        })
    }

    async fn run_map_reduce(&self, task: SwarmTask) -> Result<SwarmOutcome, SwarmError> {
        let cancel = Cancellation::new();
        self.spawn_deadline_watchdog(task.deadline, cancel.clone());

        let plan = match self.plan_map_reduce(&task).await {
            Some(plan) => plan,
            None => {
                // Map-reduce has no single-agent analogue in the schema; fall
                // back to a plain star run over one agent, same as the Star
                // topology's own exhausted-repair path.
                let fallback = planner::single_agent_fallback(&task, &self.tools.names());
                let entry = &fallback.agents[0];
                let spec = self.build_agent_spec("agent-0", &entry.role, &entry.prompt, &entry.tools, render_context(&task.context));
                let outcomes = self.spawn_and_supervise(vec![spec], &task.task_id, task.deadline, cancel).await;
                let partial = Self::check_partial_failure(&outcomes)?;
                let answer = outcomes[0].output.clone().unwrap_or_default();
                return Ok(SwarmOutcome {
                    answer,
                    partial,
                    agent_reports: outcomes.iter().map(to_report).collect(),
                });
            }
        };

        let mut partitions = plan.partitions;
        partitions.truncate(task.max_agents.saturating_sub(1).max(1));

        let mapper_specs: Vec<AgentSpec> = partitions
            .iter()
            .enumerate()
            .map(|(i, part)| self.build_agent_spec(format!("agent-{i}"), &plan.map.role, &plan.map.prompt, &plan.map.tools, part.clone()))
            .collect();

        let mapper_outcomes = self
            .spawn_and_supervise(mapper_specs, &task.task_id, task.deadline, cancel.clone())
            .await;
        let mapper_partial = Self::check_partial_failure(&mapper_outcomes)?;

        let successful: Vec<&AgentOutcome> = mapper_outcomes.iter().filter(|o| o.status == AgentStatus::Done).collect();
        let reduce_spec = self.build_agent_spec(
            "agent-reduce",
            &plan.reduce.role,
            &plan.reduce.prompt,
            &plan.reduce.tools,
            render_outputs(&successful),
        );

        let reduce_outcomes = self
            .spawn_and_supervise(vec![reduce_spec], &task.task_id, task.deadline, cancel)
            .await;
        let reduce_outcome = reduce_outcomes.into_iter().next().expect("exactly one reduce agent spawned");

        let mut all_reports: Vec<AgentReport> = mapper_outcomes.iter().map(to_report).collect();
        all_reports.push(to_report(&reduce_outcome));

        if reduce_outcome.status != AgentStatus::Done {
            let error = match reduce_outcome.error_kind {
                Some(swarm_core::ErrorKind::DeadlineExceeded) => Error::DeadlineExceeded,
                Some(swarm_core::ErrorKind::Cancelled) => Error::Cancelled,
                _ => Error::budget_exhausted(reduce_outcome.error.clone().unwrap_or_else(|| "reduce agent failed".into())),
            };
            return Err(SwarmError { error, agent_reports: all_reports });
        }

        Ok(SwarmOutcome {
            answer: reduce_outcome.output.clone().unwrap_or_default(),
            partial: mapper_partial,
            agent_reports: all_reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use swarm_core::{CompletionResponse, FinishReason, Usage};

    struct ScriptedProvider {
        responses: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        fn default_model(&self) -> Option<&str> {
            None
        }
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, Error> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(Error::bad_request("scripted provider exhausted"));
            }
            let text = responses.remove(0);
            Ok(CompletionResponse {
                message: Message::assistant(text),
                thinking: None,
                usage: Usage::new(5, 5),
                model: "scripted".into(),
                finish_reason: FinishReason::Stop,
            })
        }
        async fn stream(&self, _request: CompletionRequest) -> Result<swarm_core::StreamResult, Error> {
            unimplemented!("not used in these tests")
        }
    }

    fn provider(responses: Vec<&str>) -> Arc<dyn Provider> {
        Arc::new(ScriptedProvider {
            responses: std::sync::Mutex::new(responses.into_iter().map(str::to_string).collect()),
        })
    }

    #[tokio::test]
    async fn test_star_run_plans_spawns_and_merges() {
        let plan = r#"{"agents":[{"role":"solver","prompt":"solve it","tools":[]}]}"#;
        let p = provider(vec![plan, "agent said 4", "final answer: 4"]);
        let coordinator = Coordinator::new(p, Arc::new(ToolRegistry::new()), CoordinatorConfig::default());

        let task = SwarmTask::new("t1", "what is 2+2", 3);
        let outcome = coordinator.run(task).await.unwrap();

        assert_eq!(outcome.answer, "final answer: 4");
        assert!(!outcome.partial);
        assert_eq!(outcome.agent_reports.len(), 1);
    }

    #[tokio::test]
    async fn test_star_run_repairs_malformed_plan_then_succeeds() {
        let p = provider(vec![
            "not json at all",
            r#"{"agents":[{"role":"solver","prompt":"solve it","tools":[]}]}"#,
            "agent output",
            "merged",
        ]);
        let coordinator = Coordinator::new(p, Arc::new(ToolRegistry::new()), CoordinatorConfig::default());

        let outcome = coordinator.run(SwarmTask::new("t1", "task", 3)).await.unwrap();
        assert_eq!(outcome.answer, "merged");
    }

    #[tokio::test]
    async fn test_star_run_falls_back_to_single_agent_after_exhausted_repairs() {
        let p = provider(vec!["nope", "still nope", "nope again", "solved alone", "merged solo"]);
        let coordinator = Coordinator::new(p, Arc::new(ToolRegistry::new()), CoordinatorConfig::default());

        let outcome = coordinator.run(SwarmTask::new("t1", "original task text", 3)).await.unwrap();
        assert_eq!(outcome.agent_reports.len(), 1);
        assert_eq!(outcome.agent_reports[0].role, "solver");
    }

    #[tokio::test]
    async fn test_swarm_insufficient_successes_skips_merge_call() {
        // Two agents, both loop on a nonexistent tool until budget exhausted;
        // no merge call should ever be issued.
        let plan = r#"{"agents":[
            {"role":"a","prompt":"p","tools":[]},
            {"role":"b","prompt":"p","tools":[]}
        ]}"#;

        // Only the plan call gets a scripted response; both agents' first
        // turn then finds the provider exhausted and fails.
        let p = provider(vec![plan]);
        let coordinator = Coordinator::new(p, Arc::new(ToolRegistry::new()), CoordinatorConfig::default());

        let result = coordinator.run(SwarmTask::new("t1", "task", 3)).await;
        let err = result.unwrap_err();
        assert_eq!(err.error.kind(), swarm_core::ErrorKind::SwarmInsufficientSuccesses);
        assert_eq!(err.agent_reports.len(), 2);
    }

    #[tokio::test]
    async fn test_map_reduce_runs_mappers_then_reduce() {
        let plan = r#"{"map":{"role":"mapper","prompt":"summarize this chunk","tools":[]},"partitions":["chunk one","chunk two"],"reduce":{"role":"reducer","prompt":"combine summaries","tools":[]}}"#;
        let p = provider(vec![plan, "summary one", "summary two", "combined summary"]);
        let coordinator = Coordinator::new(p, Arc::new(ToolRegistry::new()), CoordinatorConfig::default());

        let task = SwarmTask::new("t1", "summarize the document", 3).with_topology(Topology::MapReduce);
        let outcome = coordinator.run(task).await.unwrap();

        assert_eq!(outcome.answer, "combined summary");
        assert_eq!(outcome.agent_reports.len(), 3);
    }
}
