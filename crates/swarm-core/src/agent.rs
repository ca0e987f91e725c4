//! The Agent: one reasoning loop bound to a role, an initial prompt, a
//! budget, and a handle to both the LLM Client and the Tool Host.
//!
//! Drives the state machine:
//!
//! ```text
//! pending --spawn--> running --tool_call--> tool_wait --tool_result--> running
//!                       |                                                |
//!                       |----final_assistant_message----> done           |
//!                       |----budget_exhausted----> failed                |
//!                       |----llm_error (non-retriable)----> failed       |
//!                       +----cancelled (by coordinator)----> cancelled <-+
//! ```

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::message::{Message, StreamChunk, ToolCall, Usage};
use crate::provider::{CompletionRequest, Provider};
use crate::task::{execute_tools_parallel, Cancellation};
use crate::tool::{ToolContext, ToolRegistry};

/// Default bound on agentic-loop turns (§4.5 algorithm, "maximum turn count
/// M (default 12)").
pub const DEFAULT_MAX_TURNS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Produced by the planner turn, consumed by spawn (§3 Data Model).
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub agent_id: AgentId,
    pub role: String,
    pub role_prompt: String,
    pub tool_allowlist: Vec<String>,
    pub token_budget: u32,
    /// The input context slice this agent works from (its share of the task).
    pub context: String,
}

impl AgentSpec {
    pub fn new(agent_id: impl Into<AgentId>, role: impl Into<String>, role_prompt: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: role.into(),
            role_prompt: role_prompt.into(),
            tool_allowlist: Vec::new(),
            token_budget: 4096,
            context: String::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tool_allowlist = tools;
        self
    }

    pub fn with_token_budget(mut self, budget: u32) -> Self {
        self.token_budget = budget;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// §3 invariant: "An AgentSpec's tool allowlist is a subset of the Tool
    /// Host's registered tools; unknown names fail at spawn, not at first
    /// call." Called by the Coordinator before constructing the Agent.
    pub fn validate_against(&self, registry: &ToolRegistry) -> Result<(), Error> {
        for name in &self.tool_allowlist {
            if !registry.contains(name) {
                return Err(Error::unknown_tool(name));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Pending,
    Running,
    ToolWait,
    Done,
    Failed,
    Cancelled,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentStatus::Done | AgentStatus::Failed | AgentStatus::Cancelled
        )
    }
}

/// Events emitted during agent execution for progress reporting /
/// observability. Never gates correctness — a missing handler changes
/// nothing about the agent's outcome.
#[derive(Debug, Clone)]
pub enum AgentProgressEvent {
    IterationStart {
        agent_id: String,
        turn: u32,
        max_turns: u32,
    },
    ToolStart {
        agent_id: String,
        tool_name: String,
    },
    ToolComplete {
        agent_id: String,
        tool_name: String,
        is_error: bool,
    },
    UsageUpdate {
        agent_id: String,
        usage: Usage,
    },
    StatusChanged {
        agent_id: String,
        status: AgentStatus,
    },
}

#[async_trait]
pub trait AgentProgressHandler: Send + Sync {
    async fn on_progress(&self, event: AgentProgressEvent);
}

/// Final outcome of one agent's run, folded into the Coordinator's
/// partial-failure policy and merge turn.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub agent_id: AgentId,
    pub role: String,
    pub status: AgentStatus,
    pub output: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<crate::error::ErrorKind>,
    pub usage: Usage,
}

/// AgentSpec + Transcript + status (§3 Data Model). The Coordinator
/// exclusively owns this; the Transcript has a single writer (this struct's
/// own run loop).
pub struct Agent {
    pub spec: AgentSpec,
    transcript: Vec<Message>,
    status: AgentStatus,
}

impl Agent {
    pub fn new(spec: AgentSpec) -> Self {
        Self {
            spec,
            transcript: Vec::new(),
            status: AgentStatus::Pending,
        }
    }

    pub fn id(&self) -> &AgentId {
        &self.spec.agent_id
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn transcript(&self) -> &[Message] {
        &self.transcript
    }

    /// Drive the agent to a terminal state (§4.5 Algorithm).
    ///
    /// On spawn, appends a system message (role prompt) and a user message
    /// (the context slice), then calls `chat` with the tool schemas from
    /// the allowlist. Tool calls within one turn are dispatched
    /// concurrently (`execute_tools_parallel`) and their results appended
    /// in emission order, not completion order, so the transcript stays
    /// deterministic (§8 property 9). The loop ends when the response has
    /// no tool calls (`done`), when `max_turns` or `token_budget` is
    /// exceeded (`failed{budget_exhausted}`), on a non-retriable LLM error
    /// (`failed`), or on cancellation (`cancelled`).
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &mut self,
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        task_id: impl Into<String>,
        max_turns: usize,
        cancel: Cancellation,
        deadline: Option<Instant>,
        progress: Option<Arc<dyn AgentProgressHandler>>,
    ) -> AgentOutcome {
        let task_id = task_id.into();
        self.status = AgentStatus::Running;
        self.emit_status(&progress).await;

        self.transcript.push(Message::system(self.spec.role_prompt.as_str()));
        self.transcript.push(Message::user(self.spec.context.as_str()));

        let tool_defs: Vec<_> = self
            .spec
            .tool_allowlist
            .iter()
            .filter_map(|name| tools.get(name).map(|_| name.clone()))
            .collect();
        let tool_definitions = tools
            .definitions()
            .into_iter()
            .filter(|d| tool_defs.contains(&d.name))
            .collect::<Vec<_>>();

        let mut usage_total = Usage::default();
        let max_turns = if max_turns == 0 { DEFAULT_MAX_TURNS } else { max_turns };

        for turn in 0..max_turns {
            if cancel.is_cancelled() {
                self.status = AgentStatus::Cancelled;
                self.emit_status(&progress).await;
                return self.outcome(None, Some("cancelled".into()), Some(crate::error::ErrorKind::Cancelled), usage_total);
            }
            if let Some(dl) = deadline {
                if Instant::now() >= dl {
                    self.status = AgentStatus::Cancelled;
                    self.emit_status(&progress).await;
                    return self.outcome(
                        None,
                        Some("deadline exceeded".into()),
                        Some(crate::error::ErrorKind::DeadlineExceeded),
                        usage_total,
                    );
                }
            }

            if let Some(handler) = &progress {
                handler
                    .on_progress(AgentProgressEvent::IterationStart {
                        agent_id: self.spec.agent_id.0.clone(),
                        turn: turn as u32 + 1,
                        max_turns: max_turns as u32,
                    })
                    .await;
            }

            let mut request = CompletionRequest::new(self.transcript.clone())
                .with_tools(tool_definitions.clone())
                .with_stream(false);
            if let Some(dl) = deadline {
                request = request.with_deadline(dl);
            }

            debug!(agent = %self.spec.agent_id, turn, "agent turn starting");

            let response = match provider.complete(request).await {
                Ok(r) => r,
                Err(e) => {
                    self.status = AgentStatus::Failed;
                    self.emit_status(&progress).await;
                    return self.outcome(None, Some(e.to_string()), Some(e.kind()), usage_total);
                }
            };

            usage_total.prompt_tokens += response.usage.prompt_tokens;
            usage_total.completion_tokens += response.usage.completion_tokens;
            usage_total.total_tokens += response.usage.total_tokens;
            if let Some(handler) = &progress {
                handler
                    .on_progress(AgentProgressEvent::UsageUpdate {
                        agent_id: self.spec.agent_id.0.clone(),
                        usage: response.usage.clone(),
                    })
                    .await;
            }

            if usage_total.total_tokens > self.spec.token_budget {
                self.status = AgentStatus::Failed;
                self.emit_status(&progress).await;
                return self.outcome(
                    None,
                    Some(format!(
                        "token budget {} exceeded ({} used)",
                        self.spec.token_budget, usage_total.total_tokens
                    )),
                    Some(crate::error::ErrorKind::BudgetExhausted),
                    usage_total,
                );
            }

            let tool_calls = response.message.tool_calls.clone();
            if tool_calls.is_empty() {
                self.status = AgentStatus::Done;
                self.emit_status(&progress).await;
                let text = response.message.content.to_string_lossy();
                self.transcript.push(Message::assistant(text.as_str()));
                return self.outcome(Some(text), None, None, usage_total);
            }

            self.status = AgentStatus::ToolWait;
            self.emit_status(&progress).await;

            self.transcript
                .push(Message::assistant_with_tool_calls("", tool_calls.clone()));

            if cancel.is_cancelled() {
                self.status = AgentStatus::Cancelled;
                self.emit_status(&progress).await;
                return self.outcome(None, Some("cancelled".into()), Some(crate::error::ErrorKind::Cancelled), usage_total);
            }

            let ctx = {
                let mut c = ToolContext::new(self.spec.agent_id.0.clone(), task_id.clone());
                if let Some(dl) = deadline {
                    c = c.with_deadline(dl);
                }
                c
            };

            for tc in &tool_calls {
                if let Some(handler) = &progress {
                    handler
                        .on_progress(AgentProgressEvent::ToolStart {
                            agent_id: self.spec.agent_id.0.clone(),
                            tool_name: tc.name.clone(),
                        })
                        .await;
                }
            }

            let results = execute_tools_parallel(&tools, tool_calls.clone(), &ctx).await;

            for (tc, result) in tool_calls.iter().zip(results.into_iter()) {
                if let Some(handler) = &progress {
                    handler
                        .on_progress(AgentProgressEvent::ToolComplete {
                            agent_id: self.spec.agent_id.0.clone(),
                            tool_name: tc.name.clone(),
                            is_error: result.is_error,
                        })
                        .await;
                }
                let content = if result.is_error {
                    match result.error_kind {
                        Some(kind) => format!("[{}] {}", kind.as_str(), result.content),
                        None => result.content.clone(),
                    }
                } else {
                    result.content.clone()
                };
                self.transcript.push(Message::tool_result(&tc.id, content));
            }

            self.status = AgentStatus::Running;
        }

        self.status = AgentStatus::Failed;
        self.emit_status(&progress).await;
        self.outcome(
            None,
            Some(format!("exceeded max turns ({max_turns})")),
            Some(crate::error::ErrorKind::BudgetExhausted),
            usage_total,
        )
    }

    async fn emit_status(&self, progress: &Option<Arc<dyn AgentProgressHandler>>) {
        if let Some(handler) = progress {
            handler
                .on_progress(AgentProgressEvent::StatusChanged {
                    agent_id: self.spec.agent_id.0.clone(),
                    status: self.status,
                })
                .await;
        }
    }

    fn outcome(
        &self,
        output: Option<String>,
        error: Option<String>,
        error_kind: Option<crate::error::ErrorKind>,
        usage: Usage,
    ) -> AgentOutcome {
        AgentOutcome {
            agent_id: self.spec.agent_id.clone(),
            role: self.spec.role.clone(),
            status: self.status,
            output,
            error,
            error_kind,
            usage,
        }
    }
}

/// Consume a streamed response into (text, tool calls, usage). Kept for
/// backends/callers that want progress-as-it-streams rather than
/// `Provider::complete`; the Agent's own loop uses `complete` because the
/// Coordinator never needs intra-turn deltas, only the final turn result.
pub async fn drain_stream(
    mut stream: crate::provider::StreamResult,
) -> Result<(String, Vec<ToolCall>, Usage), Error> {
    let mut content = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut current: Option<(String, String, String)> = None;
    let mut usage = Usage::default();

    while let Some(chunk) = stream.next().await {
        match chunk? {
            StreamChunk::Start { .. } => {}
            StreamChunk::ThinkingDelta { .. } => {}
            StreamChunk::Delta { content: delta } => content.push_str(&delta),
            StreamChunk::ToolCallStart { id, name } => {
                if let Some((tc_id, tc_name, tc_args)) = current.take() {
                    let args: serde_json::Value =
                        serde_json::from_str(&tc_args).unwrap_or(serde_json::Value::Null);
                    tool_calls.push(ToolCall::new(tc_id, tc_name, args));
                }
                current = Some((id, name, String::new()));
            }
            StreamChunk::ToolCallDelta { arguments } => {
                if let Some((_, _, ref mut args)) = current {
                    args.push_str(&arguments);
                }
            }
            StreamChunk::Done { usage: u } => {
                if let Some((tc_id, tc_name, tc_args)) = current.take() {
                    let args: serde_json::Value =
                        serde_json::from_str(&tc_args).unwrap_or(serde_json::Value::Null);
                    tool_calls.push(ToolCall::new(tc_id, tc_name, args));
                }
                if let Some(u) = u {
                    usage = u;
                }
            }
            StreamChunk::Error { message } => return Err(Error::transient_backend(message)),
        }
    }

    Ok((content, tool_calls, usage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CompletionResponse, FinishReason};
    use crate::tool::ToolRegistry;

    struct MockProvider {
        responses: std::sync::Mutex<Vec<CompletionResponse>>,
    }

    #[async_trait]
    impl Provider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }
        fn default_model(&self) -> Option<&str> {
            None
        }
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, Error> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(Error::bad_request("no more mock responses"));
            }
            Ok(responses.remove(0))
        }
        async fn stream(&self, _request: CompletionRequest) -> Result<crate::provider::StreamResult, Error> {
            unimplemented!("not used in these tests")
        }
    }

    fn final_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            thinking: None,
            usage: Usage::new(10, 5),
            model: "mock".into(),
            finish_reason: FinishReason::Stop,
        }
    }

    #[tokio::test]
    async fn test_agent_reaches_done_without_tool_calls() {
        let provider: Arc<dyn Provider> = Arc::new(MockProvider {
            responses: std::sync::Mutex::new(vec![final_response("the answer is 4")]),
        });
        let tools = Arc::new(ToolRegistry::new());
        let spec = AgentSpec::new("a1", "solver", "You solve problems").with_context("2+2?");
        let mut agent = Agent::new(spec);

        let outcome = agent
            .run(provider, tools, "task-1", 5, Cancellation::new(), None, None)
            .await;

        assert_eq!(outcome.status, AgentStatus::Done);
        assert_eq!(outcome.output.as_deref(), Some("the answer is 4"));
        // system + user + final assistant == 3 transcript entries
        assert_eq!(agent.transcript().len(), 3);
    }

    #[tokio::test]
    async fn test_agent_budget_exhausted_on_max_turns() {
        // Every response asks for a tool call that does not exist, so the
        // loop keeps turning until max_turns is hit.
        let tool_call = ToolCall::new("tc-1", "nonexistent", serde_json::json!({}));
        let looping = CompletionResponse {
            message: Message::assistant_with_tool_calls("", vec![tool_call]),
            thinking: None,
            usage: Usage::new(1, 1),
            model: "mock".into(),
            finish_reason: FinishReason::ToolCalls,
        };
        let provider: Arc<dyn Provider> = Arc::new(MockProvider {
            responses: std::sync::Mutex::new(vec![looping.clone(), looping.clone(), looping]),
        });
        let tools = Arc::new(ToolRegistry::new());
        let spec = AgentSpec::new("a1", "looper", "loop forever").with_token_budget(1_000_000);
        let mut agent = Agent::new(spec);

        let outcome = agent
            .run(provider, tools, "task-1", 3, Cancellation::new(), None, None)
            .await;

        assert_eq!(outcome.status, AgentStatus::Failed);
        assert_eq!(outcome.error_kind, Some(crate::error::ErrorKind::BudgetExhausted));
    }

    #[tokio::test]
    async fn test_agent_cancelled_before_first_turn() {
        let provider: Arc<dyn Provider> = Arc::new(MockProvider {
            responses: std::sync::Mutex::new(vec![final_response("too late")]),
        });
        let tools = Arc::new(ToolRegistry::new());
        let spec = AgentSpec::new("a1", "r", "p");
        let mut agent = Agent::new(spec);
        let cancel = Cancellation::new();
        cancel.cancel();

        let outcome = agent.run(provider, tools, "task-1", 5, cancel, None, None).await;
        assert_eq!(outcome.status, AgentStatus::Cancelled);
    }

    #[test]
    fn test_agent_spec_validate_rejects_unknown_tool() {
        let registry = ToolRegistry::new();
        let spec = AgentSpec::new("a1", "r", "p").with_tools(vec!["does_not_exist".into()]);
        assert!(spec.validate_against(&registry).is_err());
    }
}
