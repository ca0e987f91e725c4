//! swarm-core: shared types and traits for the swarm orchestrator.
//!
//! Home of the Agent state machine, the Provider and Tool traits, the
//! error taxonomy every other crate classifies against, and the message /
//! transcript types that flow between them.

pub mod agent;
pub mod error;
pub mod message;
pub mod provider;
pub mod rag;
pub mod task;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use agent::{
    Agent, AgentId, AgentOutcome, AgentProgressEvent, AgentProgressHandler, AgentSpec,
    AgentStatus, DEFAULT_MAX_TURNS,
};
pub use error::{Error, ErrorKind};
pub use message::{
    strip_reasoning_from_history, strip_thinking_tags, Content, ContentPart, Message, Role,
    StreamChunk, ToolCall, ToolResult, Usage,
};
pub use provider::{CompletionRequest, CompletionResponse, FinishReason, Provider, StreamResult};
pub use rag::{CircuitState, Document, SearchHit};
pub use task::{
    complete_parallel, execute_tools_parallel, Cancellation, TaskHandle, TaskId, TaskInfo,
    TaskManager, TaskState, ToolExecutionResult,
};
pub use tool::{
    PropertySchema, Tool, ToolClass, ToolContext, ToolDefinition, ToolOutput, ToolParameters,
    ToolPolicy, ToolRegistry,
};

pub type Result<T> = std::result::Result<T, Error>;
