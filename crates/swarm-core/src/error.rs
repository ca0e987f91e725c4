use thiserror::Error;

/// Stable, machine-readable error classification. Every user-visible error
/// carries one of these; the string rendering never includes secrets, API
/// keys, or filesystem paths outside the configured allowed roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TransientBackend,
    CircuitOpen,
    RateLimitTimeout,
    ContextOverflow,
    PolicyDenied,
    ToolError,
    ToolTimeout,
    PlanInvalid,
    SwarmInsufficientSuccesses,
    BudgetExhausted,
    DeadlineExceeded,
    Cancelled,
    EmbeddingBackendUnavailable,
    EmbeddingDimensionMismatch,
    BadRequest,
    AuthError,
    UnknownTool,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientBackend => "transient_backend",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimitTimeout => "rate_limit_timeout",
            ErrorKind::ContextOverflow => "context_overflow",
            ErrorKind::PolicyDenied => "policy_denied",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::ToolTimeout => "tool_timeout",
            ErrorKind::PlanInvalid => "plan_invalid",
            ErrorKind::SwarmInsufficientSuccesses => "swarm_insufficient_successes",
            ErrorKind::BudgetExhausted => "budget_exhausted",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::EmbeddingBackendUnavailable => "embedding_backend_unavailable",
            ErrorKind::EmbeddingDimensionMismatch => "embedding_dimension_mismatch",
            ErrorKind::BadRequest => "bad_request",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::UnknownTool => "unknown_tool",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("transient backend failure: {0}")]
    TransientBackend(String),

    #[error("circuit open for backend '{backend}'")]
    CircuitOpen { backend: String },

    #[error("rate limit acquire timed out")]
    RateLimitTimeout,

    #[error("context overflow: {0}")]
    ContextOverflow(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("tool error in '{tool}': {message}")]
    ToolError { tool: String, message: String },

    #[error("tool '{tool}' timed out after {elapsed_ms}ms")]
    ToolTimeout { tool: String, elapsed_ms: u64 },

    #[error("plan invalid: {0}")]
    PlanInvalid(String),

    #[error("swarm had insufficient successes: {successes}/{total} (need {needed})")]
    SwarmInsufficientSuccesses {
        successes: usize,
        total: usize,
        needed: usize,
    },

    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("cancelled")]
    Cancelled,

    #[error("embedding backend unavailable: {0}")]
    EmbeddingBackendUnavailable(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("authentication error: {0}")]
    AuthError(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn transient_backend(message: impl Into<String>) -> Self {
        Self::TransientBackend(message.into())
    }

    pub fn circuit_open(backend: impl Into<String>) -> Self {
        Self::CircuitOpen {
            backend: backend.into(),
        }
    }

    pub fn context_overflow(message: impl Into<String>) -> Self {
        Self::ContextOverflow(message.into())
    }

    pub fn policy_denied(message: impl Into<String>) -> Self {
        Self::PolicyDenied(message.into())
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolError {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn tool_timeout(tool: impl Into<String>, elapsed_ms: u64) -> Self {
        Self::ToolTimeout {
            tool: tool.into(),
            elapsed_ms,
        }
    }

    pub fn plan_invalid(message: impl Into<String>) -> Self {
        Self::PlanInvalid(message.into())
    }

    pub fn swarm_insufficient_successes(successes: usize, total: usize, needed: usize) -> Self {
        Self::SwarmInsufficientSuccesses {
            successes,
            total,
            needed,
        }
    }

    pub fn budget_exhausted(message: impl Into<String>) -> Self {
        Self::BudgetExhausted(message.into())
    }

    pub fn embedding_backend_unavailable(message: impl Into<String>) -> Self {
        Self::EmbeddingBackendUnavailable(message.into())
    }

    pub fn embedding_dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::EmbeddingDimensionMismatch { expected, actual }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::AuthError(message.into())
    }

    pub fn unknown_tool(name: impl Into<String>) -> Self {
        Self::UnknownTool(name.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Stable machine-readable tag for this error, per the §7 taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TransientBackend(_) => ErrorKind::TransientBackend,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::RateLimitTimeout => ErrorKind::RateLimitTimeout,
            Error::ContextOverflow(_) => ErrorKind::ContextOverflow,
            Error::PolicyDenied(_) => ErrorKind::PolicyDenied,
            Error::ToolError { .. } => ErrorKind::ToolError,
            Error::ToolTimeout { .. } => ErrorKind::ToolTimeout,
            Error::PlanInvalid(_) => ErrorKind::PlanInvalid,
            Error::SwarmInsufficientSuccesses { .. } => ErrorKind::SwarmInsufficientSuccesses,
            Error::BudgetExhausted(_) => ErrorKind::BudgetExhausted,
            Error::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::EmbeddingBackendUnavailable(_) => ErrorKind::EmbeddingBackendUnavailable,
            Error::EmbeddingDimensionMismatch { .. } => ErrorKind::EmbeddingDimensionMismatch,
            Error::BadRequest(_) => ErrorKind::BadRequest,
            Error::AuthError(_) => ErrorKind::AuthError,
            Error::UnknownTool(_) => ErrorKind::UnknownTool,
            // Infrastructure-adjacent kinds with no direct §7 row collapse to bad_request.
            Error::Serialization(_) | Error::Storage(_) | Error::Config(_) => ErrorKind::BadRequest,
        }
    }

    /// Transient categories (§4.3): timeout, 5xx, rate_limited, connection.
    /// These are the only categories the retry wrapper in `swarm-llm` retries.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransientBackend(_))
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::AuthError(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_are_stable() {
        assert_eq!(Error::circuit_open("local").kind().as_str(), "circuit_open");
        assert_eq!(Error::RateLimitTimeout.kind().as_str(), "rate_limit_timeout");
        assert_eq!(
            Error::swarm_insufficient_successes(1, 4, 2).kind().as_str(),
            "swarm_insufficient_successes"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::transient_backend("timeout").is_retryable());
        assert!(!Error::auth("invalid key").is_retryable());
        assert!(!Error::ContextOverflow("too long".into()).is_retryable());
    }

    #[test]
    fn test_error_messages_do_not_need_secret_interpolation() {
        let err = Error::auth("invalid credentials");
        assert!(!err.to_string().contains("sk-"));
    }
}
