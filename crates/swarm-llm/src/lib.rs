//! swarm-llm: the LLM Client (§4.3).
//!
//! Two concerns live here: wire-protocol adapters (`anthropic`, `gemini`,
//! `openai` — each a `Provider` for one backend's HTTP API) and the
//! resilience wrapper (`resilience`) that every backend is composed with
//! before the Coordinator ever sees it: retry with full jitter, a
//! per-backend circuit breaker, a token-bucket rate limiter, and a bounded
//! concurrency semaphore.

pub mod anthropic;
pub mod gemini;
pub mod openai;
pub mod resilience;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAIProvider;
pub use resilience::{BreakerConfig, RateLimitConfig, ResilientProvider, RetryConfig};

use swarm_core::Error;

/// Map an HTTP status code to the §7 error taxonomy. `401`/`403` are
/// treated as terminal auth failures; everything else in the transient
/// categories named in §4.3 (timeout, 5xx, rate_limited, connection) is
/// `transient_backend` so the resilience wrapper's retry loop picks it up.
/// `4xx` other than auth/rate-limit is a malformed request, not a backend
/// fault.
pub(crate) fn http_error(status: u16, message: impl Into<String>) -> Error {
    let message = message.into();
    match status {
        401 | 403 => Error::auth(message),
        429 => Error::transient_backend(format!("rate limited: {message}")),
        400 | 404 | 422 => Error::bad_request(message),
        s if s >= 500 => Error::transient_backend(message),
        _ => Error::transient_backend(message),
    }
}
