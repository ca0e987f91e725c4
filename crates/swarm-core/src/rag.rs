//! Shared data-model types for the RAG Store (§4.2) and the LLM Client's
//! circuit breaker (§4.3). Both live in other crates (`swarm-rag`,
//! `swarm-llm`); the types themselves are shared vocabulary so the
//! Coordinator and Tool Host can reason about them without depending on
//! either crate's implementation details.

use std::collections::HashMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A stored chunk of content with its embedding, as persisted by the RAG
/// Store. `embedding` is always unit-normalized and of the store's
/// configured dimension.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub embedding: Vec<f32>,
    pub created_at: SystemTime,
}

impl Document {
    pub fn new(id: impl Into<String>, content: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            metadata: HashMap::new(),
            embedding,
            created_at: SystemTime::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: HashMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A `Document` paired with its similarity score against a query, in
/// `[-1, 1]`. Ephemeral — produced fresh by each `search` call, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub document: Document,
    pub score: f32,
}

/// Per-backend circuit breaker state (§4.3), exposed for observability
/// (logging, health endpoints) independent of the breaker's own
/// implementation in `swarm-llm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    HalfOpen,
    Open,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::HalfOpen => "half_open",
            CircuitState::Open => "open",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_builder() {
        let doc = Document::new("d1", "hello world", vec![0.1, 0.2]);
        assert_eq!(doc.id, "d1");
        assert_eq!(doc.embedding.len(), 2);
    }

    #[test]
    fn test_circuit_state_as_str() {
        assert_eq!(CircuitState::Closed.as_str(), "closed");
        assert_eq!(CircuitState::Open.as_str(), "open");
    }
}
