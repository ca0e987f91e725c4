//! swarm-rag: the Embedding Provider (§4.1) and RAG Store (§4.2).
//!
//! The Tool Host's Knowledge-class tools (`rag_search`, `rag_add`) delegate
//! here; nothing in this crate executes as a `Tool` directly.

pub mod embedding;
pub mod store;

pub use embedding::{normalize, EmbeddingProvider, HttpEmbeddingProvider, MIN_BATCH};
pub use store::{MetadataFilter, RagStats, RagStore};
