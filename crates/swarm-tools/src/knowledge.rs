//! Knowledge-class tools (§4.4): `rag_search` and `rag_add`, thin wrappers
//! delegating to the RAG Store and Embedding Provider in `swarm-rag`.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use swarm_core::{
    Error, PropertySchema, Tool, ToolClass, ToolContext, ToolDefinition, ToolOutput,
    ToolParameters, ToolPolicy,
};
use swarm_rag::{EmbeddingProvider, RagStore};

const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);
const DEFAULT_K: usize = 5;

pub struct RagSearchTool {
    store: Arc<RagStore>,
    embedding: Arc<dyn EmbeddingProvider>,
}

impl RagSearchTool {
    pub fn new(store: Arc<RagStore>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedding }
    }
}

#[derive(Deserialize)]
struct RagSearchArgs {
    query: String,
    #[serde(default)]
    k: Option<usize>,
}

#[async_trait]
impl Tool for RagSearchTool {
    fn name(&self) -> &str {
        "rag_search"
    }

    fn description(&self) -> &str {
        "Search the local knowledge store for the top-k documents most similar to a query."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("query", PropertySchema::string("Search text"), true)
                .add_property("k", PropertySchema::integer("Number of hits to return (default 5, clamped to [1,100])"), false),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::Knowledge, DEFAULT_TIMEOUT)
    }

    async fn execute(&self, arguments: JsonValue, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: RagSearchArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("rag_search", format!("invalid arguments: {e}")))?;

        let hits = self
            .store
            .search(self.embedding.as_ref(), &args.query, args.k.unwrap_or(DEFAULT_K), None)
            .await?;

        let rendered = hits
            .iter()
            .map(|hit| format!("[{:.4}] {}: {}", hit.score, hit.document.id, hit.document.content))
            .collect::<Vec<_>>()
            .join("\n");

        if rendered.is_empty() {
            Ok(ToolOutput::success("(no matching documents)"))
        } else {
            Ok(ToolOutput::success(rendered))
        }
    }
}

pub struct RagAddTool {
    store: Arc<RagStore>,
    embedding: Arc<dyn EmbeddingProvider>,
}

impl RagAddTool {
    pub fn new(store: Arc<RagStore>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedding }
    }
}

#[derive(Deserialize)]
struct RagAddArgs {
    id: String,
    content: String,
}

#[async_trait]
impl Tool for RagAddTool {
    fn name(&self) -> &str {
        "rag_add"
    }

    fn description(&self) -> &str {
        "Add a document to the local knowledge store, embedding it for future search."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("id", PropertySchema::string("Document id"), true)
                .add_property("content", PropertySchema::string("Document text"), true),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::Knowledge, DEFAULT_TIMEOUT)
    }

    async fn execute(&self, arguments: JsonValue, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: RagAddArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("rag_add", format!("invalid arguments: {e}")))?;

        self.store
            .add(
                self.embedding.as_ref(),
                vec![(args.id.clone(), args.content, Default::default())],
            )
            .await?;

        Ok(ToolOutput::success(format!("added document '{}'", args.id)))
    }
}

pub fn create_knowledge_tools(store: Arc<RagStore>, embedding: Arc<dyn EmbeddingProvider>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(RagSearchTool::new(store.clone(), embedding.clone())),
        Box::new(RagAddTool::new(store, embedding)),
    ]
}
