//! swarm-tools: the built-in tool handlers for the Tool Host (§4.4),
//! covering every tool class in its policy table:
//! - Filesystem read/write: `read_file`, `list_directory`, `write_file`
//! - Database: `query`, `execute`
//! - Code execution: `execute_python`, `execute_shell`
//! - Web: `search`, `fetch`
//! - Knowledge: `rag_search`, `rag_add` (delegating to `swarm-rag`)

pub mod code_exec;
pub mod database;
pub mod filesystem;
pub mod knowledge;
pub mod web;

pub use code_exec::{create_code_exec_tools, ExecutePythonTool, ExecuteShellTool};
pub use database::{create_database_tools, DatabaseHandle, ExecuteTool, QueryTool, DEFAULT_ROW_CAP};
pub use filesystem::{create_filesystem_tools, FileSystemConfig, ListDirectoryTool, ReadFileTool, WriteFileTool};
pub use knowledge::{create_knowledge_tools, RagAddTool, RagSearchTool};
pub use web::{create_web_tools, FetchTool, SearchConfig, SearchTool};

use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;

use swarm_core::{Error, ToolRegistry};
use swarm_rag::{EmbeddingProvider, RagStore};

/// Assembles every built-in tool class into one registry. Each field is
/// optional except the filesystem root: a deployment can omit code
/// execution, web, or knowledge tools entirely by leaving the
/// corresponding config unset.
pub struct ToolsConfig {
    pub fs_roots: Vec<PathBuf>,
    pub allow_write: bool,
    pub database: Option<Arc<DatabaseHandle>>,
    pub database_row_cap: usize,
    pub code_exec: Option<CodeExecConfig>,
    pub web_search: Option<SearchConfig>,
    pub enable_web_fetch: bool,
    pub knowledge: Option<(Arc<RagStore>, Arc<dyn EmbeddingProvider>)>,
}

#[derive(Clone)]
pub struct CodeExecConfig {
    pub python_interpreter: String,
    pub shell_allowlist: Vec<String>,
}

impl ToolsConfig {
    pub fn new(fs_root: impl Into<PathBuf>) -> Self {
        Self {
            fs_roots: vec![fs_root.into()],
            allow_write: false,
            database: None,
            database_row_cap: database::DEFAULT_ROW_CAP,
            code_exec: None,
            web_search: None,
            enable_web_fetch: true,
            knowledge: None,
        }
    }

    pub fn with_fs_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.fs_roots = roots;
        self
    }

    pub fn with_write(mut self, allow: bool) -> Self {
        self.allow_write = allow;
        self
    }

    pub fn with_database(mut self, database: Arc<DatabaseHandle>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_database_row_cap(mut self, cap: usize) -> Self {
        self.database_row_cap = cap;
        self
    }

    pub fn with_code_exec(mut self, config: CodeExecConfig) -> Self {
        self.code_exec = Some(config);
        self
    }

    pub fn with_web_search(mut self, config: SearchConfig) -> Self {
        self.web_search = Some(config);
        self
    }

    pub fn with_knowledge(mut self, store: Arc<RagStore>, embedding: Arc<dyn EmbeddingProvider>) -> Self {
        self.knowledge = Some((store, embedding));
        self
    }
}

/// Build a `ToolRegistry` with every tool class `config` enables.
pub fn build_registry(config: ToolsConfig) -> Result<ToolRegistry, Error> {
    let mut registry = ToolRegistry::new();

    if config.fs_roots.is_empty() {
        return Err(Error::config("at least one filesystem root is required"));
    }
    let fs_config = FileSystemConfig::new(&config.fs_roots[0]).with_roots(config.fs_roots.clone());
    for tool in create_filesystem_tools(fs_config, config.allow_write) {
        registry.register(tool);
    }

    if let Some(database) = config.database {
        for tool in create_database_tools(database, config.database_row_cap) {
            registry.register(tool);
        }
    }

    if let Some(code_exec) = config.code_exec {
        for tool in create_code_exec_tools(code_exec.python_interpreter, code_exec.shell_allowlist) {
            registry.register(tool);
        }
    }

    if config.enable_web_fetch || config.web_search.is_some() {
        let client = Client::builder()
            .user_agent("swarm-orchestrator/0.1")
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {e}")))?;
        for tool in create_web_tools(client, config.web_search) {
            registry.register(tool);
        }
    }

    if let Some((store, embedding)) = config.knowledge {
        for tool in create_knowledge_tools(store, embedding) {
            registry.register(tool);
        }
    }

    Ok(registry)
}
