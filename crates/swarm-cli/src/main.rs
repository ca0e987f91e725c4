//! Composition root and CLI front end for the swarm orchestrator core.
//!
//! This binary is the "HTTP handler layer" collaborator's stand-in for
//! local use: it wires the LLM Client, Tool Host, RAG Store, and Swarm
//! Coordinator together exactly once, then dispatches each subcommand to
//! the matching external interface (§6) — `submit_chat`, `submit_swarm`,
//! `add_documents`, `search_knowledge`, `invoke_tool`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value as JsonValue;
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;
use swarm_agent::{Coordinator, CoordinatorConfig, SwarmTask, Topology};
use swarm_core::{CompletionRequest, Error, Message, Provider, ToolContext, ToolRegistry};
use swarm_llm::{AnthropicProvider, GeminiProvider, OpenAIProvider, ResilientProvider};
use swarm_rag::{EmbeddingProvider, HttpEmbeddingProvider, RagStore};
use swarm_tools::{build_registry, CodeExecConfig, DatabaseHandle, SearchConfig, ToolsConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TopologyArg {
    Star,
    MapReduce,
}

impl From<TopologyArg> for Topology {
    fn from(value: TopologyArg) -> Self {
        match value {
            TopologyArg::Star => Topology::Star,
            TopologyArg::MapReduce => Topology::MapReduce,
        }
    }
}

#[derive(Parser)]
#[command(name = "swarm-orchestrator")]
#[command(author, version, about = "On-premises multi-agent LLM swarm orchestrator", long_about = None)]
struct Cli {
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// submit_chat: send one completion request and print the reply.
    Chat {
        /// User message text. Repeat for multi-turn ("system" text via --system).
        prompt: String,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
    },
    /// submit_swarm: decompose a task across a bounded pool of agents.
    Swarm {
        prompt: String,
        #[arg(long)]
        max_agents: Option<usize>,
        #[arg(long, value_enum, default_value = "star")]
        topology: TopologyArg,
        /// key=value pairs merged into the task's context map.
        #[arg(long = "context", value_parser = parse_key_val)]
        context: Vec<(String, String)>,
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// add_documents: embed and upsert documents into the RAG store.
    AddDocuments {
        /// id=content pairs; metadata is always empty from the CLI.
        #[arg(value_parser = parse_key_val, required = true)]
        documents: Vec<(String, String)>,
    },
    /// search_knowledge: top-k similarity search over the RAG store.
    Search {
        query: String,
        #[arg(long, default_value = "5")]
        k: usize,
    },
    /// invoke_tool: call one registered tool directly, outside any agent.
    InvokeTool {
        name: String,
        /// Arguments as a JSON object string, e.g. '{"path": "README.md"}'.
        #[arg(default_value = "{}")]
        arguments: String,
    },
    /// Print the effective configuration (secrets redacted).
    ShowConfig,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{s}`"))?;
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(cli.log_level.as_filter()))
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load().context("failed to load configuration")?;

    match cli.command {
        Commands::ShowConfig => {
            println!("{}", config.redacted_summary());
            Ok(())
        }
        Commands::Chat { prompt, system, temperature, max_tokens } => {
            let provider = build_llm_provider(&config)?;
            submit_chat(provider.as_ref(), &config, prompt, system, temperature, max_tokens).await
        }
        Commands::Swarm { prompt, max_agents, topology, context, deadline_secs } => {
            let provider = build_llm_provider(&config)?;
            let tools = Arc::new(build_tool_registry(&config).await?);
            let coordinator = Coordinator::new(provider, tools, CoordinatorConfig::default());
            submit_swarm(&coordinator, &config, prompt, max_agents, topology, context, deadline_secs).await
        }
        Commands::AddDocuments { documents } => {
            let (store, embedding) = build_rag(&config)?;
            add_documents(&store, embedding.as_ref(), documents).await
        }
        Commands::Search { query, k } => {
            let (store, embedding) = build_rag(&config)?;
            search_knowledge(&store, embedding.as_ref(), &query, k).await
        }
        Commands::InvokeTool { name, arguments } => {
            let tools = build_tool_registry(&config).await?;
            invoke_tool(&tools, &name, &arguments).await
        }
    }
}

fn build_llm_provider(config: &config::Config) -> Result<Arc<dyn Provider>> {
    let llm = &config.llm;
    let inner: Arc<dyn Provider> = match llm.backend.as_str() {
        "anthropic" => {
            let mut p = AnthropicProvider::new(llm.api_key.clone().unwrap_or_default())
                .with_base_url(llm.base_url.clone())
                .with_default_model(llm.model.clone());
            p = p.with_include_tool_reasoning(false);
            Arc::new(p)
        }
        "gemini" => Arc::new(
            GeminiProvider::new(llm.api_key.clone().unwrap_or_default())
                .with_base_url(llm.base_url.clone())
                .with_default_model(llm.model.clone()),
        ),
        other => {
            if other != "openai" {
                tracing::warn!(backend = other, "unknown llm backend, defaulting to the OpenAI-compatible adapter");
            }
            // Local inference endpoints commonly accept any bearer value.
            let api_key = llm.api_key.clone().unwrap_or_else(|| "local".to_string());
            Arc::new(
                OpenAIProvider::new(api_key)
                    .with_base_url(llm.base_url.clone())
                    .with_default_model(llm.model.clone()),
            )
        }
    };

    Ok(Arc::new(ResilientProvider::new(
        inner,
        llm.retry.to_retry_config(),
        llm.breaker.to_breaker_config(),
        llm.rate_limit.to_rate_limit_config(),
        llm.concurrency,
    )))
}

fn build_embedding_provider(config: &config::Config) -> Arc<dyn EmbeddingProvider> {
    let e = &config.embedding;
    let mut provider = HttpEmbeddingProvider::new("embedding", e.base_url.clone(), e.model.clone());
    if let Some(key) = &e.api_key {
        provider = provider.with_api_key(key.clone());
    }
    Arc::new(provider)
}

fn build_rag(config: &config::Config) -> Result<(Arc<RagStore>, Arc<dyn EmbeddingProvider>)> {
    let embedding = build_embedding_provider(config);
    let store = if config.rag.store_path.to_str() == Some(":memory:") {
        RagStore::in_memory(config.embedding.dimension, "http")
    } else {
        RagStore::open(config.rag.store_path.clone(), config.embedding.dimension, "http")
    }
    .context("failed to open RAG store")?;
    Ok((Arc::new(store), embedding))
}

async fn build_tool_registry(config: &config::Config) -> Result<ToolRegistry> {
    let t = &config.tools;
    let mut tools_config = ToolsConfig::new(t.fs_roots[0].clone())
        .with_fs_roots(t.fs_roots.clone())
        .with_write(t.allow_write);

    if let Some(db_path) = &t.database_path {
        let db = DatabaseHandle::open(db_path).context("failed to open tool database")?;
        tools_config = tools_config.with_database(Arc::new(db)).with_database_row_cap(t.database_row_cap);
    }

    if let Some(interpreter) = &t.python_interpreter {
        tools_config = tools_config.with_code_exec(CodeExecConfig {
            python_interpreter: interpreter.clone(),
            shell_allowlist: t.shell_allowlist.clone(),
        });
    }

    if let Some(endpoint) = &t.web_search_endpoint {
        let mut search = SearchConfig::new(endpoint.clone());
        if let Some(key) = &t.web_search_api_key {
            search = search.with_api_key(key.clone());
        }
        tools_config = tools_config.with_web_search(search);
    }
    tools_config.enable_web_fetch = t.enable_web_fetch;

    // Knowledge-class tools ride on the same RAG store the add/search
    // subcommands use, so agents can call `rag_search`/`rag_add` themselves.
    if let Ok((store, embedding)) = build_rag(config) {
        tools_config = tools_config.with_knowledge(store, embedding);
    }

    build_registry(tools_config).context("failed to build tool registry")
}

async fn submit_chat(
    provider: &dyn Provider,
    config: &config::Config,
    prompt: String,
    system: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
) -> Result<()> {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt));

    let mut request = CompletionRequest::new(messages).with_model(config.llm.model.clone()).with_stream(false);
    if let Some(t) = temperature {
        request = request.with_temperature(t);
    }
    if let Some(m) = max_tokens {
        request = request.with_max_tokens(m);
    }

    let response = provider.complete(request).await.context("chat completion failed")?;
    println!("{}", response.message.content.to_string_lossy());
    Ok(())
}

async fn submit_swarm(
    coordinator: &Coordinator,
    config: &config::Config,
    prompt: String,
    max_agents: Option<usize>,
    topology: TopologyArg,
    context_pairs: Vec<(String, String)>,
    deadline_secs: Option<u64>,
) -> Result<()> {
    let context: HashMap<String, String> = context_pairs.into_iter().collect();
    let mut task = SwarmTask::new(
        uuid_like_id(),
        prompt,
        max_agents.unwrap_or(config.default_max_agents),
    )
    .with_topology(topology.into())
    .with_context(context);

    if let Some(secs) = deadline_secs {
        task = task.with_deadline(std::time::Instant::now() + std::time::Duration::from_secs(secs));
    }

    match coordinator.run(task).await {
        Ok(outcome) => {
            println!("{}", outcome.answer);
            if outcome.partial {
                eprintln!("(partial result: not every agent succeeded)");
            }
            for report in &outcome.agent_reports {
                eprintln!("  agent {} [{}]: {:?}", report.agent_id, report.role, report.status);
            }
            Ok(())
        }
        Err(swarm_err) => {
            for report in &swarm_err.agent_reports {
                eprintln!("  agent {} [{}]: {:?}", report.agent_id, report.role, report.status);
            }
            Err(anyhow::anyhow!("swarm task failed: {}", swarm_err.error))
        }
    }
}

async fn add_documents(store: &RagStore, embedding: &dyn EmbeddingProvider, documents: Vec<(String, String)>) -> Result<()> {
    let total = documents.len();
    let items = documents
        .into_iter()
        .map(|(id, content)| (id, content, HashMap::new()))
        .collect();
    store.add(embedding, items).await.context("failed to add documents")?;
    println!("{{\"added\": {total}, \"skipped\": 0}}");
    Ok(())
}

async fn search_knowledge(store: &RagStore, embedding: &dyn EmbeddingProvider, query: &str, k: usize) -> Result<()> {
    let hits = store.search(embedding, query, k, None).await.context("search failed")?;
    for hit in hits {
        println!("{:.4}\t{}\t{}", hit.score, hit.document.id, hit.document.content);
    }
    Ok(())
}

async fn invoke_tool(tools: &ToolRegistry, name: &str, arguments: &str) -> Result<()> {
    let arguments: JsonValue = serde_json::from_str(arguments).context("arguments must be a JSON object")?;
    let ctx = ToolContext::new("cli", "cli-invocation");
    match tools.invoke(name, arguments, &ctx).await {
        Ok(output) => {
            println!("{}", output.content);
            Ok(())
        }
        Err(e) => Err(map_tool_error(e)),
    }
}

fn map_tool_error(e: Error) -> anyhow::Error {
    anyhow::anyhow!("tool invocation failed ({:?}): {}", e.kind(), e)
}

/// A process-local, monotonically-distinct task id. Not a UUID (no crate
/// for it is otherwise needed here); collisions across processes are
/// irrelevant for a single CLI invocation's lifetime.
fn uuid_like_id() -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id();
    format!("task-{pid}-{n}")
}
