//! Process configuration (§6 "Configuration (environment-sourced)"): LLM
//! backend selector, endpoint URLs, model identifiers, retry/breaker/
//! rate-limit parameters, the LLM Client's concurrency cap, per-tool policy
//! caps, allowed filesystem roots, and the RAG store location.
//!
//! Layered with `figment`: a `config.toml` next to the binary's config
//! directory, overridden by `SWARM_`-prefixed environment variables. No
//! field here is ever logged or echoed into an error payload — `show()`
//! redacts every key that looks like a secret before printing it.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

fn default_llm_backend() -> String {
    "openai".to_string()
}

fn default_llm_base_url() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_llm_model() -> String {
    "local-model".to_string()
}

fn default_max_agents() -> usize {
    16
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_ms() -> u64 {
    100
}
fn default_cap_ms() -> u64 {
    10_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_ms: default_base_ms(),
            cap_ms: default_cap_ms(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> swarm_llm::RetryConfig {
        swarm_llm::RetryConfig {
            max_retries: self.max_retries,
            base: Duration::from_millis(self.base_ms),
            cap: Duration::from_millis(self.cap_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_ms() -> u64 {
    30_000
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> swarm_llm::BreakerConfig {
        swarm_llm::BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_millis(self.cooldown_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_refill_per_sec")]
    pub refill_per_sec: f64,
    #[serde(default = "default_burst")]
    pub burst: f64,
}

fn default_refill_per_sec() -> f64 {
    10.0
}
fn default_burst() -> f64 {
    10.0
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            refill_per_sec: default_refill_per_sec(),
            burst: default_burst(),
        }
    }
}

impl RateLimitSettings {
    pub fn to_rate_limit_config(&self) -> swarm_llm::RateLimitConfig {
        swarm_llm::RateLimitConfig {
            refill_per_sec: self.refill_per_sec,
            burst: self.burst,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// One of "openai", "anthropic", "gemini" — selects the wire adapter.
    #[serde(default = "default_llm_backend")]
    pub backend: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// C — max concurrent in-flight requests to this backend.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub breaker: BreakerSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
}

fn default_concurrency() -> usize {
    4
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            backend: default_llm_backend(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key: None,
            concurrency: default_concurrency(),
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            rate_limit: RateLimitSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    #[serde(default = "default_embedding_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
}

fn default_embedding_base_url() -> String {
    "http://localhost:8080/v1".to_string()
}
fn default_embedding_model() -> String {
    "local-embedding".to_string()
}
fn default_embedding_dimension() -> usize {
    768
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            base_url: default_embedding_base_url(),
            model: default_embedding_model(),
            api_key: None,
            dimension: default_embedding_dimension(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Filesystem roots agents may read (and write, if `allow_write`).
    #[serde(default = "default_fs_roots")]
    pub fs_roots: Vec<PathBuf>,
    #[serde(default)]
    pub allow_write: bool,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_row_cap")]
    pub database_row_cap: usize,
    #[serde(default)]
    pub python_interpreter: Option<String>,
    #[serde(default)]
    pub shell_allowlist: Vec<String>,
    #[serde(default)]
    pub web_search_endpoint: Option<String>,
    #[serde(default)]
    pub web_search_api_key: Option<String>,
    #[serde(default = "default_true")]
    pub enable_web_fetch: bool,
}

fn default_fs_roots() -> Vec<PathBuf> {
    vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))]
}

fn default_row_cap() -> usize {
    swarm_tools::DEFAULT_ROW_CAP
}

fn default_true() -> bool {
    true
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            fs_roots: default_fs_roots(),
            allow_write: false,
            database_path: None,
            database_row_cap: default_row_cap(),
            python_interpreter: None,
            shell_allowlist: Vec::new(),
            web_search_endpoint: None,
            web_search_api_key: None,
            enable_web_fetch: default_true(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagSettings {
    /// Path to the durable store file, or `:memory:` for an ephemeral store.
    #[serde(default = "default_rag_path")]
    pub store_path: PathBuf,
}

fn default_rag_path() -> PathBuf {
    PathBuf::from("swarm-rag.sqlite")
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            store_path: default_rag_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub embedding: EmbeddingSettings,
    #[serde(default)]
    pub tools: ToolSettings,
    #[serde(default)]
    pub rag: RagSettings,
    /// Default max_agents for a swarm task that doesn't specify one.
    #[serde(default = "default_max_agents")]
    pub default_max_agents: usize,
}

impl Config {
    /// Loads `config.toml` from the platform config directory (if present),
    /// then applies `SWARM_`-prefixed environment overrides (e.g.
    /// `SWARM_LLM__API_KEY` for `llm.api_key`). Missing file is not an
    /// error — every field has a default.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut figment = Figment::new();
        if path.exists() {
            figment = figment.merge(Toml::file(&path));
        }
        figment = figment.merge(Env::prefixed("SWARM_").split("__"));
        figment
            .extract()
            .context("failed to assemble configuration")
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;
        Ok(config_dir.join("swarm-orchestrator").join("config.toml"))
    }

    /// Renders a redacted summary safe to print or log: every field whose
    /// name suggests a secret (`api_key`) is replaced with a fixed marker.
    pub fn redacted_summary(&self) -> String {
        format!(
            "llm.backend={} llm.base_url={} llm.model={} llm.api_key={} llm.concurrency={}\n\
             embedding.base_url={} embedding.model={} embedding.api_key={} embedding.dimension={}\n\
             tools.fs_roots={:?} tools.allow_write={} tools.database_path={:?}\n\
             rag.store_path={:?} default_max_agents={}",
            self.llm.backend,
            self.llm.base_url,
            self.llm.model,
            redact(&self.llm.api_key),
            self.llm.concurrency,
            self.embedding.base_url,
            self.embedding.model,
            redact(&self.embedding.api_key),
            self.embedding.dimension,
            self.tools.fs_roots,
            self.tools.allow_write,
            self.tools.database_path,
            self.rag.store_path,
            self.default_max_agents,
        )
    }
}

fn redact(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "<redacted>",
        None => "<unset>",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_sane_backend() {
        let config = Config::default();
        assert_eq!(config.llm.backend, "openai");
        assert_eq!(config.llm.concurrency, 4);
    }

    #[test]
    fn test_redacted_summary_never_contains_api_key() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-super-secret".to_string());
        let summary = config.redacted_summary();
        assert!(!summary.contains("sk-super-secret"));
        assert!(summary.contains("<redacted>"));
    }

    #[test]
    fn test_parse_toml_overrides_defaults() {
        let toml = r#"
            default_max_agents = 8

            [llm]
            backend = "anthropic"
            model = "claude-3-opus"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.llm.backend, "anthropic");
        assert_eq!(config.llm.model, "claude-3-opus");
        assert_eq!(config.default_max_agents, 8);
    }
}
