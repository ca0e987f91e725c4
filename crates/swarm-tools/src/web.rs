//! Web-class tools (§4.4): `search` and `fetch`. Outbound requests go
//! through a single configured `reqwest::Client`; responses are capped by
//! `ToolPolicy::response_size_cap` and bounded by `ToolPolicy::timeout`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use swarm_core::{
    Error, PropertySchema, Tool, ToolClass, ToolContext, ToolDefinition, ToolOutput,
    ToolParameters, ToolPolicy,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_RESPONSE_CAP: usize = 500_000;

fn truncate(body: &str, cap: usize) -> String {
    if body.len() <= cap {
        body.to_string()
    } else {
        let cut = body.char_indices().take_while(|(i, _)| *i <= cap).last().map(|(i, _)| i).unwrap_or(0);
        format!("{}\n\n... (truncated, {} total bytes)", &body[..cut], body.len())
    }
}

// =============================================================================
// fetch
// =============================================================================

pub struct FetchTool {
    client: Client,
    response_size_cap: usize,
}

impl FetchTool {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            response_size_cap: DEFAULT_RESPONSE_CAP,
        }
    }

    pub fn with_response_size_cap(mut self, cap: usize) -> Self {
        self.response_size_cap = cap;
        self
    }
}

#[derive(Deserialize)]
struct FetchArgs {
    url: String,
    #[serde(default)]
    selector: Option<String>,
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &str {
        "fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and extract its text content, optionally filtered by a CSS selector."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("url", PropertySchema::string("URL to fetch"), true)
                .add_property(
                    "selector",
                    PropertySchema::string("Optional CSS selector to narrow extraction (e.g. 'main', 'article')"),
                    false,
                ),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::Web, DEFAULT_TIMEOUT).with_response_size_cap(self.response_size_cap)
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: FetchArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("fetch", format!("invalid arguments: {e}")))?;

        let response = self
            .client
            .get(&args.url)
            .send()
            .await
            .map_err(|e| Error::tool("fetch", format!("failed to fetch '{}': {e}", args.url)))?;

        if !response.status().is_success() {
            return Err(Error::tool("fetch", format!("'{}' returned {}", args.url, response.status())));
        }

        let html = response
            .text()
            .await
            .map_err(|e| Error::tool("fetch", format!("failed to read response body: {e}")))?;

        let document = Html::parse_document(&html);
        let text = match &args.selector {
            Some(raw) => {
                let selector = Selector::parse(raw)
                    .map_err(|_| Error::tool("fetch", format!("invalid selector: {raw}")))?;
                document.select(&selector).map(|el| extract_text(&el)).collect::<Vec<_>>().join("\n\n")
            }
            None => extract_main_content(&document),
        };

        let cleaned = clean_text(&text);
        if cleaned.is_empty() {
            Ok(ToolOutput::success("(no text content found)"))
        } else {
            Ok(ToolOutput::success(truncate(&cleaned, self.response_size_cap)))
        }
    }
}

fn extract_main_content(document: &Html) -> String {
    if let Ok(selector) = Selector::parse("main, article, .content, #content") {
        let hits: Vec<_> = document.select(&selector).collect();
        if !hits.is_empty() {
            return hits.into_iter().map(|el| extract_text(&el)).collect::<Vec<_>>().join("\n\n");
        }
    }
    extract_text(&document.root_element())
}

fn extract_text(element: &scraper::ElementRef) -> String {
    let mut text = String::new();
    for node in element.descendants() {
        if let Some(el) = node.value().as_element() {
            if matches!(el.name(), "script" | "style" | "nav" | "footer" | "header" | "aside" | "noscript") {
                continue;
            }
        }
        if let Some(t) = node.value().as_text() {
            let trimmed = t.trim();
            if !trimmed.is_empty() {
                if !text.is_empty() && !text.ends_with(' ') && !text.ends_with('\n') {
                    text.push(' ');
                }
                text.push_str(trimmed);
            }
        }
    }
    text
}

fn clean_text(text: &str) -> String {
    let mut result = String::new();
    let mut prev_was_whitespace = false;
    let mut newline_count = 0;
    for ch in text.chars() {
        if ch == '\n' {
            newline_count += 1;
            if newline_count <= 2 {
                result.push('\n');
            }
            prev_was_whitespace = true;
        } else if ch.is_whitespace() {
            if !prev_was_whitespace {
                result.push(' ');
                prev_was_whitespace = true;
            }
            newline_count = 0;
        } else {
            result.push(ch);
            prev_was_whitespace = false;
            newline_count = 0;
        }
    }
    result.trim().to_string()
}

// =============================================================================
// search
// =============================================================================

/// Points `SearchTool` at a locally-hosted search API (e.g. a SearXNG or
/// Perplexica instance) reachable on the same network as the rest of the
/// on-premises deployment — no external search vendor required.
#[derive(Clone)]
pub struct SearchConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

impl SearchConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResultItem {
    title: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchResultItem>,
}

pub struct SearchTool {
    client: Client,
    config: SearchConfig,
    response_size_cap: usize,
}

impl SearchTool {
    pub fn new(client: Client, config: SearchConfig) -> Self {
        Self {
            client,
            config,
            response_size_cap: DEFAULT_RESPONSE_CAP,
        }
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search the web and return a list of matching pages with titles and snippets."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property("query", PropertySchema::string("Search query"), true),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::Web, DEFAULT_TIMEOUT).with_response_size_cap(self.response_size_cap)
    }

    async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: SearchArgs =
            serde_json::from_value(arguments).map_err(|e| Error::tool("search", format!("invalid arguments: {e}")))?;

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .json(&SearchRequest { query: &args.query });
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::tool("search", format!("search backend unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::tool("search", format!("search backend returned {}", response.status())));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| Error::tool("search", format!("failed to parse search response: {e}")))?;

        let rendered = parsed
            .results
            .iter()
            .map(|r| format!("- {}\n  {}\n  {}", r.title, r.url, r.snippet))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(ToolOutput::success(truncate(&rendered, self.response_size_cap)))
    }
}

pub fn create_web_tools(client: Client, search: Option<SearchConfig>) -> Vec<Box<dyn Tool>> {
    let mut tools: Vec<Box<dyn Tool>> = vec![Box::new(FetchTool::new(client.clone()))];
    if let Some(config) = search {
        tools.push(Box::new(SearchTool::new(client, config)));
    }
    tools
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        let cleaned = clean_text("  Hello   world  \n\n\n\n  Test  ");
        assert!(cleaned.contains("Hello world"));
        assert!(!cleaned.contains("    "));
    }

    #[test]
    fn test_extract_text_skips_script_content() {
        let html = Html::parse_document("<html><body><p>Hello</p><script>evil()</script></body></html>");
        let text = extract_text(&html.root_element());
        assert!(text.contains("Hello"));
        assert!(!text.contains("evil"));
    }

    #[test]
    fn test_truncate_reports_total_length() {
        let out = truncate("abcdef", 3);
        assert!(out.starts_with("abc"));
        assert!(out.contains("total bytes"));
    }
}
