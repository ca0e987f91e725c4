use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ToolParameters::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: ToolParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: std::collections::HashMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
    #[serde(rename = "additionalProperties", default)]
    pub additional_properties: bool,
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: std::collections::HashMap::new(),
            required: Vec::new(),
            additional_properties: false,
        }
    }
}

impl ToolParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_property(
        mut self,
        name: impl Into<String>,
        schema: PropertySchema,
        required: bool,
    ) -> Self {
        let name = name.into();
        self.properties.insert(name.clone(), schema);
        if required {
            self.required.push(name);
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
}

impl PropertySchema {
    pub fn string(description: impl Into<String>) -> Self {
        Self {
            schema_type: "string".to_string(),
            description: Some(description.into()),
            enum_values: None,
            default: None,
            items: None,
        }
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self {
            schema_type: "integer".to_string(),
            description: Some(description.into()),
            enum_values: None,
            default: None,
            items: None,
        }
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self {
            schema_type: "number".to_string(),
            description: Some(description.into()),
            enum_values: None,
            default: None,
            items: None,
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self {
            schema_type: "boolean".to_string(),
            description: Some(description.into()),
            enum_values: None,
            default: None,
            items: None,
        }
    }

    pub fn array(description: impl Into<String>, items: PropertySchema) -> Self {
        Self {
            schema_type: "array".to_string(),
            description: Some(description.into()),
            enum_values: None,
            default: None,
            items: Some(Box::new(items)),
        }
    }

    pub fn enum_string(description: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            schema_type: "string".to_string(),
            description: Some(description.into()),
            enum_values: Some(values),
            default: None,
            items: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// Tool classes named in §4.4's policy table. Each class carries its own
/// default policy; concrete tools may be constructed with a tightened one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolClass {
    FilesystemRead,
    FilesystemWrite,
    Database,
    CodeExecution,
    Web,
    Knowledge,
}

/// Per-tool policy caps. Fields not relevant to a tool's class are left at
/// their default and ignored by that class's enforcement path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolPolicy {
    pub class: ToolClass,
    /// Wall-clock cap for one invocation (§4.4, §4.5 cancellation).
    pub timeout: Duration,
    /// Filesystem read/write: max bytes per read, or write quota.
    #[serde(default)]
    pub byte_cap: Option<usize>,
    /// Web: response size cap in bytes.
    #[serde(default)]
    pub response_size_cap: Option<usize>,
    /// Database: max rows returned per call.
    #[serde(default)]
    pub row_cap: Option<usize>,
    /// Code execution: allowlisted program names (argv[0] form).
    #[serde(default)]
    pub command_allowlist: Vec<String>,
}

impl ToolPolicy {
    pub fn new(class: ToolClass, timeout: Duration) -> Self {
        Self {
            class,
            timeout,
            byte_cap: None,
            response_size_cap: None,
            row_cap: None,
            command_allowlist: Vec::new(),
        }
    }

    pub fn with_byte_cap(mut self, cap: usize) -> Self {
        self.byte_cap = Some(cap);
        self
    }

    pub fn with_response_size_cap(mut self, cap: usize) -> Self {
        self.response_size_cap = Some(cap);
        self
    }

    pub fn with_row_cap(mut self, cap: usize) -> Self {
        self.row_cap = Some(cap);
        self
    }

    pub fn with_command_allowlist(mut self, commands: Vec<String>) -> Self {
        self.command_allowlist = commands;
        self
    }

    /// One-line human summary surfaced by `ToolRegistry::list`.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{:?} timeout={:?}", self.class, self.timeout)];
        if let Some(c) = self.byte_cap {
            parts.push(format!("byte_cap={c}"));
        }
        if let Some(c) = self.response_size_cap {
            parts.push(format!("response_size_cap={c}"));
        }
        if let Some(c) = self.row_cap {
            parts.push(format!("row_cap={c}"));
        }
        if !self.command_allowlist.is_empty() {
            parts.push(format!("commands={:?}", self.command_allowlist));
        }
        parts.join(" ")
    }
}

/// Carried into every tool invocation (§4.4 `invoke`): identifies the
/// calling agent and task, and bounds how long the handler may run by the
/// sooner of its own timeout and the task's remaining deadline.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub agent_id: String,
    pub task_id: String,
    pub task_deadline: Option<Instant>,
}

impl ToolContext {
    pub fn new(agent_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            task_deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.task_deadline = Some(deadline);
        self
    }

    /// The effective timeout for one invocation: the tool's own policy
    /// timeout, clamped to whatever remains of the task deadline.
    pub fn effective_timeout(&self, policy_timeout: Duration) -> Duration {
        match self.task_deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                remaining.min(policy_timeout)
            }
            None => policy_timeout,
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn definition(&self) -> ToolDefinition;

    fn policy(&self) -> ToolPolicy;

    /// Schema/registration version. Re-registering under the same name with
    /// a matching version is a no-op; a version bump replaces the handler.
    fn version(&self) -> u32 {
        1
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutput, Error>;
}

struct RegisteredTool {
    tool: Box<dyn Tool>,
    version: u32,
}

/// The Tool Host's registry (§4.4). Read-mostly: registration is
/// infrequent and serialized by `&mut self`; lookups and `invoke` take
/// `&self` so many agents can call concurrently once the registry is
/// behind a shared reference.
pub struct ToolRegistry {
    tools: std::collections::HashMap<String, RegisteredTool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: std::collections::HashMap::new(),
        }
    }

    /// Idempotent: registering the same name at the same version is a
    /// no-op; a different version replaces the previous handler.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        let name = tool.name().to_string();
        let version = tool.version();
        if let Some(existing) = self.tools.get(&name) {
            if existing.version == version {
                return;
            }
        }
        self.tools.insert(name, RegisteredTool { tool, version });
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|r| r.tool.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|r| r.tool.definition()).collect()
    }

    /// `list()` per §4.4: name, schema, and a human policy summary.
    pub fn list(&self) -> Vec<(ToolDefinition, String)> {
        self.tools
            .values()
            .map(|r| (r.tool.definition(), r.tool.policy().summary()))
            .collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// `invoke(call)` per §4.4. Looks up the tool (`unknown_tool` if
    /// absent), runs the handler under the effective timeout, and
    /// translates handler panics-as-errors and elapsed timeouts into the
    /// stable error kinds the Agent folds back into its transcript.
    /// Schema validation and allowlist/policy enforcement specific to a
    /// tool class are the handler's responsibility (it receives the raw
    /// arguments and context); this method enforces only what is generic
    /// across all classes: existence and timeout.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, Error> {
        let registered = self
            .tools
            .get(name)
            .ok_or_else(|| Error::unknown_tool(name))?;
        let timeout = ctx.effective_timeout(registered.tool.policy().timeout);
        let start = Instant::now();
        match tokio::time::timeout(timeout, registered.tool.execute(arguments, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(Error::tool_timeout(name, start.elapsed().as_millis() as u64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name(), self.description())
        }
        fn policy(&self) -> ToolPolicy {
            ToolPolicy::new(ToolClass::Web, Duration::from_secs(5))
        }
        async fn execute(&self, arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
            Ok(ToolOutput::success(arguments.to_string()))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never returns within its policy timeout"
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition::new(self.name(), self.description())
        }
        fn policy(&self) -> ToolPolicy {
            ToolPolicy::new(ToolClass::CodeExecution, Duration::from_millis(10))
        }
        async fn execute(&self, _arguments: Value, _ctx: &ToolContext) -> Result<ToolOutput, Error> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::success("done"))
        }
    }

    #[test]
    fn test_tool_definition() {
        let def = ToolDefinition::new("read_file", "Read contents of a file")
            .with_parameters(
                ToolParameters::new()
                    .add_property("path", PropertySchema::string("Path to the file"), true),
            );

        assert_eq!(def.name, "read_file");
        assert!(def.parameters.required.contains(&"path".to_string()));
    }

    #[test]
    fn test_property_schema() {
        let schema = PropertySchema::string("A test string");
        assert_eq!(schema.schema_type, "string");

        let enum_schema = PropertySchema::enum_string(
            "A choice",
            vec!["a".to_string(), "b".to_string()],
        );
        assert_eq!(enum_schema.enum_values.unwrap().len(), 2);
    }

    #[test]
    fn test_tool_output() {
        let success = ToolOutput::success("done");
        assert!(!success.is_error);

        let error = ToolOutput::error("failed");
        assert!(error.is_error);
    }

    #[test]
    fn test_register_idempotent_same_version() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        registry.register(Box::new(EchoTool));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let registry = ToolRegistry::new();
        let ctx = ToolContext::new("agent-1", "task-1");
        let err = registry
            .invoke("does_not_exist", serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "unknown_tool");
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(EchoTool));
        let ctx = ToolContext::new("agent-1", "task-1");
        let out = registry
            .invoke("echo", serde_json::json!({"x": 1}), &ctx)
            .await
            .unwrap();
        assert!(!out.is_error);
    }

    #[tokio::test]
    async fn test_invoke_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SlowTool));
        let ctx = ToolContext::new("agent-1", "task-1");
        let err = registry
            .invoke("slow", serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "tool_timeout");
    }
}
