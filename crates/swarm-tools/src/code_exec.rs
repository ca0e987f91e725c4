//! CodeExecution-class tools (§4.4): `execute_python` and `execute_shell`.
//!
//! Each invocation runs in a freshly created, randomized temp directory
//! that is removed on every exit path (success, failure, or timeout) and
//! is set as the child process's working directory. The command itself is
//! always argv-form: arguments come from the tool call's JSON array, never
//! from shell string concatenation, so there is no shell-metacharacter
//! injection surface to defend against.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use swarm_core::{
    Error, PropertySchema, Tool, ToolClass, ToolContext, ToolDefinition, ToolOutput,
    ToolParameters, ToolPolicy,
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_OUTPUT_CAP: usize = 200_000;

fn truncate(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        text.to_string()
    } else {
        let cut = text.char_indices().take_while(|(i, _)| *i <= cap).last().map(|(i, _)| i).unwrap_or(0);
        format!("{}\n... (truncated, {} total bytes)", &text[..cut], text.len())
    }
}

struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create() -> Result<Self, Error> {
        let path = std::env::temp_dir().join(format!("swarm-exec-{}", random_suffix()));
        std::fs::create_dir_all(&path).map_err(|e| Error::tool("code_execution", format!("failed to create scratch dir: {e}")))?;
        Ok(Self(path))
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn random_suffix() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    format!("{:x}-{:x}", std::process::id(), nanos)
}

async fn run_argv(
    program: &str,
    args: &[String],
    scratch: &ScratchDir,
    timeout: Duration,
    output_cap: usize,
) -> Result<ToolOutput, Error> {
    let mut command = Command::new(program);
    command.args(args).current_dir(&scratch.0).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let child = command
        .spawn()
        .map_err(|e| Error::tool("code_execution", format!("failed to spawn '{program}': {e}")))?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(|e| Error::tool("code_execution", format!("failed to wait on '{program}': {e}")))?,
        Err(_) => {
            return Ok(ToolOutput::error(format!(
                "'{program}' timed out after {}s",
                timeout.as_secs()
            )))
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let mut rendered = truncate(&stdout, output_cap);
    if !stderr.trim().is_empty() {
        if !rendered.is_empty() {
            rendered.push_str("\n\n");
        }
        rendered.push_str("[stderr]\n");
        rendered.push_str(&truncate(&stderr, output_cap));
    }
    if rendered.is_empty() {
        rendered = "(no output)".to_string();
    }

    if output.status.success() {
        Ok(ToolOutput::success(rendered))
    } else {
        Ok(ToolOutput::error(format!(
            "{rendered}\n\n[exit code {}]",
            output.status.code().unwrap_or(-1)
        )))
    }
}

fn check_allowlist(program: &str, allowlist: &[String]) -> Result<(), Error> {
    if allowlist.iter().any(|allowed| allowed == program) {
        Ok(())
    } else {
        Err(Error::policy_denied(format!("'{program}' is not in the command allowlist")))
    }
}

// =============================================================================
// execute_python
// =============================================================================

pub struct ExecutePythonTool {
    interpreter: String,
    output_cap: usize,
}

impl ExecutePythonTool {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }
}

#[derive(Deserialize)]
struct ExecutePythonArgs {
    code: String,
}

#[async_trait]
impl Tool for ExecutePythonTool {
    fn name(&self) -> &str {
        "execute_python"
    }

    fn description(&self) -> &str {
        "Run a Python script in an isolated scratch directory and return its stdout/stderr."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new().add_property("code", PropertySchema::string("Python source to execute"), true),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::CodeExecution, DEFAULT_TIMEOUT)
            .with_command_allowlist(vec![self.interpreter.clone()])
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: ExecutePythonArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("execute_python", format!("invalid arguments: {e}")))?;

        check_allowlist(&self.interpreter, &self.policy().command_allowlist)?;

        let scratch = ScratchDir::create()?;
        let script_path = scratch.0.join("script.py");
        std::fs::write(&script_path, &args.code)
            .map_err(|e| Error::tool("execute_python", format!("failed to write script: {e}")))?;

        let timeout = ctx.effective_timeout(self.policy().timeout);
        run_argv(
            &self.interpreter,
            &[script_path.to_string_lossy().into_owned()],
            &scratch,
            timeout,
            self.output_cap,
        )
        .await
    }
}

// =============================================================================
// execute_shell
// =============================================================================

/// Runs an allowlisted program with argv-form arguments — never a shell
/// string. The "shell" in the tool's name names the tool class from the
/// caller's perspective; there is no `/bin/sh -c` invocation anywhere.
pub struct ExecuteShellTool {
    allowlist: Vec<String>,
    output_cap: usize,
}

impl ExecuteShellTool {
    pub fn new(allowlist: Vec<String>) -> Self {
        Self {
            allowlist,
            output_cap: DEFAULT_OUTPUT_CAP,
        }
    }
}

#[derive(Deserialize)]
struct ExecuteShellArgs {
    program: String,
    #[serde(default)]
    args: Vec<String>,
}

#[async_trait]
impl Tool for ExecuteShellTool {
    fn name(&self) -> &str {
        "execute_shell"
    }

    fn description(&self) -> &str {
        "Run an allowlisted program with explicit argv arguments in an isolated scratch directory."
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self.name(), self.description()).with_parameters(
            ToolParameters::new()
                .add_property("program", PropertySchema::string("Allowlisted program name"), true)
                .add_property(
                    "args",
                    PropertySchema::array("Arguments, one array element per argv entry", PropertySchema::string("argv entry")),
                    false,
                ),
        )
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy::new(ToolClass::CodeExecution, DEFAULT_TIMEOUT).with_command_allowlist(self.allowlist.clone())
    }

    async fn execute(&self, arguments: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput, Error> {
        let args: ExecuteShellArgs = serde_json::from_value(arguments)
            .map_err(|e| Error::tool("execute_shell", format!("invalid arguments: {e}")))?;

        check_allowlist(&args.program, &self.allowlist)?;

        let scratch = ScratchDir::create()?;
        let timeout = ctx.effective_timeout(self.policy().timeout);
        run_argv(&args.program, &args.args, &scratch, timeout, self.output_cap).await
    }
}

pub fn create_code_exec_tools(python_interpreter: impl Into<String>, shell_allowlist: Vec<String>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(ExecutePythonTool::new(python_interpreter)),
        Box::new(ExecuteShellTool::new(shell_allowlist)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("agent-1", "task-1")
    }

    #[tokio::test]
    async fn test_execute_shell_rejects_non_allowlisted_program() {
        let tool = ExecuteShellTool::new(vec!["echo".to_string()]);
        let err = tool
            .execute(serde_json::json!({"program": "rm", "args": ["-rf", "/"]}), &ctx())
            .await
            .unwrap_err();
        assert_eq!(err.kind().as_str(), "policy_denied");
    }

    #[tokio::test]
    async fn test_execute_shell_runs_allowlisted_program() {
        let tool = ExecuteShellTool::new(vec!["echo".to_string()]);
        let result = tool
            .execute(serde_json::json!({"program": "echo", "args": ["hello"]}), &ctx())
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("hello"));
    }

    #[test]
    fn test_truncate_reports_total_length() {
        let out = truncate("abcdef", 3);
        assert!(out.starts_with("abc"));
        assert!(out.contains("total bytes"));
    }
}
