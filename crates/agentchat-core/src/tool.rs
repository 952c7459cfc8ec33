//! Tool System
//!
//! Named callables the model can request via the action protocol. Each tool
//! carries an explicit descriptor (name, ordered parameters, description)
//! fixed at registration time; dispatch is a plain table lookup, never
//! dynamic loading.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::error::{AgentError, Result};

/// Immutable tool descriptor, derived once at registration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolSpec {
    /// Unique name within a registry
    pub name: String,

    /// Ordered parameter names
    pub params: Vec<String>,

    /// Human-readable description (rendered into the system prompt)
    pub description: String,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        params: impl IntoIterator<Item = impl Into<String>>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            params: params.into_iter().map(Into::into).collect(),
            description: description.into(),
        }
    }
}

/// Tool trait - implement to add new capabilities
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's descriptor
    fn spec(&self) -> ToolSpec;

    /// Execute with keyword-style arguments, returning the observation text.
    /// Errors are reported back to the loop; they must not panic.
    async fn invoke(&self, args: &Map<String, Value>) -> Result<String>;
}

/// What to do when a tool name is registered twice
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Last write wins, with a warning (the historical behavior)
    #[default]
    Permissive,
    /// Duplicate registration is a hard error
    Strict,
}

/// Registry mapping tool names to callables, preserving registration order
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
    policy: DuplicatePolicy,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_policy(DuplicatePolicy::default())
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            tools: HashMap::new(),
            order: Vec::new(),
            policy,
        }
    }

    /// Register a tool, returning its descriptor
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<ToolSpec> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool instance
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<ToolSpec> {
        let spec = tool.spec();
        if self.tools.contains_key(&spec.name) {
            match self.policy {
                DuplicatePolicy::Strict => {
                    return Err(AgentError::DuplicateTool(spec.name));
                }
                DuplicatePolicy::Permissive => {
                    tracing::warn!(tool = %spec.name, "overwriting registered tool");
                }
            }
        } else {
            self.order.push(spec.name.clone());
        }
        self.tools.insert(spec.name.clone(), tool);
        Ok(spec)
    }

    /// Resolve a tool by name
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Invoke a tool by name with keyword-style arguments
    pub async fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<String> {
        let tool = self
            .resolve(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;
        tool.invoke(args).await
    }

    /// All descriptors, in registration order
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.spec())
            .collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Render the "Available Tools" markdown block for the system prompt
    pub fn prompt_section(&self) -> String {
        let mut lines = vec!["## Available Tools:\n".to_string()];
        for spec in self.specs() {
            let mut block = format!("### {}\n", spec.name);
            block.push_str(&format!("**Parameters**: {}\n\n", spec.params.join(", ")));
            block.push_str(&format!("**Description**: {}\n", spec.description));
            lines.push(block);
        }
        if self.tools.is_empty() {
            lines.push("### No tools are available".to_string());
        }
        lines.join("\n")
    }
}

// ============================================================================
// Built-in Tools
// ============================================================================

/// Runs a code snippet in a subprocess and returns its captured output.
///
/// Languages: `bash` (default) and `python`. A non-zero exit status is an
/// invocation error carrying the process stderr.
pub struct CodeExecutor;

impl CodeExecutor {
    fn interpreter(language: &str) -> Result<(&'static str, &'static str)> {
        match language {
            "bash" | "sh" | "shell" => Ok(("bash", "-c")),
            "python" | "python3" => Ok(("python3", "-c")),
            other => Err(AgentError::ToolValidation(format!(
                "unsupported language: {other}"
            ))),
        }
    }
}

#[async_trait]
impl Tool for CodeExecutor {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "code_executor",
            ["language", "code"],
            "Execute a code block or shell command and return its captured output. \
             Supported languages: bash (default), python.",
        )
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<String> {
        let language = args
            .get("language")
            .and_then(Value::as_str)
            .unwrap_or("bash");
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::ToolValidation("missing required parameter: code".into()))?;

        let (program, flag) = Self::interpreter(language)?;
        tracing::debug!(%language, "executing code block");

        let output = Command::new(program).arg(flag).arg(code).output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(AgentError::ToolExecution(format!(
                "{program} exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        if stderr.is_empty() {
            Ok(stdout)
        } else {
            Ok(format!("{stdout}{stderr}"))
        }
    }
}
