//! The tool abstraction: a named, schema-described capability the LLM can
//! invoke through the registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::context::ToolCallContext;

/// Who may invoke a tool in a given chat context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolScope {
    Always,
    DmOnly,
    GroupOnly,
    AdminOnly,
}

impl ToolScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolScope::Always => "always",
            ToolScope::DmOnly => "dm-only",
            ToolScope::GroupOnly => "group-only",
            ToolScope::AdminOnly => "admin-only",
        }
    }

    pub fn parse(s: &str) -> Option<ToolScope> {
        match s {
            "always" => Some(ToolScope::Always),
            "dm-only" => Some(ToolScope::DmOnly),
            "group-only" => Some(ToolScope::GroupOnly),
            "admin-only" => Some(ToolScope::AdminOnly),
            _ => None,
        }
    }

    /// The scope matrix: admins pass everything; otherwise DM/group position
    /// decides.
    pub fn admits(&self, is_group: bool, is_admin: bool) -> bool {
        if is_admin {
            return true;
        }
        match self {
            ToolScope::Always => true,
            ToolScope::DmOnly => !is_group,
            ToolScope::GroupOnly => is_group,
            ToolScope::AdminOnly => false,
        }
    }
}

/// Whether a tool's results carry data the model must keep seeing, or are
/// one-shot actions whose old results can be masked out of the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    DataBearing,
    Action,
}

/// Static description of a tool: identity, LLM-facing schema, placement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Globally unique, stable name.
    pub name: String,
    pub description: String,
    /// JSON schema for the arguments object.
    pub parameters_schema: serde_json::Value,
    pub category: ToolCategory,
    /// Owning namespace; the unit of per-group permission.
    pub module: String,
    pub scope: ToolScope,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema: serde_json::json!({"type": "object", "properties": {}}),
            category: ToolCategory::Action,
            module: "core".into(),
            scope: ToolScope::Always,
        }
    }

    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.parameters_schema = schema;
        self
    }

    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    pub fn with_scope(mut self, scope: ToolScope) -> Self {
        self.scope = scope;
        self
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    Unknown(String),
    #[error("tool name collision: {0}")]
    Collision(String),
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error("timeout")]
    Timeout,
    #[error("not visible in this chat: {0}")]
    NotVisible(String),
}

/// Normalised invocation result: failures are values, never panics.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    /// Serialised result text (possibly truncated with a marker).
    pub output: String,
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}

/// One executable tool. Registered with the registry alongside its spec.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;

    /// Executes with validated arguments. Long-running work must watch
    /// `ctx.cancel`; the registry additionally enforces a deadline.
    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolCallContext,
    ) -> Result<String, ToolError>;
}
