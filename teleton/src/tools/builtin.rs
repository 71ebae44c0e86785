//! Built-in tools: long-term memory and the durable task queue.
//!
//! These ship with the agent (modules `memory` and `tasks`) and exercise the
//! full dispatch path; everything heavier (blockchain, web, platform tools)
//! arrives through plugins.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::memory::MemorySystem;
use crate::store::{KnowledgeSource, Store, TaskStatus};

use super::context::ToolCallContext;
use super::r#trait::{Tool, ToolCategory, ToolError, ToolSpec};

pub const TOOL_REMEMBER: &str = "remember";
pub const TOOL_SEARCH_MEMORIES: &str = "search_memories";
pub const TOOL_GET_RECENT_MESSAGES: &str = "get_recent_messages";
pub const TOOL_TASK_CREATE: &str = "task_create";
pub const TOOL_TASK_LIST: &str = "task_list";
pub const TOOL_WEB_FETCH: &str = "web_fetch";
pub const TOOL_SEARCH_CHAT_HISTORY: &str = "search_chat_history";

/// Cap on fetched page text handed back to the model.
const WEB_FETCH_MAX_CHARS: usize = 10_000;

fn arg_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParams(format!("missing '{}'", key)))
}

/// Stores a fact in long-term memory.
pub struct RememberTool {
    memory: Arc<MemorySystem>,
}

impl RememberTool {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for RememberTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_REMEMBER,
            "Store a fact in long-term memory so it can be recalled in later conversations.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "text": {"type": "string", "description": "The fact to remember"}
            },
            "required": ["text"]
        }))
        .with_module("memory")
        .with_category(ToolCategory::Action)
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: &ToolCallContext,
    ) -> Result<String, ToolError> {
        let text = arg_str(&args, "text")?;
        let inserted = self
            .memory
            .ingest(KnowledgeSource::Learned, None, text)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(if inserted > 0 {
            "Remembered.".to_string()
        } else {
            "Already known.".to_string()
        })
    }
}

/// Hybrid search over stored memories.
pub struct SearchMemoriesTool {
    memory: Arc<MemorySystem>,
}

impl SearchMemoriesTool {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for SearchMemoriesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_SEARCH_MEMORIES,
            "Search long-term memory for facts relevant to a query.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["query"]
        }))
        .with_module("memory")
        .with_category(ToolCategory::DataBearing)
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: &ToolCallContext,
    ) -> Result<String, ToolError> {
        let query = arg_str(&args, "query")?;
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        let hits = self
            .memory
            .retrieve(query, limit.clamp(1, 20))
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if hits.is_empty() {
            return Ok("No matching memories.".to_string());
        }
        let lines: Vec<String> = hits
            .iter()
            .map(|h| format!("- ({:.2}) {}", h.score, h.chunk.text.trim()))
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Returns the tail of the current chat's transcript.
pub struct GetRecentMessagesTool {
    store: Store,
}

impl GetRecentMessagesTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetRecentMessagesTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_GET_RECENT_MESSAGES,
            "Read the most recent messages in this chat's transcript.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "limit": {"type": "integer"}
            }
        }))
        .with_module("core")
        .with_category(ToolCategory::DataBearing)
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolCallContext,
    ) -> Result<String, ToolError> {
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
        let messages = self
            .store
            .recent_messages(ctx.chat_id, limit.clamp(1, 50))
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let lines: Vec<String> = messages
            .iter()
            .map(|m| format!("{} ({}): {}", m.sender, m.role.as_str(), m.text))
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Creates a durable task.
pub struct TaskCreateTool {
    store: Store,
}

impl TaskCreateTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TaskCreateTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_TASK_CREATE,
            "Create a durable task the agent should work on later.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "description": {"type": "string"},
                "priority": {"type": "integer"}
            },
            "required": ["description"]
        }))
        .with_module("tasks")
        .with_category(ToolCategory::Action)
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolCallContext,
    ) -> Result<String, ToolError> {
        let description = arg_str(&args, "description")?;
        let priority = args.get("priority").and_then(|v| v.as_i64()).unwrap_or(0);
        let task = self
            .store
            .create_task(
                description.to_string(),
                priority,
                ctx.sender_id.clone(),
                None,
                None,
            )
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        Ok(format!("Created task {}", task.id))
    }
}

/// Lists open tasks, ready ones first.
pub struct TaskListTool {
    store: Store,
}

impl TaskListTool {
    pub fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TaskListTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(TOOL_TASK_LIST, "List pending tasks, ready ones first.")
            .with_schema(json!({"type": "object", "properties": {}}))
            .with_module("tasks")
            .with_category(ToolCategory::DataBearing)
    }

    async fn call(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolCallContext,
    ) -> Result<String, ToolError> {
        let tasks = self
            .store
            .list_tasks(Some(TaskStatus::Pending))
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if tasks.is_empty() {
            return Ok("No pending tasks.".to_string());
        }
        let lines: Vec<String> = tasks
            .iter()
            .map(|t| format!("- [{}] (p{}) {}", t.id, t.priority, t.description))
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Hybrid search over this chat's own transcript.
pub struct SearchChatHistoryTool {
    memory: Arc<MemorySystem>,
}

impl SearchChatHistoryTool {
    pub fn new(memory: Arc<MemorySystem>) -> Self {
        Self { memory }
    }
}

#[async_trait]
impl Tool for SearchChatHistoryTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_SEARCH_CHAT_HISTORY,
            "Search earlier messages in this chat for something that was said before.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["query"]
        }))
        .with_module("core")
        .with_category(ToolCategory::DataBearing)
    }

    async fn call(
        &self,
        args: serde_json::Value,
        ctx: &ToolCallContext,
    ) -> Result<String, ToolError> {
        let query = arg_str(&args, "query")?;
        let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
        let hits = self
            .memory
            .search_transcript(ctx.chat_id, query, limit.clamp(1, 20))
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        if hits.is_empty() {
            return Ok("Nothing matching in this chat's history.".to_string());
        }
        let lines: Vec<String> = hits
            .iter()
            .map(|m| format!("{} ({}): {}", m.sender, m.role.as_str(), m.text))
            .collect();
        Ok(lines.join("\n"))
    }
}

/// Fetches a web page as text.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(TOOL_WEB_FETCH, "Fetch the contents of a web page as text.")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "url": {"type": "string", "description": "http(s) URL to fetch"}
                },
                "required": ["url"]
            }))
            .with_module("web")
            .with_category(ToolCategory::DataBearing)
    }

    async fn call(
        &self,
        args: serde_json::Value,
        _ctx: &ToolCallContext,
    ) -> Result<String, ToolError> {
        let url = arg_str(&args, "url")?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ToolError::InvalidParams("url must be http(s)".into()));
        }
        let response = self
            .client
            .get(url)
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("fetch failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Execution(format!("HTTP {}", status)));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::Execution(format!("read failed: {}", e)))?;
        Ok(body.chars().take(WEB_FETCH_MAX_CHARS).collect())
    }
}

/// Registers every built-in tool on the registry.
pub fn register_builtin_tools(
    registry: &super::registry::ToolRegistry,
    store: &Store,
    memory: Arc<MemorySystem>,
) -> Result<(), ToolError> {
    registry.register(Arc::new(RememberTool::new(Arc::clone(&memory))))?;
    registry.register(Arc::new(SearchMemoriesTool::new(Arc::clone(&memory))))?;
    registry.register(Arc::new(SearchChatHistoryTool::new(memory)))?;
    registry.register(Arc::new(GetRecentMessagesTool::new(store.clone())))?;
    registry.register(Arc::new(TaskCreateTool::new(store.clone())))?;
    registry.register(Arc::new(TaskListTool::new(store.clone())))?;
    registry.register(Arc::new(WebFetchTool::new()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::registry::{Caller, ToolRegistry};

    async fn setup() -> (ToolRegistry, Store) {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store.ensure_vector_tables(8).unwrap();
        let memory = Arc::new(MemorySystem::new(
            store.clone(),
            None,
            std::env::temp_dir().join("teleton-builtin-test"),
        ));
        let registry = ToolRegistry::new(store.clone());
        register_builtin_tools(&registry, &store, memory).unwrap();
        (registry, store)
    }

    #[tokio::test]
    async fn remember_then_search_round_trip() {
        let (reg, store) = setup().await;
        let caller = Caller::dm(1, "owner");
        let ctx = ToolCallContext::new(store.executor_handle()).for_chat(1, "owner");

        let out = reg
            .invoke(
                TOOL_REMEMBER,
                json!({"text": "the cold wallet lives in the safe"}),
                &caller,
                &ctx,
            )
            .await
            .unwrap();
        assert!(out.success, "{:?}", out.error);

        let found = reg
            .invoke(
                TOOL_SEARCH_MEMORIES,
                json!({"query": "cold wallet"}),
                &caller,
                &ctx,
            )
            .await
            .unwrap();
        assert!(found.success);
        assert!(found.output.contains("cold wallet"));
    }

    #[tokio::test]
    async fn task_create_and_list() {
        let (reg, store) = setup().await;
        let caller = Caller::dm(1, "owner");
        let ctx = ToolCallContext::new(store.executor_handle()).for_chat(1, "owner");

        let created = reg
            .invoke(
                TOOL_TASK_CREATE,
                json!({"description": "rebalance portfolio", "priority": 3}),
                &caller,
                &ctx,
            )
            .await
            .unwrap();
        assert!(created.success);

        let listed = reg
            .invoke(TOOL_TASK_LIST, json!({}), &caller, &ctx)
            .await
            .unwrap();
        assert!(listed.output.contains("rebalance portfolio"));
    }
}
