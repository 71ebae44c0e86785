pub mod builtin;
mod context;
pub mod index;
mod registry;
mod schema;
mod r#trait;

pub use builtin::{
    register_builtin_tools, GetRecentMessagesTool, RememberTool, SearchChatHistoryTool,
    SearchMemoriesTool, TaskCreateTool, TaskListTool, WebFetchTool, TOOL_GET_RECENT_MESSAGES,
    TOOL_REMEMBER, TOOL_SEARCH_CHAT_HISTORY, TOOL_SEARCH_MEMORIES, TOOL_TASK_CREATE,
    TOOL_TASK_LIST, TOOL_WEB_FETCH,
};
pub use context::ToolCallContext;
pub use index::{RankedTool, ToolIndex, DEFAULT_TOP_K, MIN_SCORE};
pub use registry::{
    Caller, ToolRegistry, DEFAULT_TOOL_TIMEOUT, MAX_TOOL_RESULT_SIZE, TRUNCATION_MARKER,
};
pub use r#trait::{Tool, ToolCategory, ToolError, ToolOutcome, ToolScope, ToolSpec};
