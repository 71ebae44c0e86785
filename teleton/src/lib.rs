//! # Teleton
//!
//! The runtime kernel of a personal AI agent: a chat bridge feeds a per-chat
//! scheduler, an LLM reasoning loop dispatches scope-filtered tools, and
//! everything durable lives in one embedded SQLite file (FTS5 + sqlite-vec).
//!
//! ## Main modules
//!
//! - [`store`]: the embedded SQL substrate — migrations, FTS companions,
//!   vector tables, embedding cache, typed row access.
//! - [`lifecycle`]: the `stopped → starting → running → stopping` supervisor
//!   state machine with synchronous transition listeners.
//! - [`scheduler`]: per-chat FIFO with debounce, at-most-one in-flight turn
//!   per chat, full concurrency across chats.
//! - [`runtime`]: the reasoning loop — hydration, tool-call iteration,
//!   masking, compaction, retries, apologies.
//! - [`tools`]: the registry ([`ToolRegistry`]), scope matrix and overlays,
//!   safe dispatch, and hybrid retrieval ([`ToolIndex`]).
//! - [`memory`]: knowledge ingestion and retrieval plus daily logs.
//! - [`cron`]: persisted interval jobs with missed-run replay.
//! - [`bridge`]: the chat-platform seam; [`InProcessBridge`] for dev/tests.
//! - [`llm`] / [`embedding`]: provider traits with OpenAI-backed and mock
//!   implementations.
//! - [`supervisor`]: wires all of the above into the lifecycle hooks.

pub mod bridge;
pub mod cron;
pub mod embedding;
pub mod hybrid;
pub mod lifecycle;
pub mod llm;
pub mod memory;
pub mod message;
pub mod paths;
pub mod runtime;
pub mod sanitize;
pub mod scheduler;
pub mod store;
pub mod supervisor;
pub mod tools;

pub use bridge::{Bridge, BridgeError, InProcessBridge, InboundEvent};
pub use cron::{CronCallback, CronError, CronJobSnapshot, CronManager, CronOptions};
pub use embedding::{CachedEmbedder, Embedder, MockEmbedder, OpenAIEmbedder};
pub use lifecycle::{Lifecycle, LifecycleError, LifecycleEvent, LifecycleState};
pub use llm::{ChatOpenAI, LlmClient, LlmError, LlmRequest, LlmResponse, LlmUsage, MockLlm, RetryPolicy};
pub use memory::{DailyLog, MemorySystem, ScoredChunk};
pub use message::{ChatMessage, Role, ToolCall};
pub use paths::{AgentDirs, PathError};
pub use runtime::{AgentRuntime, RunError, RuntimeConfig};
pub use scheduler::{SessionScheduler, TurnHandler, PENDING_HISTORY_MAX_PER_CHAT};
pub use store::{
    CronJobRow, GroupModuleLevel, KnowledgeChunk, KnowledgeSource, MessageRow, SessionRow, Store,
    StoreError, StoreHandle, TaskRow, TaskStatus, ToolConfigRow,
};
pub use supervisor::Supervisor;
pub use tools::{
    Caller, RankedTool, Tool, ToolCallContext, ToolCategory, ToolError, ToolIndex, ToolOutcome,
    ToolRegistry, ToolScope, ToolSpec,
};
