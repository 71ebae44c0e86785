//! Transcript message types: one chat turn entry (user / assistant / tool).

use serde::{Deserialize, Serialize};

/// Role of a transcript entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }

    /// Maps a stored role string back; unknown strings fall back to `user`.
    pub fn from_str_lossy(s: &str) -> Role {
        match s {
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::User,
        }
    }
}

/// One tool invocation requested by the LLM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, when present. Tool result entries refer to it.
    pub id: Option<String>,
    pub name: String,
    /// Raw JSON arguments string as produced by the model.
    pub arguments: String,
}

/// One persisted transcript entry, ordered by `timestamp` within a chat.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Store rowid; 0 until persisted.
    pub id: i64,
    pub chat_id: i64,
    pub sender: String,
    pub role: Role,
    pub text: String,
    /// Tool calls attached to an assistant entry.
    pub tool_calls: Vec<ToolCall>,
    /// For `tool` entries: the call id this result answers.
    pub tool_result_for: Option<String>,
    /// Unix millis.
    pub timestamp: i64,
}

impl ChatMessage {
    pub fn user(chat_id: i64, sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(chat_id, sender, Role::User, text)
    }

    pub fn assistant(chat_id: i64, text: impl Into<String>) -> Self {
        Self::new(chat_id, "assistant", Role::Assistant, text)
    }

    pub fn tool_result(chat_id: i64, call_id: Option<String>, text: impl Into<String>) -> Self {
        let mut m = Self::new(chat_id, "tool", Role::Tool, text);
        m.tool_result_for = call_id;
        m
    }

    fn new(chat_id: i64, sender: impl Into<String>, role: Role, text: impl Into<String>) -> Self {
        Self {
            id: 0,
            chat_id,
            sender: sender.into(),
            role,
            text: text.into(),
            tool_calls: Vec::new(),
            tool_result_for: None,
            timestamp: crate::store::now_millis(),
        }
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::User, Role::Assistant, Role::Tool] {
            assert_eq!(Role::from_str_lossy(role.as_str()), role);
        }
    }

    #[test]
    fn unknown_role_falls_back_to_user() {
        assert_eq!(Role::from_str_lossy("system"), Role::User);
    }

    #[test]
    fn tool_result_carries_call_id() {
        let m = ChatMessage::tool_result(7, Some("call_1".into()), "ok");
        assert_eq!(m.role, Role::Tool);
        assert_eq!(m.tool_result_for.as_deref(), Some("call_1"));
        assert_eq!(m.chat_id, 7);
    }
}
