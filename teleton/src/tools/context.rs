//! Per-call context handed to tool executors.

use tokio_util::sync::CancellationToken;

use crate::store::StoreHandle;

/// Who is calling, from where, and with what store access. Built by the
/// registry for every dispatch; executors must not assume more authority
/// than what it carries.
#[derive(Clone)]
pub struct ToolCallContext {
    pub chat_id: i64,
    pub sender_id: String,
    pub is_group: bool,
    pub is_admin: bool,
    /// Read-write store access with ATTACH/DETACH blocked.
    pub store: StoreHandle,
    /// Cancelled on lifecycle stop; long-running executors should poll it.
    pub cancel: CancellationToken,
}

impl ToolCallContext {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            chat_id: 0,
            sender_id: String::new(),
            is_group: false,
            is_admin: false,
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn for_chat(mut self, chat_id: i64, sender_id: impl Into<String>) -> Self {
        self.chat_id = chat_id;
        self.sender_id = sender_id.into();
        self
    }

    pub fn in_group(mut self, is_group: bool) -> Self {
        self.is_group = is_group;
        self
    }

    pub fn as_admin(mut self, is_admin: bool) -> Self {
        self.is_admin = is_admin;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}
