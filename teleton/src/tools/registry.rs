//! Tool catalog and the safe dispatch path.
//!
//! The static registry is populated at load (and plugin hot-reload) and never
//! mutated by dispatch. Scope filtering overlays two dynamic layers at call
//! time: `tool_config` rows and per-chat `group_modules` gates.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::sanitize::sanitize_error;
use crate::store::{GroupModuleLevel, Store, StoreError};

use super::context::ToolCallContext;
use super::r#trait::{Tool, ToolError, ToolOutcome, ToolScope, ToolSpec};
use super::schema;

/// Cap on the serialised tool result fed back into the context.
pub const MAX_TOOL_RESULT_SIZE: usize = 50_000;
/// Appended when a result is cut at the cap.
pub const TRUNCATION_MARKER: &str = "\n…[truncated]";
/// Default executor deadline.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Who is asking. Visibility is a pure function of this plus the overlays.
#[derive(Clone, Debug)]
pub struct Caller {
    pub chat_id: i64,
    pub sender_id: String,
    pub is_group: bool,
    pub is_admin: bool,
}

impl Caller {
    pub fn dm(chat_id: i64, sender_id: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id: sender_id.into(),
            is_group: false,
            is_admin: false,
        }
    }

    pub fn group(chat_id: i64, sender_id: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id: sender_id.into(),
            is_group: true,
            is_admin: false,
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }
}

struct Registered {
    tool: Arc<dyn Tool>,
    spec: ToolSpec,
    plugin: Option<String>,
}

pub struct ToolRegistry {
    tools: DashMap<String, Registered>,
    store: Store,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(store: Store) -> Self {
        Self {
            tools: DashMap::new(),
            store,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Registers a tool. A name collision is rejected unless the incumbent
    /// belongs to the same module (hot reload replaces in place).
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<(), ToolError> {
        let spec = tool.spec();
        if let Some(existing) = self.tools.get(&spec.name) {
            if existing.spec.module != spec.module {
                return Err(ToolError::Collision(spec.name));
            }
        }
        debug!(tool = %spec.name, module = %spec.module, "registering tool");
        self.tools.insert(
            spec.name.clone(),
            Registered {
                tool,
                spec,
                plugin: None,
            },
        );
        Ok(())
    }

    /// Bulk-registers plugin tools under a namespace. Names are prefixed with
    /// `<namespace>_` unless already so, which keeps plugin names collision
    /// free and makes teardown a prefix sweep.
    pub fn register_plugin_tools(
        &self,
        namespace: &str,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Result<Vec<String>, ToolError> {
        let mut names = Vec::with_capacity(tools.len());
        for tool in tools {
            let mut spec = tool.spec();
            if !spec.name.starts_with(&format!("{}_", namespace)) {
                spec.name = format!("{}_{}", namespace, spec.name);
            }
            spec.module = namespace.to_string();
            if let Some(existing) = self.tools.get(&spec.name) {
                if existing.plugin.as_deref() != Some(namespace) {
                    return Err(ToolError::Collision(spec.name));
                }
            }
            names.push(spec.name.clone());
            self.tools.insert(
                spec.name.clone(),
                Registered {
                    tool,
                    spec,
                    plugin: Some(namespace.to_string()),
                },
            );
        }
        Ok(names)
    }

    /// Removes every tool the namespace registered. Returns how many.
    pub fn unregister_plugin(&self, namespace: &str) -> usize {
        let doomed: Vec<String> = self
            .tools
            .iter()
            .filter(|entry| entry.value().plugin.as_deref() == Some(namespace))
            .map(|entry| entry.key().clone())
            .collect();
        for name in &doomed {
            self.tools.remove(name);
        }
        doomed.len()
    }

    /// Every registered spec, unfiltered (for indexing and admin surfaces).
    pub fn all_specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .iter()
            .map(|entry| entry.value().spec.clone())
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The subset of tools this caller may see, after the dynamic overlays.
    pub async fn visible_tools(&self, caller: &Caller) -> Result<Vec<ToolSpec>, StoreError> {
        let overrides = self.store.tool_config_all().await?;
        let gates = self.store.group_modules_for_chat(caller.chat_id).await?;
        let mut specs = Vec::new();
        for entry in self.tools.iter() {
            let spec = &entry.value().spec;
            if self.admits(spec, caller, &overrides, &gates) {
                specs.push(spec.clone());
            }
        }
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specs)
    }

    fn admits(
        &self,
        spec: &ToolSpec,
        caller: &Caller,
        overrides: &std::collections::HashMap<String, crate::store::ToolConfigRow>,
        gates: &std::collections::HashMap<String, GroupModuleLevel>,
    ) -> bool {
        let mut scope = spec.scope;
        if let Some(row) = overrides.get(&spec.name) {
            if !row.enabled {
                return false;
            }
            if let Some(s) = row.scope.as_deref().and_then(ToolScope::parse) {
                scope = s;
            }
        }
        if !crate::store::RESERVED_MODULES.contains(&spec.module.as_str()) {
            match gates
                .get(&spec.module)
                .copied()
                .unwrap_or(GroupModuleLevel::Open)
            {
                GroupModuleLevel::Disabled => return false,
                GroupModuleLevel::Admin if !caller.is_admin => return false,
                _ => {}
            }
        }
        scope.admits(caller.is_group, caller.is_admin)
    }

    /// Dispatches one call. Failures of any kind (invisibility, bad params,
    /// executor error, timeout, oversize) come back as a non-fatal
    /// [`ToolOutcome`]; only storage failures while reading the overlays
    /// propagate as errors.
    pub async fn invoke(
        &self,
        name: &str,
        params: serde_json::Value,
        caller: &Caller,
        ctx: &ToolCallContext,
    ) -> Result<ToolOutcome, StoreError> {
        let (tool, spec) = match self.tools.get(name) {
            Some(entry) => (Arc::clone(&entry.value().tool), entry.value().spec.clone()),
            None => return Ok(ToolOutcome::failed(format!("unknown tool: {}", name))),
        };

        let overrides = self.store.tool_config_all().await?;
        let gates = self.store.group_modules_for_chat(caller.chat_id).await?;
        if !self.admits(&spec, caller, &overrides, &gates) {
            return Ok(ToolOutcome::failed(format!(
                "tool not available here: {}",
                name
            )));
        }

        if let Err(msg) = schema::validate(&params, &spec.parameters_schema) {
            return Ok(ToolOutcome::failed(format!("Invalid parameters: {}", msg)));
        }

        let call = tool.call(params, ctx);
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(output)) => {
                let mut output = output;
                if output.chars().count() > MAX_TOOL_RESULT_SIZE {
                    warn!(tool = name, len = output.len(), "tool result over cap, truncating");
                    output = output
                        .chars()
                        .take(MAX_TOOL_RESULT_SIZE - TRUNCATION_MARKER.chars().count())
                        .collect::<String>()
                        + TRUNCATION_MARKER;
                }
                ToolOutcome::ok(output)
            }
            Ok(Err(e)) => ToolOutcome::failed(sanitize_error(&e.to_string())),
            Err(_) => ToolOutcome::failed("timeout"),
        };
        Ok(outcome)
    }

    pub fn category_of(&self, name: &str) -> Option<super::r#trait::ToolCategory> {
        self.tools.get(name).map(|entry| entry.value().spec.category)
    }

    /// Distinct plugin namespaces currently loaded.
    pub fn plugin_namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .tools
            .iter()
            .filter_map(|entry| entry.value().plugin.clone())
            .collect();
        namespaces.sort();
        namespaces.dedup();
        namespaces
    }
}
