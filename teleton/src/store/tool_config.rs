//! Runtime tool overrides (`tool_config`) and per-group module gating
//! (`group_modules`). Both overlays are read at dispatch time; the static
//! registry is never mutated after load.

use std::collections::HashMap;

use rusqlite::params;

use super::{now_millis, Store, StoreError};

/// Dynamic override for a single tool.
#[derive(Clone, Debug)]
pub struct ToolConfigRow {
    pub tool_name: String,
    pub enabled: bool,
    /// Overrides the tool's static scope when set.
    pub scope: Option<String>,
    pub updated_at: i64,
    pub updated_by: String,
}

/// Per-chat gate for a module's tools.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupModuleLevel {
    Open,
    Admin,
    Disabled,
}

impl GroupModuleLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupModuleLevel::Open => "open",
            GroupModuleLevel::Admin => "admin",
            GroupModuleLevel::Disabled => "disabled",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "admin" => GroupModuleLevel::Admin,
            "disabled" => GroupModuleLevel::Disabled,
            _ => GroupModuleLevel::Open,
        }
    }
}

/// Module names that are always `open` and cannot be overridden.
pub const RESERVED_MODULES: [&str; 2] = ["core", "memory"];

impl Store {
    pub async fn tool_config_all(&self) -> Result<HashMap<String, ToolConfigRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT tool_name, enabled, scope, updated_at, updated_by FROM tool_config",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ToolConfigRow {
                    tool_name: row.get(0)?,
                    enabled: row.get::<_, i64>(1)? != 0,
                    scope: row.get(2)?,
                    updated_at: row.get(3)?,
                    updated_by: row.get(4)?,
                })
            })?;
            let mut map = HashMap::new();
            for row in rows {
                let row = row?;
                map.insert(row.tool_name.clone(), row);
            }
            Ok(map)
        })
        .await
    }

    pub async fn tool_config_set(
        &self,
        tool_name: &str,
        enabled: bool,
        scope: Option<String>,
        updated_by: &str,
    ) -> Result<(), StoreError> {
        let tool_name = tool_name.to_string();
        let updated_by = updated_by.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "INSERT INTO tool_config (tool_name, enabled, scope, updated_at, updated_by)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(tool_name) DO UPDATE SET
                     enabled = excluded.enabled, scope = excluded.scope,
                     updated_at = excluded.updated_at, updated_by = excluded.updated_by",
            )?
            .execute(params![
                tool_name,
                enabled as i64,
                scope,
                now_millis(),
                updated_by
            ])?;
            Ok(())
        })
        .await
    }

    /// Effective level for `(chat, module)`; absence means `open`, reserved
    /// modules are always `open`.
    pub async fn group_module_level(
        &self,
        chat_id: i64,
        module: &str,
    ) -> Result<GroupModuleLevel, StoreError> {
        if RESERVED_MODULES.contains(&module) {
            return Ok(GroupModuleLevel::Open);
        }
        let module = module.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT level FROM group_modules WHERE chat_id = ?1 AND module = ?2",
            )?;
            let mut rows = stmt.query(params![chat_id, module])?;
            match rows.next()? {
                Some(row) => {
                    let level: String = row.get(0)?;
                    Ok(GroupModuleLevel::from_str_lossy(&level))
                }
                None => Ok(GroupModuleLevel::Open),
            }
        })
        .await
    }

    /// All gates for a chat, for one-query dispatch filtering.
    pub async fn group_modules_for_chat(
        &self,
        chat_id: i64,
    ) -> Result<HashMap<String, GroupModuleLevel>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare_cached("SELECT module, level FROM group_modules WHERE chat_id = ?1")?;
            let rows = stmt.query_map(params![chat_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            let mut map = HashMap::new();
            for row in rows {
                let (module, level) = row?;
                map.insert(module, GroupModuleLevel::from_str_lossy(&level));
            }
            Ok(map)
        })
        .await
    }

    /// Sets the gate; reserved modules are immutable.
    pub async fn set_group_module_level(
        &self,
        chat_id: i64,
        module: &str,
        level: GroupModuleLevel,
    ) -> Result<(), StoreError> {
        if RESERVED_MODULES.contains(&module) {
            return Err(StoreError::Storage(format!(
                "module '{}' is reserved and always open",
                module
            )));
        }
        let module = module.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "INSERT INTO group_modules (chat_id, module, level, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(chat_id, module) DO UPDATE SET
                     level = excluded.level, updated_at = excluded.updated_at",
            )?
            .execute(params![chat_id, module, level.as_str(), now_millis()])?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> Store {
        let s = Store::open_in_memory().unwrap();
        s.migrate().unwrap();
        s
    }

    #[tokio::test]
    async fn absent_module_defaults_to_open() {
        let s = store().await;
        assert_eq!(
            s.group_module_level(1, "blockchain").await.unwrap(),
            GroupModuleLevel::Open
        );
    }

    #[tokio::test]
    async fn reserved_modules_cannot_be_gated() {
        let s = store().await;
        assert!(s
            .set_group_module_level(1, "core", GroupModuleLevel::Disabled)
            .await
            .is_err());
        assert_eq!(
            s.group_module_level(1, "memory").await.unwrap(),
            GroupModuleLevel::Open
        );
    }

    #[tokio::test]
    async fn gate_round_trip() {
        let s = store().await;
        s.set_group_module_level(5, "blockchain", GroupModuleLevel::Admin)
            .await
            .unwrap();
        assert_eq!(
            s.group_module_level(5, "blockchain").await.unwrap(),
            GroupModuleLevel::Admin
        );
        // Other chats keep the default.
        assert_eq!(
            s.group_module_level(6, "blockchain").await.unwrap(),
            GroupModuleLevel::Open
        );
    }

    #[tokio::test]
    async fn tool_config_overrides_round_trip() {
        let s = store().await;
        s.tool_config_set("ton_swap", false, Some("admin-only".into()), "admin:1")
            .await
            .unwrap();
        let all = s.tool_config_all().await.unwrap();
        let row = all.get("ton_swap").unwrap();
        assert!(!row.enabled);
        assert_eq!(row.scope.as_deref(), Some("admin-only"));
        assert_eq!(row.updated_by, "admin:1");
    }
}
