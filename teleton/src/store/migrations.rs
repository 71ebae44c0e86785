//! Schema DDL and the version ladder.
//!
//! `run` first applies the idempotent base DDL (every table, FTS companion
//! and trigger), then walks the ladder from the persisted version to
//! [`SCHEMA_VERSION`]. Every step is re-runnable: `IF NOT EXISTS` guards for
//! objects, column introspection for `ALTER TABLE ADD COLUMN`.

use rusqlite::Connection;

use super::{get_meta, set_meta, StoreError};

pub const SCHEMA_VERSION: &str = "1.10.1";

/// Base DDL. FTS companions and their triggers live in the same block as the
/// content tables they shadow.
const BASE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS knowledge (
    id INTEGER PRIMARY KEY,
    source TEXT NOT NULL DEFAULT 'memory',
    path TEXT,
    text TEXT NOT NULL,
    embedding BLOB,
    hash TEXT NOT NULL UNIQUE,
    start_line INTEGER,
    end_line INTEGER,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0
);

CREATE VIRTUAL TABLE IF NOT EXISTS knowledge_fts USING fts5(
    text,
    content='knowledge',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS knowledge_ai AFTER INSERT ON knowledge BEGIN
    INSERT INTO knowledge_fts(rowid, text) VALUES (new.id, new.text);
END;
CREATE TRIGGER IF NOT EXISTS knowledge_ad AFTER DELETE ON knowledge BEGIN
    INSERT INTO knowledge_fts(knowledge_fts, rowid, text) VALUES ('delete', old.id, old.text);
END;
CREATE TRIGGER IF NOT EXISTS knowledge_au AFTER UPDATE OF text ON knowledge BEGIN
    INSERT INTO knowledge_fts(knowledge_fts, rowid, text) VALUES ('delete', old.id, old.text);
    INSERT INTO knowledge_fts(rowid, text) VALUES (new.id, new.text);
END;

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    chat_id INTEGER NOT NULL UNIQUE,
    started_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0,
    message_count INTEGER NOT NULL DEFAULT 0,
    context_tokens INTEGER NOT NULL DEFAULT 0,
    model TEXT,
    provider TEXT,
    last_reset_date TEXT,
    summary TEXT
);

CREATE TABLE IF NOT EXISTS tg_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id INTEGER NOT NULL,
    sender_id TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'user',
    text TEXT NOT NULL,
    tool_calls TEXT,
    tool_result_for TEXT,
    embedding BLOB,
    timestamp INTEGER NOT NULL DEFAULT 0
);

CREATE VIRTUAL TABLE IF NOT EXISTS tg_messages_fts USING fts5(
    text,
    content='tg_messages',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS tg_messages_ai AFTER INSERT ON tg_messages BEGIN
    INSERT INTO tg_messages_fts(rowid, text) VALUES (new.id, new.text);
END;
CREATE TRIGGER IF NOT EXISTS tg_messages_ad AFTER DELETE ON tg_messages BEGIN
    INSERT INTO tg_messages_fts(tg_messages_fts, rowid, text) VALUES ('delete', old.id, old.text);
END;
CREATE TRIGGER IF NOT EXISTS tg_messages_au AFTER UPDATE OF text ON tg_messages BEGIN
    INSERT INTO tg_messages_fts(tg_messages_fts, rowid, text) VALUES ('delete', old.id, old.text);
    INSERT INTO tg_messages_fts(rowid, text) VALUES (new.id, new.text);
END;

CREATE TABLE IF NOT EXISTS embedding_cache (
    hash TEXT NOT NULL,
    model TEXT NOT NULL,
    provider TEXT NOT NULL,
    embedding BLOB NOT NULL,
    dims INTEGER NOT NULL,
    created_at INTEGER NOT NULL DEFAULT 0,
    accessed_at INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (hash, model, provider)
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    created_by TEXT NOT NULL DEFAULT '',
    scheduled_for INTEGER,
    payload TEXT,
    result TEXT,
    error TEXT,
    created_at INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS task_dependencies (
    task_id TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    depends_on TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    PRIMARY KEY (task_id, depends_on)
);

CREATE TABLE IF NOT EXISTS _cron_jobs (
    id TEXT PRIMARY KEY,
    interval_ms INTEGER NOT NULL,
    run_missed INTEGER NOT NULL DEFAULT 0,
    last_run_at INTEGER
);

CREATE TABLE IF NOT EXISTS tool_config (
    tool_name TEXT PRIMARY KEY,
    enabled INTEGER NOT NULL DEFAULT 1,
    scope TEXT,
    updated_at INTEGER NOT NULL DEFAULT 0,
    updated_by TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS group_modules (
    chat_id INTEGER NOT NULL,
    module TEXT NOT NULL,
    level TEXT NOT NULL DEFAULT 'open',
    updated_at INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (chat_id, module)
);

CREATE TABLE IF NOT EXISTS tool_index (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT '',
    embedded INTEGER NOT NULL DEFAULT 0
);

CREATE VIRTUAL TABLE IF NOT EXISTS tool_index_fts USING fts5(
    name,
    description,
    content='tool_index',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS tool_index_ai AFTER INSERT ON tool_index BEGIN
    INSERT INTO tool_index_fts(rowid, name, description) VALUES (new.id, new.name, new.description);
END;
CREATE TRIGGER IF NOT EXISTS tool_index_ad AFTER DELETE ON tool_index BEGIN
    INSERT INTO tool_index_fts(tool_index_fts, rowid, name, description)
        VALUES ('delete', old.id, old.name, old.description);
END;
CREATE TRIGGER IF NOT EXISTS tool_index_au AFTER UPDATE ON tool_index BEGIN
    INSERT INTO tool_index_fts(tool_index_fts, rowid, name, description)
        VALUES ('delete', old.id, old.name, old.description);
    INSERT INTO tool_index_fts(rowid, name, description) VALUES (new.id, new.name, new.description);
END;
"#;

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, StoreError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

fn add_column_if_missing(
    conn: &Connection,
    table: &str,
    column: &str,
    decl: &str,
) -> Result<(), StoreError> {
    if !has_column(conn, table, column)? {
        conn.execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
            [],
        )?;
    }
    Ok(())
}

/// Parses `a.b.c` into a comparable tuple; malformed parts compare as zero.
fn parse_version(v: &str) -> (u32, u32, u32) {
    let mut parts = v.split('.').map(|p| p.parse::<u32>().unwrap_or(0));
    (
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
        parts.next().unwrap_or(0),
    )
}

type Step = fn(&Connection) -> Result<(), StoreError>;

/// The ladder. Each entry runs exactly once per fresh version; the guards make
/// replay after a crash harmless.
const LADDER: &[(&str, Step)] = &[
    ("1.1.0", |_conn| Ok(())),
    ("1.2.0", |conn| {
        add_column_if_missing(conn, "sessions", "summary", "TEXT")
    }),
    ("1.3.0", |conn| {
        add_column_if_missing(conn, "sessions", "last_reset_date", "TEXT")
    }),
    ("1.4.0", |conn| {
        add_column_if_missing(conn, "knowledge", "start_line", "INTEGER")?;
        add_column_if_missing(conn, "knowledge", "end_line", "INTEGER")
    }),
    ("1.5.0", |conn| {
        add_column_if_missing(conn, "tool_config", "updated_by", "TEXT NOT NULL DEFAULT ''")
    }),
    ("1.6.0", |conn| {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status, priority DESC)",
            [],
        )?;
        Ok(())
    }),
    ("1.7.0", |conn| {
        add_column_if_missing(conn, "tg_messages", "tool_calls", "TEXT")?;
        add_column_if_missing(conn, "tg_messages", "tool_result_for", "TEXT")
    }),
    ("1.8.0", |conn| {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_cron_last_run ON _cron_jobs(last_run_at)",
            [],
        )?;
        Ok(())
    }),
    ("1.9.0", |conn| {
        add_column_if_missing(
            conn,
            "embedding_cache",
            "accessed_at",
            "INTEGER NOT NULL DEFAULT 0",
        )
    }),
    ("1.10.0", |conn| {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_group_modules_chat ON group_modules(chat_id)",
            [],
        )?;
        Ok(())
    }),
    ("1.10.1", |conn| {
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tg_messages_chat_ts ON tg_messages(chat_id, timestamp)",
            [],
        )?;
        Ok(())
    }),
];

pub fn run(conn: &mut Connection) -> Result<(), StoreError> {
    conn.execute_batch(BASE_DDL)
        .map_err(|e| StoreError::Migration {
            version: "base".into(),
            message: e.to_string(),
        })?;

    let current = get_meta(conn, "schema_version")?.unwrap_or_else(|| "0.0.0".to_string());
    let current_v = parse_version(&current);

    for (version, step) in LADDER {
        if parse_version(version) <= current_v {
            continue;
        }
        let tx = conn.transaction().map_err(StoreError::from)?;
        step(&tx).map_err(|e| StoreError::Migration {
            version: version.to_string(),
            message: e.to_string(),
        })?;
        set_meta(&tx, "schema_version", version)?;
        tx.commit().map_err(|e| StoreError::Migration {
            version: version.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn migrate_reaches_current_version() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        assert_eq!(
            store.schema_version().unwrap().as_deref(),
            Some(SCHEMA_VERSION)
        );
    }

    #[test]
    fn migrate_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store.migrate().unwrap();
        assert_eq!(
            store.schema_version().unwrap().as_deref(),
            Some(SCHEMA_VERSION)
        );
    }

    #[test]
    fn version_parse_orders() {
        assert!(parse_version("1.10.1") > parse_version("1.9.0"));
        assert!(parse_version("1.2.0") > parse_version("1.1.0"));
    }

    #[test]
    fn add_column_guard_is_reentrant() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().unwrap();
        store
            .with_conn_sync(|conn| {
                add_column_if_missing(conn, "sessions", "summary", "TEXT")?;
                add_column_if_missing(conn, "sessions", "summary", "TEXT")
            })
            .unwrap();
    }
}
