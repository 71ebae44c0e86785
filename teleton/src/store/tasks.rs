//! Durable work items with dependency edges (acyclic by policy).

use rusqlite::params;
use uuid::Uuid;

use super::{now_millis, Store, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "in_progress" => TaskStatus::InProgress,
            "done" => TaskStatus::Done,
            "failed" => TaskStatus::Failed,
            "cancelled" => TaskStatus::Cancelled,
            _ => TaskStatus::Pending,
        }
    }

    /// Terminal states no longer block dependants.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(Clone, Debug)]
pub struct TaskRow {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: i64,
    pub created_by: String,
    pub scheduled_for: Option<i64>,
    pub payload: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRow> {
    let status: String = row.get(2)?;
    Ok(TaskRow {
        id: row.get(0)?,
        description: row.get(1)?,
        status: TaskStatus::from_str_lossy(&status),
        priority: row.get(3)?,
        created_by: row.get(4)?,
        scheduled_for: row.get(5)?,
        payload: row.get(6)?,
        result: row.get(7)?,
        error: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const TASK_COLS: &str = "id, description, status, priority, created_by, scheduled_for, \
     payload, result, error, created_at, updated_at";

impl Store {
    pub async fn create_task(
        &self,
        description: String,
        priority: i64,
        created_by: String,
        scheduled_for: Option<i64>,
        payload: Option<String>,
    ) -> Result<TaskRow, StoreError> {
        self.with_conn(move |conn| {
            let now = now_millis();
            let id = Uuid::new_v4().to_string();
            conn.prepare_cached(
                "INSERT INTO tasks (id, description, status, priority, created_by, scheduled_for, payload, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', ?3, ?4, ?5, ?6, ?7, ?7)",
            )?
            .execute(params![id, description, priority, created_by, scheduled_for, payload, now])?;
            Ok(TaskRow {
                id,
                description,
                status: TaskStatus::Pending,
                priority,
                created_by,
                scheduled_for,
                payload,
                result: None,
                error: None,
                created_at: now,
                updated_at: now,
            })
        })
        .await
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<TaskRow>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLS);
            let mut stmt = conn.prepare_cached(&sql)?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_task(row)?)),
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TaskRow>, StoreError> {
        self.with_conn(move |conn| {
            let rows = match status {
                Some(st) => {
                    let sql = format!(
                        "SELECT {} FROM tasks WHERE status = ?1 ORDER BY priority DESC, created_at",
                        TASK_COLS
                    );
                    let mut stmt = conn.prepare_cached(&sql)?;
                    let rows = stmt.query_map(params![st.as_str()], row_to_task)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
                None => {
                    let sql = format!(
                        "SELECT {} FROM tasks ORDER BY priority DESC, created_at",
                        TASK_COLS
                    );
                    let mut stmt = conn.prepare_cached(&sql)?;
                    let rows = stmt.query_map([], row_to_task)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                }
            };
            Ok(rows)
        })
        .await
    }

    pub async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let n = conn
                .prepare_cached(
                    "UPDATE tasks SET status = ?2, result = COALESCE(?3, result),
                         error = COALESCE(?4, error), updated_at = ?5
                     WHERE id = ?1",
                )?
                .execute(params![id, status.as_str(), result, error, now_millis()])?;
            if n == 0 {
                return Err(StoreError::Storage(format!("no such task: {}", id)));
            }
            Ok(())
        })
        .await
    }

    /// Adds a dependency edge `task -> depends_on`. Rejects unknown ids,
    /// self-dependencies and edges that would close a cycle.
    pub async fn add_task_dependency(
        &self,
        task_id: &str,
        depends_on: &str,
    ) -> Result<(), StoreError> {
        if task_id == depends_on {
            return Err(StoreError::Storage("task cannot depend on itself".into()));
        }
        let task_id = task_id.to_string();
        let depends_on = depends_on.to_string();
        self.with_conn(move |conn| {
            // Walk the existing edges from `depends_on`; reaching `task_id`
            // means the new edge closes a cycle.
            let mut frontier = vec![depends_on.clone()];
            let mut seen = std::collections::HashSet::new();
            while let Some(current) = frontier.pop() {
                if current == task_id {
                    return Err(StoreError::Storage(format!(
                        "dependency {} -> {} would create a cycle",
                        task_id, depends_on
                    )));
                }
                if !seen.insert(current.clone()) {
                    continue;
                }
                let mut stmt = conn.prepare_cached(
                    "SELECT depends_on FROM task_dependencies WHERE task_id = ?1",
                )?;
                let next = stmt.query_map(params![current], |row| row.get::<_, String>(0))?;
                for id in next {
                    frontier.push(id?);
                }
            }
            conn.prepare_cached(
                "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on) VALUES (?1, ?2)",
            )?
            .execute(params![task_id, depends_on])?;
            Ok(())
        })
        .await
    }

    /// Pending tasks whose dependencies are all terminal, best priority first.
    pub async fn ready_tasks(&self) -> Result<Vec<TaskRow>, StoreError> {
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM tasks t
                 WHERE t.status = 'pending' AND NOT EXISTS (
                     SELECT 1 FROM task_dependencies d
                     JOIN tasks dep ON dep.id = d.depends_on
                     WHERE d.task_id = t.id
                       AND dep.status NOT IN ('done', 'failed', 'cancelled')
                 )
                 ORDER BY t.priority DESC, t.created_at",
                TASK_COLS
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let rows = stmt.query_map([], row_to_task)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}
