//! Persisted cron-job metadata (`_cron_jobs`). Callbacks live in memory; only
//! the interval, missed-run flag and last-run stamp survive restarts.

use rusqlite::params;

use super::{Store, StoreError};

#[derive(Clone, Debug)]
pub struct CronJobRow {
    pub id: String,
    pub interval_ms: i64,
    pub run_missed: bool,
    pub last_run_at: Option<i64>,
}

impl Store {
    /// Inserts or refreshes the row while preserving an existing
    /// `last_run_at` (re-registration must not look like a fresh run).
    pub async fn cron_upsert(
        &self,
        id: &str,
        interval_ms: i64,
        run_missed: bool,
    ) -> Result<CronJobRow, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached(
                "INSERT INTO _cron_jobs (id, interval_ms, run_missed, last_run_at)
                 VALUES (?1, ?2, ?3, NULL)
                 ON CONFLICT(id) DO UPDATE SET
                     interval_ms = excluded.interval_ms, run_missed = excluded.run_missed",
            )?
            .execute(params![id, interval_ms, run_missed as i64])?;
            let mut stmt = conn.prepare_cached(
                "SELECT id, interval_ms, run_missed, last_run_at FROM _cron_jobs WHERE id = ?1",
            )?;
            Ok(stmt.query_row(params![id], |row| {
                Ok(CronJobRow {
                    id: row.get(0)?,
                    interval_ms: row.get(1)?,
                    run_missed: row.get::<_, i64>(2)? != 0,
                    last_run_at: row.get(3)?,
                })
            })?)
        })
        .await
    }

    pub async fn cron_delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached("DELETE FROM _cron_jobs WHERE id = ?1")?
                .execute(params![id])?;
            Ok(())
        })
        .await
    }

    pub async fn cron_mark_run(&self, id: &str, at: i64) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached("UPDATE _cron_jobs SET last_run_at = ?2 WHERE id = ?1")?
                .execute(params![id, at])?;
            Ok(())
        })
        .await
    }

    pub async fn cron_get(&self, id: &str) -> Result<Option<CronJobRow>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT id, interval_ms, run_missed, last_run_at FROM _cron_jobs WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![id])?;
            match rows.next()? {
                Some(row) => Ok(Some(CronJobRow {
                    id: row.get(0)?,
                    interval_ms: row.get(1)?,
                    run_missed: row.get::<_, i64>(2)? != 0,
                    last_run_at: row.get(3)?,
                })),
                None => Ok(None),
            }
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
    async fn upsert_preserves_last_run() {
        let s = store().await;
        s.cron_upsert("sync", 5000, true).await.unwrap();
        s.cron_mark_run("sync", 12345).await.unwrap();
        let row = s.cron_upsert("sync", 9000, false).await.unwrap();
        assert_eq!(row.interval_ms, 9000);
        assert!(!row.run_missed);
        assert_eq!(row.last_run_at, Some(12345));
    }

    #[tokio::test]
    async fn delete_removes_row() {
        let s = store().await;
        s.cron_upsert("sync", 5000, false).await.unwrap();
        s.cron_delete("sync").await.unwrap();
        assert!(s.cron_get("sync").await.unwrap().is_none());
    }
}
