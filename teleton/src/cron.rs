//! Durable interval scheduler. Job metadata persists in `_cron_jobs`;
//! callbacks are in-memory and re-registered on every boot.
//!
//! `last_run_at` is stamped after every execution, success, failure or panic,
//! so a permanently broken callback cannot turn into a retry storm across
//! restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::store::{now_millis, Store, StoreError};

/// Floor on job intervals.
pub const MIN_INTERVAL_MS: i64 = 1000;

pub type CronCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

#[derive(Debug, Error)]
pub enum CronError {
    #[error("interval must be at least {MIN_INTERVAL_MS} ms, got {0}")]
    IntervalTooShort(i64),
    #[error("cron manager is stopped")]
    Stopped,
    #[error("no such job: {0}")]
    Unknown(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Copy, Debug)]
pub struct CronOptions {
    pub interval_ms: i64,
    /// Fire once immediately at start when a full interval has already
    /// elapsed since the persisted last run.
    pub run_missed: bool,
}

/// Read-only view of one job.
#[derive(Clone, Debug)]
pub struct CronJobSnapshot {
    pub id: String,
    pub interval_ms: i64,
    pub run_missed: bool,
    pub last_run_at: Option<i64>,
    pub next_run_at: Option<i64>,
}

struct Job {
    interval_ms: i64,
    run_missed: bool,
    last_run_at: Option<i64>,
    callback: CronCallback,
    handle: Option<JoinHandle<()>>,
}

struct CronState {
    jobs: HashMap<String, Job>,
    started: bool,
    stopped: bool,
}

struct Shared {
    store: Store,
    state: Mutex<CronState>,
}

pub struct CronManager {
    shared: Arc<Shared>,
}

impl CronManager {
    pub fn new(store: Store) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                state: Mutex::new(CronState {
                    jobs: HashMap::new(),
                    started: false,
                    stopped: false,
                }),
            }),
        }
    }

    /// Registers a job. Re-registration preserves the persisted `last_run_at`.
    /// When the manager is already started, the timer activates immediately;
    /// otherwise it waits for [`CronManager::start`].
    pub async fn register(
        &self,
        id: &str,
        options: CronOptions,
        callback: CronCallback,
    ) -> Result<(), CronError> {
        if options.interval_ms < MIN_INTERVAL_MS {
            return Err(CronError::IntervalTooShort(options.interval_ms));
        }
        {
            let state = self.shared.state.lock().unwrap();
            if state.stopped {
                return Err(CronError::Stopped);
            }
        }
        let row = self
            .shared
            .store
            .cron_upsert(id, options.interval_ms, options.run_missed)
            .await?;

        let activate_now = {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped {
                return Err(CronError::Stopped);
            }
            if let Some(old) = state.jobs.remove(id) {
                if let Some(handle) = old.handle {
                    handle.abort();
                }
            }
            state.jobs.insert(
                id.to_string(),
                Job {
                    interval_ms: options.interval_ms,
                    run_missed: options.run_missed,
                    last_run_at: row.last_run_at,
                    callback,
                    handle: None,
                },
            );
            state.started
        };
        if activate_now {
            Self::activate(&self.shared, id);
        }
        Ok(())
    }

    /// Clears the timer and deletes the persisted row.
    pub async fn unregister(&self, id: &str) -> Result<(), CronError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            match state.jobs.remove(id) {
                Some(job) => {
                    if let Some(handle) = job.handle {
                        handle.abort();
                    }
                }
                None => return Err(CronError::Unknown(id.to_string())),
            }
        }
        self.shared.store.cron_delete(id).await?;
        Ok(())
    }

    /// Activates all registered jobs. Missed jobs fire once immediately.
    pub fn start(&self) {
        let ids: Vec<String> = {
            let mut state = self.shared.state.lock().unwrap();
            if state.started || state.stopped {
                return;
            }
            state.started = true;
            state.jobs.keys().cloned().collect()
        };
        for id in ids {
            Self::activate(&self.shared, &id);
        }
    }

    /// Clears every timer; further registration fails with
    /// [`CronError::Stopped`].
    pub fn stop_all(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.stopped = true;
        state.started = false;
        for job in state.jobs.values_mut() {
            if let Some(handle) = job.handle.take() {
                handle.abort();
            }
        }
    }

    pub fn list(&self) -> Vec<CronJobSnapshot> {
        let state = self.shared.state.lock().unwrap();
        let mut out: Vec<CronJobSnapshot> = state
            .jobs
            .iter()
            .map(|(id, job)| Self::snapshot(id, job))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub fn get(&self, id: &str) -> Option<CronJobSnapshot> {
        let state = self.shared.state.lock().unwrap();
        state.jobs.get(id).map(|job| Self::snapshot(id, job))
    }

    fn snapshot(id: &str, job: &Job) -> CronJobSnapshot {
        CronJobSnapshot {
            id: id.to_string(),
            interval_ms: job.interval_ms,
            run_missed: job.run_missed,
            last_run_at: job.last_run_at,
            next_run_at: job.last_run_at.map(|last| last + job.interval_ms),
        }
    }

    fn activate(shared: &Arc<Shared>, id: &str) {
        let (interval_ms, run_missed, last_run_at, callback) = {
            let state = shared.state.lock().unwrap();
            match state.jobs.get(id) {
                Some(job) => (
                    job.interval_ms,
                    job.run_missed,
                    job.last_run_at,
                    Arc::clone(&job.callback),
                ),
                None => return,
            }
        };

        let shared_task = Arc::clone(shared);
        let job_id = id.to_string();
        let handle = tokio::spawn(async move {
            let missed = run_missed
                && matches!(last_run_at, Some(last) if now_millis() - (last + interval_ms) > 0);
            if missed {
                debug!(job = %job_id, "cron: firing missed run");
                Self::execute(&shared_task, &job_id, &callback).await;
            }
            let interval = Duration::from_millis(interval_ms as u64);
            loop {
                tokio::time::sleep(interval).await;
                Self::execute(&shared_task, &job_id, &callback).await;
            }
        });

        let mut state = shared.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(id) {
            if let Some(old) = job.handle.replace(handle) {
                old.abort();
            }
        } else {
            handle.abort();
        }
    }

    async fn execute(shared: &Arc<Shared>, id: &str, callback: &CronCallback) {
        let outcome = std::panic::AssertUnwindSafe(callback()).catch_unwind().await;
        match outcome {
            Ok(Ok(())) => debug!(job = id, "cron: run ok"),
            Ok(Err(e)) => warn!(job = id, error = %e, "cron: run failed"),
            Err(_) => warn!(job = id, "cron: callback panicked"),
        }
        // Stamp the run regardless of outcome.
        let now = now_millis();
        if let Err(e) = shared.store.cron_mark_run(id, now).await {
            warn!(job = id, error = %e, "cron: failed to persist last_run_at");
        }
        let mut state = shared.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(id) {
            job.last_run_at = Some(now);
        }
    }
}
