//! Supervisor: composes bridge, scheduler, cron and the runtime under the
//! lifecycle's start/stop hooks.
//!
//! Start builds a fresh scheduler + cron pair (stop poisons them by design),
//! connects the bridge under a deadline and starts the inbound pump. Stop
//! cancels the root token, drains in-flight turns within the grace period and
//! disconnects.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::Bridge;
use crate::cron::{CronManager, CronOptions};
use crate::lifecycle::{Lifecycle, LifecycleError};
use crate::memory::MemorySystem;
use crate::runtime::AgentRuntime;
use crate::scheduler::SessionScheduler;
use crate::store::Store;
use crate::tools::{ToolIndex, ToolRegistry};

/// Deadline on the platform connect call.
pub const BRIDGE_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long in-flight turns get to finish on stop.
pub const DRAIN_GRACE: Duration = Duration::from_secs(10);
/// Interval of the embedding-cache prune job.
const CACHE_PRUNE_INTERVAL_MS: i64 = 60 * 60 * 1000;
/// Interval of the pending-embedding sweep.
const EMBED_SWEEP_INTERVAL_MS: i64 = 5 * 60 * 1000;

struct Active {
    scheduler: Arc<SessionScheduler>,
    cron: Arc<CronManager>,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

struct Inner {
    store: Store,
    bridge: Arc<dyn Bridge>,
    runtime: Arc<AgentRuntime>,
    registry: Arc<ToolRegistry>,
    index: Arc<ToolIndex>,
    memory: Arc<MemorySystem>,
    active: Mutex<Option<Active>>,
}

pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        store: Store,
        bridge: Arc<dyn Bridge>,
        runtime: Arc<AgentRuntime>,
        registry: Arc<ToolRegistry>,
        index: Arc<ToolIndex>,
        memory: Arc<MemorySystem>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                bridge,
                runtime,
                registry,
                index,
                memory,
                active: Mutex::new(None),
            }),
        }
    }

    /// Registers this supervisor's start/stop callbacks on the lifecycle.
    /// One shot, like the lifecycle itself.
    pub fn install(&self, lifecycle: &Lifecycle) -> Result<(), LifecycleError> {
        let start_inner = Arc::clone(&self.inner);
        let stop_inner = Arc::clone(&self.inner);
        lifecycle.set_hooks(
            move || {
                let inner = Arc::clone(&start_inner);
                async move { Inner::start(inner).await }.boxed()
            },
            move || {
                let inner = Arc::clone(&stop_inner);
                async move { Inner::stop(inner).await }.boxed()
            },
        )
    }

    /// The scheduler of the running instance, when started (used by tests
    /// and the control plane).
    pub fn scheduler(&self) -> Option<Arc<SessionScheduler>> {
        self.inner
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| Arc::clone(&a.scheduler))
    }

    pub fn cron(&self) -> Option<Arc<CronManager>> {
        self.inner
            .active
            .lock()
            .unwrap()
            .as_ref()
            .map(|a| Arc::clone(&a.cron))
    }
}

impl Inner {
    async fn start(inner: Arc<Inner>) -> Result<(), String> {
        // Index the current catalog before any turn can retrieve from it.
        inner
            .index
            .reindex(&inner.registry.all_specs())
            .await
            .map_err(|e| format!("tool index build failed: {}", e))?;

        let cancel = CancellationToken::new();
        let scheduler = Arc::new(SessionScheduler::new(
            Arc::clone(&inner.runtime) as Arc<dyn crate::scheduler::TurnHandler>,
            cancel.child_token(),
        ));

        let cron = Arc::new(CronManager::new(inner.store.clone()));
        Self::register_maintenance_jobs(&inner, &cron)
            .await
            .map_err(|e| format!("cron registration failed: {}", e))?;

        let (events_tx, mut events_rx) = mpsc::channel(256);
        tokio::time::timeout(BRIDGE_CONNECT_TIMEOUT, inner.bridge.connect(events_tx))
            .await
            .map_err(|_| "bridge connect timed out".to_string())?
            .map_err(|e| format!("bridge connect failed: {}", e))?;

        let pump_scheduler = Arc::clone(&scheduler);
        let pump_cancel = cancel.child_token();
        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events_rx.recv() => match event {
                        Some(event) => pump_scheduler.enqueue(event),
                        None => break,
                    },
                    _ = pump_cancel.cancelled() => break,
                }
            }
        });

        cron.start();
        info!("supervisor: all components started");

        *inner.active.lock().unwrap() = Some(Active {
            scheduler,
            cron,
            cancel,
            pump,
        });
        Ok(())
    }

    async fn stop(inner: Arc<Inner>) -> Result<(), String> {
        let active = inner.active.lock().unwrap().take();
        let active = match active {
            Some(a) => a,
            None => return Ok(()),
        };
        active.cancel.cancel();
        active.scheduler.shutdown(DRAIN_GRACE).await;
        active.cron.stop_all();
        active.pump.abort();
        if let Err(e) = inner.bridge.disconnect().await {
            warn!(error = %e, "bridge disconnect failed");
        }
        info!("supervisor: all components stopped");
        Ok(())
    }

    async fn register_maintenance_jobs(
        inner: &Arc<Inner>,
        cron: &Arc<CronManager>,
    ) -> Result<(), crate::cron::CronError> {
        let store = inner.store.clone();
        cron.register(
            "embedding_cache_prune",
            CronOptions {
                interval_ms: CACHE_PRUNE_INTERVAL_MS,
                run_missed: true,
            },
            Arc::new(move || {
                let store = store.clone();
                async move {
                    let removed = store
                        .embedding_cache_prune()
                        .await
                        .map_err(|e| e.to_string())?;
                    if removed > 0 {
                        info!(removed, "embedding cache pruned");
                    }
                    Ok(())
                }
                .boxed()
            }),
        )
        .await?;

        let memory = Arc::clone(&inner.memory);
        cron.register(
            "embed_pending_knowledge",
            CronOptions {
                interval_ms: EMBED_SWEEP_INTERVAL_MS,
                run_missed: false,
            },
            Arc::new(move || {
                let memory = Arc::clone(&memory);
                async move {
                    memory.embed_pending().await.map_err(|e| e.to_string())?;
                    Ok(())
                }
                .boxed()
            }),
        )
        .await?;
        Ok(())
    }
}
