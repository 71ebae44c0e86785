//! Agent lifecycle: a four-state machine supervising start/stop of the whole
//! process.
//!
//! Concurrent `start()` calls share one in-flight future; `stop()` during
//! `starting` waits for the start to settle before stopping. Listeners are
//! plain callbacks invoked in registration order on every transition.

use std::sync::Mutex;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tracing::info;

use crate::store::now_millis;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }
}

/// Emitted on every transition.
#[derive(Clone, Debug, serde::Serialize)]
pub struct LifecycleEvent {
    pub state: LifecycleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: i64,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("cannot start while stopping")]
    StartWhileStopping,
    #[error("start failed: {0}")]
    StartFailed(String),
    #[error("stop failed: {0}")]
    StopFailed(String),
    #[error("start/stop hooks already registered")]
    HooksAlreadySet,
}

type Listener = std::sync::Arc<dyn Fn(&LifecycleEvent) + Send + Sync>;
type Hook = std::sync::Arc<dyn Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync>;
type SharedOp = Shared<BoxFuture<'static, Result<(), String>>>;

struct Inner {
    state: LifecycleState,
    last_error: Option<String>,
    running_since: Option<Instant>,
    start_hook: Option<Hook>,
    stop_hook: Option<Hook>,
    in_flight_start: Option<SharedOp>,
    in_flight_stop: Option<SharedOp>,
    listeners: Vec<(u64, Listener)>,
    next_listener_id: u64,
}

pub struct Lifecycle {
    inner: Mutex<Inner>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::Stopped,
                last_error: None,
                running_since: None,
                start_hook: None,
                stop_hook: None,
                in_flight_start: None,
                in_flight_stop: None,
                listeners: Vec::new(),
                next_listener_id: 1,
            }),
        }
    }

    /// Registers the supervisor's start/stop callbacks. One shot: repeated
    /// registration does not stack and is an error.
    pub fn set_hooks<S, T>(&self, start: S, stop: T) -> Result<(), LifecycleError>
    where
        S: Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
        T: Fn() -> BoxFuture<'static, Result<(), String>> + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        if inner.start_hook.is_some() || inner.stop_hook.is_some() {
            return Err(LifecycleError::HooksAlreadySet);
        }
        inner.start_hook = Some(std::sync::Arc::new(start));
        inner.stop_hook = Some(std::sync::Arc::new(stop));
        Ok(())
    }

    /// Subscribes a listener; returns the id for [`Lifecycle::off`].
    pub fn on<F>(&self, listener: F) -> u64
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_listener_id;
        inner.next_listener_id += 1;
        inner.listeners.push((id, std::sync::Arc::new(listener)));
        id
    }

    pub fn off(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.listeners.retain(|(lid, _)| *lid != id);
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.lock().unwrap().state
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    /// Seconds since entering `running`, or `None`.
    pub fn uptime(&self) -> Option<u64> {
        self.inner
            .lock()
            .unwrap()
            .running_since
            .map(|t| t.elapsed().as_secs())
    }

    fn emit(listeners: &[(u64, Listener)], event: &LifecycleEvent) {
        for (_, listener) in listeners {
            listener(event);
        }
    }

    fn transition(inner: &mut Inner, state: LifecycleState, error: Option<String>) -> (Vec<(u64, Listener)>, LifecycleEvent) {
        inner.state = state;
        if error.is_some() {
            inner.last_error = error.clone();
        }
        let event = LifecycleEvent {
            state,
            error,
            timestamp: now_millis(),
        };
        (inner.listeners.clone(), event)
    }

    /// Starts the agent. No-op when running; shares the in-flight future when
    /// already starting; fails fast while stopping.
    pub async fn start(&self) -> Result<(), LifecycleError> {
        let op = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                LifecycleState::Running => return Ok(()),
                LifecycleState::Stopping => return Err(LifecycleError::StartWhileStopping),
                LifecycleState::Starting => inner
                    .in_flight_start
                    .clone()
                    .expect("starting state always has an in-flight future"),
                LifecycleState::Stopped => {
                    let hook = inner.start_hook.clone();
                    let fut: BoxFuture<'static, Result<(), String>> = async move {
                        match hook {
                            Some(h) => h().await,
                            None => Ok(()),
                        }
                    }
                    .boxed();
                    let shared = fut.shared();
                    inner.in_flight_start = Some(shared.clone());
                    inner.last_error = None;
                    let (listeners, event) =
                        Self::transition(&mut inner, LifecycleState::Starting, None);
                    drop(inner);
                    info!("lifecycle: starting");
                    Self::emit(&listeners, &event);
                    shared
                }
            }
        };

        let result = op.await;

        let mut inner = self.inner.lock().unwrap();
        if inner.state == LifecycleState::Starting {
            inner.in_flight_start = None;
            let (listeners, event) = match &result {
                Ok(()) => {
                    inner.running_since = Some(Instant::now());
                    Self::transition(&mut inner, LifecycleState::Running, None)
                }
                Err(e) => Self::transition(&mut inner, LifecycleState::Stopped, Some(e.clone())),
            };
            drop(inner);
            info!(state = event.state.as_str(), "lifecycle transition");
            Self::emit(&listeners, &event);
        }
        result.map_err(LifecycleError::StartFailed)
    }

    /// Stops the agent. Waits for an in-flight start to settle first; shares
    /// the in-flight stop future; no-op when already stopped.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        loop {
            enum Action {
                Done,
                AwaitStart(SharedOp),
                AwaitStop(SharedOp),
            }

            let action = {
                let mut inner = self.inner.lock().unwrap();
                match inner.state {
                    LifecycleState::Stopped => Action::Done,
                    LifecycleState::Starting => Action::AwaitStart(
                        inner
                            .in_flight_start
                            .clone()
                            .expect("starting state always has an in-flight future"),
                    ),
                    LifecycleState::Stopping => Action::AwaitStop(
                        inner
                            .in_flight_stop
                            .clone()
                            .expect("stopping state always has an in-flight future"),
                    ),
                    LifecycleState::Running => {
                        let hook = inner.stop_hook.clone();
                        let fut: BoxFuture<'static, Result<(), String>> = async move {
                            match hook {
                                Some(h) => h().await,
                                None => Ok(()),
                            }
                        }
                        .boxed();
                        let shared = fut.shared();
                        inner.in_flight_stop = Some(shared.clone());
                        let (listeners, event) =
                            Self::transition(&mut inner, LifecycleState::Stopping, None);
                        drop(inner);
                        info!("lifecycle: stopping");
                        Self::emit(&listeners, &event);
                        Action::AwaitStop(shared)
                    }
                }
            };

            match action {
                Action::Done => return Ok(()),
                Action::AwaitStart(op) => {
                    // Outcome irrelevant: both Running and Stopped are handled
                    // on the next loop pass.
                    let _ = op.await;
                }
                Action::AwaitStop(op) => {
                    let result = op.await;
                    let mut inner = self.inner.lock().unwrap();
                    if inner.state == LifecycleState::Stopping {
                        inner.in_flight_stop = None;
                        inner.running_since = None;
                        let error = result.as_ref().err().cloned();
                        let (listeners, event) =
                            Self::transition(&mut inner, LifecycleState::Stopped, error);
                        drop(inner);
                        info!("lifecycle: stopped");
                        Self::emit(&listeners, &event);
                    }
                    return result.map_err(LifecycleError::StopFailed);
                }
            }
        }
    }
}
