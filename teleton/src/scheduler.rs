//! Per-chat session scheduling: debounce bursts, strict FIFO within a chat,
//! full concurrency across chats, at-most-one in-flight turn per chat.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::bridge::InboundEvent;
use crate::store::now_millis;

/// Hard cap on buffered events per chat; beyond it the oldest are dropped.
pub const PENDING_HISTORY_MAX_PER_CHAT: usize = 50;
/// Buffered events older than this are dropped at enqueue time.
pub const PENDING_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
/// Debounce base window; the effective window is `base * burst`, capped.
pub const DEBOUNCE_BASE: Duration = Duration::from_millis(700);
/// Upper bound on the debounce window regardless of burst length.
pub const DEBOUNCE_CAP: Duration = Duration::from_millis(2_800);

/// Consumes one coalesced batch of events as a single agent turn. The handler
/// owns its error reporting; the scheduler only sequences.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    async fn run_turn(&self, chat_id: i64, events: Vec<InboundEvent>, cancel: CancellationToken);
}

#[derive(Default)]
struct ChatQueue {
    pending: VecDeque<InboundEvent>,
    burst: u32,
    debounce: Option<JoinHandle<()>>,
    in_flight: bool,
}

pub struct SessionScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    chats: DashMap<i64, ChatQueue>,
    handler: Arc<dyn TurnHandler>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    accepting: AtomicBool,
    debounce_base: Duration,
    debounce_cap: Duration,
}

impl SessionScheduler {
    pub fn new(handler: Arc<dyn TurnHandler>, cancel: CancellationToken) -> Self {
        Self::with_debounce(handler, cancel, DEBOUNCE_BASE, DEBOUNCE_CAP)
    }

    /// Constructor with explicit debounce windows (tests use short ones).
    pub fn with_debounce(
        handler: Arc<dyn TurnHandler>,
        cancel: CancellationToken,
        debounce_base: Duration,
        debounce_cap: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                chats: DashMap::new(),
                handler,
                cancel,
                tracker: TaskTracker::new(),
                accepting: AtomicBool::new(true),
                debounce_base,
                debounce_cap,
            }),
        }
    }

    /// Accepts one inbound event: buffer it, prune the buffer, reset the
    /// chat's debounce timer.
    pub fn enqueue(&self, event: InboundEvent) {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            debug!(chat_id = event.chat_id, "scheduler draining, event dropped");
            return;
        }
        let chat_id = event.chat_id;
        let delay = {
            let mut queue = self.inner.chats.entry(chat_id).or_default();
            queue.pending.push_back(event);
            queue.burst = queue.burst.saturating_add(1);
            Self::prune(&mut queue);
            if let Some(handle) = queue.debounce.take() {
                handle.abort();
            }
            (self.inner.debounce_base * queue.burst).min(self.inner.debounce_cap)
        };

        let inner = Arc::clone(&self.inner);
        let cancel = inner.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => Inner::fire(inner, chat_id),
                _ = cancel.cancelled() => {}
            }
        });
        if let Some(mut queue) = self.inner.chats.get_mut(&chat_id) {
            queue.debounce = Some(handle);
        }
    }

    fn prune(queue: &mut ChatQueue) {
        let min_ts = now_millis() - PENDING_MAX_AGE.as_millis() as i64;
        queue.pending.retain(|e| e.timestamp >= min_ts);
        while queue.pending.len() > PENDING_HISTORY_MAX_PER_CHAT {
            queue.pending.pop_front();
            warn!("pending buffer over cap, oldest event dropped");
        }
    }

    /// Stops accepting, lets in-flight turns drain within `grace`.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.accepting.store(false, Ordering::SeqCst);
        for mut entry in self.inner.chats.iter_mut() {
            if let Some(handle) = entry.value_mut().debounce.take() {
                handle.abort();
            }
        }
        self.inner.tracker.close();
        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            warn!("scheduler drain exceeded grace period");
        }
    }

    /// Number of buffered (not yet dispatched) events for a chat.
    pub fn pending_len(&self, chat_id: i64) -> usize {
        self.inner
            .chats
            .get(&chat_id)
            .map(|q| q.pending.len())
            .unwrap_or(0)
    }
}

impl Inner {
    /// Debounce fired: move the buffer out and dispatch, unless a turn is
    /// already in flight (the backlog coalesces into the next one).
    fn fire(inner: Arc<Inner>, chat_id: i64) {
        let batch = {
            let mut queue = match inner.chats.get_mut(&chat_id) {
                Some(q) => q,
                None => return,
            };
            if queue.in_flight || queue.pending.is_empty() {
                return;
            }
            queue.in_flight = true;
            queue.burst = 0;
            queue.pending.drain(..).collect::<Vec<_>>()
        };

        let handler = Arc::clone(&inner.handler);
        let cancel = inner.cancel.child_token();
        let spawn_inner = Arc::clone(&inner);
        inner.tracker.spawn(async move {
            debug!(chat_id, batch = batch.len(), "dispatching turn");
            handler.run_turn(chat_id, batch, cancel).await;
            Inner::turn_done(spawn_inner, chat_id);
        });
    }

    fn turn_done(inner: Arc<Inner>, chat_id: i64) {
        let has_backlog = {
            let mut queue = match inner.chats.get_mut(&chat_id) {
                Some(q) => q,
                None => return,
            };
            queue.in_flight = false;
            !queue.pending.is_empty()
        };
        // Coalesced backlog runs immediately; FIFO order is preserved because
        // only this path or a debounce fire can start the next turn, never
        // both (in_flight guards).
        if has_backlog && !inner.cancel.is_cancelled() {
            Inner::fire(inner, chat_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingHandler {
        turns: Mutex<Vec<(i64, Vec<String>)>>,
        delay: Duration,
    }

    impl RecordingHandler {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                turns: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn turns(&self) -> Vec<(i64, Vec<String>)> {
            self.turns.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TurnHandler for RecordingHandler {
        async fn run_turn(
            &self,
            chat_id: i64,
            events: Vec<InboundEvent>,
            _cancel: CancellationToken,
        ) {
            tokio::time::sleep(self.delay).await;
            let texts = events.into_iter().map(|e| e.text).collect();
            self.turns.lock().unwrap().push((chat_id, texts));
        }
    }

    fn scheduler(handler: Arc<RecordingHandler>) -> SessionScheduler {
        SessionScheduler::with_debounce(
            handler,
            CancellationToken::new(),
            Duration::from_millis(10),
            Duration::from_millis(40),
        )
    }

    #[tokio::test]
    async fn burst_coalesces_into_one_turn() {
        let handler = RecordingHandler::new(Duration::ZERO);
        let sched = scheduler(Arc::clone(&handler));
        for i in 0..5 {
            sched.enqueue(InboundEvent::dm(1, "u", format!("m{}", i)));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        let turns = handler.turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].1, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn chats_run_concurrently() {
        let handler = RecordingHandler::new(Duration::from_millis(50));
        let sched = scheduler(Arc::clone(&handler));
        sched.enqueue(InboundEvent::dm(1, "u", "a"));
        sched.enqueue(InboundEvent::dm(2, "u", "b"));
        // Two 50 ms turns finishing well inside 2x50 ms + debounce means they
        // overlapped.
        tokio::time::sleep(Duration::from_millis(120)).await;
        let turns = handler.turns();
        assert_eq!(turns.len(), 2);
    }

    #[tokio::test]
    async fn backlog_coalesces_into_next_turn_in_order() {
        let handler = RecordingHandler::new(Duration::from_millis(60));
        let sched = scheduler(Arc::clone(&handler));
        sched.enqueue(InboundEvent::dm(1, "u", "first"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Turn for "first" is now in flight; these queue up.
        sched.enqueue(InboundEvent::dm(1, "u", "second"));
        sched.enqueue(InboundEvent::dm(1, "u", "third"));
        tokio::time::sleep(Duration::from_millis(300)).await;
        let turns = handler.turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].1, vec!["first"]);
        assert_eq!(turns[1].1, vec!["second", "third"]);
    }

    #[tokio::test]
    async fn buffer_cap_drops_oldest() {
        let handler = RecordingHandler::new(Duration::ZERO);
        // Long debounce so nothing dispatches while we flood.
        let sched = SessionScheduler::with_debounce(
            handler.clone(),
            CancellationToken::new(),
            Duration::from_secs(5),
            Duration::from_secs(5),
        );
        for i in 0..(PENDING_HISTORY_MAX_PER_CHAT + 10) {
            sched.enqueue(InboundEvent::dm(1, "u", format!("m{}", i)));
        }
        assert_eq!(sched.pending_len(1), PENDING_HISTORY_MAX_PER_CHAT);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting() {
        let handler = RecordingHandler::new(Duration::ZERO);
        let sched = scheduler(Arc::clone(&handler));
        sched.shutdown(Duration::from_millis(100)).await;
        sched.enqueue(InboundEvent::dm(1, "u", "late"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handler.turns().is_empty());
    }
}
