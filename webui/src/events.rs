//! Lifecycle SSE stream: current status on connect, every `stateChange`
//! forwarded as a `status` frame, a `ping` every 30 seconds, listener
//! released when the client goes away.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use tokio::sync::mpsc;

use teleton::store::now_millis;
use teleton::{Lifecycle, LifecycleEvent};

use crate::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Unsubscribes the lifecycle listener when the SSE stream is dropped.
struct ListenerGuard {
    lifecycle: Arc<Lifecycle>,
    id: u64,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.lifecycle.off(self.id);
    }
}

fn status_frame(event: &LifecycleEvent) -> Event {
    Event::default()
        .event("status")
        .id(event.timestamp.to_string())
        .data(serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()))
}

pub async fn agent_events(State(state): State<Arc<AppState>>) -> Response {
    let lifecycle = match &state.lifecycle {
        Some(l) => Arc::clone(l),
        None => {
            return (
                axum::http::StatusCode::SERVICE_UNAVAILABLE,
                "lifecycle not available",
            )
                .into_response()
        }
    };

    let (tx, mut rx) = mpsc::channel::<LifecycleEvent>(16);
    let id = lifecycle.on(move |event| {
        // A slow client loses intermediate frames, never blocks the emitter.
        let _ = tx.try_send(event.clone());
    });
    let guard = ListenerGuard {
        lifecycle: Arc::clone(&lifecycle),
        id,
    };

    let initial = LifecycleEvent {
        state: lifecycle.state(),
        error: lifecycle.last_error(),
        timestamp: now_millis(),
    };

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(async_stream::stream! {
            let _guard = guard;
            yield Ok(status_frame(&initial));
            let mut ping = tokio::time::interval(PING_INTERVAL);
            ping.tick().await; // consume the immediate first tick
            loop {
                let frame = tokio::select! {
                    maybe = rx.recv() => maybe.map(|event| status_frame(&event)),
                    _ = ping.tick() => Some(Event::default().event("ping").data("{}")),
                };
                match frame {
                    Some(f) => yield Ok(f),
                    None => break,
                }
            }
        });

    Sse::new(stream).into_response()
}
