//! End-to-end turns through the full stack: scheduler → runtime → registry →
//! mock LLM → in-process bridge.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use teleton::llm::{LlmResponse, MockLlm};
use teleton::message::ToolCall;
use teleton::runtime::{AgentRuntime, RuntimeConfig};
use teleton::scheduler::{SessionScheduler, TurnHandler};
use teleton::tools::{Tool, ToolCallContext, ToolError, ToolIndex, ToolRegistry, ToolSpec};
use teleton::{Bridge, InProcessBridge, InboundEvent, MemorySystem, Role, Store};

struct World {
    store: Store,
    llm: Arc<MockLlm>,
    runtime: Arc<AgentRuntime>,
    bridge: Arc<InProcessBridge>,
    out_rx: mpsc::Receiver<(i64, String)>,
    registry: Arc<ToolRegistry>,
}

async fn world(llm: MockLlm, tool_timeout: Option<Duration>) -> World {
    let store = Store::open_in_memory().unwrap();
    store.migrate().unwrap();
    store.ensure_vector_tables(8).unwrap();
    let mut registry = ToolRegistry::new(store.clone());
    if let Some(t) = tool_timeout {
        registry = registry.with_timeout(t);
    }
    let registry = Arc::new(registry);
    let index = Arc::new(ToolIndex::new(store.clone(), None));
    let memory = Arc::new(MemorySystem::new(
        store.clone(),
        None,
        std::env::temp_dir().join("teleton-agent-loop-test"),
    ));
    let (bridge, out_rx) = InProcessBridge::new();
    let bridge = Arc::new(bridge);
    let llm = Arc::new(llm);
    let runtime = Arc::new(AgentRuntime::new(
        store.clone(),
        Arc::clone(&llm) as Arc<dyn teleton::LlmClient>,
        Arc::clone(&registry),
        index,
        memory,
        Arc::clone(&bridge) as Arc<dyn Bridge>,
        RuntimeConfig::default(),
    ));
    World {
        store,
        llm,
        runtime,
        bridge,
        out_rx,
        registry,
    }
}

fn scheduler(runtime: Arc<AgentRuntime>) -> SessionScheduler {
    SessionScheduler::with_debounce(
        runtime as Arc<dyn TurnHandler>,
        CancellationToken::new(),
        Duration::from_millis(10),
        Duration::from_millis(40),
    )
}

/// Connects the bridge so replies can flow, without a pump (tests enqueue
/// directly).
async fn connect(bridge: &InProcessBridge) {
    let (tx, _rx) = mpsc::channel(8);
    bridge.connect(tx).await.unwrap();
    // Keep the receiver alive for the test duration by leaking it into a task.
    tokio::spawn(async move {
        let mut rx = _rx;
        while rx.recv().await.is_some() {}
    });
}

#[tokio::test]
async fn burst_of_five_becomes_one_turn_with_all_messages() {
    let mut w = world(MockLlm::with_text("got it"), None).await;
    connect(&w.bridge).await;
    let sched = scheduler(Arc::clone(&w.runtime));

    for i in 0..5 {
        sched.enqueue(InboundEvent::dm(1, "owner", format!("part {}", i)));
    }
    let (chat, reply) = tokio::time::timeout(Duration::from_secs(2), w.out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(chat, 1);
    assert_eq!(reply, "got it");

    // Exactly one LLM call, containing all five messages in order.
    assert_eq!(w.llm.call_count(), 1);
    let request = &w.llm.requests()[0];
    let users: Vec<&str> = request
        .messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.text.as_str())
        .collect();
    assert_eq!(users, vec!["part 0", "part 1", "part 2", "part 3", "part 4"]);
}

#[tokio::test]
async fn concurrent_chats_both_get_replies() {
    let mut w = world(MockLlm::with_text("hello"), None).await;
    connect(&w.bridge).await;
    let sched = scheduler(Arc::clone(&w.runtime));

    sched.enqueue(InboundEvent::dm(10, "a", "hi from ten"));
    sched.enqueue(InboundEvent::dm(20, "b", "hi from twenty"));

    let mut chats = Vec::new();
    for _ in 0..2 {
        let (chat, _) = tokio::time::timeout(Duration::from_secs(2), w.out_rx.recv())
            .await
            .unwrap()
            .unwrap();
        chats.push(chat);
    }
    chats.sort();
    assert_eq!(chats, vec![10, 20]);

    // No transcript interleaving: each chat has its own user + reply.
    for chat in [10, 20] {
        let msgs = w.store.recent_messages(chat, 10).await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[1].role, Role::Assistant);
    }
}

#[tokio::test]
async fn replies_are_persisted_in_input_order() {
    let mut w = world(
        MockLlm::with_script(vec![
            LlmResponse::text("first reply"),
            LlmResponse::text("second reply"),
        ]),
        None,
    )
    .await;
    connect(&w.bridge).await;
    let sched = scheduler(Arc::clone(&w.runtime));

    sched.enqueue(InboundEvent::dm(1, "owner", "first"));
    let (_, r1) = tokio::time::timeout(Duration::from_secs(2), w.out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    sched.enqueue(InboundEvent::dm(1, "owner", "second"));
    let (_, r2) = tokio::time::timeout(Duration::from_secs(2), w.out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(r1, "first reply");
    assert_eq!(r2, "second reply");

    let texts: Vec<String> = w
        .store
        .recent_messages(1, 10)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.text)
        .collect();
    assert_eq!(texts, vec!["first", "first reply", "second", "second reply"]);
}

struct SleepyTool;

#[async_trait]
impl Tool for SleepyTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec::new("sleepy", "sleeps far too long")
    }

    async fn call(
        &self,
        _args: serde_json::Value,
        _ctx: &ToolCallContext,
    ) -> Result<String, ToolError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok("done".into())
    }
}

#[tokio::test]
async fn tool_timeout_feeds_failure_back_and_loop_continues() {
    let llm = MockLlm::with_script(vec![
        LlmResponse {
            content: String::new(),
            tool_calls: vec![ToolCall {
                id: Some("c1".into()),
                name: "sleepy".into(),
                arguments: "{}".into(),
            }],
            usage: None,
        },
        LlmResponse::text("recovered"),
    ]);
    let mut w = world(llm, Some(Duration::from_millis(50))).await;
    w.registry.register(Arc::new(SleepyTool)).unwrap();
    connect(&w.bridge).await;
    let sched = scheduler(Arc::clone(&w.runtime));

    sched.enqueue(InboundEvent::dm(1, "owner", "try the slow tool"));
    let (_, reply) = tokio::time::timeout(Duration::from_secs(5), w.out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, "recovered");

    // The second LLM call saw the structured timeout failure as a tool entry.
    assert_eq!(w.llm.call_count(), 2);
    let msgs = w.store.recent_messages(1, 10).await.unwrap();
    let tool_msg = msgs.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.text.contains("timeout"), "{}", tool_msg.text);
}

#[tokio::test]
async fn cancelled_turn_keeps_user_input_and_sends_nothing() {
    let llm = MockLlm::with_script(vec![LlmResponse {
        content: "working on it".into(),
        tool_calls: vec![ToolCall {
            id: Some("c1".into()),
            name: "sleepy".into(),
            arguments: "{}".into(),
        }],
        usage: None,
    }]);
    let mut w = world(llm, Some(Duration::from_millis(200))).await;
    w.registry.register(Arc::new(SleepyTool)).unwrap();
    connect(&w.bridge).await;

    let cancel = CancellationToken::new();
    let runtime = Arc::clone(&w.runtime);
    let token = cancel.clone();
    let turn = tokio::spawn(async move {
        runtime
            .run_turn(1, vec![InboundEvent::dm(1, "owner", "do the thing")], token)
            .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();
    turn.await.unwrap();

    let msgs = w.store.recent_messages(1, 10).await.unwrap();
    // User input survives; the final assistant reply was never persisted, so
    // the transcript ends on the tool trace.
    assert!(msgs.iter().any(|m| m.role == Role::User));
    assert_eq!(msgs.last().unwrap().role, Role::Tool);
    // Nothing went out through the bridge.
    assert!(w.out_rx.try_recv().is_err());
}

#[tokio::test]
async fn iteration_cap_stops_runaway_tool_loops() {
    // The model asks for the same tool forever; the cap forces an answer.
    let mut responses = Vec::new();
    for _ in 0..10 {
        responses.push(LlmResponse {
            content: "thinking".into(),
            tool_calls: vec![ToolCall {
                id: None,
                name: "missing_tool".into(),
                arguments: "{}".into(),
            }],
            usage: None,
        });
    }
    let mut w = world(MockLlm::with_script(responses), None).await;
    connect(&w.bridge).await;
    let sched = scheduler(Arc::clone(&w.runtime));

    sched.enqueue(InboundEvent::dm(1, "owner", "loop forever"));
    let (_, _reply) = tokio::time::timeout(Duration::from_secs(5), w.out_rx.recv())
        .await
        .unwrap()
        .unwrap();
    // Default cap is 5 iterations.
    assert_eq!(w.llm.call_count(), 5);
}
