//! Cold start: a fresh database file reaches the current schema version and
//! the whole stack comes up through the lifecycle.

use std::sync::{Arc, Mutex};

use teleton::bridge::{Bridge, InProcessBridge};
use teleton::llm::MockLlm;
use teleton::runtime::{AgentRuntime, RuntimeConfig};
use teleton::tools::{ToolIndex, ToolRegistry};
use teleton::{Lifecycle, LifecycleState, MemorySystem, Store, Supervisor};

#[tokio::test]
async fn fresh_db_file_migrates_to_current_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let store = Store::open(&path).unwrap();
    store.migrate().unwrap();
    assert_eq!(store.schema_version().unwrap().as_deref(), Some("1.10.1"));
    store.ensure_vector_tables(8).unwrap();

    // Reopen: everything idempotent, version unchanged.
    drop(store);
    let store = Store::open(&path).unwrap();
    store.migrate().unwrap();
    store.ensure_vector_tables(8).unwrap();
    assert_eq!(store.schema_version().unwrap().as_deref(), Some("1.10.1"));
}

#[tokio::test]
async fn vector_dims_change_drops_and_recreates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("memory.db");
    let store = Store::open(&path).unwrap();
    store.migrate().unwrap();
    store.ensure_vector_tables(8).unwrap();

    // Insert a chunk with an embedding under the old dimension.
    let id = store
        .insert_knowledge(
            teleton::KnowledgeSource::Memory,
            None,
            "dim change survivor".into(),
            "hash-dims".into(),
            None,
        )
        .await
        .unwrap()
        .unwrap();
    store
        .set_knowledge_embeddings(vec![(id, vec![0.0; 8])])
        .await
        .unwrap();

    // Dimension change: tables rebuilt, embeddings cleared, text intact.
    store.ensure_vector_tables(16).unwrap();
    let hits = store
        .knowledge_vector_search(vec![0.0; 16], 5)
        .await
        .unwrap();
    assert!(hits.is_empty());
    let chunks = store.get_knowledge_chunks(vec![id]).await.unwrap();
    assert_eq!(chunks[0].text, "dim change survivor");
}

#[tokio::test]
async fn lifecycle_listener_sees_both_transitions_in_order() {
    let store = Store::open_in_memory().unwrap();
    store.migrate().unwrap();
    store.ensure_vector_tables(8).unwrap();
    let registry = Arc::new(ToolRegistry::new(store.clone()));
    let index = Arc::new(ToolIndex::new(store.clone(), None));
    let memory = Arc::new(MemorySystem::new(
        store.clone(),
        None,
        std::env::temp_dir().join("teleton-cold-start-test"),
    ));
    let (bridge, _out) = InProcessBridge::new();
    let bridge: Arc<dyn Bridge> = Arc::new(bridge);
    let runtime = Arc::new(AgentRuntime::new(
        store.clone(),
        Arc::new(MockLlm::with_text("ok")),
        Arc::clone(&registry),
        Arc::clone(&index),
        Arc::clone(&memory),
        Arc::clone(&bridge),
        RuntimeConfig::default(),
    ));
    let supervisor = Supervisor::new(store, bridge, runtime, registry, index, memory);
    let lifecycle = Lifecycle::new();
    supervisor.install(&lifecycle).unwrap();

    // Subscribe before start, like an SSE client connected early.
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    lifecycle.on(move |e| sink.lock().unwrap().push(e.state));

    lifecycle.start().await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Running);
    lifecycle.stop().await.unwrap();

    let states = seen.lock().unwrap().clone();
    assert_eq!(
        states,
        vec![
            LifecycleState::Starting,
            LifecycleState::Running,
            LifecycleState::Stopping,
            LifecycleState::Stopped,
        ]
    );
}
