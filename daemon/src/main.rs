//! Teleton daemon: wires the store, bridge, runtime, cron and control plane
//! under one lifecycle, then waits for SIGINT.
//!
//! Exit codes: 0 normal shutdown, 1 fatal startup error, 2 invalid config.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use teleton::bridge::{Bridge, InProcessBridge};
use teleton::embedding::{CachedEmbedder, Embedder, OpenAIEmbedder};
use teleton::llm::ChatOpenAI;
use teleton::memory::MemorySystem;
use teleton::paths::AgentDirs;
use teleton::runtime::{AgentRuntime, RuntimeConfig};
use teleton::tools::{register_builtin_tools, ToolIndex, ToolRegistry};
use teleton::{Lifecycle, Store, Supervisor};
use teleton_config::AgentConfig;

const EXIT_FATAL: i32 = 1;
const EXIT_CONFIG: i32 = 2;

#[derive(Parser, Debug)]
#[command(name = "teleton", about = "Personal AI agent daemon")]
struct Args {
    /// Agent root directory (default ~/.teleton).
    #[arg(long, env = "TELETON_ROOT")]
    root: Option<PathBuf>,
}

fn init_tracing(dirs: &AgentDirs) -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(dirs.logs_dir(), "teleton.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new("info")),
        )
        .init();
    guard
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let root = args.root.unwrap_or_else(teleton_config::default_root);
    let dirs = AgentDirs::new(&root);
    if let Err(e) = dirs.ensure() {
        eprintln!("cannot create agent directory {}: {}", root.display(), e);
        std::process::exit(EXIT_FATAL);
    }
    let _log_guard = init_tracing(&dirs);

    let config = match AgentConfig::load(&root) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(EXIT_CONFIG);
        }
    };

    match run(dirs, config).await {
        Ok(()) => {
            info!("shutdown complete");
        }
        Err(e) => {
            error!(error = %e, "fatal startup error");
            std::process::exit(EXIT_FATAL);
        }
    }
}

async fn run(dirs: AgentDirs, config: AgentConfig) -> anyhow::Result<()> {
    let store = Store::open(dirs.db_path()).context("open database")?;
    store.migrate().context("run migrations")?;

    let openai_config = async_openai_config(&config);

    let embedder: Option<Arc<dyn Embedder>> = if config.api_key.is_some() {
        let inner: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::with_config(
            openai_config.clone(),
            config.embedding_model.clone(),
        ));
        Some(Arc::new(CachedEmbedder::new(inner, store.clone())))
    } else {
        warn!("no api key configured; semantic search runs keyword-only");
        None
    };
    if let Some(e) = &embedder {
        store
            .ensure_vector_tables(e.dimension())
            .context("vector tables")?;
    } else {
        store.ensure_vector_tables(1536).context("vector tables")?;
    }

    let registry = Arc::new(ToolRegistry::new(store.clone()));
    let index = Arc::new(ToolIndex::new(store.clone(), embedder.clone()));
    let memory = Arc::new(MemorySystem::new(
        store.clone(),
        embedder.clone(),
        dirs.memory_dir(),
    ));
    register_builtin_tools(&registry, &store, Arc::clone(&memory))
        .context("register built-in tools")?;

    let llm = Arc::new(ChatOpenAI::with_config(openai_config, config.model.clone()));
    let (bridge, mut outbound) = InProcessBridge::new();
    let bridge: Arc<dyn Bridge> = Arc::new(bridge);
    // Dev bridge: outbound replies land in the log until a platform client is
    // attached.
    tokio::spawn(async move {
        while let Some((chat_id, text)) = outbound.recv().await {
            info!(chat_id, %text, "outbound message");
        }
    });

    let runtime = Arc::new(AgentRuntime::new(
        store.clone(),
        llm,
        Arc::clone(&registry),
        Arc::clone(&index),
        Arc::clone(&memory),
        Arc::clone(&bridge),
        RuntimeConfig {
            max_iterations: config.max_agentic_iterations,
            owner_name: config.owner_name.clone(),
            ..Default::default()
        },
    ));

    let lifecycle = Arc::new(Lifecycle::new());
    let supervisor = Supervisor::new(
        store.clone(),
        bridge,
        runtime,
        Arc::clone(&registry),
        Arc::clone(&index),
        Arc::clone(&memory),
    );
    supervisor
        .install(&lifecycle)
        .context("install supervisor hooks")?;

    let webui_shutdown = CancellationToken::new();
    if config.webui.enabled {
        let token = config
            .webui
            .token
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!(
            "webui: http://{}:{}/?token={}",
            config.webui.host, config.webui.port, token
        );
        let state = Arc::new(webui::AppState {
            lifecycle: Some(Arc::clone(&lifecycle)),
            store: store.clone(),
            registry: Arc::clone(&registry),
            memory: Arc::clone(&memory),
            dirs: dirs.clone(),
            config: config.clone(),
            auth_token: token,
            sessions: std::sync::Mutex::new(Default::default()),
            dist_dir: None,
        });
        let host = config.webui.host.clone();
        let port = config.webui.port;
        let shutdown = webui_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = webui::run_webui(state, &host, port, shutdown).await {
                error!(error = %e, "webui server failed");
            }
        });
    }

    lifecycle.start().await.context("agent start")?;
    info!("agent running; press ctrl-c to stop");

    tokio::signal::ctrl_c().await.context("signal handler")?;
    info!("shutting down");
    webui_shutdown.cancel();
    lifecycle.stop().await.context("agent stop")?;
    Ok(())
}

fn async_openai_config(config: &AgentConfig) -> async_openai::config::OpenAIConfig {
    let mut c = async_openai::config::OpenAIConfig::new();
    if let Some(key) = &config.api_key {
        c = c.with_api_key(key.clone());
    }
    if let Some(base) = &config.base_url {
        c = c.with_api_base(base.clone());
    }
    c
}
