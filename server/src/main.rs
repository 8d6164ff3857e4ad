//! mnemod binary — thin CLI shell over the [`mnemo_server`] library crate.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use mnemo_server::bus::EventBus;
use mnemo_server::chunker::{ChunkOptions, ChunkerRegistry};
use mnemo_server::config::DaemonConfig;
use mnemo_server::db;
use mnemo_server::dpq::PersistenceQueue;
use mnemo_server::drain::{DrainConfig, DrainWorker};
use mnemo_server::graph::{GraphStore, MemoryGraph};
use mnemo_server::pipeline::Pipeline;
use mnemo_server::queue::WorkQueue;
use mnemo_server::registry::Registry;
use mnemo_server::types::{Event, PathConfig};
use mnemo_server::watch;

// ---------------------------------------------------------------------------
// CLI definition (clap derive)
// ---------------------------------------------------------------------------

/// File-indexing daemon: watches directories, analyzes files, and persists a
/// knowledge graph with durable buffering across graph outages.
#[derive(Parser)]
#[command(name = "mnemod", version, about, long_about = None)]
struct Cli {
    /// Directory to index (repeatable; default: current directory)
    #[arg(long = "root")]
    roots: Vec<PathBuf>,

    /// Load settings from a TOML config file (default: ./mnemo.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// SQLite database path (registry + durable queue)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Worker count override
    #[arg(long)]
    workers: Option<usize>,

    /// Work queue capacity override
    #[arg(long)]
    capacity: Option<usize>,

    /// Route images through the semantic provider
    #[arg(long)]
    use_vision: bool,

    /// Graph endpoint to announce on connect (served by the in-process
    /// graph until a remote client is configured)
    #[arg(long)]
    graph_endpoint: Option<String>,

    /// Disable semantic analysis
    #[arg(long)]
    no_semantic: bool,

    /// Skip the initial discovery walk (watch only)
    #[arg(long)]
    no_discover: bool,
}

// ---------------------------------------------------------------------------
// Graceful shutdown signal
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mnemod=info".parse().unwrap())
                .add_directive("mnemo_server=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Config file, then CLI overrides.
    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("mnemo.toml"));
    let mut config = DaemonConfig::load(&config_path);
    if !cli.roots.is_empty() {
        config.roots = cli.roots.clone();
    }
    if config.roots.is_empty() {
        config.roots = vec![std::env::current_dir().unwrap_or_else(|_| {
            error!("Could not determine current directory. Use --root <path>");
            std::process::exit(1);
        })];
    }
    if let Some(db_path) = cli.db {
        config.db_path = db_path;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(capacity) = cli.capacity {
        config.queue_capacity = capacity;
    }
    if cli.use_vision {
        config.use_vision = true;
    }

    let roots: Vec<PathBuf> = config
        .roots
        .iter()
        .map(|r| {
            r.canonicalize().unwrap_or_else(|e| {
                error!(root = %r.display(), error = %e, "Root not found");
                std::process::exit(1);
            })
        })
        .collect();

    // Storage: one SQLite connection shared by the registry and the queue.
    let database = db::open(&config.db_path).unwrap_or_else(|e| {
        error!(path = %config.db_path.display(), error = %e, "Could not open database");
        std::process::exit(1);
    });
    let registry = Registry::new(database.clone());
    let dpq = PersistenceQueue::new(database);

    // Remember every root so per-path config resolution finds it.
    let path_config = PathConfig { use_vision: config.use_vision };
    for root in &roots {
        if let Err(err) = registry.remember_path(&root.to_string_lossy(), &path_config) {
            warn!(root = %root.display(), error = %err, "could not remember root");
        }
    }

    let bus = EventBus::new();

    // Remote graph transports are not wired here yet; the in-process memory
    // graph serves the endpoint marker and keeps the persistence path live.
    let graph: Arc<dyn GraphStore> = Arc::new(match &cli.graph_endpoint {
        Some(endpoint) => MemoryGraph::with_endpoint(true, endpoint.clone()),
        None => MemoryGraph::new(true),
    });
    info!(endpoint = graph.endpoint(), "graph store ready");

    // Providers are optional; absent providers mean metadata + chunks only.
    // --no-semantic forces the stage off even once a provider is wired in.
    let semantic: Option<Arc<dyn mnemo_server::semantic::SemanticProvider>> = None;
    let semantic = if cli.no_semantic {
        info!("semantic analysis disabled");
        None
    } else {
        semantic
    };

    let pipeline = Pipeline {
        registry: registry.clone(),
        chunkers: ChunkerRegistry::standard(),
        semantic,
        embeddings: None,
        tokenizer: mnemo_core::create_tokenizer("bytes-estimate"),
        bus: bus.clone(),
        chunk_options: ChunkOptions {
            max_chunk_size: config.max_chunk_size,
            ..ChunkOptions::default()
        },
        analysis_version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let queue = Arc::new(WorkQueue::new(
        config.queue_config(),
        pipeline,
        Arc::clone(&graph),
        dpq.clone(),
        bus.clone(),
    ));
    queue.start();

    let drain = DrainWorker::new(Arc::clone(&graph), dpq, DrainConfig::default(), None);
    let drain_listener = drain.start(&bus);
    bus.publish(Event::GraphConnected { endpoint: graph.endpoint() });

    if !cli.no_discover {
        for root in &roots {
            let count = watch::discover(root, &bus);
            let _ = registry.touch_walk(&root.to_string_lossy());
            info!(root = %root.display(), files = count, "initial discovery queued");
        }
    }

    let _watcher = watch::start_watcher(&roots, bus.clone());

    shutdown_signal().await;

    queue.stop(Duration::from_secs(config.stop_deadline_secs)).await;
    drain.stop();
    let _ = drain_listener.await;
    info!("mnemod stopped");
}
