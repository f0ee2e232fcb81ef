//! sourcelens worker binary
//!
//! Starts a pool of analysis workers over the configured queue and graph
//! store. Producers enqueue jobs from outside; this process only consumes.

use anyhow::Result;
use clap::Parser;
use sourcelens_core::cancel::CancelToken;
use sourcelens_core::parser::LanguageRegistry;
use sourcelens_core::store::{GraphStore, MemoryGraphStore};
use sourcelens_graph::{GraphConfig, Neo4jGraphStore};
use sourcelens_llm::LlmSettings;
use sourcelens_worker::{
    AnalysisWorker, InMemoryFindingStore, InMemoryJobQueue, InMemoryRequestStore, WorkerConfig,
};
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Graph backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum GraphBackend {
    /// In-process store (single-node deployments, testing)
    Memory,
    /// Neo4j over bolt, configured by NEO4J_* environment variables
    Neo4j,
}

/// sourcelens - code knowledge graph analysis worker
#[derive(Parser, Debug)]
#[command(name = "sourcelens-worker", version, about)]
struct Cli {
    /// Number of worker tasks (overrides MAX_ANALYSIS_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Graph store backend
    #[arg(long, value_enum, default_value = "neo4j")]
    graph: GraphBackend,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let mut config = WorkerConfig::from_env();
    if let Some(workers) = cli.workers {
        config.max_workers = workers;
    }
    info!(workers = config.max_workers, backend = ?cli.graph, "starting sourcelens");

    let graph: Arc<dyn GraphStore> = match cli.graph {
        GraphBackend::Memory => Arc::new(MemoryGraphStore::new()),
        GraphBackend::Neo4j => {
            let graph_config = GraphConfig::from_env()?;
            Arc::new(Neo4jGraphStore::connect(&graph_config).await?)
        }
    };

    let registry = Arc::new(LanguageRegistry::new());
    registry.register(sourcelens_lang_python::create_parser());
    for parser in sourcelens_lang_js::create_parsers() {
        registry.register(parser);
    }

    let queue = build_queue()?;
    let requests: Arc<dyn sourcelens_worker::RequestStore> = Arc::new(InMemoryRequestStore::new());
    let findings: Arc<dyn sourcelens_worker::FindingStore> = Arc::new(InMemoryFindingStore::new());
    let settings = LlmSettings::from_env();

    let cancel = CancelToken::new();
    // Each worker holds at most one job, so the pool size is also the
    // concurrent-analysis ceiling
    let pool_size = config.max_workers.min(config.max_concurrent_analyses);
    let mut handles = Vec::with_capacity(pool_size);
    for _ in 0..pool_size {
        let worker = AnalysisWorker::new(
            Arc::clone(&queue),
            Arc::clone(&requests),
            Arc::clone(&findings),
            Arc::clone(&graph),
            Arc::clone(&registry),
            settings.clone(),
            config.clone(),
        );
        let token = cancel.clone();
        handles.push(tokio::spawn(async move { worker.run(token).await }));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, draining workers");
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Kafka when compiled in and configured, in-memory otherwise
fn build_queue() -> Result<Arc<dyn sourcelens_worker::JobQueue>> {
    #[cfg(feature = "kafka")]
    if std::env::var("KAFKA_BROKERS").is_ok() {
        let kafka_config = sourcelens_worker::KafkaQueueConfig::from_env()?;
        info!(brokers = %kafka_config.brokers, topic = %kafka_config.topic, "using kafka queue");
        return Ok(Arc::new(sourcelens_worker::KafkaJobQueue::connect(
            &kafka_config,
        )?));
    }
    info!("using in-memory queue");
    Ok(Arc::new(InMemoryJobQueue::default()))
}

fn init_logging(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();
}
