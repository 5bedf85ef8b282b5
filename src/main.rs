use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use jobalizer::config::{Config, QueueBackend};
use jobalizer::db::{create_pool, run_migrations, PostingStore, SqlitePostingStore};
use jobalizer::extraction::LlmExtractor;
use jobalizer::llm::OpenAIAdapter;
use jobalizer::notify::{self, NotificationHub, Notifier, RedisNotifier};
use jobalizer::queue::{MemoryQueue, RedisQueue, RetryPolicy, TaskQueue, WorkerContext, WorkerPool};
use jobalizer::routes::flash::FlashSigner;
use jobalizer::utils::init_logger;
use jobalizer::{create_router, AppState};

#[derive(Parser)]
#[command(name = "jobalizer", version, about = "Job posting intake and field extraction")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web front door (default)
    Serve {
        /// Also run the worker pool in this process
        #[arg(long)]
        with_workers: bool,
    },
    /// Run only the worker pool against the configured broker
    Worker,
    /// Apply database migrations and exit
    InitDb,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    let _log_guard = init_logger(&config);
    config.validate()?;
    info!(environment = ?config.environment, queue = ?config.queue.backend, "Configuration loaded");

    // Connect to database
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;

    let command = cli.command.unwrap_or(Command::Serve {
        with_workers: false,
    });

    if matches!(command, Command::InitDb) {
        info!("Database initialized");
        return Ok(());
    }

    let store: Arc<dyn PostingStore> = Arc::new(SqlitePostingStore::new(pool));
    let hub = NotificationHub::new();

    let queue: Arc<dyn TaskQueue> = match config.queue.backend {
        QueueBackend::Redis => Arc::new(RedisQueue::from_config(&config.queue).await?),
        QueueBackend::Memory => Arc::new(MemoryQueue::new(config.queue.poll_interval())),
    };

    let notifier: Arc<dyn Notifier> = match config.queue.backend {
        QueueBackend::Redis => Arc::new(RedisNotifier::connect(&config.queue.notify_url).await?),
        QueueBackend::Memory => Arc::new(hub.clone()),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    match command {
        Command::Worker => {
            if config.queue.backend == QueueBackend::Memory {
                bail!("the worker command needs QUEUE_BACKEND=redis; use `serve` for the in-memory queue");
            }
            let workers = worker_pool(&config, store, queue, notifier)?;
            workers.run(shutdown_rx).await;
        }
        Command::Serve { with_workers } => {
            let run_workers = with_workers || config.queue.backend == QueueBackend::Memory;
            let workers = if run_workers {
                let pool = worker_pool(&config, store.clone(), queue.clone(), notifier)?;
                Some(tokio::spawn(pool.run(shutdown_rx.clone())))
            } else {
                None
            };

            let relay = match config.queue.backend {
                QueueBackend::Redis => Some(notify::relay(&config.queue.notify_url, hub.clone())?),
                QueueBackend::Memory => None,
            };

            let state = AppState {
                store,
                queue,
                hub,
                flash: FlashSigner::new(&config.auth.secret_key)?,
            };
            let app = create_router(state);

            let addr = format!("{}:{}", config.server.host, config.server.port);
            let listener = TcpListener::bind(&addr).await?;
            info!("Server listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
                .await
                .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

            if let Some(relay) = relay {
                relay.abort();
            }
            if let Some(workers) = workers {
                if let Err(e) = workers.await {
                    error!(error = %e, "Worker pool terminated abnormally");
                }
            }
        }
        Command::InitDb => {}
    }

    info!("Shutdown complete");
    Ok(())
}

fn worker_pool(
    config: &Config,
    store: Arc<dyn PostingStore>,
    queue: Arc<dyn TaskQueue>,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<WorkerPool> {
    let adapter = Arc::new(OpenAIAdapter::from_config(&config.llm)?);
    let extractor = Arc::new(LlmExtractor::from_config(adapter, &config.llm));

    let ctx = WorkerContext {
        store,
        extractor,
        notifier,
        queue,
        retry: RetryPolicy::from_config(&config.queue),
    };

    Ok(WorkerPool::new(ctx, config.queue.worker_concurrency))
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
