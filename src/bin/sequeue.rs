//! sequeue CLI: operator interface to a sequential work queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use sequeue::codec::JsonCodec;
use sequeue::config::{Config, QueueConfig};
use sequeue::queue::SequentialWorkQueue;
use sequeue::store::RedisStore;
use sequeue::telemetry::{TelemetryConfig, init_telemetry};
use sequeue::worker::{Worker, WorkerConfig};
use tracing::info;

type JsonQueue = SequentialWorkQueue<RedisStore, serde_json::Value, JsonCodec<serde_json::Value>>;

#[derive(Parser)]
#[command(name = "sequeue", about = "Per-key ordered work queue")]
struct Cli {
    /// TOML file with a [queue] table; defaults come from the environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Append an item to an id's backlog
    Enqueue {
        /// Work item id (items with the same id are processed in order)
        id: String,
        /// JSON payload
        payload: String,
    },
    /// Run a worker that logs each item it processes
    Work {
        /// Maximum items per dequeue
        #[arg(long, default_value_t = 10)]
        batch_size: usize,
        /// Idle poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        poll_ms: u64,
    },
    /// Reclaim ids whose leases have gone stale
    Harvest,
    /// Show backlog, pending and leased ids
    Stats {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "sequeue".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let queue_config = match &cli.config {
        Some(path) => QueueConfig::from_file(path)?,
        None => QueueConfig::with_namespace(config.namespace.clone()),
    };
    let store = Arc::new(RedisStore::connect(
        config.redis_url.expose_secret(),
        config.pool_size,
    )?);
    store.health_check().await?;
    let queue: JsonQueue = SequentialWorkQueue::new(store, JsonCodec::new(), queue_config);

    match cli.command {
        Command::Enqueue { id, payload } => cmd_enqueue(&queue, &id, &payload).await,
        Command::Work { batch_size, poll_ms } => cmd_work(queue, batch_size, poll_ms).await,
        Command::Harvest => cmd_harvest(&queue).await,
        Command::Stats { json } => cmd_stats(&queue, json).await,
    }
}

async fn cmd_enqueue(queue: &JsonQueue, id: &str, payload: &str) -> anyhow::Result<()> {
    let item: serde_json::Value = serde_json::from_str(payload)?;
    queue.enqueue(id, &item).await?;
    println!("Enqueued 1 item for {id} (backlog: {})", queue.item_count(id).await?);
    Ok(())
}

async fn cmd_work(queue: JsonQueue, batch_size: usize, poll_ms: u64) -> anyhow::Result<()> {
    let worker = Worker::new(
        queue.clone(),
        WorkerConfig {
            batch_size,
            poll_interval: Duration::from_millis(poll_ms),
            harvest_interval: Duration::from_millis(queue.config().harvest_interval_ms),
        },
    );

    let stopper = worker.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        stopper.shutdown();
    });

    worker
        .run(|id: String, item: serde_json::Value| async move {
            info!(id, %item, "processed");
            Ok::<_, anyhow::Error>(())
        })
        .await?;
    println!("Processed {} item(s)", worker.processed());
    Ok(())
}

async fn cmd_harvest(queue: &JsonQueue) -> anyhow::Result<()> {
    if queue.harvest_zombies().await? {
        println!("Reclaimed stale leases.");
    } else {
        println!("No stale leases.");
    }
    Ok(())
}

async fn cmd_stats(queue: &JsonQueue, json: bool) -> anyhow::Result<()> {
    let stats = queue.stats().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Queue:    {}", stats.namespace);
    println!("Pending:  {}", stats.pending);
    println!("Leased:   {}", stats.leased.len());
    if stats.backlog.is_empty() {
        println!("\nBacklog is empty.");
        return Ok(());
    }

    println!("\n{:<40}  {:>8}  STATE", "ID", "ITEMS");
    println!("{}", "-".repeat(60));
    for entry in &stats.backlog {
        let id: String = entry.id.chars().take(40).collect();
        match entry.backlog() {
            Some(count) => println!("{id:<40}  {count:>8}  backlogged"),
            None => println!("{id:<40}  {:>8}  claimed", "-"),
        }
    }
    println!("\n{} id(s)", stats.backlog.len());
    Ok(())
}
