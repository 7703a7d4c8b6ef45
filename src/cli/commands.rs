//! CLI command definitions for delayq.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::metrics::{export_metrics, init_metrics};
use crate::queue::{
    handler_fn, DelayQueue, DelayQueueConfig, RedisTaskStore, TaskContext, TaskId, TaskStore,
};

/// Default Redis connection URL.
const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default queue name (key prefix).
const DEFAULT_QUEUE: &str = "delayq";

/// Redis-backed delay queue.
#[derive(Parser, Debug)]
#[command(name = "delayq")]
#[command(about = "Schedule payloads for later and dispatch them from Redis")]
#[command(version)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// Redis connection URL.
    #[arg(long, env = "DELAYQ_REDIS_URL", default_value = DEFAULT_REDIS_URL, global = true)]
    pub redis_url: String,

    /// Queue name, used as the Redis key prefix.
    #[arg(short, long, env = "DELAYQ_QUEUE", default_value = DEFAULT_QUEUE, global = true)]
    pub queue: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Schedule a JSON payload to run after a delay.
    Add(AddArgs),

    /// Poll the queue and log each due payload until Ctrl-C.
    Run(RunArgs),

    /// Show how many tasks are scheduled and stored.
    Stats,

    /// List payloads that are no longer scheduled (failed or timed-out tasks).
    Orphans,

    /// Put an orphaned task back on the schedule.
    Requeue(RequeueArgs),
}

/// Arguments for `delayq add`.
#[derive(Parser, Debug)]
pub struct AddArgs {
    /// JSON payload. Anything that does not parse as JSON is sent as a string.
    #[arg(short, long)]
    pub payload: String,

    /// Delay in seconds before the task becomes due.
    #[arg(short, long, default_value = "0")]
    pub delay: u64,
}

/// Arguments for `delayq run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Maximum number of payloads handled at once.
    #[arg(short, long, default_value = "10")]
    pub concurrency: usize,

    /// Poll interval in milliseconds.
    #[arg(long, default_value = "1000")]
    pub poll_ms: u64,

    /// Handler timeout in seconds (unbounded when omitted).
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Print Prometheus metrics on exit.
    #[arg(long)]
    pub metrics: bool,
}

/// Arguments for `delayq requeue`.
#[derive(Parser, Debug)]
pub struct RequeueArgs {
    /// Task id to requeue.
    #[arg(long)]
    pub id: String,

    /// Delay in seconds before the task becomes due again.
    #[arg(short, long, default_value = "0")]
    pub delay: u64,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Runs the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Add(ref args) => run_add(&cli, args).await,
        Commands::Run(ref args) => run_worker(&cli, args).await,
        Commands::Stats => run_stats(&cli).await,
        Commands::Orphans => run_orphans(&cli).await,
        Commands::Requeue(ref args) => run_requeue(&cli, args).await,
    }
}

async fn connect_queue(cli: &Cli, config: DelayQueueConfig) -> anyhow::Result<DelayQueue> {
    let store = RedisTaskStore::connect(&cli.redis_url, &cli.queue)
        .await
        .with_context(|| format!("connecting to {}", cli.redis_url))?;
    let store: Arc<dyn TaskStore> = Arc::new(store);
    Ok(DelayQueue::new(store, config)?)
}

fn parse_payload(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

async fn run_add(cli: &Cli, args: &AddArgs) -> anyhow::Result<()> {
    let queue = connect_queue(cli, DelayQueueConfig::new(&cli.queue)).await?;
    let payload = parse_payload(&args.payload);

    let id = queue
        .add(&payload, Duration::from_secs(args.delay))
        .await
        .context("enqueueing task")?;

    println!("{}", id);
    Ok(())
}

async fn run_worker(cli: &Cli, args: &RunArgs) -> anyhow::Result<()> {
    if args.metrics {
        init_metrics().context("initializing metrics")?;
    }

    let mut config = DelayQueueConfig::new(&cli.queue)
        .with_concurrency(args.concurrency)
        .with_poll_interval(Duration::from_millis(args.poll_ms));
    if let Some(secs) = args.timeout_secs {
        config = config.with_handler_timeout(Duration::from_secs(secs));
    }

    let mut queue = connect_queue(cli, config).await?;

    queue.start(Arc::new(handler_fn(
        |ctx: TaskContext, payload: Vec<u8>| async move {
            info!(
                queue = ctx.queue_name(),
                task_id = %ctx.task_id(),
                payload = %String::from_utf8_lossy(&payload),
                "Task due"
            );
            Ok(())
        },
    )))?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Shutdown requested");
    queue.stop().await?;

    let stats = queue.stats();
    println!(
        "claimed={} completed={} failed={} timed_out={} claim_errors={} peak_in_flight={}",
        stats.claimed,
        stats.completed,
        stats.failed,
        stats.timed_out,
        stats.claim_errors,
        stats.peak_in_flight
    );

    if args.metrics {
        print!("{}", export_metrics());
    }

    Ok(())
}

async fn run_stats(cli: &Cli) -> anyhow::Result<()> {
    let queue = connect_queue(cli, DelayQueueConfig::new(&cli.queue)).await?;
    let (pending, payloads) = tokio::try_join!(queue.pending_count(), queue.payload_count())?;

    println!("queue:    {}", queue.queue_name());
    println!("pending:  {}", pending);
    println!("payloads: {}", payloads);
    Ok(())
}

async fn run_orphans(cli: &Cli) -> anyhow::Result<()> {
    let queue = connect_queue(cli, DelayQueueConfig::new(&cli.queue)).await?;
    for id in queue.orphaned_ids().await? {
        println!("{}", id);
    }
    Ok(())
}

async fn run_requeue(cli: &Cli, args: &RequeueArgs) -> anyhow::Result<()> {
    let queue = connect_queue(cli, DelayQueueConfig::new(&cli.queue)).await?;
    let id = TaskId::from(args.id.as_str());
    queue
        .requeue(&id, Duration::from_secs(args.delay))
        .await?;
    println!("requeued {}", id);
    Ok(())
}
