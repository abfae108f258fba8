//! queuectl - enqueue shell commands, run them with workers, inspect the DLQ.
//!
//! # Commands
//!
//! - `queuectl enqueue <command>` - add a pending job
//! - `queuectl list [--state S]` - list active jobs in one state
//! - `queuectl run` - process the pending jobs with a worker pool
//! - `queuectl status` - per-state counts
//! - `queuectl dlq-list` - list dead-lettered jobs
//! - `queuectl dlq-retry <id>` - move a dead job back to pending

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use queuectl_core::queue::Container;
use queuectl_core::{
    JobId, JobRecord, JobState, JobStore, JsonFileStore, LogFormat, QueueConfig, QueueError,
    RetryEngine, ShellExecutor, WorkerPool, init_tracing,
};

#[derive(Parser)]
#[command(name = "queuectl")]
#[command(version)]
#[command(about = "Durable background job queue with retries and a dead-letter set")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config file (defaults to ./config.json when present)
    #[arg(long, global = true, env = "QUEUECTL_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a pending job
    Enqueue(EnqueueArgs),

    /// List active jobs in one state
    List {
        #[arg(long, default_value = "pending")]
        state: JobState,
    },

    /// Process pending jobs until each completes or is dead-lettered
    Run(RunArgs),

    /// Show per-state counts and the DLQ size
    Status,

    /// List dead-lettered jobs
    DlqList,

    /// Move a dead-lettered job back to pending with zero attempts
    DlqRetry { id: JobId },
}

#[derive(Args)]
struct EnqueueArgs {
    /// Shell command to run
    command: String,

    /// Attempt budget (defaults to `default_max_retries` from config)
    #[arg(long)]
    max_retries: Option<u32>,
}

#[derive(Args)]
struct RunArgs {
    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Backoff base
    #[arg(long)]
    base: Option<u32>,

    /// Also resume failed jobs that still have attempts left
    #[arg(long)]
    include_failed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });

    let mut config = QueueConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Commands::Run(args) = &cli.command {
        if let Some(workers) = args.workers {
            config.workers = workers;
        }
        if let Some(base) = args.base {
            config.default_backoff_base = base;
        }
    }
    config.validate()?;

    let store = Arc::new(
        JsonFileStore::open(&config.queue_file)
            .with_context(|| format!("opening {}", config.queue_file.display()))?,
    );

    match cli.command {
        Commands::Enqueue(args) => {
            let max_retries = args.max_retries.unwrap_or(config.default_max_retries);
            let job = JobRecord::new(args.command, max_retries);
            let id = job.id();
            store.enqueue(job).await?;
            println!("{id}");
        }
        Commands::List { state } => {
            for job in store.list_by_state(state).await? {
                print_job(&job);
            }
        }
        Commands::Run(args) => {
            let executor = ShellExecutor::new().with_timeout(config.command_timeout());
            let engine = RetryEngine::new(store, Arc::new(executor), config.backoff_policy());
            let pool = WorkerPool::new(config.workers, Arc::new(engine))?;

            let handle = pool.shutdown_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("interrupt received, finishing current attempts");
                    handle.request_shutdown();
                }
            });

            let report = pool.run_snapshot(args.include_failed).await?;
            println!(
                "completed: {}  dead: {}  interrupted: {}  skipped: {}  not started: {}",
                report.completed().len(),
                report.dead().len(),
                report.interrupted().len(),
                report.skipped.len(),
                report.not_started.len(),
            );
            if !report.faults.is_empty() {
                for fault in &report.faults {
                    eprintln!("worker {} halted: {}", fault.worker_id, fault.error);
                }
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Status => {
            let counts = store.counts().await?;
            println!("pending:    {}", counts.pending);
            println!("processing: {}", counts.processing);
            println!("completed:  {}", counts.completed);
            println!("failed:     {}", counts.failed);
            println!("dead (DLQ): {}", counts.dead);
            println!("total:      {}", counts.total());
        }
        Commands::DlqList => {
            for job in store.list_dead().await? {
                print_job(&job);
            }
        }
        Commands::DlqRetry { id } => match store.revive(id).await {
            Ok(job) => println!("{} revived", job.id()),
            Err(QueueError::NotFound {
                container: Container::DeadLetter,
                ..
            }) => {
                eprintln!("{id} not found in DLQ");
                return Ok(ExitCode::FAILURE);
            }
            Err(e) => return Err(e.into()),
        },
    }
    Ok(ExitCode::SUCCESS)
}

fn print_job(job: &JobRecord) {
    println!(
        "{} | {} | {} | {}",
        job.id(),
        job.command(),
        job.state(),
        job.attempts()
    );
}
