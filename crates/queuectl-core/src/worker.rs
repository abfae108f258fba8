use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};

use crate::domain::{JobId, JobRecord, JobState};
use crate::engine::{Disposition, JobRun, RetryEngine};
use crate::error::{QueueError, Result};

/// Requests a cooperative stop of a running pool.
///
/// Workers finish their current attempt and backoff sleep, then stop taking
/// jobs.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn request_shutdown(&self) {
        // send_replace stores the value even when no worker is subscribed yet
        self.tx.send_replace(true);
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A job a worker gave up on without running it to the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedJob {
    pub job_id: JobId,
    pub reason: String,
}

/// A worker that halted on a persistence fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerFault {
    pub worker_id: usize,
    pub job_id: Option<JobId>,
    pub error: String,
}

/// Outcome of one pool run.
#[derive(Debug, Clone, Default)]
pub struct PoolReport {
    pub runs: Vec<JobRun>,
    /// Refused by the store (already claimed, moved, or not found).
    pub skipped: Vec<SkippedJob>,
    pub faults: Vec<WorkerFault>,
    /// Never handed to a worker: shutdown was requested or every worker halted.
    pub not_started: Vec<JobId>,
}

impl PoolReport {
    fn with(&self, disposition: Disposition) -> Vec<JobId> {
        self.runs
            .iter()
            .filter(|r| r.disposition == disposition)
            .map(|r| r.job_id)
            .collect()
    }

    pub fn completed(&self) -> Vec<JobId> {
        self.with(Disposition::Completed)
    }

    pub fn dead(&self) -> Vec<JobId> {
        self.with(Disposition::Dead)
    }

    pub fn interrupted(&self) -> Vec<JobId> {
        self.with(Disposition::Interrupted)
    }

    /// Jobs the pool was given, whatever became of them.
    pub fn accounted(&self) -> usize {
        let faulted = self.faults.iter().filter(|f| f.job_id.is_some()).count();
        self.runs.len() + self.skipped.len() + faulted + self.not_started.len()
    }

    fn merge(&mut self, worker: WorkerReport) {
        self.runs.extend(worker.runs);
        self.skipped.extend(worker.skipped);
        self.faults.extend(worker.fault);
    }
}

#[derive(Default)]
struct WorkerReport {
    runs: Vec<JobRun>,
    skipped: Vec<SkippedJob>,
    fault: Option<WorkerFault>,
}

type JobQueue = Arc<Mutex<mpsc::UnboundedReceiver<JobRecord>>>;

/// Fixed-size pool of workers, each running the retry engine on one job at
/// a time.
///
/// A run processes the job list it was given (one snapshot); jobs enqueued
/// after the run started wait for the next run.
pub struct WorkerPool {
    workers: usize,
    engine: Arc<RetryEngine>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl WorkerPool {
    pub fn new(workers: usize, engine: Arc<RetryEngine>) -> Result<Self> {
        if workers == 0 {
            return Err(QueueError::Config("worker count must be at least 1".to_string()));
        }
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            workers,
            engine,
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Take the store's current pending jobs (plus failed jobs with budget
    /// left when `include_failed` is set) and run them.
    pub async fn run_snapshot(&self, include_failed: bool) -> Result<PoolReport> {
        let store = self.engine.store();
        let mut jobs = store.claim_next(JobState::Pending).await?;
        if include_failed {
            jobs.extend(
                store
                    .claim_next(JobState::Failed)
                    .await?
                    .into_iter()
                    .filter(|j| !j.is_exhausted()),
            );
        }
        Ok(self.run(jobs).await)
    }

    /// Process `jobs` with up to `workers` concurrent engine runs.
    ///
    /// Each job goes to exactly one worker. With one worker the jobs run
    /// sequentially in the given order.
    pub async fn run(&self, jobs: Vec<JobRecord>) -> PoolReport {
        tracing::info!(workers = self.workers, jobs = jobs.len(), "starting worker pool");

        let (tx, rx) = mpsc::unbounded_channel();
        for job in jobs {
            // receiver is alive until the end of this function
            let _ = tx.send(job);
        }
        drop(tx);
        let queue: JobQueue = Arc::new(Mutex::new(rx));

        let mut joins = Vec::with_capacity(self.workers);
        for worker_id in 0..self.workers {
            let engine = Arc::clone(&self.engine);
            let queue = Arc::clone(&queue);
            let stop = self.shutdown_tx.subscribe();
            joins.push(tokio::spawn(worker_loop(worker_id, engine, queue, stop)));
        }

        let mut report = PoolReport::default();
        for (worker_id, join) in joins.into_iter().enumerate() {
            match join.await {
                Ok(worker) => report.merge(worker),
                Err(e) => report.faults.push(WorkerFault {
                    worker_id,
                    job_id: None,
                    error: format!("worker task ended abnormally: {e}"),
                }),
            }
        }

        let mut rx = queue.lock().await;
        while let Ok(job) = rx.try_recv() {
            report.not_started.push(job.id());
        }

        tracing::info!(
            completed = report.completed().len(),
            dead = report.dead().len(),
            interrupted = report.interrupted().len(),
            skipped = report.skipped.len(),
            faults = report.faults.len(),
            not_started = report.not_started.len(),
            "worker pool finished"
        );
        report
    }
}

async fn worker_loop(
    worker_id: usize,
    engine: Arc<RetryEngine>,
    queue: JobQueue,
    stop: watch::Receiver<bool>,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    loop {
        if *stop.borrow() {
            tracing::debug!(worker_id, "shutdown requested, worker exiting");
            break;
        }

        // the channel is filled before workers start, so recv never waits
        let Some(job) = queue.lock().await.recv().await else {
            break;
        };
        let job_id = job.id();

        match engine.run(job, &stop).await {
            Ok(run) => report.runs.push(run),
            Err(err) if err.is_fatal() => {
                tracing::error!(worker_id, job_id = %job_id, error = %err, "store fault, halting worker");
                report.fault = Some(WorkerFault {
                    worker_id,
                    job_id: Some(job_id),
                    error: err.to_string(),
                });
                break;
            }
            Err(err) => {
                tracing::warn!(worker_id, job_id = %job_id, error = %err, "job skipped");
                report.skipped.push(SkippedJob {
                    job_id,
                    reason: err.to_string(),
                });
            }
        }
    }
    report
}
