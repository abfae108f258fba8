//! queuectl-core
//!
//! Durable background job queue: shell commands are enqueued into a
//! persisted store, run by a pool of workers, retried with exponential
//! backoff, and parked in a dead-letter set once their retry budget is spent.
//!
//! # モジュール構成
//! - **domain**: ジョブのモデル（ids, state, job record, decision）
//! - **queue**: JobStore trait、スナップショット永続化、バックオフ
//! - **executor**: コマンド実行（CommandExecutor, ShellExecutor）
//! - **engine**: 1 ジョブの retry ループ（RetryEngine）
//! - **worker**: ワーカープールと協調的シャットダウン
//! - **config**: 設定ファイル + 環境変数
//! - **observability**: tracing 初期化、状態別カウント

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod executor;
pub mod observability;
pub mod queue;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::QueueConfig;
pub use domain::{JobId, JobRecord, JobState};
pub use engine::{Disposition, JobRun, RetryEngine};
pub use error::{QueueError, Result};
pub use executor::{CommandExecutor, ExecOutcome, ShellExecutor};
pub use observability::{LogFormat, QueueCounts, init_tracing};
pub use queue::{BackoffPolicy, JobStore, JsonFileStore};
pub use worker::{PoolReport, ShutdownHandle, WorkerPool};
