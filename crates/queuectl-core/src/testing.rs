//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::{QueueError, Result};
use crate::executor::{CommandExecutor, ExecOutcome};
use crate::queue::{MemoryMedium, QueueSnapshot, SnapshotMedium};

/// Executor that replays a fixed script of outcomes, then repeats a fallback.
///
/// Commands `exit 0` / `exit N` are interpreted directly when no script is
/// set, so engine tests read like the shell scenarios they model.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<bool>>,
    calls: AtomicUsize,
    commands: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::with_script(Vec::new())
    }

    pub fn with_script(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn execute(&self, command: &str) -> ExecOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.commands.lock().unwrap().push(command.to_string());
        // let other workers interleave, as a real child process would
        tokio::task::yield_now().await;

        let scripted = self.script.lock().unwrap().pop_front();
        let success = scripted.unwrap_or_else(|| command.trim() == "exit 0");
        if success {
            ExecOutcome::success("ok")
        } else {
            ExecOutcome::failure(format!("`{command}` failed"))
        }
    }
}

/// Memory medium whose saves can be made to fail, and which counts how many
/// times each job state was persisted.
#[derive(Default)]
pub struct FlakyMedium {
    inner: MemoryMedium,
    fail_saves: AtomicBool,
    fail_after: Mutex<Option<usize>>,
    saves: Mutex<Vec<QueueSnapshot>>,
}

impl FlakyMedium {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Let `n` more saves succeed, then fail every save after.
    pub fn fail_after(&self, n: usize) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    /// Every snapshot successfully saved, oldest first.
    pub fn history(&self) -> Vec<QueueSnapshot> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl SnapshotMedium for FlakyMedium {
    async fn load(&self) -> Result<QueueSnapshot> {
        self.inner.load().await
    }

    async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let budget_spent = {
            let mut left = self.fail_after.lock().unwrap();
            match left.as_mut() {
                Some(0) => true,
                Some(n) => {
                    *n -= 1;
                    false
                }
                None => false,
            }
        };
        if budget_spent || self.fail_saves.load(Ordering::SeqCst) {
            return Err(QueueError::Persistence("injected save failure".to_string()));
        }
        self.inner.save(snapshot).await?;
        self.saves.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}
