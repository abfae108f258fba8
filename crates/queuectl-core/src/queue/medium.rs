//! Backing media for the queue snapshot.

use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::QueueSnapshot;
use crate::error::{QueueError, Result};

/// Exclusive hold on a medium for one read-modify-write. Released on drop.
#[derive(Debug, Default)]
pub struct MediumLock {
    _file: Option<File>,
}

/// Where the full snapshot lives between operations.
///
/// Implementations only load and save whole documents. The caller takes
/// [`SnapshotMedium::lock`] and holds it across `load -> mutate -> save`, so
/// no two read-modify-write cycles on the same medium interleave, whichever
/// store or process they come from.
#[async_trait]
pub trait SnapshotMedium: Send + Sync {
    /// Media only one process can see need no lock beyond the store's own.
    async fn lock(&self) -> Result<MediumLock> {
        Ok(MediumLock::default())
    }

    async fn load(&self) -> Result<QueueSnapshot>;

    /// Must be durable when it returns `Ok`.
    async fn save(&self, snapshot: &QueueSnapshot) -> Result<()>;
}

/// Snapshot kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryMedium {
    snapshot: Mutex<QueueSnapshot>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotMedium for MemoryMedium {
    async fn load(&self) -> Result<QueueSnapshot> {
        Ok(self.snapshot.lock().await.clone())
    }

    async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        *self.snapshot.lock().await = snapshot.clone();
        Ok(())
    }
}

/// Snapshot stored as one JSON document: `{"jobs": [...], "dlq": [...]}`.
///
/// Writers serialize on an advisory lock over a sibling `<name>.lock` file,
/// which covers every process opening the same path. Saves go to a fresh
/// temp file in the same directory, are fsynced, then renamed over the
/// target, so readers see either the old or the new document.
#[derive(Debug, Clone)]
pub struct JsonFileMedium {
    path: PathBuf,
    lock_path: PathBuf,
    temp_prefix: OsString,
}

impl JsonFileMedium {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let Some(name) = path.file_name() else {
            return Err(QueueError::Config(format!(
                "queue file `{}` has no file name",
                path.display()
            )));
        };
        let mut lock_name = OsString::from(name);
        lock_name.push(".lock");
        let mut temp_prefix = OsString::from(".");
        temp_prefix.push(name);
        temp_prefix.push(".");
        Ok(Self {
            lock_path: path.with_file_name(lock_name),
            path,
            temp_prefix,
        })
    }

    fn dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[async_trait]
impl SnapshotMedium for JsonFileMedium {
    async fn lock(&self) -> Result<MediumLock> {
        let dir = self.dir();
        let lock_path = self.lock_path.clone();
        // File::lock blocks until every other holder lets go
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            std::fs::create_dir_all(&dir)?;
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&lock_path)?;
            file.lock()?;
            Ok(file)
        })
        .await
        .map_err(|e| QueueError::persistence("lock task", e))?
        .map_err(|e| QueueError::persistence(format_args!("lock {}", self.lock_path.display()), e))?;
        Ok(MediumLock { _file: Some(file) })
    }

    async fn load(&self) -> Result<QueueSnapshot> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            // first run: nothing persisted yet
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(QueueSnapshot::new()),
            Err(e) => {
                return Err(QueueError::persistence(
                    format_args!("read {}", self.path.display()),
                    e,
                ));
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(QueueSnapshot::new());
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| QueueError::persistence(format_args!("parse {}", self.path.display()), e))
    }

    async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)
            .map_err(|e| QueueError::persistence("encode snapshot", e))?;
        let target = self.clone();
        tokio::task::spawn_blocking(move || target.write_atomically(&bytes))
            .await
            .map_err(|e| QueueError::persistence("save task", e))?
    }
}

impl JsonFileMedium {
    fn write_atomically(&self, bytes: &[u8]) -> Result<()> {
        let dir = self.dir();
        let io_err = |op: &str, e: std::io::Error| {
            QueueError::persistence(format_args!("{op} {}", dir.display()), e)
        };

        std::fs::create_dir_all(&dir).map_err(|e| io_err("create", e))?;
        let mut temp = tempfile::Builder::new()
            .prefix(&self.temp_prefix)
            .suffix(".tmp")
            .tempfile_in(&dir)
            .map_err(|e| io_err("create temp file in", e))?;
        temp.write_all(bytes)
            .map_err(|e| io_err("write temp file in", e))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| io_err("fsync temp file in", e))?;

        // a failed persist hands the temp file back; dropping it deletes it
        temp.persist(&self.path).map_err(|e| {
            QueueError::persistence(format_args!("rename into {}", self.path.display()), e.error)
        })?;

        // make the rename itself durable
        #[cfg(unix)]
        {
            File::open(&dir)
                .and_then(|handle| handle.sync_all())
                .map_err(|e| io_err("fsync", e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobRecord;

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let medium = JsonFileMedium::new(dir.path().join("queue.json")).unwrap();

        assert_eq!(medium.load().await.unwrap(), QueueSnapshot::new());
    }

    #[tokio::test]
    async fn save_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let medium = JsonFileMedium::new(dir.path().join("nested/queue.json")).unwrap();

        let mut snapshot = QueueSnapshot::new();
        for i in 0..5 {
            snapshot.enqueue(JobRecord::new(format!("echo {i}"), 3)).unwrap();
        }
        medium.save(&snapshot).await.unwrap();

        let loaded = medium.load().await.unwrap();
        assert_eq!(loaded, snapshot);
        let left: Vec<_> = std::fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(left, vec![OsString::from("queue.json")]);
    }

    #[tokio::test]
    async fn lock_excludes_a_second_handle_on_the_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let first = JsonFileMedium::new(&path).unwrap();
        let second = JsonFileMedium::new(&path).unwrap();

        let held = first.lock().await.unwrap();
        let waiter = tokio::spawn(async move { second.lock().await.map(drop) });
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap().unwrap();
        assert!(dir.path().join("queue.json.lock").exists());
    }

    #[tokio::test]
    async fn save_failure_is_reported_not_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        // the parent "directory" is a regular file
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let medium = JsonFileMedium::new(blocker.join("queue.json")).unwrap();

        let err = medium.save(&QueueSnapshot::new()).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn document_has_jobs_and_dlq() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let medium = JsonFileMedium::new(&path).unwrap();
        medium.save(&QueueSnapshot::new()).await.unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({ "jobs": [], "dlq": [] }));
    }

    #[tokio::test]
    async fn corrupt_document_is_a_persistence_fault() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let err = JsonFileMedium::new(&path).unwrap().load().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn path_without_file_name_is_rejected() {
        assert!(matches!(
            JsonFileMedium::new("/"),
            Err(QueueError::Config(_))
        ));
    }
}
