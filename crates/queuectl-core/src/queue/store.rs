//! Lock-serialized store over a snapshot medium.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{JobStore, JsonFileMedium, MemoryMedium, QueueSnapshot, SnapshotMedium};
use crate::domain::{JobId, JobRecord, JobState};
use crate::error::Result;
use crate::observability::QueueCounts;

/// [`JobStore`] implemented as read-modify-write over a full snapshot.
///
/// Design:
/// - One global lock per store; every operation holds it from `load` to the
///   end of `save`. Mutations also hold the medium's own lock, which a file
///   medium shares with every other store and process on the same path, so
///   concurrent mutations never interleave (no lost update).
/// - A mutation is only reported as successful after the medium's `save`
///   returned `Ok`; on error nothing is considered written.
pub struct SnapshotStore<M> {
    medium: M,
    lock: Mutex<()>,
}

/// In-process store, mostly for tests and embedding.
pub type InMemoryStore = SnapshotStore<MemoryMedium>;

/// Store persisted to a JSON file.
pub type JsonFileStore = SnapshotStore<JsonFileMedium>;

impl<M: SnapshotMedium> SnapshotStore<M> {
    pub fn with_medium(medium: M) -> Self {
        Self {
            medium,
            lock: Mutex::new(()),
        }
    }

    pub fn medium(&self) -> &M {
        &self.medium
    }

    async fn read<T>(&self, f: impl FnOnce(&QueueSnapshot) -> T + Send) -> Result<T> {
        let _guard = self.lock.lock().await;
        let snapshot = self.medium.load().await?;
        Ok(f(&snapshot))
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut QueueSnapshot) -> Result<T> + Send,
    ) -> Result<T> {
        let _guard = self.lock.lock().await;
        let _medium = self.medium.lock().await?;
        let mut snapshot = self.medium.load().await?;
        let value = f(&mut snapshot)?;
        self.medium.save(&snapshot).await?;
        Ok(value)
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_medium(MemoryMedium::new())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::with_medium(JsonFileMedium::new(path)?))
    }
}

#[async_trait]
impl<M: SnapshotMedium> JobStore for SnapshotStore<M> {
    async fn enqueue(&self, job: JobRecord) -> Result<()> {
        let id = job.id();
        self.mutate(|s| s.enqueue(job)).await?;
        tracing::debug!(job_id = %id, "job enqueued");
        Ok(())
    }

    async fn claim_next(&self, state: JobState) -> Result<Vec<JobRecord>> {
        self.read(|s| s.list_by_state(state)).await
    }

    async fn update(&self, job: JobRecord) -> Result<()> {
        self.mutate(|s| s.update(job)).await
    }

    async fn move_to_dead(&self, job: &JobRecord) -> Result<JobRecord> {
        let dead = self.mutate(|s| s.move_to_dead(job)).await?;
        tracing::debug!(job_id = %dead.id(), attempts = dead.attempts(), "job dead-lettered");
        Ok(dead)
    }

    async fn list_by_state(&self, state: JobState) -> Result<Vec<JobRecord>> {
        self.read(|s| s.list_by_state(state)).await
    }

    async fn list_dead(&self) -> Result<Vec<JobRecord>> {
        self.read(QueueSnapshot::list_dead).await
    }

    async fn revive(&self, id: JobId) -> Result<JobRecord> {
        let job = self.mutate(|s| s.revive(id)).await?;
        tracing::debug!(job_id = %id, "job revived from dead-letter set");
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.read(|s| s.get(id)).await
    }

    async fn counts(&self) -> Result<QueueCounts> {
        self.read(QueueSnapshot::counts).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::QueueError;
    use crate::queue::Container;
    use crate::testing::FlakyMedium;

    async fn failed_out(store: &dyn JobStore, job: &mut JobRecord) {
        while !job.is_exhausted() {
            job.mark_processing().unwrap();
            store.update(job.clone()).await.unwrap();
            job.record_failure().unwrap();
            store.update(job.clone()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn update_round_trips_field_by_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("queue.json")).unwrap();
        let mut job = JobRecord::new("exit 1", 3);
        store.enqueue(job.clone()).await.unwrap();

        job.mark_processing().unwrap();
        job.record_failure().unwrap();
        // processing was never persisted: pending -> failed is refused
        assert!(store.update(job.clone()).await.is_err());

        let mut job = store.list_by_state(JobState::Pending).await.unwrap().remove(0);
        job.mark_processing().unwrap();
        store.update(job.clone()).await.unwrap();
        job.record_failure().unwrap();
        store.update(job.clone()).await.unwrap();

        let read = store.list_by_state(JobState::Failed).await.unwrap();
        assert_eq!(read, vec![job]);
    }

    #[tokio::test]
    async fn reopened_file_store_sees_prior_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let job = JobRecord::new("echo durable", 3);
        {
            let store = JsonFileStore::open(&path).unwrap();
            store.enqueue(job.clone()).await.unwrap();
        }

        let store = JsonFileStore::open(&path).unwrap();
        assert_eq!(store.get(job.id()).await.unwrap(), Some(job));
    }

    #[tokio::test]
    async fn concurrent_updates_on_different_jobs_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("queue.json")).unwrap());

        let mut jobs = Vec::new();
        for i in 0..16 {
            let job = JobRecord::new(format!("echo {i}"), 3);
            store.enqueue(job.clone()).await.unwrap();
            jobs.push(job);
        }

        let mut handles = Vec::new();
        for mut job in jobs.clone() {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                job.mark_processing().unwrap();
                store.update(job).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let processing = store.list_by_state(JobState::Processing).await.unwrap();
        assert_eq!(processing.len(), jobs.len());
        // insertion order survives the concurrent rewrites
        let ids: Vec<JobId> = processing.iter().map(JobRecord::id).collect();
        let expected: Vec<JobId> = jobs.iter().map(JobRecord::id).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn concurrent_dead_letter_moves_both_land() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonFileStore::open(dir.path().join("queue.json")).unwrap());

        let mut a = JobRecord::new("exit 1", 1);
        let mut b = JobRecord::new("exit 2", 1);
        store.enqueue(a.clone()).await.unwrap();
        store.enqueue(b.clone()).await.unwrap();
        failed_out(store.as_ref(), &mut a).await;
        failed_out(store.as_ref(), &mut b).await;

        let (ra, rb) = tokio::join!(
            {
                let store = Arc::clone(&store);
                let a = a.clone();
                tokio::spawn(async move { store.move_to_dead(&a).await })
            },
            {
                let store = Arc::clone(&store);
                let b = b.clone();
                tokio::spawn(async move { store.move_to_dead(&b).await })
            }
        );
        ra.unwrap().unwrap();
        rb.unwrap().unwrap();

        let dead: Vec<JobId> = store
            .list_dead()
            .await
            .unwrap()
            .iter()
            .map(JobRecord::id)
            .collect();
        assert_eq!(dead.len(), 2);
        assert!(dead.contains(&a.id()) && dead.contains(&b.id()));
        assert_eq!(store.counts().await.unwrap().failed, 0);
        assert!(store.get(a.id()).await.unwrap().unwrap().state().is_dead_letter());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn two_handles_on_one_file_lose_no_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let first = Arc::new(JsonFileStore::open(&path).unwrap());
        let second = Arc::new(JsonFileStore::open(&path).unwrap());

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = if i % 2 == 0 {
                Arc::clone(&first)
            } else {
                Arc::clone(&second)
            };
            handles.push(tokio::spawn(async move {
                store.enqueue(JobRecord::new(format!("echo {i}"), 1)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.counts().await.unwrap().pending, 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dead_letter_move_survives_a_write_from_another_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let runner = JsonFileStore::open(&path).unwrap();
        let producer = Arc::new(JsonFileStore::open(&path).unwrap());

        let mut job = JobRecord::new("exit 1", 1);
        runner.enqueue(job.clone()).await.unwrap();
        failed_out(&runner, &mut job).await;

        let enqueues = {
            let producer = Arc::clone(&producer);
            tokio::spawn(async move {
                for i in 0..10 {
                    producer
                        .enqueue(JobRecord::new(format!("echo {i}"), 1))
                        .await
                        .unwrap();
                }
            })
        };
        runner.move_to_dead(&job).await.unwrap();
        enqueues.await.unwrap();

        let counts = producer.counts().await.unwrap();
        assert_eq!(counts.dead, 1);
        assert_eq!(counts.failed, 0);
        assert_eq!(counts.pending, 10);
    }

    #[tokio::test]
    async fn revive_absent_id_reports_not_found() {
        let store = InMemoryStore::new();
        store.enqueue(JobRecord::new("echo a", 3)).await.unwrap();
        let before = store.counts().await.unwrap();

        let err = store.revive(JobId::generate()).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::NotFound {
                container: Container::DeadLetter,
                ..
            }
        ));
        assert_eq!(store.counts().await.unwrap(), before);
    }

    #[tokio::test]
    async fn revive_restores_pending_with_zero_attempts() {
        let store = InMemoryStore::new();
        let mut job = JobRecord::new("exit 1", 2);
        store.enqueue(job.clone()).await.unwrap();
        failed_out(&store, &mut job).await;
        store.move_to_dead(&job).await.unwrap();

        let revived = store.revive(job.id()).await.unwrap();
        assert_eq!(revived.state(), JobState::Pending);
        assert_eq!(revived.attempts(), 0);
        assert!(store.list_dead().await.unwrap().is_empty());
        assert_eq!(
            store.claim_next(JobState::Pending).await.unwrap(),
            vec![revived]
        );
    }

    #[tokio::test]
    async fn failed_save_leaves_nothing_behind() {
        let store = SnapshotStore::with_medium(FlakyMedium::new());
        let job = JobRecord::new("echo a", 3);
        store.enqueue(job.clone()).await.unwrap();

        store.medium().fail_saves(true);
        let mut claimed = job.clone();
        claimed.mark_processing().unwrap();
        let err = store.update(claimed).await.unwrap_err();
        assert!(err.is_fatal());

        store.medium().fail_saves(false);
        assert_eq!(store.get(job.id()).await.unwrap(), Some(job));
    }
}
