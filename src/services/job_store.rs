use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::job::{JobTransitionError, JobUpdate, UploadJob};

const KEY_PREFIX: &str = "asset_ingest:job:";

/// Keyed store of upload job state.
///
/// The upload handler creates a job; from then on the background task for that
/// job is its only writer. Readers only call [`JobStore::get`].
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, filename: &str) -> Result<UploadJob, JobStoreError>;

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<UploadJob, JobStoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<UploadJob>, JobStoreError>;

    /// Check backend connectivity (for health checks).
    async fn health_check(&self) -> Result<(), JobStoreError> {
        Ok(())
    }
}

/// Process-local job map. State is lost on restart.
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, UploadJob>>,
    ttl: Duration,
}

impl InMemoryJobStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Drop terminal jobs whose last update is older than the TTL.
    /// Jobs still queued or processing are never evicted.
    pub async fn evict_expired(&self) -> usize {
        let cutoff = match chrono::Duration::from_std(self.ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        {
            Some(cutoff) => cutoff,
            None => return 0,
        };
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, job| !(job.status.is_terminal() && job.updated_at < cutoff));
        before - jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, filename: &str) -> Result<UploadJob, JobStoreError> {
        let job = UploadJob::new(filename);
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<UploadJob, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        job.apply(update)?;
        Ok(job.clone())
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadJob>, JobStoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }
}

/// Redis-backed job store. Each job is a JSON document with an expiry, so
/// finished jobs age out on their own.
pub struct RedisJobStore {
    client: redis::Client,
    ttl_secs: u64,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, JobStoreError> {
        let client = redis::Client::open(redis_url).map_err(JobStoreError::Redis)?;
        Ok(Self {
            client,
            ttl_secs: ttl.as_secs().max(1),
        })
    }

    fn key(id: Uuid) -> String {
        format!("{}{}", KEY_PREFIX, id)
    }

    async fn save(&self, job: &UploadJob) -> Result<(), JobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(JobStoreError::Redis)?;
        let payload = serde_json::to_string(job).map_err(JobStoreError::Serialize)?;
        conn.set_ex::<_, _, ()>(Self::key(job.id), payload, self.ttl_secs)
            .await
            .map_err(JobStoreError::Redis)?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, filename: &str) -> Result<UploadJob, JobStoreError> {
        let job = UploadJob::new(filename);
        self.save(&job).await?;
        Ok(job)
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<UploadJob, JobStoreError> {
        // Single writer per job, so read-modify-write needs no WATCH.
        let mut job = self.get(id).await?.ok_or(JobStoreError::NotFound(id))?;
        job.apply(update)?;
        self.save(&job).await?;
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadJob>, JobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(JobStoreError::Redis)?;
        let payload: Option<String> = conn.get(Self::key(id)).await.map_err(JobStoreError::Redis)?;

        match payload {
            Some(payload) => {
                let job: UploadJob = serde_json::from_str(&payload).map_err(JobStoreError::Serialize)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<(), JobStoreError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(JobStoreError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(JobStoreError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Transition(#[from] JobTransitionError),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{JobStage, JobStatus};

    #[tokio::test]
    async fn test_create_get_update() {
        let store = InMemoryJobStore::new(Duration::from_secs(60));
        let job = store.create("campus.slpk").await.unwrap();

        let fetched = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Queued);
        assert_eq!(fetched.filename, "campus.slpk");

        store.update(job.id, JobUpdate::started()).await.unwrap();
        let updated = store
            .update(job.id, JobUpdate::stage(JobStage::ExtractingArchive, 20, "Extracting"))
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(updated.stage, JobStage::ExtractingArchive);
        assert_eq!(updated.progress, 20);
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let store = InMemoryJobStore::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        assert!(store.get(id).await.unwrap().is_none());
        assert!(matches!(
            store.update(id, JobUpdate::started()).await,
            Err(JobStoreError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_terminal_jobs_reject_updates() {
        let store = InMemoryJobStore::new(Duration::from_secs(60));
        let job = store.create("scan.las").await.unwrap();
        store.update(job.id, JobUpdate::started()).await.unwrap();
        store.update(job.id, JobUpdate::failed("boom", None)).await.unwrap();

        let err = store.update(job.id, JobUpdate::started()).await.unwrap_err();
        assert!(matches!(err, JobStoreError::Transition(_)));
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Error);
    }

    #[tokio::test]
    async fn test_eviction_keeps_running_jobs() {
        let store = InMemoryJobStore::new(Duration::ZERO);
        let running = store.create("a.glb").await.unwrap();
        store.update(running.id, JobUpdate::started()).await.unwrap();
        let finished = store.create("b.glb").await.unwrap();
        store.update(finished.id, JobUpdate::failed("bad", None)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(store.evict_expired().await, 1);
        assert!(store.get(running.id).await.unwrap().is_some());
        assert!(store.get(finished.id).await.unwrap().is_none());
    }
}
