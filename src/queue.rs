use anyhow::Result;
use async_trait::async_trait;

use crate::jobs::JobDescriptor;

/// Durable job queue with at-least-once delivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn push(&self, jobs: &[JobDescriptor]) -> Result<()>;

    /// Record `job` as the newest root for its root key so older queued jobs
    /// sharing the key are discarded. Returns false for jobs without a root.
    async fn deduplicate_root_job(&self, job: &JobDescriptor) -> Result<bool>;
}
