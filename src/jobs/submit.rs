use anyhow::Result;
use tracing::{debug, instrument};

use crate::jobs::JobDescriptor;
use crate::queue::JobQueue;

/// Push `jobs` in one call, then register every root-carrying job with the
/// queue's root de-duplication.
#[instrument(skip_all, fields(jobs = jobs.len()))]
pub async fn submit(queue: &dyn JobQueue, jobs: &[JobDescriptor]) -> Result<()> {
    if jobs.is_empty() {
        return Ok(());
    }
    queue.push(jobs).await?;
    for job in jobs.iter().filter(|j| j.root.is_some()) {
        let recorded = queue.deduplicate_root_job(job).await?;
        debug!(title = %job.title, mode = job.mode(), recorded, "root job registered");
    }
    Ok(())
}
