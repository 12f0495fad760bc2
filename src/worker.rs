use anyhow::Result;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

use crate::db::{ClaimedJob, SqliteJobQueue};
use crate::jobs::runner::RunOutcome;
use crate::jobs::JobRunner;

/// Claim and run one due job. Returns false when nothing was due.
///
/// If bookkeeping fails after the claim, the claim is handed back before the
/// error is returned.
#[instrument(skip_all)]
pub async fn process_next_job(
    queue: &SqliteJobQueue,
    runner: &JobRunner,
    max_backoff_secs: i64,
) -> Result<bool> {
    let Some(job) = queue.claim_next().await? else {
        return Ok(false);
    };
    if let Err(err) = handle_claimed(queue, runner, &job, max_backoff_secs).await {
        if let Err(release_err) = queue.release(job.id).await {
            error!(?release_err, id = job.id, "failed to release claim; waiting for lease expiry");
        }
        return Err(err);
    }
    Ok(true)
}

async fn handle_claimed(
    queue: &SqliteJobQueue,
    runner: &JobRunner,
    job: &ClaimedJob,
    max_backoff_secs: i64,
) -> Result<()> {
    let id = job.id;

    if queue.is_superseded(job).await? {
        queue.complete(id).await?;
        info!(id, title = %job.title, "job superseded by a newer root job; dropped");
        return Ok(());
    }

    match runner
        .run_record(job.title.clone(), &job.params, job.created_at)
        .await
    {
        Ok(outcome) => {
            queue.complete(id).await?;
            match outcome {
                RunOutcome::Completed => info!(id, title = %job.title, "job succeeded"),
                RunOutcome::Legacy => info!(id, "legacy job discarded"),
                RunOutcome::Malformed(err) => warn!(id, %err, "malformed job dropped"),
            }
        }
        Err(err) => {
            let delay = queue.retry_later(id, job.attempt, max_backoff_secs).await?;
            warn!(?err, id, attempt = job.attempt, delay, "job failed; backoff");
        }
    }
    Ok(())
}

pub async fn drain(queue: &SqliteJobQueue, runner: &JobRunner, max_backoff_secs: i64) -> Result<usize> {
    let mut processed = 0;
    while process_next_job(queue, runner, max_backoff_secs).await? {
        processed += 1;
    }
    Ok(processed)
}

/// Poll the queue until `shutdown` flips to true.
pub async fn run_loop(
    queue: SqliteJobQueue,
    runner: JobRunner,
    poll_sleep: Duration,
    max_backoff_secs: i64,
    mut shutdown: watch::Receiver<bool>,
) {
    while !*shutdown.borrow() {
        let idle = match process_next_job(&queue, &runner, max_backoff_secs).await {
            Ok(processed) => !processed,
            Err(err) => {
                error!(?err, "job worker error");
                true
            }
        };
        if idle {
            tokio::select! {
                _ = tokio::time::sleep(poll_sleep) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}
