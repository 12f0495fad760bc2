use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::http::{Dispatcher, InvalidationRequest};
use crate::jobs::descriptor::{
    BacklinkScan, DecodeError, Decoded, JobDescriptor, JobKind, JobParams, PageBatch, PageUpdate,
};
use crate::jobs::partition::{partition, PartitionLimits};
use crate::model::{RevisionId, Title};
use crate::queue::JobQueue;
use crate::urls::RestbaseUrls;
use crate::wiki::{BacklinkSource, PageStore};

/// Result of running a stored job record that did not fail.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Old record shape, drained without doing anything.
    Legacy,
    /// Record that can never run; retrying would not help.
    Malformed(DecodeError),
}

/// Executes jobs. Holds no per-job state, so one runner can serve any
/// number of concurrent workers.
#[derive(Clone)]
pub struct JobRunner {
    urls: RestbaseUrls,
    dispatcher: Dispatcher,
    pages: Arc<dyn PageStore>,
    backlinks: Arc<dyn BacklinkSource>,
    queue: Arc<dyn JobQueue>,
    limits: PartitionLimits,
}

impl JobRunner {
    pub fn new(
        urls: RestbaseUrls,
        dispatcher: Dispatcher,
        pages: Arc<dyn PageStore>,
        backlinks: Arc<dyn BacklinkSource>,
        queue: Arc<dyn JobQueue>,
        limits: PartitionLimits,
    ) -> Self {
        Self {
            urls,
            dispatcher,
            pages,
            backlinks,
            queue,
            limits,
        }
    }

    /// Decode and run a job as stored by a queue.
    pub async fn run_record(
        &self,
        title: Title,
        raw_params: &str,
        created_at: DateTime<Utc>,
    ) -> Result<RunOutcome> {
        let decoded = JobParams::from_json(raw_params)
            .and_then(|params| JobDescriptor::decode(title, &params, created_at));
        match decoded {
            Ok(Decoded::Job(job)) => {
                self.run(&job).await?;
                Ok(RunOutcome::Completed)
            }
            Ok(Decoded::Legacy) => {
                debug!("discarding old-style dependency job");
                Ok(RunOutcome::Legacy)
            }
            Err(err) => {
                warn!(%err, "undecodable job record");
                Ok(RunOutcome::Malformed(err))
            }
        }
    }

    #[instrument(skip_all, fields(title = %job.title, mode = job.mode()))]
    pub async fn run(&self, job: &JobDescriptor) -> Result<()> {
        match &job.kind {
            JobKind::RevisionVisibility { revisions } => self.signal_revision_change(revisions).await,
            JobKind::OnEdit(update) => self.invalidate_title(&job.title, update).await,
            JobKind::Backlinks(scan) => self.split_backlinks(job, scan).await,
            JobKind::PageBatch(batch) => self.invalidate_titles(batch).await,
        }
    }

    async fn signal_revision_change(&self, revisions: &[RevisionId]) -> Result<()> {
        let requests = revisions
            .iter()
            .map(|rev| InvalidationRequest::revision(self.urls.revision_url(*rev)))
            .collect();
        self.dispatcher.dispatch(requests).await?;
        Ok(())
    }

    async fn invalidate_title(&self, title: &Title, update: &PageUpdate) -> Result<()> {
        let revision = match update.revision {
            Some(rev) => Some(rev),
            None => self
                .pages
                .latest_revision(title)
                .await
                .with_context(|| format!("failed to look up latest revision of {}", title))?,
        };
        let Some(revision) = revision else {
            debug!(%title, "no revision to refresh");
            return Ok(());
        };
        let parent = self
            .pages
            .previous_revision(title, revision)
            .await
            .with_context(|| format!("failed to look up parent of revision {}", revision))?;

        let request = InvalidationRequest::page_edit(self.urls.page_url(title, revision), parent);
        self.dispatcher.dispatch(vec![request]).await?;
        Ok(())
    }

    async fn split_backlinks(&self, job: &JobDescriptor, scan: &BacklinkScan) -> Result<()> {
        let jobs = partition(job, scan, self.backlinks.as_ref(), self.limits).await?;
        if !jobs.is_empty() {
            self.queue.push(&jobs).await?;
        }
        self.queue.deduplicate_root_job(job).await?;
        info!(
            title = %job.title,
            table = scan.table.as_str(),
            emitted = jobs.len(),
            "backlink job split"
        );
        Ok(())
    }

    async fn invalidate_titles(&self, batch: &PageBatch) -> Result<()> {
        let latest = try_join_all(
            batch
                .pages
                .values()
                .map(|title| self.pages.latest_revision(title)),
        )
        .await
        .context("failed to look up latest revisions")?;

        let requests: Vec<_> = batch
            .pages
            .values()
            .zip(latest)
            .filter_map(|(title, rev)| match rev {
                Some(rev) => Some(InvalidationRequest::page_batch(
                    self.urls.page_url(title, rev),
                    batch.table,
                )),
                None => {
                    debug!(%title, "skipping page without revisions");
                    None
                }
            })
            .collect();
        self.dispatcher.dispatch(requests).await?;
        Ok(())
    }
}
