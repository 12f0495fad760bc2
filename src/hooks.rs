//! Entry points for the wiki events that should trigger RESTBase updates.
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, instrument};

use crate::jobs::{jobs_for_event, submit, JobDescriptor};
use crate::model::{ChangeEvent, EventKind, RevisionId, Subject, Title};
use crate::queue::JobQueue;
use crate::wiki::PageStore;

#[derive(Clone)]
pub struct EventHooks {
    queue: Arc<dyn JobQueue>,
    pages: Arc<dyn PageStore>,
}

impl EventHooks {
    pub fn new(queue: Arc<dyn JobQueue>, pages: Arc<dyn PageStore>) -> Self {
        Self { queue, pages }
    }

    /// Regular edits. Null edits (`changed == false`) schedule nothing.
    pub async fn on_article_edit(&self, title: &Title, changed: bool) -> Result<Vec<JobDescriptor>> {
        if !changed {
            return Ok(Vec::new());
        }
        self.schedule(title, EventKind::Edit).await
    }

    pub async fn on_article_delete(&self, title: &Title) -> Result<Vec<JobDescriptor>> {
        self.schedule(title, EventKind::Delete).await
    }

    pub async fn on_article_undelete(&self, title: &Title) -> Result<Vec<JobDescriptor>> {
        self.schedule(title, EventKind::Undelete).await
    }

    pub async fn on_revision_visibility_set(
        &self,
        title: &Title,
        revisions: Vec<RevisionId>,
    ) -> Result<Vec<JobDescriptor>> {
        self.schedule(title, EventKind::RevisionVisibility { revisions })
            .await
    }

    pub async fn on_title_move(
        &self,
        old: &Title,
        new: &Title,
        old_revision: RevisionId,
        new_revision: RevisionId,
    ) -> Result<Vec<JobDescriptor>> {
        let to = self.subject(new).await?;
        self.schedule(
            old,
            EventKind::Move {
                to,
                old_revision,
                new_revision,
            },
        )
        .await
    }

    /// Uploads, including re-uploads of a new file version.
    pub async fn on_file_upload(&self, title: &Title) -> Result<Vec<JobDescriptor>> {
        self.schedule(title, EventKind::Upload).await
    }

    async fn subject(&self, title: &Title) -> Result<Subject> {
        let latest = self
            .pages
            .latest_revision(title)
            .await
            .with_context(|| format!("failed to look up latest revision of {}", title))?;
        Ok(Subject::new(title.clone(), latest))
    }

    #[instrument(skip_all, fields(%title, event = kind.name()))]
    async fn schedule(&self, title: &Title, kind: EventKind) -> Result<Vec<JobDescriptor>> {
        let event = ChangeEvent::new(self.subject(title).await?, kind);
        let jobs = jobs_for_event(&event);
        debug!(jobs = jobs.len(), "scheduling restbase update");
        submit(self.queue.as_ref(), &jobs).await?;
        Ok(jobs)
    }
}
