//! Read-only views of wiki state the jobs depend on.
use anyhow::Result;
use async_trait::async_trait;

use crate::model::{DependencyTable, PageId, RevisionId, Title};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backlink {
    pub page_id: PageId,
    pub title: Title,
}

/// Paged enumeration of pages that transclude or embed a title, ordered by
/// page id so a cursor can resume where the previous page stopped.
#[async_trait]
pub trait BacklinkSource: Send + Sync {
    async fn backlinks(
        &self,
        title: &Title,
        table: DependencyTable,
        after: Option<PageId>,
        limit: usize,
    ) -> Result<Vec<Backlink>>;
}

#[async_trait]
pub trait PageStore: Send + Sync {
    async fn latest_revision(&self, title: &Title) -> Result<Option<RevisionId>>;

    /// Revision of the same page immediately before `revision`.
    async fn previous_revision(
        &self,
        title: &Title,
        revision: RevisionId,
    ) -> Result<Option<RevisionId>>;
}
