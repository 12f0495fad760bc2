#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use restbase_update::http::{HttpTransport, InvalidationRequest, RequestOutcome};
use restbase_update::jobs::JobDescriptor;
use restbase_update::model::{DependencyTable, PageId, RevisionId, Title};
use restbase_update::queue::JobQueue;
use restbase_update::urls::RestbaseUrls;
use restbase_update::wiki::{Backlink, BacklinkSource, PageStore};

pub fn test_urls() -> RestbaseUrls {
    RestbaseUrls::new("http://restbase.test", "en.example.org", "v1")
}

/// Records every request; URLs containing a failing fragment get an error.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    pub calls: Arc<Mutex<Vec<(Vec<InvalidationRequest>, usize)>>>,
    failing: Arc<Mutex<Vec<String>>>,
}

impl RecordingTransport {
    pub fn fail_urls_containing(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn requests(&self) -> Vec<InvalidationRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(reqs, _)| reqs.clone())
            .collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.url).collect()
    }
}

#[async_trait]
impl HttpTransport for RecordingTransport {
    async fn run_multi(
        &self,
        requests: Vec<InvalidationRequest>,
        concurrency: usize,
    ) -> Vec<RequestOutcome> {
        let failing = self.failing.lock().unwrap().clone();
        let outcomes = requests
            .iter()
            .map(|r| {
                if failing.iter().any(|f| r.url.contains(f.as_str())) {
                    RequestOutcome::failed(Some(503), "service unavailable")
                } else {
                    RequestOutcome::ok(200)
                }
            })
            .collect();
        self.calls.lock().unwrap().push((requests, concurrency));
        outcomes
    }
}

#[derive(Clone, Default)]
pub struct MemoryQueue {
    pub pushes: Arc<Mutex<Vec<Vec<JobDescriptor>>>>,
    pub deduplicated: Arc<Mutex<Vec<String>>>,
}

impl MemoryQueue {
    pub fn pushed(&self) -> Vec<JobDescriptor> {
        self.pushes.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn push(&self, jobs: &[JobDescriptor]) -> Result<()> {
        self.pushes.lock().unwrap().push(jobs.to_vec());
        Ok(())
    }

    async fn deduplicate_root_job(&self, job: &JobDescriptor) -> Result<bool> {
        match &job.root {
            Some(root) => {
                self.deduplicated.lock().unwrap().push(root.key.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Revision histories per title plus a flat backlink table.
#[derive(Clone, Default)]
pub struct FakeWiki {
    pub revisions: HashMap<Title, Vec<RevisionId>>,
    pub links: Vec<(DependencyTable, Title, Backlink)>,
    pub broken: bool,
}

impl FakeWiki {
    pub fn with_page(mut self, title: Title, revisions: Vec<RevisionId>) -> Self {
        self.revisions.insert(title, revisions);
        self
    }

    pub fn with_backlinks(mut self, table: DependencyTable, target: &Title, count: i64) -> Self {
        for id in 1..=count {
            let title = Title::new(0, format!("User page {}", id));
            self.revisions.insert(title.clone(), vec![1000 + id]);
            self.links.push((
                table,
                target.clone(),
                Backlink { page_id: id, title },
            ));
        }
        self
    }
}

#[async_trait]
impl PageStore for FakeWiki {
    async fn latest_revision(&self, title: &Title) -> Result<Option<RevisionId>> {
        Ok(self.revisions.get(title).and_then(|r| r.last().copied()))
    }

    async fn previous_revision(&self, title: &Title, revision: RevisionId) -> Result<Option<RevisionId>> {
        Ok(self
            .revisions
            .get(title)
            .and_then(|revs| revs.iter().copied().filter(|r| *r < revision).max()))
    }
}

#[async_trait]
impl BacklinkSource for FakeWiki {
    async fn backlinks(
        &self,
        title: &Title,
        table: DependencyTable,
        after: Option<PageId>,
        limit: usize,
    ) -> Result<Vec<Backlink>> {
        if self.broken {
            return Err(anyhow!("backlink source unreachable"));
        }
        let mut rows: Vec<Backlink> = self
            .links
            .iter()
            .filter(|(t, target, b)| *t == table && target == title && Some(b.page_id) > after)
            .map(|(_, _, b)| b.clone())
            .collect();
        rows.sort_by_key(|b| b.page_id);
        rows.truncate(limit);
        Ok(rows)
    }
}
