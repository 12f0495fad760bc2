use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::model::{DependencyTable, EditMode, PageId, RevisionId, Title};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobType {
    OnEdit,
    OnDependencyChange,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::OnEdit => "OnEdit",
            JobType::OnDependencyChange => "OnDependencyChange",
        }
    }
}

/// Identity of the change that spawned a family of jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootJob {
    pub key: String,
    pub timestamp: DateTime<Utc>,
}

impl RootJob {
    pub fn for_dependency(
        table: DependencyTable,
        title: &Title,
        latest_revision: Option<RevisionId>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let key = format!(
            "RestbaseUpdateJob{}:{}:{}:{}",
            JobType::OnDependencyChange.as_str(),
            table.as_str(),
            title.prefixed_text(),
            latest_revision.unwrap_or(0)
        );
        Self { key, timestamp }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageUpdate {
    pub mode: EditMode,
    /// Revision to refresh. `None` means the latest at run time.
    pub revision: Option<RevisionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklinkScan {
    pub table: DependencyTable,
    /// Last page id covered by an earlier invocation.
    pub cursor: Option<PageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBatch {
    pub table: DependencyTable,
    pub pages: BTreeMap<PageId, Title>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    OnEdit(PageUpdate),
    RevisionVisibility { revisions: Vec<RevisionId> },
    Backlinks(BacklinkScan),
    PageBatch(PageBatch),
}

/// A unit of queued work. Never mutated once submitted; splitting a job
/// always produces new descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescriptor {
    /// Page the job is attached to. Ignored for page batches.
    pub title: Title,
    pub kind: JobKind,
    pub root: Option<RootJob>,
    pub created_at: DateTime<Utc>,
}

impl JobDescriptor {
    pub fn new(title: Title, kind: JobKind) -> Self {
        Self {
            title,
            kind,
            root: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_root(mut self, root: Option<RootJob>) -> Self {
        self.root = root;
        self
    }

    pub fn page_update(title: Title, mode: EditMode, revision: Option<RevisionId>) -> Self {
        Self::new(title, JobKind::OnEdit(PageUpdate { mode, revision }))
    }

    pub fn job_type(&self) -> JobType {
        match self.kind {
            JobKind::OnEdit(_) | JobKind::RevisionVisibility { .. } => JobType::OnEdit,
            JobKind::Backlinks(_) | JobKind::PageBatch(_) => JobType::OnDependencyChange,
        }
    }

    pub fn mode(&self) -> &'static str {
        match &self.kind {
            JobKind::OnEdit(update) => update.mode.as_str(),
            JobKind::RevisionVisibility { .. } => "rev_visibility",
            JobKind::Backlinks(scan) => scan.table.as_str(),
            JobKind::PageBatch(batch) => batch.table.as_str(),
        }
    }

    pub fn encode(&self) -> JobParams {
        let mut params = JobParams {
            job_type: Some(self.job_type().as_str().to_string()),
            ..Default::default()
        };
        if let Some(root) = &self.root {
            params.root_job_signature = Some(root.key.clone());
            params.root_job_timestamp = Some(root.timestamp);
        }
        match &self.kind {
            JobKind::OnEdit(update) => {
                params.mode = Some(update.mode.as_str().to_string());
                params.rev = update.revision;
            }
            JobKind::RevisionVisibility { revisions } => {
                params.mode = Some("rev_visibility".to_string());
                params.revs = Some(revisions.clone());
            }
            JobKind::Backlinks(scan) => {
                params.table = Some(scan.table.as_str().to_string());
                params.recursive = Some(true);
                params.cursor = scan.cursor;
            }
            JobKind::PageBatch(batch) => {
                params.table = Some(batch.table.as_str().to_string());
                params.pages = Some(
                    batch
                        .pages
                        .iter()
                        .map(|(id, t)| (*id, (t.namespace, t.db_key())))
                        .collect(),
                );
            }
        }
        params
    }

    /// Turn a stored record back into a job. Records written before jobs
    /// carried `recursive` or `pages` decode as [`Decoded::Legacy`].
    pub fn decode(
        title: Title,
        params: &JobParams,
        created_at: DateTime<Utc>,
    ) -> Result<Decoded, DecodeError> {
        let root = match (&params.root_job_signature, params.root_job_timestamp) {
            (Some(key), Some(timestamp)) => Some(RootJob {
                key: key.clone(),
                timestamp,
            }),
            _ => None,
        };

        // Jobs queued before the type split carry no `type` and are page updates.
        let job_type = params.job_type.as_deref().unwrap_or("OnEdit");
        let kind = match job_type {
            "OnEdit" => match params.mode.as_deref().unwrap_or("edit") {
                "rev_visibility" => JobKind::RevisionVisibility {
                    revisions: params
                        .revs
                        .clone()
                        .ok_or(DecodeError::MissingField("revs"))?,
                },
                // Any other mode still names a page to refresh.
                other => JobKind::OnEdit(PageUpdate {
                    mode: EditMode::parse(other).unwrap_or(EditMode::Edit),
                    revision: params.rev,
                }),
            },
            "OnDependencyChange" => {
                if params.recursive.is_none() && params.pages.is_none() {
                    return Ok(Decoded::Legacy);
                }
                let table_name = params
                    .table
                    .as_deref()
                    .ok_or(DecodeError::MissingField("table"))?;
                let table = DependencyTable::parse(table_name)
                    .ok_or_else(|| DecodeError::UnknownTable(table_name.to_string()))?;
                if params.recursive == Some(true) {
                    JobKind::Backlinks(BacklinkScan {
                        table,
                        cursor: params.cursor,
                    })
                } else if let Some(pages) = &params.pages {
                    JobKind::PageBatch(PageBatch {
                        table,
                        pages: pages
                            .iter()
                            .map(|(id, (ns, key))| (*id, Title::new(*ns, key.as_str())))
                            .collect(),
                    })
                } else {
                    return Ok(Decoded::Legacy);
                }
            }
            other => return Err(DecodeError::UnknownType(other.to_string())),
        };

        Ok(Decoded::Job(JobDescriptor {
            title,
            kind,
            root,
            created_at,
        }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Job(JobDescriptor),
    /// Old record shape that is drained as a successful no-op.
    Legacy,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown job type: {0}")]
    UnknownType(String),
    #[error("unknown dependency table: {0}")]
    UnknownTable(String),
    #[error("missing job parameter: {0}")]
    MissingField(&'static str),
    #[error("malformed job parameters: {0}")]
    Json(String),
}

#[derive(Debug, Error)]
#[error("failed to encode job parameters: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// Flat parameter record as stored in the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<BTreeMap<PageId, (i32, String)>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revs: Option<Vec<RevisionId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<RevisionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<PageId>,
    #[serde(rename = "rootJobSignature", default, skip_serializing_if = "Option::is_none")]
    pub root_job_signature: Option<String>,
    #[serde(rename = "rootJobTimestamp", default, skip_serializing_if = "Option::is_none")]
    pub root_job_timestamp: Option<DateTime<Utc>>,
}

impl JobParams {
    pub fn from_json(raw: &str) -> Result<Self, DecodeError> {
        serde_json::from_str(raw).map_err(|e| DecodeError::Json(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, EncodeError> {
        Ok(serde_json::to_string(self)?)
    }
}
