//! Splitting of recursive backlink jobs into bounded leaf batches.
//!
//! One invocation reads at most `rows_per_job` backlinks after the job's
//! cursor, groups them into leaf [`PageBatch`] jobs of `titles_per_batch`
//! pages, and, when rows remain, emits a single continuation that resumes
//! after the last page it covered. Every backlink row therefore lands in
//! exactly one leaf per root enumeration.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::jobs::descriptor::{BacklinkScan, JobDescriptor, JobKind, PageBatch};
use crate::wiki::BacklinkSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLimits {
    pub rows_per_job: usize,
    pub titles_per_batch: usize,
}

#[instrument(skip_all, fields(title = %job.title, table = scan.table.as_str(), cursor = ?scan.cursor))]
pub async fn partition(
    job: &JobDescriptor,
    scan: &BacklinkScan,
    source: &dyn BacklinkSource,
    limits: PartitionLimits,
) -> Result<Vec<JobDescriptor>> {
    let rows_per_job = limits.rows_per_job.max(1);
    let titles_per_batch = limits.titles_per_batch.max(1);

    // One extra row tells us whether a continuation is needed.
    let mut rows = source
        .backlinks(&job.title, scan.table, scan.cursor, rows_per_job + 1)
        .await
        .with_context(|| format!("failed to enumerate {} backlinks of {}", scan.table.as_str(), job.title))?;
    let more = rows.len() > rows_per_job;
    rows.truncate(rows_per_job);

    let mut jobs: Vec<JobDescriptor> = rows
        .chunks(titles_per_batch)
        .map(|chunk| {
            let pages: BTreeMap<_, _> = chunk
                .iter()
                .map(|b| (b.page_id, b.title.clone()))
                .collect();
            JobDescriptor::new(
                job.title.clone(),
                JobKind::PageBatch(PageBatch {
                    table: scan.table,
                    pages,
                }),
            )
            .with_root(job.root.clone())
        })
        .collect();

    if more {
        let last = rows.last().map(|b| b.page_id);
        jobs.push(
            JobDescriptor::new(
                job.title.clone(),
                JobKind::Backlinks(BacklinkScan {
                    table: scan.table,
                    cursor: last,
                }),
            )
            .with_root(job.root.clone()),
        );
    }

    debug!(rows = rows.len(), jobs = jobs.len(), more, "partitioned backlinks");
    Ok(jobs)
}
