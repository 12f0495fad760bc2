use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, instrument};

use super::Pool;
use crate::jobs::{JobDescriptor, JobType, RootJob};
use crate::model::Title;
use crate::queue::JobQueue;

/// A job taken off the queue by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: i64,
    pub title: Title,
    pub params: String,
    pub root: Option<RootJob>,
    pub attempt: i32,
    pub created_at: DateTime<Utc>,
}

const DEFAULT_CLAIM_LEASE_SECS: i64 = 600;

#[derive(Debug, Clone)]
pub struct SqliteJobQueue {
    pool: Pool,
    claim_lease_secs: i64,
}

impl SqliteJobQueue {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            claim_lease_secs: DEFAULT_CLAIM_LEASE_SECS,
        }
    }

    /// Claims older than `secs` are treated as abandoned by their worker.
    pub fn with_claim_lease(mut self, secs: i64) -> Self {
        self.claim_lease_secs = secs;
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Atomically claim the next due job, if any. Jobs whose claim has
    /// outlived the lease are claimed again.
    #[instrument(skip_all)]
    pub async fn claim_next(&self) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query(
            "UPDATE jobs SET claimed_at = CURRENT_TIMESTAMP
             WHERE id = (
                 SELECT id FROM jobs
                 WHERE (claimed_at IS NULL OR datetime(claimed_at) <= datetime('now', ? || ' seconds'))
                   AND datetime(due_at) <= CURRENT_TIMESTAMP
                 ORDER BY datetime(due_at) ASC, id ASC
                 LIMIT 1
             )
             RETURNING id, title_namespace, title_key, params, root_key, root_timestamp, attempt, created_at",
        )
        .bind(-self.claim_lease_secs)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| claimed_from_row(&row)).transpose()
    }

    #[instrument(skip_all)]
    pub async fn complete(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Release a failed job for another attempt after an exponential
    /// backoff of 5s * 2^attempt, capped at `max_cap_secs` when positive.
    #[instrument(skip_all)]
    pub async fn retry_later(&self, id: i64, attempt: i32, max_cap_secs: i64) -> Result<i64> {
        let secs = 5_i64 * (1_i64 << attempt.clamp(0, 10));
        let secs = if max_cap_secs > 0 {
            secs.min(max_cap_secs)
        } else {
            secs
        };
        sqlx::query(
            "UPDATE jobs SET attempt = ?, claimed_at = NULL, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
        )
        .bind(attempt + 1)
        .bind(secs)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(secs)
    }

    /// Hand a claimed job back without counting an attempt.
    #[instrument(skip_all)]
    pub async fn release(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE jobs SET claimed_at = NULL WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Return claims left behind by a worker that stopped mid-job.
    #[instrument(skip_all)]
    pub async fn release_claims(&self) -> Result<u64> {
        let res = sqlx::query("UPDATE jobs SET claimed_at = NULL WHERE claimed_at IS NOT NULL")
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    /// True when a newer root with the same key has been registered.
    pub async fn is_superseded(&self, job: &ClaimedJob) -> Result<bool> {
        let Some(root) = &job.root else {
            return Ok(false);
        };
        let newest = newest_root(&self.pool, &root.key).await?;
        Ok(newest.map_or(false, |newest| newest > root.timestamp))
    }

    pub async fn count_pending(&self) -> Result<i64> {
        let n = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}

async fn newest_root(pool: &Pool, key: &str) -> Result<Option<DateTime<Utc>>> {
    let newest = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT newest_timestamp FROM root_jobs WHERE root_key = ?",
    )
    .bind(key)
    .fetch_optional(pool)
    .await?;
    Ok(newest)
}

fn claimed_from_row(row: &SqliteRow) -> Result<ClaimedJob> {
    let root_key: Option<String> = row.try_get("root_key")?;
    let root_timestamp: Option<DateTime<Utc>> = row.try_get("root_timestamp")?;
    let root = match (root_key, root_timestamp) {
        (Some(key), Some(timestamp)) => Some(RootJob { key, timestamp }),
        _ => None,
    };
    Ok(ClaimedJob {
        id: row.try_get("id")?,
        title: Title::new(
            row.try_get::<i32, _>("title_namespace")?,
            row.try_get::<String, _>("title_key")?,
        ),
        params: row.try_get("params")?,
        root,
        attempt: row.try_get("attempt")?,
        created_at: row.try_get("created_at")?,
    })
}

/// Single-page jobs are collapsed against an identical job still waiting
/// in the queue; other jobs rely on root de-duplication.
fn signature(job: &JobDescriptor, params: &str) -> Option<String> {
    match job.job_type() {
        JobType::OnEdit => Some(format!(
            "{}:{}:{}",
            job.job_type().as_str(),
            job.title.prefixed_db_key(),
            params
        )),
        JobType::OnDependencyChange => None,
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    #[instrument(skip_all, fields(jobs = jobs.len()))]
    async fn push(&self, jobs: &[JobDescriptor]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        for job in jobs {
            let params = job.encode().to_json()?;
            let sig = signature(job, &params);
            let res = sqlx::query(
                "INSERT INTO jobs (job_type, title_namespace, title_key, params, signature, root_key, root_timestamp, attempt, due_at, created_at)
                 SELECT ?, ?, ?, ?, ?, ?, ?, 0, ?, ?
                 WHERE ? IS NULL OR NOT EXISTS (
                     SELECT 1 FROM jobs WHERE signature = ? AND claimed_at IS NULL
                 )",
            )
            .bind(job.job_type().as_str())
            .bind(job.title.namespace)
            .bind(job.title.db_key())
            .bind(&params)
            .bind(&sig)
            .bind(job.root.as_ref().map(|r| r.key.as_str()))
            .bind(job.root.as_ref().map(|r| r.timestamp))
            .bind(now)
            .bind(job.created_at)
            .bind(&sig)
            .bind(&sig)
            .execute(&mut *tx)
            .await
            .context("failed to enqueue job")?;
            if res.rows_affected() == 0 {
                debug!(title = %job.title, mode = job.mode(), "duplicate job already queued");
            }
        }
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn deduplicate_root_job(&self, job: &JobDescriptor) -> Result<bool> {
        let Some(root) = &job.root else {
            return Ok(false);
        };
        let mut tx = self.pool.begin().await?;
        let current = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT newest_timestamp FROM root_jobs WHERE root_key = ?",
        )
        .bind(&root.key)
        .fetch_optional(&mut *tx)
        .await?;
        if current.map_or(true, |current| root.timestamp > current) {
            sqlx::query(
                "INSERT INTO root_jobs (root_key, newest_timestamp) VALUES (?, ?)
                 ON CONFLICT(root_key) DO UPDATE SET newest_timestamp = excluded.newest_timestamp",
            )
            .bind(&root.key)
            .bind(root.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(true)
    }
}
