use anyhow::Result;
use async_trait::async_trait;
use sqlx::Row;
use tracing::instrument;

use super::Pool;
use crate::model::{DependencyTable, PageId, RevisionId, Title};
use crate::wiki::{Backlink, BacklinkSource, PageStore};

/// Page, revision and link tables in the local database.
#[derive(Debug, Clone)]
pub struct SqliteWiki {
    pool: Pool,
}

impl SqliteWiki {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Create the page if needed and append a revision, which becomes the
    /// page's latest.
    #[instrument(skip_all, fields(%title))]
    pub async fn save_revision(&self, title: &Title) -> Result<(PageId, RevisionId)> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO page (page_namespace, page_title) VALUES (?, ?)
             ON CONFLICT(page_namespace, page_title) DO NOTHING",
        )
        .bind(title.namespace)
        .bind(title.db_key())
        .execute(&mut *tx)
        .await?;
        let page_id = sqlx::query_scalar::<_, i64>(
            "SELECT page_id FROM page WHERE page_namespace = ? AND page_title = ?",
        )
        .bind(title.namespace)
        .bind(title.db_key())
        .fetch_one(&mut *tx)
        .await?;
        let rev_id = sqlx::query("INSERT INTO revision (rev_page) VALUES (?) RETURNING rev_id")
            .bind(page_id)
            .fetch_one(&mut *tx)
            .await?
            .get::<i64, _>("rev_id");
        sqlx::query("UPDATE page SET page_latest = ? WHERE page_id = ?")
            .bind(rev_id)
            .bind(page_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok((page_id, rev_id))
    }

    /// Record that page `from` uses `target` through `table`.
    pub async fn add_link(&self, from: PageId, table: DependencyTable, target: &Title) -> Result<()> {
        match table {
            DependencyTable::Templatelinks => {
                sqlx::query(
                    "INSERT OR IGNORE INTO templatelinks (tl_from, tl_namespace, tl_title) VALUES (?, ?, ?)",
                )
                .bind(from)
                .bind(target.namespace)
                .bind(target.db_key())
                .execute(&self.pool)
                .await?;
            }
            DependencyTable::Imagelinks => {
                sqlx::query("INSERT OR IGNORE INTO imagelinks (il_from, il_to) VALUES (?, ?)")
                    .bind(from)
                    .bind(target.db_key())
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PageStore for SqliteWiki {
    async fn latest_revision(&self, title: &Title) -> Result<Option<RevisionId>> {
        let latest = sqlx::query_scalar::<_, i64>(
            "SELECT page_latest FROM page WHERE page_namespace = ? AND page_title = ?",
        )
        .bind(title.namespace)
        .bind(title.db_key())
        .fetch_optional(&self.pool)
        .await?;
        Ok(latest.filter(|rev| *rev > 0))
    }

    async fn previous_revision(
        &self,
        title: &Title,
        revision: RevisionId,
    ) -> Result<Option<RevisionId>> {
        let previous = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(r.rev_id) FROM revision r
             JOIN page p ON p.page_id = r.rev_page
             WHERE p.page_namespace = ? AND p.page_title = ? AND r.rev_id < ?",
        )
        .bind(title.namespace)
        .bind(title.db_key())
        .bind(revision)
        .fetch_one(&self.pool)
        .await?;
        Ok(previous)
    }
}

#[async_trait]
impl BacklinkSource for SqliteWiki {
    #[instrument(skip_all, fields(%title, table = table.as_str(), ?after, limit))]
    async fn backlinks(
        &self,
        title: &Title,
        table: DependencyTable,
        after: Option<PageId>,
        limit: usize,
    ) -> Result<Vec<Backlink>> {
        let after = after.unwrap_or(0);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = match table {
            DependencyTable::Templatelinks => {
                sqlx::query(
                    "SELECT p.page_id, p.page_namespace, p.page_title
                     FROM templatelinks tl JOIN page p ON p.page_id = tl.tl_from
                     WHERE tl.tl_namespace = ? AND tl.tl_title = ? AND tl.tl_from > ?
                     ORDER BY tl.tl_from ASC
                     LIMIT ?",
                )
                .bind(title.namespace)
                .bind(title.db_key())
                .bind(after)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            DependencyTable::Imagelinks => {
                sqlx::query(
                    "SELECT p.page_id, p.page_namespace, p.page_title
                     FROM imagelinks il JOIN page p ON p.page_id = il.il_from
                     WHERE il.il_to = ? AND il.il_from > ?
                     ORDER BY il.il_from ASC
                     LIMIT ?",
                )
                .bind(title.db_key())
                .bind(after)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter()
            .map(|row| {
                Ok(Backlink {
                    page_id: row.try_get("page_id")?,
                    title: Title::new(
                        row.try_get::<i32, _>("page_namespace")?,
                        row.try_get::<String, _>("page_title")?,
                    ),
                })
            })
            .collect()
    }
}
