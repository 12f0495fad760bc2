mod common;

use std::sync::Arc;

use common::{test_urls, RecordingTransport};
use restbase_update::db::{self, SqliteJobQueue, SqliteWiki};
use restbase_update::hooks::EventHooks;
use restbase_update::http::{Dispatcher, PARENT_REVISION, RESTBASE_MODE};
use restbase_update::jobs::{JobRunner, PartitionLimits};
use restbase_update::model::{DependencyTable, Title, NS_FILE, NS_MAIN, NS_TEMPLATE};
use restbase_update::worker;

const PREFIX: &str = "http://restbase.test/en.example.org/v1";

struct Setup {
    queue: SqliteJobQueue,
    wiki: SqliteWiki,
    hooks: EventHooks,
    runner: JobRunner,
    transport: RecordingTransport,
}

async fn setup(rows_per_job: usize, titles_per_batch: usize) -> Setup {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let queue = SqliteJobQueue::new(pool.clone());
    let wiki = SqliteWiki::new(pool);
    let transport = RecordingTransport::default();
    let runner = JobRunner::new(
        test_urls(),
        Dispatcher::new(Arc::new(transport.clone())),
        Arc::new(wiki.clone()),
        Arc::new(wiki.clone()),
        Arc::new(queue.clone()),
        PartitionLimits {
            rows_per_job,
            titles_per_batch,
        },
    );
    let hooks = EventHooks::new(Arc::new(queue.clone()), Arc::new(wiki.clone()));
    Setup {
        queue,
        wiki,
        hooks,
        runner,
        transport,
    }
}

/// Create `n` articles transcluding or embedding `target`.
async fn add_backlinks(wiki: &SqliteWiki, table: DependencyTable, target: &Title, n: usize) -> Vec<i64> {
    let mut revs = Vec::new();
    for i in 0..n {
        let (page, rev) = wiki
            .save_revision(&Title::new(NS_MAIN, format!("Article {}", i)))
            .await
            .unwrap();
        wiki.add_link(page, table, target).await.unwrap();
        revs.push(rev);
    }
    revs
}

#[tokio::test]
async fn template_edit_fans_out_to_every_transcluding_page() {
    let s = setup(3, 2).await;
    let template = Title::new(NS_TEMPLATE, "Infobox city");
    let (_, first) = s.wiki.save_revision(&template).await.unwrap();
    let (_, latest) = s.wiki.save_revision(&template).await.unwrap();
    let article_revs = add_backlinks(&s.wiki, DependencyTable::Templatelinks, &template, 7).await;

    let jobs = s.hooks.on_article_edit(&template, true).await.unwrap();
    assert_eq!(jobs.len(), 2);

    let processed = worker::drain(&s.queue, &s.runner, 60).await.unwrap();
    // page job, 3 backlink scans, 5 page batches
    assert_eq!(processed, 9);
    assert_eq!(s.queue.count_pending().await.unwrap(), 0);

    let reqs = s.transport.requests();
    let own = reqs
        .iter()
        .find(|r| r.url.contains("Template:Infobox_city"))
        .expect("template refreshed");
    assert_eq!(own.url, format!("{}/page/html/Template:Infobox_city/{}", PREFIX, latest));
    assert_eq!(own.header(PARENT_REVISION), Some(first.to_string().as_str()));

    let mut batch_urls: Vec<_> = reqs
        .iter()
        .filter(|r| r.header(RESTBASE_MODE) == Some("templates"))
        .map(|r| r.url.clone())
        .collect();
    batch_urls.sort();
    let mut expected: Vec<_> = article_revs
        .iter()
        .enumerate()
        .map(|(i, rev)| format!("{}/page/html/Article_{}/{}", PREFIX, i, rev))
        .collect();
    expected.sort();
    assert_eq!(batch_urls, expected);
}

#[tokio::test]
async fn repeated_edits_enumerate_backlinks_once() {
    let s = setup(100, 10).await;
    let template = Title::new(NS_TEMPLATE, "Nav");
    s.wiki.save_revision(&template).await.unwrap();
    add_backlinks(&s.wiki, DependencyTable::Templatelinks, &template, 4).await;

    s.hooks.on_article_edit(&template, true).await.unwrap();
    s.hooks.on_article_edit(&template, true).await.unwrap();
    // identical page jobs collapsed, both backlink roots queued
    assert_eq!(s.queue.count_pending().await.unwrap(), 3);

    worker::drain(&s.queue, &s.runner, 60).await.unwrap();

    let reqs = s.transport.requests();
    let batch = reqs
        .iter()
        .filter(|r| r.header(RESTBASE_MODE).is_some())
        .count();
    assert_eq!(batch, 4, "each transcluding page refreshed once");
    assert_eq!(reqs.len() - batch, 1, "template refreshed once");
}

#[tokio::test]
async fn null_edit_schedules_nothing() {
    let s = setup(10, 10).await;
    let page = Title::new(NS_MAIN, "Quiet");
    s.wiki.save_revision(&page).await.unwrap();
    assert!(s.hooks.on_article_edit(&page, false).await.unwrap().is_empty());
    assert_eq!(s.queue.count_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn failed_invalidation_is_retried_until_it_succeeds() {
    let s = setup(10, 10).await;
    let template = Title::new(NS_TEMPLATE, "Flaky");
    s.wiki.save_revision(&template).await.unwrap();
    add_backlinks(&s.wiki, DependencyTable::Templatelinks, &template, 3).await;
    s.transport.fail_urls_containing("/Article_1/");

    s.hooks.on_article_edit(&template, true).await.unwrap();
    worker::drain(&s.queue, &s.runner, 60).await.unwrap();
    assert_eq!(s.queue.count_pending().await.unwrap(), 1, "failed batch waits in backoff");

    s.transport.heal();
    sqlx::query("UPDATE jobs SET due_at = datetime('now', '-1 seconds')")
        .execute(s.queue.pool())
        .await
        .unwrap();
    assert_eq!(worker::drain(&s.queue, &s.runner, 60).await.unwrap(), 1);
    assert_eq!(s.queue.count_pending().await.unwrap(), 0);

    let article_1 = s
        .transport
        .urls()
        .into_iter()
        .filter(|u| u.contains("/Article_1/"))
        .count();
    assert_eq!(article_1, 2);
}

#[tokio::test]
async fn file_upload_refreshes_embedding_pages() {
    let s = setup(10, 10).await;
    let file = Title::new(NS_FILE, "Skyline.jpg");
    s.wiki.save_revision(&file).await.unwrap();
    add_backlinks(&s.wiki, DependencyTable::Imagelinks, &file, 2).await;

    let jobs = s.hooks.on_file_upload(&file).await.unwrap();
    assert_eq!(jobs.len(), 1);
    worker::drain(&s.queue, &s.runner, 60).await.unwrap();

    let reqs = s.transport.requests();
    assert_eq!(reqs.len(), 2);
    assert!(reqs.iter().all(|r| r.header(RESTBASE_MODE) == Some("files")));
    assert!(reqs.iter().all(|r| !r.url.contains("File:")));
}

#[tokio::test]
async fn move_refreshes_old_and_new_titles() {
    let s = setup(10, 10).await;
    let old = Title::new(NS_MAIN, "Old place");
    let new = Title::new(NS_MAIN, "New place");
    let (_, old_rev) = s.wiki.save_revision(&old).await.unwrap();
    let (_, new_rev) = s.wiki.save_revision(&new).await.unwrap();

    s.hooks
        .on_title_move(&old, &new, old_rev, new_rev)
        .await
        .unwrap();
    worker::drain(&s.queue, &s.runner, 60).await.unwrap();

    let mut urls = s.transport.urls();
    urls.sort();
    assert_eq!(
        urls,
        vec![
            format!("{}/page/html/New_place/{}", PREFIX, new_rev),
            format!("{}/page/html/Old_place/{}", PREFIX, old_rev),
        ]
    );
}

#[tokio::test]
async fn revision_visibility_and_delete_reach_restbase() {
    let s = setup(10, 10).await;
    let page = Title::new(NS_MAIN, "Hidden");
    let (_, r1) = s.wiki.save_revision(&page).await.unwrap();
    let (_, r2) = s.wiki.save_revision(&page).await.unwrap();

    s.hooks
        .on_revision_visibility_set(&page, vec![r1])
        .await
        .unwrap();
    s.hooks.on_article_delete(&page).await.unwrap();
    worker::drain(&s.queue, &s.runner, 60).await.unwrap();

    assert_eq!(
        s.transport.urls(),
        vec![
            format!("{}/page/revision/{}", PREFIX, r1),
            format!("{}/page/html/Hidden/{}", PREFIX, r2),
        ]
    );
}

#[tokio::test]
async fn job_survives_a_database_error_after_its_claim() {
    let s = setup(10, 10).await;
    let file = Title::new(NS_FILE, "Banner.png");
    s.wiki.save_revision(&file).await.unwrap();
    add_backlinks(&s.wiki, DependencyTable::Imagelinks, &file, 2).await;
    s.hooks.on_file_upload(&file).await.unwrap();

    sqlx::query("ALTER TABLE root_jobs RENAME TO root_jobs_offline")
        .execute(s.queue.pool())
        .await
        .unwrap();
    let err = worker::process_next_job(&s.queue, &s.runner, 60)
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("root_jobs"), "{:#}", err);
    sqlx::query("ALTER TABLE root_jobs_offline RENAME TO root_jobs")
        .execute(s.queue.pool())
        .await
        .unwrap();

    // the claim was handed back, so the next pass picks the job up at once
    assert_eq!(worker::drain(&s.queue, &s.runner, 60).await.unwrap(), 2);
    assert_eq!(s.queue.count_pending().await.unwrap(), 0);
    assert_eq!(s.transport.requests().len(), 2);
}
