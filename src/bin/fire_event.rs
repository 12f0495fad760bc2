use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use restbase_update::config;
use restbase_update::db::{self, SqliteJobQueue, SqliteWiki};
use restbase_update::hooks::EventHooks;
use restbase_update::model::{RevisionId, Title};

#[derive(Debug, Parser)]
#[command(author, version, about = "Queue RESTBase updates for a wiki change")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    event: Event,
}

#[derive(Debug, Subcommand)]
enum Event {
    /// A page's content changed
    Edit {
        title: String,
        /// Treat as a null edit (schedules nothing)
        #[arg(long)]
        unchanged: bool,
    },
    Delete {
        title: String,
    },
    Undelete {
        title: String,
    },
    /// A page was renamed
    Move {
        from: String,
        to: String,
        #[arg(long)]
        old_rev: RevisionId,
        #[arg(long)]
        new_rev: RevisionId,
    },
    /// Revisions were hidden or restored
    RevVisibility {
        title: String,
        #[arg(long = "rev", required = true)]
        revs: Vec<RevisionId>,
    },
    /// A file was uploaded
    Upload {
        title: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    let database_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| cfg.worker.database_url.clone());
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let hooks = EventHooks::new(
        Arc::new(SqliteJobQueue::new(pool.clone())),
        Arc::new(SqliteWiki::new(pool)),
    );

    let jobs = match args.event {
        Event::Edit { title, unchanged } => {
            hooks.on_article_edit(&Title::parse(&title), !unchanged).await?
        }
        Event::Delete { title } => hooks.on_article_delete(&Title::parse(&title)).await?,
        Event::Undelete { title } => hooks.on_article_undelete(&Title::parse(&title)).await?,
        Event::Move {
            from,
            to,
            old_rev,
            new_rev,
        } => {
            hooks
                .on_title_move(&Title::parse(&from), &Title::parse(&to), old_rev, new_rev)
                .await?
        }
        Event::RevVisibility { title, revs } => {
            hooks
                .on_revision_visibility_set(&Title::parse(&title), revs)
                .await?
        }
        Event::Upload { title } => hooks.on_file_upload(&Title::parse(&title)).await?,
    };

    for job in &jobs {
        info!(
            title = %job.title,
            job_type = job.job_type().as_str(),
            mode = job.mode(),
            root = job.root.as_ref().map(|r| r.key.as_str()),
            "queued"
        );
    }
    info!(queued = jobs.len(), "event scheduled");
    Ok(())
}
