use anyhow::Result;
use clap::Parser;
use restbase_update::config;
use restbase_update::db::{self, SqliteJobQueue, SqliteWiki};
use restbase_update::http::{Dispatcher, ReqwestTransport};
use restbase_update::jobs::JobRunner;
use restbase_update::worker;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "Run queued RESTBase invalidation jobs")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run every job that is currently due, then exit
    #[arg(long)]
    drain: bool,
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

    let queue = SqliteJobQueue::new(pool.clone())
        .with_claim_lease(cfg.worker.claim_lease_seconds as i64);
    let wiki = Arc::new(SqliteWiki::new(pool));
    let transport = ReqwestTransport::new(&cfg.http.user_agent, cfg.http_timeout())?;
    let runner = JobRunner::new(
        cfg.restbase_urls(),
        Dispatcher::new(Arc::new(transport)),
        wiki.clone(),
        wiki,
        Arc::new(queue.clone()),
        cfg.partition_limits(),
    );
    let max_backoff = cfg.worker.max_backoff_seconds as i64;

    let released = queue.release_claims().await?;
    if released > 0 {
        info!(released, "released jobs claimed by a previous run");
    }

    if args.drain {
        let processed = worker::drain(&queue, &runner, max_backoff).await?;
        let remaining = queue.count_pending().await?;
        info!(processed, remaining, "drain finished");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poll_sleep = Duration::from_millis(cfg.worker.poll_interval_ms);
    let workers: Vec<_> = (0..cfg.worker.concurrency)
        .map(|_| {
            tokio::spawn(worker::run_loop(
                queue.clone(),
                runner.clone(),
                poll_sleep,
                max_backoff,
                shutdown_rx.clone(),
            ))
        })
        .collect();

    info!(
        workers = workers.len(),
        prefix = cfg.restbase_urls().prefix(),
        "starting restbase update workers"
    );
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    for handle in workers {
        if let Err(err) = handle.await {
            error!(?err, "worker task panicked");
        }
    }
    Ok(())
}
