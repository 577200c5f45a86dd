use std::sync::Arc;

use anyhow::Context as _;
use tokio_util::sync::CancellationToken;

use crate::app::merge::SyncContext;
use crate::app::runner::JobRunner;
use crate::cli::SyncArgs;
use crate::provider::ProviderRegistry;

/// One-shot sync: merge the listing, then run the job runner until every
/// scheduled chapter job has been executed. Ctrl-C cancels the runner.
pub async fn run(args: SyncArgs) -> anyhow::Result<()> {
    let settings = args.storage.settings().context("load settings")?;
    let registry =
        ProviderRegistry::load_dir(&settings.providers_dir).context("load provider configs")?;
    let provider = registry.get(&args.provider)?;
    let ctx = SyncContext::from_settings(&settings)?;

    let cancel = CancellationToken::new();
    let runner = JobRunner::new(Arc::clone(&ctx.queue));
    let runner_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run(cancel).await })
    };
    let signal_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; cancelling");
                cancel.cancel();
            }
        })
    };

    let merged = ctx
        .for_provider(provider)
        .merge(&args.url, !args.no_pages)
        .await;
    ctx.queue.close();
    runner_task.await.context("join job runner")?;
    signal_task.abort();

    let outcome = merged.context("merge listing")?;
    let failed = ctx
        .queue
        .list_jobs()
        .into_iter()
        .filter(|job| job.status.is_failed())
        .collect::<Vec<_>>();
    for job in &failed {
        tracing::warn!(job_id = %job.job_id, label = %job.label, status = ?job.status, "chapter job failed");
    }

    let entry = ctx
        .store
        .get(outcome.entry.id)
        .await?
        .unwrap_or(outcome.entry);
    let json = serde_json::to_string_pretty(&entry).context("serialize catalog entry")?;
    println!("{json}");
    Ok(())
}
