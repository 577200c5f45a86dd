use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use manga_sync::app::api::{AppState, router};
use manga_sync::app::merge::SyncContext;
use manga_sync::app::runner::JobRunner;
use manga_sync::cli::StorageArgs;
use manga_sync::provider::ProviderRegistry;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct AppArgs {
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[command(flatten)]
    storage: StorageArgs,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    manga_sync::logging::init_with_default("info,tower_http=debug")?;

    let args = AppArgs::parse();
    tracing::info!(?args, "starting manga-sync-app");

    let settings = args.storage.settings().context("load settings")?;
    let registry =
        ProviderRegistry::load_dir(&settings.providers_dir).context("load provider configs")?;
    if registry.is_empty() {
        tracing::warn!(dir = %settings.providers_dir.display(), "no provider configs found");
    } else {
        tracing::info!(providers = ?registry.names().collect::<Vec<_>>(), "provider configs loaded");
    }

    let ctx = SyncContext::from_settings(&settings)?;
    let cancel = CancellationToken::new();
    let runner = JobRunner::new(Arc::clone(&ctx.queue));
    let runner_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { runner.run(cancel).await })
    };

    let app = router(AppState {
        ctx,
        registry: Arc::new(registry),
        image_dir: settings.image_dir.clone(),
    });

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(err) = result {
                        tracing::error!(%err, "install ctrl-c handler");
                    }
                    tracing::info!("shutdown requested");
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        })
        .await
        .context("serve")?;

    cancel.cancel();
    runner_task.await.context("join job runner")?;
    Ok(())
}
