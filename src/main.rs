use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    manga_sync::logging::init().context("init logging")?;

    let cli = manga_sync::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        manga_sync::cli::Command::Sync(args) => {
            manga_sync::sync::run(args).await.context("sync")?;
        }
        manga_sync::cli::Command::Repair(args) => {
            manga_sync::repair::run(args).await.context("repair")?;
        }
    }

    Ok(())
}
