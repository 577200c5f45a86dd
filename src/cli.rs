use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::settings::Settings;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Merge one listing into the catalog and scrape pages of new chapters.
    Sync(SyncArgs),
    /// Reconcile stored asset references with files on disk.
    Repair(RepairArgs),
}

#[derive(Debug, Clone, Args)]
pub struct StorageArgs {
    /// Directory holding catalog documents.
    #[arg(long, default_value = "data")]
    pub data_dir: PathBuf,

    /// Root for materialized images. Defaults to `<data-dir>/images`.
    #[arg(long)]
    pub image_dir: Option<PathBuf>,

    /// Directory of provider configs (`*.json`, `*.yaml`, `*.yml`).
    #[arg(long, default_value = "providers")]
    pub providers_dir: PathBuf,
}

impl StorageArgs {
    /// Settings for these paths with `MANGA_SYNC_*` overrides applied.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        Settings::new(
            self.data_dir.clone(),
            self.image_dir.clone(),
            self.providers_dir.clone(),
        )
        .with_env()
    }
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Provider config name (file stem in the providers directory).
    #[arg(long)]
    pub provider: String,

    /// Listing URL, absolute or relative to the provider's base URL.
    #[arg(long)]
    pub url: String,

    /// Only merge metadata; do not schedule page scraping.
    #[arg(long, default_value_t = false)]
    pub no_pages: bool,

    #[command(flatten)]
    pub storage: StorageArgs,
}

#[derive(Debug, Args)]
pub struct RepairArgs {
    #[command(flatten)]
    pub storage: StorageArgs,
}
