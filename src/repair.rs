//! Reconciles stored asset references with what is actually on disk.

use std::path::Path;

use anyhow::Context as _;
use serde::Serialize;

use crate::cli::RepairArgs;
use crate::error::SyncResult;
use crate::materialize::{THUMBNAIL_FILE_NAME, page_file_name};
use crate::model::CatalogEntry;
use crate::sanitize::title_dir_name;
use crate::store::{CatalogStore, LocalFsCatalogStore};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairReport {
    pub entries_updated: usize,
    pub pages_fixed: usize,
}

pub async fn repair(store: &dyn CatalogStore, image_root: &Path) -> SyncResult<RepairReport> {
    let mut report = RepairReport::default();
    for mut entry in store.list().await? {
        let Some(title_dir) = title_dir_name(&entry.title) else {
            tracing::warn!(title = %entry.title, "skipping entry without a usable directory name");
            continue;
        };
        let thumbnail_fixed = repair_thumbnail(&mut entry, &title_dir, image_root).await;
        let pages_fixed = repair_pages(&mut entry, &title_dir, image_root).await;
        if thumbnail_fixed || pages_fixed > 0 {
            store.update(&mut entry).await?;
            report.entries_updated += 1;
            report.pages_fixed += pages_fixed;
            tracing::info!(title = %entry.title, pages_fixed, thumbnail_fixed, "catalog entry repaired");
        }
    }
    Ok(report)
}

pub async fn run(args: RepairArgs) -> anyhow::Result<()> {
    let settings = args.storage.settings().context("load settings")?;
    let store = LocalFsCatalogStore::new(settings.data_dir.clone());
    let report = repair(&store, &settings.image_dir).await?;
    let json = serde_json::to_string_pretty(&report).context("serialize repair report")?;
    println!("{json}");
    Ok(())
}

async fn repair_thumbnail(entry: &mut CatalogEntry, title_dir: &str, image_root: &Path) -> bool {
    let expected = format!("{title_dir}/{THUMBNAIL_FILE_NAME}");
    repair_reference(&mut entry.local_thumbnail, &expected, image_root).await
}

async fn repair_pages(entry: &mut CatalogEntry, title_dir: &str, image_root: &Path) -> usize {
    let mut fixed = 0;
    for chapter in &mut entry.chapters {
        let chapter_dir = format!("{title_dir}/{}", chapter.number_segment());
        for (index, page) in chapter.pages.iter_mut().enumerate() {
            let expected = format!("{chapter_dir}/{}", page_file_name(index));
            if repair_reference(&mut page.local_image, &expected, image_root).await {
                fixed += 1;
            }
        }
    }
    fixed
}

/// Points `reference` at `expected`, moving a misplaced file there when the
/// expected one does not exist yet. Returns whether the reference changed.
async fn repair_reference(reference: &mut Option<String>, expected: &str, image_root: &Path) -> bool {
    let Some(current) = reference.clone() else {
        if exists(&image_root.join(expected)).await {
            *reference = Some(expected.to_string());
            return true;
        }
        return false;
    };

    let trimmed = current.trim_start_matches('/');
    let mut fixed = trimmed.len() != current.len();
    if fixed {
        *reference = Some(trimmed.to_string());
    }
    if trimmed == expected {
        return fixed;
    }

    let old_path = image_root.join(trimmed);
    let new_path = image_root.join(expected);
    if exists(&old_path).await {
        if !exists(&new_path).await {
            if let Err(err) = move_file(&old_path, &new_path).await {
                tracing::warn!(from = %old_path.display(), to = %new_path.display(), error = %format!("{err:#}"), "asset file not moved");
                return fixed;
            }
        }
        *reference = Some(expected.to_string());
        fixed = true;
    } else if exists(&new_path).await {
        *reference = Some(expected.to_string());
        fixed = true;
    }
    fixed
}

async fn move_file(from: &Path, to: &Path) -> anyhow::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("create dir: {}", parent.display()))?;
    }
    tokio::fs::rename(from, to)
        .await
        .with_context(|| format!("rename {} -> {}", from.display(), to.display()))
}

async fn exists(path: &Path) -> bool {
    tokio::fs::try_exists(path).await.unwrap_or(false)
}
