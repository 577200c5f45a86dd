use std::path::{Path, PathBuf};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::Digest as _;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{SyncError, SyncResult};
use crate::fsutil::{read_json, write_json_atomic};
use crate::model::{CatalogEntry, Page};

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_by_title(&self, title: &str) -> SyncResult<Option<CatalogEntry>>;
    async fn get(&self, id: Uuid) -> SyncResult<Option<CatalogEntry>>;
    async fn list(&self) -> SyncResult<Vec<CatalogEntry>>;

    /// Assigns a fresh id and `updated_at`. Fails with `Conflict` when the
    /// title is already stored.
    async fn create(&self, entry: &mut CatalogEntry) -> SyncResult<Uuid>;

    /// Whole-entry replace; bumps `updated_at`.
    async fn update(&self, entry: &mut CatalogEntry) -> SyncResult<()>;

    /// Replaces one chapter's page list and bumps `updated_at`, leaving every
    /// other field as currently stored. Returns false when the entry or the
    /// chapter no longer exists.
    async fn update_chapter_pages(
        &self,
        entry_id: Uuid,
        chapter_id: Uuid,
        pages: Vec<Page>,
    ) -> SyncResult<bool>;
}

#[derive(Debug, Serialize, Deserialize)]
struct TitleIndexRecord {
    id: Uuid,
    title: String,
}

/// One JSON document per entry plus a create-new title index.
#[derive(Debug)]
pub struct LocalFsCatalogStore {
    base_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl LocalFsCatalogStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn catalog_dir(&self) -> PathBuf {
        self.base_dir.join("catalog")
    }

    fn entries_dir(&self) -> PathBuf {
        self.catalog_dir().join("entries")
    }

    fn titles_dir(&self) -> PathBuf {
        self.catalog_dir().join("titles")
    }

    fn entry_path(&self, id: Uuid) -> PathBuf {
        self.entries_dir().join(format!("{id}.json"))
    }

    fn title_path(&self, title: &str) -> PathBuf {
        self.titles_dir().join(format!("{}.json", title_key(title)))
    }

    async fn read_entry(&self, id: Uuid) -> anyhow::Result<Option<CatalogEntry>> {
        let path = self.entry_path(id);
        read_json(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))
    }

    /// Publishes the index record with a hard link from a fully written temp
    /// file, so the record appears atomically and only when absent. A record
    /// whose entry file is missing is left over from a failed create and is
    /// reclaimed.
    async fn claim_title(&self, title: &str, id: Uuid) -> SyncResult<()> {
        let dir = self.titles_dir();
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("create title dir: {}", dir.display()))?;

        let path = self.title_path(title);
        let data = serde_json::to_vec(&TitleIndexRecord {
            id,
            title: title.to_string(),
        })
        .context("serialize title index")?;
        let tmp_path = path.with_extension(format!("tmp.{}", Uuid::new_v4().simple()));
        fs::write(&tmp_path, &data)
            .await
            .with_context(|| format!("write tmp: {}", tmp_path.display()))?;

        let result = self.link_title(title, &tmp_path, &path).await;
        let _ = fs::remove_file(&tmp_path).await;
        result
    }

    async fn link_title(&self, title: &str, tmp_path: &Path, path: &Path) -> SyncResult<()> {
        let mut reclaimed = false;
        loop {
            match fs::hard_link(tmp_path, path).await {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if reclaimed || !self.is_stale_title(path).await? {
                        return Err(SyncError::Conflict(title.to_string()));
                    }
                    tracing::warn!(title, path = %path.display(), "reclaiming stale title index");
                    fs::remove_file(path)
                        .await
                        .with_context(|| format!("remove stale title index: {}", path.display()))?;
                    reclaimed = true;
                }
                Err(err) => {
                    return Err(anyhow::Error::from(err)
                        .context(format!("create title index: {}", path.display()))
                        .into());
                }
            }
        }
    }

    async fn is_stale_title(&self, path: &Path) -> SyncResult<bool> {
        let Some(record) = read_json::<TitleIndexRecord>(path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
        else {
            return Ok(false);
        };
        let entry_path = self.entry_path(record.id);
        let exists = fs::try_exists(&entry_path)
            .await
            .with_context(|| format!("stat: {}", entry_path.display()))?;
        Ok(!exists)
    }
}

fn title_key(title: &str) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(title.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl CatalogStore for LocalFsCatalogStore {
    async fn find_by_title(&self, title: &str) -> SyncResult<Option<CatalogEntry>> {
        let path = self.title_path(title);
        let Some(record) = read_json::<TitleIndexRecord>(&path)
            .await
            .with_context(|| format!("read: {}", path.display()))?
        else {
            return Ok(None);
        };
        if record.title != title {
            return Ok(None);
        }
        Ok(self.read_entry(record.id).await?)
    }

    async fn get(&self, id: Uuid) -> SyncResult<Option<CatalogEntry>> {
        Ok(self.read_entry(id).await?)
    }

    async fn list(&self) -> SyncResult<Vec<CatalogEntry>> {
        let dir = self.entries_dir();
        let mut read_dir = match fs::read_dir(&dir).await {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(anyhow::Error::from(err)
                    .context(format!("read dir: {}", dir.display()))
                    .into());
            }
        };

        let mut entries = Vec::new();
        while let Some(item) = read_dir
            .next_entry()
            .await
            .with_context(|| format!("read dir: {}", dir.display()))?
        {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(entry) = read_json::<CatalogEntry>(&path)
                .await
                .with_context(|| format!("read: {}", path.display()))?
            {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.title.cmp(&b.title));
        Ok(entries)
    }

    async fn create(&self, entry: &mut CatalogEntry) -> SyncResult<Uuid> {
        let _guard = self.write_lock.lock().await;

        let id = Uuid::new_v4();
        self.claim_title(&entry.title, id).await?;

        entry.id = id;
        entry.updated_at = Utc::now();
        if let Err(err) = write_json_atomic(&self.entry_path(id), entry).await {
            let title_path = self.title_path(&entry.title);
            if let Err(remove_err) = fs::remove_file(&title_path).await {
                tracing::warn!(path = %title_path.display(), error = %remove_err, "title index not rolled back");
            }
            return Err(err.context("write entry").into());
        }
        Ok(id)
    }

    async fn update(&self, entry: &mut CatalogEntry) -> SyncResult<()> {
        let _guard = self.write_lock.lock().await;

        let path = self.entry_path(entry.id);
        if !fs::try_exists(&path)
            .await
            .with_context(|| format!("stat: {}", path.display()))?
        {
            return Err(anyhow::anyhow!("catalog entry not found: {}", entry.id).into());
        }
        entry.updated_at = Utc::now();
        write_json_atomic(&path, entry)
            .await
            .context("write entry")?;
        Ok(())
    }

    async fn update_chapter_pages(
        &self,
        entry_id: Uuid,
        chapter_id: Uuid,
        pages: Vec<Page>,
    ) -> SyncResult<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(mut entry) = self.read_entry(entry_id).await? else {
            return Ok(false);
        };
        let Some(chapter) = entry
            .chapters
            .iter_mut()
            .find(|chapter| chapter.id == chapter_id)
        else {
            return Ok(false);
        };

        chapter.pages = pages;
        entry.updated_at = Utc::now();
        write_json_atomic(&self.entry_path(entry_id), &entry)
            .await
            .context("write entry")?;
        Ok(true)
    }
}

#[cfg(test)]
pub(crate) fn sample_entry(title: &str, numbers: &[f64]) -> CatalogEntry {
    use crate::model::Chapter;

    let now = Utc::now();
    CatalogEntry {
        id: Uuid::nil(),
        title: title.to_string(),
        author: None,
        description: None,
        kind: None,
        status: None,
        genres: Vec::new(),
        url: format!("https://komiku.example/manga/{title}/"),
        thumbnail_url: None,
        local_thumbnail: None,
        chapters: numbers
            .iter()
            .map(|number| Chapter::new(*number, format!("/chapter-{number}/")))
            .collect(),
        created_at: now,
        updated_at: now,
    }
}
