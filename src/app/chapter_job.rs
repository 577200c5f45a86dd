use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use crate::app::gate::DownloadGate;
use crate::error::{SyncError, SyncResult};
use crate::extract::parse_page_images;
use crate::fetch::PageFetcher;
use crate::materialize::ImageMaterializer;
use crate::model::Page;
use crate::provider::ProviderConfig;
use crate::store::CatalogStore;

/// Everything a deferred page scrape needs to know about its chapter.
#[derive(Debug, Clone)]
pub struct ChapterPageJob {
    pub entry_id: Uuid,
    pub chapter_id: Uuid,
    pub title: String,
    pub chapter_number: f64,
    pub link: String,
}

impl ChapterPageJob {
    pub fn label(&self) -> String {
        format!("{} #{}", self.title, self.chapter_number)
    }
}

#[derive(Clone)]
pub struct ChapterScraper {
    provider: Arc<ProviderConfig>,
    fetcher: Arc<dyn PageFetcher>,
    materializer: ImageMaterializer,
    gate: DownloadGate,
    store: Arc<dyn CatalogStore>,
}

impl ChapterScraper {
    pub fn new(
        provider: Arc<ProviderConfig>,
        fetcher: Arc<dyn PageFetcher>,
        materializer: ImageMaterializer,
        gate: DownloadGate,
        store: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            provider,
            fetcher,
            materializer,
            gate,
            store,
        }
    }

    /// Scrapes the chapter and replaces its stored page list.
    pub async fn run(&self, job: &ChapterPageJob, cancel: &CancellationToken) -> SyncResult<()> {
        let pages = self.scrape_pages(job, cancel).await?;
        let count = pages.len();
        let updated = self
            .store
            .update_chapter_pages(job.entry_id, job.chapter_id, pages)
            .await?;
        if updated {
            tracing::info!(title = %job.title, chapter = job.chapter_number, pages = count, "chapter pages stored");
        } else {
            tracing::warn!(
                entry_id = %job.entry_id,
                chapter_id = %job.chapter_id,
                "chapter no longer stored; pages dropped"
            );
        }
        Ok(())
    }

    /// Fetches the chapter markup and materializes every page image through
    /// the gate. Pages that fail are left out; the rest keep source order.
    pub async fn scrape_pages(
        &self,
        job: &ChapterPageJob,
        cancel: &CancellationToken,
    ) -> SyncResult<Vec<Page>> {
        let chapter_url = self.provider.resolve(&job.link)?;
        let html = cancellable(cancel, self.fetcher.fetch_text(chapter_url.as_str())).await??;
        let locators = parse_page_images(&html, &self.provider)?;
        if locators.is_empty() {
            return Err(SyncError::parse(format!(
                "no page images found at {chapter_url}"
            )));
        }

        let total = locators.len();
        let mut tasks = JoinSet::new();
        for (index, locator) in locators.into_iter().enumerate() {
            let image_url = absolute_locator(&chapter_url, &locator);
            let materializer = self.materializer.clone();
            let gate = self.gate.clone();
            let title = job.title.clone();
            let chapter_number = job.chapter_number;
            tasks.spawn(async move {
                let result = gate
                    .run(materializer.materialize_page(&title, chapter_number, &image_url, index))
                    .await
                    .and_then(|inner| inner);
                (index, image_url, result)
            });
        }

        let mut stored = Vec::with_capacity(total);
        loop {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(SyncError::Cancelled);
                }
                joined = tasks.join_next() => joined,
            };
            let Some(joined) = joined else {
                break;
            };
            match joined {
                Ok((index, image_url, Ok(local_image))) => {
                    stored.push((index, Page::new(image_url, Some(local_image))));
                }
                Ok((index, image_url, Err(err))) => {
                    tracing::warn!(index, url = %image_url, error = %err, "page not materialized");
                }
                Err(err) => {
                    tracing::warn!(error = %err, "page task did not complete");
                }
            }
        }

        stored.sort_by_key(|(index, _)| *index);
        if stored.len() < total {
            tracing::warn!(
                title = %job.title,
                chapter = job.chapter_number,
                stored = stored.len(),
                total,
                "some pages were dropped"
            );
        }
        Ok(stored.into_iter().map(|(_, page)| page).collect())
    }
}

async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> SyncResult<T>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        value = fut => Ok(value),
    }
}

fn absolute_locator(chapter_url: &Url, locator: &str) -> String {
    match chapter_url.join(locator) {
        Ok(url) => url.to_string(),
        Err(_) => locator.to_string(),
    }
}
