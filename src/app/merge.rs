//! Incremental catalog merge.
//!
//! A listing is scraped, compared against what is stored under the same
//! title, and only chapters whose number exceeds the highest stored one are
//! appended and scheduled for page scraping.

use std::sync::Arc;

use anyhow::Context as _;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::app::chapter_job::{ChapterPageJob, ChapterScraper};
use crate::app::gate::DownloadGate;
use crate::app::queue::JobQueue;
use crate::error::{SyncError, SyncResult};
use crate::extract::{ScrapedChapter, ScrapedListing, parse_listing};
use crate::fetch::{HttpFetcher, PageFetcher};
use crate::materialize::{ImageMaterializer, WebpCodec};
use crate::model::{CatalogEntry, Chapter};
use crate::provider::ProviderConfig;
use crate::settings::Settings;
use crate::store::{CatalogStore, LocalFsCatalogStore};

/// Process-wide collaborators shared by every merge and every chapter job.
#[derive(Clone)]
pub struct SyncContext {
    pub fetcher: Arc<dyn PageFetcher>,
    pub store: Arc<dyn CatalogStore>,
    pub materializer: ImageMaterializer,
    pub gate: DownloadGate,
    pub queue: Arc<JobQueue>,
}

impl SyncContext {
    /// Default wiring: HTTP fetcher, local catalog store and WebP codec.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(
            HttpFetcher::new(settings.user_agent.clone(), settings.http_timeout)
                .context("build http fetcher")?,
        );
        Ok(Self {
            materializer: ImageMaterializer::new(
                Arc::clone(&fetcher),
                Arc::new(WebpCodec),
                settings.image_dir.clone(),
            ),
            fetcher,
            store: Arc::new(LocalFsCatalogStore::new(settings.data_dir.clone())),
            gate: DownloadGate::new(settings.max_parallel_downloads),
            queue: Arc::new(JobQueue::new(settings.queue_capacity)),
        })
    }

    pub fn for_provider(&self, provider: Arc<ProviderConfig>) -> CatalogSync {
        CatalogSync {
            provider,
            ctx: self.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub entry: CatalogEntry,
    pub created: bool,
    pub new_chapters: usize,
    pub scheduled_jobs: Vec<Uuid>,
}

/// Merge operations bound to one provider.
#[derive(Clone)]
pub struct CatalogSync {
    provider: Arc<ProviderConfig>,
    ctx: SyncContext,
}

impl CatalogSync {
    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    fn scraper(&self) -> ChapterScraper {
        ChapterScraper::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.ctx.fetcher),
            self.ctx.materializer.clone(),
            self.ctx.gate.clone(),
            Arc::clone(&self.ctx.store),
        )
    }

    pub async fn merge(&self, url: &str, scrape_pages: bool) -> SyncResult<MergeOutcome> {
        let listing_url = self.provider.resolve(url)?;
        let html = self.ctx.fetcher.fetch_text(listing_url.as_str()).await?;
        let listing = parse_listing(&html, &self.provider)?;
        tracing::info!(
            provider = %self.provider.name,
            title = %listing.title,
            chapters = listing.chapters.len(),
            "listing scraped"
        );

        let outcome = match self.ctx.store.find_by_title(&listing.title).await? {
            Some(entry) => self.merge_existing(entry, listing, scrape_pages).await?,
            None => self.create_new(listing_url.as_str(), listing, scrape_pages).await?,
        };
        tracing::info!(
            title = %outcome.entry.title,
            created = outcome.created,
            new_chapters = outcome.new_chapters,
            scheduled = outcome.scheduled_jobs.len(),
            "merge finished"
        );
        Ok(outcome)
    }

    async fn create_new(
        &self,
        url: &str,
        listing: ScrapedListing,
        scrape_pages: bool,
    ) -> SyncResult<MergeOutcome> {
        let thumbnail_url = listing
            .thumbnail_url
            .as_deref()
            .and_then(|raw| self.absolute(raw));
        let local_thumbnail = match &thumbnail_url {
            Some(thumb) => {
                self.ctx
                    .materializer
                    .materialize_thumbnail(&listing.title, thumb)
                    .await
            }
            None => None,
        };

        let now = Utc::now();
        let mut entry = CatalogEntry {
            id: Uuid::nil(),
            title: listing.title,
            author: listing.author,
            description: listing.description,
            kind: listing.kind,
            status: listing.status,
            genres: listing.genres,
            url: url.to_string(),
            thumbnail_url,
            local_thumbnail,
            chapters: listing.chapters.into_iter().map(to_chapter).collect(),
            created_at: now,
            updated_at: now,
        };
        self.ctx.store.create(&mut entry).await?;

        let scheduled_jobs = if scrape_pages {
            self.schedule(&entry, &entry.chapters).await?
        } else {
            Vec::new()
        };
        Ok(MergeOutcome {
            new_chapters: entry.chapters.len(),
            entry,
            created: true,
            scheduled_jobs,
        })
    }

    async fn merge_existing(
        &self,
        mut entry: CatalogEntry,
        listing: ScrapedListing,
        scrape_pages: bool,
    ) -> SyncResult<MergeOutcome> {
        let max_known = entry.max_chapter_number();
        let fresh = listing
            .chapters
            .into_iter()
            .filter(|chapter| chapter.number > max_known)
            .map(to_chapter)
            .collect::<Vec<_>>();
        let new_chapters = fresh.len();
        let mut changed = new_chapters > 0;
        entry.chapters.extend(fresh);

        if entry.local_thumbnail.is_none() {
            let thumb = listing
                .thumbnail_url
                .as_deref()
                .and_then(|raw| self.absolute(raw))
                .or_else(|| entry.thumbnail_url.clone());
            if let Some(thumb) = thumb {
                if let Some(local) = self
                    .ctx
                    .materializer
                    .materialize_thumbnail(&entry.title, &thumb)
                    .await
                {
                    entry.thumbnail_url = Some(thumb);
                    entry.local_thumbnail = Some(local);
                    changed = true;
                }
            }
        }

        if changed {
            self.ctx.store.update(&mut entry).await?;
        } else {
            tracing::debug!(title = %entry.title, max_known, "catalog entry already up to date");
        }

        let scheduled_jobs = if scrape_pages && new_chapters > 0 {
            let appended = &entry.chapters[entry.chapters.len() - new_chapters..];
            self.schedule(&entry, appended).await?
        } else {
            Vec::new()
        };
        Ok(MergeOutcome {
            entry,
            created: false,
            new_chapters,
            scheduled_jobs,
        })
    }

    async fn schedule(&self, entry: &CatalogEntry, chapters: &[Chapter]) -> SyncResult<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            let job = ChapterPageJob {
                entry_id: entry.id,
                chapter_id: chapter.id,
                title: entry.title.clone(),
                chapter_number: chapter.number,
                link: chapter.link.clone(),
            };
            let scraper = self.scraper();
            let id = self
                .ctx
                .queue
                .enqueue(job.label(), job.chapter_number, move |cancel| async move {
                    scraper
                        .run(&job, &cancel)
                        .await
                        .map_err(anyhow::Error::from)
                })
                .await
                .map_err(|_| SyncError::Cancelled)?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn absolute(&self, raw: &str) -> Option<String> {
        match self.provider.resolve(raw) {
            Ok(url) => Some(url.to_string()),
            Err(err) => {
                tracing::warn!(url = raw, error = %err, "ignoring thumbnail locator");
                None
            }
        }
    }
}

fn to_chapter(scraped: ScrapedChapter) -> Chapter {
    Chapter {
        views: scraped.views,
        uploaded_at: scraped.uploaded_at,
        ..Chapter::new(scraped.number, scraped.link)
    }
}
