mod support;

use std::sync::Arc;

use manga_sync::app::merge::SyncContext;
use manga_sync::app::runner::JobRunner;
use manga_sync::provider::ProviderRegistry;
use manga_sync::settings::Settings;
use tokio_util::sync::CancellationToken;

use support::{PAGE_WEBP, TITLE, TITLE_DIR, spawn_site, write_provider};

#[tokio::test]
async fn merge_and_drain_against_live_http() -> anyhow::Result<()> {
    let site = spawn_site();
    let temp = tempfile::TempDir::new()?;
    let providers = temp.path().join("providers");
    write_provider(&providers, &site.base_url);

    let settings = Settings::new(temp.path().join("data"), None, providers.clone())
        .with_overrides(|_| None)?;
    let registry = ProviderRegistry::load_dir(&providers)?;
    let ctx = SyncContext::from_settings(&settings)?;
    let sync = ctx.for_provider(registry.get("testsite")?);

    let outcome = sync.merge("/manga/omniscient/", true).await?;
    assert!(outcome.created);
    assert_eq!(outcome.entry.title, TITLE);
    assert_eq!(outcome.scheduled_jobs.len(), 2);
    assert_eq!(
        outcome.entry.thumbnail_url.as_deref(),
        Some(format!("{}/covers/omniscient.png", site.base_url).as_str())
    );
    assert_eq!(
        outcome.entry.local_thumbnail.as_deref(),
        Some(format!("{TITLE_DIR}/thumbnail.webp").as_str())
    );

    let runner = JobRunner::new(Arc::clone(&ctx.queue));
    let cancel = CancellationToken::new();
    let drained = {
        let queue = Arc::clone(&ctx.queue);
        async move {
            queue.close();
            runner.run(cancel).await;
        }
    };
    tokio::time::timeout(std::time::Duration::from_secs(30), drained).await?;
    assert!(ctx.queue.list_jobs().is_empty());

    let entry = ctx.store.get(outcome.entry.id).await?.expect("stored entry");
    let numbers = entry.chapters.iter().map(|c| c.number).collect::<Vec<_>>();
    assert_eq!(numbers, vec![1.0, 2.0]);
    assert_eq!(entry.chapters[0].views, 12_000);

    let first = entry.chapters[0]
        .pages
        .iter()
        .map(|page| page.local_image.clone().unwrap_or_default())
        .collect::<Vec<_>>();
    assert_eq!(
        first,
        vec![
            format!("{TITLE_DIR}/1/1.webp"),
            format!("{TITLE_DIR}/1/2.webp"),
        ]
    );
    assert_eq!(entry.chapters[1].pages.len(), 1);

    let images = &settings.image_dir;
    let transcoded = std::fs::read(images.join(TITLE_DIR).join("1").join("1.webp"))?;
    assert_eq!(&transcoded[8..12], b"WEBP");
    let verbatim = std::fs::read(images.join(TITLE_DIR).join("1").join("2.webp"))?;
    assert_eq!(verbatim, PAGE_WEBP);
    assert!(!images.join(TITLE_DIR).join("1").join("3.webp").exists());

    let again = sync.merge("/manga/omniscient/", true).await?;
    assert!(!again.created);
    assert_eq!(again.new_chapters, 0);
    assert!(again.scheduled_jobs.is_empty());
    Ok(())
}
