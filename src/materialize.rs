use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::ImageFormat;
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::fetch::PageFetcher;
use crate::model::format_chapter_number;
use crate::sanitize::title_dir_name;

pub const TARGET_EXTENSION: &str = "webp";
pub const THUMBNAIL_FILE_NAME: &str = "thumbnail.webp";

pub trait ImageCodec: Send + Sync {
    /// Re-encodes arbitrary image bytes into the target format.
    fn transcode(&self, bytes: &[u8]) -> SyncResult<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WebpCodec;

impl ImageCodec for WebpCodec {
    fn transcode(&self, bytes: &[u8]) -> SyncResult<Vec<u8>> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|err| SyncError::Decode(format!("decode: {err}")))?;
        // The WebP encoder only takes 8-bit RGB(A).
        let rgba = image::DynamicImage::ImageRgba8(decoded.to_rgba8());
        let mut out = Cursor::new(Vec::new());
        rgba.write_to(&mut out, ImageFormat::WebP)
            .map_err(|err| SyncError::Decode(format!("encode webp: {err}")))?;
        Ok(out.into_inner())
    }
}

/// Fetches remote images and stores them under the storage root in the
/// target format.
#[derive(Clone)]
pub struct ImageMaterializer {
    fetcher: Arc<dyn PageFetcher>,
    codec: Arc<dyn ImageCodec>,
    root: PathBuf,
}

impl ImageMaterializer {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        codec: Arc<dyn ImageCodec>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            codec,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the forward-slash path of the written asset, relative to the
    /// storage root.
    pub async fn materialize(
        &self,
        image_url: &str,
        relative_dir: &str,
        file_name: &str,
    ) -> SyncResult<String> {
        let bytes = self.fetcher.fetch_bytes(image_url).await?;

        let data = if is_target_format(image_url) {
            bytes
        } else {
            let codec = Arc::clone(&self.codec);
            tokio::task::spawn_blocking(move || codec.transcode(&bytes))
                .await
                .map_err(|err| SyncError::Decode(format!("join codec task: {err}")))??
        };

        let relative_path = format!("{}/{file_name}", relative_dir.trim_matches('/'));
        let path = self.root.join(&relative_path);
        crate::fsutil::write_atomic(&path, &data).await?;

        tracing::debug!(url = image_url, path = %relative_path, bytes = data.len(), "materialized image");
        Ok(relative_path)
    }

    /// Page `index` (zero based) lands at `<title>/<chapter>/<index + 1>.webp`.
    pub async fn materialize_page(
        &self,
        title: &str,
        chapter_number: f64,
        image_url: &str,
        index: usize,
    ) -> SyncResult<String> {
        let dir = format!(
            "{}/{}",
            title_dir(title)?,
            format_chapter_number(chapter_number)
        );
        let file_name = page_file_name(index);
        self.materialize(image_url, &dir, &file_name).await
    }

    /// Thumbnail failures are not fatal; they read as "no thumbnail".
    pub async fn materialize_thumbnail(&self, title: &str, image_url: &str) -> Option<String> {
        let result = match title_dir(title) {
            Ok(dir) => self.materialize(image_url, &dir, THUMBNAIL_FILE_NAME).await,
            Err(err) => Err(err),
        };
        match result {
            Ok(path) => Some(path),
            Err(err) => {
                tracing::warn!(title, url = image_url, error = %err, "thumbnail not materialized");
                None
            }
        }
    }
}

pub fn page_file_name(index: usize) -> String {
    format!("{}.{TARGET_EXTENSION}", index + 1)
}

fn title_dir(title: &str) -> SyncResult<String> {
    title_dir_name(title).ok_or_else(|| {
        SyncError::parse(format!("title {title:?} does not map to a directory name"))
    })
}

fn is_target_format(image_url: &str) -> bool {
    let path = match Url::parse(image_url) {
        Ok(url) => url.path().to_string(),
        Err(_) => image_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };
    Path::new(&path)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case(TARGET_EXTENSION))
}

/// A 1x1 PNG encoded by the same library that later decodes it.
#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    let pixel = image::RgbaImage::from_pixel(1, 1, image::Rgba([200, 40, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(pixel)
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}
