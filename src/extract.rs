//! Field extraction from listing and chapter markup.
//!
//! Parsed documents never leave these functions; callers get owned values
//! so nothing here is held across an await point.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::provider::{FieldRule, ProviderConfig};

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedListing {
    pub title: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub kind: Option<String>,
    pub status: Option<String>,
    pub genres: Vec<String>,
    pub thumbnail_url: Option<String>,
    pub chapters: Vec<ScrapedChapter>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapedChapter {
    pub number: f64,
    pub link: String,
    pub views: u64,
    pub uploaded_at: Option<DateTime<Utc>>,
}

struct CompiledRule<'a> {
    rule: &'a FieldRule,
    selector: Option<Selector>,
}

impl<'a> CompiledRule<'a> {
    fn new(rule: &'a FieldRule) -> SyncResult<Self> {
        let trimmed = rule.selector.trim();
        let selector = if trimmed.is_empty() {
            None
        } else {
            Some(Selector::parse(trimmed).map_err(|err| {
                SyncError::Config(format!("invalid selector {trimmed:?}: {err:?}"))
            })?)
        };
        Ok(Self { rule, selector })
    }

    fn first<'b>(&self, scope: ElementRef<'b>) -> Option<ElementRef<'b>> {
        match &self.selector {
            Some(selector) => scope.select(selector).next(),
            None => Some(scope),
        }
    }

    fn all<'b>(&self, scope: ElementRef<'b>) -> Vec<ElementRef<'b>> {
        match &self.selector {
            Some(selector) => scope.select(selector).collect(),
            None => vec![scope],
        }
    }

    fn read(&self, element: ElementRef<'_>) -> Option<String> {
        let value = match &self.rule.attr {
            Some(attr) => element.value().attr(attr)?.trim().to_string(),
            None => element.text().collect::<Vec<_>>().join(" "),
        };
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        (!value.is_empty()).then_some(value)
    }

    /// Like `read`, but without an explicit attribute falls back to the
    /// usual image source attributes.
    fn read_image(&self, element: ElementRef<'_>) -> Option<String> {
        if self.rule.attr.is_some() {
            return self.read(element);
        }
        ["src", "data-src"]
            .iter()
            .filter_map(|attr| element.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn first_value(&self, scope: ElementRef<'_>) -> Option<String> {
        self.first(scope).and_then(|element| self.read(element))
    }
}

fn compile_optional(rule: Option<&FieldRule>) -> SyncResult<Option<CompiledRule<'_>>> {
    rule.map(CompiledRule::new).transpose()
}

pub fn parse_listing(html: &str, provider: &ProviderConfig) -> SyncResult<ScrapedListing> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let title_rule = CompiledRule::new(&provider.title)?;
    let title = title_rule.first_value(root).ok_or_else(|| {
        SyncError::parse(format!(
            "title not found with selector {:?}",
            provider.title.selector
        ))
    })?;

    let optional_text = |rule: Option<&FieldRule>| -> SyncResult<Option<String>> {
        Ok(compile_optional(rule)?.and_then(|rule| rule.first_value(root)))
    };

    let thumbnail_url = match compile_optional(provider.thumbnail.as_ref())? {
        Some(rule) => rule
            .first(root)
            .and_then(|element| rule.read_image(element))
            .map(|url| strip_resize_params(&url)),
        None => None,
    };

    let genres = match compile_optional(provider.genres.as_ref())? {
        Some(rule) => rule
            .all(root)
            .into_iter()
            .filter_map(|element| rule.read(element))
            .collect(),
        None => Vec::new(),
    };

    Ok(ScrapedListing {
        title,
        author: optional_text(provider.author.as_ref())?,
        description: optional_text(provider.description.as_ref())?,
        kind: optional_text(provider.kind.as_ref())?,
        status: optional_text(provider.status.as_ref())?,
        genres,
        thumbnail_url,
        chapters: parse_chapters(root, provider)?,
    })
}

fn parse_chapters(
    root: ElementRef<'_>,
    provider: &ProviderConfig,
) -> SyncResult<Vec<ScrapedChapter>> {
    let rows = CompiledRule::new(&provider.chapter_rows)?;
    let link = CompiledRule::new(&provider.chapter_link)?;
    let number = CompiledRule::new(&provider.chapter_number)?;
    let views = compile_optional(provider.chapter_views.as_ref())?;
    let date = compile_optional(provider.chapter_date.as_ref())?;

    let mut chapters = Vec::new();
    for row in rows.all(root) {
        let Some(href) = link.first_value(row) else {
            continue;
        };
        let Some(chapter_number) = number
            .first_value(row)
            .and_then(|text| parse_chapter_number(&text))
        else {
            tracing::debug!(link = %href, "skipping chapter row without a number");
            continue;
        };

        chapters.push(ScrapedChapter {
            number: chapter_number,
            link: href,
            views: views
                .as_ref()
                .and_then(|rule| rule.first_value(row))
                .map(|text| parse_count(&text))
                .unwrap_or(0),
            uploaded_at: date
                .as_ref()
                .and_then(|rule| rule.first_value(row))
                .and_then(|text| parse_upload_date(&text, &provider.date_format)),
        });
    }

    chapters.sort_by(|a, b| a.number.total_cmp(&b.number));
    chapters.dedup_by(|later, earlier| later.number == earlier.number);
    Ok(chapters)
}

/// Page image locators in document order.
pub fn parse_page_images(html: &str, provider: &ProviderConfig) -> SyncResult<Vec<String>> {
    let document = Html::parse_document(html);
    let rule = CompiledRule::new(&provider.page_images)?;
    Ok(rule
        .all(document.root_element())
        .into_iter()
        .filter_map(|element| rule.read_image(element))
        .collect())
}

pub fn parse_chapter_number(text: &str) -> Option<f64> {
    NUMBER_RE
        .find(text)
        .and_then(|found| found.as_str().parse::<f64>().ok())
        .filter(|number| number.is_finite())
}

/// View counters such as `1.2k`, `3M` or `15`.
pub fn parse_count(text: &str) -> u64 {
    let text = text.trim().to_ascii_lowercase();
    let Some(found) = NUMBER_RE.find(&text) else {
        return 0;
    };
    let Ok(mut number) = found.as_str().parse::<f64>() else {
        return 0;
    };
    if text.ends_with('k') {
        number *= 1_000.0;
    } else if text.ends_with('m') {
        number *= 1_000_000.0;
    } else if text.ends_with('b') {
        number *= 1_000_000_000.0;
    }
    number.round() as u64
}

pub fn parse_upload_date(text: &str, format: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
        return Some(datetime.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(text, format) {
        return date.and_hms_opt(0, 0, 0).map(|datetime| datetime.and_utc());
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|datetime| datetime.with_timezone(&Utc))
}

/// Drops resize parameters from a thumbnail locator: the query string and a
/// trailing `=`-style path segment (`/cover.jpg/w=500`).
pub fn strip_resize_params(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            let path = drop_resize_segment(url.path()).to_string();
            url.set_path(&path);
            url.to_string()
        }
        Err(_) => {
            let path = raw.split(['?', '#']).next().unwrap_or_default();
            drop_resize_segment(path).to_string()
        }
    }
}

fn drop_resize_segment(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((parent, last)) if last.contains('=') => &path[..parent.len() + 1],
        _ => path,
    }
}
