use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<String>,

    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_thumbnail: Option<String>,

    pub chapters: Vec<Chapter>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CatalogEntry {
    /// Highest ordering key already stored, 0 when there are no chapters.
    pub fn max_chapter_number(&self) -> f64 {
        self.chapters
            .iter()
            .map(|chapter| chapter.number)
            .fold(0.0, f64::max)
    }

    pub fn chapter(&self, chapter_id: Uuid) -> Option<&Chapter> {
        self.chapters.iter().find(|chapter| chapter.id == chapter_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub id: Uuid,
    pub number: f64,
    pub link: String,
    pub views: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pages: Vec<Page>,
}

impl Chapter {
    pub fn new(number: f64, link: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            number,
            link: link.into(),
            views: 0,
            uploaded_at: None,
            pages: Vec::new(),
        }
    }

    /// Directory segment used for this chapter's assets (`10`, `10.5`).
    pub fn number_segment(&self) -> String {
        format_chapter_number(self.number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_image: Option<String>,
}

impl Page {
    pub fn new(image_url: impl Into<String>, local_image: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            image_url: image_url.into(),
            local_image,
        }
    }
}

pub fn format_chapter_number(number: f64) -> String {
    format!("{number}")
}
