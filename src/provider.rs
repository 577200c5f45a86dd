use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{SyncError, SyncResult};

/// A CSS selector plus the attribute to read. Without an attribute the
/// element's trimmed text is used. An empty selector addresses the context
/// element itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FieldRuleRepr")]
pub struct FieldRule {
    pub selector: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FieldRuleRepr {
    Selector(String),
    Full {
        selector: String,
        #[serde(default)]
        attr: Option<String>,
    },
}

impl From<FieldRuleRepr> for FieldRule {
    fn from(repr: FieldRuleRepr) -> Self {
        match repr {
            FieldRuleRepr::Selector(selector) => Self {
                selector,
                attr: None,
            },
            FieldRuleRepr::Full { selector, attr } => Self { selector, attr },
        }
    }
}

impl FieldRule {
    pub fn text(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attr: None,
        }
    }

    pub fn attr(selector: impl Into<String>, attr: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            attr: Some(attr.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: String,
    pub base_url: String,

    pub title: FieldRule,
    #[serde(default)]
    pub thumbnail: Option<FieldRule>,
    #[serde(default)]
    pub author: Option<FieldRule>,
    #[serde(default)]
    pub description: Option<FieldRule>,
    #[serde(default)]
    pub kind: Option<FieldRule>,
    #[serde(default)]
    pub status: Option<FieldRule>,
    #[serde(default)]
    pub genres: Option<FieldRule>,

    pub chapter_rows: FieldRule,
    pub chapter_link: FieldRule,
    pub chapter_number: FieldRule,
    #[serde(default)]
    pub chapter_views: Option<FieldRule>,
    #[serde(default)]
    pub chapter_date: Option<FieldRule>,
    #[serde(default = "ProviderConfig::default_date_format")]
    pub date_format: String,

    pub page_images: FieldRule,
}

impl ProviderConfig {
    pub fn default_date_format() -> String {
        "%d/%m/%Y".to_string()
    }

    pub fn from_path(path: &Path) -> SyncResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| SyncError::Config(format!("read {}: {err}", path.display())))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        let mut config: Self = match extension.as_deref() {
            Some("json") => serde_json::from_str(&raw)
                .map_err(|err| SyncError::Config(format!("parse {}: {err}", path.display())))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&raw)
                .map_err(|err| SyncError::Config(format!("parse {}: {err}", path.display())))?,
            _ => {
                return Err(SyncError::Config(format!(
                    "unsupported provider file: {}",
                    path.display()
                )));
            }
        };

        if config.name.trim().is_empty() {
            config.name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
        }
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> SyncResult<()> {
        let base = Url::parse(&self.base_url).map_err(|err| {
            SyncError::Config(format!(
                "{}: invalid base_url {:?}: {err}",
                self.name, self.base_url
            ))
        })?;
        if base.scheme() != "http" && base.scheme() != "https" {
            return Err(SyncError::Config(format!(
                "{}: base_url must be http/https: {base}",
                self.name
            )));
        }
        for (field, rule) in [
            ("title", &self.title),
            ("chapter_rows", &self.chapter_rows),
            ("page_images", &self.page_images),
        ] {
            if rule.selector.trim().is_empty() {
                return Err(SyncError::Config(format!(
                    "{}: {field} selector must not be empty",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Absolute chapter address: links that are already absolute are kept,
    /// relative ones are joined onto the base address.
    pub fn resolve(&self, link: &str) -> SyncResult<Url> {
        if let Ok(url) = Url::parse(link) {
            return Ok(url);
        }
        let base = Url::parse(&self.base_url)
            .map_err(|err| SyncError::Config(format!("{}: invalid base_url: {err}", self.name)))?;
        base.join(link)
            .map_err(|err| SyncError::parse(format!("resolve link {link:?}: {err}")))
    }
}

/// Every provider config known to the process, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<ProviderConfig>>,
}

impl ProviderRegistry {
    pub fn load_dir(dir: &Path) -> SyncResult<Self> {
        let entries = std::fs::read_dir(dir).map_err(|err| {
            SyncError::Config(format!("read provider dir {}: {err}", dir.display()))
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| {
                SyncError::Config(format!("read provider dir {}: {err}", dir.display()))
            })?;
            let path = entry.path();
            let is_config = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext, "json" | "yaml" | "yml"));
            if path.is_file() && is_config {
                paths.push(path);
            }
        }
        paths.sort();

        let mut registry = Self::default();
        for path in paths {
            let config = ProviderConfig::from_path(&path)?;
            tracing::debug!(provider = %config.name, path = %path.display(), "loaded provider config");
            registry.insert(config)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, config: ProviderConfig) -> SyncResult<()> {
        if self.providers.contains_key(&config.name) {
            return Err(SyncError::Config(format!(
                "duplicate provider name: {}",
                config.name
            )));
        }
        self.providers.insert(config.name.clone(), Arc::new(config));
        Ok(())
    }

    pub fn get(&self, name: &str) -> SyncResult<Arc<ProviderConfig>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| SyncError::Config(format!("unknown provider: {name}")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn sample_provider(base_url: &str) -> ProviderConfig {
    ProviderConfig {
        name: "sample".to_string(),
        base_url: base_url.to_string(),
        title: FieldRule::text("h1.title"),
        thumbnail: Some(FieldRule::attr("div.cover img", "src")),
        author: Some(FieldRule::text("span.author")),
        description: None,
        kind: None,
        status: None,
        genres: Some(FieldRule::text("ul.genres li")),
        chapter_rows: FieldRule::text("table#chapters tr.row"),
        chapter_link: FieldRule::attr("td.name a", "href"),
        chapter_number: FieldRule::text("td.name a"),
        chapter_views: Some(FieldRule::text("td.views")),
        chapter_date: Some(FieldRule::text("td.date")),
        date_format: ProviderConfig::default_date_format(),
        page_images: FieldRule::attr("div#reader img", "src"),
    }
}
