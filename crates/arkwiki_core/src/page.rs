use std::fmt;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::query::{DEFAULT_SECTION_FORMAT, WikiQuery};

pub const MOD_PREFIX: &str = "Mod:";
pub const MISSING_PAGE_ID: i64 = -1;
pub const MISSING_PAGE_LENGTH: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub id: i64,
    pub title: String,
    pub length: i64,
    pub exists: bool,
}

impl PageInfo {
    pub fn existing(id: i64, title: impl Into<String>, length: i64) -> Self {
        Self {
            id,
            title: title.into(),
            length,
            exists: true,
        }
    }

    pub fn missing(title: impl Into<String>) -> Self {
        Self {
            id: MISSING_PAGE_ID,
            title: title.into(),
            length: MISSING_PAGE_LENGTH,
            exists: false,
        }
    }
}

/// Short display name for a title.
///
/// `Mod:Name/Item` becomes `Item` (the segment after the first `/`),
/// `Mod:Name` becomes `Name`, anything else is returned unchanged.
pub fn simple_title(title: &str) -> String {
    if !title.contains(MOD_PREFIX) {
        return title.to_string();
    }
    match title.split('/').nth(1) {
        Some(segment) => segment.to_string(),
        None => title.replace(MOD_PREFIX, ""),
    }
}

/// Everything cached about one wiki page.
///
/// Serializes to the cache-file entry shape
/// `{title, simple_title, info, categories, content}`; existence is read from
/// `info` so it cannot disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    title: String,
    simple_title: String,
    info: PageInfo,
    categories: Vec<String>,
    content: Vec<String>,
}

impl PageRecord {
    pub fn new(
        title: impl Into<String>,
        simple_title: impl Into<String>,
        info: PageInfo,
        categories: Vec<String>,
        content: Vec<String>,
    ) -> Self {
        Self {
            title: title.into(),
            simple_title: simple_title.into(),
            info,
            categories,
            content,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn simple_title(&self) -> &str {
        &self.simple_title
    }

    pub fn info(&self) -> &PageInfo {
        &self.info
    }

    pub fn exists(&self) -> bool {
        self.info.exists
    }

    pub fn categories(&self) -> &[String] {
        &self.categories
    }

    pub fn content(&self) -> &[String] {
        &self.content
    }

    /// Plain-text extract of the page in `wiki` section format.
    pub fn fetch_text<Q: WikiQuery + ?Sized>(&self, query: &Q) -> Result<String> {
        query.get_text(&self.title, true, DEFAULT_SECTION_FORMAT)
    }

    pub fn summary(&self) -> String {
        format!(
            "title: {}\nsimple_title: {}\ninfo: id={} title={} length={} exists={}\nexists: {}\ncategories: {:?}\ncontent: {:?}",
            self.title,
            self.simple_title,
            self.info.id,
            self.info.title,
            self.info.length,
            self.info.exists,
            self.exists(),
            self.categories,
            self.content
        )
    }
}

impl fmt::Display for PageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exists() {
            write!(f, "{} (exists)", self.simple_title)
        } else {
            write!(f, "{} (doesn't exist)", self.simple_title)
        }
    }
}

/// Build a record for one title with three sequential queries
/// (info, categories, content).
pub fn fetch_page<Q: WikiQuery + ?Sized>(query: &Q, title: &str) -> Result<PageRecord> {
    let info = query
        .get_info(title)?
        .take(title)
        .ok_or_else(|| anyhow!("info query returned no entry for {title}"))?;
    let categories = query
        .get_categories(title)?
        .take(title)
        .ok_or_else(|| anyhow!("categories query returned no entry for {title}"))?;
    let content = query
        .get_content(title)?
        .take(title)
        .ok_or_else(|| anyhow!("content query returned no entry for {title}"))?;

    Ok(PageRecord::new(
        title,
        simple_title(title),
        info,
        categories,
        content,
    ))
}
