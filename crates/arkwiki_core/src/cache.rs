use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::page::{PageInfo, PageRecord, fetch_page, simple_title};
use crate::query::{PageMap, WikiQuery, join_titles};

/// Titles per request in the batched strategy (the API's `titles` limit for
/// non-bot accounts).
pub const BATCH_SIZE: usize = 50;
pub const PAGES_FILE: &str = "pages.json";
pub const FAST_PAGES_FILE: &str = "pages_fast.json";

/// Cache file being rebuilt from scratch. The file is truncated to `{}` on
/// creation and rewritten in full after every record, so an interrupted run
/// leaves every record processed so far on disk.
struct CacheWriter {
    path: PathBuf,
    entries: Map<String, Value>,
}

impl CacheWriter {
    fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let writer = Self {
            path: path.to_path_buf(),
            entries: Map::new(),
        };
        writer.flush()?;
        Ok(writer)
    }

    fn push(&mut self, key: &str, record: &PageRecord) -> Result<()> {
        let value = serde_json::to_value(record)
            .with_context(|| format!("failed to serialize cache entry for {key}"))?;
        self.entries.insert(key.to_string(), value);
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        let rendered = serde_json::to_string(&self.entries)
            .with_context(|| format!("failed to serialize {}", self.path.display()))?;
        fs::write(&self.path, rendered)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

/// Write `records` as a cache file keyed by each record's title.
pub fn write_cache(path: &Path, records: &[PageRecord]) -> Result<()> {
    let mut writer = CacheWriter::create(path)?;
    for record in records {
        writer.push(record.title(), record)?;
    }
    Ok(())
}

/// Authoritative cache: one full [`fetch_page`] round trip per title.
pub fn build_page_cache<Q: WikiQuery + ?Sized>(
    query: &Q,
    titles: &[String],
    path: &Path,
    verbose: bool,
) -> Result<Vec<PageRecord>> {
    let mut writer = CacheWriter::create(path)?;
    let file_name = display_name(path);
    let mut records = Vec::with_capacity(titles.len());

    for title in titles {
        if verbose {
            info!("Adding {title} to {file_name}");
        }
        let record = fetch_page(query, title)
            .with_context(|| format!("failed to fetch page {title}"))?;
        writer.push(title, &record)?;
        records.push(record);
    }

    Ok(records)
}

/// Fast cache: info, categories and content are queried for
/// [`BATCH_SIZE`] titles at a time.
///
/// Categories gathered this way are advisory only; compare against the
/// per-page cache with [`compare_caches`] before relying on them.
pub fn build_fast_cache<Q: WikiQuery + ?Sized>(
    query: &Q,
    titles: &[String],
    path: &Path,
) -> Result<Vec<PageRecord>> {
    let mut writer = CacheWriter::create(path)?;

    let mut all_info: PageMap<PageInfo> = PageMap::new();
    let mut all_categories: PageMap<Vec<String>> = PageMap::new();
    let mut all_content: PageMap<Vec<String>> = PageMap::new();

    for (index, batch) in titles.chunks(BATCH_SIZE).enumerate() {
        let joined = join_titles(batch);
        debug!(batch = index, titles = batch.len(), "querying batch");
        all_info.extend(query.get_info(&joined)?);
        all_categories.extend(query.get_categories(&joined)?);
        all_content.extend(query.get_content(&joined)?);
    }

    let mut records = Vec::with_capacity(titles.len());
    for title in titles {
        let info = all_info
            .resolve(title)
            .cloned()
            .ok_or_else(|| anyhow!("batched info query returned no entry for {title}"))?;
        let categories = all_categories
            .resolve(title)
            .cloned()
            .ok_or_else(|| anyhow!("batched categories query returned no entry for {title}"))?;
        let content = all_content
            .resolve(title)
            .cloned()
            .ok_or_else(|| anyhow!("batched content query returned no entry for {title}"))?;

        let record = PageRecord::new(
            title.as_str(),
            simple_title(title),
            info,
            categories,
            content,
        );
        writer.push(title, &record)?;
        records.push(record);
    }

    Ok(records)
}

/// Records in file order.
pub fn load_cache_list(path: &Path) -> Result<Vec<PageRecord>> {
    let entries = read_cache(path)?;
    let mut records = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let record: PageRecord = serde_json::from_value(value).with_context(|| {
            format!("invalid cache entry {key} in {}", path.display())
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Records keyed by their `title`.
pub fn load_cache_map(path: &Path) -> Result<BTreeMap<String, PageRecord>> {
    Ok(load_cache_list(path)?
        .into_iter()
        .map(|record| (record.title().to_string(), record))
        .collect())
}

fn read_cache(path: &Path) -> Result<Map<String, Value>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheMismatch {
    pub title: String,
    pub info_differs: bool,
    pub content_differs: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheComparison {
    pub compared: usize,
    /// Info or content disagreements. Both strategies should agree on these.
    pub mismatches: Vec<CacheMismatch>,
    /// Category disagreements. Expected for redirects and odd category
    /// structures, so these are only warnings.
    pub category_warnings: Vec<String>,
    pub only_in_authoritative: Vec<String>,
    pub only_in_fast: Vec<String>,
}

impl CacheComparison {
    pub fn is_consistent(&self) -> bool {
        self.mismatches.is_empty()
            && self.only_in_authoritative.is_empty()
            && self.only_in_fast.is_empty()
    }
}

pub fn compare_caches(
    authoritative: &BTreeMap<String, PageRecord>,
    fast: &BTreeMap<String, PageRecord>,
) -> CacheComparison {
    let mut comparison = CacheComparison::default();

    for (title, expected) in authoritative {
        let Some(actual) = fast.get(title) else {
            comparison.only_in_authoritative.push(title.clone());
            continue;
        };
        comparison.compared += 1;

        let info_differs = expected.info() != actual.info();
        let content_differs = expected.content() != actual.content();
        if info_differs || content_differs {
            comparison.mismatches.push(CacheMismatch {
                title: title.clone(),
                info_differs,
                content_differs,
            });
        }
        if expected.categories() != actual.categories() {
            comparison.category_warnings.push(title.clone());
        }
    }

    comparison.only_in_fast = fast
        .keys()
        .filter(|title| !authoritative.contains_key(*title))
        .cloned()
        .collect();

    comparison
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
