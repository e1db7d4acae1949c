use std::collections::BTreeMap;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::page::PageInfo;
use crate::session::{WikiSession, ensure_no_api_error};

/// Content placeholder (and `get_text` result) for titles with no page.
pub const MISSING_MARKER: &str = "DNE";

/// Maintenance categories never reported by [`WikiQuery::get_categories`].
pub const SKIP_CATEGORIES: [&str; 3] = [
    "Category:Pages using DynamicPageList parser function",
    "Category:Pages with broken file links",
    "Category:Stubs",
];

pub const DEFAULT_SECTION_FORMAT: &str = "wiki";

const MAX_ALIAS_HOPS: usize = 8;
const MAX_CONTINUATIONS: usize = 500;

/// Join titles into the `|`-separated form accepted by the `titles` parameter.
pub fn join_titles(titles: &[String]) -> String {
    titles.join("|")
}

/// Per-page results keyed by the title the API returned.
///
/// The API may rewrite an input title (normalization, redirect resolution)
/// before answering, so lookups by input title should go through
/// [`PageMap::resolve`] rather than [`PageMap::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMap<T> {
    entries: BTreeMap<String, T>,
    aliases: BTreeMap<String, String>,
}

impl<T> Default for PageMap<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            aliases: BTreeMap::new(),
        }
    }
}

impl<T> PageMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, title: impl Into<String>, value: T) {
        self.entries.insert(title.into(), value);
    }

    pub fn add_alias(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.aliases.insert(from.into(), to.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, title: &str) -> Option<&T> {
        self.entries.get(title)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &T)> {
        self.entries.iter()
    }

    /// Title the API answered under for `title`, after following rewrites.
    pub fn canonical_title<'a>(&'a self, title: &'a str) -> &'a str {
        let mut current = title;
        for _ in 0..MAX_ALIAS_HOPS {
            if self.entries.contains_key(current) {
                break;
            }
            match self.aliases.get(current) {
                Some(next) => current = next,
                None => break,
            }
        }
        current
    }

    pub fn resolve(&self, title: &str) -> Option<&T> {
        self.entries.get(self.canonical_title(title))
    }

    /// Remove the entry for `title`; a map with exactly one entry yields it
    /// even when no rewrite links the two titles.
    pub fn take(&mut self, title: &str) -> Option<T> {
        let key = self.canonical_title(title).to_string();
        if let Some(value) = self.entries.remove(&key) {
            return Some(value);
        }
        if self.entries.len() == 1 {
            return self.entries.pop_first().map(|(_, value)| value);
        }
        None
    }

    pub fn extend(&mut self, other: PageMap<T>) {
        self.entries.extend(other.entries);
        self.aliases.extend(other.aliases);
    }
}

/// Read-only wiki queries. `titles` is one title or several joined with `|`.
pub trait WikiQuery {
    fn get_content(&self, titles: &str) -> Result<PageMap<Vec<String>>>;
    fn get_info(&self, titles: &str) -> Result<PageMap<PageInfo>>;
    fn get_categories(&self, titles: &str) -> Result<PageMap<Vec<String>>>;
    fn get_text(&self, title: &str, plain_text: bool, section_format: &str) -> Result<String>;
}

pub struct QueryClient<'a> {
    session: &'a WikiSession,
}

impl<'a> QueryClient<'a> {
    pub fn new(session: &'a WikiSession) -> Self {
        Self { session }
    }

    /// Run an `action=query` request, following `continue` until the
    /// result set is complete.
    fn fetch_pages(&self, params: &[(&str, String)]) -> Result<QueryPages> {
        let mut merged = QueryPages::default();
        let mut continuation: Vec<(String, String)> = Vec::new();

        for _ in 0..MAX_CONTINUATIONS {
            let response = {
                let mut request: Vec<(&str, String)> = vec![
                    ("action", "query".to_string()),
                    ("redirects", "true".to_string()),
                ];
                request.extend(params.iter().cloned());
                for (key, value) in &continuation {
                    request.push((key.as_str(), value.clone()));
                }
                self.session.post_json(&request)?
            };
            let (pages, next) = parse_query_response(response)?;
            merged.merge(pages);

            match next {
                Some(next) if next != continuation => {
                    debug!(pages = merged.pages.len(), "continuing query");
                    continuation = next;
                }
                Some(_) => bail!("MediaWiki API returned a repeating continuation"),
                None => return Ok(merged),
            }
        }

        bail!("MediaWiki query exceeded {MAX_CONTINUATIONS} continuation requests")
    }
}

impl WikiQuery for QueryClient<'_> {
    fn get_content(&self, titles: &str) -> Result<PageMap<Vec<String>>> {
        let pages = self.fetch_pages(&[
            ("prop", "revisions".to_string()),
            ("titles", titles.to_string()),
            ("rvslots", "*".to_string()),
            ("rvprop", "content".to_string()),
        ])?;
        content_map(pages)
    }

    fn get_info(&self, titles: &str) -> Result<PageMap<PageInfo>> {
        let pages = self.fetch_pages(&[
            ("prop", "info".to_string()),
            ("titles", titles.to_string()),
        ])?;
        info_map(pages)
    }

    fn get_categories(&self, titles: &str) -> Result<PageMap<Vec<String>>> {
        let pages = self.fetch_pages(&[
            ("prop", "categories".to_string()),
            ("titles", titles.to_string()),
            ("cllimit", "max".to_string()),
        ])?;
        categories_map(pages)
    }

    fn get_text(&self, title: &str, plain_text: bool, section_format: &str) -> Result<String> {
        let mut params = vec![
            ("prop", "extracts".to_string()),
            ("exsectionformat", section_format.to_string()),
            ("titles", title.to_string()),
        ];
        if plain_text {
            params.push(("explaintext", "true".to_string()));
        }
        let pages = self.fetch_pages(&params)?;
        text_of(pages)
    }
}

#[derive(Debug, Default)]
struct QueryPages {
    pages: BTreeMap<String, PageEntry>,
    rewrites: Vec<TitleRewrite>,
}

impl QueryPages {
    fn merge(&mut self, other: QueryPages) {
        for (key, entry) in other.pages {
            match self.pages.get_mut(&key) {
                Some(existing) => existing.merge(entry),
                None => {
                    self.pages.insert(key, entry);
                }
            }
        }
        for rewrite in other.rewrites {
            if !self.rewrites.contains(&rewrite) {
                self.rewrites.push(rewrite);
            }
        }
    }

    fn into_map<T, F>(self, mut convert: F) -> Result<PageMap<T>>
    where
        F: FnMut(&str, PageEntry) -> Result<T>,
    {
        let mut map = PageMap::new();
        for rewrite in self.rewrites {
            map.add_alias(rewrite.from, rewrite.to);
        }
        for (key, entry) in self.pages {
            let title = entry.title.clone();
            let value = convert(&key, entry)?;
            map.insert(title, value);
        }
        Ok(map)
    }
}

/// Missing and invalid titles come back under negative ids (`-1`, `-2`, ...).
fn is_missing_key(key: &str) -> bool {
    key.starts_with('-')
}

fn parse_query_response(response: Value) -> Result<(QueryPages, Option<Vec<(String, String)>>)> {
    ensure_no_api_error(&response)?;
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode query API response")?;
    let query = parsed
        .query
        .ok_or_else(|| anyhow::anyhow!("missing query payload in API response"))?;
    let pages = query
        .pages
        .ok_or_else(|| anyhow::anyhow!("missing query.pages in API response"))?;

    let mut rewrites = query.normalized;
    rewrites.extend(query.redirects);

    let continuation = parsed
        .continuation
        .filter(|values| !values.is_empty())
        .map(|values| {
            values
                .into_iter()
                .map(|(key, value)| {
                    let value = match value {
                        Value::String(text) => text,
                        other => other.to_string(),
                    };
                    (key, value)
                })
                .collect::<Vec<_>>()
        });

    Ok((QueryPages { pages, rewrites }, continuation))
}

fn content_map(pages: QueryPages) -> Result<PageMap<Vec<String>>> {
    pages.into_map(|key, entry| {
        if is_missing_key(key) {
            return Ok(vec![MISSING_MARKER.to_string()]);
        }
        let content = entry
            .revisions
            .into_iter()
            .next()
            .and_then(Revision::into_content)
            .ok_or_else(|| anyhow::anyhow!("missing revision content for {}", entry.title))?;
        Ok(content.split('\n').map(ToString::to_string).collect())
    })
}

fn info_map(pages: QueryPages) -> Result<PageMap<PageInfo>> {
    pages.into_map(|key, entry| {
        if is_missing_key(key) {
            return Ok(PageInfo::missing(entry.title));
        }
        let id = match entry.pageid {
            Some(id) => id,
            None => key
                .parse::<i64>()
                .with_context(|| format!("invalid page id key {key} for {}", entry.title))?,
        };
        let length = entry
            .length
            .ok_or_else(|| anyhow::anyhow!("missing page length for {}", entry.title))?;
        Ok(PageInfo::existing(id, entry.title, length))
    })
}

fn categories_map(pages: QueryPages) -> Result<PageMap<Vec<String>>> {
    pages.into_map(|key, entry| {
        if is_missing_key(key) {
            return Ok(Vec::new());
        }
        Ok(entry
            .categories
            .unwrap_or_default()
            .into_iter()
            .map(|category| category.title)
            .filter(|title| !SKIP_CATEGORIES.contains(&title.as_str()))
            .collect())
    })
}

fn text_of(pages: QueryPages) -> Result<String> {
    if pages.pages.len() > 1 {
        bail!("extract queries accept a single title");
    }
    let (key, entry) = pages
        .pages
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("extract query returned no pages"))?;
    if is_missing_key(&key) {
        return Ok(MISSING_MARKER.to_string());
    }
    entry
        .extract
        .ok_or_else(|| anyhow::anyhow!("missing extract for {}", entry.title))
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    query: Option<QueryPayload>,
    #[serde(rename = "continue")]
    continuation: Option<BTreeMap<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct QueryPayload {
    #[serde(default)]
    normalized: Vec<TitleRewrite>,
    #[serde(default)]
    redirects: Vec<TitleRewrite>,
    pages: Option<BTreeMap<String, PageEntry>>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct TitleRewrite {
    from: String,
    to: String,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    pageid: Option<i64>,
    title: String,
    length: Option<i64>,
    #[serde(default)]
    revisions: Vec<Revision>,
    categories: Option<Vec<CategoryItem>>,
    extract: Option<String>,
}

impl PageEntry {
    fn merge(&mut self, other: PageEntry) {
        if let Some(categories) = other.categories {
            self.categories
                .get_or_insert_with(Vec::new)
                .extend(categories);
        }
        if self.revisions.is_empty() {
            self.revisions = other.revisions;
        }
        if self.extract.is_none() {
            self.extract = other.extract;
        }
        if self.length.is_none() {
            self.length = other.length;
        }
        if self.pageid.is_none() {
            self.pageid = other.pageid;
        }
    }
}

#[derive(Debug, Deserialize)]
struct Revision {
    slots: Option<RevisionSlots>,
    #[serde(rename = "*")]
    legacy_content: Option<String>,
}

impl Revision {
    fn into_content(self) -> Option<String> {
        self.slots
            .and_then(|slots| slots.main)
            .and_then(|main| main.content)
            .or(self.legacy_content)
    }
}

#[derive(Debug, Deserialize)]
struct RevisionSlots {
    main: Option<MainSlot>,
}

#[derive(Debug, Deserialize)]
struct MainSlot {
    #[serde(rename = "*")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CategoryItem {
    title: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn parse(response: Value) -> QueryPages {
        let (pages, _) = parse_query_response(response).expect("parse response");
        pages
    }

    #[test]
    fn content_splits_lines_and_marks_missing_pages() {
        let pages = parse(json!({
            "batchcomplete": "",
            "query": {
                "pages": {
                    "1204": {
                        "pageid": 1204,
                        "ns": 0,
                        "title": "Metal Ingot",
                        "revisions": [{"slots": {"main": {
                            "contentmodel": "wikitext",
                            "contentformat": "text/x-wiki",
                            "*": "{{Infobox item\n|name=Metal Ingot\n}}"
                        }}}]
                    },
                    "-1": {"ns": 0, "title": "Unobtainium", "missing": ""}
                }
            }
        }));
        let content = content_map(pages).expect("content");
        assert_eq!(content.len(), 2);
        assert_eq!(
            content.get("Metal Ingot").expect("ingot"),
            &vec![
                "{{Infobox item".to_string(),
                "|name=Metal Ingot".to_string(),
                "}}".to_string()
            ]
        );
        assert_eq!(
            content.get("Unobtainium").expect("missing page"),
            &vec![MISSING_MARKER.to_string()]
        );
    }

    #[test]
    fn content_without_revision_is_malformed() {
        let pages = parse(json!({
            "query": {"pages": {"7": {"pageid": 7, "ns": 0, "title": "Hide"}}}
        }));
        let error = content_map(pages).expect_err("must fail");
        assert!(error.to_string().contains("missing revision content for Hide"));
    }

    #[test]
    fn info_uses_sentinels_for_every_negative_key() {
        let pages = parse(json!({
            "query": {
                "pages": {
                    "88": {"pageid": 88, "ns": 0, "title": "Stone", "length": 3120},
                    "-1": {"ns": 0, "title": "Ghost A", "missing": ""},
                    "-2": {"ns": 0, "title": "Ghost B", "missing": ""}
                }
            }
        }));
        let info = info_map(pages).expect("info");
        assert_eq!(info.get("Stone"), Some(&PageInfo::existing(88, "Stone", 3120)));
        for title in ["Ghost A", "Ghost B"] {
            let entry = info.get(title).expect("ghost");
            assert!(!entry.exists);
            assert_eq!(entry.id, -1);
            assert_eq!(entry.length, -1);
        }
    }

    #[test]
    fn categories_filter_denylist_and_default_to_empty() {
        let pages = parse(json!({
            "query": {
                "pages": {
                    "10": {
                        "pageid": 10,
                        "title": "Mod:Primal Fear/Apex Meat",
                        "categories": [
                            {"ns": 14, "title": "Category:Primal Fear"},
                            {"ns": 14, "title": "Category:Stubs"},
                            {"ns": 14, "title": "Category:Pages with broken file links"},
                            {"ns": 14, "title": "Category:Pages using DynamicPageList parser function"},
                            {"ns": 14, "title": "Category:Resources"}
                        ]
                    },
                    "11": {"pageid": 11, "title": "Berry"},
                    "-1": {"title": "Nowhere", "missing": ""}
                }
            }
        }));
        let categories = categories_map(pages).expect("categories");
        assert_eq!(
            categories.get("Mod:Primal Fear/Apex Meat").expect("apex"),
            &vec![
                "Category:Primal Fear".to_string(),
                "Category:Resources".to_string()
            ]
        );
        assert_eq!(categories.get("Berry"), Some(&Vec::new()));
        assert_eq!(categories.get("Nowhere"), Some(&Vec::new()));
        for (_, list) in categories.iter() {
            for skipped in SKIP_CATEGORIES {
                assert!(!list.iter().any(|category| category == skipped));
            }
        }
    }

    #[test]
    fn rewrites_resolve_input_titles() {
        let pages = parse(json!({
            "query": {
                "normalized": [{"from": "metal_ingot", "to": "Metal ingot"}],
                "redirects": [{"from": "Metal ingot", "to": "Metal Ingot"}],
                "pages": {"1204": {"pageid": 1204, "title": "Metal Ingot", "length": 40}}
            }
        }));
        let info = info_map(pages).expect("info");
        assert!(info.get("metal_ingot").is_none());
        assert_eq!(info.canonical_title("metal_ingot"), "Metal Ingot");
        assert_eq!(info.resolve("metal_ingot").map(|page| page.id), Some(1204));
        assert!(info.resolve("Unrelated").is_none());
    }

    #[test]
    fn take_falls_back_to_sole_entry() {
        let mut map = PageMap::new();
        map.insert("Canonical", 1);
        assert_eq!(map.take("requested"), Some(1));
        assert!(map.is_empty());

        let mut map = PageMap::new();
        map.insert("A", 1);
        map.insert("B", 2);
        assert_eq!(map.take("C"), None);
        assert_eq!(map.take("B"), Some(2));
    }

    #[test]
    fn continuation_pages_merge_categories() {
        let (first, next) = parse_query_response(json!({
            "continue": {"clcontinue": "10|Resources", "continue": "||"},
            "query": {"pages": {"10": {"pageid": 10, "title": "Hide", "categories": [
                {"title": "Category:Crafting"}
            ]}}}
        }))
        .expect("first");
        assert_eq!(
            next,
            Some(vec![
                ("clcontinue".to_string(), "10|Resources".to_string()),
                ("continue".to_string(), "||".to_string()),
            ])
        );
        let second = parse(json!({
            "query": {"pages": {"10": {"pageid": 10, "title": "Hide", "categories": [
                {"title": "Category:Resources"}
            ]}}}
        }));

        let mut merged = QueryPages::default();
        merged.merge(first);
        merged.merge(second);
        let categories = categories_map(merged).expect("categories");
        assert_eq!(
            categories.get("Hide").expect("hide"),
            &vec![
                "Category:Crafting".to_string(),
                "Category:Resources".to_string()
            ]
        );
    }

    #[test]
    fn text_returns_extract_or_marker() {
        let pages = parse(json!({
            "query": {"pages": {"5": {"pageid": 5, "title": "Fiber", "extract": "Fiber is a resource."}}}
        }));
        assert_eq!(text_of(pages).expect("text"), "Fiber is a resource.");

        let pages = parse(json!({
            "query": {"pages": {"-1": {"title": "Nope", "missing": ""}}}
        }));
        assert_eq!(text_of(pages).expect("text"), MISSING_MARKER);
    }

    #[test]
    fn api_error_and_missing_pages_are_reported() {
        let error = parse_query_response(json!({
            "error": {"code": "toomanyvalues", "info": "Too many values supplied for parameter \"titles\"."}
        }))
        .expect_err("must fail");
        assert!(error.to_string().contains("[toomanyvalues]"));

        let error = parse_query_response(json!({"batchcomplete": "", "query": {}}))
            .expect_err("must fail");
        assert!(error.to_string().contains("query.pages"));
    }

    #[test]
    fn join_titles_uses_pipe() {
        let titles = vec!["A".to_string(), "Mod:B/C".to_string()];
        assert_eq!(join_titles(&titles), "A|Mod:B/C");
        assert_eq!(join_titles(&[]), "");
    }
}
