use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::cache::{
    CacheComparison, FAST_PAGES_FILE, PAGES_FILE, build_fast_cache, build_page_cache,
    compare_caches, load_cache_list, load_cache_map,
};
use crate::config::SessionConfig;
use crate::items::{DEFAULT_ITEMS_FILE, load_titles};
use crate::page::PageRecord;
use crate::query::WikiQuery;
use crate::session::{LoginStatus, WikiSession};
use crate::template::{render_item_list, unsafe_template_titles};

pub const DEFAULT_CACHE_DIR: &str = "json";

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub items_path: PathBuf,
    pub cache_dir: PathBuf,
    pub skip_fast: bool,
    pub verbose: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            items_path: PathBuf::from(DEFAULT_ITEMS_FILE),
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            skip_fast: false,
            verbose: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub template: String,
    pub pages: Vec<PageRecord>,
    pub fast_pages: Option<Vec<PageRecord>>,
    pub comparison: Option<CacheComparison>,
    pub request_count: usize,
}

#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Login did not return `Success`; no cache was touched.
    LoginFailed(LoginStatus),
    Rendered(RunReport),
}

/// Read the item list, log in, rebuild both caches and render the
/// `{{ItemList}}` template.
pub fn run_item_list(config: &SessionConfig, options: &RunOptions) -> Result<RunOutcome> {
    let titles = load_titles(&options.items_path)?;
    info!(titles = titles.len(), "loaded item list");

    let (session, status) = WikiSession::connect(config.clone())?;
    let outcome = run_item_list_with_api(&session.query(), status, &titles, options)?;
    Ok(match outcome {
        RunOutcome::Rendered(mut report) => {
            report.request_count = session.request_count();
            RunOutcome::Rendered(report)
        }
        failed => failed,
    })
}

/// Continue a run after the login attempt. Nothing is queried or written
/// unless `status` is `Success`.
pub fn run_item_list_with_api<Q: WikiQuery + ?Sized>(
    query: &Q,
    status: LoginStatus,
    titles: &[String],
    options: &RunOptions,
) -> Result<RunOutcome> {
    if !status.is_success() {
        warn!(
            result = %status.result,
            reason = status.reason.as_deref().unwrap_or("<none>"),
            "login failed"
        );
        return Ok(RunOutcome::LoginFailed(status));
    }
    Ok(RunOutcome::Rendered(build_item_list(query, titles, options)?))
}

/// Cache and render stage of [`run_item_list`], for an already
/// authenticated query source.
pub fn build_item_list<Q: WikiQuery + ?Sized>(
    query: &Q,
    titles: &[String],
    options: &RunOptions,
) -> Result<RunReport> {
    let pages_path = options.cache_dir.join(PAGES_FILE);
    build_page_cache(query, titles, &pages_path, options.verbose)
        .context("failed to build page cache")?;
    let pages = load_cache_list(&pages_path)?;

    let (fast_pages, comparison) = if options.skip_fast {
        (None, None)
    } else {
        let fast_path = options.cache_dir.join(FAST_PAGES_FILE);
        build_fast_cache(query, titles, &fast_path).context("failed to build fast page cache")?;
        let fast_pages = load_cache_list(&fast_path)?;
        let comparison = compare_caches(
            &load_cache_map(&pages_path)?,
            &load_cache_map(&fast_path)?,
        );
        log_comparison(&comparison);
        (Some(fast_pages), Some(comparison))
    };

    for title in unsafe_template_titles(titles) {
        warn!(%title, "title contains template syntax and will corrupt the ItemList output");
    }

    Ok(RunReport {
        template: render_item_list(titles),
        pages,
        fast_pages,
        comparison,
        request_count: 0,
    })
}

fn log_comparison(comparison: &CacheComparison) {
    for mismatch in &comparison.mismatches {
        warn!(
            title = %mismatch.title,
            info_differs = mismatch.info_differs,
            content_differs = mismatch.content_differs,
            "page and fast caches disagree"
        );
    }
    for title in comparison
        .only_in_authoritative
        .iter()
        .chain(&comparison.only_in_fast)
    {
        warn!(%title, "title present in only one cache");
    }
    for title in &comparison.category_warnings {
        warn!(%title, "fast cache categories differ from page cache");
    }
    info!(
        compared = comparison.compared,
        mismatches = comparison.mismatches.len(),
        category_warnings = comparison.category_warnings.len(),
        "compared page caches"
    );
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::*;
    use crate::page::PageInfo;
    use crate::query::{MISSING_MARKER, PageMap};

    struct StaticWiki {
        pages: BTreeMap<String, i64>,
    }

    impl StaticWiki {
        fn each<T>(&self, titles: &str, convert: impl Fn(&str, Option<i64>) -> T) -> PageMap<T> {
            let mut map = PageMap::new();
            for title in titles.split('|') {
                map.insert(title, convert(title, self.pages.get(title).copied()));
            }
            map
        }
    }

    impl WikiQuery for StaticWiki {
        fn get_content(&self, titles: &str) -> Result<PageMap<Vec<String>>> {
            Ok(self.each(titles, |title, id| match id {
                Some(_) => vec![format!("{title} body")],
                None => vec![MISSING_MARKER.to_string()],
            }))
        }

        fn get_info(&self, titles: &str) -> Result<PageMap<PageInfo>> {
            Ok(self.each(titles, |title, id| match id {
                Some(id) => PageInfo::existing(id, title, 12),
                None => PageInfo::missing(title),
            }))
        }

        fn get_categories(&self, titles: &str) -> Result<PageMap<Vec<String>>> {
            Ok(self.each(titles, |_, id| match id {
                Some(_) => vec!["Category:Items".to_string()],
                None => Vec::new(),
            }))
        }

        fn get_text(&self, _title: &str, _plain_text: bool, _format: &str) -> Result<String> {
            Ok(String::new())
        }
    }

    #[test]
    fn build_item_list_writes_both_caches_and_renders_template() {
        let temp = tempdir().expect("tempdir");
        let wiki = StaticWiki {
            pages: BTreeMap::from([("Hide".to_string(), 1), ("Stone".to_string(), 2)]),
        };
        let titles = vec!["Hide".to_string(), "Ghost".to_string(), "Stone".to_string()];
        let options = RunOptions {
            items_path: temp.path().join("items.txt"),
            cache_dir: temp.path().join("json"),
            skip_fast: false,
            verbose: false,
        };

        let report = build_item_list(&wiki, &titles, &options).expect("build");
        assert_eq!(report.template, "{{ItemList|noDlcIcon = 1|Hide|Ghost|Stone}}");
        assert_eq!(report.pages.len(), 3);
        assert!(!report.pages[1].exists());
        assert_eq!(report.fast_pages.as_ref().map(Vec::len), Some(3));
        let comparison = report.comparison.expect("comparison");
        assert!(comparison.is_consistent());
        assert!(comparison.category_warnings.is_empty());
        assert!(temp.path().join("json").join(PAGES_FILE).exists());
        assert!(temp.path().join("json").join(FAST_PAGES_FILE).exists());
    }

    #[test]
    fn failed_login_writes_no_cache() {
        let temp = tempdir().expect("tempdir");
        let wiki = StaticWiki {
            pages: BTreeMap::from([("Hide".to_string(), 1)]),
        };
        let cache_dir = temp.path().join("json");
        let options = RunOptions {
            items_path: temp.path().join("items.txt"),
            cache_dir: cache_dir.clone(),
            skip_fast: false,
            verbose: false,
        };
        let status = LoginStatus {
            result: "Failed".to_string(),
            reason: Some("Incorrect username or password entered.".to_string()),
        };

        let titles = vec!["Hide".to_string()];
        let outcome =
            run_item_list_with_api(&wiki, status.clone(), &titles, &options).expect("run");
        match outcome {
            RunOutcome::LoginFailed(returned) => assert_eq!(returned, status),
            RunOutcome::Rendered(_) => panic!("expected login failure"),
        }
        assert!(!cache_dir.join(PAGES_FILE).exists());
        assert!(!cache_dir.join(FAST_PAGES_FILE).exists());
    }

    #[test]
    fn successful_login_renders() {
        let temp = tempdir().expect("tempdir");
        let wiki = StaticWiki {
            pages: BTreeMap::from([("Hide".to_string(), 1)]),
        };
        let options = RunOptions {
            items_path: temp.path().join("items.txt"),
            cache_dir: temp.path().to_path_buf(),
            skip_fast: true,
            verbose: false,
        };
        let status = LoginStatus {
            result: "Success".to_string(),
            reason: None,
        };

        let outcome =
            run_item_list_with_api(&wiki, status, &["Hide".to_string()], &options).expect("run");
        let RunOutcome::Rendered(report) = outcome else {
            panic!("expected rendered report");
        };
        assert_eq!(report.template, "{{ItemList|noDlcIcon = 1|Hide}}");
        assert!(temp.path().join(PAGES_FILE).exists());
    }

    #[test]
    fn skip_fast_leaves_fast_cache_untouched() {
        let temp = tempdir().expect("tempdir");
        let wiki = StaticWiki {
            pages: BTreeMap::new(),
        };
        let options = RunOptions {
            items_path: temp.path().join("items.txt"),
            cache_dir: temp.path().to_path_buf(),
            skip_fast: true,
            verbose: false,
        };

        let report = build_item_list(&wiki, &[], &options).expect("build");
        assert_eq!(report.template, "{{ItemList|noDlcIcon = 1}}");
        assert!(report.pages.is_empty());
        assert!(report.fast_pages.is_none());
        assert!(!temp.path().join(FAST_PAGES_FILE).exists());
    }
}
