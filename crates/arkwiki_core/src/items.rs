use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub const DEFAULT_ITEMS_FILE: &str = "items.txt";

/// Read a newline-separated title list, sorted. Blank lines are skipped.
pub fn load_titles(path: &Path) -> Result<Vec<String>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_titles(&content))
}

pub fn parse_titles(content: &str) -> Vec<String> {
    let mut titles: Vec<String> = content
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(ToString::to_string)
        .collect();
    titles.sort();
    titles
}
