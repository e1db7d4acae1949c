use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILENAME: &str = "arkwiki.toml";
pub const DEFAULT_USER_AGENT: &str = concat!("arkwiki/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BotConfig {
    #[serde(default)]
    pub wiki: WikiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub api_url: Option<String>,
    pub user_agent: Option<String>,
    pub bot_username: Option<String>,
    pub bot_password: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Fully resolved settings handed to [`crate::session::WikiSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub api_url: String,
    pub user_agent: String,
    pub username: String,
    pub password: String,
    pub timeout_ms: Option<u64>,
}

impl BotConfig {
    /// Resolve against the process environment: env > config > default.
    pub fn resolve(&self) -> Result<SessionConfig> {
        self.resolve_with(env_override)
    }

    pub fn resolve_with<F>(&self, lookup: F) -> Result<SessionConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = non_blank(lookup("WIKI_API_URL").as_deref())
            .or_else(|| non_blank(self.wiki.api_url.as_deref()))
            .ok_or_else(|| {
                anyhow::anyhow!("wiki api_url is not configured (set WIKI_API_URL or [wiki].api_url)")
            })?;
        Url::parse(&api_url).with_context(|| format!("invalid WIKI_API_URL: {api_url}"))?;

        let user_agent = non_blank(lookup("WIKI_USER_AGENT").as_deref())
            .or_else(|| non_blank(self.wiki.user_agent.as_deref()))
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());

        let username = non_blank(lookup("WIKI_BOT_USER").as_deref())
            .or_else(|| non_blank(self.wiki.bot_username.as_deref()))
            .ok_or_else(|| {
                anyhow::anyhow!("bot username is not configured (set WIKI_BOT_USER)")
            })?;
        let password = verbatim_non_blank(lookup("WIKI_BOT_PASS").as_deref())
            .or_else(|| verbatim_non_blank(self.wiki.bot_password.as_deref()))
            .ok_or_else(|| {
                anyhow::anyhow!("bot password is not configured (set WIKI_BOT_PASS)")
            })?;

        let timeout_ms = match non_blank(lookup("WIKI_HTTP_TIMEOUT_MS").as_deref()) {
            Some(value) => Some(
                value
                    .parse::<u64>()
                    .with_context(|| format!("invalid WIKI_HTTP_TIMEOUT_MS: {value}"))?,
            ),
            None => self.wiki.timeout_ms,
        };
        if timeout_ms == Some(0) {
            bail!("timeout_ms must be greater than zero");
        }

        Ok(SessionConfig {
            api_url,
            user_agent,
            username,
            password,
            timeout_ms,
        })
    }
}

/// Load and parse a BotConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<BotConfig> {
    if !config_path.exists() {
        return Ok(BotConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: BotConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

fn env_override(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn non_blank(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Like [`non_blank`] but keeps surrounding whitespace, for secrets.
fn verbatim_non_blank(value: Option<&str>) -> Option<String> {
    value
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
}
