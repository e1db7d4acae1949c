use std::cell::Cell;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::SessionConfig;
use crate::edit::EditClient;
use crate::query::QueryClient;

pub const LOGIN_SUCCESS: &str = "Success";

/// Result of a single `action=login` attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginStatus {
    /// Literal `login.result` returned by the wiki (`Success`, `Failed`, ...).
    pub result: String,
    pub reason: Option<String>,
}

impl LoginStatus {
    pub fn is_success(&self) -> bool {
        self.result == LOGIN_SUCCESS
    }
}

/// Authenticated HTTP session against a MediaWiki `api.php`.
///
/// Owns the cookie jar; [`QueryClient`] and [`EditClient`] borrow it, so every
/// call made through them shares the login state established here.
pub struct WikiSession {
    client: Client,
    config: SessionConfig,
    request_count: Cell<usize>,
}

impl WikiSession {
    pub fn new(config: SessionConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .cookie_store(true)
            .user_agent(config.user_agent.clone());
        if let Some(timeout_ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder
            .build()
            .context("failed to build MediaWiki HTTP client")?;

        Ok(Self {
            client,
            config,
            request_count: Cell::new(0),
        })
    }

    /// Build a session and make the single login attempt with the configured
    /// bot credentials.
    pub fn connect(config: SessionConfig) -> Result<(Self, LoginStatus)> {
        let session = Self::new(config)?;
        let status = session.login()?;
        Ok((session, status))
    }

    pub fn query(&self) -> QueryClient<'_> {
        QueryClient::new(self)
    }

    pub fn edit(&self) -> EditClient<'_> {
        EditClient::new(self)
    }

    pub fn api_url(&self) -> &str {
        &self.config.api_url
    }

    pub fn request_count(&self) -> usize {
        self.request_count.get()
    }

    pub fn login_token(&self) -> Result<String> {
        let response = self.get_json(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", "login".to_string()),
        ])?;
        parse_token(response, TokenKind::Login)
    }

    /// Fetch a fresh CSRF token. Write operations call this every time rather
    /// than reusing a previous token.
    pub fn csrf_token(&self) -> Result<String> {
        let response = self.get_json(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
        ])?;
        parse_token(response, TokenKind::Csrf)
    }

    pub fn login(&self) -> Result<LoginStatus> {
        let login_token = self.login_token()?;
        let response = self.post_json(&[
            ("action", "login".to_string()),
            ("lgname", self.config.username.clone()),
            ("lgpassword", self.config.password.clone()),
            ("lgtoken", login_token),
        ])?;
        let status = parse_login_status(response)?;
        debug!(result = %status.result, "login attempt finished");
        Ok(status)
    }

    pub(crate) fn get_json(&self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = request_pairs(params);
        debug!(action = action_of(params), "GET {}", self.config.api_url);
        self.request_count.set(self.request_count.get() + 1);
        let response = self
            .client
            .get(&self.config.api_url)
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_response(response)
    }

    pub(crate) fn post_json(&self, params: &[(&str, String)]) -> Result<Value> {
        let pairs = request_pairs(params);
        debug!(action = action_of(params), "POST {}", self.config.api_url);
        self.request_count.set(self.request_count.get() + 1);
        let response = self
            .client
            .post(&self.config.api_url)
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_response(response)
    }
}

/// Empty values are sent as-is; callers leave out parameters they don't want.
pub(crate) fn request_pairs(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 1);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.extend(
        params
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone())),
    );
    pairs
}

/// Turn a top-level `error` object into an `Err`.
pub(crate) fn ensure_no_api_error(response: &Value) -> Result<()> {
    let Some(error) = response.get("error") else {
        return Ok(());
    };
    bail!(
        "MediaWiki API error [{}]: {}",
        error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error"),
        error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info")
    );
}

fn action_of<'a>(params: &'a [(&str, String)]) -> &'a str {
    params
        .iter()
        .find(|(key, _)| *key == "action")
        .map(|(_, value)| value.as_str())
        .unwrap_or("unknown")
}

fn decode_response(response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        bail!("MediaWiki API request failed with HTTP {status}");
    }
    response
        .json()
        .context("failed to decode MediaWiki API JSON response")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Login,
    Csrf,
}

fn parse_token(response: Value, kind: TokenKind) -> Result<String> {
    ensure_no_api_error(&response)?;
    let parsed: TokenQueryResponse =
        serde_json::from_value(response).context("failed to decode token response")?;
    let tokens = parsed.query.tokens.unwrap_or_default();
    let token = match kind {
        TokenKind::Login => tokens.logintoken,
        TokenKind::Csrf => tokens.csrftoken,
    };
    token.ok_or_else(|| match kind {
        TokenKind::Login => anyhow::anyhow!("failed to get MediaWiki login token"),
        TokenKind::Csrf => anyhow::anyhow!("failed to get MediaWiki csrf token"),
    })
}

fn parse_login_status(response: Value) -> Result<LoginStatus> {
    ensure_no_api_error(&response)?;
    let parsed: LoginResponse =
        serde_json::from_value(response).context("failed to decode login response")?;
    let login = parsed
        .login
        .ok_or_else(|| anyhow::anyhow!("missing login payload in API response"))?;
    let result = login
        .result
        .ok_or_else(|| anyhow::anyhow!("missing login.result in API response"))?;
    Ok(LoginStatus {
        result,
        reason: login.reason,
    })
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    login: Option<LoginPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}
