use std::fmt;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::session::WikiSession;

/// Outcome of a `createonly` edit, tagged by which top-level key the API
/// answered with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum CreateOutcome {
    /// `edit.result`, normally `Success`.
    Success { code: String },
    /// `error.code`, e.g. `articleexists` when the page is already there.
    Failure { code: String },
}

impl CreateOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Success { code } | Self::Failure { code } => code,
        }
    }
}

impl fmt::Display for CreateOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { code } => write!(f, "success: {code}"),
            Self::Failure { code } => write!(f, "failure: {code}"),
        }
    }
}

pub trait WikiEdit {
    /// Append `text` on a new line at the end of `title`. Returns the raw
    /// API response.
    fn append_to_page(
        &self,
        title: &str,
        text: &str,
        summary: &str,
        no_create: bool,
    ) -> Result<Value>;
    fn create_page(&self, title: &str, text: &str, summary: &str) -> Result<CreateOutcome>;
}

pub struct EditClient<'a> {
    session: &'a WikiSession,
}

impl<'a> EditClient<'a> {
    pub fn new(session: &'a WikiSession) -> Self {
        Self { session }
    }
}

impl WikiEdit for EditClient<'_> {
    fn append_to_page(
        &self,
        title: &str,
        text: &str,
        summary: &str,
        no_create: bool,
    ) -> Result<Value> {
        let token = self.session.csrf_token()?;
        debug!(%title, no_create, "appending to page");
        self.session
            .post_json(&append_params(title, text, summary, no_create, token))
    }

    fn create_page(&self, title: &str, text: &str, summary: &str) -> Result<CreateOutcome> {
        let token = self.session.csrf_token()?;
        debug!(%title, "creating page");
        let response = self
            .session
            .post_json(&create_params(title, text, summary, token))?;
        parse_create_outcome(response)
            .with_context(|| format!("unexpected create response for {title}"))
    }
}

fn append_params(
    title: &str,
    text: &str,
    summary: &str,
    no_create: bool,
    token: String,
) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("action", "edit".to_string()),
        ("title", title.to_string()),
        ("minor", "true".to_string()),
        ("bot", "true".to_string()),
        ("appendtext", format!("\n{text}")),
        ("summary", summary.to_string()),
    ];
    if no_create {
        params.push(("nocreate", "true".to_string()));
    }
    params.push(("token", token));
    params
}

fn create_params(
    title: &str,
    text: &str,
    summary: &str,
    token: String,
) -> Vec<(&'static str, String)> {
    vec![
        ("action", "edit".to_string()),
        ("title", title.to_string()),
        ("bot", "true".to_string()),
        ("createonly", "true".to_string()),
        ("text", text.to_string()),
        ("summary", summary.to_string()),
        ("token", token),
    ]
}

fn parse_create_outcome(response: Value) -> Result<CreateOutcome> {
    let parsed: EditResponse =
        serde_json::from_value(response).context("failed to decode edit response")?;
    if let Some(edit) = parsed.edit {
        let code = edit
            .result
            .ok_or_else(|| anyhow::anyhow!("missing edit.result in API response"))?;
        return Ok(CreateOutcome::Success { code });
    }
    if let Some(error) = parsed.error {
        let code = error
            .code
            .ok_or_else(|| anyhow::anyhow!("missing error.code in API response"))?;
        return Ok(CreateOutcome::Failure { code });
    }
    bail!("edit response carried neither an edit nor an error payload")
}

#[derive(Debug, Deserialize, Default)]
struct EditResponse {
    edit: Option<EditPayload>,
    error: Option<ErrorPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct EditPayload {
    result: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ErrorPayload {
    code: Option<String>,
}
