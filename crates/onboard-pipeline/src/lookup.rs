//! Reference lookup: repository name to connectivity id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use onboard_tools::{ToolOutput, Toolset};

/// Ways a repository lookup can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LookupError {
    #[error("Repository '{repository}' was not found")]
    NotFound { repository: String },

    #[error("Lookup timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Lookup failed: {0}")]
    Transport(String),

    #[error("Could not retrieve connectivity id for repository '{repository}'")]
    MissingConnectivityId { repository: String },
}

/// Capability resolving a repository name to its connectivity id.
#[async_trait]
pub trait ReferenceLookup: Send + Sync {
    async fn connectivity_id(&self, repository_name: &str) -> Result<String, LookupError>;
}

// ---------------------------------------------------------------------------
// ToolsetLookup
// ---------------------------------------------------------------------------

/// [`ReferenceLookup`] backed by a named tool on a tool server.
pub struct ToolsetLookup {
    toolset: Arc<dyn Toolset>,
    tool_name: String,
    timeout: Duration,
}

impl ToolsetLookup {
    pub fn new(toolset: Arc<dyn Toolset>, tool_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            toolset,
            tool_name: tool_name.into(),
            timeout,
        }
    }

    async fn call(&self, repository_name: &str) -> Result<ToolOutput, LookupError> {
        let tool = self
            .toolset
            .get_tool(&self.tool_name)
            .await
            .map_err(|e| transport_or_timeout(e, self.timeout))?
            .ok_or_else(|| {
                LookupError::Transport(format!("tool '{}' is not available", self.tool_name))
            })?;

        tool.call(json!({ "repository_name": repository_name }))
            .await
            .map_err(|e| transport_or_timeout(e, self.timeout))
    }
}

#[async_trait]
impl ReferenceLookup for ToolsetLookup {
    async fn connectivity_id(&self, repository_name: &str) -> Result<String, LookupError> {
        tracing::debug!(repository = repository_name, tool = %self.tool_name, "Looking up connectivity id");

        let output = tokio::time::timeout(self.timeout, self.call(repository_name))
            .await
            .map_err(|_| LookupError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })??;

        interpret_output(repository_name, &output)
    }
}

fn transport_or_timeout(err: onboard_types::OnboardError, timeout: Duration) -> LookupError {
    if err.is_timeout() {
        LookupError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        LookupError::Transport(err.to_string())
    }
}

/// Map a lookup tool's result onto a connectivity id or a [`LookupError`].
fn interpret_output(repository: &str, output: &ToolOutput) -> Result<String, LookupError> {
    let text = output.text();
    if output.is_error {
        return Err(classify_error(repository, output, &text));
    }

    let from_text = || serde_json::from_str::<serde_json::Value>(&text).ok();
    output
        .structured_content
        .clone()
        .or_else(from_text)
        .and_then(|v| {
            v.get("connectivity_id")
                .and_then(|id| id.as_str())
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
        })
        .ok_or_else(|| LookupError::MissingConnectivityId {
            repository: repository.to_string(),
        })
}

/// A flagged lookup error is "not found" only on an explicit signal: a 404
/// status field, or a `detail`/text saying "not found". Anything else is a
/// transport failure.
fn classify_error(repository: &str, output: &ToolOutput, text: &str) -> LookupError {
    let body = output
        .structured_content
        .clone()
        .or_else(|| serde_json::from_str::<serde_json::Value>(text).ok())
        .filter(|v| v.is_object());

    let says_not_found = |s: &str| s.to_lowercase().contains("not found");
    let not_found = match &body {
        Some(body) => {
            let status = ["status_code", "status"]
                .iter()
                .find_map(|key| body.get(*key).and_then(|v| v.as_u64()));
            let detail = body.get("detail").and_then(|d| d.as_str());
            match (status, detail) {
                (None, None) => says_not_found(text),
                _ => status == Some(404) || detail.map_or(false, says_not_found),
            }
        }
        None => says_not_found(text),
    };
    if not_found {
        return LookupError::NotFound {
            repository: repository.to_string(),
        };
    }

    let detail = body
        .as_ref()
        .and_then(|b| b.get("detail"))
        .map(|d| d.as_str().map(String::from).unwrap_or_else(|| d.to_string()))
        .filter(|d| !d.trim().is_empty())
        .unwrap_or_else(|| text.trim().to_string());
    if detail.is_empty() {
        LookupError::Transport("the lookup tool reported an error without details".to_string())
    } else {
        LookupError::Transport(detail)
    }
}
